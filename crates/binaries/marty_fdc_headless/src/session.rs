/*
    MartyPC
    https://github.com/dbalsom/martypc

    Copyright 2022-2025 Daniel Balsom

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    --------------------------------------------------------------------------

    session.rs

    Drives a floppy controller wired to loopback collaborators.
*/

use anyhow::{anyhow, bail, Error};

use marty_fdc::{
    device_traits::dma::DmaTransferType,
    devices::{
        fdc::{registers::*, ControllerPhase},
        loopback::{LoopbackDma, LoopbackIrq, LoopbackTimer},
        raw_image::RawSectorImage,
    },
    fdc_config::FdcConfig,
    FloppyController,
};

use crate::args::ChsArg;

const SECTOR_SIZE: usize = 512;
/// Bytes handed to the controller per DMA request.
const DMA_CHUNK: usize = 64;

pub struct SectorRead {
    pub data: Vec<u8>,
    pub status: Vec<u8>,
}

impl SectorRead {
    pub fn ok(&self) -> bool {
        self.status.first().is_some_and(|st0| st0 & 0xC0 == 0)
    }
}

/// A controller wired to loopback collaborators, driven the way BIOS code would drive it.
pub struct Session {
    fdc: FloppyController,
    irq: LoopbackIrq,
    dma: LoopbackDma,
    timer: LoopbackTimer,
    dma_channel: usize,
    pio: bool,
}

impl Session {
    pub fn new(config: &FdcConfig) -> Result<Self, Error> {
        let irq = LoopbackIrq::default();
        let dma = LoopbackDma::default();
        let timer = LoopbackTimer::default();
        let fdc = FloppyController::new(
            config,
            Box::new(irq.clone()),
            Box::new(dma.clone()),
            Box::new(timer.clone()),
        )?;
        Ok(Self {
            fdc,
            irq,
            dma,
            timer,
            dma_channel: config.dma_channel,
            pio: false,
        })
    }

    pub fn controller(&self) -> &FloppyController {
        &self.fdc
    }

    pub fn mount(&mut self, idx: usize, image: RawSectorImage) -> Result<(), Error> {
        self.fdc.attach_media(idx, Box::new(image))?;
        Ok(())
    }

    fn command(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.fdc.write_register(FDC_DATA_REGISTER, b);
        }
    }

    fn result(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        while self.fdc.phase() == ControllerPhase::ResultPhase {
            out.push(self.fdc.read_register(FDC_DATA_REGISTER));
        }
        out
    }

    fn sense(&mut self) -> Vec<u8> {
        self.command(&[0x08]);
        self.result()
    }

    /// Pulse the DOR reset line, answer the reset interrupt for each drive select, then
    /// specify timings and recalibrate `drive`.
    pub fn power_on(&mut self, drive: u8) -> Result<(), Error> {
        let unit = drive & 0x01;
        self.fdc.write_register(FDC_DIGITAL_OUTPUT_REGISTER, 0x08);
        self.fdc.write_register(FDC_DIGITAL_OUTPUT_REGISTER, 0x0C | unit | (0x10 << unit));
        if !self.irq.level() {
            bail!("Controller did not raise an interrupt after reset");
        }

        for _ in 0..4 {
            let status = self.sense();
            log::debug!("Reset sense: {:02X?}", status);
        }

        self.specify();
        self.command(&[0x07, unit]);
        let status = self.sense();
        log::debug!("Recalibrate drive {}: {:02X?}", unit, status);
        if status.first().is_some_and(|st0| st0 & 0xC0 != 0) {
            bail!("Recalibrate of drive {} failed: {:02X?}", unit, status);
        }
        Ok(())
    }

    fn specify(&mut self) {
        let hlt_nd = if self.pio { 0x03 } else { 0x02 };
        self.command(&[0x03, 0xAF, hlt_nd]);
    }

    pub fn set_pio(&mut self, pio: bool) {
        self.pio = pio;
        self.specify();
    }

    /// Read the id of the next sector under `head`, firing the controller's timer to complete it.
    pub fn read_id(&mut self, drive: u8, head: u8) -> Vec<u8> {
        self.command(&[0x4A, ((head & 0x01) << 2) | (drive & 0x01)]);
        if self.timer.pending().is_some() {
            self.timer.fire(&mut self.fdc);
        }
        self.result()
    }

    /// Read `count` sectors starting at `chs`, one track side per command.
    pub fn read_sectors(&mut self, drive: u8, chs: ChsArg, count: usize) -> Result<SectorRead, Error> {
        let unit = drive & 0x01;
        let geometry = self
            .fdc
            .drive(unit as usize)
            .map(|d| d.geometry())
            .ok_or_else(|| anyhow!("No drive {}", unit))?;
        let spt = geometry.s();
        let heads = geometry.h();
        if chs.s > spt {
            bail!("Sector {} is past the end of a {} sector track", chs.s, spt);
        }

        let (mut c, mut h, mut s) = (chs.c, chs.h, chs.s);
        let mut remaining = count;
        let mut read = SectorRead {
            data: Vec::with_capacity(count * SECTOR_SIZE),
            status: Vec::new(),
        };

        while remaining > 0 {
            let n = remaining.min((spt - s) as usize + 1);
            let eot = s + (n as u8) - 1;
            let len = n * SECTOR_SIZE;

            if !self.pio {
                self.dma
                    .program(self.dma_channel, DmaTransferType::Write, vec![0; len]);
            }
            self.command(&[0x46, (h << 2) | unit, c, h, s, 0x02, eot, 0x1B, 0xFF]);

            let moved = if self.pio {
                self.pio_read(&mut read.data, len)
            }
            else {
                let moved = self.dma.pump(&mut self.fdc, self.dma_channel, DMA_CHUNK);
                let memory = self.dma.memory();
                read.data.extend_from_slice(&memory[..moved.min(memory.len())]);
                moved
            };
            log::debug!(
                "Read c:{} h:{} s:{}-{}: {} bytes, irq: {}",
                c,
                h,
                s,
                eot,
                moved,
                self.irq.level()
            );

            read.status = self.result();
            if !read.ok() {
                break;
            }

            remaining -= n;
            s = 1;
            if h + 1 < heads {
                h += 1;
            }
            else {
                h = 0;
                c = c.wrapping_add(1);
            }
        }

        if self.timer.pending().is_some() {
            log::warn!("Timer still pending after read");
        }
        Ok(read)
    }

    fn pio_read(&mut self, out: &mut Vec<u8>, len: usize) -> usize {
        let mut moved = 0;
        while moved < len && self.fdc.phase() == ControllerPhase::ExecutionPhase {
            let msr = self.fdc.read_register(FDC_STATUS_REGISTER);
            if msr & (FDC_STATUS_MRQ | FDC_STATUS_DIO) != (FDC_STATUS_MRQ | FDC_STATUS_DIO) {
                break;
            }
            out.push(self.fdc.read_register(FDC_DATA_REGISTER));
            moved += 1;
        }
        moved
    }
}
