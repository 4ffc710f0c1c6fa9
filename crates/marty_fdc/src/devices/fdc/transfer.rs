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

    devices::fdc::transfer.rs

    The transfer engine. Moves sector data between backing storage and system
    memory for read, write, scan and format commands, over DMA or the data
    register.
*/

use strum_macros::Display;

use crate::{
    device_traits::{
        block_device::BlockDeviceError,
        dma::{DmaMemory, DmaTransferType},
    },
    device_types::{
        chs::DiskChs,
        fdc::{SECTOR_SIZE, SECTOR_SIZE_CODE},
    },
    devices::{
        fdc::{
            controller::{ControllerPhase, FloppyController},
            registers::*,
        },
        floppy_drive::SeekResult,
    },
};

/// How data bytes relate to system memory during the execution phase.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Display)]
pub enum TransferDirection {
    /// Memory to disk.
    #[default]
    Write,
    /// Disk to memory.
    Read,
    ScanEqual,
    ScanLow,
    ScanHigh,
    /// Memory supplies 4-byte sector ids, the controller fills each sector.
    Format,
}

impl TransferDirection {
    pub fn is_scan(&self) -> bool {
        matches!(
            self,
            TransferDirection::ScanEqual | TransferDirection::ScanLow | TransferDirection::ScanHigh
        )
    }

    /// The transfer type the DMA channel must be programmed for to service this direction.
    /// 8237 naming is from the point of view of memory.
    pub fn dma_type(&self) -> DmaTransferType {
        match self {
            TransferDirection::Read => DmaTransferType::Write,
            _ => DmaTransferType::Read,
        }
    }

    /// True if the host reads data bytes from the controller.
    pub fn is_host_read(&self) -> bool {
        matches!(self, TransferDirection::Read)
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Display)]
pub enum DataMode {
    #[default]
    Pio,
    Dma,
}

/// Progress of the command currently in its execution phase.
#[derive(Clone, Debug, Default)]
pub struct TransferState {
    pub mode: DataMode,
    /// Bytes transferred so far.
    pub pos: usize,
    /// Total bytes the command will transfer.
    pub len: usize,
    pub eot: u8,
    pub size_code: u8,
    pub filler: u8,
    pub format_id: [u8; 4],
    /// Every compared byte in the current sector was equal.
    pub sector_equal: bool,
    /// Every compared byte in the current sector met the scan condition.
    pub sector_satisfied: bool,
    /// The staging buffer holds data not yet written back.
    pub dirty: bool,
}

/// Adapts a single data register access to the DMA memory interface so PIO and DMA transfers
/// share one path.
#[derive(Default)]
struct PioByte {
    byte: u8,
}

impl DmaMemory for PioByte {
    fn read_memory(&mut self, _offset: usize, buf: &mut [u8]) {
        buf.fill(self.byte);
    }

    fn write_memory(&mut self, _offset: usize, buf: &[u8]) {
        if let Some(b) = buf.first() {
            self.byte = *b;
        }
    }
}

fn media_error_status(err: &BlockDeviceError) -> (u8, u8) {
    match err {
        BlockDeviceError::NotInserted => (ST0_ABNORMAL_TERMINATION | ST0_NOT_READY, 0),
        BlockDeviceError::ReadOnly => (ST0_ABNORMAL_TERMINATION, ST1_WRITE_PROTECT),
        _ => (ST0_ABNORMAL_TERMINATION, ST1_NODATA),
    }
}

impl FloppyController {
    /// Begin a read, write or scan command. Parameters are
    /// `[op, dhs, c, h, r, n, eot, gpl, dtl]`.
    pub(crate) fn start_transfer(&mut self, direction: TransferDirection) {
        let cmd = CommandByte::from_bytes([self.fifo.param(0)]);
        let dhs = DriveHeadSelect::from_bytes([self.fifo.param(1)]);
        let requested = DiskChs::new(self.fifo.param(2) as u16, self.fifo.param(3), self.fifo.param(4));
        let size_code = self.fifo.param(5);
        let eot = self.fifo.param(6);
        let dtl = self.fifo.param(8);

        self.select_drive(dhs.drive());
        self.direction = direction;
        self.multi_track = cmd.mt();
        self.implicit_seek = false;
        self.last_eot = eot;
        self.xfer = TransferState {
            eot,
            size_code,
            ..Default::default()
        };

        let allow_seek = ConfigureByte::from_bytes([self.config]).implied_seek();
        let drive = self.selected_drive_mut();
        drive.start();
        match drive.seek(dhs.head(), requested.c(), requested.s(), allow_seek) {
            SeekResult::NotReady => {
                self.stop_transfer_at(ST0_ABNORMAL_TERMINATION | ST0_NOT_READY, 0, 0, requested);
                return;
            }
            SeekResult::BadHead | SeekResult::NeedSeek => {
                self.stop_transfer_at(ST0_ABNORMAL_TERMINATION, 0, 0, requested);
                return;
            }
            SeekResult::BadSector => {
                self.stop_transfer_at(ST0_ABNORMAL_TERMINATION, ST1_END_OF_CYLINDER, 0, requested);
                return;
            }
            SeekResult::Seeked => {
                self.implicit_seek = true;
            }
            SeekResult::Ok => {}
        }

        if direction == TransferDirection::Write && self.selected_drive().is_read_only() {
            self.stop_transfer(ST0_ABNORMAL_TERMINATION, ST1_WRITE_PROTECT, 0);
            return;
        }

        self.xfer.len = self.transfer_length(requested.s(), size_code, eot, dtl);

        let log_str = format!(
            "{} chs: {} n: {} eot: {} mt: {} len: {}",
            direction, requested, size_code, eot, self.multi_track, self.xfer.len
        );
        self.log_cmd(self.command, &log_str);
        self.begin_data_phase();
    }

    /// Begin Format Track. Parameters are `[op, dhs, n, sc, gpl, d]`.
    pub(crate) fn start_format(&mut self) {
        let dhs = DriveHeadSelect::from_bytes([self.fifo.param(1)]);
        let size_code = self.fifo.param(2);
        let sectors = self.fifo.param(3);
        let filler = self.fifo.param(5);

        self.select_drive(dhs.drive());
        self.direction = TransferDirection::Format;
        self.implicit_seek = false;
        self.multi_track = false;

        let drive = self.selected_drive_mut();
        drive.start();
        if !drive.is_ready() {
            self.stop_transfer(ST0_ABNORMAL_TERMINATION | ST0_NOT_READY, 0, 0);
            return;
        }
        if drive.is_read_only() {
            self.stop_transfer(ST0_ABNORMAL_TERMINATION, ST1_WRITE_PROTECT, 0);
            return;
        }
        drive.chs.h = dhs.head();
        drive.chs.s = 1;

        self.format_active = true;
        self.xfer = TransferState {
            len: sectors as usize * 4,
            eot: sectors,
            size_code,
            filler,
            ..Default::default()
        };

        let log_str = format!(
            "track: {} head: {} sectors: {} filler: {:02X}",
            self.selected_drive().chs.c(),
            dhs.head(),
            sectors,
            filler
        );
        self.log_cmd(self.command, &log_str);
        self.begin_data_phase();
    }

    /// Bytes a read/write/scan will move. With a size code of 0 the DTL parameter is the length,
    /// otherwise sectors run from `first` to EOT (or the end of the track), plus the same span
    /// on head 1 in multi-track mode.
    fn transfer_length(&self, first: u8, size_code: u8, eot: u8, dtl: u8) -> usize {
        if size_code == 0 {
            return dtl as usize;
        }
        let drive = self.selected_drive();
        let spt = drive.sectors_per_track();
        let last = if eot >= first { eot.min(spt) } else { spt };

        let mut sectors = last.saturating_sub(first) as usize + 1;
        if self.multi_track && drive.chs.h() == 0 && drive.head_count() > 1 {
            sectors += last as usize;
        }
        (128usize << size_code.min(7)) * sectors
    }

    /// Enter the execution phase and arrange for the data to move, by DMA if enabled and the
    /// channel is programmed in the matching direction, otherwise through the data register.
    fn begin_data_phase(&mut self) {
        self.enter_execution();
        self.busy = true;

        let wanted = self.direction.dma_type();
        let mode = DmaTransferType::from(self.dma.channel_mode(self.dma_channel));

        if self.dma_enabled() && mode == wanted {
            self.xfer.mode = DataMode::Dma;
            self.dma.hold_request(self.dma_channel);
        }
        else {
            if self.dma_enabled() {
                log::warn!(
                    "DMA channel {} programmed for {:?}, {} needs {:?}. Falling back to PIO.",
                    self.dma_channel,
                    mode,
                    self.direction,
                    wanted
                );
            }
            self.xfer.mode = DataMode::Pio;
            self.raise_irq(None);
        }
    }

    /// Service a DMA request for up to `requested` bytes. `memory` is system memory as seen
    /// through the DMA channel. Returns the number of bytes moved.
    pub fn handle_transfer(&mut self, memory: &mut dyn DmaMemory, requested: usize) -> usize {
        if !self.busy || self.xfer.mode != DataMode::Dma || self.phase != ControllerPhase::ExecutionPhase {
            return 0;
        }
        self.transfer_bytes(memory, requested)
    }

    /// The DMA controller reached terminal count. Ends the command early, writing back any
    /// partially filled sector.
    pub fn dma_terminal_count(&mut self) {
        if !self.busy || self.xfer.mode != DataMode::Dma {
            return;
        }
        log::debug!("DMA terminal count at {} of {} bytes", self.xfer.pos, self.xfer.len);
        if self.direction == TransferDirection::Format {
            self.stop_transfer(0, 0, 0);
            return;
        }
        if self.xfer.pos % SECTOR_SIZE != 0 && !self.finish_sector(false) {
            return;
        }
        self.complete_transfer();
    }

    pub(crate) fn pio_read_byte(&mut self) -> u8 {
        self.lower_irq();
        let mut port = PioByte::default();
        self.transfer_bytes(&mut port, 1);
        port.byte
    }

    pub(crate) fn pio_write_byte(&mut self, byte: u8) {
        self.lower_irq();
        let mut port = PioByte { byte };
        self.transfer_bytes(&mut port, 1);
    }

    /// Move up to `requested` bytes between `port` and the drive, staging one sector at a time
    /// in the fifo. Stops the command on completion, error or a scan hit.
    pub(crate) fn transfer_bytes(&mut self, port: &mut dyn DmaMemory, requested: usize) -> usize {
        if self.direction == TransferDirection::Format {
            return self.format_bytes(port, requested);
        }

        let mut done = 0;
        while done < requested && self.xfer.pos < self.xfer.len {
            let sector_offset = self.xfer.pos % SECTOR_SIZE;
            if sector_offset == 0 && !self.load_sector() {
                return done;
            }

            let chunk = (requested - done)
                .min(SECTOR_SIZE - sector_offset)
                .min(self.xfer.len - self.xfer.pos);
            let range = sector_offset..sector_offset + chunk;

            match self.direction {
                TransferDirection::Read => {
                    port.write_memory(done, &self.fifo.sector()[range]);
                }
                TransferDirection::Write => {
                    port.read_memory(done, &mut self.fifo.sector_mut()[range]);
                    self.xfer.dirty = true;
                }
                _ => {
                    let mut mem = [0u8; SECTOR_SIZE];
                    port.read_memory(done, &mut mem[..chunk]);
                    self.scan_compare(&mem[..chunk], sector_offset);
                }
            }

            self.xfer.pos += chunk;
            done += chunk;

            if self.xfer.pos % SECTOR_SIZE == 0 {
                if !self.finish_sector(true) {
                    return done;
                }
            }
            else if self.xfer.pos >= self.xfer.len && !self.finish_sector(false) {
                return done;
            }
        }

        if self.busy && self.xfer.pos >= self.xfer.len {
            self.complete_transfer();
        }
        done
    }

    /// Fold one chunk of memory bytes into the current sector's scan state.
    /// A memory byte of 0xFF matches anything.
    fn scan_compare(&mut self, mem: &[u8], sector_offset: usize) {
        let disk = &self.fifo.sector()[sector_offset..sector_offset + mem.len()];
        for (&d, &m) in disk.iter().zip(mem) {
            if m == 0xFF {
                continue;
            }
            if d != m {
                self.xfer.sector_equal = false;
            }
            let ok = match self.direction {
                TransferDirection::ScanEqual => d == m,
                TransferDirection::ScanLow => d <= m,
                _ => d >= m,
            };
            if !ok {
                self.xfer.sector_satisfied = false;
            }
        }
    }

    /// Stage the sector under the drive cursor. Returns false if the command was stopped.
    fn load_sector(&mut self) -> bool {
        self.xfer.sector_equal = true;
        self.xfer.sector_satisfied = true;
        self.xfer.dirty = false;

        let idx = self.physical_drive();
        let lba = self.drives[idx].current_linear_sector();
        let result = self.drives[idx].read(lba, &mut self.fifo.sector_mut()[..], 1);
        match result {
            Ok(_) => true,
            Err(e) => {
                log::error!("Drive {}: read of sector {} failed: {}", self.drive_select, lba, e);
                let (st0, st1) = media_error_status(&e);
                self.stop_transfer(st0, st1, 0);
                false
            }
        }
    }

    fn flush_sector(&mut self) -> bool {
        self.xfer.dirty = false;
        let idx = self.physical_drive();
        let lba = self.drives[idx].current_linear_sector();
        let result = self.drives[idx].write(lba, &self.fifo.sector()[..], 1);
        match result {
            Ok(_) => true,
            Err(e) => {
                log::error!("Drive {}: write of sector {} failed: {}", self.drive_select, lba, e);
                let (st0, st1) = media_error_status(&e);
                self.stop_transfer(st0, st1, 0);
                false
            }
        }
    }

    /// Close out the staged sector: write it back if modified, settle a scan, and move the
    /// cursor on when `advance` is set. Returns false if the command was stopped.
    fn finish_sector(&mut self, advance: bool) -> bool {
        if self.xfer.dirty && !self.flush_sector() {
            return false;
        }
        if self.direction.is_scan() {
            if self.xfer.sector_satisfied {
                let st2 = if self.xfer.sector_equal { ST2_SCAN_HIT } else { 0 };
                self.stop_transfer(self.seek_status(), 0, st2);
                return false;
            }
            // Low and high scans end on the sector that disproves the inequality.
            if self.direction != TransferDirection::ScanEqual {
                self.stop_transfer(self.seek_status(), 0, ST2_SCAN_NOT_SATISFIED);
                return false;
            }
        }
        if advance {
            let eot = self.xfer.eot;
            let multi_track = self.multi_track;
            self.selected_drive_mut().advance_sector(eot, multi_track);
        }
        true
    }

    fn complete_transfer(&mut self) {
        let st2 = if self.direction.is_scan() {
            ST2_SCAN_NOT_SATISFIED
        }
        else {
            0
        };
        self.stop_transfer(self.seek_status(), 0, st2);
    }

    fn seek_status(&self) -> u8 {
        if self.implicit_seek {
            ST0_SEEK_END
        }
        else {
            0
        }
    }

    /// Format Track execution. Each 4-byte id `[c, h, r, n]` fills sector `r` of the current
    /// track and head.
    fn format_bytes(&mut self, port: &mut dyn DmaMemory, requested: usize) -> usize {
        let mut done = 0;
        while done < requested && self.xfer.pos < self.xfer.len {
            let mut byte = [0u8];
            port.read_memory(done, &mut byte);
            self.xfer.format_id[self.xfer.pos % 4] = byte[0];
            self.xfer.pos += 1;
            done += 1;

            if self.xfer.pos % 4 == 0 && !self.format_sector() {
                return done;
            }
        }

        if self.busy && self.xfer.pos >= self.xfer.len {
            self.stop_transfer(0, 0, 0);
        }
        done
    }

    fn format_sector(&mut self) -> bool {
        let [c, h, r, n] = self.xfer.format_id;
        let filler = [self.xfer.filler; SECTOR_SIZE];

        let idx = self.physical_drive();
        let drive = &mut self.drives[idx];
        let target = DiskChs::new(drive.chs.c(), drive.chs.h(), r);

        if n != SECTOR_SIZE_CODE {
            log::warn!("Format: sector id size code {} stored as {} byte sector", n, SECTOR_SIZE);
        }
        log::trace!("Format: id c:{} h:{} r:{} n:{} -> {}", c, h, r, n, target);

        match drive.linear_sector(target) {
            Some(lba) => {
                if let Err(e) = drive.write(lba, &filler, 1) {
                    log::error!("Format: write of sector {} failed: {}", lba, e);
                    let (st0, st1) = media_error_status(&e);
                    self.stop_transfer(st0, st1, 0);
                    return false;
                }
                drive.chs.s = r;
            }
            None => {
                log::warn!("Format: sector id {} outside media geometry, skipped", target);
            }
        }
        true
    }

    /// Finish the execution phase with a 7-byte result describing the drive cursor.
    pub(crate) fn stop_transfer(&mut self, st0: u8, st1: u8, st2: u8) {
        let chs = self.selected_drive().chs;
        self.stop_transfer_at(st0, st1, st2, chs);
    }

    /// Finish the execution phase reporting `chs` in place of the drive cursor.
    pub(crate) fn stop_transfer_at(&mut self, st0: u8, st1: u8, st2: u8, chs: DiskChs) {
        let unit = self.drive_select as u8;
        let result = [
            st0 | ((chs.h() & 0x01) << 2) | unit,
            st1,
            st2,
            chs.c() as u8,
            chs.h(),
            chs.s(),
            SECTOR_SIZE_CODE,
        ];

        if self.busy && self.xfer.mode == DataMode::Dma {
            self.dma.release_request(self.dma_channel);
        }
        self.busy = false;
        self.multi_track = false;
        self.implicit_seek = false;
        self.format_active = false;
        self.pending_timer = None;
        self.last_status = [result[0], st1, st2];

        let log_str = format!(
            "ST0: {:02X} ST1: {:02X} ST2: {:02X} chs: {} moved: {} of {}",
            result[0], st1, st2, chs, self.xfer.pos, self.xfer.len
        );
        self.log_cmd(self.command, &log_str);
        self.set_result(&result, true);
    }
}
