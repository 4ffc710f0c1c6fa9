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

    devices::fdc::controller.rs

    Implements the floppy disk controller: the register interface, the
    command state machine, interrupt delivery and drive management.
*/

use marty_fdc_common::HistoryBuffer;

use crate::{
    bus::{IoDevice, NO_IO_BYTE},
    device_traits::{
        block_device::BlockDevice,
        dma::DmaRequest,
        format_detector::FormatDetector,
        interrupt::InterruptLine,
        timer::OneShotTimer,
    },
    device_types::{chs::DiskChs, fdc::StandardFormatDetector},
    devices::{
        fdc::{
            command::{decode_command, Command, CommandDispatchFn},
            fifo::Fifo,
            registers::*,
            transfer::{DataMode, TransferDirection, TransferState},
            FdcError,
        },
        floppy_drive::FloppyDiskDrive,
    },
    fdc_config::{FdcConfig, FDC_MAX_DRIVES},
    machine_types::FloppyDriveType,
};

pub const FDC_LOG_LEN: usize = 200;
/// Time for a Read ID to find an address mark, one revolution at 300 RPM is 200ms but the
/// first id arrives well before that.
pub const READ_ID_DELAY_US: f64 = 20_000.0;
/// Number of Sense Interrupt Status commands that report a reset, one per drive select.
pub const RESET_SENSE_COUNT: u8 = 4;

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum ControllerPhase {
    #[default]
    CommandPhase,
    ExecutionPhase,
    ResultPhase,
}

/// Work the controller is waiting on the host timer to complete.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TimerEvent {
    ReadId,
}

#[derive(Clone, Debug, Default)]
pub struct DriveDebugState {
    pub drive_type: FloppyDriveType,
    pub chs: DiskChs,
    pub geometry: DiskChs,
    pub motor_on: bool,
    pub ready: bool,
    pub read_only: bool,
    pub revalidate_needed: bool,
}

#[derive(Clone, Debug, Default)]
pub struct FdcDebugState {
    pub intr: bool,
    pub dor: u8,
    pub phase: ControllerPhase,
    pub data_mode: DataMode,
    pub direction: TransferDirection,
    pub last_cmd: Command,
    pub last_status: Vec<u8>,
    pub drive_select: usize,
    pub status_register: u8,
    pub fifo: Vec<u8>,
    pub transfer_pos: usize,
    pub transfer_len: usize,
    pub last_data_read: u8,
    pub last_data_written: u8,
    pub drives: Vec<DriveDebugState>,
    pub cmd_log: Vec<String>,
}

pub struct FloppyController {
    pub(crate) io_base: u16,
    pub(crate) irq_num: u8,
    pub(crate) dma_channel: usize,

    pub(crate) irq: Box<dyn InterruptLine>,
    pub(crate) dma: Box<dyn DmaRequest>,
    pub(crate) timer: Box<dyn OneShotTimer>,
    pub(crate) detector: Box<dyn FormatDetector>,

    pub(crate) phase: ControllerPhase,
    pub(crate) multi_track: bool,
    pub(crate) implicit_seek: bool,
    pub(crate) format_active: bool,

    pub(crate) fifo: Fifo,
    pub(crate) command: Command,
    pub(crate) command_fn: Option<CommandDispatchFn>,
    pub(crate) direction: TransferDirection,
    pub(crate) xfer: TransferState,

    pub(crate) drives: [FloppyDiskDrive; FDC_MAX_DRIVES],
    /// Logical drive selected by the last command or DOR write.
    pub(crate) drive_select: usize,
    pub(crate) boot_select: u8,

    pub(crate) dor: u8,
    pub(crate) rate_select: u8,

    /// ST0 latched by a seek or recalibrate, consumed by Sense Interrupt Status.
    pub(crate) interrupt_status: Option<u8>,
    pub(crate) reset_sense_count: u8,

    pub(crate) reset_pending: bool,
    pub(crate) sleep: bool,
    pub(crate) busy: bool,
    pub(crate) irq_pending: bool,
    pub(crate) irq_asserted: bool,

    pub(crate) srt_hut: u8,
    pub(crate) hlt_nd: u8,
    pub(crate) config: u8,
    pub(crate) precomp_track: u8,
    pub(crate) lock: bool,
    pub(crate) powerdown: u8,
    pub(crate) perpendicular_mode: u8,
    pub(crate) drive_spec: [u8; 4],
    pub(crate) last_eot: u8,

    pub(crate) pending_timer: Option<TimerEvent>,
    pub(crate) last_status: [u8; 3],
    pub(crate) last_data_read: u8,
    pub(crate) last_data_written: u8,

    pub(crate) cmd_log: HistoryBuffer<String>,
}

impl FloppyController {
    pub fn new(
        config: &FdcConfig,
        irq: Box<dyn InterruptLine>,
        dma: Box<dyn DmaRequest>,
        timer: Box<dyn OneShotTimer>,
    ) -> Result<Self, FdcError> {
        config.validate()?;

        let mut drives = [
            FloppyDiskDrive::new(0, FloppyDriveType::default()),
            FloppyDiskDrive::new(1, FloppyDriveType::default()),
        ];
        for (i, drive_config) in config.drive.iter().enumerate() {
            drives[i] = FloppyDiskDrive::new(i, drive_config.fd_type);
            drives[i].write_protected = drive_config.write_protect;
        }

        let mut fdc = FloppyController {
            io_base: config.io_base,
            irq_num: config.irq,
            dma_channel: config.dma_channel,
            irq,
            dma,
            timer,
            detector: Box::new(StandardFormatDetector),
            phase: ControllerPhase::CommandPhase,
            multi_track: false,
            implicit_seek: false,
            format_active: false,
            fifo: Fifo::default(),
            command: Command::NoCommand,
            command_fn: None,
            direction: TransferDirection::Write,
            xfer: TransferState::default(),
            drives,
            drive_select: 0,
            boot_select: 0,
            dor: DOR_POWER_ON,
            rate_select: 0,
            interrupt_status: None,
            reset_sense_count: 0,
            reset_pending: false,
            sleep: false,
            busy: false,
            irq_pending: false,
            irq_asserted: false,
            srt_hut: 0,
            hlt_nd: 0,
            config: FDC_DEFAULT_CONFIG,
            precomp_track: 0,
            lock: false,
            powerdown: 0,
            perpendicular_mode: 0,
            drive_spec: [0; 4],
            last_eot: 0,
            pending_timer: None,
            last_status: [0; 3],
            last_data_read: 0,
            last_data_written: 0,
            cmd_log: HistoryBuffer::new(FDC_LOG_LEN),
        };

        fdc.reset_internal(false);
        Ok(fdc)
    }

    /// Replace the geometry detector used when media is attached or changed.
    pub fn with_format_detector(mut self, detector: Box<dyn FormatDetector>) -> Self {
        self.detector = detector;
        self
    }

    /// Reset the controller as if by the DOR reset line, raising the reset interrupt.
    pub fn reset(&mut self) {
        self.reset_internal(true);
    }

    /// Abort any command, recalibrate both drives and return to the command phase. With
    /// `raise` the reset interrupt is raised and Sense Interrupt Status will report a reset
    /// for each of the four drive selects.
    pub(crate) fn reset_internal(&mut self, raise: bool) {
        self.lower_irq();
        if self.busy && self.xfer.mode == DataMode::Dma {
            self.dma.release_request(self.dma_channel);
        }
        self.busy = false;
        self.timer.cancel();
        self.pending_timer = None;

        self.fifo.clear();
        self.phase = ControllerPhase::CommandPhase;
        self.command = Command::NoCommand;
        self.command_fn = None;
        self.multi_track = false;
        self.implicit_seek = false;
        self.format_active = false;
        self.direction = TransferDirection::Write;
        self.xfer = TransferState::default();
        self.interrupt_status = None;
        self.reset_sense_count = 0;
        self.drive_select = 0;

        for drive in self.drives.iter_mut() {
            drive.reset();
        }

        if !self.lock {
            self.config = FDC_DEFAULT_CONFIG;
            self.precomp_track = 0;
        }

        if raise {
            self.reset_sense_count = RESET_SENSE_COUNT;
            self.raise_irq(None);
        }
        self.log_str("FDC Reset!");
    }

    /// Latch `sense` for Sense Interrupt Status, if given, and request an interrupt.
    /// Requesting while one is already pending does nothing further.
    pub(crate) fn raise_irq(&mut self, sense: Option<u8>) {
        if let Some(st0) = sense {
            self.interrupt_status = Some(st0);
        }
        if !self.irq_pending {
            self.irq_pending = true;
            self.update_irq_line();
        }
    }

    pub(crate) fn lower_irq(&mut self) {
        self.irq_pending = false;
        self.update_irq_line();
    }

    /// Drive the IRQ line from the pending flag, gated by DOR bit 3.
    fn update_irq_line(&mut self) {
        let gate = DigitalOutputRegister::from_bytes([self.dor]).dma_gate();
        let level = self.irq_pending && gate;
        if level != self.irq_asserted {
            self.irq_asserted = level;
            self.irq.set_level(self.irq_num, level);
        }
    }

    pub fn irq_pending(&self) -> bool {
        self.irq_pending
    }

    pub fn phase(&self) -> ControllerPhase {
        self.phase
    }

    pub(crate) fn dma_enabled(&self) -> bool {
        !HeadLoadDma::from_bytes([self.hlt_nd]).non_dma()
    }

    pub(crate) fn select_drive(&mut self, unit: u8) {
        self.drive_select = (unit & 0x01) as usize;
    }

    /// Index into `drives` of the selected drive, after the boot select swap.
    pub(crate) fn physical_drive(&self) -> usize {
        (self.drive_select ^ self.boot_select as usize) & 0x01
    }

    pub(crate) fn logical_drive(&self, unit: usize) -> &FloppyDiskDrive {
        &self.drives[(unit ^ self.boot_select as usize) & 0x01]
    }

    fn logical_drive_mut(&mut self, unit: usize) -> &mut FloppyDiskDrive {
        &mut self.drives[(unit ^ self.boot_select as usize) & 0x01]
    }

    pub(crate) fn selected_drive(&self) -> &FloppyDiskDrive {
        &self.drives[self.physical_drive()]
    }

    pub(crate) fn selected_drive_mut(&mut self) -> &mut FloppyDiskDrive {
        let idx = self.physical_drive();
        &mut self.drives[idx]
    }

    /// Access a drive by its physical index.
    pub fn drive(&self, idx: usize) -> Option<&FloppyDiskDrive> {
        self.drives.get(idx)
    }

    pub(crate) fn enter_execution(&mut self) {
        self.phase = ControllerPhase::ExecutionPhase;
    }

    /// Finish a command that has no result phase.
    pub(crate) fn end_command(&mut self) {
        self.fifo.clear();
        self.phase = ControllerPhase::CommandPhase;
    }

    /// Load result bytes and enter the result phase, optionally requesting an interrupt.
    pub(crate) fn set_result(&mut self, bytes: &[u8], irq: bool) {
        self.fifo.set_result(bytes);
        self.phase = ControllerPhase::ResultPhase;
        if irq {
            self.raise_irq(None);
        }
    }

    /// Insert media into drive `idx`, which reports a disk change.
    pub fn attach_media(&mut self, idx: usize, media: Box<dyn BlockDevice>) -> Result<(), FdcError> {
        let drive = self.drives.get_mut(idx).ok_or(FdcError::InvalidDrive(idx))?;
        drive.attach(media);
        drive.revalidate(self.detector.as_ref());
        self.log_str(&format!("Drive {}: media attached", idx));
        Ok(())
    }

    /// Remove the media from drive `idx`, returning it.
    pub fn detach_media(&mut self, idx: usize) -> Result<Option<Box<dyn BlockDevice>>, FdcError> {
        let drive = self.drives.get_mut(idx).ok_or(FdcError::InvalidDrive(idx))?;
        let media = drive.detach();
        drive.revalidate(self.detector.as_ref());
        self.log_str(&format!("Drive {}: media detached", idx));
        Ok(media)
    }

    /// Re-derive geometry after the backing device of drive `idx` changed underneath us.
    pub fn media_changed(&mut self, idx: usize) -> Result<(), FdcError> {
        let drive = self.drives.get_mut(idx).ok_or(FdcError::InvalidDrive(idx))?;
        drive.revalidate(self.detector.as_ref());
        Ok(())
    }

    pub fn set_write_protect(&mut self, idx: usize, state: bool) -> Result<(), FdcError> {
        let drive = self.drives.get_mut(idx).ok_or(FdcError::InvalidDrive(idx))?;
        drive.write_protected = state;
        Ok(())
    }

    /// Deliver the one-shot timer scheduled through the OneShotTimer collaborator.
    pub fn timer_expired(&mut self) {
        match self.pending_timer.take() {
            Some(TimerEvent::ReadId) => {
                self.stop_transfer(0, 0, 0);
            }
            None => {
                log::warn!("Timer expired with no pending operation");
            }
        }
    }

    /// Read a controller register by offset from the I/O base.
    pub fn read_register(&mut self, offset: u16) -> u8 {
        match offset {
            FDC_STATUS_REGISTER_B => 0,
            FDC_DIGITAL_OUTPUT_REGISTER => self.dor,
            FDC_TAPE_DRIVE_REGISTER => self.boot_select << 2,
            FDC_STATUS_REGISTER => self.handle_status_register_read(),
            FDC_DATA_REGISTER => self.handle_data_register_read(),
            FDC_DIGITAL_INPUT_REGISTER => self.handle_dir_read(),
            _ => NO_IO_BYTE,
        }
    }

    /// Write a controller register by offset from the I/O base.
    pub fn write_register(&mut self, offset: u16, data: u8) {
        match offset {
            FDC_DIGITAL_OUTPUT_REGISTER => self.handle_dor_write(data),
            FDC_TAPE_DRIVE_REGISTER => self.handle_tdr_write(data),
            FDC_STATUS_REGISTER => self.handle_dsr_write(data),
            FDC_DATA_REGISTER => self.handle_data_register_write(data),
            FDC_DIGITAL_INPUT_REGISTER => {
                // Configuration control register
                self.rate_select = data & 0x03;
            }
            _ => {
                log::warn!("Write to unmapped FDC register offset {}: {:02X}", offset, data);
            }
        }
    }

    /// Compute the main status register without side effects.
    pub fn status_register(&self) -> u8 {
        let mut msr = 0;
        let dma_busy = self.busy && self.xfer.mode == DataMode::Dma;
        let pio_busy = self.busy && self.xfer.mode == DataMode::Pio;

        if !dma_busy && !self.reset_pending {
            msr |= FDC_STATUS_MRQ;
        }
        if self.phase == ControllerPhase::ResultPhase
            || (self.phase == ControllerPhase::ExecutionPhase && pio_busy && self.direction.is_host_read())
        {
            msr |= FDC_STATUS_DIO;
        }
        if self.phase != ControllerPhase::CommandPhase {
            msr |= FDC_STATUS_FDC_BUSY;
        }
        if pio_busy {
            msr |= FDC_STATUS_NON_DMA_MODE;
        }
        msr
    }

    fn handle_status_register_read(&mut self) -> u8 {
        if self.sleep {
            self.log_str("Wake from power down");
            self.sleep = false;
        }
        self.status_register()
    }

    fn handle_tdr_write(&mut self, data: u8) {
        if self.reset_pending {
            log::trace!("TDR write {:02X} ignored during reset", data);
            return;
        }
        self.boot_select = (data & TAPE_BOOT_SELECT) >> 2;
    }

    /// The disk change bit reflects both drives and reading it clears both latches.
    fn handle_dir_read(&mut self) -> u8 {
        let mut changed = false;
        for drive in self.drives.iter_mut() {
            changed |= drive.revalidate_needed;
            drive.revalidate_needed = false;
        }
        if changed {
            DIR_DISK_CHANGE
        }
        else {
            0
        }
    }

    fn handle_dor_write(&mut self, data: u8) {
        let dor = DigitalOutputRegister::from_bytes([data]);

        if self.reset_pending && !dor.reset_n() {
            log::trace!("DOR write {:02X} ignored during reset", data);
            return;
        }
        self.dor = data;

        if !dor.reset_n() {
            if !self.reset_pending {
                self.reset_pending = true;
                self.reset_internal(false);
            }
        }
        else if self.reset_pending {
            self.reset_pending = false;
            self.sleep = false;
            self.reset_internal(true);
        }

        for (unit, on) in [(0, dor.motor_a()), (1, dor.motor_b())] {
            let drive = self.logical_drive_mut(unit);
            if on {
                drive.start();
            }
            else {
                drive.stop();
            }
        }
        self.select_drive(dor.drive_select());
        self.update_irq_line();
    }

    fn handle_dsr_write(&mut self, data: u8) {
        if self.reset_pending {
            log::trace!("DSR write {:02X} ignored during reset", data);
            return;
        }
        let dsr = DataRateSelect::from_bytes([data]);
        if dsr.sw_reset() {
            self.reset_internal(true);
        }
        if dsr.power_down() {
            self.log_str("Power down");
            self.sleep = true;
        }
        self.rate_select = dsr.rate();
    }

    fn handle_data_register_write(&mut self, data: u8) {
        self.last_data_written = data;
        if self.reset_pending {
            log::warn!("Data register write {:02X} during reset ignored", data);
            return;
        }

        match self.phase {
            ControllerPhase::ResultPhase => {
                log::warn!("Data register write {:02X} during result phase", data);
                self.set_result(&[ST0_INVALID_OPCODE], false);
            }
            ControllerPhase::ExecutionPhase => {
                if self.busy && self.xfer.mode == DataMode::Pio && !self.direction.is_host_read() {
                    self.pio_write_byte(data);
                }
                else {
                    log::warn!("Unexpected data register write {:02X} during execution phase", data);
                }
            }
            ControllerPhase::CommandPhase => {
                if self.busy {
                    log::warn!("Data register write {:02X} while busy", data);
                    return;
                }
                if self.fifo.len() == 0 {
                    let spec = decode_command(data);
                    self.command = spec.command;
                    self.command_fn = Some(spec.handler);
                    self.fifo.expect(spec.length);
                    log::trace!("Command byte {:02X}: {} ({} bytes)", data, spec.command, spec.length);
                }
                self.fifo.push(data);
                if self.fifo.is_complete() {
                    self.dispatch_command();
                }
            }
        }
    }

    fn dispatch_command(&mut self) {
        if self.command != Command::SenseInterruptStatus {
            self.reset_sense_count = 0;
        }
        log::trace!("Dispatching {}: {:02X?}", self.command, self.fifo.params());
        if let Some(handler) = self.command_fn.take() {
            handler(self);
        }
    }

    fn handle_data_register_read(&mut self) -> u8 {
        let byte = match self.phase {
            ControllerPhase::ResultPhase => {
                let byte = self.fifo.pop().unwrap_or(NO_IO_BYTE);
                if self.fifo.remaining() == 0 {
                    self.end_command();
                    self.lower_irq();
                }
                byte
            }
            ControllerPhase::ExecutionPhase
                if self.busy && self.xfer.mode == DataMode::Pio && self.direction.is_host_read() =>
            {
                self.pio_read_byte()
            }
            _ => {
                log::warn!("Data register read in {:?} with nothing to read", self.phase);
                0
            }
        };
        self.last_data_read = byte;
        byte
    }

    pub fn log_cmd(&mut self, cmd: Command, s: &str) {
        self.cmd_log.push(format!("{}: {}", cmd, s));
        log::trace!("{}: {}", cmd, s);
    }

    pub fn log_str(&mut self, s: &str) {
        self.cmd_log.push(s.to_string());
        log::trace!("{}", s);
    }

    pub fn get_debug_state(&self) -> FdcDebugState {
        FdcDebugState {
            intr: self.irq_pending,
            dor: self.dor,
            phase: self.phase,
            data_mode: self.xfer.mode,
            direction: self.direction,
            last_cmd: self.command,
            last_status: self.last_status.to_vec(),
            drive_select: self.drive_select,
            status_register: self.status_register(),
            fifo: self.fifo.params().to_vec(),
            transfer_pos: self.xfer.pos,
            transfer_len: self.xfer.len,
            last_data_read: self.last_data_read,
            last_data_written: self.last_data_written,
            drives: self
                .drives
                .iter()
                .map(|d| DriveDebugState {
                    drive_type: d.get_type(),
                    chs: d.chs,
                    geometry: d.geometry(),
                    motor_on: d.motor_on,
                    ready: d.is_ready(),
                    read_only: d.is_read_only(),
                    revalidate_needed: d.revalidate_needed,
                })
                .collect(),
            cmd_log: self.cmd_log.as_vec(),
        }
    }
}

impl IoDevice for FloppyController {
    fn read_u8(&mut self, port: u16) -> u8 {
        self.read_register(port.wrapping_sub(self.io_base))
    }

    fn write_u8(&mut self, port: u16, data: u8) {
        self.write_register(port.wrapping_sub(self.io_base), data);
    }

    fn port_list(&self) -> Vec<(String, u16)> {
        let base = self.io_base;
        vec![
            (String::from("FDC Status Register B"), base + FDC_STATUS_REGISTER_B),
            (
                String::from("FDC Digital Output Register"),
                base + FDC_DIGITAL_OUTPUT_REGISTER,
            ),
            (String::from("FDC Tape Drive Register"), base + FDC_TAPE_DRIVE_REGISTER),
            (String::from("FDC Status Register"), base + FDC_STATUS_REGISTER),
            (String::from("FDC Data Register"), base + FDC_DATA_REGISTER),
            (
                String::from("FDC Digital Input Register"),
                base + FDC_DIGITAL_INPUT_REGISTER,
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        device_traits::{block_device::BlockDeviceError, dma::DmaTransferType},
        device_types::fdc::SECTOR_SIZE,
        devices::{
            fdc::command::COMMAND_TABLE,
            loopback::{LoopbackDma, LoopbackIrq, LoopbackTimer},
            raw_image::RawSectorImage,
        },
        fdc_config::FloppyDriveConfig,
    };

    const DMA: usize = 2;
    const SPT: usize = 18;

    struct Harness {
        fdc: FloppyController,
        irq: LoopbackIrq,
        dma: LoopbackDma,
        timer: LoopbackTimer,
    }

    fn patterned_image(sectors: usize) -> Vec<u8> {
        (0..sectors * SECTOR_SIZE)
            .map(|i| ((i / SECTOR_SIZE) * 7 + i % 251) as u8)
            .collect()
    }

    fn harness_with_config(config: FdcConfig) -> Harness {
        let irq = LoopbackIrq::default();
        let dma = LoopbackDma::default();
        let timer = LoopbackTimer::default();
        let fdc = FloppyController::new(
            &config,
            Box::new(irq.clone()),
            Box::new(dma.clone()),
            Box::new(timer.clone()),
        )
        .unwrap();
        Harness { fdc, irq, dma, timer }
    }

    /// A 1.44M drive 0 holding a patterned image and an empty drive 1.
    fn harness() -> Harness {
        let mut h = harness_with_config(FdcConfig::default());
        let image = RawSectorImage::from_vec(patterned_image(2880), false).unwrap();
        h.fdc.attach_media(0, Box::new(image)).unwrap();
        h
    }

    impl Harness {
        fn cmd(&mut self, bytes: &[u8]) {
            for &b in bytes {
                self.fdc.write_register(FDC_DATA_REGISTER, b);
            }
        }

        fn result(&mut self) -> Vec<u8> {
            let mut out = Vec::new();
            while self.fdc.phase() == ControllerPhase::ResultPhase && out.len() < 32 {
                out.push(self.fdc.read_register(FDC_DATA_REGISTER));
            }
            out
        }

        fn sense(&mut self) -> Vec<u8> {
            self.cmd(&[0x08]);
            self.result()
        }

        fn msr(&mut self) -> u8 {
            self.fdc.read_register(FDC_STATUS_REGISTER)
        }

        fn dor_reset(&mut self) {
            self.fdc.write_register(FDC_DIGITAL_OUTPUT_REGISTER, 0x08);
            self.fdc.write_register(FDC_DIGITAL_OUTPUT_REGISTER, 0x0C);
        }

        fn seek(&mut self, drive: u8, head: u8, track: u8) -> Vec<u8> {
            self.cmd(&[0x0F, (head << 2) | drive, track]);
            self.sense()
        }

        /// Run a read command on drive 0 with the DMA channel moving `len` bytes into memory.
        fn dma_read(&mut self, op: u8, chs: (u8, u8, u8), eot: u8, len: usize, chunk: usize) -> (Vec<u8>, Vec<u8>) {
            let (c, hd, s) = chs;
            self.dma.program(DMA, DmaTransferType::Write, vec![0; len]);
            self.cmd(&[op, hd << 2, c, hd, s, 2, eot, 0x1B, 0xFF]);
            self.dma.pump(&mut self.fdc, DMA, chunk);
            (self.dma.memory(), self.result())
        }

        /// Run a write or scan command on drive 0 with the DMA channel supplying `data`.
        fn dma_from_memory(&mut self, op: u8, chs: (u8, u8, u8), eot: u8, data: &[u8], chunk: usize) -> Vec<u8> {
            let (c, hd, s) = chs;
            self.dma.program(DMA, DmaTransferType::Read, data.to_vec());
            self.cmd(&[op, hd << 2, c, hd, s, 2, eot, 0x1B, 0xFF]);
            self.dma.pump(&mut self.fdc, DMA, chunk);
            self.result()
        }

        fn image_bytes(&mut self) -> Vec<u8> {
            let mut media = self.fdc.detach_media(0).unwrap().unwrap();
            let total = media.total_sectors();
            let mut out = vec![0; total * SECTOR_SIZE];
            media.read(0, &mut out, total).unwrap();
            out
        }
    }

    fn lba(c: usize, h: usize, s: usize) -> usize {
        (c * 2 + h) * SPT + s - 1
    }

    struct FailingDevice {
        fail_from: usize,
    }

    impl BlockDevice for FailingDevice {
        fn read(&mut self, sector: usize, buf: &mut [u8], count: usize) -> Result<usize, BlockDeviceError> {
            if sector >= self.fail_from {
                return Err(BlockDeviceError::Io(std::io::Error::other("bad sector")));
            }
            buf[..count * SECTOR_SIZE].fill(0xA5);
            Ok(count * SECTOR_SIZE)
        }

        fn write(&mut self, _sector: usize, _buf: &[u8], _count: usize) -> Result<usize, BlockDeviceError> {
            Err(BlockDeviceError::Io(std::io::Error::other("write fault")))
        }

        fn is_inserted(&self) -> bool {
            true
        }

        fn is_read_only(&self) -> bool {
            false
        }

        fn total_sectors(&self) -> usize {
            2880
        }
    }

    #[test]
    fn power_on_state() {
        let mut h = harness();
        assert_eq!(h.irq.raised(), 0);
        assert_eq!(h.msr(), FDC_STATUS_MRQ);
        assert_eq!(h.fdc.read_register(FDC_DIGITAL_OUTPUT_REGISTER), DOR_POWER_ON);
        assert_eq!(h.fdc.read_register(FDC_STATUS_REGISTER_B), 0);
        assert_eq!(h.fdc.read_register(0x06), NO_IO_BYTE);
    }

    #[test]
    fn reset_from_any_state_returns_to_command_phase() {
        let setups: Vec<fn(&mut Harness)> = vec![
            (|_h: &mut Harness| {}) as fn(&mut Harness),
            // Partial command
            |h: &mut Harness| h.cmd(&[0x46, 0x00, 0x03]),
            // Unread result
            |h: &mut Harness| h.cmd(&[0x10]),
            // Seek with an unconsumed interrupt
            |h: &mut Harness| h.cmd(&[0x0F, 0x00, 0x21]),
            // DMA transfer in flight
            |h: &mut Harness| {
                h.dma.program(DMA, DmaTransferType::Write, vec![0; 4096]);
                h.cmd(&[0x46, 0x00, 0x14, 0x00, 0x01, 0x02, 0x12, 0x1B, 0xFF]);
            },
            // PIO write in flight
            |h: &mut Harness| {
                h.cmd(&[0x03, 0xAF, 0x03]);
                h.cmd(&[0x45, 0x00, 0x02, 0x00, 0x01, 0x02, 0x12, 0x1B, 0xFF]);
                h.cmd(&[0x11; 100]);
            },
            // Read ID waiting on the timer
            |h: &mut Harness| h.cmd(&[0x4A, 0x00]),
        ];

        for (i, setup) in setups.into_iter().enumerate() {
            let mut h = harness();
            h.seek(0, 0, 9);
            setup(&mut h);
            h.irq.clear_count();

            h.dor_reset();

            assert_eq!(h.fdc.phase(), ControllerPhase::CommandPhase, "setup {}", i);
            assert!(h.fdc.fifo.is_empty(), "setup {}", i);
            assert!(!h.dma.is_held(DMA), "setup {}", i);
            assert_eq!(h.timer.pending(), None, "setup {}", i);
            for drive in h.fdc.drives.iter() {
                assert_eq!(drive.chs, DiskChs::default(), "setup {}", i);
            }
            assert_eq!(h.irq.raised(), 1, "setup {}", i);
            assert!(h.irq.level());
            assert_eq!(h.msr(), FDC_STATUS_MRQ);

            for unit in 0..4 {
                assert_eq!(h.sense(), vec![ST0_RESET | unit, 0], "setup {}", i);
            }
            assert!(!h.irq.level());
            assert_eq!(h.sense(), vec![ST0_INVALID_OPCODE]);
            assert_eq!(h.irq.raised(), 1);
        }
    }

    #[test]
    fn dor_writes_ignored_during_reset() {
        let mut h = harness();
        h.fdc.write_register(FDC_DIGITAL_OUTPUT_REGISTER, 0x08);
        assert_eq!(h.msr() & FDC_STATUS_MRQ, 0);

        h.fdc.write_register(FDC_DIGITAL_OUTPUT_REGISTER, 0x00);
        assert_eq!(h.fdc.read_register(FDC_DIGITAL_OUTPUT_REGISTER), 0x08);

        h.cmd(&[0x10]);
        assert_eq!(h.fdc.phase(), ControllerPhase::CommandPhase);
        assert!(h.fdc.fifo.is_empty());

        h.fdc.write_register(FDC_DIGITAL_OUTPUT_REGISTER, 0x1C);
        assert_eq!(h.irq.raised(), 1);
        assert!(h.fdc.drives[0].motor_on);
        assert!(!h.fdc.drives[1].motor_on);
    }

    #[test]
    fn dor_dma_gate_masks_irq() {
        let mut h = harness();
        h.fdc.write_register(FDC_DIGITAL_OUTPUT_REGISTER, 0x00);
        h.fdc.write_register(FDC_DIGITAL_OUTPUT_REGISTER, 0x04);
        assert!(h.fdc.irq_pending());
        assert!(!h.irq.level());
        assert_eq!(h.irq.raised(), 0);

        h.fdc.write_register(FDC_DIGITAL_OUTPUT_REGISTER, 0x0C);
        assert!(h.irq.level());
        assert_eq!(h.irq.raised(), 1);
    }

    #[test]
    fn software_reset_and_power_down() {
        let mut h = harness();
        h.fdc.write_register(FDC_STATUS_REGISTER, 0x80);
        assert_eq!(h.irq.raised(), 1);
        assert_eq!(h.sense(), vec![ST0_RESET, 0]);

        h.fdc.write_register(FDC_STATUS_REGISTER, 0x42);
        assert!(h.fdc.sleep);
        assert_eq!(h.fdc.rate_select, 2);
        h.msr();
        assert!(!h.fdc.sleep);
    }

    #[test]
    fn seek_stays_within_max_track() {
        let mut h = harness();
        let max = h.fdc.drives[0].max_track();
        assert_eq!(max, 79);

        for track in 0..=max as u8 {
            assert_eq!(h.seek(0, 0, track), vec![ST0_SEEK_END, track]);
            assert_eq!(h.fdc.drives[0].chs.c(), track as u16);
        }
        for track in [max as u8 + 1, 200, 255] {
            assert_eq!(
                h.seek(0, 0, track),
                vec![ST0_ABNORMAL_TERMINATION | ST0_SEEK_END | ST0_UNIT_CHECK, max as u8]
            );
            assert_eq!(h.fdc.drives[0].chs.c(), max);
        }
    }

    fn single_sided_harness() -> Harness {
        let config = FdcConfig {
            drive: vec![FloppyDriveConfig {
                fd_type: FloppyDriveType::Floppy360K,
                image: None,
                write_protect: false,
            }],
            ..Default::default()
        };
        let mut h = harness_with_config(config);
        let image = RawSectorImage::from_vec(patterned_image(320), false).unwrap();
        h.fdc.attach_media(0, Box::new(image)).unwrap();
        h
    }

    #[test]
    fn seek_to_missing_head_fails() {
        let mut h = single_sided_harness();
        assert_eq!(h.seek(0, 0, 4), vec![ST0_SEEK_END, 4]);
        assert_eq!(
            h.seek(0, 1, 6),
            vec![ST0_ABNORMAL_TERMINATION | ST0_SEEK_END | ST0_UNIT_CHECK | ST0_HEAD_ACTIVE, 4]
        );
        assert_eq!(h.fdc.drives[0].chs.c(), 4);
    }

    #[test]
    fn recalibrate_and_relative_seek() {
        let mut h = harness();
        h.seek(0, 0, 10);
        h.cmd(&[0xCF, 0x00, 5]);
        assert_eq!(h.sense(), vec![ST0_SEEK_END, 15]);
        h.cmd(&[0x8F, 0x00, 20]);
        assert_eq!(h.sense(), vec![ST0_SEEK_END, 0]);
        h.cmd(&[0xCF, 0x00, 200]);
        assert_eq!(h.sense(), vec![ST0_SEEK_END, 79]);

        h.cmd(&[0x07, 0x00]);
        assert_eq!(h.sense(), vec![ST0_SEEK_END, 0]);
        assert_eq!(h.fdc.drives[0].chs, DiskChs::default());
    }

    #[test]
    fn sense_interrupt_without_pending_is_invalid() {
        let mut h = harness();
        assert_eq!(h.sense(), vec![ST0_INVALID_OPCODE]);
        assert_eq!(h.irq.raised(), 0);
        assert!(!h.fdc.irq_pending());

        // A latched status is reported only once.
        h.seek(0, 0, 3);
        assert_eq!(h.sense(), vec![ST0_INVALID_OPCODE]);
    }

    #[test]
    fn invalid_opcode_has_no_irq() {
        let mut h = harness();
        h.cmd(&[0x1F]);
        assert_eq!(h.msr(), FDC_STATUS_MRQ | FDC_STATUS_DIO | FDC_STATUS_FDC_BUSY);
        assert_eq!(h.result(), vec![ST0_INVALID_OPCODE]);
        assert_eq!(h.irq.raised(), 0);
        assert_eq!(h.fdc.phase(), ControllerPhase::CommandPhase);

        h.cmd(&[0xCD, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(h.result(), vec![ST0_INVALID_OPCODE]);
    }

    #[test]
    fn result_phase_write_is_rejected() {
        let mut h = harness();
        h.cmd(&[0x10]);
        h.fdc.write_register(FDC_DATA_REGISTER, 0x55);
        assert_eq!(h.result(), vec![ST0_INVALID_OPCODE]);
        assert_eq!(h.fdc.phase(), ControllerPhase::CommandPhase);
    }

    #[test]
    fn commands_dispatch_after_exact_length() {
        for spec in COMMAND_TABLE.iter() {
            let mut h = harness();
            h.fdc.write_register(FDC_DATA_REGISTER, spec.value);
            for i in 1..spec.length {
                assert_eq!(h.fdc.phase(), ControllerPhase::CommandPhase, "{}", spec.command);
                assert_eq!(h.fdc.fifo.offset(), i, "{} dispatched early", spec.command);
                h.fdc.write_register(FDC_DATA_REGISTER, 0);
            }
            let dispatched = h.fdc.phase() != ControllerPhase::CommandPhase || h.fdc.fifo.is_empty();
            assert!(
                dispatched,
                "{} did not dispatch after {} bytes",
                spec.command,
                spec.length
            );
        }
    }

    #[test]
    fn identification_commands() {
        let mut h = harness();
        h.cmd(&[0x10]);
        assert_eq!(h.irq.raised(), 1);
        assert_eq!(h.result(), vec![FDC_VERSION]);
        assert!(!h.irq.level());

        h.cmd(&[0x18]);
        assert_eq!(h.result(), vec![FDC_PART_ID]);
        assert_eq!(h.irq.raised(), 1);

        h.cmd(&[0x94]);
        assert_eq!(h.result(), vec![FDC_LOCK_RESULT]);
        assert_eq!(h.irq.raised(), 2);

        h.cmd(&[0x14]);
        assert_eq!(h.result(), vec![0x00]);
        assert_eq!(h.irq.raised(), 2);

        h.cmd(&[0x17, 0x23]);
        assert_eq!(h.result(), vec![0x23]);
        assert_eq!(h.irq.raised(), 3);

        h.cmd(&[0x33, 0x01]);
        assert_eq!(h.fdc.phase(), ControllerPhase::CommandPhase);
    }

    #[test]
    fn lock_preserves_configuration_across_reset() {
        let mut h = harness();
        h.cmd(&[0x13, 0x00, 0x17, 0x05]);
        h.cmd(&[0x94]);
        h.result();
        h.dor_reset();
        for _ in 0..4 {
            h.sense();
        }
        h.cmd(&[0x0E]);
        let dump = h.result();
        assert_eq!(dump.len(), 10);
        assert_eq!(dump[7] & 0x80, 0x80);
        assert_eq!(dump[8], 0x17);
        assert_eq!(dump[9], 0x05);

        h.cmd(&[0x14]);
        h.result();
        h.dor_reset();
        h.cmd(&[0x0E]);
        let dump = h.result();
        assert_eq!(dump[8], FDC_DEFAULT_CONFIG);
        assert_eq!(dump[9], 0);
    }

    #[test]
    fn save_restore_round_trip() {
        let mut h = harness();
        h.cmd(&[0x03, 0xCF, 0x08]);
        h.cmd(&[0x13, 0x00, 0x57, 0x09]);
        h.cmd(&[0x12, 0x87]);
        h.seek(0, 0, 12);

        h.cmd(&[0x0E]);
        let dump = h.result();
        assert_eq!(dump[0], 12);
        assert_eq!(dump[4], 0xCF);
        assert_eq!(dump[5], 0x08);
        assert_eq!(dump[7], 0x07);

        h.cmd(&[0x2E]);
        let saved = h.result();
        assert_eq!(saved.len(), 15);
        assert_eq!(saved[2], 12);
        assert_eq!(saved[10], 0x57);

        h.dor_reset();
        for _ in 0..4 {
            h.sense();
        }
        h.cmd(&[0x0E]);
        assert_ne!(h.result(), dump);

        let mut restore = vec![0x4E];
        restore.extend_from_slice(&saved);
        restore.extend_from_slice(&[0, 0]);
        h.cmd(&restore);
        assert_eq!(h.fdc.phase(), ControllerPhase::CommandPhase);

        h.cmd(&[0x0E]);
        assert_eq!(h.result(), dump);
    }

    #[test]
    fn drive_specification() {
        let mut h = harness();
        h.cmd(&[0x8E, 0x01, 0x22, 0x03, 0x00, 0x80]);
        assert_eq!(h.result(), vec![0x00, 0x01, 0x22, 0x03]);

        h.cmd(&[0x8E, 0x01, 0x02, 0x03, 0x00, 0xC0]);
        assert_eq!(h.fdc.phase(), ControllerPhase::CommandPhase);
        assert_eq!(h.fdc.drive_spec, [0x00, 0x01, 0x02, 0x03]);
    }

    #[test]
    fn sense_drive_status_reports_st3() {
        let mut h = harness();
        h.cmd(&[0x04, 0x04]);
        assert_eq!(
            h.result(),
            vec![ST3_READY | ST3_TRACK0 | ST3_DOUBLESIDED | ST3_HEAD]
        );

        h.seek(0, 0, 2);
        h.fdc.set_write_protect(0, true).unwrap();
        h.cmd(&[0x04, 0x00]);
        assert_eq!(h.result(), vec![ST3_WRITE_PROTECT | ST3_READY | ST3_DOUBLESIDED]);
    }

    #[test]
    fn dma_write_then_read_round_trip() {
        for len in [1, 100, 511, 512, 513, 4096, SPT * SECTOR_SIZE, 2 * SPT * SECTOR_SIZE] {
            let mut h = harness();
            let data: Vec<u8> = (0..len).map(|i| (i * 31 + 5) as u8).collect();

            let status = h.dma_from_memory(0xC5, (3, 0, 1), 18, &data, 512);
            assert_eq!(status[0] & 0xC0, 0, "write of {} bytes: {:02X?}", len, status);

            let (mem, status) = h.dma_read(0xC6, (3, 0, 1), 18, len, 512);
            assert_eq!(status[0] & 0xC0, 0, "read of {} bytes: {:02X?}", len, status);
            assert_eq!(mem, data, "round trip of {} bytes", len);
        }
    }

    #[test]
    fn round_trip_across_cylinders() {
        let mut h = harness();
        let cylinder_len = 2 * SPT * SECTOR_SIZE;
        let data: Vec<u8> = (0..3 * cylinder_len).map(|i| (i % 253) as u8).collect();

        for (i, chunk) in data.chunks(cylinder_len).enumerate() {
            let status = h.dma_from_memory(0xC5, (10 + i as u8, 0, 1), 18, chunk, 1000);
            assert_eq!(status[0] & 0xC0, 0);
        }

        let mut back = Vec::new();
        for i in 0..3u8 {
            let (mem, status) = h.dma_read(0xC6, (10 + i, 0, 1), 18, cylinder_len, 4096);
            assert_eq!(status[0] & 0xC0, 0);
            back.extend(mem);
        }
        assert_eq!(back, data);
    }

    #[test]
    fn dma_chunk_size_does_not_change_read() {
        let len = 3 * SECTOR_SIZE + 100;
        let (ref_mem, ref_status) = harness().dma_read(0x46, (1, 0, 4), 18, len, len);

        let start = lba(1, 0, 4) * SECTOR_SIZE;
        assert_eq!(ref_mem, patterned_image(2880)[start..start + len]);

        for chunk in [1, 7, 100, 511, 512, 513, 1000, 4096] {
            let (mem, status) = harness().dma_read(0x46, (1, 0, 4), 18, len, chunk);
            assert_eq!(mem, ref_mem, "chunk {}", chunk);
            assert_eq!(status, ref_status, "chunk {}", chunk);
        }
    }

    #[test]
    fn dma_chunk_size_does_not_change_write() {
        let len = 2 * SECTOR_SIZE + 300;
        let data: Vec<u8> = (0..len).map(|i| (i % 13) as u8).collect();

        let mut reference = harness();
        let ref_status = reference.dma_from_memory(0x45, (2, 1, 17), 18, &data, len);
        let ref_image = reference.image_bytes();

        for chunk in [1, 3, 64, 511, 512, 700] {
            let mut h = harness();
            let status = h.dma_from_memory(0x45, (2, 1, 17), 18, &data, chunk);
            assert_eq!(status, ref_status, "chunk {}", chunk);
            assert!(h.image_bytes() == ref_image, "chunk {}", chunk);
        }
    }

    #[test]
    fn sector_cursor_wraps_to_next_track() {
        let mut h = harness();
        let (_, status) = h.dma_read(0x46, (5, 0, 1), 18, SPT * SECTOR_SIZE, 512);
        assert_eq!(status, vec![ST0_SEEK_END, 0, 0, 6, 0, 1, 2]);

        let mut h = single_sided_harness();
        let (_, status) = h.dma_read(0x46, (2, 0, 1), 8, 8 * SECTOR_SIZE, 512);
        assert_eq!(status, vec![ST0_SEEK_END, 0, 0, 3, 0, 1, 2]);
    }

    #[test]
    fn sector_cursor_flips_head_in_multi_track_mode() {
        let mut h = harness();
        let (_, status) = h.dma_read(0xC6, (5, 0, 1), 18, SPT * SECTOR_SIZE, 512);
        assert_eq!(status, vec![ST0_SEEK_END | ST0_HEAD_ACTIVE, 0, 0, 5, 1, 1, 2]);
    }

    #[test]
    fn read_stops_at_eot() {
        let mut h = harness();
        h.seek(0, 0, 1);
        let (mem, status) = h.dma_read(0x46, (1, 0, 16), 17, 4 * SECTOR_SIZE, 512);
        assert_eq!(status, vec![0, 0, 0, 2, 0, 1, 2]);
        let start = lba(1, 0, 16) * SECTOR_SIZE;
        assert_eq!(mem[..2 * SECTOR_SIZE], patterned_image(2880)[start..start + 2 * SECTOR_SIZE]);
        assert!(mem[2 * SECTOR_SIZE..].iter().all(|&b| b == 0));
    }

    #[test]
    fn implied_seek_disabled_requires_seek() {
        let mut h = harness();
        h.cmd(&[0x13, 0x00, 0x20, 0x00]);
        let (_, status) = h.dma_read(0x46, (5, 0, 1), 18, SECTOR_SIZE, 512);
        assert_eq!(status, vec![ST0_ABNORMAL_TERMINATION, 0, 0, 5, 0, 1, 2]);

        h.seek(0, 0, 5);
        let (_, status) = h.dma_read(0x46, (5, 0, 1), 18, SECTOR_SIZE, 512);
        assert_eq!(status[0], 0);
    }

    #[test]
    fn bad_sector_reports_end_of_cylinder() {
        let mut h = harness();
        let (_, status) = h.dma_read(0x46, (0, 0, 19), 19, SECTOR_SIZE, 512);
        assert_eq!(status, vec![ST0_ABNORMAL_TERMINATION, ST1_END_OF_CYLINDER, 0, 0, 0, 19, 2]);
        assert!(!h.dma.is_held(DMA));
    }

    #[test]
    fn not_ready_without_media() {
        let mut h = harness();
        h.dma.program(DMA, DmaTransferType::Write, vec![0; SECTOR_SIZE]);
        h.cmd(&[0x46, 0x01, 0, 0, 1, 2, 18, 0x1B, 0xFF]);
        let status = h.result();
        assert_eq!(status[0], ST0_ABNORMAL_TERMINATION | ST0_NOT_READY | 0x01);
        assert!(!h.dma.is_held(DMA));
        assert!(h.dma.memory().iter().all(|&b| b == 0));

        h.cmd(&[0x4A, 0x01]);
        let status = h.result();
        assert_eq!(status[0], ST0_ABNORMAL_TERMINATION | ST0_NOT_READY | 0x01);
        assert_eq!(status[1], ST1_NO_ID);
    }

    #[test]
    fn write_protect_blocks_write_and_format() {
        let mut h = harness();
        h.fdc.set_write_protect(0, true).unwrap();
        let status = h.dma_from_memory(0x45, (0, 0, 1), 18, &[0u8; SECTOR_SIZE], 512);
        assert_eq!(status[0] & 0xC0, ST0_ABNORMAL_TERMINATION);
        assert_eq!(status[1], ST1_WRITE_PROTECT);

        h.cmd(&[0x4D, 0x00, 2, 18, 0x54, 0xF6]);
        let status = h.result();
        assert_eq!(status[1], ST1_WRITE_PROTECT);

        assert!(h.image_bytes() == patterned_image(2880));
    }

    #[test]
    fn read_only_media_blocks_write() {
        let mut h = harness_with_config(FdcConfig::default());
        let image = RawSectorImage::from_vec(patterned_image(2880), true).unwrap();
        h.fdc.attach_media(0, Box::new(image)).unwrap();
        let status = h.dma_from_memory(0x45, (0, 0, 1), 18, &[0u8; SECTOR_SIZE], 512);
        assert_eq!(status[0] & 0xC0, ST0_ABNORMAL_TERMINATION);
        assert_eq!(status[1], ST1_WRITE_PROTECT);
    }

    #[test]
    fn media_error_aborts_at_failing_sector() {
        let mut h = harness_with_config(FdcConfig::default());
        h.fdc.attach_media(0, Box::new(FailingDevice { fail_from: 2 })).unwrap();

        let (mem, status) = h.dma_read(0x46, (0, 0, 1), 18, 4 * SECTOR_SIZE, 512);
        assert_eq!(status, vec![ST0_ABNORMAL_TERMINATION, ST1_NODATA, 0, 0, 0, 3, 2]);
        assert!(!h.dma.is_held(DMA));
        assert!(mem[..2 * SECTOR_SIZE].iter().all(|&b| b == 0xA5));
        assert!(mem[2 * SECTOR_SIZE..].iter().all(|&b| b == 0));

        let status = h.dma_from_memory(0x45, (0, 0, 1), 18, &[0u8; SECTOR_SIZE], 512);
        assert_eq!(status[0] & 0xC0, ST0_ABNORMAL_TERMINATION);
        assert!(!h.dma.is_held(DMA));
    }

    #[test]
    fn scan_equal_hit_and_miss() {
        let image = patterned_image(2880);
        let s1 = lba(0, 0, 1) * SECTOR_SIZE;
        let s2 = lba(0, 0, 2) * SECTOR_SIZE;

        // The second sector matches.
        let mut mem = image[s1..s1 + SECTOR_SIZE].to_vec();
        mem[10] ^= 0x01;
        mem.extend_from_slice(&image[s2..s2 + SECTOR_SIZE]);
        mem.extend_from_slice(&[0u8; SECTOR_SIZE]);

        for chunk in [7, 512, 3 * SECTOR_SIZE] {
            let mut h = harness();
            let status = h.dma_from_memory(0x50, (0, 0, 1), 3, &mem, chunk);
            assert_eq!(status, vec![0, 0, ST2_SCAN_HIT, 0, 0, 2, 2], "chunk {}", chunk);
            assert!(!h.dma.is_held(DMA));
        }

        let mut h = harness();
        let status = h.dma_from_memory(0x50, (0, 0, 1), 3, &vec![0u8; 3 * SECTOR_SIZE], 512);
        assert_eq!(status, vec![0, 0, ST2_SCAN_NOT_SATISFIED, 1, 0, 1, 2]);

        // 0xFF in memory matches any disk byte.
        let mut h = harness();
        let status = h.dma_from_memory(0x50, (0, 0, 1), 3, &vec![0xFFu8; 3 * SECTOR_SIZE], 512);
        assert_eq!(status, vec![0, 0, ST2_SCAN_HIT, 0, 0, 1, 2]);
    }

    #[test]
    fn scan_low_and_high() {
        let blank = || {
            let mut h = harness_with_config(FdcConfig::default());
            h.fdc.attach_media(0, Box::new(RawSectorImage::blank(2880))).unwrap();
            h
        };
        let len = 3 * SECTOR_SIZE;

        // Runs a scan over sectors 1-3 and returns the bytes consumed and the result.
        let scan = |op: u8, fill: u8| {
            let mut h = blank();
            h.dma.program(DMA, DmaTransferType::Read, vec![fill; len]);
            h.cmd(&[op, 0x00, 0, 0, 1, 2, 3, 0x1B, 0xFF]);
            let moved = h.dma.pump(&mut h.fdc, DMA, 512);
            (moved, h.result())
        };

        // Disk 0x00 <= memory 0x10 in every byte.
        let (moved, status) = scan(0x59, 0x10);
        assert_eq!(moved, SECTOR_SIZE);
        assert_eq!(status, vec![0, 0, 0, 0, 0, 1, 2]);

        // The first byte of sector 1 disproves disk >= memory.
        let (moved, status) = scan(0x5D, 0x10);
        assert_eq!(moved, SECTOR_SIZE);
        assert_eq!(status, vec![0, 0, ST2_SCAN_NOT_SATISFIED, 0, 0, 1, 2]);

        let (moved, status) = scan(0x5D, 0x00);
        assert_eq!(moved, SECTOR_SIZE);
        assert_eq!(status, vec![0, 0, ST2_SCAN_HIT, 0, 0, 1, 2]);

        // Disproved in the last byte of sector 1 only, still stops there.
        let mut h = harness_with_config(FdcConfig::default());
        let mut image = vec![0x20u8; 2880 * SECTOR_SIZE];
        image[SECTOR_SIZE - 1] = 0x05;
        h.fdc
            .attach_media(0, Box::new(RawSectorImage::from_vec(image, false).unwrap()))
            .unwrap();
        h.dma.program(DMA, DmaTransferType::Read, vec![0x10; len]);
        h.cmd(&[0x5D, 0x00, 0, 0, 1, 2, 3, 0x1B, 0xFF]);
        assert_eq!(h.dma.pump(&mut h.fdc, DMA, 100), SECTOR_SIZE);
        assert_eq!(h.result(), vec![0, 0, ST2_SCAN_NOT_SATISFIED, 0, 0, 1, 2]);
        assert_eq!(h.dma.remaining(), len - SECTOR_SIZE);
    }

    #[test]
    fn pio_transfers_span_sectors_and_tracks() {
        let mut h = harness();
        h.cmd(&[0x03, 0xAF, 0x03]);
        let original = patterned_image(2880);

        // Two sectors ending at EOT: the second is staged when the offset wraps.
        let data: Vec<u8> = (0..2 * SECTOR_SIZE).map(|i| (i * 3 + 1) as u8).collect();
        h.cmd(&[0x45, 0x00, 0, 0, 17, 2, 18, 0x1B, 0xFF]);
        h.cmd(&data[..SECTOR_SIZE]);
        assert_eq!(h.fdc.phase(), ControllerPhase::ExecutionPhase);
        assert_eq!(h.fdc.drives[0].chs.s(), 18);
        h.cmd(&data[SECTOR_SIZE..]);
        assert_eq!(h.result(), vec![0, 0, 0, 1, 0, 1, 2]);

        // Multi-track read from sector 18 of head 0 continues on head 1.
        h.cmd(&[0xC6, 0x00, 0, 0, 18, 2, 18, 0x1B, 0xFF]);
        let sectors = 1 + SPT;
        let back: Vec<u8> = (0..sectors * SECTOR_SIZE)
            .map(|_| h.fdc.read_register(FDC_DATA_REGISTER))
            .collect();
        assert_eq!(back[..SECTOR_SIZE], data[SECTOR_SIZE..]);
        let start = lba(0, 1, 1) * SECTOR_SIZE;
        assert_eq!(back[SECTOR_SIZE..], original[start..start + SPT * SECTOR_SIZE]);
        assert_eq!(h.result(), vec![ST0_SEEK_END, 0, 0, 1, 0, 1, 2]);

        let image = h.image_bytes();
        let start = lba(0, 0, 17) * SECTOR_SIZE;
        assert_eq!(image[start..start + 2 * SECTOR_SIZE], data[..]);
        assert_eq!(image[..start], original[..start]);
    }

    #[test]
    fn pio_write_then_read() {
        let mut h = harness();
        h.cmd(&[0x03, 0xAF, 0x03]);
        assert!(!h.fdc.dma_enabled());

        let data: Vec<u8> = (0..SECTOR_SIZE).map(|i| (255 - i % 256) as u8).collect();
        h.cmd(&[0x45, 0x00, 0, 0, 1, 2, 1, 0x1B, 0xFF]);
        assert_eq!(h.fdc.phase(), ControllerPhase::ExecutionPhase);
        assert_eq!(
            h.msr(),
            FDC_STATUS_MRQ | FDC_STATUS_FDC_BUSY | FDC_STATUS_NON_DMA_MODE
        );
        assert!(h.irq.level());

        h.cmd(&data);
        assert_eq!(h.fdc.phase(), ControllerPhase::ResultPhase);
        assert_eq!(h.result(), vec![0, 0, 0, 1, 0, 1, 2]);

        h.cmd(&[0x46, 0x00, 0, 0, 1, 2, 1, 0x1B, 0xFF]);
        assert_eq!(
            h.msr(),
            FDC_STATUS_MRQ | FDC_STATUS_DIO | FDC_STATUS_FDC_BUSY | FDC_STATUS_NON_DMA_MODE
        );
        let back: Vec<u8> = (0..SECTOR_SIZE)
            .map(|_| h.fdc.read_register(FDC_DATA_REGISTER))
            .collect();
        assert_eq!(back, data);
        assert_eq!(h.result()[0], ST0_SEEK_END);
    }

    #[test]
    fn mismatched_dma_mode_falls_back_to_pio() {
        let mut h = harness();
        h.dma.program(DMA, DmaTransferType::Read, vec![0; SECTOR_SIZE]);
        h.cmd(&[0x46, 0x00, 0, 0, 1, 2, 1, 0x1B, 0xFF]);
        assert!(!h.dma.is_held(DMA));
        assert_eq!(h.msr() & FDC_STATUS_NON_DMA_MODE, FDC_STATUS_NON_DMA_MODE);
        assert_eq!(h.dma.pump(&mut h.fdc, DMA, 512), 0);

        let first = h.fdc.read_register(FDC_DATA_REGISTER);
        assert_eq!(first, patterned_image(1)[0]);
    }

    #[test]
    fn format_track_fills_sectors() {
        let mut h = harness();
        h.seek(0, 1, 2);

        let ids: Vec<u8> = (1..=SPT as u8).flat_map(|r| [2, 1, r, 2]).collect();
        h.dma.program(DMA, DmaTransferType::Read, ids);
        h.cmd(&[0x4D, 0x04, 2, SPT as u8, 0x54, 0xE5]);
        assert!(h.dma.is_held(DMA));
        h.dma.pump(&mut h.fdc, DMA, 5);

        let status = h.result();
        assert_eq!(status, vec![ST0_HEAD_ACTIVE, 0, 0, 2, 1, SPT as u8, 2]);

        let image = h.image_bytes();
        let original = patterned_image(2880);
        for r in 1..=SPT {
            let start = lba(2, 1, r) * SECTOR_SIZE;
            assert!(image[start..start + SECTOR_SIZE].iter().all(|&b| b == 0xE5));
        }
        let start = lba(2, 0, 1) * SECTOR_SIZE;
        assert_eq!(image[start..start + SECTOR_SIZE], original[start..start + SECTOR_SIZE]);
    }

    #[test]
    fn read_id_completes_on_timer() {
        let mut h = harness();
        h.seek(0, 0, 7);
        h.irq.clear_count();

        h.cmd(&[0x4A, 0x04]);
        assert_eq!(h.fdc.phase(), ControllerPhase::ExecutionPhase);
        assert_eq!(h.timer.pending(), Some(READ_ID_DELAY_US));
        assert_eq!(h.irq.raised(), 0);

        assert!(h.timer.fire(&mut h.fdc));
        assert_eq!(h.irq.raised(), 1);
        assert_eq!(h.result(), vec![ST0_HEAD_ACTIVE, 0, 0, 7, 1, 1, 2]);
    }

    #[test]
    fn deleted_data_and_verify() {
        let mut h = harness();
        h.cmd(&[0x4C, 0x00, 0, 0, 1, 2, 18, 0x1B, 0xFF]);
        assert_eq!(h.result()[0], ST0_ABNORMAL_TERMINATION | ST0_SEEK_END);

        h.cmd(&[0x49, 0x00, 0, 0, 1, 2, 18, 0x1B, 0xFF]);
        assert_eq!(h.result()[0], ST0_ABNORMAL_TERMINATION | ST0_SEEK_END);

        h.cmd(&[0x56, 0x00, 0, 0, 1, 2, 18, 0x1B, 0xFF]);
        assert_eq!(h.result()[0], ST0_SEEK_END);
    }

    #[test]
    fn digital_input_reports_media_change_once() {
        let mut h = harness();
        assert_eq!(h.fdc.read_register(FDC_DIGITAL_INPUT_REGISTER), DIR_DISK_CHANGE);
        assert_eq!(h.fdc.read_register(FDC_DIGITAL_INPUT_REGISTER), 0);

        let media = h.fdc.detach_media(0).unwrap();
        assert!(media.is_some());
        assert_eq!(h.fdc.read_register(FDC_DIGITAL_INPUT_REGISTER), DIR_DISK_CHANGE);
        assert!(!h.fdc.drives[0].is_ready());

        assert!(matches!(h.fdc.media_changed(2), Err(FdcError::InvalidDrive(2))));
    }

    #[test]
    fn digital_input_reports_change_on_either_drive() {
        let mut h = harness();
        assert_eq!(h.fdc.read_register(FDC_DIGITAL_INPUT_REGISTER), DIR_DISK_CHANGE);

        // Drive 0 stays selected, the change on drive 1 is still reported once.
        h.fdc.attach_media(1, Box::new(RawSectorImage::blank(2880))).unwrap();
        assert_eq!(h.fdc.read_register(FDC_DIGITAL_INPUT_REGISTER), DIR_DISK_CHANGE);
        assert!(!h.fdc.drives[0].revalidate_needed);
        assert!(!h.fdc.drives[1].revalidate_needed);
        assert_eq!(h.fdc.read_register(FDC_DIGITAL_INPUT_REGISTER), 0);
    }

    #[test]
    fn tape_register_write_ignored_during_reset() {
        let mut h = harness();
        h.fdc.write_register(FDC_DIGITAL_OUTPUT_REGISTER, 0x08);
        h.fdc.write_register(FDC_TAPE_DRIVE_REGISTER, TAPE_BOOT_SELECT);
        h.fdc.write_register(FDC_DIGITAL_OUTPUT_REGISTER, 0x0C);
        assert_eq!(h.fdc.read_register(FDC_TAPE_DRIVE_REGISTER), 0);

        h.fdc.write_register(FDC_TAPE_DRIVE_REGISTER, TAPE_BOOT_SELECT);
        assert_eq!(h.fdc.read_register(FDC_TAPE_DRIVE_REGISTER), TAPE_BOOT_SELECT);
    }

    #[test]
    fn boot_select_swaps_drives() {
        let mut h = harness();
        h.fdc.write_register(FDC_TAPE_DRIVE_REGISTER, TAPE_BOOT_SELECT);
        assert_eq!(h.fdc.read_register(FDC_TAPE_DRIVE_REGISTER), TAPE_BOOT_SELECT);

        // Logical drive 0 is now the empty physical drive 1.
        let (_, status) = h.dma_read(0x46, (0, 0, 1), 18, SECTOR_SIZE, 512);
        assert_eq!(status[0], ST0_ABNORMAL_TERMINATION | ST0_NOT_READY);

        let (mem, status) = {
            h.dma.program(DMA, DmaTransferType::Write, vec![0; SECTOR_SIZE]);
            h.cmd(&[0x46, 0x01, 0, 0, 1, 2, 1, 0x1B, 0xFF]);
            h.dma.pump(&mut h.fdc, DMA, 512);
            (h.dma.memory(), h.result())
        };
        assert_eq!(status[0], 0x01);
        assert_eq!(mem, patterned_image(1));
    }

    #[test]
    fn io_port_mapping() {
        let mut h = harness();
        let ports: Vec<u16> = h.fdc.port_list().iter().map(|(_, p)| *p).collect();
        assert_eq!(ports, vec![0x3F1, 0x3F2, 0x3F3, 0x3F4, 0x3F5, 0x3F7]);

        assert_eq!(h.fdc.read_u8(0x3F4), FDC_STATUS_MRQ);
        h.fdc.write_u8(0x3F5, 0x10);
        assert_eq!(h.fdc.read_u8(0x3F5), FDC_VERSION);
        assert_eq!(h.fdc.read_u8(0x3F0), NO_IO_BYTE);
    }

    #[test]
    fn debug_state_reflects_controller() {
        let mut h = harness();
        h.seek(0, 0, 3);
        h.cmd(&[0x10]);

        let state = h.fdc.get_debug_state();
        assert!(state.intr);
        assert_eq!(state.phase, ControllerPhase::ResultPhase);
        assert_eq!(state.last_cmd, Command::Version);
        assert_eq!(state.fifo, vec![FDC_VERSION]);
        assert_eq!(state.drives.len(), 2);
        assert_eq!(state.drives[0].chs.c(), 3);
        assert!(state.drives[0].ready);
        assert!(!state.drives[1].ready);
        assert!(state.cmd_log.iter().any(|s| s.starts_with("Seek")));
    }

    #[test]
    fn rejects_invalid_config() {
        let config = FdcConfig {
            dma_channel: 5,
            ..Default::default()
        };
        let result = FloppyController::new(
            &config,
            Box::new(LoopbackIrq::default()),
            Box::new(LoopbackDma::default()),
            Box::new(LoopbackTimer::default()),
        );
        assert!(matches!(result, Err(FdcError::Config(_))));
    }
}
