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

    devices::fdc::command.rs

    Command decoding and the handlers for commands that complete without a
    data transfer.
*/

use strum_macros::{Display, EnumIter};

use crate::devices::fdc::{
    controller::{FloppyController, TimerEvent, READ_ID_DELAY_US},
    registers::*,
    transfer::TransferDirection,
};

/// Represent the commands the controller decodes.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Display, EnumIter)]
pub enum Command {
    #[default]
    NoCommand,
    ReadData,
    ReadDeletedData,
    Verify,
    ScanEqual,
    ScanLowOrEqual,
    ScanHighOrEqual,
    WriteData,
    WriteDeletedData,
    Specify,
    SenseDriveStatus,
    Recalibrate,
    SenseInterruptStatus,
    DumpRegisters,
    Seek,
    Version,
    PerpendicularMode,
    Configure,
    Unlock,
    PowerdownMode,
    PartId,
    Save,
    Option,
    ReadTrack,
    ReadId,
    FormatTrack,
    Restore,
    DriveSpecification,
    RelativeSeekOut,
    RelativeSeekIn,
    FormatAndWrite,
    Lock,
    Invalid,
}

pub type CommandDispatchFn = fn(&mut FloppyController);

/// One row of the opcode decoder. A command byte matches when `byte & mask == value`.
/// `length` counts the opcode byte itself.
pub struct CommandSpec {
    pub mask: u8,
    pub value: u8,
    pub command: Command,
    pub length: usize,
    pub handler: CommandDispatchFn,
}

macro_rules! cmd {
    ($mask:expr, $value:expr, $command:ident, $length:expr, $handler:ident) => {
        CommandSpec {
            mask: $mask,
            value: $value,
            command: Command::$command,
            length: $length,
            handler: FloppyController::$handler,
        }
    };
}

/// Opcode decoder, searched in order. Rows with fewer mask bits come first: the read family
/// ignores MT and SK, the write family ignores MT, everything else matches the whole byte.
/// Reordering rows changes which command an ambiguous byte decodes to.
pub static COMMAND_TABLE: [CommandSpec; 31] = [
    cmd!(0x5F, 0x46, ReadData, 9, command_read_data),
    cmd!(0x5F, 0x4C, ReadDeletedData, 9, command_deleted_data),
    cmd!(0x5F, 0x50, ScanEqual, 9, command_scan_equal),
    cmd!(0x5F, 0x56, Verify, 9, command_verify),
    cmd!(0x5F, 0x59, ScanLowOrEqual, 9, command_scan_low),
    cmd!(0x5F, 0x5D, ScanHighOrEqual, 9, command_scan_high),
    cmd!(0x7F, 0x45, WriteData, 9, command_write_data),
    cmd!(0x7F, 0x49, WriteDeletedData, 9, command_deleted_data),
    cmd!(0xFF, 0x03, Specify, 3, command_specify),
    cmd!(0xFF, 0x04, SenseDriveStatus, 2, command_sense_drive_status),
    cmd!(0xFF, 0x07, Recalibrate, 2, command_recalibrate),
    cmd!(0xFF, 0x08, SenseInterruptStatus, 1, command_sense_interrupt),
    cmd!(0xFF, 0x0E, DumpRegisters, 1, command_dump_registers),
    cmd!(0xFF, 0x0F, Seek, 3, command_seek),
    cmd!(0xFF, 0x10, Version, 1, command_version),
    cmd!(0xFF, 0x12, PerpendicularMode, 2, command_perpendicular_mode),
    cmd!(0xFF, 0x13, Configure, 4, command_configure),
    cmd!(0xFF, 0x14, Unlock, 1, command_unlock),
    cmd!(0xFF, 0x17, PowerdownMode, 2, command_powerdown_mode),
    cmd!(0xFF, 0x18, PartId, 1, command_part_id),
    cmd!(0xFF, 0x2E, Save, 1, command_save),
    cmd!(0xFF, 0x33, Option, 2, command_option),
    cmd!(0xFF, 0x42, ReadTrack, 9, command_read_track),
    cmd!(0xFF, 0x4A, ReadId, 2, command_read_id),
    cmd!(0xFF, 0x4D, FormatTrack, 6, command_format_track),
    cmd!(0xFF, 0x4E, Restore, 18, command_restore),
    cmd!(0xFF, 0x8E, DriveSpecification, 6, command_drive_specification),
    cmd!(0xFF, 0x8F, RelativeSeekOut, 3, command_relative_seek_out),
    cmd!(0xFF, 0x94, Lock, 1, command_lock),
    cmd!(0xFF, 0xCD, FormatAndWrite, 11, command_invalid),
    cmd!(0xFF, 0xCF, RelativeSeekIn, 3, command_relative_seek_in),
];

pub static INVALID_COMMAND: CommandSpec = cmd!(0x00, 0x00, Invalid, 1, command_invalid);

/// Find the decoder row for a command byte. Unknown opcodes decode to a one byte invalid command.
pub fn decode_command(byte: u8) -> &'static CommandSpec {
    COMMAND_TABLE
        .iter()
        .find(|spec| byte & spec.mask == spec.value)
        .unwrap_or(&INVALID_COMMAND)
}

/// Number of bytes in a save/restore image.
pub const SAVE_LEN: usize = 15;

impl FloppyController {
    fn select_from_param(&mut self) -> (u8, u8) {
        let dhs = DriveHeadSelect::from_bytes([self.fifo.param(1)]);
        self.select_drive(dhs.drive());
        (self.drive_select as u8, dhs.head())
    }

    pub(crate) fn command_read_data(&mut self) {
        self.start_transfer(TransferDirection::Read);
    }

    pub(crate) fn command_read_track(&mut self) {
        self.start_transfer(TransferDirection::Read);
    }

    pub(crate) fn command_write_data(&mut self) {
        self.start_transfer(TransferDirection::Write);
    }

    pub(crate) fn command_scan_equal(&mut self) {
        self.start_transfer(TransferDirection::ScanEqual);
    }

    pub(crate) fn command_scan_low(&mut self) {
        self.start_transfer(TransferDirection::ScanLow);
    }

    pub(crate) fn command_scan_high(&mut self) {
        self.start_transfer(TransferDirection::ScanHigh);
    }

    pub(crate) fn command_format_track(&mut self) {
        self.start_format();
    }

    /// Raw sector images carry no deleted data address marks.
    pub(crate) fn command_deleted_data(&mut self) {
        self.select_from_param();
        log::warn!("{}: deleted data marks are not supported", self.command);
        self.stop_transfer(ST0_ABNORMAL_TERMINATION | ST0_SEEK_END, 0, 0);
    }

    pub(crate) fn command_verify(&mut self) {
        self.select_from_param();
        self.stop_transfer(ST0_SEEK_END, 0, 0);
    }

    pub(crate) fn command_specify(&mut self) {
        let srt_hut = StepRateHeadUnload::from_bytes([self.fifo.param(1)]);
        let hlt_nd = HeadLoadDma::from_bytes([self.fifo.param(2)]);

        self.srt_hut = self.fifo.param(1);
        self.hlt_nd = self.fifo.param(2);

        let log_str = format!(
            "step rate: {} head unload: {} head load: {} non-dma: {}",
            srt_hut.step_rate(),
            srt_hut.head_unload(),
            hlt_nd.head_load(),
            hlt_nd.non_dma()
        );
        self.log_cmd(Command::Specify, &log_str);
        self.end_command();
    }

    pub(crate) fn command_sense_drive_status(&mut self) {
        let (unit, head) = self.select_from_param();
        let drive = self.selected_drive();

        let mut st3 = ST3_READY | ST3_DOUBLESIDED | (head << 2) | unit;
        if drive.is_read_only() {
            st3 |= ST3_WRITE_PROTECT;
        }
        if drive.chs.c() == 0 {
            st3 |= ST3_TRACK0;
        }

        self.log_cmd(Command::SenseDriveStatus, &format!("ST3: {:02X}", st3));
        self.set_result(&[st3], false);
    }

    pub(crate) fn command_recalibrate(&mut self) {
        let (unit, _) = self.select_from_param();
        let drive = self.selected_drive_mut();
        drive.start();
        drive.recalibrate();

        self.log_cmd(Command::Recalibrate, &format!("drive: {}", unit));
        self.end_command();
        self.raise_irq(Some(ST0_SEEK_END | unit));
    }

    pub(crate) fn command_seek(&mut self) {
        let (unit, head) = self.select_from_param();
        let track = self.fifo.param(2) as u16;

        let drive = self.selected_drive_mut();
        drive.start();
        let st0 = if drive.is_seek_valid(head, track) {
            drive.seek_track(track);
            drive.chs.h = head;
            ST0_SEEK_END
        }
        else {
            ST0_ABNORMAL_TERMINATION | ST0_SEEK_END | ST0_UNIT_CHECK
        };

        self.log_cmd(
            Command::Seek,
            &format!("drive: {} head: {} track: {} ST0: {:02X}", unit, head, track, st0),
        );
        self.end_command();
        self.raise_irq(Some(st0 | (head << 2) | unit));
    }

    fn relative_seek(&mut self, inward: bool) {
        let (unit, head) = self.select_from_param();
        let steps = self.fifo.param(2) as u16;

        let drive = self.selected_drive_mut();
        drive.start();
        let current = drive.chs.c();
        let track = if inward {
            current.saturating_add(steps).min(drive.max_track())
        }
        else {
            current.saturating_sub(steps)
        };
        drive.seek_track(track);
        drive.chs.h = head;

        self.log_cmd(
            self.command,
            &format!("drive: {} steps: {} track: {}->{}", unit, steps, current, track),
        );
        self.end_command();
        self.raise_irq(Some(ST0_SEEK_END | (head << 2) | unit));
    }

    pub(crate) fn command_relative_seek_in(&mut self) {
        self.relative_seek(true);
    }

    pub(crate) fn command_relative_seek_out(&mut self) {
        self.relative_seek(false);
    }

    /// Sense Interrupt Status. The PC BIOS issues four of these after a reset and expects to see
    /// each drive number in turn, whether or not the drive exists.
    pub(crate) fn command_sense_interrupt(&mut self) {
        let result = if self.reset_sense_count > 0 {
            let unit = 4 - self.reset_sense_count;
            self.reset_sense_count -= 1;
            self.interrupt_status = None;
            let track = match unit {
                0 | 1 => self.logical_drive(unit as usize).chs.c() as u8,
                _ => 0,
            };
            vec![ST0_RESET | unit, track]
        }
        else if let Some(st0) = self.interrupt_status.take() {
            let track = self.logical_drive((st0 & 0x01) as usize).chs.c() as u8;
            vec![st0, track]
        }
        else {
            log::warn!("Sense interrupt received without pending interrupt");
            vec![ST0_INVALID_OPCODE]
        };

        self.log_cmd(Command::SenseInterruptStatus, &format!("result: {:02X?}", result));
        self.lower_irq();
        self.set_result(&result, false);
    }

    pub(crate) fn command_version(&mut self) {
        self.set_result(&[FDC_VERSION], true);
    }

    pub(crate) fn command_part_id(&mut self) {
        self.set_result(&[FDC_PART_ID], false);
    }

    pub(crate) fn command_lock(&mut self) {
        self.lock = true;
        self.log_cmd(Command::Lock, "configuration locked");
        self.set_result(&[FDC_LOCK_RESULT], true);
    }

    pub(crate) fn command_unlock(&mut self) {
        self.lock = false;
        self.log_cmd(Command::Unlock, "configuration unlocked");
        self.set_result(&[0x00], false);
    }

    pub(crate) fn command_configure(&mut self) {
        self.config = self.fifo.param(2);
        self.precomp_track = self.fifo.param(3);

        let cfg = ConfigureByte::from_bytes([self.config]);
        let log_str = format!(
            "implied seek: {} fifo disabled: {} polling disabled: {} threshold: {} precomp track: {}",
            cfg.implied_seek(),
            cfg.fifo_disable(),
            cfg.poll_disable(),
            cfg.fifo_threshold(),
            self.precomp_track
        );
        self.log_cmd(Command::Configure, &log_str);
        self.end_command();
    }

    pub(crate) fn command_perpendicular_mode(&mut self) {
        let perp = PerpendicularByte::from_bytes([self.fifo.param(1)]);
        if perp.overwrite() {
            let bits = perp.drives();
            for (i, drive) in self.drives.iter_mut().enumerate() {
                drive.perpendicular = (bits >> i) & 0x01;
            }
        }
        self.perpendicular_mode = self.fifo.param(1) & 0x03;
        self.end_command();
    }

    pub(crate) fn command_powerdown_mode(&mut self) {
        self.powerdown = self.fifo.param(1);
        self.set_result(&[self.powerdown], true);
    }

    pub(crate) fn command_option(&mut self) {
        self.log_cmd(Command::Option, &format!("ignored: {:02X}", self.fifo.param(1)));
        self.end_command();
    }

    /// Lock bit, per-drive perpendicular bits and the gap/write gate bits, as reported by
    /// DUMPREG and SAVE.
    fn perpendicular_lock_byte(&self) -> u8 {
        let drives = self
            .drives
            .iter()
            .enumerate()
            .fold(0u8, |acc, (i, drive)| acc | ((drive.perpendicular & 0x01) << (2 + i)));
        ((self.lock as u8) << 7) | drives | self.perpendicular_mode
    }

    pub(crate) fn command_dump_registers(&mut self) {
        let result = [
            self.drives[0].chs.c() as u8,
            self.drives[1].chs.c() as u8,
            0,
            0,
            self.srt_hut,
            self.hlt_nd,
            self.last_eot,
            self.perpendicular_lock_byte(),
            self.config,
            self.precomp_track,
        ];
        self.set_result(&result, false);
    }

    pub(crate) fn command_save(&mut self) {
        let result: [u8; SAVE_LEN] = [
            0,
            0,
            self.drives[0].chs.c() as u8,
            self.drives[1].chs.c() as u8,
            0,
            0,
            self.srt_hut,
            self.hlt_nd,
            self.last_eot,
            self.perpendicular_lock_byte(),
            self.config,
            self.precomp_track,
            self.powerdown,
            0,
            0,
        ];
        self.set_result(&result, true);
    }

    /// Restore takes the bytes produced by Save, in the same order.
    pub(crate) fn command_restore(&mut self) {
        let saved: Vec<u8> = (0..SAVE_LEN).map(|i| self.fifo.param(i + 1)).collect();

        for (i, drive) in self.drives.iter_mut().enumerate() {
            let track = (saved[2 + i] as u16).min(drive.max_track());
            drive.seek_track(track);
        }
        self.srt_hut = saved[6];
        self.hlt_nd = saved[7];
        self.last_eot = saved[8];

        let perp = saved[9];
        self.lock = perp & 0x80 != 0;
        for (i, drive) in self.drives.iter_mut().enumerate() {
            drive.perpendicular = (perp >> (2 + i)) & 0x01;
        }
        self.perpendicular_mode = perp & 0x03;
        self.config = saved[10];
        self.precomp_track = saved[11];
        self.powerdown = saved[12];

        self.log_cmd(Command::Restore, &format!("restored: {:02X?}", saved));
        self.end_command();
    }

    /// Drive Specification. Parameter bytes with bit 7 clear update the spec byte of the drive
    /// in bits 1:0. The final byte has DONE (bit 7) and NRP (bit 6); with DONE set and NRP clear
    /// the four drive spec bytes are returned.
    pub(crate) fn command_drive_specification(&mut self) {
        for i in 1..=5 {
            let byte = self.fifo.param(i);
            if byte & 0x80 == 0 {
                self.drive_spec[(byte & 0x03) as usize] = byte;
            }
        }

        let done = self.fifo.param(5);
        if done & 0x80 != 0 && done & 0x40 == 0 {
            let result = self.drive_spec;
            self.set_result(&result, false);
        }
        else {
            self.end_command();
        }
    }

    pub(crate) fn command_read_id(&mut self) {
        let (_, head) = self.select_from_param();
        let drive = self.selected_drive_mut();
        drive.start();
        drive.chs.h = head;

        if !drive.is_ready() {
            self.stop_transfer(ST0_ABNORMAL_TERMINATION | ST0_NOT_READY, ST1_NO_ID, 0);
            return;
        }
        self.enter_execution();
        self.pending_timer = Some(TimerEvent::ReadId);
        self.timer.schedule_one_shot(READ_ID_DELAY_US);
    }

    pub(crate) fn command_invalid(&mut self) {
        log::warn!(
            "Invalid command: {:02X} ({})",
            self.fifo.param(0),
            self.command
        );
        self.set_result(&[ST0_INVALID_OPCODE], false);
    }
}
