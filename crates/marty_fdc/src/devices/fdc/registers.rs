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

    devices::fdc::registers.rs

    Register offsets, status bit definitions and register bitfields.
*/

use modular_bitfield::{bitfield, prelude::*};

// Register offsets from the controller's I/O base.
pub const FDC_STATUS_REGISTER_B: u16 = 0x01;
pub const FDC_DIGITAL_OUTPUT_REGISTER: u16 = 0x02;
pub const FDC_TAPE_DRIVE_REGISTER: u16 = 0x03;
/// Main status register on read, data rate select register on write.
pub const FDC_STATUS_REGISTER: u16 = 0x04;
pub const FDC_DATA_REGISTER: u16 = 0x05;
/// Digital input register on read, configuration control register on write.
pub const FDC_DIGITAL_INPUT_REGISTER: u16 = 0x07;

// Main Status Register Bit Definitions
// --------------------------------------------------------------------------------
pub const FDC_STATUS_FDC_BUSY: u8 = 0b0001_0000;
pub const FDC_STATUS_NON_DMA_MODE: u8 = 0b0010_0000;
// DIO => 0=FDC Receiving 1=FDC Sending
pub const FDC_STATUS_DIO: u8 = 0b0100_0000;
// MRQ => Ready to receive or send data or commands via the data register.
pub const FDC_STATUS_MRQ: u8 = 0b1000_0000;

pub const DIR_DISK_CHANGE: u8 = 0b1000_0000;
pub const TAPE_BOOT_SELECT: u8 = 0b0000_0100;

pub const ST0_HEAD_ACTIVE: u8 = 0b0000_0100;
pub const ST0_NOT_READY: u8 = 0b0000_1000;
pub const ST0_UNIT_CHECK: u8 = 0b0001_0000;
pub const ST0_SEEK_END: u8 = 0b0010_0000;
pub const ST0_ABNORMAL_TERMINATION: u8 = 0b0100_0000;
pub const ST0_INVALID_OPCODE: u8 = 0b1000_0000;
pub const ST0_RESET: u8 = 0b1100_0000;

pub const ST1_NO_ID: u8 = 0b0000_0001;
pub const ST1_WRITE_PROTECT: u8 = 0b0000_0010;
pub const ST1_NODATA: u8 = 0b0000_0100;
pub const ST1_END_OF_CYLINDER: u8 = 0b1000_0000;

pub const ST2_SCAN_NOT_SATISFIED: u8 = 0b0000_0100;
pub const ST2_SCAN_HIT: u8 = 0b0000_1000;

pub const ST3_ESIG: u8 = 0b1000_0000;
pub const ST3_WRITE_PROTECT: u8 = 0b0100_0000;
pub const ST3_READY: u8 = 0b0010_0000;
pub const ST3_TRACK0: u8 = 0b0001_0000;
pub const ST3_DOUBLESIDED: u8 = 0b0000_1000;
pub const ST3_HEAD: u8 = 0b0000_0100;

pub const FDC_VERSION: u8 = 0x90;
pub const FDC_PART_ID: u8 = 0x41;
/// Implied seeks enabled, FIFO disabled, threshold 0.
pub const FDC_DEFAULT_CONFIG: u8 = 0x60;
pub const FDC_LOCK_RESULT: u8 = 0x10;

/// Power-on DOR: controller out of reset, DMA/IRQ gate enabled, drive 0 selected.
pub const DOR_POWER_ON: u8 = 0b0000_1100;

#[bitfield]
#[derive(Copy, Clone, Debug)]
pub struct CommandByte {
    pub command: B5,
    pub skip: bool,
    pub mfm: bool,
    pub mt: bool,
}

#[bitfield]
#[derive(Copy, Clone, Debug)]
pub struct DriveHeadSelect {
    pub drive: B2,
    pub head:  B1,
    #[skip]
    unused:    B5,
}

#[bitfield]
#[derive(Copy, Clone, Debug)]
pub struct StepRateHeadUnload {
    pub head_unload: B4,
    pub step_rate:   B4,
}

#[bitfield]
#[derive(Copy, Clone, Debug)]
pub struct HeadLoadDma {
    pub non_dma:   bool,
    pub head_load: B7,
}

#[bitfield]
#[derive(Copy, Clone, Debug)]
pub struct DigitalOutputRegister {
    pub drive_select: B2,
    /// Active low.
    pub reset_n: bool,
    pub dma_gate: bool,
    pub motor_a: bool,
    pub motor_b: bool,
    pub motor_c: bool,
    pub motor_d: bool,
}

#[bitfield]
#[derive(Copy, Clone, Debug)]
pub struct DataRateSelect {
    pub rate: B2,
    pub precomp: B3,
    #[skip]
    unused: B1,
    pub power_down: bool,
    pub sw_reset: bool,
}

#[bitfield]
#[derive(Copy, Clone, Debug)]
pub struct ConfigureByte {
    pub fifo_threshold: B4,
    pub poll_disable: bool,
    pub fifo_disable: bool,
    pub implied_seek: bool,
    #[skip]
    unused: B1,
}

#[bitfield]
#[derive(Copy, Clone, Debug)]
pub struct PerpendicularByte {
    pub wgate: bool,
    pub gap: bool,
    pub drives: B4,
    #[skip]
    unused: B1,
    pub overwrite: bool,
}
