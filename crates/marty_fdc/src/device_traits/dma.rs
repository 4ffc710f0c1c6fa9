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

    device_traits::dma.rs

    Defines the DMA request and DMA memory traits.
*/

/// The request side of a DMA controller channel.
pub trait DmaRequest {
    /// Assert DREQ on `channel`. The DMA controller answers later by calling
    /// `FloppyController::handle_transfer`.
    fn hold_request(&mut self, channel: usize);
    /// Deassert DREQ on `channel`.
    fn release_request(&mut self, channel: usize);
    /// Return the 8237 mode register for `channel`. Bits 3:2 hold the transfer type.
    fn channel_mode(&self, channel: usize) -> u8;
}

/// The 8237 transfer type, decoded from bits 3:2 of a channel's mode register.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DmaTransferType {
    Verify,
    /// Device to memory.
    Write,
    /// Memory to device.
    Read,
    Illegal,
}

impl From<u8> for DmaTransferType {
    fn from(mode: u8) -> Self {
        match (mode >> 2) & 0x03 {
            0 => DmaTransferType::Verify,
            1 => DmaTransferType::Write,
            2 => DmaTransferType::Read,
            _ => DmaTransferType::Illegal,
        }
    }
}

/// System memory as seen by a DMA channel during one `handle_transfer` call.
/// Offsets are relative to the channel's address at the start of that call.
pub trait DmaMemory {
    fn read_memory(&mut self, offset: usize, buf: &mut [u8]);
    fn write_memory(&mut self, offset: usize, buf: &[u8]);
}
