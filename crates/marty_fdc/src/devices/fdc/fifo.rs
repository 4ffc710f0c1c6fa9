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

    devices::fdc::fifo.rs

    Implements the controller's FIFO.
*/

//! The Fifo stages command parameters on the way in, result bytes on the way out, and one
//! sector of data while a transfer is in progress.

use crate::device_types::fdc::SECTOR_SIZE;

pub const FIFO_SIZE: usize = SECTOR_SIZE;

pub struct Fifo {
    data: Box<[u8; FIFO_SIZE]>,
    offset: usize,
    length: usize,
}

impl Default for Fifo {
    fn default() -> Self {
        Self {
            data: Box::new([0; FIFO_SIZE]),
            offset: 0,
            length: 0,
        }
    }
}

impl Fifo {
    pub fn clear(&mut self) {
        self.offset = 0;
        self.length = 0;
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Begin accumulating a command of `length` bytes, opcode included.
    pub fn expect(&mut self, length: usize) {
        self.offset = 0;
        self.length = length.min(FIFO_SIZE);
    }

    /// Append a command byte. Returns false if the expected length was already reached.
    pub fn push(&mut self, byte: u8) -> bool {
        if self.offset >= self.length {
            return false;
        }
        self.data[self.offset] = byte;
        self.offset += 1;
        true
    }

    pub fn is_complete(&self) -> bool {
        self.length > 0 && self.offset == self.length
    }

    pub fn param(&self, idx: usize) -> u8 {
        self.data[idx]
    }

    pub fn params(&self) -> &[u8] {
        &self.data[..self.length]
    }

    /// Load result bytes for the host to read back.
    pub fn set_result(&mut self, bytes: &[u8]) {
        let length = bytes.len().min(FIFO_SIZE);
        self.data[..length].copy_from_slice(&bytes[..length]);
        self.offset = 0;
        self.length = length;
    }

    pub fn pop(&mut self) -> Option<u8> {
        if self.offset < self.length {
            let byte = self.data[self.offset];
            self.offset += 1;
            Some(byte)
        }
        else {
            None
        }
    }

    pub fn remaining(&self) -> usize {
        self.length - self.offset
    }

    /// The whole buffer, used as sector staging during a transfer.
    pub fn sector(&self) -> &[u8; FIFO_SIZE] {
        &self.data
    }

    pub fn sector_mut(&mut self) -> &mut [u8; FIFO_SIZE] {
        &mut self.data
    }
}
