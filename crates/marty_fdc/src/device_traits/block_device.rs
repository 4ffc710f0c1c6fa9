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

    device_traits::block_device.rs

    Defines the BlockDevice trait that backs each floppy drive.
*/

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BlockDeviceError {
    #[error("No media inserted")]
    NotInserted,
    #[error("Media is read only")]
    ReadOnly,
    #[error("Sector range {sector}+{count} is beyond the end of media ({total} sectors)")]
    OutOfRange { sector: usize, count: usize, total: usize },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Sector addressed backing storage for one drive.
pub trait BlockDevice {
    /// Read `count` sectors starting at linear sector `sector` into `buf`.
    /// Returns the number of bytes read.
    fn read(&mut self, sector: usize, buf: &mut [u8], count: usize) -> Result<usize, BlockDeviceError>;
    /// Write `count` sectors from `buf` starting at linear sector `sector`.
    /// Returns the number of bytes written.
    fn write(&mut self, sector: usize, buf: &[u8], count: usize) -> Result<usize, BlockDeviceError>;
    fn is_inserted(&self) -> bool;
    fn is_read_only(&self) -> bool;
    fn total_sectors(&self) -> usize;
}
