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

    devices::raw_image.rs

    A raw sector image implementing BlockDevice.
*/

use std::path::Path;

use anyhow::{Context, Error};

use crate::{
    device_traits::block_device::{BlockDevice, BlockDeviceError},
    device_types::fdc::SECTOR_SIZE,
    devices::fdc::FdcError,
};

/// An in-memory raw sector image (a flat dump of 512 byte sectors in linear order).
#[derive(Clone, Debug, Default)]
pub struct RawSectorImage {
    data: Vec<u8>,
    read_only: bool,
    inserted: bool,
}

impl RawSectorImage {
    /// Create a zero filled image of `sectors` sectors.
    pub fn blank(sectors: usize) -> Self {
        Self {
            data: vec![0; sectors * SECTOR_SIZE],
            read_only: false,
            inserted: true,
        }
    }

    pub fn from_vec(data: Vec<u8>, read_only: bool) -> Result<Self, FdcError> {
        if data.is_empty() || data.len() % SECTOR_SIZE != 0 {
            return Err(FdcError::UnsupportedImage { size: data.len() });
        }
        Ok(Self {
            data,
            read_only,
            inserted: true,
        })
    }

    pub fn load(path: &Path, read_only: bool) -> Result<Self, Error> {
        let data = std::fs::read(path).with_context(|| format!("Failed to read image {}", path.display()))?;
        let image = Self::from_vec(data, read_only).with_context(|| format!("Bad image {}", path.display()))?;
        log::debug!(
            "Loaded raw sector image {} ({} sectors)",
            path.display(),
            image.total_sectors()
        );
        Ok(image)
    }

    pub fn save(&self, path: &Path) -> Result<(), Error> {
        std::fs::write(path, &self.data).with_context(|| format!("Failed to write image {}", path.display()))
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }

    pub fn set_inserted(&mut self, inserted: bool) {
        self.inserted = inserted;
    }

    fn range(&self, sector: usize, count: usize, buf_len: usize) -> Result<std::ops::Range<usize>, BlockDeviceError> {
        let total = self.total_sectors();
        if sector + count > total || buf_len < count * SECTOR_SIZE {
            return Err(BlockDeviceError::OutOfRange { sector, count, total });
        }
        let start = sector * SECTOR_SIZE;
        Ok(start..start + count * SECTOR_SIZE)
    }
}

impl BlockDevice for RawSectorImage {
    fn read(&mut self, sector: usize, buf: &mut [u8], count: usize) -> Result<usize, BlockDeviceError> {
        if !self.inserted {
            return Err(BlockDeviceError::NotInserted);
        }
        let range = self.range(sector, count, buf.len())?;
        let len = range.len();
        buf[..len].copy_from_slice(&self.data[range]);
        Ok(len)
    }

    fn write(&mut self, sector: usize, buf: &[u8], count: usize) -> Result<usize, BlockDeviceError> {
        if !self.inserted {
            return Err(BlockDeviceError::NotInserted);
        }
        if self.read_only {
            return Err(BlockDeviceError::ReadOnly);
        }
        let range = self.range(sector, count, buf.len())?;
        let len = range.len();
        self.data[range].copy_from_slice(&buf[..len]);
        Ok(len)
    }

    fn is_inserted(&self) -> bool {
        self.inserted
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn total_sectors(&self) -> usize {
        self.data.len() / SECTOR_SIZE
    }
}
