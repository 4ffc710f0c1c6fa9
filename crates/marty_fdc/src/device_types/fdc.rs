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

    device_types::fdc.rs

    Defines types common to implementations of a Floppy Disk Controller
*/

use crate::{device_traits::format_detector::FormatDetector, device_types::chs::DiskChs, machine_types::FloppyDriveType};
use lazy_static::lazy_static;
use std::collections::HashMap;

/// All sector images are stored with 512 byte sectors.
pub const SECTOR_SIZE: usize = 512;
/// The size code (N) for a 512 byte sector: 128 << 2.
pub const SECTOR_SIZE_CODE: u8 = 2;

pub struct DiskFormat {
    pub chs: DiskChs,
    pub image_type: FloppyImageType,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum FloppyImageType {
    Image160K,
    Image180K,
    Image320K,
    Image360K,
    Image720K,
    Image12M,
    Image144M,
}

lazy_static! {
    /// The furthest geometry each drive type can physically address.
    /// Drives can seek a bit beyond the end of the traditional media sizes.
    pub static ref DRIVE_CAPABILITIES: HashMap<FloppyDriveType, DiskChs> = {
        HashMap::from([
            (FloppyDriveType::Floppy360K, DiskChs::new(42, 2, 9)),
            (FloppyDriveType::Floppy720K, DiskChs::new(82, 2, 9)),
            (FloppyDriveType::Floppy12M, DiskChs::new(82, 2, 15)),
            (FloppyDriveType::Floppy144M, DiskChs::new(82, 2, 18)),
        ])
    };
}

lazy_static! {
    /// Standard PC raw sector image formats, keyed by image size in bytes.
    pub static ref DISK_FORMATS: HashMap<usize, DiskFormat> = {
        HashMap::from([
            (
                163_840,
                DiskFormat {
                    chs: DiskChs::new(40, 1, 8),
                    image_type: FloppyImageType::Image160K,
                },
            ),
            (
                184_320,
                DiskFormat {
                    chs: DiskChs::new(40, 1, 9),
                    image_type: FloppyImageType::Image180K,
                },
            ),
            (
                327_680,
                DiskFormat {
                    chs: DiskChs::new(40, 2, 8),
                    image_type: FloppyImageType::Image320K,
                },
            ),
            (
                368_640,
                DiskFormat {
                    chs: DiskChs::new(40, 2, 9),
                    image_type: FloppyImageType::Image360K,
                },
            ),
            (
                737_280,
                DiskFormat {
                    chs: DiskChs::new(80, 2, 9),
                    image_type: FloppyImageType::Image720K,
                },
            ),
            (
                1_228_800,
                DiskFormat {
                    chs: DiskChs::new(80, 2, 15),
                    image_type: FloppyImageType::Image12M,
                },
            ),
            (
                1_474_560,
                DiskFormat {
                    chs: DiskChs::new(80, 2, 18),
                    image_type: FloppyImageType::Image144M,
                },
            ),
        ])
    };
}

/// Resolves geometry from the standard table of PC floppy formats.
#[derive(Default)]
pub struct StandardFormatDetector;

impl FormatDetector for StandardFormatDetector {
    fn detect(&self, total_sectors: usize, drive_type: FloppyDriveType) -> Option<DiskChs> {
        let format = DISK_FORMATS.get(&(total_sectors * SECTOR_SIZE))?;

        if !drive_type.compatible_formats().contains(&format.image_type) {
            log::warn!(
                "Image of type {:?} is not compatible with a {} drive",
                format.image_type,
                drive_type
            );
            return None;
        }
        Some(format.chs)
    }
}
