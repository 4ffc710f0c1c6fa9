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

    devices::floppy_drive.rs

    Implements a floppy drive: geometry, head position and motor state over a
    sector addressed backing device.
*/

use crate::{
    device_traits::{
        block_device::{BlockDevice, BlockDeviceError},
        format_detector::FormatDetector,
    },
    device_types::{chs::DiskChs, fdc::DRIVE_CAPABILITIES},
    machine_types::FloppyDriveType,
};

/// The outcome of positioning a drive for a sector operation.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SeekResult {
    /// Already on the requested track; head and sector were updated.
    Ok,
    /// The heads were moved to a new track.
    Seeked,
    /// The requested track differs from the current one and implied seeks are disabled.
    NeedSeek,
    /// The head or track lies outside of the media geometry.
    BadHead,
    /// The sector id lies outside of the media geometry.
    BadSector,
    /// No media is present.
    NotReady,
}

pub struct FloppyDiskDrive {
    drive_type: FloppyDriveType,
    drive_n: usize,

    pub(crate) chs: DiskChs,
    drive_geom: DiskChs,
    media_geom: Option<DiskChs>,

    /// Direction of the last head movement, 1 = toward higher tracks.
    pub(crate) direction: u8,
    pub(crate) perpendicular: u8,
    pub(crate) motor_on: bool,
    pub(crate) write_protected: bool,
    pub(crate) revalidate_needed: bool,

    media: Option<Box<dyn BlockDevice>>,
}

impl Default for FloppyDiskDrive {
    fn default() -> Self {
        Self {
            drive_type: Default::default(),
            drive_n: 0,
            chs: Default::default(),
            drive_geom: DiskChs::new(80, 2, 18),
            media_geom: None,
            direction: 1,
            perpendicular: 0,
            motor_on: false,
            write_protected: false,
            revalidate_needed: false,
            media: None,
        }
    }
}

impl FloppyDiskDrive {
    pub fn new(drive_n: usize, drive_type: FloppyDriveType) -> Self {
        let drive_geom = DRIVE_CAPABILITIES
            .get(&drive_type)
            .copied()
            .unwrap_or(DiskChs::new(80, 2, 18));

        FloppyDiskDrive {
            drive_type,
            drive_n,
            drive_geom,
            ..Default::default()
        }
    }

    /// Reset the drive to default state, keeping the attached media.
    /// Called when the controller itself is reset.
    pub fn reset(&mut self) {
        let media = self.media.take();

        *self = Self {
            drive_type: self.drive_type,
            drive_n: self.drive_n,
            drive_geom: self.drive_geom,
            media_geom: self.media_geom,
            write_protected: self.write_protected,
            revalidate_needed: self.revalidate_needed,
            perpendicular: self.perpendicular,
            media,
            ..Default::default()
        };
        self.stop();
        self.recalibrate();
    }

    pub fn get_type(&self) -> FloppyDriveType {
        self.drive_type
    }

    pub fn start(&mut self) {
        if !self.motor_on {
            log::trace!("Drive {}: motor on", self.drive_n);
        }
        self.motor_on = true;
    }

    pub fn stop(&mut self) {
        if self.motor_on {
            log::trace!("Drive {}: motor off", self.drive_n);
        }
        self.motor_on = false;
    }

    pub fn recalibrate(&mut self) {
        self.chs = DiskChs::default();
        self.direction = 1;
    }

    /// Attach backing storage. Geometry is resolved on the next `revalidate`.
    pub fn attach(&mut self, media: Box<dyn BlockDevice>) {
        self.media = Some(media);
    }

    pub fn detach(&mut self) -> Option<Box<dyn BlockDevice>> {
        self.media_geom = None;
        self.media.take()
    }

    pub fn is_ready(&self) -> bool {
        self.media_geom.is_some() && self.media.as_ref().is_some_and(|m| m.is_inserted())
    }

    pub fn is_read_only(&self) -> bool {
        self.write_protected || self.media.as_ref().is_some_and(|m| m.is_read_only())
    }

    /// The geometry of the inserted media, or the drive's own limits when empty.
    pub fn geometry(&self) -> DiskChs {
        self.media_geom.unwrap_or(self.drive_geom)
    }

    pub fn head_count(&self) -> u8 {
        self.geometry().h()
    }

    pub fn sectors_per_track(&self) -> u8 {
        self.geometry().s()
    }

    /// The highest track index a seek may reach.
    pub fn max_track(&self) -> u16 {
        self.geometry().c().saturating_sub(1)
    }

    pub fn is_seek_valid(&self, head: u8, track: u16) -> bool {
        track <= self.max_track() && head < self.head_count()
    }

    /// Move the heads to `track`. The caller validates the track first.
    pub fn seek_track(&mut self, track: u16) {
        if track != self.chs.c {
            self.direction = if track > self.chs.c { 1 } else { 0 };
        }
        self.chs.c = track;
    }

    /// Position the drive on a sector for a read, write or scan.
    pub fn seek(&mut self, head: u8, track: u16, sector: u8, allow_seek: bool) -> SeekResult {
        if !self.is_ready() {
            return SeekResult::NotReady;
        }
        if !self.is_seek_valid(head, track) {
            return SeekResult::BadHead;
        }
        if sector == 0 || sector > self.sectors_per_track() {
            return SeekResult::BadSector;
        }

        if track != self.chs.c {
            if !allow_seek {
                return SeekResult::NeedSeek;
            }
            self.seek_track(track);
            self.chs.h = head;
            self.chs.s = sector;
            return SeekResult::Seeked;
        }
        self.chs.h = head;
        self.chs.s = sector;
        SeekResult::Ok
    }

    /// Advance the sector cursor after one sector has been transferred.
    /// Past `eot` or the last sector of the track, the cursor returns to sector 1 and moves to
    /// the second head in multi-track mode, otherwise to the next track.
    pub fn advance_sector(&mut self, eot: u8, multi_track: bool) {
        if self.chs.s >= self.sectors_per_track() || self.chs.s == eot {
            self.chs.s = 1;
            if multi_track && self.chs.h == 0 && self.head_count() > 1 {
                self.chs.h = 1;
            }
            else {
                if multi_track {
                    self.chs.h = 0;
                }
                if self.chs.c < self.max_track() {
                    self.chs.c += 1;
                }
            }
        }
        else {
            self.chs.s += 1;
        }
    }

    pub fn current_linear_sector(&self) -> usize {
        self.chs.to_lba(&self.geometry())
    }

    pub fn linear_sector(&self, chs: DiskChs) -> Option<usize> {
        let geom = self.geometry();
        geom.contains(chs).then(|| chs.to_lba(&geom))
    }

    pub fn read(&mut self, sector: usize, buf: &mut [u8], count: usize) -> Result<usize, BlockDeviceError> {
        let media = self.media.as_mut().ok_or(BlockDeviceError::NotInserted)?;
        media.read(sector, buf, count)
    }

    pub fn write(&mut self, sector: usize, buf: &[u8], count: usize) -> Result<usize, BlockDeviceError> {
        if self.is_read_only() {
            return Err(BlockDeviceError::ReadOnly);
        }
        let media = self.media.as_mut().ok_or(BlockDeviceError::NotInserted)?;
        media.write(sector, buf, count)
    }

    /// Re-derive the media geometry after a media change and latch the disk change flag.
    pub fn revalidate(&mut self, detector: &dyn FormatDetector) {
        self.media_geom = match &self.media {
            Some(media) if media.is_inserted() => {
                let total = media.total_sectors();
                let geom = detector.detect(total, self.drive_type);
                match geom {
                    Some(chs) => log::debug!("Drive {}: media geometry {} ({} sectors)", self.drive_n, chs, total),
                    None => log::warn!(
                        "Drive {}: no {} format matches media of {} sectors",
                        self.drive_n,
                        self.drive_type,
                        total
                    ),
                }
                geom
            }
            _ => {
                log::debug!("Drive {}: no media", self.drive_n);
                None
            }
        };

        if self.chs.c > self.max_track() {
            self.recalibrate();
        }
        self.revalidate_needed = true;
    }
}
