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

    device_types::chs.rs

    Cylinder, head, sector addressing.
*/

//! Define a [DiskChs] that represents cylinder, head, sector addressing.
//! A [DiskChs] doubles as a disk geometry, in which case `s` is the sector count per track.

use std::fmt::Display;

/// A structure representing a cylinder, head, sector address
///  - Cylinder (c)
///  - Head (h)
///  - Sector ID (s), 1-based
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
pub struct DiskChs {
    pub(crate) c: u16,
    pub(crate) h: u8,
    pub(crate) s: u8,
}

impl Default for DiskChs {
    fn default() -> Self {
        Self { c: 0, h: 0, s: 1 }
    }
}

impl From<(u16, u8, u8)> for DiskChs {
    fn from((c, h, s): (u16, u8, u8)) -> Self {
        Self { c, h, s }
    }
}

impl From<DiskChs> for (u16, u8, u8) {
    fn from(chs: DiskChs) -> Self {
        (chs.c, chs.h, chs.s)
    }
}

impl Display for DiskChs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[c:{:2} h:{} s:{:3}]", self.c, self.h, self.s)
    }
}

impl DiskChs {
    pub fn new(c: u16, h: u8, s: u8) -> Self {
        Self { c, h, s }
    }
    #[inline]
    pub fn get(&self) -> (u16, u8, u8) {
        (self.c, self.h, self.s)
    }
    #[inline]
    pub fn c(&self) -> u16 {
        self.c
    }
    #[inline]
    pub fn h(&self) -> u8 {
        self.h
    }
    #[inline]
    pub fn s(&self) -> u8 {
        self.s
    }
    pub fn set(&mut self, c: u16, h: u8, s: u8) {
        self.c = c;
        self.h = h;
        self.s = s;
    }

    /// Return the number of sectors represented by a DiskChs structure, interpreted as drive geometry.
    pub fn total_sectors(&self) -> usize {
        (self.c as usize) * (self.h as usize) * (self.s as usize)
    }

    /// Return a boolean indicating whether this `DiskChs`, interpreted as drive geometry, contains
    /// the specified `DiskChs` representing a sector.
    pub fn contains(&self, other: impl Into<DiskChs>) -> bool {
        let other = other.into();
        self.c > other.c && self.h > other.h && other.s >= 1 && self.s >= other.s
    }

    /// Convert to a linear sector number. Heads are interleaved within a cylinder.
    pub fn to_lba(&self, geom: &DiskChs) -> usize {
        let hpc = geom.h as usize;
        let spt = geom.s as usize;
        (self.c as usize * hpc + (self.h as usize)) * spt + (self.s.saturating_sub(1) as usize)
    }

    /// Convert a linear sector number back into a `DiskChs`.
    /// Returns `None` if the address lies outside of `geom`.
    pub fn from_lba(lba: usize, geom: &DiskChs) -> Option<DiskChs> {
        let hpc = geom.h as usize;
        let spt = geom.s as usize;
        if hpc == 0 || spt == 0 {
            return None;
        }
        let c = lba / (hpc * spt);
        let h = (lba / spt) % hpc;
        let s = (lba % spt) + 1;

        if c >= geom.c as usize {
            return None;
        }
        Some(DiskChs::from((c as u16, h as u8, s as u8)))
    }
}
