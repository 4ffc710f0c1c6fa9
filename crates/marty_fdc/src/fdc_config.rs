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

    fdc_config.rs

    Controller configuration as read from a TOML table.
*/

use std::{path::PathBuf, str::FromStr};

use serde_derive::Deserialize;

use crate::{devices::fdc::FdcError, machine_types::FloppyDriveType};

pub const FDC_DEFAULT_IO_BASE: u16 = 0x3F0;
pub const FDC_DEFAULT_IRQ: u8 = 6;
pub const FDC_DEFAULT_DMA: usize = 2;
pub const FDC_MAX_DRIVES: usize = 2;

const fn _default_io_base() -> u16 {
    FDC_DEFAULT_IO_BASE
}
const fn _default_irq() -> u8 {
    FDC_DEFAULT_IRQ
}
const fn _default_dma() -> usize {
    FDC_DEFAULT_DMA
}

#[derive(Clone, Debug, Deserialize)]
pub struct FloppyDriveConfig {
    #[serde(rename = "type")]
    pub fd_type: FloppyDriveType,
    pub image: Option<PathBuf>,
    #[serde(default)]
    pub write_protect: bool,
}

#[derive(Clone, Debug, Deserialize)]
pub struct FdcConfig {
    #[serde(default = "_default_io_base")]
    pub io_base: u16,
    #[serde(default = "_default_irq")]
    pub irq: u8,
    #[serde(default = "_default_dma")]
    pub dma_channel: usize,
    #[serde(default)]
    pub drive: Vec<FloppyDriveConfig>,
}

impl Default for FdcConfig {
    fn default() -> Self {
        Self {
            io_base: FDC_DEFAULT_IO_BASE,
            irq: FDC_DEFAULT_IRQ,
            dma_channel: FDC_DEFAULT_DMA,
            drive: vec![
                FloppyDriveConfig {
                    fd_type: FloppyDriveType::Floppy144M,
                    image: None,
                    write_protect: false,
                };
                FDC_MAX_DRIVES
            ],
        }
    }
}

impl FdcConfig {
    pub fn validate(&self) -> Result<(), FdcError> {
        if self.drive.is_empty() || self.drive.len() > FDC_MAX_DRIVES {
            return Err(FdcError::Config(format!(
                "controller supports 1 to {} drives, {} configured",
                FDC_MAX_DRIVES,
                self.drive.len()
            )));
        }
        if self.dma_channel > 3 {
            return Err(FdcError::Config(format!(
                "DMA channel {} is not an 8-bit channel",
                self.dma_channel
            )));
        }
        Ok(())
    }
}

impl FromStr for FdcConfig {
    type Err = FdcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: FdcConfig = toml::from_str(s).map_err(|e| FdcError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}
