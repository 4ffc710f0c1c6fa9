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

    machine_types.rs

    Enumerations of floppy drive hardware the controller can be configured with.
*/

use std::{fmt, fmt::Display, str::FromStr};

use serde::Deserializer;
use strum_macros::EnumIter;

use crate::device_types::fdc::FloppyImageType;

#[derive(Copy, Clone, Default, Debug, Hash, Eq, PartialEq, EnumIter)]
pub enum FloppyDriveType {
    Floppy360K,
    Floppy720K,
    Floppy12M,
    #[default]
    Floppy144M,
}

impl FloppyDriveType {
    /// Return the image types this drive can read. A high density drive reads its double
    /// density counterpart.
    pub fn compatible_formats(&self) -> Vec<FloppyImageType> {
        match self {
            FloppyDriveType::Floppy360K => vec![
                FloppyImageType::Image160K,
                FloppyImageType::Image180K,
                FloppyImageType::Image320K,
                FloppyImageType::Image360K,
            ],
            FloppyDriveType::Floppy720K => vec![FloppyImageType::Image720K],
            FloppyDriveType::Floppy12M => vec![
                FloppyImageType::Image160K,
                FloppyImageType::Image180K,
                FloppyImageType::Image320K,
                FloppyImageType::Image360K,
                FloppyImageType::Image12M,
            ],
            FloppyDriveType::Floppy144M => vec![FloppyImageType::Image720K, FloppyImageType::Image144M],
        }
    }
}

impl Display for FloppyDriveType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FloppyDriveType::Floppy360K => write!(f, "360K"),
            FloppyDriveType::Floppy720K => write!(f, "720K"),
            FloppyDriveType::Floppy12M => write!(f, "1.2M"),
            FloppyDriveType::Floppy144M => write!(f, "1.44M"),
        }
    }
}

impl FromStr for FloppyDriveType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, String>
    where
        Self: Sized,
    {
        match s.to_lowercase().as_str() {
            "360k" | "floppy360k" => Ok(FloppyDriveType::Floppy360K),
            "720k" | "floppy720k" => Ok(FloppyDriveType::Floppy720K),
            "1.2m" | "floppy12m" => Ok(FloppyDriveType::Floppy12M),
            "1.44m" | "floppy144m" => Ok(FloppyDriveType::Floppy144M),
            _ => Err(format!("Bad value for floppy drive type: {}", s)),
        }
    }
}

impl<'de> serde::Deserialize<'de> for FloppyDriveType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct FloppyTypeVisitor;

        impl serde::de::Visitor<'_> for FloppyTypeVisitor {
            type Value = FloppyDriveType;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("`360k`, `720k`, `1.2m` or `1.44m`")
            }

            fn visit_str<E>(self, value: &str) -> Result<FloppyDriveType, E>
            where
                E: serde::de::Error,
            {
                value
                    .parse::<FloppyDriveType>()
                    .map_err(|_| E::invalid_value(serde::de::Unexpected::Str(value), &self))
            }
        }

        deserializer.deserialize_str(FloppyTypeVisitor)
    }
}
