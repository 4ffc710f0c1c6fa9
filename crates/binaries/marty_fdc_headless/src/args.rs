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

    args.rs

    Command line arguments for the headless floppy controller frontend.
*/

use std::{path::PathBuf, str::FromStr};

use bpaf::{Bpaf, Parser};

#[derive(Debug, PartialEq)]
pub struct MountSpec {
    pub index: usize,
    pub path: PathBuf,
    pub read_only: bool,
}

impl FromStr for MountSpec {
    type Err = String;

    /// Parse `fd:<drive>:<path>`, with an optional `?ro` suffix.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (main, read_only) = match s.split_once('?') {
            Some((left, "ro")) => (left, true),
            Some((_, other)) => return Err(format!("Unknown mount option: {other}")),
            None => (s, false),
        };

        let mut parts = main.splitn(3, ':');
        let device_str = parts.next().ok_or("Missing device type")?;
        let index_str = parts.next().ok_or("Missing drive number")?;
        let path_str = parts.next().ok_or("Missing file path")?;

        if device_str != "fd" {
            return Err(format!("Unknown device type: {device_str}"));
        }
        let index: usize = index_str
            .parse()
            .map_err(|_| format!("Invalid drive number: {index_str}"))?;

        Ok(MountSpec {
            index,
            path: PathBuf::from(path_str),
            read_only,
        })
    }
}

/// A sector address given as `c:h:s`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ChsArg {
    pub c: u8,
    pub h: u8,
    pub s: u8,
}

impl FromStr for ChsArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split(':').collect();
        if fields.len() != 3 {
            return Err(format!("Expected c:h:s, got {s}"));
        }
        let parse = |f: &str| f.parse::<u8>().map_err(|_| format!("Invalid number in {s}: {f}"));
        let chs = ChsArg {
            c: parse(fields[0])?,
            h: parse(fields[1])?,
            s: parse(fields[2])?,
        };
        if chs.h > 1 || chs.s == 0 {
            return Err(format!("Head must be 0 or 1 and sector starts at 1: {s}"));
        }
        Ok(chs)
    }
}

fn mount_arg() -> impl Parser<Vec<MountSpec>> {
    bpaf::short('m')
        .long("mount")
        .help("Mount a raw sector image with syntax: fd:0:disk.img[?ro]")
        .argument::<String>("mountspec")
        .parse(|s| s.parse::<MountSpec>())
        .many()
}

fn read_arg() -> impl Parser<Option<ChsArg>> {
    bpaf::long("read")
        .help("Read sectors starting at c:h:s")
        .argument::<String>("chs")
        .parse(|s| s.parse::<ChsArg>())
        .optional()
}

#[derive(Bpaf, Debug)]
#[bpaf(options, version, generate(cli_args))]
pub struct CmdLineArgs {
    /// Controller configuration toml
    #[bpaf(long("config"), long("config_file"), long("configfile"))]
    pub config_file: Option<PathBuf>,

    /// Logical drive to read from
    #[bpaf(long, argument("DRIVE"), fallback(0))]
    pub drive: u8,

    /// Number of sectors to read
    #[bpaf(long, argument("COUNT"), fallback(1))]
    pub count: usize,

    /// Transfer through the data register instead of DMA
    #[bpaf(long, switch)]
    pub pio: bool,

    /// Print the controller command log when done
    #[bpaf(long, switch)]
    pub dump_log: bool,

    #[bpaf(external(read_arg))]
    pub read: Option<ChsArg>,

    #[bpaf(external(mount_arg))]
    pub mounts: Vec<MountSpec>,
}
