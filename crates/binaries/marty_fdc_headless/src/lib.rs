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

    lib.rs

    Headless frontend for the floppy disk controller. Mounts raw sector
    images, resets the controller the way a BIOS would and reads sectors
    through the emulated register interface.
*/

//! MartyPC floppy controller headless front-end main library component.

#![forbid(unsafe_code)]

pub mod args;
pub mod session;

use std::path::Path;

use anyhow::{bail, Context, Error};
use colored::*;

use marty_fdc::{devices::raw_image::RawSectorImage, fdc_config::FdcConfig};
use marty_fdc_common::util::format_hex_dump;

use crate::{args::cli_args, session::Session};

fn load_config(path: Option<&Path>) -> Result<FdcConfig, Error> {
    match path {
        Some(path) => {
            let text =
                std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
            let config = text
                .parse::<FdcConfig>()
                .with_context(|| format!("Failed to parse {}", path.display()))?;
            Ok(config)
        }
        None => Ok(FdcConfig::default()),
    }
}

fn run_session() -> Result<(), Error> {
    let args = cli_args().run();
    let config = load_config(args.config_file.as_deref())?;

    let mut session = Session::new(&config)?;

    for (idx, drive) in config.drive.iter().enumerate() {
        if let Some(path) = &drive.image {
            let image = RawSectorImage::load(path, drive.write_protect)?;
            session.mount(idx, image)?;
            println!("Drive {}: {}", idx, path.display());
        }
    }
    for mount in &args.mounts {
        let image = RawSectorImage::load(&mount.path, mount.read_only)?;
        session.mount(mount.index, image)?;
        println!("Drive {}: {}", mount.index, mount.path.display());
    }

    session.power_on(args.drive)?;
    if args.pio {
        session.set_pio(true);
    }

    let id = session.read_id(args.drive, 0);
    if id.first().is_some_and(|st0| st0 & 0xC0 == 0) {
        println!("{} Read ID: {:02X?}", "OK".green(), id);
    }
    else {
        println!("{} Read ID: {:02X?}", "FAILED".yellow(), id);
    }

    if let Some(chs) = args.read {
        if args.count == 0 {
            bail!("Sector count must be at least 1");
        }
        let read = session.read_sectors(args.drive, chs, args.count)?;
        let status = format!("{:02X?}", read.status);
        if read.ok() {
            println!("{} {} bytes from {:?}, status {}", "OK".green(), read.data.len(), chs, status);
        }
        else {
            println!("{} after {} bytes from {:?}, status {}", "FAILED".red(), read.data.len(), chs, status);
        }
        print!("{}", format_hex_dump(&read.data, 0));
    }

    if args.dump_log {
        for line in session.controller().get_debug_state().cmd_log {
            println!("{}", line.bright_blue());
        }
    }
    Ok(())
}

pub fn run() {
    env_logger::init();

    if let Err(e) = run_session() {
        eprintln!("{} {:#}", "error:".red(), e);
        std::process::exit(1);
    }
}
