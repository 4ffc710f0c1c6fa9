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

    bus.rs

    Defines the IoDevice trait used to attach the controller to a host I/O bus.
*/

pub const NO_IO_BYTE: u8 = 0xFF;

/// A device reachable through the host's I/O port space.
pub trait IoDevice {
    /// Read a byte from the specified port. The default implementation returns NO_IO_BYTE (0xFF).
    fn read_u8(&mut self, _port: u16) -> u8 {
        NO_IO_BYTE
    }

    /// Write a byte to the specified port. The default implementation does nothing.
    fn write_u8(&mut self, _port: u16, _data: u8) {}

    /// Return a list of ports the device should service, comprised of a vector of tuples of
    /// (port description, port number).
    fn port_list(&self) -> Vec<(String, u16)>;
}
