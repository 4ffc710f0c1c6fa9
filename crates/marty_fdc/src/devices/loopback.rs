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

    devices::loopback.rs

    Loopback implementations of the interrupt, DMA and timer collaborators,
    for standalone use of the controller.
*/

use std::{cell::RefCell, rc::Rc};

use crate::{
    device_traits::{
        dma::{DmaMemory, DmaRequest, DmaTransferType},
        interrupt::InterruptLine,
        timer::OneShotTimer,
    },
    devices::fdc::FloppyController,
};

#[derive(Debug, Default)]
pub struct IrqState {
    pub irq: u8,
    pub level: bool,
    /// Count of low to high transitions.
    pub raised: usize,
}

/// An interrupt line that records its level. Clones share state, so a host can keep one handle
/// and give the other to the controller.
#[derive(Clone, Default)]
pub struct LoopbackIrq {
    state: Rc<RefCell<IrqState>>,
}

impl LoopbackIrq {
    pub fn level(&self) -> bool {
        self.state.borrow().level
    }

    pub fn raised(&self) -> usize {
        self.state.borrow().raised
    }

    pub fn clear_count(&self) {
        self.state.borrow_mut().raised = 0;
    }
}

impl InterruptLine for LoopbackIrq {
    fn set_level(&mut self, irq: u8, level: bool) {
        let mut state = self.state.borrow_mut();
        if level && !state.level {
            state.raised += 1;
        }
        state.irq = irq;
        state.level = level;
    }
}

#[derive(Debug, Default)]
pub struct DmaState {
    pub mode: [u8; 4],
    pub held: [bool; 4],
    pub memory: Vec<u8>,
    pub address: usize,
    pub count: usize,
}

/// A minimal 8237 stand-in backed by a flat memory buffer. Only one channel's buffer is
/// modelled at a time.
#[derive(Clone, Default)]
pub struct LoopbackDma {
    state: Rc<RefCell<DmaState>>,
}

struct MemoryWindow<'a> {
    memory: &'a mut [u8],
}

impl DmaMemory for MemoryWindow<'_> {
    fn read_memory(&mut self, offset: usize, buf: &mut [u8]) {
        for (i, b) in buf.iter_mut().enumerate() {
            *b = self.memory.get(offset + i).copied().unwrap_or(0xFF);
        }
    }

    fn write_memory(&mut self, offset: usize, buf: &[u8]) {
        for (i, b) in buf.iter().enumerate() {
            if let Some(m) = self.memory.get_mut(offset + i) {
                *m = *b;
            }
        }
    }
}

impl LoopbackDma {
    /// Program `channel` for a transfer of `memory.len()` bytes starting at offset 0.
    pub fn program(&self, channel: usize, transfer: DmaTransferType, memory: Vec<u8>) {
        let mut state = self.state.borrow_mut();
        let bits = match transfer {
            DmaTransferType::Verify => 0,
            DmaTransferType::Write => 1,
            DmaTransferType::Read => 2,
            DmaTransferType::Illegal => 3,
        };
        state.mode[channel & 0x03] = bits << 2;
        state.address = 0;
        state.count = memory.len();
        state.memory = memory;
    }

    pub fn is_held(&self, channel: usize) -> bool {
        self.state.borrow().held[channel & 0x03]
    }

    pub fn memory(&self) -> Vec<u8> {
        self.state.borrow().memory.clone()
    }

    pub fn remaining(&self) -> usize {
        self.state.borrow().count
    }

    /// Service the controller's DMA request in chunks of at most `chunk` bytes until it drops
    /// the request or the count runs out. Signals terminal count if the controller is still
    /// requesting when the count is exhausted. Returns the bytes moved.
    pub fn pump(&self, fdc: &mut FloppyController, channel: usize, chunk: usize) -> usize {
        let channel = channel & 0x03;
        let mut total = 0;

        loop {
            let (held, count, address) = {
                let state = self.state.borrow();
                (state.held[channel], state.count, state.address)
            };
            if !held {
                break;
            }
            if count == 0 {
                fdc.dma_terminal_count();
                break;
            }

            let request = chunk.max(1).min(count);
            // The controller calls back into release_request, so the buffer must not stay
            // borrowed across handle_transfer.
            let mut memory = std::mem::take(&mut self.state.borrow_mut().memory);
            let moved = {
                let start = address.min(memory.len());
                let mut window = MemoryWindow {
                    memory: &mut memory[start..],
                };
                fdc.handle_transfer(&mut window, request)
            };

            let mut state = self.state.borrow_mut();
            state.memory = memory;
            state.address += moved;
            let consumed = moved.min(state.count);
            state.count -= consumed;
            total += moved;
            if moved == 0 {
                break;
            }
        }
        total
    }
}

impl DmaRequest for LoopbackDma {
    fn hold_request(&mut self, channel: usize) {
        self.state.borrow_mut().held[channel & 0x03] = true;
    }

    fn release_request(&mut self, channel: usize) {
        self.state.borrow_mut().held[channel & 0x03] = false;
    }

    fn channel_mode(&self, channel: usize) -> u8 {
        self.state.borrow().mode[channel & 0x03]
    }
}

/// A timer that records the last scheduled delay. The host fires it by calling
/// `FloppyController::timer_expired`.
#[derive(Clone, Default)]
pub struct LoopbackTimer {
    scheduled: Rc<RefCell<Option<f64>>>,
}

impl LoopbackTimer {
    pub fn pending(&self) -> Option<f64> {
        *self.scheduled.borrow()
    }

    /// Take the pending timeout, if any, and deliver it to the controller.
    pub fn fire(&self, fdc: &mut FloppyController) -> bool {
        let pending = self.scheduled.borrow_mut().take();
        if pending.is_some() {
            fdc.timer_expired();
            true
        }
        else {
            false
        }
    }
}

impl OneShotTimer for LoopbackTimer {
    fn schedule_one_shot(&mut self, delay_us: f64) {
        *self.scheduled.borrow_mut() = Some(delay_us);
    }

    fn cancel(&mut self) {
        *self.scheduled.borrow_mut() = None;
    }
}
