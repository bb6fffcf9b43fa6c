// FabIRQ - Fabric Interrupt Runtime
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use super::InterruptSink;
use crate::intc::{regs, MasterEnable, LINES};
use serde::Serialize;
use std::cell::{Cell, RefCell};
use std::io;
use std::rc::Rc;

/// Raw register state of a simulated controller.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IntcRegisters {
    /// Latched request bits.
    pub isr: u32,
    pub ier: u32,
    pub mer: u32,
    /// Live input levels.
    pub lines: u32,
}

impl IntcRegisters {
    fn pending(&self) -> u32 {
        (self.lines | self.isr) & self.ier
    }

    fn is_active(&self) -> bool {
        self.pending() != 0 && self.mer == MasterEnable::all().bits()
    }
}

/// Simulated AXI interrupt controller.
///
/// The output is level-sensitive: whenever the aggregate active state flips,
/// the connected parent line follows it.
#[derive(Debug)]
pub struct SimIntc {
    name: String,
    base: u64,
    regs: Cell<IntcRegisters>,
    acks: Cell<u32>,
    parent: RefCell<Option<(Rc<dyn InterruptSink>, u32)>>,
}

impl SimIntc {
    pub fn new(name: impl Into<String>, base: u64) -> Rc<Self> {
        Rc::new(Self {
            name: name.into(),
            base,
            regs: Cell::new(IntcRegisters::default()),
            acks: Cell::new(0),
            parent: RefCell::new(None),
        })
    }

    /// Wire the controller output to `line` of `parent`.
    pub fn connect(&self, parent: Rc<dyn InterruptSink>, line: u32) {
        *self.parent.borrow_mut() = Some((parent, line));
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn registers(&self) -> IntcRegisters {
        self.regs.get()
    }

    pub fn is_active(&self) -> bool {
        self.regs.get().is_active()
    }

    /// Number of `IAR` writes seen so far.
    pub fn ack_count(&self) -> u32 {
        self.acks.get()
    }

    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name,
            "base": self.base,
            "active": self.is_active(),
            "acks": self.acks.get(),
            "registers": self.regs.get(),
        })
    }

    pub fn read(&self, offset: u64) -> io::Result<u32> {
        let r = self.regs.get();
        let value = match offset {
            regs::ISR => r.isr | r.lines,
            regs::IPR => r.pending(),
            regs::IER => r.ier,
            regs::IAR | regs::SIE | regs::CIE | regs::IVR => 0,
            regs::MER => r.mer,
            _ => return Err(self.bad_access("read", offset)),
        };
        tracing::trace!("{} read {:#04x} -> {:#010x}", self.name, offset, value);
        Ok(value)
    }

    pub fn write(&self, offset: u64, value: u32) -> io::Result<()> {
        tracing::trace!("{} write {:#04x} <- {:#010x}", self.name, offset, value);
        match offset {
            regs::IER => self.update(|r| r.ier = value),
            regs::IAR => {
                self.acks.set(self.acks.get() + 1);
                self.update(|r| r.isr &= !value)
            }
            regs::SIE => self.update(|r| r.ier |= value),
            regs::CIE => self.update(|r| r.ier &= !value),
            regs::MER => self.update(|r| r.mer = value & MasterEnable::all().bits()),
            _ => return Err(self.bad_access("write", offset)),
        }
        Ok(())
    }

    fn update(&self, change: impl FnOnce(&mut IntcRegisters)) {
        let before = self.is_active();
        let mut r = self.regs.get();
        change(&mut r);
        self.regs.set(r);
        let after = self.is_active();
        if before != after {
            let parent = self.parent.borrow().clone();
            if let Some((sink, line)) = parent {
                tracing::debug!("{} output -> {}", self.name, after);
                sink.set_line(line, after);
            }
        }
    }

    fn bad_access(&self, kind: &str, offset: u64) -> io::Error {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{}: illegal {} at offset {:#x}", self.name, kind, offset),
        )
    }
}

impl InterruptSink for SimIntc {
    fn set_line(&self, index: u32, asserted: bool) {
        if index >= LINES {
            tracing::warn!("{}: ignoring input on nonexistent line {}", self.name, index);
            return;
        }
        let bit = 1u32 << index;
        self.update(|r| {
            if asserted {
                r.isr |= bit;
                r.lines |= bit;
            } else {
                r.lines &= !bit;
            }
        });
    }
}
