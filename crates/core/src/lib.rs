// FabIRQ - Fabric Interrupt Runtime
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Interrupt dispatch for programmable-logic designs running under Linux.
//!
//! A named interrupt pin from the hardware description is resolved through
//! any chain of AXI interrupt controllers down to the UIO device the kernel
//! bound to the fabric IRQ. Any number of [`Interrupt`] handles can wait on
//! the same pin; the controllers and UIO devices underneath are shared per
//! [`ResolutionContext`], so kernel enable state and pending bits are managed
//! exactly once.
//!
//! Everything runs on one thread. [`EventLoop`] drives the `wait()` futures
//! and the UIO readiness callbacks.

pub mod context;
pub mod event;
pub mod interrupt;
pub mod intc;
pub mod mmio;
pub mod platform;
pub mod proc_interrupts;
pub mod reactor;
pub mod sim;
pub mod uio;


use std::io;
use std::sync::Arc;

pub use context::ResolutionContext;
pub use event::{WaiterId, WakeEvent};
pub use interrupt::{Interrupt, Target, Wait};
pub use intc::InterruptController;
pub use mmio::{RegisterDevice, RegisterWindow};
pub use platform::{LinuxPlatform, Platform};
pub use proc_interrupts::ProcInterrupts;
pub use reactor::EventLoop;
pub use uio::{UioController, UioDevice, UioState};

#[derive(Debug, Clone, thiserror::Error)]
pub enum IrqError {
    #[error("No interrupt pin named '{0}' in the active description")]
    UnknownPin(String),
    #[error("No interrupt controller named '{0}' in the active description")]
    UnknownController(String),
    #[error("Interrupt controller '{0}' has no ip_dict entry")]
    MissingIpEntry(String),
    #[error("'{0}' is wired to the CPU but carries no raw IRQ")]
    MissingRawIrq(String),
    #[error("No UIO device is bound to raw IRQ {0}")]
    NoUioDevice(u32),
    #[error("Interrupt controller chain loops: {}", .0.join(" -> "))]
    ControllerCycle(Vec<String>),
    #[error("Line {line} is out of range for interrupt controller '{device}'")]
    InvalidLine { device: String, line: u32 },
    #[error("Stale interrupt: configuration changed (resolved in generation {resolved}, now {current})")]
    StaleConfiguration { resolved: u64, current: u64 },
    #[error("I/O error on {device}: {source}")]
    DeviceIo {
        device: String,
        #[source]
        source: Arc<io::Error>,
    },
    #[error("{0} is unusable after an earlier I/O failure")]
    Broken(String),
    #[error("Event loop stalled: no armed interrupt source can complete the pending wait")]
    Stalled,
}

impl IrqError {
    pub fn device_io(device: impl Into<String>, source: io::Error) -> Self {
        IrqError::DeviceIo {
            device: device.into(),
            source: Arc::new(source),
        }
    }

    /// True for failures to turn a pin name into a terminal raw IRQ.
    pub fn is_resolution(&self) -> bool {
        matches!(
            self,
            IrqError::UnknownPin(_)
                | IrqError::UnknownController(_)
                | IrqError::MissingIpEntry(_)
                | IrqError::MissingRawIrq(_)
                | IrqError::NoUioDevice(_)
                | IrqError::ControllerCycle(_)
                | IrqError::InvalidLine { .. }
        )
    }
}

pub type IrqResult<T> = Result<T, IrqError>;
