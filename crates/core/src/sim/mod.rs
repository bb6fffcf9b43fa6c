// FabIRQ - Fabric Interrupt Runtime
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Register-accurate model of a board's interrupt fabric.
//!
//! [`SimIntc`] models the AXI interrupt controller registers, [`SimUio`] the
//! kernel side of a UIO line, and [`SimBoard`] wires both together from a
//! device description. The drivers run against the model unchanged through
//! [`SimPlatform`].

pub mod board;
pub mod intc;
pub mod uio;

pub use board::{SimBoard, SimBus, SimPlatform};
pub use intc::{IntcRegisters, SimIntc};
pub use uio::{SimUio, SimUioPort};

/// Anything a physical interrupt line can be wired into.
pub trait InterruptSink: std::fmt::Debug {
    fn set_line(&self, index: u32, asserted: bool);
}
