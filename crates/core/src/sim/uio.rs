// FabIRQ - Fabric Interrupt Runtime
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use super::InterruptSink;
use crate::reactor;
use crate::uio::UioDevice;
use std::cell::Cell;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::rc::Rc;

#[derive(Debug, Default, Clone, Copy)]
struct LineState {
    asserted: bool,
    enabled: bool,
    pending: bool,
    count: u32,
}

/// Kernel side of a simulated UIO line.
///
/// Follows `uio_pdrv_genirq`: an asserted line fires only while delivery is
/// enabled, firing masks the line again, and the count read clears
/// readability. Readability is mirrored on an eventfd so the event loop can
/// sleep on it like on a real device node.
#[derive(Debug)]
pub struct SimUio {
    raw_irq: u32,
    event: OwnedFd,
    state: Cell<LineState>,
    arms: Cell<u32>,
    consumed: Cell<u32>,
    fail_next: Cell<bool>,
}

impl SimUio {
    pub fn new(raw_irq: u32) -> io::Result<Rc<Self>> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        let event = unsafe { OwnedFd::from_raw_fd(fd) };
        Ok(Rc::new(Self {
            raw_irq,
            event,
            state: Cell::new(LineState::default()),
            arms: Cell::new(0),
            consumed: Cell::new(0),
            fail_next: Cell::new(false),
        }))
    }

    pub fn raw_irq(&self) -> u32 {
        self.raw_irq
    }

    pub fn is_enabled(&self) -> bool {
        self.state.get().enabled
    }

    /// Whether a firing is waiting to be read.
    pub fn is_pending(&self) -> bool {
        self.state.get().pending
    }

    /// Number of times the line fired.
    pub fn fire_count(&self) -> u32 {
        self.state.get().count
    }

    /// Number of enable writes.
    pub fn arm_count(&self) -> u32 {
        self.arms.get()
    }

    /// Number of count reads.
    pub fn consume_count(&self) -> u32 {
        self.consumed.get()
    }

    /// Make the next device operation fail with an I/O error.
    pub fn fail_next(&self) {
        self.fail_next.set(true);
    }

    fn check_failure(&self) -> io::Result<()> {
        if self.fail_next.replace(false) {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                format!("uio for raw IRQ {} failed", self.raw_irq),
            ));
        }
        Ok(())
    }

    fn fire(&self, mut state: LineState) -> io::Result<()> {
        state.enabled = false;
        state.pending = true;
        state.count = state.count.wrapping_add(1);
        self.state.set(state);
        let one = 1u64.to_ne_bytes();
        let rc = unsafe { libc::write(self.event.as_raw_fd(), one.as_ptr().cast(), one.len()) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        tracing::debug!("sim uio {}: fired (count {})", self.raw_irq, state.count);
        Ok(())
    }

    fn set_enabled(&self, enabled: bool) -> io::Result<()> {
        self.check_failure()?;
        let mut state = self.state.get();
        state.enabled = enabled;
        if enabled {
            self.arms.set(self.arms.get() + 1);
            if state.asserted && !state.pending {
                return self.fire(state);
            }
        }
        self.state.set(state);
        Ok(())
    }

    fn read_count(&self) -> io::Result<u32> {
        self.check_failure()?;
        let mut state = self.state.get();
        if !state.pending {
            return Err(io::Error::from(io::ErrorKind::WouldBlock));
        }
        let mut counter = [0u8; 8];
        let rc = unsafe {
            libc::read(
                self.event.as_raw_fd(),
                counter.as_mut_ptr().cast(),
                counter.len(),
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        state.pending = false;
        self.state.set(state);
        self.consumed.set(self.consumed.get() + 1);
        Ok(state.count)
    }
}

impl InterruptSink for SimUio {
    fn set_line(&self, _index: u32, asserted: bool) {
        let mut state = self.state.get();
        state.asserted = asserted;
        if asserted && state.enabled && !state.pending {
            if let Err(e) = self.fire(state) {
                tracing::warn!("sim uio {}: {}", self.raw_irq, e);
            }
            return;
        }
        self.state.set(state);
    }
}

/// [`UioDevice`] handle onto a shared [`SimUio`].
#[derive(Debug, Clone)]
pub struct SimUioPort(pub Rc<SimUio>);

impl UioDevice for SimUioPort {
    fn arm(&mut self) -> io::Result<()> {
        self.0.set_enabled(true)
    }

    fn disarm(&mut self) -> io::Result<()> {
        self.0.set_enabled(false)
    }

    fn consume(&mut self) -> io::Result<u32> {
        self.0.read_count()
    }

    fn poll_ready(&self) -> io::Result<bool> {
        self.0.check_failure()?;
        reactor::is_readable(self.0.event.as_raw_fd())
    }

    fn raw_fd(&self) -> Option<RawFd> {
        Some(self.0.event.as_raw_fd())
    }
}
