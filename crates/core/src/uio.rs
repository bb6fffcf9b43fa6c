// FabIRQ - Fabric Interrupt Runtime
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::event::{WaitList, WaiterId, WaiterIds, WakeEvent, WakeTarget};
use crate::reactor;
use crate::{IrqError, IrqResult};
use std::cell::{Cell, RefCell};
use std::fmt::Debug;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::{debug, info, warn};

/// The kernel side of one UIO interrupt line.
pub trait UioDevice: Debug {
    /// Re-enable interrupt delivery (4-byte write of 1).
    fn arm(&mut self) -> io::Result<()>;
    /// Mask interrupt delivery (4-byte write of 0).
    fn disarm(&mut self) -> io::Result<()>;
    /// Consume one firing, returning the kernel's running interrupt count.
    fn consume(&mut self) -> io::Result<u32>;
    /// Whether a firing is waiting to be consumed.
    fn poll_ready(&self) -> io::Result<bool>;
    /// Descriptor the event loop can block on, if any.
    fn raw_fd(&self) -> Option<RawFd> {
        None
    }
}

/// A `/dev/uioN` character device.
#[derive(Debug)]
pub struct UioFile {
    path: PathBuf,
    file: File,
}

impl UioFile {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_control(&mut self, value: u32) -> io::Result<()> {
        self.file.write_all(&value.to_le_bytes())
    }
}

impl UioDevice for UioFile {
    fn arm(&mut self) -> io::Result<()> {
        self.write_control(1)
    }

    fn disarm(&mut self) -> io::Result<()> {
        self.write_control(0)
    }

    fn consume(&mut self) -> io::Result<u32> {
        let mut count = [0u8; 4];
        self.file.read_exact(&mut count)?;
        Ok(u32::from_le_bytes(count))
    }

    fn poll_ready(&self) -> io::Result<bool> {
        reactor::is_readable(self.file.as_raw_fd())
    }

    fn raw_fd(&self) -> Option<RawFd> {
        Some(self.file.as_raw_fd())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UioState {
    /// No waiters, kernel delivery not enabled.
    Idle,
    /// Waiters registered, kernel delivery enabled.
    Armed,
    /// A firing was consumed and its waiters are being woken.
    Fired,
}

/// Multiplexes any number of waiters onto one UIO device.
///
/// Waiters registered before a firing is consumed are all woken by that
/// firing, in registration order. Registrations made while a firing is being
/// delivered wait for the next one.
#[derive(Debug)]
pub struct UioController {
    raw_irq: u32,
    path: PathBuf,
    device: RefCell<Box<dyn UioDevice>>,
    state: Cell<UioState>,
    waiters: RefCell<WaitList>,
    ids: WaiterIds,
    last_count: Cell<Option<u32>>,
    broken: RefCell<Option<IrqError>>,
    retired: Cell<bool>,
}

impl UioController {
    pub fn new(raw_irq: u32, path: impl Into<PathBuf>, device: Box<dyn UioDevice>) -> Rc<Self> {
        let path = path.into();
        info!("UIO {:?} serves raw IRQ {}", path, raw_irq);
        Rc::new(Self {
            raw_irq,
            path,
            device: RefCell::new(device),
            state: Cell::new(UioState::Idle),
            waiters: RefCell::new(WaitList::default()),
            ids: WaiterIds::default(),
            last_count: Cell::new(None),
            broken: RefCell::new(None),
            retired: Cell::new(false),
        })
    }

    pub fn raw_irq(&self) -> u32 {
        self.raw_irq
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> UioState {
        self.state.get()
    }

    /// Kernel interrupt count from the most recent consume read.
    pub fn interrupt_count(&self) -> Option<u32> {
        self.last_count.get()
    }

    pub fn waiter_count(&self) -> usize {
        self.waiters.borrow().len()
    }

    pub fn is_broken(&self) -> bool {
        self.broken.borrow().is_some()
    }

    pub fn raw_fd(&self) -> Option<RawFd> {
        self.device.borrow().raw_fd()
    }

    /// Whether a newer description generation has taken over this line.
    pub fn is_retired(&self) -> bool {
        self.retired.get()
    }

    /// Hands the kernel line over to a newer generation. From here on
    /// waiters leaving only drop their registration; the device is never
    /// disarmed on their behalf.
    pub(crate) fn retire(&self) {
        self.retired.set(true);
        debug!("UIO irq {}: retired", self.raw_irq);
    }

    pub fn add_event(&self, event: Rc<WakeEvent>) -> IrqResult<WaiterId> {
        self.add_target(WakeTarget::Event(event))
    }

    pub fn remove_event(&self, id: WaiterId) {
        self.remove_target(id)
    }

    pub(crate) fn add_target(&self, target: WakeTarget) -> IrqResult<WaiterId> {
        self.check_usable()?;
        let id = self.ids.allocate();
        self.waiters.borrow_mut().push(id, target);

        // Check and enqueue happen with no suspension in between: a firing
        // that is already latched is delivered to the new waiter right away.
        let ready = self.device.borrow().poll_ready();
        match ready {
            Ok(true) => {
                debug!("UIO irq {}: firing already latched", self.raw_irq);
                self.on_readable();
            }
            Ok(false) => {
                if self.state.get() != UioState::Armed {
                    let armed = self.device.borrow_mut().arm();
                    if let Err(e) = armed {
                        let err = self.io_error(e);
                        self.fail(err.clone());
                        return Err(err);
                    }
                    self.state.set(UioState::Armed);
                    debug!("UIO irq {}: armed", self.raw_irq);
                }
            }
            Err(e) => {
                let err = self.io_error(e);
                self.fail(err.clone());
                return Err(err);
            }
        }
        Ok(id)
    }

    pub(crate) fn remove_target(&self, id: WaiterId) {
        let (removed, now_empty) = {
            let mut waiters = self.waiters.borrow_mut();
            (waiters.remove(id), waiters.is_empty())
        };
        if !removed || !now_empty || self.state.get() != UioState::Armed {
            return;
        }
        if self.retired.get() {
            self.state.set(UioState::Idle);
            return;
        }
        let disarmed = self.device.borrow_mut().disarm();
        match disarmed {
            Ok(()) => {
                self.state.set(UioState::Idle);
                debug!("UIO irq {}: disarmed, last waiter left", self.raw_irq);
            }
            Err(e) => {
                let err = self.io_error(e);
                self.fail(err);
            }
        }
    }

    /// Readiness callback: consume exactly one firing and wake every waiter
    /// registered before it.
    pub fn on_readable(&self) {
        if self.is_broken() {
            return;
        }
        let consumed = self.device.borrow_mut().consume();
        let count = match consumed {
            Ok(count) => count,
            Err(e) => {
                let err = self.io_error(e);
                self.fail(err);
                return;
            }
        };
        self.last_count.set(Some(count));
        self.state.set(UioState::Fired);

        let targets = self.waiters.borrow_mut().take();
        debug!(
            "UIO irq {}: fired (count {}), waking {}",
            self.raw_irq,
            count,
            targets.len()
        );
        for (_, target) in &targets {
            target.deliver(&Ok(()));
        }

        // Registrations during delivery re-armed the device already.
        if self.state.get() == UioState::Fired {
            self.state.set(UioState::Idle);
        }
    }

    /// Runs the readiness callback if the device has a firing to consume.
    /// Returns whether it did.
    pub fn dispatch_if_ready(&self) -> bool {
        if self.is_broken() || self.state.get() != UioState::Armed {
            return false;
        }
        let ready = self.device.borrow().poll_ready();
        match ready {
            Ok(true) => {
                self.on_readable();
                true
            }
            Ok(false) => false,
            Err(e) => {
                let err = self.io_error(e);
                self.fail(err);
                true
            }
        }
    }

    pub(crate) fn fail(&self, err: IrqError) {
        if self.broken.borrow().is_none() {
            warn!("UIO {:?}: marking broken: {}", self.path, err);
            *self.broken.borrow_mut() = Some(err.clone());
        }
        self.state.set(UioState::Idle);
        let targets = self.waiters.borrow_mut().take();
        for (_, target) in &targets {
            target.deliver(&Err(err.clone()));
        }
    }

    fn check_usable(&self) -> IrqResult<()> {
        if self.is_broken() {
            return Err(IrqError::Broken(format!("UIO device {:?}", self.path)));
        }
        Ok(())
    }

    fn io_error(&self, e: io::Error) -> IrqError {
        IrqError::device_io(self.path.display().to_string(), e)
    }
}
