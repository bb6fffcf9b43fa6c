// FabIRQ - Fabric Interrupt Runtime
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::event::{WaitList, WaiterId, WaiterIds, WakeEvent, WakeTarget};
use crate::mmio::RegisterWindow;
use crate::uio::UioController;
use crate::{IrqError, IrqResult};
use bitflags::bitflags;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use tracing::{debug, warn};

/// AXI interrupt controller register offsets.
pub mod regs {
    /// Interrupt status: latched and live request bits.
    pub const ISR: u64 = 0x00;
    /// Interrupt pending: `ISR & IER`.
    pub const IPR: u64 = 0x04;
    /// Interrupt enable mirror.
    pub const IER: u64 = 0x08;
    /// Acknowledge, write 1 to clear a latched bit.
    pub const IAR: u64 = 0x0C;
    /// Set interrupt enables.
    pub const SIE: u64 = 0x10;
    /// Clear interrupt enables.
    pub const CIE: u64 = 0x14;
    /// Interrupt vector.
    pub const IVR: u64 = 0x18;
    /// Master enable.
    pub const MER: u64 = 0x1C;
}

/// Local lines per controller.
pub const LINES: u32 = 32;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MasterEnable: u32 {
        /// Enable the core.
        const ME = 1 << 0;
        /// Forward requests to the hardware output.
        const HIE = 1 << 1;
    }
}

/// Where a controller's output goes.
#[derive(Debug, Clone)]
pub enum Upstream {
    Uio(Rc<UioController>),
    Controller {
        controller: Rc<InterruptController>,
        line: u32,
    },
}

impl Upstream {
    fn add_target(&self, target: WakeTarget) -> IrqResult<WaiterId> {
        match self {
            Upstream::Uio(uio) => uio.add_target(target),
            Upstream::Controller { controller, line } => controller.add_target(*line, target),
        }
    }

    fn remove_target(&self, id: WaiterId) {
        match self {
            Upstream::Uio(uio) => uio.remove_target(id),
            Upstream::Controller { controller, line } => controller.remove_target(*line, id),
        }
    }
}

/// Driver for one AXI interrupt controller instance.
///
/// Waiters register against a local line. While any waiter is registered the
/// controller keeps itself registered with its upstream (another controller
/// or a UIO device); when the upstream fires, every pending line is disabled,
/// its waiters are woken, and the serviced bits are acknowledged.
#[derive(Debug)]
pub struct InterruptController {
    name: String,
    regs: RegisterWindow,
    upstream: Upstream,
    me: Weak<InterruptController>,
    lines: RefCell<Vec<WaitList>>,
    waiting: Cell<usize>,
    upstream_id: Cell<Option<WaiterId>>,
    upstream_fires: Cell<u64>,
    ids: WaiterIds,
    broken: RefCell<Option<IrqError>>,
    retired: Cell<bool>,
}

impl InterruptController {
    /// Takes ownership of the hardware: every line starts disabled.
    pub fn new(
        name: impl Into<String>,
        regs: RegisterWindow,
        upstream: Upstream,
    ) -> IrqResult<Rc<Self>> {
        let controller = Rc::new_cyclic(|me| Self {
            name: name.into(),
            regs,
            upstream,
            me: me.clone(),
            lines: RefCell::new((0..LINES).map(|_| WaitList::default()).collect()),
            waiting: Cell::new(0),
            upstream_id: Cell::new(None),
            upstream_fires: Cell::new(0),
            ids: WaiterIds::default(),
            broken: RefCell::new(None),
            retired: Cell::new(false),
        });
        controller.write(regs::CIE, u32::MAX)?;
        Ok(controller)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base_address(&self) -> u64 {
        self.regs.base()
    }

    pub fn upstream(&self) -> &Upstream {
        &self.upstream
    }

    /// Number of waiters registered across all lines.
    pub fn waiter_count(&self) -> usize {
        self.waiting.get()
    }

    /// Whether this controller, or anything between it and the CPU, hit an
    /// I/O failure.
    pub fn is_broken(&self) -> bool {
        if self.broken.borrow().is_some() {
            return true;
        }
        match &self.upstream {
            Upstream::Uio(uio) => uio.is_broken(),
            Upstream::Controller { controller, .. } => controller.is_broken(),
        }
    }

    /// Whether a newer description generation owns these registers.
    pub fn is_retired(&self) -> bool {
        self.retired.get()
    }

    /// Hands the registers over to a newer generation. Waiters leaving a
    /// retired controller never disable lines on the hardware.
    pub(crate) fn retire(&self) {
        self.retired.set(true);
        debug!("{}: retired", self.name);
    }

    pub fn enable_line(&self, index: u32) -> IrqResult<()> {
        self.write(regs::SIE, self.line_mask(index)?)
    }

    pub fn disable_line(&self, index: u32) -> IrqResult<()> {
        self.write(regs::CIE, self.line_mask(index)?)
    }

    /// Clears the latched request for `index`. A line still physically
    /// asserted latches again immediately.
    pub fn acknowledge_line(&self, index: u32) -> IrqResult<()> {
        self.write(regs::IAR, self.line_mask(index)?)
    }

    /// Whether `index` is requesting and enabled.
    pub fn is_pending(&self, index: u32) -> IrqResult<bool> {
        let mask = self.line_mask(index)?;
        Ok(self.read(regs::IPR)? & mask != 0)
    }

    /// Whether the controller is currently driving its output.
    pub fn is_active(&self) -> IrqResult<bool> {
        let pending = self.read(regs::IPR)?;
        let master = MasterEnable::from_bits_truncate(self.read(regs::MER)?);
        Ok(pending != 0 && master.is_all())
    }

    pub fn add_event(&self, index: u32, event: Rc<WakeEvent>) -> IrqResult<WaiterId> {
        self.add_target(index, WakeTarget::Event(event))
    }

    pub fn remove_event(&self, index: u32, id: WaiterId) {
        self.remove_target(index, id)
    }

    pub(crate) fn add_target(&self, index: u32, target: WakeTarget) -> IrqResult<WaiterId> {
        self.check_usable()?;
        let mask = self.line_mask(index)?;

        let first_on_line = self.lines.borrow()[index as usize].is_empty();
        if first_on_line {
            self.write_or_fail(regs::SIE, mask)?;
        }

        let id = self.ids.allocate();
        self.lines.borrow_mut()[index as usize].push(id, target);
        self.waiting.set(self.waiting.get() + 1);

        self.write_or_fail(regs::MER, MasterEnable::all().bits())?;
        if let Err(err) = self.attach_upstream() {
            self.fail(err.clone());
            return Err(err);
        }
        debug!("{}: waiter {:?} on line {}", self.name, id, index);
        Ok(id)
    }

    pub(crate) fn remove_target(&self, index: u32, id: WaiterId) {
        let (removed, now_empty) = {
            let mut lines = self.lines.borrow_mut();
            match lines.get_mut(index as usize) {
                Some(list) => (list.remove(id), list.is_empty()),
                None => return,
            }
        };
        if !removed {
            return;
        }
        self.waiting.set(self.waiting.get() - 1);
        debug!("{}: waiter {:?} left line {}", self.name, id, index);

        if now_empty
            && !self.retired.get()
            && self.write_or_fail(regs::CIE, 1 << index).is_err()
        {
            return;
        }
        if self.waiting.get() == 0 {
            if let Some(upstream_id) = self.upstream_id.take() {
                self.upstream.remove_target(upstream_id);
            }
        }
    }

    /// Called when the upstream line this controller drives has fired.
    pub(crate) fn on_upstream_fired(&self, outcome: IrqResult<()>) {
        self.upstream_fires.set(self.upstream_fires.get() + 1);
        // The upstream drops its registration list when it fires.
        self.upstream_id.set(None);

        let result = outcome
            .and_then(|()| self.service())
            .and_then(|()| self.attach_upstream());
        if let Err(err) = result {
            self.fail(err);
        }
    }

    fn service(&self) -> IrqResult<()> {
        let pending = self.read(regs::IPR)?;
        debug!("{}: service IPR={:#010x}", self.name, pending);

        let mut woken = Vec::new();
        for line in 0..LINES {
            if pending & (1 << line) == 0 {
                continue;
            }
            // Stays off until a waiter registers on the line again.
            self.write(regs::CIE, 1 << line)?;
            let targets = self.lines.borrow_mut()[line as usize].take();
            self.waiting.set(self.waiting.get() - targets.len());
            woken.extend(targets);
        }

        for (_, target) in &woken {
            target.deliver(&Ok(()));
        }
        // Downstream controllers re-registered during delivery, so an edge
        // arriving after this acknowledge is not lost.
        self.write(regs::IAR, pending)
    }

    fn attach_upstream(&self) -> IrqResult<()> {
        if self.upstream_id.get().is_some() || self.waiting.get() == 0 {
            return Ok(());
        }
        let fires_before = self.upstream_fires.get();
        let id = self
            .upstream
            .add_target(WakeTarget::Controller(self.me.clone()))?;
        // A latched upstream firing is delivered during registration; the
        // id is spent by then and servicing already re-attached if needed.
        if self.upstream_fires.get() == fires_before {
            self.upstream_id.set(Some(id));
        }
        Ok(())
    }

    pub(crate) fn fail(&self, err: IrqError) {
        if self.broken.borrow().is_none() {
            warn!("{}: marking broken: {}", self.name, err);
            *self.broken.borrow_mut() = Some(err.clone());
        }
        let targets: Vec<_> = self
            .lines
            .borrow_mut()
            .iter_mut()
            .flat_map(|list| list.take())
            .collect();
        self.waiting.set(0);
        if let Some(upstream_id) = self.upstream_id.take() {
            self.upstream.remove_target(upstream_id);
        }
        for (_, target) in &targets {
            target.deliver(&Err(err.clone()));
        }
    }

    fn check_usable(&self) -> IrqResult<()> {
        if self.broken.borrow().is_some() {
            return Err(IrqError::Broken(format!(
                "interrupt controller '{}'",
                self.name
            )));
        }
        Ok(())
    }

    fn line_mask(&self, index: u32) -> IrqResult<u32> {
        if index >= LINES {
            return Err(IrqError::InvalidLine {
                device: self.name.clone(),
                line: index,
            });
        }
        Ok(1 << index)
    }

    fn read(&self, offset: u64) -> IrqResult<u32> {
        self.regs
            .read_u32(offset)
            .map_err(|e| IrqError::device_io(self.name.as_str(), e))
    }

    fn write(&self, offset: u64, value: u32) -> IrqResult<()> {
        self.regs
            .write_u32(offset, value)
            .map_err(|e| IrqError::device_io(self.name.as_str(), e))
    }

    fn write_or_fail(&self, offset: u64, value: u32) -> IrqResult<()> {
        self.write(offset, value).inspect_err(|err| self.fail(err.clone()))
    }
}
