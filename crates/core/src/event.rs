// FabIRQ - Fabric Interrupt Runtime
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::intc::InterruptController;
use crate::IrqResult;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::task::Waker;

/// Handle for one registration on a controller or UIO device, used to
/// deregister a waiter that is abandoned before it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WaiterId(u64);

#[derive(Debug, Default)]
pub(crate) struct WaiterIds {
    next: Cell<u64>,
}

impl WaiterIds {
    pub(crate) fn allocate(&self) -> WaiterId {
        let id = self.next.get();
        self.next.set(id + 1);
        WaiterId(id)
    }
}

/// Single-shot wake primitive.
///
/// The first outcome delivered sticks; later deliveries are ignored.
#[derive(Debug, Default)]
pub struct WakeEvent {
    outcome: RefCell<Option<IrqResult<()>>>,
    waker: RefCell<Option<Waker>>,
}

impl WakeEvent {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn set(&self, outcome: IrqResult<()>) {
        if self.outcome.borrow().is_some() {
            return;
        }
        *self.outcome.borrow_mut() = Some(outcome);
        let waker = self.waker.borrow_mut().take();
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    pub fn is_set(&self) -> bool {
        self.outcome.borrow().is_some()
    }

    pub fn outcome(&self) -> Option<IrqResult<()>> {
        self.outcome.borrow().clone()
    }

    pub fn register_waker(&self, waker: &Waker) {
        let mut slot = self.waker.borrow_mut();
        match slot.as_ref() {
            Some(current) if current.will_wake(waker) => {}
            _ => *slot = Some(waker.clone()),
        }
    }
}

/// Something a firing line hands its outcome to.
#[derive(Debug)]
pub(crate) enum WakeTarget {
    Event(Rc<WakeEvent>),
    /// A downstream controller whose output drives the firing line.
    Controller(Weak<InterruptController>),
}

impl WakeTarget {
    pub(crate) fn deliver(&self, outcome: &IrqResult<()>) {
        match self {
            WakeTarget::Event(event) => event.set(outcome.clone()),
            WakeTarget::Controller(controller) => {
                if let Some(controller) = controller.upgrade() {
                    controller.on_upstream_fired(outcome.clone());
                }
            }
        }
    }
}

/// Registrations for one line, in registration order.
#[derive(Debug, Default)]
pub(crate) struct WaitList {
    entries: Vec<(WaiterId, WakeTarget)>,
}

impl WaitList {
    pub(crate) fn push(&mut self, id: WaiterId, target: WakeTarget) {
        self.entries.push((id, target));
    }

    pub(crate) fn remove(&mut self, id: WaiterId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry, _)| *entry != id);
        self.entries.len() != before
    }

    pub(crate) fn take(&mut self) -> Vec<(WaiterId, WakeTarget)> {
        std::mem::take(&mut self.entries)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
