// FabIRQ - Fabric Interrupt Runtime
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::context::ResolutionContext;
use crate::event::{WaiterId, WakeEvent};
use crate::intc::InterruptController;
use crate::uio::UioController;
use crate::{IrqError, IrqResult};
use std::cell::Cell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};
use tracing::{debug, warn};

/// The object a pin's waiters register with.
#[derive(Debug, Clone)]
pub enum Target {
    /// Pin wired straight to a fabric IRQ.
    Direct { uio: Rc<UioController>, index: u32 },
    /// Pin on a local line of an interrupt controller.
    Chained {
        controller: Rc<InterruptController>,
        index: u32,
    },
}

impl Target {
    pub fn index(&self) -> u32 {
        match self {
            Target::Direct { index, .. } | Target::Chained { index, .. } => *index,
        }
    }

    /// Whether both targets share the same underlying object and line.
    pub fn same_as(&self, other: &Target) -> bool {
        match (self, other) {
            (Target::Direct { uio: a, .. }, Target::Direct { uio: b, .. }) => Rc::ptr_eq(a, b),
            (
                Target::Chained {
                    controller: a,
                    index: i,
                },
                Target::Chained {
                    controller: b,
                    index: j,
                },
            ) => Rc::ptr_eq(a, b) && i == j,
            _ => false,
        }
    }

    fn attach(&self, event: Rc<WakeEvent>) -> IrqResult<WaiterId> {
        match self {
            Target::Direct { uio, .. } => uio.add_event(event),
            Target::Chained { controller, index } => controller.add_event(*index, event),
        }
    }

    fn detach(&self, id: WaiterId) {
        match self {
            Target::Direct { uio, .. } => uio.remove_event(id),
            Target::Chained { controller, index } => controller.remove_event(*index, id),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Direct { uio, .. } => {
                write!(f, "raw IRQ {} ({})", uio.raw_irq(), uio.path().display())
            }
            Target::Chained { controller, index } => {
                write!(f, "{} line {}", controller.name(), index)
            }
        }
    }
}

/// A named interrupt pin, resolved once against a [`ResolutionContext`].
///
/// Handles are cheap and not shared; any number of them may wait on the same
/// pin. A handle is bound to the description generation it was resolved in
/// and refuses to wait once that description has been replaced.
#[derive(Debug)]
pub struct Interrupt {
    pin: String,
    target: Target,
    generation: u64,
    current: Rc<Cell<u64>>,
}

impl Interrupt {
    pub fn new(ctx: &ResolutionContext, pin: &str) -> IrqResult<Self> {
        let target = ctx.resolve_pin(pin)?;
        debug!("Interrupt '{}' resolved to {}", pin, target);
        Ok(Self {
            pin: pin.to_string(),
            target,
            generation: ctx.generation(),
            current: ctx.generation_handle(),
        })
    }

    pub fn pin(&self) -> &str {
        &self.pin
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Description generation this handle was resolved in.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_stale(&self) -> bool {
        self.current.get() != self.generation
    }

    /// Wait for the next firing of the pin.
    ///
    /// Each call registers a fresh waiter on first poll. Dropping the
    /// returned future before it completes deregisters that waiter.
    pub fn wait(&self) -> Wait<'_> {
        Wait {
            interrupt: self,
            state: WaitState::Start,
        }
    }

    fn check_current(&self) -> IrqResult<()> {
        if self.is_stale() {
            let current = self.current.get();
            warn!(
                "Interrupt '{}': stale wait (generation {}, now {})",
                self.pin, self.generation, current
            );
            return Err(IrqError::StaleConfiguration {
                resolved: self.generation,
                current,
            });
        }
        Ok(())
    }
}

#[derive(Debug)]
enum WaitState {
    Start,
    Registered { event: Rc<WakeEvent>, id: WaiterId },
    Done,
}

/// Future returned by [`Interrupt::wait`].
#[derive(Debug)]
#[must_use = "futures do nothing unless polled"]
pub struct Wait<'a> {
    interrupt: &'a Interrupt,
    state: WaitState,
}

impl Wait<'_> {
    fn finish(&mut self, outcome: IrqResult<()>) -> Poll<IrqResult<()>> {
        self.state = WaitState::Done;
        Poll::Ready(outcome)
    }
}

impl Future for Wait<'_> {
    type Output = IrqResult<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        let interrupt: &Interrupt = this.interrupt;
        let target = &interrupt.target;

        match &this.state {
            WaitState::Done => panic!("`Wait` polled after completion"),
            WaitState::Registered { event, .. } => {
                if let Some(outcome) = event.outcome() {
                    return this.finish(outcome);
                }
            }
            WaitState::Start => {}
        }

        if let Err(err) = interrupt.check_current() {
            if let WaitState::Registered { id, .. } = &this.state {
                target.detach(*id);
            }
            return this.finish(Err(err));
        }

        if let WaitState::Registered { event, .. } = &this.state {
            event.register_waker(cx.waker());
            return Poll::Pending;
        }

        let event = WakeEvent::new();
        event.register_waker(cx.waker());
        let id = match target.attach(event.clone()) {
            Ok(id) => id,
            Err(err) => return this.finish(Err(err)),
        };
        // A latched firing is delivered during registration.
        if let Some(outcome) = event.outcome() {
            return this.finish(outcome);
        }
        this.state = WaitState::Registered { event, id };
        Poll::Pending
    }
}

impl Drop for Wait<'_> {
    fn drop(&mut self) {
        if let WaitState::Registered { event, id } = &self.state {
            if !event.is_set() {
                debug!("Interrupt '{}': wait cancelled", self.interrupt.pin);
                self.interrupt.target.detach(*id);
            }
        }
    }
}
