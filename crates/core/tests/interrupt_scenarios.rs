// FabIRQ - Fabric Interrupt Runtime
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use fabirq_config::DeviceDescription;
use fabirq_core::sim::SimBoard;
use fabirq_core::{
    EventLoop, Interrupt, IrqError, IrqResult, ResolutionContext, Target, UioState, WakeEvent,
};
use std::future::Future;
use std::pin::{pin, Pin};
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};

const DIRECT_SETUP: &str = r#"
interrupt_pins:
  direct_interrupt: { controller: "", index: 0, raw_irq: 61 }
"#;

const STANDARD_SETUP: &str = r#"
interrupt_pins:
  standard_interrupt: { controller: pynq_intc, index: 0 }
interrupt_controllers:
  pynq_intc: { parent: "", index: 0, raw_irq: 61 }
ip_dict:
  pynq_intc: { phys_addr: 0x10000, address_range: 0x100 }
"#;

const DOUBLE_SETUP: &str = r#"
interrupt_pins:
  interrupt1: { controller: pynq_intc, index: 0 }
  interrupt2: { controller: pynq_intc, index: 1 }
interrupt_controllers:
  pynq_intc: { parent: "", index: 0, raw_irq: 61 }
ip_dict:
  pynq_intc: { phys_addr: 0x10000, address_range: 0x100 }
"#;

const NESTED_SETUP: &str = r#"
interrupt_pins:
  interrupt1: { controller: pynq_intc, index: 0 }
  interrupt2: { controller: pynq_intc, index: 1 }
interrupt_controllers:
  pynq_intc: { parent: parent_intc, index: 0 }
  parent_intc: { parent: "", index: 0, raw_irq: 61 }
ip_dict:
  pynq_intc: { phys_addr: 0x10000, address_range: 0x100 }
  parent_intc: { phys_addr: 0x20000, address_range: 0x100 }
"#;

#[derive(Default)]
struct WakeCounter(AtomicUsize);

impl Wake for WakeCounter {
    fn wake(self: Arc<Self>) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

struct Poller {
    counter: Arc<WakeCounter>,
    waker: Waker,
}

impl Poller {
    fn new() -> Self {
        let counter = Arc::new(WakeCounter::default());
        let waker = Waker::from(counter.clone());
        Self { counter, waker }
    }

    fn poll<F: Future>(&self, future: Pin<&mut F>) -> Poll<F::Output> {
        future.poll(&mut Context::from_waker(&self.waker))
    }

    fn wakes(&self) -> usize {
        self.counter.0.load(Ordering::SeqCst)
    }
}

fn setup(yaml: &str) -> (Rc<SimBoard>, ResolutionContext) {
    let desc = DeviceDescription::from_yaml_str(yaml).unwrap();
    let board = SimBoard::from_description(&desc).unwrap();
    let ctx = ResolutionContext::new(board.platform(), desc);
    (board, ctx)
}

fn assert_ready_ok(poll: Poll<IrqResult<()>>) {
    match poll {
        Poll::Ready(Ok(())) => {}
        other => panic!("expected a completed wait, got {:?}", other),
    }
}

#[test]
fn test_simple_interrupt() {
    let (board, ctx) = setup(STANDARD_SETUP);
    let pin = Interrupt::new(&ctx, "standard_interrupt").unwrap();
    board.set_pin("standard_interrupt", true).unwrap();

    let outcome = EventLoop::new(&ctx).block_on(pin.wait()).unwrap();
    assert!(outcome.is_ok());
}

#[test]
fn test_invalidate() {
    let (board, ctx) = setup(STANDARD_SETUP);
    let pin = Interrupt::new(&ctx, "standard_interrupt").unwrap();
    board.set_pin("standard_interrupt", true).unwrap();

    ctx.reload(DeviceDescription::from_yaml_str(STANDARD_SETUP).unwrap());
    let _pin2 = Interrupt::new(&ctx, "standard_interrupt").unwrap();
    assert!(pin.is_stale());

    let bus_accesses = board.bus().access_count();
    let uio = board.uio(61).unwrap();
    let arms = uio.arm_count();

    let poller = Poller::new();
    let mut wait = pin!(pin.wait());
    match poller.poll(wait.as_mut()) {
        Poll::Ready(Err(IrqError::StaleConfiguration { resolved, current })) => {
            assert_eq!((resolved, current), (1, 2));
        }
        other => panic!("expected a stale wait, got {:?}", other),
    }
    assert_eq!(board.bus().access_count(), bus_accesses, "no register I/O");
    assert_eq!(uio.arm_count(), arms, "no UIO I/O");
}

#[test]
fn test_stale_wait_leaves_new_direct_waiter_armed() {
    let (board, ctx) = setup(DIRECT_SETUP);
    let old = Interrupt::new(&ctx, "direct_interrupt").unwrap();
    let poller = Poller::new();
    let mut old_wait = pin!(old.wait());
    assert!(poller.poll(old_wait.as_mut()).is_pending());
    let old_uio = ctx.uio(61).unwrap();

    ctx.reload(DeviceDescription::from_yaml_str(DIRECT_SETUP).unwrap());
    assert!(old_uio.is_retired());
    let new = Interrupt::new(&ctx, "direct_interrupt").unwrap();
    let mut new_wait = pin!(new.wait());
    assert!(poller.poll(new_wait.as_mut()).is_pending());

    match poller.poll(old_wait.as_mut()) {
        Poll::Ready(Err(IrqError::StaleConfiguration { .. })) => {}
        other => panic!("expected a stale wait, got {:?}", other),
    }
    assert_eq!(old_uio.waiter_count(), 0);
    assert!(
        board.uio(61).unwrap().is_enabled(),
        "line stays armed for the new waiter"
    );

    board.set_pin("direct_interrupt", true).unwrap();
    assert_eq!(ctx.dispatch_ready(), 1);
    assert_ready_ok(poller.poll(new_wait.as_mut()));
}

#[test]
fn test_dropped_stale_wait_leaves_new_chained_waiter_enabled() {
    let (board, ctx) = setup(STANDARD_SETUP);
    let old = Interrupt::new(&ctx, "standard_interrupt").unwrap();
    let poller = Poller::new();
    let mut old_wait = Box::pin(old.wait());
    assert!(poller.poll(old_wait.as_mut()).is_pending());
    let old_controller = ctx.controller("pynq_intc").unwrap();

    ctx.reload(DeviceDescription::from_yaml_str(STANDARD_SETUP).unwrap());
    assert!(old_controller.is_retired());
    let new = Interrupt::new(&ctx, "standard_interrupt").unwrap();
    let mut new_wait = pin!(new.wait());
    assert!(poller.poll(new_wait.as_mut()).is_pending());

    let sim = board.intc("pynq_intc").unwrap();
    assert_eq!(sim.registers().ier, 1);
    drop(old_wait);
    assert_eq!(old_controller.waiter_count(), 0);
    assert_eq!(sim.registers().ier, 1, "new generation's line stays enabled");
    assert!(board.uio(61).unwrap().is_enabled());

    board.set_pin("standard_interrupt", true).unwrap();
    assert_eq!(ctx.dispatch_ready(), 1);
    assert_ready_ok(poller.poll(new_wait.as_mut()));
}

#[test]
fn test_stale_wait_leaves_new_nested_chain_enabled() {
    let (board, ctx) = setup(NESTED_SETUP);
    let old = Interrupt::new(&ctx, "interrupt1").unwrap();
    let poller = Poller::new();
    let mut old_wait = pin!(old.wait());
    assert!(poller.poll(old_wait.as_mut()).is_pending());

    ctx.reload(DeviceDescription::from_yaml_str(NESTED_SETUP).unwrap());
    let new = Interrupt::new(&ctx, "interrupt1").unwrap();
    let mut new_wait = pin!(new.wait());
    assert!(poller.poll(new_wait.as_mut()).is_pending());

    assert!(matches!(
        poller.poll(old_wait.as_mut()),
        Poll::Ready(Err(IrqError::StaleConfiguration { .. }))
    ));
    assert_eq!(board.intc("pynq_intc").unwrap().registers().ier, 1);
    assert_eq!(board.intc("parent_intc").unwrap().registers().ier, 1);
    assert!(board.uio(61).unwrap().is_enabled());

    board.set_pin("interrupt1", true).unwrap();
    while ctx.dispatch_ready() > 0 {}
    assert_ready_ok(poller.poll(new_wait.as_mut()));
}

#[test]
fn test_duplicate_interrupt() {
    let (board, ctx) = setup(STANDARD_SETUP);
    let pin = Interrupt::new(&ctx, "standard_interrupt").unwrap();
    let pin2 = Interrupt::new(&ctx, "standard_interrupt").unwrap();
    assert!(pin.target().same_as(pin2.target()));

    let poller = Poller::new();
    let mut wait1 = pin!(pin.wait());
    let mut wait2 = pin!(pin2.wait());
    assert!(poller.poll(wait1.as_mut()).is_pending());
    assert!(poller.poll(wait2.as_mut()).is_pending());

    board.set_pin("standard_interrupt", true).unwrap();
    assert_eq!(ctx.dispatch_ready(), 1);
    assert_eq!(poller.wakes(), 2);
    assert_ready_ok(poller.poll(wait1.as_mut()));
    assert_ready_ok(poller.poll(wait2.as_mut()));

    // One firing serves every waiter: one consume read, one acknowledge.
    assert_eq!(board.uio(61).unwrap().consume_count(), 1);
    assert_eq!(board.intc("pynq_intc").unwrap().ack_count(), 1);
}

#[test]
fn test_double_wait() {
    let (board, ctx) = setup(STANDARD_SETUP);
    let pin = Interrupt::new(&ctx, "standard_interrupt").unwrap();

    let poller = Poller::new();
    let mut wait1 = pin!(pin.wait());
    let mut wait2 = pin!(pin.wait());
    assert!(poller.poll(wait1.as_mut()).is_pending());
    assert!(poller.poll(wait2.as_mut()).is_pending());

    board.set_pin("standard_interrupt", true).unwrap();
    ctx.dispatch_ready();
    assert_ready_ok(poller.poll(wait1.as_mut()));
    assert_ready_ok(poller.poll(wait2.as_mut()));
}

fn run_two_interrupts(yaml: &str) {
    let (board, ctx) = setup(yaml);
    let event_loop = EventLoop::new(&ctx);
    let pin = Interrupt::new(&ctx, "interrupt1").unwrap();
    let pin2 = Interrupt::new(&ctx, "interrupt2").unwrap();

    board.set_pin("interrupt1", true).unwrap();
    event_loop.block_on(pin.wait()).unwrap().unwrap();
    board.set_pin("interrupt1", false).unwrap();
    board.set_pin("interrupt2", true).unwrap();
    event_loop.block_on(pin2.wait()).unwrap().unwrap();
    board.set_pin("interrupt2", false).unwrap();
}

#[test]
fn test_two_interrupts_double() {
    run_two_interrupts(DOUBLE_SETUP);
}

#[test]
fn test_two_interrupts_nested() {
    run_two_interrupts(NESTED_SETUP);
}

fn run_simultaneous_wait(yaml: &str) {
    let (board, ctx) = setup(yaml);
    let pin = Interrupt::new(&ctx, "interrupt1").unwrap();
    let pin2 = Interrupt::new(&ctx, "interrupt2").unwrap();

    let poller = Poller::new();
    let mut wait1 = pin!(pin.wait());
    let mut wait2 = pin!(pin2.wait());
    assert!(poller.poll(wait1.as_mut()).is_pending());
    assert!(poller.poll(wait2.as_mut()).is_pending());

    board.set_pin("interrupt1", true).unwrap();
    ctx.dispatch_ready();
    assert_ready_ok(poller.poll(wait1.as_mut()));
    assert!(poller.poll(wait2.as_mut()).is_pending());

    board.set_pin("interrupt1", false).unwrap();
    board.set_pin("interrupt2", true).unwrap();
    ctx.dispatch_ready();
    assert_ready_ok(poller.poll(wait2.as_mut()));
    board.set_pin("interrupt2", false).unwrap();
}

#[test]
fn test_simultaneous_wait_double() {
    run_simultaneous_wait(DOUBLE_SETUP);
}

#[test]
fn test_simultaneous_wait_nested() {
    run_simultaneous_wait(NESTED_SETUP);
}

#[test]
fn test_direct_interrupt() {
    let (board, ctx) = setup(DIRECT_SETUP);
    let pin = Interrupt::new(&ctx, "direct_interrupt").unwrap();
    assert!(matches!(pin.target(), Target::Direct { .. }));

    let poller = Poller::new();
    let mut wait = pin!(pin.wait());
    assert!(poller.poll(wait.as_mut()).is_pending());
    board.set_pin("direct_interrupt", true).unwrap();
    assert_eq!(ctx.dispatch_ready(), 1);
    assert_ready_ok(poller.poll(wait.as_mut()));
    board.set_pin("direct_interrupt", false).unwrap();

    let uio = ctx.uio(61).unwrap();
    assert_eq!(uio.interrupt_count(), Some(1));
    assert_eq!(uio.state(), UioState::Idle);
}

#[test]
fn test_direct_duplicate_interrupt() {
    let (board, ctx) = setup(DIRECT_SETUP);
    let pin = Interrupt::new(&ctx, "direct_interrupt").unwrap();
    let pin2 = Interrupt::new(&ctx, "direct_interrupt").unwrap();
    assert!(pin.target().same_as(pin2.target()));

    let poller = Poller::new();
    let mut wait1 = pin!(pin.wait());
    let mut wait2 = pin!(pin2.wait());
    assert!(poller.poll(wait1.as_mut()).is_pending());
    assert!(poller.poll(wait2.as_mut()).is_pending());
    assert_eq!(board.uio(61).unwrap().arm_count(), 1, "armed once for both");

    board.set_pin("direct_interrupt", true).unwrap();
    ctx.dispatch_ready();
    assert_ready_ok(poller.poll(wait1.as_mut()));
    assert_ready_ok(poller.poll(wait2.as_mut()));
    assert_eq!(board.uio(61).unwrap().consume_count(), 1);
}

#[test]
fn test_invalid_interrupt() {
    let (_board, ctx) = setup(STANDARD_SETUP);
    let err = Interrupt::new(&ctx, "invalid").unwrap_err();
    assert!(matches!(err, IrqError::UnknownPin(ref name) if name == "invalid"));
    assert!(err.is_resolution());
}

#[test]
fn test_missing_uio() {
    // The board only exposes a fabric line for IRQ 61.
    let desc = DeviceDescription::from_yaml_str(STANDARD_SETUP).unwrap();
    let board = SimBoard::from_description(&desc).unwrap();
    let moved = STANDARD_SETUP.replace("raw_irq: 61", "raw_irq: 62");
    let ctx = ResolutionContext::new(
        board.platform(),
        DeviceDescription::from_yaml_str(&moved).unwrap(),
    );

    let err = Interrupt::new(&ctx, "standard_interrupt").unwrap_err();
    assert!(matches!(err, IrqError::NoUioDevice(62)));
    assert!(err.is_resolution());
    assert!(ctx.cached_controllers().is_empty(), "cache left untouched");
}

#[test]
fn test_resolution_is_deterministic() {
    let (_board, ctx) = setup(NESTED_SETUP);
    let first = ctx.resolve_pin("interrupt1").unwrap();
    let second = ctx.resolve_pin("interrupt1").unwrap();
    assert!(first.same_as(&second));

    let other_line = ctx.resolve_pin("interrupt2").unwrap();
    assert!(!first.same_as(&other_line));
    match (&first, &other_line) {
        (
            Target::Chained { controller: a, .. },
            Target::Chained { controller: b, .. },
        ) => assert!(Rc::ptr_eq(a, b)),
        _ => panic!("expected chained targets"),
    }
}

#[test]
fn test_latched_firing_wakes_late_waiter() {
    let (board, ctx) = setup(DIRECT_SETUP);
    let pin = Interrupt::new(&ctx, "direct_interrupt").unwrap();

    let poller = Poller::new();
    let mut early = pin!(pin.wait());
    assert!(poller.poll(early.as_mut()).is_pending());

    // Fired but not yet consumed by the event loop.
    board.set_pin("direct_interrupt", true).unwrap();
    let mut late = pin!(pin.wait());
    assert_ready_ok(poller.poll(late.as_mut()));
    assert_ready_ok(poller.poll(early.as_mut()));
    assert_eq!(board.uio(61).unwrap().consume_count(), 1);
}

#[test]
fn test_waiter_after_consumed_firing_needs_new_edge() {
    let (board, ctx) = setup(DIRECT_SETUP);
    let pin = Interrupt::new(&ctx, "direct_interrupt").unwrap();
    let poller = Poller::new();

    let mut first = pin!(pin.wait());
    assert!(poller.poll(first.as_mut()).is_pending());
    board.pulse_pin("direct_interrupt").unwrap();
    ctx.dispatch_ready();
    assert_ready_ok(poller.poll(first.as_mut()));

    let mut second = pin!(pin.wait());
    assert!(poller.poll(second.as_mut()).is_pending());
    assert_eq!(ctx.dispatch_ready(), 0);
    assert!(poller.poll(second.as_mut()).is_pending());

    board.pulse_pin("direct_interrupt").unwrap();
    ctx.dispatch_ready();
    assert_ready_ok(poller.poll(second.as_mut()));
}

#[test]
fn test_cancelled_wait_leaves_no_registration() {
    let (board, ctx) = setup(DIRECT_SETUP);
    let pin = Interrupt::new(&ctx, "direct_interrupt").unwrap();
    let uio = ctx.uio(61).unwrap();
    let poller = Poller::new();

    {
        let mut wait = pin!(pin.wait());
        assert!(poller.poll(wait.as_mut()).is_pending());
        assert_eq!(uio.waiter_count(), 1);
        assert_eq!(uio.state(), UioState::Armed);
    }
    assert_eq!(uio.waiter_count(), 0);
    assert_eq!(uio.state(), UioState::Idle);
    assert!(!board.uio(61).unwrap().is_enabled(), "disarmed on cancel");

    // A deregistered event is never woken later.
    let orphan = WakeEvent::new();
    let id = uio.add_event(orphan.clone()).unwrap();
    uio.remove_event(id);

    board.set_pin("direct_interrupt", true).unwrap();
    let mut fresh = pin!(pin.wait());
    assert!(poller.poll(fresh.as_mut()).is_pending());
    assert_eq!(ctx.dispatch_ready(), 1);
    assert_ready_ok(poller.poll(fresh.as_mut()));
    assert!(!orphan.is_set());
}

#[test]
fn test_cancelled_chained_wait_releases_chain() {
    let (board, ctx) = setup(NESTED_SETUP);
    let pin = Interrupt::new(&ctx, "interrupt1").unwrap();
    let poller = Poller::new();

    {
        let mut wait = pin!(pin.wait());
        assert!(poller.poll(wait.as_mut()).is_pending());
        assert_eq!(ctx.controller("parent_intc").unwrap().waiter_count(), 1);
    }

    assert_eq!(ctx.controller("pynq_intc").unwrap().waiter_count(), 0);
    assert_eq!(ctx.controller("parent_intc").unwrap().waiter_count(), 0);
    assert_eq!(ctx.uio(61).unwrap().waiter_count(), 0);
    assert_eq!(board.intc("pynq_intc").unwrap().registers().ier, 0);
    assert_eq!(board.intc("parent_intc").unwrap().registers().ier, 0);

    board.set_pin("interrupt1", true).unwrap();
    let mut fresh = pin!(pin.wait());
    assert!(poller.poll(fresh.as_mut()).is_pending());
    ctx.dispatch_ready();
    assert_ready_ok(poller.poll(fresh.as_mut()));
}

#[test]
fn test_unrelated_line_does_not_wake_leaf_waiter() {
    let (board, ctx) = setup(NESTED_SETUP);
    let pin = Interrupt::new(&ctx, "interrupt1").unwrap();
    let poller = Poller::new();

    let mut wait = pin!(pin.wait());
    assert!(poller.poll(wait.as_mut()).is_pending());
    board.set_pin("interrupt1", true).unwrap();
    ctx.dispatch_ready();
    assert_ready_ok(poller.poll(wait.as_mut()));
    board.set_pin("interrupt1", false).unwrap();

    let mut again = pin!(pin.wait());
    assert!(poller.poll(again.as_mut()).is_pending());
    // Line 1 of the leaf controller has no waiter, so it stays masked.
    board.set_pin("interrupt2", true).unwrap();
    while ctx.dispatch_ready() > 0 {}
    assert!(poller.poll(again.as_mut()).is_pending());
}

#[test]
fn test_sibling_line_wakes_only_its_waiter() {
    let (board, ctx) = setup(NESTED_SETUP);
    let pin = Interrupt::new(&ctx, "interrupt1").unwrap();
    let pin2 = Interrupt::new(&ctx, "interrupt2").unwrap();
    let poller = Poller::new();

    let mut wait1 = pin!(pin.wait());
    let mut wait2 = pin!(pin2.wait());
    assert!(poller.poll(wait1.as_mut()).is_pending());
    assert!(poller.poll(wait2.as_mut()).is_pending());

    board.set_pin("interrupt2", true).unwrap();
    while ctx.dispatch_ready() > 0 {}
    assert_ready_ok(poller.poll(wait2.as_mut()));
    assert!(poller.poll(wait1.as_mut()).is_pending());
    assert_eq!(ctx.controller("pynq_intc").unwrap().waiter_count(), 1);
}

#[test]
fn test_register_failure_fans_out() {
    let (board, ctx) = setup(STANDARD_SETUP);
    let pin = Interrupt::new(&ctx, "standard_interrupt").unwrap();
    let pin2 = Interrupt::new(&ctx, "standard_interrupt").unwrap();
    let poller = Poller::new();

    let mut wait1 = pin!(pin.wait());
    let mut wait2 = pin!(pin2.wait());
    assert!(poller.poll(wait1.as_mut()).is_pending());
    assert!(poller.poll(wait2.as_mut()).is_pending());

    board.bus().fail_next();
    board.set_pin("standard_interrupt", true).unwrap();
    ctx.dispatch_ready();

    for wait in [wait1.as_mut(), wait2.as_mut()] {
        match poller.poll(wait) {
            Poll::Ready(Err(IrqError::DeviceIo { device, .. })) => assert_eq!(device, "pynq_intc"),
            other => panic!("expected an I/O failure, got {:?}", other),
        }
    }

    let controller = ctx.controller("pynq_intc");
    assert!(matches!(controller, Err(IrqError::Broken(_))));
    assert!(matches!(
        Interrupt::new(&ctx, "standard_interrupt"),
        Err(IrqError::Broken(_))
    ));

    // A new generation may build fresh objects.
    ctx.reload(DeviceDescription::from_yaml_str(STANDARD_SETUP).unwrap());
    let pin3 = Interrupt::new(&ctx, "standard_interrupt").unwrap();
    let outcome = EventLoop::new(&ctx).block_on(pin3.wait()).unwrap();
    assert!(outcome.is_ok());
}

#[test]
fn test_uio_failure_fans_out() {
    let (board, ctx) = setup(DIRECT_SETUP);
    let pin = Interrupt::new(&ctx, "direct_interrupt").unwrap();
    let poller = Poller::new();

    let mut wait1 = pin!(pin.wait());
    let mut wait2 = pin!(pin.wait());
    assert!(poller.poll(wait1.as_mut()).is_pending());
    assert!(poller.poll(wait2.as_mut()).is_pending());

    board.set_pin("direct_interrupt", true).unwrap();
    board.uio(61).unwrap().fail_next();
    ctx.dispatch_ready();

    assert!(matches!(
        poller.poll(wait1.as_mut()),
        Poll::Ready(Err(IrqError::DeviceIo { .. }))
    ));
    assert!(matches!(
        poller.poll(wait2.as_mut()),
        Poll::Ready(Err(IrqError::DeviceIo { .. }))
    ));
    assert!(ctx.uio(61).unwrap_err().to_string().contains("unusable"));

    let mut after = pin!(pin.wait());
    assert!(matches!(
        poller.poll(after.as_mut()),
        Poll::Ready(Err(IrqError::Broken(_)))
    ));
}
