//! End-to-end cancellation behavior: suppression of value handlers,
//! cancel-lane priority over ready work, reason propagation, and
//! producer abandonment.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use vow::{CancelKind, CancelReason, Deferred, Error, Promise, PromiseState};

#[test]
fn cancel_before_settlement_skips_value_handlers() {
    let resolved_ran = Rc::new(Cell::new(false));
    let rejected_ran = Rc::new(Cell::new(false));
    let canceled_runs = Rc::new(Cell::new(0_u32));

    let (deferred, promise) = Deferred::<i32>::new();
    let on_resolved = resolved_ran.clone();
    let on_rejected = rejected_ran.clone();
    let on_canceled = canceled_runs.clone();
    let tail = promise
        .clone()
        .then_catch(
            move |x: i32| {
                on_resolved.set(true);
                x
            },
            move |_| {
                on_rejected.set(true);
                -1
            },
        )
        .on_canceled(move |_| on_canceled.set(on_canceled.get() + 1));

    promise.cancel();
    assert_eq!(deferred.try_resolve(5), Err(Error::AlreadySettled));

    assert!(!resolved_ran.get());
    assert!(!rejected_ran.get());
    assert_eq!(canceled_runs.get(), 1);
    assert_eq!(tail.state(), PromiseState::Canceled);
}

#[test]
fn cancellation_beats_ready_work_queued_first() {
    let log: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));

    let (ready_deferred, ready_promise) = Deferred::<i32>::new();
    let (_target_deferred, target_promise) = Deferred::<i32>::new();

    let ready_log = log.clone();
    let _ready_tail = ready_promise.then(move |_| ready_log.borrow_mut().push("ready"));
    let cancel_log = log.clone();
    let _cancel_tail = target_promise
        .clone()
        .on_canceled(move |_| cancel_log.borrow_mut().push("canceled"));

    // Settle and cancel from inside a callback: both only enqueue while
    // the outer drain is running, and the cancel lane must win even
    // though the ready settlement was enqueued first.
    let (root_deferred, root_promise) = Deferred::<i32>::new();
    let _kick = root_promise.then(move |_| {
        ready_deferred.resolve(1);
        target_promise.cancel();
    });
    root_deferred.resolve(0);

    assert_eq!(*log.borrow(), ["canceled", "ready"]);
}

#[test]
fn downstream_of_canceled_promise_is_canceled() {
    let ran = Rc::new(Cell::new(false));

    let promise = Promise::<i32>::canceled(CancelReason::user());
    let flag = ran.clone();
    let tail = promise.then(move |x: i32| {
        flag.set(true);
        x
    });

    assert!(!ran.get());
    assert_eq!(tail.state(), PromiseState::Canceled);
    assert_eq!(
        tail.with_cancel_reason(CancelReason::kind),
        Some(CancelKind::User)
    );
}

#[test]
fn cancel_reason_message_is_preserved() {
    let (_deferred, promise) = Deferred::<i32>::new();
    promise.cancel_with(CancelReason::user().with_message("shutting down"));

    assert_eq!(promise.state(), PromiseState::Canceled);
    assert_eq!(
        promise
            .with_cancel_reason(|reason| reason.message().map(str::to_owned))
            .flatten()
            .as_deref(),
        Some("shutting down")
    );
}

#[test]
fn cancel_reason_payload_round_trips() {
    #[derive(Debug, PartialEq)]
    struct Code(u16);

    let promise = Promise::<i32>::canceled(CancelReason::user().with_value(Code(503)));
    assert_eq!(
        promise.with_cancel_reason(|reason| reason.downcast_ref::<Code>().map(|code| code.0)),
        Some(Some(503))
    );
}

#[test]
fn dropping_the_producer_abandons_the_promise() {
    let kinds: Rc<RefCell<Vec<CancelKind>>> = Rc::new(RefCell::new(Vec::new()));

    let (deferred, promise) = Deferred::<i32>::new();
    let sink = kinds.clone();
    let tail = promise.on_canceled(move |reason| sink.borrow_mut().push(reason.kind()));

    drop(deferred);

    assert_eq!(tail.state(), PromiseState::Canceled);
    assert_eq!(*kinds.borrow(), [CancelKind::Abandoned]);
}

#[test]
fn on_canceled_passes_resolution_through() {
    let ran = Rc::new(Cell::new(false));
    let flag = ran.clone();
    let tail = Promise::resolved(3).on_canceled(move |_| flag.set(true));

    assert_eq!(tail.try_value(), Some(3));
    assert!(!ran.get());
}

#[test]
fn producer_side_cancel_reaches_consumers() {
    let (deferred, promise) = Deferred::<i32>::new();
    deferred.cancel_with(CancelReason::upstream());

    assert_eq!(promise.state(), PromiseState::Canceled);
    assert_eq!(
        promise.with_cancel_reason(CancelReason::kind),
        Some(CancelKind::Upstream)
    );
}
