//! End-to-end unhandled-rejection reporting: exactly-once surfacing,
//! suppression by catch/observation, the uncaught handler callback, and
//! redirection of late rejections.

use std::cell::RefCell;
use std::rc::Rc;

use vow::{Deferred, Error, Promise};

#[test]
fn uncaught_rejection_surfaces_exactly_once() {
    let tail = Promise::<i32>::rejected("boom").then(|x: i32| x);
    drop(tail);

    assert_eq!(vow::unhandled_count(), 1);

    let mut descriptions = Vec::new();
    let delivered = vow::take_unhandled(|reason| descriptions.push(reason.description().to_owned()));
    assert_eq!(delivered, 1);
    assert!(descriptions[0].contains("boom"));

    // The ledger entry is consumed, not re-reported.
    assert_eq!(vow::take_unhandled(|_| ()), 0);
}

#[test]
fn branched_chain_reports_a_shared_rejection_once() {
    let root = Promise::<i32>::rejected("shared");
    let left = root.clone().then(|x: i32| x);
    let right = root.then(|x: i32| x + 1);
    drop(left);
    drop(right);

    // Both leaves share one rejection container; it is deduplicated.
    assert_eq!(vow::take_unhandled(|_| ()), 1);
}

#[test]
fn caught_rejection_is_never_reported() {
    let recovered = Promise::<i32>::rejected("handled").catch(|_| 0);
    assert_eq!(recovered.try_value(), Some(0));
    drop(recovered);

    assert_eq!(vow::unhandled_count(), 0);
}

#[test]
fn reading_the_reason_counts_as_observation() {
    let promise = Promise::<i32>::rejected("peeked");
    assert!(promise.with_reason(|_| ()).is_some());
    drop(promise);

    assert_eq!(vow::unhandled_count(), 0);
}

#[test]
fn uncaught_handler_receives_backlog_and_new_rejections() {
    let seen: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));

    // A rejection ledgered before any handler exists.
    drop(Promise::<i32>::rejected("early"));
    assert_eq!(vow::unhandled_count(), 1);

    let sink = seen.clone();
    vow::set_uncaught_handler(move |reason| {
        sink.borrow_mut().push(reason.description().to_owned());
    });
    assert_eq!(seen.borrow().len(), 1, "backlog flushed on install");
    assert_eq!(vow::unhandled_count(), 0);

    // New rejections flush at the end of the drain their disposal starts.
    drop(Promise::<i32>::rejected("late"));
    assert_eq!(seen.borrow().len(), 2);

    vow::clear_uncaught_handler();
    drop(Promise::<i32>::rejected("after clear"));
    assert_eq!(seen.borrow().len(), 2);
    assert_eq!(vow::take_unhandled(|_| ()), 1);
}

#[test]
fn panicking_uncaught_handler_does_not_wedge_the_engine() {
    vow::set_uncaught_handler(|_| panic!("handler blew up"));
    drop(Promise::<i32>::rejected("boom"));

    // The drain that delivered the rejection survived the handler panic.
    let tail = Promise::resolved(1).then(|x: i32| x + 1);
    vow::drain_pending_handlers();
    assert_eq!(tail.try_value(), Some(2));

    // The faulty handler was uninstalled; later rejections ledger.
    drop(Promise::<i32>::rejected("later"));
    assert_eq!(vow::take_unhandled(|_| ()), 1);
}

#[test]
fn panicking_take_unhandled_consumer_leaves_the_engine_usable() {
    drop(Promise::<i32>::rejected("first"));

    let result = std::panic::catch_unwind(|| vow::take_unhandled(|_| panic!("consumer failed")));
    assert!(result.is_err());

    // The entry was consumed and dispatch still works.
    assert_eq!(vow::unhandled_count(), 0);
    let tail = Promise::resolved(2).then(|x: i32| x * 2);
    assert_eq!(tail.try_value(), Some(4));
}

#[test]
fn rejection_after_consumer_cancel_is_redirected() {
    let (deferred, promise) = Deferred::<i32>::new();
    promise.cancel();

    assert!(matches!(
        deferred.try_reject("refused"),
        Err(Error::AlreadySettled)
    ));
    assert_eq!(vow::take_unhandled(|_| ()), 1);
}

#[test]
fn panicking_callback_without_catch_is_reported() {
    let tail = Promise::resolved(1).then(|_: i32| -> i32 { panic!("dropped on the floor") });
    drop(tail);

    let mut panics = 0;
    vow::take_unhandled(|reason| {
        if reason.is_panic() {
            panics += 1;
        }
    });
    assert_eq!(panics, 1);
}
