//! Typed promise and deferred handles.
//!
//! [`Promise<T>`] and [`Deferred<T>`] are thin retained references into the
//! thread-local engine. The engine itself is type-erased; these handles
//! carry the type and bridge user callbacks into erased continuations,
//! cloning values out of shared settlement containers and catching panics
//! at the dispatch boundary.
//!
//! Both handles are `!Send`/`!Sync`: each thread owns an independent
//! engine, and settling a promise from another thread is a compile error
//! rather than a data race.

use core::any::Any;
use core::fmt;
use core::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};

use crate::config::Config;
use crate::engine::container::Settled;
use crate::engine::continuation::{
    CallbackOutcome, Continuation, Handler, RejectFn, ResolveFn,
};
use crate::engine::node::{NodeKind, PromiseId};
use crate::engine::{self, PoolStats};
use crate::error::Error;
use crate::types::{CancelReason, PromiseState, Reason};

/// Keeps the handle on its creating thread and out of `Send`/`Sync`.
type Unsync<T> = PhantomData<(fn() -> T, *const ())>;

/// The consumer side of a deferred computation.
///
/// A promise is a retained handle to one node in the engine's promise
/// graph. Cloning retains the node again; dropping releases it. Dropping
/// the last handle to a pending promise that still has continuations
/// attached cancels it as abandoned, since its settlement can no longer be
/// observed or produced.
pub struct Promise<T> {
    id: PromiseId,
    _marker: Unsync<T>,
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Promise").field(&self.id).finish()
    }
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        engine::with_engine(|eng| eng.retain(self.id));
        Self {
            id: self.id,
            _marker: PhantomData,
        }
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        let _ = engine::try_with_engine(|eng| eng.release(self.id));
        engine::sweep();
        engine::drive();
    }
}

impl<T: Any> Promise<T> {
    pub(crate) fn from_id(id: PromiseId) -> Self {
        Self {
            id,
            _marker: PhantomData,
        }
    }

    /// Transfers this handle's retain to the caller.
    pub(crate) fn into_raw(self) -> PromiseId {
        let id = self.id;
        core::mem::forget(self);
        id
    }

    /// A promise that is already resolved with `value`.
    pub fn resolved(value: T) -> Self {
        let id = engine::with_engine(|eng| {
            let id = eng.new_node(NodeKind::Root);
            eng.resolve_erased(id, Box::new(value));
            id
        });
        engine::drive();
        Self::from_id(id)
    }

    /// A promise that is already rejected with `error`.
    pub fn rejected<E: Any + fmt::Debug>(error: E) -> Self {
        let id = engine::with_engine(|eng| {
            let id = eng.new_node(NodeKind::Root);
            eng.reject_erased(id, Reason::new(error));
            id
        });
        engine::drive();
        Self::from_id(id)
    }

    /// A promise that is already canceled.
    pub fn canceled(reason: CancelReason) -> Self {
        let id = engine::with_engine(|eng| {
            let id = eng.new_node(NodeKind::Root);
            eng.cancel_erased(id, reason);
            id
        });
        engine::drive();
        Self::from_id(id)
    }

    /// Current state. A handle whose node is gone reads as canceled.
    #[must_use]
    pub fn state(&self) -> PromiseState {
        engine::with_engine(|eng| eng.state_of(self.id)).unwrap_or(PromiseState::Canceled)
    }

    /// Cancels the promise if it is still pending. Attached resolve and
    /// reject callbacks will not run; cancellation callbacks will.
    pub fn cancel(&self) {
        self.cancel_with(CancelReason::user());
    }

    /// Cancels with an explicit reason.
    pub fn cancel_with(&self, reason: CancelReason) {
        engine::with_engine(|eng| {
            eng.cancel_erased(self.id, reason);
        });
        engine::drive();
    }

    /// Runs `f` against the rejection reason if this promise is rejected.
    /// Reading the reason counts as observing the rejection, so it will
    /// not additionally be reported as unhandled.
    pub fn with_reason<R>(&self, f: impl FnOnce(&Reason) -> R) -> Option<R> {
        let (container, settled) = engine::with_engine(|eng| eng.checkout_outcome(self.id))?;
        let result = match &settled {
            Settled::Rejected(reason) => Some(f(reason)),
            _ => None,
        };
        engine::with_engine(|eng| {
            if result.is_some() {
                eng.mark_observed(self.id);
            }
            eng.checkin_outcome(container, settled);
        });
        engine::sweep();
        result
    }

    /// Runs `f` against the cancellation reason if this promise is
    /// canceled.
    pub fn with_cancel_reason<R>(&self, f: impl FnOnce(&CancelReason) -> R) -> Option<R> {
        let (container, settled) = engine::with_engine(|eng| eng.checkout_outcome(self.id))?;
        let result = match &settled {
            Settled::Canceled(reason) => Some(f(reason)),
            _ => None,
        };
        engine::with_engine(|eng| eng.checkin_outcome(container, settled));
        engine::sweep();
        result
    }

    /// Attaches a recovery callback: a rejection becomes a resolution with
    /// the callback's return value, resolutions and cancellations pass
    /// through untouched.
    pub fn catch(self, on_rejected: impl FnOnce(&Reason) -> T + 'static) -> Promise<T> {
        attach(
            self.into_raw(),
            Handler::Then {
                on_resolved: None,
                on_rejected: Some(reject_bridge(on_rejected)),
            },
        )
    }

    /// Runs `f` on any settlement; the settlement passes through to the
    /// returned promise unchanged (unless `f` panics, which rejects it).
    pub fn finally(self, f: impl FnOnce() + 'static) -> Promise<T> {
        attach(
            self.into_raw(),
            Handler::Finally(Box::new(move || {
                panic::catch_unwind(AssertUnwindSafe(f))
                    .err()
                    .map(Reason::from_panic)
            })),
        )
    }

    /// Runs `f` if this promise is canceled. Every settlement kind passes
    /// through to the returned promise.
    pub fn on_canceled(self, f: impl FnOnce(&CancelReason) + 'static) -> Promise<T> {
        attach(
            self.into_raw(),
            Handler::OnCanceled(Box::new(move |reason| {
                panic::catch_unwind(AssertUnwindSafe(move || f(reason)))
                    .err()
                    .map(Reason::from_panic)
            })),
        )
    }
}

impl<T: Any + Clone> Promise<T> {
    /// Clones the resolved value out, if this promise is resolved.
    #[must_use]
    pub fn try_value(&self) -> Option<T> {
        let (container, settled) = engine::with_engine(|eng| eng.checkout_outcome(self.id))?;
        let value = match &settled {
            Settled::Resolved(value) => value.downcast_ref::<T>().cloned(),
            _ => None,
        };
        engine::with_engine(|eng| eng.checkin_outcome(container, settled));
        engine::sweep();
        value
    }

    /// Attaches a resolve callback, returning the downstream promise.
    /// Rejections and cancellations pass through to it untouched.
    pub fn then<U: Any>(self, on_resolved: impl FnOnce(T) -> U + 'static) -> Promise<U> {
        attach(
            self.into_raw(),
            Handler::Then {
                on_resolved: Some(resolve_bridge(on_resolved)),
                on_rejected: None,
            },
        )
    }

    /// Attaches both a resolve and a reject callback; exactly one runs
    /// when this promise settles (neither on cancellation).
    pub fn then_catch<U: Any>(
        self,
        on_resolved: impl FnOnce(T) -> U + 'static,
        on_rejected: impl FnOnce(&Reason) -> U + 'static,
    ) -> Promise<U> {
        attach(
            self.into_raw(),
            Handler::Then {
                on_resolved: Some(resolve_bridge(on_resolved)),
                on_rejected: Some(reject_bridge(on_rejected)),
            },
        )
    }

    /// Attaches a callback returning a further promise; the downstream
    /// promise adopts that promise's eventual settlement.
    pub fn then_chain<U: Any>(
        self,
        on_resolved: impl FnOnce(T) -> Promise<U> + 'static,
    ) -> Promise<U> {
        attach(
            self.into_raw(),
            Handler::Then {
                on_resolved: Some(chain_bridge(on_resolved)),
                on_rejected: None,
            },
        )
    }
}

/// The producer side of a deferred computation.
///
/// Settling consumes the controller, making double settlement
/// unrepresentable through this handle. Dropping an unsettled controller
/// abandons the promise: if continuations are attached it is canceled.
pub struct Deferred<T> {
    id: PromiseId,
    _marker: Unsync<T>,
}

impl<T> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Deferred").field(&self.id).finish()
    }
}

impl<T> Drop for Deferred<T> {
    fn drop(&mut self) {
        let _ = engine::try_with_engine(|eng| eng.release(self.id));
        engine::sweep();
        engine::drive();
    }
}

impl<T: Any> Deferred<T> {
    /// Creates a pending promise and the controller that settles it.
    #[must_use]
    pub fn new() -> (Deferred<T>, Promise<T>) {
        let id = engine::with_engine(|eng| {
            let id = eng.new_node(NodeKind::Root);
            // One retain for the controller, one for the promise handle.
            eng.retain(id);
            id
        });
        (
            Deferred {
                id,
                _marker: PhantomData,
            },
            Promise::from_id(id),
        )
    }

    fn into_raw(self) -> PromiseId {
        let id = self.id;
        core::mem::forget(self);
        id
    }

    /// Another handle to the promise this controller settles.
    #[must_use]
    pub fn promise(&self) -> Promise<T> {
        engine::with_engine(|eng| eng.retain(self.id));
        Promise::from_id(self.id)
    }

    /// Current state of the controlled promise.
    #[must_use]
    pub fn state(&self) -> PromiseState {
        engine::with_engine(|eng| eng.state_of(self.id)).unwrap_or(PromiseState::Canceled)
    }

    /// Resolves the promise. A no-op if the consumer already canceled it.
    pub fn resolve(self, value: T) {
        let _ = self.try_resolve(value);
    }

    /// Resolves the promise, reporting whether this settlement won.
    pub fn try_resolve(self, value: T) -> Result<(), Error> {
        let id = self.into_raw();
        let settled = engine::with_engine(|eng| {
            let settled = eng.resolve_erased(id, Box::new(value));
            eng.release(id);
            settled
        });
        engine::drive();
        if settled {
            Ok(())
        } else {
            Err(Error::AlreadySettled)
        }
    }

    /// Rejects the promise. If the consumer already canceled it, the
    /// rejection goes to the unhandled ledger instead of being dropped.
    pub fn reject<E: Any + fmt::Debug>(self, error: E) {
        let _ = self.try_reject(error);
    }

    /// Rejects the promise, reporting whether this settlement won.
    pub fn try_reject<E: Any + fmt::Debug>(self, error: E) -> Result<(), Error> {
        let id = self.into_raw();
        let settled = engine::with_engine(|eng| {
            let settled = eng.reject_erased(id, Reason::new(error));
            eng.release(id);
            settled
        });
        engine::drive();
        if settled {
            Ok(())
        } else {
            Err(Error::AlreadySettled)
        }
    }

    /// Cancels the promise from the producer side.
    pub fn cancel(self) {
        self.cancel_with(CancelReason::user());
    }

    /// Cancels with an explicit reason.
    pub fn cancel_with(self, reason: CancelReason) {
        let id = self.into_raw();
        engine::with_engine(|eng| {
            eng.cancel_erased(id, reason);
            eng.release(id);
        });
        engine::drive();
    }
}

// === free functions ====================================================

/// Replaces the engine configuration for the current thread. Nodes and
/// containers already allocated keep the pooling decision they were
/// created under.
pub fn configure(config: Config) {
    engine::with_engine(|eng| eng.configure(config));
}

/// Installs a handler that receives unhandled rejections at the end of
/// each outermost drain. Replaces any previous handler.
pub fn set_uncaught_handler(handler: impl FnMut(&Reason) + 'static) {
    let previous =
        engine::with_engine(|eng| eng.set_uncaught_handler(Some(Box::new(handler))));
    drop(previous);
    // Deliver any backlog through the new handler.
    engine::drive();
}

/// Removes the uncaught-rejection handler; rejections accumulate in the
/// ledger until pulled with [`take_unhandled`].
pub fn clear_uncaught_handler() {
    let previous = engine::with_engine(|eng| eng.set_uncaught_handler(None));
    drop(previous);
    engine::sweep();
}

/// Drains the dispatch lanes. Settlement already drains inline, so this
/// is only needed by hosts that settle promises from contexts where the
/// drain was suppressed (for example inside a callback of an outer drain
/// that has since returned).
pub fn drain_pending_handlers() {
    engine::drive();
}

/// Pulls every ledgered unhandled rejection through `f`, returning how
/// many were delivered.
pub fn take_unhandled(f: impl FnMut(&Reason)) -> usize {
    engine::take_unhandled_with(f)
}

/// Number of unhandled rejections currently in the ledger.
#[must_use]
pub fn unhandled_count() -> usize {
    engine::with_engine(|eng| eng.unhandled_len())
}

/// Allocation and reuse counters for this thread's promise and container
/// pools.
#[must_use]
pub fn pool_stats() -> PoolStats {
    engine::with_engine(|eng| eng.pool_stats())
}

// === callback bridges ==================================================

/// Creates a downstream link node, attaches `handler` to `feed`, and
/// consumes the feed handle's retain. The continuation takes its own
/// retain on the downstream node.
fn attach<U: Any>(feed: PromiseId, handler: Handler) -> Promise<U> {
    let downstream = engine::with_engine(|eng| {
        let downstream = eng.new_node(NodeKind::Link);
        eng.retain(downstream);
        eng.add_continuation(
            feed,
            Continuation {
                downstream,
                handler,
            },
        );
        eng.release(feed);
        downstream
    });
    engine::drive();
    Promise::from_id(downstream)
}

fn resolve_bridge<T, U, F>(f: F) -> ResolveFn
where
    T: Any + Clone,
    U: Any,
    F: FnOnce(T) -> U + 'static,
{
    Box::new(move |value| {
        let Some(input) = value.downcast_ref::<T>().cloned() else {
            return CallbackOutcome::Fail(Reason::type_mismatch());
        };
        match panic::catch_unwind(AssertUnwindSafe(move || f(input))) {
            Ok(output) => CallbackOutcome::Value(Box::new(output)),
            Err(payload) => CallbackOutcome::Fail(Reason::from_panic(payload)),
        }
    })
}

fn chain_bridge<T, U, F>(f: F) -> ResolveFn
where
    T: Any + Clone,
    U: Any,
    F: FnOnce(T) -> Promise<U> + 'static,
{
    Box::new(move |value| {
        let Some(input) = value.downcast_ref::<T>().cloned() else {
            return CallbackOutcome::Fail(Reason::type_mismatch());
        };
        match panic::catch_unwind(AssertUnwindSafe(move || f(input))) {
            Ok(next) => CallbackOutcome::Chain(next.into_raw()),
            Err(payload) => CallbackOutcome::Fail(Reason::from_panic(payload)),
        }
    })
}

fn reject_bridge<U, F>(f: F) -> RejectFn
where
    U: Any,
    F: FnOnce(&Reason) -> U + 'static,
{
    Box::new(move |reason| {
        match panic::catch_unwind(AssertUnwindSafe(move || f(reason))) {
            Ok(output) => CallbackOutcome::Value(Box::new(output)),
            Err(payload) => CallbackOutcome::Fail(Reason::from_panic(payload)),
        }
    })
}
