//! The continuation type the dispatch engine understands.
//!
//! The public API accepts typed callbacks; the engine is type-erased. The
//! bridge is one tagged [`Handler`] enum over boxed callback shapes rather
//! than a wrapper type per callback arity. Each callback is an `FnOnce`
//! moved out of the handler at dispatch, so invoking twice is
//! unrepresentable.

use core::any::Any;
use core::fmt;

use crate::engine::node::PromiseId;
use crate::types::{CancelReason, Reason};

/// What a resolve/reject callback produced for its downstream promise.
pub(crate) enum CallbackOutcome {
    /// Resolve downstream with this value.
    Value(Box<dyn Any>),
    /// Downstream adopts the settlement of this promise (the callback
    /// returned a further promise; its handle retain is transferred).
    Chain(PromiseId),
    /// Reject downstream with this reason (callback failure or panic).
    Fail(Reason),
}

/// Bridging callback invoked with the feed's resolved value.
pub(crate) type ResolveFn = Box<dyn FnOnce(&dyn Any) -> CallbackOutcome>;

/// Bridging callback invoked with the feed's rejection reason.
pub(crate) type RejectFn = Box<dyn FnOnce(&Reason) -> CallbackOutcome>;

/// Cancellation observer; returns a reason if the callback panicked.
pub(crate) type CancelFn = Box<dyn FnOnce(&CancelReason) -> Option<Reason>>;

/// Settlement observer (any terminal state); returns a reason on panic.
pub(crate) type FinallyFn = Box<dyn FnOnce() -> Option<Reason>>;

/// Clones a combinator slot's value out of the feed payload, re-erased.
/// `None` signals a payload type mismatch.
pub(crate) type ExtractFn = Box<dyn Fn(&dyn Any) -> Option<Box<dyn Any>>>;

/// The callback shape attached to a promise.
pub(crate) enum Handler {
    /// `.then` / `.then_catch`: either side may be absent, in which case
    /// that settlement passes through to the downstream promise.
    Then {
        on_resolved: Option<ResolveFn>,
        on_rejected: Option<RejectFn>,
    },
    /// `.finally`: runs on any settlement; the settlement passes through.
    Finally(FinallyFn),
    /// `.on_canceled`: runs on cancellation only; settlements of every
    /// kind pass through.
    OnCanceled(CancelFn),
    /// Downstream mirrors the feed's settlement (promise returned from a
    /// resolve callback).
    Adopt,
    /// Feed is one upstream of a combinator; `downstream` is the
    /// combinator node and `index` its slot.
    PassThrough {
        index: usize,
        extract: Option<ExtractFn>,
    },
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Then {
                on_resolved,
                on_rejected,
            } => f
                .debug_struct("Then")
                .field("on_resolved", &on_resolved.is_some())
                .field("on_rejected", &on_rejected.is_some())
                .finish(),
            Self::Finally(_) => write!(f, "Finally"),
            Self::OnCanceled(_) => write!(f, "OnCanceled"),
            Self::Adopt => write!(f, "Adopt"),
            Self::PassThrough { index, .. } => write!(f, "PassThrough({index})"),
        }
    }
}

/// A continuation: the downstream promise to settle plus the handler that
/// decides how the feed's settlement reaches it.
#[derive(Debug)]
pub(crate) struct Continuation {
    pub(crate) downstream: PromiseId,
    pub(crate) handler: Handler,
}
