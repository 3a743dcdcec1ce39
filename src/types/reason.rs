//! Rejection reasons.
//!
//! A rejection carries an arbitrary typed value. The engine is type-erased,
//! so the value is boxed behind `dyn Any` together with a description
//! captured at construction time; the description is what an unhandled
//! rejection report can always render, even when nobody knows the payload
//! type anymore.

use core::any::Any;
use core::fmt;

/// The reason a promise was rejected.
///
/// Constructed from any `Any + Debug` value, or from a caught panic payload
/// when a user callback panics during dispatch.
pub struct Reason {
    payload: Box<dyn Any>,
    description: String,
    from_panic: bool,
}

impl Reason {
    /// Wraps a typed rejection value.
    #[must_use]
    pub fn new<E: Any + fmt::Debug>(value: E) -> Self {
        let description = format!("{value:?}");
        Self {
            payload: Box::new(value),
            description,
            from_panic: false,
        }
    }

    /// Wraps a panic payload caught at the dispatch boundary.
    #[must_use]
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let description = if let Some(s) = payload.downcast_ref::<&'static str>() {
            format!("callback panicked: {s}")
        } else if let Some(s) = payload.downcast_ref::<String>() {
            format!("callback panicked: {s}")
        } else {
            "callback panicked".to_owned()
        };
        Self {
            payload,
            description,
            from_panic: true,
        }
    }

    /// A rejection for a value whose runtime type did not match the typed
    /// handle it was delivered through. Unreachable through the public
    /// typed API; kept as a guarded failure instead of a panic.
    #[must_use]
    pub(crate) fn type_mismatch() -> Self {
        Self::new("promise payload type mismatch")
    }

    /// Attempts to view the rejection value as an `E`.
    #[must_use]
    pub fn downcast_ref<E: Any>(&self) -> Option<&E> {
        self.payload.downcast_ref()
    }

    /// Returns true if this reason holds an `E`.
    #[must_use]
    pub fn is<E: Any>(&self) -> bool {
        self.payload.is::<E>()
    }

    /// The debug rendering of the rejection value, captured at
    /// construction.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Returns true if this rejection came from a caught panic.
    #[must_use]
    pub const fn is_panic(&self) -> bool {
        self.from_panic
    }
}

impl fmt::Debug for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reason")
            .field("description", &self.description)
            .field("from_panic", &self.from_panic)
            .finish()
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description)
    }
}
