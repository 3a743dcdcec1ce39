//! Cancellation reason types.
//!
//! Cancellation is distinct from rejection: it carries an optional reason,
//! propagates ahead of normal settlement dispatch, and completing without
//! observation is acceptable by design (no unhandled reporting).

use core::any::Any;
use core::fmt;

/// How a cancellation came about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CancelKind {
    /// Explicit cancellation requested through a handle.
    User,
    /// Propagated from an upstream promise that was canceled.
    Upstream,
    /// The producer dropped without settling; the promise can never settle.
    Abandoned,
}

impl fmt::Display for CancelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Upstream => write!(f, "upstream"),
            Self::Abandoned => write!(f, "abandoned"),
        }
    }
}

/// The reason a promise was canceled: a kind, an optional message, and an
/// optional typed payload supplied by the canceling caller.
pub struct CancelReason {
    kind: CancelKind,
    message: Option<String>,
    payload: Option<Box<dyn Any>>,
}

impl CancelReason {
    /// Creates a reason with the given kind and no message or payload.
    #[must_use]
    pub const fn new(kind: CancelKind) -> Self {
        Self {
            kind,
            message: None,
            payload: None,
        }
    }

    /// A user-initiated cancellation.
    #[must_use]
    pub const fn user() -> Self {
        Self::new(CancelKind::User)
    }

    /// A cancellation cascading from an upstream promise.
    #[must_use]
    pub const fn upstream() -> Self {
        Self::new(CancelKind::Upstream)
    }

    /// A cancellation caused by producer abandonment.
    #[must_use]
    pub const fn abandoned() -> Self {
        Self::new(CancelKind::Abandoned)
    }

    /// Attaches a human-readable message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Attaches a typed payload retrievable via [`CancelReason::downcast_ref`].
    #[must_use]
    pub fn with_value<V: Any>(mut self, value: V) -> Self {
        self.payload = Some(Box::new(value));
        self
    }

    /// Returns the kind of this cancellation.
    #[must_use]
    pub const fn kind(&self) -> CancelKind {
        self.kind
    }

    /// Returns the message, if one was attached.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Attempts to view the attached payload as a `V`.
    #[must_use]
    pub fn downcast_ref<V: Any>(&self) -> Option<&V> {
        self.payload.as_deref().and_then(<dyn Any>::downcast_ref)
    }
}

impl Default for CancelReason {
    fn default() -> Self {
        Self::user()
    }
}

impl fmt::Debug for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelReason")
            .field("kind", &self.kind)
            .field("message", &self.message)
            .field("has_payload", &self.payload.is_some())
            .finish()
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        Ok(())
    }
}
