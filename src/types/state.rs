//! Promise lifecycle states.

use core::fmt;

/// The state of a promise.
///
/// Transitions are one-way and terminal: `Pending` moves to exactly one of
/// `Resolved`, `Rejected`, or `Canceled`, and a terminal promise never
/// transitions again. Only disposal follows a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromiseState {
    /// Not yet settled; continuations wait.
    Pending,
    /// Settled with a value.
    Resolved,
    /// Settled with a rejection reason.
    Rejected,
    /// Settled by cancellation.
    Canceled,
}

impl PromiseState {
    /// Returns true for any settled state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Returns true while the promise can still settle.
    #[must_use]
    pub const fn is_pending(self) -> bool {
        matches!(self, Self::Pending)
    }
}

impl fmt::Display for PromiseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Resolved => write!(f, "resolved"),
            Self::Rejected => write!(f, "rejected"),
            Self::Canceled => write!(f, "canceled"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_is_the_only_non_terminal_state() {
        assert!(PromiseState::Pending.is_pending());
        assert!(!PromiseState::Pending.is_terminal());
        for state in [
            PromiseState::Resolved,
            PromiseState::Rejected,
            PromiseState::Canceled,
        ] {
            assert!(state.is_terminal());
            assert!(!state.is_pending());
        }
    }
}
