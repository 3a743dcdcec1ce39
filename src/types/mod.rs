//! Core types: promise states, cancellation reasons, rejection reasons.

pub mod cancel;
pub mod reason;
pub mod state;

pub use cancel::{CancelKind, CancelReason};
pub use reason::Reason;
pub use state::PromiseState;
