//! Public argument and usage errors.
//!
//! Rejections and cancellations flow through the promise graph itself
//! ([`crate::Reason`], [`crate::CancelReason`]); this module covers only the
//! errors an API call can return directly to its caller.

/// Errors returned by promise API calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// `race` was given zero promises; there is no well-defined first
    /// settlement.
    #[error("cannot race an empty set of promises")]
    EmptyRace,

    /// A settle operation was attempted on a promise that already settled.
    #[error("promise was already settled")]
    AlreadySettled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_render_messages() {
        assert_eq!(
            Error::EmptyRace.to_string(),
            "cannot race an empty set of promises"
        );
        assert_eq!(
            Error::AlreadySettled.to_string(),
            "promise was already settled"
        );
    }
}
