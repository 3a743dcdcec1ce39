//! Internal utilities.

pub(crate) mod arena;

pub use arena::ArenaStats;
