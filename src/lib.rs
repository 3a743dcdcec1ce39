//! Vow: a pooled promise/deferred library with cancel-first dispatch.
//!
//! # Overview
//!
//! Vow is a deferred-value graph and an in-process dispatch loop, not a
//! thread scheduler. A producer creates a promise through a [`Deferred`]
//! controller; consumers attach continuations with [`Promise::then`] and
//! friends, forming a tree of downstream promises; settling the root
//! enqueues it, and a breadth-first drain invokes continuations without
//! recursion, so continuation chains can be arbitrarily long.
//!
//! # Core Guarantees
//!
//! - **Settle-once**: a promise leaves `Pending` exactly once; terminal
//!   states never transition again
//! - **No recursion**: dispatch is iterative with O(1) stack depth, for
//!   chains of any length
//! - **Cancellation wins**: a dedicated cancel lane drains before each
//!   resolve/reject pop, so cancellation observably beats in-flight
//!   settlement in the same tick
//! - **No silent loss**: a rejection that no handler ever observes is
//!   reported as unhandled, exactly once
//! - **Garbage-free under load**: promise nodes and settlement containers
//!   live in generation-checked slot arenas and are recycled when pooling
//!   is enabled
//!
//! # Module Structure
//!
//! - [`types`]: Promise states, rejection and cancellation reasons
//! - [`config`]: Pooling modes and engine configuration
//! - [`error`]: Public argument/usage errors
//! - [`combinator`] (re-exported as [`all`] / [`race`]): fan-in combinators
//! - [`tracing_compat`]: Optional `tracing` integration
//!
//! # Example
//!
//! ```
//! use vow::Deferred;
//!
//! let (deferred, promise) = Deferred::new();
//! let doubled = promise.then(|x: i32| x + 1).then(|y| y * 2);
//! deferred.resolve(5);
//! assert_eq!(doubled.try_value(), Some(12));
//! ```
//!
//! # Threading
//!
//! The engine is thread-local. [`Promise`] and [`Deferred`] are
//! `!Send`/`!Sync`; each thread owns independent pools, lanes, and an
//! unhandled-rejection ledger.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]

pub mod combinator;
pub mod config;
mod engine;
pub mod error;
mod promise;
pub mod tracing_compat;
pub mod types;
mod util;

pub use combinator::{all, race};
pub use config::{Config, Pooling};
pub use engine::PoolStats;
pub use error::Error;
pub use promise::{
    clear_uncaught_handler, configure, drain_pending_handlers, pool_stats, set_uncaught_handler,
    take_unhandled, unhandled_count, Deferred, Promise,
};
pub use types::{CancelKind, CancelReason, PromiseState, Reason};
pub use util::ArenaStats;
