//! Multi-promise fan-in combinators.
//!
//! `all` and `race` subscribe to each upstream through a pass-through
//! adapter continuation carrying the upstream's slot index. The combinator
//! node holds a wait count mirrored by one retain per unsettled upstream,
//! so it cannot be disposed while an adapter could still reach it.

mod all;
mod race;

pub use all::all;
pub use race::race;

use core::any::Any;

use crate::engine::continuation::{Continuation, ExtractFn, Handler};
use crate::engine::node::PromiseId;
use crate::engine::Engine;
use crate::promise::Promise;

/// Subscribes `upstream` to the combinator as slot `index`, transferring
/// the upstream handle's retain and taking one wait retain on the
/// combinator.
fn subscribe<T: Any>(
    eng: &mut Engine,
    comb: PromiseId,
    index: usize,
    upstream: Promise<T>,
    extract: Option<ExtractFn>,
) {
    let feed = upstream.into_raw();
    eng.retain(comb);
    eng.add_continuation(
        feed,
        Continuation {
            downstream: comb,
            handler: Handler::PassThrough { index, extract },
        },
    );
    eng.release(feed);
}
