//! The `race` combinator.

use core::any::Any;

use crate::engine::node::NodeKind;
use crate::engine;
use crate::error::Error;
use crate::promise::Promise;
use crate::tracing_compat::debug;

use super::subscribe;

/// Settles with the first settlement of any kind among the upstreams; the
/// winner's container is shared, not copied. Later settlements only drain
/// the remaining adapters, except that late rejections still reach the
/// unhandled ledger.
///
/// Racing zero promises has no well-defined winner and is an error.
pub fn race<T: Any>(
    promises: impl IntoIterator<Item = Promise<T>>,
) -> Result<Promise<T>, Error> {
    let upstreams: Vec<Promise<T>> = promises.into_iter().collect();
    if upstreams.is_empty() {
        return Err(Error::EmptyRace);
    }
    let count = upstreams.len();
    debug!(count, "race combinator created");

    let comb = engine::with_engine(|eng| {
        let comb = eng.new_node(NodeKind::Race {
            wait_count: count as u32,
        });
        for (index, upstream) in upstreams.into_iter().enumerate() {
            subscribe(eng, comb, index, upstream, None);
        }
        comb
    });
    engine::drive();
    Ok(Promise::from_id(comb))
}
