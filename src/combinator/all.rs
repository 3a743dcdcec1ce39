//! The `all` combinator.

use core::any::Any;

use crate::engine::continuation::ExtractFn;
use crate::engine::node::{CollectFn, NodeKind};
use crate::engine;
use crate::promise::Promise;
use crate::tracing_compat::debug;
use crate::types::Reason;

use super::subscribe;

/// Resolves with every upstream's value, in input order, once all
/// upstreams have resolved. The first rejection or cancellation settles
/// the combinator immediately with that upstream's outcome; later
/// settlements are still drained for pooling, and late rejections go to
/// the unhandled ledger.
///
/// An empty input resolves immediately with an empty vector.
pub fn all<T>(promises: impl IntoIterator<Item = Promise<T>>) -> Promise<Vec<T>>
where
    T: Any + Clone,
{
    let upstreams: Vec<Promise<T>> = promises.into_iter().collect();
    if upstreams.is_empty() {
        return Promise::resolved(Vec::new());
    }
    let count = upstreams.len();
    debug!(count, "all combinator created");

    let collect: CollectFn = Box::new(|values| {
        let mut out: Vec<T> = Vec::with_capacity(values.len());
        for value in values {
            match value.downcast::<T>() {
                Ok(value) => out.push(*value),
                Err(_) => return Err(Reason::type_mismatch()),
            }
        }
        Ok(Box::new(out))
    });

    let comb = engine::with_engine(|eng| {
        let comb = eng.new_node(NodeKind::All {
            wait_count: count as u32,
            results: (0..count).map(|_| None).collect(),
            collect: Some(collect),
        });
        for (index, upstream) in upstreams.into_iter().enumerate() {
            subscribe(eng, comb, index, upstream, Some(extract_value::<T>()));
        }
        comb
    });
    engine::drive();
    Promise::from_id(comb)
}

/// Clones the slot's typed value back out of the erased feed payload.
fn extract_value<T: Any + Clone>() -> ExtractFn {
    Box::new(|value| {
        value
            .downcast_ref::<T>()
            .map(|value| Box::new(value.clone()) as Box<dyn Any>)
    })
}
