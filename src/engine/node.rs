//! The promise node record.
//!
//! A node is the state-machine half of a promise: the typed handles in
//! [`crate::promise`] are thin retained references to a node slot in the
//! engine arena. Nodes track their settlement container, a retain count
//! covering user handles, queue membership, and combinator wait retains,
//! the observation flag that drives unhandled-rejection reporting, and the
//! ordered continuation list (insertion order is invocation order).

use core::any::Any;

use smallvec::SmallVec;

use crate::engine::container::ContainerRef;
use crate::engine::continuation::Continuation;
use crate::types::{PromiseState, Reason};
use crate::util::arena::SlotIndex;

/// Identifier of a promise node: a generation-checked arena index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct PromiseId(pub(crate) SlotIndex);

/// Builds the combinator result from the collected per-slot values once
/// every upstream has resolved.
pub(crate) type CollectFn = Box<dyn FnOnce(Vec<Box<dyn Any>>) -> Result<Box<dyn Any>, Reason>>;

/// Role-specific bookkeeping.
pub(crate) enum NodeKind {
    /// Settled by a producer through a `Deferred` controller (or created
    /// pre-settled).
    Root,
    /// Settled by the engine when an upstream continuation dispatches.
    Link,
    /// `all` fan-in: resolves with index-ordered results when the wait
    /// count reaches zero, rejects on the first upstream rejection.
    All {
        wait_count: u32,
        results: Vec<Option<Box<dyn Any>>>,
        collect: Option<CollectFn>,
    },
    /// `race` fan-in: mirrors the first upstream settlement of any kind.
    Race { wait_count: u32 },
}

impl NodeKind {
    pub(crate) const fn name(&self) -> &'static str {
        match self {
            Self::Root => "root",
            Self::Link => "link",
            Self::All { .. } => "all",
            Self::Race { .. } => "race",
        }
    }
}

pub(crate) struct PromiseNode {
    pub(crate) state: PromiseState,
    /// Settlement container; present exactly when the state is terminal.
    pub(crate) outcome: Option<ContainerRef>,
    /// Outstanding references: user handles, one per queue membership,
    /// and one per unsettled combinator upstream.
    pub(crate) retains: u32,
    /// True once a continuation consumed this node's settlement. A
    /// rejected node disposed with this false is reported unhandled.
    pub(crate) was_observed: bool,
    /// Exempt from slot recycling (captured from the pooling config at
    /// creation).
    pub(crate) dont_pool: bool,
    /// Currently linked into a dispatch lane; a node is in at most one
    /// lane at a time.
    pub(crate) queued: bool,
    pub(crate) continuations: SmallVec<[Continuation; 2]>,
    pub(crate) kind: NodeKind,
}

impl PromiseNode {
    /// Creates a pending node with one retain owned by the caller.
    pub(crate) fn new(kind: NodeKind, dont_pool: bool) -> Self {
        Self {
            state: PromiseState::Pending,
            outcome: None,
            retains: 1,
            was_observed: false,
            dont_pool,
            queued: false,
            continuations: SmallVec::new(),
            kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_node_is_pending_with_one_retain() {
        let node = PromiseNode::new(NodeKind::Root, false);
        assert_eq!(node.state, PromiseState::Pending);
        assert_eq!(node.retains, 1);
        assert!(node.outcome.is_none());
        assert!(!node.was_observed);
        assert!(!node.queued);
        assert!(node.continuations.is_empty());
    }

    #[test]
    fn kind_names_cover_all_roles() {
        assert_eq!(NodeKind::Root.name(), "root");
        assert_eq!(NodeKind::Link.name(), "link");
        assert_eq!(
            NodeKind::Race { wait_count: 2 }.name(),
            "race"
        );
        let all = NodeKind::All {
            wait_count: 1,
            results: vec![None],
            collect: None,
        };
        assert_eq!(all.name(), "all");
    }
}
