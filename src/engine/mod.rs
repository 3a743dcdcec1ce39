//! The dispatch engine: promise arena, two-lane handle queue, drain loop,
//! and unhandled-rejection ledger.
//!
//! # Two lanes
//!
//! Settled promises wait in one of two FIFO lanes. Cancellations go to the
//! cancel lane, resolutions and rejections to the ready lane, and each
//! drain iteration empties the cancel lane before popping a single ready
//! entry — a promise canceled mid-drain observably wins against in-flight
//! settlement in the same tick.
//!
//! # No recursion
//!
//! The drain loop is re-entrancy guarded: settling a promise from inside a
//! callback only enqueues it, and the outermost drain picks it up. Stack
//! depth stays constant for arbitrarily long continuation chains.
//!
//! # Engine cell discipline
//!
//! The engine lives in a thread-local `RefCell`. User callbacks are never
//! invoked, and user-owned values never dropped, while the cell is
//! borrowed: payloads are checked out of their containers for the duration
//! of a dispatch frame, and anything user-owned that the engine sheds
//! (unused callbacks, payloads of freed containers) is parked in a debris
//! list and dropped after the borrow ends. A `Drop` impl that reaches back
//! into the engine therefore finds it unborrowed.

pub(crate) mod container;
pub(crate) mod continuation;
pub(crate) mod node;

use core::any::Any;
use core::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::thread::LocalKey;

use smallvec::SmallVec;

use crate::config::Config;
use crate::tracing_compat::{debug, trace, warn};
use crate::types::{CancelReason, PromiseState, Reason};
use crate::util::arena::{ArenaStats, SlotArena};

use container::{ContainerRef, ContainerStore, SettleKind, Settled};
use continuation::{CallbackOutcome, Continuation, Handler};
use node::{CollectFn, NodeKind, PromiseId, PromiseNode};

/// Arena counters for the engine's pools, split by object class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Promise node slots.
    pub nodes: ArenaStats,
    /// Settlement container slots.
    pub containers: ArenaStats,
}

/// User-owned values shed while the engine cell was borrowed; dropped by
/// [`sweep`] once the borrow ends.
enum Debris {
    Value(Box<dyn Any>),
    Settled(Settled),
    Continuations(SmallVec<[Continuation; 2]>),
    Results(Vec<Option<Box<dyn Any>>>),
}

/// One feed's worth of dispatch work, extracted under the borrow and
/// processed outside it.
struct FeedWork {
    id: PromiseId,
    container: ContainerRef,
    settled: Settled,
    continuations: SmallVec<[Continuation; 2]>,
}

pub(crate) struct Engine {
    nodes: SlotArena<PromiseNode>,
    containers: ContainerStore,
    ready_lane: VecDeque<PromiseId>,
    cancel_lane: VecDeque<PromiseId>,
    unhandled: VecDeque<ContainerRef>,
    uncaught: Option<Box<dyn FnMut(&Reason)>>,
    config: Config,
    debris: Vec<Debris>,
}

thread_local! {
    static ENGINE: RefCell<Engine> = RefCell::new(Engine::new());
    static DRIVING: Cell<bool> = const { Cell::new(false) };
    static SWEEPING: Cell<bool> = const { Cell::new(false) };
}

/// Scope guard for a re-entrancy flag. Clears the flag even if the scope
/// unwinds, so a panic cannot leave the engine refusing to drain.
struct FlagGuard(&'static LocalKey<Cell<bool>>);

impl FlagGuard {
    /// Sets the flag, or returns `None` if it is already set.
    fn acquire(flag: &'static LocalKey<Cell<bool>>) -> Option<Self> {
        if flag.with(Cell::get) {
            return None;
        }
        flag.with(|cell| cell.set(true));
        Some(Self(flag))
    }
}

impl Drop for FlagGuard {
    fn drop(&mut self) {
        let _ = self.0.try_with(|cell| cell.set(false));
    }
}

/// Runs `f` with the thread's engine borrowed mutably.
pub(crate) fn with_engine<R>(f: impl FnOnce(&mut Engine) -> R) -> R {
    ENGINE.with(|cell| f(&mut cell.borrow_mut()))
}

/// Best-effort engine access for `Drop` impls running at thread teardown.
pub(crate) fn try_with_engine<R>(f: impl FnOnce(&mut Engine) -> R) -> Option<R> {
    ENGINE.try_with(|cell| f(&mut cell.borrow_mut())).ok()
}

impl Engine {
    fn new() -> Self {
        Self {
            nodes: SlotArena::new(),
            containers: ContainerStore::new(),
            ready_lane: VecDeque::new(),
            cancel_lane: VecDeque::new(),
            unhandled: VecDeque::new(),
            uncaught: None,
            config: Config::default(),
            debris: Vec::new(),
        }
    }

    // === configuration =================================================

    pub(crate) fn configure(&mut self, config: Config) {
        debug!(?config, "engine reconfigured");
        self.config = config;
    }

    /// Installs (or clears) the uncaught-rejection handler, returning the
    /// previous one so the caller can drop it outside the engine borrow.
    #[must_use]
    pub(crate) fn set_uncaught_handler(
        &mut self,
        handler: Option<Box<dyn FnMut(&Reason)>>,
    ) -> Option<Box<dyn FnMut(&Reason)>> {
        core::mem::replace(&mut self.uncaught, handler)
    }

    pub(crate) fn pool_stats(&self) -> PoolStats {
        PoolStats {
            nodes: self.nodes.stats(),
            containers: self.containers.stats(),
        }
    }

    pub(crate) fn unhandled_len(&self) -> usize {
        self.unhandled.len()
    }

    // === node lifecycle ================================================

    pub(crate) fn new_node(&mut self, kind: NodeKind) -> PromiseId {
        let dont_pool = !self.config.pooling.recycles_nodes();
        trace!(kind = kind.name(), "promise created");
        PromiseId(self.nodes.insert(PromiseNode::new(kind, dont_pool)))
    }

    pub(crate) fn retain(&mut self, id: PromiseId) {
        if let Some(node) = self.nodes.get_mut(id.0) {
            node.retains += 1;
        }
    }

    /// Drops one retain. At zero the node is disposed — unless it is still
    /// pending with continuations attached, in which case it can never
    /// settle and is self-canceled as abandoned first.
    pub(crate) fn release(&mut self, id: PromiseId) {
        let Some(node) = self.nodes.get_mut(id.0) else {
            return;
        };
        node.retains = node.retains.saturating_sub(1);
        if node.retains > 0 {
            return;
        }
        if node.state.is_pending() && !node.continuations.is_empty() {
            trace!(?id, "pending promise abandoned by producer");
            self.cancel_erased(id, CancelReason::abandoned());
        } else {
            self.dispose(id);
        }
    }

    fn dispose(&mut self, id: PromiseId) {
        let Some(node) = self.nodes.get(id.0) else {
            return;
        };
        let recycle = !node.dont_pool;
        let Some(node) = self.nodes.remove(id.0, recycle) else {
            return;
        };
        trace!(?id, state = %node.state, "promise disposed");

        // A rejection nobody observed surfaces exactly once; the reported
        // flag on the shared container dedupes sibling leaves.
        if node.state == PromiseState::Rejected && !node.was_observed {
            if let Some(outcome) = node.outcome {
                self.push_unhandled(outcome);
            }
        }
        if let Some(outcome) = node.outcome {
            self.release_container(outcome);
        }
        if !node.continuations.is_empty() {
            self.debris.push(Debris::Continuations(node.continuations));
        }
        if let NodeKind::All { results, .. } = node.kind {
            self.debris.push(Debris::Results(results));
        }
    }

    pub(crate) fn state_of(&self, id: PromiseId) -> Option<PromiseState> {
        self.nodes.get(id.0).map(|node| node.state)
    }

    pub(crate) fn mark_observed(&mut self, id: PromiseId) {
        if let Some(node) = self.nodes.get_mut(id.0) {
            node.was_observed = true;
        }
    }

    // === settlement ====================================================

    /// Resolves a pending node. A no-op on a settled or stale node: the
    /// design accepts at most one winning settlement per promise.
    pub(crate) fn resolve_erased(&mut self, id: PromiseId, value: Box<dyn Any>) -> bool {
        match self.nodes.get(id.0) {
            Some(node) if node.state.is_pending() => {}
            _ => {
                trace!(?id, "resolve ignored: promise not pending");
                self.debris.push(Debris::Value(value));
                return false;
            }
        }
        let container = self.containers.create(Settled::Resolved(value));
        self.settle(id, container, PromiseState::Resolved);
        true
    }

    /// Rejects a pending node. A rejection that arrives after settlement
    /// is redirected to the unhandled ledger rather than dropped.
    pub(crate) fn reject_erased(&mut self, id: PromiseId, reason: Reason) -> bool {
        match self.nodes.get(id.0) {
            Some(node) if node.state.is_pending() => {}
            _ => {
                trace!(?id, %reason, "late rejection redirected to unhandled ledger");
                let container = self.containers.create(Settled::Rejected(reason));
                self.push_unhandled(container);
                self.release_container(container);
                return false;
            }
        }
        let container = self.containers.create(Settled::Rejected(reason));
        self.settle(id, container, PromiseState::Rejected);
        true
    }

    /// Cancels a pending node; settled and stale nodes ignore it.
    pub(crate) fn cancel_erased(&mut self, id: PromiseId, reason: CancelReason) -> bool {
        match self.nodes.get(id.0) {
            Some(node) if node.state.is_pending() => {}
            _ => {
                trace!(?id, "cancel ignored: promise not pending");
                return false;
            }
        }
        let container = self.containers.create(Settled::Canceled(reason));
        self.settle(id, container, PromiseState::Canceled);
        true
    }

    /// Settles `id` by sharing an existing container (one extra retain).
    /// Used for pass-through propagation: no payload is copied.
    pub(crate) fn settle_shared(&mut self, id: PromiseId, container: ContainerRef, kind: SettleKind) {
        match self.nodes.get(id.0) {
            Some(node) if node.state.is_pending() => {}
            _ => {
                // Don't lose a rejection racing against a cancellation.
                if kind == SettleKind::Rejected {
                    self.push_unhandled(container);
                }
                return;
            }
        }
        let state = match kind {
            SettleKind::Resolved => PromiseState::Resolved,
            SettleKind::Rejected => PromiseState::Rejected,
            SettleKind::Canceled => PromiseState::Canceled,
        };
        self.containers.retain(container);
        self.settle(id, container, state);
    }

    fn settle(&mut self, id: PromiseId, container: ContainerRef, state: PromiseState) {
        if let Some(node) = self.nodes.get_mut(id.0) {
            node.state = state;
            node.outcome = Some(container);
            trace!(?id, state = %state, "promise settled");
            self.enqueue(id, state);
        }
    }

    // === continuations and lanes =======================================

    /// Attaches a continuation. On an already-terminal feed the
    /// continuation is enqueued, never invoked on the current stack, to
    /// preserve breadth-first ordering.
    pub(crate) fn add_continuation(&mut self, feed: PromiseId, continuation: Continuation) {
        let Some(feed_node) = self.nodes.get_mut(feed.0) else {
            // The feed is gone; its settlement can never arrive.
            let downstream = continuation.downstream;
            self.debris
                .push(Debris::Continuations(SmallVec::from_iter([continuation])));
            self.cancel_erased(downstream, CancelReason::abandoned());
            // The discarded continuation's downstream retain.
            self.release(downstream);
            return;
        };
        feed_node.continuations.push(continuation);
        let state = feed_node.state;
        if state.is_terminal() {
            self.enqueue(feed, state);
        }
    }

    fn enqueue(&mut self, id: PromiseId, state: PromiseState) {
        let Some(node) = self.nodes.get_mut(id.0) else {
            return;
        };
        if node.queued {
            return;
        }
        node.queued = true;
        node.retains += 1;
        if state == PromiseState::Canceled {
            trace!(?id, "enqueued on cancel lane");
            self.cancel_lane.push_back(id);
        } else {
            trace!(?id, "enqueued on ready lane");
            self.ready_lane.push_back(id);
        }
    }

    /// Pops the next feed to handle: cancel lane first, to exhaustion.
    fn begin_handling(&mut self) -> Option<FeedWork> {
        loop {
            let id = self
                .cancel_lane
                .pop_front()
                .or_else(|| self.ready_lane.pop_front())?;
            let Some(node) = self.nodes.get_mut(id.0) else {
                continue;
            };
            let Some(container) = node.outcome else {
                // Queued nodes are always terminal; tolerate the
                // impossible by finishing the entry without dispatch.
                node.queued = false;
                self.release(id);
                continue;
            };
            let Some(settled) = self.containers.checkout(container) else {
                node.queued = false;
                self.release(id);
                continue;
            };
            let continuations = core::mem::take(&mut node.continuations);
            return Some(FeedWork {
                id,
                container,
                settled,
                continuations,
            });
        }
    }

    fn finish_handling(&mut self, id: PromiseId, container: ContainerRef, settled: Settled) {
        self.checkin_container(container, settled);
        let mut requeue = None;
        if let Some(node) = self.nodes.get_mut(id.0) {
            node.queued = false;
            // Continuations attached from inside a callback while this
            // node was mid-dispatch could not enqueue it (the queued flag
            // was still set); pick them up now.
            if !node.continuations.is_empty() {
                requeue = Some(node.state);
            }
        }
        if let Some(state) = requeue {
            self.enqueue(id, state);
        }
        self.release(id);
    }

    // === combinator bookkeeping ========================================

    /// One upstream of a combinator settled. Decrements the wait count and
    /// the matching wait retain; settles the combinator when its outcome
    /// is decided.
    pub(crate) fn combinator_settled(
        &mut self,
        comb: PromiseId,
        index: usize,
        kind: SettleKind,
        feed_container: ContainerRef,
        extracted: Option<Box<dyn Any>>,
    ) {
        enum Decision {
            Nothing,
            Share,
            Complete(Option<CollectFn>, Vec<Option<Box<dyn Any>>>),
        }

        let mut leftover = extracted;
        let mut decision = Decision::Nothing;
        if let Some(node) = self.nodes.get_mut(comb.0) {
            let pending = node.state.is_pending();
            match &mut node.kind {
                NodeKind::All {
                    wait_count,
                    results,
                    collect,
                } => {
                    *wait_count = wait_count.saturating_sub(1);
                    match kind {
                        SettleKind::Resolved => {
                            if pending {
                                results[index] = leftover.take();
                                if *wait_count == 0 {
                                    decision = Decision::Complete(
                                        collect.take(),
                                        core::mem::take(results),
                                    );
                                }
                            }
                        }
                        // Even after the combinator is decided the share
                        // goes through settle_shared, which redirects late
                        // rejections to the unhandled ledger.
                        SettleKind::Rejected | SettleKind::Canceled => {
                            decision = Decision::Share;
                        }
                    }
                }
                NodeKind::Race { wait_count } => {
                    *wait_count = wait_count.saturating_sub(1);
                    if pending {
                        trace!(?comb, ?kind, "race decided by first settlement");
                    }
                    decision = Decision::Share;
                }
                NodeKind::Root | NodeKind::Link => {}
            }
        }
        if let Some(value) = leftover {
            self.debris.push(Debris::Value(value));
        }

        match decision {
            Decision::Nothing => {}
            Decision::Share => self.settle_shared(comb, feed_container, kind),
            Decision::Complete(collect, values) => {
                let mut owned = Vec::with_capacity(values.len());
                let mut complete = true;
                for value in values {
                    match value {
                        Some(value) => owned.push(value),
                        None => complete = false,
                    }
                }
                match collect {
                    // The collector only downcasts engine-extracted
                    // values; it invokes no user code.
                    Some(collect) if complete => match collect(owned) {
                        Ok(value) => {
                            self.resolve_erased(comb, value);
                        }
                        Err(reason) => {
                            self.reject_erased(comb, reason);
                        }
                    },
                    _ => {
                        self.debris
                            .push(Debris::Results(owned.into_iter().map(Some).collect()));
                        self.reject_erased(comb, Reason::type_mismatch());
                    }
                }
            }
        }

        // The wait retain taken at combinator construction.
        self.release(comb);
    }

    // === containers ====================================================

    pub(crate) fn release_container(&mut self, container: ContainerRef) {
        let recycle = self.config.pooling.recycles_containers();
        if let Some(payload) = self.containers.release(container, recycle) {
            self.debris.push(Debris::Settled(payload));
        }
    }

    fn checkin_container(&mut self, container: ContainerRef, settled: Settled) {
        let recycle = self.config.pooling.recycles_containers();
        if let Some(payload) = self.containers.checkin(container, settled, recycle) {
            self.debris.push(Debris::Settled(payload));
        }
    }

    /// Checks the outcome payload of a terminal node out for inspection.
    pub(crate) fn checkout_outcome(&mut self, id: PromiseId) -> Option<(ContainerRef, Settled)> {
        let container = self.nodes.get(id.0)?.outcome?;
        let settled = self.containers.checkout(container)?;
        Some((container, settled))
    }

    pub(crate) fn checkin_outcome(&mut self, container: ContainerRef, settled: Settled) {
        self.checkin_container(container, settled);
    }

    // === unhandled ledger ==============================================

    fn push_unhandled(&mut self, container: ContainerRef) {
        if self.containers.kind(container) != Some(SettleKind::Rejected) {
            return;
        }
        if self.containers.mark_reported(container) {
            debug!("rejection recorded as unhandled");
            self.containers.retain(container);
            self.unhandled.push_back(container);
        }
    }

    fn pop_unhandled(&mut self) -> Option<(ContainerRef, Settled)> {
        while let Some(container) = self.unhandled.pop_front() {
            match self.containers.checkout(container) {
                Some(settled) => return Some((container, settled)),
                // Checked out to an in-flight dispatch frame; the ledger
                // retain still needs to go.
                None => self.release_container(container),
            }
        }
        None
    }

    fn take_debris(&mut self) -> Vec<Debris> {
        core::mem::take(&mut self.debris)
    }
}

/// Drops everything the engine shed while its cell was borrowed. Guarded:
/// debris dropped here may release handles that shed more debris, which
/// the outer sweep's loop picks up without growing the stack.
pub(crate) fn sweep() {
    let Some(_guard) = FlagGuard::acquire(&SWEEPING) else {
        return;
    };
    loop {
        let Some(batch) = try_with_engine(Engine::take_debris) else {
            break;
        };
        if batch.is_empty() {
            break;
        }
        drop(batch);
    }
}

/// Drains both dispatch lanes breadth-first, then surfaces unhandled
/// rejections to the configured handler. Re-entrant calls return
/// immediately; the outermost drain processes everything.
pub(crate) fn drive() {
    let Some(guard) = FlagGuard::acquire(&DRIVING) else {
        return;
    };
    loop {
        // Handle drops at thread teardown reach here after the engine
        // cell is gone; there is nothing left to drain then.
        let Some(fetched) = try_with_engine(Engine::begin_handling) else {
            break;
        };
        if let Some(work) = fetched {
            let FeedWork {
                id,
                container,
                settled,
                continuations,
            } = work;
            for continuation in continuations {
                dispatch(id, &settled, container, continuation);
            }
            with_engine(|engine| engine.finish_handling(id, container, settled));
            sweep();
            continue;
        }
        if !flush_one_unhandled() {
            break;
        }
    }
    // Debris dropped here may re-enter drive; release the guard first.
    drop(guard);
    sweep();
}

/// Invokes one continuation against its feed's settlement. Runs outside
/// the engine borrow; the feed's payload is on loan via `settled`.
///
/// Every continuation owns one retain on its downstream node, taken at
/// attach time. Dispatching consumes the continuation, so each path
/// through here ends by releasing that retain (for `PassThrough` the
/// release happens inside `combinator_settled`).
fn dispatch(feed: PromiseId, settled: &Settled, feed_container: ContainerRef, continuation: Continuation) {
    let Continuation {
        downstream,
        handler,
    } = continuation;
    let kind = settled.kind();

    if let Handler::PassThrough { index, extract } = handler {
        with_engine(|engine| engine.mark_observed(feed));
        let extracted = match settled {
            Settled::Resolved(value) => extract.and_then(|extract| extract(value.as_ref())),
            _ => None,
        };
        with_engine(|engine| {
            engine.combinator_settled(downstream, index, kind, feed_container, extracted);
        });
        return;
    }

    let downstream_pending = with_engine(|engine| {
        engine
            .state_of(downstream)
            .is_some_and(PromiseState::is_pending)
    });

    if downstream_pending {
        match handler {
            Handler::Then {
                on_resolved,
                on_rejected,
            } => {
                with_engine(|engine| engine.mark_observed(feed));
                match settled {
                    Settled::Resolved(value) => match on_resolved {
                        Some(callback) => apply_outcome(downstream, callback(value.as_ref())),
                        None => share(downstream, feed_container, kind),
                    },
                    Settled::Rejected(reason) => match on_rejected {
                        Some(callback) => apply_outcome(downstream, callback(reason)),
                        None => share(downstream, feed_container, kind),
                    },
                    Settled::Canceled(_) => share(downstream, feed_container, kind),
                }
            }
            Handler::Finally(callback) => {
                with_engine(|engine| engine.mark_observed(feed));
                match callback() {
                    Some(panic_reason) => with_engine(|engine| {
                        engine.reject_erased(downstream, panic_reason);
                    }),
                    None => share(downstream, feed_container, kind),
                }
            }
            Handler::OnCanceled(callback) => {
                with_engine(|engine| engine.mark_observed(feed));
                if let Settled::Canceled(reason) = settled {
                    match callback(reason) {
                        Some(panic_reason) => with_engine(|engine| {
                            engine.reject_erased(downstream, panic_reason);
                        }),
                        None => share(downstream, feed_container, kind),
                    }
                } else {
                    share(downstream, feed_container, kind);
                }
            }
            Handler::Adopt => {
                with_engine(|engine| engine.mark_observed(feed));
                share(downstream, feed_container, kind);
            }
            Handler::PassThrough { .. } => unreachable!("handled above"),
        }
    }
    // When the downstream promise was canceled out from under its
    // continuation, the callbacks never run and the feed's settlement
    // stays unconsumed here.

    with_engine(|engine| engine.release(downstream));
}

fn share(downstream: PromiseId, container: ContainerRef, kind: SettleKind) {
    with_engine(|engine| engine.settle_shared(downstream, container, kind));
}

fn apply_outcome(downstream: PromiseId, outcome: CallbackOutcome) {
    match outcome {
        CallbackOutcome::Value(value) => with_engine(|engine| {
            engine.resolve_erased(downstream, value);
        }),
        CallbackOutcome::Fail(reason) => with_engine(|engine| {
            engine.reject_erased(downstream, reason);
        }),
        CallbackOutcome::Chain(adopted) => with_engine(|engine| {
            // The new adopt continuation takes its own downstream retain;
            // the one owned by the continuation being dispatched is
            // released by the caller as usual.
            engine.retain(downstream);
            engine.add_continuation(
                adopted,
                Continuation {
                    downstream,
                    handler: Handler::Adopt,
                },
            );
            // The callback's handle retain was transferred with the id.
            engine.release(adopted);
        }),
    }
}

/// Delivers one ledger entry to the configured uncaught handler. Returns
/// false when the ledger is empty or no handler is configured.
fn flush_one_unhandled() -> bool {
    let has_handler = with_engine(|engine| engine.uncaught.is_some());
    if !has_handler {
        return false;
    }
    let Some((container, settled)) = with_engine(Engine::pop_unhandled) else {
        return false;
    };
    if let Settled::Rejected(reason) = &settled {
        let mut handler = with_engine(|engine| engine.uncaught.take());
        let mut panicked = false;
        if let Some(callback) = handler.as_mut() {
            debug!(%reason, "delivering unhandled rejection");
            // A panic here must not escape the drain loop.
            panicked = panic::catch_unwind(AssertUnwindSafe(|| callback(reason))).is_err();
        }
        if panicked {
            warn!("uncaught-rejection handler panicked; handler removed");
            handler = None;
        }
        with_engine(|engine| {
            // Keep a handler installed from within the callback if one was.
            if engine.uncaught.is_none() {
                engine.uncaught = handler;
            }
        });
    }
    with_engine(|engine| {
        engine.checkin_container(container, settled);
        engine.release_container(container);
    });
    sweep();
    true
}

/// Drains ledger entries through `f`, regardless of any configured
/// handler. Returns how many rejections were delivered.
pub(crate) fn take_unhandled_with(mut f: impl FnMut(&Reason)) -> usize {
    let mut count = 0;
    loop {
        let Some((container, settled)) = with_engine(Engine::pop_unhandled) else {
            break;
        };
        let mut panicked = None;
        if let Settled::Rejected(reason) = &settled {
            match panic::catch_unwind(AssertUnwindSafe(|| f(reason))) {
                Ok(()) => count += 1,
                Err(payload) => panicked = Some(payload),
            }
        }
        with_engine(|engine| {
            engine.checkin_container(container, settled);
            engine.release_container(container);
        });
        // The entry is consumed either way; re-raise to the caller only
        // after the container is checked back in.
        if let Some(payload) = panicked {
            sweep();
            panic::resume_unwind(payload);
        }
    }
    sweep();
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CancelKind;

    #[test]
    fn settlement_is_settle_once() {
        let id = with_engine(|eng| eng.new_node(NodeKind::Root));
        assert!(with_engine(|eng| eng.resolve_erased(id, Box::new(1_i32))));
        assert!(!with_engine(|eng| eng.resolve_erased(id, Box::new(2_i32))));
        assert!(!with_engine(|eng| eng.cancel_erased(id, CancelReason::user())));
        assert_eq!(
            with_engine(|eng| eng.state_of(id)),
            Some(PromiseState::Resolved)
        );
        drive();
        with_engine(|eng| eng.release(id));
        sweep();
    }

    #[test]
    fn late_rejection_reaches_the_ledger() {
        let id = with_engine(|eng| eng.new_node(NodeKind::Root));
        assert!(with_engine(|eng| eng.resolve_erased(id, Box::new(()))));
        assert!(!with_engine(|eng| eng.reject_erased(id, Reason::new("late"))));
        assert_eq!(with_engine(|eng| eng.unhandled_len()), 1);

        let mut seen = 0;
        take_unhandled_with(|_| seen += 1);
        assert_eq!(seen, 1);
        assert_eq!(with_engine(|eng| eng.unhandled_len()), 0);

        drive();
        with_engine(|eng| eng.release(id));
        sweep();
    }

    #[test]
    fn unobserved_rejection_reports_exactly_once() {
        let id = with_engine(|eng| eng.new_node(NodeKind::Root));
        assert!(with_engine(|eng| eng.reject_erased(id, Reason::new("boom"))));
        drive();
        with_engine(|eng| eng.release(id));
        sweep();

        let mut seen = 0;
        take_unhandled_with(|_| seen += 1);
        assert_eq!(seen, 1);
        assert_eq!(take_unhandled_with(|_| ()), 0);
    }

    #[test]
    fn abandoned_feed_cancels_its_downstream() {
        let (feed, down) = with_engine(|eng| {
            let feed = eng.new_node(NodeKind::Root);
            let down = eng.new_node(NodeKind::Link);
            eng.retain(down);
            eng.add_continuation(
                feed,
                Continuation {
                    downstream: down,
                    handler: Handler::Adopt,
                },
            );
            (feed, down)
        });
        with_engine(|eng| eng.release(feed));
        drive();

        assert_eq!(
            with_engine(|eng| eng.state_of(down)),
            Some(PromiseState::Canceled)
        );
        let (container, settled) =
            with_engine(|eng| eng.checkout_outcome(down)).expect("outcome present");
        match &settled {
            Settled::Canceled(reason) => assert_eq!(reason.kind(), CancelKind::Abandoned),
            other => panic!("expected cancellation, got {other:?}"),
        }
        with_engine(|eng| {
            eng.checkin_outcome(container, settled);
            eng.release(down);
        });
        sweep();
    }

    #[test]
    fn cancel_lane_drains_before_ready_lane() {
        // Two independent settled roots feeding one downstream each; the
        // canceled feed is enqueued second but must dispatch first.
        let (resolved_down, canceled_down) = with_engine(|eng| {
            let a = eng.new_node(NodeKind::Root);
            let b = eng.new_node(NodeKind::Root);
            let a_down = eng.new_node(NodeKind::Link);
            let b_down = eng.new_node(NodeKind::Link);
            eng.retain(a_down);
            eng.retain(b_down);
            eng.add_continuation(
                a,
                Continuation {
                    downstream: a_down,
                    handler: Handler::Adopt,
                },
            );
            eng.add_continuation(
                b,
                Continuation {
                    downstream: b_down,
                    handler: Handler::Adopt,
                },
            );
            assert!(eng.resolve_erased(a, Box::new(1_i32)));
            assert!(eng.cancel_erased(b, CancelReason::user()));
            // The cancel lane entry must come out ahead of the ready one.
            let first = eng.begin_handling().expect("work queued");
            assert_eq!(first.settled.kind(), SettleKind::Canceled);
            let FeedWork {
                id,
                container,
                settled,
                continuations,
            } = first;
            // Undo the probe; finish_handling re-enqueues a node whose
            // continuation list refilled while it was checked out.
            if let Some(node) = eng.nodes.get_mut(id.0) {
                node.continuations = continuations;
            }
            eng.finish_handling(id, container, settled);
            eng.release(a);
            eng.release(b);
            (a_down, b_down)
        });
        drive();

        assert_eq!(
            with_engine(|eng| eng.state_of(resolved_down)),
            Some(PromiseState::Resolved)
        );
        assert_eq!(
            with_engine(|eng| eng.state_of(canceled_down)),
            Some(PromiseState::Canceled)
        );
        with_engine(|eng| {
            eng.release(resolved_down);
            eng.release(canceled_down);
        });
        sweep();
    }
}
