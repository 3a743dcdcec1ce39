//! Reference-counted settlement containers.
//!
//! Every terminal promise owns (one retain on) a container holding its
//! settlement: a resolved value, a rejection reason, or a cancellation
//! reason. Containers are shared by retain/release — a downstream promise
//! that propagates its feed's settlement retains the same container rather
//! than copying it, and the unhandled-rejection ledger holds its own retain
//! on reported rejections. A container is freed (and its slot recycled,
//! pooling permitting) only when the last retain is released.
//!
//! # Payload checkout
//!
//! User callbacks borrow the settlement payload while the engine cell is
//! not borrowed, so the payload can be *checked out* of its container for
//! the duration of one dispatch frame and checked back in afterwards. The
//! settlement kind stays readable while the payload is on loan. A release
//! that drops the count to zero during a checkout defers disposal to the
//! check-in.

use core::any::Any;
use core::fmt;

use crate::types::{CancelReason, Reason};
use crate::util::arena::{ArenaStats, SlotArena, SlotIndex};

/// An owned settlement payload.
pub(crate) enum Settled {
    Resolved(Box<dyn Any>),
    Rejected(Reason),
    Canceled(CancelReason),
}

impl Settled {
    pub(crate) const fn kind(&self) -> SettleKind {
        match self {
            Self::Resolved(_) => SettleKind::Resolved,
            Self::Rejected(_) => SettleKind::Rejected,
            Self::Canceled(_) => SettleKind::Canceled,
        }
    }
}

impl fmt::Debug for Settled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resolved(_) => write!(f, "Resolved(..)"),
            Self::Rejected(reason) => write!(f, "Rejected({reason})"),
            Self::Canceled(reason) => write!(f, "Canceled({reason})"),
        }
    }
}

/// The kind of a settlement, readable even while the payload is checked
/// out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SettleKind {
    Resolved,
    Rejected,
    Canceled,
}

struct Container {
    /// `None` while the payload is checked out to a dispatch frame.
    payload: Option<Settled>,
    kind: SettleKind,
    retains: u32,
    /// Set when this container's rejection has been pushed to the
    /// unhandled ledger; guards exactly-once reporting across sharing
    /// promises.
    reported: bool,
}

/// Handle to a container slot. Non-owning; lifetime is governed by
/// retain/release through the [`ContainerStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ContainerRef(SlotIndex);

/// Arena of settlement containers.
#[derive(Default)]
pub(crate) struct ContainerStore {
    arena: SlotArena<Container>,
}

impl ContainerStore {
    pub(crate) const fn new() -> Self {
        Self {
            arena: SlotArena::new(),
        }
    }

    /// Creates a container holding `settled` with a single retain owned by
    /// the caller.
    pub(crate) fn create(&mut self, settled: Settled) -> ContainerRef {
        let kind = settled.kind();
        let index = self.arena.insert(Container {
            payload: Some(settled),
            kind,
            retains: 1,
            reported: false,
        });
        ContainerRef(index)
    }

    pub(crate) fn retain(&mut self, container: ContainerRef) {
        if let Some(slot) = self.arena.get_mut(container.0) {
            slot.retains += 1;
        }
    }

    /// Drops one retain; frees the container when the count reaches zero
    /// and the payload is home, returning the payload so the caller can
    /// drop it outside the engine borrow. A zero count during checkout
    /// defers to [`ContainerStore::checkin`].
    #[must_use]
    pub(crate) fn release(&mut self, container: ContainerRef, recycle: bool) -> Option<Settled> {
        let slot = self.arena.get_mut(container.0)?;
        slot.retains = slot.retains.saturating_sub(1);
        if slot.retains == 0 && slot.payload.is_some() {
            return self.arena.remove(container.0, recycle)?.payload;
        }
        None
    }

    pub(crate) fn kind(&self, container: ContainerRef) -> Option<SettleKind> {
        self.arena.get(container.0).map(|slot| slot.kind)
    }

    /// Lends the payload out for one dispatch frame.
    pub(crate) fn checkout(&mut self, container: ContainerRef) -> Option<Settled> {
        self.arena.get_mut(container.0)?.payload.take()
    }

    /// Returns a checked-out payload to its container; completes a
    /// disposal deferred by [`ContainerStore::release`] if the last retain
    /// went away while the payload was on loan, handing the payload back
    /// out for dropping outside the engine borrow.
    #[must_use]
    pub(crate) fn checkin(
        &mut self,
        container: ContainerRef,
        settled: Settled,
        recycle: bool,
    ) -> Option<Settled> {
        let Some(slot) = self.arena.get_mut(container.0) else {
            return Some(settled);
        };
        slot.payload = Some(settled);
        if slot.retains == 0 {
            return self.arena.remove(container.0, recycle)?.payload;
        }
        None
    }

    /// Marks a rejection as reported. Returns true the first time only.
    pub(crate) fn mark_reported(&mut self, container: ContainerRef) -> bool {
        match self.arena.get_mut(container.0) {
            Some(slot) if !slot.reported => {
                slot.reported = true;
                true
            }
            _ => false,
        }
    }

    pub(crate) const fn stats(&self) -> ArenaStats {
        self.arena.stats()
    }

    #[cfg(test)]
    pub(crate) fn live(&self) -> usize {
        self.arena.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_retain_release_frees_at_zero() {
        let mut store = ContainerStore::new();
        let c = store.create(Settled::Rejected(Reason::new("boom")));
        assert_eq!(store.kind(c), Some(SettleKind::Rejected));

        store.retain(c);
        assert!(store.release(c, true).is_none(), "one retain still outstanding");
        assert_eq!(store.live(), 1);

        let payload = store.release(c, true);
        assert!(matches!(payload, Some(Settled::Rejected(_))));
        assert_eq!(store.live(), 0);
        assert!(store.kind(c).is_none(), "handle is stale after disposal");
    }

    #[test]
    fn release_during_checkout_defers_to_checkin() {
        let mut store = ContainerStore::new();
        let c = store.create(Settled::Resolved(Box::new(5_i32)));

        let payload = store.checkout(c).expect("payload is home");
        assert_eq!(store.kind(c), Some(SettleKind::Resolved), "kind survives checkout");

        assert!(store.release(c, true).is_none(), "disposal deferred while on loan");
        assert_eq!(store.live(), 1);

        let freed = store.checkin(c, payload, true);
        assert!(freed.is_some(), "checkin completes the deferred disposal");
        assert_eq!(store.live(), 0);
    }

    #[test]
    fn double_checkout_yields_nothing() {
        let mut store = ContainerStore::new();
        let c = store.create(Settled::Canceled(CancelReason::user()));
        assert!(store.checkout(c).is_some());
        assert!(store.checkout(c).is_none());
    }

    #[test]
    fn reported_flag_fires_once() {
        let mut store = ContainerStore::new();
        let c = store.create(Settled::Rejected(Reason::new(1_u8)));
        assert!(store.mark_reported(c));
        assert!(!store.mark_reported(c));
    }

    #[test]
    fn recycling_reuses_container_slots() {
        let mut store = ContainerStore::new();
        let a = store.create(Settled::Resolved(Box::new(1_i32)));
        let _ = store.release(a, true);
        let _b = store.create(Settled::Resolved(Box::new(2_i32)));
        assert_eq!(store.stats().recycled, 1);
    }
}
