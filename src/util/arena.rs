//! Generational slot arena backing the promise and container pools.
//!
//! Promise nodes and settlement containers are identified by index rather
//! than by pointer, so recycling a slot must not let a stale handle observe
//! the new occupant. Each slot carries a generation counter that is bumped
//! on vacation; a handle whose generation does not match the slot's is
//! stale and every lookup through it fails.
//!
//! # Recycling vs retiring
//!
//! When pooling is enabled a vacated slot joins an intrusive free list and
//! is reused by the next insert. When pooling is disabled the slot is
//! *retired*: it stays vacant forever and inserts always extend the slot
//! vector. Both paths are observable through [`ArenaStats`], which the
//! engine exposes for pool introspection.

use core::fmt;

/// An index into a [`SlotArena`] with a generation counter for staleness
/// detection.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct SlotIndex {
    index: u32,
    generation: u32,
}

impl SlotIndex {
    /// Returns the raw slot position.
    pub(crate) const fn index(self) -> u32 {
        self.index
    }

    /// Returns the generation this handle was issued under.
    pub(crate) const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for SlotIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index(), self.generation())
    }
}

enum Slot<T> {
    Occupied { value: T, generation: u32 },
    Vacant { next_free: Option<u32>, generation: u32 },
    /// Permanently out of service (pooling disabled when it was vacated,
    /// or its generation counter saturated).
    Retired,
}

/// Allocation and reuse counters for one arena.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArenaStats {
    /// Slots created by extending the slot vector.
    pub fresh_allocations: u64,
    /// Inserts served from the free list.
    pub recycled: u64,
    /// Slots permanently taken out of service.
    pub retired: u64,
}

/// A slot arena with generation-checked indices and an optional free list.
pub(crate) struct SlotArena<T> {
    slots: Vec<Slot<T>>,
    free_head: Option<u32>,
    len: usize,
    stats: ArenaStats,
}

impl<T> SlotArena<T> {
    pub(crate) const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_head: None,
            len: 0,
            stats: ArenaStats {
                fresh_allocations: 0,
                recycled: 0,
                retired: 0,
            },
        }
    }

    /// Number of occupied slots.
    pub(crate) const fn len(&self) -> usize {
        self.len
    }

    pub(crate) const fn stats(&self) -> ArenaStats {
        self.stats
    }

    /// Inserts a value, reusing a vacated slot when one is available.
    pub(crate) fn insert(&mut self, value: T) -> SlotIndex {
        self.len += 1;
        if let Some(index) = self.free_head {
            let slot = &mut self.slots[index as usize];
            let generation = match slot {
                Slot::Vacant {
                    next_free,
                    generation,
                } => {
                    self.free_head = *next_free;
                    *generation
                }
                _ => unreachable!("free list points at a non-vacant slot"),
            };
            *slot = Slot::Occupied { value, generation };
            self.stats.recycled += 1;
            return SlotIndex { index, generation };
        }

        let index = u32::try_from(self.slots.len()).expect("arena slot count exceeds u32");
        self.slots.push(Slot::Occupied {
            value,
            generation: 0,
        });
        self.stats.fresh_allocations += 1;
        SlotIndex {
            index,
            generation: 0,
        }
    }

    /// Removes the value at `index`, vacating its slot.
    ///
    /// With `recycle` the slot joins the free list for reuse; otherwise it
    /// is retired. Returns `None` if the handle is stale.
    pub(crate) fn remove(&mut self, index: SlotIndex, recycle: bool) -> Option<T> {
        let slot = self.slots.get_mut(index.index as usize)?;
        match slot {
            Slot::Occupied { generation, .. } if *generation == index.generation => {}
            _ => return None,
        }

        // Generation saturation forces retirement: reuse would alias the
        // last issued handle.
        let next_generation = index.generation.checked_add(1);
        let replacement = match next_generation {
            Some(generation) if recycle => Slot::Vacant {
                next_free: self.free_head,
                generation,
            },
            _ => Slot::Retired,
        };

        let old = core::mem::replace(slot, replacement);
        match &self.slots[index.index as usize] {
            Slot::Vacant { .. } => self.free_head = Some(index.index),
            Slot::Retired => self.stats.retired += 1,
            Slot::Occupied { .. } => unreachable!(),
        }
        self.len -= 1;

        match old {
            Slot::Occupied { value, .. } => Some(value),
            _ => unreachable!(),
        }
    }

    pub(crate) fn get(&self, index: SlotIndex) -> Option<&T> {
        match self.slots.get(index.index as usize)? {
            Slot::Occupied { value, generation } if *generation == index.generation => Some(value),
            _ => None,
        }
    }

    pub(crate) fn get_mut(&mut self, index: SlotIndex) -> Option<&mut T> {
        match self.slots.get_mut(index.index as usize)? {
            Slot::Occupied { value, generation } if *generation == index.generation => Some(value),
            _ => None,
        }
    }

}

impl<T> Default for SlotArena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for SlotArena<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotArena")
            .field("len", &self.len)
            .field("capacity", &self.slots.len())
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_get_round_trip() {
        let mut arena = SlotArena::new();
        let a = arena.insert("alpha");
        let b = arena.insert("beta");
        assert_eq!(arena.get(a), Some(&"alpha"));
        assert_eq!(arena.get(b), Some(&"beta"));
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn recycled_slot_bumps_generation() {
        let mut arena = SlotArena::new();
        let first = arena.insert(1);
        assert_eq!(arena.remove(first, true), Some(1));

        let second = arena.insert(2);
        assert_eq!(second.index(), first.index());
        assert_eq!(second.generation(), first.generation() + 1);

        // The stale handle must not see the new occupant.
        assert!(arena.get(first).is_none());
        assert_eq!(arena.get(second), Some(&2));
    }

    #[test]
    fn stale_remove_is_rejected() {
        let mut arena = SlotArena::new();
        let idx = arena.insert(7);
        assert_eq!(arena.remove(idx, true), Some(7));
        assert_eq!(arena.remove(idx, true), None);
        assert_eq!(arena.len(), 0);
    }

    #[test]
    fn retired_slot_is_never_reused() {
        let mut arena = SlotArena::new();
        let first = arena.insert(1);
        arena.remove(first, false);

        let second = arena.insert(2);
        assert_ne!(second.index(), first.index());
        assert_eq!(arena.stats().retired, 1);
        assert_eq!(arena.stats().recycled, 0);
    }

    #[test]
    fn stats_count_fresh_and_recycled() {
        let mut arena = SlotArena::new();
        let a = arena.insert(1);
        let _b = arena.insert(2);
        arena.remove(a, true);
        let _c = arena.insert(3);

        let stats = arena.stats();
        assert_eq!(stats.fresh_allocations, 2);
        assert_eq!(stats.recycled, 1);
    }

    #[test]
    fn get_mut_updates_in_place() {
        let mut arena = SlotArena::new();
        let idx = arena.insert(10);
        *arena.get_mut(idx).unwrap() += 5;
        assert_eq!(arena.get(idx), Some(&15));
    }
}
