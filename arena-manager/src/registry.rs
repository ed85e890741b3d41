use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use crate::arena::Arena;
use crate::{ArenaId, MAX_ARENAS};

/// Append-only table of registered arenas. Arenas are published once and
/// never removed or mutated structurally afterwards, so readers only ever
/// need an `Acquire` load of the slot pointer.
pub struct ArenaRegistry {
    count: AtomicUsize,
    slots: Box<[AtomicPtr<Arena>]>,
}

impl ArenaRegistry {
    pub fn new() -> Self {
        let slots = (0..MAX_ARENAS)
            .map(|_| AtomicPtr::new(ptr::null_mut()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        ArenaRegistry {
            count: AtomicUsize::new(0),
            slots,
        }
    }

    /// Registers `arena`, assigning it the next free id. Returns the arena
    /// back to the caller, unclaimed, if the registry is full.
    pub fn add(&self, mut arena: Arena) -> Result<ArenaId, Arena> {
        let slot = self.count.fetch_add(1, Ordering::AcqRel);
        if slot >= MAX_ARENAS {
            self.count.fetch_sub(1, Ordering::AcqRel);
            return Err(arena);
        }

        let id = (slot + 1) as ArenaId;
        arena.id = id;

        let boxed = Box::into_raw(Box::new(arena));
        self.slots[slot].store(boxed, Ordering::Release);
        Ok(id)
    }

    pub fn get(&self, index: usize) -> Option<&Arena> {
        if index >= self.count.load(Ordering::Relaxed) {
            return None;
        }
        let ptr = self.slots[index].load(Ordering::Acquire);
        if ptr.is_null() {
            return None;
        }
        // Safety: once a slot's pointer is published it is never freed or
        // mutated through a raw pointer again.
        Some(unsafe { &*ptr })
    }

    pub fn len(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arena> {
        (0..self.len()).filter_map(move |i| self.get(i))
    }
}

// Arenas are never freed: the registry intentionally leaks its entries,
// matching the "process lifetime, never destroyed" invariant.
