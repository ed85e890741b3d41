use std::sync::atomic::AtomicBool;

use crate::os::OsMemory;
use crate::registry::ArenaRegistry;
use crate::stats::ArenaStats;
use crate::{Address, ArenaId, BLOCK_SIZE};

/// Ties the arena registry, the OS collaborator and the purge-engine guard
/// together. Owned by the caller rather than reached through a global —
/// see `DESIGN.md` for why that departs from the process-wide-singleton
/// framing a C allocator would use.
pub struct ArenaManager<O: OsMemory> {
    pub(crate) registry: ArenaRegistry,
    pub(crate) os: O,
    /// Guards against more than one thread running the purge sweep at once.
    pub(crate) purge_lock: AtomicBool,
    pub stats: ArenaStats,
}

impl<O: OsMemory> ArenaManager<O> {
    pub fn new(os: O) -> Self {
        ArenaManager {
            registry: ArenaRegistry::new(),
            os,
            purge_lock: AtomicBool::new(false),
            stats: ArenaStats::new(),
        }
    }

    pub fn arena_count(&self) -> usize {
        self.registry.len()
    }

    /// Returns the address range backing `arena_id`, if it's registered.
    pub fn arena_area(&self, arena_id: ArenaId) -> Option<(Address, usize)> {
        if arena_id == 0 {
            return None;
        }
        let arena = self.registry.get(arena_id as usize - 1)?;
        Some((arena.block_address(0), arena.block_count() * BLOCK_SIZE))
    }

    pub fn os(&self) -> &O {
        &self.os
    }
}
