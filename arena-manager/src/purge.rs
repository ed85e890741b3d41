use std::sync::atomic::Ordering;

use crate::arena::Arena;
use crate::manager::ArenaManager;
use crate::opt::Options;
use crate::os::OsMemory;
use crate::BLOCK_SIZE;

impl<O: OsMemory> ArenaManager<O> {
    pub(crate) fn schedule_purge(&self, arena: &Arena, index: usize, count: usize) {
        if self.os.preloading() || Options::get().arena_purge_delay_ms() == 0 {
            self.purge_now(arena, index, count);
            return;
        }

        let delay = Options::get().arena_purge_delay_ms();
        let now = self.os.now_ms();
        loop {
            let current = arena.purge_expire.load(Ordering::Relaxed);
            let new_expire = if current == 0 { now + delay } else { current + delay / 10 };
            if arena
                .purge_expire
                .compare_exchange_weak(current, new_expire, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }

        if let Some(purge) = &arena.blocks_purge {
            purge.claim_across(index, count);
        }

        debug!(
            "scheduled purge of arena {} blocks [{}, {}) in {}ms",
            arena.id(),
            index,
            index + count,
            delay
        );
    }

    fn purge_now(&self, arena: &Arena, index: usize, count: usize) {
        let addr = arena.block_address(index);
        let size = count * BLOCK_SIZE;

        if Options::get().reset_decommits() && !self.os.preloading() {
            if self.os.decommit(addr, size) {
                if let Some(committed) = &arena.blocks_committed {
                    committed.unclaim_across(index, count);
                }
                if let Some(purge) = &arena.blocks_purge {
                    purge.unclaim_across(index, count);
                }
                // Decommitted pages come back zeroed on next commit, so the
                // blocks no longer count as dirty.
                arena.blocks_dirty.unclaim_across(index, count);
                self.stats.record_bytes_decommitted(size as u64);
                self.stats.record_blocks_purged(count as u64);
                info!("decommitted arena {} blocks [{}, {})", arena.id(), index, index + count);
            } else {
                // Bitmaps only change on reported success; leave purge set
                // so the same run is retried on the next sweep.
                warn!(
                    "decommit failed for arena {} blocks [{}, {}); will retry",
                    arena.id(),
                    index,
                    index + count
                );
            }
        } else if self.os.reset(addr, size) {
            self.stats.record_blocks_purged(count as u64);
            info!("reset arena {} blocks [{}, {})", arena.id(), index, index + count);
        } else {
            warn!(
                "reset failed for arena {} blocks [{}, {}); will retry",
                arena.id(),
                index,
                index + count
            );
        }
    }

    /// Sweeps one arena for blocks whose purge deadline has arrived (or, if
    /// `force`, every marked block regardless of deadline). Returns whether
    /// any work was actually done.
    fn try_purge_arena(&self, arena: &Arena, now: u64, force: bool) -> bool {
        if !arena.allow_decommit() {
            return false;
        }

        let old_expire = arena.purge_expire.swap(0, Ordering::AcqRel);
        if old_expire == 0 {
            return false;
        }
        if !force && old_expire > now {
            // Not due yet; put the deadline back unless someone else has
            // since rescheduled it.
            let _ = arena.purge_expire.compare_exchange(
                0,
                old_expire,
                Ordering::AcqRel,
                Ordering::Relaxed,
            );
            return false;
        }

        let purge_bitmap = match &arena.blocks_purge {
            Some(bitmap) => bitmap,
            None => return false,
        };

        let mut purged_any = false;
        let total = purge_bitmap.total_bits().min(arena.block_count());
        let mut index = 0;
        while index < total {
            if !purge_bitmap.bit_is_set(index, Ordering::Relaxed) {
                index += 1;
                continue;
            }

            let mut run_len = 1;
            while index + run_len < total && purge_bitmap.bit_is_set(index + run_len, Ordering::Relaxed) {
                run_len += 1;
            }

            self.purge_run(arena, index, run_len, &mut purged_any);
            index += run_len;
        }

        purged_any
    }

    /// Speculatively reclaims `[index, index+attempt_len)` as in-use so the
    /// allocator can't hand any of it out while we purge it, shrinking the
    /// attempt on a lost race rather than giving up outright.
    fn purge_run(&self, arena: &Arena, index: usize, attempt_len: usize, purged_any: &mut bool) {
        let mut attempt_len = attempt_len;
        while attempt_len > 0 {
            if arena.blocks_inuse.try_claim(index, attempt_len) {
                break;
            }
            attempt_len -= 1;
        }

        if attempt_len == 0 {
            return;
        }

        self.purge_range(arena, index, attempt_len, purged_any);

        // Release inuse as the final act, regardless of how much of the
        // range actually got purged below.
        arena.blocks_inuse.unclaim_across(index, attempt_len);
    }

    /// Re-checks the purge bitmap within a range we now hold `inuse` for —
    /// an allocator that raced us to reclaim a block already cleared its
    /// purge bit, so this is an `Acquire` re-read, not a reuse of the
    /// caller's stale scan.
    fn purge_range(&self, arena: &Arena, index: usize, len: usize, purged_any: &mut bool) {
        let purge_bitmap = match &arena.blocks_purge {
            Some(bitmap) => bitmap,
            None => return,
        };

        let mut offset = 0;
        while offset < len {
            if !purge_bitmap.bit_is_set(index + offset, Ordering::Acquire) {
                offset += 1;
                continue;
            }

            let mut sub_len = 1;
            while offset + sub_len < len
                && purge_bitmap.bit_is_set(index + offset + sub_len, Ordering::Acquire)
            {
                sub_len += 1;
            }

            self.purge_now(arena, index + offset, sub_len);
            *purged_any = true;
            offset += sub_len;
        }
    }

    /// Runs the purge sweep across every registered arena. Only one caller
    /// at a time actually does the work; concurrent callers return `false`
    /// immediately rather than blocking.
    pub fn try_purge_all(&self, force: bool, visit_all: bool) -> bool {
        if self
            .purge_lock
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let now = self.os.now_ms();
        let mut did_work = false;
        for arena in self.registry.iter() {
            if self.try_purge_arena(arena, now, force) {
                did_work = true;
                if !visit_all {
                    break;
                }
            }
        }

        self.purge_lock.store(false, Ordering::Release);
        did_work
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim_os::{SimEvent, SimulatedOs};
    use crate::{ArenaManager, BLOCK_SIZE};

    #[test]
    fn free_then_delayed_purge_runs_exactly_once() {
        let manager = ArenaManager::new(SimulatedOs::new());
        manager.reserve_os_memory(4 * BLOCK_SIZE, false, false).unwrap();

        let allocation = manager.alloc(BLOCK_SIZE, true, false, -1).unwrap();
        manager
            .free(allocation.address, BLOCK_SIZE, BLOCK_SIZE, 0, allocation.memid, allocation.commit)
            .unwrap();

        // Purge delay hasn't elapsed yet in simulated time.
        assert!(!manager.try_purge_all(false, true));

        manager.os().advance_ms(Options::get().arena_purge_delay_ms() + 1);
        assert!(manager.try_purge_all(false, true));

        // Without MIMALLOC_ARENA_RESET_DECOMMITS, a purge issues a reset
        // rather than a decommit.
        let resets = manager
            .os()
            .events()
            .into_iter()
            .filter(|e| matches!(e, SimEvent::Reset(_, _)))
            .count();
        assert_eq!(resets, 1);

        // A second sweep finds nothing left to do.
        assert!(!manager.try_purge_all(false, true));
    }

    #[test]
    fn forced_purge_ignores_the_deadline() {
        let manager = ArenaManager::new(SimulatedOs::new());
        manager.reserve_os_memory(BLOCK_SIZE, false, false).unwrap();
        let allocation = manager.alloc(BLOCK_SIZE, true, false, -1).unwrap();
        manager
            .free(allocation.address, BLOCK_SIZE, BLOCK_SIZE, 0, allocation.memid, allocation.commit)
            .unwrap();

        assert!(manager.try_purge_all(true, true));
    }

    #[test]
    fn reallocated_block_is_not_purged_out_from_under_the_allocator() {
        let manager = ArenaManager::new(SimulatedOs::new());
        manager.reserve_os_memory(BLOCK_SIZE, false, false).unwrap();
        let a = manager.alloc(BLOCK_SIZE, true, false, -1).unwrap();
        manager
            .free(a.address, BLOCK_SIZE, BLOCK_SIZE, 0, a.memid, a.commit)
            .unwrap();

        // Reallocate before the purge window elapses; inuse is set again
        // so a forced purge sweep must not touch this block.
        let b = manager.alloc(BLOCK_SIZE, true, false, -1).unwrap();
        assert_eq!(a.address, b.address);

        manager.try_purge_all(true, true);
        let purges = manager
            .os()
            .events()
            .into_iter()
            .filter(|e| matches!(e, SimEvent::Reset(_, _) | SimEvent::Decommit(_, _)))
            .count();
        assert_eq!(purges, 0);
    }
}
