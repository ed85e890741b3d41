use crate::arena::Arena;
use crate::manager::ArenaManager;
use crate::memid::encode_memid;
use crate::opt::Options;
use crate::os::OsMemory;
use crate::{block_count_for, Address, ArenaId, BLOCK_SIZE, MAX_ARENAS, MIN_OBJ_SIZE, SEGMENT_ALIGN};

/// What the caller is asking for.
pub struct AllocRequest {
    pub size: usize,
    pub alignment: usize,
    pub align_offset: usize,
    pub commit: bool,
    pub large: bool,
    pub numa_node: i32,
    pub req_arena_id: Option<ArenaId>,
}

/// What came back.
pub struct Allocation {
    pub address: Address,
    pub memid: usize,
    pub commit: bool,
    pub large: bool,
    pub pinned: bool,
    pub zero: bool,
}

impl<O: OsMemory> ArenaManager<O> {
    /// Convenience entry point for the common case: block-aligned, no
    /// alignment offset, no arena pinning.
    pub fn alloc(
        &self,
        size: usize,
        commit: bool,
        large: bool,
        numa_node: i32,
    ) -> Option<Allocation> {
        self.alloc_aligned(AllocRequest {
            size,
            alignment: BLOCK_SIZE,
            align_offset: 0,
            commit,
            large,
            numa_node,
            req_arena_id: None,
        })
    }

    pub fn alloc_aligned(&self, req: AllocRequest) -> Option<Allocation> {
        if req.size < MIN_OBJ_SIZE || req.alignment > SEGMENT_ALIGN || req.align_offset != 0 {
            return self.alloc_os_fallback(&req);
        }

        if let Some(req_id) = req.req_arena_id {
            if req_id == 0 {
                return None;
            }
            let arena = self.registry.get(req_id as usize - 1)?;
            if arena.is_large() && !req.large {
                return None;
            }
            if arena.numa_node() >= 0 && arena.numa_node() != req.numa_node {
                return None;
            }
            return self.alloc_from(arena, &req);
        }

        // Pass 1: local-NUMA-or-unpinned arenas only.
        for arena in self.registry.iter() {
            if arena.is_large() && !req.large {
                continue;
            }
            if arena.numa_node() >= 0 && arena.numa_node() != req.numa_node {
                continue;
            }
            if !arena.fits_request(None) {
                continue;
            }
            if let Some(allocation) = self.alloc_from(arena, &req) {
                return Some(allocation);
            }
        }

        // Pass 2: foreign-NUMA arenas, only if nothing local had room.
        for arena in self.registry.iter() {
            if arena.is_large() && !req.large {
                continue;
            }
            if arena.numa_node() < 0 || arena.numa_node() == req.numa_node {
                continue;
            }
            if !arena.fits_request(None) {
                continue;
            }
            if let Some(allocation) = self.alloc_from(arena, &req) {
                return Some(allocation);
            }
        }

        // Nothing fits; eagerly reserve a new arena if the registry has
        // room and the caller's request is within the configured reserve
        // size.
        if self.registry.len() < (3 * MAX_ARENAS) / 4
            && (req.size as u64) <= Options::get().arena_reserve()
        {
            let reserve_size = Options::get().arena_reserve() as usize;
            let reserve_commit = req.commit || Options::get().eager_commit();
            if let Ok(id) = self.reserve_os_memory(reserve_size, reserve_commit, false) {
                if let Some(arena) = self.registry.get(id as usize - 1) {
                    if let Some(allocation) = self.alloc_from(arena, &req) {
                        return Some(allocation);
                    }
                }
            }
        }

        self.alloc_os_fallback(&req)
    }

    fn alloc_os_fallback(&self, req: &AllocRequest) -> Option<Allocation> {
        if req.req_arena_id.is_some() || Options::get().limit_os_alloc() {
            return None;
        }

        let (addr, zero) = self.os.alloc_aligned(req.size, req.alignment.max(1), req.commit)?;
        Some(Allocation {
            address: addr,
            memid: crate::memid::MEMID_NONE,
            commit: req.commit,
            large: req.large,
            pinned: req.large,
            zero,
        })
    }

    fn alloc_from(&self, arena: &Arena, req: &AllocRequest) -> Option<Allocation> {
        let bcount = block_count_for(req.size);
        if bcount > arena.block_count() {
            return None;
        }

        let hint = arena.search_idx.load(std::sync::atomic::Ordering::Relaxed);
        let index = arena.blocks_inuse.try_find_from_claim_across(hint, bcount)?;

        arena
            .search_idx
            .store(index + bcount, std::sync::atomic::Ordering::Release);

        if let Some(purge) = &arena.blocks_purge {
            purge.unclaim_across(index, bcount);
        }

        let mut zero = arena.blocks_dirty.claim_across_all_zero(index, bcount);

        let commit_out;
        if let Some(committed) = &arena.blocks_committed {
            if req.commit {
                let any_zero = committed.claim_across(index, bcount);
                if any_zero {
                    let (ok, commit_zero) = self.os.commit(arena.block_address(index), bcount * BLOCK_SIZE);
                    if !ok {
                        // Undo every bit this claim set before handing the
                        // run back: a failed commit must not leave blocks
                        // permanently stuck in-use with no memid handed out.
                        arena.blocks_inuse.unclaim_across(index, bcount);
                        arena.blocks_dirty.unclaim_across(index, bcount);
                        committed.unclaim_across(index, bcount);
                        warn!(
                            "commit failed for arena {} blocks [{}, {}); rolled back claim",
                            arena.id(),
                            index,
                            index + bcount
                        );
                        return None;
                    }
                    if commit_zero {
                        zero = true;
                    }
                    self.stats.record_blocks_committed(bcount as u64);
                }
                commit_out = true;
            } else {
                commit_out = committed.is_claimed_across(index, bcount);
            }
        } else {
            commit_out = true;
        }

        let memid = encode_memid(arena.id(), arena.exclusive(), index);
        let pinned = arena.is_large() || !arena.allow_decommit();

        Some(Allocation {
            address: arena.block_address(index),
            memid,
            commit: commit_out,
            large: arena.is_large(),
            pinned,
            zero: zero && arena.is_zero_init(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim_os::SimulatedOs;
    use crate::BLOCK_SIZE;

    fn manager_with_arena(blocks: usize) -> (ArenaManager<SimulatedOs>, ArenaId) {
        let manager = ArenaManager::new(SimulatedOs::new());
        let id = manager
            .reserve_os_memory(blocks * BLOCK_SIZE, false, false)
            .unwrap();
        (manager, id)
    }

    #[test]
    fn alloc_from_arena_returns_a_valid_memid() {
        let (manager, _id) = manager_with_arena(4);
        let allocation = manager.alloc(BLOCK_SIZE, true, false, -1).unwrap();
        assert_ne!(allocation.memid, crate::memid::MEMID_NONE);
        assert!(allocation.commit);
    }

    #[test]
    fn two_allocations_never_overlap_blocks() {
        let (manager, _id) = manager_with_arena(4);
        let a = manager.alloc(BLOCK_SIZE, true, false, -1).unwrap();
        let b = manager.alloc(BLOCK_SIZE, true, false, -1).unwrap();
        assert_ne!(a.address, b.address);
    }

    #[test]
    fn pinned_request_only_considers_its_own_arena() {
        let (manager, id) = manager_with_arena(4);
        let other_id = manager.reserve_os_memory(BLOCK_SIZE, false, false).unwrap();
        assert_ne!(id, other_id);

        let allocation = manager
            .alloc_aligned(AllocRequest {
                size: BLOCK_SIZE,
                alignment: BLOCK_SIZE,
                align_offset: 0,
                commit: true,
                large: false,
                numa_node: -1,
                req_arena_id: Some(id),
            })
            .unwrap();

        let (arena_id, _, _) = crate::memid::decode_memid(allocation.memid).unwrap();
        assert_eq!(arena_id, id);
    }

    #[test]
    fn request_too_small_or_misaligned_falls_back_to_os() {
        let (manager, _id) = manager_with_arena(4);
        let allocation = manager
            .alloc_aligned(AllocRequest {
                size: 4096,
                alignment: BLOCK_SIZE,
                align_offset: 0,
                commit: true,
                large: false,
                numa_node: -1,
                req_arena_id: None,
            })
            .unwrap();
        assert_eq!(allocation.memid, crate::memid::MEMID_NONE);
    }

    #[test]
    fn exhausted_arena_falls_through_to_a_fresh_reservation() {
        let (manager, _id) = manager_with_arena(4);
        // Exhaust the 4-block arena with four single-block allocations.
        for _ in 0..4 {
            manager.alloc(BLOCK_SIZE, true, false, -1).unwrap();
        }
        // The next allocation has nowhere to go in the first arena and
        // must trigger an eager reservation of a new one.
        let allocation = manager.alloc(BLOCK_SIZE, true, false, -1).unwrap();
        assert_ne!(allocation.memid, crate::memid::MEMID_NONE);
        assert!(manager.arena_count() >= 2);
    }

    #[test]
    fn min_obj_size_boundary_uses_arenas_only_at_or_above_threshold() {
        let (manager, _id) = manager_with_arena(4);

        let at_threshold = manager
            .alloc_aligned(AllocRequest {
                size: MIN_OBJ_SIZE,
                alignment: BLOCK_SIZE,
                align_offset: 0,
                commit: true,
                large: false,
                numa_node: -1,
                req_arena_id: None,
            })
            .unwrap();
        assert_ne!(at_threshold.memid, crate::memid::MEMID_NONE);

        let below_threshold = manager
            .alloc_aligned(AllocRequest {
                size: MIN_OBJ_SIZE - 1,
                alignment: BLOCK_SIZE,
                align_offset: 0,
                commit: true,
                large: false,
                numa_node: -1,
                req_arena_id: None,
            })
            .unwrap();
        assert_eq!(below_threshold.memid, crate::memid::MEMID_NONE);
    }

    #[test]
    fn numa_local_arena_is_tried_before_a_foreign_node() {
        let manager = ArenaManager::new(SimulatedOs::new());

        let (addr0, _) = manager.os().alloc_aligned(BLOCK_SIZE, BLOCK_SIZE, false).unwrap();
        let id0 = manager
            .manage_os_memory(addr0, BLOCK_SIZE, false, false, true, 0, false)
            .unwrap();
        let (addr1, _) = manager.os().alloc_aligned(BLOCK_SIZE, BLOCK_SIZE, false).unwrap();
        let id1 = manager
            .manage_os_memory(addr1, BLOCK_SIZE, false, false, true, 1, false)
            .unwrap();

        // Caller is on node 1: the node-1 arena must be tried first.
        let first = manager.alloc(BLOCK_SIZE, true, false, 1).unwrap();
        let (arena_id, _, _) = crate::memid::decode_memid(first.memid).unwrap();
        assert_eq!(arena_id, id1);

        // Node-1's single block is now taken; the same caller must fall
        // through to the foreign-node (node 0) arena rather than fail.
        let second = manager.alloc(BLOCK_SIZE, true, false, 1).unwrap();
        let (arena_id, _, _) = crate::memid::decode_memid(second.memid).unwrap();
        assert_eq!(arena_id, id0);
    }

    #[test]
    fn eager_reserve_does_not_trigger_at_three_quarters_max_arenas() {
        let manager = ArenaManager::new(SimulatedOs::new());
        let threshold = (3 * MAX_ARENAS) / 4;
        for _ in 0..threshold {
            // Exclusive arenas never satisfy an unpinned request, so every
            // one of these "refuses" the allocation below.
            manager.reserve_os_memory(BLOCK_SIZE, false, true).unwrap();
        }
        assert_eq!(manager.arena_count(), threshold);

        let allocation = manager.alloc(BLOCK_SIZE, true, false, -1).unwrap();
        assert_eq!(allocation.memid, crate::memid::MEMID_NONE);
        assert_eq!(
            manager.arena_count(),
            threshold,
            "eager reserve must not trigger once arena_count reaches 3/4 * MAX_ARENAS"
        );
    }
}
