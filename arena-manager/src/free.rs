use crate::error::ArenaErrorKind;
use crate::manager::ArenaManager;
use crate::memid::decode_memid;
use crate::os::OsMemory;
use crate::{block_count_for, Address};

impl<O: OsMemory> ArenaManager<O> {
    /// Returns a previous allocation. Memory not backed by an arena (memid
    /// `0`) is handed straight back to the OS.
    pub fn free(
        &self,
        address: Address,
        size: usize,
        alignment: usize,
        align_offset: usize,
        memid: usize,
        all_committed: bool,
    ) -> Result<(), ArenaErrorKind> {
        let (arena_id, _exclusive, block_index) = match decode_memid(memid) {
            None => {
                self.os.free_aligned(address, size, alignment, align_offset, all_committed);
                return Ok(());
            }
            Some(parts) => parts,
        };

        if arena_id == 0 {
            return Err(ArenaErrorKind::Einval);
        }
        let arena = self
            .registry
            .get(arena_id as usize - 1)
            .ok_or(ArenaErrorKind::Einval)?;

        let bcount = block_count_for(size);
        if block_index + bcount > arena.block_count() {
            return Err(ArenaErrorKind::Einval);
        }

        if arena.allow_decommit() {
            // Schedule the purge before clearing inuse: the purge engine
            // only considers blocks with inuse cleared, so doing this the
            // other way round would let it race past these bits unseen.
            self.schedule_purge(arena, block_index, bcount);
        }

        let all_were_one = arena.blocks_inuse.unclaim_across(block_index, bcount);
        if !all_were_one {
            warn!(
                "double free detected in arena {} at block {} (len {})",
                arena_id, block_index, bcount
            );
            return Err(ArenaErrorKind::Eagain);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim_os::SimulatedOs;
    use crate::{ArenaManager, BLOCK_SIZE};

    #[test]
    fn free_then_realloc_reuses_the_block() {
        let manager = ArenaManager::new(SimulatedOs::new());
        manager.reserve_os_memory(4 * BLOCK_SIZE, false, false).unwrap();

        let a = manager.alloc(BLOCK_SIZE, true, false, -1).unwrap();
        manager
            .free(a.address, BLOCK_SIZE, BLOCK_SIZE, 0, a.memid, a.commit)
            .unwrap();

        let b = manager.alloc(BLOCK_SIZE, true, false, -1).unwrap();
        assert_eq!(a.address, b.address);
    }

    #[test]
    fn double_free_is_reported_as_eagain() {
        let manager = ArenaManager::new(SimulatedOs::new());
        manager.reserve_os_memory(4 * BLOCK_SIZE, false, false).unwrap();
        let a = manager.alloc(BLOCK_SIZE, true, false, -1).unwrap();

        manager
            .free(a.address, BLOCK_SIZE, BLOCK_SIZE, 0, a.memid, a.commit)
            .unwrap();
        let second = manager.free(a.address, BLOCK_SIZE, BLOCK_SIZE, 0, a.memid, a.commit);
        assert_eq!(second, Err(ArenaErrorKind::Eagain));
    }

    #[test]
    fn free_of_os_fallback_memory_forwards_to_os() {
        let manager = ArenaManager::new(SimulatedOs::new());
        let result = manager.free(0x4000_0000, 4096, 4096, 0, crate::memid::MEMID_NONE, true);
        assert!(result.is_ok());
    }

    #[test]
    fn free_with_out_of_range_block_index_is_einval() {
        let manager = ArenaManager::new(SimulatedOs::new());
        manager.reserve_os_memory(BLOCK_SIZE, false, false).unwrap();
        let bogus_memid = crate::memid::encode_memid(1, false, 1_000_000);
        let result = manager.free(0, BLOCK_SIZE, BLOCK_SIZE, 0, bogus_memid, true);
        assert_eq!(result, Err(ArenaErrorKind::Einval));
    }
}
