use crate::arena::Arena;
use crate::error::ArenaErrorKind;
use crate::manager::ArenaManager;
use crate::os::OsMemory;
use crate::{round_up_to_block, Address, ArenaId, BLOCK_SIZE};

impl<O: OsMemory> ArenaManager<O> {
    /// Wraps a region the caller has already obtained from the OS (by
    /// whatever means — this crate's own `reserve_os_memory`, a
    /// caller-managed NUMA-aware allocation, memory handed down by an
    /// embedder) in an [`Arena`] and publishes it to the registry.
    #[allow(clippy::too_many_arguments)]
    pub fn manage_os_memory(
        &self,
        start: Address,
        size: usize,
        is_committed: bool,
        is_large: bool,
        is_zero: bool,
        numa_node: i32,
        exclusive: bool,
    ) -> Result<ArenaId, ArenaErrorKind> {
        let block_count = size / BLOCK_SIZE;
        if block_count == 0 {
            warn!("region of {} bytes is smaller than one block, refusing to register", size);
            return Err(ArenaErrorKind::Einval);
        }

        let allow_decommit = !is_large && !is_committed;
        let arena = Arena::new(
            0, // assigned by the registry
            start,
            block_count,
            exclusive,
            numa_node,
            is_zero,
            is_large,
            allow_decommit,
            is_committed,
        );

        match self.registry.add(arena) {
            Ok(id) => {
                info!(
                    "registered arena {} at {:#x}, {} blocks, numa={}, large={}, exclusive={}",
                    id, start, block_count, numa_node, is_large, exclusive
                );
                self.stats.record_arena_registered();
                Ok(id)
            }
            Err(_arena) => {
                warn!("arena registry full, could not register region at {:#x}", start);
                Err(ArenaErrorKind::Enomem)
            }
        }
    }

    /// Reserves a fresh region from the OS and registers it as a new arena.
    /// Large-page arenas come from [`Self::reserve_huge_pages_at`] instead,
    /// so this path always registers a regular, decommittable-on-demand
    /// region.
    pub fn reserve_os_memory(
        &self,
        size: usize,
        commit: bool,
        exclusive: bool,
    ) -> Result<ArenaId, ArenaErrorKind> {
        let rounded = round_up_to_block(size);
        let (addr, zeroed) = self
            .os
            .alloc_aligned(rounded, BLOCK_SIZE, commit)
            .ok_or(ArenaErrorKind::Enomem)?;

        let numa_node = self.os.numa_current();

        match self.manage_os_memory(addr, rounded, commit, false, zeroed, numa_node, exclusive) {
            Ok(id) => Ok(id),
            Err(err) => {
                self.os.free_aligned(addr, rounded, BLOCK_SIZE, 0, commit);
                Err(err)
            }
        }
    }

    /// Reserves `pages` huge pages pinned to `numa_node` and registers the
    /// result as a permanently-committed, non-decommittable arena.
    pub fn reserve_huge_pages_at(
        &self,
        pages: usize,
        numa_node: i32,
        timeout_ms: u64,
        exclusive: bool,
    ) -> Result<ArenaId, ArenaErrorKind> {
        let (addr, pages_reserved, huge_page_size) = self
            .os
            .alloc_huge_pages(pages, numa_node, timeout_ms)
            .ok_or(ArenaErrorKind::Enomem)?;

        let size = pages_reserved * huge_page_size;
        match self.manage_os_memory(addr, size, true, true, true, numa_node, exclusive) {
            Ok(id) => Ok(id),
            Err(err) => {
                self.os.free_huge_pages(addr, size);
                Err(err)
            }
        }
    }

    /// Reserves huge pages spread evenly across every NUMA node. Succeeds
    /// as long as at least one node yielded pages; failing nodes are
    /// logged and skipped.
    pub fn reserve_huge_pages_interleave(
        &self,
        pages: usize,
        numa_count: i32,
        timeout_ms: u64,
    ) -> Result<Vec<ArenaId>, ArenaErrorKind> {
        if numa_count <= 0 {
            return Err(ArenaErrorKind::Einval);
        }

        let numa_count = numa_count as usize;
        let base = pages / numa_count;
        let extra = pages % numa_count;
        let per_node_timeout = timeout_ms / numa_count as u64 + 50;

        let mut ids = Vec::with_capacity(numa_count);
        for node in 0..numa_count {
            let node_pages = base + if node < extra { 1 } else { 0 };
            if node_pages == 0 {
                continue;
            }
            match self.reserve_huge_pages_at(node_pages, node as i32, per_node_timeout, false) {
                Ok(id) => ids.push(id),
                Err(err) => warn!("numa node {} failed to reserve huge pages: {}", node, err),
            }
        }

        if ids.is_empty() {
            Err(ArenaErrorKind::Enomem)
        } else {
            Ok(ids)
        }
    }
}
