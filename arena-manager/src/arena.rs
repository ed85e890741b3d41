use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::bitmap::Bitmap;
use crate::{Address, ArenaId, BLOCK_SIZE, FIELD_BITS};

/// Describes one pre-reserved OS region, split into fixed-size blocks.
///
/// Arenas are never destroyed once registered: `common/src/range_map.rs`'s
/// immutable-once-published style is the model here too, just with atomics
/// standing in for the outer lock.
pub struct Arena {
    pub(crate) id: ArenaId,
    exclusive: bool,
    start: Address,
    block_count: usize,
    numa_node: i32,
    is_zero_init: bool,
    is_large: bool,
    allow_decommit: bool,

    /// Rotating hint for where the next allocation should start looking.
    pub(crate) search_idx: AtomicUsize,
    /// 0 means "not scheduled"; otherwise the millisecond deadline after
    /// which a purge of this arena's marked blocks is due.
    pub(crate) purge_expire: AtomicU64,

    pub(crate) blocks_inuse: Bitmap,
    pub(crate) blocks_dirty: Bitmap,
    /// Present only when blocks of this arena can be decommitted; absent for
    /// arenas that are permanently committed (e.g. huge pages).
    pub(crate) blocks_committed: Option<Bitmap>,
    pub(crate) blocks_purge: Option<Bitmap>,
}

impl Arena {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: ArenaId,
        start: Address,
        block_count: usize,
        exclusive: bool,
        numa_node: i32,
        is_zero_init: bool,
        is_large: bool,
        allow_decommit: bool,
        initially_committed: bool,
    ) -> Self {
        let field_count = (block_count + FIELD_BITS - 1) / FIELD_BITS;

        let blocks_inuse = Bitmap::new(field_count);
        // Bits beyond block_count in the last field must never look free.
        blocks_inuse.set_trailing_permanently(block_count);

        let blocks_dirty = Bitmap::new(field_count);

        let (blocks_committed, blocks_purge) = if allow_decommit {
            let committed = if initially_committed {
                Bitmap::new_all_ones(field_count)
            } else {
                Bitmap::new(field_count)
            };
            (Some(committed), Some(Bitmap::new(field_count)))
        } else {
            (None, None)
        };

        debug_assert!(
            !is_large || (!allow_decommit && initially_committed),
            "a large-page arena must be permanently committed and non-decommittable"
        );

        Arena {
            id,
            exclusive,
            start,
            block_count,
            numa_node,
            is_zero_init,
            is_large,
            allow_decommit,
            search_idx: AtomicUsize::new(0),
            purge_expire: AtomicU64::new(0),
            blocks_inuse,
            blocks_dirty,
            blocks_committed,
            blocks_purge,
        }
    }

    #[inline]
    pub fn id(&self) -> ArenaId {
        self.id
    }

    #[inline]
    pub fn exclusive(&self) -> bool {
        self.exclusive
    }

    #[inline]
    pub fn block_count(&self) -> usize {
        self.block_count
    }

    #[inline]
    pub fn numa_node(&self) -> i32 {
        self.numa_node
    }

    #[inline]
    pub fn is_zero_init(&self) -> bool {
        self.is_zero_init
    }

    #[inline]
    pub fn is_large(&self) -> bool {
        self.is_large
    }

    #[inline]
    pub fn allow_decommit(&self) -> bool {
        self.allow_decommit
    }

    #[inline]
    pub fn block_address(&self, block_index: usize) -> Address {
        self.start + block_index * BLOCK_SIZE
    }

    /// Whether a request pinned to `req_arena_id` (if any) may be served
    /// from this arena. `None` means "any non-exclusive arena will do".
    pub(crate) fn fits_request(&self, req_arena_id: Option<ArenaId>) -> bool {
        match req_arena_id {
            Some(id) => id == self.id,
            None => !self.exclusive,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make(block_count: usize, allow_decommit: bool, initially_committed: bool) -> Arena {
        Arena::new(
            1,
            0x1000_0000,
            block_count,
            false,
            -1,
            true,
            false,
            allow_decommit,
            initially_committed,
        )
    }

    #[test]
    fn trailing_bits_beyond_block_count_are_permanently_claimed() {
        let arena = make(70, true, false);
        // field_count = 2, so bits 70..128 exist but aren't real blocks.
        assert!(arena.blocks_inuse.is_claimed_across(70, 58));
        assert!(!arena.blocks_inuse.is_claimed_across(0, 70));
    }

    #[test]
    fn non_decommittable_arena_has_no_committed_or_purge_bitmaps() {
        let arena = make(10, false, true);
        assert!(arena.blocks_committed.is_none());
        assert!(arena.blocks_purge.is_none());
    }

    #[test]
    fn decommittable_arena_starts_with_requested_commit_state() {
        let uncommitted = make(10, true, false);
        assert!(!uncommitted
            .blocks_committed
            .as_ref()
            .unwrap()
            .is_claimed_across(0, 10));

        let committed = make(10, true, true);
        assert!(committed
            .blocks_committed
            .as_ref()
            .unwrap()
            .is_claimed_across(0, 10));
    }

    #[test]
    fn fits_request_respects_exclusivity_and_pinning() {
        let mut arena = make(10, false, true);
        arena.id = 3;
        assert!(arena.fits_request(None));
        assert!(arena.fits_request(Some(3)));
        assert!(!arena.fits_request(Some(4)));
    }

    #[test]
    fn block_address_scales_with_block_size() {
        let arena = make(10, false, true);
        assert_eq!(arena.block_address(0), arena.start);
        assert_eq!(arena.block_address(2), arena.start + 2 * BLOCK_SIZE);
    }
}
