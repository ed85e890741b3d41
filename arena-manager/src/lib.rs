//! Process-wide arena manager: partitions large, pre-reserved OS regions into
//! fixed-size blocks and hands out contiguous multi-block runs to a segment /
//! heap allocator, concurrently, from many threads.
//!
//! The moving parts are an atomic multi-field [`bitmap`] for lock-free run
//! claiming, an [`arena`] descriptor holding the bitmaps for one OS region, a
//! registry of descriptors, and the [`manager::ArenaManager`] that ties the
//! allocation, free and purge paths together against an [`os::OsMemory`]
//! collaborator.

#[macro_use]
extern crate log;

mod alloc;
mod arena;
mod bitmap;
mod error;
mod free;
mod manager;
mod memid;
mod opt;
mod os;
mod purge;
mod registry;
mod reserve;
mod stats;

#[cfg(test)]
mod sim_os;

pub use crate::alloc::{AllocRequest, Allocation};
pub use crate::arena::Arena;
pub use crate::bitmap::Bitmap;
pub use crate::error::ArenaErrorKind;
pub use crate::manager::ArenaManager;
pub use crate::memid::{decode_memid, encode_memid, MEMID_NONE};
pub use crate::opt::Options;
pub use crate::os::OsMemory;
#[cfg(unix)]
pub use crate::os::UnixOsMemory;
pub use crate::stats::ArenaStats;

#[cfg(test)]
pub use crate::sim_os::SimulatedOs;

/// A raw virtual address. We deal in addresses rather than pointers since
/// arenas are shared and mutated from many threads at once.
pub type Address = usize;

/// Arena identifier as encoded into a memid: `1..=127`, `0` means "no arena".
pub type ArenaId = u8;

/// Natural machine word width; one bitmap field is one atomic word.
pub const FIELD_BITS: usize = 64;

/// Alignment granularity of a segment in the layer above us.
pub const SEGMENT_ALIGN: usize = 8 * 1024 * 1024;

/// The allocation unit: all arena allocations are rounded up to whole blocks.
pub const BLOCK_SIZE: usize = 4 * SEGMENT_ALIGN;

/// Requests smaller than this bypass arenas entirely.
pub const MIN_OBJ_SIZE: usize = BLOCK_SIZE / 2;

/// Bounded size of the arena registry. The memid encoding reserves 7 bits
/// for the arena id (1..=127), but we only ever fill the first `MAX_ARENAS`
/// slots; see `registry::ArenaRegistry`.
pub const MAX_ARENAS: usize = 64;

pub(crate) fn round_up_to_block(size: usize) -> usize {
    let rem = size % BLOCK_SIZE;
    if rem == 0 {
        size
    } else {
        size + (BLOCK_SIZE - rem)
    }
}

pub(crate) fn block_count_for(size: usize) -> usize {
    (size + BLOCK_SIZE - 1) / BLOCK_SIZE
}
