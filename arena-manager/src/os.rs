use crate::Address;

/// Everything the arena manager needs from the operating system. Kept as a
/// trait so the concurrency logic above it can be tested against a fake
/// implementation instead of real mmap/madvise calls.
pub trait OsMemory: Send + Sync {
    /// Reserves `size` bytes aligned to `align`, optionally committing them
    /// up front. Returns the base address and whether the memory came back
    /// already zeroed.
    fn alloc_aligned(&self, size: usize, align: usize, commit: bool) -> Option<(Address, bool)>;

    /// Releases a region previously returned by `alloc_aligned` or
    /// `alloc_huge_pages`.
    fn free_aligned(&self, addr: Address, size: usize, align: usize, offset: usize, committed: bool);

    /// Makes `[addr, addr+size)` accessible. Returns `(success, zeroed)`.
    fn commit(&self, addr: Address, size: usize) -> (bool, bool);

    /// Makes `[addr, addr+size)` inaccessible and returns the physical pages
    /// to the OS.
    fn decommit(&self, addr: Address, size: usize) -> bool;

    /// Advises the OS the range's contents aren't needed without actually
    /// unmapping it; the range stays accessible.
    fn reset(&self, addr: Address, size: usize) -> bool;

    /// Reserves `pages` huge pages pinned to `numa_node` (or any node if
    /// negative), bailing out after `timeout_ms`. Returns the base address,
    /// the number of pages actually reserved and the huge page size.
    fn alloc_huge_pages(&self, pages: usize, numa_node: i32, timeout_ms: u64) -> Option<(Address, usize, usize)>;

    fn free_huge_pages(&self, addr: Address, size: usize);

    fn numa_node_count(&self) -> i32;

    fn numa_current(&self) -> i32;

    fn now_ms(&self) -> u64;

    /// Whether we're running under LD_PRELOAD-style interposition, in which
    /// case immediate purging is preferred over deferred purging (mirrors
    /// `preload`'s own always-eager-cleanup stance).
    fn preloading(&self) -> bool;
}

#[cfg(unix)]
pub struct UnixOsMemory;

#[cfg(unix)]
const HUGE_PAGE_SIZE: usize = 2 * 1024 * 1024;

#[cfg(unix)]
impl OsMemory for UnixOsMemory {
    fn alloc_aligned(&self, size: usize, align: usize, commit: bool) -> Option<(Address, bool)> {
        let prot = if commit {
            libc::PROT_READ | libc::PROT_WRITE
        } else {
            libc::PROT_NONE
        };

        unsafe {
            let over_size = size + align;
            let raw = libc::mmap(
                std::ptr::null_mut(),
                over_size,
                prot,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            );
            if raw == libc::MAP_FAILED {
                return None;
            }

            let raw_addr = raw as usize;
            let aligned = (raw_addr + align - 1) / align * align;
            let head_slack = aligned - raw_addr;
            let tail_slack = over_size - head_slack - size;

            if head_slack > 0 {
                libc::munmap(raw, head_slack);
            }
            if tail_slack > 0 {
                libc::munmap((aligned + size) as *mut libc::c_void, tail_slack);
            }

            Some((aligned, true))
        }
    }

    fn free_aligned(&self, addr: Address, size: usize, _align: usize, _offset: usize, _committed: bool) {
        unsafe {
            libc::munmap(addr as *mut libc::c_void, size);
        }
    }

    fn commit(&self, addr: Address, size: usize) -> (bool, bool) {
        let result = unsafe {
            libc::mprotect(
                addr as *mut libc::c_void,
                size,
                libc::PROT_READ | libc::PROT_WRITE,
            )
        };
        // mprotect doesn't guarantee freshly-zeroed contents on recommit;
        // the dirty bitmap is what tracks that, not this return value.
        (result == 0, false)
    }

    fn decommit(&self, addr: Address, size: usize) -> bool {
        unsafe {
            libc::madvise(addr as *mut libc::c_void, size, libc::MADV_DONTNEED);
            libc::mprotect(addr as *mut libc::c_void, size, libc::PROT_NONE) == 0
        }
    }

    fn reset(&self, addr: Address, size: usize) -> bool {
        #[cfg(target_os = "linux")]
        let advice = libc::MADV_FREE;
        #[cfg(not(target_os = "linux"))]
        let advice = libc::MADV_DONTNEED;

        unsafe { libc::madvise(addr as *mut libc::c_void, size, advice) == 0 }
    }

    fn alloc_huge_pages(&self, pages: usize, _numa_node: i32, _timeout_ms: u64) -> Option<(Address, usize, usize)> {
        let size = pages * HUGE_PAGE_SIZE;
        unsafe {
            let raw = libc::mmap(
                std::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_HUGETLB,
                -1,
                0,
            );
            if raw == libc::MAP_FAILED {
                return None;
            }
            Some((raw as usize, pages, HUGE_PAGE_SIZE))
        }
    }

    fn free_huge_pages(&self, addr: Address, size: usize) {
        unsafe {
            libc::munmap(addr as *mut libc::c_void, size);
        }
    }

    fn numa_node_count(&self) -> i32 {
        // No libnuma binding in the dependency stack; treating the host as
        // single-node is a conservative simplification.
        1
    }

    fn numa_current(&self) -> i32 {
        -1
    }

    fn now_ms(&self) -> u64 {
        unsafe {
            let mut ts = std::mem::zeroed::<libc::timespec>();
            libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
            (ts.tv_sec as u64) * 1000 + (ts.tv_nsec as u64) / 1_000_000
        }
    }

    fn preloading(&self) -> bool {
        false
    }
}
