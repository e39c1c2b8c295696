//! Heap accounting.
//!
//! [`CountingAllocator`] wraps the system allocator and keeps two global
//! counters: live bytes and live blocks. The binary installs it as the
//! global allocator so the `info` command can report memory use; when it is
//! not installed, [`usage`] reports zeros.
//!
//! ```rust,ignore
//! #[global_allocator]
//! static GLOBAL: cmdbus::alloc::CountingAllocator = cmdbus::alloc::CountingAllocator;
//! ```

use std::alloc::{GlobalAlloc, Layout, System};
use std::sync::atomic::{AtomicU64, Ordering};

/// Cache-line padded so the two counters never share a line.
#[repr(align(64))]
struct PaddedAtomicU64(AtomicU64);

impl PaddedAtomicU64 {
    const fn new(v: u64) -> Self {
        Self(AtomicU64::new(v))
    }
}

static USED_BYTES: PaddedAtomicU64 = PaddedAtomicU64::new(0);
static USED_BLOCKS: PaddedAtomicU64 = PaddedAtomicU64::new(0);

/// Live heap usage at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemoryUsage {
    pub bytes: u64,
    pub blocks: u64,
}

/// Reads the counters maintained by [`CountingAllocator`].
pub fn usage() -> MemoryUsage {
    MemoryUsage {
        bytes: USED_BYTES.0.load(Ordering::Relaxed),
        blocks: USED_BLOCKS.0.load(Ordering::Relaxed),
    }
}

/// System allocator that tracks live bytes and blocks.
pub struct CountingAllocator;

unsafe impl GlobalAlloc for CountingAllocator {
    #[inline]
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = System.alloc(layout);
        if !ptr.is_null() {
            USED_BYTES.0.fetch_add(layout.size() as u64, Ordering::Relaxed);
            USED_BLOCKS.0.fetch_add(1, Ordering::Relaxed);
        }
        ptr
    }

    #[inline]
    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let ptr = System.alloc_zeroed(layout);
        if !ptr.is_null() {
            USED_BYTES.0.fetch_add(layout.size() as u64, Ordering::Relaxed);
            USED_BLOCKS.0.fetch_add(1, Ordering::Relaxed);
        }
        ptr
    }

    #[inline]
    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        System.dealloc(ptr, layout);
        USED_BYTES.0.fetch_sub(layout.size() as u64, Ordering::Relaxed);
        USED_BLOCKS.0.fetch_sub(1, Ordering::Relaxed);
    }

    #[inline]
    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let new_ptr = System.realloc(ptr, layout, new_size);
        if !new_ptr.is_null() {
            let old = layout.size() as u64;
            let new = new_size as u64;
            if new >= old {
                USED_BYTES.0.fetch_add(new - old, Ordering::Relaxed);
            } else {
                USED_BYTES.0.fetch_sub(old - new, Ordering::Relaxed);
            }
        }
        new_ptr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_direct_allocations() {
        let alloc = CountingAllocator;
        let layout = Layout::from_size_align(128, 8).unwrap();

        // Other tests run concurrently, so only check our own contribution
        // through a block we hold while reading.
        unsafe {
            let ptr = alloc.alloc(layout);
            assert!(!ptr.is_null());
            assert!(usage().bytes >= 128);
            assert!(usage().blocks >= 1);

            let ptr = alloc.realloc(ptr, layout, 256);
            assert!(!ptr.is_null());
            assert!(usage().bytes >= 256);

            alloc.dealloc(ptr, Layout::from_size_align(256, 8).unwrap());
        }
    }
}
