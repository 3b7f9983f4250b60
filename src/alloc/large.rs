//! Large-object heap allocator (spec.md §3.3, §4.2.1): objects at or
//! above `large_object_threshold` bypass the bump-pointer ephemeral path
//! entirely and are threaded through a dedicated, coarser-grained free
//! list backed by the heap's large segments. Not compacted by default
//! (§1 non-goals) — only swept.

use std::sync::Mutex;

use crate::alloc::free_list::FreeList;
use crate::error::Result;
use crate::heap::{GenId, Heap};

/// LOH free lists use fewer, wider buckets than the small-object heap:
/// large allocations are comparatively rare, so bucket granularity matters
/// less than keeping lock-held time short.
const LOH_BUCKETS: usize = 8;
const LOH_FIRST_BUCKET: usize = 4096;

pub struct LargeObjectAllocator {
    free_list: Mutex<FreeList>,
    threshold: usize,
}

impl LargeObjectAllocator {
    pub fn new(large_object_threshold: usize) -> Self {
        Self {
            free_list: Mutex::new(FreeList::new(LOH_BUCKETS, LOH_FIRST_BUCKET)),
            threshold: large_object_threshold,
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn is_large(&self, size: usize) -> bool {
        size >= self.threshold
    }

    /// Allocate `size` bytes: try the free list first, else grow the LOH
    /// by pushing a new large segment sized to fit (spec.md §4.2.1).
    pub fn allocate(&self, heap: &Heap, size: usize) -> Result<usize> {
        let size = align_up(size, 8);
        {
            let mut fl = self.free_list.lock().unwrap();
            if let Some(addr) = fl.allocate_fit(size) {
                heap.stats_for(GenId::Loh).record_allocation(size);
                return Ok(addr);
            }
        }
        heap.push_large_segment(size)?;
        let addr = heap.with_large_segments(|segs| {
            segs.last().expect("segment just pushed").bump_allocated(size)
        })?;
        heap.stats_for(GenId::Loh).record_allocation(size);
        Ok(addr)
    }

    /// Return a swept block to the free list for reuse by later LOH
    /// allocations (spec.md §4.4.3 "LOH sweep").
    pub fn reclaim(&self, addr: usize, size: usize) {
        self.free_list.lock().unwrap().thread(addr, align_up(size, 8));
    }

    pub fn with_free_list<R>(&self, f: impl FnOnce(&mut FreeList) -> R) -> R {
        f(&mut self.free_list.lock().unwrap())
    }
}

fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GcConfig;

    fn test_heap() -> Heap {
        Heap::new(0, &GcConfig { heap_segment_size: 4 * 1024 * 1024, ..Default::default() }).unwrap()
    }

    #[test]
    fn allocate_then_reclaim_then_reuse() {
        let heap = test_heap();
        let loh = LargeObjectAllocator::new(85_000);
        let a = loh.allocate(&heap, 100_000).unwrap();
        loh.reclaim(a, 100_000);
        let b = loh.allocate(&heap, 100_000).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn is_large_respects_threshold() {
        let loh = LargeObjectAllocator::new(85_000);
        assert!(!loh.is_large(1000));
        assert!(loh.is_large(85_000));
    }
}
