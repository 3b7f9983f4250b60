//! Gen 2 (mature-generation) allocator (spec.md §4.3): the destination
//! for objects promoted out of gen 1, and the free list that a
//! non-compacting gen-2 sweep threads its reclaimed ranges onto.

use std::sync::Mutex;

use crate::alloc::free_list::FreeList;
use crate::error::Result;
use crate::heap::{GenId, Heap};

const MATURE_BUCKETS: usize = 12;
const MATURE_FIRST_BUCKET: usize = 64;

pub struct MatureAllocator {
    free_list: Mutex<FreeList>,
}

impl MatureAllocator {
    pub fn new() -> Self {
        Self { free_list: Mutex::new(FreeList::new(MATURE_BUCKETS, MATURE_FIRST_BUCKET)) }
    }

    /// Allocate `size` bytes for a promoted or directly-allocated gen-2
    /// object: try the free list first, else grow the mature segment list.
    pub fn allocate(&self, heap: &Heap, size: usize) -> Result<usize> {
        let size = align_up(size, 8);
        {
            let mut fl = self.free_list.lock().unwrap();
            if let Some(addr) = fl.allocate_fit(size) {
                heap.stats_for(GenId::Gen2).record_allocation(size);
                return Ok(addr);
            }
        }
        let fallback_segment_size = size.next_power_of_two().max(4 * 1024 * 1024);
        heap.push_mature_segment(fallback_segment_size)?;
        let addr = heap.with_mature_segments(|segs| {
            segs.last().expect("segment just pushed").bump_allocated(size)
        })?;
        heap.stats_for(GenId::Gen2).record_allocation(size);
        Ok(addr)
    }

    /// Return a swept block to the free list for reuse (spec.md §4.4.2
    /// step 5 "Sweep: ... coalesce adjacent dead ranges into free-list
    /// entries").
    pub fn reclaim(&self, addr: usize, size: usize) {
        self.free_list.lock().unwrap().thread(addr, align_up(size, 8));
    }

    pub fn with_free_list<R>(&self, f: impl FnOnce(&mut FreeList) -> R) -> R {
        f(&mut self.free_list.lock().unwrap())
    }
}

impl Default for MatureAllocator {
    fn default() -> Self {
        Self::new()
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
        let mature = MatureAllocator::new();
        let a = mature.allocate(&heap, 256).unwrap();
        mature.reclaim(a, 256);
        let b = mature.allocate(&heap, 256).unwrap();
        assert_eq!(a, b);
    }
}
