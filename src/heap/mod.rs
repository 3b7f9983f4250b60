//! Segmented heap: owns the address ranges holding managed objects, grows
//! and shrinks them, and exposes iteration to the collector (spec.md
//! §4.2).

pub mod frozen;
pub mod generation;
pub mod segment;
pub mod virtual_memory;

use std::sync::atomic::Ordering;
use std::sync::RwLock;

use crate::config::GcConfig;
use crate::error::{GcError, Result};
use crate::object::header::{ObjectHeader, MIN_OBJECT_SIZE};
use crate::object::refmap::TypeDescHandle;

pub use frozen::{FrozenHandle, FrozenRegistry, FrozenSegmentInfo};
pub use generation::{GenId, GenerationStats};
pub use segment::{Segment, SegmentKind};
pub use virtual_memory::VirtualMemory;

/// One heap instance: a segment-owning allocator for gen 0/1 (ephemeral),
/// gen 2 (mature), and the large-object heap, plus the frozen-segment
/// registry. In server mode one `Heap` exists per logical processor
/// (§4.6 "server mode"); in workstation mode exactly one exists.
pub struct Heap {
    pub id: usize,
    ephemeral: RwLock<Vec<Segment>>,
    mature: RwLock<Vec<Segment>>,
    large: RwLock<Vec<Segment>>,
    pub frozen: FrozenRegistry,
    pub stats: [GenerationStats; 4],
    segment_size: usize,
    allocation_quantum: usize,
}

impl Heap {
    pub fn new(id: usize, config: &GcConfig) -> Result<Self> {
        let segment = Segment::reserve(config.heap_segment_size, SegmentKind::Ephemeral)?;
        let gen0_budget = config.allocation_quantum * 4;
        Ok(Self {
            id,
            ephemeral: RwLock::new(vec![segment]),
            mature: RwLock::new(Vec::new()),
            large: RwLock::new(Vec::new()),
            frozen: FrozenRegistry::new(),
            stats: [
                GenerationStats::new(gen0_budget),
                GenerationStats::new(gen0_budget * 4),
                GenerationStats::new(config.max_heap_size / 4),
                GenerationStats::new(config.max_heap_size / 8),
            ],
            segment_size: config.heap_segment_size,
            allocation_quantum: config.allocation_quantum,
        })
    }

    pub fn stats_for(&self, gen: GenId) -> &GenerationStats {
        &self.stats[gen.index()]
    }

    /// Configured allocation-context refill cap (spec.md §4.1 "allocation
    /// quantum"), read by `AllocationContext::refill`'s geometric schedule.
    pub fn allocation_quantum(&self) -> usize {
        self.allocation_quantum
    }

    /// Reserve a new `[alloc_ptr, alloc_limit)` window of `len` bytes from
    /// the ephemeral segment list for an allocation context's refill
    /// (spec.md §4.1 `refill`), growing the segment list if the current
    /// tail segment cannot satisfy it.
    pub fn reserve_ephemeral_window(&self, len: usize) -> Result<(usize, usize)> {
        {
            let segments = self.ephemeral.read().unwrap();
            if let Some(seg) = segments.last() {
                if let Ok(start) = seg.bump_allocated(len) {
                    self.stats_for(GenId::Gen0).record_allocation(len);
                    return Ok((start, start + len));
                }
            }
        }
        // Current tail segment is exhausted: grow.
        let size = self.segment_size.max(len.next_power_of_two());
        let new_seg = Segment::reserve(size, SegmentKind::Ephemeral)?;
        let start = new_seg.bump_allocated(len)?;
        self.ephemeral.write().unwrap().push(new_seg);
        self.stats_for(GenId::Gen0).record_allocation(len);
        Ok((start, start + len))
    }

    pub fn push_large_segment(&self, size: usize) -> Result<()> {
        let seg = Segment::reserve(size.max(self.segment_size), SegmentKind::Large)?;
        self.large.write().unwrap().push(seg);
        Ok(())
    }

    pub fn with_large_segments<R>(&self, f: impl FnOnce(&[Segment]) -> R) -> R {
        let segments = self.large.read().unwrap();
        f(&segments)
    }

    pub fn with_mature_segments<R>(&self, f: impl FnOnce(&[Segment]) -> R) -> R {
        let segments = self.mature.read().unwrap();
        f(&segments)
    }

    pub fn push_mature_segment(&self, size: usize) -> Result<()> {
        let seg = Segment::reserve(size.max(self.segment_size), SegmentKind::Mature)?;
        self.mature.write().unwrap().push(seg);
        Ok(())
    }

    pub fn with_ephemeral_segments<R>(&self, f: impl FnOnce(&[Segment]) -> R) -> R {
        let segments = self.ephemeral.read().unwrap();
        f(&segments)
    }

    /// Which generation contains `address`, consulting ephemeral gen0/gen1
    /// boundaries, mature, large, and frozen segment lists in turn.
    pub fn which_generation(&self, address: usize) -> Option<GenId> {
        for seg in self.ephemeral.read().unwrap().iter() {
            if seg.contains(address) {
                return Some(if address < seg.gen1_end() { GenId::Gen1 } else { GenId::Gen0 });
            }
        }
        if self.mature.read().unwrap().iter().any(|s| s.contains(address)) {
            return Some(GenId::Gen2);
        }
        if self.large.read().unwrap().iter().any(|s| s.contains(address)) {
            return Some(GenId::Loh);
        }
        None
    }

    pub fn is_ephemeral(&self, address: usize) -> bool {
        matches!(self.which_generation(address), Some(GenId::Gen0) | Some(GenId::Gen1))
    }

    pub fn is_heap_pointer(&self, address: usize) -> bool {
        if self.which_generation(address).is_some() {
            return true;
        }
        let mut found = false;
        self.frozen.for_each(|base, _first, end| {
            if address >= base && address < end {
                found = true;
            }
        });
        found
    }

    /// Install the final object header and, if the type may contain
    /// references, issue a store fence so a concurrent marker observes a
    /// well-formed object (spec.md §4.2.4).
    pub fn publish(&self, address: usize, type_desc: TypeDescHandle, size: usize, may_contain_refs: bool) -> Result<()> {
        if size < MIN_OBJECT_SIZE {
            return Err(GcError::InvalidArgument(format!(
                "object size {size} below minimum {MIN_OBJECT_SIZE}"
            )));
        }
        unsafe {
            let header_ptr = address as *mut ObjectHeader;
            header_ptr.write(ObjectHeader::new(type_desc, size));
        }
        if may_contain_refs {
            std::sync::atomic::fence(Ordering::Release);
        }
        Ok(())
    }

    /// Lowest address across every owned (non-frozen) segment; part of
    /// the process-wide state published at `initialize` (spec.md §6.3).
    pub fn lowest_address(&self) -> usize {
        self.ephemeral
            .read()
            .unwrap()
            .first()
            .map(Segment::base)
            .unwrap_or(0)
    }

    pub fn highest_address(&self) -> usize {
        let mature_max = self.mature.read().unwrap().iter().map(Segment::reserved_end).max();
        let eph_max = self.ephemeral.read().unwrap().iter().map(Segment::reserved_end).max();
        let large_max = self.large.read().unwrap().iter().map(Segment::reserved_end).max();
        [mature_max, eph_max, large_max].into_iter().flatten().max().unwrap_or(0)
    }

    pub fn ephemeral_range(&self) -> (usize, usize) {
        let segments = self.ephemeral.read().unwrap();
        let lo = segments.first().map(Segment::base).unwrap_or(0);
        let hi = segments.last().map(Segment::allocated_end).unwrap_or(0);
        (lo, hi)
    }
}

/// Sealed variant over workstation (one shared heap) and server (one heap
/// instance per logical processor, joined at phase transitions) topology,
/// per SPEC_FULL.md §9's "dynamic dispatch over heap variants" design note.
pub enum HeapTopology {
    Workstation(Heap),
    Server(Vec<Heap>),
}

impl HeapTopology {
    pub fn new(config: &GcConfig) -> Result<Self> {
        if config.server_gc {
            let n = num_cpus::get().max(1);
            let heaps: Result<Vec<Heap>> = (0..n).map(|i| Heap::new(i, config)).collect();
            Ok(HeapTopology::Server(heaps?))
        } else {
            Ok(HeapTopology::Workstation(Heap::new(0, config)?))
        }
    }

    pub fn heaps(&self) -> &[Heap] {
        match self {
            HeapTopology::Workstation(h) => std::slice::from_ref(h),
            HeapTopology::Server(hs) => hs,
        }
    }

    pub fn home_heap(&self, id: usize) -> &Heap {
        match self {
            HeapTopology::Workstation(h) => h,
            HeapTopology::Server(hs) => &hs[id % hs.len()],
        }
    }

    pub fn which_generation(&self, address: usize) -> Option<GenId> {
        self.heaps().iter().find_map(|h| h.which_generation(address))
    }

    pub fn is_heap_pointer(&self, address: usize) -> bool {
        self.heaps().iter().any(|h| h.is_heap_pointer(address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> GcConfig {
        GcConfig {
            heap_segment_size: 4 * 1024 * 1024,
            ..Default::default()
        }
    }

    #[test]
    fn reserve_window_stays_within_segment() {
        let heap = Heap::new(0, &test_config()).unwrap();
        let (start, end) = heap.reserve_ephemeral_window(4096).unwrap();
        assert_eq!(end - start, 4096);
        assert!(heap.is_ephemeral(start));
    }

    #[test]
    fn which_generation_none_outside_heap() {
        let heap = Heap::new(0, &test_config()).unwrap();
        assert_eq!(heap.which_generation(0xdead_beef), None);
    }

    #[test]
    fn workstation_topology_has_one_heap() {
        let config = test_config();
        let topo = HeapTopology::new(&config).unwrap();
        assert_eq!(topo.heaps().len(), 1);
    }
}
