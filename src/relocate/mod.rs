//! Relocation: the plan/relocate/compact-or-sweep sequence a condemned
//! generation goes through once marking finishes (spec.md §4.4.2 steps
//! 3–5).
//!
//! - **Plan** ([`plan`]) decides, for a compacting region, where every
//!   survivor will live.
//! - **Relocate** ([`forwarding`]) rewrites every outstanding reference —
//!   roots and interior pointers — to the planned address.
//! - **Compact** ([`compaction`]) or **Sweep** ([`sweep`]) then either
//!   physically slides survivors into place, or threads dead ranges onto
//!   a free list, depending on whether the region moves.

pub mod compaction;
pub mod forwarding;
pub mod plan;
pub mod sweep;

pub use compaction::{compact_segment, reset_pinned, CompactStats};
pub use forwarding::{fix_object_references, fix_roots, forwarded_address, relocate_references, RelocateStats};
pub use plan::{plan_segment, PlanStats, PlannedMove};
pub use sweep::{sweep_segment, SweepStats};

use std::collections::HashSet;

use crate::error::Result;
use crate::heap::segment::Segment;
use crate::heap::HeapTopology;
use crate::marker::roots::RootScanner;
use crate::object::refmap::TypeRegistry;

/// Outcome of running the full plan → relocate → compact sequence over
/// one segment.
#[derive(Debug, Default, Clone, Copy)]
pub struct CompactionReport {
    pub plan: PlanStats,
    pub relocate: RelocateStats,
    pub compact: CompactStats,
}

/// Drive one segment through the compacting path: plan new addresses,
/// fix up every reference (interior pointers across the whole segment
/// list the generation spans, plus roots), then physically compact.
/// `live_objects` is every surviving object address across the *entire*
/// condemned generation (not just this segment) so cross-segment
/// references are fixed along with intra-segment ones.
pub fn compact_segment_full(
    segment: &Segment,
    live_objects: &[usize],
    pinned: &HashSet<usize>,
    registry: &TypeRegistry,
    roots: &RootScanner,
    topology: &HeapTopology,
) -> Result<CompactionReport> {
    let (moves, plan_stats) = plan::plan_segment(segment, pinned);
    let relocate_stats = forwarding::relocate_references(live_objects, registry, roots, topology)?;
    let compact_stats = compaction::compact_segment(segment, &moves, &plan_stats);
    compaction::reset_pinned(&pinned.iter().copied().collect::<Vec<_>>());

    Ok(CompactionReport { plan: plan_stats, relocate: relocate_stats, compact: compact_stats })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GcConfig;
    use crate::heap::segment::SegmentKind;
    use crate::heap::Heap;
    use crate::object::header::ObjectHeader;
    use crate::object::refmap::{RefMap, TypeDesc};

    #[test]
    fn full_pipeline_moves_survivor_and_fixes_root() {
        let segment = Segment::reserve(4 * 1024 * 1024, SegmentKind::Mature).unwrap();
        let registry = TypeRegistry::new();
        let handle = registry.register(TypeDesc {
            instance_size: 32,
            fixed_refs: RefMap::default(),
            element: None,
            may_contain_refs: false,
            finalizable: false,
        });

        let survivor = segment.bump_allocated(32).unwrap();
        let dead = segment.bump_allocated(32).unwrap();
        let moved = segment.bump_allocated(32).unwrap();

        unsafe {
            (survivor as *mut ObjectHeader).write(ObjectHeader::new(handle, 32));
            (dead as *mut ObjectHeader).write(ObjectHeader::new(handle, 32));
            (moved as *mut ObjectHeader).write(ObjectHeader::new(handle, 32));
        }
        unsafe { &*(survivor as *const ObjectHeader) }.try_mark();
        unsafe { &*(moved as *const ObjectHeader) }.try_mark();

        let roots = RootScanner::new();
        let mut root_slot = moved;
        roots.register(&mut root_slot as *mut usize as usize, crate::marker::roots::RootType::Stack, false);

        let topology = HeapTopology::Workstation(Heap::new(0, &GcConfig { heap_segment_size: 4 * 1024 * 1024, ..Default::default() }).unwrap());

        let report = compact_segment_full(&segment, &[survivor, moved], &HashSet::new(), &registry, &roots, &topology).unwrap();

        assert_eq!(report.plan.objects_moved, 1);
        assert_eq!(report.compact.objects_copied, 1);
        assert_eq!(root_slot, survivor + 32);
        assert_eq!(segment.allocated_end(), survivor + 64);
    }
}
