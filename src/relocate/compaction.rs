//! Compact phase (spec.md §4.4.2 step 5, moving regions): physically
//! slide each planned survivor into its new home and shrink the
//! segment's allocated-end to reclaim the freed tail. Runs after the
//! relocate phase has already fixed up every outstanding reference, so
//! by the time a move happens here nothing still points at the old
//! address.

use crate::relocate::plan::{PlanStats, PlannedMove};
use crate::heap::segment::Segment;
use crate::object::header::ObjectHeader;

#[derive(Debug, Default, Clone, Copy)]
pub struct CompactStats {
    pub objects_copied: usize,
    pub bytes_copied: usize,
}

/// Apply `moves` (as produced by `plan::plan_segment`, in ascending
/// address order) to `segment`: memmove each survivor to its planned
/// address, clear its mark/forwarding state for the next cycle, then
/// shrink the segment's allocated-end to `plan_stats.new_allocated_end`.
///
/// Uses `ptr::copy` rather than `copy_nonoverlapping`: a slide distance
/// smaller than the object's own size means source and destination
/// ranges overlap.
pub fn compact_segment(segment: &Segment, moves: &[PlannedMove], plan_stats: &PlanStats) -> CompactStats {
    let mut stats = CompactStats::default();

    for mv in moves {
        unsafe {
            std::ptr::copy(mv.old_address as *const u8, mv.new_address as *mut u8, mv.size);
            let moved_header = &*(mv.new_address as *const ObjectHeader);
            moved_header.reset_for_next_cycle();
        }
        stats.objects_copied += 1;
        stats.bytes_copied += mv.size;
    }

    segment.set_allocated_end(plan_stats.new_allocated_end);
    stats
}

/// Clear mark/forwarding state on every pinned (not-moved) survivor,
/// which `compact_segment` never touches since it only iterates `moves`.
pub fn reset_pinned(pinned_addresses: &[usize]) {
    for &addr in pinned_addresses {
        let header = unsafe { &*(addr as *const ObjectHeader) };
        header.reset_for_next_cycle();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::segment::SegmentKind;
    use crate::object::refmap::TypeDescHandle;
    use crate::relocate::plan::plan_segment;
    use std::collections::HashSet;

    #[test]
    fn compacts_gap_and_shrinks_allocated_end() {
        let segment = Segment::reserve(4 * 1024 * 1024, SegmentKind::Mature).unwrap();
        let a = segment.bump_allocated(32).unwrap();
        let dead = segment.bump_allocated(32).unwrap();
        let b = segment.bump_allocated(32).unwrap();

        unsafe {
            (a as *mut ObjectHeader).write(ObjectHeader::new(TypeDescHandle::new(1), 32));
            (dead as *mut ObjectHeader).write(ObjectHeader::new(TypeDescHandle::new(1), 32));
            (b as *mut ObjectHeader).write(ObjectHeader::new(TypeDescHandle::new(1), 32));
            let payload = b + std::mem::size_of::<ObjectHeader>();
            *(payload as *mut usize) = 0xFEED;
        }
        unsafe { &*(a as *const ObjectHeader) }.try_mark();
        unsafe { &*(b as *const ObjectHeader) }.try_mark();

        let (moves, plan_stats) = plan_segment(&segment, &HashSet::new());
        let compact_stats = compact_segment(&segment, &moves, &plan_stats);

        assert_eq!(compact_stats.objects_copied, 1);
        assert_eq!(segment.allocated_end(), a + 64);
        let moved_payload = unsafe { *((a + 32 + std::mem::size_of::<ObjectHeader>()) as *const usize) };
        assert_eq!(moved_payload, 0xFEED);
        let moved_header = unsafe { &*((a + 32) as *const ObjectHeader) };
        assert!(!moved_header.is_marked(std::sync::atomic::Ordering::Relaxed));
    }
}
