//! Plan phase (spec.md §4.4.2 step 3): compute new addresses for
//! surviving objects in a compacting segment. Pinned objects anchor gaps;
//! runs of movable survivors between pins slide down to close the space
//! left by intervening garbage. Forwarding offsets are written directly
//! into each survivor's mark word (`ObjectHeader::set_forwarding_offset`)
//! so the relocate phase can fix up references without a side table.

use std::collections::HashSet;
use std::sync::atomic::Ordering;

use crate::heap::segment::Segment;
use crate::object::header::ObjectHeader;

#[derive(Debug, Clone, Copy)]
pub struct PlannedMove {
    pub old_address: usize,
    pub new_address: usize,
    pub size: usize,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PlanStats {
    pub objects_planned: usize,
    pub objects_moved: usize,
    pub objects_pinned: usize,
    pub bytes_reclaimed: usize,
    /// Where the segment's allocated-end will sit once the compact phase
    /// physically slides every planned move into place.
    pub new_allocated_end: usize,
}

/// Walk `segment` from its first object to its allocated end in address
/// order, deciding a new address for every live object. `pinned` holds
/// the addresses of objects anchored by a pinning handle or an interior
/// stack pointer (spec.md §4.4.2 "Pinned objects ... anchor gaps"); they
/// keep their current address and reset the slide cursor behind them.
pub fn plan_segment(segment: &Segment, pinned: &HashSet<usize>) -> (Vec<PlannedMove>, PlanStats) {
    let mut moves = Vec::new();
    let mut stats = PlanStats::default();
    let mut cursor = segment.first_object();
    let mut next_free = segment.first_object();

    while cursor < segment.allocated_end() {
        let header = unsafe { &*(cursor as *const ObjectHeader) };
        let size = header.size();

        if header.is_marked(Ordering::Acquire) {
            stats.objects_planned += 1;
            if pinned.contains(&cursor) {
                stats.objects_pinned += 1;
                next_free = cursor + size;
            } else {
                if next_free != cursor {
                    header.set_forwarding_offset(next_free - cursor);
                    moves.push(PlannedMove { old_address: cursor, new_address: next_free, size });
                    stats.objects_moved += 1;
                }
                next_free += size;
            }
        } else {
            stats.bytes_reclaimed += size;
        }

        cursor += size;
    }

    stats.new_allocated_end = next_free;
    (moves, stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::segment::SegmentKind;
    use crate::object::refmap::TypeDescHandle;

    fn write_header(addr: usize, size: usize, marked: bool) {
        unsafe {
            (addr as *mut ObjectHeader).write(ObjectHeader::new(TypeDescHandle::new(1), size));
        }
        if marked {
            let header = unsafe { &*(addr as *const ObjectHeader) };
            header.try_mark();
        }
    }

    #[test]
    fn slides_survivors_over_a_dead_gap() {
        let segment = Segment::reserve(4 * 1024 * 1024, SegmentKind::Mature).unwrap();
        let a = segment.bump_allocated(32).unwrap();
        let dead = segment.bump_allocated(32).unwrap();
        let b = segment.bump_allocated(32).unwrap();

        write_header(a, 32, true);
        write_header(dead, 32, false);
        write_header(b, 32, true);

        let (moves, stats) = plan_segment(&segment, &Default::default());
        assert_eq!(stats.objects_planned, 2);
        assert_eq!(stats.bytes_reclaimed, 32);
        assert_eq!(moves.len(), 1);
        assert_eq!(moves[0].old_address, b);
        assert_eq!(moves[0].new_address, a + 32);
    }

    #[test]
    fn pinned_object_anchors_the_gap() {
        let segment = Segment::reserve(4 * 1024 * 1024, SegmentKind::Mature).unwrap();
        let dead = segment.bump_allocated(32).unwrap();
        let pinned = segment.bump_allocated(32).unwrap();
        let tail = segment.bump_allocated(32).unwrap();

        write_header(dead, 32, false);
        write_header(pinned, 32, true);
        write_header(tail, 32, true);

        let mut pins = HashSet::new();
        pins.insert(pinned);

        let (moves, stats) = plan_segment(&segment, &pins);
        assert_eq!(stats.objects_pinned, 1);
        assert_eq!(moves.len(), 1);
        assert_eq!(moves[0].old_address, tail);
        assert_eq!(moves[0].new_address, pinned + 32);
    }
}
