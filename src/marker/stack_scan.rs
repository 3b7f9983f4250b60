//! Conservative thread-stack scanning (spec.md §4.4.2 step 2): at a
//! stop-the-world safepoint, every registered mutator stack is walked
//! word-by-word and any word that looks like a heap pointer is treated as
//! a root. This is necessarily conservative — the collector has no type
//! information for stack slots — so candidates are validated against
//! `Heap::is_heap_pointer` before being trusted, and a validated pointer
//! is implicitly pinned for the cycle (spec.md §3.1 "pinning").

use crate::heap::HeapTopology;
use crate::marker::object_scanner::scan_conservative;

#[derive(Debug, Clone, Copy)]
pub struct StackRange {
    pub thread_id: u64,
    pub low: usize,
    pub high: usize,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct StackScanStats {
    pub words_scanned: u64,
    pub candidates_found: u64,
    pub confirmed_roots: u64,
}

/// Scan every range in `stacks`, validating each non-null word against
/// `topology` and invoking `visit` only for confirmed heap pointers.
pub fn scan_stacks(
    stacks: &[StackRange],
    topology: &HeapTopology,
    mut visit: impl FnMut(usize),
) -> StackScanStats {
    let mut stats = StackScanStats::default();
    for range in stacks {
        let (low, high) = (range.low.min(range.high), range.low.max(range.high));
        stats.words_scanned += ((high - low) / 8) as u64;
        scan_conservative(low, high, &mut |_slot, value| {
            stats.candidates_found += 1;
            if topology.is_heap_pointer(value) {
                stats.confirmed_roots += 1;
                visit(value);
            }
        });
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GcConfig;

    #[test]
    fn rejects_non_heap_words() {
        let topo = HeapTopology::new(&GcConfig { heap_segment_size: 4 * 1024 * 1024, ..Default::default() }).unwrap();
        let mut buf = [0x1234usize, 0xdead_beef, 0];
        let low = buf.as_mut_ptr() as usize;
        let high = low + std::mem::size_of_val(&buf);
        let mut found = Vec::new();
        let stats = scan_stacks(&[StackRange { thread_id: 1, low, high }], &topo, |v| found.push(v));
        assert!(found.is_empty());
        assert_eq!(stats.confirmed_roots, 0);
        assert!(stats.candidates_found >= 2);
    }
}
