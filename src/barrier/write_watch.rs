//! Write-watch tracking (spec.md §4.6): a coarser, segment-granularity
//! cousin of the card table used by the background collector to find
//! pages dirtied by mutators while a concurrent mark is between
//! snapshots, without walking every card.

use std::collections::HashSet;
use std::sync::Mutex;

/// Tracks dirtied page-aligned spans by page index. `reset` is called at
/// the start of each background-collection cycle (`BgcState::ResetWriteWatch`).
pub struct WriteWatch {
    page_size: usize,
    dirty_pages: Mutex<HashSet<usize>>,
    enabled: bool,
}

impl WriteWatch {
    pub fn new(page_size: usize, enabled: bool) -> Self {
        Self { page_size, dirty_pages: Mutex::new(HashSet::new()), enabled }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn touch(&self, address: usize) {
        if !self.enabled {
            return;
        }
        let page = address / self.page_size;
        self.dirty_pages.lock().unwrap().insert(page);
    }

    pub fn reset(&self) {
        self.dirty_pages.lock().unwrap().clear();
    }

    /// Dirty page base addresses since the last reset, sorted for
    /// deterministic revisit ordering.
    pub fn dirty_ranges(&self) -> Vec<(usize, usize)> {
        let pages = self.dirty_pages.lock().unwrap();
        let mut sorted: Vec<usize> = pages.iter().copied().collect();
        sorted.sort_unstable();
        sorted
            .into_iter()
            .map(|page| (page * self.page_size, (page + 1) * self.page_size))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn touch_then_reset() {
        let ww = WriteWatch::new(4096, true);
        ww.touch(0x1000);
        ww.touch(0x1800);
        assert_eq!(ww.dirty_ranges(), vec![(0x1000, 0x2000)]);
        ww.reset();
        assert!(ww.dirty_ranges().is_empty());
    }

    #[test]
    fn disabled_watch_ignores_touches() {
        let ww = WriteWatch::new(4096, false);
        ww.touch(0x1000);
        assert!(ww.dirty_ranges().is_empty());
    }
}
