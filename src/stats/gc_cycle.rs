//! Per-cycle GC statistics (SPEC_FULL.md §4.4.2 Expansion): phase timings
//! and object/byte counts for one blocking or background collection,
//! plus a rolling aggregate across the process lifetime.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Timings and counts for a single collection, covering both the short
/// blocking cycle (spec.md §4.4.2) and a background cycle's longer
/// concurrent phases (§4.6).
#[derive(Debug, Clone, Default)]
pub struct GcCycleStats {
    pub cycle_id: u64,
    pub condemned_generation: u8,
    pub is_background: bool,

    /// Time mutators were fully suspended, start to finish of this cycle's
    /// stop-the-world window(s).
    pub suspend_ns: u64,
    pub mark_roots_ns: u64,
    pub mark_ns: u64,
    pub plan_ns: u64,
    pub relocate_ns: u64,
    pub sweep_ns: u64,

    pub heap_used_before: usize,
    pub heap_used_after: usize,
    pub heap_committed: usize,
    pub memory_reclaimed: usize,

    pub objects_scanned: u64,
    pub objects_marked: u64,
    pub objects_relocated: u64,
    pub objects_swept: u64,
    pub bytes_promoted: usize,

    pub gc_threads_used: usize,

    pub completed: bool,
    pub failed: bool,
    pub failure_reason: Option<String>,
}

impl GcCycleStats {
    pub fn new(cycle_id: u64, condemned_generation: u8) -> Self {
        Self { cycle_id, condemned_generation, ..Default::default() }
    }

    pub fn total_pause_ns(&self) -> u64 {
        self.suspend_ns + self.mark_roots_ns + self.plan_ns + self.relocate_ns + self.sweep_ns
    }

    pub fn total_concurrent_ns(&self) -> u64 {
        self.mark_ns
    }

    pub fn total_cycle_ns(&self) -> u64 {
        self.total_pause_ns() + self.total_concurrent_ns()
    }

    pub fn pause_time_percent(&self) -> f64 {
        let total = self.total_cycle_ns() as f64;
        if total == 0.0 {
            0.0
        } else {
            (self.total_pause_ns() as f64 / total) * 100.0
        }
    }
}

/// Rolling aggregate and bounded history of completed cycles, consulted by
/// the condemned-generation heuristic (spec.md §4.4.1) and exposed to the
/// VM through `GcCallbacks`-adjacent query APIs.
pub struct GcStatsCollector {
    current_cycle: RwLock<Option<GcCycleStats>>,
    history: RwLock<Vec<GcCycleStats>>,
    max_history: usize,

    total_cycles: AtomicU64,
    total_pause_ns: AtomicU64,
    total_concurrent_ns: AtomicU64,
    total_objects_marked: AtomicU64,
    total_objects_relocated: AtomicU64,
    total_memory_reclaimed: AtomicUsize,

    peak_heap_used: AtomicUsize,
    peak_pause_ns: AtomicU64,
}

impl GcStatsCollector {
    pub fn new(max_history: usize) -> Self {
        Self {
            current_cycle: RwLock::new(None),
            history: RwLock::new(Vec::with_capacity(max_history)),
            max_history,
            total_cycles: AtomicU64::new(0),
            total_pause_ns: AtomicU64::new(0),
            total_concurrent_ns: AtomicU64::new(0),
            total_objects_marked: AtomicU64::new(0),
            total_objects_relocated: AtomicU64::new(0),
            total_memory_reclaimed: AtomicUsize::new(0),
            peak_heap_used: AtomicUsize::new(0),
            peak_pause_ns: AtomicU64::new(0),
        }
    }

    pub fn start_cycle(&self, cycle_id: u64, condemned_generation: u8) {
        *self.current_cycle.write() = Some(GcCycleStats::new(cycle_id, condemned_generation));
    }

    pub fn with_current(&self, f: impl FnOnce(&mut GcCycleStats)) {
        if let Some(stats) = self.current_cycle.write().as_mut() {
            f(stats);
        }
    }

    pub fn end_cycle(&self) -> Option<GcCycleStats> {
        let stats = self.current_cycle.write().take()?;

        self.total_cycles.fetch_add(1, Ordering::Relaxed);
        self.total_pause_ns.fetch_add(stats.total_pause_ns(), Ordering::Relaxed);
        self.total_concurrent_ns.fetch_add(stats.total_concurrent_ns(), Ordering::Relaxed);
        self.total_objects_marked.fetch_add(stats.objects_marked, Ordering::Relaxed);
        self.total_objects_relocated.fetch_add(stats.objects_relocated, Ordering::Relaxed);
        self.total_memory_reclaimed.fetch_add(stats.memory_reclaimed, Ordering::Relaxed);

        self.peak_heap_used.fetch_max(stats.heap_used_after, Ordering::Relaxed);
        self.peak_pause_ns.fetch_max(stats.total_pause_ns(), Ordering::Relaxed);

        let mut history = self.history.write();
        if history.len() >= self.max_history {
            history.remove(0);
        }
        history.push(stats.clone());

        Some(stats)
    }

    pub fn current_cycle(&self) -> Option<GcCycleStats> {
        self.current_cycle.read().clone()
    }

    pub fn get_aggregated(&self) -> AggregatedStats {
        let cycles = self.total_cycles.load(Ordering::Relaxed);
        AggregatedStats {
            total_cycles: cycles,
            total_pause_ns: self.total_pause_ns.load(Ordering::Relaxed),
            total_concurrent_ns: self.total_concurrent_ns.load(Ordering::Relaxed),
            total_objects_marked: self.total_objects_marked.load(Ordering::Relaxed),
            total_objects_relocated: self.total_objects_relocated.load(Ordering::Relaxed),
            total_memory_reclaimed: self.total_memory_reclaimed.load(Ordering::Relaxed),
            avg_pause_ns: if cycles > 0 { self.total_pause_ns.load(Ordering::Relaxed) / cycles } else { 0 },
            peak_heap_used: self.peak_heap_used.load(Ordering::Relaxed),
            peak_pause_ns: self.peak_pause_ns.load(Ordering::Relaxed),
        }
    }

    pub fn get_history(&self) -> Vec<GcCycleStats> {
        self.history.read().clone()
    }
}

#[derive(Debug, Clone, Default)]
pub struct AggregatedStats {
    pub total_cycles: u64,
    pub total_pause_ns: u64,
    pub total_concurrent_ns: u64,
    pub total_objects_marked: u64,
    pub total_objects_relocated: u64,
    pub total_memory_reclaimed: usize,
    pub avg_pause_ns: u64,
    pub peak_heap_used: usize,
    pub peak_pause_ns: u64,
}

impl AggregatedStats {
    pub fn avg_pause_ms(&self) -> f64 {
        self.avg_pause_ns as f64 / 1_000_000.0
    }

    pub fn peak_pause_ms(&self) -> f64 {
        self.peak_pause_ns as f64 / 1_000_000.0
    }

    pub fn peak_heap_mb(&self) -> f64 {
        self.peak_heap_used as f64 / (1024.0 * 1024.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_stats_sum_phases() {
        let mut stats = GcCycleStats::new(1, 0);
        stats.suspend_ns = 50_000;
        stats.mark_roots_ns = 100_000;
        stats.mark_ns = 1_000_000;
        assert_eq!(stats.total_pause_ns(), 150_000);
        assert_eq!(stats.total_cycle_ns(), 1_150_000);
    }

    #[test]
    fn collector_tracks_history_and_aggregate() {
        let collector = GcStatsCollector::new(4);
        collector.start_cycle(1, 0);
        collector.with_current(|s| {
            s.objects_marked = 1000;
            s.memory_reclaimed = 4096;
            s.suspend_ns = 10_000;
        });
        collector.end_cycle();

        let agg = collector.get_aggregated();
        assert_eq!(agg.total_cycles, 1);
        assert_eq!(agg.total_objects_marked, 1000);
        assert_eq!(collector.get_history().len(), 1);
    }
}
