//! Background (concurrent) collection (spec.md §4.6): a one-way state
//! machine driving a gen-2/LOH mark-and-sweep that runs mostly alongside
//! mutator threads, pausing them only for brief synchronization points,
//! plus the log of segment changes mutators make while the background
//! collector isn't looking.

pub mod threads;

pub use threads::{BgcWorkerPool, WorkerPoolStats};

use std::sync::atomic::{AtomicU8, Ordering};

/// Background GC state machine (spec.md §4.6). States advance strictly
/// forward within one cycle and never skip or go backward; the optional
/// overflow states are only entered when a concurrent mark stack overflow
/// forces a conservative full heap rescan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum BgcState {
    NotInProcess = 0,
    Initialized = 1,
    ResetWriteWatch = 2,
    MarkHandles = 3,
    MarkStack = 4,
    RevisitSoh = 5,
    RevisitLoh = 6,
    OverflowSoh = 7,
    OverflowLoh = 8,
    FinalMarking = 9,
    SweepSoh = 10,
    SweepLoh = 11,
    PlanPhase = 12,
}

impl BgcState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => BgcState::NotInProcess,
            1 => BgcState::Initialized,
            2 => BgcState::ResetWriteWatch,
            3 => BgcState::MarkHandles,
            4 => BgcState::MarkStack,
            5 => BgcState::RevisitSoh,
            6 => BgcState::RevisitLoh,
            7 => BgcState::OverflowSoh,
            8 => BgcState::OverflowLoh,
            9 => BgcState::FinalMarking,
            10 => BgcState::SweepSoh,
            11 => BgcState::SweepLoh,
            _ => BgcState::PlanPhase,
        }
    }

    /// The state immediately following this one in the normal (no
    /// overflow) path. `RevisitLoh`'s successor is `FinalMarking` unless
    /// the caller detected an overflow, in which case it advances into
    /// `OverflowSoh` instead — callers needing that branch use
    /// `BgcStateMachine::advance_or_overflow`.
    fn next_normal(self) -> Option<BgcState> {
        use BgcState::*;
        Some(match self {
            NotInProcess => Initialized,
            Initialized => ResetWriteWatch,
            ResetWriteWatch => MarkHandles,
            MarkHandles => MarkStack,
            MarkStack => RevisitSoh,
            RevisitSoh => RevisitLoh,
            RevisitLoh => FinalMarking,
            OverflowSoh => OverflowLoh,
            OverflowLoh => FinalMarking,
            FinalMarking => SweepSoh,
            SweepSoh => SweepLoh,
            SweepLoh => PlanPhase,
            PlanPhase => NotInProcess,
        })
    }
}

/// Atomic wrapper enforcing the one-way, non-decreasing transition rule
/// (`PlanPhase -> NotInProcess` is the one permitted "decrease", ending
/// the cycle).
pub struct BgcStateMachine {
    state: AtomicU8,
}

impl Default for BgcStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl BgcStateMachine {
    pub fn new() -> Self {
        Self { state: AtomicU8::new(BgcState::NotInProcess as u8) }
    }

    pub fn current(&self) -> BgcState {
        BgcState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Advance to the next state in the normal path. Panics if called
    /// from `PlanPhase` — call `finish` there instead.
    pub fn advance(&self) {
        let next = self.current().next_normal().expect("no successor from PlanPhase; call finish()");
        self.state.store(next as u8, Ordering::Release);
    }

    /// Divert from `RevisitLoh` into the overflow branch instead of
    /// `FinalMarking`, used when the concurrent mark stack overflowed and
    /// a conservative rescan of both generations is required.
    pub fn overflow(&self) {
        debug_assert_eq!(self.current(), BgcState::RevisitLoh);
        self.state.store(BgcState::OverflowSoh as u8, Ordering::Release);
    }

    pub fn finish(&self) {
        debug_assert_eq!(self.current(), BgcState::PlanPhase);
        self.state.store(BgcState::NotInProcess as u8, Ordering::Release);
    }

    pub fn is_in_progress(&self) -> bool {
        self.current() != BgcState::NotInProcess
    }
}

/// One entry in the log of segment/generation changes a mutator made
/// while the background collector was between snapshots (spec.md §4.6
/// "segment change log"): consulted during `RevisitSoh`/`RevisitLoh` so
/// newly allocated or promoted regions are not missed.
#[derive(Debug, Clone, Copy)]
pub struct SegmentChangeRecord {
    pub segment_base: usize,
    pub old_allocated_end: usize,
    pub new_allocated_end: usize,
}

#[derive(Default)]
pub struct SegmentChangeLog {
    entries: parking_lot::Mutex<Vec<SegmentChangeRecord>>,
}

impl SegmentChangeLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, change: SegmentChangeRecord) {
        self.entries.lock().push(change);
    }

    pub fn drain(&self) -> Vec<SegmentChangeRecord> {
        std::mem::take(&mut *self.entries.lock())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_machine_advances_in_order() {
        let sm = BgcStateMachine::new();
        assert_eq!(sm.current(), BgcState::NotInProcess);
        sm.advance();
        assert_eq!(sm.current(), BgcState::Initialized);
        for _ in 0..9 {
            sm.advance();
        }
        assert_eq!(sm.current(), BgcState::PlanPhase);
        sm.finish();
        assert_eq!(sm.current(), BgcState::NotInProcess);
    }

    #[test]
    fn overflow_diverts_from_revisit_loh() {
        let sm = BgcStateMachine::new();
        for _ in 0..6 {
            sm.advance();
        }
        assert_eq!(sm.current(), BgcState::RevisitLoh);
        sm.overflow();
        assert_eq!(sm.current(), BgcState::OverflowSoh);
    }

    #[test]
    fn segment_change_log_drains_once() {
        let log = SegmentChangeLog::new();
        log.record(SegmentChangeRecord { segment_base: 0x1000, old_allocated_end: 0x1100, new_allocated_end: 0x1200 });
        assert_eq!(log.drain().len(), 1);
        assert!(log.is_empty());
    }
}
