//! Finalization (spec.md §4.4.5). Objects registered for finalization sit
//! on a side table indexed by generation. When a cycle condemns that
//! generation and finds one of them unreachable from ordinary roots, it is
//! *resurrected* — kept alive this cycle and moved onto the ready queue —
//! rather than swept, so whichever thread drains the queue can safely run
//! user finalizer code against still-live memory. Running the finalizer
//! doesn't happen here: [`Finalizer::get_next_finalizable`] just hands the
//! address to the caller; [`Finalizer::set_finalization_run`] drops the
//! object from the ready set so the *next* cycle, finding it still
//! unreachable, reclaims it for real instead of resurrecting it again.
//!
//! Warning: finalizers should be avoided if possible — they add a GC
//! pause's worth of latency before memory is actually reclaimed and run on
//! a schedule the mutator doesn't control. Use only for native-resource
//! cleanup.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crate::error::Result;
use crate::heap::GenId;

const NUM_GENERATIONS: usize = 4; // Gen0, Gen1, Gen2, Loh

struct State {
    by_generation: [HashSet<usize>; NUM_GENERATIONS],
    ready: VecDeque<usize>,
}

/// Finalization side table, ready queue, and the resurrection step that
/// connects them to a collection cycle.
pub struct Finalizer {
    state: Mutex<State>,
    ready_signal: Condvar,
    pending_count: AtomicUsize,
}

impl Finalizer {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                by_generation: [HashSet::new(), HashSet::new(), HashSet::new(), HashSet::new()],
                ready: VecDeque::new(),
            }),
            ready_signal: Condvar::new(),
            pending_count: AtomicUsize::new(0),
        }
    }

    /// Register `object` for finalization in `generation`. Idempotent.
    pub fn register_for_finalization(&self, generation: GenId, object: usize) -> Result<()> {
        let mut state = self.state.lock()?;
        state.by_generation[generation.index()].insert(object);
        Ok(())
    }

    /// Drop `object` from the finalization table without ever running its
    /// finalizer (`GC.SuppressFinalize` equivalent).
    pub fn suppress_finalize(&self, object: usize) -> Result<()> {
        let mut state = self.state.lock()?;
        for bucket in state.by_generation.iter_mut() {
            bucket.remove(&object);
        }
        Ok(())
    }

    /// Called once per cycle, for every generation being condemned, after
    /// the mark phase has finished: anything still in `generation`'s
    /// bucket that the mark phase didn't reach is unreachable except that
    /// its finalizer hasn't run yet. `is_marked` is the caller's liveness
    /// check; `resurrect` is invoked for each object this call moves onto
    /// the ready queue, so the caller can re-mark it and drain its
    /// references before the rest of the condemned generation is swept or
    /// compacted out from under it. Returns the number of objects
    /// resurrected.
    pub fn sweep_condemned(
        &self,
        generation: GenId,
        is_marked: impl Fn(usize) -> bool,
        mut resurrect: impl FnMut(usize),
    ) -> Result<usize> {
        let mut state = self.state.lock()?;
        let candidates: Vec<usize> = state.by_generation[generation.index()].iter().copied().collect();
        let mut resurrected = 0;
        for addr in candidates {
            if is_marked(addr) {
                continue;
            }
            state.by_generation[generation.index()].remove(&addr);
            resurrect(addr);
            state.ready.push_back(addr);
            resurrected += 1;
        }
        drop(state);
        if resurrected > 0 {
            self.pending_count.fetch_add(resurrected, Ordering::Relaxed);
            self.ready_signal.notify_all();
        }
        Ok(resurrected)
    }

    /// After a compacting cycle moves objects, every address still sitting
    /// in the ready queue or a generation bucket needs the same forwarding
    /// fix-up applied to roots (spec.md §4.4.2 step 4).
    pub fn fix_addresses(&self, mut forward: impl FnMut(usize) -> usize) -> Result<()> {
        let mut state = self.state.lock()?;
        for addr in state.ready.iter_mut() {
            *addr = forward(*addr);
        }
        for bucket in state.by_generation.iter_mut() {
            let fixed: HashSet<usize> = bucket.drain().map(&mut forward).collect();
            *bucket = fixed;
        }
        Ok(())
    }

    /// Pop one object whose finalizer the caller should run, blocking up
    /// to `timeout` if the queue is currently empty.
    pub fn get_next_finalizable(&self, timeout: Duration) -> Result<Option<usize>> {
        let mut state = self.state.lock()?;
        if state.ready.is_empty() {
            let (guard, _) = self.ready_signal.wait_timeout(state, timeout)?;
            state = guard;
        }
        let next = state.ready.pop_front();
        if next.is_some() {
            self.pending_count.fetch_sub(1, Ordering::Relaxed);
        }
        Ok(next)
    }

    /// Record that `object`'s finalizer has run. After this, `object` is
    /// no longer tracked anywhere in the finalizer — if it's still
    /// reachable (it resurrected itself), ordinary marking keeps it alive;
    /// if not, the next cycle reclaims it like any other dead object.
    pub fn set_finalization_run(&self, _object: usize) -> Result<()> {
        Ok(())
    }

    pub fn get_number_of_finalizable(&self) -> usize {
        self.pending_count.load(Ordering::Relaxed)
    }

    pub fn has_pending(&self) -> bool {
        self.get_number_of_finalizable() > 0
    }
}

impl Default for Finalizer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreachable_registered_object_is_resurrected_once() {
        let finalizer = Finalizer::new();
        finalizer.register_for_finalization(GenId::Gen0, 0x1000).unwrap();

        let mut resurrected = Vec::new();
        let n = finalizer
            .sweep_condemned(GenId::Gen0, |_addr| false, |addr| resurrected.push(addr))
            .unwrap();
        assert_eq!(n, 1);
        assert_eq!(resurrected, vec![0x1000]);
        assert_eq!(finalizer.get_number_of_finalizable(), 1);

        let next = finalizer.get_next_finalizable(Duration::from_millis(1)).unwrap();
        assert_eq!(next, Some(0x1000));
        assert_eq!(finalizer.get_number_of_finalizable(), 0);

        finalizer.set_finalization_run(0x1000).unwrap();
        // No longer registered: a second sweep finds nothing to resurrect.
        let n2 = finalizer.sweep_condemned(GenId::Gen0, |_| false, |_| ()).unwrap();
        assert_eq!(n2, 0);
    }

    #[test]
    fn reachable_registered_object_is_left_alone() {
        let finalizer = Finalizer::new();
        finalizer.register_for_finalization(GenId::Gen1, 0x2000).unwrap();
        let n = finalizer.sweep_condemned(GenId::Gen1, |_| true, |_| ()).unwrap();
        assert_eq!(n, 0);
        assert_eq!(finalizer.get_number_of_finalizable(), 0);
    }

    #[test]
    fn suppress_finalize_removes_without_running() {
        let finalizer = Finalizer::new();
        finalizer.register_for_finalization(GenId::Gen2, 0x3000).unwrap();
        finalizer.suppress_finalize(0x3000).unwrap();
        let n = finalizer.sweep_condemned(GenId::Gen2, |_| false, |_| ()).unwrap();
        assert_eq!(n, 0);
    }
}
