//! The collector orchestrator (spec.md §4.4, §6.1): ties allocation,
//! marking, relocation, and the background collector together into the
//! operations a VM boundary actually calls. A blocking collection always
//! traces the whole heap rather than scoping to just the condemned
//! generation's segments; see DESIGN.md for why that simplification was
//! made and what it costs.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::alloc::{AllocFlags, AllocationContext, GlobalAllocContext, LargeObjectAllocator, MatureAllocator};
use crate::background::{BgcStateMachine, SegmentChangeLog};
use crate::barrier::{CardTable, ShadowHeap, WriteBarrier, WriteWatch};
use crate::config::{GcConfig, LatencyMode, LohCompactionMode};
use crate::error::{GcError, OomReason, Result};
use crate::heap::frozen::FrozenHandle;
use crate::heap::segment::Segment;
use crate::heap::{GenId, Heap, HeapTopology};
use crate::marker::roots::{RootHandle, RootType};
use crate::marker::Marker;
use crate::object::header::ObjectHeader;
use crate::object::refmap::{TypeDesc, TypeDescHandle, TypeRegistry};
use crate::relocate;
use crate::runtime::callbacks::{GcCallbacks, HandleKind};
use crate::runtime::finalizer::Finalizer;
use crate::runtime::safepoint::SafepointManager;
use crate::stats::GcStats;

pub use crate::heap::frozen::FrozenSegmentInfo;

/// Why a collection was triggered, carried through to `GcCycleStats` and
/// the verbose event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcReason {
    AllocationFailure,
    Explicit,
    GcInterval,
    LowMemory,
    NoGcRegionExhausted,
}

/// High-level phase the orchestrator is currently in; used only for
/// diagnostics and to reject reentrant `collect()` calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcState {
    Idle,
    Suspending,
    Marking,
    Planning,
    Relocating,
    CompactingOrSweeping,
    FixingCards,
    Resuming,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartNoGcStatus {
    Success,
    NotEnoughMemory,
    TooLargeRegion,
    AlreadyInProgress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndNoGcStatus {
    Success,
    NotInProgress,
    AllocExceeded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitForGcStatus {
    Success,
    Timeout,
    NoGcInProgress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FullGcNotifyStatus {
    Success,
    Failed,
    Timeout,
    Cancelled,
}

struct NoGcRegionState {
    disallow_full_blocking: bool,
    budget_remaining: usize,
}

/// Registration state for full-GC approach/completion notification
/// (spec.md §5/§6.1): a VM thread can ask to be woken when a full
/// collection is about to run, and again once it finishes.
#[derive(Default)]
struct FullGcNotifyState {
    registered: bool,
    approaching: bool,
    complete: bool,
    cancelled: bool,
}

struct FullGcNotify {
    state: Mutex<FullGcNotifyState>,
    signal: Condvar,
}

impl FullGcNotify {
    fn new() -> Self {
        Self { state: Mutex::new(FullGcNotifyState::default()), signal: Condvar::new() }
    }

    fn register(&self) -> Result<()> {
        let mut state = self.state.lock()?;
        *state = FullGcNotifyState { registered: true, ..FullGcNotifyState::default() };
        Ok(())
    }

    fn cancel(&self) -> Result<()> {
        let mut state = self.state.lock()?;
        state.cancelled = true;
        state.registered = false;
        self.signal.notify_all();
        Ok(())
    }

    fn announce_approach(&self) -> Result<()> {
        let mut state = self.state.lock()?;
        if state.registered {
            state.approaching = true;
            self.signal.notify_all();
        }
        Ok(())
    }

    fn announce_complete(&self) -> Result<()> {
        let mut state = self.state.lock()?;
        if state.registered {
            state.complete = true;
            state.approaching = false;
            self.signal.notify_all();
        }
        Ok(())
    }

    fn wait_approach(&self, timeout: Duration) -> Result<FullGcNotifyStatus> {
        let mut state = self.state.lock()?;
        if !state.registered {
            return Ok(FullGcNotifyStatus::Failed);
        }
        while !state.approaching && !state.cancelled {
            let (guard, timed_out) = self.signal.wait_timeout(state, timeout)?;
            state = guard;
            if timed_out.timed_out() {
                return Ok(FullGcNotifyStatus::Timeout);
            }
        }
        if state.cancelled {
            return Ok(FullGcNotifyStatus::Cancelled);
        }
        state.approaching = false;
        Ok(FullGcNotifyStatus::Success)
    }

    fn wait_complete(&self, timeout: Duration) -> Result<FullGcNotifyStatus> {
        let mut state = self.state.lock()?;
        if !state.registered {
            return Ok(FullGcNotifyStatus::Failed);
        }
        while !state.complete && !state.cancelled {
            let (guard, timed_out) = self.signal.wait_timeout(state, timeout)?;
            state = guard;
            if timed_out.timed_out() {
                return Ok(FullGcNotifyStatus::Timeout);
            }
        }
        if state.cancelled {
            return Ok(FullGcNotifyStatus::Cancelled);
        }
        state.complete = false;
        Ok(FullGcNotifyStatus::Success)
    }
}

/// The collector: owns the heap topology, the mark/relocate machinery, and
/// every piece of process-wide state a VM boundary call (spec.md §6.1)
/// touches. One instance per process; server mode is one `Heap` per
/// logical processor inside a single `GarbageCollector`, not one
/// collector per heap — `collect()` already runs under one safepoint
/// suspension across every heap in `topology`, which is the join barrier
/// server mode needs (see DESIGN.md).
pub struct GarbageCollector {
    topology: HeapTopology,
    config: GcConfig,
    callbacks: Arc<dyn GcCallbacks>,
    registry: Arc<TypeRegistry>,
    card_table: CardTable,
    concurrent_marking: AtomicBool,
    write_watch: WriteWatch,
    shadow_heap: ShadowHeap,
    marker: Arc<Marker>,
    safepoint: SafepointManager,
    bgc_state: BgcStateMachine,
    change_log: SegmentChangeLog,
    stats: Arc<GcStats>,
    alloc_contexts: Vec<GlobalAllocContext>,
    mature_alloc: Vec<MatureAllocator>,
    large_alloc: Vec<LargeObjectAllocator>,
    finalizer: Arc<Finalizer>,
    no_gc_region: Mutex<Option<NoGcRegionState>>,
    loh_compaction_mode: Mutex<LohCompactionMode>,
    cycle_mutex: Mutex<()>,
    state: Mutex<GcState>,
    cycle_count: AtomicU64,
    last_gc_start: Mutex<Option<Instant>>,
    last_gc_duration: Mutex<Duration>,
    full_gc_notify: FullGcNotify,
}

impl GarbageCollector {
    pub fn new(config: GcConfig, callbacks: Arc<dyn GcCallbacks>) -> Result<Self> {
        config.validate().map_err(|e| GcError::Configuration(e.to_string()))?;

        let topology = HeapTopology::new(&config)?;
        let n = topology.heaps().len();

        let alloc_contexts = (0..n).map(GlobalAllocContext::new).collect();
        let mature_alloc = (0..n).map(|_| MatureAllocator::new()).collect();
        let large_alloc = (0..n).map(|_| LargeObjectAllocator::new(config.large_object_threshold)).collect();

        let lowest = topology.heaps().iter().map(Heap::lowest_address).min().unwrap_or(0);
        let highest = topology.heaps().iter().map(Heap::highest_address).max().unwrap_or(0);
        let card_table = CardTable::new(lowest, highest.saturating_sub(lowest), config.card_size);

        let safepoint = SafepointManager::new();
        safepoint.start()?;

        Ok(Self {
            card_table,
            concurrent_marking: AtomicBool::new(false),
            write_watch: WriteWatch::new(page_size::get(), config.write_watch_enabled),
            shadow_heap: ShadowHeap::new(config.shadow_heap_enabled),
            marker: Arc::new(Marker::new()),
            safepoint,
            bgc_state: BgcStateMachine::new(),
            change_log: SegmentChangeLog::new(),
            stats: Arc::new(GcStats::new(1024)),
            alloc_contexts,
            mature_alloc,
            large_alloc,
            finalizer: Arc::new(Finalizer::new()),
            no_gc_region: Mutex::new(None),
            loh_compaction_mode: Mutex::new(config.loh_compaction_mode),
            cycle_mutex: Mutex::new(()),
            state: Mutex::new(GcState::Idle),
            cycle_count: AtomicU64::new(0),
            last_gc_start: Mutex::new(None),
            last_gc_duration: Mutex::new(Duration::ZERO),
            full_gc_notify: FullGcNotify::new(),
            registry: Arc::new(TypeRegistry::new()),
            callbacks,
            config,
            topology,
        })
    }

    pub fn type_registry(&self) -> Arc<TypeRegistry> {
        self.registry.clone()
    }

    pub fn bgc_state(&self) -> &BgcStateMachine {
        &self.bgc_state
    }

    pub fn change_log(&self) -> &SegmentChangeLog {
        &self.change_log
    }

    pub fn stats(&self) -> Arc<GcStats> {
        self.stats.clone()
    }

    // ----------------------------------------------------------------
    // Allocation (spec.md §6.1 `alloc`, `alloc_loh`, `fix_alloc_context`)
    // ----------------------------------------------------------------

    /// Small-object allocation through heap `heap_id`'s global allocation
    /// context. Triggers a blocking collection and retries once on
    /// out-of-memory.
    pub fn alloc(&self, heap_id: usize, size: usize, flags: AllocFlags) -> Result<usize> {
        let slot = heap_id % self.alloc_contexts.len();
        let gac = &self.alloc_contexts[slot];
        let heap = self.topology.home_heap(slot);

        if !gac.try_acquire_fast() {
            gac.acquire_slow();
        }
        let result = self.allocate_with_retry(heap, &gac.context, size, flags);
        gac.release();
        result
    }

    fn allocate_with_retry(&self, heap: &Heap, ctx: &AllocationContext, size: usize, flags: AllocFlags) -> Result<usize> {
        match ctx.allocate(heap, size, flags) {
            Ok(addr) => Ok(addr),
            Err(GcError::OutOfMemory { reason, requested, available }) => {
                self.on_allocation_failure(reason, requested, available)?;
                ctx.allocate(heap, size, flags)
            }
            Err(e) => Err(e),
        }
    }

    /// Large-object allocation, bypassing gen 0/1/2 (spec.md §3.3).
    pub fn alloc_loh(&self, heap_id: usize, size: usize) -> Result<usize> {
        let slot = heap_id % self.large_alloc.len();
        let heap = self.topology.home_heap(slot);
        let allocator = &self.large_alloc[slot];
        match allocator.allocate(heap, size) {
            Ok(addr) => Ok(addr),
            Err(GcError::OutOfMemory { reason, requested, available }) => {
                self.on_allocation_failure(reason, requested, available)?;
                allocator.allocate(heap, size)
            }
            Err(e) => Err(e),
        }
    }

    fn on_allocation_failure(&self, reason: OomReason, requested: usize, available: usize) -> Result<()> {
        crate::logging::log_event(crate::logging::GcEvent::AllocationFailure { size: requested, heap_used: available });

        {
            let mut region = self.no_gc_region.lock()?;
            if let Some(no_gc) = region.as_mut() {
                if requested > no_gc.budget_remaining || no_gc.disallow_full_blocking {
                    return Err(GcError::NoGcRegionExceeded);
                }
                no_gc.budget_remaining -= requested;
                return Ok(());
            }
        }

        let condemned = self.choose_condemned_generation();
        self.collect(condemned, GcReason::AllocationFailure)
    }

    /// Flush a mutator's allocation-context reservation into a well-formed
    /// filler object (spec.md §6.1 `fix_alloc_context`), e.g. at a safepoint.
    pub fn fix_alloc_context(&self, heap_id: usize) {
        self.alloc_contexts[heap_id % self.alloc_contexts.len()].context.flush();
    }

    // ----------------------------------------------------------------
    // Write barrier (spec.md §6.1 `write_barrier`, `set_cards_after_bulk_copy`)
    // ----------------------------------------------------------------

    /// Record a store of `new_value` into the reference slot at
    /// `slot_address`: dirty its card and, if a background mark is in
    /// flight, shade `new_value` so it isn't missed (§4.5).
    pub fn write_barrier(&self, slot_address: usize, new_value: usize) {
        let barrier = WriteBarrier::new(&self.card_table, &self.concurrent_marking);
        let marker = &self.marker;
        barrier.on_store(slot_address, new_value, |addr| {
            let header = unsafe { &*(addr as *const ObjectHeader) };
            if header.try_mark() {
                marker.queue.push(addr);
            }
        });
        self.write_watch.touch(slot_address);
        self.shadow_heap.record_store(slot_address, new_value);
    }

    /// Bulk-store barrier for array/struct copies spanning `[start, end)`.
    pub fn set_cards_after_bulk_copy(&self, start: usize, end: usize) {
        let barrier = WriteBarrier::new(&self.card_table, &self.concurrent_marking);
        barrier.on_bulk_store(start, end);
    }

    // ----------------------------------------------------------------
    // Heap queries (spec.md §6.1)
    // ----------------------------------------------------------------

    pub fn which_generation(&self, address: usize) -> Option<GenId> {
        self.topology.which_generation(address)
    }

    pub fn is_ephemeral(&self, address: usize) -> bool {
        matches!(self.which_generation(address), Some(GenId::Gen0) | Some(GenId::Gen1))
    }

    /// Whether `address` has survived out of gen 0 (into gen 1, gen 2, or
    /// the LOH — all of which only ever hold promoted or directly-large
    /// allocations).
    pub fn is_promoted(&self, address: usize) -> bool {
        !matches!(self.which_generation(address), Some(GenId::Gen0) | None)
    }

    pub fn is_heap_pointer(&self, address: usize) -> bool {
        self.topology.is_heap_pointer(address)
    }

    pub fn get_total_bytes_in_use(&self) -> usize {
        self.topology
            .heaps()
            .iter()
            .flat_map(|h| h.stats.iter())
            .map(|s| s.current_size.load(Ordering::Relaxed))
            .sum()
    }

    pub fn get_gc_count(&self) -> u64 {
        self.cycle_count.load(Ordering::Relaxed)
    }

    pub fn get_last_gc_start(&self) -> Option<Instant> {
        *self.last_gc_start.lock().expect("lock poisoned")
    }

    pub fn get_last_gc_duration(&self) -> Duration {
        *self.last_gc_duration.lock().expect("lock poisoned")
    }

    pub fn register_root(&self, address: usize, kind: RootType, is_pinned: bool) -> RootHandle {
        self.marker.roots.register(address, kind, is_pinned)
    }

    pub fn unregister_root(&self, handle: RootHandle) {
        self.marker.roots.unregister(handle)
    }

    pub fn register_type(&self, desc: TypeDesc) -> TypeDescHandle {
        self.registry.register(desc)
    }

    // ----------------------------------------------------------------
    // Frozen segments (spec.md §4.2.3, §6.1)
    // ----------------------------------------------------------------

    pub fn register_frozen_segment(&self, heap_id: usize, info: FrozenSegmentInfo) -> FrozenHandle {
        self.topology.home_heap(heap_id % self.topology.heaps().len()).frozen.register(info)
    }

    pub fn unregister_frozen_segment(&self, heap_id: usize, handle: FrozenHandle) -> Result<()> {
        self.topology.home_heap(heap_id % self.topology.heaps().len()).frozen.unregister(handle)
    }

    // ----------------------------------------------------------------
    // Finalization hand-off (spec.md §4.4.5, §6.1)
    // ----------------------------------------------------------------

    pub fn register_for_finalization(&self, generation: GenId, object: usize) -> Result<()> {
        self.finalizer.register_for_finalization(generation, object)
    }

    pub fn suppress_finalize(&self, object: usize) -> Result<()> {
        self.finalizer.suppress_finalize(object)
    }

    pub fn get_next_finalizable(&self, timeout: Duration) -> Result<Option<usize>> {
        self.finalizer.get_next_finalizable(timeout)
    }

    pub fn set_finalization_run(&self, object: usize) -> Result<()> {
        self.finalizer.set_finalization_run(object)
    }

    pub fn get_number_of_finalizable(&self) -> usize {
        self.finalizer.get_number_of_finalizable()
    }

    pub fn finalizer(&self) -> Arc<Finalizer> {
        self.finalizer.clone()
    }

    // ----------------------------------------------------------------
    // No-GC region (spec.md §4.4.4, §6.1)
    // ----------------------------------------------------------------

    pub fn start_no_gc_region(&self, total_size: usize, disallow_full_blocking: bool) -> Result<StartNoGcStatus> {
        let mut region = self.no_gc_region.lock()?;
        if region.is_some() {
            return Ok(StartNoGcStatus::AlreadyInProgress);
        }
        let max_heap = self.config.max_heap_size;
        if total_size > max_heap {
            return Ok(StartNoGcStatus::TooLargeRegion);
        }
        if self.get_total_bytes_in_use().saturating_add(total_size) > max_heap {
            let condemned = self.choose_condemned_generation();
            drop(region);
            self.collect(condemned, GcReason::NoGcRegionExhausted)?;
            region = self.no_gc_region.lock()?;
            if self.get_total_bytes_in_use().saturating_add(total_size) > max_heap {
                return Ok(StartNoGcStatus::NotEnoughMemory);
            }
        }
        *region = Some(NoGcRegionState { disallow_full_blocking, budget_remaining: total_size });
        Ok(StartNoGcStatus::Success)
    }

    pub fn end_no_gc_region(&self) -> Result<EndNoGcStatus> {
        let mut region = self.no_gc_region.lock()?;
        match region.take() {
            Some(state) if state.budget_remaining == 0 => Ok(EndNoGcStatus::AllocExceeded),
            Some(_) => Ok(EndNoGcStatus::Success),
            None => Ok(EndNoGcStatus::NotInProgress),
        }
    }

    // ----------------------------------------------------------------
    // Full-GC notification (spec.md §5, §6.1)
    // ----------------------------------------------------------------

    pub fn register_for_full_gc_notification(&self) -> Result<()> {
        self.full_gc_notify.register()
    }

    pub fn cancel_full_gc_notification(&self) -> Result<()> {
        self.full_gc_notify.cancel()
    }

    pub fn wait_for_full_gc_approach(&self, timeout: Duration) -> Result<FullGcNotifyStatus> {
        self.full_gc_notify.wait_approach(timeout)
    }

    pub fn wait_for_full_gc_complete(&self, timeout: Duration) -> Result<FullGcNotifyStatus> {
        self.full_gc_notify.wait_complete(timeout)
    }

    /// Block until no collection is in progress, or `timeout` elapses.
    pub fn wait_for_gc_complete(&self, timeout: Duration) -> Result<WaitForGcStatus> {
        let start = Instant::now();
        if !self.safepoint.should_block() {
            return Ok(WaitForGcStatus::NoGcInProgress);
        }
        while self.safepoint.should_block() {
            if start.elapsed() >= timeout {
                return Ok(WaitForGcStatus::Timeout);
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        Ok(WaitForGcStatus::Success)
    }

    // ----------------------------------------------------------------
    // Condemned-generation selection (spec.md §4.4.1)
    // ----------------------------------------------------------------

    /// Pick the youngest generation whose budget is exceeded, widening to
    /// gen 2 when an older generation's survival rate suggests collecting
    /// it alone wouldn't reclaim enough (a minor collection that mostly
    /// promotes rather than reclaims is unproductive).
    fn choose_condemned_generation(&self) -> GenId {
        if self.config.latency_mode == LatencyMode::NoGc {
            return GenId::Gen0;
        }
        let heap = self.topology.heaps().first().expect("at least one heap");
        if heap.stats_for(GenId::Gen2).budget_exceeded() || heap.stats_for(GenId::Loh).budget_exceeded() {
            return GenId::Gen2;
        }
        if heap.stats_for(GenId::Gen1).budget_exceeded() {
            if heap.stats_for(GenId::Gen1).survival_rate() > 0.5 {
                return GenId::Gen2;
            }
            return GenId::Gen1;
        }
        GenId::Gen0
    }

    /// Explicit collection request (spec.md §6.1 `collect`), as opposed to
    /// one triggered internally by an allocation failure.
    pub fn collect_explicit(&self, generation: GenId) -> Result<()> {
        self.collect(generation, GcReason::Explicit)
    }

    pub fn state(&self) -> GcState {
        *self.state.lock().expect("lock poisoned")
    }

    pub fn is_collecting(&self) -> bool {
        self.state() != GcState::Idle
    }

    // ----------------------------------------------------------------
    // The collection cycle itself (spec.md §4.4.2)
    // ----------------------------------------------------------------

    /// Run one blocking collection condemning `generation` (and every
    /// younger one). Always traces the whole live heap regardless of which
    /// generation is condemned — see DESIGN.md for the rationale behind
    /// not scoping marking to just the condemned segments.
    fn collect(&self, generation: GenId, reason: GcReason) -> Result<()> {
        let _serialize = self.cycle_mutex.lock()?;
        let cycle_timer = crate::stats::GcTimer::new();
        let cycle_id = self.stats.next_cycle_id();
        self.stats.cycles().start_cycle(cycle_id, generation.index() as u8);

        if generation == GenId::Gen2 {
            self.full_gc_notify.announce_approach()?;
        }

        crate::logging::log_event(crate::logging::GcEvent::CycleStart {
            generation: format!("{generation:?}"),
            reason: format!("{reason:?}"),
            cycle: cycle_id,
        });

        *self.last_gc_start.lock()? = Some(Instant::now());
        *self.state.lock()? = GcState::Suspending;

        let suspend_timer = crate::stats::GcTimer::new();
        self.suspend_mutators();
        let suspend_ns = suspend_timer.elapsed_ns();
        self.stats.cycles().with_current(|s| s.suspend_ns = suspend_ns);

        let result = self.run_condemned_cycle(generation);

        *self.state.lock()? = GcState::Resuming;
        self.resume_mutators();
        *self.state.lock()? = GcState::Idle;

        let total_ns = cycle_timer.elapsed_ns();
        *self.last_gc_duration.lock()? = cycle_timer.elapsed();
        self.cycle_count.fetch_add(1, Ordering::Relaxed);
        self.stats.record_memory_usage(self.get_total_bytes_in_use());

        if let Some(stats) = self.stats.cycles().end_cycle() {
            self.stats.record_pause(stats.total_pause_ns());
            crate::logging::log_event(crate::logging::GcEvent::CycleEnd {
                cycle: cycle_id,
                duration_ms: total_ns as f64 / 1_000_000.0,
                reclaimed_bytes: stats.memory_reclaimed,
            });
        }

        if generation == GenId::Gen2 {
            self.full_gc_notify.announce_complete()?;
        }

        result
    }

    fn suspend_mutators(&self) {
        if self.callbacks.owns_suspension() {
            self.safepoint.request_safepoint();
        }
        for ctx in &self.alloc_contexts {
            ctx.context.flush();
        }
    }

    fn resume_mutators(&self) {
        if self.callbacks.owns_suspension() {
            self.safepoint.release_safepoint();
        }
    }

    fn run_condemned_cycle(&self, generation: GenId) -> Result<()> {
        *self.state.lock()? = GcState::Marking;
        let mark_timer = crate::stats::GcTimer::new();
        self.marker.reset();

        let stacks = self.callbacks.enumerate_stacks();
        self.marker.seed_roots(&stacks, &self.topology);
        self.seed_handle_roots();
        self.seed_frozen_roots();
        self.marker.drain(&self.registry)?;

        // Finalizable objects the mark phase didn't reach are unreachable
        // except for their pending finalizer; resurrect them and drain the
        // references they hold before sweep/compact runs.
        let resurrected = self.finalizer.sweep_condemned(
            generation,
            |addr| unsafe { (&*(addr as *const ObjectHeader)).is_marked(Ordering::Acquire) },
            |addr| {
                let header = unsafe { &*(addr as *const ObjectHeader) };
                header.try_mark();
                self.marker.queue.push(addr);
            },
        )?;
        if resurrected > 0 {
            self.marker.drain(&self.registry)?;
        }

        let mark_ns = mark_timer.elapsed_ns();
        let marked_count = self.marker.marked_count();
        self.stats.cycles().with_current(|s| {
            s.mark_ns = mark_ns;
            s.objects_marked = marked_count;
        });
        crate::logging::log_event(crate::logging::GcEvent::MarkStats {
            marked_count,
            scanned_count: marked_count,
        });

        let live_objects = self.collect_live_objects();
        let pinned = self.collect_pinned_objects();

        let consume_loh_once = {
            let mut mode = self.loh_compaction_mode.lock()?;
            let once = *mode == LohCompactionMode::Once;
            if once {
                *mode = LohCompactionMode::Never;
            }
            once
        };
        let compact_loh = consume_loh_once || *self.loh_compaction_mode.lock()? == LohCompactionMode::Always;

        *self.state.lock()? = GcState::Planning;
        let plan_timer = crate::stats::GcTimer::new();

        for heap in self.topology.heaps() {
            heap.with_ephemeral_segments(|segs| self.compact_segment_list(segs, &live_objects, &pinned))?;

            if generation.index() >= GenId::Gen2.index() {
                heap.with_mature_segments(|segs| self.compact_segment_list(segs, &live_objects, &pinned))?;
            } else {
                let mature_alloc = &self.mature_alloc[heap.id % self.mature_alloc.len()];
                heap.with_mature_segments(|segs| {
                    for seg in segs {
                        relocate::sweep_segment(seg, |addr, size| mature_alloc.reclaim(addr, size));
                    }
                });
            }

            if compact_loh {
                heap.with_large_segments(|segs| self.compact_segment_list(segs, &live_objects, &pinned))?;
            } else {
                let loh_alloc = &self.large_alloc[heap.id % self.large_alloc.len()];
                heap.with_large_segments(|segs| {
                    for seg in segs {
                        relocate::sweep_segment(seg, |addr, size| loh_alloc.reclaim(addr, size));
                    }
                });
            }
        }

        self.finalizer.fix_addresses(relocate::forwarded_address)?;

        let plan_ns = plan_timer.elapsed_ns();
        self.stats.cycles().with_current(|s| s.plan_ns = plan_ns);

        *self.state.lock()? = GcState::FixingCards;
        self.card_table.clear_all();
        self.write_watch.reset();

        Ok(())
    }

    fn compact_segment_list(&self, segments: &[Segment], live_objects: &[usize], pinned: &HashSet<usize>) -> Result<()> {
        for seg in segments {
            self.compact_one_segment(seg, live_objects, pinned)?;
        }
        Ok(())
    }

    fn compact_one_segment(&self, segment: &Segment, live_objects: &[usize], pinned: &HashSet<usize>) -> Result<()> {
        let report = relocate::compact_segment_full(segment, live_objects, pinned, &self.registry, &self.marker.roots, &self.topology)?;
        self.stats.cycles().with_current(|s| {
            s.objects_relocated += report.compact.objects_copied as u64;
            s.memory_reclaimed += report.plan.new_allocated_end;
        });
        Ok(())
    }

    /// Walk every owned segment and collect the address of every marked
    /// (live) object, for use by the relocate phase's reference fix-up and
    /// as the pinning candidate set.
    fn collect_live_objects(&self) -> Vec<usize> {
        let mut live = Vec::new();
        for heap in self.topology.heaps() {
            heap.with_ephemeral_segments(|segs| Self::walk_segment_list(segs, &mut live));
            heap.with_mature_segments(|segs| Self::walk_segment_list(segs, &mut live));
        }
        live
    }

    fn walk_segment_list(segments: &[Segment], live: &mut Vec<usize>) {
        for seg in segments {
            let mut cursor = seg.first_object();
            while cursor < seg.allocated_end() {
                let header = unsafe { &*(cursor as *const ObjectHeader) };
                let size = header.size();
                if header.is_marked(Ordering::Acquire) {
                    live.push(cursor);
                }
                cursor += size;
            }
        }
    }

    /// Objects anchored in place for this cycle: anything sitting in a
    /// frozen (externally owned) segment. The collector never moves those,
    /// so they anchor the compaction slide the same way an explicitly
    /// pinned handle does.
    fn collect_pinned_objects(&self) -> HashSet<usize> {
        let mut pinned = HashSet::new();
        for heap in self.topology.heaps() {
            heap.frozen.for_each(|_base, first, end| {
                let mut cursor = first;
                while cursor < end {
                    let header = unsafe { &*(cursor as *const ObjectHeader) };
                    pinned.insert(cursor);
                    cursor += header.size();
                }
            });
        }
        pinned
    }

    fn seed_handle_roots(&self) {
        for kind in [HandleKind::Strong, HandleKind::Pinned] {
            self.callbacks.enumerate_handles(kind, &mut |addr| {
                if addr == 0 {
                    return;
                }
                let header = unsafe { &*(addr as *const ObjectHeader) };
                if header.try_mark() {
                    self.marker.queue.push(addr);
                }
            });
        }
    }

    fn seed_frozen_roots(&self) {
        for heap in self.topology.heaps() {
            heap.frozen.for_each(|_base, first, end| {
                let mut cursor = first;
                while cursor < end {
                    let header = unsafe { &*(cursor as *const ObjectHeader) };
                    let size = header.size();
                    if header.try_mark() {
                        self.marker.queue.push(cursor);
                    }
                    cursor += size;
                }
            });
        }
    }
}
