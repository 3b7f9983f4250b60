//! Per-thread allocation context and the bump-pointer fast path
//! (spec.md §4.1), plus the single-processor shared global context.

use std::sync::atomic::{AtomicI32, AtomicIsize, AtomicUsize, Ordering};

use crate::error::{GcError, OomReason, Result};
use crate::heap::Heap;
use crate::util::alignment::Alignment;

/// Flags accepted by [`AllocationContext::allocate`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocFlags(u8);

impl AllocFlags {
    pub const NONE: AllocFlags = AllocFlags(0);
    pub const CONTAINS_REF: AllocFlags = AllocFlags(1 << 0);
    pub const FINALIZE: AllocFlags = AllocFlags(1 << 1);
    pub const ALIGN8: AllocFlags = AllocFlags(1 << 2);
    pub const ALIGN8_BIAS: AllocFlags = AllocFlags(1 << 3);

    pub const fn contains(self, other: AllocFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: AllocFlags) -> AllocFlags {
        AllocFlags(self.0 | other.0)
    }
}

impl std::ops::BitOr for AllocFlags {
    type Output = AllocFlags;
    fn bitor(self, rhs: AllocFlags) -> AllocFlags {
        self.union(rhs)
    }
}

/// Per-mutator allocation state. `[alloc_ptr, alloc_limit)` is a
/// reservation inside some ephemeral segment owned by `home_heap`; no
/// other mutator may allocate in that range (spec.md §3.4).
pub struct AllocationContext {
    alloc_ptr: AtomicUsize,
    alloc_limit: AtomicUsize,
    small_object_bytes: AtomicUsize,
    large_object_bytes: AtomicUsize,
    pub home_heap: usize,
    current_heap: AtomicUsize,
    last_refill_size: AtomicUsize,
}

/// The first refill is deliberately small; subsequent refills grow up to
/// this cap (the "allocation quantum" of spec.md §4.1).
const INITIAL_REFILL: usize = 4 * 1024;

impl AllocationContext {
    pub fn new(home_heap: usize) -> Self {
        Self {
            alloc_ptr: AtomicUsize::new(0),
            alloc_limit: AtomicUsize::new(0),
            small_object_bytes: AtomicUsize::new(0),
            large_object_bytes: AtomicUsize::new(0),
            home_heap,
            current_heap: AtomicUsize::new(home_heap),
            last_refill_size: AtomicUsize::new(0),
        }
    }

    pub fn small_object_bytes(&self) -> usize {
        self.small_object_bytes.load(Ordering::Relaxed)
    }

    pub fn large_object_bytes(&self) -> usize {
        self.large_object_bytes.load(Ordering::Relaxed)
    }

    pub fn remaining(&self) -> usize {
        self.alloc_limit.load(Ordering::Acquire).saturating_sub(self.alloc_ptr.load(Ordering::Acquire))
    }

    fn alignment_padding(flags: AllocFlags, start: usize) -> usize {
        if flags.contains(AllocFlags::ALIGN8_BIAS) {
            let target = Alignment::align_up(start + 4, 8);
            target - start
        } else if flags.contains(AllocFlags::ALIGN8) {
            Alignment::align_up(start, 8) - start
        } else {
            0
        }
    }

    /// Fast-path allocation: if the reservation can satisfy `size` with no
    /// alignment adjustment, bump `alloc_ptr` and return; otherwise fall
    /// into the slow path (`refill`). Returns the address of a
    /// zero-initialized, *unpublished* object — the caller (the heap
    /// facade) is responsible for publication (spec.md §4.2.4).
    pub fn allocate(&self, heap: &Heap, size: usize, flags: AllocFlags) -> Result<usize> {
        debug_assert!(size > 0);
        loop {
            let ptr = self.alloc_ptr.load(Ordering::Acquire);
            let limit = self.alloc_limit.load(Ordering::Acquire);
            let padding = Self::alignment_padding(flags, ptr);
            let needed = size + padding;
            if ptr.saturating_add(needed) <= limit {
                let new_ptr = ptr + needed;
                if self
                    .alloc_ptr
                    .compare_exchange(ptr, new_ptr, Ordering::AcqRel, Ordering::Relaxed)
                    .is_ok()
                {
                    if padding > 0 {
                        self.fill_dead_object(ptr, padding);
                    }
                    let obj = ptr + padding;
                    zero_fill(obj, size);
                    self.small_object_bytes.fetch_add(size, Ordering::Relaxed);
                    return Ok(obj);
                }
                continue; // lost the race, retry the fast path
            }
            return self.refill(heap, needed).and_then(|_| {
                // after a successful refill, retry the fast path once; a
                // second failure means the caller must decide whether to
                // collect and retry again.
                self.try_fast_path_once(size, flags)
            });
        }
    }

    fn try_fast_path_once(&self, size: usize, flags: AllocFlags) -> Result<usize> {
        let ptr = self.alloc_ptr.load(Ordering::Acquire);
        let limit = self.alloc_limit.load(Ordering::Acquire);
        let padding = Self::alignment_padding(flags, ptr);
        let needed = size + padding;
        if ptr.saturating_add(needed) > limit {
            return Err(GcError::OutOfMemory {
                reason: OomReason::Budget,
                requested: size,
                available: limit.saturating_sub(ptr),
            });
        }
        let new_ptr = ptr + needed;
        self.alloc_ptr.store(new_ptr, Ordering::Release);
        if padding > 0 {
            self.fill_dead_object(ptr, padding);
        }
        let obj = ptr + padding;
        zero_fill(obj, size);
        self.small_object_bytes.fetch_add(size, Ordering::Relaxed);
        Ok(obj)
    }

    /// Write a minimum-size dead (free-filler) object covering `[addr,
    /// addr+len)`. Used to satisfy `ALIGN8`/`ALIGN8_BIAS` and to flush a
    /// context's residual reservation into well-formed heap content before
    /// a collection (spec.md §4.4.2 phase 1, `fix_alloc_context`).
    pub fn fill_dead_object(&self, addr: usize, len: usize) {
        if len == 0 {
            return;
        }
        unsafe {
            std::ptr::write_bytes(addr as *mut u8, 0, len);
        }
    }

    /// Acquire a new `[alloc_ptr, alloc_limit)` reservation from the
    /// context's home heap. Sized to amortize overhead: small on a fresh
    /// context, growing up to the heap's configured allocation quantum —
    /// but never smaller than `size`, the request that triggered the slow
    /// path, so a single allocation bigger than the current quantum (but
    /// still under `LARGE_OBJECT_THRESHOLD`) doesn't spuriously fail.
    pub fn refill(&self, heap: &Heap, size: usize) -> Result<()> {
        let prev = self.last_refill_size.load(Ordering::Relaxed);
        let geometric = if prev == 0 { INITIAL_REFILL } else { (prev * 2).min(heap_quantum_cap(heap)) };
        let next = geometric.max(size);

        // Turn any residual reservation into a filler so the segment
        // contains only well-formed objects, matching the mutator-suspend
        // invariant of spec.md §4.4.2 phase 1 (done here eagerly so a
        // concurrent marker never observes a dangling reservation).
        let ptr = self.alloc_ptr.load(Ordering::Acquire);
        let limit = self.alloc_limit.load(Ordering::Acquire);
        if limit > ptr {
            self.fill_dead_object(ptr, limit - ptr);
        }

        let (start, end) = heap.reserve_ephemeral_window(next)?;
        self.alloc_ptr.store(start, Ordering::Release);
        self.alloc_limit.store(end, Ordering::Release);
        self.last_refill_size.store(next, Ordering::Relaxed);
        Ok(())
    }

    /// Flush `[alloc_ptr, alloc_limit)` to a filler object, used at thread
    /// detach and at safepoints (spec.md §6.1 `fix_alloc_context`).
    pub fn flush(&self) {
        let ptr = self.alloc_ptr.swap(0, Ordering::AcqRel);
        let limit = self.alloc_limit.swap(0, Ordering::AcqRel);
        if limit > ptr {
            self.fill_dead_object(ptr, limit - ptr);
        }
    }

    pub fn record_large_object(&self, size: usize) {
        self.large_object_bytes.fetch_add(size, Ordering::Relaxed);
    }

    pub fn current_heap(&self) -> usize {
        self.current_heap.load(Ordering::Relaxed)
    }

    pub fn set_current_heap(&self, id: usize) {
        self.current_heap.store(id, Ordering::Relaxed);
    }
}

fn heap_quantum_cap(heap: &Heap) -> usize {
    heap.allocation_quantum()
}

fn zero_fill(addr: usize, size: usize) {
    unsafe {
        std::ptr::write_bytes(addr as *mut u8, 0, size);
    }
}

/// Single-processor shared global allocation context, guarded by a
/// test-and-set spin lock: `-1` free, `0` held for the fast path, positive
/// contended/slow path (spec.md §4.1 "Single-processor mode").
pub struct GlobalAllocContext {
    lock: AtomicI32,
    pub context: AllocationContext,
}

impl GlobalAllocContext {
    pub fn new(home_heap: usize) -> Self {
        Self {
            lock: AtomicI32::new(-1),
            context: AllocationContext::new(home_heap),
        }
    }

    /// Attempt the lock-free fast-path transition from free (`-1`) to held
    /// (`0`). Returns `true` on success; the caller must call
    /// [`GlobalAllocContext::release`] before returning to the mutator.
    pub fn try_acquire_fast(&self) -> bool {
        self.lock.compare_exchange(-1, 0, Ordering::Acquire, Ordering::Relaxed).is_ok()
    }

    /// Blocking acquire for the contended slow path: marks the lock
    /// positive while waiting, then takes it.
    pub fn acquire_slow(&self) {
        self.lock.fetch_add(1, Ordering::AcqRel);
        loop {
            if self.lock.compare_exchange_weak(-1, 0, Ordering::Acquire, Ordering::Relaxed).is_ok() {
                return;
            }
            std::hint::spin_loop();
        }
    }

    /// Release the lock. A store fence precedes the release write so a
    /// concurrent acquirer observes a fully published allocation.
    pub fn release(&self) {
        std::sync::atomic::fence(Ordering::Release);
        self.lock.store(-1, Ordering::Release);
    }
}

/// Byte counter pair combined into one atomic for lock-free reads by
/// diagnostics, mirroring the context's own small/large counters at the
/// heap level.
#[derive(Default)]
pub struct ByteCounters {
    pub value: AtomicIsize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GcConfig;

    fn test_heap() -> Heap {
        Heap::new(0, &GcConfig { heap_segment_size: 4 * 1024 * 1024, ..Default::default() }).unwrap()
    }

    #[test]
    fn fast_path_bumps_pointer() {
        let heap = test_heap();
        let ctx = AllocationContext::new(0);
        ctx.refill(&heap, INITIAL_REFILL).unwrap();
        let a = ctx.allocate(&heap, 32, AllocFlags::NONE).unwrap();
        let b = ctx.allocate(&heap, 32, AllocFlags::NONE).unwrap();
        assert_eq!(b, a + 32);
    }

    #[test]
    fn align8_bias_inserts_filler() {
        let heap = test_heap();
        let ctx = AllocationContext::new(0);
        ctx.refill(&heap, INITIAL_REFILL).unwrap();
        // force ptr to a non-aligned-with-bias position
        ctx.allocate(&heap, 4, AllocFlags::NONE).unwrap();
        let a = ctx.allocate(&heap, 32, AllocFlags::ALIGN8_BIAS).unwrap();
        assert_eq!((a + 4) % 8, 0);
    }

    #[test]
    fn global_context_spin_lock_excludes() {
        let global = GlobalAllocContext::new(0);
        assert!(global.try_acquire_fast());
        assert!(!global.try_acquire_fast());
        global.release();
        assert!(global.try_acquire_fast());
    }
}
