//! Shared fixtures for the integration-test suite: a small-segment
//! `GarbageCollector` wired to `NullCallbacks`, plus a handful of assertion
//! helpers used across multiple test files.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracegc::alloc::AllocFlags;
use tracegc::config::GcConfig;
use tracegc::error::Result;
use tracegc::gc::GarbageCollector;
use tracegc::object::header::ObjectHeader;
use tracegc::object::refmap::TypeDescHandle;
use tracegc::runtime::callbacks::NullCallbacks;

pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Segment size kept just above the 4 MiB validation floor so test heaps
/// fill up (and trigger collections) after a few thousand small objects
/// instead of needing millions.
pub fn small_heap_config() -> GcConfig {
    GcConfig {
        heap_segment_size: 4 * 1024 * 1024,
        verbose: false,
        ..GcConfig::default()
    }
}

pub struct GcFixture {
    pub gc: Arc<GarbageCollector>,
}

impl GcFixture {
    pub fn with_defaults() -> Self {
        Self::with_config(small_heap_config())
    }

    pub fn with_config(config: GcConfig) -> Self {
        let gc = Arc::new(GarbageCollector::new(config, Arc::new(NullCallbacks)).expect("gc init"));
        Self { gc }
    }

    pub fn allocate(&self, size: usize) -> Result<usize> {
        self.gc.alloc(0, size, AllocFlags::NONE)
    }

    pub fn allocate_large(&self, size: usize) -> Result<usize> {
        self.gc.alloc_loh(0, size)
    }

    pub fn cycle_count(&self) -> u64 {
        self.gc.get_gc_count()
    }

    pub fn trigger_gc(&self, generation: tracegc::heap::GenId) {
        let _ = self.gc.collect_explicit(generation);
    }
}

/// Publish an `ObjectHeader` at `addr`, the way a real embedding VM would
/// after `GarbageCollector::alloc` hands back zero-filled, unpublished
/// memory (spec.md §4.2.4). Tests that want the marker to treat an
/// allocation as a live object — rather than leaving it as inert bytes the
/// collector never walks — must call this before registering it as a root.
pub fn publish_object(addr: usize, type_desc: TypeDescHandle, size: usize) {
    unsafe {
        std::ptr::write(addr as *mut ObjectHeader, ObjectHeader::new(type_desc, size));
    }
}

/// Write `value` into the reference slot at `object_addr + offset`,
/// routing it through the collector's write barrier so the card table and
/// shadow heap observe the store (spec.md §4.5).
pub fn write_ref_field(gc: &GarbageCollector, object_addr: usize, offset: usize, value: usize) {
    let slot = object_addr + std::mem::size_of::<ObjectHeader>() + offset;
    unsafe {
        *(slot as *mut usize) = value;
    }
    gc.write_barrier(slot, value);
}

#[allow(dead_code)]
pub fn assert_all_addresses_unique(addresses: &[usize], context: &str) {
    let mut sorted = addresses.to_vec();
    sorted.sort_unstable();
    let mut deduped = sorted.clone();
    deduped.dedup();
    assert_eq!(
        sorted.len(),
        deduped.len(),
        "{context}: duplicate address returned by allocator"
    );
}

#[allow(dead_code)]
pub fn assert_gc_completed(fixture: &GcFixture, before: u64) {
    assert!(
        fixture.cycle_count() > before,
        "expected a collection to have run (before={before}, after={})",
        fixture.cycle_count()
    );
}

#[allow(dead_code)]
pub fn assert_gc_cycle_increased(before: u64, after: u64) {
    assert!(after > before, "GC cycle count did not increase: before={before}, after={after}");
}

#[allow(dead_code)]
pub fn assert_completed_within_timeout(f: impl FnOnce() + Send + 'static, timeout: Duration, label: &str) {
    let start = Instant::now();
    let handle = std::thread::spawn(f);
    loop {
        if handle.is_finished() {
            handle.join().expect("closure panicked");
            return;
        }
        if start.elapsed() >= timeout {
            panic!("{label} did not complete within {timeout:?}");
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}
