//! Frozen-segment registration (spec.md §4.2.3): externally owned,
//! read-only object regions the collector must trace but never relocate,
//! sweep, or free.

use std::sync::RwLock;

use crate::error::{GcError, Result};
use crate::heap::segment::Segment;

/// Info the VM supplies when registering a frozen segment.
#[derive(Debug, Clone, Copy)]
pub struct FrozenSegmentInfo {
    pub base: usize,
    pub first_object: usize,
    pub allocated: usize,
    pub committed: usize,
    pub reserved: usize,
}

/// Opaque handle returned by [`FrozenRegistry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrozenHandle(u64);

struct Entry {
    handle: FrozenHandle,
    segment: Segment,
    info: FrozenSegmentInfo,
}

/// Registry of frozen segments, guarded by a single lock so registration,
/// unregistration, and the collector's scan-set iteration never observe a
/// torn list.
#[derive(Default)]
pub struct FrozenRegistry {
    entries: RwLock<Vec<Entry>>,
    next_id: std::sync::atomic::AtomicU64,
}

impl FrozenRegistry {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            next_id: std::sync::atomic::AtomicU64::new(1),
        }
    }

    pub fn register(&self, info: FrozenSegmentInfo) -> FrozenHandle {
        let id = self.next_id.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let handle = FrozenHandle(id);
        let segment = Segment::register_frozen(info.base, info.first_object, info.allocated, info.reserved);
        self.entries.write().unwrap().push(Entry { handle, segment, info });
        handle
    }

    /// Unregistration is legal only when no collection is in progress and
    /// the segment's objects are unreachable from the rest of the heap;
    /// the caller (the collector orchestrator) is responsible for that
    /// check — this method only removes bookkeeping.
    pub fn unregister(&self, handle: FrozenHandle) -> Result<()> {
        let mut entries = self.entries.write().unwrap();
        let before = entries.len();
        entries.retain(|e| e.handle != handle);
        if entries.len() == before {
            return Err(GcError::InvalidArgument(format!(
                "unknown frozen-segment handle {handle:?}"
            )));
        }
        Ok(())
    }

    pub fn info(&self, handle: FrozenHandle) -> Option<FrozenSegmentInfo> {
        self.entries
            .read()
            .unwrap()
            .iter()
            .find(|e| e.handle == handle)
            .map(|e| e.info)
    }

    /// Scan-set iteration: `(base, first_object, allocated)` triples for
    /// every registered frozen segment, used by the marker to treat
    /// in-range references as roots (spec.md §4.2.3).
    pub fn for_each(&self, mut f: impl FnMut(usize, usize, usize)) {
        for entry in self.entries.read().unwrap().iter() {
            f(entry.segment.base(), entry.segment.first_object(), entry.segment.allocated_end());
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_unregister_round_trips() {
        let registry = FrozenRegistry::new();
        let handle = registry.register(FrozenSegmentInfo {
            base: 0x1000,
            first_object: 0x1010,
            allocated: 0x2000,
            committed: 0x2000,
            reserved: 0x3000,
        });
        assert_eq!(registry.len(), 1);
        registry.unregister(handle).unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn unregister_unknown_handle_errs() {
        let registry = FrozenRegistry::new();
        assert!(registry.unregister(FrozenHandle(999)).is_err());
    }
}
