//! Mark phase (spec.md §4.4.2): tricolor mark-and-sweep driven by an
//! explicit mark stack — never recursion, so arbitrarily deep object
//! graphs cannot blow the collector's own stack. Root scanning, stack
//! scanning, and per-object reference scanning are split into their own
//! submodules; worker-thread parallelism for a background mark lives in
//! [`crate::background::threads`], which drains the same [`MarkQueue`].

pub mod mark_queue;
pub mod object_scanner;
pub mod roots;
pub mod stack_scan;

pub use mark_queue::{LocalWorkQueue, MarkQueue, MarkQueueStats};
pub use object_scanner::{scan_conservative, scan_object, ObjectScanStats};
pub use roots::{RootDescriptor, RootHandle, RootScanner, RootStats, RootType};
pub use stack_scan::{scan_stacks, StackRange, StackScanStats};

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::Result;
use crate::heap::HeapTopology;
use crate::object::header::ObjectHeader;
use crate::object::refmap::TypeRegistry;

/// Owns the mark stack and root scanner for one collection cycle. Not
/// `Clone` — a single `Marker` is shared behind an `Arc` by whichever
/// threads (one for a blocking cycle, several for a background cycle)
/// are draining `queue`.
pub struct Marker {
    pub queue: MarkQueue,
    pub roots: RootScanner,
    marked_count: AtomicU64,
}

impl Default for Marker {
    fn default() -> Self {
        Self::new()
    }
}

impl Marker {
    pub fn new() -> Self {
        Self {
            queue: MarkQueue::new(),
            roots: RootScanner::new(),
            marked_count: AtomicU64::new(0),
        }
    }

    /// Seed the mark stack from registered roots and, when supplied,
    /// scanned thread stacks. Objects already marked this cycle (checked
    /// via `try_mark`) are not re-enqueued.
    pub fn seed_roots(&self, stacks: &[StackRange], topology: &HeapTopology) {
        self.roots.scan_roots(|addr| self.try_enqueue(addr));
        scan_stacks(stacks, topology, |addr| self.try_enqueue(addr));
    }

    fn try_enqueue(&self, object_addr: usize) {
        let header = unsafe { &*(object_addr as *const ObjectHeader) };
        if header.try_mark() {
            self.queue.push(object_addr);
            self.marked_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Drain the mark stack until empty, scanning each object's reference
    /// fields and enqueueing any unmarked referent. Safe to call from
    /// multiple threads concurrently — `try_mark` is the only place an
    /// object transitions white→grey, so no object is scanned twice.
    pub fn drain(&self, registry: &TypeRegistry) -> Result<()> {
        while let Some(object_addr) = self.queue.pop() {
            scan_object(object_addr, registry, &mut |_slot, value| {
                self.try_enqueue(value);
            })?;
        }
        Ok(())
    }

    pub fn marked_count(&self) -> u64 {
        self.marked_count.load(Ordering::Relaxed)
    }

    /// Reset for the next cycle. The mark bits themselves are cleared
    /// object-by-object during sweep (`ObjectHeader::reset_for_next_cycle`);
    /// this only resets the marker's own bookkeeping.
    pub fn reset(&self) {
        self.queue.clear();
        self.marked_count.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::refmap::{RefMap, TypeDesc};

    #[test]
    fn drain_marks_transitive_closure() {
        let registry = TypeRegistry::new();
        let handle = registry.register(TypeDesc {
            instance_size: 32,
            fixed_refs: RefMap::new(&[0]),
            element: None,
            may_contain_refs: true,
            finalizable: false,
        });

        let mut leaf_buf = [0u8; 32];
        let leaf = leaf_buf.as_mut_ptr() as usize;
        unsafe { (leaf as *mut ObjectHeader).write(ObjectHeader::new(handle, 32)) };

        let mut root_buf = [0u8; 32];
        let root = root_buf.as_mut_ptr() as usize;
        unsafe {
            (root as *mut ObjectHeader).write(ObjectHeader::new(handle, 32));
            *((root + std::mem::size_of::<ObjectHeader>()) as *mut usize) = leaf;
        }

        let marker = Marker::new();
        marker.try_enqueue(root);
        marker.drain(&registry).unwrap();

        let leaf_header = unsafe { &*(leaf as *const ObjectHeader) };
        assert!(leaf_header.is_marked(std::sync::atomic::Ordering::Relaxed));
        assert_eq!(marker.marked_count(), 2);
    }
}
