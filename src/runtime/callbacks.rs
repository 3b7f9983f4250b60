//! The VM boundary described by spec.md §6.1 is only one direction of the
//! interface; this is the other direction — services the collector calls
//! back into the embedding runtime for during a cycle (spec.md §6.2).
//! Grounded on `IGCToCLR` in
//! `examples/original_source/src/vm/gcheaputilities.h`: that interface is
//! how CoreCLR's GC asks the VM for stack roots, handle-table roots, type
//! information, and OS services without linking against the VM directly.
//! An embedder implements this trait once and hands an `Arc<dyn
//! GcCallbacks>` to [`crate::gc::GarbageCollector::new`].

use crate::marker::roots::StackRange;
use crate::object::refmap::TypeDescHandle;

/// Which handle-table bucket a root came from, mirroring
/// `IGCToCLR::GcScanHandles`'s handle kinds (spec.md §6.2 "handle-table
/// root enumeration: strong/pinned/dependent/weak").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    Strong,
    Pinned,
    Dependent,
    Weak,
}

/// Type descriptor as the VM understands it — enough for the collector to
/// size an object and find its embedded references without ever looking at
/// payload bytes (spec.md §3.1).
#[derive(Debug, Clone, Copy)]
pub struct TypeInfo {
    pub instance_size: usize,
    pub may_contain_refs: bool,
    pub finalizable: bool,
}

/// VM-provided services the collector calls into during a cycle.
///
/// None of these may allocate GC memory or call back into the collector —
/// they run while mutators are suspended or, for the handle/stack
/// enumerations, while the caller already holds whatever lock makes the
/// enumeration safe.
pub trait GcCallbacks: Send + Sync {
    /// Every live mutator thread's stack (and, conservatively, register
    /// spill) range for the stack scan of spec.md §4.4.2 step 2.
    fn enumerate_stacks(&self) -> Vec<StackRange>;

    /// Walk every handle-table slot of `kind`, invoking `visit` with its
    /// current value. Called once per `HandleKind` per cycle.
    fn enumerate_handles(&self, kind: HandleKind, visit: &mut dyn FnMut(usize));

    /// Look up the type descriptor a scanned object claims to be. `None`
    /// means the handle is stale — a collector bug, not a VM one — and the
    /// caller should treat it as `GcError::Internal`.
    fn type_info(&self, handle: TypeDescHandle) -> Option<TypeInfo>;

    /// Run the registered finalizer for `object`. Invoked by whichever
    /// thread drains [`crate::runtime::finalizer::Finalizer`]; the
    /// collector itself never executes user code.
    fn run_finalizer(&self, object: usize);

    /// Millisecond tick count used for `GcConfig::gc_interval_ms` pacing.
    fn tick_count_ms(&self) -> u64;

    /// Total physical memory visible to the process, for the heap-size
    /// defaulting of spec.md §6.4.
    fn physical_memory_limit(&self) -> usize;

    /// Called after the card table is resized (segment growth) so the VM
    /// can repoint whatever base/bounds it has inlined into JIT-compiled
    /// write barriers. Mirrors `IGCToCLR::StompWriteBarrierResize`.
    fn stomp_write_barrier_resize(&self, card_table_base: usize, lowest_address: usize, highest_address: usize);

    /// Called after the ephemeral generation's bounds move, for the same
    /// reason. Mirrors `IGCToCLR::StompWriteBarrierEphemeral`.
    fn stomp_write_barrier_ephemeral(&self, ephemeral_low: usize, ephemeral_high: usize);

    /// `false` means the VM has already brought every mutator to a
    /// safepoint before calling `collect` and the collector must not try
    /// to suspend threads itself. Most embedders return `true`.
    fn owns_suspension(&self) -> bool {
        true
    }
}

/// A [`GcCallbacks`] with no mutator threads and no handles, for
/// single-threaded embedding and unit tests that only need allocation and
/// collection, not root enumeration from an external VM.
pub struct NullCallbacks;

impl GcCallbacks for NullCallbacks {
    fn enumerate_stacks(&self) -> Vec<StackRange> {
        Vec::new()
    }

    fn enumerate_handles(&self, _kind: HandleKind, _visit: &mut dyn FnMut(usize)) {}

    fn type_info(&self, _handle: TypeDescHandle) -> Option<TypeInfo> {
        None
    }

    fn run_finalizer(&self, _object: usize) {}

    fn tick_count_ms(&self) -> u64 {
        0
    }

    fn physical_memory_limit(&self) -> usize {
        0
    }

    fn stomp_write_barrier_resize(&self, _card_table_base: usize, _lowest_address: usize, _highest_address: usize) {}

    fn stomp_write_barrier_ephemeral(&self, _ephemeral_low: usize, _ephemeral_high: usize) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_callbacks_enumerate_nothing() {
        let cb = NullCallbacks;
        assert!(cb.enumerate_stacks().is_empty());
        let mut seen = Vec::new();
        cb.enumerate_handles(HandleKind::Strong, &mut |a| seen.push(a));
        assert!(seen.is_empty());
    }
}
