//! Runtime Module - GC Runtime Integration
//!
//! Module ini mengintegrasikan `GarbageCollector` dengan embedding VM
//! melalui `GcCallbacks` (spec.md §6.1/§6.2). Mengelola:
//! - GC initialization dan lifecycle
//! - Safepoint checks dari mutator thread
//! - Finalizer queue draining

pub mod callbacks;
pub mod finalizer;
pub mod safepoint;

pub use callbacks::{GcCallbacks, HandleKind, NullCallbacks, TypeInfo};
pub use finalizer::Finalizer;
pub use safepoint::SafepointManager;

use std::sync::Arc;
use std::time::Duration;

use crate::config::GcConfig;
use crate::error::Result;
use crate::gc::GarbageCollector;

/// Runtime - thin VM-facing wrapper around [`GarbageCollector`].
///
/// Mengkoordinasikan lifecycle collector dan memberi mutator thread titik
/// masuk tunggal (`allocate`, `check_safepoint`, `request_gc`) tanpa harus
/// menyentuh `GarbageCollector` langsung.
pub struct Runtime {
    gc: Arc<GarbageCollector>,
    state: std::sync::Mutex<RuntimeState>,
}

impl Runtime {
    /// Create a new runtime. `callbacks` is the embedding VM's
    /// implementation of the GC→VM boundary (spec.md §6.2).
    pub fn new(config: GcConfig, callbacks: Arc<dyn GcCallbacks>) -> Result<Self> {
        let gc = Arc::new(GarbageCollector::new(config, callbacks)?);
        Ok(Self {
            gc,
            state: std::sync::Mutex::new(RuntimeState::Initialized),
        })
    }

    /// Mark the runtime running. The collector itself needs no start step
    /// beyond construction; this only flips the reported lifecycle state.
    pub fn start(&self) -> Result<()> {
        *self.state.lock()? = RuntimeState::Running;
        Ok(())
    }

    pub fn stop(&self) -> Result<()> {
        *self.state.lock()? = RuntimeState::Stopped;
        Ok(())
    }

    pub fn gc(&self) -> &Arc<GarbageCollector> {
        &self.gc
    }

    pub fn state(&self) -> RuntimeState {
        *self.state.lock().expect("lock poisoned")
    }

    /// Allocate through heap `heap_id`'s allocation context.
    pub fn allocate(&self, heap_id: usize, size: usize) -> Result<usize> {
        self.gc.alloc(heap_id, size, crate::alloc::AllocFlags::NONE)
    }

    /// Request an explicit collection of `generation` (spec.md §6.1 `collect`).
    pub fn request_gc(&self, generation: crate::heap::GenId) {
        let _ = self.gc.collect_explicit(generation);
    }

    /// Block the calling thread until no collection is in progress.
    ///
    /// The collector suspends mutators itself when
    /// `GcCallbacks::owns_suspension` returns `true`; this helper is for
    /// VMs that instead poll from their own interruption points.
    pub fn check_safepoint(&self) {
        while self.gc.is_collecting() {
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}

/// Runtime lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    /// Runtime belum di-start.
    Initialized,
    /// Runtime berjalan normal.
    Running,
    /// Runtime sudah stop.
    Stopped,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::callbacks::NullCallbacks;

    #[test]
    fn runtime_starts_and_allocates() {
        let runtime = Runtime::new(GcConfig::default(), Arc::new(NullCallbacks)).unwrap();
        runtime.start().unwrap();
        let addr = runtime.allocate(0, 64).unwrap();
        assert_ne!(addr, 0);
        runtime.stop().unwrap();
    }
}
