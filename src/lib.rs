//! # tracegc - Segmented Generational Garbage Collector
//!
//! `tracegc` is a generational, segmented tracing collector for embedding in a
//! managed-language runtime, modeled on the generation/segment/card-table
//! design used by production .NET-style collectors rather than a
//! region-based or colored-pointer scheme.
//!
//! ## Overview
//!
//! - **Segmented heap**: gen 0 and gen 1 share one ephemeral segment
//!   (divided by a moving `gen1_end` boundary); gen 2 and the large-object
//!   heap each own a growable list of segments.
//! - **Generational collection**: young objects are collected far more
//!   often than old ones; survivors age and are promoted across gen 0 → 1
//!   → 2 once they outlive `tenure_threshold` minor collections.
//! - **Card-table write barriers**: old-to-young references are tracked at
//!   card granularity so a minor collection never has to scan the mature
//!   generation for roots.
//! - **Mark-compact / mark-sweep**: gen 0/1 are always compacted; gen 2 and
//!   the LOH are swept by default and compacted only on request
//!   ([`config::LohCompactionMode`]).
//! - **Background collector**: an optional concurrent gen-2/LOH collector
//!   that runs mostly alongside mutators, modeled as a one-way state
//!   machine ([`background::BgcState`]).
//! - **Frozen segments**: externally owned, read-only object ranges the
//!   collector traces but never relocates or frees.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use tracegc::{GcConfig, GcResult, Runtime};
//! use tracegc::runtime::NullCallbacks;
//! use tracegc::alloc::AllocFlags;
//! use tracegc::heap::GenId;
//!
//! fn main() -> GcResult<()> {
//!     let runtime = Runtime::new(GcConfig::default(), Arc::new(NullCallbacks))?;
//!     runtime.start()?;
//!
//!     let addr = runtime.gc().alloc(0, 64, AllocFlags::NONE)?;
//!     runtime.gc().register_root(addr, tracegc::marker::roots::RootType::Static, false);
//!
//!     runtime.request_gc(GenId::Gen0);
//!
//!     runtime.stop()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`alloc`]: bump-pointer allocation context, free lists, mature/LOH allocators
//! - [`background`]: the concurrent collector's state machine and segment change log
//! - [`barrier`]: card table, write barrier, software write-watch, shadow heap
//! - [`config`]: collector configuration and validation
//! - [`error`]: error types for all collector operations
//! - [`gc`]: the `GarbageCollector` orchestrator — allocation, barriers, and the cycle
//! - [`heap`]: segments, generations, frozen-segment registry, virtual memory
//! - [`logging`]: structured GC event logging
//! - [`marker`]: tricolor mark-and-sweep, root scanning, stack scanning
//! - [`object`]: object headers and type/reference-map descriptors
//! - [`relocate`]: plan/relocate/compact and sweep
//! - [`runtime`]: the VM-facing `Runtime`, safepoints, finalization, the `GcCallbacks` boundary
//! - [`stats`]: pause-time histograms and per-cycle statistics
//! - [`util`]: small shared helpers (alignment, atomics)
//!
//! ## Safety
//!
//! Most of `tracegc`'s public surface works in terms of raw heap addresses
//! (`usize`), not typed references — the managed object model lives on the
//! VM side of the [`runtime::GcCallbacks`] boundary. Callers must:
//!
//! 1. Register roots before they can be overwritten, and keep them
//!    registered for as long as the address must stay reachable.
//! 2. Route every store of a heap reference through
//!    [`gc::GarbageCollector::write_barrier`] (or
//!    [`gc::GarbageCollector::set_cards_after_bulk_copy`] for bulk copies).
//! 3. Never read a stale address across a collection without applying
//!    forwarding first — collected generations may be compacted.

pub mod alloc;
pub mod background;
pub mod barrier;
pub mod config;
pub mod error;
pub mod gc;
pub mod heap;
pub mod logging;
pub mod marker;
pub mod object;
pub mod relocate;
pub mod runtime;
pub mod stats;
pub mod util;

pub use config::GcConfig;
pub use error::{GcError, Result as GcResult};
pub use gc::{GarbageCollector, GcReason, GcState};
pub use runtime::Runtime;

/// Crate version string from Cargo.toml.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validation() {
        let config = GcConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_version_not_empty() {
        assert!(!VERSION.is_empty());
    }
}
