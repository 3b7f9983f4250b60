//! Error types for the collector.

use std::sync::PoisonError;
use thiserror::Error;

/// Reason an allocation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OomReason {
    /// Allocation exceeded the generation's current budget.
    Budget,
    /// Segment commit failed.
    CantCommit,
    /// Segment reservation failed.
    CantReserve,
    /// LOH allocation failed even after a blocking full GC.
    Loh,
    /// Triggered by an OS low-memory notification.
    LowMem,
    /// A full GC ran and reclaimed less than the configured threshold.
    UnproductiveFullGc,
}

/// Main error type for all collector operations.
#[derive(Debug, Error)]
pub enum GcError {
    #[error("out of memory ({reason:?}): requested {requested} bytes, available {available} bytes")]
    OutOfMemory {
        reason: OomReason,
        requested: usize,
        available: usize,
    },

    #[error("allocation refused: no-GC region in effect and budget exhausted")]
    Stopped,

    #[error("collector initialization failed: {0}")]
    InitializationFailure(String),

    #[error("invalid heap pointer: {address:#x}")]
    InvalidPointer { address: usize },

    #[error("segment reservation failed: {reason}")]
    ReserveSegment { reason: String },

    #[error("segment commit failed at segment base ({reason})")]
    CommitSegmentBegin { reason: String },

    #[error("ephemeral segment commit failed: {reason}")]
    CommitEphSegment { reason: String },

    #[error("card table commit failed: {reason}")]
    CommitTable { reason: String },

    #[error("concurrent modification detected during {operation}")]
    ConcurrentModification { operation: String },

    #[error("GC cycle failed: {reason}")]
    GcCycleFailed { reason: String },

    #[error("marking phase failed: {0}")]
    MarkingFailed(String),

    #[error("relocation phase failed: {0}")]
    RelocationFailed(String),

    #[error("forwarding table error: {0}")]
    ForwardingTableError(String),

    #[error("allocation context error: {0}")]
    ContextError(String),

    #[error("virtual memory error: {0}")]
    VirtualMemoryError(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("lock poisoned: {0}")]
    LockPoisoned(String),

    #[error("invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("bounds check failed: index {index} out of bounds for length {length}")]
    BoundsCheckFailed { index: usize, length: usize },

    #[error("alignment error: address {address:#x} is not aligned to {alignment} bytes")]
    AlignmentError { address: usize, alignment: usize },

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("no-GC region exceeded its reservation")]
    NoGcRegionExceeded,

    #[error("no-GC region is not in progress")]
    NoGcRegionNotInProgress,

    #[error("a no-GC region is already in progress")]
    NoGcRegionAlreadyInProgress,

    #[error("allocation after finalizer-queue shutdown")]
    ShutdownInProgress,
}

impl GcError {
    /// Whether the caller can reasonably retry after this error. Most
    /// out-of-memory reasons are transient resource pressure; an
    /// unproductive full GC means more collection won't help.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            GcError::OutOfMemory {
                reason: OomReason::Budget | OomReason::CantCommit | OomReason::CantReserve | OomReason::LowMem,
                ..
            } | GcError::Timeout(_)
        )
    }

    /// Whether this error indicates an internal invariant violation rather
    /// than ordinary resource pressure. These are fatal and should abort a
    /// collection cycle rather than be retried.
    pub fn is_bug(&self) -> bool {
        matches!(
            self,
            GcError::InvalidState { .. }
                | GcError::BoundsCheckFailed { .. }
                | GcError::Internal(_)
                | GcError::LockPoisoned(_)
        )
    }
}

impl<T> From<PoisonError<T>> for GcError {
    fn from(err: PoisonError<T>) -> Self {
        GcError::LockPoisoned(err.to_string())
    }
}

/// Result type alias for collector operations.
pub type Result<T> = std::result::Result<T, GcError>;

/// Which memory-management call failed while the collector was trying to
/// grow a segment or the card table, kept alongside [`FailureHistory`] so a
/// repeated OOM can be diagnosed without re-running the collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GetMemoryFailure {
    #[default]
    None,
    ReserveSegment,
    CommitSegmentBegin,
    CommitEphSegment,
    CommitTable,
}

/// Per-collection failure-history record, retained across cycles so repeated
/// allocation failures can be diagnosed without re-running the collector.
#[derive(Debug, Clone)]
pub struct FailureHistory {
    pub reason: OomReason,
    pub attempted_size: usize,
    pub reserved_ptr: usize,
    pub allocated_ptr: usize,
    pub gc_index: u64,
    pub size: usize,
    pub pagefile_mb: usize,
    pub loh_flag: bool,
    pub get_memory_failure: GetMemoryFailure,
}

/// Handle a mutex/rwlock result, converting poison into `GcError`.
#[macro_export]
macro_rules! lock_result {
    ($lock:expr) => {
        $lock.map_err(|e| $crate::error::GcError::from(e))
    };
}

/// Early-return with a formatted error.
#[macro_export]
macro_rules! bail {
    ($err:expr) => {
        return Err($err.into())
    };
    ($fmt:expr, $($arg:tt)*) => {
        return Err($crate::error::GcError::Internal(format!($fmt, $($arg)*)))
    };
}

/// Return an error unless the condition holds.
#[macro_export]
macro_rules! ensure {
    ($cond:expr, $err:expr) => {
        if !$cond {
            return Err($err);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oom_recoverable_but_unproductive_is_not() {
        let budget = GcError::OutOfMemory {
            reason: OomReason::Budget,
            requested: 16,
            available: 0,
        };
        assert!(budget.is_recoverable());

        let unproductive = GcError::OutOfMemory {
            reason: OomReason::UnproductiveFullGc,
            requested: 16,
            available: 0,
        };
        assert!(!unproductive.is_recoverable());
    }

    #[test]
    fn invalid_state_is_a_bug() {
        let err = GcError::InvalidState {
            expected: "Idle".into(),
            actual: "Marking".into(),
        };
        assert!(err.is_bug());
    }
}
