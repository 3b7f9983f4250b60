//! GC-managed object model.
//!
//! The collector locates a heap object's embedded references through its
//! [`refmap::TypeDesc`], never by inspecting payload bytes directly
//! (spec.md §3.1).

pub mod header;
pub mod refmap;

pub use header::{ObjectHeader, MIN_OBJECT_SIZE};
pub use refmap::{ObjHandle, RefMap, TypeDesc, TypeDescHandle, TypeRegistry};
