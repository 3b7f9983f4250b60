//! Type descriptors and the reference map the collector walks to find
//! embedded pointers, plus the opaque handle type objects are addressed by.
//!
//! Each bit in a [`RefMap`] represents one 8-byte slot of an object's
//! payload: bit set means "this slot holds a managed reference". Arrays
//! additionally carry a per-element `RefMap` applied repeatedly across
//! `length` elements, covering spec.md §3.1's "possibly plus a length
//! field for arrays".

use std::collections::HashMap;
use std::sync::RwLock;

/// Size of each slot tracked by the reference map, in bytes.
pub const SLOT_SIZE: usize = 8;

/// Maximum number of fixed reference fields tracked per object; limited by
/// the 64-bit bitmap backing a [`RefMap`].
pub const MAX_REFS: usize = 64;

/// Opaque handle to a managed object: a newtype over a machine address.
/// Every dereference is required to pass through [`TypeRegistry::lookup`]
/// before bytes are interpreted, per SPEC_FULL.md §9's handle-newtype
/// design note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjHandle(usize);

impl ObjHandle {
    /// Construct a handle from a raw heap address. Safety: `address` must
    /// be the address of a live, published object header; this is the
    /// unsafe VM boundary conversion SPEC_FULL.md §9 calls for.
    pub unsafe fn from_raw(address: usize) -> Self {
        ObjHandle(address)
    }

    #[inline]
    pub fn as_usize(self) -> usize {
        self.0
    }

    #[inline]
    pub fn as_ptr(self) -> *mut u8 {
        self.0 as *mut u8
    }
}

/// Handle to a type descriptor, stable for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TypeDescHandle(u32);

impl TypeDescHandle {
    pub const fn new(id: u32) -> Self {
        TypeDescHandle(id)
    }

    pub fn id(self) -> u32 {
        self.0
    }
}

/// Bitmap of fixed reference-field offsets within an object's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RefMap {
    bits: u64,
}

impl RefMap {
    /// Build a reference map from a list of byte offsets, each of which
    /// must be a multiple of [`SLOT_SIZE`] and less than
    /// `MAX_REFS * SLOT_SIZE`.
    pub fn new(offsets: &[usize]) -> Self {
        let mut bits = 0u64;
        for &off in offsets {
            debug_assert_eq!(off % SLOT_SIZE, 0, "reference offset must be slot-aligned");
            let slot = off / SLOT_SIZE;
            debug_assert!(slot < MAX_REFS, "reference offset exceeds MAX_REFS");
            bits |= 1 << slot;
        }
        RefMap { bits }
    }

    pub fn is_reference(&self, offset: usize) -> bool {
        if offset % SLOT_SIZE != 0 {
            return false;
        }
        let slot = offset / SLOT_SIZE;
        slot < MAX_REFS && (self.bits & (1 << slot)) != 0
    }

    pub fn count(&self) -> u32 {
        self.bits.count_ones()
    }

    /// Iterate the byte offsets of every reference-carrying slot.
    pub fn offsets(&self) -> impl Iterator<Item = usize> + '_ {
        (0..MAX_REFS).filter(move |slot| self.bits & (1 << slot) != 0).map(|slot| slot * SLOT_SIZE)
    }
}

/// Layout of one managed type, as the VM would describe it through
/// `GcCallbacks::type_desc` (spec.md §6.2 "type descriptor queries").
#[derive(Debug, Clone)]
pub struct TypeDesc {
    /// Fixed (non-array) instance size, including the header.
    pub instance_size: usize,
    /// Reference offsets within the fixed part of the instance.
    pub fixed_refs: RefMap,
    /// If this type is an array, the per-element size and reference map;
    /// the actual length is carried per-object (see [`TypeRegistry`]).
    pub element: Option<(usize, RefMap)>,
    pub may_contain_refs: bool,
    pub finalizable: bool,
}

impl TypeDesc {
    pub fn is_array(&self) -> bool {
        self.element.is_some()
    }

    /// Full object size given an element count (0 for non-arrays).
    pub fn size_for(&self, array_len: usize) -> usize {
        match self.element {
            Some((elem_size, _)) => self.instance_size + elem_size * array_len,
            None => self.instance_size,
        }
    }
}

/// A process-wide map from [`TypeDescHandle`] to [`TypeDesc`], standing in
/// for the VM's real metadata tables at the collector/VM boundary.
#[derive(Default)]
pub struct TypeRegistry {
    types: RwLock<HashMap<TypeDescHandle, TypeDesc>>,
    next_id: std::sync::atomic::AtomicU32,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self {
            types: RwLock::new(HashMap::new()),
            next_id: std::sync::atomic::AtomicU32::new(1),
        }
    }

    pub fn register(&self, desc: TypeDesc) -> TypeDescHandle {
        let id = self
            .next_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let handle = TypeDescHandle::new(id);
        self.types.write().unwrap().insert(handle, desc);
        handle
    }

    pub fn lookup(&self, handle: TypeDescHandle) -> Option<TypeDesc> {
        self.types.read().unwrap().get(&handle).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refmap_tracks_offsets() {
        let map = RefMap::new(&[0, 16]);
        assert!(map.is_reference(0));
        assert!(!map.is_reference(8));
        assert!(map.is_reference(16));
        assert_eq!(map.count(), 2);
        assert_eq!(map.offsets().collect::<Vec<_>>(), vec![0, 16]);
    }

    #[test]
    fn registry_round_trips() {
        let registry = TypeRegistry::new();
        let handle = registry.register(TypeDesc {
            instance_size: 32,
            fixed_refs: RefMap::new(&[8]),
            element: None,
            may_contain_refs: true,
            finalizable: false,
        });
        let desc = registry.lookup(handle).unwrap();
        assert_eq!(desc.instance_size, 32);
        assert!(desc.fixed_refs.is_reference(8));
    }

    #[test]
    fn array_size_includes_elements() {
        let desc = TypeDesc {
            instance_size: 24,
            fixed_refs: RefMap::default(),
            element: Some((8, RefMap::new(&[0]))),
            may_contain_refs: true,
            finalizable: false,
        };
        assert_eq!(desc.size_for(10), 24 + 80);
    }
}
