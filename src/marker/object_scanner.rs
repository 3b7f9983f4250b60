//! Walks one object's reference fields using its [`TypeDesc`] (spec.md
//! §4.4.2 "mark phase"): the fixed reference map for the instance, then —
//! for arrays — the per-element reference map repeated over every
//! element, derived from the object's total size.

use crate::object::header::ObjectHeader;
use crate::object::refmap::{TypeDesc, TypeRegistry};

#[derive(Debug, Default, Clone, Copy)]
pub struct ObjectScanStats {
    pub objects_scanned: u64,
    pub references_found: u64,
}

/// Visit every reference-field address within the object at `object_addr`,
/// calling `visit(slot_address, value)` for each non-null slot. Returns the
/// number of slots visited (not just non-null ones, to match CoreCLR's
/// `promoted_bytes` accounting which counts scanned width).
pub fn scan_object(
    object_addr: usize,
    registry: &TypeRegistry,
    visit: &mut dyn FnMut(usize, usize),
) -> Result<u32, crate::error::GcError> {
    let header = unsafe { &*(object_addr as *const ObjectHeader) };
    let desc = registry
        .lookup(header.type_desc())
        .ok_or(crate::error::GcError::InvalidPointer { address: object_addr })?;

    let payload = object_addr + std::mem::size_of::<ObjectHeader>();
    let mut visited = 0u32;

    for offset in desc.fixed_refs.offsets() {
        visit_slot(payload + offset, visit);
        visited += 1;
    }

    if let Some((elem_size, elem_refs)) = desc.element {
        let array_bytes = header.size().saturating_sub(desc.instance_size);
        let count = if elem_size == 0 { 0 } else { array_bytes / elem_size };
        let elements_start = payload + (desc.instance_size - std::mem::size_of::<ObjectHeader>());
        for i in 0..count {
            let elem_base = elements_start + i * elem_size;
            for offset in elem_refs.offsets() {
                visit_slot(elem_base + offset, visit);
                visited += 1;
            }
        }
    }

    Ok(visited)
}

fn visit_slot(slot_address: usize, visit: &mut dyn FnMut(usize, usize)) {
    let value = unsafe { *(slot_address as *const usize) };
    if value != 0 {
        visit(slot_address, value);
    }
}

/// Conservative scan: when a type descriptor is unavailable (e.g. during a
/// stack scan over raw frame words), treat every `SLOT_SIZE`-aligned word
/// in `[start, end)` as a potential reference and let the caller validate
/// it against `Heap::is_heap_pointer` before trusting it.
pub fn scan_conservative(start: usize, end: usize, visit: &mut dyn FnMut(usize, usize)) {
    let mut addr = start;
    while addr + 8 <= end {
        let value = unsafe { *(addr as *const usize) };
        if value != 0 {
            visit(addr, value);
        }
        addr += 8;
    }
}

pub fn type_desc_of(header: &ObjectHeader, registry: &TypeRegistry) -> Option<TypeDesc> {
    registry.lookup(header.type_desc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::header::ObjectHeader;
    use crate::object::refmap::RefMap;

    #[test]
    fn scans_fixed_reference_fields() {
        let registry = TypeRegistry::new();
        let handle = registry.register(TypeDesc {
            instance_size: 32,
            fixed_refs: RefMap::new(&[0, 8]),
            element: None,
            may_contain_refs: true,
            finalizable: false,
        });

        let mut buf = [0u8; 64];
        let base = buf.as_mut_ptr() as usize;
        unsafe {
            (base as *mut ObjectHeader).write(ObjectHeader::new(handle, 32));
            let payload = base + std::mem::size_of::<ObjectHeader>();
            *((payload) as *mut usize) = 0xAAAA;
            *((payload + 8) as *mut usize) = 0;
        }

        let mut found = Vec::new();
        let visited = scan_object(base, &registry, &mut |slot, value| found.push((slot, value))).unwrap();
        assert_eq!(visited, 2);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].1, 0xAAAA);
    }
}
