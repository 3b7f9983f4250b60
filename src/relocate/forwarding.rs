//! Relocate phase (spec.md §4.4.2 step 4): update every reference — roots,
//! interior object pointers, and dirty-card-derived references — using
//! the forwarding offset the plan phase wrote into each survivor's mark
//! word. Pinned objects were never planned a new address, so fixing up a
//! reference to one is a no-op by construction.

use crate::error::Result;
use crate::heap::HeapTopology;
use crate::marker::roots::RootScanner;
use crate::marker::scan_object;
use crate::object::header::ObjectHeader;
use crate::object::refmap::TypeRegistry;

#[derive(Debug, Default, Clone, Copy)]
pub struct RelocateStats {
    pub slots_fixed: usize,
    pub roots_fixed: usize,
}

/// The address an object at `object_addr` will occupy once compaction
/// runs, or `object_addr` itself if the plan phase left it in place.
pub fn forwarded_address(object_addr: usize) -> usize {
    let header = unsafe { &*(object_addr as *const ObjectHeader) };
    match header.forwarding_offset() {
        Some(offset) => object_addr + offset,
        None => object_addr,
    }
}

fn fix_value(value: usize, topology: &HeapTopology) -> usize {
    if value == 0 || !topology.is_heap_pointer(value) {
        return value;
    }
    forwarded_address(value)
}

/// Rewrite every reference slot inside the live object at `object_addr`
/// that points at a relocated object.
pub fn fix_object_references(object_addr: usize, registry: &TypeRegistry, topology: &HeapTopology) -> Result<usize> {
    let mut fixed = 0usize;
    scan_object(object_addr, registry, &mut |slot, value| {
        let forwarded = fix_value(value, topology);
        if forwarded != value {
            unsafe { *(slot as *mut usize) = forwarded };
            fixed += 1;
        }
    })?;
    Ok(fixed)
}

/// Rewrite every registered root that points at a relocated object.
/// Conservative stack roots found by `scan_stacks` are intentionally not
/// fixed here — a conservatively-identified word is also what pinned the
/// object it points at, so the plan phase never assigned it a new
/// address (see `plan::plan_segment`).
pub fn fix_roots(roots: &RootScanner, topology: &HeapTopology) -> usize {
    let mut fixed = 0usize;
    roots.fix_roots(|value| {
        let forwarded = fix_value(value, topology);
        if forwarded != value {
            fixed += 1;
        }
        forwarded
    });
    fixed
}

/// Drive the full relocate phase over every live object in `live_objects`
/// (addresses visited in plan order, at their *pre-move* location — the
/// relocate phase runs before the physical copy) plus the registered
/// roots.
pub fn relocate_references(
    live_objects: &[usize],
    registry: &TypeRegistry,
    roots: &RootScanner,
    topology: &HeapTopology,
) -> Result<RelocateStats> {
    let mut stats = RelocateStats::default();
    for &object_addr in live_objects {
        stats.slots_fixed += fix_object_references(object_addr, registry, topology)?;
    }
    stats.roots_fixed = fix_roots(roots, topology);
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GcConfig;
    use crate::heap::Heap;
    use crate::marker::roots::RootType;
    use crate::object::refmap::{RefMap, TypeDesc, TypeDescHandle};
    use std::sync::atomic::Ordering;

    fn test_topology() -> HeapTopology {
        HeapTopology::Workstation(Heap::new(0, &GcConfig { heap_segment_size: 4 * 1024 * 1024, ..Default::default() }).unwrap())
    }

    #[test]
    fn fixes_interior_reference_to_moved_object() {
        let registry = TypeRegistry::new();
        let handle = registry.register(TypeDesc {
            instance_size: 32,
            fixed_refs: RefMap::new(&[0]),
            element: None,
            may_contain_refs: true,
            finalizable: false,
        });

        let topology = test_topology();
        let heap = match &topology {
            HeapTopology::Workstation(h) => h,
            _ => unreachable!(),
        };

        let referent_old = heap.reserve_ephemeral_window(32).unwrap().0;
        unsafe { (referent_old as *mut ObjectHeader).write(ObjectHeader::new(TypeDescHandle::new(1), 32)) };
        let referent_header = unsafe { &*(referent_old as *const ObjectHeader) };
        referent_header.set_forwarding_offset(64);

        let holder = heap.reserve_ephemeral_window(32).unwrap().0;
        unsafe {
            (holder as *mut ObjectHeader).write(ObjectHeader::new(handle, 32));
            let payload = holder + std::mem::size_of::<ObjectHeader>();
            *(payload as *mut usize) = referent_old;
        }

        let fixed = fix_object_references(holder, &registry, &topology).unwrap();
        assert_eq!(fixed, 1);
        let payload = holder + std::mem::size_of::<ObjectHeader>();
        let new_value = unsafe { *(payload as *const usize) };
        assert_eq!(new_value, referent_old + 64);
    }

    #[test]
    fn fixes_root_pointing_at_moved_object() {
        let topology = test_topology();
        let heap = match &topology {
            HeapTopology::Workstation(h) => h,
            _ => unreachable!(),
        };
        let object = heap.reserve_ephemeral_window(32).unwrap().0;
        unsafe { (object as *mut ObjectHeader).write(ObjectHeader::new(TypeDescHandle::new(1), 32)) };
        let header = unsafe { &*(object as *const ObjectHeader) };
        header.try_mark();
        header.set_forwarding_offset(32);

        let roots = RootScanner::new();
        let mut slot = object;
        roots.register(&mut slot as *mut usize as usize, RootType::Stack, false);

        let fixed = fix_roots(&roots, &topology);
        assert_eq!(fixed, 1);
        assert_eq!(slot, object + 32);
        assert!(header.is_marked(Ordering::Relaxed));
    }
}
