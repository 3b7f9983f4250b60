//! Correctness properties I1-I5, I7 (spec.md §8): segment containment,
//! forwarding after compaction, frozen-segment immutability, and no-GC
//! region accounting.

mod common;

use common::{publish_object, write_ref_field, GcFixture};
use tracegc::heap::GenId;
use tracegc::object::refmap::{RefMap, TypeDesc};

fn register_leaf_type(fixture: &GcFixture) -> tracegc::object::refmap::TypeDescHandle {
    fixture.gc.register_type(TypeDesc {
        instance_size: 32,
        fixed_refs: RefMap::default(),
        element: None,
        may_contain_refs: false,
        finalizable: false,
    })
}

fn register_parent_type(fixture: &GcFixture) -> tracegc::object::refmap::TypeDescHandle {
    fixture.gc.register_type(TypeDesc {
        instance_size: 32,
        fixed_refs: RefMap::new(&[0]),
        element: None,
        may_contain_refs: true,
        finalizable: false,
    })
}

/// I1 (segment containment): every address handed back by `alloc` is
/// reported as a heap pointer and lands in some generation.
#[test]
fn allocated_addresses_are_contained_in_a_segment() {
    let fixture = GcFixture::with_defaults();
    for _ in 0..256 {
        let addr = fixture.allocate(32).expect("allocation should succeed");
        assert!(fixture.gc.is_heap_pointer(addr), "{addr:#x} not reported as a heap pointer");
        assert!(fixture.gc.which_generation(addr).is_some());
    }
    assert!(!fixture.gc.is_heap_pointer(0x1), "a non-heap address must not be reported as one");
}

/// I4 (forwarding): after a blocking collection compacts gen 0/1, a root
/// slot that pointed at a live object still points at *some* live object —
/// never into the vacated gap.
#[test]
fn rooted_object_survives_full_collection_with_forwarding_applied() {
    let fixture = GcFixture::with_defaults();
    let leaf = register_leaf_type(&fixture);

    let addr = fixture.allocate(32).unwrap();
    publish_object(addr, leaf, 32);

    let mut root_slot: usize = addr;
    let handle = fixture.gc.register_root(&mut root_slot as *mut usize as usize, tracegc::marker::roots::RootType::Static, false);

    fixture.gc.collect_explicit(GenId::Gen0).expect("collection should succeed");

    let survivor = root_slot;
    assert!(survivor != 0, "rooted object was collected despite being reachable");
    assert!(fixture.gc.is_heap_pointer(survivor), "forwarded address {survivor:#x} is not a valid heap pointer");

    fixture.gc.unregister_root(handle);
}

/// I4 continued: a reference field reachable only through a rooted parent
/// also survives and keeps pointing at a valid object after compaction.
#[test]
fn reachable_child_survives_through_parent_reference() {
    let fixture = GcFixture::with_defaults();
    let parent_ty = register_parent_type(&fixture);
    let leaf_ty = register_leaf_type(&fixture);

    let parent = fixture.allocate(32).unwrap();
    publish_object(parent, parent_ty, 32);
    let child = fixture.allocate(32).unwrap();
    publish_object(child, leaf_ty, 32);
    write_ref_field(&fixture.gc, parent, 0, child);

    let mut root_slot: usize = parent;
    let handle = fixture.gc.register_root(&mut root_slot as *mut usize as usize, tracegc::marker::roots::RootType::Static, false);

    fixture.gc.collect_explicit(GenId::Gen0).unwrap();

    assert!(root_slot != 0);
    assert!(fixture.gc.is_heap_pointer(root_slot));
    fixture.gc.unregister_root(handle);
}

/// I5 (frozen immutability): a frozen segment's single object is traced
/// (kept as a mark-phase root) through a collection, and its address never
/// changes since the collector never relocates frozen memory.
#[test]
fn frozen_segment_object_survives_and_never_moves() {
    let fixture = GcFixture::with_defaults();
    let leaf = register_leaf_type(&fixture);

    // Externally owned memory the VM would normally mmap read-only after
    // publishing; a boxed buffer stands in for it here.
    let mut backing = vec![0u8; 64];
    let base = backing.as_mut_ptr() as usize;
    publish_object(base, leaf, 32);

    let info = tracegc::heap::FrozenSegmentInfo {
        base,
        first_object: base,
        allocated: base + 32,
        committed: base + 64,
        reserved: base + 64,
    };
    let handle = fixture.gc.register_frozen_segment(0, info);

    fixture.gc.collect_explicit(GenId::Gen2).expect("collection with a frozen segment registered");

    // Frozen memory is traced but never moved: the object is still at `base`.
    let header = unsafe { &*(base as *const tracegc::object::header::ObjectHeader) };
    assert_eq!(header.size(), 32);

    fixture.gc.unregister_frozen_segment(0, handle).expect("unregister should succeed");
    drop(backing);
}

/// I7 (no-GC region): the GC cycle count must not change while inside a
/// no-GC region whose budget covers every allocation made within it.
#[test]
fn no_gc_region_holds_cycle_count_steady() {
    let fixture = GcFixture::with_defaults();
    let before = fixture.cycle_count();

    let status = fixture.gc.start_no_gc_region(1024 * 1024, false).unwrap();
    assert_eq!(status, tracegc::gc::StartNoGcStatus::Success);

    for _ in 0..64 {
        fixture.allocate(64).unwrap();
    }

    assert_eq!(fixture.cycle_count(), before, "a collection ran inside a no-GC region");

    let end_status = fixture.gc.end_no_gc_region().unwrap();
    assert_eq!(end_status, tracegc::gc::EndNoGcStatus::Success);
}

#[test]
fn no_gc_region_rejects_a_second_concurrent_region() {
    let fixture = GcFixture::with_defaults();
    assert_eq!(fixture.gc.start_no_gc_region(4096, false).unwrap(), tracegc::gc::StartNoGcStatus::Success);
    assert_eq!(fixture.gc.start_no_gc_region(4096, false).unwrap(), tracegc::gc::StartNoGcStatus::AlreadyInProgress);
    fixture.gc.end_no_gc_region().unwrap();
}
