//! Conservative root candidate scenarios: interior pointers pin live
//! objects for one cycle, junk words are silently discarded, and the native
//! scan machinery runs end to end without corrupting the heap.

mod common;

use common::*;
use xenon::{mark_from_roots, verify_all_canaries};

#[test]
fn interior_pointer_pins_for_exactly_one_cycle() {
    let (heap, mut bin) = fresh_heap();

    // A live object no root references, as if only a register held it.
    let object = bin.allocate(&OBJECT_SCHEMA);
    heap.stage_candidate(object.as_ptr() as usize + 12);

    mark_from_roots(&mut bin);

    // Pinned: treated as a root for this cycle, left in place.
    let meta = unsafe { object.meta() };
    assert!(meta.is_allocated());
    assert!(meta.is_marked());
    assert!(meta.is_root());
    assert!(!in_evacuation_chain(&bin, object));

    // The candidate is gone the next cycle, so the object is reclaimed.
    mark_from_roots(&mut bin);
    assert!(!unsafe { object.meta() }.is_allocated());

    verify_all_canaries(&bin);
}

#[test]
fn pinned_objects_keep_their_children_alive() {
    let (heap, mut bin) = fresh_heap();

    let object = bin.allocate(&OBJECT_SCHEMA);
    let child = create_child(&mut bin, object);
    heap.stage_candidate(object.as_ptr() as usize);

    mark_from_roots(&mut bin);

    // The pinned parent stays put; its child is an ordinary survivor and
    // was evacuated.
    assert!(unsafe { object.meta() }.is_allocated());
    let moved = children(object)[0];
    assert_ne!(moved, child);
    assert!(unsafe { moved.meta() }.is_marked());
    assert!(in_evacuation_chain(&bin, moved));

    verify_all_canaries(&bin);
}

#[test]
fn junk_candidates_are_silently_discarded() {
    let (heap, mut bin) = fresh_heap();

    let root = create_root(&heap, &mut bin);
    let header = unsafe { &*bin.current_page() };
    let page_base = header.base().as_usize();

    // Below and above any managed page.
    heap.stage_candidate(8);
    heap.stage_candidate(usize::MAX);
    // Inside a managed page but inside the header, not a slot.
    heap.stage_candidate(page_base + 4);
    // A slot that is still on the free list.
    heap.stage_candidate(header.slot_base(header.entry_count() - 1) as usize);

    mark_from_roots(&mut bin);

    // Nothing was pinned, nothing crashed, the root survived as usual.
    assert!(unsafe { root.meta() }.is_marked());
    verify_all_canaries(&bin);
}

#[test]
fn candidate_words_are_deduplicated_with_roots() {
    let (heap, mut bin) = fresh_heap();

    let root = create_root(&heap, &mut bin);
    let child = create_child(&mut bin, root);

    // Stage the root itself and two interior views of its child: the root
    // set must not double-count any of them.
    heap.stage_candidate(root.as_ptr() as usize);
    heap.stage_candidate(child.as_ptr() as usize);
    heap.stage_candidate(child.as_ptr() as usize + 8);

    mark_from_roots(&mut bin);

    // The child was pinned by its candidate, so it stays in place with a
    // single counted parent.
    assert_eq!(children(root)[0], child);
    assert_eq!(unsafe { child.meta() }.ref_count, 1);

    verify_all_canaries(&bin);
}

#[test]
fn candidates_into_relocated_chains_pin_without_rooting() {
    let (heap, mut bin) = fresh_heap();

    let root = create_root(&heap, &mut bin);
    create_child(&mut bin, root);
    mark_from_roots(&mut bin);

    let survivor = children(root)[0];
    assert!(in_evacuation_chain(&bin, survivor));

    // Drop the root's reference so only a staged candidate keeps the
    // survivor alive, as if a register still held its address.
    unsafe { root.as_ptr().cast::<u64>().write(0) };
    heap.stage_candidate(survivor.as_ptr() as usize);

    mark_from_roots(&mut bin);

    // Alive and in place, but never a root while resident in the
    // evacuation chain.
    let meta = unsafe { survivor.meta() };
    assert!(meta.is_allocated());
    assert!(meta.is_marked());
    assert!(!meta.is_root());

    // With the candidate gone the survivor is unreachable and reclaimed.
    mark_from_roots(&mut bin);
    assert!(!unsafe { survivor.meta() }.is_allocated());

    verify_all_canaries(&bin);
}

#[test]
fn native_root_scan_runs_end_to_end() {
    let (heap, mut bin) = fresh_heap();
    xenon::attach_thread();

    let root = create_root(&heap, &mut bin);
    let child = create_child(&mut bin, root);

    xenon::load_native_root_set(&heap);
    let found = xenon::thread::candidate_count();

    mark_from_roots(&mut bin);
    xenon::unload_native_root_set(&heap);

    // Whatever the scan picked up, the explicit graph stayed intact and the
    // heap remained coherent. The child either moved or was pinned in
    // place by a stack word; both are live.
    assert!(unsafe { root.meta() }.is_marked());
    let live_child = children(root)[0];
    assert!(unsafe { live_child.meta() }.is_allocated());
    assert!(unsafe { live_child.meta() }.is_marked());
    let _ = (found, child);

    verify_all_canaries(&bin);
}
