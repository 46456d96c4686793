//! Guard-word and slot-accounting verification scenarios.

mod common;

use common::*;
use xenon::{verify_all_canaries, SlotFlags};

#[test]
fn intact_heap_passes_verification() {
    let (heap, mut bin) = fresh_heap();

    let root = create_root(&heap, &mut bin);
    create_child(&mut bin, root);
    xenon::mark_from_roots(&mut bin);

    verify_all_canaries(&bin);
}

#[test]
#[should_panic(expected = "canary corruption")]
fn clobbered_pre_canary_is_fatal() {
    let (_heap, mut bin) = fresh_heap();

    let object = bin.allocate(&OBJECT_SCHEMA);

    // Stomp the guard word below the object's metadata.
    unsafe {
        object.slot_base().cast::<u64>().write(0xBADB_ADBA_DBAD_BADB);
    }

    verify_all_canaries(&bin);
}

#[test]
#[should_panic(expected = "canary corruption")]
fn payload_overrun_is_fatal() {
    let (_heap, mut bin) = fresh_heap();

    let object = bin.allocate(&OBJECT_SCHEMA);

    // Write one word past the declared payload, into the post-canary.
    unsafe {
        object
            .as_ptr()
            .add(OBJECT_SCHEMA.entry_size as usize)
            .cast::<u64>()
            .write(0);
    }

    verify_all_canaries(&bin);
}

#[test]
#[should_panic(expected = "double free")]
fn allocated_slot_on_the_free_list_is_fatal() {
    let (_heap, mut bin) = fresh_heap();

    bin.allocate(&OBJECT_SCHEMA);

    // Slot 1 is still on the free list; forging its allocated bit makes the
    // free-list walk observe an allocated entry.
    unsafe {
        let header = &*bin.current_page();
        let meta = xenon::mm::page::slot_meta(header.slot_base(1));
        (*meta).flags.insert(SlotFlags::ALLOCATED);
    }

    verify_all_canaries(&bin);
}
