//! Shared fixtures: a 64-byte test object holding a child count followed by
//! up to seven child pointers, and the graph-building helpers the scenarios
//! use.
#![allow(dead_code)]

use std::sync::Arc;
use xenon::{AllocatorBin, ChildLayout, Heap, HeapConfig, ObjectRef, TypeSchema};

/// The canonical counted-array object: a `u64` child count at offset 0,
/// pointer elements from offset 8.
pub static OBJECT_SCHEMA: TypeSchema = TypeSchema {
    entry_size: 64,
    children: ChildLayout::Counted {
        count_offset: 0,
        elems_offset: 8,
        stride: 8,
    },
};

pub const MAX_CHILDREN: u64 = 7;

pub fn fresh_heap() -> (Arc<Heap>, AllocatorBin) {
    xenon::startup();
    let heap = Heap::new(HeapConfig::default());
    let bin = Heap::bin(&heap, OBJECT_SCHEMA.entry_size);
    (heap, bin)
}

pub fn create_root(heap: &Heap, bin: &mut AllocatorBin) -> ObjectRef {
    let object = bin.allocate(&OBJECT_SCHEMA);
    heap.add_root(object);
    object
}

pub fn create_child(bin: &mut AllocatorBin, parent: ObjectRef) -> ObjectRef {
    let child = bin.allocate(&OBJECT_SCHEMA);
    add_child(parent, child);
    child
}

pub fn add_child(parent: ObjectRef, child: ObjectRef) {
    unsafe {
        let payload = parent.as_ptr().cast::<u64>();
        let count = payload.read();
        assert!(count < MAX_CHILDREN);
        payload
            .add(1 + count as usize)
            .cast::<*mut u8>()
            .write(child.as_ptr());
        payload.write(count + 1);
    }
}

/// Read the (possibly rewritten) children of an object.
pub fn children(object: ObjectRef) -> Vec<ObjectRef> {
    let payload = object.as_ptr().cast::<u64>();
    let count = unsafe { payload.read() } as usize;
    (0..count)
        .map(|index| unsafe {
            ObjectRef::from_payload(payload.add(1 + index).cast::<*mut u8>().read())
        })
        .collect()
}

/// Assert that an object and everything reachable from it is marked.
pub fn assert_all_marked(object: ObjectRef) {
    assert!(unsafe { object.meta() }.is_marked());
    for child in children(object) {
        assert_all_marked(child);
    }
}

/// The base address of every page in the evacuation chain.
pub fn evacuation_page_bases(bin: &AllocatorBin) -> Vec<usize> {
    bin.manager
        .evacuate_pages
        .iter()
        .map(|page| unsafe { page.as_ref() }.base().as_usize())
        .collect()
}

/// Whether an object currently lives in the bin's evacuation chain.
pub fn in_evacuation_chain(bin: &AllocatorBin, object: ObjectRef) -> bool {
    let base = object.addr().as_usize() & !(xenon::config::BLOCK_SIZE - 1);
    evacuation_page_bases(bin).contains(&base)
}

/// Whether an object currently lives in the bin's old-generation chain.
pub fn in_old_chain(bin: &AllocatorBin, object: ObjectRef) -> bool {
    let base = object.addr().as_usize() & !(xenon::config::BLOCK_SIZE - 1);
    bin.manager
        .old_pages
        .iter()
        .any(|page| unsafe { page.as_ref() }.base().as_usize() == base)
}

/// Assert the post-cycle shape of the allocation pages: nothing survives
/// there except roots.
pub fn assert_only_roots_in_allocation_pages(bin: &AllocatorBin) {
    for page in bin.manager.all_pages.iter() {
        let header = unsafe { page.as_ref() };
        for index in 0..header.entry_count() {
            let meta = unsafe { header.object_at(index).meta() };
            if meta.is_allocated() {
                assert!(meta.is_root());
            }
        }
    }
}

/// Per-page (base, free count) pairs across every chain, for accounting
/// comparisons between cycles.
pub fn accounting(bin: &AllocatorBin) -> Vec<(usize, u16)> {
    let mut pages: Vec<(usize, u16)> = bin
        .manager
        .all_pages
        .iter()
        .chain(bin.manager.filled_pages.iter())
        .chain(bin.manager.evacuate_pages.iter())
        .chain(bin.manager.old_pages.iter())
        .map(|page| {
            let header = unsafe { page.as_ref() };
            (header.base().as_usize(), header.free_count())
        })
        .collect();
    pages.sort_unstable();
    pages
}
