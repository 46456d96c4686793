//! Debug verification: guard-word checks and slot accounting over every page
//! a bin owns. Any violation means the heap is corrupted, and a corrupted
//! heap cannot safely be continued, so every check is fatal.

use crate::config::ALLOC_CANARY_VALUE;
use crate::mm::bin::AllocatorBin;
use crate::mm::page::{self, PageHeader};
use core::ptr::NonNull;

/// Check both guard words of a single slot.
///
/// # Panics
/// Panics if either word differs from [`ALLOC_CANARY_VALUE`], reporting the
/// page base, slot index and the observed values.
pub fn verify_canaries_in_block(header: &PageHeader, index: u16) {
    let slot = header.slot_base(index);
    let (pre, post) = unsafe { page::read_canaries(slot, header.entry_size()) };

    if pre != ALLOC_CANARY_VALUE || post != ALLOC_CANARY_VALUE {
        log::error!(
            "canary corruption in page {} slot {index}: pre {pre:#018x}, post {post:#018x}, expected {ALLOC_CANARY_VALUE:#018x}",
            header.base(),
        );
        panic!(
            "canary corruption detected at page {} slot {index}",
            header.base(),
        );
    }
}

/// Check every allocated slot's guard words in one page, then walk its free
/// list and assert that the page accounts for every slot exactly once.
///
/// # Panics
/// Panics on canary corruption, on an allocated slot reachable through the
/// free list (a double free), and on a free-list length that disagrees with
/// the allocated count (lost slots).
pub fn verify_canaries_in_page(pg: NonNull<PageHeader>) {
    let header = unsafe { pg.as_ref() };
    let mut allocated = 0u16;

    for index in 0..header.entry_count() {
        let meta = unsafe { &*page::slot_meta(header.slot_base(index)) };
        if meta.is_allocated() {
            allocated += 1;
            verify_canaries_in_block(header, index);
        }
    }

    let mut free = 0u16;
    let mut slot = unsafe { (*pg.as_ptr()).freelist };
    while !slot.is_null() {
        let meta = unsafe { &*page::slot_meta(slot) };
        if meta.is_allocated() {
            let index = header
                .slot_index(addr::virt::Virtual::from_ptr(slot))
                .unwrap_or(u16::MAX);
            log::error!(
                "allocated slot {index} reachable through the free list of page {}",
                header.base(),
            );
            panic!("double free detected in page {}", header.base());
        }
        free += 1;
        assert!(
            free <= header.entry_count(),
            "free list of page {} is cyclic",
            header.base(),
        );
        slot = unsafe { page::free_next(slot) };
    }

    assert!(
        free + allocated == header.entry_count(),
        "slot accounting mismatch in page {}: {free} free + {allocated} allocated != {} entries",
        header.base(),
        header.entry_count(),
    );
    assert!(
        free == header.free_count(),
        "free count of page {} is {} but its free list holds {free} slots",
        header.base(),
        header.free_count(),
    );
}

/// Verify every page the bin owns, across the allocation, filled,
/// evacuation and old-generation chains.
pub fn verify_all_canaries(bin: &AllocatorBin) {
    for pg in bin
        .manager
        .all_pages
        .iter()
        .chain(bin.manager.filled_pages.iter())
        .chain(bin.manager.evacuate_pages.iter())
        .chain(bin.manager.old_pages.iter())
    {
        verify_canaries_in_page(pg);
    }
}
