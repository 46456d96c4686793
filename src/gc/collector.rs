//! The stop-the-world collection cycle: root loading, tracing, evacuation of
//! young survivors, pointer rewriting through forwarding indices and the
//! sweep that rebuilds free lists.

use crate::mm::alloc::PageAllocator;
use crate::mm::bin::AllocatorBin;
use crate::mm::manager::PageList;
use crate::mm::page::{
    self, ForwardIndex, MetaData, ObjectRef, PageHeader, PageState, SlotFlags,
};
use crate::runtime::Heap;
use addr::{block::Block, virt::Virtual};
use core::ptr::NonNull;
use hashbrown::{HashMap, HashSet};
use std::collections::VecDeque;

/// Run one collection cycle over the given bin.
///
/// The cycle assumes the world is stopped: no mutator may allocate from this
/// bin or touch its objects until the call returns. The allocator lock is
/// held for the whole cycle so the set of managed pages cannot change
/// underneath the collector.
///
/// Mark bits, root pins and forwarding indices written by the cycle stay
/// readable until the next cycle begins; the reset pass at the head of every
/// cycle clears them unconditionally, which is what makes back-to-back
/// cycles with no intervening mutator activity equivalent to a single one.
pub fn mark_from_roots(bin: &mut AllocatorBin) {
    let heap = bin.heap().clone();
    let mut allocator = heap.allocator().lock();

    reset_cycle_state(bin);
    let roots = load_roots(&heap, &allocator, bin);
    let marked = mark(&roots);

    let mut cycle = EvacuationCycle::new();
    cycle.evacuate(&mut allocator, bin);
    cycle.rewrite(bin);

    sweep(bin);
    bin.retarget_after_collection();

    log::debug!(
        "collection done: {} roots, {} marked, {} evacuated, {} promoted, {} destination pages",
        roots.len(),
        marked,
        cycle.moved,
        cycle.promoted,
        cycle.dest_pages.len(),
    );
}

/// Resolve a conservative root candidate to the base of the allocated object
/// containing it, or `None` if the word does not point into a live slot of a
/// managed page. Words that pass the range gate and the page table but fall
/// inside a page header or a free slot are silently discarded, never
/// dereferenced.
#[must_use]
pub fn resolve_candidate(allocator: &PageAllocator, word: usize) -> Option<ObjectRef> {
    if !allocator.in_managed_range(word) || !allocator.contains(word) {
        return None;
    }

    // The word lies inside a mapped page, so the block base carries a header.
    let address = Virtual::new(word as u64);
    let header = unsafe { &*Block::containing(address).as_ptr::<PageHeader>() };
    let index = header.slot_index(address)?;

    let object = header.object_at(index);
    unsafe { object.meta().is_allocated() }.then_some(object)
}

/// Every page owned by the bin, across all four chains.
fn all_chains(bin: &AllocatorBin) -> impl Iterator<Item = NonNull<PageHeader>> + '_ {
    bin.manager
        .all_pages
        .iter()
        .chain(bin.manager.filled_pages.iter())
        .chain(bin.manager.evacuate_pages.iter())
        .chain(bin.manager.old_pages.iter())
}

/// Clear the traces of the previous cycle from every slot: mark bits, root
/// pins, forwarding indices and reference counts. Counts are rebuilt from
/// scratch by the mark phase.
fn reset_cycle_state(bin: &mut AllocatorBin) {
    for pg in all_chains(bin) {
        let header = unsafe { pg.as_ref() };
        for index in 0..header.entry_count() {
            let meta = unsafe { &mut *page::slot_meta(header.slot_base(index)) };
            meta.flags
                .remove(SlotFlags::MARKED | SlotFlags::ROOT | SlotFlags::PINNED);
            meta.forward = ForwardIndex::NONE;
            meta.ref_count = 0;
        }
    }
}

/// Build the root set for this cycle: the explicitly registered roots plus
/// every staged conservative candidate that resolves to a live object.
/// Duplicates are collapsed; candidates pin their object for this cycle
/// only.
///
/// Roots only ever live in allocation pages. A candidate resolving to an
/// object already relocated into the evacuation or old chain is pinned
/// without the root flag: it enters the mark worklist (so it and its graph
/// survive) and the pin keeps it in place, but it never counts as a root.
fn load_roots(heap: &Heap, allocator: &PageAllocator, bin: &AllocatorBin) -> Vec<ObjectRef> {
    let relocated: HashSet<usize> = bin
        .manager
        .evacuate_pages
        .iter()
        .chain(bin.manager.old_pages.iter())
        .map(|pg| pg.as_ptr() as usize)
        .collect();

    let mut seen: HashSet<usize> = HashSet::new();
    let mut roots = Vec::new();

    for root in heap.roots().lock().iter().copied() {
        if seen.insert(root.addr().as_usize()) {
            unsafe { root.meta().flags.insert(SlotFlags::ROOT) };
            roots.push(root);
        }
    }

    for word in heap.candidates().lock().drain(..) {
        let Some(object) = resolve_candidate(allocator, word) else {
            continue;
        };
        if seen.insert(object.addr().as_usize()) {
            let base = Block::containing(object.addr()).addr().as_usize();
            let flags = if relocated.contains(&base) {
                SlotFlags::PINNED
            } else {
                SlotFlags::ROOT | SlotFlags::PINNED
            };
            unsafe { object.meta().flags.insert(flags) };
            log::trace!("candidate {word:#x} pinned object at {}", object.addr());
            roots.push(object);
        }
    }

    roots
}

/// Breadth-first traversal from the roots. Every visited object is marked;
/// every edge from a marked parent increments the child's reference count,
/// so after the phase a count equals the number of marked parents referring
/// to the object (roots themselves receive no increment for being roots).
fn mark(roots: &[ObjectRef]) -> usize {
    let mut worklist: VecDeque<ObjectRef> = VecDeque::new();
    let mut marked = 0usize;

    for root in roots {
        unsafe { root.meta().flags.insert(SlotFlags::MARKED) };
        marked += 1;
        worklist.push_back(*root);
    }

    while let Some(object) = worklist.pop_front() {
        let schema = unsafe { object.meta().schema };
        if schema.is_null() {
            continue;
        }

        unsafe {
            (*schema).for_each_child(object.as_ptr(), |field| unsafe {
                let child = *field;
                if child.is_null() {
                    return;
                }

                let child_meta = ObjectRef::from_payload(child).meta();
                child_meta.retain();
                if !child_meta.is_marked() {
                    child_meta.flags.insert(SlotFlags::MARKED);
                    marked += 1;
                    worklist.push_back(ObjectRef::from_payload(child));
                }
            });
        }
    }

    marked
}

/// The per-cycle evacuation state: the table of destination pages touched so
/// far, which gives forwarding indices their page ordinals. The table spans
/// both the evacuation chain and the old chain, so one forwarding encoding
/// covers evacuated and promoted objects alike.
struct EvacuationCycle {
    dest_pages: Vec<NonNull<PageHeader>>,
    ordinals: HashMap<usize, u16>,
    moved: usize,
    promoted: usize,
}

impl EvacuationCycle {
    fn new() -> Self {
        Self {
            dest_pages: Vec::new(),
            ordinals: HashMap::new(),
            moved: 0,
            promoted: 0,
        }
    }

    /// Move every marked, non-root object out of the source pages (the
    /// filled pages and the allocation pages): young survivors are copied
    /// into the evacuation chain, survivors past the age threshold are
    /// promoted into the old chain. Either way the source pages end the
    /// cycle holding nothing but roots. Pinned and root objects stay in
    /// place; unmarked objects are abandoned for the sweep to reclaim.
    fn evacuate(&mut self, allocator: &mut PageAllocator, bin: &mut AllocatorBin) {
        let sources: Vec<NonNull<PageHeader>> = bin
            .manager
            .filled_pages
            .iter()
            .chain(bin.manager.all_pages.iter())
            .collect();

        for pg in sources {
            let header = unsafe { pg.as_ref() };
            for index in 0..header.entry_count() {
                let object = header.object_at(index);
                let meta = unsafe { object.meta() };
                if !meta.is_allocated()
                    || !meta.is_marked()
                    || meta.is_root()
                    || meta.is_pinned()
                {
                    continue;
                }

                let promote = meta.is_old();
                let destination = if promote {
                    &mut bin.manager.old_pages
                } else {
                    &mut bin.manager.evacuate_pages
                };
                self.move_object(allocator, destination, object, header.entry_size());
                if promote {
                    self.promoted += 1;
                } else {
                    self.moved += 1;
                }
            }
        }
    }

    fn move_object(
        &mut self,
        allocator: &mut PageAllocator,
        destination: &mut PageList,
        source: ObjectRef,
        entry_size: u16,
    ) {
        let (ordinal, slot_index, slot) = self.destination_slot(allocator, destination, entry_size);
        let forward = ForwardIndex::encode(ordinal, slot_index);

        unsafe {
            let src_meta = *source.meta();
            let payload = page::slot_payload(slot);
            core::ptr::copy_nonoverlapping(source.as_ptr(), payload, entry_size as usize);

            *page::slot_meta(slot) = MetaData {
                flags: SlotFlags::ALLOCATED | SlotFlags::MARKED,
                age: src_meta.age,
                ref_count: src_meta.ref_count,
                forward,
                schema: src_meta.schema,
            };

            // The abandoned source slot stays inspectable: its forwarding
            // index reveals where the contents moved until the next cycle.
            let meta = source.meta();
            meta.forward = forward;
            meta.flags
                .remove(SlotFlags::ALLOCATED | SlotFlags::MARKED);
        }
    }

    /// Pop a free slot from the head of a destination chain, mapping a
    /// fresh page when the head fills mid-cycle. Failure to obtain a
    /// destination page is fatal: the cycle cannot complete safely once
    /// objects have started moving.
    fn destination_slot(
        &mut self,
        allocator: &mut PageAllocator,
        destination: &mut PageList,
        entry_size: u16,
    ) -> (u16, u16, *mut u8) {
        loop {
            if let Some(head) = destination.head() {
                let header = unsafe { &mut *head.as_ptr() };
                let slot = header.pop_free_slot();
                if !slot.is_null() {
                    header.state = PageState::EvacDestination;
                    let index = header
                        .slot_index(Virtual::from_ptr(slot))
                        .expect("free slot outside its own page");
                    return (self.ordinal_of(head), index, slot);
                }
            }

            destination.push(allocator.fresh_page(entry_size));
        }
    }

    /// The ordinal of a destination page in this cycle's forwarding table,
    /// assigned on first use.
    fn ordinal_of(&mut self, pg: NonNull<PageHeader>) -> u16 {
        let key = pg.as_ptr() as usize;
        if let Some(ordinal) = self.ordinals.get(&key) {
            return *ordinal;
        }
        let ordinal = u16::try_from(self.dest_pages.len())
            .expect("more destination pages than forwarding ordinals");
        self.dest_pages.push(pg);
        self.ordinals.insert(key, ordinal);
        ordinal
    }

    /// Second pass over every object left allocated anywhere: rewrite each
    /// outbound child pointer whose referent carries a forwarding index. The
    /// stale source slots keep their metadata mapped, so following a moved
    /// child never reads freed memory.
    fn rewrite(&self, bin: &AllocatorBin) {
        for pg in all_chains(bin) {
            let header = unsafe { pg.as_ref() };
            for index in 0..header.entry_count() {
                let object = header.object_at(index);
                let (allocated, schema) = unsafe {
                    let meta = object.meta();
                    (meta.is_allocated(), meta.schema)
                };
                if !allocated || schema.is_null() {
                    continue;
                }

                unsafe {
                    (*schema).for_each_child(object.as_ptr(), |field| unsafe {
                        let child = *field;
                        if child.is_null() {
                            return;
                        }
                        let forward = ObjectRef::from_payload(child).meta().forward;
                        if !forward.is_none() {
                            *field = self.forwarded_payload(forward);
                        }
                    });
                }
            }
        }
    }

    fn forwarded_payload(&self, forward: ForwardIndex) -> *mut u8 {
        let pg = self.dest_pages[forward.page() as usize];
        unsafe { pg.as_ref() }.object_at(forward.slot()).as_ptr()
    }
}

/// Rebuild every page's free list from its unallocated slots and return the
/// filled pages to the allocation list in ground state. Unmarked objects are
/// reclaimed here, decrementing the reference count of every child they
/// still point to; a promoted object survives unmarked as long as its count
/// stays above zero.
fn sweep(bin: &mut AllocatorBin) {
    for pg in all_chains(bin) {
        rebuild_page(pg);
    }

    let filled: Vec<NonNull<PageHeader>> = bin.manager.filled_pages.take().iter().collect();
    for pg in filled {
        bin.manager.all_pages.push(pg);
    }
}

fn rebuild_page(pg: NonNull<PageHeader>) {
    let header = unsafe { &mut *pg.as_ptr() };

    // Age the survivors and reclaim what the cycle abandoned.
    for index in 0..header.entry_count() {
        let object = header.object_at(index);
        let meta = unsafe { object.meta() };
        if !meta.is_allocated() {
            continue;
        }
        if meta.is_marked() {
            meta.age = meta.age.saturating_add(1);
            continue;
        }
        if meta.is_old() && meta.ref_count > 0 {
            continue;
        }

        unsafe { release_children(object) };
        meta.flags.remove(SlotFlags::ALLOCATED);
        meta.ref_count = 0;
    }

    // Rethread the free list in slot order. Forwarding indices survive so
    // stale slots stay inspectable until the next cycle resets them.
    let mut head: *mut u8 = core::ptr::null_mut();
    let mut tail: *mut u8 = core::ptr::null_mut();
    let mut free = 0u16;

    for index in 0..header.entry_count() {
        let slot = header.slot_base(index);
        let meta = unsafe { &mut *page::slot_meta(slot) };
        if meta.is_allocated() {
            continue;
        }

        meta.flags = SlotFlags::empty();
        if head.is_null() {
            head = slot;
        } else {
            unsafe { page::set_free_next(tail, slot) };
        }
        tail = slot;
        free += 1;
    }
    if !tail.is_null() {
        unsafe { page::set_free_next(tail, core::ptr::null_mut()) };
    }

    header.freelist = head;
    header.free_count = free;
    header.state = PageState::Ground;
}

/// Drop the reference counts held by a reclaimed parent.
///
/// # Safety
/// `object` must be an allocated object in a mapped page.
unsafe fn release_children(object: ObjectRef) {
    let schema = object.meta().schema;
    if schema.is_null() {
        return;
    }

    (*schema).for_each_child(object.as_ptr(), |field| unsafe {
        let child = *field;
        if !child.is_null() {
            let child_meta = ObjectRef::from_payload(child).meta();
            if child_meta.is_allocated() {
                child_meta.release();
            }
        }
    });
}
