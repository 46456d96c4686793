use super::manager::PageManager;
use super::page::{self, ObjectRef, PageHeader, PageState};
use crate::gc::schema::TypeSchema;
use crate::runtime::Heap;
use core::ptr::NonNull;
use std::sync::Arc;

/// The mutator-facing allocation context for a single size class: a pointer
/// pair (current page, current free-list head) backed by a [`PageManager`].
///
/// The fast path is two pointer reads and one write; no locking happens
/// unless the current page is exhausted and a fresh one must be adopted.
pub struct AllocatorBin {
    heap: Arc<Heap>,
    entry_size: u16,
    page: *mut PageHeader,
    freelist: *mut u8,
    pub manager: PageManager,
}

impl AllocatorBin {
    /// Create a bin for a size class. The first allocation page and the
    /// first evacuation destination page are both reserved up front, so the
    /// collector does not depend on the OS mid-cycle in the common case.
    pub(crate) fn new(heap: Arc<Heap>, entry_size: u16) -> Self {
        let mut bin = Self {
            heap,
            entry_size,
            page: core::ptr::null_mut(),
            freelist: core::ptr::null_mut(),
            manager: PageManager::new(),
        };

        let evacuate = bin.heap.allocator().lock().fresh_page(entry_size);
        bin.manager.evacuate_pages.push(evacuate);
        bin.adopt_allocation_page();
        bin
    }

    #[must_use]
    pub fn entry_size(&self) -> u16 {
        self.entry_size
    }

    #[must_use]
    pub fn heap(&self) -> &Arc<Heap> {
        &self.heap
    }

    /// The page the bin currently allocates into.
    #[must_use]
    pub fn current_page(&self) -> *mut PageHeader {
        self.page
    }

    /// Allocate one object. Pops the head of the free list; when the list is
    /// empty, the current page rotates to the filled list and a fresh page
    /// is adopted. The returned object has cleared payload and freshly
    /// stamped metadata: allocated, unmarked, non-root, age zero, reference
    /// count zero, no forwarding.
    ///
    /// # Panics
    /// Panics if the schema's payload does not fit this size class, or if
    /// the OS refuses to provide a fresh page.
    pub fn allocate(&mut self, schema: &'static TypeSchema) -> ObjectRef {
        assert!(
            schema.entry_size <= self.entry_size,
            "schema payload ({} bytes) does not fit a {} byte size class",
            schema.entry_size,
            self.entry_size,
        );

        if self.freelist.is_null() {
            self.rotate_to_filled_and_acquire_fresh();
        }

        let slot = self.freelist;
        unsafe {
            let next = page::free_next(slot);
            self.freelist = next;

            // The header mirrors the bin's cached head so page-local walks
            // (verification, free-list rebuild) always see a coherent list.
            let header = &mut *self.page;
            header.freelist = next;
            header.free_count -= 1;

            page::stamp_canaries(slot, self.entry_size);
            (*page::slot_meta(slot)).reset_for_allocation(schema);

            // The free-list link overlaid the first payload word, and a
            // recycled slot still carries its previous contents. The child
            // walker reads the payload, so it must start zeroed.
            let payload = page::slot_payload(slot);
            payload.write_bytes(0, self.entry_size as usize);
            ObjectRef::from_payload(payload)
        }
    }

    /// The rotation protocol: the exhausted page moves to `filled_pages` in
    /// [`PageState::ActiveEvacuation`], pending collection, and the bin
    /// retargets onto a page with free slots.
    fn rotate_to_filled_and_acquire_fresh(&mut self) {
        if let Some(page) = NonNull::new(self.page) {
            unsafe {
                (*page.as_ptr()).state = PageState::ActiveEvacuation;
            }
            let removed = self.manager.all_pages.remove(page);
            debug_assert!(removed, "current page was not in all_pages");
            self.manager.filled_pages.push(page);
            log::debug!(
                "page {} filled, rotated to the collection queue",
                unsafe { (*page.as_ptr()).base() },
            );
        }

        self.adopt_allocation_page();
    }

    /// Retarget the bin onto a page with free slots: a recycled ground page
    /// from `all_pages` if the last collection produced one, a fresh page
    /// from the OS otherwise.
    fn adopt_allocation_page(&mut self) {
        let recycled = self.manager.all_pages.iter().find(|page| unsafe {
            let header = page.as_ref();
            header.state() == PageState::Ground && header.free_count() > 0
        });

        let page = recycled.unwrap_or_else(|| {
            let fresh = self.heap.allocator().lock().fresh_page(self.entry_size);
            self.manager.all_pages.push(fresh);
            fresh
        });

        unsafe {
            (*page.as_ptr()).state = PageState::ActiveAllocation;
            self.page = page.as_ptr();
            self.freelist = (*page.as_ptr()).freelist;
        }
    }

    /// Re-read the current page's free list after the collector rebuilt it.
    pub(crate) fn retarget_after_collection(&mut self) {
        unsafe {
            (*self.page).state = PageState::ActiveAllocation;
            self.freelist = (*self.page).freelist;
        }
    }
}
