use super::page::PageHeader;
use super::pagetable::PageTable;
use crate::config::BLOCK_SIZE;
use crate::runtime::HeapConfig;
use addr::{block::Block, virt::Virtual};
use core::ptr::NonNull;

/// Wraps the OS page primitive: hands out zeroed, block-aligned pages,
/// registers every page base in the [`PageTable`] and keeps the watermarks
/// used by the conservative root scanner's range gate.
pub struct PageAllocator {
    table: PageTable,
    /// Lowest base among managed pages, or 0 while no page exists.
    lowest: usize,
    /// One past the highest byte among managed pages, or 0 while no page
    /// exists.
    highest: usize,
    /// In deterministic mode, the hint for the next mapping. Pages advance
    /// from the configured base so runs are reproducible under a debugger.
    next_hint: Option<usize>,
    /// Number of pages mapped so far, scratch pages excluded.
    mapped: usize,
}

impl PageAllocator {
    #[must_use]
    pub fn new(config: &HeapConfig) -> Self {
        Self {
            table: PageTable::new(),
            lowest: 0,
            highest: 0,
            next_hint: config.deterministic.then_some(config.base),
            mapped: 0,
        }
    }

    /// Obtain a fresh page for the given size class: a zeroed block from the
    /// OS, registered in the page table, with its header initialized and its
    /// free list threaded.
    ///
    /// # Panics
    /// Panics if the OS refuses to map a block. The heap cannot make
    /// progress without memory, so the failure is fatal.
    pub fn fresh_page(&mut self, entry_size: u16) -> NonNull<PageHeader> {
        let block = self.map_block();
        self.table.insert(block);

        let base = block.addr().as_usize();
        if self.mapped == 0 || base < self.lowest {
            self.lowest = base;
        }
        if base + BLOCK_SIZE > self.highest {
            self.highest = base + BLOCK_SIZE;
        }
        self.mapped += 1;

        log::debug!("mapped page {} for {entry_size} byte entries", block.addr());
        unsafe { PageHeader::init(block, entry_size) }
    }

    /// Obtain a zeroed block that is NOT registered in the page table, used
    /// as the output array of the conservative root scan. Keeping scratch
    /// pages out of the table matters: a candidate word pointing into the
    /// candidate array itself must not pass the managed-page filter.
    pub fn scratch_page(&mut self) -> NonNull<u8> {
        let block = self.map_raw(None);
        unsafe { NonNull::new_unchecked(block.as_mut_ptr()) }
    }

    /// Return a scratch page to the OS.
    ///
    /// # Safety
    /// `page` must come from [`Self::scratch_page`] and must not be used
    /// afterwards.
    pub unsafe fn release_scratch_page(&mut self, page: NonNull<u8>) {
        let rc = libc::munmap(page.as_ptr().cast(), BLOCK_SIZE);
        assert!(rc == 0, "munmap failed for scratch page {:p}", page.as_ptr());
    }

    /// Whether `address` lies inside a managed page.
    #[must_use]
    pub fn contains(&self, address: usize) -> bool {
        self.table.contains(address)
    }

    /// The range gate for conservative candidates: the cheap first filter
    /// before the page-table lookup.
    #[must_use]
    pub fn in_managed_range(&self, address: usize) -> bool {
        address >= self.lowest && address < self.highest
    }

    #[must_use]
    pub fn mapped_pages(&self) -> usize {
        self.mapped
    }

    fn map_block(&mut self) -> Block {
        let hint = self.next_hint;
        let block = self.map_raw(hint);
        if let Some(hint) = &mut self.next_hint {
            *hint += BLOCK_SIZE;
        }
        block
    }

    fn map_raw(&self, hint: Option<usize>) -> Block {
        let addr = hint.map_or(core::ptr::null_mut(), |hint| hint as *mut libc::c_void);
        let page = unsafe {
            libc::mmap(
                addr,
                BLOCK_SIZE,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };

        if page == libc::MAP_FAILED {
            log::error!(
                "out of memory: the OS refused to map a {BLOCK_SIZE} byte block (hint {hint:?})"
            );
            panic!("out of memory: mmap failed");
        }

        // Anonymous mappings are page aligned and zeroed, both of which the
        // page layout relies on.
        let base = Virtual::from_ptr(page.cast::<u8>());
        assert!(base.is_aligned(BLOCK_SIZE as u64));
        Block::new(base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::page::{entries_per_page, PageState};

    #[test]
    fn fresh_pages_are_registered_and_threaded() {
        let mut allocator = PageAllocator::new(&HeapConfig::builder().build());
        let page = allocator.fresh_page(64);
        let header = unsafe { page.as_ref() };

        assert_eq!(header.entry_count(), entries_per_page(64));
        assert_eq!(header.free_count(), header.entry_count());
        assert_eq!(header.state(), PageState::Ground);
        assert!(allocator.contains(header.base().as_usize()));
        assert!(allocator.contains(header.base().as_usize() + BLOCK_SIZE - 1));
        assert!(allocator.in_managed_range(header.base().as_usize() + 8));
    }

    #[test]
    fn scratch_pages_stay_out_of_the_table() {
        let mut allocator = PageAllocator::new(&HeapConfig::builder().build());
        let scratch = allocator.scratch_page();

        assert!(!allocator.contains(scratch.as_ptr() as usize));
        unsafe { allocator.release_scratch_page(scratch) };
    }

    #[test]
    fn deterministic_mode_advances_from_the_base() {
        let config = HeapConfig::builder().deterministic(true).build();
        let mut allocator = PageAllocator::new(&config);

        // The base is a hint, not a demand: the OS may relocate the mapping
        // if the hint is taken, so only the happy path is asserted.
        let first = allocator.fresh_page(64);
        let second = allocator.fresh_page(64);
        let first = unsafe { first.as_ref() }.base().as_usize();
        let second = unsafe { second.as_ref() }.base().as_usize();
        if first == crate::config::DETERMINISTIC_BASE {
            assert_eq!(second, first + BLOCK_SIZE);
        }
    }
}
