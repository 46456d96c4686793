use crate::config::{ALLOC_CANARY_VALUE, BLOCK_SIZE, YOUNG_AGE_THRESHOLD};
use crate::gc::schema::TypeSchema;
use addr::{block::Block, virt::Virtual};
use bitflags::bitflags;
use core::mem::size_of;
use core::ptr::NonNull;
use static_assertions::const_assert_eq;

/// The size of one guard word on each side of an entry slot. When the
/// `canaries` feature is disabled both guard words are omitted and the
/// entry stride shrinks accordingly.
pub const CANARY_SIZE: usize = if cfg!(feature = "canaries") { 8 } else { 0 };

/// The offset of the first entry slot inside a page.
pub const ENTRIES_OFFSET: usize = lib::align::up::<8>(size_of::<PageHeader>());

bitflags! {
    /// The per-slot state bits carried in [`MetaData`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SlotFlags: u8 {
        /// If set, the slot holds a live object. A slot without this flag is
        /// reachable through its page's free list instead.
        const ALLOCATED = 1 << 0;

        /// If set, the object was reached from a root during the current
        /// (or the most recently completed) mark phase.
        const MARKED = 1 << 1;

        /// If set, the object is a root and is never relocated. Roots only
        /// ever live in allocation pages.
        const ROOT = 1 << 2;

        /// If set, a conservative root candidate resolved to this object:
        /// it is kept alive and in place for the current cycle. Combined
        /// with `ROOT` when the object lives in an allocation page; alone
        /// when it was already relocated into the evacuation or old chain,
        /// where roots are not allowed. Cleared by the next cycle's reset
        /// pass.
        const PINNED = 1 << 3;
    }
}

/// The relocated position of an evacuated object, encoded as a page ordinal
/// and a slot ordinal rather than a pointer. The source slot of a moved
/// object keeps this index in its metadata, so inspecting a stale slot after
/// evacuation still reveals where its contents went without reading freed
/// memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct ForwardIndex(u32);

impl ForwardIndex {
    /// The sentinel carried by every object that has not been evacuated in
    /// the current cycle.
    pub const NONE: Self = Self(u32::MAX);

    /// Encode a destination as a (page ordinal, slot ordinal) pair. Page
    /// ordinals index the table of destination pages touched by the running
    /// cycle.
    ///
    /// # Panics
    /// Panics if the page ordinal would collide with the sentinel encoding.
    #[must_use]
    pub fn encode(page: u16, slot: u16) -> Self {
        assert!(page != u16::MAX, "destination page table overflow");
        Self((u32::from(page) << 16) | u32::from(slot))
    }

    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 == Self::NONE.0
    }

    #[must_use]
    pub const fn page(self) -> u16 {
        (self.0 >> 16) as u16
    }

    #[must_use]
    pub const fn slot(self) -> u16 {
        self.0 as u16
    }
}

/// The metadata colocated with every entry slot, allocated or free. It is
/// cleared when the slot is handed to the mutator and again when the slot
/// returns to the free list.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct MetaData {
    pub flags: SlotFlags,
    /// The number of collection cycles the object has survived.
    pub age: u8,
    /// The number of references from marked parents, rebuilt by every mark
    /// phase and decremented when a referring parent is reclaimed.
    pub ref_count: u16,
    pub forward: ForwardIndex,
    /// The field schema of the object, recorded at allocation so the
    /// collector can enumerate child pointers without parsing user code.
    pub schema: *const TypeSchema,
}

// The forwarding index packs two 16-bit ordinals, so the whole header must
// stay at two words. Growing it silently would change every entry stride.
const_assert_eq!(size_of::<MetaData>(), 16);

impl MetaData {
    /// Stamp the metadata for a freshly allocated object.
    pub fn reset_for_allocation(&mut self, schema: *const TypeSchema) {
        self.flags = SlotFlags::ALLOCATED;
        self.age = 0;
        self.ref_count = 0;
        self.forward = ForwardIndex::NONE;
        self.schema = schema;
    }

    /// Increment the reference count, meaning that one more marked parent
    /// references this object.
    ///
    /// # Panics
    /// Panics if the reference count overflows.
    pub fn retain(&mut self) {
        match self.ref_count.checked_add(1) {
            Some(count) => self.ref_count = count,
            None => panic!("Object reference count overflow"),
        }
    }

    /// Decrement the reference count because a referring parent was
    /// reclaimed. Counts are rebuilt by every mark phase and a dead parent
    /// may not have contributed to the current count, so the decrement
    /// saturates instead of panicking.
    pub fn release(&mut self) {
        self.ref_count = self.ref_count.saturating_sub(1);
    }

    #[must_use]
    pub fn is_allocated(&self) -> bool {
        self.flags.contains(SlotFlags::ALLOCATED)
    }

    #[must_use]
    pub fn is_marked(&self) -> bool {
        self.flags.contains(SlotFlags::MARKED)
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.flags.contains(SlotFlags::ROOT)
    }

    #[must_use]
    pub fn is_pinned(&self) -> bool {
        self.flags.contains(SlotFlags::PINNED)
    }

    /// Whether the object has been promoted past the young generation.
    /// Promoted objects are never evacuated.
    #[must_use]
    pub fn is_old(&self) -> bool {
        self.age > YOUNG_AGE_THRESHOLD
    }
}

/// The lifecycle state of a page. Pages are recycled through these states
/// rather than being unmapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PageState {
    /// Neither being allocated into nor pending collection.
    Ground,
    /// Currently adopted by a bin as its allocation page.
    ActiveAllocation,
    /// Retired to the filled list, awaiting the next collection cycle.
    ActiveEvacuation,
    /// Currently receiving evacuated survivors.
    EvacDestination,
}

/// The header at the base of every page. The remainder of the block is an
/// array of equal-sized entry slots.
#[repr(C)]
pub struct PageHeader {
    /// Head of the chain of free slots in this page, or null when full.
    pub(crate) freelist: *mut u8,
    /// The next page in whichever list currently owns this page.
    pub(crate) next: *mut PageHeader,
    pub(crate) entry_size: u16,
    pub(crate) entry_count: u16,
    pub(crate) free_count: u16,
    pub(crate) state: PageState,
}

/// The stride of one entry slot: the optional guard words, the metadata and
/// the payload, rounded up so every slot stays pointer aligned.
#[must_use]
pub const fn entry_stride(entry_size: u16) -> usize {
    lib::align::up::<8>(2 * CANARY_SIZE + size_of::<MetaData>() + entry_size as usize)
}

/// The number of entry slots a page can carry for the given payload size.
#[must_use]
pub const fn entries_per_page(entry_size: u16) -> u16 {
    ((BLOCK_SIZE - ENTRIES_OFFSET) / entry_stride(entry_size)) as u16
}

impl PageHeader {
    /// Initialize a freshly mapped, zeroed block as a page of `entry_size`
    /// slots: write the header, stamp every slot's guard words, clear every
    /// slot's metadata and thread the free list slot 0 → 1 → … → N-1 → null.
    ///
    /// # Safety
    /// `block` must be a zeroed, writable, exclusively owned block of
    /// [`BLOCK_SIZE`] bytes.
    pub unsafe fn init(block: Block, entry_size: u16) -> NonNull<PageHeader> {
        assert!(entry_size as usize % 8 == 0, "entry size must be pointer aligned");

        let header = block.as_mut_ptr::<PageHeader>();
        let entry_count = entries_per_page(entry_size);
        assert!(entry_count > 0, "entry size too large for a page");

        header.write(PageHeader {
            freelist: block.as_mut_ptr::<u8>().add(ENTRIES_OFFSET),
            next: core::ptr::null_mut(),
            entry_size,
            entry_count,
            free_count: entry_count,
            state: PageState::Ground,
        });

        let page = &mut *header;
        for index in 0..entry_count {
            let slot = page.slot_base(index);
            stamp_canaries(slot, entry_size);
            (*slot_meta(slot)) = MetaData {
                flags: SlotFlags::empty(),
                age: 0,
                ref_count: 0,
                forward: ForwardIndex::NONE,
                schema: core::ptr::null(),
            };

            let next = if index + 1 < entry_count {
                page.slot_base(index + 1)
            } else {
                core::ptr::null_mut()
            };
            set_free_next(slot, next);
        }

        NonNull::new_unchecked(header)
    }

    /// The base address of the page, which is also the address of this
    /// header.
    #[must_use]
    pub fn base(&self) -> Virtual {
        Virtual::from_ptr(self as *const PageHeader)
    }

    #[must_use]
    pub fn entry_size(&self) -> u16 {
        self.entry_size
    }

    #[must_use]
    pub fn entry_count(&self) -> u16 {
        self.entry_count
    }

    #[must_use]
    pub fn free_count(&self) -> u16 {
        self.free_count
    }

    #[must_use]
    pub fn state(&self) -> PageState {
        self.state
    }

    /// The base address of the slot at `index`, pointing at the pre-canary
    /// word (or the metadata when canaries are disabled).
    ///
    /// # Panics
    /// Panics if the index is out of range.
    #[must_use]
    pub fn slot_base(&self, index: u16) -> *mut u8 {
        assert!(index < self.entry_count);
        let base = self as *const PageHeader as *mut u8;
        unsafe { base.add(ENTRIES_OFFSET + index as usize * entry_stride(self.entry_size)) }
    }

    /// Resolve an address lying anywhere inside this page to the index of
    /// the slot containing it, or `None` if the address falls inside the
    /// page header or past the last slot.
    #[must_use]
    pub fn slot_index(&self, address: Virtual) -> Option<u16> {
        let offset = address.as_usize().checked_sub(self.base().as_usize())?;
        if offset < ENTRIES_OFFSET {
            return None;
        }
        let index = (offset - ENTRIES_OFFSET) / entry_stride(self.entry_size);
        u16::try_from(index).ok().filter(|index| *index < self.entry_count)
    }

    /// The object stored in the slot at `index`. The returned reference is
    /// valid whether or not the slot is allocated; callers consult the
    /// metadata first.
    #[must_use]
    pub fn object_at(&self, index: u16) -> ObjectRef {
        let payload = unsafe { slot_payload(self.slot_base(index)) };
        unsafe { ObjectRef::from_payload(payload) }
    }

    /// Pop the head of this page's free list, returning the slot base.
    /// Returns null when the page is full.
    pub fn pop_free_slot(&mut self) -> *mut u8 {
        let slot = self.freelist;
        if !slot.is_null() {
            self.freelist = unsafe { free_next(slot) };
            self.free_count -= 1;
        }
        slot
    }
}

/// The metadata of the slot starting at `slot`.
///
/// # Safety
/// `slot` must be a slot base inside an initialized page.
#[must_use]
pub unsafe fn slot_meta(slot: *mut u8) -> *mut MetaData {
    slot.add(CANARY_SIZE).cast()
}

/// The payload of the slot starting at `slot`.
///
/// # Safety
/// `slot` must be a slot base inside an initialized page.
#[must_use]
pub unsafe fn slot_payload(slot: *mut u8) -> *mut u8 {
    slot.add(CANARY_SIZE + size_of::<MetaData>())
}

/// Read the free-list link of an unused slot. The link overlays the first
/// pointer-sized word of the payload region, leaving the guard words and the
/// metadata intact while the slot sits on the free list.
///
/// # Safety
/// `slot` must be a slot base inside an initialized page, and must not be
/// allocated.
#[must_use]
pub unsafe fn free_next(slot: *mut u8) -> *mut u8 {
    slot_payload(slot).cast::<*mut u8>().read()
}

/// Write the free-list link of an unused slot.
///
/// # Safety
/// Same contract as [`free_next`].
pub unsafe fn set_free_next(slot: *mut u8, next: *mut u8) {
    slot_payload(slot).cast::<*mut u8>().write(next);
}

/// Stamp both guard words of a slot. A no-op without the `canaries` feature.
///
/// # Safety
/// `slot` must be a slot base inside an initialized page of `entry_size`
/// slots.
pub unsafe fn stamp_canaries(slot: *mut u8, entry_size: u16) {
    if CANARY_SIZE != 0 {
        slot.cast::<u64>().write_unaligned(ALLOC_CANARY_VALUE);
        slot.add(CANARY_SIZE + size_of::<MetaData>() + entry_size as usize)
            .cast::<u64>()
            .write_unaligned(ALLOC_CANARY_VALUE);
    }
}

/// Read back both guard words of a slot. Always intact without the
/// `canaries` feature.
///
/// # Safety
/// Same contract as [`stamp_canaries`].
#[must_use]
pub unsafe fn read_canaries(slot: *mut u8, entry_size: u16) -> (u64, u64) {
    if CANARY_SIZE == 0 {
        return (ALLOC_CANARY_VALUE, ALLOC_CANARY_VALUE);
    }
    let pre = slot.cast::<u64>().read_unaligned();
    let post = slot
        .add(CANARY_SIZE + size_of::<MetaData>() + entry_size as usize)
        .cast::<u64>()
        .read_unaligned();
    (pre, post)
}

/// A handle to an object payload inside a managed page. The metadata of the
/// object sits immediately below the payload, and the containing page header
/// is recovered by truncating the address to the block boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectRef(NonNull<u8>);

impl ObjectRef {
    /// Wrap a payload address.
    ///
    /// # Safety
    /// `payload` must be the payload address of a slot inside an initialized
    /// page.
    #[must_use]
    pub unsafe fn from_payload(payload: *mut u8) -> Self {
        Self(NonNull::new_unchecked(payload))
    }

    #[must_use]
    pub fn as_ptr(self) -> *mut u8 {
        self.0.as_ptr()
    }

    #[must_use]
    pub fn addr(self) -> Virtual {
        Virtual::from_ptr(self.0.as_ptr())
    }

    /// The metadata of this object.
    ///
    /// # Safety
    /// The object's page must still be mapped.
    #[must_use]
    pub unsafe fn meta<'a>(self) -> &'a mut MetaData {
        &mut *self.0.as_ptr().sub(size_of::<MetaData>()).cast::<MetaData>()
    }

    /// The header of the page containing this object.
    ///
    /// # Safety
    /// The object's page must still be mapped.
    #[must_use]
    pub unsafe fn page<'a>(self) -> &'a mut PageHeader {
        &mut *Block::containing(self.addr()).as_mut_ptr::<PageHeader>()
    }

    /// The base of the slot holding this object.
    #[must_use]
    pub fn slot_base(self) -> *mut u8 {
        unsafe { self.0.as_ptr().sub(size_of::<MetaData>() + CANARY_SIZE) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stride_is_aligned_and_accounts_for_guards() {
        let stride = entry_stride(64);
        assert_eq!(stride % 8, 0);
        assert_eq!(stride, 2 * CANARY_SIZE + size_of::<MetaData>() + 64);
    }

    #[test]
    fn pages_hold_at_least_one_entry() {
        assert!(entries_per_page(64) > 1);
        assert!(
            ENTRIES_OFFSET + entries_per_page(64) as usize * entry_stride(64) <= BLOCK_SIZE
        );
    }

    #[test]
    fn forward_index_round_trip() {
        let forward = ForwardIndex::encode(3, 41);
        assert!(!forward.is_none());
        assert_eq!(forward.page(), 3);
        assert_eq!(forward.slot(), 41);
        assert!(ForwardIndex::NONE.is_none());
    }

    #[test]
    #[should_panic]
    fn forward_index_rejects_sentinel_page() {
        let _ = ForwardIndex::encode(u16::MAX, 0);
    }

    #[test]
    fn release_saturates_at_zero() {
        let mut meta = MetaData {
            flags: SlotFlags::ALLOCATED,
            age: 0,
            ref_count: 1,
            forward: ForwardIndex::NONE,
            schema: core::ptr::null(),
        };
        meta.release();
        meta.release();
        assert_eq!(meta.ref_count, 0);
    }
}
