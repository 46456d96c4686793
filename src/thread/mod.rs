//! Per-thread state: the identifier assigned at attach time, the recorded
//! native stack base and the scratch page holding the conservative root
//! candidates discovered at the last safepoint.

pub mod stackwalk;

use crate::config::BLOCK_SIZE;
use crate::runtime::Heap;
use core::cell::RefCell;
use core::mem::size_of;
use core::ptr::NonNull;

/// The per-thread bookkeeping of the runtime. Created when the thread
/// attaches, torn down when the thread detaches or exits.
pub struct ThreadInfo {
    pub id: u32,
    /// The frame pointer captured at attach time, while the stack was
    /// effectively empty. Everything the thread ever pushes lives below it.
    pub stack_base: usize,
    /// The scratch page holding the candidate words of the last native root
    /// scan, while loaded.
    scratch: Option<NonNull<u8>>,
    candidate_count: usize,
}

std::thread_local! {
    static THREAD_INFO: RefCell<Option<ThreadInfo>> = const { RefCell::new(None) };
}

/// Install the calling thread's info. Called once per thread by
/// [`crate::runtime::attach_thread`].
///
/// # Panics
/// Panics if the thread is already attached.
pub(crate) fn install(id: u32, stack_base: usize) {
    THREAD_INFO.with(|slot| {
        let mut slot = slot.borrow_mut();
        assert!(slot.is_none(), "thread {id} attached twice");
        *slot = Some(ThreadInfo {
            id,
            stack_base,
            scratch: None,
            candidate_count: 0,
        });
    });
}

/// Run `f` against the calling thread's info.
///
/// # Panics
/// Panics if the thread never attached to the runtime.
pub fn with_current<R>(f: impl FnOnce(&mut ThreadInfo) -> R) -> R {
    THREAD_INFO.with(|slot| {
        let mut slot = slot.borrow_mut();
        let info = slot
            .as_mut()
            .expect("thread is not attached to the runtime");
        f(info)
    })
}

/// The number of candidate words the last native root scan produced on this
/// thread.
#[must_use]
pub fn candidate_count() -> usize {
    with_current(|info| info.candidate_count)
}

/// Conservatively scan the calling thread's native state at a safepoint:
/// walk the frame chain from the current frame toward the recorded stack
/// base and sample every general-purpose register. A word survives iff it
/// passes the managed range gate, does not point into this thread's own
/// stack and lies inside a page the heap allocated. Survivors land in a
/// scratch page and are staged on the heap for the next collection cycle.
pub fn load_native_root_set(heap: &Heap) {
    let stack_base = with_current(|info| {
        assert!(info.scratch.is_none(), "native root set already loaded");
        info.stack_base
    });

    let scratch = heap.allocator().lock().scratch_page();
    let output = scratch.as_ptr().cast::<usize>();
    let capacity = BLOCK_SIZE / size_of::<usize>();
    let mut count = 0usize;

    {
        let allocator = heap.allocator().lock();
        let stack_floor = stackwalk::read_stack_pointer();
        let mut accept = |word: usize| {
            if count == capacity {
                return;
            }
            let in_stack = word >= stack_floor && word <= stack_base;
            if !in_stack && allocator.in_managed_range(word) && allocator.contains(word) {
                unsafe { output.add(count).write(word) };
                count += 1;
            }
        };

        unsafe { stackwalk::walk_frames(stack_base, &mut accept) };
        for word in stackwalk::capture_registers().words() {
            accept(word);
        }
    }

    log::debug!("native root scan found {count} candidate words");

    let mut staged = heap.candidates().lock();
    for index in 0..count {
        staged.push(unsafe { output.add(index).read() });
    }
    drop(staged);

    with_current(|info| {
        info.scratch = Some(scratch);
        info.candidate_count = count;
    });
}

/// Return the scratch page of the last native root scan to the allocator.
pub fn unload_native_root_set(heap: &Heap) {
    let scratch = with_current(|info| {
        info.candidate_count = 0;
        info.scratch.take()
    });

    if let Some(scratch) = scratch {
        unsafe { heap.allocator().lock().release_scratch_page(scratch) };
    }
}
