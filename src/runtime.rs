//! The runtime context threaded through the mutator API: process startup,
//! thread attachment under the global initialization lock, and the [`Heap`]
//! owning the page allocator and the root set.

use crate::logger;
use crate::mm::alloc::PageAllocator;
use crate::mm::bin::AllocatorBin;
use crate::mm::page::ObjectRef;
use crate::thread::{self, stackwalk};
use std::sync::Arc;
use sync::{Once, Spinlock};
use typed_builder::TypedBuilder;

/// The tunables of a heap, fixed at construction.
#[derive(Debug, Clone, TypedBuilder)]
pub struct HeapConfig {
    /// Map pages at successive hint addresses starting from `base`, for
    /// reproducible debugging. Production heaps let the OS choose.
    #[builder(default = false)]
    pub deterministic: bool,

    /// The first hint address used in deterministic mode.
    #[builder(default = crate::config::DETERMINISTIC_BASE)]
    pub base: usize,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// A garbage-collected heap. Bins hand out objects from its pages, and the
/// collector walks its root set. One heap serves one mutator thread in this
/// core; the page allocator sits behind a spinlock so the collector can
/// freeze the page set for the duration of a cycle.
pub struct Heap {
    allocator: Spinlock<PageAllocator>,
    roots: Spinlock<Vec<ObjectRef>>,
    candidates: Spinlock<Vec<usize>>,
}

impl Heap {
    #[must_use]
    pub fn new(config: HeapConfig) -> Arc<Self> {
        Arc::new(Self {
            allocator: Spinlock::new(PageAllocator::new(&config)),
            roots: Spinlock::new(Vec::new()),
            candidates: Spinlock::new(Vec::new()),
        })
    }

    /// Acquire an allocation bin for a size class. The bin's first
    /// allocation page and first evacuation destination are reserved
    /// immediately.
    #[must_use]
    pub fn bin(heap: &Arc<Self>, entry_size: u16) -> AllocatorBin {
        AllocatorBin::new(Arc::clone(heap), entry_size)
    }

    /// Register an object as an explicit root. Roots are re-flagged at the
    /// start of every collection cycle and are never relocated.
    pub fn add_root(&self, object: ObjectRef) {
        unsafe {
            object
                .meta()
                .flags
                .insert(crate::mm::page::SlotFlags::ROOT);
        }
        self.roots.lock().push(object);
    }

    /// Stage a conservative root candidate for the next collection cycle.
    /// The native root scan feeds discovered words through here; hosts with
    /// out-of-band references may stage words of their own.
    pub fn stage_candidate(&self, word: usize) {
        self.candidates.lock().push(word);
    }

    /// Whether `address` lies inside a page this heap allocated.
    #[must_use]
    pub fn contains(&self, address: usize) -> bool {
        self.allocator.lock().contains(address)
    }

    pub(crate) fn allocator(&self) -> &Spinlock<PageAllocator> {
        &self.allocator
    }

    pub(crate) fn roots(&self) -> &Spinlock<Vec<ObjectRef>> {
        &self.roots
    }

    pub(crate) fn candidates(&self) -> &Spinlock<Vec<usize>> {
        &self.candidates
    }
}

/// The process-wide registry of attached threads. The only state it carries
/// today is the next identifier to hand out; per-thread data lives with the
/// thread itself.
struct ThreadRegistry {
    next_id: u32,
}

/// The global initialization lock: thread attachment goes through it so two
/// threads can never race to the same id.
static G_LOCK: Spinlock<ThreadRegistry> = Spinlock::new(ThreadRegistry { next_id: 0 });

static STARTED: Once<()> = Once::new();

/// Process-wide startup, callable exactly once worth of effect: installs the
/// logger. Later calls are no-ops.
pub fn startup() {
    STARTED.call_once(|| {
        logger::setup();
        log::debug!("runtime started");
    });
}

/// Attach the calling thread to the runtime: assign its identifier under
/// the global lock and record its native stack base from the current frame
/// pointer, while the stack is effectively empty. Must run before the
/// thread's first native root scan.
///
/// # Panics
/// Panics if the thread attaches twice.
pub fn attach_thread() -> u32 {
    let id = {
        let mut registry = G_LOCK.lock();
        let id = registry.next_id;
        registry.next_id += 1;
        id
    };

    thread::install(id, stackwalk::read_frame_pointer());
    log::debug!("thread {id} attached");
    id
}
