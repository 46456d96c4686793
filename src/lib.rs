//! A generational, moving garbage-collected heap for a managed language
//! runtime. Objects come out of size-class bins backed by mmap'd pages;
//! collection conservatively scans the native stack and registers for
//! roots, traces the live graph, evacuates young survivors into dedicated
//! destination pages and rewrites inbound pointers through compact
//! forwarding indices. Objects surviving past the age threshold are
//! promoted once into a dedicated old-generation chain, which is never
//! compacted and is reclaimed under reference counts rebuilt by every
//! trace.
#![warn(clippy::all)]

pub mod config;
pub mod gc;
pub mod logger;
pub mod mm;
pub mod runtime;
pub mod thread;

pub use gc::collector::{mark_from_roots, resolve_candidate};
pub use gc::schema::{ChildLayout, TypeSchema};
pub use gc::verify::{verify_all_canaries, verify_canaries_in_block, verify_canaries_in_page};
pub use mm::bin::AllocatorBin;
pub use mm::page::{ForwardIndex, MetaData, ObjectRef, PageState, SlotFlags};
pub use runtime::{attach_thread, startup, Heap, HeapConfig};
pub use thread::{load_native_root_set, unload_native_root_set};
