use addr::block::Block;

/// The size of a heap block. Every page handed to an allocator bin spans
/// exactly one block, and every block base is registered in the page table.
pub const BLOCK_SIZE: usize = Block::SIZE;

/// The payload size used by bins when the host does not request a specific
/// size class.
pub const DEFAULT_ENTRY_SIZE: u16 = 64;

/// The value stamped into the guard words surrounding every entry slot when
/// the `canaries` feature is enabled.
pub const ALLOC_CANARY_VALUE: u64 = 0xDEAD_BEEF_DEAD_BEEF;

/// The number of collection cycles an object may survive before it is
/// promoted to the old generation. Promoted objects are no longer moved by
/// the evacuation pass and are reclaimed through their reference count.
pub const YOUNG_AGE_THRESHOLD: u8 = 3;

/// The base address used in deterministic mode. Pages are mapped at
/// successive hint addresses starting here so that runs are reproducible
/// under a debugger.
pub const DETERMINISTIC_BASE: usize = 0x4000_0000_0000;
