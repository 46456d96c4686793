use crate::virt::Virtual;

/// The base address of a heap block. A block is a [`Block::SIZE`] bytes
/// region of memory obtained from the OS, and is the granularity at which
/// the heap maps and recycles memory. This struct is a wrapper around a
/// virtual address, and guarantees that the address is always block aligned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Block(Virtual);

impl Block {
    /// The size of a block, in bytes. Blocks are exactly one OS page so that
    /// anonymous mappings are always block aligned without any trimming.
    pub const SIZE: usize = 4096;

    /// Creates a new block from the given address.
    ///
    /// # Panics
    /// Panics if the address is not block aligned.
    #[must_use]
    pub fn new<T: Into<Virtual>>(address: T) -> Self {
        let address = address.into();
        assert!(address.is_aligned(Self::SIZE as u64));
        Self(address)
    }

    /// Creates the block containing the given address, truncating the
    /// address down to the previous block boundary if necessary.
    #[must_use]
    pub fn containing<T: Into<Virtual>>(address: T) -> Self {
        Self(address.into().align_down(Self::SIZE as u64))
    }

    /// Check if the block contains the given address.
    #[must_use]
    pub fn contains(&self, address: Virtual) -> bool {
        address >= self.0 && address < self.end()
    }

    /// Return the address of the first byte of the block, guaranteed to be
    /// block aligned.
    #[must_use]
    pub const fn addr(&self) -> Virtual {
        self.0
    }

    /// Return the address one past the last byte of the block. The returned
    /// address is not included in the block.
    #[must_use]
    pub fn end(&self) -> Virtual {
        self.0 + Self::SIZE
    }

    #[must_use]
    pub const fn as_ptr<T>(&self) -> *const T {
        self.0.as_ptr()
    }

    #[must_use]
    pub const fn as_mut_ptr<T>(&self) -> *mut T {
        self.0.as_mut_ptr()
    }
}

impl From<Block> for Virtual {
    fn from(block: Block) -> Self {
        block.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn containing_truncates() {
        let block = Block::containing(Virtual::new(0x7000 + 0x123));
        assert_eq!(block.addr().as_usize(), 0x7000);
        assert!(block.contains(Virtual::new(0x7FFF)));
        assert!(!block.contains(Virtual::new(0x8000)));
    }

    #[test]
    #[should_panic]
    fn misaligned_base_rejected() {
        let _ = Block::new(Virtual::new(0x7008));
    }
}
