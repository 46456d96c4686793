use core::{
    fmt,
    ops::{Add, AddAssign, Sub, SubAssign},
};

/// A canonical 64-bit virtual memory address.
///
/// On `x86_64`, only the 48 lower bits of a virtual address can be used. This
/// type guarantees that the address is always canonical, i.e. that the top 17
/// bits are either all 0 or all 1. The heap only ever maps pages into the
/// lower half, but arbitrary words picked up by the conservative scanner are
/// funneled through [`Virtual::try_new`], which rejects junk instead of
/// panicking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Virtual(pub(crate) u64);

/// An invalid virtual address, returned by [`Virtual::try_new`] when the
/// given address is not canonical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct InvalidVirtual(pub(crate) u64);

impl Virtual {
    /// Creates a new canonical virtual address.
    ///
    /// # Panics
    /// This function panics if the given address is not canonical.
    #[must_use]
    pub const fn new(address: u64) -> Self {
        match Self::try_new(address) {
            Ok(addr) => addr,
            Err(InvalidVirtual(_)) => panic!("Invalid virtual address: non canonical"),
        }
    }

    /// Tries to create a new canonical virtual address.
    ///
    /// # Errors
    /// This function returns an [`InvalidVirtual`] error if the given address
    /// is not canonical.
    pub const fn try_new(address: u64) -> Result<Self, InvalidVirtual> {
        match (address & 0xFFFF_8000_0000_0000) >> 47 {
            0 | 0x1FFFF => Ok(Self(address)),
            _ => Err(InvalidVirtual(address)),
        }
    }

    /// Creates a new virtual address from a pointer. This is a convenience
    /// function that simply casts the pointer address to a `u64`, and then
    /// calls [`Self::new`].
    #[must_use]
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Self::new(ptr as u64)
    }

    #[must_use]
    pub const fn as_ptr<T>(&self) -> *const T {
        self.0 as *const T
    }

    #[must_use]
    pub const fn as_mut_ptr<T>(&self) -> *mut T {
        self.as_ptr::<T>() as *mut T
    }

    /// Convert this virtual address to an usize.
    #[must_use]
    pub const fn as_usize(&self) -> usize {
        self.0 as usize
    }

    /// Convert this virtual address to an u64.
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    #[must_use]
    pub const fn null() -> Self {
        Self(0)
    }

    #[must_use]
    pub const fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// Align the address down to the given alignment. If the address is
    /// already aligned, this function does nothing.
    ///
    /// # Panics
    /// This function panics if the given alignment is not a power of two.
    #[must_use]
    pub fn align_down<T>(&self, alignment: T) -> Self
    where
        T: Into<u64>,
    {
        let align: u64 = alignment.into();
        assert!(align.is_power_of_two());
        Self(self.0 & !(align - 1))
    }

    /// Checks if the address is aligned to the given alignment.
    ///
    /// # Panics
    /// This function panics if the given alignment is not a power of two.
    #[must_use]
    pub fn is_aligned<T>(&self, alignment: T) -> bool
    where
        T: Into<u64>,
    {
        let align: u64 = alignment.into();
        assert!(align.is_power_of_two());
        self.0 & (align - 1) == 0
    }
}

impl fmt::LowerHex for Virtual {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl fmt::Pointer for Virtual {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Pointer::fmt(&(self.0 as *const ()), f)
    }
}

impl fmt::Display for Virtual {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016x}", self.0)
    }
}

impl From<Virtual> for u64 {
    fn from(address: Virtual) -> Self {
        address.0
    }
}

impl From<Virtual> for usize {
    fn from(address: Virtual) -> Self {
        address.0 as usize
    }
}

impl From<u64> for Virtual {
    fn from(address: u64) -> Self {
        Self::new(address)
    }
}

impl From<usize> for Virtual {
    fn from(address: usize) -> Self {
        Self::new(address as u64)
    }
}

impl Add<usize> for Virtual {
    type Output = Virtual;

    fn add(self, rhs: usize) -> Self::Output {
        Self::new(self.0 + rhs as u64)
    }
}

impl AddAssign<usize> for Virtual {
    fn add_assign(&mut self, rhs: usize) {
        self.0 += rhs as u64;
    }
}

impl Sub<usize> for Virtual {
    type Output = Virtual;

    fn sub(self, rhs: usize) -> Self::Output {
        Self::new(self.0 - rhs as u64)
    }
}

impl Sub<Virtual> for Virtual {
    type Output = usize;

    fn sub(self, rhs: Virtual) -> Self::Output {
        (self.0 - rhs.0) as usize
    }
}

impl SubAssign<usize> for Virtual {
    fn sub_assign(&mut self, rhs: usize) {
        self.0 -= rhs as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_addresses() {
        assert!(Virtual::try_new(0x0000_7FFF_FFFF_FFFF).is_ok());
        assert!(Virtual::try_new(0xFFFF_8000_0000_0000).is_ok());
        assert!(Virtual::try_new(0x0000_8000_0000_0000).is_err());
    }

    #[test]
    fn alignment() {
        let addr = Virtual::new(0x1234);
        assert_eq!(addr.align_down(0x1000u64).as_usize(), 0x1000);
        assert!(addr.align_down(0x1000u64).is_aligned(0x1000u64));
        assert!(!addr.is_aligned(0x1000u64));
    }
}
