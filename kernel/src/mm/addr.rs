//! Physical and linear addresses of the simulated 32-bit machine. Both are
//! 32 bits wide, but they are distinct types so that a physical address is
//! never used where the hardware would translate it first.
use super::{PAGE_SHIFT, PAGE_SIZE};
use core::ops::Add;
use usize_cast::IntoUsize;

/// A physical address.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Physical(u32);

impl Physical {
    #[must_use]
    pub const fn new(addr: u32) -> Self {
        Self(addr)
    }

    /// Create the physical address of the start of the frame with the given
    /// index. Return `None` if the address does not fit in 32 bits.
    #[must_use]
    pub fn from_frame_idx(index: usize) -> Option<Self> {
        let addr = index.checked_mul(PAGE_SIZE)?;
        u32::try_from(addr).ok().map(Self)
    }

    /// Return the index of the frame containing this address.
    #[must_use]
    pub fn frame_idx(self) -> usize {
        self.as_usize() >> PAGE_SHIFT
    }

    #[must_use]
    pub const fn is_page_aligned(self) -> bool {
        self.0 as usize % PAGE_SIZE == 0
    }

    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    #[must_use]
    pub fn as_usize(self) -> usize {
        self.0.into_usize()
    }
}

impl Add<usize> for Physical {
    type Output = Physical;

    /// # Panics
    /// Panics if the resulting address does not fit in 32 bits. Physical
    /// addresses are only computed from frames that exist, so this would be
    /// a kernel bug.
    fn add(self, rhs: usize) -> Self::Output {
        self.as_usize()
            .checked_add(rhs)
            .and_then(|addr| u32::try_from(addr).ok())
            .map(Physical)
            .expect("Physical address overflow")
    }
}

/// A linear address, the output of segmentation and the input of paging.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Virtual(u32);

impl Virtual {
    #[must_use]
    pub const fn new(addr: u32) -> Self {
        Self(addr)
    }

    /// Create a linear address from an integer, or return `None` if it does
    /// not fit in 32 bits.
    #[must_use]
    pub fn from_usize(addr: usize) -> Option<Self> {
        u32::try_from(addr).ok().map(Self)
    }

    /// The index of the page directory entry covering this address.
    #[must_use]
    pub const fn directory_index(self) -> usize {
        (self.0 >> 22) as usize
    }

    /// The index of the page table entry covering this address.
    #[must_use]
    pub const fn table_index(self) -> usize {
        ((self.0 >> PAGE_SHIFT) & 0x3FF) as usize
    }

    /// The offset of this address inside its page.
    #[must_use]
    pub const fn page_offset(self) -> usize {
        self.0 as usize & (PAGE_SIZE - 1)
    }

    #[must_use]
    pub const fn page_align_down(self) -> Self {
        Self(self.0 & !(PAGE_SIZE as u32 - 1))
    }

    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    #[must_use]
    pub fn as_usize(self) -> usize {
        self.0.into_usize()
    }
}
