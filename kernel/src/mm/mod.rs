//! Physical memory and address translation of the simulated machine.
pub mod addr;
pub mod pagefile;
pub mod paging;
pub mod phys;

pub use addr::{Physical, Virtual};
pub use phys::{AllocationFlags, PhysicalMemory};

/// The page size of the machine, also the size of a physical frame.
pub const PAGE_SIZE: usize = 4096;

/// The number of bits to shift an address to get its page number.
pub const PAGE_SHIFT: usize = 12;

pub trait Align {
    /// Assume that the value is a address and return the address aligned to
    /// the nearest previous page. If the address is already aligned to the
    /// page size, the address will not be changed.
    #[must_use]
    fn page_align_down(&self) -> Self;

    /// Assume that the value is a address and return the address aligned to
    /// the nearest next page, or `None` if the aligned address would overflow.
    #[must_use]
    fn checked_page_align_up(&self) -> Option<Self>
    where
        Self: Sized;

    /// Assume that the value is a address and return the address aligned to
    /// the nearest next page. If the address is already aligned to the page
    /// size, the address will not be changed.
    #[must_use]
    fn page_align_up(&self) -> Self;

    /// Assume that the value is a size in bytes and return the number of pages
    /// that it represents. If the value is not a multiple of the page size,
    /// the result will be rounded up to the nearest page.
    #[must_use]
    fn page_count_up(&self) -> usize;
}

impl Align for usize {
    fn page_align_down(&self) -> Self {
        self & !(PAGE_SIZE - 1)
    }

    fn checked_page_align_up(&self) -> Option<Self> {
        self.checked_add(PAGE_SIZE - 1).map(|addr| addr & !(PAGE_SIZE - 1))
    }

    fn page_align_up(&self) -> Self {
        (self + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
    }

    fn page_count_up(&self) -> usize {
        self.div_ceil(PAGE_SIZE)
    }
}
