//! Backing store for pages evicted from physical memory.
//!
//! The kernel does not implement demand paging: a user page fault kills the
//! faulting process. [`PagingFile`] is the interface the page fault handler
//! would use to bring pages back if eviction is ever added.
use super::PAGE_SIZE;

/// A page-sized slot in the paging file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Slot(pub usize);

/// Errors reported by a paging file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagingError {
    /// The slot does not exist or is not in use.
    InvalidSlot,

    /// The underlying device failed.
    Io,
}

pub trait PagingFile {
    /// Find a free slot and reserve it, or return `None` if the paging file
    /// is full.
    fn find_space(&mut self) -> Option<Slot>;

    /// Release a slot reserved with [`PagingFile::find_space`].
    fn free_space(&mut self, slot: Slot);

    /// Write a page to the given slot.
    ///
    /// # Errors
    /// Returns an error if the slot is invalid or the write failed.
    fn write_to(&mut self, slot: Slot, page: &[u8; PAGE_SIZE]) -> Result<(), PagingError>;

    /// Read a page back from the given slot.
    ///
    /// # Errors
    /// Returns an error if the slot is invalid or the read failed.
    fn read_from(&mut self, slot: Slot, page: &mut [u8; PAGE_SIZE]) -> Result<(), PagingError>;
}
