//! Layout of the argument block placed in the memory of a new process.
//!
//! The block starts with a [`Header`], followed by `argc + 1` user pointers
//! (the last one is null), followed by the NUL-terminated argument strings.
//! All pointers are 32-bit user addresses.
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Size of a user pointer stored in the argument block.
pub const POINTER_SIZE: usize = core::mem::size_of::<u32>();

/// The header found at the start of the argument block. The address of the
/// block is passed to the entry point of the program, so this is what a
/// program sees first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct Header {
    /// The number of arguments.
    pub argc: u32,

    /// User address of the argument pointer table.
    pub argv: u32,
}

impl Header {
    /// Size of the header in bytes.
    pub const SIZE: usize = core::mem::size_of::<Self>();
}
