//! Address spaces of user processes.
//!
//! The kernel can isolate processes in two ways, each implemented by a type
//! implementing [`AddressSpace`]:
//! - [`flat::Flat`] gives each process one contiguous block of physical
//!   memory, bounded by the segments of its local descriptor table.
//! - [`paged::Paged`] gives each process its own page directory, sharing the
//!   kernel mapping and mapping the process in a fixed window above
//!   [`USER_VM_START`].
//!
//! The kind of address space is chosen once, when the kernel is built, and
//! every process uses the same one.
use crate::{
    arch::{Machine, segment::{SegmentError, Selector}},
    argblock::Arguments,
    exe::{ExecutableFormat, Segment},
    mm::paging::MapError,
};
use alloc::sync::Arc;
use core::sync::atomic::{AtomicU32, Ordering};

pub mod copy;
pub mod flat;
pub mod paged;

pub use config::{USER_VM_SIZE, USER_VM_START};

/// The address space used by processes unless stated otherwise.
#[cfg(feature = "paging")]
pub type DefaultSpace = paged::Paged;

/// The address space used by processes unless stated otherwise.
#[cfg(not(feature = "paging"))]
pub type DefaultSpace = flat::Flat;

/// Errors that can occur when building an address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadError {
    /// Not enough physical memory.
    OutOfMemory,

    /// No descriptor is left in the global descriptor table.
    NoDescriptor,

    /// A segment has its file bytes outside of the image, or more file bytes
    /// than memory bytes.
    BadSegment,

    /// The process does not fit in the address space.
    TooLarge,
}

impl From<SegmentError> for LoadError {
    fn from(error: SegmentError) -> Self {
        match error {
            SegmentError::OutOfMemory => LoadError::OutOfMemory,
            SegmentError::NoDescriptor => LoadError::NoDescriptor,
        }
    }
}

impl From<MapError> for LoadError {
    fn from(error: MapError) -> Self {
        match error {
            MapError::OutOfMemory => LoadError::OutOfMemory,
            MapError::AlreadyMapped => LoadError::BadSegment,
        }
    }
}

/// Placement of the parts of a process in its address space, computed from
/// its segments and its arguments before anything is allocated. Addresses
/// are user addresses.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    /// End of the memory holding the segments, page aligned.
    pub image_end: usize,

    /// Address of the argument block.
    pub arguments: usize,

    /// Initial stack pointer. The stack grows down from here.
    pub stack_top: usize,

    /// User addresses are valid below this bound.
    pub limit: usize,
}

/// Initial state of the processor when entering a process for the first
/// time.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Registers {
    /// Address of the first instruction.
    pub entry: usize,

    /// Address of the argument block, passed to the entry point.
    pub arguments: usize,

    /// Initial stack pointer.
    pub stack_pointer: usize,

    /// Code segment selector.
    pub code: Selector,

    /// Data and stack segment selector.
    pub data: Selector,

    /// Selector of the local descriptor table in the global descriptor table.
    pub ldt: Selector,
}

/// Memory of a user process and everything needed to isolate it. Dropping
/// an address space releases all of its resources.
pub trait AddressSpace: Sized + Send + Sync + 'static {
    /// Name of the isolation scheme, for log messages.
    const NAME: &'static str;

    /// Compute where the parts of a process go.
    ///
    /// # Errors
    /// Returns [`LoadError::BadSegment`] if a segment is inconsistent with
    /// the image, or [`LoadError::TooLarge`] if the process cannot fit.
    fn layout(
        image: &[u8],
        format: &ExecutableFormat,
        args: &Arguments,
    ) -> Result<Layout, LoadError>;

    /// Reserve the memory of a new address space and install its local
    /// descriptor table.
    ///
    /// # Errors
    /// Returns [`LoadError::OutOfMemory`] or [`LoadError::NoDescriptor`] if
    /// the machine lacks the resources.
    fn create(machine: &Arc<Machine>, layout: Layout) -> Result<Self, LoadError>;

    /// Copy the segments and the argument block into the address space, and
    /// set its registers.
    ///
    /// # Errors
    /// Returns [`LoadError::OutOfMemory`] if memory runs out while mapping
    /// the process, or [`LoadError::BadSegment`] if a segment does not match
    /// the image.
    fn load(
        &mut self,
        image: &[u8],
        format: &ExecutableFormat,
        args: &Arguments,
    ) -> Result<(), LoadError>;

    /// The initial registers of the process.
    fn registers(&self) -> &Registers;

    /// User addresses are valid below this bound.
    fn limit(&self) -> usize;

    /// Copy user memory at `addr` into `dst`. Returns `false` without copying
    /// anything if the range is not entirely accessible.
    fn read(&self, addr: usize, dst: &mut [u8]) -> bool;

    /// Copy `src` into user memory at `addr`. Returns `false` without copying
    /// anything if the range is not entirely accessible.
    fn write(&self, addr: usize, src: &[u8]) -> bool;

    /// Make this address space the one used by the processor.
    fn switch_to(&self);

    /// Check that `len` bytes at the user address `addr` are inside the
    /// address space. Overflowing ranges are rejected.
    fn validate(&self, addr: usize, len: usize) -> bool {
        let limit = self.limit();
        addr < limit && len <= limit - addr
    }

    /// Build the address space of a process running `format` with the
    /// given command line.
    ///
    /// # Errors
    /// Returns the first error met while computing the layout, creating the
    /// address space or loading it. Whatever was allocated is released.
    fn build(
        machine: &Arc<Machine>,
        image: &[u8],
        format: &ExecutableFormat,
        command: &str,
    ) -> Result<Self, LoadError> {
        let args = Arguments::parse(command);
        let layout = Self::layout(image, format, &args)?;
        let mut space = Self::create(machine, layout)?;
        space.load(image, format, &args)?;
        log::debug!(
            "Built {} address space: entry {:#x}, {:?}",
            Self::NAME,
            space.registers().entry,
            layout
        );
        Ok(space)
    }
}

/// Check that a segment is consistent with the image and return its file
/// bytes.
///
/// # Errors
/// Returns [`LoadError::BadSegment`] if the file bytes are outside of the
/// image or larger than the segment in memory.
pub fn segment_bytes<'a>(segment: &Segment, image: &'a [u8]) -> Result<&'a [u8], LoadError> {
    match segment.bytes(image) {
        Some(bytes) if segment.length <= segment.size => Ok(bytes),
        _ => Err(LoadError::BadSegment),
    }
}

/// End of the segments of `format` once validated against the image.
///
/// # Errors
/// Returns [`LoadError::BadSegment`] if a segment is inconsistent with the
/// image, or [`LoadError::TooLarge`] if a segment ends above 4 GiB.
pub fn image_end(image: &[u8], format: &ExecutableFormat) -> Result<usize, LoadError> {
    for segment in format.segments() {
        segment_bytes(segment, image)?;
    }
    format
        .end()
        .filter(|&end| u32::try_from(end).is_ok())
        .ok_or(LoadError::TooLarge)
}

/// An address space shared with the threads that own it. At most one thread
/// owns a context at any time.
pub struct UserContext<A> {
    space: A,
    owners: AtomicU32,
}

impl<A: AddressSpace> UserContext<A> {
    #[must_use]
    pub fn new(space: A) -> Arc<Self> {
        Arc::new(Self {
            space,
            owners: AtomicU32::new(0),
        })
    }

    #[must_use]
    pub const fn space(&self) -> &A {
        &self.space
    }

    /// The number of threads owning this context, either 0 or 1.
    #[must_use]
    pub fn owners(&self) -> u32 {
        self.owners.load(Ordering::SeqCst)
    }

    /// Record a new owner.
    ///
    /// # Panics
    /// Panics if the context already has an owner. Sharing an address space
    /// between threads is not supported.
    pub(crate) fn acquire(&self) {
        let owned = self
            .owners
            .compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst);
        assert!(owned.is_ok(), "User context already owned by a thread");
    }

    /// Remove the owner. Return `true` if no owner remains.
    ///
    /// # Panics
    /// Panics if the context has no owner.
    pub(crate) fn release(&self) -> bool {
        let previous = self.owners.fetch_sub(1, Ordering::SeqCst);
        assert!(previous > 0, "User context released without owner");
        previous == 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{exe, testing::Program};

    #[test]
    fn reject_inconsistent_segments() {
        let program = Program::new();
        let format = exe::parse(&program.image).unwrap();
        assert_eq!(image_end(&program.image, &format), Ok(0x4800));

        let truncated = &program.image[..program.image.len() - 1];
        assert_eq!(image_end(truncated, &format), Err(LoadError::BadSegment));

        let larger = Segment {
            length: 16,
            size: 8,
            ..Segment::default()
        };
        assert_eq!(segment_bytes(&larger, &[0; 32]), Err(LoadError::BadSegment));
    }

    #[test]
    fn single_owner() {
        let machine = Machine::boot(64 * crate::mm::PAGE_SIZE);
        let program = Program::new();
        let format = exe::parse(&program.image).unwrap();
        let space = flat::Flat::build(&machine, &program.image, &format, "prog").unwrap();

        let context = UserContext::new(space);
        context.acquire();
        assert_eq!(context.owners(), 1);
        assert!(context.release());
        assert_eq!(context.owners(), 0);
    }

    #[test]
    #[should_panic(expected = "already owned")]
    fn double_acquire() {
        let machine = Machine::boot(64 * crate::mm::PAGE_SIZE);
        let program = Program::new();
        let format = exe::parse(&program.image).unwrap();
        let space = flat::Flat::build(&machine, &program.image, &format, "prog").unwrap();

        let context = UserContext::new(space);
        context.acquire();
        context.acquire();
    }
}
