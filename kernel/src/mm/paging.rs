//! Two-level translation structures of the simulated machine.
//!
//! A page directory and its page tables are each one physical frame of 1024
//! little-endian 32-bit entries. The top 10 bits of a linear address select
//! the directory entry, the next 10 bits select the table entry, and the low
//! 12 bits are the offset inside the mapped frame.
//!
//! Creating the path to a leaf entry and binding a frame into it are two
//! separate steps, so the same code builds the kernel identity mapping at
//! boot and maps user pages on demand.
use super::{AllocationFlags, PAGE_SIZE, Physical, PhysicalMemory, Virtual};
use alloc::vec::Vec;
use bit_field::BitField;
use bitflags::bitflags;
use log::trace;

/// The number of entries in a page directory or a page table.
pub const ENTRY_COUNT: usize = 1024;

/// The size of an entry in bytes.
const ENTRY_SIZE: usize = 4;

bitflags! {
    /// Flags of a page directory or page table entry.
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EntryFlags: u32 {
        /// The entry is valid.
        const PRESENT = 1 << 0;

        /// The memory can be written. Without this flag, writes fault.
        const WRITABLE = 1 << 1;

        /// The memory can be accessed from user mode.
        const USER = 1 << 2;

        /// Writes go directly to memory.
        const WRITE_THROUGH = 1 << 3;

        /// The memory is not cached.
        const CACHE_DISABLE = 1 << 4;

        /// Set by the processor when the entry is used for a translation.
        const ACCESSED = 1 << 5;

        /// Set by the processor when the mapped page is written.
        const DIRTY = 1 << 6;

        /// The translation is not flushed when the directory is switched.
        const GLOBAL = 1 << 8;
    }
}

/// Errors that can occur when creating a mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapError {
    /// No physical frame was available for a page table or a page.
    OutOfMemory,

    /// The linear address is already mapped.
    AlreadyMapped,
}

/// A page directory or page table entry.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct Entry(u32);

impl Entry {
    /// An entry that maps nothing.
    #[must_use]
    pub const fn missing() -> Self {
        Self(0)
    }

    /// Create an entry pointing to the given frame with the given flags.
    #[must_use]
    pub fn new(frame: Physical, flags: EntryFlags) -> Self {
        let mut raw = flags.bits() & 0xFFF;
        raw.set_bits(12..32, frame.as_u32() >> 12);
        Self(raw)
    }

    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[must_use]
    pub fn is_present(self) -> bool {
        self.flags().contains(EntryFlags::PRESENT)
    }

    /// The frame this entry points to.
    #[must_use]
    pub fn frame(self) -> Physical {
        Physical::new(self.0.get_bits(12..32) << 12)
    }

    #[must_use]
    pub fn flags(self) -> EntryFlags {
        EntryFlags::from_bits_truncate(self.0.get_bits(0..12))
    }
}

/// Handle to a leaf entry, returned by [`register_path`]. The entry may or
/// may not be bound to a frame yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntrySlot {
    address: Physical,
    linear: Virtual,
}

impl EntrySlot {
    /// The physical address of the entry.
    #[must_use]
    pub const fn address(&self) -> Physical {
        self.address
    }

    /// The linear address translated by this entry.
    #[must_use]
    pub const fn linear(&self) -> Virtual {
        self.linear
    }

    #[must_use]
    pub fn read(&self, memory: &PhysicalMemory) -> Entry {
        Entry(memory.read_u32(self.address))
    }

    /// Write the entry without touching the frame descriptors.
    pub fn set(&self, memory: &mut PhysicalMemory, entry: Entry) {
        memory.write_u32(self.address, entry.raw());
    }

    /// Bind a frame into the entry and record the mapping in the frame
    /// descriptor so the frame can be traced back to this entry.
    pub fn bind(&self, memory: &mut PhysicalMemory, frame: Physical, flags: EntryFlags) {
        self.set(memory, Entry::new(frame, flags | EntryFlags::PRESENT));
        memory.page_mut(frame).set_mapping(self.address, self.linear);
    }
}

/// Physical address of the directory entry covering `linear`.
fn directory_entry(directory: Physical, linear: Virtual) -> Physical {
    directory + linear.directory_index() * ENTRY_SIZE
}

/// Create the translation path to the leaf entry of `linear` in the given
/// directory. If the directory entry is missing, a zeroed page table is
/// allocated and installed with `flags`, otherwise the existing table is
/// reused. The leaf entry itself is left untouched.
///
/// # Errors
/// Returns [`MapError::OutOfMemory`] if a page table was needed and no frame
/// was available.
pub fn register_path(
    memory: &mut PhysicalMemory,
    directory: Physical,
    linear: Virtual,
    flags: EntryFlags,
) -> Result<EntrySlot, MapError> {
    let pde = directory_entry(directory, linear);
    let entry = Entry(memory.read_u32(pde));

    let table = if entry.is_present() {
        entry.frame()
    } else {
        let table = memory
            .allocate_frame(AllocationFlags::KERNEL | AllocationFlags::ZEROED)
            .ok_or(MapError::OutOfMemory)?;
        memory.write_u32(pde, Entry::new(table, flags | EntryFlags::PRESENT).raw());
        trace!(
            "New page table {:#x} for directory entry {}",
            table.as_u32(),
            linear.directory_index()
        );
        table
    };

    Ok(EntrySlot {
        address: table + linear.table_index() * ENTRY_SIZE,
        linear,
    })
}

/// Map a fresh zeroed, pageable frame at `linear`. Return the frame.
///
/// # Errors
/// Returns [`MapError::OutOfMemory`] if there is no frame left for the page
/// or its page table, or [`MapError::AlreadyMapped`] if `linear` is already
/// mapped.
pub fn map_page(
    memory: &mut PhysicalMemory,
    directory: Physical,
    linear: Virtual,
    flags: EntryFlags,
) -> Result<Physical, MapError> {
    let slot = register_path(memory, directory, linear, flags)?;
    if slot.read(memory).is_present() {
        return Err(MapError::AlreadyMapped);
    }

    let frame = memory
        .allocate_frame(AllocationFlags::ZEROED | AllocationFlags::PAGEABLE)
        .ok_or(MapError::OutOfMemory)?;
    slot.bind(memory, frame, flags);
    Ok(frame)
}

/// Return the leaf entry translating `linear`, if the path exists.
#[must_use]
pub fn lookup(memory: &PhysicalMemory, directory: Physical, linear: Virtual) -> Option<Entry> {
    let entry = Entry(memory.read_u32(directory_entry(directory, linear)));
    if !entry.is_present() {
        return None;
    }
    let leaf = Entry(memory.read_u32(entry.frame() + linear.table_index() * ENTRY_SIZE));
    Some(leaf)
}

/// Translate a linear address into a physical address, or return `None` if
/// the page is not mapped.
#[must_use]
pub fn translate(memory: &PhysicalMemory, directory: Physical, linear: Virtual) -> Option<Physical> {
    lookup(memory, directory, linear)
        .filter(|entry| entry.is_present())
        .map(|entry| entry.frame() + linear.page_offset())
}

/// Release a page directory and everything mapped through it from the
/// directory entry covering `first` upward: first the mapped frames, then
/// the page tables, and finally the directory itself. Directory entries
/// below `first` belong to the kernel template and are left alone.
pub fn release(memory: &mut PhysicalMemory, directory: Physical, first: Virtual) {
    let tables = first.directory_index()..ENTRY_COUNT;
    let present = |memory: &PhysicalMemory, index: usize| {
        Some(Entry(memory.read_u32(directory + index * ENTRY_SIZE)))
            .filter(|entry| entry.is_present())
            .map(Entry::frame)
    };

    let found: Vec<Physical> = tables
        .filter_map(|index| present(memory, index))
        .collect();

    for &table in &found {
        for index in 0..ENTRY_COUNT {
            let leaf = Entry(memory.read_u32(table + index * ENTRY_SIZE));
            if leaf.is_present() {
                memory.deallocate_frame(leaf.frame());
            }
        }
    }

    for table in found {
        memory.deallocate_frame(table);
    }

    memory.deallocate_frame(directory);
}

/// The kernel part of every page directory: an identity mapping of the whole
/// physical memory, accessible from supervisor mode only. It is built once
/// at boot and never modified afterward; every process directory starts as a
/// copy of it.
#[derive(Debug)]
pub struct KernelTemplate {
    directory: Physical,
}

impl KernelTemplate {
    /// Build the identity mapping of the physical memory.
    ///
    /// # Errors
    /// Returns [`MapError::OutOfMemory`] if there are not enough frames left
    /// for the directory and its page tables.
    pub fn build(memory: &mut PhysicalMemory) -> Result<Self, MapError> {
        let directory = memory
            .allocate_frame(AllocationFlags::KERNEL | AllocationFlags::ZEROED)
            .ok_or(MapError::OutOfMemory)?;

        for index in 0..memory.frame_count() {
            let frame = Physical::from_frame_idx(index).ok_or(MapError::OutOfMemory)?;
            let linear = Virtual::new(frame.as_u32());
            let slot = register_path(memory, directory, linear, EntryFlags::WRITABLE)?;
            slot.set(
                memory,
                Entry::new(frame, EntryFlags::PRESENT | EntryFlags::WRITABLE),
            );
        }

        trace!(
            "Kernel directory {:#x} maps {} frames",
            directory.as_u32(),
            memory.frame_count()
        );
        Ok(Self { directory })
    }

    /// The directory frame of the template.
    #[must_use]
    pub const fn directory(&self) -> Physical {
        self.directory
    }

    /// Create a new directory holding a copy of the kernel entries.
    ///
    /// # Errors
    /// Returns [`MapError::OutOfMemory`] if no frame is available for the new
    /// directory.
    pub fn instantiate(&self, memory: &mut PhysicalMemory) -> Result<Physical, MapError> {
        let directory = memory
            .allocate_frame(AllocationFlags::KERNEL)
            .ok_or(MapError::OutOfMemory)?;
        memory.copy(self.directory, directory, PAGE_SIZE);
        Ok(directory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory(memory: &mut PhysicalMemory) -> Physical {
        memory
            .allocate_frame(AllocationFlags::KERNEL | AllocationFlags::ZEROED)
            .unwrap()
    }

    #[test]
    fn entry_encoding() {
        let entry = Entry::new(
            Physical::new(0x0012_3000),
            EntryFlags::PRESENT | EntryFlags::USER,
        );
        assert_eq!(entry.raw(), 0x0012_3005);
        assert_eq!(entry.frame(), Physical::new(0x0012_3000));
        assert!(entry.is_present());
        assert!(!entry.flags().contains(EntryFlags::WRITABLE));
        assert!(!Entry::missing().is_present());
    }

    #[test]
    fn path_creation_reuses_tables() {
        let mut memory = PhysicalMemory::new(64 * PAGE_SIZE);
        let dir = directory(&mut memory);
        let free = memory.free_frames();

        let flags = EntryFlags::WRITABLE | EntryFlags::USER;
        let first = register_path(&mut memory, dir, Virtual::new(0x8000_0000), flags).unwrap();
        assert_eq!(memory.free_frames(), free - 1);
        assert!(!first.read(&memory).is_present());

        // Same directory entry, different table entry
        let second = register_path(&mut memory, dir, Virtual::new(0x8000_1000), flags).unwrap();
        assert_eq!(memory.free_frames(), free - 1);
        assert_eq!(second.address(), first.address() + 4);

        let pde = Entry::from_raw(memory.read_u32(dir + 0x200 * 4));
        assert_eq!(pde.flags(), flags | EntryFlags::PRESENT);
    }

    #[test]
    fn map_and_translate() {
        let mut memory = PhysicalMemory::new(64 * PAGE_SIZE);
        let dir = directory(&mut memory);
        let linear = Virtual::new(0x8040_2000);
        let flags = EntryFlags::WRITABLE | EntryFlags::USER;

        let frame = map_page(&mut memory, dir, linear, flags).unwrap();
        assert_eq!(
            translate(&memory, dir, Virtual::new(0x8040_2abc)),
            Some(frame + 0xabc)
        );
        assert_eq!(translate(&memory, dir, Virtual::new(0x8040_3000)), None);
        assert_eq!(translate(&memory, dir, Virtual::new(0x1000)), None);
        assert_eq!(
            map_page(&mut memory, dir, linear, flags),
            Err(MapError::AlreadyMapped)
        );

        let page = memory.page(frame);
        assert_eq!(page.vaddr(), linear);
        assert_eq!(page.entry().map(|e| memory.read_u32(e)), Some(lookup(&memory, dir, linear).unwrap().raw()));
    }

    #[test]
    fn release_everything_above_the_boundary() {
        let mut memory = PhysicalMemory::new(64 * PAGE_SIZE);
        let free = memory.free_frames();
        let dir = directory(&mut memory);
        let flags = EntryFlags::WRITABLE | EntryFlags::USER;

        for addr in [0x8000_0000, 0x8000_1000, 0xFFFF_F000] {
            map_page(&mut memory, dir, Virtual::new(addr), flags).unwrap();
        }
        assert_eq!(memory.free_frames(), free - 6);

        release(&mut memory, dir, Virtual::new(0x8000_0000));
        assert_eq!(memory.free_frames(), free);
    }

    #[test]
    fn kernel_template() {
        let mut memory = PhysicalMemory::new(2048 * PAGE_SIZE);
        let template = KernelTemplate::build(&mut memory).unwrap();

        // 8 MiB of memory need two page tables
        let addr = Virtual::new(0x0040_1234);
        assert_eq!(
            translate(&memory, template.directory(), addr),
            Some(Physical::new(0x0040_1234))
        );
        let leaf = lookup(&memory, template.directory(), addr).unwrap();
        assert!(!leaf.flags().contains(EntryFlags::USER));

        let copy = template.instantiate(&mut memory).unwrap();
        assert_ne!(copy, template.directory());
        assert_eq!(
            translate(&memory, copy, addr),
            Some(Physical::new(0x0040_1234))
        );
        assert_eq!(translate(&memory, copy, Virtual::new(0x8000_0000)), None);

        let before = memory.free_frames();
        release(&mut memory, copy, Virtual::new(0x8000_0000));
        assert_eq!(memory.free_frames(), before + 1);
        assert!(translate(&memory, template.directory(), addr).is_some());
    }
}
