//! Segment descriptors, selectors and the global descriptor table.
//!
//! Every process gets its own local descriptor table holding a code and a
//! data segment. The table lives in a physical frame and is referenced by a
//! descriptor in the global descriptor table, which is what the LDTR points
//! to while the process runs.
use super::{Machine, cpu::Privilege};
use crate::mm::{AllocationFlags, Physical};
use alloc::sync::Arc;
use bit_field::BitField;
use config::GDT_ENTRIES;
use usize_cast::IntoUsize;

/// The descriptor table a selector refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Global = 0,
    Local = 1,
}

/// The selector of a descriptor. It is loaded in a segment register and
/// references a descriptor by its index in the global or in the current
/// local descriptor table, with the privilege level requested for it.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Selector(u16);

impl Selector {
    pub const NULL: Self = Self(0);

    /// Creates a new selector with the provided index, table and privilege
    /// level.
    #[must_use]
    pub const fn new(index: u16, table: Table, privilege: Privilege) -> Self {
        Self((index << 3) | ((table as u16) << 2) | (privilege as u16 & 0b11))
    }

    #[must_use]
    pub const fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    /// Returns the value of the selector.
    #[must_use]
    pub const fn value(self) -> u16 {
        self.0
    }

    /// The index of the descriptor in its table.
    #[must_use]
    pub const fn index(self) -> usize {
        (self.0 >> 3) as usize
    }

    #[must_use]
    pub const fn table(self) -> Table {
        if self.0 & 0b100 == 0 {
            Table::Global
        } else {
            Table::Local
        }
    }

    /// The requested privilege level.
    #[must_use]
    pub const fn rpl(self) -> u16 {
        self.0 & 0b11
    }
}

/// The kind of memory a descriptor describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// Executable and readable segment.
    Code,

    /// Readable and writable segment.
    Data,

    /// A local descriptor table.
    LocalTable,
}

/// A segment descriptor, in the 8-byte format of the 32-bit x86 processors.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct Descriptor(u64);

impl Descriptor {
    pub const NULL: Self = Self(0);

    /// The size of a descriptor in bytes.
    pub const SIZE: usize = 8;

    /// Create a 32-bit code or data segment of `pages` pages starting at
    /// `base`, accessible with the given privilege.
    ///
    /// # Panics
    /// Panics if `kind` is [`Kind::LocalTable`], if `pages` is zero or if it
    /// exceeds the 4 GiB addressable with page granularity.
    #[must_use]
    pub fn segment(kind: Kind, base: u32, pages: usize, privilege: Privilege) -> Self {
        assert!(pages > 0 && pages <= 1 << 20, "Invalid segment size");
        let kind = match kind {
            Kind::Code => 0b1010,
            Kind::Data => 0b0010,
            Kind::LocalTable => panic!("Not a memory segment"),
        };

        let mut raw = Self::encode(base, (pages - 1) as u64, kind);
        raw.set_bit(44, true);
        raw.set_bits(45..47, privilege as u64);
        raw.set_bit(54, true);
        raw.set_bit(55, true);
        Self(raw)
    }

    /// Create the descriptor of a local descriptor table of `entries`
    /// entries located at `base`.
    #[must_use]
    pub fn local_table(base: u32, entries: usize) -> Self {
        Self(Self::encode(base, (entries * Self::SIZE - 1) as u64, 0b0010))
    }

    /// Encode the base, the limit and the type of a present descriptor.
    fn encode(base: u32, limit: u64, kind: u64) -> u64 {
        let base = u64::from(base);
        let mut raw = 0u64;
        raw.set_bits(0..16, limit.get_bits(0..16));
        raw.set_bits(16..40, base.get_bits(0..24));
        raw.set_bits(40..44, kind);
        raw.set_bit(47, true);
        raw.set_bits(48..52, limit.get_bits(16..20));
        raw.set_bits(56..64, base.get_bits(24..32));
        raw
    }

    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    #[must_use]
    pub fn is_present(self) -> bool {
        self.0.get_bit(47)
    }

    /// The linear address where the segment starts.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn base(self) -> u32 {
        (self.0.get_bits(16..40) | (self.0.get_bits(56..64) << 24)) as u32
    }

    /// The size of the segment in bytes.
    #[must_use]
    pub fn size(self) -> usize {
        let limit = self.0.get_bits(0..16) | (self.0.get_bits(48..52) << 16);
        let size = (limit + 1).into_usize();
        if self.0.get_bit(55) {
            size * crate::mm::PAGE_SIZE
        } else {
            size
        }
    }

    /// The privilege level required to use the segment.
    #[must_use]
    pub fn privilege(self) -> Privilege {
        if self.0.get_bits(45..47) == 3 {
            Privilege::User
        } else {
            Privilege::Kernel
        }
    }

    #[must_use]
    pub fn kind(self) -> Option<Kind> {
        let kind = self.0.get_bits(40..44);
        match (self.0.get_bit(44), kind) {
            (true, kind) if kind & 0b1000 != 0 => Some(Kind::Code),
            (true, _) => Some(Kind::Data),
            (false, 0b0010) => Some(Kind::LocalTable),
            (false, _) => None,
        }
    }
}

/// The global descriptor table. The first three entries are reserved for
/// the null descriptor and the flat kernel code and data segments, the other
/// ones are handed out to local descriptor tables.
#[derive(Debug)]
pub struct DescriptorTable {
    entries: [Descriptor; GDT_ENTRIES],
}

impl DescriptorTable {
    pub const KERNEL_CODE: Selector = Selector::new(1, Table::Global, Privilege::Kernel);
    pub const KERNEL_DATA: Selector = Selector::new(2, Table::Global, Privilege::Kernel);

    /// The number of entries reserved by the kernel.
    const RESERVED: usize = 3;

    #[must_use]
    pub fn new() -> Self {
        let mut entries = [Descriptor::NULL; GDT_ENTRIES];
        entries[1] = Descriptor::segment(Kind::Code, 0, 1 << 20, Privilege::Kernel);
        entries[2] = Descriptor::segment(Kind::Data, 0, 1 << 20, Privilege::Kernel);
        Self { entries }
    }

    /// Store a descriptor in the first free entry and return its index, or
    /// `None` if the table is full.
    pub fn allocate(&mut self, descriptor: Descriptor) -> Option<u16> {
        let index = self.entries[Self::RESERVED..]
            .iter()
            .position(|entry| !entry.is_present())?
            + Self::RESERVED;
        self.entries[index] = descriptor;
        u16::try_from(index).ok()
    }

    /// Free an entry returned by [`DescriptorTable::allocate`].
    ///
    /// # Panics
    /// Panics if the entry is reserved or already free.
    pub fn free(&mut self, index: u16) {
        let index = usize::from(index);
        assert!(index >= Self::RESERVED, "Cannot free a reserved descriptor");
        assert!(
            self.entries[index].is_present(),
            "Descriptor already freed"
        );
        self.entries[index] = Descriptor::NULL;
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<Descriptor> {
        self.entries.get(index).copied()
    }

    /// The number of entries handed out.
    #[must_use]
    pub fn used(&self) -> usize {
        self.entries[Self::RESERVED..]
            .iter()
            .filter(|entry| entry.is_present())
            .count()
    }
}

impl Default for DescriptorTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors that can occur when installing a local descriptor table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentError {
    /// No frame was available to store the table.
    OutOfMemory,

    /// The global descriptor table is full.
    NoDescriptor,
}

/// The local descriptor table of a process. It holds the user code segment
/// at index 0 and the user data segment at index 1, both covering the same
/// memory. The table frame and its global descriptor are released when this
/// handle is dropped.
pub struct LocalTable {
    machine: Arc<Machine>,
    frame: Physical,
    index: u16,
}

impl LocalTable {
    /// Selector of the user code segment.
    pub const CODE: Selector = Selector::new(0, Table::Local, Privilege::User);

    /// Selector of the user data segment, also used for the stack.
    pub const DATA: Selector = Selector::new(1, Table::Local, Privilege::User);

    /// Number of descriptors in the table.
    const ENTRIES: usize = 2;

    /// Install a table whose segments cover `pages` pages starting at the
    /// linear address `base`.
    ///
    /// # Errors
    /// Returns [`SegmentError::OutOfMemory`] if no frame is available for the
    /// table, or [`SegmentError::NoDescriptor`] if the global descriptor table
    /// is full.
    pub fn install(machine: &Arc<Machine>, base: u32, pages: usize) -> Result<Self, SegmentError> {
        let code = Descriptor::segment(Kind::Code, base, pages, Privilege::User);
        let data = Descriptor::segment(Kind::Data, base, pages, Privilege::User);

        let frame = {
            let mut memory = machine.memory().lock();
            let frame = memory
                .allocate_frame(AllocationFlags::KERNEL | AllocationFlags::ZEROED)
                .ok_or(SegmentError::OutOfMemory)?;
            memory.write(frame, &code.raw().to_le_bytes());
            memory.write(frame + Descriptor::SIZE, &data.raw().to_le_bytes());
            frame
        };

        let descriptor = Descriptor::local_table(frame.as_u32(), Self::ENTRIES);
        let Some(index) = machine.gdt().lock().allocate(descriptor) else {
            machine.memory().lock().deallocate_frame(frame);
            return Err(SegmentError::NoDescriptor);
        };

        Ok(Self {
            machine: Arc::clone(machine),
            frame,
            index,
        })
    }

    /// The selector of the table descriptor in the global descriptor table,
    /// to be loaded into the LDTR.
    #[must_use]
    pub const fn selector(&self) -> Selector {
        Selector::new(self.index, Table::Global, Privilege::Kernel)
    }

    /// The frame holding the table.
    #[must_use]
    pub const fn frame(&self) -> Physical {
        self.frame
    }
}

impl Drop for LocalTable {
    fn drop(&mut self) {
        self.machine.memory().lock().deallocate_frame(self.frame);
        self.machine.gdt().lock().free(self.index);
    }
}
