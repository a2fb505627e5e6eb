//! Physical memory of the simulated machine, and the frame allocator that
//! hands it out one page at a time.
use super::{PAGE_SIZE, Physical, Virtual};
use alloc::{boxed::Box, vec, vec::Vec};
use bitflags::bitflags;

bitflags! {
    /// Allocation flags that can be used to customize the behavior of
    /// the physical memory allocator or to provide additional information
    /// about the allocated frame.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AllocationFlags: u8 {
        /// The frame will be used by the kernel. This does not have any
        /// effect on the allocation itself, but can be used to track which
        /// frames are used by the kernel.
        const KERNEL = 1 << 0;

        /// The frame will be zeroed before it is returned to the caller.
        const ZEROED = 1 << 1;

        /// The frame holds user data and could be evicted to a paging file
        /// if the kernel supported it.
        const PAGEABLE = 1 << 2;
    }
}

bitflags! {
    /// State of a physical frame.
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFlags: u8 {
        /// The frame is in use.
        const ALLOCATED = 1 << 0;

        /// The frame is used by the kernel itself.
        const KERNEL = 1 << 1;

        /// The frame may be evicted. Cleared while the kernel accesses the
        /// frame on behalf of a user process.
        const PAGEABLE = 1 << 2;

        /// The frame is pageable, but the kernel is currently accessing it
        /// and it must not be released or evicted.
        const LOCKED = 1 << 3;
    }
}

/// Descriptor of a physical frame.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    flags: PageFlags,

    /// Physical address of the page table entry that maps this frame, if
    /// the frame is mapped in a user address space.
    entry: Option<Physical>,

    /// The linear address this frame is mapped at.
    vaddr: Virtual,
}

impl Page {
    #[must_use]
    pub const fn flags(&self) -> PageFlags {
        self.flags
    }

    #[must_use]
    pub const fn entry(&self) -> Option<Physical> {
        self.entry
    }

    #[must_use]
    pub const fn vaddr(&self) -> Virtual {
        self.vaddr
    }

    /// Record the page table entry that maps this frame and the address it
    /// is mapped at.
    pub fn set_mapping(&mut self, entry: Physical, vaddr: Virtual) {
        self.entry = Some(entry);
        self.vaddr = vaddr;
    }
}

/// The physical memory of the machine. It owns the bytes of every frame and
/// one descriptor per frame, and allocates frames with a first-fit search
/// over the descriptors.
pub struct PhysicalMemory {
    bytes: Box<[u8]>,
    pages: Vec<Page>,
    free: usize,
}

impl PhysicalMemory {
    /// Create a physical memory of `size` bytes. The first frame is
    /// reserved so that the physical address 0 is never handed out.
    ///
    /// # Panics
    /// Panics if `size` is not a multiple of the page size, is smaller than
    /// two pages, or does not fit in the 32-bit physical address space.
    #[must_use]
    pub fn new(size: usize) -> Self {
        assert!(size % PAGE_SIZE == 0, "Memory size must be page aligned");
        assert!(size >= 2 * PAGE_SIZE, "Not enough physical memory");
        assert!(u32::try_from(size - 1).is_ok(), "Too much physical memory");

        let mut pages = vec![Page::default(); size / PAGE_SIZE];
        pages[0].flags = PageFlags::ALLOCATED | PageFlags::KERNEL;

        Self {
            bytes: vec![0; size].into_boxed_slice(),
            free: pages.len() - 1,
            pages,
        }
    }

    /// The size of the physical memory in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    /// The number of frames in the physical memory.
    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.pages.len()
    }

    /// The number of frames that are currently free.
    #[must_use]
    pub const fn free_frames(&self) -> usize {
        self.free
    }

    /// Allocate a frame. Returns `None` if no frame is available, or a frame if a
    /// frame was successfully allocated.
    #[must_use]
    pub fn allocate_frame(&mut self, flags: AllocationFlags) -> Option<Physical> {
        self.allocate_range(1, flags)
    }

    /// Allocate a contiguous range of frames. Returns `None` if no contiguous
    /// range of frames is available. This does not mean that there are no free
    /// frames, but simply that there are no contiguous free frames (e.g. due to
    /// fragmentation).
    #[must_use]
    pub fn allocate_range(&mut self, count: usize, flags: AllocationFlags) -> Option<Physical> {
        if count == 0 || count > self.free {
            return None;
        }

        // Find the first range of contiguous free frames
        let start = self.pages.windows(count).position(|frames| {
            frames
                .iter()
                .all(|page| !page.flags.contains(PageFlags::ALLOCATED))
        })?;
        let base = Physical::from_frame_idx(start)?;

        let mut state = PageFlags::ALLOCATED;
        if flags.contains(AllocationFlags::KERNEL) {
            state |= PageFlags::KERNEL;
        }
        if flags.contains(AllocationFlags::PAGEABLE) {
            state |= PageFlags::PAGEABLE;
        }

        for page in &mut self.pages[start..start + count] {
            *page = Page {
                flags: state,
                ..Page::default()
            };
        }
        self.free -= count;

        if flags.contains(AllocationFlags::ZEROED) {
            self.zero(base, count * PAGE_SIZE);
        }
        Some(base)
    }

    /// Deallocate a frame
    ///
    /// # Panics
    /// Panics if the frame is not page-aligned, is not allocated, or is
    /// currently locked by a user copy.
    pub fn deallocate_frame(&mut self, frame: Physical) {
        self.deallocate_range(frame, 1);
    }

    /// Deallocate a contiguous range of frames starting at the given base address
    ///
    /// # Panics
    /// Panics if at least one of the following conditions is met:
    /// - The base address is not page-aligned
    /// - The range is not allocated (double free ?)
    /// - The range is outside of the physical memory (kernel bug ?)
    /// - A frame of the range is locked by a user copy
    pub fn deallocate_range(&mut self, base: Physical, count: usize) {
        let start = base.frame_idx();
        let end = start + count;

        assert!(base.is_page_aligned());
        assert!(start != 0, "Cannot free the reserved frame");
        assert!(end <= self.pages.len());

        for page in &mut self.pages[start..end] {
            assert!(
                page.flags.contains(PageFlags::ALLOCATED),
                "Frame already deallocated"
            );
            assert!(
                !page.flags.contains(PageFlags::LOCKED),
                "Frame released while in use"
            );
            *page = Page::default();
        }
        self.free += count;
    }

    /// Get the descriptor of the frame containing the given address.
    ///
    /// # Panics
    /// Panics if the address is outside of the physical memory.
    #[must_use]
    pub fn page(&self, addr: Physical) -> &Page {
        &self.pages[addr.frame_idx()]
    }

    /// Get the descriptor of the frame containing the given address.
    ///
    /// # Panics
    /// Panics if the address is outside of the physical memory.
    #[must_use]
    pub fn page_mut(&mut self, addr: Physical) -> &mut Page {
        &mut self.pages[addr.frame_idx()]
    }

    /// Lock a pageable frame so that it cannot be evicted or released while
    /// the kernel accesses it. Frames that are not pageable are left as they
    /// are. Return `true` if the frame was locked by this call.
    pub fn pin(&mut self, frame: Physical) -> bool {
        let page = self.page_mut(frame);
        if page.flags.contains(PageFlags::PAGEABLE) {
            page.flags.remove(PageFlags::PAGEABLE);
            page.flags.insert(PageFlags::LOCKED);
            true
        } else {
            false
        }
    }

    /// Undo a successful [`PhysicalMemory::pin`].
    pub fn unpin(&mut self, frame: Physical) {
        let page = self.page_mut(frame);
        if page.flags.contains(PageFlags::LOCKED) {
            page.flags.remove(PageFlags::LOCKED);
            page.flags.insert(PageFlags::PAGEABLE);
        }
    }

    /// Copy bytes starting at the given physical address into `dst`.
    ///
    /// # Panics
    /// Panics if the range is outside of the physical memory.
    pub fn read(&self, addr: Physical, dst: &mut [u8]) {
        let start = addr.as_usize();
        dst.copy_from_slice(&self.bytes[start..start + dst.len()]);
    }

    /// Copy `src` into memory starting at the given physical address.
    ///
    /// # Panics
    /// Panics if the range is outside of the physical memory.
    pub fn write(&mut self, addr: Physical, src: &[u8]) {
        let start = addr.as_usize();
        self.bytes[start..start + src.len()].copy_from_slice(src);
    }

    /// Fill `len` bytes starting at the given physical address with zeroes.
    ///
    /// # Panics
    /// Panics if the range is outside of the physical memory.
    pub fn zero(&mut self, addr: Physical, len: usize) {
        let start = addr.as_usize();
        self.bytes[start..start + len].fill(0);
    }

    /// Copy `len` bytes from `src` to `dst`. The ranges may overlap.
    ///
    /// # Panics
    /// Panics if one of the ranges is outside of the physical memory.
    pub fn copy(&mut self, src: Physical, dst: Physical, len: usize) {
        let start = src.as_usize();
        self.bytes.copy_within(start..start + len, dst.as_usize());
    }

    /// Read a little-endian 32-bit word.
    ///
    /// # Panics
    /// Panics if the word is outside of the physical memory.
    #[must_use]
    pub fn read_u32(&self, addr: Physical) -> u32 {
        let mut word = [0; 4];
        self.read(addr, &mut word);
        u32::from_le_bytes(word)
    }

    /// Write a little-endian 32-bit word.
    ///
    /// # Panics
    /// Panics if the word is outside of the physical memory.
    pub fn write_u32(&mut self, addr: Physical, value: u32) {
        self.write(addr, &value.to_le_bytes());
    }
}
