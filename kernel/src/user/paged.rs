//! Address spaces backed by a page directory of their own.
//!
//! Every process directory starts as a copy of the kernel template, so the
//! kernel stays mapped below [`USER_VM_START`]. The process itself lives in
//! the window `[USER_VM_START, USER_VM_START + USER_VM_SIZE)`, and its code
//! and data segments both start at [`USER_VM_START`]: the user address `u`
//! is the linear address `USER_VM_START + u`.
//!
//! The segments are mapped from the bottom of the window, followed by a few
//! pages of slack. The argument block occupies the last pages of the window
//! and the stack sits right below it.
use super::{AddressSpace, Layout, LoadError, Registers, image_end, segment_bytes};
use crate::{
    arch::{
        Machine,
        segment::{LocalTable, Selector},
    },
    argblock::Arguments,
    exe::ExecutableFormat,
    mm::{
        Align, PAGE_SIZE, Physical, PhysicalMemory, Virtual,
        paging::{self, EntryFlags},
    },
};
use alloc::{sync::Arc, vec, vec::Vec};
use config::{DEFAULT_USER_STACK_SIZE, PAGED_IMAGE_SLACK, USER_VM_SIZE, USER_VM_START};
use core::ops::Range;
use log::trace;

/// Flags of every user page and of the page tables holding them.
const USER_PAGE: EntryFlags = EntryFlags::WRITABLE.union(EntryFlags::USER);

pub struct Paged {
    machine: Arc<Machine>,
    directory: Physical,
    layout: Layout,
    registers: Registers,
    ldt: LocalTable,
}

impl Paged {
    /// The page directory of the process.
    #[must_use]
    pub const fn directory(&self) -> Physical {
        self.directory
    }

    /// Map fresh pages over the user range `[start, start + len)` and fill
    /// them with `bytes`, padded with zeroes.
    fn map(
        &self,
        memory: &mut PhysicalMemory,
        start: usize,
        len: usize,
        bytes: &[u8],
    ) -> Result<(), LoadError> {
        for offset in (0..len).step_by(PAGE_SIZE) {
            let linear = linear(start + offset).ok_or(LoadError::TooLarge)?;
            let frame = paging::map_page(memory, self.directory, linear, USER_PAGE)?;
            if let Some(chunk) = bytes.get(offset..) {
                memory.write(frame, &chunk[..chunk.len().min(PAGE_SIZE)]);
            }
        }
        Ok(())
    }

    /// Split the user range `[addr, addr + len)` into pieces that do not
    /// cross a page boundary, each with the frame it lives in and its offset
    /// in that frame. Return `None` if a page of the range is not mapped.
    fn pieces(&self, memory: &PhysicalMemory, addr: usize, len: usize) -> Option<Vec<Piece>> {
        let mut pieces = Vec::new();
        let mut done = 0;
        while done < len {
            let linear = linear(addr + done)?;
            let count = (PAGE_SIZE - linear.page_offset()).min(len - done);
            let entry = paging::lookup(memory, self.directory, linear)?;
            if !entry.is_present() {
                return None;
            }
            pieces.push(Piece {
                frame: entry.frame(),
                offset: linear.page_offset(),
                range: done..done + count,
            });
            done += count;
        }
        Some(pieces)
    }

    /// Run `f` on each piece of the user range, with the frames pinned for
    /// the duration of the copy. Nothing is copied if a page is missing.
    fn access<F>(&self, addr: usize, len: usize, mut f: F) -> bool
    where
        F: FnMut(&mut PhysicalMemory, Physical, Range<usize>),
    {
        if !self.validate(addr, len) {
            return false;
        }

        let mut memory = self.machine.memory().lock();
        let Some(pieces) = self.pieces(&memory, addr, len) else {
            return false;
        };

        let pinned: Vec<Physical> = pieces
            .iter()
            .map(|piece| piece.frame)
            .filter(|&frame| memory.pin(frame))
            .collect();
        for piece in pieces {
            f(&mut memory, piece.frame + piece.offset, piece.range);
        }
        for frame in pinned {
            memory.unpin(frame);
        }
        true
    }
}

/// Part of a user range contained in a single page.
struct Piece {
    frame: Physical,
    offset: usize,
    range: Range<usize>,
}

/// The linear address of a user address.
fn linear(user: usize) -> Option<Virtual> {
    Virtual::from_usize(USER_VM_START.checked_add(user)?)
}

impl AddressSpace for Paged {
    const NAME: &'static str = "paged";

    fn layout(
        image: &[u8],
        format: &ExecutableFormat,
        args: &Arguments,
    ) -> Result<Layout, LoadError> {
        let image_end = image_end(image, format)?
            .checked_page_align_up()
            .and_then(|end| end.checked_add(PAGED_IMAGE_SLACK))
            .ok_or(LoadError::TooLarge)?;
        let arguments = args
            .size()
            .checked_page_align_up()
            .and_then(|size| USER_VM_SIZE.checked_sub(size))
            .ok_or(LoadError::TooLarge)?;
        let stack_bottom = arguments
            .checked_sub(DEFAULT_USER_STACK_SIZE)
            .ok_or(LoadError::TooLarge)?;
        if image_end > stack_bottom {
            return Err(LoadError::TooLarge);
        }

        Ok(Layout {
            image_end,
            arguments,
            stack_top: arguments,
            limit: USER_VM_SIZE,
        })
    }

    fn create(machine: &Arc<Machine>, layout: Layout) -> Result<Self, LoadError> {
        let template = machine.enable_paging()?;
        let directory = template.instantiate(&mut machine.memory().lock())?;

        let first = linear(0).ok_or(LoadError::TooLarge)?;
        let ldt = match LocalTable::install(machine, first.as_u32(), USER_VM_SIZE.page_count_up()) {
            Ok(ldt) => ldt,
            Err(err) => {
                paging::release(&mut machine.memory().lock(), directory, first);
                return Err(err.into());
            }
        };

        trace!(
            "Page directory {:#x}, LDT {:?}",
            directory.as_u32(),
            ldt.selector()
        );
        Ok(Self {
            machine: Arc::clone(machine),
            directory,
            layout,
            registers: Registers {
                entry: 0,
                arguments: layout.arguments,
                stack_pointer: layout.stack_top,
                code: LocalTable::CODE,
                data: LocalTable::DATA,
                ldt: ldt.selector(),
            },
            ldt,
        })
    }

    fn load(
        &mut self,
        image: &[u8],
        format: &ExecutableFormat,
        args: &Arguments,
    ) -> Result<(), LoadError> {
        // Segments may share a page, so assemble them before mapping
        let mut staging = vec![0; self.layout.image_end];
        for segment in format.segments() {
            let bytes = segment_bytes(segment, image)?;
            let target = staging
                .get_mut(segment.address..segment.address + bytes.len())
                .ok_or(LoadError::TooLarge)?;
            target.copy_from_slice(bytes);
        }

        let base = u32::try_from(self.layout.arguments).map_err(|_| LoadError::TooLarge)?;
        let mut block = vec![0; args.size()];
        args.format(&mut block, base);

        let mut memory = self.machine.memory().lock();
        self.map(&mut memory, 0, self.layout.image_end, &staging)?;
        let stack = self.layout.stack_top - DEFAULT_USER_STACK_SIZE;
        self.map(&mut memory, stack, DEFAULT_USER_STACK_SIZE, &[])?;
        self.map(&mut memory, self.layout.arguments, block.len().page_align_up(), &block)?;

        self.registers.entry = format.entry();
        Ok(())
    }

    fn registers(&self) -> &Registers {
        &self.registers
    }

    fn limit(&self) -> usize {
        self.layout.limit
    }

    fn read(&self, addr: usize, dst: &mut [u8]) -> bool {
        self.access(addr, dst.len(), |memory, physical, range| {
            memory.read(physical, &mut dst[range]);
        })
    }

    fn write(&self, addr: usize, src: &[u8]) -> bool {
        self.access(addr, src.len(), |memory, physical, range| {
            memory.write(physical, &src[range]);
        })
    }

    fn switch_to(&self) {
        let cpu = self.machine.cpu();
        cpu.load_ldt(self.ldt.selector());
        cpu.load_directory(self.directory);
    }
}

impl Drop for Paged {
    fn drop(&mut self) {
        let cpu = self.machine.cpu();
        if cpu.ldt() == self.ldt.selector() {
            cpu.load_ldt(Selector::NULL);
        }
        if cpu.directory() == Some(self.directory) {
            if let Some(template) = self.machine.kernel_template() {
                cpu.load_directory(template.directory());
            }
        }

        let mut memory = self.machine.memory().lock();
        if let Some(first) = linear(0) {
            paging::release(&mut memory, self.directory, first);
        }
    }
}
