//! Address spaces made of one contiguous block of physical memory.
//!
//! The block starts with the segments of the program, followed by the
//! argument block, and ends with the stack. The code and data segments of
//! the process both start at the beginning of the block and cover exactly
//! its size, so user addresses are offsets in the block.
use super::{AddressSpace, Layout, LoadError, Registers, image_end, segment_bytes};
use crate::{
    arch::{
        Machine,
        segment::{LocalTable, Selector},
    },
    argblock::Arguments,
    exe::ExecutableFormat,
    mm::{AllocationFlags, Align, Physical},
};
use alloc::{sync::Arc, vec};
use config::DEFAULT_USER_STACK_SIZE;
use log::trace;

pub struct Flat {
    machine: Arc<Machine>,
    block: Physical,
    layout: Layout,
    registers: Registers,
    ldt: LocalTable,
}

impl Flat {
    /// Physical address of the start of the block.
    #[must_use]
    pub const fn block(&self) -> Physical {
        self.block
    }

    /// Size of the block in bytes.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.layout.limit
    }
}

impl AddressSpace for Flat {
    const NAME: &'static str = "flat";

    fn layout(
        image: &[u8],
        format: &ExecutableFormat,
        args: &Arguments,
    ) -> Result<Layout, LoadError> {
        let image_end = image_end(image, format)?
            .checked_page_align_up()
            .ok_or(LoadError::TooLarge)?;
        let size = (DEFAULT_USER_STACK_SIZE + args.size())
            .checked_page_align_up()
            .and_then(|tail| image_end.checked_add(tail))
            .filter(|&size| u32::try_from(size).is_ok())
            .ok_or(LoadError::TooLarge)?;

        Ok(Layout {
            image_end,
            arguments: image_end,
            stack_top: size,
            limit: size,
        })
    }

    fn create(machine: &Arc<Machine>, layout: Layout) -> Result<Self, LoadError> {
        let pages = layout.limit.page_count_up();
        let block = machine
            .memory()
            .lock()
            .allocate_range(pages, AllocationFlags::ZEROED)
            .ok_or(LoadError::OutOfMemory)?;

        let ldt = match LocalTable::install(machine, block.as_u32(), pages) {
            Ok(ldt) => ldt,
            Err(err) => {
                machine.memory().lock().deallocate_range(block, pages);
                return Err(err.into());
            }
        };

        trace!(
            "Flat block {:#x} ({} pages), LDT {:?}",
            block.as_u32(),
            pages,
            ldt.selector()
        );
        Ok(Self {
            machine: Arc::clone(machine),
            block,
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
        let mut memory = self.machine.memory().lock();
        for segment in format.segments() {
            let bytes = segment_bytes(segment, image)?;
            if segment.end().is_none_or(|end| end > self.layout.image_end) {
                return Err(LoadError::TooLarge);
            }
            memory.write(self.block + segment.address, bytes);
        }

        let base = u32::try_from(self.layout.arguments).map_err(|_| LoadError::TooLarge)?;
        let mut block = vec![0; args.size()];
        args.format(&mut block, base);
        memory.write(self.block + self.layout.arguments, &block);

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
        if !self.validate(addr, dst.len()) {
            return false;
        }
        self.machine.memory().lock().read(self.block + addr, dst);
        true
    }

    fn write(&self, addr: usize, src: &[u8]) -> bool {
        if !self.validate(addr, src.len()) {
            return false;
        }
        self.machine.memory().lock().write(self.block + addr, src);
        true
    }

    fn switch_to(&self) {
        self.machine.cpu().load_ldt(self.ldt.selector());
    }
}

impl Drop for Flat {
    fn drop(&mut self) {
        let cpu = self.machine.cpu();
        if cpu.ldt() == self.ldt.selector() {
            cpu.load_ldt(Selector::NULL);
        }
        self.machine
            .memory()
            .lock()
            .deallocate_range(self.block, self.layout.limit.page_count_up());
    }
}
