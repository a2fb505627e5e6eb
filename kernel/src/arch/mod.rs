//! The simulated 32-bit machine the kernel runs on: a processor, physical
//! memory and the global descriptor table. Everything the rest of the kernel
//! needs from the hardware goes through [`Machine`].
pub mod cpu;
pub mod segment;

use crate::mm::{
    Physical, PhysicalMemory, Virtual,
    paging::{self, KernelTemplate, MapError},
};
use alloc::sync::Arc;
use cpu::Cpu;
use log::debug;
use segment::{Descriptor, DescriptorTable, Kind, Selector, Table};
use usize_cast::IntoUsize;

pub struct Machine {
    cpu: Cpu,
    memory: spin::Mutex<PhysicalMemory>,
    gdt: spin::Mutex<DescriptorTable>,
    kernel: spin::Once<KernelTemplate>,
}

impl Machine {
    /// Power on a machine with `memory_size` bytes of physical memory.
    /// Paging is disabled until [`Machine::enable_paging`] is called.
    ///
    /// # Panics
    /// Panics if the memory size is not a multiple of the page size or does
    /// not fit in the 32-bit physical address space.
    #[must_use]
    pub fn boot(memory_size: usize) -> Arc<Self> {
        debug!("Booting with {} KiB of memory", memory_size / 1024);
        Arc::new(Self {
            cpu: Cpu::new(),
            memory: spin::Mutex::new(PhysicalMemory::new(memory_size)),
            gdt: spin::Mutex::new(DescriptorTable::new()),
            kernel: spin::Once::new(),
        })
    }

    #[must_use]
    pub const fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    #[must_use]
    pub const fn memory(&self) -> &spin::Mutex<PhysicalMemory> {
        &self.memory
    }

    #[must_use]
    pub const fn gdt(&self) -> &spin::Mutex<DescriptorTable> {
        &self.gdt
    }

    /// Build the kernel identity mapping and load it, if not already done.
    /// Return the kernel template cloned into every process directory.
    ///
    /// # Errors
    /// Returns [`MapError::OutOfMemory`] if there is not enough memory for
    /// the kernel page tables.
    pub fn enable_paging(&self) -> Result<&KernelTemplate, MapError> {
        let template = self
            .kernel
            .try_call_once(|| KernelTemplate::build(&mut self.memory.lock()))?;
        if self.cpu.directory().is_none() {
            self.cpu.load_directory(template.directory());
        }
        Ok(template)
    }

    /// The kernel template, if paging has been enabled.
    #[must_use]
    pub fn kernel_template(&self) -> Option<&KernelTemplate> {
        self.kernel.get()
    }

    /// Fetch the descriptor referenced by a selector, looking into the local
    /// descriptor table currently loaded if needed.
    #[must_use]
    pub fn descriptor(&self, selector: Selector) -> Option<Descriptor> {
        match selector.table() {
            Table::Global => self.gdt.lock().get(selector.index()),
            Table::Local => {
                let ldt = self.gdt.lock().get(self.cpu.ldt().index())?;
                if ldt.kind() != Some(Kind::LocalTable) {
                    return None;
                }
                let offset = selector.index() * Descriptor::SIZE;
                if offset + Descriptor::SIZE > ldt.size() {
                    return None;
                }

                let mut raw = [0; 8];
                let base = Physical::new(ldt.base()) + offset;
                self.memory.lock().read(base, &mut raw);
                Some(Descriptor::from_raw(u64::from_le_bytes(raw)))
            }
        }
    }

    /// Translate a logical address the way the processor does: through the
    /// segment referenced by `selector` and then through the page directory
    /// if paging is enabled. Return `None` where the processor would raise a
    /// fault.
    #[must_use]
    pub fn resolve(&self, selector: Selector, offset: usize) -> Option<Physical> {
        let segment = self.descriptor(selector).filter(|d| d.is_present())?;
        if offset >= segment.size() {
            return None;
        }

        let linear = Virtual::from_usize(segment.base().into_usize() + offset)?;
        match self.cpu.directory() {
            Some(directory) => paging::translate(&self.memory.lock(), directory, linear),
            None => Some(Physical::new(linear.as_u32())),
        }
    }
}
