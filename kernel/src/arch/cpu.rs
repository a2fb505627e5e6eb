use super::segment::Selector;
use crate::mm::Physical;
use core::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, Ordering};

/// The different privilege levels of the CPU. Only kernel (ring 0) and user
/// (ring 3) privilege levels are used, like most operating systems do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Privilege {
    Kernel = 0,
    User = 3,
}

/// The register file of the simulated processor: the interrupt flag, the
/// local descriptor table register and the page directory base register.
/// All registers use atomics so that the CPU can be shared by reference with
/// every part of the kernel.
#[derive(Debug)]
pub struct Cpu {
    interrupts: AtomicBool,
    user_operation: AtomicBool,
    ldtr: AtomicU16,
    pdbr: AtomicU32,
}

impl Cpu {
    /// Create a processor in its reset state: interrupts enabled, no local
    /// descriptor table and paging disabled.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            interrupts: AtomicBool::new(true),
            user_operation: AtomicBool::new(false),
            ldtr: AtomicU16::new(0),
            pdbr: AtomicU32::new(0),
        }
    }

    /// Enable IRQs.
    pub fn enable_interrupts(&self) {
        self.interrupts.store(true, Ordering::SeqCst);
    }

    /// Disable IRQs.
    pub fn disable_interrupts(&self) {
        self.interrupts.store(false, Ordering::SeqCst);
    }

    /// Check if IRQs are enabled.
    #[must_use]
    pub fn interrupts_enabled(&self) -> bool {
        self.interrupts.load(Ordering::SeqCst)
    }

    /// Execute the given closure with IRQs disabled, returning the result of the
    /// closure. If IRQs were already disabled, they will remain disabled after the
    /// execution of the closure.
    pub fn without<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let were_enabled = self.interrupts.swap(false, Ordering::SeqCst);
        let ret = f();
        if were_enabled {
            self.enable_interrupts();
        }
        ret
    }

    /// Checks if the CPU is currently accessing user memory on behalf of a
    /// process.
    #[must_use]
    pub fn in_user_operation(&self) -> bool {
        self.user_operation.load(Ordering::Relaxed)
    }

    /// Executes the given function while signaling that the CPU is accessing
    /// user memory. Preemption is disabled during the execution of the closure.
    ///
    /// # Panics
    /// This function will panic if an user operation was already in progress.
    pub fn perform_user_operation<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        self.without(|| {
            let was_in_operation = self.user_operation.swap(true, Ordering::Relaxed);
            assert!(!was_in_operation, "Nested user operations are not supported");
            let ret = f();
            self.user_operation.store(false, Ordering::Relaxed);
            ret
        })
    }

    /// Load the local descriptor table register.
    pub fn load_ldt(&self, selector: Selector) {
        self.ldtr.store(selector.value(), Ordering::SeqCst);
    }

    /// The selector currently loaded in the local descriptor table register.
    #[must_use]
    pub fn ldt(&self) -> Selector {
        Selector::from_raw(self.ldtr.load(Ordering::SeqCst))
    }

    /// Load a page directory and enable paging.
    pub fn load_directory(&self, directory: Physical) {
        self.pdbr.store(directory.as_u32(), Ordering::SeqCst);
    }

    /// The page directory in use, or `None` if paging is disabled.
    #[must_use]
    pub fn directory(&self) -> Option<Physical> {
        match self.pdbr.load(Ordering::SeqCst) {
            0 => None,
            addr => Some(Physical::new(addr)),
        }
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}
