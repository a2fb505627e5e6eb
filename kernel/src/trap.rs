//! Handling of page faults raised by the processor.
//!
//! There is no demand paging: every page a process may touch is mapped when
//! it is loaded. A fault from user mode is therefore a bug in the process,
//! which is terminated. A fault from supervisor mode is a bug in the kernel
//! and halts the system.
use crate::{process::Kernel, user::AddressSpace};
use bitflags::bitflags;
use config::FAULT_EXIT_CODE;
use log::error;

/// What to do with the interrupted thread once a trap has been handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resume {
    /// Return to the thread, with the given value as the result of the
    /// system call.
    Return(isize),

    /// The thread has exited with the given code and must not be resumed.
    Terminate(i32),
}

bitflags! {
    /// The error code pushed by the processor on a page fault.
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FaultCode: u32 {
        /// The access violated the protection of a present page. Without
        /// this flag, the page was not present.
        const PROTECTION = 1 << 0;

        /// The access was a write. Without this flag, it was a read.
        const WRITE = 1 << 1;

        /// The access came from user mode. Without this flag, it came from
        /// supervisor mode.
        const USER = 1 << 2;
    }
}

impl<A: AddressSpace> Kernel<A> {
    /// Entry point of the page fault trap.
    pub fn page_fault(&self, address: u32, code: FaultCode) -> Resume {
        self.machine()
            .cpu()
            .without(|| self.handle_page_fault(address, code))
    }

    /// Report a page fault and terminate the faulting process.
    ///
    /// # Panics
    /// Panics if preemption is enabled, or if the fault happened in
    /// supervisor mode.
    pub fn handle_page_fault(&self, address: u32, code: FaultCode) -> Resume {
        assert!(
            !self.machine().cpu().interrupts_enabled(),
            "Page fault handled with preemption enabled"
        );

        let cause = if code.contains(FaultCode::PROTECTION) {
            "protection violation"
        } else {
            "page not present"
        };
        let access = if code.contains(FaultCode::WRITE) {
            "write"
        } else {
            "read"
        };
        let mode = if code.contains(FaultCode::USER) {
            "user"
        } else {
            "supervisor"
        };
        let free = self.machine().memory().lock().free_frames();
        error!(
            "Page fault in process {:?} at {address:#010x}: {cause} on {access} in {mode} mode ({free} free frames)",
            self.current(),
        );

        assert!(
            code.contains(FaultCode::USER),
            "Unexpected page fault in supervisor mode at {address:#010x}"
        );
        self.exit(FAULT_EXIT_CODE);
        Resume::Terminate(FAULT_EXIT_CODE)
    }
}
