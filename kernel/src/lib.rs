//! Execore is the process execution core of a small teaching kernel for
//! 32-bit x86 machines. It loads ELF executables into isolated address
//! spaces, runs them as processes, lets them cross into the kernel through
//! system calls and terminates them when they fault.
//!
//! The hardware is simulated by [`arch::Machine`] so the whole kernel runs
//! and is tested as an ordinary library.
#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod arch;
pub mod argblock;
pub mod exe;
pub mod fs;
#[cfg(feature = "logging")]
pub mod logging;
pub mod mm;
pub mod process;
pub mod syscall;
pub mod thread;
pub mod trap;
pub mod user;
pub mod wait;

#[cfg(test)]
mod testing;

pub use arch::Machine;
pub use process::{Kernel, SpawnError, SwitchError, WaitError};
pub use thread::{Pid, State};
pub use trap::{FaultCode, Resume};
pub use user::{AddressSpace, DefaultSpace};
