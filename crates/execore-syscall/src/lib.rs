//! Execore Syscall Library. This crate provides the definitions shared by
//! the kernel and user programs: syscall numbers, error codes returned in
//! place of a result, and the layout of the argument block a new process
//! finds in its memory when it starts. Keeping them in a single crate avoids
//! subtle bugs when one side is updated without the other.
#![no_std]

pub mod args;
pub mod errno;

pub use errno::Errno;

/// Enumeration of supported syscall operations by the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SyscallOp {
    /// No operation syscall, used for testing purposes.
    Null = 0,

    /// Exit the current process with the given exit code.
    Exit = 1,

    /// Print a string to the console.
    PrintString = 2,

    /// Wait for a key press and return it.
    GetKey = 3,

    /// Set the current text attribute of the console.
    SetAttr = 4,

    /// Get the current cursor position.
    GetCursor = 5,

    /// Set the current cursor position.
    PutCursor = 6,

    /// Create a new process from an executable.
    Spawn = 7,

    /// Wait for a process to exit and return its exit code.
    Wait = 8,

    /// Get the process identifier of the caller.
    GetPid = 9,

    /// Used for representing an unknown or unsupported syscall operation. It
    /// cannot be used in actual syscalls.
    Unknown = u32::MAX,
}

impl From<usize> for SyscallOp {
    fn from(value: usize) -> Self {
        match u32::try_from(value).unwrap_or(u32::MAX) {
            0 => SyscallOp::Null,
            1 => SyscallOp::Exit,
            2 => SyscallOp::PrintString,
            3 => SyscallOp::GetKey,
            4 => SyscallOp::SetAttr,
            5 => SyscallOp::GetCursor,
            6 => SyscallOp::PutCursor,
            7 => SyscallOp::Spawn,
            8 => SyscallOp::Wait,
            9 => SyscallOp::GetPid,
            _ => SyscallOp::Unknown,
        }
    }
}
