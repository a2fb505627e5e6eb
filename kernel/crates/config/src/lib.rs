#![no_std]

/// The maximum number of threads that can exist at the same time, including
/// dead threads that have not yet been waited for. Spawning a process when
/// the thread table is full fails with a "no memory" error.
///
/// This is plenty for the teaching workloads this kernel runs, where a shell
/// spawns a handful of programs and waits for them.
pub const MAX_THREADS: usize = 32;

/// The maximum number of segments an executable may describe in its program
/// header table. Executables with more program headers are rejected before
/// the table is even read.
///
/// Three is enough for the usual text, data and bss layout produced by the
/// user toolchain.
pub const MAX_SEGMENTS: usize = 3;

/// The size of the stack given to every user process. This should be a
/// multiple of the page size, which is 4096 bytes on the simulated machine.
pub const DEFAULT_USER_STACK_SIZE: usize = 8192;

/// The linear address where the user window of a paged address space starts.
/// Everything below belongs to the kernel and is shared by every process,
/// everything above belongs to the process. User addresses are offsets from
/// this base: the user segment descriptors start here.
pub const USER_VM_START: usize = 0x8000_0000;

/// The size of the user window of a paged address space. The window ends
/// at the very top of the 32-bit linear address space.
pub const USER_VM_SIZE: usize = 0x8000_0000;

/// Extra bytes mapped after the highest segment of a paged process. This
/// leaves some room for the program to grow its data without immediately
/// faulting on the next page.
pub const PAGED_IMAGE_SLACK: usize = 0x2000;

/// The number of entries in the global descriptor table. Each process uses
/// one entry for its local descriptor table, and the first entries are
/// reserved for the null descriptor and the kernel segments, so this also
/// bounds the number of processes that can have an address space at the
/// same time.
pub const GDT_ENTRIES: usize = 16;

/// The exit code given to a process that was killed because it accessed
/// memory it is not allowed to.
pub const FAULT_EXIT_CODE: i32 = -1;

/// The maximum length of a string passed to a system call, such as the path
/// of a program or a command line. Longer strings are rejected without
/// being copied.
pub const MAX_STRING_LEN: usize = 1023;
