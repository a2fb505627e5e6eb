//! Creation and termination of user processes.
//!
//! A process is a thread with a user context attached to it. [`Kernel`]
//! owns the machine, the file system executables are read from and the
//! thread table, and drives the life of processes: [`Kernel::spawn`] loads
//! an executable and creates its thread, [`Kernel::exit`] ends the current
//! process and [`Kernel::wait`] collects its exit code.
//!
//! Locks are always taken in the same order: the thread table, then the
//! physical memory, then the global descriptor table.
use crate::{
    arch::Machine,
    exe::{self, ParseError},
    fs::{FileSystem, ReadError},
    thread::{Pid, State, TableFull, ThreadTable},
    user::{AddressSpace, DefaultSpace, LoadError, Registers, UserContext},
};
use alloc::{boxed::Box, sync::Arc};
use execore_syscall::Errno;
use log::{info, warn};

/// Errors that can occur when spawning a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnError {
    /// The executable does not exist.
    NotFound,

    /// The file is not a valid executable.
    NoExec,

    /// The address space of the process could not be built.
    Unspecified,

    /// No thread is available for the process.
    NoMemory,
}

impl From<ReadError> for SpawnError {
    fn from(error: ReadError) -> Self {
        match error {
            ReadError::NotFound => SpawnError::NotFound,
        }
    }
}

impl From<ParseError> for SpawnError {
    fn from(_: ParseError) -> Self {
        SpawnError::NoExec
    }
}

impl From<LoadError> for SpawnError {
    fn from(_: LoadError) -> Self {
        SpawnError::Unspecified
    }
}

impl From<TableFull> for SpawnError {
    fn from(_: TableFull) -> Self {
        SpawnError::NoMemory
    }
}

impl From<SpawnError> for Errno {
    fn from(error: SpawnError) -> Self {
        match error {
            SpawnError::NotFound => Errno::NotFound,
            SpawnError::NoExec => Errno::NoExec,
            SpawnError::Unspecified => Errno::Unspecified,
            SpawnError::NoMemory => Errno::NoMemory,
        }
    }
}

/// Errors that can occur when waiting for a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    /// No process has this pid, or it was already reaped.
    NotFound,
}

impl From<WaitError> for Errno {
    fn from(error: WaitError) -> Self {
        match error {
            WaitError::NotFound => Errno::NotFound,
        }
    }
}

/// Errors that can occur when switching to a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchError {
    /// No process has this pid.
    NotFound,

    /// The process has already exited.
    Exited,
}

pub struct Kernel<A: AddressSpace = DefaultSpace> {
    machine: Arc<Machine>,
    files: Box<dyn FileSystem>,
    threads: spin::Mutex<ThreadTable<A>>,
}

impl<A: AddressSpace> Kernel<A> {
    /// Create a kernel running on `machine` and loading executables from
    /// `files`. No process exists yet.
    #[must_use]
    pub fn new(machine: Arc<Machine>, files: impl FileSystem + 'static) -> Self {
        info!("Processes use {} address spaces", A::NAME);
        Self {
            machine,
            files: Box::new(files),
            threads: spin::Mutex::new(ThreadTable::new(config::MAX_THREADS)),
        }
    }

    #[must_use]
    pub fn machine(&self) -> &Arc<Machine> {
        &self.machine
    }

    /// Load the executable at `program` and create a new process running it
    /// with the given command line. The process is ready but does not run
    /// until [`Kernel::switch_to`] is called with its pid.
    ///
    /// # Errors
    /// - [`SpawnError::NotFound`] if the executable does not exist.
    /// - [`SpawnError::NoExec`] if it is not a valid executable.
    /// - [`SpawnError::Unspecified`] if its address space cannot be built.
    /// - [`SpawnError::NoMemory`] if the thread table is full.
    pub fn spawn(&self, program: &str, command: &str) -> Result<Pid, SpawnError> {
        let image = self.files.read_fully(program).inspect_err(|_| {
            warn!("Cannot spawn {program}: file not found");
        })?;
        let format = exe::parse(&image)?;
        let space = A::build(&self.machine, &image, &format, command).inspect_err(|err| {
            warn!("Cannot spawn {program}: {err:?}");
        })?;
        drop(image);

        let context = UserContext::new(space);
        let cpu = self.machine.cpu();
        let pid = cpu.without(|| {
            let mut threads = self.threads.lock();
            let pid = threads.create()?;
            if let Some(thread) = threads.get_mut(pid) {
                thread.attach(cpu, context);
            }
            Ok::<_, SpawnError>(pid)
        })?;

        info!("Spawned process {pid}: {command}");
        Ok(pid)
    }

    /// Terminate the current process with the given exit code. Its user
    /// context is destroyed, and the tasks waiting for it are woken up.
    /// After this call there is no current thread anymore.
    ///
    /// # Panics
    /// Panics if there is no current thread.
    pub fn exit(&self, code: i32) {
        let cpu = self.machine.cpu();
        let mut threads = self.threads.lock();
        let Some(thread) = threads.current().and_then(|pid| threads.get_mut(pid)) else {
            panic!("Exit without a current thread");
        };

        thread.detach(cpu);
        thread.set_state(State::Exited(code));
        thread.exited().wake_all();
        info!("Process {} exited with code {code}", thread.pid());
        threads.set_current(None);
    }

    /// Wait until the process `pid` exits, remove it from the thread table
    /// and return its exit code.
    ///
    /// # Errors
    /// Returns [`WaitError::NotFound`] if there is no such process.
    pub async fn wait(&self, pid: Pid) -> Result<i32, WaitError> {
        loop {
            let queue = {
                let mut threads = self.threads.lock();
                let thread = threads.get(pid).ok_or(WaitError::NotFound)?;
                if let State::Exited(code) = thread.state() {
                    threads.remove(pid);
                    return Ok(code);
                }
                thread.exited().clone()
            };
            queue.wait().await;
        }
    }

    /// Make `pid` the current process and switch the processor to its
    /// address space. The previous process, if any, becomes ready.
    ///
    /// # Errors
    /// Returns [`SwitchError::NotFound`] if there is no such process, or
    /// [`SwitchError::Exited`] if it has already exited.
    pub fn switch_to(&self, pid: Pid) -> Result<(), SwitchError> {
        self.machine.cpu().without(|| {
            let mut threads = self.threads.lock();
            match threads.get(pid).map(|thread| thread.state()) {
                None => return Err(SwitchError::NotFound),
                Some(State::Exited(_)) => return Err(SwitchError::Exited),
                Some(_) => {}
            }

            if let Some(previous) = threads.current().and_then(|current| threads.get_mut(current)) {
                previous.set_state(State::Ready);
            }
            if let Some(thread) = threads.get_mut(pid) {
                thread.set_state(State::Running);
                if let Some(context) = thread.context() {
                    context.space().switch_to();
                }
            }
            threads.set_current(Some(pid));
            Ok(())
        })
    }

    /// The pid of the current process.
    #[must_use]
    pub fn current(&self) -> Option<Pid> {
        self.threads.lock().current()
    }

    /// The state of a process, or `None` if there is no such process.
    #[must_use]
    pub fn state(&self, pid: Pid) -> Option<State> {
        self.threads.lock().get(pid).map(|thread| thread.state())
    }

    /// The initial registers of a process that has a user context.
    #[must_use]
    pub fn registers(&self, pid: Pid) -> Option<Registers> {
        let threads = self.threads.lock();
        let context = threads.get(pid)?.context()?;
        Some(*context.space().registers())
    }

    /// The user context of the current process.
    pub(crate) fn current_context(&self) -> Option<Arc<UserContext<A>>> {
        let threads = self.threads.lock();
        let pid = threads.current()?;
        threads.get(pid)?.context().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        mm::PAGE_SIZE,
        testing::{self, ImageBuilder, Program},
        user::{flat::Flat, paged::Paged},
    };
    use alloc::vec;
    use core::pin::pin;
    use futures::FutureExt;

    fn kernel<A: AddressSpace>(memory: usize) -> Kernel<A> {
        testing::logging();
        let mut files = Program::new().files();
        files.insert("/c/empty.exe", vec![]);
        files.insert("/c/script.exe", b"#!/bin/sh\n".to_vec());
        files.insert(
            "/c/broken.exe",
            ImageBuilder::new(0x1000)
                .header(&exe::Segment {
                    offset: 0x10_0000,
                    length: 16,
                    address: 0x1000,
                    size: 16,
                    ..exe::Segment::default()
                })
                .build(),
        );
        Kernel::new(Machine::boot(memory), files)
    }

    #[test]
    fn spawn_errors() {
        let kernel = kernel::<Flat>(64 * PAGE_SIZE);
        assert_eq!(kernel.spawn("/c/none.exe", "none"), Err(SpawnError::NotFound));
        assert_eq!(kernel.spawn("/c/empty.exe", "empty"), Err(SpawnError::NoExec));
        assert_eq!(kernel.spawn("/c/script.exe", "script"), Err(SpawnError::NoExec));
        assert_eq!(kernel.spawn("/c/broken.exe", "broken"), Err(SpawnError::Unspecified));
        assert_eq!(Errno::from(SpawnError::NoExec), Errno::NoExec);
    }

    #[test]
    fn spawn_out_of_memory() {
        let kernel = kernel::<Flat>(8 * PAGE_SIZE);
        assert_eq!(kernel.spawn("/c/prog.exe", "prog"), Err(SpawnError::Unspecified));
    }

    #[test]
    fn spawned_process_is_ready() {
        let kernel = kernel::<Flat>(64 * PAGE_SIZE);
        let pid = kernel.spawn("/c/prog.exe", "/c/prog.exe").unwrap();
        assert_eq!(kernel.state(pid), Some(State::Ready));
        assert_eq!(kernel.current(), None);
        assert_eq!(
            kernel.registers(pid).map(|r| r.entry),
            Some(Program::ENTRY as usize)
        );

        kernel.switch_to(pid).unwrap();
        assert_eq!(kernel.state(pid), Some(State::Running));
        assert_eq!(kernel.current(), Some(pid));
        assert_eq!(kernel.switch_to(pid + 1), Err(SwitchError::NotFound));
    }

    #[test]
    fn switching_between_processes() {
        let kernel = kernel::<Paged>(256 * PAGE_SIZE);
        let first = kernel.spawn("/c/prog.exe", "first").unwrap();
        let second = kernel.spawn("/c/prog.exe", "second").unwrap();

        kernel.switch_to(first).unwrap();
        kernel.switch_to(second).unwrap();
        assert_eq!(kernel.state(first), Some(State::Ready));
        assert_eq!(kernel.state(second), Some(State::Running));
        assert_eq!(
            kernel.machine().cpu().ldt(),
            kernel.registers(second).unwrap().ldt
        );

        kernel.exit(3);
        assert_eq!(kernel.switch_to(second), Err(SwitchError::Exited));
    }

    #[test]
    fn wait_for_exit() {
        let kernel = kernel::<Flat>(64 * PAGE_SIZE);
        let pid = kernel.spawn("/c/prog.exe", "prog").unwrap();

        let mut wait = pin!(kernel.wait(pid));
        assert!(wait.as_mut().now_or_never().is_none());

        kernel.switch_to(pid).unwrap();
        kernel.exit(42);
        assert_eq!(kernel.state(pid), Some(State::Exited(42)));
        assert_eq!(wait.now_or_never(), Some(Ok(42)));

        // The process has been reaped
        assert_eq!(kernel.state(pid), None);
        assert_eq!(kernel.wait(pid).now_or_never(), Some(Err(WaitError::NotFound)));
    }

    fn resources_are_released<A: AddressSpace>(memory: usize) {
        let kernel = kernel::<A>(memory);
        let machine = Arc::clone(kernel.machine());
        if A::NAME == "paged" {
            machine.enable_paging().unwrap();
        }
        let free = machine.memory().lock().free_frames();
        let used = machine.gdt().lock().used();

        let pid = kernel.spawn("/c/prog.exe", "/c/prog.exe a b").unwrap();
        kernel.switch_to(pid).unwrap();
        assert!(machine.memory().lock().free_frames() < free);
        assert_eq!(machine.gdt().lock().used(), used + 1);

        kernel.exit(0);
        assert_eq!(kernel.wait(pid).now_or_never(), Some(Ok(0)));
        assert_eq!(machine.memory().lock().free_frames(), free);
        assert_eq!(machine.gdt().lock().used(), used);
    }

    #[test]
    fn flat_resources_are_released() {
        resources_are_released::<Flat>(64 * PAGE_SIZE);
    }

    #[test]
    fn paged_resources_are_released() {
        resources_are_released::<Paged>(256 * PAGE_SIZE);
    }

    #[test]
    #[should_panic(expected = "without a current thread")]
    fn exit_without_process() {
        let kernel = kernel::<Flat>(64 * PAGE_SIZE);
        kernel.exit(0);
    }
}
