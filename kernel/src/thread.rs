//! Threads running user processes, and the table holding them.
use crate::{
    arch::cpu::Cpu,
    user::{AddressSpace, UserContext},
    wait,
};
use alloc::sync::Arc;
use hashbrown::HashMap;

/// Identifier of a thread, never reused while the kernel runs.
pub type Pid = usize;

/// The state of a thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    /// The thread is waiting to be switched to.
    Ready,

    /// The thread is the current thread.
    Running,

    /// The thread has exited with the given code, but has not been reaped
    /// by [`crate::process::Kernel::wait`] yet.
    Exited(i32),
}

pub struct Thread<A> {
    pid: Pid,
    state: State,
    context: Option<Arc<UserContext<A>>>,
    exited: wait::Queue,
}

impl<A: AddressSpace> Thread<A> {
    #[must_use]
    pub fn new(pid: Pid) -> Self {
        Self {
            pid,
            state: State::Ready,
            context: None,
            exited: wait::Queue::new(),
        }
    }

    #[must_use]
    pub const fn pid(&self) -> Pid {
        self.pid
    }

    #[must_use]
    pub const fn state(&self) -> State {
        self.state
    }

    pub fn set_state(&mut self, state: State) {
        self.state = state;
    }

    /// The user context attached to the thread, if any.
    #[must_use]
    pub fn context(&self) -> Option<&Arc<UserContext<A>>> {
        self.context.as_ref()
    }

    /// The queue of the tasks waiting for this thread to exit.
    #[must_use]
    pub const fn exited(&self) -> &wait::Queue {
        &self.exited
    }

    /// Bind a user context to the thread and make the thread one of its
    /// owners. Preemption is disabled while the owner count changes.
    ///
    /// # Panics
    /// Panics if the thread already has a context, or if the context is
    /// already owned by another thread.
    pub fn attach(&mut self, cpu: &Cpu, context: Arc<UserContext<A>>) {
        assert!(self.context.is_none(), "Thread already has a user context");
        cpu.without(|| context.acquire());
        self.context = Some(context);
    }

    /// Unbind the user context of the thread, if any. The context is
    /// destroyed here if this thread was its last owner.
    pub fn detach(&mut self, cpu: &Cpu) {
        if let Some(context) = self.context.take() {
            let last = cpu.without(|| context.release());
            if last {
                log::trace!("Destroying user context of thread {}", self.pid);
            }
            drop(context);
        }
    }
}

/// Errors that can occur when adding a thread to the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableFull;

/// All the threads of the kernel, including exited threads that were not
/// reaped yet.
pub struct ThreadTable<A> {
    threads: HashMap<Pid, Thread<A>>,
    current: Option<Pid>,
    next_pid: Pid,
    capacity: usize,
}

impl<A: AddressSpace> ThreadTable<A> {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            threads: HashMap::new(),
            current: None,
            next_pid: 1,
            capacity,
        }
    }

    /// Create a new thread in the ready state and return its pid.
    ///
    /// # Errors
    /// Returns [`TableFull`] if the table already holds as many threads as
    /// its capacity.
    pub fn create(&mut self) -> Result<Pid, TableFull> {
        if self.threads.len() >= self.capacity {
            return Err(TableFull);
        }
        let pid = self.next_pid;
        self.next_pid += 1;
        self.threads.insert(pid, Thread::new(pid));
        Ok(pid)
    }

    /// Remove a thread from the table.
    pub fn remove(&mut self, pid: Pid) -> Option<Thread<A>> {
        if self.current == Some(pid) {
            self.current = None;
        }
        self.threads.remove(&pid)
    }

    #[must_use]
    pub fn get(&self, pid: Pid) -> Option<&Thread<A>> {
        self.threads.get(&pid)
    }

    #[must_use]
    pub fn get_mut(&mut self, pid: Pid) -> Option<&mut Thread<A>> {
        self.threads.get_mut(&pid)
    }

    /// The pid of the current thread.
    #[must_use]
    pub const fn current(&self) -> Option<Pid> {
        self.current
    }

    pub fn set_current(&mut self, pid: Option<Pid>) {
        self.current = pid;
    }

    /// The number of threads in the table.
    #[must_use]
    pub fn len(&self) -> usize {
        self.threads.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }
}
