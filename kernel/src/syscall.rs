//! System calls of user processes.
//!
//! Arguments are passed in registers as plain integers. Strings are passed
//! as a user pointer followed by a length, and are copied into the kernel
//! before being used. A system call that fails returns a negative
//! [`Errno`] code instead of its result.
use crate::{
    process::Kernel,
    trap::Resume,
    user::{AddressSpace, copy::FetchError},
};
use execore_syscall::{Errno, SyscallOp};
use log::{info, trace, warn};

impl From<FetchError> for Errno {
    fn from(error: FetchError) -> Self {
        match error {
            FetchError::TooLong => Errno::NameTooLong,
            FetchError::BadPointer | FetchError::InvalidUtf8 => Errno::Invalid,
        }
    }
}

impl<A: AddressSpace> Kernel<A> {
    /// Handle a system call made by the current process.
    #[allow(clippy::cast_possible_wrap)]
    #[allow(clippy::cast_possible_truncation)]
    pub async fn handle_syscall(&self, op: SyscallOp, args: [usize; 4]) -> Resume {
        trace!("Handling syscall {op:?}");
        let result = match op {
            SyscallOp::Null => Ok(0),
            SyscallOp::Exit => {
                let code = args[0] as i32;
                self.exit(code);
                return Resume::Terminate(code);
            }
            SyscallOp::PrintString => self.print_string(args[0], args[1]),
            SyscallOp::Spawn => self.spawn_from_user(args),
            SyscallOp::Wait => self
                .wait(args[0])
                .await
                .map(|code| code as isize)
                .map_err(Errno::from),
            SyscallOp::GetPid => self.current().map(|pid| pid as isize).ok_or(Errno::Unspecified),
            SyscallOp::GetKey | SyscallOp::SetAttr | SyscallOp::GetCursor | SyscallOp::PutCursor => {
                Err(Errno::Unsupported)
            }
            SyscallOp::Unknown => {
                warn!("Unknown syscall");
                Err(Errno::Unsupported)
            }
        };

        match result {
            Ok(value) => Resume::Return(value),
            Err(errno) => {
                trace!("Syscall {op:?} failed: {errno:?}");
                Resume::Return(isize::from(errno))
            }
        }
    }

    fn print_string(&self, buffer: usize, len: usize) -> Result<isize, Errno> {
        let string = self.fetch_string(buffer, len)?;
        info!(target: "user", "{string}");
        Ok(0)
    }

    #[allow(clippy::cast_possible_wrap)]
    fn spawn_from_user(&self, args: [usize; 4]) -> Result<isize, Errno> {
        let program = self.fetch_string(args[0], args[1])?;
        let command = self.fetch_string(args[2], args[3])?;
        let pid = self.spawn(&program, &command)?;
        Ok(pid as isize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        arch::Machine,
        mm::PAGE_SIZE,
        testing::{self, Program},
        thread::{Pid, State},
        user::flat::Flat,
    };
    use config::MAX_STRING_LEN;
    use futures::FutureExt;

    fn running() -> (Kernel<Flat>, Pid) {
        testing::logging();
        let kernel = Kernel::new(Machine::boot(128 * PAGE_SIZE), Program::new().files());
        let pid = kernel.spawn("/c/prog.exe", "/c/prog.exe").unwrap();
        kernel.switch_to(pid).unwrap();
        (kernel, pid)
    }

    fn call(kernel: &Kernel<Flat>, op: SyscallOp, args: [usize; 4]) -> Resume {
        kernel
            .handle_syscall(op, args)
            .now_or_never()
            .expect("syscall blocked")
    }

    #[test]
    fn simple_calls() {
        let (kernel, pid) = running();
        assert_eq!(call(&kernel, SyscallOp::Null, [0; 4]), Resume::Return(0));
        assert_eq!(
            call(&kernel, SyscallOp::GetPid, [0; 4]),
            Resume::Return(pid as isize)
        );
        assert_eq!(
            call(&kernel, SyscallOp::GetKey, [0; 4]),
            Resume::Return(Errno::Unsupported.code() as isize)
        );
        assert_eq!(
            call(&kernel, SyscallOp::from(1234), [0; 4]),
            Resume::Return(isize::from(Errno::Unsupported))
        );
    }

    #[test]
    fn print_string() {
        let (kernel, _) = running();
        assert!(kernel.copy_to_user(0x100, b"hello"));
        assert_eq!(
            call(&kernel, SyscallOp::PrintString, [0x100, 5, 0, 0]),
            Resume::Return(0)
        );
        assert_eq!(
            call(&kernel, SyscallOp::PrintString, [usize::MAX, 5, 0, 0]),
            Resume::Return(isize::from(Errno::Invalid))
        );
        assert_eq!(
            call(&kernel, SyscallOp::PrintString, [0x100, MAX_STRING_LEN + 1, 0, 0]),
            Resume::Return(isize::from(Errno::NameTooLong))
        );
    }

    #[test]
    fn spawn_and_wait() {
        let (kernel, parent) = running();
        assert!(kernel.copy_to_user(0x100, b"/c/prog.exe"));
        assert!(kernel.copy_to_user(0x200, b"/c/prog.exe child"));

        let Resume::Return(child) = call(&kernel, SyscallOp::Spawn, [0x100, 11, 0x200, 17]) else {
            panic!("spawn terminated the caller");
        };
        let child = usize::try_from(child).unwrap();
        assert_eq!(kernel.state(child), Some(State::Ready));

        assert_eq!(
            call(&kernel, SyscallOp::Spawn, [0x100, 4, 0x200, 17]),
            Resume::Return(isize::from(Errno::NotFound))
        );

        kernel.switch_to(child).unwrap();
        assert_eq!(call(&kernel, SyscallOp::Exit, [7, 0, 0, 0]), Resume::Terminate(7));

        kernel.switch_to(parent).unwrap();
        assert_eq!(call(&kernel, SyscallOp::Wait, [child, 0, 0, 0]), Resume::Return(7));
        assert_eq!(
            call(&kernel, SyscallOp::Wait, [child, 0, 0, 0]),
            Resume::Return(isize::from(Errno::NotFound))
        );
    }

    #[test]
    fn negative_exit_code() {
        let (kernel, pid) = running();
        assert_eq!(
            call(&kernel, SyscallOp::Exit, [(-5_isize) as usize, 0, 0, 0]),
            Resume::Terminate(-5)
        );
        assert_eq!(kernel.state(pid), Some(State::Exited(-5)));
    }
}
