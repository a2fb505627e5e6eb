//! Copies between kernel buffers and the memory of the current process.
//!
//! Every copy is checked against the address space of the current process
//! and is all or nothing: if any byte of the user range is not accessible,
//! the copy fails and no byte is copied. Copies run with preemption
//! disabled and are flagged as user operations on the processor.
use super::AddressSpace;
use crate::process::Kernel;
use alloc::{string::String, vec};
use config::MAX_STRING_LEN;
use zerocopy::{FromBytes, Immutable, IntoBytes};

/// Errors that can occur when fetching a string from user memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchError {
    /// The string is not entirely inside the memory of the process, or
    /// there is no current process.
    BadPointer,

    /// The string is longer than [`MAX_STRING_LEN`] bytes.
    TooLong,

    /// The string is not valid UTF-8.
    InvalidUtf8,
}

impl<A: AddressSpace> Kernel<A> {
    /// Run `f` on the address space of the current process as a user
    /// operation. Return `false` if there is no current process.
    fn user_operation<F>(&self, f: F) -> bool
    where
        F: FnOnce(&A) -> bool,
    {
        let Some(context) = self.current_context() else {
            return false;
        };
        self.machine()
            .cpu()
            .perform_user_operation(|| f(context.space()))
    }

    /// Copy `dst.len()` bytes from the user address `src` into `dst`.
    /// Return `false` without modifying `dst` if the range is not
    /// accessible or if there is no current process.
    pub fn copy_from_user(&self, dst: &mut [u8], src: usize) -> bool {
        self.user_operation(|space| space.read(src, dst))
    }

    /// Copy `src` to the user address `dst`. Return `false` without
    /// modifying user memory if the range is not accessible or if there is
    /// no current process.
    pub fn copy_to_user(&self, dst: usize, src: &[u8]) -> bool {
        self.user_operation(|space| space.write(dst, src))
    }

    /// Read a value from user memory.
    #[must_use]
    pub fn read_user<T: FromBytes + IntoBytes>(&self, src: usize) -> Option<T> {
        let mut value = T::new_zeroed();
        self.copy_from_user(value.as_mut_bytes(), src)
            .then_some(value)
    }

    /// Write a value to user memory.
    pub fn write_user<T: IntoBytes + Immutable>(&self, dst: usize, value: &T) -> bool {
        self.copy_to_user(dst, value.as_bytes())
    }

    /// Copy a string of `len` bytes at the user address `src` into the
    /// kernel.
    ///
    /// # Errors
    /// See [`FetchError`]. The length is checked before anything is copied.
    pub fn fetch_string(&self, src: usize, len: usize) -> Result<String, FetchError> {
        if len > MAX_STRING_LEN {
            return Err(FetchError::TooLong);
        }

        let mut bytes = vec![0; len];
        if !self.copy_from_user(&mut bytes, src) {
            return Err(FetchError::BadPointer);
        }
        String::from_utf8(bytes).map_err(|_| FetchError::InvalidUtf8)
    }
}
