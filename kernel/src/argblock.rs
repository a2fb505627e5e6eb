//! Serialization of the command line into the argument block of a new
//! process. See [`execore_syscall::args`] for the layout.
use execore_syscall::args::{Header, POINTER_SIZE};
use zerocopy::IntoBytes;

/// A command line split into arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arguments<'a> {
    command: &'a str,
    count: usize,
    size: usize,
}

impl<'a> Arguments<'a> {
    /// Split a command line on whitespace and compute the size of its
    /// argument block.
    #[must_use]
    pub fn parse(command: &'a str) -> Self {
        let (count, strings) = command
            .split_ascii_whitespace()
            .fold((0, 0), |(count, size), arg| (count + 1, size + arg.len() + 1));

        Self {
            command,
            count,
            size: Header::SIZE + (count + 1) * POINTER_SIZE + strings,
        }
    }

    /// The number of arguments.
    #[must_use]
    pub const fn count(&self) -> usize {
        self.count
    }

    /// The size of the argument block in bytes.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Write the argument block into `buffer`, which will be visible by the
    /// process at the user address `base`.
    ///
    /// # Panics
    /// Panics if the buffer is smaller than [`Arguments::size`] or if the
    /// block does not fit below 4 GiB at `base`.
    #[allow(clippy::cast_possible_truncation)]
    pub fn format(&self, buffer: &mut [u8], base: u32) {
        assert!(buffer.len() >= self.size, "Argument buffer too small");
        assert!(
            u64::from(base) + self.size as u64 <= 1 << 32,
            "Argument block does not fit in the address space"
        );
        let user = |offset: usize| base + offset as u32;

        let table = Header::SIZE;
        let header = Header {
            argc: self.count as u32,
            argv: user(table),
        };
        buffer[..Header::SIZE].copy_from_slice(header.as_bytes());

        let mut string = table + (self.count + 1) * POINTER_SIZE;
        let args = self.command.split_ascii_whitespace();
        for (index, arg) in args.enumerate() {
            let pointer = table + index * POINTER_SIZE;
            buffer[pointer..pointer + POINTER_SIZE].copy_from_slice(&user(string).to_le_bytes());
            buffer[string..string + arg.len()].copy_from_slice(arg.as_bytes());
            buffer[string + arg.len()] = 0;
            string += arg.len() + 1;
        }

        let last = table + self.count * POINTER_SIZE;
        buffer[last..last + POINTER_SIZE].fill(0);
    }
}
