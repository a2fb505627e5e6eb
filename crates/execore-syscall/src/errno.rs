/// Error codes returned by syscalls. A syscall that fails returns the
/// negative value of one of these codes instead of its result, so user
/// programs can tell a failure from a valid return value with a simple sign
/// check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Errno {
    /// An unspecified error occurred.
    Unspecified = -1,

    /// The requested object (file, process...) does not exist.
    NotFound = -2,

    /// The operation is not supported.
    Unsupported = -3,

    /// No such device.
    NoDevice = -4,

    /// An I/O error occurred.
    Io = -5,

    /// The resource is busy.
    Busy = -6,

    /// The kernel ran out of memory.
    NoMemory = -7,

    /// No filesystem is mounted.
    NoFilesystem = -8,

    /// A name or path is too long.
    NameTooLong = -9,

    /// The filesystem is corrupted or has an unknown format.
    InvalidFilesystem = -10,

    /// Permission denied.
    Access = -11,

    /// An invalid argument was provided, for example a pointer outside of
    /// the caller's address space or a string that is not valid UTF-8.
    Invalid = -12,

    /// Too many files are open.
    TooManyFiles = -13,

    /// A path component is not a directory.
    NotDirectory = -14,

    /// The object already exists.
    Exists = -15,

    /// No space left on the device.
    NoSpace = -16,

    /// The other end of a pipe is closed.
    Pipe = -17,

    /// The file is not a valid executable.
    NoExec = -18,
}

impl Errno {
    /// Get the error code associated with this error.
    #[must_use]
    pub const fn code(self) -> i32 {
        self as i32
    }
}

impl From<Errno> for isize {
    fn from(errno: Errno) -> Self {
        errno as isize
    }
}

impl TryFrom<isize> for Errno {
    type Error = ();

    fn try_from(value: isize) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(Errno::Unspecified),
            -2 => Ok(Errno::NotFound),
            -3 => Ok(Errno::Unsupported),
            -4 => Ok(Errno::NoDevice),
            -5 => Ok(Errno::Io),
            -6 => Ok(Errno::Busy),
            -7 => Ok(Errno::NoMemory),
            -8 => Ok(Errno::NoFilesystem),
            -9 => Ok(Errno::NameTooLong),
            -10 => Ok(Errno::InvalidFilesystem),
            -11 => Ok(Errno::Access),
            -12 => Ok(Errno::Invalid),
            -13 => Ok(Errno::TooManyFiles),
            -14 => Ok(Errno::NotDirectory),
            -15 => Ok(Errno::Exists),
            -16 => Ok(Errno::NoSpace),
            -17 => Ok(Errno::Pipe),
            -18 => Ok(Errno::NoExec),
            _ => Err(()),
        }
    }
}
