//! Access to the files executables are loaded from.
use alloc::{string::String, vec::Vec};
use hashbrown::HashMap;

/// Errors that can occur when reading a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadError {
    /// No file exists at the given path.
    NotFound,
}

/// A source of whole files, typically a mounted file system.
pub trait FileSystem: Send + Sync {
    /// Read the whole content of the file at `path`.
    ///
    /// # Errors
    /// Returns [`ReadError::NotFound`] if there is no such file.
    fn read_fully(&self, path: &str) -> Result<Vec<u8>, ReadError>;
}

/// A read-only file system kept in memory, filled before the kernel starts
/// running programs.
#[derive(Debug, Default, Clone)]
pub struct RamFs {
    files: HashMap<String, Vec<u8>>,
}

impl RamFs {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file, replacing any previous file with the same path.
    pub fn insert(&mut self, path: &str, content: Vec<u8>) {
        self.files.insert(String::from(path), content);
    }
}

impl FileSystem for RamFs {
    fn read_fully(&self, path: &str) -> Result<Vec<u8>, ReadError> {
        self.files.get(path).cloned().ok_or(ReadError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn read_files() {
        let mut fs = RamFs::new();
        fs.insert("/c/shell.exe", vec![1, 2, 3]);
        assert_eq!(fs.read_fully("/c/shell.exe"), Ok(vec![1, 2, 3]));
        assert_eq!(fs.read_fully("/c/missing.exe"), Err(ReadError::NotFound));
    }
}
