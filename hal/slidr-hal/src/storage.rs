//! File storage abstractions
//!
//! Provides traits for path-addressed file storage that can be implemented
//! on top of the board's filesystem. All operations are synchronous and
//! return a definite success or failure.

/// Errors from storage operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StorageError {
    /// Path does not exist
    NotFound,
    /// Path already exists
    AlreadyExists,
    /// Storage is full
    Full,
    /// Underlying filesystem failure
    Io,
}

/// How a file is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OpenMode {
    /// Read from the start of an existing file
    Read,
    /// Create or truncate, then write from the start
    Write,
}

/// An open file
pub trait FileHandle {
    /// Read up to `buffer.len()` bytes, returning 0 at end of file
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, StorageError>;

    /// Write data, returning how many bytes were accepted
    ///
    /// A count smaller than `data.len()` is a short write; callers decide
    /// whether that is fatal.
    fn write(&mut self, data: &[u8]) -> Result<usize, StorageError>;

    /// Total file size in bytes
    fn size(&self) -> usize;

    /// Flush and release the handle
    fn close(self);
}

/// Path-addressed file storage
///
/// Paths are absolute and `/`-separated, e.g. `/images/img-0.bin`.
pub trait Storage {
    /// Handle type returned by [`Storage::open`]
    type File: FileHandle;

    /// Open a file
    fn open(&mut self, path: &str, mode: OpenMode) -> Result<Self::File, StorageError>;

    /// Check whether a file or directory exists
    fn exists(&mut self, path: &str) -> bool;

    /// Remove a file
    fn remove(&mut self, path: &str) -> Result<(), StorageError>;

    /// Move a file to a new path
    ///
    /// The parent directory of `to` must already exist.
    fn rename(&mut self, from: &str, to: &str) -> Result<(), StorageError>;

    /// Create a single directory; its parent must already exist
    fn create_dir(&mut self, path: &str) -> Result<(), StorageError>;

    /// Create every missing directory above `path`
    ///
    /// For `/a/b/c.bin` this ensures `/a` and `/a/b` exist.
    fn create_parent_dirs(&mut self, path: &str) -> Result<(), StorageError> {
        let parent = match path.rfind('/') {
            Some(0) | None => return Ok(()),
            Some(slash) => &path[..slash],
        };

        for (idx, _) in parent.match_indices('/').filter(|(idx, _)| *idx > 0) {
            let dir = &parent[..idx];
            if !self.exists(dir) {
                self.create_dir(dir)?;
            }
        }

        if !self.exists(parent) {
            self.create_dir(parent)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::MemStorage;

    #[test]
    fn test_parent_dirs_created_in_order() {
        let mut storage = MemStorage::new();
        storage.create_parent_dirs("/images/segments/img-0.bin").unwrap();

        assert!(storage.exists("/images"));
        assert!(storage.exists("/images/segments"));
        assert!(!storage.exists("/images/segments/img-0.bin"));
    }

    #[test]
    fn test_parent_dirs_root_file() {
        let mut storage = MemStorage::new();
        storage.create_parent_dirs("/upload_temp").unwrap();
        storage.create_parent_dirs("relative").unwrap();
        assert_eq!(storage.dir_count(), 0);
    }

    #[test]
    fn test_parent_dirs_existing_are_kept() {
        let mut storage = MemStorage::new();
        storage.create_dir("/images").unwrap();
        storage.create_parent_dirs("/images/img-1.bin").unwrap();
        assert_eq!(storage.dir_count(), 1);
    }

    #[test]
    fn test_parent_dirs_failure_propagates() {
        let mut storage = MemStorage::new();
        storage.fail_create_dir(true);
        assert_eq!(
            storage.create_parent_dirs("/images/img-1.bin"),
            Err(StorageError::Io)
        );
    }
}
