//! In-memory filesystem for host-side testing
//!
//! Clones share the same backing store, so a test can keep a handle while
//! the code under test owns another. Faults can be injected to exercise
//! error paths.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;
use std::string::{String, ToString};
use std::vec::Vec;

use crate::storage::{FileHandle, OpenMode, Storage, StorageError};

#[derive(Debug, Default)]
struct MemFs {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
    open_handles: usize,
    write_limit: Option<usize>,
    read_only: bool,
    fail_rename: bool,
    fail_create_dir: bool,
}

impl MemFs {
    fn parent_exists(&self, path: &str) -> bool {
        match path.rfind('/') {
            Some(0) | None => true,
            Some(slash) => self.dirs.contains(&path[..slash]),
        }
    }
}

/// Shared in-memory [`Storage`]
#[derive(Debug, Clone, Default)]
pub struct MemStorage {
    fs: Rc<RefCell<MemFs>>,
}

impl MemStorage {
    /// Create an empty filesystem
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a file, creating its parent directories
    pub fn insert(&self, path: &str, contents: &[u8]) {
        let mut fs = self.fs.borrow_mut();
        let mut idx = 0;
        while let Some(found) = path[idx + 1..].find('/') {
            idx += found + 1;
            fs.dirs.insert(path[..idx].to_string());
        }
        fs.files.insert(path.to_string(), contents.to_vec());
    }

    /// Contents of a file, if present
    pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
        self.fs.borrow().files.get(path).cloned()
    }

    pub fn file_count(&self) -> usize {
        self.fs.borrow().files.len()
    }

    pub fn dir_count(&self) -> usize {
        self.fs.borrow().dirs.len()
    }

    /// Handles opened and not yet closed
    pub fn open_handles(&self) -> usize {
        self.fs.borrow().open_handles
    }

    /// Cap every file at `limit` bytes; writes past it come up short
    pub fn set_write_limit(&self, limit: Option<usize>) {
        self.fs.borrow_mut().write_limit = limit;
    }

    /// Refuse to open files for writing
    pub fn set_read_only(&self, read_only: bool) {
        self.fs.borrow_mut().read_only = read_only;
    }

    pub fn fail_rename(&self, fail: bool) {
        self.fs.borrow_mut().fail_rename = fail;
    }

    pub fn fail_create_dir(&self, fail: bool) {
        self.fs.borrow_mut().fail_create_dir = fail;
    }
}

/// Open file in a [`MemStorage`]
#[derive(Debug)]
pub struct MemFile {
    fs: Rc<RefCell<MemFs>>,
    path: String,
    position: usize,
}

impl FileHandle for MemFile {
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, StorageError> {
        let fs = self.fs.borrow();
        let data = fs.files.get(&self.path).ok_or(StorageError::NotFound)?;
        let remaining = data.len().saturating_sub(self.position);
        let n = remaining.min(buffer.len());
        buffer[..n].copy_from_slice(&data[self.position..self.position + n]);
        self.position += n;
        Ok(n)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, StorageError> {
        let mut fs = self.fs.borrow_mut();
        let limit = fs.write_limit;
        let file = fs.files.get_mut(&self.path).ok_or(StorageError::NotFound)?;
        let room = limit.map_or(data.len(), |limit| limit.saturating_sub(file.len()));
        let n = room.min(data.len());
        file.extend_from_slice(&data[..n]);
        self.position += n;
        Ok(n)
    }

    fn size(&self) -> usize {
        self.fs
            .borrow()
            .files
            .get(&self.path)
            .map_or(0, |data| data.len())
    }

    fn close(self) {
        let mut fs = self.fs.borrow_mut();
        fs.open_handles = fs.open_handles.saturating_sub(1);
    }
}

impl Storage for MemStorage {
    type File = MemFile;

    fn open(&mut self, path: &str, mode: OpenMode) -> Result<MemFile, StorageError> {
        let mut fs = self.fs.borrow_mut();
        match mode {
            OpenMode::Read => {
                if !fs.files.contains_key(path) {
                    return Err(StorageError::NotFound);
                }
            }
            OpenMode::Write => {
                if fs.read_only {
                    return Err(StorageError::Io);
                }
                if !fs.parent_exists(path) {
                    return Err(StorageError::NotFound);
                }
                fs.files.insert(path.to_string(), Vec::new());
            }
        }
        fs.open_handles += 1;

        Ok(MemFile {
            fs: self.fs.clone(),
            path: path.to_string(),
            position: 0,
        })
    }

    fn exists(&mut self, path: &str) -> bool {
        let fs = self.fs.borrow();
        fs.files.contains_key(path) || fs.dirs.contains(path)
    }

    fn remove(&mut self, path: &str) -> Result<(), StorageError> {
        self.fs
            .borrow_mut()
            .files
            .remove(path)
            .map(|_| ())
            .ok_or(StorageError::NotFound)
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<(), StorageError> {
        let mut fs = self.fs.borrow_mut();
        if fs.fail_rename {
            return Err(StorageError::Io);
        }
        if !fs.parent_exists(to) {
            return Err(StorageError::NotFound);
        }
        if fs.files.contains_key(to) {
            return Err(StorageError::AlreadyExists);
        }
        let data = fs.files.remove(from).ok_or(StorageError::NotFound)?;
        fs.files.insert(to.to_string(), data);
        Ok(())
    }

    fn create_dir(&mut self, path: &str) -> Result<(), StorageError> {
        let mut fs = self.fs.borrow_mut();
        if fs.fail_create_dir {
            return Err(StorageError::Io);
        }
        if !fs.parent_exists(path) {
            return Err(StorageError::NotFound);
        }
        if !fs.dirs.insert(path.to_string()) {
            return Err(StorageError::AlreadyExists);
        }
        Ok(())
    }
}
