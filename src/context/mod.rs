//! # Process context
//!
//! The slice of a process control block this crate owns: the address space
//! (VMA table plus page table) and the open-file table the syscall surface
//! resolves descriptors against. Context lifecycle (scheduling, signals,
//! register state) lives elsewhere in the kernel.

pub mod file;
pub mod memory;

use alloc::sync::Arc;

use slab::Slab;

use crate::syscall::error::{Error, Result, EBADF, EMFILE};
use self::{file::FileDescription, memory::AddrSpace};

/// Maximum number of open files per context.
pub const MAX_FILES: usize = 64;

/// The memory-management view of one process.
pub struct Context {
    pub addr_space: AddrSpace,
    files: Slab<Arc<FileDescription>>,
}

impl Context {
    pub fn new() -> Self {
        Self {
            addr_space: AddrSpace::new(),
            files: Slab::new(),
        }
    }

    /// Registers an open file, returning its descriptor.
    pub fn insert_file(&mut self, description: Arc<FileDescription>) -> Result<usize> {
        if self.files.len() >= MAX_FILES {
            return Err(Error::new(EMFILE));
        }
        Ok(self.files.insert(description))
    }

    /// Resolves a descriptor to its file handle.
    pub fn file(&self, fd: usize) -> Result<Arc<FileDescription>> {
        self.files.get(fd).cloned().ok_or(Error::new(EBADF))
    }

    /// Closes a descriptor. Mappings created from it keep their own
    /// duplicated handle and are unaffected.
    pub fn remove_file(&mut self, fd: usize) -> Result<Arc<FileDescription>> {
        if self.files.contains(fd) {
            Ok(self.files.remove(fd))
        } else {
            Err(Error::new(EBADF))
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::file::MemVnode;

    #[test]
    fn file_table_round_trip() {
        let mut context = Context::new();
        let description = FileDescription::new(MemVnode::new(vec![1, 2, 3]), true, false);

        let fd = context.insert_file(Arc::clone(&description)).unwrap();
        assert!(Arc::ptr_eq(&context.file(fd).unwrap(), &description));

        context.remove_file(fd).unwrap();
        assert_eq!(context.file(fd).unwrap_err(), Error::new(EBADF));
        assert_eq!(context.remove_file(fd).unwrap_err(), Error::new(EBADF));
    }

    #[test]
    fn file_table_is_bounded() {
        let mut context = Context::new();
        for _ in 0..MAX_FILES {
            context
                .insert_file(FileDescription::new(MemVnode::new(Vec::new()), true, false))
                .unwrap();
        }
        let overflow = context.insert_file(FileDescription::new(MemVnode::new(Vec::new()), true, false));
        assert_eq!(overflow.unwrap_err(), Error::new(EMFILE));
    }
}
