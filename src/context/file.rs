//! # File handles for mappings
//!
//! A VMA keeps its backing file alive through a reference-counted
//! [`FileDescription`]. The file system itself stays external: the VMA
//! manager consumes it only through the [`Vnode`] trait.

use alloc::{sync::Arc, vec::Vec};

use spin::Mutex;

use crate::syscall::error::Result;

/// The contract a backing file must satisfy.
///
/// Implementations serialize access internally (the moral equivalent of the
/// inode lock); `read_at`/`write_at` therefore take `&self`. Write-back of
/// shared dirty pages is bracketed by [`Vnode::begin_op`]/[`Vnode::end_op`]
/// so a journaling file system can scope a transaction around it; the
/// defaults are no-ops.
pub trait Vnode: Send + Sync {
    /// Current size of the file in bytes.
    fn size(&self) -> usize;
    /// Reads up to `buffer.len()` bytes at `offset`; returns the count read.
    /// Reads past end-of-file return 0.
    fn read_at(&self, offset: usize, buffer: &mut [u8]) -> Result<usize>;
    /// Writes `buffer` at `offset`; returns the count written.
    fn write_at(&self, offset: usize, buffer: &[u8]) -> Result<usize>;

    /// Opens a file-system transaction around a write-back.
    fn begin_op(&self) {}
    /// Closes the transaction opened by [`Vnode::begin_op`].
    fn end_op(&self) {}
}

/// An open file: a vnode plus the open mode.
///
/// Handles are `Arc<FileDescription>`; duplicating a descriptor (as `mmap`
/// does so the mapping outlives the caller's descriptor, and as fork does
/// for every inherited VMA) is `Arc::clone`, closing is dropping the last
/// clone.
pub struct FileDescription {
    pub vnode: Arc<dyn Vnode>,
    pub readable: bool,
    pub writable: bool,
}

impl FileDescription {
    pub fn new(vnode: Arc<dyn Vnode>, readable: bool, writable: bool) -> Arc<Self> {
        Arc::new(Self {
            vnode,
            readable,
            writable,
        })
    }
}

impl core::fmt::Debug for FileDescription {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FileDescription")
            .field("readable", &self.readable)
            .field("writable", &self.writable)
            .field("size", &self.vnode.size())
            .finish()
    }
}

/// A RAM-backed vnode, for ramdisk-style files and tests.
pub struct MemVnode {
    data: Mutex<Vec<u8>>,
}

impl MemVnode {
    pub fn new(data: Vec<u8>) -> Arc<Self> {
        Arc::new(Self {
            data: Mutex::new(data),
        })
    }

    /// A copy of the current contents.
    pub fn snapshot(&self) -> Vec<u8> {
        self.data.lock().clone()
    }
}

impl Vnode for MemVnode {
    fn size(&self) -> usize {
        self.data.lock().len()
    }

    fn read_at(&self, offset: usize, buffer: &mut [u8]) -> Result<usize> {
        let data = self.data.lock();
        if offset >= data.len() {
            return Ok(0);
        }
        let count = core::cmp::min(buffer.len(), data.len() - offset);
        buffer[..count].copy_from_slice(&data[offset..offset + count]);
        Ok(count)
    }

    fn write_at(&self, offset: usize, buffer: &[u8]) -> Result<usize> {
        let mut data = self.data.lock();
        let end = offset + buffer.len();
        if end > data.len() {
            data.resize(end, 0);
        }
        data[offset..end].copy_from_slice(buffer);
        Ok(buffer.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_vnode_read_clamps_to_size() {
        let vnode = MemVnode::new(vec![7u8; 10]);
        let mut buffer = [0u8; 16];
        assert_eq!(vnode.read_at(4, &mut buffer).unwrap(), 6);
        assert_eq!(&buffer[..6], &[7u8; 6]);
        assert_eq!(vnode.read_at(10, &mut buffer).unwrap(), 0);
        assert_eq!(vnode.read_at(100, &mut buffer).unwrap(), 0);
    }

    #[test]
    fn mem_vnode_write_extends() {
        let vnode = MemVnode::new(vec![0u8; 4]);
        assert_eq!(vnode.write_at(2, &[1, 2, 3, 4]).unwrap(), 4);
        assert_eq!(vnode.size(), 6);
        assert_eq!(vnode.snapshot(), vec![0, 0, 1, 2, 3, 4]);
    }
}
