//! # Guarded user-memory access
//!
//! Kernel-side copies in and out of a context's address space. Each copy
//! walks the range page by page, servicing demand-paging and copy-on-write
//! faults on the way, so callers never touch a non-resident page. Writes
//! mark the leaf entry dirty, which is what unmap-time write-back of shared
//! mappings keys off.

use crate::{
    context::memory::{AccessMode, AddrSpace},
    cpu_set::LogicalCpuId,
    memory::{FrameAllocator, PAGE_SIZE},
    paging::{Page, PteFlags, VirtualAddress},
    syscall::error::{Error, Result, EFAULT},
};

/// Copies `buffer.len()` bytes out of user memory at `address`.
pub fn copy_from_user(
    space: &mut AddrSpace,
    allocator: &FrameAllocator,
    cpu: LogicalCpuId,
    address: VirtualAddress,
    buffer: &mut [u8],
) -> Result<()> {
    let mut copied = 0;
    while copied < buffer.len() {
        let address = address.add(copied);
        let page_offset = address.data() % PAGE_SIZE;
        let chunk = core::cmp::min(PAGE_SIZE - page_offset, buffer.len() - copied);

        space.fault(allocator, cpu, address, AccessMode::Read)?;
        let entry = space
            .table
            .entry_mut(Page::containing_address(address))
            .ok_or(Error::new(EFAULT))?;
        unsafe {
            core::ptr::copy_nonoverlapping(
                (entry.frame().base().data() + page_offset) as *const u8,
                buffer[copied..].as_mut_ptr(),
                chunk,
            );
        }
        let flags = entry.flags();
        entry.set_flags(flags | PteFlags::ACCESSED);
        copied += chunk;
    }
    Ok(())
}

/// Copies `buffer` into user memory at `address`, dirtying every page
/// touched.
pub fn copy_to_user(
    space: &mut AddrSpace,
    allocator: &FrameAllocator,
    cpu: LogicalCpuId,
    address: VirtualAddress,
    buffer: &[u8],
) -> Result<()> {
    let mut copied = 0;
    while copied < buffer.len() {
        let address = address.add(copied);
        let page_offset = address.data() % PAGE_SIZE;
        let chunk = core::cmp::min(PAGE_SIZE - page_offset, buffer.len() - copied);

        // Write faults resolve copy-on-write before the bytes land.
        space.fault(allocator, cpu, address, AccessMode::Write)?;
        let entry = space
            .table
            .entry_mut(Page::containing_address(address))
            .ok_or(Error::new(EFAULT))?;
        unsafe {
            core::ptr::copy_nonoverlapping(
                buffer[copied..].as_ptr(),
                (entry.frame().base().data() + page_offset) as *mut u8,
                chunk,
            );
        }
        let flags = entry.flags();
        entry.set_flags(flags | PteFlags::ACCESSED | PteFlags::DIRTY);
        copied += chunk;
    }
    Ok(())
}
