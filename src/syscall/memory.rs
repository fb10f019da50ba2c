//! # Memory-mapping syscalls
//!
//! Raw argument decoding for `mmap` and `munmap`. Everything user-supplied
//! is validated here; the address-space operations below assume decoded,
//! well-formed flags.

use crate::{
    context::Context,
    cpu_set::LogicalCpuId,
    memory::FrameAllocator,
    paging::VirtualAddress,
    syscall::{
        error::{Error, Result, EINVAL},
        flag::{MapFlags, ProtFlags},
    },
};

/// `mmap(address, length, prot, flags, fd, offset)`: maps `length` bytes of
/// the file open at `fd`. Returns the chosen address.
///
/// Placement and offset are not the caller's to pick: a nonzero `address`
/// hint or file `offset` is rejected. The file handle is duplicated into
/// the mapping, so the caller may close `fd` immediately afterwards.
pub fn sys_mmap(
    context: &mut Context,
    address: usize,
    length: usize,
    prot: usize,
    flags: usize,
    fd: usize,
    offset: usize,
) -> Result<usize> {
    if address != 0 || offset != 0 {
        return Err(Error::new(EINVAL));
    }
    let prot = ProtFlags::from_bits(prot).ok_or(Error::new(EINVAL))?;
    let flags = MapFlags::from_bits(flags).ok_or(Error::new(EINVAL))?;
    // Exactly one sharing mode.
    if flags.contains(MapFlags::MAP_SHARED) == flags.contains(MapFlags::MAP_PRIVATE) {
        return Err(Error::new(EINVAL));
    }
    let file = context.file(fd)?;

    let address = context.addr_space.mmap(length, prot, flags, file)?;
    Ok(address.data())
}

/// `munmap(address, length)`: unmaps `[address, address + length)`.
pub fn sys_munmap(
    context: &mut Context,
    allocator: &FrameAllocator,
    cpu: LogicalCpuId,
    address: usize,
    length: usize,
) -> Result<usize> {
    context
        .addr_space
        .munmap(allocator, cpu, VirtualAddress::new(address), length)?;
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        context::file::{FileDescription, MemVnode},
        memory::{test_support::new_allocator, PAGE_SIZE},
        syscall::error::{EACCES, EBADF, EFAULT},
    };

    const CPU0: LogicalCpuId = LogicalCpuId::BSP;

    fn context_with_file(readable: bool, writable: bool) -> (Context, usize) {
        let mut context = Context::new();
        let vnode = MemVnode::new(vec![b'f'; 2 * PAGE_SIZE]);
        let fd = context
            .insert_file(FileDescription::new(vnode, readable, writable))
            .unwrap();
        (context, fd)
    }

    #[test]
    fn mmap_and_munmap_round_trip() {
        let allocator = new_allocator(16, 1);
        let (mut context, fd) = context_with_file(true, true);

        let address = sys_mmap(&mut context, 0, 2 * PAGE_SIZE, 0x3, 0x1, fd, 0).unwrap();
        assert_eq!(address % PAGE_SIZE, 0);
        assert_eq!(
            sys_munmap(&mut context, &allocator, CPU0, address, 2 * PAGE_SIZE).unwrap(),
            0
        );
        assert_eq!(
            sys_munmap(&mut context, &allocator, CPU0, address, 2 * PAGE_SIZE).unwrap_err(),
            Error::new(EFAULT)
        );
    }

    #[test]
    fn mmap_rejects_address_hints_and_offsets() {
        let (mut context, fd) = context_with_file(true, true);
        assert_eq!(
            sys_mmap(&mut context, PAGE_SIZE, PAGE_SIZE, 0x1, 0x2, fd, 0).unwrap_err(),
            Error::new(EINVAL)
        );
        assert_eq!(
            sys_mmap(&mut context, 0, PAGE_SIZE, 0x1, 0x2, fd, PAGE_SIZE).unwrap_err(),
            Error::new(EINVAL)
        );
    }

    #[test]
    fn mmap_rejects_unknown_bits() {
        let (mut context, fd) = context_with_file(true, true);
        assert_eq!(
            sys_mmap(&mut context, 0, PAGE_SIZE, 0x8, 0x1, fd, 0).unwrap_err(),
            Error::new(EINVAL)
        );
        assert_eq!(
            sys_mmap(&mut context, 0, PAGE_SIZE, 0x1, 0x4, fd, 0).unwrap_err(),
            Error::new(EINVAL)
        );
    }

    #[test]
    fn mmap_requires_exactly_one_sharing_mode() {
        let (mut context, fd) = context_with_file(true, true);
        for flags in [0x0, 0x3] {
            assert_eq!(
                sys_mmap(&mut context, 0, PAGE_SIZE, 0x1, flags, fd, 0).unwrap_err(),
                Error::new(EINVAL)
            );
        }
    }

    #[test]
    fn mmap_rejects_a_closed_descriptor() {
        let (mut context, fd) = context_with_file(true, true);
        context.remove_file(fd).unwrap();
        assert_eq!(
            sys_mmap(&mut context, 0, PAGE_SIZE, 0x1, 0x2, fd, 0).unwrap_err(),
            Error::new(EBADF)
        );
    }

    #[test]
    fn mmap_checks_the_open_mode() {
        let (mut context, fd) = context_with_file(true, false);
        assert_eq!(
            sys_mmap(&mut context, 0, PAGE_SIZE, 0x3, 0x1, fd, 0).unwrap_err(),
            Error::new(EACCES)
        );
    }

    #[test]
    fn mapping_survives_closing_the_descriptor() {
        let allocator = new_allocator(16, 1);
        let (mut context, fd) = context_with_file(true, true);

        let address = sys_mmap(&mut context, 0, PAGE_SIZE, 0x1, 0x2, fd, 0).unwrap();
        context.remove_file(fd).unwrap();

        // The mapping's duplicated handle still backs faults.
        context
            .addr_space
            .fault(
                &allocator,
                CPU0,
                VirtualAddress::new(address),
                crate::context::memory::AccessMode::Read,
            )
            .unwrap();
        sys_munmap(&mut context, &allocator, CPU0, address, PAGE_SIZE).unwrap();
    }
}
