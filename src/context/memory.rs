//! # Virtual memory management for contexts
//!
//! The per-process VMA table and its operations: creating file-backed
//! mappings, demand paging them in on fault, shrinking and tearing them
//! down (with write-back of shared dirty pages), duplicating them across
//! fork, and resolving copy-on-write faults.
//!
//! Mapping placement is deliberately restricted: the caller supplies no
//! address and no offset; every mapping is placed directly below the lowest
//! existing one, growing down from [`MMAP_TOP`] toward [`MMAP_BOTTOM`].

use alloc::sync::Arc;

use crate::{
    context::file::FileDescription,
    cpu_set::LogicalCpuId,
    memory::{Frame, FrameAllocator, PAGE_SIZE},
    paging::{round_down_pages, Page, PageTable, PteFlags, VirtualAddress},
    syscall::{
        error::{Error, Result, EACCES, EFAULT, EINVAL, ENOMEM},
        flag::{MapFlags, ProtFlags},
    },
};

/// Number of VMA slots per context.
pub const VMA_COUNT: usize = 16;

/// Ceiling of the mmap region; the first mapping is placed directly below.
pub const MMAP_TOP: usize = 0x40_0000_0000;
/// Floor of the mmap region; placement below this fails with `ENOMEM`.
pub const MMAP_BOTTOM: usize = 0x1000_0000;

/// The access that caused a page fault.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum AccessMode {
    Read,
    Write,
    InstrFetch,
}

/// Page-fault service outcome, translated to an errno by the trap layer.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum PfError {
    /// No frame could be allocated; the access may be retried after memory
    /// is freed, or the context terminated, at the caller's discretion.
    Oom,
    /// The address is not covered by any VMA, or the access kind is not
    /// permitted.
    Segv,
    /// [`AddrSpace::resolve_cow`] was called on an entry that is not marked
    /// copy-on-write.
    NotCow,
}

impl From<PfError> for Error {
    fn from(err: PfError) -> Self {
        match err {
            PfError::Oom => Error::new(ENOMEM),
            PfError::Segv => Error::new(EFAULT),
            PfError::NotCow => Error::new(EINVAL),
        }
    }
}

/// One contiguous, page-aligned, file-backed region of an address space.
#[derive(Clone, Debug)]
pub struct Vma {
    address: VirtualAddress,
    length: usize,
    prot: ProtFlags,
    flags: MapFlags,
    /// Duplicated at map time so the mapping outlives the caller's
    /// descriptor; closed when the VMA's length reaches zero.
    file: Arc<FileDescription>,
    /// The virtual address corresponding to file offset zero. Unchanged by
    /// edge shrinks, so file offsets stay stable.
    file_base: VirtualAddress,
}

impl Vma {
    pub fn address(&self) -> VirtualAddress {
        self.address
    }
    pub fn length(&self) -> usize {
        self.length
    }
    pub fn end(&self) -> VirtualAddress {
        self.address.add(self.length)
    }
    pub fn prot(&self) -> ProtFlags {
        self.prot
    }
    pub fn is_shared(&self) -> bool {
        self.flags.contains(MapFlags::MAP_SHARED)
    }
    pub fn file(&self) -> &Arc<FileDescription> {
        &self.file
    }

    fn contains(&self, address: VirtualAddress) -> bool {
        address >= self.address && address < self.end()
    }

    fn permits(&self, access: AccessMode) -> bool {
        match access {
            AccessMode::Read => self.prot.contains(ProtFlags::PROT_READ),
            AccessMode::Write => self.prot.contains(ProtFlags::PROT_WRITE),
            AccessMode::InstrFetch => self.prot.contains(ProtFlags::PROT_EXEC),
        }
    }

    fn pte_flags(&self) -> PteFlags {
        PteFlags::VALID | PteFlags::USER | PteFlags::from_prot(self.prot)
    }
}

/// One process's address space: the leaf page table and the VMA table.
///
/// Exclusively owned by its context; the reference design never mutates one
/// address space from two CPUs at once, so there is no internal lock.
pub struct AddrSpace {
    pub table: PageTable,
    vmas: [Option<Vma>; VMA_COUNT],
}

impl AddrSpace {
    pub fn new() -> Self {
        Self {
            table: PageTable::new(),
            vmas: [const { None }; VMA_COUNT],
        }
    }

    pub fn vma_at(&self, index: usize) -> Option<&Vma> {
        self.vmas.get(index)?.as_ref()
    }

    /// Creates a lazy file-backed mapping of `length` bytes.
    ///
    /// No frames are allocated and no page-table entries are installed; the
    /// first access to each page faults it in. The file handle must already
    /// be duplicated for the mapping (the syscall layer clones the
    /// descriptor's handle).
    pub fn mmap(
        &mut self,
        length: usize,
        prot: ProtFlags,
        flags: MapFlags,
        file: Arc<FileDescription>,
    ) -> Result<VirtualAddress> {
        if length == 0 || length % PAGE_SIZE != 0 {
            return Err(Error::new(EINVAL));
        }
        if prot.contains(ProtFlags::PROT_READ) && !file.readable {
            return Err(Error::new(EACCES));
        }
        if prot.contains(ProtFlags::PROT_WRITE)
            && !flags.contains(MapFlags::MAP_PRIVATE)
            && !file.writable
        {
            return Err(Error::new(EACCES));
        }

        let mut lowest = MMAP_TOP;
        let mut free_slot = None;
        for (index, slot) in self.vmas.iter().enumerate() {
            match slot {
                Some(vma) => lowest = lowest.min(vma.address.data()),
                None => free_slot = Some(index),
            }
        }
        let free_slot = free_slot.ok_or(Error::new(ENOMEM))?;

        let address = round_down_pages(lowest.checked_sub(length).ok_or(Error::new(ENOMEM))?);
        if address < MMAP_BOTTOM {
            return Err(Error::new(ENOMEM));
        }
        let address = VirtualAddress::new(address);

        log::trace!("mmap {:?} len {:#x} {:?} {:?}", address, length, prot, flags);
        self.vmas[free_slot] = Some(Vma {
            address,
            length,
            prot,
            flags,
            file,
            file_base: address,
        });
        Ok(address)
    }

    /// Services a page fault at `address`.
    ///
    /// A write fault on a resident copy-on-write page goes to
    /// [`AddrSpace::resolve_cow`]; anything else is demand paging: allocate
    /// a frame, install a leaf entry with the VMA's permissions, and read
    /// the covering file range into it (bytes past end-of-file within the
    /// final page read as zero).
    pub fn fault(
        &mut self,
        allocator: &FrameAllocator,
        cpu: LogicalCpuId,
        address: VirtualAddress,
        access: AccessMode,
    ) -> Result<(), PfError> {
        let page = Page::containing_address(address);

        if let Some(entry) = self.table.entry(page) {
            if entry.is_valid() {
                if access == AccessMode::Write && entry.is_cow() {
                    return self.resolve_cow(allocator, cpu, page);
                }
                let permitted = match access {
                    AccessMode::Read => entry.flags().contains(PteFlags::READABLE),
                    AccessMode::Write => entry.is_writable(),
                    AccessMode::InstrFetch => entry.flags().contains(PteFlags::EXECUTABLE),
                };
                // A refault on an already-sufficient entry is benign.
                return if permitted { Ok(()) } else { Err(PfError::Segv) };
            }
        }

        let Self { table, vmas } = self;
        let vma = vmas
            .iter()
            .flatten()
            .find(|vma| vma.contains(page.start_address()))
            .ok_or(PfError::Segv)?;
        if !vma.permits(access) {
            return Err(PfError::Segv);
        }

        let frame = allocator.allocate_frame(cpu).ok_or(PfError::Oom)?;
        if table.map_to(page, frame, vma.pte_flags()).is_err() {
            panic!("fault service would overwrite an existing leaf entry at {page:?}");
        }

        // Read the covering range of the file, clamped to its size; the
        // rest of the frame (still junk-filled) must read as zero.
        let vnode = &vma.file.vnode;
        let page_start = page.start_address().data();
        let read_offset = page_start - vma.file_base.data();
        let clamped_end = core::cmp::min(vma.end().data(), vma.file_base.data() + vnode.size());
        let read_size = core::cmp::min(PAGE_SIZE, clamped_end.saturating_sub(page_start));

        let buffer =
            unsafe { core::slice::from_raw_parts_mut(frame.base().data() as *mut u8, PAGE_SIZE) };
        if read_size > 0 {
            match vnode.read_at(read_offset, &mut buffer[..read_size]) {
                Ok(count) if count == read_size => {}
                _ => panic!("fault service: short read from backing file"),
            }
        }
        buffer[read_size..].fill(0);

        log::trace!("faulted in {page:?} -> {frame:?} ({access:?})");
        Ok(())
    }

    /// Resolves a write fault on a copy-on-write page.
    ///
    /// When the faulting context is the frame's sole owner the copy is
    /// elided: the entry is made writable in place. Otherwise the frame is
    /// duplicated, the entry rewritten to the copy, and the original
    /// released (remaining valid for its other owners). On `Oom` the entry
    /// is left untouched.
    pub fn resolve_cow(
        &mut self,
        allocator: &FrameAllocator,
        cpu: LogicalCpuId,
        page: Page,
    ) -> Result<(), PfError> {
        let entry = match self.table.entry_mut(page) {
            Some(entry) if entry.is_valid() && entry.is_cow() => entry,
            _ => return Err(PfError::NotCow),
        };

        let old_frame = entry.frame();
        let flags = (entry.flags() - PteFlags::COW) | PteFlags::WRITABLE;

        if allocator.refcount(old_frame) == 1 {
            entry.set_flags(flags);
            return Ok(());
        }

        let new_frame = allocator.allocate_frame(cpu).ok_or(PfError::Oom)?;
        unsafe {
            core::ptr::copy_nonoverlapping(
                old_frame.base().data() as *const u8,
                new_frame.base().data() as *mut u8,
                PAGE_SIZE,
            );
        }
        entry.set(new_frame, flags);
        allocator.release_frame(cpu, old_frame);

        log::trace!("copied {old_frame:?} -> {new_frame:?} for {page:?}");
        Ok(())
    }

    /// Unmaps `[start, start + length)` from the one VMA covering it.
    ///
    /// Only edge shrinks are supported; carving out the interior of a VMA
    /// is rejected. Resident shared dirty pages are written back before
    /// their frames are released; pages never faulted in are skipped
    /// silently.
    pub fn munmap(
        &mut self,
        allocator: &FrameAllocator,
        cpu: LogicalCpuId,
        start: VirtualAddress,
        length: usize,
    ) -> Result<()> {
        if length == 0 {
            return Ok(());
        }
        if start.data() % PAGE_SIZE != 0 || length % PAGE_SIZE != 0 {
            return Err(Error::new(EINVAL));
        }
        let end = start.data().checked_add(length).ok_or(Error::new(EINVAL))?;

        let mut found = None;
        for (index, slot) in self.vmas.iter().enumerate() {
            let Some(vma) = slot else { continue };
            if start.data() >= vma.end().data() || end <= vma.address.data() {
                continue;
            }
            if found.is_some() {
                panic!("munmap: intersecting mappings");
            }
            found = Some(index);
        }
        let index = found.ok_or(Error::new(EFAULT))?;

        let (new_address, new_length) = {
            let vma = self.vmas[index].as_ref().expect("vma vanished");
            if start < vma.address || end > vma.end().data() {
                return Err(Error::new(EINVAL));
            }
            if start == vma.address {
                (VirtualAddress::new(start.data() + length), vma.length - length)
            } else if end == vma.end().data() {
                (vma.address, vma.length - length)
            } else {
                // Interior carve, touching neither edge: unsupported.
                return Err(Error::new(EINVAL));
            }
        };

        {
            let Self { table, vmas } = self;
            let vma = vmas[index].as_ref().expect("vma vanished");
            release_range(table, allocator, cpu, vma, start, length);
        }

        log::trace!("munmap {start:?} len {length:#x}");
        let vma = self.vmas[index].as_mut().expect("vma vanished");
        vma.address = new_address;
        vma.length = new_length;
        if vma.length == 0 {
            // Dropping the record closes the duplicated file handle.
            self.vmas[index] = None;
        }
        Ok(())
    }

    /// Copies every VMA record into the identically-indexed slot of `new`,
    /// duplicating each file handle.
    ///
    /// Frames and page-table entries are not shared: the new context
    /// re-faults every page on first access. The destination table must be
    /// empty.
    pub fn duplicate_into(&self, new: &mut AddrSpace) {
        for (index, slot) in self.vmas.iter().enumerate() {
            assert!(
                new.vmas[index].is_none(),
                "duplicating into a non-empty VMA slot"
            );
            // Cloning the record duplicates the file handle with it.
            new.vmas[index] = slot.clone();
        }
    }

    /// Unmaps every VMA in full, used at context exit.
    pub fn teardown(&mut self, allocator: &FrameAllocator, cpu: LogicalCpuId) {
        for index in 0..VMA_COUNT {
            let Some((address, length)) = self.vmas[index]
                .as_ref()
                .map(|vma| (vma.address, vma.length))
            else {
                continue;
            };
            self.munmap(allocator, cpu, address, length)
                .expect("teardown: full-range unmap failed");
        }
    }
}

impl Default for AddrSpace {
    fn default() -> Self {
        Self::new()
    }
}

/// Clears every leaf entry in `[start, start + length)`, writing back
/// resident shared dirty pages before their frames are released.
fn release_range(
    table: &mut PageTable,
    allocator: &FrameAllocator,
    cpu: LogicalCpuId,
    vma: &Vma,
    start: VirtualAddress,
    length: usize,
) {
    let end = start.data() + length;
    let mut address = start.data();
    while address < end {
        let page = Page::containing_address(VirtualAddress::new(address));
        if let Some(entry) = table.unmap(page) {
            if entry.is_valid() {
                if vma.is_shared() && entry.is_dirty() {
                    write_back(vma, address, end, entry.frame());
                }
                allocator.release_frame(cpu, entry.frame());
            }
        }
        address += PAGE_SIZE;
    }
}

/// Writes one resident page back to the backing file, clamped to the file's
/// size, inside a file-system transaction.
fn write_back(vma: &Vma, address: usize, range_end: usize, frame: Frame) {
    let vnode = &vma.file.vnode;
    vnode.begin_op();

    let write_offset = address - vma.file_base.data();
    let clamped_end = core::cmp::min(range_end, vma.file_base.data() + vnode.size());
    let write_size = core::cmp::min(PAGE_SIZE, clamped_end.saturating_sub(address));
    if write_size > 0 {
        let buffer =
            unsafe { core::slice::from_raw_parts(frame.base().data() as *const u8, write_size) };
        match vnode.write_at(write_offset, buffer) {
            Ok(count) if count == write_size => {}
            _ => panic!("munmap: short write-back to backing file"),
        }
    }

    vnode.end_op();
}
