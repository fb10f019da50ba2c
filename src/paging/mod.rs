//! # Paging primitives
//!
//! Address newtypes, page arithmetic, and the leaf-level page table used by
//! the per-process address spaces. The architecture owns the real table
//! format; this module keeps the conceptual model the VMA manager and the
//! copy-on-write resolver operate on.

pub mod entry;
pub mod mapper;

pub use self::entry::{PageTableEntry, PteFlags};
pub use self::mapper::{AlreadyMapped, PageTable};

pub const PAGE_SHIFT: usize = 12;
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;
pub const PAGE_MASK: usize = !(PAGE_SIZE - 1);

/// Rounds an address down to the page boundary at or below it.
pub const fn round_down_pages(number: usize) -> usize {
    number & PAGE_MASK
}
/// Rounds an address up to the page boundary at or above it.
pub const fn round_up_pages(number: usize) -> usize {
    round_down_pages(number + PAGE_SIZE - 1)
}

/// A physical memory address.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct PhysicalAddress(usize);

impl PhysicalAddress {
    pub const fn new(address: usize) -> Self {
        Self(address)
    }
    pub const fn data(self) -> usize {
        self.0
    }
    pub const fn add(self, offset: usize) -> Self {
        Self(self.0 + offset)
    }
    pub const fn is_page_aligned(self) -> bool {
        self.0 % PAGE_SIZE == 0
    }
}

impl core::fmt::Debug for PhysicalAddress {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "[phys {:p}]", self.0 as *const u8)
    }
}

/// A virtual memory address.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct VirtualAddress(usize);

impl VirtualAddress {
    pub const fn new(address: usize) -> Self {
        Self(address)
    }
    pub const fn data(self) -> usize {
        self.0
    }
    pub const fn add(self, offset: usize) -> Self {
        Self(self.0 + offset)
    }
}

impl core::fmt::Debug for VirtualAddress {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "[virt {:p}]", self.0 as *const u8)
    }
}

/// A virtual page, identified by its page-aligned start address.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Page {
    start: VirtualAddress,
}

impl Page {
    pub fn containing_address(address: VirtualAddress) -> Page {
        Page {
            start: VirtualAddress::new(round_down_pages(address.data())),
        }
    }
    pub fn start_address(self) -> VirtualAddress {
        self.start
    }
    pub fn next(self) -> Page {
        Page {
            start: self.start.add(PAGE_SIZE),
        }
    }
}

impl core::fmt::Debug for Page {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "[page at {:p}]", self.start.data() as *const u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_rounding() {
        assert_eq!(round_down_pages(PAGE_SIZE + 1), PAGE_SIZE);
        assert_eq!(round_up_pages(PAGE_SIZE + 1), 2 * PAGE_SIZE);
        assert_eq!(round_up_pages(PAGE_SIZE), PAGE_SIZE);
    }

    #[test]
    fn page_containing() {
        let page = Page::containing_address(VirtualAddress::new(0x1234_5678));
        assert_eq!(page.start_address().data(), 0x1234_5000);
        assert_eq!(page.next().start_address().data(), 0x1234_6000);
    }
}
