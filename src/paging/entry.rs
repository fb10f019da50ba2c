//! # Leaf page-table entries
//!
//! A leaf entry packs a frame base address together with its flag bits in a
//! single word, the way the hardware table encodes them. The flag layout
//! follows the RISC-V Sv39 leaf format; software bit 8 (one of the two
//! bits the architecture reserves for the OS) is repurposed to mark
//! copy-on-write pages.

use crate::{
    memory::Frame,
    paging::{PhysicalAddress, PAGE_MASK},
    syscall::flag::ProtFlags,
};

bitflags! {
    /// Flag bits of a leaf page-table entry.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct PteFlags: usize {
        const VALID = 1 << 0;
        const READABLE = 1 << 1;
        const WRITABLE = 1 << 2;
        const EXECUTABLE = 1 << 3;
        const USER = 1 << 4;
        const GLOBAL = 1 << 5;
        const ACCESSED = 1 << 6;
        const DIRTY = 1 << 7;
        /// Software bit repurposed to mean copy-on-write.
        const COW = 1 << 8;
    }
}

impl PteFlags {
    /// Translates mapping protection bits into their leaf-entry equivalents.
    pub fn from_prot(prot: ProtFlags) -> PteFlags {
        let mut flags = PteFlags::empty();
        if prot.contains(ProtFlags::PROT_READ) {
            flags |= PteFlags::READABLE;
        }
        if prot.contains(ProtFlags::PROT_WRITE) {
            flags |= PteFlags::WRITABLE;
        }
        if prot.contains(ProtFlags::PROT_EXEC) {
            flags |= PteFlags::EXECUTABLE;
        }
        flags
    }
}

/// A leaf page-table entry: frame base address plus [`PteFlags`].
///
/// The packed representation is decoded only through [`PageTableEntry::frame`]
/// and [`PageTableEntry::flags`]; nothing else in the crate interprets the
/// raw word.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PageTableEntry(usize);

impl PageTableEntry {
    pub fn new(frame: Frame, flags: PteFlags) -> Self {
        debug_assert_eq!(flags.bits() & PAGE_MASK, 0);
        Self(frame.base().data() | flags.bits())
    }

    pub fn frame(self) -> Frame {
        Frame::containing(PhysicalAddress::new(self.0 & PAGE_MASK))
    }

    pub fn flags(self) -> PteFlags {
        PteFlags::from_bits_truncate(self.0 & !PAGE_MASK)
    }

    /// Replaces the frame and flags in one step, as the copy-on-write
    /// resolver does when redirecting an entry to a private copy.
    pub fn set(&mut self, frame: Frame, flags: PteFlags) {
        *self = Self::new(frame, flags);
    }

    pub fn set_flags(&mut self, flags: PteFlags) {
        self.0 = (self.0 & PAGE_MASK) | flags.bits();
    }

    pub fn is_valid(self) -> bool {
        self.flags().contains(PteFlags::VALID)
    }
    pub fn is_writable(self) -> bool {
        self.flags().contains(PteFlags::WRITABLE)
    }
    pub fn is_dirty(self) -> bool {
        self.flags().contains(PteFlags::DIRTY)
    }
    pub fn is_cow(self) -> bool {
        self.flags().contains(PteFlags::COW)
    }
}

impl core::fmt::Debug for PageTableEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "[pte {:?} {:?}]", self.frame(), self.flags())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode() {
        let frame = Frame::containing(PhysicalAddress::new(0xdead_b000));
        let flags = PteFlags::VALID | PteFlags::READABLE | PteFlags::COW;
        let mut entry = PageTableEntry::new(frame, flags);

        assert_eq!(entry.frame(), frame);
        assert_eq!(entry.flags(), flags);
        assert!(entry.is_valid());
        assert!(entry.is_cow());
        assert!(!entry.is_writable());

        entry.set_flags((flags - PteFlags::COW) | PteFlags::WRITABLE);
        assert_eq!(entry.frame(), frame);
        assert!(entry.is_writable());
        assert!(!entry.is_cow());
    }

    #[test]
    fn prot_translation() {
        let flags = PteFlags::from_prot(ProtFlags::PROT_READ | ProtFlags::PROT_WRITE);
        assert_eq!(flags, PteFlags::READABLE | PteFlags::WRITABLE);
    }
}
