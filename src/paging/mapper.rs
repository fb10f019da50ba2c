//! # Per-process leaf page table
//!
//! The walk/insert primitive the VMA manager builds on. Only leaf entries
//! are modeled; intermediate table levels belong to the architecture.

use hashbrown::HashMap;

use crate::{
    memory::Frame,
    paging::{entry::{PageTableEntry, PteFlags}, Page, PhysicalAddress, VirtualAddress},
};

/// Returned by [`PageTable::map_to`] when a valid leaf entry already exists
/// for the page. During fault service this indicates an allocator or
/// page-table invariant violation upstream and is treated as fatal by the
/// caller.
#[derive(Debug, PartialEq, Eq)]
pub struct AlreadyMapped;

/// One process's leaf page table.
#[derive(Debug, Default)]
pub struct PageTable {
    entries: HashMap<Page, PageTableEntry>,
}

impl PageTable {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Installs a leaf entry mapping `page` to `frame`.
    ///
    /// Fails if the page already has a valid leaf entry; the existing entry
    /// is left untouched.
    pub fn map_to(
        &mut self,
        page: Page,
        frame: Frame,
        flags: PteFlags,
    ) -> Result<(), AlreadyMapped> {
        if self.entries.contains_key(&page) {
            return Err(AlreadyMapped);
        }
        self.entries.insert(page, PageTableEntry::new(frame, flags));
        Ok(())
    }

    /// Walks to the leaf entry for `page`, if one exists.
    pub fn entry(&self, page: Page) -> Option<PageTableEntry> {
        self.entries.get(&page).copied()
    }

    /// Walks to the leaf entry for `page` for in-place mutation.
    pub fn entry_mut(&mut self, page: Page) -> Option<&mut PageTableEntry> {
        self.entries.get_mut(&page)
    }

    /// Clears the leaf entry for `page`, returning the old entry.
    ///
    /// Clearing a page that was never mapped is a no-op.
    pub fn unmap(&mut self, page: Page) -> Option<PageTableEntry> {
        self.entries.remove(&page)
    }

    /// Resolves a virtual address to its physical address and entry flags.
    pub fn translate(&self, address: VirtualAddress) -> Option<(PhysicalAddress, PteFlags)> {
        let entry = self.entry(Page::containing_address(address))?;
        if !entry.is_valid() {
            return None;
        }
        let offset = address.data() & !super::PAGE_MASK;
        Some((entry.frame().base().add(offset), entry.flags()))
    }

    /// Number of live leaf entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
