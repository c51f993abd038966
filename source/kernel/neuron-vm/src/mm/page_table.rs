// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Sv39 page-table model with lazily built intermediate levels.
//!
//! Table pages live in an index arena owned by the table; non-leaf entries
//! carry the child's arena index in their PPN field. A leaf entry may exist
//! without an installed frame (software marker bits only), and an installed
//! frame may be temporarily invalid (VALID cleared for reference tracing);
//! `MAPPED` tracks frame installation independently of `VALID`.

extern crate alloc;

use alloc::{vec, vec::Vec};

use bitflags::bitflags;

/// Size of a single page in bytes.
pub const PAGE_SIZE: usize = 4096;
/// Number of entries per Sv39 page-table page.
const PT_ENTRIES: usize = 512;
/// Bits below the PPN field.
const FLAG_BITS: usize = 10;
const FLAG_MASK: usize = (1 << FLAG_BITS) - 1;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    /// Flags stored in Sv39 page-table entries.
    pub struct PageFlags: usize {
        const VALID = 1 << 0;
        const READ = 1 << 1;
        const WRITE = 1 << 2;
        const EXECUTE = 1 << 3;
        const USER = 1 << 4;
        const GLOBAL = 1 << 5;
        const ACCESSED = 1 << 6;
        const DIRTY = 1 << 7;
        /// RSW0: page belongs to a live user-heap allocation.
        const UHPAGE = 1 << 8;
        /// RSW1: a frame is installed in this entry.
        const MAPPED = 1 << 9;
    }
}

impl PageFlags {
    /// Page is resident and accessible.
    pub const PRESENT: Self = Self::VALID;
    /// Page may be written.
    pub const WRITEABLE: Self = Self::WRITE;
    /// Page was referenced since the bit was last cleared.
    pub const USED: Self = Self::ACCESSED;
    /// Page was written since it was last persisted.
    pub const MODIFIED: Self = Self::DIRTY;

    /// Permissions installed for a freshly placed user page.
    pub const USER_RW: Self = Self::VALID.union(Self::READ).union(Self::WRITE).union(Self::USER);
}

/// Error returned when manipulating page tables.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MapError {
    /// Virtual address was not page aligned.
    Unaligned,
    /// Address is not canonical Sv39.
    OutOfRange,
    /// Mapping violates the W^X policy.
    PermissionDenied,
    /// A frame is already installed at this address.
    Overlap,
    /// Flags do not describe a valid leaf entry.
    InvalidFlags,
    /// The leaf table covering the address does not exist.
    MissingTable,
}

const LEAF_PERMS: PageFlags = PageFlags::READ.union(PageFlags::WRITE).union(PageFlags::EXECUTE);
const SOFTWARE_BITS: PageFlags = PageFlags::UHPAGE;

struct PageTablePage {
    entries: [usize; PT_ENTRIES],
}

impl PageTablePage {
    const fn new() -> Self {
        Self { entries: [0; PT_ENTRIES] }
    }
}

/// Three-level Sv39 page table allocating intermediate levels on demand.
pub struct PageTable {
    pages: Vec<PageTablePage>,
}

impl Default for PageTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PageTable {
    const ROOT: usize = 0;

    /// Creates an empty page table with a fresh root page.
    pub fn new() -> Self {
        Self { pages: vec![PageTablePage::new()] }
    }

    /// Number of table pages currently allocated, root included.
    pub fn table_pages(&self) -> usize {
        self.pages.len()
    }

    /// Returns whether the last-level table covering `va` exists.
    pub fn leaf_table_present(&self, va: usize) -> bool {
        self.leaf_table(va).is_some()
    }

    /// Builds every missing intermediate level down to the leaf table for `va`.
    pub fn build_leaf_table(&mut self, va: usize) -> Result<(), MapError> {
        self.leaf_table_or_build(va).map(|_| ())
    }

    /// Returns the raw entry at `va` if it holds any bits.
    pub fn lookup(&self, va: usize) -> Option<usize> {
        if va % PAGE_SIZE != 0 || !is_canonical_sv39(va) {
            return None;
        }
        let table = self.leaf_table(va)?;
        let entry = self.pages[table].entries[vpn_indices(va)[2]];
        (entry != 0).then_some(entry)
    }

    /// Returns the flag bits of the entry at `va` if it holds any bits.
    pub fn flags(&self, va: usize) -> Option<PageFlags> {
        self.lookup(va).map(|entry| PageFlags::from_bits_truncate(entry & FLAG_MASK))
    }

    /// Returns the PPN installed at `va`, whether or not it is currently valid.
    pub fn frame(&self, va: usize) -> Option<usize> {
        self.lookup(va)
            .filter(|entry| entry & PageFlags::MAPPED.bits() != 0)
            .map(|entry| entry >> FLAG_BITS)
    }

    /// Collects `(va, ppn)` for every entry with an installed frame, in address order.
    pub fn mapped_pages(&self) -> Vec<(usize, usize)> {
        let mut out = Vec::new();
        for (i2, root) in self.pages[Self::ROOT].entries.iter().enumerate() {
            if root & PageFlags::VALID.bits() == 0 {
                continue;
            }
            let mid = root >> FLAG_BITS;
            for (i1, entry) in self.pages[mid].entries.iter().enumerate() {
                if entry & PageFlags::VALID.bits() == 0 {
                    continue;
                }
                let leaf = entry >> FLAG_BITS;
                for (i0, pte) in self.pages[leaf].entries.iter().enumerate() {
                    if pte & PageFlags::MAPPED.bits() == 0 {
                        continue;
                    }
                    out.push((compose_va([i2, i1, i0]), pte >> FLAG_BITS));
                }
            }
        }
        out
    }

    /// Installs a 4 KiB mapping of `ppn` at `va` using `flags`.
    ///
    /// Software marker bits already present in the entry are preserved.
    pub fn map(&mut self, va: usize, ppn: usize, flags: PageFlags) -> Result<(), MapError> {
        if va % PAGE_SIZE != 0 {
            return Err(MapError::Unaligned);
        }
        if !is_canonical_sv39(va) {
            return Err(MapError::OutOfRange);
        }
        if flags.intersection(LEAF_PERMS).is_empty() || !flags.contains(PageFlags::VALID) {
            return Err(MapError::InvalidFlags);
        }
        if flags.contains(PageFlags::WRITE) && flags.contains(PageFlags::EXECUTE) {
            return Err(MapError::PermissionDenied);
        }
        let table = self.leaf_table_or_build(va)?;
        let entry = &mut self.pages[table].entries[vpn_indices(va)[2]];
        if *entry & PageFlags::MAPPED.bits() != 0 {
            return Err(MapError::Overlap);
        }
        let kept = *entry & SOFTWARE_BITS.bits();
        *entry = (ppn << FLAG_BITS) | kept | (flags | PageFlags::MAPPED).bits();
        Ok(())
    }

    /// Removes the frame installed at `va`, returning its PPN.
    ///
    /// Software marker bits survive the unmap.
    pub fn unmap(&mut self, va: usize) -> Option<usize> {
        if va % PAGE_SIZE != 0 || !is_canonical_sv39(va) {
            return None;
        }
        let table = self.leaf_table(va)?;
        let entry = &mut self.pages[table].entries[vpn_indices(va)[2]];
        if *entry & PageFlags::MAPPED.bits() == 0 {
            return None;
        }
        let ppn = *entry >> FLAG_BITS;
        *entry &= SOFTWARE_BITS.bits();
        Some(ppn)
    }

    /// Sets then clears flag bits on the entry at `va`.
    ///
    /// The leaf table must exist; the entry itself may be empty (marking a
    /// page before any frame is installed). `MAPPED` is owned by
    /// [`PageTable::map`]/[`PageTable::unmap`] and cannot be edited here.
    pub fn update_flags(
        &mut self,
        va: usize,
        set: PageFlags,
        clear: PageFlags,
    ) -> Result<(), MapError> {
        if va % PAGE_SIZE != 0 {
            return Err(MapError::Unaligned);
        }
        if !is_canonical_sv39(va) {
            return Err(MapError::OutOfRange);
        }
        if set.union(clear).contains(PageFlags::MAPPED) {
            return Err(MapError::InvalidFlags);
        }
        let table = self.leaf_table(va).ok_or(MapError::MissingTable)?;
        let entry = &mut self.pages[table].entries[vpn_indices(va)[2]];
        *entry = (*entry | set.bits()) & !clear.bits();
        Ok(())
    }

    fn leaf_table(&self, va: usize) -> Option<usize> {
        if !is_canonical_sv39(va) {
            return None;
        }
        let indices = vpn_indices(va);
        let mut table = Self::ROOT;
        for index in &indices[..2] {
            let entry = self.pages[table].entries[*index];
            if entry & PageFlags::VALID.bits() == 0 {
                return None;
            }
            table = entry >> FLAG_BITS;
        }
        Some(table)
    }

    fn leaf_table_or_build(&mut self, va: usize) -> Result<usize, MapError> {
        if !is_canonical_sv39(va) {
            return Err(MapError::OutOfRange);
        }
        let indices = vpn_indices(va);
        let mut table = Self::ROOT;
        for index in &indices[..2] {
            let entry = self.pages[table].entries[*index];
            if entry & PageFlags::VALID.bits() != 0 {
                if entry & LEAF_PERMS.bits() != 0 {
                    // Huge leaf in the way of a 4 KiB table.
                    return Err(MapError::Overlap);
                }
                table = entry >> FLAG_BITS;
                continue;
            }
            let next = self.pages.len();
            self.pages.push(PageTablePage::new());
            self.pages[table].entries[*index] = (next << FLAG_BITS) | PageFlags::VALID.bits();
            table = next;
        }
        Ok(table)
    }
}

/// VPN indices ordered root level first.
fn vpn_indices(va: usize) -> [usize; 3] {
    let vpn2 = (va >> 30) & 0x1ff;
    let vpn1 = (va >> 21) & 0x1ff;
    let vpn0 = (va >> 12) & 0x1ff;
    [vpn2, vpn1, vpn0]
}

/// Inverse of [`vpn_indices`], sign-extending upper-half addresses.
fn compose_va(indices: [usize; 3]) -> usize {
    let va = (indices[0] << 30) | (indices[1] << 21) | (indices[2] << 12);
    if va & (1 << 38) != 0 {
        va | !((1usize << 39) - 1)
    } else {
        va
    }
}

pub(crate) fn is_canonical_sv39(va: usize) -> bool {
    let sign = (va >> 38) & 1;
    let upper = va >> 39;
    if sign == 0 {
        upper == 0
    } else {
        upper == usize::MAX >> 39
    }
}
