// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Address-space slots owning one page table each.
//!
//! An [`AsHandle`] is the slot index plus one, so a handle is never zero and
//! `Option<AsHandle>` stays word sized. Freed slots are reused lowest first.

extern crate alloc;

use alloc::vec::Vec;
use core::num::NonZeroU32;

use super::page_table::PageTable;

/// Names one address space for the whole lifetime of its slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AsHandle(NonZeroU32);

impl AsHandle {
    fn from_slot(slot: usize) -> Self {
        let raw = u32::try_from(slot).map_or(u32::MAX, |slot| slot.saturating_add(1));
        Self(NonZeroU32::new(raw).unwrap_or(NonZeroU32::MIN))
    }

    fn slot(self) -> usize {
        self.0.get() as usize - 1
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddressSpaceError {
    /// The handle names an empty or never-created slot.
    InvalidHandle,
}

#[derive(Default)]
pub struct AddressSpace {
    page_table: PageTable,
}

impl AddressSpace {
    pub fn page_table(&self) -> &PageTable {
        &self.page_table
    }

    pub fn page_table_mut(&mut self) -> &mut PageTable {
        &mut self.page_table
    }
}

#[derive(Default)]
pub struct AddressSpaceManager {
    slots: Vec<Option<AddressSpace>>,
}

impl AddressSpaceManager {
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Creates an empty address space in the lowest free slot.
    pub fn create(&mut self) -> AsHandle {
        match self.slots.iter().position(Option::is_none) {
            Some(slot) => {
                self.slots[slot] = Some(AddressSpace::default());
                AsHandle::from_slot(slot)
            }
            None => {
                self.slots.push(Some(AddressSpace::default()));
                AsHandle::from_slot(self.slots.len() - 1)
            }
        }
    }

    pub fn get(&self, handle: AsHandle) -> Result<&AddressSpace, AddressSpaceError> {
        self.slots
            .get(handle.slot())
            .and_then(Option::as_ref)
            .ok_or(AddressSpaceError::InvalidHandle)
    }

    pub fn get_mut(&mut self, handle: AsHandle) -> Result<&mut AddressSpace, AddressSpaceError> {
        self.slots
            .get_mut(handle.slot())
            .and_then(Option::as_mut)
            .ok_or(AddressSpaceError::InvalidHandle)
    }

    /// Drops the page table of `handle` and frees its slot.
    pub fn destroy(&mut self, handle: AsHandle) -> Result<AddressSpace, AddressSpaceError> {
        self.slots
            .get_mut(handle.slot())
            .and_then(Option::take)
            .ok_or(AddressSpaceError::InvalidHandle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn freed_slot_is_handed_out_again() {
        let mut spaces = AddressSpaceManager::new();
        let a = spaces.create();
        let b = spaces.create();
        assert_ne!(a, b);
        assert!(spaces.destroy(a).is_ok());
        assert_eq!(spaces.get(a).err(), Some(AddressSpaceError::InvalidHandle));
        assert_eq!(spaces.destroy(a).err(), Some(AddressSpaceError::InvalidHandle));
        assert_eq!(spaces.create(), a);
        assert!(spaces.get_mut(b).is_ok());
    }

    #[test]
    fn spaces_have_independent_tables() {
        let mut spaces = AddressSpaceManager::new();
        let a = spaces.create();
        let b = spaces.create();
        spaces.get_mut(a).expect("a").page_table_mut().build_leaf_table(0x4000_0000).expect("build");
        assert!(spaces.get(a).expect("a").page_table().leaf_table_present(0x4000_0000));
        assert!(!spaces.get(b).expect("b").page_table().leaf_table_present(0x4000_0000));
    }
}
