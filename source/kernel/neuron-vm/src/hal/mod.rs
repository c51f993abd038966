// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Collaborator traits consumed by the fault path.
//!
//! The kernel wires these to its real page tables, frame allocator, page
//! file and TLB; [`sim::SimMachine`] implements them on the host.

pub mod sim;

extern crate alloc;

use alloc::vec::Vec;

use crate::mm::{AsHandle, MapError, PageFlags};
use crate::types::{ContextId, FrameNumber};

/// The page exists in no table entry at all.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NotPresent;

/// Frame allocation failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameError {
    /// No free frame is left.
    OutOfMemory,
}

/// Page-file failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreError {
    /// The page was never written to the page file.
    NotInStore,
    /// The page file has no room for another page.
    Full,
}

/// Page-table access for one address space at a time.
pub trait PageTableOps {
    /// Returns whether the last-level table covering `va` exists.
    fn table_present(&self, space: AsHandle, va: usize) -> bool;
    /// Creates the missing table covering `va`; maps nothing.
    fn build_table(&mut self, space: AsHandle, va: usize) -> Result<(), MapError>;
    /// Reads the permission bits of the entry at `va`.
    fn permissions(&self, space: AsHandle, va: usize) -> Result<PageFlags, NotPresent>;
    /// Sets then clears permission bits of the entry at `va`.
    fn update_permissions(
        &mut self,
        space: AsHandle,
        va: usize,
        set: PageFlags,
        clear: PageFlags,
    ) -> Result<(), MapError>;
    /// Installs `frame` at `va`.
    fn map(
        &mut self,
        space: AsHandle,
        frame: FrameNumber,
        va: usize,
        flags: PageFlags,
    ) -> Result<(), MapError>;
    /// Removes the frame installed at `va` and returns it; the frame is not freed.
    fn unmap(&mut self, space: AsHandle, va: usize) -> Option<FrameNumber>;
    /// Returns the frame installed at `va`, valid or not.
    fn frame_at(&self, space: AsHandle, va: usize) -> Option<FrameNumber>;
    /// Every page of `space` with a frame installed, in address order.
    fn installed_pages(&self, space: AsHandle) -> Vec<usize>;
}

/// Physical frame provider.
pub trait FrameAllocator {
    fn allocate(&mut self) -> Result<FrameNumber, FrameError>;
    fn free(&mut self, frame: FrameNumber);
}

/// Page file holding the contents of non-resident pages.
pub trait BackingStore {
    /// Loads the saved contents of `va` into `frame`.
    fn read(&mut self, owner: ContextId, va: usize, frame: FrameNumber) -> Result<(), StoreError>;
    /// Saves the contents of `frame` as the page `va`.
    fn write(&mut self, owner: ContextId, va: usize, frame: FrameNumber)
        -> Result<(), StoreError>;
}

/// TLB management operations.
pub trait Tlb {
    /// Flushes the entire translation cache.
    fn flush_all(&mut self);
}

/// Everything the fault path needs from the machine.
pub trait VmHal: PageTableOps + FrameAllocator + BackingStore + Tlb {}

impl<T: PageTableOps + FrameAllocator + BackingStore + Tlb> VmHal for T {}
