// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Host machine model implementing every fault-path collaborator
//! OWNERS: @kernel-mm-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! PUBLIC API: SimMachine (new/create_space/touch/write_word/read_word/mark_user_heap/seed_page_file)
//! DEPENDS_ON: mm::AddressSpaceManager, mm::PageTable
//! INVARIANTS: A frame is either on the free list or installed exactly once; page file bounded by capacity
//!
//! Each frame carries a single `u64` word standing in for its 4 KiB of
//! contents, which is enough to observe page-in and write-back.

extern crate alloc;

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use super::{BackingStore, FrameAllocator, FrameError, NotPresent, PageTableOps, StoreError, Tlb};
use crate::mm::{AddressSpaceManager, AsHandle, MapError, PageFlags};
use crate::types::{ContextId, FrameNumber};

struct FramePool {
    words: Vec<u64>,
    free: Vec<FrameNumber>,
}

impl FramePool {
    fn new(frames: usize) -> Self {
        // Hand out low frame numbers first.
        let free = (0..frames).rev().map(FrameNumber::from_index).collect();
        Self { words: alloc::vec![0; frames], free }
    }
}

/// Simulated machine: address spaces, frames, page file and TLB.
pub struct SimMachine {
    spaces: AddressSpaceManager,
    frames: FramePool,
    page_file: BTreeMap<(ContextId, usize), u64>,
    page_file_capacity: usize,
    tlb_flushes: u64,
    page_file_reads: u64,
    page_file_writes: u64,
}

impl SimMachine {
    /// Creates a machine with `frames` physical frames and room for
    /// `page_file_capacity` pages in the page file.
    pub fn new(frames: usize, page_file_capacity: usize) -> Self {
        Self {
            spaces: AddressSpaceManager::new(),
            frames: FramePool::new(frames),
            page_file: BTreeMap::new(),
            page_file_capacity,
            tlb_flushes: 0,
            page_file_reads: 0,
            page_file_writes: 0,
        }
    }

    pub fn create_space(&mut self) -> AsHandle {
        self.spaces.create()
    }

    /// Drops the page tables of `space` once its context is torn down.
    ///
    /// Refuses while frames are still installed, since they would leak.
    pub fn destroy_space(&mut self, space: AsHandle) -> Result<(), MapError> {
        if !self.mapped_pages(space).is_empty() {
            return Err(MapError::Overlap);
        }
        self.spaces.destroy(space).map(|_| ()).map_err(|_| MapError::OutOfRange)
    }

    pub fn free_frames(&self) -> usize {
        self.frames.free.len()
    }

    pub fn tlb_flushes(&self) -> u64 {
        self.tlb_flushes
    }

    /// Successful page-file reads and writes so far.
    pub fn page_file_traffic(&self) -> (u64, u64) {
        (self.page_file_reads, self.page_file_writes)
    }

    pub fn page_file_len(&self) -> usize {
        self.page_file.len()
    }

    pub fn page_file_word(&self, owner: ContextId, va: usize) -> Option<u64> {
        self.page_file.get(&(owner, va)).copied()
    }

    /// Stores `word` as the saved contents of `va`, as a loader would.
    pub fn seed_page_file(&mut self, owner: ContextId, va: usize, word: u64) -> Result<(), StoreError> {
        if !self.page_file.contains_key(&(owner, va)) && self.page_file.len() >= self.page_file_capacity {
            return Err(StoreError::Full);
        }
        self.page_file.insert((owner, va), word);
        Ok(())
    }

    /// Marks `va` as part of a live user-heap allocation.
    pub fn mark_user_heap(&mut self, space: AsHandle, va: usize) -> Result<(), MapError> {
        let table = self.table_mut(space)?;
        table.build_leaf_table(va)?;
        table.update_flags(va, PageFlags::UHPAGE, PageFlags::empty())
    }

    /// Simulates an access by the running context.
    ///
    /// Returns `false` when the access would trap (page not present, or a
    /// write to a read-only page). A successful access sets USED, and a
    /// write additionally sets MODIFIED.
    pub fn touch(&mut self, space: AsHandle, va: usize, write: bool) -> bool {
        let Ok(table) = self.table_mut(space) else {
            return false;
        };
        let Some(flags) = table.flags(va) else {
            return false;
        };
        if !flags.contains(PageFlags::PRESENT | PageFlags::MAPPED) {
            return false;
        }
        if write && !flags.contains(PageFlags::WRITEABLE) {
            return false;
        }
        let mut set = PageFlags::USED;
        if write {
            set |= PageFlags::MODIFIED;
        }
        table.update_flags(va, set, PageFlags::empty()).is_ok()
    }

    /// Writes `word` into the page at `va` through the MMU.
    pub fn write_word(&mut self, space: AsHandle, va: usize, word: u64) -> bool {
        if !self.touch(space, va, true) {
            return false;
        }
        match self.frame_at(space, va) {
            Some(frame) => {
                self.frames.words[frame.index()] = word;
                true
            }
            None => false,
        }
    }

    /// Reads the word stored in the page at `va`, if it is accessible.
    pub fn read_word(&mut self, space: AsHandle, va: usize) -> Option<u64> {
        if !self.touch(space, va, false) {
            return None;
        }
        let frame = self.frame_at(space, va)?;
        Some(self.frames.words[frame.index()])
    }

    /// Every `(va, frame)` with an installed frame in `space`, in address order.
    pub fn mapped_pages(&self, space: AsHandle) -> Vec<(usize, FrameNumber)> {
        self.spaces
            .get(space)
            .map(|space| {
                space
                    .page_table()
                    .mapped_pages()
                    .into_iter()
                    .map(|(va, ppn)| (va, FrameNumber::from_index(ppn)))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn table_mut(&mut self, space: AsHandle) -> Result<&mut crate::mm::PageTable, MapError> {
        self.spaces
            .get_mut(space)
            .map(|space| space.page_table_mut())
            .map_err(|_| MapError::OutOfRange)
    }
}

impl PageTableOps for SimMachine {
    fn table_present(&self, space: AsHandle, va: usize) -> bool {
        self.spaces.get(space).is_ok_and(|space| space.page_table().leaf_table_present(va))
    }

    fn build_table(&mut self, space: AsHandle, va: usize) -> Result<(), MapError> {
        self.table_mut(space)?.build_leaf_table(va)
    }

    fn permissions(&self, space: AsHandle, va: usize) -> Result<PageFlags, NotPresent> {
        self.spaces
            .get(space)
            .ok()
            .and_then(|space| space.page_table().flags(va))
            .ok_or(NotPresent)
    }

    fn update_permissions(
        &mut self,
        space: AsHandle,
        va: usize,
        set: PageFlags,
        clear: PageFlags,
    ) -> Result<(), MapError> {
        self.table_mut(space)?.update_flags(va, set, clear)
    }

    fn map(
        &mut self,
        space: AsHandle,
        frame: FrameNumber,
        va: usize,
        flags: PageFlags,
    ) -> Result<(), MapError> {
        self.table_mut(space)?.map(va, frame.ppn(), flags)
    }

    fn unmap(&mut self, space: AsHandle, va: usize) -> Option<FrameNumber> {
        self.table_mut(space).ok()?.unmap(va).map(FrameNumber::from_index)
    }

    fn frame_at(&self, space: AsHandle, va: usize) -> Option<FrameNumber> {
        self.spaces.get(space).ok()?.page_table().frame(va).map(FrameNumber::from_index)
    }

    fn installed_pages(&self, space: AsHandle) -> Vec<usize> {
        self.mapped_pages(space).into_iter().map(|(va, _)| va).collect()
    }
}

impl FrameAllocator for SimMachine {
    fn allocate(&mut self) -> Result<FrameNumber, FrameError> {
        let frame = self.frames.free.pop().ok_or(FrameError::OutOfMemory)?;
        self.frames.words[frame.index()] = 0;
        Ok(frame)
    }

    fn free(&mut self, frame: FrameNumber) {
        debug_assert!(!self.frames.free.contains(&frame), "double free of {frame:?}");
        self.frames.free.push(frame);
    }
}

impl BackingStore for SimMachine {
    fn read(&mut self, owner: ContextId, va: usize, frame: FrameNumber) -> Result<(), StoreError> {
        let word = *self.page_file.get(&(owner, va)).ok_or(StoreError::NotInStore)?;
        self.frames.words[frame.index()] = word;
        self.page_file_reads += 1;
        Ok(())
    }

    fn write(
        &mut self,
        owner: ContextId,
        va: usize,
        frame: FrameNumber,
    ) -> Result<(), StoreError> {
        let word = self.frames.words[frame.index()];
        self.seed_page_file(owner, va, word)?;
        self.page_file_writes += 1;
        Ok(())
    }
}

impl Tlb for SimMachine {
    fn flush_all(&mut self) {
        self.tlb_flushes += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VA: usize = 0x4000_0000;

    #[test]
    fn frames_are_recycled() {
        let mut sim = SimMachine::new(2, 0);
        let a = sim.allocate().expect("frame");
        let b = sim.allocate().expect("frame");
        assert_eq!(sim.allocate(), Err(FrameError::OutOfMemory));
        sim.free(a);
        assert_eq!(sim.allocate(), Ok(a));
        assert_ne!(a, b);
    }

    #[test]
    fn touch_sets_used_and_modified() {
        let mut sim = SimMachine::new(4, 4);
        let space = sim.create_space();
        assert!(!sim.touch(space, VA, false));
        let frame = sim.allocate().expect("frame");
        sim.map(space, frame, VA, PageFlags::USER_RW).expect("map");
        assert!(sim.touch(space, VA, false));
        let flags = sim.permissions(space, VA).expect("present");
        assert!(flags.contains(PageFlags::USED));
        assert!(!flags.contains(PageFlags::MODIFIED));
        assert!(sim.write_word(space, VA, 0xabcd));
        assert!(sim.permissions(space, VA).expect("present").contains(PageFlags::MODIFIED));
        assert_eq!(sim.read_word(space, VA), Some(0xabcd));
    }

    #[test]
    fn page_file_round_trips_and_fills_up() {
        let mut sim = SimMachine::new(2, 1);
        let owner = ContextId::from_raw(1);
        let frame = sim.allocate().expect("frame");
        assert_eq!(sim.read(owner, VA, frame), Err(StoreError::NotInStore));
        sim.frames.words[frame.index()] = 42;
        sim.write(owner, VA, frame).expect("write");
        // Rewriting an existing page never needs a new slot.
        sim.write(owner, VA, frame).expect("rewrite");
        assert_eq!(sim.write(owner, VA + 0x1000, frame), Err(StoreError::Full));
        let other = sim.allocate().expect("frame");
        sim.read(owner, VA, other).expect("read");
        assert_eq!(sim.frames.words[other.index()], 42);
        assert_eq!(sim.page_file_traffic(), (1, 2));
    }

    #[test]
    fn heap_marker_creates_entry_without_frame() {
        let mut sim = SimMachine::new(1, 1);
        let space = sim.create_space();
        assert_eq!(sim.permissions(space, VA), Err(NotPresent));
        sim.mark_user_heap(space, VA).expect("mark");
        assert_eq!(sim.permissions(space, VA), Ok(PageFlags::UHPAGE));
        assert_eq!(sim.frame_at(space, VA), None);
        assert!(sim.mapped_pages(space).is_empty());
    }
}
