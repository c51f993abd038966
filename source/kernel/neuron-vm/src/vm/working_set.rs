// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Bounded, ordered set of resident pages of one execution context
//! OWNERS: @kernel-mm-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests below + vm::tests_prop
//! PUBLIC API: WorkingSet (insert/remove/cursor/iter/pages/verify), WorkingSetEntry
//! DEPENDS_ON: hal::PageTableOps (verify only)
//! INVARIANTS:
//!   - len() <= capacity()
//!   - virtual addresses are unique and page aligned
//!   - the cursor, when set, indexes a live entry
//!
//! List order is policy significant: CLOCK walks it as a ring, the other
//! strategies scan it from the head. New entries always go to the tail.

extern crate alloc;

use alloc::vec::Vec;

use crate::hal::PageTableOps;
use crate::mm::AsHandle;
use crate::types::{is_page_aligned, FrameNumber};

/// One resident page.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorkingSetEntry {
    va: usize,
    frame: FrameNumber,
    time_stamp: u32,
}

impl WorkingSetEntry {
    #[inline]
    pub fn va(&self) -> usize {
        self.va
    }

    #[inline]
    pub fn frame(&self) -> FrameNumber {
        self.frame
    }

    /// Aging stamp consumed by the LRU approximation; higher is more recent.
    #[inline]
    pub fn time_stamp(&self) -> u32 {
        self.time_stamp
    }
}

/// Reasons an insertion is refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InsertError {
    /// The set is at capacity.
    Full,
    /// The page already has an entry.
    Duplicate,
    /// The address is not page aligned.
    Unaligned,
}

/// A mapping/entry mismatch found by [`WorkingSet::verify`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Inconsistency {
    /// An entry whose page has no frame installed.
    Unmapped { va: usize },
    /// An entry recording a different frame than the one installed.
    FrameMismatch { va: usize, recorded: FrameNumber, installed: FrameNumber },
    /// A frame installed at a page that has no entry.
    Untracked { va: usize },
}

#[derive(Debug)]
pub struct WorkingSet {
    entries: Vec<WorkingSetEntry>,
    capacity: usize,
    cursor: Option<usize>,
}

impl WorkingSet {
    pub fn new(capacity: usize) -> Self {
        Self { entries: Vec::with_capacity(capacity), capacity, cursor: None }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    pub fn get(&self, index: usize) -> Option<&WorkingSetEntry> {
        self.entries.get(index)
    }

    pub fn position(&self, va: usize) -> Option<usize> {
        self.entries.iter().position(|entry| entry.va == va)
    }

    pub fn contains(&self, va: usize) -> bool {
        self.position(va).is_some()
    }

    /// Entries in list order.
    pub fn iter(&self) -> impl Iterator<Item = &WorkingSetEntry> + '_ {
        self.entries.iter()
    }

    /// Resident page addresses in list order.
    pub fn pages(&self) -> Vec<usize> {
        self.entries.iter().map(WorkingSetEntry::va).collect()
    }

    /// Appends `va` at the tail and returns its index.
    ///
    /// When the append fills the set the cursor is parked on the head,
    /// otherwise it is left unset.
    pub fn insert(&mut self, va: usize, frame: FrameNumber) -> Result<usize, InsertError> {
        if !is_page_aligned(va) {
            return Err(InsertError::Unaligned);
        }
        if self.is_full() {
            return Err(InsertError::Full);
        }
        if self.contains(va) {
            return Err(InsertError::Duplicate);
        }
        self.entries.push(WorkingSetEntry { va, frame, time_stamp: 0 });
        self.cursor = if self.is_full() { Some(0) } else { None };
        Ok(self.entries.len() - 1)
    }

    /// Removes the entry at `index`.
    ///
    /// A cursor on the removed entry is reset; a cursor past it shifts down
    /// so it keeps naming the same member.
    pub fn remove(&mut self, index: usize) -> Option<WorkingSetEntry> {
        if index >= self.entries.len() {
            return None;
        }
        let entry = self.entries.remove(index);
        self.cursor = match self.cursor {
            Some(cursor) if cursor == index => None,
            Some(cursor) if cursor > index => Some(cursor - 1),
            other => other,
        };
        Some(entry)
    }

    /// Drops every entry and the cursor.
    pub(crate) fn clear(&mut self) -> Vec<WorkingSetEntry> {
        self.cursor = None;
        core::mem::take(&mut self.entries)
    }

    #[inline]
    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    /// Moves the cursor one entry forward, wrapping to the head.
    ///
    /// An unset cursor starts at the head.
    pub fn advance_cursor(&mut self) -> Option<usize> {
        self.cursor = match (self.cursor, self.entries.len()) {
            (_, 0) => None,
            (None, _) => Some(0),
            (Some(cursor), len) => Some((cursor + 1) % len),
        };
        self.cursor
    }

    pub fn reset_cursor(&mut self) {
        self.cursor = None;
    }

    /// Points the cursor at `index`, or clears it if `index` is out of range.
    pub(crate) fn set_cursor(&mut self, index: usize) {
        self.cursor = (index < self.entries.len()).then_some(index);
    }

    pub(crate) fn set_time_stamp(&mut self, index: usize, stamp: u32) {
        if let Some(entry) = self.entries.get_mut(index) {
            entry.time_stamp = stamp;
        }
    }

    /// Checks that exactly the pages in this set have frames installed in
    /// `space`, each with the frame its entry records.
    pub fn verify<P: PageTableOps + ?Sized>(
        &self,
        space: AsHandle,
        tables: &P,
    ) -> Result<(), Inconsistency> {
        for entry in &self.entries {
            match tables.frame_at(space, entry.va) {
                None => return Err(Inconsistency::Unmapped { va: entry.va }),
                Some(installed) if installed != entry.frame => {
                    return Err(Inconsistency::FrameMismatch {
                        va: entry.va,
                        recorded: entry.frame,
                        installed,
                    })
                }
                Some(_) => {}
            }
        }
        match tables.installed_pages(space).into_iter().find(|va| !self.contains(*va)) {
            Some(va) => Err(Inconsistency::Untracked { va }),
            None => Ok(()),
        }
    }
}
