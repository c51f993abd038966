// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Newtypes shared by the fault path
//! OWNERS: @kernel-team
//! PUBLIC API: ContextId, CpuId, FrameNumber, page_floor(), is_page_aligned()
//! DEPENDS_ON: mm::PAGE_SIZE
//! INVARIANTS: Frame numbers index the frame arena; never raw pointers

use core::fmt;

use crate::mm::PAGE_SIZE;

/// Identifier of an execution context (one isolated address space).
///
/// **Ownership**: created by the process layer; the fault path only compares
/// and reports it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct ContextId(u32);

impl ContextId {
    /// Creates an identifier from a raw value.
    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw identifier value.
    #[inline]
    pub const fn as_raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx:{}", self.0)
    }
}

/// Logical CPU identifier.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct CpuId(u16);

impl CpuId {
    /// The boot CPU.
    pub const BOOT: Self = Self(0);

    #[inline]
    pub const fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn as_raw(self) -> u16 {
        self.0
    }
}

impl fmt::Display for CpuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cpu{}", self.0)
    }
}

/// Index of a physical frame in the frame arena.
///
/// Working-set entries hold frame numbers rather than pointers, so evicting
/// a page is a table update and never a lifetime hazard.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct FrameNumber(usize);

impl FrameNumber {
    #[inline]
    pub const fn from_index(index: usize) -> Self {
        Self(index)
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }

    /// Physical page number used when installing this frame in a PTE.
    #[inline]
    pub const fn ppn(self) -> usize {
        self.0
    }
}

/// Rounds `addr` down to the start of its page.
#[inline]
pub const fn page_floor(addr: usize) -> usize {
    addr & !(PAGE_SIZE - 1)
}

/// Returns whether `addr` is page aligned.
#[inline]
pub const fn is_page_aligned(addr: usize) -> bool {
    addr % PAGE_SIZE == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_floor_rounds_down() {
        assert_eq!(page_floor(0x1fff), 0x1000);
        assert_eq!(page_floor(0x2000), 0x2000);
        assert!(is_page_aligned(page_floor(0xdead_beef)));
    }

    #[test]
    fn context_display_is_stable() {
        use alloc::format;
        assert_eq!(format!("{}", ContextId::from_raw(7)), "ctx:7");
        assert_eq!(format!("{}", CpuId::from_raw(2)), "cpu2");
    }
}
