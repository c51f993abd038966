// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Static memory layout and sizing knobs for the fault path
//! OWNERS: @kernel-mm-team
//! PUBLIC API: MemoryLayout (DEFAULT, with_*), DEFAULT_MAX_WORKING_SET
//! DEPENDS_ON: mm::PAGE_SIZE
//! INVARIANTS: Regions are half-open [start, end); stack guard sits directly above the user stack
//!
//! The default layout places every user region in the Sv39 lower half and
//! reserves the last page of the upper half as the kernel-heap ceiling.

use crate::mm::PAGE_SIZE;

/// Working-set capacity used when the process layer does not pick one.
pub const DEFAULT_MAX_WORKING_SET: usize = 32;

const USER_TOP: usize = 1 << 38;
const USER_STACK_TOP: usize = USER_TOP - PAGE_SIZE;
const USER_STACK_PAGES: usize = 1024;
const USER_HEAP_START: usize = 0x8000_0000;
const USER_HEAP_MAX: usize = 0xA000_0000;
const KERNEL_HEAP_MAX: usize = usize::MAX & !(PAGE_SIZE - 1);

/// Address-space regions consulted while classifying and resolving faults.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryLayout {
    /// First address that user pointers may not reference.
    pub user_limit: usize,
    /// End of the user-stack guard region.
    pub user_top: usize,
    /// Top of the user stack (exclusive); `[user_stack_top, user_top)` is the underflow guard.
    pub user_stack_top: usize,
    /// Lowest address the user stack may grow down to.
    pub user_stack_bottom: usize,
    /// Start of the user heap.
    pub user_heap_start: usize,
    /// End of the user heap (exclusive).
    pub user_heap_max: usize,
    /// Kernel faults at or above this address are heap overflows.
    pub kernel_heap_max: usize,
}

impl Default for MemoryLayout {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl MemoryLayout {
    pub const DEFAULT: Self = Self {
        user_limit: USER_TOP,
        user_top: USER_TOP,
        user_stack_top: USER_STACK_TOP,
        user_stack_bottom: USER_STACK_TOP - USER_STACK_PAGES * PAGE_SIZE,
        user_heap_start: USER_HEAP_START,
        user_heap_max: USER_HEAP_MAX,
        kernel_heap_max: KERNEL_HEAP_MAX,
    };

    /// Replaces the user-stack bounds; the guard region keeps ending at `user_top`.
    pub const fn with_user_stack(mut self, bottom: usize, top: usize) -> Self {
        self.user_stack_bottom = bottom;
        self.user_stack_top = top;
        self
    }

    pub const fn with_user_heap(mut self, start: usize, max: usize) -> Self {
        self.user_heap_start = start;
        self.user_heap_max = max;
        self
    }

    pub const fn with_user_limit(mut self, limit: usize) -> Self {
        self.user_limit = limit;
        self
    }

    pub const fn with_kernel_heap_max(mut self, max: usize) -> Self {
        self.kernel_heap_max = max;
        self
    }

    #[inline]
    pub const fn in_user_stack(&self, va: usize) -> bool {
        va >= self.user_stack_bottom && va < self.user_stack_top
    }

    #[inline]
    pub const fn in_user_heap(&self, va: usize) -> bool {
        va >= self.user_heap_start && va < self.user_heap_max
    }

    /// Returns whether `va` lies in the guard region above the user stack.
    #[inline]
    pub const fn in_user_stack_guard(&self, va: usize) -> bool {
        va >= self.user_stack_top && va < self.user_top
    }

    /// Regions where a page missing from the page file is a fresh zero page.
    #[inline]
    pub const fn in_growth_region(&self, va: usize) -> bool {
        self.in_user_stack(va) || self.in_user_heap(va)
    }
}
