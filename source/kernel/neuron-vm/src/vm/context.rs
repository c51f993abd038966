// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Per-context virtual-memory state mutated by the fault path
//! OWNERS: @kernel-mm-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! PUBLIC API: ExecutionContext, FaultCounters, StackRegion, ReferenceStream
//! DEPENDS_ON: vm::working_set, hal::{PageTableOps, FrameAllocator}
//! INVARIANTS: Only the fault handler running for this context mutates it
//!
//! The process layer creates an `ExecutionContext` next to each address
//! space and calls [`ExecutionContext::teardown`] when the process exits.

extern crate alloc;

use alloc::vec::Vec;

use crate::hal::{FrameAllocator, PageTableOps};
use crate::mm::{AsHandle, PAGE_SIZE};
use crate::types::ContextId;
use crate::vm::working_set::WorkingSet;

/// Bounds of a stack whose lowest page is an unmapped guard page.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StackRegion {
    pub bottom: usize,
    pub top: usize,
}

impl StackRegion {
    pub const fn new(bottom: usize, top: usize) -> Self {
        Self { bottom, top }
    }

    /// Returns whether `va` hits the guard page at the bottom of the stack.
    #[inline]
    pub const fn in_guard(&self, va: usize) -> bool {
        va >= self.bottom && va < self.bottom + PAGE_SIZE
    }
}

/// Diagnostic fault counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FaultCounters {
    pub table_faults: u64,
    pub page_faults: u64,
}

/// Append-only log of page addresses resolved while tracing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReferenceStream {
    pages: Vec<usize>,
}

impl ReferenceStream {
    pub(crate) fn record(&mut self, va: usize) {
        self.pages.push(va);
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.pages
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    fn clear(&mut self) {
        self.pages.clear();
    }
}

/// One isolated address space as seen by the fault path.
#[derive(Debug)]
pub struct ExecutionContext {
    id: ContextId,
    space: AsHandle,
    working_set: WorkingSet,
    counters: FaultCounters,
    references: ReferenceStream,
    kernel_stack: Option<StackRegion>,
}

impl ExecutionContext {
    /// Creates a context whose working set holds at most `max_working_set` pages.
    pub fn new(id: ContextId, space: AsHandle, max_working_set: usize) -> Self {
        Self {
            id,
            space,
            working_set: WorkingSet::new(max_working_set),
            counters: FaultCounters::default(),
            references: ReferenceStream::default(),
            kernel_stack: None,
        }
    }

    /// Attaches the privileged stack used while this context runs in the kernel.
    pub fn with_kernel_stack(mut self, stack: StackRegion) -> Self {
        self.kernel_stack = Some(stack);
        self
    }

    #[inline]
    pub fn id(&self) -> ContextId {
        self.id
    }

    #[inline]
    pub fn space(&self) -> AsHandle {
        self.space
    }

    #[inline]
    pub fn kernel_stack(&self) -> Option<StackRegion> {
        self.kernel_stack
    }

    pub fn working_set(&self) -> &WorkingSet {
        &self.working_set
    }

    pub(crate) fn working_set_mut(&mut self) -> &mut WorkingSet {
        &mut self.working_set
    }

    pub fn counters(&self) -> FaultCounters {
        self.counters
    }

    pub(crate) fn counters_mut(&mut self) -> &mut FaultCounters {
        &mut self.counters
    }

    pub fn reference_stream(&self) -> &ReferenceStream {
        &self.references
    }

    pub(crate) fn reference_stream_mut(&mut self) -> &mut ReferenceStream {
        &mut self.references
    }

    /// Releases every resident page and forgets the recorded trace.
    ///
    /// Returns the number of frames handed back to the allocator. Dirty
    /// pages are dropped: the context is gone, so is its page file view.
    pub fn teardown<H>(&mut self, hal: &mut H) -> usize
    where
        H: PageTableOps + FrameAllocator + ?Sized,
    {
        let mut freed = 0;
        for entry in self.working_set.clear() {
            if let Some(frame) = hal.unmap(self.space, entry.va()) {
                debug_assert_eq!(frame, entry.frame());
                hal.free(frame);
                freed += 1;
            }
        }
        self.references.clear();
        log_debug!(target: "vm", "VM: {} teardown freed {} frames", self.id, freed);
        freed
    }
}
