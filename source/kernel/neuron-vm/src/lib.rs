// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: NEURON virtual-memory fault resolution
//! OWNERS: @kernel-mm-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests per module, proptest suite (vm::tests_prop), host integration tests
//! PUBLIC API: FaultEngine, CpuFaultState, ExecutionContext, SharedPolicy, min_faults, hal::*
//! DEPENDS_ON: hal traits (page tables, frames, page file, TLB); alloc
//! INVARIANTS: |working set| <= max size; a page is mapped iff it has a working-set entry
//!
//! The crate turns a page-fault trap into one of three outcomes: a newly
//! resident page, termination of the faulting context, or a [`FatalFault`]
//! report that the kernel prints before halting. Everything outside the
//! fault path (frame allocation, page-table edits, the page file, TLB
//! maintenance) is reached through the traits in [`hal`], so the same code
//! runs inside the kernel and on the host against [`hal::sim::SimMachine`].

#![cfg_attr(not(test), no_std)]
#![cfg_attr(not(test), forbid(clippy::unwrap_used))]

extern crate alloc;

#[macro_use]
pub mod diag;

pub mod config;
pub mod fault;
pub mod hal;
pub mod mm;
pub mod types;
pub mod vm;

pub use config::{MemoryLayout, DEFAULT_MAX_WORKING_SET};
pub use fault::{
    CpuFaultState, FatalFault, FatalKind, FaultEngine, FaultOutcome, FaultLoopGuard, Privilege,
    TerminationReason, TrapInfo,
};
pub use types::{ContextId, CpuId, FrameNumber};
pub use vm::context::{ExecutionContext, FaultCounters, StackRegion};
pub use vm::optimal::{min_faults, min_faults_indexed};
pub use vm::policy::{LruKind, PolicySettings, ReplacementPolicy, SharedPolicy};
pub use vm::working_set::{WorkingSet, WorkingSetEntry};
