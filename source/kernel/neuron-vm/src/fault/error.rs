// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Fault dispositions that do not end in a resident page.
//!
//! A [`TerminationReason`] ends only the faulting context. A [`FatalKind`]
//! means the kernel cannot continue; the engine wraps it in a
//! [`FatalFault`] carrying the diagnostics the panic path prints.

use thiserror::Error;

use crate::hal::{FrameError, StoreError};
use crate::mm::MapError;
use crate::types::{ContextId, CpuId};
use crate::vm::policy::ReplacementPolicy;
use crate::vm::working_set::InsertError;

/// Guest bugs: the context is terminated, the kernel carries on.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum TerminationReason {
    #[error("user pointer beyond the user limit")]
    KernelAddress,
    #[error("page is already present or writable")]
    AlreadyMapped,
    #[error("heap page without the user-heap marker")]
    UnmarkedHeapPage,
    #[error("page is neither in the page file nor in a growth region")]
    UnbackedPage,
}

/// Conditions that stop the kernel.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum FatalKind {
    #[error("same address faulted three times in a row")]
    FaultLoop,
    #[error("kernel stack overflow into its guard page")]
    KernelStackGuard,
    #[error("scheduler stack of {0} overflowed into its guard page")]
    SchedulerStackGuard(CpuId),
    #[error("kernel heap overflow")]
    KernelHeapOverflow,
    #[error("user stack underflow")]
    UserStackUnderflow,
    #[error("no current context for the fault")]
    NoCurrentContext,
    #[error("access violation on a present page")]
    AccessViolation,
    #[error("out of physical frames")]
    OutOfFrames,
    #[error("page file full during mandatory write-back")]
    StoreExhausted,
    #[error("no replacement strategy for {0}")]
    UnimplementedStrategy(ReplacementPolicy),
    #[error("replacement found no victim")]
    NoVictim,
    #[error("working-set entry has no page-table entry")]
    StaleEntry,
    #[error("working-set insert refused: {0:?}")]
    WorkingSet(InsertError),
    #[error("mapping failed: {0:?}")]
    Mapping(MapError),
    #[error("page-table construction failed: {0:?}")]
    PageTable(MapError),
}

impl From<FrameError> for FatalKind {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::OutOfMemory => Self::OutOfFrames,
        }
    }
}

impl From<StoreError> for FatalKind {
    fn from(_: StoreError) -> Self {
        Self::StoreExhausted
    }
}

impl From<InsertError> for FatalKind {
    fn from(err: InsertError) -> Self {
        Self::WorkingSet(err)
    }
}

/// Report printed before the kernel halts.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("fatal fault on {cpu}: {kind} (va={va:#x} ip={ip:#x} context={context:?})")]
pub struct FatalFault {
    pub kind: FatalKind,
    pub va: usize,
    pub ip: usize,
    pub context: Option<ContextId>,
    pub cpu: CpuId,
}

/// Internal result of a resolution step that did not place a page.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Abort {
    Fatal(FatalKind),
    Terminate(TerminationReason),
}

impl From<FatalKind> for Abort {
    fn from(kind: FatalKind) -> Self {
        Self::Fatal(kind)
    }
}

impl From<FrameError> for Abort {
    fn from(err: FrameError) -> Self {
        Self::Fatal(err.into())
    }
}

impl From<StoreError> for Abort {
    fn from(err: StoreError) -> Self {
        Self::Fatal(err.into())
    }
}

impl From<InsertError> for Abort {
    fn from(err: InsertError) -> Self {
        Self::Fatal(err.into())
    }
}

impl From<TerminationReason> for Abort {
    fn from(reason: TerminationReason) -> Self {
        Self::Terminate(reason)
    }
}
