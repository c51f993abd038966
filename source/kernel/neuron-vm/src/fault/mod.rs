// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Page-fault classification, validation and dispatch
//! OWNERS: @kernel-mm-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests below + tests/fault_paths.rs
//! PUBLIC API: FaultEngine (handle_fault/resolve_table_fault/resolve_page_fault), TrapInfo, FaultOutcome
//! DEPENDS_ON: hal::VmHal, vm::replace, fault::guard
//! INVARIANTS:
//!   - Validation rejects a fault before any frame work starts
//!   - The TLB is flushed once at the end of every resolved fault
//!   - Policy settings are read once per fault
//!
//! Classification order for one trap:
//!   1. fault-loop guard (per CPU)
//!   2. stack guard pages and the kernel-heap ceiling, per privilege level
//!   3. user pointers beyond the user limit terminate the context
//!   4. missing leaf table: build it and return
//!   5. remaining user pointer checks: bad pointers terminate the context
//!   6. a page that is still present is an access violation
//!   7. otherwise a real page fault, resolved by the active strategy

pub mod error;
pub mod guard;

pub use error::{FatalFault, FatalKind, TerminationReason};
pub use guard::{CpuFaultState, FaultLoopGuard, FAULT_LOOP_LIMIT};

use error::Abort;

use crate::config::MemoryLayout;
use crate::hal::VmHal;
use crate::mm::PageFlags;
use crate::types::page_floor;
use crate::vm::context::ExecutionContext;
use crate::vm::policy::{ReplacementPolicy, SharedPolicy};
use crate::vm::replace::{self, trace, Placed};

/// Privilege level the trap was taken from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Privilege {
    User,
    Kernel,
}

/// What the trap entry captured.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrapInfo {
    /// Faulting virtual address, not necessarily page aligned.
    pub va: usize,
    /// Instruction pointer of the faulting instruction.
    pub ip: usize,
    pub privilege: Privilege,
}

impl TrapInfo {
    pub const fn user(va: usize, ip: usize) -> Self {
        Self { va, ip, privilege: Privilege::User }
    }

    pub const fn kernel(va: usize, ip: usize) -> Self {
        Self { va, ip, privilege: Privilege::Kernel }
    }
}

/// How a fault ended when the kernel can continue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultOutcome {
    /// The missing leaf table was built; the access will fault again.
    TableBuilt { va: usize },
    /// A page was made resident.
    Placed(Placed),
    /// The page was resident but invalidated for tracing; it was recorded
    /// and made valid again.
    Hit { va: usize },
    /// The context must be terminated; the kernel keeps running.
    Terminated(TerminationReason),
}

/// Fault-resolution engine shared by all CPUs.
pub struct FaultEngine {
    layout: MemoryLayout,
    policy: SharedPolicy,
}
static_assertions::assert_impl_all!(FaultEngine: Send, Sync);
static_assertions::assert_impl_all!(SharedPolicy: Send, Sync);

impl Default for FaultEngine {
    fn default() -> Self {
        Self::new(MemoryLayout::DEFAULT)
    }
}

impl FaultEngine {
    /// Creates an engine with the CLOCK policy active.
    pub const fn new(layout: MemoryLayout) -> Self {
        Self { layout, policy: SharedPolicy::new() }
    }

    pub fn layout(&self) -> &MemoryLayout {
        &self.layout
    }

    /// Replacement configuration; setters take effect from the next fault.
    pub fn policy(&self) -> &SharedPolicy {
        &self.policy
    }

    /// Entry point from the trap handler.
    ///
    /// `ctx` is the context running on this CPU, if any. An `Err` means the
    /// kernel must halt after printing the report.
    pub fn handle_fault<H: VmHal + ?Sized>(
        &self,
        cpu: &mut CpuFaultState,
        ctx: Option<&mut ExecutionContext>,
        trap: &TrapInfo,
        hal: &mut H,
    ) -> Result<FaultOutcome, FatalFault> {
        let context = ctx.as_ref().map(|ctx| ctx.id());
        let cpu_id = cpu.cpu();
        let report = |kind: FatalKind| {
            let fault = FatalFault { kind, va: trap.va, ip: trap.ip, context, cpu: cpu_id };
            log_error!(target: "fault", "FAULT: {}", fault);
            fault
        };

        if cpu.guard_mut().observe(trap.va, trap.ip, context) {
            return Err(report(FatalKind::FaultLoop));
        }
        if let Err(kind) = self.check_bounds(cpu, ctx.as_deref(), trap) {
            return Err(report(kind));
        }
        let Some(ctx) = ctx else {
            return Err(report(FatalKind::NoCurrentContext));
        };

        let va = page_floor(trap.va);
        if trap.privilege == Privilege::User && va >= self.layout.user_limit {
            return Ok(self.terminate(ctx, trap, TerminationReason::KernelAddress));
        }
        if !hal.table_present(ctx.space(), va) {
            ctx.counters_mut().table_faults += 1;
            return self.resolve_table_fault(ctx, va, hal).map_err(report);
        }

        if trap.privilege == Privilege::User {
            if let Err(reason) = self.validate_user_pointer(ctx, va, &*hal) {
                return Ok(self.terminate(ctx, trap, reason));
            }
        }

        if hal.permissions(ctx.space(), va).is_ok_and(|flags| flags.contains(PageFlags::PRESENT)) {
            return Err(report(FatalKind::AccessViolation));
        }

        ctx.counters_mut().page_faults += 1;
        match self.resolve_page_fault(ctx, va, hal).map_err(report)? {
            FaultOutcome::Terminated(reason) => Ok(self.terminate(ctx, trap, reason)),
            outcome => Ok(outcome),
        }
    }

    fn terminate(
        &self,
        ctx: &ExecutionContext,
        trap: &TrapInfo,
        reason: TerminationReason,
    ) -> FaultOutcome {
        log_warn!(
            target: "fault",
            "FAULT: terminate {} va={:#x} ip={:#x}: {}",
            ctx.id(),
            trap.va,
            trap.ip,
            reason
        );
        FaultOutcome::Terminated(reason)
    }

    /// Builds the missing leaf table covering `va`. No frame is placed.
    pub fn resolve_table_fault<H: VmHal + ?Sized>(
        &self,
        ctx: &mut ExecutionContext,
        va: usize,
        hal: &mut H,
    ) -> Result<FaultOutcome, FatalKind> {
        let va = page_floor(va);
        hal.build_table(ctx.space(), va).map_err(FatalKind::PageTable)?;
        hal.flush_all();
        log_debug!(target: "fault", "FAULT: {} table fault va={:#x}", ctx.id(), va);
        Ok(FaultOutcome::TableBuilt { va })
    }

    /// Resolves a validated page fault on `va` with the active strategy.
    ///
    /// A resident page that was invalidated for tracing is a hit: it is made
    /// valid again without any replacement.
    pub fn resolve_page_fault<H: VmHal + ?Sized>(
        &self,
        ctx: &mut ExecutionContext,
        va: usize,
        hal: &mut H,
    ) -> Result<FaultOutcome, FatalKind> {
        let va = page_floor(va);
        let settings = self.policy.settings();
        let tracing = settings.policy == ReplacementPolicy::TraceRecording;

        let outcome = if ctx.working_set().contains(va) {
            trace::revalidate(ctx, va, hal)?;
            FaultOutcome::Hit { va }
        } else {
            match replace::resolve(ctx, va, &settings, &self.layout, hal) {
                Ok(placed) => FaultOutcome::Placed(placed),
                Err(Abort::Terminate(reason)) => {
                    hal.flush_all();
                    return Ok(FaultOutcome::Terminated(reason));
                }
                Err(Abort::Fatal(kind)) => return Err(kind),
            }
        };
        if tracing {
            trace::record(ctx, va);
        }
        hal.flush_all();

        #[cfg(feature = "debug_ws_verify")]
        if let Err(violation) = ctx.working_set().verify(ctx.space(), &*hal) {
            log_error!(target: "ws", "WS-VERIFY: {} {:?}", ctx.id(), violation);
        }
        Ok(outcome)
    }

    fn check_bounds(
        &self,
        cpu: &CpuFaultState,
        ctx: Option<&ExecutionContext>,
        trap: &TrapInfo,
    ) -> Result<(), FatalKind> {
        match trap.privilege {
            Privilege::Kernel => {
                let kernel_stack = ctx.and_then(ExecutionContext::kernel_stack);
                if kernel_stack.is_some_and(|stack| stack.in_guard(trap.va)) {
                    return Err(FatalKind::KernelStackGuard);
                }
                if cpu.sched_stack().in_guard(trap.va) {
                    return Err(FatalKind::SchedulerStackGuard(cpu.cpu()));
                }
                if trap.va >= self.layout.kernel_heap_max {
                    return Err(FatalKind::KernelHeapOverflow);
                }
            }
            Privilege::User => {
                if self.layout.in_user_stack_guard(trap.va) {
                    return Err(FatalKind::UserStackUnderflow);
                }
            }
        }
        Ok(())
    }

    fn validate_user_pointer<H: VmHal + ?Sized>(
        &self,
        ctx: &ExecutionContext,
        va: usize,
        hal: &H,
    ) -> Result<(), TerminationReason> {
        let Ok(flags) = hal.permissions(ctx.space(), va) else {
            return Ok(());
        };
        if flags.intersects(PageFlags::PRESENT | PageFlags::WRITEABLE) {
            return Err(TerminationReason::AlreadyMapped);
        }
        if self.layout.in_user_heap(va) && !flags.contains(PageFlags::UHPAGE) {
            return Err(TerminationReason::UnmarkedHeapPage);
        }
        Ok(())
    }
}
