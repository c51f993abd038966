// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Trace-recording mode.
//!
//! Produces the reference stream that [`crate::min_faults`] scores. Every
//! resolved page, hit or fault, is appended to the context's stream. To
//! observe hits, [`arm`] invalidates all resident pages so the next touch of
//! each traps; the fault path then records it and makes the page valid
//! again without replacing anything. When the working set fills up the whole
//! set is flushed at once.

use super::{evict, place, Eviction, Placed, ReplacementStrategy};
use crate::config::MemoryLayout;
use crate::fault::error::{Abort, FatalKind};
use crate::hal::{PageTableOps, Tlb, VmHal};
use crate::mm::PageFlags;
use crate::vm::context::ExecutionContext;

const ACCESS: PageFlags = PageFlags::PRESENT.union(PageFlags::WRITEABLE);

pub(crate) struct TraceRecording;

/// Invalidates every resident page of `ctx` so its next touch is recorded.
///
/// Returns the number of pages armed.
pub fn arm<H>(ctx: &ExecutionContext, hal: &mut H) -> Result<usize, FatalKind>
where
    H: PageTableOps + Tlb + ?Sized,
{
    let space = ctx.space();
    let mut armed = 0;
    for entry in ctx.working_set().iter() {
        hal.update_permissions(space, entry.va(), PageFlags::empty(), ACCESS)
            .map_err(FatalKind::Mapping)?;
        armed += 1;
    }
    hal.flush_all();
    log_debug!(target: "vm", "VM: {} armed {} pages for tracing", ctx.id(), armed);
    Ok(armed)
}

/// Makes a resident, invalidated page accessible again.
pub(crate) fn revalidate<P: PageTableOps + ?Sized>(
    ctx: &ExecutionContext,
    va: usize,
    tables: &mut P,
) -> Result<(), FatalKind> {
    tables
        .update_permissions(ctx.space(), va, ACCESS, PageFlags::empty())
        .map_err(FatalKind::Mapping)
}

pub(crate) fn record(ctx: &mut ExecutionContext, va: usize) {
    ctx.reference_stream_mut().record(va);
}

impl ReplacementStrategy for TraceRecording {
    fn evict_and_place<H: VmHal + ?Sized>(
        &self,
        ctx: &mut ExecutionContext,
        va: usize,
        layout: &MemoryLayout,
        hal: &mut H,
    ) -> Result<Placed, Abort> {
        let mut pages = 0;
        while !ctx.working_set().is_empty() {
            evict(ctx, 0, true, hal)?;
            pages += 1;
        }
        log_debug!(target: "vm", "VM: {} trace flush of {} pages", ctx.id(), pages);
        place(ctx, va, layout, hal, Eviction::Flushed { pages })
    }
}
