// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Modified-CLOCK replacement: prefer pages that are both unused and clean.
//!
//! Pass one looks for USED and MODIFIED both clear. Failing that, at most
//! two aging passes follow, each taking the first page with USED clear and
//! clearing USED on every page it walks past. Scans always start at the
//! head, so the search touches at most three times the working-set size.

use super::{clear_used, evict, page_flags, place, Placed, ReplacementStrategy};
use crate::config::MemoryLayout;
use crate::fault::error::{Abort, FatalKind};
use crate::hal::VmHal;
use crate::mm::PageFlags;
use crate::vm::context::ExecutionContext;

const AGING_PASSES: usize = 2;

pub(crate) struct ModifiedClock;

impl ModifiedClock {
    fn select_victim<H: VmHal + ?Sized>(
        ctx: &ExecutionContext,
        hal: &mut H,
    ) -> Result<usize, FatalKind> {
        let space = ctx.space();
        let ws = ctx.working_set();
        for (index, entry) in ws.iter().enumerate() {
            let flags = page_flags(&*hal, space, entry.va())?;
            if !flags.intersects(PageFlags::USED | PageFlags::MODIFIED) {
                return Ok(index);
            }
        }
        for _ in 0..AGING_PASSES {
            for (index, entry) in ws.iter().enumerate() {
                if !page_flags(&*hal, space, entry.va())?.contains(PageFlags::USED) {
                    return Ok(index);
                }
                clear_used(hal, space, entry.va())?;
            }
        }
        Err(FatalKind::NoVictim)
    }
}

impl ReplacementStrategy for ModifiedClock {
    fn evict_and_place<H: VmHal + ?Sized>(
        &self,
        ctx: &mut ExecutionContext,
        va: usize,
        layout: &MemoryLayout,
        hal: &mut H,
    ) -> Result<Placed, Abort> {
        let victim = Self::select_victim(ctx, hal)?;
        let eviction = evict(ctx, victim, true, hal)?;
        place(ctx, va, layout, hal, eviction)
    }
}
