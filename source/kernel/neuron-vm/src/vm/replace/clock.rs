// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CLOCK (second chance) replacement.
//!
//! The hand starts at the working-set cursor, or the head when unset, and
//! walks the list as a ring. A USED page loses its bit and is skipped; the
//! first page found with USED clear is the victim. A full ring of USED pages
//! therefore costs exactly one sweep before the starting page is chosen.

use super::{clear_used, evict, page_flags, place, Placed, ReplacementStrategy};
use crate::config::MemoryLayout;
use crate::fault::error::{Abort, FatalKind};
use crate::hal::VmHal;
use crate::mm::PageFlags;
use crate::vm::context::ExecutionContext;

pub(crate) struct Clock;

impl Clock {
    fn select_victim<H: VmHal + ?Sized>(
        ctx: &mut ExecutionContext,
        hal: &mut H,
    ) -> Result<usize, FatalKind> {
        let space = ctx.space();
        let ws = ctx.working_set_mut();
        let len = ws.len();
        if len == 0 {
            return Err(FatalKind::NoVictim);
        }
        let mut hand = match ws.cursor() {
            Some(hand) => hand,
            None => ws.advance_cursor().ok_or(FatalKind::NoVictim)?,
        };
        // One sweep clears every bit, so the hand stops within len + 1 steps.
        for _ in 0..=len {
            let va = ws.get(hand).ok_or(FatalKind::NoVictim)?.va();
            if !page_flags(&*hal, space, va)?.contains(PageFlags::USED) {
                return Ok(hand);
            }
            clear_used(hal, space, va)?;
            hand = ws.advance_cursor().ok_or(FatalKind::NoVictim)?;
        }
        Err(FatalKind::NoVictim)
    }
}

impl ReplacementStrategy for Clock {
    fn evict_and_place<H: VmHal + ?Sized>(
        &self,
        ctx: &mut ExecutionContext,
        va: usize,
        layout: &MemoryLayout,
        hal: &mut H,
    ) -> Result<Placed, Abort> {
        let victim = Self::select_victim(ctx, hal)?;
        let eviction = evict(ctx, victim, true, hal)?;
        let placed = place(ctx, va, layout, hal, eviction)?;
        // The hand resumes after the new tail entry, which wraps to the head.
        let ws = ctx.working_set_mut();
        if let Some(index) = ws.position(va) {
            let next = (index + 1) % ws.len();
            ws.set_cursor(next);
        }
        Ok(placed)
    }
}
