// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! LRU approximation with aging time stamps.
//!
//! [`age_time_stamps`] runs from the timer tick: each stamp shifts right and
//! takes the page's USED bit as its new top bit, then USED is cleared. The
//! victim is the entry with the smallest stamp, the first one in list order
//! on ties. Victims are dropped without a write-back; this strategy never
//! persists evicted pages, so dirty contents are lost by construction.

use super::{clear_used, evict, page_flags, place, Placed, ReplacementStrategy};
use crate::config::MemoryLayout;
use crate::fault::error::{Abort, FatalKind};
use crate::hal::{PageTableOps, VmHal};
use crate::mm::PageFlags;
use crate::vm::context::ExecutionContext;

pub(crate) struct LruTimeApprox;

/// Folds the USED bit of every resident page into its time stamp.
pub fn age_time_stamps<P: PageTableOps + ?Sized>(
    ctx: &mut ExecutionContext,
    tables: &mut P,
) -> Result<(), FatalKind> {
    let space = ctx.space();
    let ws = ctx.working_set_mut();
    for index in 0..ws.len() {
        let Some(entry) = ws.get(index).copied() else {
            break;
        };
        let used = page_flags(&*tables, space, entry.va())?.contains(PageFlags::USED);
        let stamp = (entry.time_stamp() >> 1) | (u32::from(used) << 31);
        ws.set_time_stamp(index, stamp);
        if used {
            clear_used(tables, space, entry.va())?;
        }
    }
    Ok(())
}

impl LruTimeApprox {
    fn select_victim(ctx: &ExecutionContext) -> Result<usize, FatalKind> {
        let mut victim: Option<(usize, u32)> = None;
        for (index, entry) in ctx.working_set().iter().enumerate() {
            match victim {
                Some((_, oldest)) if entry.time_stamp() >= oldest => {}
                _ => victim = Some((index, entry.time_stamp())),
            }
        }
        victim.map(|(index, _)| index).ok_or(FatalKind::NoVictim)
    }
}

impl ReplacementStrategy for LruTimeApprox {
    fn evict_and_place<H: VmHal + ?Sized>(
        &self,
        ctx: &mut ExecutionContext,
        va: usize,
        layout: &MemoryLayout,
        hal: &mut H,
    ) -> Result<Placed, Abort> {
        let victim = Self::select_victim(ctx)?;
        let eviction = evict(ctx, victim, false, hal)?;
        place(ctx, va, layout, hal, eviction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::replace::test_support::*;
    use crate::vm::replace::Eviction;

    #[test]
    fn aging_shifts_in_used_bit() {
        let (mut sim, mut ctx) = setup(2);
        fill(&mut sim, &mut ctx, 2);
        assert!(sim.touch(ctx.space(), page(0), false));
        age_time_stamps(&mut ctx, &mut sim).expect("age");
        let stamps: Vec<u32> = ctx.working_set().iter().map(|e| e.time_stamp()).collect();
        assert_eq!(stamps, [0x8000_0000, 0]);
        assert!(!sim.permissions(ctx.space(), page(0)).expect("flags").contains(PageFlags::USED));

        assert!(sim.touch(ctx.space(), page(1), false));
        age_time_stamps(&mut ctx, &mut sim).expect("age");
        let stamps: Vec<u32> = ctx.working_set().iter().map(|e| e.time_stamp()).collect();
        assert_eq!(stamps, [0x4000_0000, 0x8000_0000]);
    }

    #[test]
    fn evicts_oldest_without_write_back() {
        let (mut sim, mut ctx) = setup(3);
        fill(&mut sim, &mut ctx, 3);
        assert!(sim.touch(ctx.space(), page(0), false));
        assert!(sim.write_word(ctx.space(), page(1), 4));
        age_time_stamps(&mut ctx, &mut sim).expect("age");
        assert!(sim.touch(ctx.space(), page(2), false));
        age_time_stamps(&mut ctx, &mut sim).expect("age");
        // Stamps: page0 0x4000_0000, page1 0x4000_0000, page2 0x8000_0000.
        assert!(sim.write_word(ctx.space(), page(0), 3));
        let placed =
            LruTimeApprox.evict_and_place(&mut ctx, page(8), &layout(), &mut sim).expect("place");
        assert_eq!(placed.eviction, Eviction::Page { va: page(0), written_back: false });
        assert_eq!(sim.page_file_word(ctx.id(), page(0)), None);
        assert_eq!(pages(&ctx), [page(1), page(2), page(8)]);
    }

    #[test]
    fn ties_pick_first_in_list_order() {
        let (mut sim, mut ctx) = setup(3);
        fill(&mut sim, &mut ctx, 3);
        assert_eq!(LruTimeApprox::select_victim(&ctx), Ok(0));
    }
}
