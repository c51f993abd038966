// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Page placement and the pluggable replacement strategies
//! OWNERS: @kernel-mm-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests per strategy + vm::tests_prop
//! PUBLIC API: Placed, Eviction, clock/modified_clock/lru/trace
//! DEPENDS_ON: hal::VmHal, vm::working_set, vm::policy
//! INVARIANTS:
//!   - A frame is mapped at a page iff the page has a working-set entry; every
//!     helper here changes both together or rolls back
//!   - Placement always appends at the working-set tail
//!
//! Strategies only pick victims. Eviction (write-back, unmap, free, entry
//! removal) and placement (allocate, map, page-in, entry insertion) are
//! shared so every strategy keeps the same transactional discipline.

pub mod clock;
pub mod lru;
pub mod modified_clock;
pub mod trace;

use crate::config::MemoryLayout;
use crate::fault::error::{Abort, FatalKind, TerminationReason};
use crate::hal::{PageTableOps, StoreError, VmHal};
use crate::mm::{AsHandle, PageFlags};
use crate::types::FrameNumber;
use crate::vm::context::ExecutionContext;
use crate::vm::policy::{LruKind, PolicySettings, ReplacementPolicy};

/// What a placement displaced.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Eviction {
    /// The working set had room.
    None,
    /// One victim was evicted, written back first if it was dirty.
    Page { va: usize, written_back: bool },
    /// The whole working set was flushed.
    Flushed { pages: usize },
}

/// A page made resident by the fault path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Placed {
    pub va: usize,
    pub frame: FrameNumber,
    pub eviction: Eviction,
    /// The page file had no copy; the page starts zeroed.
    pub zero_filled: bool,
}

/// A replacement discipline for a full working set.
pub(crate) trait ReplacementStrategy {
    /// Makes room for `va` and places it.
    fn evict_and_place<H: VmHal + ?Sized>(
        &self,
        ctx: &mut ExecutionContext,
        va: usize,
        layout: &MemoryLayout,
        hal: &mut H,
    ) -> Result<Placed, Abort>;
}

/// Places `va`, evicting first if the working set is full.
pub(crate) fn resolve<H: VmHal + ?Sized>(
    ctx: &mut ExecutionContext,
    va: usize,
    settings: &PolicySettings,
    layout: &MemoryLayout,
    hal: &mut H,
) -> Result<Placed, Abort> {
    if !ctx.working_set().is_full() {
        return place(ctx, va, layout, hal, Eviction::None);
    }
    match settings.policy {
        ReplacementPolicy::Clock => clock::Clock.evict_and_place(ctx, va, layout, hal),
        ReplacementPolicy::ModifiedClock => {
            modified_clock::ModifiedClock.evict_and_place(ctx, va, layout, hal)
        }
        ReplacementPolicy::Lru(LruKind::TimeApprox) => {
            lru::LruTimeApprox.evict_and_place(ctx, va, layout, hal)
        }
        ReplacementPolicy::TraceRecording => {
            trace::TraceRecording.evict_and_place(ctx, va, layout, hal)
        }
        other => Err(FatalKind::UnimplementedStrategy(other).into()),
    }
}

/// Allocates a frame for `va`, maps it, pages its contents in and records
/// the new working-set entry.
///
/// On any failure the frame is unmapped and released again, so no mapping
/// survives without an entry.
pub(crate) fn place<H: VmHal + ?Sized>(
    ctx: &mut ExecutionContext,
    va: usize,
    layout: &MemoryLayout,
    hal: &mut H,
    eviction: Eviction,
) -> Result<Placed, Abort> {
    let space = ctx.space();
    let frame = hal.allocate()?;
    if let Err(err) = hal.map(space, frame, va, PageFlags::USER_RW) {
        hal.free(frame);
        return Err(FatalKind::Mapping(err).into());
    }
    let zero_filled = match hal.read(ctx.id(), va, frame) {
        Ok(()) => false,
        Err(StoreError::NotInStore) if layout.in_growth_region(va) => true,
        Err(StoreError::NotInStore) => {
            release(hal, space, va);
            return Err(TerminationReason::UnbackedPage.into());
        }
        Err(err) => {
            release(hal, space, va);
            return Err(err.into());
        }
    };
    if let Err(err) = ctx.working_set_mut().insert(va, frame) {
        release(hal, space, va);
        return Err(err.into());
    }
    log_debug!(
        target: "vm",
        "VM: {} place va={:#x} frame={} zero={}",
        ctx.id(),
        va,
        frame.index(),
        zero_filled
    );
    Ok(Placed { va, frame, eviction, zero_filled })
}

/// Evicts the working-set member at `index`.
///
/// With `write_back` a MODIFIED page is saved to the page file first; a
/// full page file is fatal because the page would otherwise be lost.
pub(crate) fn evict<H: VmHal + ?Sized>(
    ctx: &mut ExecutionContext,
    index: usize,
    write_back: bool,
    hal: &mut H,
) -> Result<Eviction, Abort> {
    let space = ctx.space();
    let entry = *ctx.working_set().get(index).ok_or(FatalKind::NoVictim)?;
    let va = entry.va();
    let mut written_back = false;
    if write_back && page_flags(&*hal, space, va)?.contains(PageFlags::MODIFIED) {
        hal.write(ctx.id(), va, entry.frame())?;
        written_back = true;
    }
    let frame = hal.unmap(space, va).ok_or(FatalKind::StaleEntry)?;
    debug_assert_eq!(frame, entry.frame());
    hal.free(frame);
    ctx.working_set_mut().remove(index);
    log_debug!(
        target: "vm",
        "VM: {} evict va={:#x} frame={} written_back={}",
        ctx.id(),
        va,
        frame.index(),
        written_back
    );
    Ok(Eviction::Page { va, written_back })
}

/// Reads the flags of a resident page; a missing entry means the working
/// set and the page table disagree.
pub(crate) fn page_flags<P: PageTableOps + ?Sized>(
    tables: &P,
    space: AsHandle,
    va: usize,
) -> Result<PageFlags, FatalKind> {
    tables.permissions(space, va).map_err(|_| FatalKind::StaleEntry)
}

/// Clears USED on a resident page.
pub(crate) fn clear_used<P: PageTableOps + ?Sized>(
    tables: &mut P,
    space: AsHandle,
    va: usize,
) -> Result<(), FatalKind> {
    tables
        .update_permissions(space, va, PageFlags::empty(), PageFlags::USED)
        .map_err(FatalKind::Mapping)
}

fn release<H: VmHal + ?Sized>(hal: &mut H, space: AsHandle, va: usize) {
    if let Some(frame) = hal.unmap(space, va) {
        hal.free(frame);
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::hal::sim::SimMachine;
    use crate::hal::PageTableOps;
    use crate::types::ContextId;

    #[test]
    fn placement_fills_then_parks_cursor() {
        let (mut sim, mut ctx) = setup(2);
        let placed = place(&mut ctx, page(0), &layout(), &mut sim, Eviction::None).expect("place");
        assert!(placed.zero_filled);
        assert_eq!(ctx.working_set().cursor(), None);
        place(&mut ctx, page(1), &layout(), &mut sim, Eviction::None).expect("place");
        assert_eq!(ctx.working_set().cursor(), Some(0));
        assert!(ctx.working_set().verify(ctx.space(), &sim).is_ok());
    }

    #[test]
    fn placement_pages_in_saved_contents() {
        let (mut sim, mut ctx) = setup(2);
        sim.seed_page_file(ctx.id(), page(3), 99).expect("seed");
        let placed = place(&mut ctx, page(3), &layout(), &mut sim, Eviction::None).expect("place");
        assert!(!placed.zero_filled);
        assert_eq!(sim.read_word(ctx.space(), page(3)), Some(99));
    }

    #[test]
    fn unbacked_page_rolls_back_mapping() {
        let (mut sim, mut ctx) = setup(2);
        let free = sim.free_frames();
        let outside = 0x1000_0000;
        let result = place(&mut ctx, outside, &layout(), &mut sim, Eviction::None);
        assert_eq!(result, Err(Abort::Terminate(TerminationReason::UnbackedPage)));
        assert_eq!(sim.free_frames(), free);
        assert_eq!(sim.frame_at(ctx.space(), outside), None);
        assert!(ctx.working_set().is_empty());
    }

    #[test]
    fn frame_exhaustion_is_fatal() {
        let mut sim = SimMachine::new(0, 4);
        let space = sim.create_space();
        let mut ctx = ExecutionContext::new(ContextId::from_raw(2), space, 4);
        let result = place(&mut ctx, page(0), &layout(), &mut sim, Eviction::None);
        assert_eq!(result, Err(Abort::Fatal(FatalKind::OutOfFrames)));
    }

    #[test]
    fn eviction_writes_back_dirty_pages_only_when_asked() {
        let (mut sim, mut ctx) = setup(3);
        fill(&mut sim, &mut ctx, 2);
        assert!(sim.write_word(ctx.space(), page(0), 7));
        assert!(sim.write_word(ctx.space(), page(1), 8));
        let evicted = evict(&mut ctx, 0, true, &mut sim).expect("evict");
        assert_eq!(evicted, Eviction::Page { va: page(0), written_back: true });
        assert_eq!(sim.page_file_word(ctx.id(), page(0)), Some(7));
        let evicted = evict(&mut ctx, 0, false, &mut sim).expect("evict");
        assert_eq!(evicted, Eviction::Page { va: page(1), written_back: false });
        assert_eq!(sim.page_file_word(ctx.id(), page(1)), None);
        assert!(ctx.working_set().verify(ctx.space(), &sim).is_ok());
    }

    #[test]
    fn unimplemented_policies_fail_only_when_full() {
        let (mut sim, mut ctx) = setup(1);
        let settings = PolicySettings { policy: ReplacementPolicy::Fifo, ..PolicySettings::DEFAULT };
        resolve(&mut ctx, page(0), &settings, &layout(), &mut sim).expect("room left");
        let result = resolve(&mut ctx, page(1), &settings, &layout(), &mut sim);
        assert_eq!(
            result,
            Err(Abort::Fatal(FatalKind::UnimplementedStrategy(ReplacementPolicy::Fifo)))
        );
        assert_eq!(pages(&ctx), [page(0)]);
    }

    #[test]
    fn zero_capacity_has_no_victim() {
        let (mut sim, mut ctx) = setup(0);
        let result = resolve(&mut ctx, page(0), &PolicySettings::DEFAULT, &layout(), &mut sim);
        assert_eq!(result, Err(Abort::Fatal(FatalKind::NoVictim)));
        assert_eq!(sim.frame_at(ctx.space(), page(0)), None);
    }
}
