// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg(test)]
//! CONTEXT: Property-based tests for working sets, replacement and the OPT scorer
//! OWNERS: @kernel-mm-team
//! NOTE: Tests only; drives the fault engine against SimMachine with random access streams.
//!
//! TEST_SCOPE:
//!   - Working-set bound after every fault, for every implemented policy
//!   - Mapping/entry consistency after every fault
//!   - OPT scorer: inputs untouched, indexed variant agrees with the naive one
//!   - OPT never takes more faults than CLOCK on the same stream
//!
//! TEST_SCENARIOS:
//!   - working_set_stays_bounded_and_consistent(): random reads/writes under a random policy
//!   - scorer_variants_agree_and_borrow_only(): both scorers on random streams and seeds
//!   - opt_is_a_lower_bound_for_clock(): fault count of a CLOCK run vs min_faults

use proptest::prelude::*;

use super::context::ExecutionContext;
use super::optimal::{min_faults, min_faults_indexed};
use super::policy::{LruKind, ReplacementPolicy};
use crate::config::MemoryLayout;
use crate::fault::{CpuFaultState, FaultEngine, FaultOutcome, TrapInfo};
use crate::hal::sim::SimMachine;
use crate::mm::PAGE_SIZE;
use crate::types::{ContextId, CpuId};
use crate::vm::context::StackRegion;

const HEAP: usize = 0x8000_0000;
const PAGES: usize = 12;

fn arb_policy() -> impl Strategy<Value = ReplacementPolicy> {
    prop_oneof![
        Just(ReplacementPolicy::Clock),
        Just(ReplacementPolicy::ModifiedClock),
        Just(ReplacementPolicy::Lru(LruKind::TimeApprox)),
        Just(ReplacementPolicy::TraceRecording),
    ]
}

fn arb_access() -> impl Strategy<Value = (usize, bool)> {
    (0..PAGES, any::<bool>())
}

struct Run {
    sim: SimMachine,
    ctx: ExecutionContext,
    engine: FaultEngine,
    cpu: CpuFaultState,
    page_faults: usize,
}

impl Run {
    fn new(policy: ReplacementPolicy, capacity: usize) -> Self {
        let mut sim = SimMachine::new(capacity + 2, PAGES);
        let space = sim.create_space();
        for n in 0..PAGES {
            sim.mark_user_heap(space, HEAP + n * PAGE_SIZE).unwrap();
        }
        let engine = FaultEngine::new(MemoryLayout::DEFAULT);
        match policy {
            ReplacementPolicy::Clock => engine.policy().set_clock(),
            ReplacementPolicy::ModifiedClock => engine.policy().set_modified_clock(),
            ReplacementPolicy::Lru(kind) => engine.policy().set_lru(kind),
            _ => engine.policy().set_trace_recording(),
        }
        Self {
            sim,
            ctx: ExecutionContext::new(ContextId::from_raw(1), space, capacity),
            engine,
            cpu: CpuFaultState::new(CpuId::BOOT, StackRegion::new(0x9000_0000_0000, 0x9000_0001_0000)),
            page_faults: 0,
        }
    }

    /// Performs one access, faulting until the page is resident.
    fn access(&mut self, page: usize, write: bool) {
        let va = HEAP + page * PAGE_SIZE;
        while !self.sim.touch(self.ctx.space(), va, write) {
            let trap = TrapInfo::user(va + 8, 0x1000);
            let outcome = self
                .engine
                .handle_fault(&mut self.cpu, Some(&mut self.ctx), &trap, &mut self.sim)
                .unwrap();
            if matches!(outcome, FaultOutcome::Placed(_)) {
                self.page_faults += 1;
            }
            assert!(!matches!(outcome, FaultOutcome::Terminated(_)), "terminated: {outcome:?}");
        }
    }
}

proptest! {
    #[test]
    fn working_set_stays_bounded_and_consistent(
        policy in arb_policy(),
        capacity in 1usize..6,
        accesses in proptest::collection::vec(arb_access(), 1..64),
    ) {
        let mut run = Run::new(policy, capacity);
        for (step, (page, write)) in accesses.into_iter().enumerate() {
            run.access(page, write);
            if step % 4 == 3 && policy == ReplacementPolicy::Lru(LruKind::TimeApprox) {
                super::lru::age_time_stamps(&mut run.ctx, &mut run.sim).unwrap();
            }
            prop_assert!(run.ctx.working_set().len() <= capacity);
            prop_assert_eq!(run.ctx.working_set().verify(run.ctx.space(), &run.sim), Ok(()));
        }
        prop_assert_eq!(run.sim.free_frames(), capacity + 2 - run.ctx.working_set().len());
    }

    #[test]
    fn scorer_variants_agree_and_borrow_only(
        initial in proptest::collection::vec(0usize..8, 0..6),
        capacity in 0usize..6,
        stream in proptest::collection::vec(0usize..8, 0..80),
    ) {
        let initial: Vec<usize> = initial.into_iter().map(|n| n * PAGE_SIZE).collect();
        let stream: Vec<usize> = stream.into_iter().map(|n| n * PAGE_SIZE + n).collect();
        let (initial_before, stream_before) = (initial.clone(), stream.clone());
        let naive = min_faults(&initial, capacity, &stream);
        let indexed = min_faults_indexed(&initial, capacity, &stream);
        prop_assert_eq!(naive, indexed);
        prop_assert!(naive <= stream.len());
        prop_assert_eq!(initial, initial_before);
        prop_assert_eq!(stream, stream_before);
    }

    #[test]
    fn opt_is_a_lower_bound_for_clock(
        capacity in 1usize..5,
        accesses in proptest::collection::vec(arb_access(), 1..64),
    ) {
        let mut run = Run::new(ReplacementPolicy::Clock, capacity);
        let stream: Vec<usize> = accesses.iter().map(|(page, _)| HEAP + page * PAGE_SIZE).collect();
        for (page, write) in accesses {
            run.access(page, write);
        }
        prop_assert!(min_faults(&[], capacity, &stream) <= run.page_faults);
    }
}
