// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Host integration tests for trace recording and offline scoring
//! TEST_SCOPE: trace-recording mode, vm::trace::arm, min_faults/min_faults_indexed
//! TEST_SCENARIOS:
//!   - an armed run records every reference, hits included
//!   - the recorded stream scores like the reference string it came from
//!   - CLOCK never beats the offline optimum on the same string

use neuron_vm::hal::sim::SimMachine;
use neuron_vm::mm::PAGE_SIZE;
use neuron_vm::vm::trace::arm;
use neuron_vm::{
    min_faults, min_faults_indexed, ContextId, CpuFaultState, CpuId, ExecutionContext,
    FaultEngine, FaultOutcome, StackRegion, TrapInfo,
};

const HEAP: usize = 0x8000_0000;
const SCHED_STACK: StackRegion = StackRegion::new(0xffff_ffc0_0010_0000, 0xffff_ffc0_0011_0000);
const BELADY: [usize; 12] = [1, 2, 3, 4, 1, 2, 5, 1, 2, 3, 4, 5];

fn page(n: usize) -> usize {
    HEAP + n * PAGE_SIZE
}

struct Run {
    engine: FaultEngine,
    cpu: CpuFaultState,
    sim: SimMachine,
    ctx: ExecutionContext,
    faults: usize,
}

impl Run {
    fn new(capacity: usize) -> Self {
        let mut sim = SimMachine::new(capacity + 2, 16);
        let space = sim.create_space();
        for n in 0..8 {
            sim.mark_user_heap(space, page(n)).expect("mark heap");
        }
        Self {
            engine: FaultEngine::default(),
            cpu: CpuFaultState::new(CpuId::BOOT, SCHED_STACK),
            sim,
            ctx: ExecutionContext::new(ContextId::from_raw(2), space, capacity),
            faults: 0,
        }
    }

    /// Reads `va` the way the running context would, faulting as needed.
    fn access(&mut self, va: usize) {
        let space = self.ctx.space();
        while !self.sim.touch(space, va, false) {
            let trap = TrapInfo::user(va + 8, 0x4000);
            let outcome = self
                .engine
                .handle_fault(&mut self.cpu, Some(&mut self.ctx), &trap, &mut self.sim)
                .expect("fault resolved");
            if let FaultOutcome::Placed(_) = outcome {
                self.faults += 1;
            }
        }
    }
}

#[test]
fn armed_run_records_the_full_reference_string() {
    let mut run = Run::new(3);
    run.engine.policy().set_trace_recording();
    for n in BELADY {
        arm(&run.ctx, &mut run.sim).expect("arm");
        run.access(page(n));
    }

    let expected: Vec<usize> = BELADY.iter().map(|&n| page(n)).collect();
    assert_eq!(run.ctx.reference_stream().as_slice(), expected.as_slice());
    assert_eq!(run.ctx.counters().page_faults, BELADY.len() as u64);
    assert!(run.ctx.working_set().len() <= 3);
    assert!(run.ctx.working_set().verify(run.ctx.space(), &run.sim).is_ok());

    let stream = run.ctx.reference_stream().as_slice();
    assert_eq!(min_faults(&[], 3, stream), 7);
    assert_eq!(min_faults_indexed(&[], 3, stream), 7);
    assert_eq!(min_faults(&[], 4, stream), 6);
}

#[test]
fn unarmed_run_records_only_placements() {
    let mut run = Run::new(3);
    run.engine.policy().set_trace_recording();
    for n in [1, 2, 1, 1, 3, 2] {
        run.access(page(n));
    }
    assert_eq!(run.ctx.reference_stream().as_slice(), [page(1), page(2), page(3)]);
    assert_eq!(run.faults, 3);
}

#[test]
fn clock_is_bounded_below_by_the_optimum() {
    let references: Vec<usize> = BELADY.iter().map(|&n| page(n)).collect();
    for capacity in 1..=4 {
        let mut run = Run::new(capacity);
        for &va in &references {
            run.access(va);
        }
        let optimum = min_faults(&[], capacity, &references);
        assert!(
            run.faults >= optimum,
            "capacity {capacity}: CLOCK {} < OPT {optimum}",
            run.faults
        );
    }
}

#[test]
fn seeded_working_set_avoids_cold_faults() {
    let resident = [page(1), page(2)];
    let references = [page(1) + 0x10, page(2), page(1), page(3), page(1)];
    assert_eq!(min_faults(&resident, 2, &references), 1);
    assert_eq!(min_faults(&[], 2, &references), 3);
    assert_eq!(min_faults_indexed(&resident, 2, &references), 1);
}
