// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Replacement-policy configuration shared by every CPU
//! OWNERS: @kernel-mm-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! PUBLIC API: ReplacementPolicy, LruKind, PolicySettings, SharedPolicy
//! DEPENDS_ON: spin::RwLock
//! INVARIANTS: Readers take one snapshot per fault; writers replace the whole settings value
//!
//! Only CLOCK, Modified-CLOCK, the LRU time approximation and trace
//! recording have replacement bodies. The remaining values are accepted as
//! configuration and fail explicitly once a full working set needs a victim.

use core::fmt;

use spin::RwLock;

/// LRU approximation flavours.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LruKind {
    /// Aging time stamps maintained by [`crate::vm::lru::age_time_stamps`].
    TimeApprox,
    /// Active/second-chance lists.
    ListsApprox,
}

/// Page-replacement discipline applied when a working set is full.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReplacementPolicy {
    Fifo,
    Clock,
    ModifiedClock,
    Lru(LruKind),
    NChanceClock,
    DynamicLocal,
    /// Records every resolved page into the context's reference stream and
    /// flushes the whole working set when it fills up. The trace feeds
    /// [`crate::min_faults`]; no optimal selection happens online.
    TraceRecording,
}

impl ReplacementPolicy {
    /// Returns whether a replacement strategy exists for this value.
    pub const fn is_implemented(self) -> bool {
        matches!(
            self,
            Self::Clock | Self::ModifiedClock | Self::Lru(LruKind::TimeApprox) | Self::TraceRecording
        )
    }
}

impl fmt::Display for ReplacementPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Fifo => "FIFO",
            Self::Clock => "CLOCK",
            Self::ModifiedClock => "MODIFIED-CLOCK",
            Self::Lru(LruKind::TimeApprox) => "LRU-TIME-APPROX",
            Self::Lru(LruKind::ListsApprox) => "LRU-LISTS-APPROX",
            Self::NChanceClock => "N-CHANCE-CLOCK",
            Self::DynamicLocal => "DYNAMIC-LOCAL",
            Self::TraceRecording => "TRACE-RECORDING",
        };
        f.write_str(name)
    }
}

/// Snapshot of the replacement configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PolicySettings {
    pub policy: ReplacementPolicy,
    /// Sweeps an N-chance CLOCK grants a page before evicting it.
    pub nchance_sweeps: u32,
    /// FAST variant of N-chance CLOCK.
    pub fast_nchance: bool,
}

impl PolicySettings {
    pub const DEFAULT: Self =
        Self { policy: ReplacementPolicy::Clock, nchance_sweeps: 0, fast_nchance: false };
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Process-wide replacement configuration.
///
/// The fault path reads one [`PolicySettings`] snapshot per fault, so a
/// concurrent reconfiguration never changes strategy halfway through an
/// eviction.
pub struct SharedPolicy {
    settings: RwLock<PolicySettings>,
}

impl Default for SharedPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedPolicy {
    pub const fn new() -> Self {
        Self::with_settings(PolicySettings::DEFAULT)
    }

    pub const fn with_settings(settings: PolicySettings) -> Self {
        Self { settings: RwLock::new(settings) }
    }

    pub fn settings(&self) -> PolicySettings {
        *self.settings.read()
    }

    pub fn policy(&self) -> ReplacementPolicy {
        self.settings.read().policy
    }

    pub fn is(&self, policy: ReplacementPolicy) -> bool {
        self.policy() == policy
    }

    fn select(&self, policy: ReplacementPolicy) {
        self.select_with(policy, |_| {});
    }

    /// Switches to `policy` and applies `tweak` under one write guard, so a
    /// reader never sees half of the change.
    fn select_with(&self, policy: ReplacementPolicy, tweak: impl FnOnce(&mut PolicySettings)) {
        let previous = {
            let mut settings = self.settings.write();
            tweak(&mut settings);
            core::mem::replace(&mut settings.policy, policy)
        };
        if previous != policy {
            log_info!(target: "vm", "VM: replacement policy {} -> {}", previous, policy);
        }
    }

    pub fn set_fifo(&self) {
        self.select(ReplacementPolicy::Fifo);
    }

    pub fn set_clock(&self) {
        self.select(ReplacementPolicy::Clock);
    }

    pub fn set_modified_clock(&self) {
        self.select(ReplacementPolicy::ModifiedClock);
    }

    pub fn set_lru(&self, kind: LruKind) {
        self.select(ReplacementPolicy::Lru(kind));
    }

    pub fn set_nchance_clock(&self, sweeps: u32) {
        self.select_with(ReplacementPolicy::NChanceClock, |settings| {
            settings.nchance_sweeps = sweeps;
        });
    }

    /// Toggles the FAST variant without changing the active policy.
    pub fn set_fast_nchance(&self, fast: bool) {
        self.settings.write().fast_nchance = fast;
    }

    pub fn set_dynamic_local(&self) {
        self.select(ReplacementPolicy::DynamicLocal);
    }

    pub fn set_trace_recording(&self) {
        self.select(ReplacementPolicy::TraceRecording);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_clock() {
        let shared = SharedPolicy::new();
        assert!(shared.is(ReplacementPolicy::Clock));
        assert_eq!(shared.settings(), PolicySettings::default());
    }

    #[test]
    fn setters_replace_policy_and_keep_knobs() {
        let shared = SharedPolicy::new();
        shared.set_nchance_clock(5);
        shared.set_fast_nchance(true);
        assert_eq!(
            shared.settings(),
            PolicySettings {
                policy: ReplacementPolicy::NChanceClock,
                nchance_sweeps: 5,
                fast_nchance: true
            }
        );
        shared.set_lru(LruKind::TimeApprox);
        assert!(shared.is(ReplacementPolicy::Lru(LruKind::TimeApprox)));
        assert_eq!(shared.settings().nchance_sweeps, 5);
    }

    #[test]
    fn readers_never_see_sweeps_without_their_policy() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let shared = SharedPolicy::new();
        let done = AtomicBool::new(false);
        std::thread::scope(|scope| {
            scope.spawn(|| {
                for _ in 0..2_000 {
                    shared.set_nchance_clock(7);
                    shared.set_dynamic_local();
                    shared.set_nchance_clock(0);
                    shared.set_clock();
                }
                done.store(true, Ordering::Release);
            });
            while !done.load(Ordering::Acquire) {
                let snapshot = shared.settings();
                match snapshot.policy {
                    ReplacementPolicy::Clock => assert_eq!(snapshot.nchance_sweeps, 0),
                    ReplacementPolicy::DynamicLocal => assert_eq!(snapshot.nchance_sweeps, 7),
                    _ => {}
                }
            }
        });
    }

    #[test]
    fn only_four_policies_have_bodies() {
        let implemented = [
            ReplacementPolicy::Clock,
            ReplacementPolicy::ModifiedClock,
            ReplacementPolicy::Lru(LruKind::TimeApprox),
            ReplacementPolicy::TraceRecording,
        ];
        let configured_only = [
            ReplacementPolicy::Fifo,
            ReplacementPolicy::Lru(LruKind::ListsApprox),
            ReplacementPolicy::NChanceClock,
            ReplacementPolicy::DynamicLocal,
        ];
        assert!(implemented.iter().all(|policy| policy.is_implemented()));
        assert!(configured_only.iter().all(|policy| !policy.is_implemented()));
    }
}
