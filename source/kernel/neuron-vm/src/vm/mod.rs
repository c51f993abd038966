// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Virtual-memory state owned by execution contexts: working sets, the
//! replacement strategies that keep them bounded, and the offline OPT
//! scorer for recorded traces.

pub mod context;
pub mod optimal;
pub mod policy;
pub mod replace;
pub mod working_set;

pub use replace::{lru, trace};

#[cfg(test)]
mod tests_prop;
