// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Diagnostics for the fault path
//! OWNERS: @kernel-team
//! PUBLIC API: log (log_* macros, emit)
//! DEPENDS_ON: log facade
//! INVARIANTS: Logging never allocates and never fails the caller

#[macro_use]
pub mod log;
