// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Leveled, targeted log lines for the fault path
//! OWNERS: @kernel-mm-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests below
//! PUBLIC API: log_error!/log_warn!/log_info!/log_debug!/log_trace!, emit(level,target,args)
//! DEPENDS_ON: log facade (the kernel console or a host harness installs the sink)
//! INVARIANTS: Debug/Trace compiled in only with debug assertions; one record per call
//!
//! Targets in use: `"fault"` for classification and fatal reports, `"vm"`
//! for placement, eviction and policy changes, `"ws"` for working-set
//! verification.

use core::fmt::Arguments;

/// Severity of a fault-path record.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Level {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Level {
    const fn facade(self) -> ::log::Level {
        match self {
            Level::Error => ::log::Level::Error,
            Level::Warn => ::log::Level::Warn,
            Level::Info => ::log::Level::Info,
            Level::Debug => ::log::Level::Debug,
            Level::Trace => ::log::Level::Trace,
        }
    }

    const fn compiled_in(self) -> bool {
        !matches!(self, Level::Debug | Level::Trace) || cfg!(debug_assertions)
    }
}

/// Hands one record to the installed `log` sink.
pub fn emit(level: Level, target: &'static str, args: Arguments<'_>) {
    if level.compiled_in() {
        ::log::log!(target: target, level.facade(), "{}", args);
    }
}

#[doc(hidden)]
#[macro_export]
macro_rules! __vm_log {
    ($level:ident, target: $target:expr, $($arg:tt)+) => {
        $crate::diag::log::emit($crate::diag::log::Level::$level, $target, format_args!($($arg)+))
    };
    ($level:ident, $($arg:tt)+) => {
        $crate::diag::log::emit($crate::diag::log::Level::$level, module_path!(), format_args!($($arg)+))
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)+) => { $crate::__vm_log!(Error, $($arg)+) };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)+) => { $crate::__vm_log!(Warn, $($arg)+) };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)+) => { $crate::__vm_log!(Info, $($arg)+) };
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)+) => { $crate::__vm_log!(Debug, $($arg)+) };
}

#[macro_export]
macro_rules! log_trace {
    ($($arg:tt)+) => { $crate::__vm_log!(Trace, $($arg)+) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_map_onto_the_facade() {
        assert_eq!(Level::Error.facade(), ::log::Level::Error);
        assert_eq!(Level::Trace.facade(), ::log::Level::Trace);
        assert!(Level::Warn.compiled_in());
        assert_eq!(Level::Debug.compiled_in(), cfg!(debug_assertions));
    }

    #[test]
    fn macros_accept_both_forms_without_a_sink() {
        log_warn!(target: "fault", "FAULT: va={:#x}", 0x1000usize);
        log_trace!("plain {}", 1);
    }
}
