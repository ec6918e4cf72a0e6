//! Switchable logging macros keyed on a per-module `ENABLE_LOGS` flag.
//!
//! The detection pipeline runs on every lookup, so the chattier modules
//! (traversal, matching) can be silenced at compile time without touching
//! the global `RUST_LOG` filter.
//!
//! ```ignore
//! const ENABLE_LOGS: bool = true;
//!
//! use crate::{log_debug, log_info, log_warn};
//!
//! log_info!("cache populated for {}", app);
//! ```

/// Info-level log gated on the calling module's `ENABLE_LOGS` const.
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::info!($($arg)*);
        }
    };
}

/// Warn-level log gated on the calling module's `ENABLE_LOGS` const.
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::warn!($($arg)*);
        }
    };
}

/// Error-level log gated on the calling module's `ENABLE_LOGS` const.
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::error!($($arg)*);
        }
    };
}

/// Debug-level log gated on the calling module's `ENABLE_LOGS` const.
///
/// Used for absorbed failures (skipped subtrees, missing attributes) that
/// are expected during normal traversal.
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::debug!($($arg)*);
        }
    };
}
