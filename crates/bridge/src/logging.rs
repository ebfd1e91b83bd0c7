// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tracing/logging initialization. Grounded on the teacher's
//! `run::init_tracing`: env-filter priority (`RFIDBRIDGE_LOG_LEVEL` >
//! `RUST_LOG` > the configured default), `try_init` so repeated calls
//! (e.g. from tests) never panic, and a format switch between plain
//! and JSON output.

use tracing_subscriber::fmt;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

/// Initialize tracing from CLI config. Uses `try_init` so it's safe to
/// call more than once.
pub fn init_tracing(config: &Config) {
    let filter = if std::env::var("RFIDBRIDGE_LOG_LEVEL").is_err() && config.log_level == "info" {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level))
    } else {
        EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let result = match config.log_format.as_str() {
        "json" => fmt::fmt().with_env_filter(filter).json().try_init(),
        _ => fmt::fmt().with_env_filter(filter).try_init(),
    };
    drop(result);
}

#[cfg(test)]
#[path = "logging_tests.rs"]
mod tests;
