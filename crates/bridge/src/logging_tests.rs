// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn config(log_level: &str, log_format: &str) -> Config {
    Config {
        config_dir: "config".into(),
        log_format: log_format.to_string(),
        log_level: log_level.to_string(),
    }
}

#[test]
fn init_tracing_is_idempotent() {
    init_tracing(&config("info", "json"));
    // A second call must not panic even though the global subscriber
    // is already set.
    init_tracing(&config("debug", "text"));
}
