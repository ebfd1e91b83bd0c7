// SPDX-License-Identifier: BUSL-1.1
// Copyright 2025 Alfred Jean LLC

use super::*;

#[yare::parameterized(
    config = { BridgeError::Config("bad".into()), 400, "CONFIG_ERROR" },
    transport = { BridgeError::Transport("timeout".into()), 502, "TRANSPORT_ERROR" },
    protocol_timeout = { BridgeError::ProtocolTimeout, 504, "PROTOCOL_TIMEOUT" },
    validation = { BridgeError::Validation("bad epc".into()), 422, "VALIDATION_ERROR" },
    sink = { BridgeError::Sink("mqtt down".into()), 502, "SINK_ERROR" },
    busy = { BridgeError::Busy, 409, "BUSY" },
    not_found = { BridgeError::NotFound("R1".into()), 404, "NOT_FOUND" },
    fatal = { BridgeError::Fatal("no db".into()), 500, "FATAL" },
)]
fn http_status_and_str(err: BridgeError, status: u16, code: &str) {
    assert_eq!(err.http_status(), status);
    assert_eq!(err.as_str(), code);
}

#[test]
fn display_includes_detail() {
    let err = BridgeError::NotFound("R1".into());
    assert_eq!(err.to_string(), "NOT_FOUND: R1");
}

#[test]
fn busy_display_has_no_detail_suffix() {
    assert_eq!(BridgeError::Busy.to_string(), "BUSY");
}
