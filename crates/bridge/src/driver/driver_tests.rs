// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn write_epc_rejects_short_new_epc() {
    let err = WriteEpcCommand::new(WriteTarget::Unspecified, "abc", "deadbeef").unwrap_err();
    assert_eq!(err, BridgeError::Validation("new_epc must be 24 hex chars, got \"abc\"".into()));
}

#[test]
fn write_epc_rejects_bad_password_length() {
    let epc = "a".repeat(24);
    let err = WriteEpcCommand::new(WriteTarget::Unspecified, epc, "1234").unwrap_err();
    assert!(matches!(err, BridgeError::Validation(_)));
}

#[test]
fn write_epc_rejects_non_hex_target() {
    let epc = "a".repeat(24);
    let bad_target = "z".repeat(24);
    let err = WriteEpcCommand::new(WriteTarget::Epc(bad_target), epc, "deadbeef").unwrap_err();
    assert!(matches!(err, BridgeError::Validation(_)));
}

#[test]
fn write_epc_accepts_well_formed_command() {
    let epc = "a1b2c3d4e5f60718293a4b5c".to_string();
    let tid = "0".repeat(24);
    let cmd = WriteEpcCommand::new(WriteTarget::Tid(tid.clone()), epc.clone(), "deadbeef").unwrap();
    assert_eq!(cmd.target, WriteTarget::Tid(tid));
    assert_eq!(cmd.new_epc, epc);
    assert_eq!(cmd.password, "deadbeef");
}
