// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn matches_name_finds_substring() {
    assert!(matches_name(Some("RFID-READER-01"), "RFID-READER"));
}

#[test]
fn matches_name_rejects_non_matching() {
    assert!(!matches_name(Some("OtherDevice"), "RFID-READER"));
}

#[test]
fn matches_name_rejects_absent_name() {
    assert!(!matches_name(None, "RFID-READER"));
}

#[test]
fn nus_uuids_are_distinct() {
    assert_ne!(NUS_SERVICE, NUS_RX_WRITE);
    assert_ne!(NUS_RX_WRITE, NUS_TX_NOTIFY);
}

#[test]
fn new_transport_reports_disconnected() {
    let t = BleTransport::new("RFID-READER");
    assert!(!t.is_connected());
}
