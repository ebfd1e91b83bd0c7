// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn new_transport_reports_disconnected() {
    let t = HttpsStreamTransport::new("192.168.1.50", "root", "impnj").unwrap();
    assert!(!t.is_connected());
}

#[test]
fn base_url_targets_api_v1_root() {
    let t = HttpsStreamTransport::new("192.168.1.50", "root", "impnj").unwrap();
    assert_eq!(t.base_url, "https://192.168.1.50/api/v1");
}
