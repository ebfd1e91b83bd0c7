// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use chrono::TimeZone;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::config::DeviceConfig;
use crate::event::RawTag;
use crate::registry::DeviceRegistry;
use crate::sinks::db::DbSink;

#[test]
fn next_midnight_is_never_more_than_a_day_away() {
    let now = Utc.with_ymd_and_hms(2026, 7, 26, 14, 30, 0).unwrap();
    let delay = duration_until_next_midnight(now);
    assert!(delay <= Duration::from_secs(24 * 3600));
    assert!(delay > Duration::from_secs(0));
}

#[test]
fn next_midnight_just_after_local_midnight_is_almost_a_full_day() {
    // 03:00:01 UTC is 00:00:01 at UTC-3, just past local midnight.
    let now = Utc.with_ymd_and_hms(2026, 7, 26, 3, 0, 1).unwrap();
    let delay = duration_until_next_midnight(now);
    assert!(delay > Duration::from_secs(24 * 3600 - 5));
}

#[tokio::test]
async fn pruning_loop_returns_immediately_when_storage_days_disables_it() {
    let (_dir, url) = temp_sqlite_url_for_test();
    let db = Arc::new(DbSink::connect(&url).await.unwrap());
    let actions = ActionsConfig { storage_days: 0, ..Default::default() };
    let shutdown = CancellationToken::new();
    tokio::time::timeout(Duration::from_secs(2), run_pruning_loop(db, actions, shutdown)).await.expect("returns promptly");
}

#[tokio::test]
async fn tag_eviction_loop_returns_immediately_when_interval_unset() {
    let registry = Arc::new(DeviceRegistry::new());
    let actions = ActionsConfig::default();
    let shutdown = CancellationToken::new();
    tokio::time::timeout(Duration::from_secs(2), run_tag_eviction_loop(registry, actions, shutdown))
        .await
        .expect("returns promptly");
}

#[tokio::test]
async fn tag_eviction_loop_does_not_evict_tags_younger_than_the_interval() {
    let registry = Arc::new(DeviceRegistry::new());
    let device = DeviceConfig::parse("reader-1", br#"{"READER": "SERIAL", "CONNECTION": "AUTO"}"#).unwrap();
    registry.insert(device).await.unwrap();
    registry
        .observe_tag("READER-1", RawTag { device: "READER-1".to_string(), epc: "E1".to_string(), tid: None, ant: Some(1), rssi: Some(-40) })
        .await;

    let actions = ActionsConfig { clear_old_tags_interval: Some(1), ..Default::default() };
    let shutdown = CancellationToken::new();
    let shutdown_for_task = shutdown.clone();
    let registry_for_task = registry.clone();
    let handle = tokio::spawn(run_tag_eviction_loop(registry_for_task, actions, shutdown_for_task));

    tokio::time::sleep(Duration::from_millis(1200)).await;
    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(2), handle).await.expect("loop exits").unwrap();
    // A 1-second-old tag observed moments ago should not have been evicted by a 1s TTL sweep yet.
    assert_eq!(registry.tag_count("READER-1").await.unwrap(), 1);
}

fn temp_sqlite_url_for_test() -> (tempfile::TempDir, String) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("maintenance.sqlite3");
    let url = format!("sqlite://{}?mode=rwc", path.display());
    (dir, url)
}
