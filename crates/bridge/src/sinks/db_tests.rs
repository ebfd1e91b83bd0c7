// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use chrono::{Duration as ChronoDuration, Utc};

use super::*;
use crate::event::Tag;

fn temp_sqlite_url() -> (tempfile::TempDir, String) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bridge.sqlite3");
    let url = format!("sqlite://{}?mode=rwc", path.display());
    (dir, url)
}

fn tag_event(epc: &str, timestamp: chrono::DateTime<Utc>) -> Event {
    Event {
        timestamp,
        device: "READER-1".to_string(),
        event_type: "tag".to_string(),
        event_data: EventData::Tag(Tag {
            device: "READER-1".to_string(),
            epc: epc.to_string(),
            tid: None,
            ant: 1,
            rssi: Some(-40),
            gtin: "00000000000000".to_string(),
            timestamp,
            count: 1,
        }),
    }
}

#[tokio::test]
async fn connect_creates_schema_and_accepts_a_tag_publish() {
    let (_dir, url) = temp_sqlite_url();
    let sink = DbSink::connect(&url).await.unwrap();
    let event = tag_event("E2001", Utc::now());
    sink.publish(&event).await.unwrap();
}

#[tokio::test]
async fn publish_routes_non_tag_events_into_the_events_table() {
    let (_dir, url) = temp_sqlite_url();
    let sink = DbSink::connect(&url).await.unwrap();
    let event = Event::connection("READER-1", true);
    sink.publish(&event).await.unwrap();
}

#[tokio::test]
async fn prune_older_than_deletes_only_stale_rows() {
    let (_dir, url) = temp_sqlite_url();
    let sink = DbSink::connect(&url).await.unwrap();

    let old_event = tag_event("E2OLD", Utc::now() - ChronoDuration::days(30));
    let fresh_event = tag_event("E2NEW", Utc::now());
    sink.publish(&old_event).await.unwrap();
    sink.publish(&fresh_event).await.unwrap();

    let cutoff = Utc::now() - ChronoDuration::days(7);
    let deleted = sink.prune_older_than(cutoff).await.unwrap();
    assert_eq!(deleted, 1);

    // Pruning again deletes nothing further.
    let deleted_again = sink.prune_older_than(cutoff).await.unwrap();
    assert_eq!(deleted_again, 0);
}

#[test]
fn sink_name_is_db() {
    // `name()` needs no connection, so exercise it against a pool
    // variant directly rather than paying for an async connect.
    assert_eq!(
        DbSink { pool: Pool::Sqlite(sqlx::SqlitePool::connect_lazy("sqlite://:memory:").unwrap()) }.name(),
        "db"
    );
}
