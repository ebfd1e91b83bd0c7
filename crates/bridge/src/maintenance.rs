// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Periodic maintenance: nightly database pruning at midnight in a
//! fixed UTC−3 offset, and tag TTL eviction on `CLEAR_OLD_TAGS_INTERVAL`.
//! Grounded on the source's `DatabaseEngine.clear_db` (delete rows older
//! than `STORAGE_DAYS`, logging per-table failures without aborting the
//! sweep) and the scheduler that wakes it at local midnight; the fixed
//! UTC−3 offset is a preserved quirk of the source rather than a design
//! choice.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::ActionsConfig;
use crate::registry::SharedDeviceRegistry;
use crate::sinks::db::DbSink;

const UTC_MINUS_3_WEST_SECS: i32 = 3 * 3600;

/// Offset of the next local midnight (fixed UTC−3) from `now`, clamped
/// to a minimum of one second so a sample taken exactly at midnight
/// still sleeps a full day rather than firing immediately.
fn duration_until_next_midnight(now: DateTime<Utc>) -> Duration {
    let offset = FixedOffset::west_opt(UTC_MINUS_3_WEST_SECS).expect("valid fixed offset");
    let local = now.with_timezone(&offset);
    let next_midnight_local = (local.date_naive() + chrono::Duration::days(1)).and_hms_opt(0, 0, 0).expect("valid time");
    let next_midnight = offset.from_local_datetime(&next_midnight_local).single().expect("unambiguous local time");
    let delta = next_midnight.with_timezone(&Utc) - now;
    delta.to_std().unwrap_or(Duration::from_secs(1)).max(Duration::from_secs(1))
}

/// Run the nightly pruning loop until `shutdown` fires. Each iteration
/// sleeps until the next local midnight (UTC−3), then deletes rows
/// older than `storage_days`; a pruning failure is logged and the loop
/// simply waits for the following midnight rather than retrying in a
/// tight loop.
pub async fn run_pruning_loop(db: Arc<DbSink>, actions: ActionsConfig, shutdown: CancellationToken) {
    if !actions.pruning_enabled() {
        info!("database pruning disabled (STORAGE_DAYS <= 0)");
        return;
    }

    loop {
        let delay = duration_until_next_midnight(Utc::now());
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.cancelled() => break,
        }
        if shutdown.is_cancelled() {
            break;
        }

        let cutoff = Utc::now() - chrono::Duration::days(actions.storage_days);
        match db.prune_older_than(cutoff).await {
            Ok(deleted) => info!(deleted, cutoff = %cutoff, "nightly database pruning completed"),
            Err(e) => warn!(error = %e, "nightly database pruning failed"),
        }
    }
}

/// Run the tag TTL eviction loop until `shutdown` fires, waking every
/// `CLEAR_OLD_TAGS_INTERVAL` seconds to drop stale entries from every
/// device's [`crate::tag_cache::TagCache`].
pub async fn run_tag_eviction_loop(registry: SharedDeviceRegistry, actions: ActionsConfig, shutdown: CancellationToken) {
    let Some(interval_secs) = actions.clear_old_tags_interval.filter(|secs| *secs > 0) else {
        info!("tag TTL eviction disabled (CLEAR_OLD_TAGS_INTERVAL unset)");
        return;
    };
    let interval = Duration::from_secs(interval_secs);

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.cancelled() => break,
        }
        if shutdown.is_cancelled() {
            break;
        }
        let evicted = registry.evict_stale_tags(interval).await;
        if evicted > 0 {
            info!(evicted, "tag TTL eviction swept stale entries");
        }
    }
}

#[cfg(test)]
#[path = "maintenance_tests.rs"]
mod tests;
