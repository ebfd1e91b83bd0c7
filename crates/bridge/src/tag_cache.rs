// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-device EPC→[`Tag`] cache with TTL eviction and the RSSI dedup
//! invariant: a tag already seen keeps its recorded RSSI unless the new
//! read is strictly stronger (closer to zero), but its `count` and
//! `timestamp` always advance. Grounded on the source's `on_tag`
//! handler in `app/services/events/on_event.py`, with that handler's
//! ambiguous "last write wins" RSSI comparison replaced by a single
//! fixed rule.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;

use crate::event::{RawTag, Tag};
use crate::gtin::decode_sgtin96;

/// An RSSI closer to zero (less negative) is "stronger". `None` never
/// beats a prior known value and never needs beating by one.
fn is_stronger(candidate: Option<i32>, incumbent: Option<i32>) -> bool {
    match (candidate, incumbent) {
        (Some(c), Some(i)) => c > i,
        (Some(_), None) => true,
        (None, _) => false,
    }
}

/// Per-device tag store. One instance per configured device; the
/// pipeline holds these behind the device registry.
#[derive(Debug, Default)]
pub struct TagCache {
    tags: HashMap<String, Tag>,
}

impl TagCache {
    pub fn new() -> Self {
        Self { tags: HashMap::new() }
    }

    /// Apply a raw detection: insert if new, else bump `count`/`timestamp`
    /// and only overwrite `rssi`/`ant`/`tid` when the new read is strictly
    /// stronger per [`is_stronger`]. Returns the resulting tag plus
    /// whether this EPC was newly inserted, so callers can suppress
    /// re-emission for a repeat sighting and only publish on a first
    /// sighting.
    pub fn observe(&mut self, raw: RawTag) -> (Tag, bool) {
        let now = Utc::now();
        if let Some(existing) = self.tags.get_mut(&raw.epc) {
            existing.count += 1;
            existing.timestamp = now;
            if is_stronger(raw.rssi, existing.rssi) {
                existing.rssi = raw.rssi;
                existing.ant = raw.ant.unwrap_or(existing.ant);
                if raw.tid.is_some() {
                    existing.tid = raw.tid;
                }
            }
            return (existing.clone(), false);
        }

        let gtin = decode_sgtin96(&raw.epc).unwrap_or_default();
        let tag = Tag {
            device: raw.device,
            epc: raw.epc.clone(),
            tid: raw.tid,
            ant: raw.ant.unwrap_or(1),
            rssi: raw.rssi,
            gtin,
            timestamp: now,
            count: 1,
        };
        self.tags.insert(raw.epc, tag.clone());
        (tag, true)
    }

    pub fn get(&self, epc: &str) -> Option<&Tag> {
        self.tags.get(epc)
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn epcs(&self) -> Vec<String> {
        self.tags.keys().cloned().collect()
    }

    pub fn all(&self) -> Vec<Tag> {
        self.tags.values().cloned().collect()
    }

    /// Count distinct EPCs grouped by `gtin`, for the `get_gtin_counts`
    /// control-surface operation.
    pub fn gtin_counts(&self) -> HashMap<String, u64> {
        let mut counts = HashMap::new();
        for tag in self.tags.values() {
            *counts.entry(tag.gtin.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// Clear all cached tags for this device (`clear_tags` control op).
    pub fn clear(&mut self) {
        self.tags.clear();
    }

    /// Evict tags whose `timestamp` is older than `ttl`, returning how
    /// many were removed. Used by the maintenance task's periodic sweep
    /// when `CLEAR_OLD_TAGS_INTERVAL` is configured.
    pub fn evict_older_than(&mut self, ttl: Duration) -> usize {
        let cutoff = Utc::now() - chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero());
        let before = self.tags.len();
        self.tags.retain(|_, tag| tag.timestamp >= cutoff);
        before - self.tags.len()
    }
}

#[cfg(test)]
#[path = "tag_cache_tests.rs"]
mod tests;
