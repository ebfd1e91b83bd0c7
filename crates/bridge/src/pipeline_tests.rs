// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};

use super::*;
use crate::config::DeviceConfig;
use crate::driver::DriverEvent;
use crate::event_ring::EventRing;
use crate::registry::DeviceRegistry;
use crate::sinks::SinkFuture;

/// Records every event it's asked to publish; can be made to always
/// fail so the "one sink failing never blocks the others" invariant
/// can be exercised directly.
struct RecordingSink {
    name: &'static str,
    received: std::sync::Mutex<Vec<Event>>,
    fail: bool,
    call_count: AtomicUsize,
}

impl RecordingSink {
    fn new(name: &'static str, fail: bool) -> Self {
        Self { name, received: std::sync::Mutex::new(Vec::new()), fail, call_count: AtomicUsize::new(0) }
    }
}

impl Sink for RecordingSink {
    fn name(&self) -> &'static str {
        self.name
    }

    fn publish<'a>(&'a self, event: &'a Event) -> SinkFuture<'a> {
        Box::pin(async move {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(BridgeError::Sink("boom".to_string()));
            }
            self.received.lock().unwrap().push(event.clone());
            Ok(())
        })
    }
}

async fn harness() -> (Pipeline, Arc<RwLock<EventRing>>, Arc<DeviceRegistry>) {
    let registry = Arc::new(DeviceRegistry::new());
    registry.insert(DeviceConfig::parse("reader-1", br#"{"READER": "SERIAL", "CONNECTION": "AUTO"}"#).unwrap()).await.unwrap();
    let ring = Arc::new(RwLock::new(EventRing::new()));
    (Pipeline::new(registry.clone(), ring.clone(), Vec::new()), ring, registry)
}

#[tokio::test]
async fn connect_event_updates_registry_state_and_ring() {
    let (pipeline, ring, registry) = harness().await;
    pipeline.handle("READER-1".to_string(), DriverEvent::Connect).await;
    assert_eq!(registry.state("READER-1").await, crate::event::DeviceState::Connected);
    assert_eq!(ring.read().await.len(), 1);
}

#[tokio::test]
async fn start_then_stop_toggles_reading_state() {
    let (pipeline, _ring, registry) = harness().await;
    pipeline.handle("READER-1".to_string(), DriverEvent::Connect).await;
    pipeline.handle("READER-1".to_string(), DriverEvent::Start).await;
    assert_eq!(registry.state("READER-1").await, crate::event::DeviceState::Reading);
    pipeline.handle("READER-1".to_string(), DriverEvent::Stop).await;
    assert_eq!(registry.state("READER-1").await, crate::event::DeviceState::Connected);
}

#[tokio::test]
async fn tag_event_is_routed_through_the_registrys_tag_cache_and_never_touches_the_ring() {
    let (pipeline, ring, registry) = harness().await;
    let raw = crate::event::RawTag { device: "READER-1".to_string(), epc: "E2001".to_string(), tid: None, ant: Some(1), rssi: Some(-40) };
    pipeline.handle("READER-1".to_string(), DriverEvent::Tag(raw)).await;
    assert_eq!(registry.tag_count("READER-1").await.unwrap(), 1);
    assert_eq!(ring.read().await.len(), 0);
}

#[tokio::test]
async fn repeat_tag_sighting_does_not_re_emit_to_any_sink() {
    let registry = Arc::new(DeviceRegistry::new());
    registry.insert(DeviceConfig::parse("reader-1", br#"{"READER": "SERIAL", "CONNECTION": "AUTO"}"#).unwrap()).await.unwrap();
    let ring = Arc::new(RwLock::new(EventRing::new()));
    let sink = Arc::new(RecordingSink::new("recorder", false));
    let pipeline = Pipeline::new(registry.clone(), ring.clone(), vec![sink.clone()]);
    let raw = crate::event::RawTag { device: "READER-1".to_string(), epc: "E2001".to_string(), tid: None, ant: Some(1), rssi: Some(-40) };

    pipeline.handle("READER-1".to_string(), DriverEvent::Tag(raw.clone())).await;
    pipeline.handle("READER-1".to_string(), DriverEvent::Tag(raw)).await;

    assert_eq!(registry.tag_count("READER-1").await.unwrap(), 1);
    assert_eq!(ring.read().await.len(), 0);
    assert_eq!(sink.call_count.load(Ordering::SeqCst), 1);
    assert_eq!(registry.tags("READER-1").await.unwrap()[0].count, 2);
}

#[tokio::test]
async fn custom_event_is_forwarded_as_text_event_data() {
    let (pipeline, ring, _registry) = harness().await;
    pipeline
        .handle("READER-1".to_string(), DriverEvent::Custom { event_type: "gpi".to_string(), data: serde_json::json!({"pin": 1}) })
        .await;
    let snapshot = ring.read().await.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].event_type, "gpi");
    assert!(matches!(snapshot[0].event_data, EventData::Text(_)));
}

#[tokio::test]
async fn a_failing_sink_does_not_prevent_other_sinks_from_receiving_the_event() {
    let registry = Arc::new(DeviceRegistry::new());
    registry.insert(DeviceConfig::parse("reader-1", br#"{"READER": "SERIAL", "CONNECTION": "AUTO"}"#).unwrap()).await.unwrap();
    let ring = Arc::new(RwLock::new(EventRing::new()));
    let failing = Arc::new(RecordingSink::new("failing", true));
    let healthy = Arc::new(RecordingSink::new("healthy", false));
    let pipeline = Pipeline::new(registry, ring, vec![failing.clone(), healthy.clone()]);

    pipeline.handle("READER-1".to_string(), DriverEvent::Connect).await;

    assert_eq!(failing.call_count.load(Ordering::SeqCst), 1);
    assert_eq!(healthy.call_count.load(Ordering::SeqCst), 1);
    assert_eq!(healthy.received.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn run_drains_events_until_the_channel_closes() {
    let (pipeline, ring, _registry) = harness().await;
    let (tx, rx) = mpsc::channel(8);
    tx.send(("READER-1".to_string(), DriverEvent::Connect)).await.unwrap();
    tx.send(("READER-1".to_string(), DriverEvent::Start)).await.unwrap();
    drop(tx);

    pipeline.run(rx).await;
    assert_eq!(ring.read().await.len(), 2);
}
