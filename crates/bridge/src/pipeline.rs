// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event pipeline: consumes canonical [`DriverEvent`]s tagged with
//! their device name, updates the [`DeviceRegistry`], and fans the
//! resulting [`Event`] out to every configured sink. Only connection,
//! inventory, and custom events are recorded in the [`EventRing`]; tag
//! sightings are not, matching the source's `on_event.py` split between
//! `on_events()` (appends to `self.events`) and `on_tag()`/
//! `on_tag_events()` (cache + sink fan-out only). Each sink is isolated
//! so one failing sink (e.g. an unreachable MQTT broker) never blocks
//! the others or the reader pipeline itself.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tracing::warn;

use crate::driver::DriverEvent;
use crate::event::{Event, EventData};
use crate::event_ring::EventRing;
use crate::registry::SharedDeviceRegistry;
use crate::sinks::Sink;

/// Convert a driver's free-form custom payload into the canonical
/// [`EventData`] carried on the ring/sinks.
fn custom_event_data(data: Value) -> EventData {
    match data {
        Value::Bool(b) => EventData::Bool(b),
        Value::String(s) => EventData::Text(s),
        other => EventData::Text(other.to_string()),
    }
}

pub struct Pipeline {
    registry: SharedDeviceRegistry,
    ring: Arc<RwLock<EventRing>>,
    sinks: Arc<RwLock<Vec<Arc<dyn Sink>>>>,
}

impl Pipeline {
    pub fn new(registry: SharedDeviceRegistry, ring: Arc<RwLock<EventRing>>, sinks: Vec<Arc<dyn Sink>>) -> Self {
        Self { registry, ring, sinks: Arc::new(RwLock::new(sinks)) }
    }

    /// A clone of the live sink list, shared with whoever owns this
    /// pipeline, so `set_actions` can swap sinks in place without
    /// tearing down the running pipeline task.
    pub fn sinks_handle(&self) -> Arc<RwLock<Vec<Arc<dyn Sink>>>> {
        self.sinks.clone()
    }

    /// Publish an event to every sink, independently: a sink error is
    /// logged and does not stop the others from receiving the event.
    async fn fan_out(&self, event: &Event) {
        let sinks = self.sinks.read().await.clone();
        for sink in &sinks {
            if let Err(e) = sink.publish(event).await {
                warn!(device = event.device.as_str(), sink = sink.name(), error = %e, "sink publish failed");
            }
        }
    }

    /// Record a non-tag event in the ring and publish it to every sink.
    /// Tag sightings never touch the ring — only connection/inventory/
    /// custom events do, matching the source's `on_events()`, which is
    /// the only path that appends to `self.events`; tags are handled
    /// entirely by `on_tag()`/`on_tag_events()` instead.
    async fn emit(&self, event: Event) {
        self.ring.write().await.push(event.clone());
        self.fan_out(&event).await;
    }

    async fn handle(&self, device: String, event: DriverEvent) {
        match event {
            DriverEvent::Connect => {
                self.registry.set_connected(&device, true).await;
                self.emit(Event::connection(device, true)).await;
            }
            DriverEvent::Disconnect => {
                self.registry.set_connected(&device, false).await;
                self.emit(Event::connection(device, false)).await;
            }
            DriverEvent::Start => {
                self.registry.set_reading(&device, true).await;
                let _ = self.registry.clear_tags(&device).await;
                self.emit(Event::inventory(device, true)).await;
            }
            DriverEvent::Stop => {
                self.registry.set_reading(&device, false).await;
                self.emit(Event::inventory(device, false)).await;
            }
            DriverEvent::Tag(raw) => {
                if let Some((tag, is_new)) = self.registry.observe_tag(&device, raw).await {
                    if is_new {
                        let event = Event {
                            timestamp: tag.timestamp,
                            device,
                            event_type: "tag".to_string(),
                            event_data: EventData::Tag(tag),
                        };
                        self.fan_out(&event).await;
                    }
                }
            }
            DriverEvent::Custom { event_type, data } => {
                self.emit(Event {
                    timestamp: chrono::Utc::now(),
                    device,
                    event_type,
                    event_data: custom_event_data(data),
                })
                .await;
            }
        }
    }

    /// Drain `rx` until the channel closes (every supervisor has
    /// exited), dispatching each event in turn.
    pub async fn run(self, mut rx: mpsc::Receiver<(String, DriverEvent)>) {
        while let Some((device, event)) = rx.recv().await {
            self.handle(device, event).await;
        }
    }
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
