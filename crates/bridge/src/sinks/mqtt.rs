// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! MQTT sink: publishes every event, QoS 0, to a topic parsed out of
//! the configured `MQTT_URL`. Grounded on the source's
//! `Actions.init_mqtt`/`send_payload(mqtt=True)`, which lazily connects
//! a single persistent client on first use and publishes to
//! `urlparse(endpoint).path.lstrip("/")`.

use std::time::Duration;

use rumqttc::{AsyncClient, EventLoop, MqttOptions, QoS};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::BridgeError;
use crate::event::Event;
use crate::sinks::{Sink, SinkFuture};

const DEFAULT_PORT: u16 = 1883;
const KEEP_ALIVE: Duration = Duration::from_secs(30);

/// Split `mqtt://host[:port]/topic` into its broker address and topic.
fn parse_mqtt_url(url: &str) -> Result<(String, u16, String), BridgeError> {
    let rest = url
        .strip_prefix("mqtt://")
        .ok_or_else(|| BridgeError::Config(format!("MQTT_URL must start with mqtt://: {url:?}")))?;
    let (authority, path) = rest.split_once('/').unwrap_or((rest, ""));
    let (host, port) = match authority.split_once(':') {
        Some((host, port)) => {
            let port: u16 =
                port.parse().map_err(|_| BridgeError::Config(format!("invalid MQTT port in {url:?}")))?;
            (host.to_string(), port)
        }
        None => (authority.to_string(), DEFAULT_PORT),
    };
    if host.is_empty() {
        return Err(BridgeError::Config(format!("MQTT_URL missing host: {url:?}")));
    }
    Ok((host, port, path.to_string()))
}

/// Drives a `rumqttc` event loop to completion on a background task so
/// the client's internal state machine keeps making progress between
/// publishes.
fn spawn_event_loop(mut eventloop: EventLoop) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(event) => debug!(?event, "mqtt event loop notification"),
                Err(e) => {
                    warn!(error = %e, "mqtt event loop error");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    });
}

pub struct MqttSink {
    url: String,
    client: Mutex<Option<AsyncClient>>,
}

impl MqttSink {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into(), client: Mutex::new(None) }
    }

    /// Lazily connect the persistent client on first publish, mirroring
    /// the source's `init_mqtt` guard (`if self.mqtt_client is not None: return`).
    async fn client(&self) -> Result<AsyncClient, BridgeError> {
        let mut guard = self.client.lock().await;
        if let Some(client) = guard.as_ref() {
            return Ok(client.clone());
        }
        let (host, port, _topic) = parse_mqtt_url(&self.url)?;
        let mut options = MqttOptions::new("rfidbridge", host, port);
        options.set_keep_alive(KEEP_ALIVE);
        let (client, eventloop) = AsyncClient::new(options, 64);
        spawn_event_loop(eventloop);
        *guard = Some(client.clone());
        Ok(client)
    }
}

impl Sink for MqttSink {
    fn name(&self) -> &'static str {
        "mqtt"
    }

    fn publish<'a>(&'a self, event: &'a Event) -> SinkFuture<'a> {
        Box::pin(async move {
            let (_, _, topic) = parse_mqtt_url(&self.url)?;
            if topic.is_empty() {
                return Err(BridgeError::Config(format!("MQTT_URL missing topic path: {:?}", self.url)));
            }
            let client = self.client().await?;
            let payload = serde_json::to_vec(event).map_err(|e| BridgeError::Sink(e.to_string()))?;
            client
                .publish(&topic, QoS::AtMostOnce, false, payload)
                .await
                .map_err(|e| BridgeError::Sink(e.to_string()))?;
            debug!(topic = topic.as_str(), device = event.device.as_str(), "payload published to mqtt");
            Ok(())
        })
    }
}

#[cfg(test)]
#[path = "mqtt_tests.rs"]
mod tests;
