// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::VecDeque;
use std::sync::Mutex;

use bytes::Bytes;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{parse_tag_event, R700IotDriver};
use crate::driver::{Driver, DriverEvent, EventSink};
use crate::transport::{Transport, TransportEvent, TransportFuture};

struct ScriptedTransport {
    events: Mutex<VecDeque<Option<TransportEvent>>>,
    writes: Mutex<Vec<Bytes>>,
    connected: bool,
}

impl ScriptedTransport {
    fn new(events: Vec<Option<TransportEvent>>) -> Self {
        Self { events: Mutex::new(events.into()), writes: Mutex::new(Vec::new()), connected: false }
    }
}

impl Transport for ScriptedTransport {
    fn connect(&mut self) -> TransportFuture<'_, ()> {
        self.connected = true;
        Box::pin(async move { Ok(()) })
    }

    fn write(&mut self, data: Bytes) -> TransportFuture<'_, ()> {
        self.writes.lock().expect("lock").push(data);
        Box::pin(async move { Ok(()) })
    }

    fn next(&mut self) -> TransportFuture<'_, Option<TransportEvent>> {
        Box::pin(async move { Ok(self.events.lock().expect("lock").pop_front().flatten()) })
    }

    fn close(&mut self) -> TransportFuture<'_, ()> {
        self.connected = false;
        Box::pin(async move { Ok(()) })
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

#[test]
fn parse_tag_event_extracts_epc_rssi_ant() {
    let line = json!({
        "tagInventoryEvent": {
            "epc": "E2001234",
            "peakRssiCdbm": -5500,
            "antennaPort": 2
        }
    })
    .to_string();
    let tag = parse_tag_event("DOCK-1", line.as_bytes()).unwrap();
    assert_eq!(tag.epc, "E2001234");
    assert_eq!(tag.rssi, Some(-55));
    assert_eq!(tag.ant, Some(2));
}

#[test]
fn parse_tag_event_ignores_non_tag_events() {
    let line = json!({ "heartbeatEvent": {} }).to_string();
    assert!(parse_tag_event("DOCK-1", line.as_bytes()).is_none());
}

#[tokio::test]
async fn connect_starts_inventory_and_forwards_tags() {
    let tag_line = json!({ "tagInventoryEvent": { "epc": "AABB", "peakRssiCdbm": -4000, "antennaPort": 1 } }).to_string();
    let transport = ScriptedTransport::new(vec![
        Some(TransportEvent::Data(Bytes::from(tag_line.into_bytes()))),
        None,
    ]);
    let mut driver = R700IotDriver::new("DOCK-1", true, json!({ "presetId": "default"}), Box::new(transport));

    let (tx, mut rx) = mpsc::channel(16);
    let sink = EventSink::new(tx);
    let (_cmd_tx, cmd_rx) = mpsc::channel(1);
    driver.connect(sink, cmd_rx, CancellationToken::new()).await.unwrap();

    let mut tags = Vec::new();
    let mut saw_start = false;
    while let Ok(event) = rx.try_recv() {
        match event {
            DriverEvent::Tag(tag) => tags.push(tag),
            DriverEvent::Start => saw_start = true,
            _ => {}
        }
    }
    assert!(saw_start);
    assert_eq!(tags.len(), 1);
    assert_eq!(tags[0].epc, "AABB");
}

#[tokio::test]
async fn write_epc_requires_explicit_target() {
    let transport = ScriptedTransport::new(vec![]);
    let mut driver = R700IotDriver::new("DOCK-1", false, json!({}), Box::new(transport));
    let cmd = crate::driver::WriteEpcCommand::new(
        crate::driver::WriteTarget::Unspecified,
        "a".repeat(24),
        "deadbeef",
    )
    .unwrap();
    assert!(driver.write_epc(cmd).await.is_err());
}

#[tokio::test]
async fn stop_inventory_clears_reading_flag() {
    let transport = ScriptedTransport::new(vec![]);
    let mut driver = R700IotDriver::new("DOCK-1", false, json!({}), Box::new(transport));
    driver.start_inventory().await.unwrap();
    assert!(driver.is_reading());
    driver.stop_inventory().await.unwrap();
    assert!(!driver.is_reading());
}
