// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{parse_line, Line, X714Driver};
use crate::driver::{Driver, DriverEvent, EventSink};
use crate::transport::{Transport, TransportEvent, TransportFuture};

struct ScriptedTransport {
    events: Mutex<VecDeque<Option<TransportEvent>>>,
    writes: Arc<Mutex<Vec<Bytes>>>,
    connected: bool,
}

impl ScriptedTransport {
    fn new(events: Vec<Option<TransportEvent>>) -> Self {
        Self { events: Mutex::new(events.into()), writes: Arc::new(Mutex::new(Vec::new())), connected: false }
    }

    fn with_writes_handle(events: Vec<Option<TransportEvent>>) -> (Self, Arc<Mutex<Vec<Bytes>>>) {
        let transport = Self::new(events);
        let handle = transport.writes.clone();
        (transport, handle)
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

/// Scenario 1 from the spec's concrete-scenarios list: a single
/// `#t+@...` frame decodes to the documented fields, with RSSI negated.
#[test]
fn parse_line_decodes_scenario_one_tag_frame() {
    let line = "#t+@a1b2c3d4e5f60718293a4b5c|000000000000000000000001|1|70";
    match parse_line("GATE-1", line) {
        Line::Tag(tag) => {
            assert_eq!(tag.epc, "a1b2c3d4e5f60718293a4b5c");
            assert_eq!(tag.tid.as_deref(), Some("000000000000000000000001"));
            assert_eq!(tag.ant, Some(1));
            assert_eq!(tag.rssi, Some(-70));
        }
        _ => panic!("expected a tag line"),
    }
}

#[test]
fn parse_line_rejects_non_hex_epc() {
    assert!(matches!(parse_line("GATE-1", "#t+@zzzz|0|1|70"), Line::Unrecognized));
}

#[test]
fn parse_line_accepts_bare_hex_as_minimal_tag() {
    let epc = "a".repeat(24);
    match parse_line("GATE-1", &epc) {
        Line::Tag(tag) => {
            assert_eq!(tag.epc, epc);
            assert_eq!(tag.ant, Some(1));
            assert_eq!(tag.rssi, Some(0));
            assert!(tag.tid.is_none());
        }
        _ => panic!("expected a minimal tag"),
    }
}

#[test]
fn parse_line_recognizes_read_on_off() {
    assert!(matches!(parse_line("GATE-1", "#read:on"), Line::ReadOn));
    assert!(matches!(parse_line("GATE-1", "#read:off"), Line::ReadOff));
}

#[test]
fn parse_line_recognizes_set_cmd_echo() {
    assert!(matches!(parse_line("GATE-1", "#set_cmd:SESSION=1|BUZZER=ON"), Line::SetCmdAck));
}

#[tokio::test]
async fn connect_sends_setup_lines_and_forwards_tags() {
    let transport = ScriptedTransport::new(vec![
        Some(TransportEvent::Data(Bytes::from_static(
            b"#read:on\n#t+@a1b2c3d4e5f60718293a4b5c|000000000000000000000001|1|70\n",
        ))),
        None,
    ]);
    let mut driver = X714Driver::new("GATE-1", 1, true, true, Box::new(transport));

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
    assert_eq!(tags[0].epc, "a1b2c3d4e5f60718293a4b5c");
    assert_eq!(tags[0].rssi, Some(-70));
}

#[tokio::test]
async fn start_inventory_sets_reading_flag() {
    let transport = ScriptedTransport::new(vec![]);
    let mut driver = X714Driver::new("GATE-1", 1, false, false, Box::new(transport));
    driver.start_inventory().await.unwrap();
    assert!(driver.is_reading());
}

#[tokio::test]
async fn write_epc_with_unspecified_target_still_sends() {
    let transport = ScriptedTransport::new(vec![]);
    let mut driver = X714Driver::new("GATE-1", 1, false, false, Box::new(transport));
    let cmd = crate::driver::WriteEpcCommand::new(
        crate::driver::WriteTarget::Unspecified,
        "a".repeat(24),
        "deadbeef",
    )
    .unwrap();
    assert!(driver.write_epc(cmd).await.is_ok());
}

#[tokio::test]
async fn write_epc_resolves_epc_target_to_cached_tid() {
    let (transport, writes) = ScriptedTransport::with_writes_handle(vec![]);
    let mut driver = X714Driver::new("GATE-1", 1, false, false, Box::new(transport));
    let epc = "a".repeat(24);
    let tid = "1".repeat(24);
    driver.tag_cache.insert(epc.clone(), tid.clone());

    let cmd = crate::driver::WriteEpcCommand::new(crate::driver::WriteTarget::Epc(epc), "b".repeat(24), "deadbeef")
        .unwrap();
    driver.write_epc(cmd).await.unwrap();

    let sent = writes.lock().unwrap();
    assert_eq!(sent.len(), 1);
    let line = String::from_utf8(sent[0].to_vec()).unwrap();
    assert!(line.contains(&format!(";tid;{tid}")), "expected tid-target write, got {line:?}");
}

#[tokio::test]
async fn write_gpo_is_not_found() {
    let transport = ScriptedTransport::new(vec![]);
    let mut driver = X714Driver::new("GATE-1", 1, false, false, Box::new(transport));
    let cmd = crate::driver::WriteGpoCommand {
        pin: 1,
        state: true,
        control: crate::event::GpoControl::Static,
        pulse_ms: 0,
    };
    assert!(matches!(driver.write_gpo(cmd).await, Err(crate::error::BridgeError::NotFound(_))));
}
