// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::build_driver;
use crate::config::DeviceConfig;
use crate::driver::{Driver, DriverCommand, DriverEvent, DriverFuture, EventSink, WriteEpcCommand, WriteGpoCommand};
use crate::event::ReaderKind;
use crate::registry::CommandSlot;

#[test]
fn build_driver_dispatches_on_reader_kind() {
    let ur4 = DeviceConfig::parse("a", br#"{"READER": "UR4", "CONNECTION": "127.0.0.1"}"#).unwrap();
    assert_eq!(build_driver(&ur4).unwrap().reader_kind(), ReaderKind::Ur4);

    let serial = DeviceConfig::parse("b", br#"{"READER": "SERIAL", "CONNECTION": "AUTO"}"#).unwrap();
    assert_eq!(build_driver(&serial).unwrap().reader_kind(), ReaderKind::Serial);

    let icard = DeviceConfig::parse("c", br#"{"READER": "ICARD"}"#).unwrap();
    assert_eq!(build_driver(&icard).unwrap().reader_kind(), ReaderKind::Icard);
}

#[test]
fn build_driver_rejects_non_literal_tcp_host() {
    let ur4 = DeviceConfig::parse("a", br#"{"READER": "UR4", "CONNECTION": "reader.local"}"#).unwrap();
    assert!(build_driver(&ur4).is_err());
}

/// A driver whose `connect` immediately emits one event then returns,
/// so the supervisor loop's forward/backoff/shutdown plumbing can be
/// exercised without real hardware.
struct StubDriver {
    connect_count: Arc<AtomicUsize>,
}

impl Driver for StubDriver {
    fn reader_kind(&self) -> ReaderKind {
        ReaderKind::Serial
    }

    fn is_connected(&self) -> bool {
        false
    }

    fn is_reading(&self) -> bool {
        false
    }

    fn connect<'a>(
        &'a mut self,
        events: EventSink,
        _commands: mpsc::Receiver<DriverCommand>,
        _shutdown: CancellationToken,
    ) -> DriverFuture<'a> {
        self.connect_count.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            events.on_connect().await;
            Ok(())
        })
    }

    fn disconnect(&mut self) -> DriverFuture<'_> {
        Box::pin(async move { Ok(()) })
    }

    fn start_inventory(&mut self) -> DriverFuture<'_> {
        Box::pin(async move { Ok(()) })
    }

    fn stop_inventory(&mut self) -> DriverFuture<'_> {
        Box::pin(async move { Ok(()) })
    }

    fn clear_tags(&mut self) -> DriverFuture<'_> {
        Box::pin(async move { Ok(()) })
    }

    fn write_epc(&mut self, _cmd: WriteEpcCommand) -> DriverFuture<'_> {
        Box::pin(async move { Ok(()) })
    }

    fn write_gpo(&mut self, _cmd: WriteGpoCommand) -> DriverFuture<'_> {
        Box::pin(async move { Ok(()) })
    }
}

#[tokio::test]
async fn run_device_forwards_events_then_stops_on_shutdown() {
    let config = DeviceConfig::parse("stub", br#"{"READER": "SERIAL", "CONNECTION": "AUTO"}"#).unwrap();
    let connect_count = Arc::new(AtomicUsize::new(0));
    let driver = Box::new(StubDriver { connect_count: connect_count.clone() });
    let (tx, mut rx) = mpsc::channel(16);
    let shutdown = CancellationToken::new();
    let command_slot: CommandSlot = Arc::new(tokio::sync::Mutex::new(None));

    let shutdown_for_task = shutdown.clone();
    let handle = tokio::spawn(super::run_device(config, driver, tx, command_slot, shutdown_for_task));

    let (device, event) = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
        .await
        .expect("event arrives")
        .expect("channel open");
    assert_eq!(device, "STUB");
    assert!(matches!(event, DriverEvent::Connect));

    shutdown.cancel();
    tokio::time::timeout(std::time::Duration::from_secs(5), handle).await.expect("supervisor exits").unwrap();
    assert!(connect_count.load(Ordering::SeqCst) >= 1);
}
