// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Generic line-oriented passthrough for the `SERIAL` and `TCP` device
//! kinds: devices that are not RFID readers at all (barcode scanners,
//! PLCs, generic serial peripherals) but are still useful to bridge
//! into the same event stream. Grounded on the source's `OTHERS/SERIAL`
//! and `OTHERS/TCP` handlers, which do nothing but decode each line as
//! UTF-8 and forward it as a generic event under a configurable
//! `event_type`.

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::driver::{dispatch_command, Driver, DriverCommand, DriverFuture, EventSink, WriteEpcCommand, WriteGpoCommand};
use crate::error::BridgeError;
use crate::event::{RawTag, ReaderKind};
use crate::transport::{drain_lines, Transport, TransportEvent};

fn is_hex24(s: &str) -> bool {
    s.len() == 24 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Which config/device kind this instance represents; both share the
/// same line-forwarding behavior, differing only in transport and the
/// reported [`ReaderKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassthroughKind {
    Serial,
    Tcp,
}

pub struct SerialTcpDriver {
    device: String,
    kind: PassthroughKind,
    event_type: String,
    transport: Box<dyn Transport>,
    connected: bool,
    reading: bool,
}

impl SerialTcpDriver {
    pub fn new(device: impl Into<String>, kind: PassthroughKind, event_type: impl Into<String>, transport: Box<dyn Transport>) -> Self {
        Self { device: device.into(), kind, event_type: event_type.into(), transport, connected: false, reading: false }
    }
}

impl Driver for SerialTcpDriver {
    fn reader_kind(&self) -> ReaderKind {
        match self.kind {
            PassthroughKind::Serial => ReaderKind::Serial,
            PassthroughKind::Tcp => ReaderKind::Tcp,
        }
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn is_reading(&self) -> bool {
        self.reading
    }

    fn connect<'a>(
        &'a mut self,
        events: EventSink,
        mut commands: mpsc::Receiver<DriverCommand>,
        shutdown: CancellationToken,
    ) -> DriverFuture<'a> {
        Box::pin(async move {
            self.transport.connect().await?;
            self.connected = true;
            self.reading = true;
            events.on_connect().await;
            events.on_start().await;

            let mut buf: Vec<u8> = Vec::new();
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    command = commands.recv() => {
                        if let Some(command) = command {
                            dispatch_command(self, command).await;
                        }
                    }
                    event = self.transport.next() => {
                        match event? {
                            None => break,
                            Some(TransportEvent::IdleFlush) => buf.clear(),
                            Some(TransportEvent::Data(chunk)) => {
                                buf.extend_from_slice(&chunk);
                                for line in drain_lines(&mut buf) {
                                    let Ok(text) = String::from_utf8(line) else { continue };
                                    if is_hex24(&text) {
                                        events
                                            .on_tag(RawTag {
                                                device: self.device.clone(),
                                                epc: text,
                                                tid: None,
                                                ant: Some(1),
                                                rssi: None,
                                            })
                                            .await;
                                    } else {
                                        events.on_event(self.event_type.clone(), serde_json::Value::String(text)).await;
                                    }
                                }
                            }
                        }
                    }
                }
            }

            self.connected = false;
            self.reading = false;
            events.on_stop().await;
            events.on_disconnect().await;
            let _ = self.transport.close().await;
            Ok(())
        })
    }

    fn disconnect(&mut self) -> DriverFuture<'_> {
        Box::pin(async move {
            self.transport.close().await?;
            self.connected = false;
            self.reading = false;
            Ok(())
        })
    }

    fn start_inventory(&mut self) -> DriverFuture<'_> {
        Box::pin(async move {
            self.reading = true;
            Ok(())
        })
    }

    fn stop_inventory(&mut self) -> DriverFuture<'_> {
        Box::pin(async move {
            self.reading = false;
            Ok(())
        })
    }

    fn clear_tags(&mut self) -> DriverFuture<'_> {
        Box::pin(async move { Ok(()) })
    }

    fn write_epc(&mut self, _cmd: WriteEpcCommand) -> DriverFuture<'_> {
        Box::pin(async move {
            Err(BridgeError::Validation("passthrough devices cannot write EPCs".into()))
        })
    }

    fn write_gpo(&mut self, _cmd: WriteGpoCommand) -> DriverFuture<'_> {
        Box::pin(async move {
            Err(BridgeError::Validation("passthrough devices have no GPO".into()))
        })
    }
}

/// Best-effort write used by keep-alive style passthrough devices that
/// echo on idle, kept separate from the `Transport::write` plumbing so
/// tests can exercise it without a real transport.
pub fn ping_payload() -> Bytes {
    Bytes::from_static(b"ping\n")
}

pub const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(3);

#[cfg(test)]
#[path = "serial_tcp_tests.rs"]
mod tests;
