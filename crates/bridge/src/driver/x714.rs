// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! X714 reader driver: a line-terminated ASCII protocol that is
//! transport-agnostic — the same command/response grammar runs over
//! serial, BLE (Nordic UART Service), or TCP, selected by
//! `CONNECTION_TYPE`. Grounded on the source's X714
//! client, which issues `#READ:`/`#CLEAR`/`#WRITE:`/`#set_cmd:` text
//! commands and parses `#read:`/`#t+@`-prefixed response lines the
//! same way regardless of which transport carries them.

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::driver::{
    dispatch_command, Driver, DriverCommand, DriverFuture, EventSink, WriteEpcCommand, WriteGpoCommand, WriteTarget,
};
use crate::error::BridgeError;
use crate::event::{RawTag, ReaderKind};
use crate::transport::{drain_lines, Transport, TransportEvent};

fn encode_line(line: &str) -> Bytes {
    Bytes::from(format!("{line}\n").into_bytes())
}

fn is_hex24(s: &str) -> bool {
    s.len() == 24 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Delay between pausing and resuming inventory around a write.
const WRITE_PAUSE: Duration = Duration::from_millis(500);

/// One decoded inbound line, per the inbound event grammar.
enum Line {
    ReadOn,
    ReadOff,
    Tag(RawTag),
    SetCmdAck,
    Unrecognized,
}

/// Parse one inbound X714 line. `#t+@<epc>|<tid>|<ant>|<rssi>` carries
/// RSSI as a positive magnitude that is negated to dBm; a bare 24-hex
/// line is a minimal tag with `rssi=0`, `ant=1`.
fn parse_line(device: &str, line: &str) -> Line {
    if line.eq_ignore_ascii_case("#read:on") {
        return Line::ReadOn;
    }
    if line.eq_ignore_ascii_case("#read:off") {
        return Line::ReadOff;
    }
    if let Some(rest) = line.strip_prefix("#t+@") {
        let mut parts = rest.split('|');
        let epc = parts.next().unwrap_or_default().to_string();
        let tid = parts.next().filter(|s| !s.is_empty()).map(str::to_string);
        let ant = parts.next().and_then(|s| s.parse::<i32>().ok());
        let rssi = parts.next().and_then(|s| s.parse::<i32>().ok()).map(|magnitude| -magnitude);
        if !is_hex24(&epc) {
            return Line::Unrecognized;
        }
        return Line::Tag(RawTag { device: device.to_string(), epc, tid, ant, rssi });
    }
    if line.starts_with("#set_cmd:") {
        return Line::SetCmdAck;
    }
    if is_hex24(line) {
        return Line::Tag(RawTag {
            device: device.to_string(),
            epc: line.to_string(),
            tid: None,
            ant: Some(1),
            rssi: Some(0),
        });
    }
    Line::Unrecognized
}

pub struct X714Driver {
    device: String,
    session: u8,
    buzzer: bool,
    start_reading: bool,
    transport: Box<dyn Transport>,
    connected: bool,
    reading: bool,
    /// EPC→TID cache built from observed tags, consulted by `write_epc`
    /// to resolve an `epc` target to the more reliable `tid` selector.
    tag_cache: HashMap<String, String>,
}

impl X714Driver {
    pub fn new(
        device: impl Into<String>,
        session: u8,
        buzzer: bool,
        start_reading: bool,
        transport: Box<dyn Transport>,
    ) -> Self {
        Self {
            device: device.into(),
            session,
            buzzer,
            start_reading,
            transport,
            connected: false,
            reading: false,
            tag_cache: HashMap::new(),
        }
    }

    async fn send_line(&mut self, line: &str) -> Result<(), BridgeError> {
        self.transport.write(encode_line(line)).await
    }

    /// The compound config line the source sends once per connection:
    /// session and buzzer settings packed `key=value` pairs separated
    /// by `|`.
    async fn send_set_cmd(&mut self) -> Result<(), BridgeError> {
        let buzzer = if self.buzzer { "ON" } else { "OFF" };
        self.send_line(&format!("#set_cmd:SESSION={}|BUZZER={buzzer}", self.session)).await
    }
}

impl Driver for X714Driver {
    fn reader_kind(&self) -> ReaderKind {
        ReaderKind::X714
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
            events.on_connect().await;

            self.send_set_cmd().await?;
            if self.start_reading {
                self.send_line("#READ:ON").await?;
            }

            let mut buf = Vec::new();
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    command = commands.recv() => {
                        match command {
                            None => {}
                            Some(command) => dispatch_command(self, command).await,
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
                                    match parse_line(&self.device, &text) {
                                        Line::ReadOn => {
                                            self.reading = true;
                                            events.on_start().await;
                                        }
                                        Line::ReadOff => {
                                            self.reading = false;
                                            events.on_stop().await;
                                        }
                                        Line::Tag(tag) => {
                                            if let Some(tid) = &tag.tid {
                                                self.tag_cache.insert(tag.epc.clone(), tid.clone());
                                            }
                                            events.on_tag(tag).await
                                        }
                                        Line::SetCmdAck | Line::Unrecognized => {}
                                    }
                                }
                            }
                        }
                    }
                }
            }

            if self.reading {
                events.on_stop().await;
            }
            self.connected = false;
            self.reading = false;
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
            self.send_line("#READ:ON").await?;
            self.reading = true;
            Ok(())
        })
    }

    fn stop_inventory(&mut self) -> DriverFuture<'_> {
        Box::pin(async move {
            self.send_line("#READ:OFF").await?;
            self.reading = false;
            Ok(())
        })
    }

    fn clear_tags(&mut self) -> DriverFuture<'_> {
        Box::pin(async move {
            self.tag_cache.clear();
            self.send_line("#CLEAR").await
        })
    }

    /// Resolves an `epc` target to its cached `tid` when one has been
    /// observed, and pauses/resumes inventory around the write if
    /// currently reading, matching the general `write_epc` contract
    /// (tags are matched more reliably by TID than by the EPC being
    /// overwritten).
    fn write_epc(&mut self, cmd: WriteEpcCommand) -> DriverFuture<'_> {
        Box::pin(async move {
            let line = match &cmd.target {
                WriteTarget::Epc(v) => match self.tag_cache.get(v).cloned() {
                    Some(tid) => format!("#WRITE:{};{};tid;{tid}", cmd.new_epc, cmd.password),
                    None => format!("#WRITE:{};{};epc;{v}", cmd.new_epc, cmd.password),
                },
                WriteTarget::Tid(v) => format!("#WRITE:{};{};tid;{v}", cmd.new_epc, cmd.password),
                WriteTarget::Unspecified => format!("#WRITE:{};{}", cmd.new_epc, cmd.password),
            };

            let was_reading = self.reading;
            if was_reading {
                self.send_line("#READ:OFF").await?;
                tokio::time::sleep(WRITE_PAUSE).await;
            }
            let result = self.send_line(&line).await;
            if was_reading {
                tokio::time::sleep(WRITE_PAUSE).await;
                self.send_line("#READ:ON").await?;
            }
            result
        })
    }

    fn write_gpo(&mut self, _cmd: WriteGpoCommand) -> DriverFuture<'_> {
        Box::pin(async move { Err(BridgeError::NotFound("X714 has no GPO control".into())) })
    }
}

#[cfg(test)]
#[path = "x714_tests.rs"]
mod tests;
