// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! R700_IOT reader driver: a REST control plane plus a long-lived
//! newline-delimited JSON event stream, carried over
//! [`crate::transport::https_stream::HttpsStreamTransport`]. Grounded
//! on the source's R700_IOT client (`reader_helpers.py`/`_R700_IOT.py`),
//! which selects the REST interface before every stop/start, starts an
//! inventory preset via `POST /profiles/inventory/start`, and decodes
//! each streamed tag-inventory event object for its EPC/TID/RSSI/antenna
//! port.

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::driver::{
    dispatch_command, Driver, DriverCommand, DriverFuture, EventSink, WriteEpcCommand, WriteGpoCommand, WriteTarget,
};
use crate::error::BridgeError;
use crate::event::{GpoControl, RawTag, ReaderKind};
use crate::transport::{Transport, TransportEvent};

/// Delay between pausing and resuming inventory around a write, matching
/// the source's `write_commands.py` sleep before and after the write frame.
const WRITE_PAUSE: Duration = Duration::from_millis(500);

fn control_envelope(method: &str, path: &str, body: Option<Value>) -> Bytes {
    let mut envelope = json!({ "method": method, "path": path });
    if let Some(body) = body {
        envelope["body"] = body;
    }
    Bytes::from(serde_json::to_vec(&envelope).unwrap_or_default())
}

/// Decode one streamed tag-inventory event. The reader's event stream
/// carries several event kinds; only `tagInventoryEvent` objects carry
/// a tag.
fn parse_tag_event(device: &str, line: &[u8]) -> Option<RawTag> {
    let value: Value = serde_json::from_slice(line).ok()?;
    let tag_event = value.get("tagInventoryEvent")?;
    let epc = tag_event.get("epc").and_then(Value::as_str)?.to_string();
    let tid = tag_event.get("tid").and_then(Value::as_str).map(str::to_string);
    let rssi = tag_event.get("peakRssiCdbm").and_then(Value::as_i64).map(|v| (v / 100) as i32);
    let ant = tag_event.get("antennaPort").and_then(Value::as_i64).map(|v| v as i32);
    Some(RawTag { device: device.to_string(), epc, tid, ant, rssi })
}

pub struct R700IotDriver {
    device: String,
    start_reading: bool,
    reading_config: Value,
    transport: Box<dyn Transport>,
    connected: bool,
    reading: bool,
    /// EPC→TID cache built from observed tags, used to resolve
    /// `write_epc`'s `epc` target to `tid`, mirroring the source's
    /// `get_tid_from_epc` lookup against `self.tags`.
    tag_cache: HashMap<String, String>,
}

impl R700IotDriver {
    pub fn new(
        device: impl Into<String>,
        start_reading: bool,
        reading_config: Value,
        transport: Box<dyn Transport>,
    ) -> Self {
        Self {
            device: device.into(),
            start_reading,
            reading_config,
            transport,
            connected: false,
            reading: false,
            tag_cache: HashMap::new(),
        }
    }

    async fn control(&mut self, method: &str, path: &str, body: Option<Value>) -> Result<(), BridgeError> {
        self.transport.write(control_envelope(method, path, body)).await
    }

    async fn configure_interface(&mut self) -> Result<(), BridgeError> {
        self.control("PUT", "/system/rfid/interface", Some(json!({ "rfidInterface": "rest" }))).await
    }

    async fn start_profile(&mut self) -> Result<(), BridgeError> {
        let body = self.reading_config.clone();
        self.control("POST", "/profiles/inventory/start", Some(body)).await
    }

    async fn stop_profile(&mut self) -> Result<(), BridgeError> {
        self.control("POST", "/profiles/stop", None).await
    }
}

impl Driver for R700IotDriver {
    fn reader_kind(&self) -> ReaderKind {
        ReaderKind::R700Iot
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

            self.configure_interface().await?;
            self.stop_profile().await?;

            if self.start_reading {
                self.start_profile().await?;
                self.reading = true;
                events.on_start().await;
            }

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
                            Some(TransportEvent::IdleFlush) => {}
                            Some(TransportEvent::Data(chunk)) => {
                                if let Some(tag) = parse_tag_event(&self.device, &chunk) {
                                    if let Some(tid) = &tag.tid {
                                        self.tag_cache.insert(tag.epc.clone(), tid.clone());
                                    }
                                    events.on_tag(tag).await;
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
            self.start_profile().await?;
            self.reading = true;
            Ok(())
        })
    }

    fn stop_inventory(&mut self) -> DriverFuture<'_> {
        Box::pin(async move {
            self.stop_profile().await?;
            self.reading = false;
            Ok(())
        })
    }

    fn clear_tags(&mut self) -> DriverFuture<'_> {
        Box::pin(async move {
            self.tag_cache.clear();
            Ok(())
        })
    }

    /// Resolves an `epc` target to its cached `tid` when one has been
    /// observed (tags are matched more reliably by TID than by the EPC
    /// being overwritten), then pauses and resumes inventory around the
    /// write if currently reading, matching the source's
    /// `get_tid_from_epc` plus the general `write_epc` pause/resume
    /// contract.
    fn write_epc(&mut self, cmd: WriteEpcCommand) -> DriverFuture<'_> {
        Box::pin(async move {
            let target = match &cmd.target {
                WriteTarget::Epc(v) => match self.tag_cache.get(v).cloned() {
                    Some(tid) => json!({ "tid": tid }),
                    None => json!({ "epc": v }),
                },
                WriteTarget::Tid(v) => json!({ "tid": v }),
                WriteTarget::Unspecified => {
                    return Err(BridgeError::Validation("R700_IOT requires an explicit write target".into()));
                }
            };
            let body = json!({ "target": target, "newEpc": cmd.new_epc, "accessPassword": cmd.password });

            let was_reading = self.reading;
            if was_reading {
                self.stop_profile().await?;
                tokio::time::sleep(WRITE_PAUSE).await;
            }
            let result = self.control("POST", "/profiles/inventory/tag-access", Some(body)).await;
            if was_reading {
                tokio::time::sleep(WRITE_PAUSE).await;
                self.start_profile().await?;
            }
            result
        })
    }

    fn write_gpo(&mut self, cmd: WriteGpoCommand) -> DriverFuture<'_> {
        Box::pin(async move {
            let pulsed = matches!(cmd.control, GpoControl::Pulsed);
            let body = json!({
                "gpoPort": cmd.pin,
                "state": cmd.state,
                "pulsed": pulsed,
                "pulseDurationMs": cmd.pulse_ms,
            });
            self.control("PUT", "/device/gpos", Some(body)).await
        })
    }
}

#[cfg(test)]
#[path = "r700_iot_tests.rs"]
mod tests;
