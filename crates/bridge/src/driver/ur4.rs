// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! UR4 reader driver: binary framing over TCP,
//! `A5 5A [LEN hi lo] [OPCODE] [...payload] [BCC] 0D 0A`, where `LEN`
//! counts the whole frame and `BCC` is the XOR of every byte between
//! the length field and itself. Grounded on the source's UR4 reader
//! client (`_UR4.py`/`setup_reader.py`/`helpers.py`/`on_event.py`/
//! `write_commands.py`): an 18-step setup walk run once per connection,
//! strictly in lockstep (send a step, wait for its ack, send the next) —
//! region, inventory mode, session/target, antenna mask, command mode,
//! tag focus, three FastID steps, fast inventory, buzzer, RF-link, CW,
//! GPO-off, then one power step per antenna. A step whose ack doesn't
//! land within the per-step timeout resets the whole walk to step zero
//! and fails the connection closed.

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

use crate::config::{gpi_action, AntennaConfig, GpiTriggerConfig};
use crate::driver::{
    dispatch_command, Driver, DriverCommand, DriverFuture, EventSink, WriteEpcCommand, WriteGpoCommand, WriteTarget,
};
use crate::error::BridgeError;
use crate::event::{RawTag, ReaderKind};
use crate::transport::{Transport, TransportEvent};

const MIN_POWER: i32 = 10;
const MAX_POWER: i32 = 30;
const DEFAULT_WRITE_RETRY_COUNT: u32 = 3;

const SETUP_STEP_TIMEOUT: Duration = Duration::from_millis(500);
const GPI_POLL_TICK: Duration = Duration::from_millis(200);
const TEMPERATURE_POLL_TICK: Duration = Duration::from_secs(10);
const ENSURE_READING_TICK: Duration = Duration::from_secs(1);
const WRITE_PAUSE: Duration = Duration::from_millis(500);
const CLEAR_PAUSE: Duration = Duration::from_millis(300);

const OPCODE_REGION: u8 = 0x2C;
const OPCODE_INVENTORY_MODE: u8 = 0x70;
const OPCODE_SESSION_TARGET: u8 = 0x20;
const OPCODE_ANTENNAS: u8 = 0x28;
const OPCODE_AUX: u8 = 0xA1;
const OPCODE_TAG_FOCUS: u8 = 0x60;
const OPCODE_FASTID_1: u8 = 0x5C;
const OPCODE_FAST_INVENTORY: u8 = 0x64;
const OPCODE_RF_LINK: u8 = 0x52;
const OPCODE_CW: u8 = 0x24;
const OPCODE_POWER: u8 = 0x10;
const OPCODE_START_INVENTORY: u8 = 0x82;
const OPCODE_STOP_INVENTORY_1: u8 = 0x8C;
const OPCODE_STOP_INVENTORY_2: u8 = 0x8D;
const OPCODE_WRITE: u8 = 0x86;

const RESP_TAG: u8 = 0x83;
const RESP_GPI: u8 = 0xA2;
const RESP_TEMPERATURE: u8 = 0x35;
const RESP_CONNECTED: u8 = 0x4F;

/// Build one outbound frame: `A5 5A [len hi lo] [opcode] [payload] [bcc] 0D 0A`.
/// `len` counts the whole frame; `bcc` XORs every byte between the
/// length field and itself.
fn build_frame(opcode: u8, payload: &[u8]) -> Vec<u8> {
    let total = payload.len() + 8;
    let mut frame = Vec::with_capacity(total);
    frame.push(0xA5);
    frame.push(0x5A);
    frame.push((total >> 8) as u8);
    frame.push((total & 0xFF) as u8);
    frame.push(opcode);
    frame.extend_from_slice(payload);
    let bcc = frame[2..].iter().fold(0u8, |acc, b| acc ^ b);
    frame.push(bcc);
    frame.push(0x0D);
    frame.push(0x0A);
    frame
}

/// Scan `buf` for an `A5 5A`-prefixed, `0D 0A`-terminated frame, dropping
/// any bytes before the prefix. Returns the whole frame (including
/// STX and terminator) so response decoders can index into it the way
/// the source does.
fn take_frame(buf: &mut Vec<u8>) -> Option<Vec<u8>> {
    let start = buf.windows(2).position(|w| w == [0xA5, 0x5A])?;
    if start > 0 {
        buf.drain(..start);
    }
    if buf.len() < 2 {
        return None;
    }
    let end = buf[2..].windows(2).position(|w| w == [0x0D, 0x0A]).map(|pos| 2 + pos + 2)?;
    Some(buf.drain(..end).collect())
}

fn session_target_payload(session: u8) -> Vec<u8> {
    let ab = (session << 4) | 0x03;
    vec![0x01, 0x60, 0xF4, ab]
}

fn antenna_mask_payload(antennas: &HashMap<String, AntennaConfig>) -> Vec<u8> {
    let mut mask = 0u8;
    for i in 0..4u8 {
        if antennas.get(&(i + 1).to_string()).map(|a| a.active).unwrap_or(false) {
            mask |= 1 << i;
        }
    }
    if mask == 0 {
        mask = 1;
    }
    vec![0x01, 0x00, mask, 0x00, 0x00]
}

/// Payload for one antenna's power step, or `None` if that antenna is
/// unconfigured or inactive — the setup walk skips such a step rather
/// than sending it.
fn power_payload(antennas: &HashMap<String, AntennaConfig>, ant: u8) -> Option<Vec<u8>> {
    let cfg = antennas.get(&ant.to_string())?;
    if !cfg.active {
        return None;
    }
    let power = cfg.power.clamp(MIN_POWER, MAX_POWER);
    let value = (power * 100) as u16;
    let high = (value >> 8) as u8;
    let low = (value & 0xFF) as u8;
    Some(vec![0x02, ant, high, low, high, low])
}

fn gpo_payload(state: bool) -> Vec<u8> {
    vec![0x00, 0x00, state as u8, 0x00]
}

/// Hex string to bytes, left-padding an odd-length string with a
/// leading zero the same way the source's `get_bytes_from_str` does.
fn hex_to_bytes(hex: &str) -> Vec<u8> {
    let padded;
    let hex = if hex.len() % 2 != 0 {
        padded = format!("0{hex}");
        padded.as_str()
    } else {
        hex
    };
    (0..hex.len())
        .step_by(2)
        .filter_map(|i| hex.get(i..i + 2).and_then(|b| u8::from_str_radix(b, 16).ok()))
        .collect()
}

fn write_payload_none(new_epc: &[u8]) -> Vec<u8> {
    let mut p = vec![0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x20, 0x00, 0x00, 0x01, 0x00, 0x02, 0x00, 0x06];
    p.extend_from_slice(new_epc);
    p
}

fn write_payload_epc(target: &[u8], new_epc: &[u8]) -> Vec<u8> {
    let mut p = vec![0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x20, 0x00, 0x60];
    p.extend_from_slice(target);
    p.extend_from_slice(&[0x01, 0x00, 0x02, 0x00, 0x06]);
    p.extend_from_slice(new_epc);
    p
}

fn write_payload_tid(target: &[u8], new_epc: &[u8]) -> Vec<u8> {
    let mut p = vec![0x00, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00, 0x60];
    p.extend_from_slice(target);
    p.extend_from_slice(&[0x01, 0x00, 0x02, 0x00, 0x06]);
    p.extend_from_slice(new_epc);
    p
}

/// Decode a `0x83` tag report. The source requires the whole frame to
/// be exactly 37 bytes and drops the report outright if it isn't
/// currently reading.
fn decode_tag_report(device: &str, frame: &[u8]) -> Option<RawTag> {
    if frame.len() != 37 {
        return None;
    }
    let epc = frame[7..19].iter().map(|b| format!("{b:02X}")).collect::<String>();
    let tid = frame[19..31].iter().map(|b| format!("{b:02X}")).collect::<String>();
    let rssi = (((frame[31] as i32) << 8 | frame[32] as i32) - 0x10000) / 10;
    let ant = frame[33] as i32;
    Some(RawTag { device: device.to_string(), epc, tid: Some(tid), ant: Some(ant), rssi: Some(rssi) })
}

fn decode_temperature(frame: &[u8]) -> i32 {
    (((frame[6] as i32) << 8) | frame[7] as i32) / 100
}

/// One step of the 18-step setup walk (0-17). `Skip` only occurs for
/// an antenna power step whose antenna is unconfigured or inactive.
enum SetupAction {
    Send(u8, Vec<u8>),
    Skip,
}

/// A write recorded because its target resolved to a TID rather than
/// being written by EPC directly, mirroring the source's
/// `tags_to_write` map (built in `write_commands.py`, keyed by TID).
struct PendingWrite {
    new_epc: String,
    password: String,
    retries_left: u32,
}

pub struct Ur4Driver {
    device: String,
    session: u8,
    antennas: HashMap<String, AntennaConfig>,
    buzzer: bool,
    gpi_config: Option<GpiTriggerConfig>,
    start_reading: bool,
    transport: Box<dyn Transport>,
    connected: bool,
    reading: bool,
    setup_step: u8,
    setup_complete: bool,
    temperature: i32,
    gpi_state: HashMap<u8, bool>,
    /// EPC→TID cache built from observed tag reports, consulted by
    /// `write_epc` the way the source's `get_tid_from_epc` is.
    tag_cache: HashMap<String, String>,
    pending_writes: HashMap<String, PendingWrite>,
}

impl Ur4Driver {
    pub fn new(
        device: impl Into<String>,
        session: u8,
        antennas: HashMap<String, AntennaConfig>,
        buzzer: bool,
        gpi: Option<GpiTriggerConfig>,
        start_reading: bool,
        transport: Box<dyn Transport>,
    ) -> Self {
        Self {
            device: device.into(),
            session,
            antennas,
            buzzer,
            gpi_config: gpi,
            start_reading,
            transport,
            connected: false,
            reading: false,
            setup_step: 0,
            setup_complete: false,
            temperature: 0,
            gpi_state: HashMap::from([(1u8, false), (2u8, false)]),
            tag_cache: HashMap::new(),
            pending_writes: HashMap::new(),
        }
    }

    async fn send(&mut self, opcode: u8, payload: &[u8]) -> Result<(), BridgeError> {
        self.transport.write(Bytes::from(build_frame(opcode, payload))).await
    }

    async fn send_start_inventory(&mut self) -> Result<(), BridgeError> {
        self.send(OPCODE_START_INVENTORY, &[0x00, 0x00]).await
    }

    async fn send_stop_inventory(&mut self) -> Result<(), BridgeError> {
        self.send(OPCODE_STOP_INVENTORY_1, &[]).await?;
        self.send(OPCODE_STOP_INVENTORY_2, &[0x01]).await
    }

    fn setup_action(&self, step: u8) -> SetupAction {
        match step {
            0 => SetupAction::Send(OPCODE_REGION, vec![0x01, 0x3C]),
            1 => SetupAction::Send(OPCODE_INVENTORY_MODE, vec![0x01, 0x01, 0x00, 0x00]),
            2 => SetupAction::Send(OPCODE_SESSION_TARGET, session_target_payload(self.session)),
            3 => SetupAction::Send(OPCODE_ANTENNAS, antenna_mask_payload(&self.antennas)),
            4 => SetupAction::Send(OPCODE_AUX, vec![0x05, 0x00]),
            5 => SetupAction::Send(OPCODE_TAG_FOCUS, vec![0x00, 0x00]),
            6 => SetupAction::Send(OPCODE_FASTID_1, vec![0x01, 0x00]),
            7 => SetupAction::Send(OPCODE_TAG_FOCUS, vec![0x00, 0x00]),
            8 => SetupAction::Send(OPCODE_INVENTORY_MODE, vec![0x00, 0x00, 0x00, 0x00]),
            9 => SetupAction::Send(OPCODE_FAST_INVENTORY, vec![0x01, 0x00]),
            10 => SetupAction::Send(OPCODE_AUX, vec![self.buzzer as u8, 0x00]),
            11 => SetupAction::Send(OPCODE_RF_LINK, vec![0x00, 0x01, 0x05]),
            12 => SetupAction::Send(OPCODE_CW, vec![0x01]),
            13 => SetupAction::Send(OPCODE_AUX, gpo_payload(false)),
            14..=17 => match power_payload(&self.antennas, step - 13) {
                Some(payload) => SetupAction::Send(OPCODE_POWER, payload),
                None => SetupAction::Skip,
            },
            _ => SetupAction::Skip,
        }
    }

    /// Run the 18-step setup walk to completion, one step at a time:
    /// send a step's frame, then wait for its ack (any frame with
    /// `frame[5] == 0x01`, per `on_success_cmd`) before sending the
    /// next. A step whose ack doesn't land within
    /// [`SETUP_STEP_TIMEOUT`] resets the walk to step zero and fails
    /// closed, matching `check_error_response`. Frames unrelated to the
    /// ack (there are none expected before setup completes, but a real
    /// reader could still emit one) are ignored rather than treated as
    /// an ack.
    async fn run_setup(&mut self, buf: &mut Vec<u8>) -> Result<(), BridgeError> {
        while self.setup_step <= 17 {
            let (opcode, payload) = match self.setup_action(self.setup_step) {
                SetupAction::Send(opcode, payload) => (opcode, payload),
                SetupAction::Skip => {
                    self.setup_step += 1;
                    continue;
                }
            };
            self.send(opcode, &payload).await?;

            let acked = tokio::time::timeout(SETUP_STEP_TIMEOUT, async {
                loop {
                    while let Some(frame) = take_frame(buf) {
                        if frame.len() >= 6 && frame[5] == 0x01 {
                            return Ok(());
                        }
                    }
                    match self.transport.next().await? {
                        None => return Err(BridgeError::Transport("connection closed during setup".into())),
                        Some(TransportEvent::IdleFlush) => buf.clear(),
                        Some(TransportEvent::Data(chunk)) => buf.extend_from_slice(&chunk),
                    }
                }
            })
            .await;

            match acked {
                Ok(Ok(())) => self.setup_step += 1,
                Ok(Err(err)) => return Err(err),
                Err(_) => {
                    self.setup_step = 0;
                    return Err(BridgeError::ProtocolTimeout);
                }
            }
        }

        self.setup_complete = true;
        if self.start_reading {
            self.send_start_inventory().await?;
            self.reading = true;
        }
        Ok(())
    }

    /// React to one complete frame once the setup walk has finished:
    /// tag, GPI, temperature, or connected-antennas reports.
    async fn handle_report(&mut self, frame: &[u8], events: &EventSink) -> Result<(), BridgeError> {
        let opcode = frame[4];
        match opcode {
            RESP_TAG => {
                if self.reading {
                    if let Some(tag) = decode_tag_report(&self.device, frame) {
                        self.tag_cache.insert(tag.epc.clone(), tag.tid.clone().unwrap_or_default());
                        let floor = self.antennas.get(&tag.ant.unwrap_or(1).to_string()).map(|a| a.min_rssi);
                        if floor.map_or(true, |min| tag.rssi.unwrap_or(0) >= min) {
                            events.on_tag(tag).await;
                        }
                    }
                }
            }
            RESP_GPI if frame.len() > 7 && frame[5] == 0x0A => {
                self.handle_gpi_report(frame[6] == 0x01, frame[7] == 0x01, events).await?;
            }
            RESP_TEMPERATURE if frame.len() > 7 && frame[5] == 0x01 => {
                self.temperature = decode_temperature(frame);
            }
            RESP_CONNECTED => {
                tracing::debug!(device = %self.device, mask = frame.get(6).copied().unwrap_or(0), "connected antennas");
            }
            _ => {}
        }
        Ok(())
    }

    async fn handle_gpi_report(&mut self, gpi1: bool, gpi2: bool, events: &EventSink) -> Result<(), BridgeError> {
        let old1 = *self.gpi_state.get(&1u8).unwrap_or(&false);
        let old2 = *self.gpi_state.get(&2u8).unwrap_or(&false);
        if gpi1 == old1 && gpi2 == old2 {
            return Ok(());
        }
        if gpi1 != old1 {
            self.gpi_state.insert(1, gpi1);
        } else if gpi2 != old2 {
            self.gpi_state.insert(2, gpi2);
        }

        let Some(cfg) = self.gpi_config.clone() else { return Ok(()) };
        match gpi_action(&cfg, &self.gpi_state) {
            Some(true) if !self.reading => {
                self.send_start_inventory().await?;
                self.reading = true;
                events.on_start().await;
            }
            Some(false) if self.reading => {
                self.send_stop_inventory().await?;
                self.reading = false;
                events.on_stop().await;
            }
            _ => {}
        }
        Ok(())
    }
}

impl Driver for Ur4Driver {
    fn reader_kind(&self) -> ReaderKind {
        ReaderKind::Ur4
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
            self.setup_step = 0;
            self.setup_complete = false;
            events.on_connect().await;

            let mut buf = Vec::new();

            let result: Result<(), BridgeError> = async {
                self.run_setup(&mut buf).await?;
                if self.reading {
                    events.on_start().await;
                }

                let mut gpi_ticker = interval(GPI_POLL_TICK);
                let mut temperature_ticker = interval(TEMPERATURE_POLL_TICK);
                let mut reading_ticker = interval(ENSURE_READING_TICK);

                loop {
                    tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => return Ok(()),
                        command = commands.recv() => {
                            match command {
                                None => {}
                                Some(command) => dispatch_command(self, command).await,
                            }
                        }
                        event = self.transport.next() => {
                            match event? {
                                None => return Ok(()),
                                Some(TransportEvent::IdleFlush) => buf.clear(),
                                Some(TransportEvent::Data(chunk)) => {
                                    buf.extend_from_slice(&chunk);
                                    while let Some(frame) = take_frame(&mut buf) {
                                        if frame.len() < 6 {
                                            continue;
                                        }
                                        self.handle_report(&frame, &events).await?;
                                    }
                                }
                            }
                        }
                        _ = gpi_ticker.tick() => {
                            self.send(OPCODE_AUX, &[0x0A]).await?;
                        }
                        _ = temperature_ticker.tick() => {
                            self.send(0x34, &[]).await?;
                        }
                        _ = reading_ticker.tick() => {
                            if self.reading {
                                self.send_start_inventory().await?;
                            } else {
                                self.send_stop_inventory().await?;
                            }
                        }
                    }
                }
            }
            .await;

            if self.reading {
                events.on_stop().await;
            }
            self.connected = false;
            self.reading = false;
            events.on_disconnect().await;
            let _ = self.transport.close().await;
            result
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
            self.send_start_inventory().await?;
            self.reading = true;
            Ok(())
        })
    }

    fn stop_inventory(&mut self) -> DriverFuture<'_> {
        Box::pin(async move {
            self.send_stop_inventory().await?;
            self.reading = false;
            Ok(())
        })
    }

    fn clear_tags(&mut self) -> DriverFuture<'_> {
        Box::pin(async move {
            self.tag_cache.clear();
            self.pending_writes.clear();
            Ok(())
        })
    }

    /// Resolves an `epc` target to its cached `tid`, pauses/resumes
    /// inventory around the write when currently reading, and — for
    /// any write that ends up targeting a TID rather than a bare EPC —
    /// records a pending-write entry the way the source's
    /// `write_commands.py` populates `tags_to_write`, bounded by
    /// [`DEFAULT_WRITE_RETRY_COUNT`].
    fn write_epc(&mut self, cmd: WriteEpcCommand) -> DriverFuture<'_> {
        Box::pin(async move {
            let resolved_tid = match &cmd.target {
                WriteTarget::Epc(v) => self.tag_cache.get(v).cloned(),
                WriteTarget::Tid(v) => Some(v.clone()),
                WriteTarget::Unspecified => None,
            };

            if let Some(tid) = &resolved_tid {
                self.pending_writes.insert(
                    tid.clone(),
                    PendingWrite {
                        new_epc: cmd.new_epc.clone(),
                        password: cmd.password.clone(),
                        retries_left: DEFAULT_WRITE_RETRY_COUNT,
                    },
                );
            }

            let new_epc_bytes = hex_to_bytes(&cmd.new_epc);
            let payload = match (&cmd.target, &resolved_tid) {
                (_, Some(tid)) => write_payload_tid(&hex_to_bytes(tid), &new_epc_bytes),
                (WriteTarget::Epc(v), None) => write_payload_epc(&hex_to_bytes(v), &new_epc_bytes),
                (WriteTarget::Unspecified, None) => write_payload_none(&new_epc_bytes),
                (WriteTarget::Tid(_), None) => unreachable!("a Tid target always resolves"),
            };

            let was_reading = self.reading;
            if was_reading {
                self.send_stop_inventory().await?;
                tokio::time::sleep(WRITE_PAUSE).await;
            }
            let result = self.send(OPCODE_WRITE, &payload).await;
            if was_reading {
                tokio::time::sleep(WRITE_PAUSE).await;
                self.send_start_inventory().await?;
            }

            tokio::time::sleep(CLEAR_PAUSE).await;
            self.tag_cache.clear();
            self.pending_writes.clear();

            result
        })
    }

    /// UR4 exposes a single GPO line at a fixed address; `cmd.pin` is
    /// accepted for trait-signature symmetry with multi-GPO readers
    /// but unused, matching the source's `write_gpo(state)`.
    fn write_gpo(&mut self, cmd: WriteGpoCommand) -> DriverFuture<'_> {
        Box::pin(async move { self.send(OPCODE_AUX, &gpo_payload(cmd.state)).await })
    }
}

#[cfg(test)]
#[path = "ur4_tests.rs"]
mod tests;
