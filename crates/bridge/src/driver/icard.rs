// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! ICARD reader driver: a serial binary protocol framed
//! `[LEN][...body...][CRC_LO][CRC_HI]`, where `LEN` counts only the
//! bytes that follow it — a different convention from UR4's two-byte
//! total-length field. CRC-16/CCITT from [`crate::crc16`] covers every
//! byte up to the checksum. Grounded on the source's ICARD reader
//! client (`_ICARD.py`/`on_receive.py`): a timer-driven three-step
//! setup walk (`config_reader`, `set_band`, `set_power`) that resends
//! its current step on every tick regardless of a prior reply, only
//! advancing once `on_receive` sees the matching ack opcode, followed
//! by a repeating inventory poll sent every tick while reading.

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

use crate::crc16::{apply_crc, crc16_ccitt};
use crate::driver::{dispatch_command, Driver, DriverCommand, DriverFuture, EventSink, WriteEpcCommand, WriteGpoCommand};
use crate::error::BridgeError;
use crate::event::{RawTag, ReaderKind};
use crate::transport::{Transport, TransportEvent};

const ACK_CONFIG_READER: u8 = 0x21;
const ACK_SET_BAND: u8 = 0x22;
const ACK_SET_POWER: u8 = 0x2F;
const CMD_TAG_REPORT: u8 = 0x01;

const READING_TICK: Duration = Duration::from_millis(150);
const IDLE_TICK: Duration = Duration::from_millis(300);

/// Build a frame whose leading length byte counts every byte that
/// follows it (body plus the two trailing CRC bytes), then append the
/// little-endian CRC-16/CCITT over everything before it.
fn build_frame(body: &[u8]) -> Vec<u8> {
    let remaining = body.len() + 2;
    let mut frame = Vec::with_capacity(1 + remaining);
    frame.push(remaining as u8);
    frame.extend_from_slice(body);
    frame.push(0);
    frame.push(0);
    apply_crc(&mut frame);
    frame
}

fn config_reader_frame() -> Vec<u8> {
    build_frame(&[0xFF, ACK_CONFIG_READER, 0x00])
}

fn set_band_frame() -> Vec<u8> {
    build_frame(&[0x00, ACK_SET_BAND, 0xE2, 0x40])
}

fn set_power_frame(power: i32) -> Vec<u8> {
    build_frame(&[0x00, ACK_SET_POWER, power as u8])
}

fn inventory_frame(session: u8) -> Vec<u8> {
    build_frame(&[0x00, 0x01, 0x04, session, 0x00, 0x80, 0x0A, 0x00])
}

/// Pop one complete, CRC-valid frame off the front of `buf`, resyncing
/// past stray bytes when the length or checksum doesn't line up.
/// Returns `None` when `buf` holds no complete frame yet.
fn take_frame(buf: &mut Vec<u8>) -> Option<Vec<u8>> {
    loop {
        if buf.is_empty() {
            return None;
        }
        let remaining = buf[0] as usize;
        let total = 1 + remaining;
        if remaining < 2 {
            buf.remove(0);
            continue;
        }
        if buf.len() < total {
            return None;
        }
        let frame: Vec<u8> = buf.drain(..total).collect();
        let expected = crc16_ccitt(&frame[..total - 2]);
        let actual = u16::from_le_bytes([frame[total - 2], frame[total - 1]]);
        if expected != actual {
            continue;
        }
        return Some(frame);
    }
}

/// Decode every tag concatenated into one `on_tag` report: the source
/// skips the first 7 bytes, then consumes 14-byte chunks, each holding
/// a 12-byte EPC followed by 2 bytes it no longer uses.
fn decode_tag_reports(device: &str, frame: &[u8]) -> Vec<RawTag> {
    if frame.len() <= 20 {
        return Vec::new();
    }
    let mut tags = Vec::new();
    let mut rest = &frame[7..];
    while rest.len() >= 14 {
        let epc = rest[..12].iter().map(|b| format!("{b:02X}")).collect::<String>();
        tags.push(RawTag { device: device.to_string(), epc, tid: None, ant: Some(1), rssi: None });
        rest = &rest[14..];
    }
    tags
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SetupStep {
    ConfigReader,
    SetBand,
    SetPower,
    Done,
}

pub struct IcardDriver {
    device: String,
    session: u8,
    power: i32,
    start_reading: bool,
    transport: Box<dyn Transport>,
    connected: bool,
    reading: bool,
    setup_step: SetupStep,
}

impl IcardDriver {
    pub fn new(device: impl Into<String>, session: u8, power: i32, start_reading: bool, transport: Box<dyn Transport>) -> Self {
        Self {
            device: device.into(),
            session,
            power: power.clamp(10, 26),
            start_reading,
            transport,
            connected: false,
            reading: false,
            setup_step: SetupStep::ConfigReader,
        }
    }

    async fn send(&mut self, frame: Vec<u8>) -> Result<(), BridgeError> {
        self.transport.write(Bytes::from(frame)).await
    }

    /// The frame for the setup step currently in progress, or `None`
    /// once the walk has completed.
    fn current_setup_frame(&self) -> Option<Vec<u8>> {
        match self.setup_step {
            SetupStep::ConfigReader => Some(config_reader_frame()),
            SetupStep::SetBand => Some(set_band_frame()),
            SetupStep::SetPower => Some(set_power_frame(self.power)),
            SetupStep::Done => None,
        }
    }

    /// Advance the setup walk on a matching ack opcode at `frame[2]`.
    fn on_ack(&mut self, opcode: u8) {
        match (self.setup_step, opcode) {
            (SetupStep::ConfigReader, ACK_CONFIG_READER) => self.setup_step = SetupStep::SetBand,
            (SetupStep::SetBand, ACK_SET_BAND) => self.setup_step = SetupStep::SetPower,
            (SetupStep::SetPower, ACK_SET_POWER) => self.setup_step = SetupStep::Done,
            _ => {}
        }
    }
}

impl Driver for IcardDriver {
    fn reader_kind(&self) -> ReaderKind {
        ReaderKind::Icard
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
            self.setup_step = SetupStep::ConfigReader;
            events.on_connect().await;

            let mut buf = Vec::new();
            let mut ticker = interval(IDLE_TICK);

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
                    _ = ticker.tick() => {
                        ticker = interval(if self.reading { READING_TICK } else { IDLE_TICK });
                        if let Some(frame) = self.current_setup_frame() {
                            self.send(frame).await?;
                        } else if self.setup_step == SetupStep::Done && !self.reading && self.start_reading {
                            self.start_inventory().await?;
                            events.on_start().await;
                        } else if self.reading {
                            let frame = inventory_frame(self.session);
                            self.send(frame).await?;
                        }
                    }
                    event = self.transport.next() => {
                        match event? {
                            None => break,
                            Some(TransportEvent::IdleFlush) => buf.clear(),
                            Some(TransportEvent::Data(chunk)) => {
                                buf.extend_from_slice(&chunk);
                                while let Some(frame) = take_frame(&mut buf) {
                                    if frame.len() < 3 {
                                        continue;
                                    }
                                    let opcode = frame[2];
                                    if opcode == CMD_TAG_REPORT {
                                        for tag in decode_tag_reports(&self.device, &frame) {
                                            events.on_tag(tag).await;
                                        }
                                    } else {
                                        self.on_ack(opcode);
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
        Box::pin(async move { Err(BridgeError::Validation("ICARD has no write-EPC command".into())) })
    }

    fn write_gpo(&mut self, _cmd: WriteGpoCommand) -> DriverFuture<'_> {
        Box::pin(async move { Err(BridgeError::Validation("ICARD has no GPO".into())) })
    }
}

#[cfg(test)]
#[path = "icard_tests.rs"]
mod tests;
