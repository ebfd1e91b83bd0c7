// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-device supervisor: builds the right [`Driver`]/[`Transport`]
//! pair for a [`DeviceConfig`], runs `connect()` to completion, and
//! reconnects with exponential backoff until the device's shutdown
//! token fires. Grounded on the teacher's `session::run::Session`
//! (owns a backend task, reacts to a `CancellationToken` in a
//! `tokio::select!`) generalized from "one child process for the
//! session's lifetime" to "reconnect this device's driver forever".

use std::net::IpAddr;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{DeviceConfig, DeviceParams};
use crate::driver::serial_tcp::{PassthroughKind, SerialTcpDriver};
use crate::driver::{Driver, DriverEvent, EventSink};
use crate::driver::icard::IcardDriver;
use crate::driver::r700_iot::R700IotDriver;
use crate::driver::ur4::Ur4Driver;
use crate::driver::x714::X714Driver;
use crate::error::BridgeError;
use crate::registry::CommandSlot;
use crate::transport::ble::BleTransport;
use crate::transport::https_stream::HttpsStreamTransport;
use crate::transport::serial::{PortSelector, SerialTransport};
use crate::transport::tcp::{parse_ip_strict, ReconnectBackoff, TcpTransport};
use crate::transport::Transport;

/// Commands in flight are bounded; a control-surface caller never needs
/// more than a handful of outstanding requests per device.
const COMMAND_CHANNEL_CAPACITY: usize = 16;

/// Resolve a `CONNECTION` config string into a [`PortSelector`]: `AUTO`
/// triggers VID/PID enumeration, anything else is an explicit device
/// path.
fn port_selector(connection: &str, vid: u16, pid: u16) -> PortSelector {
    if connection.eq_ignore_ascii_case("AUTO") {
        PortSelector::Auto { vid, pid }
    } else {
        PortSelector::Explicit(connection.to_string())
    }
}

fn tcp_transport(connection: &str, port: u16) -> Result<Box<dyn Transport>, BridgeError> {
    let ip: IpAddr = parse_ip_strict(connection)?;
    Ok(Box::new(TcpTransport::new(ip, port)))
}

/// Build the driver for one device from its configuration. Each reader
/// kind wires its own transport kind (serial, TCP, BLE, or HTTPS
/// stream).
pub fn build_driver(config: &DeviceConfig) -> Result<Box<dyn Driver>, BridgeError> {
    let name = config.name.clone();
    match &config.params {
        DeviceParams::Ur4(cfg) => {
            let transport = tcp_transport(&cfg.connection, cfg.port)?;
            Ok(Box::new(Ur4Driver::new(
                name,
                cfg.session,
                cfg.ant.clone(),
                cfg.buzzer,
                cfg.gpi.clone(),
                cfg.start_reading,
                transport,
            )))
        }
        DeviceParams::X714(cfg) => {
            use crate::config::X714ConnectionType;
            let transport: Box<dyn Transport> = match cfg.connection_type_or_default() {
                X714ConnectionType::Serial => {
                    Box::new(SerialTransport::new(port_selector(&cfg.connection, cfg.vid, cfg.pid), cfg.baudrate))
                }
                X714ConnectionType::Ble => Box::new(BleTransport::new(cfg.ble_name.clone())),
                X714ConnectionType::Tcp => tcp_transport(&cfg.connection, cfg.tcp_port)?,
            };
            Ok(Box::new(X714Driver::new(name, cfg.session, cfg.buzzer, cfg.start_reading, transport)))
        }
        DeviceParams::R700Iot(cfg) => {
            let transport = HttpsStreamTransport::new(&cfg.connection, cfg.username.clone(), cfg.password.clone())?;
            Ok(Box::new(R700IotDriver::new(name, cfg.start_reading, cfg.reading_config.clone(), Box::new(transport))))
        }
        DeviceParams::Icard(cfg) => {
            let transport: Box<dyn Transport> =
                Box::new(SerialTransport::new(port_selector(&cfg.connection, cfg.vid, cfg.pid), cfg.baudrate));
            Ok(Box::new(IcardDriver::new(name, cfg.session, cfg.clamped_power(), cfg.start_reading, transport)))
        }
        DeviceParams::Serial(cfg) => {
            let transport: Box<dyn Transport> =
                Box::new(SerialTransport::new(port_selector(&cfg.connection, cfg.vid, cfg.pid), cfg.baudrate));
            Ok(Box::new(SerialTcpDriver::new(name, PassthroughKind::Serial, cfg.event_type.clone(), transport)))
        }
        DeviceParams::Tcp(cfg) => {
            let transport = tcp_transport(&cfg.connection, cfg.port)?;
            Ok(Box::new(SerialTcpDriver::new(name, PassthroughKind::Tcp, cfg.event_type.clone(), transport)))
        }
    }
}

/// Run one device's supervised connect/reconnect loop until `shutdown`
/// fires. Canonical events are forwarded, tagged with the device name,
/// onto `events_tx` for the pipeline to fan out.
pub async fn run_device(
    config: DeviceConfig,
    mut driver: Box<dyn Driver>,
    events_tx: mpsc::Sender<(String, DriverEvent)>,
    command_slot: CommandSlot,
    shutdown: CancellationToken,
) {
    let name = config.name.clone();
    let mut backoff = ReconnectBackoff::default();

    loop {
        if shutdown.is_cancelled() {
            break;
        }

        let (tx, mut rx) = mpsc::channel(256);
        let sink = EventSink::new(tx);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        *command_slot.lock().await = Some(command_tx);
        let forward_events_tx = events_tx.clone();
        let forward_name = name.clone();
        let forward_shutdown = shutdown.clone();
        let forward_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = forward_shutdown.cancelled() => break,
                    event = rx.recv() => {
                        match event {
                            Some(event) => {
                                if forward_events_tx.send((forward_name.clone(), event)).await.is_err() {
                                    break;
                                }
                            }
                            None => break,
                        }
                    }
                }
            }
        });

        info!(device = name.as_str(), "connecting device");
        let result = driver.connect(sink, command_rx, shutdown.clone()).await;
        forward_task.abort();
        *command_slot.lock().await = None;

        match result {
            Ok(()) => {
                info!(device = name.as_str(), "device connection ended cleanly");
                backoff.reset();
            }
            Err(e) => {
                warn!(device = name.as_str(), error = %e, "device connection failed");
            }
        }

        if shutdown.is_cancelled() {
            break;
        }

        let delay = backoff.next();
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.cancelled() => break,
        }
    }

    info!(device = name.as_str(), "device supervisor shut down");
}

#[cfg(test)]
#[path = "supervisor_tests.rs"]
mod tests;
