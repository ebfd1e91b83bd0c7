// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Serial transport: explicit port or VID/PID auto-detect, with the
//! shared 300 ms idle-flush that keeps length-prefixed/binary drivers
//! from matching stale partial frames.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serialport::SerialPortType;
use tokio::sync::mpsc;

use crate::error::BridgeError;
use crate::transport::{Transport, TransportEvent, TransportFuture};

const DEFAULT_IDLE_FLUSH: Duration = Duration::from_millis(300);
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// How to locate the serial device at connect time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortSelector {
    Explicit(String),
    Auto { vid: u16, pid: u16 },
}

/// Resolve a [`PortSelector::Auto`] against the system's enumerated
/// ports. Pure function so the matching logic is unit-testable without
/// real hardware.
pub fn resolve_auto_port(
    ports: &[serialport::SerialPortInfo],
    vid: u16,
    pid: u16,
) -> Option<String> {
    ports.iter().find_map(|p| match &p.port_type {
        SerialPortType::UsbPort(usb) if usb.vid == vid && usb.pid == pid => {
            Some(p.port_name.clone())
        }
        _ => None,
    })
}

pub struct SerialTransport {
    selector: PortSelector,
    baud: u32,
    idle_flush: Duration,
    inner: Option<Inner>,
}

struct Inner {
    write_tx: mpsc::UnboundedSender<Vec<u8>>,
    data_rx: mpsc::Receiver<Vec<u8>>,
    shutdown: Arc<AtomicBool>,
}

impl SerialTransport {
    pub fn new(selector: PortSelector, baud: u32) -> Self {
        Self { selector, baud, idle_flush: DEFAULT_IDLE_FLUSH, inner: None }
    }

    pub fn with_idle_flush(mut self, d: Duration) -> Self {
        self.idle_flush = d;
        self
    }

    fn resolve_port_name(&self) -> Result<String, BridgeError> {
        match &self.selector {
            PortSelector::Explicit(name) => Ok(name.clone()),
            PortSelector::Auto { vid, pid } => {
                let ports = serialport::available_ports()
                    .map_err(|e| BridgeError::Transport(format!("enumerate ports: {e}")))?;
                resolve_auto_port(&ports, *vid, *pid).ok_or_else(|| {
                    BridgeError::Transport(format!(
                        "no serial port matches vid={vid:#06x} pid={pid:#06x}"
                    ))
                })
            }
        }
    }
}

impl Transport for SerialTransport {
    fn connect(&mut self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            let port_name = self.resolve_port_name()?;
            let baud = self.baud;
            let port = serialport::new(&port_name, baud)
                .timeout(READ_TIMEOUT)
                .open()
                .map_err(|e| BridgeError::Transport(format!("open {port_name}: {e}")))?;
            let mut reader = port
                .try_clone()
                .map_err(|e| BridgeError::Transport(format!("clone handle: {e}")))?;
            let mut writer = port;

            let (data_tx, data_rx) = mpsc::channel::<Vec<u8>>(64);
            let (write_tx, mut write_rx) = mpsc::unbounded_channel::<Vec<u8>>();
            let shutdown = Arc::new(AtomicBool::new(false));

            let reader_shutdown = shutdown.clone();
            std::thread::spawn(move || {
                let mut buf = [0u8; 512];
                while !reader_shutdown.load(Ordering::Relaxed) {
                    match reader.read(&mut buf) {
                        Ok(0) => continue,
                        Ok(n) => {
                            if data_tx.blocking_send(buf[..n].to_vec()).is_err() {
                                break;
                            }
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                        Err(_) => break,
                    }
                }
            });

            let writer_shutdown = shutdown.clone();
            std::thread::spawn(move || {
                while !writer_shutdown.load(Ordering::Relaxed) {
                    match write_rx.blocking_recv() {
                        Some(bytes) => {
                            if writer.write_all(&bytes).is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
            });

            self.inner = Some(Inner { write_tx, data_rx, shutdown });
            Ok(())
        })
    }

    fn write(&mut self, data: Bytes) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            let inner = self.inner.as_ref().ok_or(BridgeError::Transport("not connected".into()))?;
            inner
                .write_tx
                .send(data.to_vec())
                .map_err(|_| BridgeError::Transport("serial writer thread gone".into()))
        })
    }

    fn next(&mut self) -> TransportFuture<'_, Option<TransportEvent>> {
        Box::pin(async move {
            let idle_flush = self.idle_flush;
            let inner = self.inner.as_mut().ok_or(BridgeError::Transport("not connected".into()))?;
            tokio::select! {
                chunk = inner.data_rx.recv() => Ok(chunk.map(|b| TransportEvent::Data(Bytes::from(b)))),
                _ = tokio::time::sleep(idle_flush) => Ok(Some(TransportEvent::IdleFlush)),
            }
        })
    }

    fn close(&mut self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            if let Some(inner) = self.inner.take() {
                inner.shutdown.store(true, Ordering::Relaxed);
            }
            Ok(())
        })
    }

    fn is_connected(&self) -> bool {
        self.inner.is_some()
    }
}

#[cfg(test)]
#[path = "serial_tests.rs"]
mod tests;
