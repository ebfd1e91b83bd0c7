// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! BLE transport over the Nordic UART Service: scan by advertised-name
//! substring, connect, subscribe to notifications on the TX
//! characteristic (no polling), and write a periodic keep-alive.

use std::time::Duration;

use bytes::Bytes;
use btleplug::api::{Central, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::BridgeError;
use crate::transport::{Transport, TransportEvent, TransportFuture};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(5);
const SCAN_WINDOW: Duration = Duration::from_secs(3);

pub const NUS_SERVICE: Uuid = Uuid::from_u128(0x6E400001_B5A3_F393_E0A9_E50E24DCCA9E);
pub const NUS_RX_WRITE: Uuid = Uuid::from_u128(0x6E400002_B5A3_F393_E0A9_E50E24DCCA9E);
pub const NUS_TX_NOTIFY: Uuid = Uuid::from_u128(0x6E400003_B5A3_F393_E0A9_E50E24DCCA9E);

/// True if `advertised` contains `name_substring` (case-sensitive, as
/// the reader firmware advertises a fixed-case name).
pub fn matches_name(advertised: Option<&str>, name_substring: &str) -> bool {
    advertised.is_some_and(|n| n.contains(name_substring))
}

pub struct BleTransport {
    name_substring: String,
    peripheral: Option<Peripheral>,
    notify_rx: Option<mpsc::Receiver<Vec<u8>>>,
    keep_alive: Vec<u8>,
}

impl BleTransport {
    pub fn new(name_substring: impl Into<String>) -> Self {
        Self {
            name_substring: name_substring.into(),
            peripheral: None,
            notify_rx: None,
            keep_alive: vec![0x00],
        }
    }

    async fn find_adapter() -> Result<Adapter, BridgeError> {
        let manager = Manager::new().await.map_err(|e| BridgeError::Transport(e.to_string()))?;
        let adapters = manager.adapters().await.map_err(|e| BridgeError::Transport(e.to_string()))?;
        adapters.into_iter().next().ok_or_else(|| BridgeError::Transport("no BLE adapter present".into()))
    }

    async fn find_peripheral(adapter: &Adapter, name_substring: &str) -> Result<Peripheral, BridgeError> {
        adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| BridgeError::Transport(e.to_string()))?;
        tokio::time::sleep(SCAN_WINDOW).await;
        let peripherals =
            adapter.peripherals().await.map_err(|e| BridgeError::Transport(e.to_string()))?;
        for p in peripherals {
            let props = p.properties().await.map_err(|e| BridgeError::Transport(e.to_string()))?;
            let local_name = props.and_then(|p| p.local_name);
            if matches_name(local_name.as_deref(), name_substring) {
                return Ok(p);
            }
        }
        Err(BridgeError::Transport(format!("no BLE device advertising name containing {name_substring:?}")))
    }
}

impl Transport for BleTransport {
    fn connect(&mut self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            let adapter = Self::find_adapter().await?;
            let peripheral = tokio::time::timeout(
                CONNECT_TIMEOUT,
                Self::find_peripheral(&adapter, &self.name_substring),
            )
            .await
            .map_err(|_| BridgeError::Transport("BLE scan timed out".into()))??;

            tokio::time::timeout(CONNECT_TIMEOUT, peripheral.connect())
                .await
                .map_err(|_| BridgeError::Transport("BLE connect timed out".into()))?
                .map_err(|e| BridgeError::Transport(e.to_string()))?;
            peripheral.discover_services().await.map_err(|e| BridgeError::Transport(e.to_string()))?;

            let tx_char = peripheral
                .characteristics()
                .into_iter()
                .find(|c| c.uuid == NUS_TX_NOTIFY)
                .ok_or_else(|| BridgeError::Transport("NUS TX characteristic not found".into()))?;
            peripheral.subscribe(&tx_char).await.map_err(|e| BridgeError::Transport(e.to_string()))?;

            let (tx, rx) = mpsc::channel(64);
            let mut notifications =
                peripheral.notifications().await.map_err(|e| BridgeError::Transport(e.to_string()))?;
            tokio::spawn(async move {
                while let Some(event) = notifications.next().await {
                    if tx.send(event.value).await.is_err() {
                        break;
                    }
                }
            });

            self.notify_rx = Some(rx);
            self.peripheral = Some(peripheral);
            Ok(())
        })
    }

    fn write(&mut self, data: Bytes) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            let peripheral = self.peripheral.as_ref().ok_or(BridgeError::Transport("not connected".into()))?;
            let rx_char = peripheral
                .characteristics()
                .into_iter()
                .find(|c| c.uuid == NUS_RX_WRITE)
                .ok_or_else(|| BridgeError::Transport("NUS RX characteristic not found".into()))?;
            peripheral
                .write(&rx_char, &data, WriteType::WithoutResponse)
                .await
                .map_err(|e| BridgeError::Transport(e.to_string()))
        })
    }

    fn next(&mut self) -> TransportFuture<'_, Option<TransportEvent>> {
        Box::pin(async move {
            let keep_alive = self.keep_alive.clone();
            let peripheral = self.peripheral.clone();
            let rx = self.notify_rx.as_mut().ok_or(BridgeError::Transport("not connected".into()))?;
            loop {
                tokio::select! {
                    chunk = rx.recv() => {
                        return Ok(chunk.map(|b| TransportEvent::Data(Bytes::from(b))));
                    }
                    _ = tokio::time::sleep(KEEP_ALIVE_INTERVAL) => {
                        if let Some(peripheral) = &peripheral {
                            if let Some(rx_char) = peripheral.characteristics().into_iter().find(|c| c.uuid == NUS_RX_WRITE) {
                                let _ = peripheral.write(&rx_char, &keep_alive, WriteType::WithoutResponse).await;
                            }
                        }
                    }
                }
            }
        })
    }

    fn close(&mut self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            self.notify_rx = None;
            if let Some(peripheral) = self.peripheral.take() {
                let _ = peripheral.disconnect().await;
            }
            Ok(())
        })
    }

    fn is_connected(&self) -> bool {
        self.peripheral.is_some()
    }
}

#[cfg(test)]
#[path = "ble_tests.rs"]
mod tests;
