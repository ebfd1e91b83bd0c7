// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Device registry: tracks every configured device's [`DeviceConfig`]
//! alongside its live supervisor handle. Mutations (create/update/
//! delete) are serialized through a single "updating" flag rather than
//! holding the write lock for the whole operation, so a slow supervisor
//! teardown never blocks concurrent reads of unrelated devices.
//! Grounded on the teacher's `broker::registry::PodRegistry`
//! (`RwLock<HashMap<_, _>>` plus async register/deregister/list, and a
//! background loop driven by a `CancellationToken`), generalized from
//! tracking remote pods to tracking local reader-device supervisors.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::DeviceConfig;
use crate::driver::{DriverCommand, WriteEpcCommand, WriteGpoCommand};
use crate::error::BridgeError;
use crate::event::DeviceState;
use crate::tag_cache::TagCache;

/// Slot a device's supervisor publishes its live driver command channel
/// into, each time `connect()` starts a fresh run. `None` whenever the
/// device is between connections, so a control-surface call against a
/// disconnected device fails fast with [`BridgeError::Transport`]
/// rather than hanging.
pub type CommandSlot = Arc<AsyncMutex<Option<mpsc::Sender<DriverCommand>>>>;

const COMMAND_REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// One entry the registry tracks per configured device name.
pub struct DeviceEntry {
    pub config: DeviceConfig,
    pub tags: TagCache,
    pub connected: bool,
    pub reading: bool,
    pub shutdown: CancellationToken,
    pub command_slot: CommandSlot,
}

impl DeviceEntry {
    fn new(config: DeviceConfig, shutdown: CancellationToken) -> Self {
        Self {
            config,
            tags: TagCache::new(),
            connected: false,
            reading: false,
            shutdown,
            command_slot: Arc::new(AsyncMutex::new(None)),
        }
    }

    pub fn state(&self) -> DeviceState {
        match (self.connected, self.reading) {
            (false, _) => DeviceState::Disconnected,
            (true, false) => DeviceState::Connected,
            (true, true) => DeviceState::Reading,
        }
    }
}

/// Registry of all configured devices, behind a single `RwLock` so
/// reads (control-surface queries) never contend with each other, and
/// mutations never block reads for longer than it takes to touch the
/// map itself.
pub struct DeviceRegistry {
    devices: RwLock<HashMap<String, DeviceEntry>>,
    updating: AtomicBool,
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self { devices: RwLock::new(HashMap::new()), updating: AtomicBool::new(false) }
    }

    /// Acquire the single mutation permit, returning [`BridgeError::Busy`]
    /// if another create/update/delete is already in flight.
    fn begin_mutation(&self) -> Result<MutationGuard<'_>, BridgeError> {
        if self.updating.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
            return Err(BridgeError::Busy);
        }
        Ok(MutationGuard { updating: &self.updating })
    }

    /// Register a freshly loaded device config, replacing any prior
    /// entry of the same name. Returns the device's own shutdown token
    /// and command slot so the caller can spawn its supervisor.
    pub async fn insert(&self, config: DeviceConfig) -> Result<(CancellationToken, CommandSlot), BridgeError> {
        let _guard = self.begin_mutation()?;
        let name = config.name.clone();
        let shutdown = CancellationToken::new();
        let mut devices = self.devices.write().await;
        if let Some(prev) = devices.remove(&name) {
            prev.shutdown.cancel();
        }
        let entry = DeviceEntry::new(config, shutdown.clone());
        let command_slot = entry.command_slot.clone();
        devices.insert(name.clone(), entry);
        info!(device = name.as_str(), "device registered");
        Ok((shutdown, command_slot))
    }

    /// Remove a device, cancelling its supervisor's shutdown token.
    pub async fn remove(&self, name: &str) -> Result<(), BridgeError> {
        let _guard = self.begin_mutation()?;
        let mut devices = self.devices.write().await;
        match devices.remove(name) {
            Some(entry) => {
                entry.shutdown.cancel();
                info!(device = name, "device removed");
                Ok(())
            }
            None => Err(BridgeError::NotFound(name.to_string())),
        }
    }

    pub async fn list_names(&self) -> Vec<String> {
        self.devices.read().await.keys().cloned().collect()
    }

    pub async fn get_config(&self, name: &str) -> Option<DeviceConfig> {
        self.devices.read().await.get(name).map(|e| e.config.clone())
    }

    pub async fn state(&self, name: &str) -> DeviceState {
        match self.devices.read().await.get(name) {
            Some(entry) => entry.state(),
            None => DeviceState::NotFound,
        }
    }

    pub async fn set_connected(&self, name: &str, connected: bool) {
        if let Some(entry) = self.devices.write().await.get_mut(name) {
            entry.connected = connected;
            if !connected {
                entry.reading = false;
            }
        }
    }

    pub async fn set_reading(&self, name: &str, reading: bool) {
        if let Some(entry) = self.devices.write().await.get_mut(name) {
            entry.reading = reading;
        }
    }

    /// Record one raw detection against a device's cache. Returns
    /// `(tag, is_new)` so the pipeline can suppress re-emission for a
    /// repeat sighting.
    pub async fn observe_tag(&self, name: &str, raw: crate::event::RawTag) -> Option<(crate::event::Tag, bool)> {
        let mut devices = self.devices.write().await;
        devices.get_mut(name).map(|entry| entry.tags.observe(raw))
    }

    pub async fn clear_tags(&self, name: &str) -> Result<(), BridgeError> {
        let mut devices = self.devices.write().await;
        match devices.get_mut(name) {
            Some(entry) => {
                entry.tags.clear();
                Ok(())
            }
            None => Err(BridgeError::NotFound(name.to_string())),
        }
    }

    pub async fn tags(&self, name: &str) -> Result<Vec<crate::event::Tag>, BridgeError> {
        self.devices.read().await.get(name).map(|e| e.tags.all()).ok_or_else(|| BridgeError::NotFound(name.to_string()))
    }

    pub async fn tag_count(&self, name: &str) -> Result<usize, BridgeError> {
        self.devices.read().await.get(name).map(|e| e.tags.len()).ok_or_else(|| BridgeError::NotFound(name.to_string()))
    }

    pub async fn epcs(&self, name: &str) -> Result<Vec<String>, BridgeError> {
        self.devices.read().await.get(name).map(|e| e.tags.epcs()).ok_or_else(|| BridgeError::NotFound(name.to_string()))
    }

    pub async fn gtin_counts(&self, name: &str) -> Result<HashMap<String, u64>, BridgeError> {
        self.devices
            .read()
            .await
            .get(name)
            .map(|e| e.tags.gtin_counts())
            .ok_or_else(|| BridgeError::NotFound(name.to_string()))
    }

    /// `clear(null)` from the control surface: empty every device's cache.
    pub async fn clear_all_tags(&self) {
        let mut devices = self.devices.write().await;
        for entry in devices.values_mut() {
            entry.tags.clear();
        }
    }

    /// `get_tags()`: every cached tag across every device.
    pub async fn all_tags(&self) -> Vec<crate::event::Tag> {
        self.devices.read().await.values().flat_map(|e| e.tags.all()).collect()
    }

    /// `get_tag_count()`.
    pub async fn all_tag_count(&self) -> usize {
        self.devices.read().await.values().map(|e| e.tags.len()).sum()
    }

    /// `get_epcs()`: the union of EPCs cached across every device.
    pub async fn all_epcs(&self) -> Vec<String> {
        self.devices.read().await.values().flat_map(|e| e.tags.epcs()).collect()
    }

    /// `get_gtin_counts()`, merged across every device.
    pub async fn all_gtin_counts(&self) -> HashMap<String, u64> {
        let mut totals: HashMap<String, u64> = HashMap::new();
        for entry in self.devices.read().await.values() {
            for (gtin, count) in entry.tags.gtin_counts() {
                *totals.entry(gtin).or_insert(0) += count;
            }
        }
        totals
    }

    async fn command_slot(&self, name: &str) -> Result<CommandSlot, BridgeError> {
        self.devices
            .read()
            .await
            .get(name)
            .map(|e| e.command_slot.clone())
            .ok_or_else(|| BridgeError::NotFound(name.to_string()))
    }

    /// Forward one [`DriverCommand`] to the device's currently connected
    /// driver and await its reply, bounded by [`COMMAND_REPLY_TIMEOUT`].
    /// Fails with [`BridgeError::Transport`] if the device has no live
    /// connection right now rather than blocking indefinitely.
    async fn send_command(
        &self,
        name: &str,
        build: impl FnOnce(oneshot::Sender<Result<(), BridgeError>>) -> DriverCommand,
    ) -> Result<(), BridgeError> {
        let slot = self.command_slot(name).await?;
        let sender = slot
            .lock()
            .await
            .clone()
            .ok_or_else(|| BridgeError::Transport(format!("{name}: device not connected")))?;
        let (reply_tx, reply_rx) = oneshot::channel();
        sender
            .send(build(reply_tx))
            .await
            .map_err(|_| BridgeError::Transport(format!("{name}: driver command channel closed")))?;
        match tokio::time::timeout(COMMAND_REPLY_TIMEOUT, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(BridgeError::Transport(format!("{name}: driver dropped command reply"))),
            Err(_) => Err(BridgeError::ProtocolTimeout),
        }
    }

    pub async fn start_inventory(&self, name: &str) -> Result<(), BridgeError> {
        self.send_command(name, DriverCommand::StartInventory).await
    }

    pub async fn stop_inventory(&self, name: &str) -> Result<(), BridgeError> {
        self.send_command(name, DriverCommand::StopInventory).await
    }

    pub async fn write_epc(&self, name: &str, cmd: WriteEpcCommand) -> Result<(), BridgeError> {
        self.send_command(name, |reply| DriverCommand::WriteEpc(cmd, reply)).await
    }

    pub async fn write_gpo(&self, name: &str, cmd: WriteGpoCommand) -> Result<(), BridgeError> {
        self.send_command(name, |reply| DriverCommand::WriteGpo(cmd, reply)).await
    }

    /// Ask the currently connected driver to clear its own onboard tag
    /// buffer, best-effort: a disconnected device has nothing onboard
    /// to clear, so that case is swallowed rather than surfaced.
    pub async fn clear_tags_on_driver(&self, name: &str) -> Result<(), BridgeError> {
        match self.send_command(name, DriverCommand::ClearTags).await {
            Ok(()) => Ok(()),
            Err(BridgeError::Transport(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Evict stale tags across every device. Used by the maintenance
    /// task's periodic TTL sweep.
    pub async fn evict_stale_tags(&self, ttl: std::time::Duration) -> usize {
        let mut devices = self.devices.write().await;
        devices.values_mut().map(|entry| entry.tags.evict_older_than(ttl)).sum()
    }

    /// Cancel every device's shutdown token, used at process shutdown
    /// to unwind all supervisors.
    pub async fn shutdown_all(&self) {
        let devices = self.devices.read().await;
        for (name, entry) in devices.iter() {
            warn!(device = name.as_str(), "shutting down device supervisor");
            entry.shutdown.cancel();
        }
    }
}

struct MutationGuard<'a> {
    updating: &'a AtomicBool,
}

impl Drop for MutationGuard<'_> {
    fn drop(&mut self) {
        self.updating.store(false, Ordering::Release);
    }
}

pub type SharedDeviceRegistry = Arc<DeviceRegistry>;

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
