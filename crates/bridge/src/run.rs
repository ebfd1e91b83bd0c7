// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Top-level wiring: loads the file-based device/actions configuration,
//! builds sinks, spawns every device supervisor plus the pipeline and
//! maintenance tasks, and exposes the control-surface operations the
//! excluded HTTP/CLI/tray layers call into. Grounded on the teacher's
//! `run::prepare`/`run::run` (load config, build shared state, spawn
//! every background task, then hand back a handle the caller drives to
//! completion), generalized from one interactive session to a fleet of
//! reader device supervisors with no session/PTY concept at all.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{ActionsConfig, Config, DeviceConfig};
use crate::driver::{DriverEvent, WriteEpcCommand, WriteGpoCommand};
use crate::error::BridgeError;
use crate::event::{Event, Tag};
use crate::event_ring::EventRing;
use crate::maintenance::{run_pruning_loop, run_tag_eviction_loop};
use crate::pipeline::Pipeline;
use crate::registry::{DeviceRegistry, SharedDeviceRegistry};
use crate::sinks::db::DbSink;
use crate::sinks::http::HttpSink;
use crate::sinks::mqtt::MqttSink;
use crate::sinks::xtrack::XtrackSink;
use crate::sinks::Sink;
use crate::supervisor::{build_driver, run_device};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Sinks and maintenance tasks rebuilt together by `set_actions`, kept
/// behind one lock so a reader of `get_actions`/`get_report` never
/// observes a database swapped out from under a stale actions snapshot.
struct RuntimeState {
    actions: ActionsConfig,
    db: Option<Arc<DbSink>>,
    sinks_handle: Arc<RwLock<Vec<Arc<dyn Sink>>>>,
    maintenance_shutdown: CancellationToken,
}

/// Owns every device supervisor, the pipeline, and the control-surface
/// operations (§6.3) the excluded API/CLI/tray layers are built on top
/// of. Exists for the lifetime of one `run()` call.
pub struct App {
    registry: SharedDeviceRegistry,
    ring: Arc<RwLock<EventRing>>,
    events_tx: mpsc::Sender<(String, DriverEvent)>,
    devices_dir: PathBuf,
    actions_config_path: PathBuf,
    state: RwLock<RuntimeState>,
    shutdown: CancellationToken,
}

pub type SharedApp = Arc<App>;

fn device_config_path(devices_dir: &Path, name: &str) -> PathBuf {
    devices_dir.join(format!("{}.json", name.to_uppercase()))
}

fn load_json_or_default<T: serde::de::DeserializeOwned + Default>(path: &Path) -> T {
    match fs::read(path) {
        Ok(body) => serde_json::from_slice(&body).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "invalid config file, using defaults");
            T::default()
        }),
        Err(_) => T::default(),
    }
}

/// Resolve a collision between two device config files claiming the
/// same name by suffixing `_2`, `_3`, ... until `taken` no longer
/// contains the candidate. Grounded on the source's
/// `_generate_unique_name`, run from the same directory scan that loads
/// every device config.
fn generate_unique_name(base_name: &str, taken: &std::collections::HashSet<String>) -> String {
    if !taken.contains(base_name) {
        return base_name.to_string();
    }
    let mut index = 2;
    loop {
        let candidate = format!("{base_name}_{index}");
        if !taken.contains(&candidate) {
            return candidate;
        }
        index += 1;
    }
}

/// Scan `devices_dir` for `*.json` device configs. A file that fails to
/// parse is missing a required field for its reader kind and is removed
/// rather than retried every scan. Two files whose stems uppercase to
/// the same name are both kept, the later one renamed with a `_2`,
/// `_3`, ... suffix rather than silently overwriting the earlier one.
fn load_device_configs(devices_dir: &Path) -> Vec<DeviceConfig> {
    let mut configs = Vec::new();
    let mut names: std::collections::HashSet<String> = std::collections::HashSet::new();
    let entries = match fs::read_dir(devices_dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %devices_dir.display(), error = %e, "device config directory unreadable, starting with no devices");
            return configs;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else { continue };
        let body = match fs::read(&path) {
            Ok(body) => body,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read device config file");
                continue;
            }
        };
        let name = generate_unique_name(&stem.to_uppercase(), &names);
        match DeviceConfig::parse(&name, &body) {
            Ok(config) => {
                names.insert(name);
                configs.push(config);
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "device config missing required fields, removing file");
                let _ = fs::remove_file(&path);
            }
        }
    }
    configs
}

/// Build every sink `actions` enables. A sink whose endpoint is simply
/// absent from the config is skipped; a database that fails to connect
/// is logged and left out rather than treated as fatal, since the rest
/// of the bridge (live inventory, the other sinks) works fine without
/// persistence.
async fn build_sinks(actions: &ActionsConfig) -> (Vec<Arc<dyn Sink>>, Option<Arc<DbSink>>) {
    let mut sinks: Vec<Arc<dyn Sink>> = Vec::new();
    let mut db = None;
    if let Some(url) = &actions.database_url {
        match DbSink::connect(url).await {
            Ok(sink) => {
                let sink = Arc::new(sink);
                db = Some(sink.clone());
                sinks.push(sink);
            }
            Err(e) => warn!(error = %e, "database sink connection failed, tag persistence disabled"),
        }
    }
    if let Some(url) = &actions.http_post {
        sinks.push(Arc::new(HttpSink::new(url.clone())));
    }
    if let Some(url) = &actions.mqtt_url {
        sinks.push(Arc::new(MqttSink::new(url.clone())));
    }
    if let Some(url) = &actions.xtrack_url {
        sinks.push(Arc::new(XtrackSink::new(url.clone())));
    }
    (sinks, db)
}

fn spawn_maintenance(
    registry: &SharedDeviceRegistry,
    db: Option<Arc<DbSink>>,
    actions: ActionsConfig,
    shutdown: CancellationToken,
) {
    if let Some(db) = db {
        tokio::spawn(run_pruning_loop(db, actions.clone(), shutdown.clone()));
    }
    tokio::spawn(run_tag_eviction_loop(registry.clone(), actions, shutdown));
}

/// Build the device's driver, register it, and spawn its supervisor.
/// Errors are the caller's to decide whether to treat as fatal (startup
/// scan tolerates them so one bad device never blocks the others;
/// `create_device`/`update_device` surface them to the caller instead).
async fn spawn_device(
    registry: &SharedDeviceRegistry,
    events_tx: &mpsc::Sender<(String, DriverEvent)>,
    config: DeviceConfig,
) -> Result<(), BridgeError> {
    let driver = build_driver(&config)?;
    let name = config.name.clone();
    let (device_shutdown, command_slot) = registry.insert(config.clone()).await?;
    tokio::spawn(run_device(config, driver, events_tx.clone(), command_slot, device_shutdown));
    info!(device = name.as_str(), "device supervisor spawned");
    Ok(())
}

fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()).ok();
        tokio::select! {
            _ = async {
                match sigterm.as_mut() {
                    Some(s) => s.recv().await,
                    None => std::future::pending().await,
                }
            } => info!("received SIGTERM"),
            _ = async {
                match sigint.as_mut() {
                    Some(s) => s.recv().await,
                    None => std::future::pending().await,
                }
            } => info!("received SIGINT"),
        }
        shutdown.cancel();
    });
}

/// Load configuration, spawn every background task, and return a handle
/// ready to serve control-surface calls. Does not block; the caller
/// awaits [`App::shutdown_signal`] (or drives its own loop) to know
/// when to stop.
pub async fn prepare(config: Config) -> anyhow::Result<SharedApp> {
    let devices_dir = config.devices_dir();
    let actions_config_path = config.actions_config_path();
    let actions: ActionsConfig = load_json_or_default(&actions_config_path);

    let registry: SharedDeviceRegistry = Arc::new(DeviceRegistry::new());
    let ring = Arc::new(RwLock::new(EventRing::new()));
    let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let shutdown = CancellationToken::new();

    let (sinks, db) = build_sinks(&actions).await;
    let pipeline = Pipeline::new(registry.clone(), ring.clone(), sinks);
    let sinks_handle = pipeline.sinks_handle();
    tokio::spawn(pipeline.run(events_rx));

    for device_config in load_device_configs(&devices_dir) {
        let name = device_config.name.clone();
        if let Err(e) = spawn_device(&registry, &events_tx, device_config).await {
            warn!(device = name.as_str(), error = %e, "failed to start device, skipping");
        }
    }

    let maintenance_shutdown = shutdown.child_token();
    spawn_maintenance(&registry, db.clone(), actions.clone(), maintenance_shutdown.clone());

    spawn_signal_handler(shutdown.clone());

    Ok(Arc::new(App {
        registry,
        ring,
        events_tx,
        devices_dir,
        actions_config_path,
        state: RwLock::new(RuntimeState { actions, db, sinks_handle, maintenance_shutdown }),
        shutdown,
    }))
}

impl App {
    /// Resolves once the process has been asked to shut down (SIGTERM,
    /// SIGINT, or a direct cancel of the returned app's token).
    pub async fn shutdown_signal(&self) {
        self.shutdown.cancelled().await;
    }

    pub fn cancel_shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Cancel every device supervisor. Called once the caller's own
    /// event loop observes [`Self::shutdown_signal`].
    pub async fn shutdown_devices(&self) {
        self.registry.shutdown_all().await;
    }

    pub async fn list_devices(&self) -> Vec<String> {
        self.registry.list_names().await
    }

    pub async fn get_device_config(&self, name: &str) -> Option<DeviceConfig> {
        self.registry.get_config(name).await
    }

    /// -1 not found, 0 disconnected, 1 connected, 2 reading.
    pub async fn device_state(&self, name: &str) -> i8 {
        self.registry.state(name).await.as_i8()
    }

    async fn persist_and_spawn(&self, config: DeviceConfig) -> Result<(), BridgeError> {
        let driver = build_driver(&config)?;
        let path = device_config_path(&self.devices_dir, &config.name);
        let body = serde_json::to_vec_pretty(&config.params)
            .map_err(|e| BridgeError::Config(format!("failed to serialize device config: {e}")))?;
        fs::write(&path, body).map_err(|e| BridgeError::Config(format!("failed to write {}: {e}", path.display())))?;
        let name = config.name.clone();
        let (device_shutdown, command_slot) = self.registry.insert(config.clone()).await?;
        tokio::spawn(run_device(config, driver, self.events_tx.clone(), command_slot, device_shutdown));
        info!(device = name.as_str(), "device config saved, supervisor (re)spawned");
        Ok(())
    }

    pub async fn create_device(&self, name: &str, body: &[u8]) -> Result<(), BridgeError> {
        let config = DeviceConfig::parse(name, body)?;
        self.persist_and_spawn(config).await
    }

    pub async fn update_device(&self, name: &str, body: &[u8]) -> Result<(), BridgeError> {
        let config = DeviceConfig::parse(name, body)?;
        self.persist_and_spawn(config).await
    }

    pub async fn delete_device(&self, name: &str) -> Result<(), BridgeError> {
        let name = name.to_uppercase();
        self.registry.remove(&name).await?;
        let path = device_config_path(&self.devices_dir, &name);
        if let Err(e) = fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %e, "failed to remove device config file");
            }
        }
        Ok(())
    }

    pub async fn start_inventory(&self, name: &str) -> Result<(), BridgeError> {
        self.registry.start_inventory(name).await
    }

    pub async fn stop_inventory(&self, name: &str) -> Result<(), BridgeError> {
        self.registry.stop_inventory(name).await
    }

    /// `clear(null)` empties every device's cache; `clear(Some(name))`
    /// empties one device's cache and asks its driver to drop its own
    /// onboard tag buffer too, if it's currently connected.
    pub async fn clear(&self, name: Option<&str>) -> Result<(), BridgeError> {
        match name {
            Some(name) => {
                self.registry.clear_tags(name).await?;
                self.registry.clear_tags_on_driver(name).await
            }
            None => {
                self.registry.clear_all_tags().await;
                Ok(())
            }
        }
    }

    pub async fn write_epc(&self, name: &str, cmd: WriteEpcCommand) -> Result<(), BridgeError> {
        self.registry.write_epc(name, cmd).await
    }

    pub async fn write_gpo(&self, name: &str, cmd: WriteGpoCommand) -> Result<(), BridgeError> {
        self.registry.write_gpo(name, cmd).await
    }

    pub async fn get_tags(&self) -> Vec<Tag> {
        self.registry.all_tags().await
    }

    pub async fn get_tag_count(&self) -> usize {
        self.registry.all_tag_count().await
    }

    pub async fn get_epcs(&self) -> Vec<String> {
        self.registry.all_epcs().await
    }

    pub async fn get_gtin_counts(&self) -> HashMap<String, u64> {
        self.registry.all_gtin_counts().await
    }

    pub async fn get_events(&self) -> Vec<Event> {
        self.ring.read().await.snapshot()
    }

    /// The per-table CSV rows the excluded report layer zips up and
    /// serves over HTTP. Requires a database sink to be configured.
    pub async fn get_report(&self) -> Result<Vec<(&'static str, String)>, BridgeError> {
        let db = self
            .state
            .read()
            .await
            .db
            .clone()
            .ok_or_else(|| BridgeError::Config("no database configured".to_string()))?;
        let tags_csv = db.export_tags_csv().await?;
        let events_csv = db.export_events_csv().await?;
        Ok(vec![("tags.csv", tags_csv), ("events.csv", events_csv)])
    }

    pub async fn get_actions(&self) -> ActionsConfig {
        self.state.read().await.actions.clone()
    }

    /// Persist the new sink config and rebuild sinks/the maintenance
    /// tasks from it, atomically with respect to concurrent
    /// `get_actions`/`get_report` readers.
    pub async fn set_actions(&self, actions: ActionsConfig) -> Result<(), BridgeError> {
        let body = serde_json::to_vec_pretty(&actions).map_err(|e| BridgeError::Config(e.to_string()))?;
        fs::write(&self.actions_config_path, body)
            .map_err(|e| BridgeError::Config(format!("failed to write {}: {e}", self.actions_config_path.display())))?;

        let (sinks, db) = build_sinks(&actions).await;
        let new_maintenance_shutdown = self.shutdown.child_token();
        spawn_maintenance(&self.registry, db.clone(), actions.clone(), new_maintenance_shutdown.clone());

        let mut state = self.state.write().await;
        state.maintenance_shutdown.cancel();
        *state.sinks_handle.write().await = sinks;
        state.db = db;
        state.actions = actions;
        state.maintenance_shutdown = new_maintenance_shutdown;
        Ok(())
    }
}

/// Run the bridge to completion: prepare every background task, then
/// wait for a shutdown signal before unwinding the device supervisors.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let app = prepare(config).await?;
    app.shutdown_signal().await;
    info!("shutdown signal received, stopping device supervisors");
    app.shutdown_devices().await;
    Ok(())
}

#[cfg(test)]
#[path = "run_tests.rs"]
mod tests;
