// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-level CLI flags (`clap`) plus the file-based configuration
//! types the registry and maintenance tasks load at runtime: the main
//! config, the actions/sinks config, and per-device configs. Parsing
//! the surrounding file *format* (where on disk, how it's watched) is
//! the excluded config-loading layer's job; this module only defines
//! the shape `serde_json` deserializes into and the handful of pure
//! functions (`parse_database_url`, `gpi_action`) the maintenance and
//! sink layers need.

use std::collections::HashMap;
use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};

/// Process-level flags: where the device/actions config directory lives,
/// and how to initialize logging. Per-device configuration is file-based
/// JSON (§6.1), not a CLI concern.
#[derive(Debug, Parser)]
#[command(name = "rfidbridge", version, about = "RFID reader fleet middleware.")]
pub struct Config {
    /// Root config directory (expects `config.json`, `actions.json`, `devices/`).
    #[arg(long, env = "RFIDBRIDGE_CONFIG_DIR", default_value = "config")]
    pub config_dir: PathBuf,

    /// Log format (json or text).
    #[arg(long, env = "RFIDBRIDGE_LOG_FORMAT", default_value = "json")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "RFIDBRIDGE_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.config_dir.as_os_str().is_empty() {
            anyhow::bail!("--config-dir must not be empty");
        }
        Ok(())
    }

    pub fn devices_dir(&self) -> PathBuf {
        self.config_dir.join("devices")
    }

    pub fn main_config_path(&self) -> PathBuf {
        self.config_dir.join("config.json")
    }

    pub fn actions_config_path(&self) -> PathBuf {
        self.config_dir.join("actions.json")
    }
}

/// `config/config.json`: recognized top-level keys plus anything the
/// excluded UI layer stashes alongside them, preserved on save.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct MainConfig {
    pub title: Option<String>,
    pub port: Option<u16>,
    pub log_path: Option<String>,
    pub open_browser: Option<bool>,
    #[serde(default)]
    pub beep: bool,
    pub secret_key: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_storage_days() -> i64 {
    7
}

/// `config/actions.json`: sink endpoints. A missing key disables the
/// corresponding sink.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ActionsConfig {
    pub database_url: Option<String>,
    pub http_post: Option<String>,
    pub mqtt_url: Option<String>,
    pub xtrack_url: Option<String>,
    #[serde(default = "default_storage_days")]
    pub storage_days: i64,
    pub log_path: Option<String>,
    pub clear_old_tags_interval: Option<u64>,
}

impl ActionsConfig {
    /// `STORAGE_DAYS <= 0` disables pruning rather than "prune
    /// everything".
    pub fn pruning_enabled(&self) -> bool {
        self.storage_days > 0
    }

    pub fn tag_ttl_eviction_enabled(&self) -> bool {
        self.clear_old_tags_interval.is_some_and(|secs| secs > 0)
    }
}

/// Database dialect, parsed from the `DATABASE_URL` scheme. The
/// optional async-driver suffix (e.g. `+aiosqlite`, `+asyncpg`) carried
/// over from the source's SQLAlchemy convention is stripped; `sqlx`
/// selects its driver from the feature flags compiled in, not the URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbDialect {
    Sqlite,
    MySql,
    Postgres,
}

/// Split `scheme[+driver]://rest` into its dialect and the URL with the
/// driver suffix removed, the way the source's `DatabaseEngine` derives
/// a sync URL from an async one.
pub fn parse_database_url(url: &str) -> Option<(DbDialect, String)> {
    let (scheme, rest) = url.split_once("://")?;
    let dialect_part = scheme.split('+').next().unwrap_or(scheme);
    let dialect = match dialect_part {
        "sqlite" => DbDialect::Sqlite,
        "mysql" => DbDialect::MySql,
        "postgresql" | "postgres" => DbDialect::Postgres,
        _ => return None,
    };
    Some((dialect, format!("{dialect_part}://{rest}")))
}

/// Per-antenna configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct AntennaConfig {
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub power: i32,
    #[serde(rename = "RSSI", default)]
    pub min_rssi: i32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct GpiEdge {
    pub pin: u8,
    pub state: bool,
}

/// GPI-to-inventory-control trigger: when both the start and stop
/// condition match simultaneously, stop wins.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GpiTriggerConfig {
    #[serde(default)]
    pub active: bool,
    pub start: GpiEdge,
    pub stop: GpiEdge,
}

/// Resolve the GPI action for an observed pin state, per the spec's
/// documented stop-takes-precedence tiebreak.
pub fn gpi_action(cfg: &GpiTriggerConfig, gpi: &HashMap<u8, bool>) -> Option<bool> {
    if !cfg.active {
        return None;
    }
    let stop_matches = gpi.get(&cfg.stop.pin).copied() == Some(cfg.stop.state);
    let start_matches = gpi.get(&cfg.start.pin).copied() == Some(cfg.start.state);
    if stop_matches {
        Some(false)
    } else if start_matches {
        Some(true)
    } else {
        None
    }
}

fn default_baud() -> u32 {
    115200
}
fn default_vid() -> u16 {
    1
}
fn default_pid() -> u16 {
    1
}
fn default_auto() -> String {
    "AUTO".to_string()
}
fn default_event_type() -> String {
    "generic".to_string()
}
fn default_ur4_port() -> u16 {
    8888
}
fn default_r700_username() -> String {
    "root".to_string()
}
fn default_r700_password() -> String {
    "impinj".to_string()
}
fn default_icard_power() -> i32 {
    26
}
fn default_tcp_generic_port() -> u16 {
    23
}
fn default_ble_name() -> String {
    "SMTX".to_string()
}
fn default_write_retry_count() -> u32 {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Ur4Config {
    pub connection: String,
    #[serde(default = "default_ur4_port")]
    pub port: u16,
    #[serde(default)]
    pub ant: HashMap<String, AntennaConfig>,
    #[serde(default)]
    pub session: u8,
    #[serde(default)]
    pub start_reading: bool,
    #[serde(default)]
    pub buzzer: bool,
    pub gpi: Option<GpiTriggerConfig>,
    #[serde(default = "default_write_retry_count")]
    pub write_retry_count: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum X714ConnectionType {
    Serial,
    Ble,
    Tcp,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct X714Config {
    #[serde(default)]
    pub connection_type: Option<X714ConnectionType>,
    #[serde(default = "default_auto")]
    pub connection: String,
    #[serde(default = "default_baud")]
    pub baudrate: u32,
    #[serde(default = "default_vid")]
    pub vid: u16,
    #[serde(default = "default_pid")]
    pub pid: u16,
    #[serde(default = "default_tcp_generic_port")]
    pub tcp_port: u16,
    #[serde(default = "default_ble_name")]
    pub ble_name: String,
    #[serde(default)]
    pub ant: HashMap<String, AntennaConfig>,
    #[serde(default)]
    pub session: u8,
    #[serde(default)]
    pub start_reading: bool,
    #[serde(default)]
    pub buzzer: bool,
    pub gpi: Option<GpiTriggerConfig>,
}

impl X714Config {
    /// The source defaults an unrecognized/missing `CONNECTION_TYPE`
    /// to `SERIAL`.
    pub fn connection_type_or_default(&self) -> X714ConnectionType {
        self.connection_type.unwrap_or(X714ConnectionType::Serial)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct R700IotConfig {
    pub connection: String,
    #[serde(default = "default_r700_username")]
    pub username: String,
    #[serde(default = "default_r700_password")]
    pub password: String,
    #[serde(default)]
    pub start_reading: bool,
    #[serde(default)]
    pub reading_config: serde_json::Value,
}

fn default_session() -> u8 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct IcardConfig {
    #[serde(default = "default_auto")]
    pub connection: String,
    #[serde(default = "default_baud")]
    pub baudrate: u32,
    #[serde(default = "default_vid")]
    pub vid: u16,
    #[serde(default = "default_pid")]
    pub pid: u16,
    #[serde(default = "default_session")]
    pub session: u8,
    #[serde(default = "default_icard_power")]
    pub power: i32,
    #[serde(default)]
    pub start_reading: bool,
}

impl IcardConfig {
    /// Power is clamped to `[10,26]` dBm.
    pub fn clamped_power(&self) -> i32 {
        self.power.clamp(10, 26)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct SerialConfig {
    #[serde(default = "default_auto")]
    pub connection: String,
    #[serde(default = "default_baud")]
    pub baudrate: u32,
    #[serde(default = "default_vid")]
    pub vid: u16,
    #[serde(default = "default_pid")]
    pub pid: u16,
    #[serde(default = "default_event_type")]
    pub event_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct TcpConfig {
    pub connection: String,
    #[serde(default = "default_tcp_generic_port")]
    pub port: u16,
    #[serde(default = "default_event_type")]
    pub event_type: String,
}

/// Reader-specific device parameters. Internally tagged on `READER`,
/// matching the source's one-required-field-rest-is-reader-specific
/// device config file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "READER")]
pub enum DeviceParams {
    #[serde(rename = "UR4")]
    Ur4(Ur4Config),
    #[serde(rename = "X714")]
    X714(X714Config),
    #[serde(rename = "R700_IOT")]
    R700Iot(R700IotConfig),
    #[serde(rename = "ICARD")]
    Icard(IcardConfig),
    #[serde(rename = "SERIAL")]
    Serial(SerialConfig),
    #[serde(rename = "TCP")]
    Tcp(TcpConfig),
}

impl DeviceParams {
    pub fn reader_kind(&self) -> crate::event::ReaderKind {
        use crate::event::ReaderKind;
        match self {
            Self::Ur4(_) => ReaderKind::Ur4,
            Self::X714(_) => ReaderKind::X714,
            Self::R700Iot(_) => ReaderKind::R700Iot,
            Self::Icard(_) => ReaderKind::Icard,
            Self::Serial(_) => ReaderKind::Serial,
            Self::Tcp(_) => ReaderKind::Tcp,
        }
    }
}

/// Immutable per-device record loaded from `config/devices/<NAME>.json`
/// `name` is the uppercased file stem, not a JSON field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceConfig {
    pub name: String,
    #[serde(flatten)]
    pub params: DeviceParams,
}

impl DeviceConfig {
    /// Parse a device config file's JSON body and attach the device
    /// name derived from its filename.
    pub fn parse(name: impl Into<String>, body: &[u8]) -> Result<Self, crate::error::BridgeError> {
        let params: DeviceParams = serde_json::from_slice(body)
            .map_err(|e| crate::error::BridgeError::Config(format!("invalid device config: {e}")))?;
        Ok(Self { name: name.into().to_uppercase(), params })
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
