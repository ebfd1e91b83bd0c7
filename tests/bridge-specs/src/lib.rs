// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end bridge tests.
//!
//! Builds a throwaway `config/` directory tree (the same layout
//! `rfidbridge::run::prepare` expects) and drives the bridge in-process
//! through its [`rfidbridge::run::App`] control surface, rather than
//! spawning a subprocess: the bridge has no HTTP/CLI front door of its
//! own, that layer lives outside this crate.

use std::path::{Path, PathBuf};

use clap::Parser;
use rfidbridge::config::Config;
use rfidbridge::run::{self, SharedApp};

/// An isolated `config/` directory plus the [`Config`] pointing at it.
pub struct TestConfigDir {
    _root: tempfile::TempDir,
    pub config: Config,
}

impl TestConfigDir {
    /// Create an empty config directory (no devices, default actions).
    pub fn new() -> anyhow::Result<Self> {
        let root = tempfile::tempdir()?;
        let config_dir = root.path().join("config");
        std::fs::create_dir_all(config_dir.join("devices"))?;
        let config = Config::parse_from(["rfidbridge", "--config-dir", &config_dir.display().to_string()]);
        Ok(Self { _root: root, config })
    }

    pub fn devices_dir(&self) -> PathBuf {
        self.config.devices_dir()
    }

    /// Write one device config file directly, bypassing `App::create_device`,
    /// for tests that want devices present before `prepare()` runs.
    pub fn write_device(&self, name: &str, body: &str) -> anyhow::Result<()> {
        let path = self.devices_dir().join(format!("{}.json", name.to_uppercase()));
        std::fs::write(path, body)?;
        Ok(())
    }
}

/// A bare-bones SERIAL device config: never actually connects in CI
/// (no hardware present), but is enough to exercise registration,
/// listing, and state reporting.
pub const SERIAL_DEVICE_BODY: &str = r#"{"READER": "SERIAL", "CONNECTION": "AUTO"}"#;

/// Start the bridge against an isolated config directory.
pub async fn prepare(dir: &TestConfigDir) -> anyhow::Result<SharedApp> {
    run::prepare(clone_config(&dir.config)).await
}

/// `Config` doesn't derive `Clone` (it's a one-shot CLI parse), so tests
/// that need a second handle re-parse from the same directory.
fn clone_config(config: &Config) -> Config {
    Config::parse_from(["rfidbridge", "--config-dir", &config.config_dir.display().to_string()])
}

pub fn device_config_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{}.json", name.to_uppercase()))
}
