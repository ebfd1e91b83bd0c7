// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end smoke tests driving the bridge's control surface
//! in-process against an isolated `config/` directory.

use rfidbridge::config::ActionsConfig;
use rfidbridge::error::BridgeError;

use rfidbridge_specs::{TestConfigDir, SERIAL_DEVICE_BODY};

#[tokio::test]
async fn starts_with_no_devices() -> anyhow::Result<()> {
    let dir = TestConfigDir::new()?;
    let app = rfidbridge_specs::prepare(&dir).await?;
    assert!(app.list_devices().await.is_empty());
    assert_eq!(app.device_state("GHOST").await, -1);
    Ok(())
}

#[tokio::test]
async fn devices_present_at_startup_are_loaded() -> anyhow::Result<()> {
    let dir = TestConfigDir::new()?;
    dir.write_device("reader-1", SERIAL_DEVICE_BODY)?;
    let app = rfidbridge_specs::prepare(&dir).await?;

    let names = app.list_devices().await;
    assert_eq!(names, vec!["READER-1".to_string()]);
    // Freshly spawned supervisors haven't connected yet.
    assert_eq!(app.device_state("READER-1").await, 0);
    Ok(())
}

#[tokio::test]
async fn create_device_registers_and_persists_config() -> anyhow::Result<()> {
    let dir = TestConfigDir::new()?;
    let app = rfidbridge_specs::prepare(&dir).await?;

    app.create_device("reader-2", SERIAL_DEVICE_BODY.as_bytes()).await?;

    assert_eq!(app.list_devices().await, vec!["READER-2".to_string()]);
    let path = rfidbridge_specs::device_config_path(&dir.devices_dir(), "reader-2");
    assert!(path.exists());
    Ok(())
}

#[tokio::test]
async fn create_device_rejects_unknown_reader_kind() -> anyhow::Result<()> {
    let dir = TestConfigDir::new()?;
    let app = rfidbridge_specs::prepare(&dir).await?;

    let err = app.create_device("reader-3", br#"{"READER": "NOT_A_REAL_READER"}"#).await.unwrap_err();
    assert!(matches!(err, BridgeError::Config(_)));
    assert!(app.list_devices().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn delete_device_removes_config_file() -> anyhow::Result<()> {
    let dir = TestConfigDir::new()?;
    let app = rfidbridge_specs::prepare(&dir).await?;
    app.create_device("reader-4", SERIAL_DEVICE_BODY.as_bytes()).await?;

    app.delete_device("reader-4").await?;

    assert!(app.list_devices().await.is_empty());
    let path = rfidbridge_specs::device_config_path(&dir.devices_dir(), "reader-4");
    assert!(!path.exists());
    Ok(())
}

#[tokio::test]
async fn delete_unknown_device_is_not_found() -> anyhow::Result<()> {
    let dir = TestConfigDir::new()?;
    let app = rfidbridge_specs::prepare(&dir).await?;
    assert_eq!(app.delete_device("GHOST").await, Err(BridgeError::NotFound("GHOST".to_string())));
    Ok(())
}

#[tokio::test]
async fn commands_against_disconnected_device_fail_fast() -> anyhow::Result<()> {
    let dir = TestConfigDir::new()?;
    let app = rfidbridge_specs::prepare(&dir).await?;
    app.create_device("reader-5", SERIAL_DEVICE_BODY.as_bytes()).await?;

    let err = app.start_inventory("READER-5").await.unwrap_err();
    assert!(matches!(err, BridgeError::Transport(_)));
    Ok(())
}

#[tokio::test]
async fn clear_with_no_devices_is_a_no_op() -> anyhow::Result<()> {
    let dir = TestConfigDir::new()?;
    let app = rfidbridge_specs::prepare(&dir).await?;
    app.clear(None).await?;
    assert!(app.get_tags().await.is_empty());
    assert_eq!(app.get_tag_count().await, 0);
    Ok(())
}

#[tokio::test]
async fn clear_unknown_named_device_is_not_found() -> anyhow::Result<()> {
    let dir = TestConfigDir::new()?;
    let app = rfidbridge_specs::prepare(&dir).await?;
    assert_eq!(app.clear(Some("GHOST")).await, Err(BridgeError::NotFound("GHOST".to_string())));
    Ok(())
}

#[tokio::test]
async fn get_events_starts_empty() -> anyhow::Result<()> {
    let dir = TestConfigDir::new()?;
    let app = rfidbridge_specs::prepare(&dir).await?;
    assert!(app.get_events().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn get_report_without_database_is_config_error() -> anyhow::Result<()> {
    let dir = TestConfigDir::new()?;
    let app = rfidbridge_specs::prepare(&dir).await?;
    assert!(matches!(app.get_report().await, Err(BridgeError::Config(_))));
    Ok(())
}

#[tokio::test]
async fn set_actions_persists_and_is_readable_back() -> anyhow::Result<()> {
    let dir = TestConfigDir::new()?;
    let app = rfidbridge_specs::prepare(&dir).await?;

    let actions = ActionsConfig { http_post: Some("http://example.invalid/hook".to_string()), ..Default::default() };
    app.set_actions(actions.clone()).await?;

    let got = app.get_actions().await;
    assert_eq!(got.http_post, Some("http://example.invalid/hook".to_string()));

    let on_disk: ActionsConfig = serde_json::from_slice(&std::fs::read(dir.config.actions_config_path())?)?;
    assert_eq!(on_disk.http_post, actions.http_post);
    Ok(())
}
