// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

pub mod icard;
pub mod r700_iot;
pub mod serial_tcp;
pub mod ur4;
pub mod x714;

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::error::BridgeError;
use crate::event::{GpoControl, ReaderKind, RawTag};

/// Future type returned by the async methods of [`Driver`].
///
/// Drivers are stored as `Box<dyn Driver>` behind the registry, so the
/// trait must stay object-safe; that rules out `async fn` in the trait
/// itself.
pub type DriverFuture<'a> = Pin<Box<dyn Future<Output = Result<(), BridgeError>> + Send + 'a>>;

/// Target selector for an EPC rewrite: match the existing tag by EPC or
/// TID, or let the driver pick (it will prefer TID when resolvable).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteTarget {
    Epc(String),
    Tid(String),
    Unspecified,
}

/// A validated `write_epc` request. Construction enforces the EPC/TID
/// and password hex-length invariants so a driver never has to re-check
/// them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteEpcCommand {
    pub target: WriteTarget,
    pub new_epc: String,
    pub password: String,
}

fn is_hex_of_len(s: &str, len: usize) -> bool {
    s.len() == len && s.bytes().all(|b| b.is_ascii_hexdigit())
}

impl WriteEpcCommand {
    pub fn new(target: WriteTarget, new_epc: impl Into<String>, password: impl Into<String>) -> Result<Self, BridgeError> {
        let new_epc = new_epc.into();
        let password = password.into();
        if !is_hex_of_len(&new_epc, 24) {
            return Err(BridgeError::Validation(format!("new_epc must be 24 hex chars, got {new_epc:?}")));
        }
        if !is_hex_of_len(&password, 8) {
            return Err(BridgeError::Validation(format!("password must be 8 hex chars, got {password:?}")));
        }
        match &target {
            WriteTarget::Epc(v) | WriteTarget::Tid(v) if !is_hex_of_len(v, 24) => {
                return Err(BridgeError::Validation(format!("target value must be 24 hex chars, got {v:?}")));
            }
            _ => {}
        }
        Ok(Self { target, new_epc, password })
    }
}

/// A validated `write_gpo` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteGpoCommand {
    pub pin: u8,
    pub state: bool,
    pub control: GpoControl,
    pub pulse_ms: u32,
}

/// A control-surface request forwarded to a connected driver's `connect()`
/// loop while it runs. The oneshot carries the result back to the caller
/// that issued the command through the registry.
pub enum DriverCommand {
    StartInventory(oneshot::Sender<Result<(), BridgeError>>),
    StopInventory(oneshot::Sender<Result<(), BridgeError>>),
    ClearTags(oneshot::Sender<Result<(), BridgeError>>),
    WriteEpc(WriteEpcCommand, oneshot::Sender<Result<(), BridgeError>>),
    WriteGpo(WriteGpoCommand, oneshot::Sender<Result<(), BridgeError>>),
}

/// Dispatch one [`DriverCommand`] against a connected driver, replying on
/// its oneshot. Shared by every driver's `connect()` select loop so the
/// dispatch logic is written once.
pub async fn dispatch_command(driver: &mut dyn Driver, command: DriverCommand) {
    match command {
        DriverCommand::StartInventory(reply) => {
            let _ = reply.send(driver.start_inventory().await);
        }
        DriverCommand::StopInventory(reply) => {
            let _ = reply.send(driver.stop_inventory().await);
        }
        DriverCommand::ClearTags(reply) => {
            let _ = reply.send(driver.clear_tags().await);
        }
        DriverCommand::WriteEpc(cmd, reply) => {
            let _ = reply.send(driver.write_epc(cmd).await);
        }
        DriverCommand::WriteGpo(cmd, reply) => {
            let _ = reply.send(driver.write_gpo(cmd).await);
        }
    }
}

/// Canonical upward event a driver reports to its supervisor. Kept as a
/// plain enum (rather than letting drivers call back into the pipeline
/// directly) so drivers and the pipeline never depend on each other's
/// types.
#[derive(Debug, Clone)]
pub enum DriverEvent {
    Connect,
    Disconnect,
    Start,
    Stop,
    Tag(RawTag),
    Custom { event_type: String, data: serde_json::Value },
}

/// Narrow callback handle a driver receives at construction to report
/// canonical events upward. Cloned cheaply (wraps an `mpsc::Sender`);
/// sending is best-effort — a closed channel means the supervisor has
/// already torn the driver down, and the driver has nothing useful to
/// do about it.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::Sender<DriverEvent>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<DriverEvent>) -> Self {
        Self { tx }
    }

    pub async fn on_connect(&self) {
        let _ = self.tx.send(DriverEvent::Connect).await;
    }

    pub async fn on_disconnect(&self) {
        let _ = self.tx.send(DriverEvent::Disconnect).await;
    }

    pub async fn on_start(&self) {
        let _ = self.tx.send(DriverEvent::Start).await;
    }

    pub async fn on_stop(&self) {
        let _ = self.tx.send(DriverEvent::Stop).await;
    }

    pub async fn on_tag(&self, tag: RawTag) {
        let _ = self.tx.send(DriverEvent::Tag(tag)).await;
    }

    pub async fn on_event(&self, event_type: impl Into<String>, data: serde_json::Value) {
        let _ = self.tx.send(DriverEvent::Custom { event_type: event_type.into(), data }).await;
    }
}

/// Capability set every reader driver implements (spec's "polymorphism
/// over drivers" redesign: a single object-safe trait rather than the
/// donor's mixin-style composition). `connect` owns the driver's
/// receive/config-walk/keep-alive sub-tasks for the lifetime of the
/// connection and only returns when the connection ends or `shutdown`
/// fires.
pub trait Driver: Send {
    fn reader_kind(&self) -> ReaderKind;

    fn is_connected(&self) -> bool;

    fn is_reading(&self) -> bool;

    fn connect<'a>(
        &'a mut self,
        events: EventSink,
        commands: mpsc::Receiver<DriverCommand>,
        shutdown: CancellationToken,
    ) -> DriverFuture<'a>;

    fn disconnect(&mut self) -> DriverFuture<'_>;

    fn start_inventory(&mut self) -> DriverFuture<'_>;

    fn stop_inventory(&mut self) -> DriverFuture<'_>;

    fn clear_tags(&mut self) -> DriverFuture<'_>;

    fn write_epc(&mut self, cmd: WriteEpcCommand) -> DriverFuture<'_>;

    fn write_gpo(&mut self, cmd: WriteGpoCommand) -> DriverFuture<'_>;
}

impl fmt::Debug for dyn Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Driver")
            .field("reader_kind", &self.reader_kind())
            .field("is_connected", &self.is_connected())
            .field("is_reading", &self.is_reading())
            .finish()
    }
}

#[cfg(test)]
#[path = "driver_tests.rs"]
mod tests;
