// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single RFID reader type this bridge can drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReaderKind {
    Ur4,
    X714,
    R700Iot,
    Icard,
    Serial,
    Tcp,
}

impl ReaderKind {
    pub fn from_config_str(s: &str) -> Option<Self> {
        match s {
            "UR4" => Some(Self::Ur4),
            "X714" => Some(Self::X714),
            "R700_IOT" => Some(Self::R700Iot),
            "ICARD" => Some(Self::Icard),
            "SERIAL" => Some(Self::Serial),
            "TCP" => Some(Self::Tcp),
            _ => None,
        }
    }

    pub fn is_rfid_reader(&self) -> bool {
        !matches!(self, Self::Serial | Self::Tcp)
    }
}

/// A raw tag detection as reported by a driver, before pipeline validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTag {
    pub device: String,
    pub epc: String,
    pub tid: Option<String>,
    pub ant: Option<i32>,
    pub rssi: Option<i32>,
}

/// Canonical, validated, enriched tag record held in the [`crate::tag_cache::TagCache`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub device: String,
    pub epc: String,
    pub tid: Option<String>,
    pub ant: i32,
    pub rssi: Option<i32>,
    pub gtin: String,
    pub timestamp: DateTime<Utc>,
    pub count: u64,
}

/// Observed reader state used to answer `device_state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    NotFound,
    Disconnected,
    Connected,
    Reading,
}

impl DeviceState {
    pub fn as_i8(&self) -> i8 {
        match self {
            Self::NotFound => -1,
            Self::Disconnected => 0,
            Self::Connected => 1,
            Self::Reading => 2,
        }
    }
}

/// Payload carried by a non-tag [`Event`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventData {
    Bool(bool),
    Tag(Tag),
    Text(String),
}

/// Canonical pipeline event, as stored in the [`crate::event_ring::EventRing`]
/// and forwarded to sinks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub device: String,
    pub event_type: String,
    pub event_data: EventData,
}

impl Event {
    pub fn inventory(device: impl Into<String>, running: bool) -> Self {
        Self {
            timestamp: Utc::now(),
            device: device.into(),
            event_type: "inventory".to_string(),
            event_data: EventData::Bool(running),
        }
    }

    pub fn connection(device: impl Into<String>, up: bool) -> Self {
        Self {
            timestamp: Utc::now(),
            device: device.into(),
            event_type: "connection_event".to_string(),
            event_data: EventData::Bool(up),
        }
    }
}

/// Upward-facing canonical callbacks a driver invokes; downward-facing
/// canonical commands a driver accepts. Kept together here because both
/// halves describe the same driver/supervisor boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpoControl {
    Static,
    Pulsed,
}
