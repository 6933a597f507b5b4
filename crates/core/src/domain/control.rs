//! Control and query surface
//!
//! The command model the UI (or any dispatcher) speaks: strictly typed
//! commands with stable kind strings, typed failures, and immutable
//! versioned snapshots of the engine's observable state. The wire shape is
//! serde-tagged, so the same types serve JSON transports and in-process
//! calls alike.

use crate::domain::audio::DeviceInfo;
use crate::domain::dsp::EffectsChain;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Typed failure of a control command
///
/// Validation never mutates state; NotFound/Conflict are synchronous lookup
/// and uniqueness failures; Device carries backend faults surfaced to the
/// issuer.
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
#[serde(tag = "error", content = "message", rename_all = "kebab-case")]
pub enum ControlError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("device error: {0}")]
    Device(String),
}

/// Every command the control surface recognizes
///
/// `kind` strings and parameter names are the stable wire contract; unknown
/// kinds fail deserialization and are reported as validation errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum Command {
    ListAudioDevices,
    ListInputDevices,
    ListOutputDevices,
    GetChannels,
    GetBuses,
    AddChannel {
        id: String,
        name: String,
    },
    RemoveChannel {
        channel_id: String,
    },
    SetVolume {
        channel_id: String,
        volume_db: f32,
    },
    ToggleMute {
        channel_id: String,
    },
    ToggleSolo {
        channel_id: String,
    },
    SetChannelInputDevice {
        channel_id: String,
        #[serde(default)]
        device_id: Option<String>,
    },
    GetChannelInputDevice {
        channel_id: String,
    },
    SetChannelBuses {
        channel_id: String,
        bus_ids: Vec<String>,
    },
    GetChannelBuses {
        channel_id: String,
    },
    SetBusOutputDevice {
        bus_id: String,
        #[serde(default)]
        device_id: Option<String>,
    },
    SetBusVolume {
        bus_id: String,
        volume_db: f32,
    },
    ToggleBusMute {
        bus_id: String,
    },
    LoadConfig,
    SaveConfig,
    ListPresets,
    LoadPreset {
        name: String,
    },
    SavePreset {
        name: String,
    },
    DeletePreset {
        name: String,
    },
}

/// Result payload of a successful command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum Reply {
    /// Mutations answer with the snapshot version that includes them
    Version { version: u64 },
    Toggled { version: u64, on: bool },
    Devices { devices: Vec<DeviceInfo> },
    Channels { channels: Vec<ChannelState> },
    Buses { buses: Vec<BusState> },
    BusIds { bus_ids: Vec<String> },
    InputDevice { device_id: Option<String> },
    Presets { names: Vec<String> },
}

/// Asynchronous engine notifications
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// A capture or playback stream failed; the assignment was cleared and
    /// the entity flagged. `entity` is the channel or bus id.
    DeviceError {
        entity: String,
        device: String,
        message: String,
    },
    /// The preset directory changed on disk; cached listings are stale.
    PresetsInvalidated,
}

/// Observable state of one channel strip
///
/// The master strip rides this list too (`is_master`), carrying the output
/// device that regular channels never have.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelState {
    pub id: String,
    pub name: String,
    pub volume_db: f32,
    pub muted: bool,
    pub solo: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_device: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_device: Option<String>,
    #[serde(default)]
    pub bus_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "EffectsChain::is_empty")]
    pub effects: EffectsChain,
    #[serde(default)]
    pub is_master: bool,
    #[serde(default = "meter_floor")]
    pub level_db: f32,
    #[serde(default = "meter_floor")]
    pub peak_db: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_error: Option<String>,
    #[serde(default)]
    pub overruns: u64,
}

/// Observable state of one bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusState {
    pub id: String,
    pub name: String,
    pub volume_db: f32,
    pub muted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_device: Option<String>,
    #[serde(default = "meter_floor")]
    pub level_db: f32,
    #[serde(default = "meter_floor")]
    pub peak_db: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_error: Option<String>,
    #[serde(default)]
    pub underruns: u64,
    #[serde(default)]
    pub overruns: u64,
}

fn meter_floor() -> f32 {
    -60.0
}

/// Immutable, versioned copy of the engine's full observable state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub version: u64,
    pub channels: Vec<ChannelState>,
    pub buses: Vec<BusState>,
}

impl EngineSnapshot {
    pub fn channel(&self, id: &str) -> Option<&ChannelState> {
        self.channels.iter().find(|c| c.id == id)
    }

    pub fn bus(&self, id: &str) -> Option<&BusState> {
        self.buses.iter().find(|b| b.id == id)
    }

    pub fn master(&self) -> Option<&ChannelState> {
        self.channels.iter().find(|c| c.is_master)
    }
}
