//! Bus (output) management for the mixer
//!
//! Buses are named summing points. Channels opt into a bus via their
//! membership set; each bus may be delivered to one output device, and a
//! bus without a device is still summed and metered.

use super::{validate_id, Decibels, LevelMeter, Result};
use crate::domain::audio::DeviceId;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::trace;

/// Unique identifier for a bus
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BusId(String);

impl BusId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        validate_id(&id)?;
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BusId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Audio bus (output mix)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bus {
    pub id: BusId,
    pub name: String,
    pub volume: Decibels,
    pub muted: bool,
    /// Playback device this bus is delivered to (None = discard)
    #[serde(default)]
    pub output_device: Option<DeviceId>,
    #[serde(skip)]
    pub level: LevelMeter,
    /// Set when the assigned device failed; cleared on reassignment
    #[serde(skip)]
    pub device_error: Option<String>,
    /// Ring underruns observed on this bus's playback device
    #[serde(skip)]
    pub underruns: u64,
    /// Engine-side ring overruns (device consumed slower than produced)
    #[serde(skip)]
    pub overruns: u64,
}

impl Bus {
    pub fn new(id: BusId, name: String) -> Self {
        Self {
            id,
            name,
            volume: Decibels::UNITY,
            muted: false,
            output_device: None,
            level: LevelMeter::new(),
            device_error: None,
            underruns: 0,
            overruns: 0,
        }
    }

    /// Current linear gain; zero when muted
    pub fn gain(&self) -> f32 {
        if self.muted {
            0.0
        } else {
            self.volume.to_amplitude()
        }
    }

    pub fn set_volume(&mut self, db: f32) -> Result<()> {
        self.volume = Decibels::new(db)?;
        trace!("Bus {} volume set to {} dB", self.name, self.volume.db());
        Ok(())
    }

    pub fn toggle_mute(&mut self) -> bool {
        self.muted = !self.muted;
        self.muted
    }
}
