//! Audio device abstractions
//!
//! Device identity, capability descriptions and the stream configuration
//! vocabulary shared between the mixer graph and the platform backend.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AudioError>;

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Stream error: {0}")]
    StreamError(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Unsupported configuration: {0}")]
    UnsupportedConfiguration(String),

    #[error("OS error: {0}")]
    OsError(String),
}

/// Unique identifier for a hardware audio device
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Direction(s) a device supports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceType {
    Input,
    Output,
    Duplex,
}

impl DeviceType {
    pub fn has_input(&self) -> bool {
        matches!(self, DeviceType::Input | DeviceType::Duplex)
    }

    pub fn has_output(&self) -> bool {
        matches!(self, DeviceType::Output | DeviceType::Duplex)
    }
}

/// Sample rates the engine can run at
///
/// Hardware devices may run at other rates; those are carried as raw Hz in
/// [`DeviceInfo`] and reconciled by resampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleRate {
    Hz44100,
    Hz48000,
    Hz88200,
    Hz96000,
    Hz192000,
}

impl SampleRate {
    pub const ALL: [SampleRate; 5] = [
        SampleRate::Hz44100,
        SampleRate::Hz48000,
        SampleRate::Hz88200,
        SampleRate::Hz96000,
        SampleRate::Hz192000,
    ];

    pub fn hz(&self) -> u32 {
        match self {
            SampleRate::Hz44100 => 44_100,
            SampleRate::Hz48000 => 48_000,
            SampleRate::Hz88200 => 88_200,
            SampleRate::Hz96000 => 96_000,
            SampleRate::Hz192000 => 192_000,
        }
    }

    /// Exact mapping from Hz, rejecting rates the engine cannot run at
    pub fn from_hz(hz: u32) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|r| r.hz() == hz)
            .ok_or_else(|| AudioError::UnsupportedConfiguration(format!("{} Hz", hz)))
    }

    /// Closest supported rate to an arbitrary device-native rate
    pub fn closest(hz: u32) -> Self {
        Self::ALL
            .into_iter()
            .min_by_key(|r| r.hz().abs_diff(hz))
            .unwrap_or(SampleRate::Hz48000)
    }
}

impl Default for SampleRate {
    fn default() -> Self {
        SampleRate::Hz48000
    }
}

/// Channel counts the engine processes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelCount {
    Mono,
    Stereo,
}

impl ChannelCount {
    pub fn count(&self) -> u16 {
        match self {
            ChannelCount::Mono => 1,
            ChannelCount::Stereo => 2,
        }
    }

    pub fn from_count(count: u16) -> Result<Self> {
        match count {
            1 => Ok(ChannelCount::Mono),
            2 => Ok(ChannelCount::Stereo),
            n => Err(AudioError::UnsupportedConfiguration(format!(
                "{} channels",
                n
            ))),
        }
    }
}

impl Default for ChannelCount {
    fn default() -> Self {
        ChannelCount::Stereo
    }
}

/// Sample encoding on the wire between engine and devices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleFormat {
    /// 32-bit float, interleaved
    F32,
}

impl Default for SampleFormat {
    fn default() -> Self {
        SampleFormat::F32
    }
}

/// Stream configuration: rate, channel count, format and block length
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSpec {
    #[serde(default)]
    pub sample_rate: SampleRate,
    #[serde(default)]
    pub channels: ChannelCount,
    #[serde(default)]
    pub format: SampleFormat,
    /// Frames per callback block; power of two in 64..=4096
    #[serde(default = "StreamSpec::default_buffer_size")]
    pub buffer_size: u32,
}

impl StreamSpec {
    pub const MIN_BUFFER: u32 = 64;
    pub const MAX_BUFFER: u32 = 4096;

    fn default_buffer_size() -> u32 {
        512
    }

    /// Check the block-length constraint
    pub fn validate(&self) -> Result<()> {
        let b = self.buffer_size;
        if !b.is_power_of_two() || !(Self::MIN_BUFFER..=Self::MAX_BUFFER).contains(&b) {
            return Err(AudioError::InvalidConfiguration(format!(
                "buffer size {} must be a power of two in {}..={}",
                b,
                Self::MIN_BUFFER,
                Self::MAX_BUFFER
            )));
        }
        Ok(())
    }

    /// Interleaved samples per block
    pub fn samples_per_block(&self) -> usize {
        self.buffer_size as usize * self.channels.count() as usize
    }
}

impl Default for StreamSpec {
    fn default() -> Self {
        Self {
            sample_rate: SampleRate::default(),
            channels: ChannelCount::default(),
            format: SampleFormat::default(),
            buffer_size: Self::default_buffer_size(),
        }
    }
}

/// Description of an enumerated device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: DeviceId,
    pub name: String,
    pub device_type: DeviceType,
    /// Rates the device reports, raw Hz
    pub sample_rates: Vec<u32>,
    /// Channel counts the device reports
    pub channel_counts: Vec<u16>,
    /// The device's preferred rate, raw Hz
    pub default_sample_rate: Option<u32>,
}

/// A single opened device
pub trait AudioDevice {
    fn info(&self) -> &DeviceInfo;

    fn supports_spec(&self, spec: &StreamSpec) -> bool;

    fn default_spec(&self) -> Result<StreamSpec>;
}

/// Device discovery seam between the engine and the platform backend
pub trait AudioEnumerator: Send + Sync {
    fn devices(&self) -> Result<Vec<DeviceInfo>>;

    fn input_devices(&self) -> Result<Vec<DeviceInfo>>;

    fn output_devices(&self) -> Result<Vec<DeviceInfo>>;

    fn default_input_device(&self) -> Result<DeviceInfo>;

    fn default_output_device(&self) -> Result<DeviceInfo>;

    fn device_by_id(&self, id: &DeviceId) -> Result<DeviceInfo>;
}
