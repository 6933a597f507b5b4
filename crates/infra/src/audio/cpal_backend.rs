//! CPAL-based audio device enumeration
//!
//! Implements the `AudioEnumerator` seam from the domain crate on top of
//! CPAL. Device ids are the platform device names, which is what CPAL can
//! look devices up by on every backend.

use cpal::traits::{DeviceTrait, HostTrait};
use std::fmt;
use tracing::{debug, info, warn};
use troubadour_core::domain::audio::{
    AudioDevice, AudioEnumerator, AudioError, ChannelCount, DeviceId, DeviceInfo, DeviceType,
    Result, SampleFormat, SampleRate, StreamSpec,
};

/// CPAL-based audio device wrapper
pub struct CpalDevice {
    info: DeviceInfo,
    cpal_device: cpal::Device,
}

impl CpalDevice {
    pub fn new(cpal_device: cpal::Device, device_type: DeviceType) -> Result<Self> {
        let name = cpal_device
            .name()
            .unwrap_or_else(|_| "Unknown Device".to_string());

        let mut sample_rates: Vec<u32> = Vec::new();
        let mut channel_counts: Vec<u16> = Vec::new();

        if let Ok(configs) = cpal_device.supported_input_configs() {
            for config in configs {
                sample_rates.push(config.min_sample_rate().0);
                sample_rates.push(config.max_sample_rate().0);
                channel_counts.push(config.channels());
            }
        }

        if let Ok(configs) = cpal_device.supported_output_configs() {
            for config in configs {
                sample_rates.push(config.min_sample_rate().0);
                sample_rates.push(config.max_sample_rate().0);
                channel_counts.push(config.channels());
            }
        }

        sample_rates.sort_unstable();
        sample_rates.dedup();
        channel_counts.sort_unstable();
        channel_counts.dedup();

        let default_sample_rate = cpal_device
            .default_input_config()
            .or_else(|_| cpal_device.default_output_config())
            .ok()
            .map(|config| config.sample_rate().0);

        // The device name is the id: it is the only stable handle CPAL can
        // re-resolve a device by across hosts.
        let id = DeviceId::new(name.clone());

        let info = DeviceInfo {
            id,
            name,
            device_type,
            sample_rates,
            channel_counts,
            default_sample_rate,
        };

        debug!("Created device: {}", info.name);

        Ok(Self { info, cpal_device })
    }

    pub fn cpal_device(&self) -> &cpal::Device {
        &self.cpal_device
    }
}

impl AudioDevice for CpalDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn supports_spec(&self, spec: &StreamSpec) -> bool {
        let rate_supported = self
            .info
            .sample_rates
            .iter()
            .any(|&hz| hz == spec.sample_rate.hz());
        let channels_supported = self
            .info
            .channel_counts
            .iter()
            .any(|&c| c == spec.channels.count());

        rate_supported && channels_supported
    }

    fn default_spec(&self) -> Result<StreamSpec> {
        let cpal_config = self
            .cpal_device
            .default_input_config()
            .or_else(|_| self.cpal_device.default_output_config())
            .map_err(|e| AudioError::InvalidConfiguration(e.to_string()))?;

        let buffer_size = match cpal_config.buffer_size() {
            cpal::SupportedBufferSize::Range { min, max } => {
                512u32.clamp(*min, *max).next_power_of_two().clamp(
                    StreamSpec::MIN_BUFFER,
                    StreamSpec::MAX_BUFFER,
                )
            }
            cpal::SupportedBufferSize::Unknown => 512,
        };

        Ok(StreamSpec {
            sample_rate: SampleRate::closest(cpal_config.sample_rate().0),
            channels: ChannelCount::from_count(cpal_config.channels().min(2).max(1))?,
            format: SampleFormat::F32,
            buffer_size,
        })
    }
}

impl fmt::Debug for CpalDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CpalDevice").field("info", &self.info).finish()
    }
}

/// CPAL-based audio enumerator
pub struct CpalEnumerator {
    host: cpal::Host,
}

impl Default for CpalEnumerator {
    fn default() -> Self {
        Self::new()
    }
}

impl CpalEnumerator {
    pub fn new() -> Self {
        let host = cpal::default_host();
        debug!("Using audio host: {:?}", host.id());
        Self { host }
    }

    /// Resolve a domain device id back to a CPAL device handle
    pub fn open(&self, id: &DeviceId) -> Result<cpal::Device> {
        self.host
            .devices()
            .map_err(|e| AudioError::OsError(e.to_string()))?
            .find(|d| d.name().ok().as_deref() == Some(id.as_str()))
            .ok_or_else(|| AudioError::DeviceNotFound(id.as_str().to_string()))
    }

    fn determine_device_type(&self, device: &cpal::Device) -> Result<DeviceType> {
        let has_input = device
            .supported_input_configs()
            .map(|mut c| c.next().is_some())
            .unwrap_or(false);
        let has_output = device
            .supported_output_configs()
            .map(|mut c| c.next().is_some())
            .unwrap_or(false);

        match (has_input, has_output) {
            (true, true) => Ok(DeviceType::Duplex),
            (true, false) => Ok(DeviceType::Input),
            (false, true) => Ok(DeviceType::Output),
            (false, false) => Err(AudioError::UnsupportedConfiguration(
                "device has no inputs or outputs".to_string(),
            )),
        }
    }
}

impl AudioEnumerator for CpalEnumerator {
    fn devices(&self) -> Result<Vec<DeviceInfo>> {
        let mut devices = Vec::new();

        let cpal_devices = self
            .host
            .devices()
            .map_err(|e| AudioError::OsError(e.to_string()))?;

        for device in cpal_devices {
            let device_type = match self.determine_device_type(&device) {
                Ok(dt) => dt,
                Err(_) => continue,
            };

            match CpalDevice::new(device, device_type) {
                Ok(cp_device) => devices.push(cp_device.info().clone()),
                Err(e) => warn!("Skipping device due to error: {}", e),
            }
        }

        info!("Found {} audio devices", devices.len());
        Ok(devices)
    }

    fn input_devices(&self) -> Result<Vec<DeviceInfo>> {
        Ok(self
            .devices()?
            .into_iter()
            .filter(|d| d.device_type.has_input())
            .collect())
    }

    fn output_devices(&self) -> Result<Vec<DeviceInfo>> {
        Ok(self
            .devices()?
            .into_iter()
            .filter(|d| d.device_type.has_output())
            .collect())
    }

    fn default_input_device(&self) -> Result<DeviceInfo> {
        let cpal_device = self
            .host
            .default_input_device()
            .ok_or_else(|| AudioError::DeviceNotFound("no default input device".to_string()))?;

        CpalDevice::new(cpal_device, DeviceType::Input).map(|d| d.info().clone())
    }

    fn default_output_device(&self) -> Result<DeviceInfo> {
        let cpal_device = self
            .host
            .default_output_device()
            .ok_or_else(|| AudioError::DeviceNotFound("no default output device".to_string()))?;

        CpalDevice::new(cpal_device, DeviceType::Output).map(|d| d.info().clone())
    }

    fn device_by_id(&self, id: &DeviceId) -> Result<DeviceInfo> {
        self.devices()?
            .into_iter()
            .find(|d| d.id == *id)
            .ok_or_else(|| AudioError::DeviceNotFound(id.as_str().to_string()))
    }
}
