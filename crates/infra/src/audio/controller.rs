//! The mixer control surface
//!
//! Applies typed commands to the shared engine state, synchronously and
//! atomically: every mutation is validated first, committed under the
//! engine mutex, and answered with the snapshot version that contains it.
//! Device-assignment changes additionally ask the engine thread to
//! reconcile its streams; stream failures come back asynchronously as
//! events, never as command results.

use crate::audio::engine::{EngineShared, EngineState, StreamDirective};
use crossbeam::channel::Sender;
use std::sync::{Arc, MutexGuard};
use tracing::{debug, info, warn};
use troubadour_core::domain::audio::{AudioEnumerator, DeviceId, DeviceInfo};
use troubadour_core::domain::config::{
    ConfigError, ConfigManager, ConfigWatcher, MixerConfig, PresetManager,
};
use troubadour_core::domain::control::{
    Command, ControlError, EngineEvent, EngineSnapshot, Reply,
};
use troubadour_core::domain::mixer::{BusId, ChannelId};

pub type Result<T> = std::result::Result<T, ControlError>;

/// Synchronous command/query surface over a running engine
pub struct MixerController {
    shared: Arc<EngineShared>,
    enumerator: Arc<dyn AudioEnumerator>,
    directives: Sender<StreamDirective>,
    presets: PresetManager,
    config: ConfigManager,
}

impl MixerController {
    pub fn new(
        shared: Arc<EngineShared>,
        enumerator: Arc<dyn AudioEnumerator>,
        directives: Sender<StreamDirective>,
        presets: PresetManager,
        config: ConfigManager,
    ) -> Self {
        Self {
            shared,
            enumerator,
            directives,
            presets,
            config,
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, EngineState>> {
        self.shared
            .state
            .lock()
            .map_err(|_| ControlError::Device("engine state mutex poisoned".to_string()))
    }

    fn request_reconcile(&self) {
        let _ = self.directives.send(StreamDirective::Reconcile);
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Copy the current observable state under a short lock
    pub fn snapshot(&self) -> Result<EngineSnapshot> {
        Ok(self.state()?.graph.snapshot())
    }

    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<EngineEvent> {
        self.shared.subscribe()
    }

    pub fn list_audio_devices(&self) -> Result<Vec<DeviceInfo>> {
        self.enumerator
            .devices()
            .map_err(|e| ControlError::Device(e.to_string()))
    }

    pub fn list_input_devices(&self) -> Result<Vec<DeviceInfo>> {
        self.enumerator
            .input_devices()
            .map_err(|e| ControlError::Device(e.to_string()))
    }

    pub fn list_output_devices(&self) -> Result<Vec<DeviceInfo>> {
        self.enumerator
            .output_devices()
            .map_err(|e| ControlError::Device(e.to_string()))
    }

    // ------------------------------------------------------------------
    // Channel commands
    // ------------------------------------------------------------------

    pub fn add_channel(&self, id: &str, name: &str) -> Result<u64> {
        let mut state = self.state()?;
        let version = state.graph.add_channel(id, name)?;
        state.sync_effects();
        Ok(version)
    }

    pub fn remove_channel(&self, id: &str) -> Result<u64> {
        let id = ChannelId::new(id)?;
        let mut state = self.state()?;
        let version = state.graph.remove_channel(&id)?;
        state.sync_effects();
        drop(state);
        self.request_reconcile();
        Ok(version)
    }

    pub fn set_channel_name(&self, id: &str, name: &str) -> Result<u64> {
        let id = ChannelId::new(id)?;
        self.state()?.graph.set_channel_name(&id, name)
    }

    pub fn set_volume(&self, id: &str, volume_db: f32) -> Result<u64> {
        let id = ChannelId::new(id)?;
        self.state()?.graph.set_channel_volume(&id, volume_db)
    }

    pub fn toggle_mute(&self, id: &str) -> Result<(u64, bool)> {
        let id = ChannelId::new(id)?;
        self.state()?.graph.toggle_channel_mute(&id)
    }

    pub fn toggle_solo(&self, id: &str) -> Result<(u64, bool)> {
        let id = ChannelId::new(id)?;
        self.state()?.graph.toggle_channel_solo(&id)
    }

    pub fn set_channel_input_device(&self, id: &str, device_id: Option<&str>) -> Result<u64> {
        let id = ChannelId::new(id)?;
        let device = match device_id {
            Some(name) => Some(self.resolve_input_device(name)?),
            None => None,
        };

        let version = self.state()?.graph.set_channel_input_device(&id, device)?;
        self.request_reconcile();
        Ok(version)
    }

    pub fn get_channel_input_device(&self, id: &str) -> Result<Option<String>> {
        let id = ChannelId::new(id)?;
        Ok(self
            .state()?
            .graph
            .channel_input_device(&id)?
            .map(|d| d.as_str().to_string()))
    }

    pub fn set_channel_buses(&self, id: &str, bus_ids: &[String]) -> Result<u64> {
        let id = ChannelId::new(id)?;
        let bus_ids = bus_ids
            .iter()
            .map(|b| BusId::new(b.as_str()))
            .collect::<Result<Vec<_>>>()?;
        self.state()?.graph.set_channel_buses(&id, bus_ids)
    }

    pub fn get_channel_buses(&self, id: &str) -> Result<Vec<String>> {
        let id = ChannelId::new(id)?;
        Ok(self
            .state()?
            .graph
            .channel_buses(&id)?
            .into_iter()
            .map(|b| b.as_str().to_string())
            .collect())
    }

    // ------------------------------------------------------------------
    // Bus commands
    // ------------------------------------------------------------------

    pub fn add_bus(&self, id: &str, name: &str) -> Result<u64> {
        self.state()?.graph.add_bus(id, name)
    }

    pub fn remove_bus(&self, id: &str) -> Result<u64> {
        let id = BusId::new(id)?;
        let version = self.state()?.graph.remove_bus(&id)?;
        self.request_reconcile();
        Ok(version)
    }

    pub fn set_bus_output_device(&self, id: &str, device_id: Option<&str>) -> Result<u64> {
        let id = BusId::new(id)?;
        let device = match device_id {
            Some(name) => Some(self.resolve_output_device(name)?),
            None => None,
        };

        let version = self.state()?.graph.set_bus_output_device(&id, device)?;
        self.request_reconcile();
        Ok(version)
    }

    pub fn set_bus_volume(&self, id: &str, volume_db: f32) -> Result<u64> {
        let id = BusId::new(id)?;
        self.state()?.graph.set_bus_volume(&id, volume_db)
    }

    pub fn toggle_bus_mute(&self, id: &str) -> Result<(u64, bool)> {
        let id = BusId::new(id)?;
        self.state()?.graph.toggle_bus_mute(&id)
    }

    fn resolve_input_device(&self, name: &str) -> Result<DeviceId> {
        let devices = self
            .enumerator
            .input_devices()
            .map_err(|e| ControlError::Device(e.to_string()))?;
        devices
            .into_iter()
            .find(|d| d.id.as_str() == name)
            .map(|d| d.id)
            .ok_or_else(|| ControlError::NotFound(format!("input device '{}'", name)))
    }

    fn resolve_output_device(&self, name: &str) -> Result<DeviceId> {
        let devices = self
            .enumerator
            .output_devices()
            .map_err(|e| ControlError::Device(e.to_string()))?;
        devices
            .into_iter()
            .find(|d| d.id.as_str() == name)
            .map(|d| d.id)
            .ok_or_else(|| ControlError::NotFound(format!("output device '{}'", name)))
    }

    // ------------------------------------------------------------------
    // Snapshots, presets, configuration
    // ------------------------------------------------------------------

    /// Replace the whole graph atomically and rebind streams
    pub fn load_snapshot(&self, snapshot: &EngineSnapshot) -> Result<u64> {
        let mut state = self.state()?;
        let version = state.graph.apply_snapshot(snapshot)?;
        state.sync_effects();
        drop(state);
        self.request_reconcile();
        info!(version, "Snapshot loaded");
        Ok(version)
    }

    pub async fn load_config(&self) -> Result<u64> {
        let config = self.config.load().await;
        self.load_snapshot(&config.mixer.to_snapshot())
    }

    pub async fn save_config(&self) -> Result<u64> {
        let snapshot = self.snapshot()?;

        // Keep the app and audio sections as they are on disk; only the
        // mixer section tracks live state.
        let mut config = self.config.load().await;
        config.mixer = MixerConfig::from_snapshot(&snapshot);
        self.config
            .save(&config)
            .await
            .map_err(config_error_to_control)?;
        Ok(snapshot.version)
    }

    pub async fn list_presets(&self) -> Result<Vec<String>> {
        self.presets
            .list_presets()
            .await
            .map_err(config_error_to_control)
    }

    pub async fn load_preset(&self, name: &str) -> Result<u64> {
        let mixer = self
            .presets
            .load_preset(name)
            .await
            .map_err(config_error_to_control)?;
        let version = self.load_snapshot(&mixer.to_snapshot())?;
        info!(name, version, "Preset loaded");
        Ok(version)
    }

    pub async fn save_preset(&self, name: &str) -> Result<u64> {
        let snapshot = self.snapshot()?;
        self.presets
            .save_preset(name, &snapshot)
            .await
            .map_err(config_error_to_control)?;
        Ok(snapshot.version)
    }

    pub async fn delete_preset(&self, name: &str) -> Result<u64> {
        self.presets
            .delete_preset(name)
            .await
            .map_err(config_error_to_control)?;
        Ok(self.snapshot()?.version)
    }

    /// Watch the preset directory and surface changes as engine events
    pub async fn spawn_preset_watcher(&self) -> Result<ConfigWatcher> {
        let watcher = ConfigWatcher::new(self.presets.directory().to_path_buf())
            .await
            .map_err(config_error_to_control)?;

        let mut changes = watcher.subscribe();
        let events = self.shared.events.clone();
        tokio::spawn(async move {
            while let Ok(path) = changes.recv().await {
                debug!(path = %path.display(), "Preset directory changed");
                if events.send(EngineEvent::PresetsInvalidated).is_err() {
                    break;
                }
            }
        });

        Ok(watcher)
    }

    // ------------------------------------------------------------------
    // Tagged dispatch
    // ------------------------------------------------------------------

    /// Apply one tagged command and produce its reply. This is the whole
    /// wire protocol; transports only move the tagged values around.
    pub async fn dispatch(&self, command: Command) -> Result<Reply> {
        match command {
            Command::ListAudioDevices => Ok(Reply::Devices {
                devices: self.list_audio_devices()?,
            }),
            Command::ListInputDevices => Ok(Reply::Devices {
                devices: self.list_input_devices()?,
            }),
            Command::ListOutputDevices => Ok(Reply::Devices {
                devices: self.list_output_devices()?,
            }),
            Command::GetChannels => Ok(Reply::Channels {
                channels: self.snapshot()?.channels,
            }),
            Command::GetBuses => Ok(Reply::Buses {
                buses: self.snapshot()?.buses,
            }),
            Command::AddChannel { id, name } => Ok(Reply::Version {
                version: self.add_channel(&id, &name)?,
            }),
            Command::RemoveChannel { channel_id } => Ok(Reply::Version {
                version: self.remove_channel(&channel_id)?,
            }),
            Command::SetVolume {
                channel_id,
                volume_db,
            } => Ok(Reply::Version {
                version: self.set_volume(&channel_id, volume_db)?,
            }),
            Command::ToggleMute { channel_id } => {
                let (version, on) = self.toggle_mute(&channel_id)?;
                Ok(Reply::Toggled { version, on })
            }
            Command::ToggleSolo { channel_id } => {
                let (version, on) = self.toggle_solo(&channel_id)?;
                Ok(Reply::Toggled { version, on })
            }
            Command::SetChannelInputDevice {
                channel_id,
                device_id,
            } => Ok(Reply::Version {
                version: self.set_channel_input_device(&channel_id, device_id.as_deref())?,
            }),
            Command::GetChannelInputDevice { channel_id } => Ok(Reply::InputDevice {
                device_id: self.get_channel_input_device(&channel_id)?,
            }),
            Command::SetChannelBuses {
                channel_id,
                bus_ids,
            } => Ok(Reply::Version {
                version: self.set_channel_buses(&channel_id, &bus_ids)?,
            }),
            Command::GetChannelBuses { channel_id } => Ok(Reply::BusIds {
                bus_ids: self.get_channel_buses(&channel_id)?,
            }),
            Command::SetBusOutputDevice { bus_id, device_id } => Ok(Reply::Version {
                version: self.set_bus_output_device(&bus_id, device_id.as_deref())?,
            }),
            Command::SetBusVolume { bus_id, volume_db } => Ok(Reply::Version {
                version: self.set_bus_volume(&bus_id, volume_db)?,
            }),
            Command::ToggleBusMute { bus_id } => {
                let (version, on) = self.toggle_bus_mute(&bus_id)?;
                Ok(Reply::Toggled { version, on })
            }
            Command::LoadConfig => Ok(Reply::Version {
                version: self.load_config().await?,
            }),
            Command::SaveConfig => Ok(Reply::Version {
                version: self.save_config().await?,
            }),
            Command::ListPresets => Ok(Reply::Presets {
                names: self.list_presets().await?,
            }),
            Command::LoadPreset { name } => Ok(Reply::Version {
                version: self.load_preset(&name).await?,
            }),
            Command::SavePreset { name } => Ok(Reply::Version {
                version: self.save_preset(&name).await?,
            }),
            Command::DeletePreset { name } => Ok(Reply::Version {
                version: self.delete_preset(&name).await?,
            }),
        }
    }

    /// Dispatch a command arriving as JSON text, for transports that carry
    /// tagged messages. Unknown kinds surface as validation errors.
    pub async fn dispatch_json(&self, payload: &str) -> Result<Reply> {
        let command: Command = serde_json::from_str(payload).map_err(|e| {
            warn!("Rejected malformed command: {}", e);
            ControlError::Validation(format!("unrecognized command: {}", e))
        })?;
        self.dispatch(command).await
    }
}

fn config_error_to_control(err: ConfigError) -> ControlError {
    match err {
        ConfigError::PresetNotFound(name) => ControlError::NotFound(format!("preset '{}'", name)),
        ConfigError::Invalid(msg) => ControlError::Validation(msg),
        other => ControlError::Device(other.to_string()),
    }
}
