//! Configuration management for Troubadour
//!
//! This module provides:
//! - Configuration structs for the mixer, audio devices and application settings
//! - A preset system persisting mixer layouts as TOML
//! - Hot-reload support via a file system watcher
//! - The main config manager with validated loads and atomic saves

use crate::domain::audio::{SampleRate, StreamSpec};
use crate::domain::control::{BusState, ChannelState, EngineSnapshot};
use crate::domain::dsp::EffectsChain;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that can occur during configuration operations
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("File watch error: {0}")]
    WatchError(#[from] notify::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Preset not found: {0}")]
    PresetNotFound(String),
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Engine sample rate in Hz
    pub preferred_rate: u32,

    /// Engine block length in frames
    pub frames_per_block: u32,

    /// Peak-hold decay in dB per second
    pub meter_decay: f32,

    /// Preset directory
    pub preset_directory: PathBuf,

    /// Auto-save interval in seconds (0 = disabled)
    pub auto_save_interval_seconds: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            preferred_rate: 48_000,
            frames_per_block: 512,
            meter_decay: 12.0,
            preset_directory: PathBuf::from("presets"),
            auto_save_interval_seconds: 30,
        }
    }
}

/// Audio device configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AudioDeviceConfig {
    /// Preferred input device ID (empty = use default)
    #[serde(default)]
    pub input_device: String,

    /// Preferred output device ID (empty = use default)
    #[serde(default)]
    pub output_device: String,

    /// Stream configuration
    #[serde(default)]
    pub stream: StreamSpec,
}

/// Channel configuration entry (`[[mixer.channels]]`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub id: String,
    pub name: String,
    pub volume_db: f32,
    pub muted: bool,
    #[serde(default)]
    pub solo: bool,
    /// Input device ID for this channel (None = silent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_device: Option<String>,
    /// Output device ID; only the master entry carries one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_device: Option<String>,
    /// Buses this channel sums into
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bus_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "EffectsChain::is_empty")]
    pub effects: EffectsChain,
}

impl From<&ChannelState> for ChannelConfig {
    fn from(state: &ChannelState) -> Self {
        Self {
            id: state.id.clone(),
            name: state.name.clone(),
            volume_db: state.volume_db,
            muted: state.muted,
            solo: state.solo,
            input_device: state.input_device.clone(),
            output_device: state.output_device.clone(),
            bus_ids: state.bus_ids.clone(),
            effects: state.effects.clone(),
        }
    }
}

impl ChannelConfig {
    pub fn to_state(&self) -> ChannelState {
        ChannelState {
            id: self.id.clone(),
            name: self.name.clone(),
            volume_db: self.volume_db,
            muted: self.muted,
            solo: self.solo,
            input_device: self.input_device.clone(),
            output_device: self.output_device.clone(),
            bus_ids: self.bus_ids.clone(),
            effects: self.effects.clone(),
            is_master: self.id == "master" || self.name.eq_ignore_ascii_case("master"),
            level_db: -60.0,
            peak_db: -60.0,
            device_error: None,
            overruns: 0,
        }
    }
}

/// Bus configuration entry (`[[mixer.buses]]`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusConfig {
    pub id: String,
    pub name: String,
    pub volume_db: f32,
    pub muted: bool,
    /// Output device ID for this bus (None = discard)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_device: Option<String>,
}

impl From<&BusState> for BusConfig {
    fn from(state: &BusState) -> Self {
        Self {
            id: state.id.clone(),
            name: state.name.clone(),
            volume_db: state.volume_db,
            muted: state.muted,
            output_device: state.output_device.clone(),
        }
    }
}

impl BusConfig {
    pub fn to_state(&self) -> BusState {
        BusState {
            id: self.id.clone(),
            name: self.name.clone(),
            volume_db: self.volume_db,
            muted: self.muted,
            output_device: self.output_device.clone(),
            level_db: -60.0,
            peak_db: -60.0,
            device_error: None,
            underruns: 0,
            overruns: 0,
        }
    }
}

/// Mixer configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MixerConfig {
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
    #[serde(default)]
    pub buses: Vec<BusConfig>,
}

impl MixerConfig {
    /// Build a loadable snapshot from this configuration. Observables start
    /// at the meter floor; the version is stamped by whoever applies it.
    pub fn to_snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            version: 0,
            channels: self.channels.iter().map(ChannelConfig::to_state).collect(),
            buses: self.buses.iter().map(BusConfig::to_state).collect(),
        }
    }

    /// Capture a snapshot into configuration entries
    pub fn from_snapshot(snapshot: &EngineSnapshot) -> Self {
        Self {
            channels: snapshot.channels.iter().map(ChannelConfig::from).collect(),
            buses: snapshot.buses.iter().map(BusConfig::from).collect(),
        }
    }
}

/// Complete Troubadour configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TroubadourConfig {
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub audio: AudioDeviceConfig,
    #[serde(default)]
    pub mixer: MixerConfig,
}

impl TroubadourConfig {
    /// Check the engine parameters against what the engine can run. The
    /// mixer section is not checked here; `MixerGraph::apply_snapshot` is
    /// the authority on graph invariants.
    pub fn validate(&self) -> Result<()> {
        SampleRate::from_hz(self.app.preferred_rate).map_err(|_| {
            ConfigError::Invalid(format!(
                "unsupported engine rate {} Hz",
                self.app.preferred_rate
            ))
        })?;

        StreamSpec {
            buffer_size: self.app.frames_per_block,
            ..StreamSpec::default()
        }
        .validate()
        .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        if !self.app.meter_decay.is_finite() || self.app.meter_decay <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "meter decay {} must be a positive rate in dB/s",
                self.app.meter_decay
            )));
        }

        Ok(())
    }

    /// Factory default configuration: three input strips, one main bus
    pub fn factory_default() -> Self {
        let mut config = Self::default();

        config.mixer.channels.push(ChannelConfig {
            id: "mic".to_string(),
            name: "Microphone".to_string(),
            volume_db: 0.0,
            muted: false,
            solo: false,
            input_device: None,
            output_device: None,
            bus_ids: vec!["main".to_string()],
            effects: EffectsChain::new(),
        });

        config.mixer.channels.push(ChannelConfig {
            id: "music".to_string(),
            name: "Music".to_string(),
            volume_db: -6.0,
            muted: false,
            solo: false,
            input_device: None,
            output_device: None,
            bus_ids: vec!["main".to_string()],
            effects: EffectsChain::new(),
        });

        config.mixer.channels.push(ChannelConfig {
            id: "system".to_string(),
            name: "System Audio".to_string(),
            volume_db: -12.0,
            muted: false,
            solo: false,
            input_device: None,
            output_device: None,
            bus_ids: vec!["main".to_string()],
            effects: EffectsChain::new(),
        });

        config.mixer.buses.push(BusConfig {
            id: "main".to_string(),
            name: "Main".to_string(),
            volume_db: 0.0,
            muted: false,
            output_device: None,
        });

        config
    }
}

/// File system watcher over the preset directory
///
/// Any change to a file inside the directory is broadcast so readers know
/// their cached listings and loaded presets may be stale.
pub struct ConfigWatcher {
    _watcher: notify::RecommendedWatcher,
    change_tx: broadcast::Sender<PathBuf>,
}

impl ConfigWatcher {
    pub async fn new(preset_dir: PathBuf) -> Result<Self> {
        use notify::Watcher;

        let (change_tx, _change_rx) = broadcast::channel(32);

        fs::create_dir_all(&preset_dir).await?;

        let tx_clone = change_tx.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                if matches!(
                    event.kind,
                    notify::EventKind::Create(_)
                        | notify::EventKind::Modify(_)
                        | notify::EventKind::Remove(_)
                ) {
                    for path in event.paths {
                        // Receiver lag or absence is not an error here
                        let _ = tx_clone.send(path);
                    }
                }
            }
        })?;

        watcher.watch(&preset_dir, notify::RecursiveMode::NonRecursive)?;

        info!(path = %preset_dir.display(), "Preset watcher started");

        Ok(Self {
            _watcher: watcher,
            change_tx,
        })
    }

    /// Subscribe to change events
    pub fn subscribe(&self) -> broadcast::Receiver<PathBuf> {
        self.change_tx.subscribe()
    }
}

/// On-disk shape of one preset: just the mixer section
///
/// Engine-wide settings stay in the main config, so loading a preset can
/// never change rates or block sizes mid-session. Files written by older
/// builds that stored the whole config still load; their extra sections are
/// simply ignored.
#[derive(Debug, Default, Serialize, Deserialize)]
struct PresetFile {
    #[serde(default)]
    mixer: MixerConfig,
}

/// Preset names become file stems, so they must not escape the directory
fn validate_preset_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 100 {
        return Err(ConfigError::Invalid(
            "preset name must be 1..=100 characters".to_string(),
        ));
    }
    if name.starts_with('.') || name.contains(&['/', '\\', '\0'][..]) {
        return Err(ConfigError::Invalid(format!(
            "preset name '{}' must not contain path components",
            name
        )));
    }
    Ok(())
}

/// Named mixer layouts, one TOML file per preset
pub struct PresetManager {
    preset_dir: PathBuf,
}

impl PresetManager {
    pub fn new(preset_dir: PathBuf) -> Self {
        Self { preset_dir }
    }

    pub fn directory(&self) -> &Path {
        &self.preset_dir
    }

    fn path_for(&self, name: &str) -> Result<PathBuf> {
        validate_preset_name(name)?;
        Ok(self.preset_dir.join(format!("{}.toml", name)))
    }

    /// All preset name stems, sorted. A directory that does not exist yet
    /// simply has no presets.
    #[instrument(skip(self))]
    pub async fn list_presets(&self) -> Result<Vec<String>> {
        let mut entries = match fs::read_dir(&self.preset_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if let (Some("toml"), Some(stem)) = (
                path.extension().and_then(|e| e.to_str()),
                path.file_stem().and_then(|s| s.to_str()),
            ) {
                names.push(stem.to_string());
            }
        }

        names.sort_unstable();
        debug!(count = names.len(), "Listed presets");
        Ok(names)
    }

    /// Load one preset's mixer layout
    #[instrument(skip(self))]
    pub async fn load_preset(&self, name: &str) -> Result<MixerConfig> {
        let path = self.path_for(name)?;

        let text = match fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ConfigError::PresetNotFound(name.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        let preset: PresetFile = toml::from_str(&text)?;
        debug!(
            name,
            channels = preset.mixer.channels.len(),
            buses = preset.mixer.buses.len(),
            "Preset loaded"
        );
        Ok(preset.mixer)
    }

    /// Capture a snapshot as a named preset, creating the directory on first
    /// use
    #[instrument(skip(self, snapshot))]
    pub async fn save_preset(&self, name: &str, snapshot: &EngineSnapshot) -> Result<()> {
        let path = self.path_for(name)?;
        fs::create_dir_all(&self.preset_dir).await?;

        let preset = PresetFile {
            mixer: MixerConfig::from_snapshot(snapshot),
        };
        fs::write(&path, toml::to_string_pretty(&preset)?).await?;

        info!(name, "Preset saved");
        Ok(())
    }

    /// Delete a preset; removal races are reported as not-found, never as IO
    /// noise
    #[instrument(skip(self))]
    pub async fn delete_preset(&self, name: &str) -> Result<()> {
        let path = self.path_for(name)?;

        match fs::remove_file(&path).await {
            Ok(()) => {
                info!(name, "Preset deleted");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(ConfigError::PresetNotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Manager for the main configuration file at `<config-dir>/config.toml`
///
/// Loads are strict: the file must parse and its engine parameters must be
/// runnable. A file that fails either check is quarantined by renaming it to
/// `config.toml.bak`, so the next save starts clean and the broken content
/// survives for inspection. Nothing is written until the first save, and
/// saves go through a temp file so a crash can never truncate the config.
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    pub fn new(config_dir: PathBuf) -> Self {
        Self {
            config_path: config_dir.join("config.toml"),
        }
    }

    /// Platform default configuration directory
    pub fn default_config_dir() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|p| p.join("troubadour"))
            .ok_or_else(|| ConfigError::Invalid("could not determine config directory".to_string()))
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn exists(&self) -> bool {
        self.config_path.exists()
    }

    /// Strict load: parse and validate, or say exactly what is wrong
    pub async fn try_load(&self) -> Result<TroubadourConfig> {
        let text = fs::read_to_string(&self.config_path).await?;
        let config: TroubadourConfig = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Startup load: a missing file is a first run, an unusable file is
    /// quarantined; both fall back to the factory default.
    #[instrument(skip(self))]
    pub async fn load(&self) -> TroubadourConfig {
        match self.try_load().await {
            Ok(config) => config,
            Err(ConfigError::Io(e)) if e.kind() == ErrorKind::NotFound => {
                info!(
                    path = %self.config_path.display(),
                    "No configuration yet, starting from the factory default"
                );
                TroubadourConfig::factory_default()
            }
            Err(e) => {
                warn!(
                    path = %self.config_path.display(),
                    error = %e,
                    "Configuration unusable, quarantining it"
                );
                let quarantine = self.config_path.with_extension("toml.bak");
                if let Err(rename_err) = fs::rename(&self.config_path, &quarantine).await {
                    warn!(error = %rename_err, "Could not quarantine the config file");
                }
                TroubadourConfig::factory_default()
            }
        }
    }

    /// Atomic save: write to a temp file in the same directory, then rename
    /// over the live config.
    #[instrument(skip(self, config))]
    pub async fn save(&self, config: &TroubadourConfig) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let staged = self.config_path.with_extension("toml.tmp");
        fs::write(&staged, toml::to_string_pretty(config)?).await?;
        fs::rename(&staged, &self.config_path).await?;

        debug!(path = %self.config_path.display(), "Configuration saved");
        Ok(())
    }
}
