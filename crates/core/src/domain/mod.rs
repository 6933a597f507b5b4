//! Domain entities and business rules

pub mod audio;
pub mod config;
pub mod control;
pub mod dsp;
pub mod mixer;

// Re-export specific items to avoid ambiguous glob imports
pub use audio::{
    AudioDevice, AudioEnumerator, AudioError, ChannelCount, DeviceId, DeviceInfo, DeviceType,
    SampleFormat, SampleRate, StreamSpec,
};
pub use config::{
    AppConfig, AudioDeviceConfig, BusConfig, ChannelConfig, ConfigError, ConfigManager,
    ConfigWatcher, MixerConfig, PresetManager, TroubadourConfig,
};
pub use control::{
    BusState, ChannelState, Command, ControlError, EngineEvent, EngineSnapshot, Reply,
};
pub use dsp::{Effect, EffectConfig, EffectsChain, EffectsChainProcessor};
pub use mixer::{
    db_to_gain, gain_to_db, Bus, BusId, Channel, ChannelId, Decibels, LevelMeter, MixerGraph,
};
