//! Mixer graph and virtual channel management
//!
//! This module provides the core mixing functionality: volume control,
//! mute/solo logic, bus membership routing, signal metering and the
//! per-block processing pass.

use crate::domain::audio::DeviceId;
use crate::domain::control::{BusState, ChannelState, ControlError, EngineSnapshot};
use crate::domain::dsp::{EffectsChain, EffectsChainProcessor};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::{debug, trace};

pub mod bus;

pub use bus::{Bus, BusId};

pub type Result<T> = std::result::Result<T, ControlError>;

/// Reserved identifier of the master strip
pub const MASTER_ID: &str = "master";

/// Convert decibels to linear gain (−60 dB and below is silence)
pub fn db_to_gain(db: f32) -> f32 {
    if db <= Decibels::MIN_DB {
        0.0
    } else {
        10.0_f32.powf(db / 20.0)
    }
}

/// Convert linear gain to decibels, floored at −60 dB
pub fn gain_to_db(gain: f32) -> f32 {
    if gain <= 0.0 {
        Decibels::MIN_DB
    } else {
        (20.0 * gain.log10()).max(Decibels::MIN_DB)
    }
}

/// Identifier character set and length rules shared by channels and buses
pub(crate) fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(ControlError::Validation("id must not be empty".into()));
    }
    if id.len() > 100 {
        return Err(ControlError::Validation(
            "id exceeds 100 characters".into(),
        ));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ControlError::Validation(format!(
            "id '{}' may only contain alphanumerics, '-' and '_'",
            id
        )));
    }
    Ok(())
}

/// Display-name rules: anything printable, just bounded and non-empty
pub(crate) fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(ControlError::Validation("name must not be empty".into()));
    }
    if name.chars().count() > 100 {
        return Err(ControlError::Validation(
            "name exceeds 100 characters".into(),
        ));
    }
    Ok(())
}

/// Unique identifier for a mixer channel
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(String);

impl ChannelId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        validate_id(&id)?;
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_master(&self) -> bool {
        self.0 == MASTER_ID
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Volume level in decibels, clamped to the engine range [−60, +18]
///
/// −60 dB is treated as negative infinity: the linear gain is exactly zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Decibels(f32);

impl Decibels {
    pub const MIN_DB: f32 = -60.0;
    pub const MAX_DB: f32 = 18.0;

    pub const SILENCE: Decibels = Decibels(Self::MIN_DB);
    pub const UNITY: Decibels = Decibels(0.0);

    /// Clamp a finite value into range; non-finite input is a validation error
    pub fn new(db: f32) -> Result<Self> {
        if !db.is_finite() {
            return Err(ControlError::Validation(format!(
                "volume must be finite, got {}",
                db
            )));
        }
        Ok(Self(db.clamp(Self::MIN_DB, Self::MAX_DB)))
    }

    pub fn db(&self) -> f32 {
        self.0
    }

    pub fn to_amplitude(&self) -> f32 {
        db_to_gain(self.0)
    }

    pub fn from_amplitude(amp: f32) -> Self {
        Self(gain_to_db(amp).min(Self::MAX_DB))
    }
}

impl Default for Decibels {
    fn default() -> Self {
        Self::UNITY
    }
}

/// Block-based signal meter: RMS level plus a decaying held peak
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LevelMeter {
    pub level_db: f32,
    pub peak_db: f32,
}

impl LevelMeter {
    pub const FLOOR_DB: f32 = Decibels::MIN_DB;

    pub fn new() -> Self {
        Self {
            level_db: Self::FLOOR_DB,
            peak_db: Self::FLOOR_DB,
        }
    }

    /// Feed one block of samples; `decay_db` is the peak decay for the
    /// duration this block covers.
    pub fn update_block(&mut self, samples: &[f32], decay_db: f32) {
        self.peak_db = (self.peak_db - decay_db).max(Self::FLOOR_DB);

        if samples.is_empty() {
            self.level_db = Self::FLOOR_DB;
            return;
        }

        let mut sum_sq = 0.0f32;
        let mut peak = 0.0f32;
        for &s in samples {
            sum_sq += s * s;
            peak = peak.max(s.abs());
        }
        let rms = (sum_sq / samples.len() as f32).sqrt();

        self.level_db = gain_to_db(rms);
        self.peak_db = self.peak_db.max(gain_to_db(peak));
    }

    /// Feed silence: the level drops to the floor, the peak keeps decaying
    pub fn update_silence(&mut self, decay_db: f32) {
        self.peak_db = (self.peak_db - decay_db).max(Self::FLOOR_DB);
        self.level_db = Self::FLOOR_DB;
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for LevelMeter {
    fn default() -> Self {
        Self::new()
    }
}

/// Virtual input strip
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    pub name: String,
    pub volume: Decibels,
    pub muted: bool,
    pub solo: bool,
    /// Capture device feeding this channel (None = silent)
    #[serde(default)]
    pub input_device: Option<DeviceId>,
    /// Buses this channel sums into
    #[serde(default)]
    pub bus_ids: HashSet<BusId>,
    /// Effects chain configuration, applied pre-gain
    #[serde(default)]
    pub effects: EffectsChain,
    #[serde(skip)]
    pub level: LevelMeter,
    /// Set when the assigned device failed; cleared on reassignment
    #[serde(skip)]
    pub device_error: Option<String>,
    /// Ring overruns observed on this channel's capture device
    #[serde(skip)]
    pub overruns: u64,
}

impl Channel {
    pub fn new(id: ChannelId, name: String) -> Self {
        Self {
            id,
            name,
            volume: Decibels::UNITY,
            muted: false,
            solo: false,
            input_device: None,
            bus_ids: HashSet::new(),
            effects: EffectsChain::new(),
            level: LevelMeter::new(),
            device_error: None,
            overruns: 0,
        }
    }

    /// Audible iff not muted and not excluded by another channel's solo
    pub fn is_audible(&self, any_solo: bool) -> bool {
        if self.muted {
            return false;
        }
        if any_solo && !self.solo {
            return false;
        }
        true
    }

    pub fn set_volume(&mut self, db: f32) -> Result<()> {
        self.volume = Decibels::new(db)?;
        trace!("Channel {} volume set to {} dB", self.name, self.volume.db());
        Ok(())
    }

    pub fn toggle_mute(&mut self) -> bool {
        self.muted = !self.muted;
        debug!("Channel {} muted: {}", self.name, self.muted);
        self.muted
    }

    pub fn toggle_solo(&mut self) -> bool {
        self.solo = !self.solo;
        debug!("Channel {} solo: {}", self.name, self.solo);
        self.solo
    }
}

/// The mixer graph: channel and bus tables, membership edges, master sink
///
/// Processing reuses buffers held here, so steady-state ticks do not
/// allocate. Mutations stamp a monotone version used by snapshots.
#[derive(Debug)]
pub struct MixerGraph {
    channels: HashMap<ChannelId, Channel>,
    channel_order: Vec<ChannelId>,
    buses: HashMap<BusId, Bus>,
    bus_order: Vec<BusId>,
    sample_rate: u32,
    interleaved_channels: usize,
    meter_decay_db_per_sec: f32,
    version: u64,
    bus_buffers: HashMap<BusId, Vec<f32>>,
    scratch: Vec<f32>,
}

impl MixerGraph {
    pub fn new() -> Self {
        let master_id = BusId::new(MASTER_ID).expect("master id is valid");
        let mut buses = HashMap::new();
        buses.insert(master_id.clone(), Bus::new(master_id.clone(), "Master".to_string()));

        Self {
            channels: HashMap::new(),
            channel_order: Vec::new(),
            buses,
            bus_order: vec![master_id],
            sample_rate: 48_000,
            interleaved_channels: 2,
            meter_decay_db_per_sec: 12.0,
            version: 0,
            bus_buffers: HashMap::new(),
            scratch: Vec::new(),
        }
    }

    /// Set engine rate and meter decay (affects meter timing only)
    pub fn configure(&mut self, sample_rate: u32, meter_decay_db_per_sec: f32) {
        self.sample_rate = sample_rate;
        self.meter_decay_db_per_sec = meter_decay_db_per_sec;
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Stamp a new version without a control mutation. The engine calls this
    /// after each processed block so meter observables are versioned too.
    pub fn bump_version(&mut self) -> u64 {
        self.version += 1;
        self.version
    }

    pub fn master_id(&self) -> BusId {
        BusId::new(MASTER_ID).expect("master id is valid")
    }

    fn master(&self) -> &Bus {
        self.buses.get(&self.master_id()).expect("master bus exists")
    }

    fn master_mut(&mut self) -> &mut Bus {
        let id = self.master_id();
        self.buses.get_mut(&id).expect("master bus exists")
    }

    // ------------------------------------------------------------------
    // Channel operations
    // ------------------------------------------------------------------

    pub fn add_channel(&mut self, id: &str, name: &str) -> Result<u64> {
        let id = ChannelId::new(id)?;
        validate_name(name)?;
        if id.is_master() || self.channels.contains_key(&id) {
            return Err(ControlError::Conflict(format!(
                "channel '{}' already exists",
                id
            )));
        }

        debug!("Adding channel: {}", name);
        self.channels
            .insert(id.clone(), Channel::new(id.clone(), name.to_string()));
        self.channel_order.push(id);
        Ok(self.bump_version())
    }

    pub fn remove_channel(&mut self, id: &ChannelId) -> Result<u64> {
        if id.is_master() {
            return Err(ControlError::Conflict(
                "the master channel cannot be removed".into(),
            ));
        }
        if self.channels.remove(id).is_none() {
            return Err(ControlError::NotFound(format!("channel '{}'", id)));
        }
        debug!("Removing channel: {}", id);
        self.channel_order.retain(|cid| cid != id);
        Ok(self.bump_version())
    }

    pub fn set_channel_name(&mut self, id: &ChannelId, name: &str) -> Result<u64> {
        validate_name(name)?;
        if id.is_master() {
            self.master_mut().name = name.to_string();
        } else {
            self.channel_required_mut(id)?.name = name.to_string();
        }
        Ok(self.bump_version())
    }

    pub fn set_channel_input_device(
        &mut self,
        id: &ChannelId,
        device: Option<DeviceId>,
    ) -> Result<u64> {
        if id.is_master() {
            return Err(ControlError::Conflict(
                "the master channel has no input device".into(),
            ));
        }
        let channel = self.channel_required_mut(id)?;
        debug!(
            "Channel {} input device set to: {:?}",
            id,
            device.as_ref().map(|d| d.as_str())
        );
        channel.input_device = device;
        channel.device_error = None;
        Ok(self.bump_version())
    }

    pub fn channel_input_device(&self, id: &ChannelId) -> Result<Option<DeviceId>> {
        if id.is_master() {
            return Ok(None);
        }
        Ok(self.channel_required(id)?.input_device.clone())
    }

    /// Replace a channel's bus membership. Every referenced bus must exist.
    pub fn set_channel_buses(&mut self, id: &ChannelId, bus_ids: Vec<BusId>) -> Result<u64> {
        if id.is_master() {
            return Err(ControlError::Conflict(
                "the master channel is a sink, not a source".into(),
            ));
        }
        for bid in &bus_ids {
            if !self.buses.contains_key(bid) {
                return Err(ControlError::NotFound(format!("bus '{}'", bid)));
            }
        }
        let channel = self.channel_required_mut(id)?;
        channel.bus_ids = bus_ids.into_iter().collect();
        debug!(
            "Channel {} routed to buses: {:?}",
            id,
            channel.bus_ids.iter().map(|b| b.as_str()).collect::<Vec<_>>()
        );
        Ok(self.bump_version())
    }

    /// Membership of a channel, in bus insertion order
    pub fn channel_buses(&self, id: &ChannelId) -> Result<Vec<BusId>> {
        if id.is_master() {
            return Ok(Vec::new());
        }
        let channel = self.channel_required(id)?;
        Ok(self
            .bus_order
            .iter()
            .filter(|bid| channel.bus_ids.contains(bid))
            .cloned()
            .collect())
    }

    pub fn set_channel_volume(&mut self, id: &ChannelId, db: f32) -> Result<u64> {
        if id.is_master() {
            self.master_mut().set_volume(db)?;
        } else {
            self.channel_required_mut(id)?.set_volume(db)?;
        }
        Ok(self.bump_version())
    }

    pub fn toggle_channel_mute(&mut self, id: &ChannelId) -> Result<(u64, bool)> {
        let muted = if id.is_master() {
            self.master_mut().toggle_mute()
        } else {
            self.channel_required_mut(id)?.toggle_mute()
        };
        Ok((self.bump_version(), muted))
    }

    pub fn toggle_channel_solo(&mut self, id: &ChannelId) -> Result<(u64, bool)> {
        if id.is_master() {
            return Err(ControlError::Conflict(
                "the master channel cannot be soloed".into(),
            ));
        }
        let solo = self.channel_required_mut(id)?.toggle_solo();
        Ok((self.bump_version(), solo))
    }

    pub fn channel(&self, id: &ChannelId) -> Option<&Channel> {
        self.channels.get(id)
    }

    pub fn channel_mut(&mut self, id: &ChannelId) -> Option<&mut Channel> {
        self.channels.get_mut(id)
    }

    fn channel_required(&self, id: &ChannelId) -> Result<&Channel> {
        self.channels
            .get(id)
            .ok_or_else(|| ControlError::NotFound(format!("channel '{}'", id)))
    }

    fn channel_required_mut(&mut self, id: &ChannelId) -> Result<&mut Channel> {
        self.channels
            .get_mut(id)
            .ok_or_else(|| ControlError::NotFound(format!("channel '{}'", id)))
    }

    /// All input channels, in insertion order (excludes the master strip)
    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.channel_order
            .iter()
            .filter_map(|id| self.channels.get(id))
    }

    pub fn channels_mut(&mut self) -> impl Iterator<Item = &mut Channel> {
        self.channels.values_mut()
    }

    // ------------------------------------------------------------------
    // Bus operations
    // ------------------------------------------------------------------

    pub fn add_bus(&mut self, id: &str, name: &str) -> Result<u64> {
        let id = BusId::new(id)?;
        validate_name(name)?;
        if self.buses.contains_key(&id) {
            return Err(ControlError::Conflict(format!("bus '{}' already exists", id)));
        }

        debug!("Adding bus: {}", name);
        self.buses
            .insert(id.clone(), Bus::new(id.clone(), name.to_string()));
        self.bus_order.push(id);
        Ok(self.bump_version())
    }

    /// Remove a bus. Memberships referencing it are pruned silently.
    pub fn remove_bus(&mut self, id: &BusId) -> Result<u64> {
        if id.as_str() == MASTER_ID {
            return Err(ControlError::Conflict("the master bus cannot be removed".into()));
        }
        if self.buses.remove(id).is_none() {
            return Err(ControlError::NotFound(format!("bus '{}'", id)));
        }
        debug!("Removing bus: {}", id);
        self.bus_order.retain(|bid| bid != id);
        self.bus_buffers.remove(id);
        for channel in self.channels.values_mut() {
            channel.bus_ids.remove(id);
        }
        Ok(self.bump_version())
    }

    pub fn set_bus_volume(&mut self, id: &BusId, db: f32) -> Result<u64> {
        self.bus_required_mut(id)?.set_volume(db)?;
        Ok(self.bump_version())
    }

    pub fn toggle_bus_mute(&mut self, id: &BusId) -> Result<(u64, bool)> {
        let muted = self.bus_required_mut(id)?.toggle_mute();
        Ok((self.bump_version(), muted))
    }

    pub fn set_bus_output_device(&mut self, id: &BusId, device: Option<DeviceId>) -> Result<u64> {
        let bus = self.bus_required_mut(id)?;
        debug!(
            "Bus {} output device set to: {:?}",
            id,
            device.as_ref().map(|d| d.as_str())
        );
        bus.output_device = device;
        bus.device_error = None;
        Ok(self.bump_version())
    }

    pub fn bus(&self, id: &BusId) -> Option<&Bus> {
        self.buses.get(id)
    }

    pub fn bus_mut(&mut self, id: &BusId) -> Option<&mut Bus> {
        self.buses.get_mut(id)
    }

    fn bus_required_mut(&mut self, id: &BusId) -> Result<&mut Bus> {
        self.buses
            .get_mut(id)
            .ok_or_else(|| ControlError::NotFound(format!("bus '{}'", id)))
    }

    /// All buses including the master, in insertion order
    pub fn buses(&self) -> impl Iterator<Item = &Bus> {
        self.bus_order.iter().filter_map(|id| self.buses.get(id))
    }

    /// Buses as surfaced to the control plane (master excluded)
    pub fn user_buses(&self) -> impl Iterator<Item = &Bus> {
        self.buses().filter(|b| b.id.as_str() != MASTER_ID)
    }

    // ------------------------------------------------------------------
    // Processing
    // ------------------------------------------------------------------

    /// Mix one block: gate, run effects, apply gain, meter, and sum every
    /// audible channel into the buses it belongs to, then apply bus
    /// gain/mute and bus meters.
    ///
    /// `inputs` maps channels to interleaved buffers already at the engine
    /// rate; `block_len` is the interleaved length every output buffer gets.
    /// Channels missing from `inputs` contribute silence and their meters
    /// decay; input ids with no channel are skipped. Sums are intentionally
    /// unclamped here; clipping happens at the device write stage.
    pub fn process(
        &mut self,
        inputs: &HashMap<ChannelId, &[f32]>,
        effects: &mut HashMap<ChannelId, EffectsChainProcessor>,
        block_len: usize,
    ) -> &HashMap<BusId, Vec<f32>> {
        let any_solo = self.channels.values().any(|c| c.solo && !c.muted);
        let decay_db = self.meter_decay_db_per_sec * block_len as f32
            / (self.interleaved_channels as f32 * self.sample_rate as f32);

        let MixerGraph {
            channels,
            channel_order,
            buses,
            bus_order,
            bus_buffers,
            scratch,
            ..
        } = self;

        // Per-bus output buffers, reused tick to tick
        for bid in bus_order.iter() {
            let buffer = bus_buffers.entry(bid.clone()).or_default();
            buffer.resize(block_len, 0.0);
            buffer.fill(0.0);
        }
        scratch.resize(block_len, 0.0);

        for cid in channel_order.iter() {
            let Some(channel) = channels.get_mut(cid) else {
                continue;
            };

            let input = inputs.get(cid).copied();
            let audible = channel.is_audible(any_solo);

            let Some(buf) = input.filter(|_| audible) else {
                channel.level.update_silence(decay_db);
                continue;
            };

            let n = buf.len().min(block_len);
            scratch[..n].copy_from_slice(&buf[..n]);
            scratch[n..].fill(0.0);

            if let Some(processor) = effects.get_mut(cid) {
                processor.process(&mut scratch[..]);
            }

            let gain = channel.volume.to_amplitude();
            for s in scratch.iter_mut() {
                *s *= gain;
            }

            channel.level.update_block(scratch, decay_db);

            for bid in &channel.bus_ids {
                if let Some(out) = bus_buffers.get_mut(bid) {
                    for (o, s) in out.iter_mut().zip(scratch.iter()) {
                        *o += *s;
                    }
                }
            }
        }

        for (bid, buffer) in bus_buffers.iter_mut() {
            let Some(bus) = buses.get_mut(bid) else {
                continue;
            };
            let gain = bus.gain();
            if gain == 0.0 {
                buffer.fill(0.0);
            } else if gain != 1.0 {
                for s in buffer.iter_mut() {
                    *s *= gain;
                }
            }
            bus.level.update_block(buffer, decay_db);
        }

        &self.bus_buffers
    }

    /// Borrow the most recently summed buffer for one bus
    pub fn bus_output(&self, id: &BusId) -> Option<&[f32]> {
        self.bus_buffers.get(id).map(|b| b.as_slice())
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    /// Copy the observable state into an immutable, versioned snapshot
    pub fn snapshot(&self) -> EngineSnapshot {
        let mut channels: Vec<ChannelState> = self
            .channels()
            .map(|ch| ChannelState {
                id: ch.id.as_str().to_string(),
                name: ch.name.clone(),
                volume_db: ch.volume.db(),
                muted: ch.muted,
                solo: ch.solo,
                input_device: ch.input_device.as_ref().map(|d| d.as_str().to_string()),
                output_device: None,
                bus_ids: self
                    .bus_order
                    .iter()
                    .filter(|bid| ch.bus_ids.contains(bid))
                    .map(|b| b.as_str().to_string())
                    .collect(),
                effects: ch.effects.clone(),
                is_master: false,
                level_db: ch.level.level_db,
                peak_db: ch.level.peak_db,
                device_error: ch.device_error.clone(),
                overruns: ch.overruns,
            })
            .collect();

        // The master is a bus internally but rides the channel list so the
        // UI renders one uniform column of strips.
        let master = self.master();
        channels.push(ChannelState {
            id: MASTER_ID.to_string(),
            name: master.name.clone(),
            volume_db: master.volume.db(),
            muted: master.muted,
            solo: false,
            input_device: None,
            output_device: master.output_device.as_ref().map(|d| d.as_str().to_string()),
            bus_ids: Vec::new(),
            effects: EffectsChain::new(),
            is_master: true,
            level_db: master.level.level_db,
            peak_db: master.level.peak_db,
            device_error: master.device_error.clone(),
            overruns: 0,
        });

        let buses = self
            .user_buses()
            .map(|bus| BusState {
                id: bus.id.as_str().to_string(),
                name: bus.name.clone(),
                volume_db: bus.volume.db(),
                muted: bus.muted,
                output_device: bus.output_device.as_ref().map(|d| d.as_str().to_string()),
                level_db: bus.level.level_db,
                peak_db: bus.level.peak_db,
                device_error: bus.device_error.clone(),
                underruns: bus.underruns,
                overruns: bus.overruns,
            })
            .collect();

        EngineSnapshot {
            version: self.version,
            channels,
            buses,
        }
    }

    /// Replace the whole graph from a snapshot, atomically.
    ///
    /// Validates every invariant before touching state: valid and unique
    /// ids, membership references resolve, at most one master entry.
    /// Volumes are clamped on the way in, so presets saved with narrower
    /// legacy ranges load unchanged.
    pub fn apply_snapshot(&mut self, snapshot: &EngineSnapshot) -> Result<u64> {
        let mut new_channels: HashMap<ChannelId, Channel> = HashMap::new();
        let mut new_order: Vec<ChannelId> = Vec::new();
        let mut new_buses: HashMap<BusId, Bus> = HashMap::new();
        let mut new_bus_order: Vec<BusId> = Vec::new();
        let mut master_entry: Option<(String, f32, bool, Option<String>)> = None;

        let is_master_entry = |id: &str, name: &str, flagged: bool| {
            flagged || id == MASTER_ID || name.eq_ignore_ascii_case(MASTER_ID)
        };

        for state in &snapshot.buses {
            validate_name(&state.name)?;
            if is_master_entry(&state.id, &state.name, false) {
                if master_entry.is_some() {
                    return Err(ControlError::Validation(
                        "snapshot contains more than one master".into(),
                    ));
                }
                master_entry = Some((
                    state.name.clone(),
                    state.volume_db,
                    state.muted,
                    state.output_device.clone(),
                ));
                continue;
            }
            let id = BusId::new(state.id.as_str())?;
            if new_buses.contains_key(&id) {
                return Err(ControlError::Validation(format!(
                    "duplicate bus id '{}'",
                    id
                )));
            }
            let mut bus = Bus::new(id.clone(), state.name.clone());
            bus.volume = Decibels::new(state.volume_db)?;
            bus.muted = state.muted;
            bus.output_device = state.output_device.clone().map(DeviceId::new);
            new_buses.insert(id.clone(), bus);
            new_bus_order.push(id);
        }

        for state in &snapshot.channels {
            validate_name(&state.name)?;
            if is_master_entry(&state.id, &state.name, state.is_master) {
                if master_entry.is_some() {
                    return Err(ControlError::Validation(
                        "snapshot contains more than one master".into(),
                    ));
                }
                master_entry = Some((
                    state.name.clone(),
                    state.volume_db,
                    state.muted,
                    state.output_device.clone(),
                ));
                continue;
            }
            let id = ChannelId::new(state.id.as_str())?;
            if new_channels.contains_key(&id) {
                return Err(ControlError::Validation(format!(
                    "duplicate channel id '{}'",
                    id
                )));
            }
            let mut channel = Channel::new(id.clone(), state.name.clone());
            channel.volume = Decibels::new(state.volume_db)?;
            channel.muted = state.muted;
            channel.solo = state.solo;
            channel.input_device = state.input_device.clone().map(DeviceId::new);
            channel.effects = state.effects.clone();
            for bid in &state.bus_ids {
                channel.bus_ids.insert(BusId::new(bid.as_str())?);
            }
            new_channels.insert(id.clone(), channel);
            new_order.push(id);
        }

        // Membership must resolve against the new bus table plus the master
        for channel in new_channels.values() {
            for bid in &channel.bus_ids {
                if bid.as_str() != MASTER_ID && !new_buses.contains_key(bid) {
                    return Err(ControlError::Validation(format!(
                        "channel '{}' references unknown bus '{}'",
                        channel.id, bid
                    )));
                }
            }
        }

        let master_id = self.master_id();
        let mut master = Bus::new(master_id.clone(), "Master".to_string());
        if let Some((name, volume_db, muted, output_device)) = master_entry {
            master.name = name;
            master.volume = Decibels::new(volume_db)?;
            master.muted = muted;
            master.output_device = output_device.map(DeviceId::new);
        }

        self.channels = new_channels;
        self.channel_order = new_order;
        self.buses = new_buses;
        self.bus_order = new_bus_order;
        self.buses.insert(master_id.clone(), master);
        self.bus_order.insert(0, master_id);
        self.bus_buffers.clear();

        debug!(
            channels = self.channel_order.len(),
            buses = self.bus_order.len(),
            "Applied snapshot"
        );
        Ok(self.bump_version())
    }
}

impl Default for MixerGraph {
    fn default() -> Self {
        Self::new()
    }
}
