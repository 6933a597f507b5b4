//! The realtime audio engine
//!
//! One dedicated engine thread ticks at a fixed period of
//! `frames_per_block / sample_rate` seconds. Each tick drains every input
//! ring, resamples to the engine rate, runs the mixer graph, and distributes
//! each bus to its output device's ring at that device's native rate.
//!
//! The engine thread is the sole reader of every input ring and the sole
//! writer of every output ring, so the SPSC invariant holds by construction.
//! CPAL streams are not `Send`; they are created, owned and dropped on the
//! engine thread, and the control plane asks for stream changes through a
//! directive channel drained at tick start.

use crate::audio::cpal_backend::CpalEnumerator;
use troubadour_core::domain::AudioEnumerator;
use crate::audio::resampler::LinearResampler;
use crate::audio::ring::{RingConsumer, RingProducer};
use crate::audio::stream::{CaptureStream, PlaybackStream};
use crossbeam::channel::{unbounded, Receiver, Sender, TryRecvError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use troubadour_core::domain::audio::{AudioError, DeviceId, Result as AudioResult};
use troubadour_core::domain::config::AppConfig;
use troubadour_core::domain::control::EngineEvent;
use troubadour_core::domain::dsp::{EffectsChain, EffectsChainProcessor};
use troubadour_core::domain::mixer::{BusId, ChannelId, MixerGraph};

/// Engine-wide runtime parameters, fixed at startup
#[derive(Debug, Clone, Copy)]
pub struct EngineRuntime {
    pub sample_rate: u32,
    pub frames_per_block: u32,
    pub meter_decay: f32,
}

impl EngineRuntime {
    pub fn block_samples(&self) -> usize {
        self.frames_per_block as usize * 2
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_secs_f64(self.frames_per_block as f64 / self.sample_rate as f64)
    }
}

impl From<&AppConfig> for EngineRuntime {
    fn from(app: &AppConfig) -> Self {
        Self {
            sample_rate: app.preferred_rate,
            frames_per_block: app.frames_per_block,
            meter_decay: app.meter_decay,
        }
    }
}

/// Everything behind the single engine mutex: the graph plus the runtime
/// effects processors keyed by channel.
pub struct EngineState {
    pub graph: MixerGraph,
    pub effects: HashMap<ChannelId, EffectsChainProcessor>,
    /// Chain configs the processors were built from, to detect changes
    built_from: HashMap<ChannelId, EffectsChain>,
    sample_rate: u32,
}

impl EngineState {
    pub fn new(runtime: &EngineRuntime) -> Self {
        let mut graph = MixerGraph::new();
        graph.configure(runtime.sample_rate, runtime.meter_decay);
        Self {
            graph,
            effects: HashMap::new(),
            built_from: HashMap::new(),
            sample_rate: runtime.sample_rate,
        }
    }

    /// Bring the effects table in line with the graph: build processors for
    /// new or changed chains, drop processors for removed channels. Called
    /// under the engine mutex after any channel mutation.
    pub fn sync_effects(&mut self) {
        let mut keep: Vec<ChannelId> = Vec::with_capacity(self.effects.len());
        let mut build: Vec<(ChannelId, EffectsChain)> = Vec::new();

        for channel in self.graph.channels() {
            keep.push(channel.id.clone());
            let changed = self.built_from.get(&channel.id) != Some(&channel.effects);
            if changed {
                build.push((channel.id.clone(), channel.effects.clone()));
            }
        }

        for (id, chain) in build {
            self.effects
                .insert(id.clone(), EffectsChainProcessor::build(&chain, self.sample_rate));
            self.built_from.insert(id, chain);
        }

        self.effects.retain(|id, _| keep.contains(id));
        self.built_from.retain(|id, _| keep.contains(id));
    }
}

/// Requests from the control plane to the engine thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamDirective {
    /// Re-derive open streams from the graph's device assignments
    Reconcile,
}

/// State shared between the engine thread and the control plane
pub struct EngineShared {
    pub state: Mutex<EngineState>,
    pub events: broadcast::Sender<EngineEvent>,
    pub running: AtomicBool,
    pub runtime: EngineRuntime,
}

impl EngineShared {
    pub fn new(runtime: EngineRuntime) -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            state: Mutex::new(EngineState::new(&runtime)),
            events,
            running: AtomicBool::new(true),
            runtime,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }
}

/// Handle to a running engine thread
pub struct EngineHandle {
    shared: Arc<EngineShared>,
    directives: Sender<StreamDirective>,
    join: Option<JoinHandle<()>>,
}

impl EngineHandle {
    pub fn shared(&self) -> &Arc<EngineShared> {
        &self.shared
    }

    pub fn directive_sender(&self) -> Sender<StreamDirective> {
        self.directives.clone()
    }

    /// Ask the engine thread to re-derive streams from the graph
    pub fn request_reconcile(&self) {
        let _ = self.directives.send(StreamDirective::Reconcile);
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.shared.subscribe()
    }

    /// Stop the engine thread and wait for its streams to close
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                error!("Engine thread panicked during shutdown");
            }
        }
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        if self.join.is_some() {
            self.stop();
        }
    }
}

/// The audio engine entry point
pub struct AudioEngine;

impl AudioEngine {
    /// Spawn the engine thread. Streams open lazily, driven by reconcile
    /// directives once assignments exist in the graph.
    pub fn start(
        enumerator: Arc<CpalEnumerator>,
        shared: Arc<EngineShared>,
    ) -> AudioResult<EngineHandle> {
        let (tx, rx) = unbounded();
        let runtime = shared.runtime;

        let thread_shared = Arc::clone(&shared);
        let join = std::thread::Builder::new()
            .name("troubadour-engine".to_string())
            .spawn(move || {
                let mut worker = EngineWorker::new(thread_shared, enumerator, rx, runtime);
                worker.run();
            })
            .map_err(|e| AudioError::OsError(format!("failed to spawn engine thread: {}", e)))?;

        info!(
            rate = runtime.sample_rate,
            frames = runtime.frames_per_block,
            period_us = runtime.tick_period().as_micros() as u64,
            "Audio engine started"
        );

        Ok(EngineHandle {
            shared,
            directives: tx,
            join: Some(join),
        })
    }
}

/// One capture device feeding one or more channels
struct InputPort {
    stream: CaptureStream,
    consumer: RingConsumer,
    resampler: LinearResampler,
    /// Channels assigned to this device
    channels: Vec<ChannelId>,
    /// Device-layout staging read from the ring
    read_buf: Vec<f32>,
    /// Stereo engine-layout staging
    stereo_buf: Vec<f32>,
    /// Engine-rate samples waiting to fill the next block
    pending: Vec<f32>,
    /// The block presented to the graph this tick
    block: Vec<f32>,
}

/// One playback device fed by one or more buses
struct OutputPort {
    stream: PlaybackStream,
    producer: RingProducer,
    resampler: LinearResampler,
    /// Buses assigned to this device
    buses: Vec<BusId>,
    /// Engine-rate stereo sum of the assigned buses
    mix_buf: Vec<f32>,
    /// Device-rate stereo staging
    resampled: Vec<f32>,
    /// Device-layout staging written to the ring
    device_buf: Vec<f32>,
    /// Ring-full drops observed on the engine side
    ring_overruns: u64,
}

struct EngineWorker {
    shared: Arc<EngineShared>,
    enumerator: Arc<CpalEnumerator>,
    directives: Receiver<StreamDirective>,
    runtime: EngineRuntime,
    inputs: HashMap<DeviceId, InputPort>,
    outputs: HashMap<DeviceId, OutputPort>,
}

impl EngineWorker {
    fn new(
        shared: Arc<EngineShared>,
        enumerator: Arc<CpalEnumerator>,
        directives: Receiver<StreamDirective>,
        runtime: EngineRuntime,
    ) -> Self {
        Self {
            shared,
            enumerator,
            directives,
            runtime,
            inputs: HashMap::new(),
            outputs: HashMap::new(),
        }
    }

    fn run(&mut self) {
        let period = self.runtime.tick_period();
        let mut next_tick = Instant::now() + period;

        while self.shared.running.load(Ordering::Acquire) {
            self.tick();

            let now = Instant::now();
            if next_tick > now {
                std::thread::sleep(next_tick - now);
            } else {
                // Missed the deadline; rebase rather than trying to catch up
                next_tick = now;
            }
            next_tick += period;
        }

        self.close_all_streams();
        info!("Engine thread stopped");
    }

    fn tick(&mut self) {
        self.drain_directives();
        self.sweep_failed_streams();
        self.gather_inputs();
        self.process_and_distribute();
    }

    fn drain_directives(&mut self) {
        let mut reconcile = false;
        loop {
            match self.directives.try_recv() {
                Ok(StreamDirective::Reconcile) => reconcile = true,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => break,
            }
        }
        if reconcile {
            self.reconcile_streams();
        }
    }

    /// Fill each input port's block with exactly one engine block of
    /// engine-rate stereo samples, zero-padding on shortfall.
    fn gather_inputs(&mut self) {
        let block_samples = self.runtime.block_samples();
        let engine_rate = self.runtime.sample_rate;

        for port in self.inputs.values_mut() {
            let dev_ch = port.stream.channels() as usize;
            let dev_rate = port.stream.native_rate();

            // One engine block's worth of device frames, plus one frame of
            // slack for the resampler phase
            let dev_frames =
                (self.runtime.frames_per_block as u64 * dev_rate as u64 / engine_rate as u64)
                    as usize
                    + 1;

            while port.pending.len() < block_samples {
                port.read_buf.resize(dev_frames * dev_ch, 0.0);
                let read = port.consumer.read(&mut port.read_buf);
                if read == 0 {
                    break;
                }
                downmix_to_stereo(&port.read_buf[..read], dev_ch, &mut port.stereo_buf);
                port.resampler.process(&port.stereo_buf, &mut port.pending);
                if read < port.read_buf.len() {
                    break;
                }
            }

            // Keep latency bounded if a device briefly produces faster than
            // its nominal rate: drop the oldest backlog beyond four blocks.
            let backlog_limit = block_samples * 4;
            if port.pending.len() > backlog_limit {
                let excess = port.pending.len() - backlog_limit;
                port.pending.drain(..excess);
            }

            port.block.clear();
            let take = port.pending.len().min(block_samples);
            port.block.extend(port.pending.drain(..take));
            port.block.resize(block_samples, 0.0);
        }
    }

    /// Run the graph under the engine mutex, then write every assigned bus
    /// to its device ring at device rate, clamping on the way out.
    fn process_and_distribute(&mut self) {
        let block_samples = self.runtime.block_samples();

        {
            let mut state = match self.shared.state.lock() {
                Ok(state) => state,
                Err(poisoned) => {
                    // A poisoned graph is fatal for the process, but the
                    // engine keeps ticking zeros until told to stop.
                    error!("Engine state mutex poisoned");
                    poisoned.into_inner()
                }
            };

            let mut input_map: HashMap<ChannelId, &[f32]> = HashMap::new();
            for port in self.inputs.values() {
                for cid in &port.channels {
                    input_map.insert(cid.clone(), port.block.as_slice());
                }
            }

            let state = &mut *state;
            state.graph.process(&input_map, &mut state.effects, block_samples);

            // Fold xrun counters into the entities they belong to
            for port in self.inputs.values() {
                let overruns = port.stream.overruns().get();
                for cid in &port.channels {
                    if let Some(channel) = state.graph.channel_mut(cid) {
                        channel.overruns = overruns;
                    }
                }
            }
            for port in self.outputs.values() {
                let underruns = port.stream.underruns().get();
                for bid in &port.buses {
                    if let Some(bus) = state.graph.bus_mut(bid) {
                        bus.underruns = underruns;
                        bus.overruns = port.ring_overruns;
                    }
                }
            }

            // Sum each output device's buses into its engine-rate mix;
            // `process` left the summed buffers in the graph
            for port in self.outputs.values_mut() {
                port.mix_buf.resize(block_samples, 0.0);
                port.mix_buf.fill(0.0);
                for bid in &port.buses {
                    if let Some(buffer) = state.graph.bus_output(bid) {
                        for (o, s) in port.mix_buf.iter_mut().zip(buffer.iter()) {
                            *o += *s;
                        }
                    }
                }
            }

            // Meter observables changed; stamp a version for readers
            state.graph.bump_version();
        }

        for port in self.outputs.values_mut() {
            // Final output stage: clip to [-1, 1]
            for s in port.mix_buf.iter_mut() {
                *s = s.clamp(-1.0, 1.0);
            }

            port.resampled.clear();
            port.resampler.process(&port.mix_buf, &mut port.resampled);

            let dev_ch = port.stream.channels() as usize;
            upmix_from_stereo(&port.resampled, dev_ch, &mut port.device_buf);

            // Whole frames only, so the ring interleave stays aligned
            let take = port.producer.free().min(port.device_buf.len()) / dev_ch * dev_ch;
            port.producer.write(&port.device_buf[..take]);
            if take < port.device_buf.len() {
                port.ring_overruns += 1;
            }
        }
    }

    /// Drop ports whose stream reported failure, clear the assignment and
    /// surface the error as an event plus a per-entity flag.
    fn sweep_failed_streams(&mut self) {
        let failed_inputs: Vec<DeviceId> = self
            .inputs
            .iter()
            .filter(|(_, p)| p.stream.has_failed())
            .map(|(id, _)| id.clone())
            .collect();
        let failed_outputs: Vec<DeviceId> = self
            .outputs
            .iter()
            .filter(|(_, p)| p.stream.has_failed())
            .map(|(id, _)| id.clone())
            .collect();

        if failed_inputs.is_empty() && failed_outputs.is_empty() {
            return;
        }

        let mut state = match self.shared.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };

        for device_id in failed_outputs {
            if let Some(port) = self.outputs.remove(&device_id) {
                warn!(device = %device_id, "Playback stream failed, releasing device");
                for bid in &port.buses {
                    if let Some(bus) = state.graph.bus_mut(bid) {
                        bus.output_device = None;
                        bus.device_error = Some("playback stream failed".to_string());
                    }
                    let _ = self.shared.events.send(EngineEvent::DeviceError {
                        entity: bid.as_str().to_string(),
                        device: device_id.as_str().to_string(),
                        message: "playback stream failed".to_string(),
                    });
                }
                port.stream.close();
            }
        }

        for device_id in failed_inputs {
            if let Some(port) = self.inputs.remove(&device_id) {
                warn!(device = %device_id, "Capture stream failed, releasing device");
                for cid in &port.channels {
                    if let Some(channel) = state.graph.channel_mut(cid) {
                        channel.input_device = None;
                        channel.device_error = Some("capture stream failed".to_string());
                    }
                    let _ = self.shared.events.send(EngineEvent::DeviceError {
                        entity: cid.as_str().to_string(),
                        device: device_id.as_str().to_string(),
                        message: "capture stream failed".to_string(),
                    });
                }
                port.stream.close();
            }
        }

        state.graph.bump_version();
    }

    /// Re-derive the open stream set from the graph's device assignments:
    /// close streams for dropped assignments, open streams for new ones,
    /// and refresh the channel/bus lists of surviving streams.
    fn reconcile_streams(&mut self) {
        // Snapshot assignments under a short lock
        let (input_assignments, output_assignments) = {
            let state = match self.shared.state.lock() {
                Ok(state) => state,
                Err(poisoned) => poisoned.into_inner(),
            };

            let mut inputs: HashMap<DeviceId, Vec<ChannelId>> = HashMap::new();
            for channel in state.graph.channels() {
                if let Some(device) = &channel.input_device {
                    inputs
                        .entry(device.clone())
                        .or_default()
                        .push(channel.id.clone());
                }
            }

            let mut outputs: HashMap<DeviceId, Vec<BusId>> = HashMap::new();
            for bus in state.graph.buses() {
                if let Some(device) = &bus.output_device {
                    outputs.entry(device.clone()).or_default().push(bus.id.clone());
                }
            }

            (inputs, outputs)
        };

        // Close playback before capture when tearing down
        let stale_outputs: Vec<DeviceId> = self
            .outputs
            .keys()
            .filter(|id| !output_assignments.contains_key(*id))
            .cloned()
            .collect();
        for device_id in stale_outputs {
            if let Some(port) = self.outputs.remove(&device_id) {
                port.stream.close();
            }
        }

        let stale_inputs: Vec<DeviceId> = self
            .inputs
            .keys()
            .filter(|id| !input_assignments.contains_key(*id))
            .cloned()
            .collect();
        for device_id in stale_inputs {
            if let Some(port) = self.inputs.remove(&device_id) {
                port.stream.close();
            }
        }

        for (device_id, channels) in input_assignments {
            match self.inputs.get_mut(&device_id) {
                Some(port) => port.channels = channels,
                None => {
                    if let Err(e) = self.open_input_port(&device_id, channels.clone()) {
                        self.report_open_failure(&device_id, &channels, &[], &e);
                    }
                }
            }
        }

        for (device_id, buses) in output_assignments {
            match self.outputs.get_mut(&device_id) {
                Some(port) => port.buses = buses,
                None => {
                    if let Err(e) = self.open_output_port(&device_id, buses.clone()) {
                        self.report_open_failure(&device_id, &[], &buses, &e);
                    }
                }
            }
        }

        debug!(
            inputs = self.inputs.len(),
            outputs = self.outputs.len(),
            "Streams reconciled"
        );
    }

    fn ring_capacity_for(&self, device_rate: u32, device_channels: usize) -> usize {
        // At least four engine blocks of device samples, so one missed tick
        // never drops audio
        let per_block = self.runtime.frames_per_block as u64 * device_rate as u64
            / self.runtime.sample_rate as u64;
        ((per_block as usize + 1) * device_channels * 4).next_power_of_two()
    }

    fn open_input_port(&mut self, device_id: &DeviceId, channels: Vec<ChannelId>) -> AudioResult<()> {
        // Estimate the ring from the advertised configuration; the stream
        // reports the true rate after opening.
        let info = self.enumerator.device_by_id(device_id)?;
        let est_rate = info.default_sample_rate.unwrap_or(self.runtime.sample_rate);
        let est_channels = info.channel_counts.iter().copied().max().unwrap_or(2) as usize;
        let capacity = self.ring_capacity_for(est_rate, est_channels);

        let (stream, consumer) = CaptureStream::open(&self.enumerator, device_id, capacity)?;
        let resampler = LinearResampler::new(stream.native_rate(), self.runtime.sample_rate, 2);

        self.inputs.insert(
            device_id.clone(),
            InputPort {
                stream,
                consumer,
                resampler,
                channels,
                read_buf: Vec::new(),
                stereo_buf: Vec::new(),
                pending: Vec::new(),
                block: Vec::new(),
            },
        );
        Ok(())
    }

    fn open_output_port(&mut self, device_id: &DeviceId, buses: Vec<BusId>) -> AudioResult<()> {
        let info = self.enumerator.device_by_id(device_id)?;
        let est_rate = info.default_sample_rate.unwrap_or(self.runtime.sample_rate);
        let est_channels = info.channel_counts.iter().copied().max().unwrap_or(2) as usize;
        let capacity = self.ring_capacity_for(est_rate, est_channels);

        let (stream, producer) = PlaybackStream::open(&self.enumerator, device_id, capacity)?;
        let resampler = LinearResampler::new(self.runtime.sample_rate, stream.native_rate(), 2);

        self.outputs.insert(
            device_id.clone(),
            OutputPort {
                stream,
                producer,
                resampler,
                buses,
                mix_buf: Vec::new(),
                resampled: Vec::new(),
                device_buf: Vec::new(),
                ring_overruns: 0,
            },
        );
        Ok(())
    }

    fn report_open_failure(
        &self,
        device_id: &DeviceId,
        channels: &[ChannelId],
        buses: &[BusId],
        err: &AudioError,
    ) {
        warn!(device = %device_id, error = %err, "Failed to open stream");

        let mut state = match self.shared.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        for cid in channels {
            if let Some(channel) = state.graph.channel_mut(cid) {
                channel.input_device = None;
                channel.device_error = Some(err.to_string());
            }
            let _ = self.shared.events.send(EngineEvent::DeviceError {
                entity: cid.as_str().to_string(),
                device: device_id.as_str().to_string(),
                message: err.to_string(),
            });
        }
        for bid in buses {
            if let Some(bus) = state.graph.bus_mut(bid) {
                bus.output_device = None;
                bus.device_error = Some(err.to_string());
            }
            let _ = self.shared.events.send(EngineEvent::DeviceError {
                entity: bid.as_str().to_string(),
                device: device_id.as_str().to_string(),
                message: err.to_string(),
            });
        }
        state.graph.bump_version();
    }

    /// Shutdown order: playback streams, then capture streams, then the
    /// device handles go with the ports.
    fn close_all_streams(&mut self) {
        for (_, port) in self.outputs.drain() {
            port.stream.close();
        }
        for (_, port) in self.inputs.drain() {
            port.stream.close();
        }
    }
}

/// Fold an interleaved device block down to stereo. Mono is duplicated,
/// anything wider keeps its first two lanes.
fn downmix_to_stereo(src: &[f32], src_channels: usize, dst: &mut Vec<f32>) {
    dst.clear();
    match src_channels {
        0 => {}
        1 => {
            for &s in src {
                dst.push(s);
                dst.push(s);
            }
        }
        2 => dst.extend_from_slice(src),
        n => {
            for frame in src.chunks_exact(n) {
                dst.push(frame[0]);
                dst.push(frame[1]);
            }
        }
    }
}

/// Spread an interleaved stereo block onto a device layout. Mono averages
/// the pair, wider layouts get zeros past the first two lanes.
fn upmix_from_stereo(src: &[f32], dst_channels: usize, dst: &mut Vec<f32>) {
    dst.clear();
    match dst_channels {
        0 => {}
        1 => {
            for frame in src.chunks_exact(2) {
                dst.push((frame[0] + frame[1]) * 0.5);
            }
        }
        2 => dst.extend_from_slice(src),
        n => {
            for frame in src.chunks_exact(2) {
                dst.push(frame[0]);
                dst.push(frame[1]);
                for _ in 2..n {
                    dst.push(0.0);
                }
            }
        }
    }
}
