//! Capture and playback streams
//!
//! Thin wrappers around CPAL streams whose realtime callbacks do exactly one
//! thing: move samples between the device buffer and an SPSC ring. No
//! allocation, no locking, no logging on the data path; xruns are counted
//! on shared atomics and surfaced by the engine.
//!
//! Devices are opened at their native rate and channel count; rate and
//! channel reconciliation happens on the engine thread.

use crate::audio::cpal_backend::CpalEnumerator;
use crate::audio::ring::{spsc_ring, RingConsumer, RingProducer};
use cpal::traits::{DeviceTrait, StreamTrait};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};
use troubadour_core::domain::audio::{AudioError, DeviceId, Result};

/// Lifecycle of one device stream, capture or playback alike
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Unassigned,
    Opening,
    Running,
    Closing,
    Failed,
}

/// Shared xrun counter, incremented from the realtime callback
#[derive(Debug, Clone, Default)]
pub struct XrunCounter(Arc<AtomicU64>);

impl XrunCounter {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Capture side: the device callback writes each arriving block into the
/// device's input ring.
pub struct CaptureStream {
    device_id: DeviceId,
    state: StreamState,
    native_rate: u32,
    channels: u16,
    overruns: XrunCounter,
    failed: Arc<AtomicBool>,
    _stream: cpal::Stream,
}

impl CaptureStream {
    /// Open a capture stream at the device's native configuration; returns
    /// the stream and the consumer half of its ring.
    pub fn open(
        enumerator: &CpalEnumerator,
        device_id: &DeviceId,
        ring_capacity: usize,
    ) -> Result<(Self, RingConsumer)> {
        let device = enumerator.open(device_id)?;
        let supported = device
            .default_input_config()
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        if supported.sample_format() != cpal::SampleFormat::F32 {
            return Err(AudioError::UnsupportedConfiguration(format!(
                "device '{}' does not offer f32 capture",
                device_id
            )));
        }

        let native_rate = supported.sample_rate().0;
        let channels = supported.channels();
        let config = cpal::StreamConfig {
            channels,
            sample_rate: supported.sample_rate(),
            buffer_size: cpal::BufferSize::Default,
        };

        info!(
            device = %device_id,
            rate = native_rate,
            channels,
            "Opening capture stream"
        );

        let (mut producer, consumer) = spsc_ring(ring_capacity);
        let overruns = XrunCounter::new();
        let failed = Arc::new(AtomicBool::new(false));

        let cb_overruns = overruns.clone();
        let cb_failed = Arc::clone(&failed);
        let frame = channels as usize;
        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    // Only whole frames enter the ring, so a short write can
                    // never swap the interleave lanes downstream
                    let take = producer.free().min(data.len()) / frame * frame;
                    producer.write(&data[..take]);
                    if take < data.len() {
                        cb_overruns.increment();
                    }
                },
                move |err| {
                    // Runs on the error path, not the data path
                    warn!("Capture stream error: {}", err);
                    cb_failed.store(true, Ordering::Release);
                },
                None,
            )
            .map_err(|e| AudioError::StreamError(format!("failed to build stream: {}", e)))?;

        stream
            .play()
            .map_err(|e| AudioError::StreamError(format!("failed to start stream: {}", e)))?;

        Ok((
            Self {
                device_id: device_id.clone(),
                state: StreamState::Running,
                native_rate,
                channels,
                overruns,
                failed,
                _stream: stream,
            },
            consumer,
        ))
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    pub fn native_rate(&self) -> u32 {
        self.native_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn overruns(&self) -> &XrunCounter {
        &self.overruns
    }

    pub fn state(&self) -> StreamState {
        if self.failed.load(Ordering::Acquire) {
            StreamState::Failed
        } else {
            self.state
        }
    }

    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    /// Tear the stream down; the device handle is released on drop
    pub fn close(mut self) {
        self.state = StreamState::Closing;
        info!(device = %self.device_id, "Closing capture stream");
    }
}

/// Playback side: the device callback drains the device's output ring and
/// zero-fills any shortfall.
pub struct PlaybackStream {
    device_id: DeviceId,
    state: StreamState,
    native_rate: u32,
    channels: u16,
    underruns: XrunCounter,
    failed: Arc<AtomicBool>,
    _stream: cpal::Stream,
}

impl PlaybackStream {
    /// Open a playback stream at the device's native configuration; returns
    /// the stream and the producer half of its ring.
    pub fn open(
        enumerator: &CpalEnumerator,
        device_id: &DeviceId,
        ring_capacity: usize,
    ) -> Result<(Self, RingProducer)> {
        let device = enumerator.open(device_id)?;
        let supported = device
            .default_output_config()
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        if supported.sample_format() != cpal::SampleFormat::F32 {
            return Err(AudioError::UnsupportedConfiguration(format!(
                "device '{}' does not offer f32 playback",
                device_id
            )));
        }

        let native_rate = supported.sample_rate().0;
        let channels = supported.channels();
        let config = cpal::StreamConfig {
            channels,
            sample_rate: supported.sample_rate(),
            buffer_size: cpal::BufferSize::Default,
        };

        info!(
            device = %device_id,
            rate = native_rate,
            channels,
            "Opening playback stream"
        );

        let (producer, mut consumer) = spsc_ring(ring_capacity);
        let underruns = XrunCounter::new();
        let failed = Arc::new(AtomicBool::new(false));

        let cb_underruns = underruns.clone();
        let cb_failed = Arc::clone(&failed);
        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let read = consumer.read(data);
                    if read < data.len() {
                        data[read..].fill(0.0);
                        cb_underruns.increment();
                    }
                },
                move |err| {
                    warn!("Playback stream error: {}", err);
                    cb_failed.store(true, Ordering::Release);
                },
                None,
            )
            .map_err(|e| AudioError::StreamError(format!("failed to build stream: {}", e)))?;

        stream
            .play()
            .map_err(|e| AudioError::StreamError(format!("failed to start stream: {}", e)))?;

        Ok((
            Self {
                device_id: device_id.clone(),
                state: StreamState::Running,
                native_rate,
                channels,
                underruns,
                failed,
                _stream: stream,
            },
            producer,
        ))
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    pub fn native_rate(&self) -> u32 {
        self.native_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn underruns(&self) -> &XrunCounter {
        &self.underruns
    }

    pub fn state(&self) -> StreamState {
        if self.failed.load(Ordering::Acquire) {
            StreamState::Failed
        } else {
            self.state
        }
    }

    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    pub fn close(mut self) {
        self.state = StreamState::Closing;
        info!(device = %self.device_id, "Closing playback stream");
    }
}
