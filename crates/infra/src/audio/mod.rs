//! Platform audio support built on CPAL
//!
//! CPAL abstracts the platform APIs (WASAPI on Windows, ALSA/PulseAudio on
//! Linux, CoreAudio on macOS). Everything realtime-sensitive lives here:
//! the SPSC rings carrying samples between callbacks and the engine, the
//! linear resampler reconciling device rates, the stream wrappers and the
//! engine thread itself.

pub mod controller;
pub mod cpal_backend;
pub mod engine;
pub mod resampler;
pub mod ring;
pub mod stream;

pub use controller::MixerController;
pub use cpal_backend::{CpalDevice, CpalEnumerator};
pub use engine::{
    AudioEngine, EngineHandle, EngineRuntime, EngineShared, EngineState, StreamDirective,
};
pub use resampler::LinearResampler;
pub use ring::{spsc_ring, RingConsumer, RingProducer};
pub use stream::{CaptureStream, PlaybackStream, StreamState, XrunCounter};
