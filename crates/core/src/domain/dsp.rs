//! Digital signal processing effects
//!
//! Channels carry a serializable [`EffectsChain`] configuration; the engine
//! materializes it into an [`EffectsChainProcessor`] holding the runtime
//! filter state. Keeping state outside the graph lets the control plane
//! clone and persist channel configuration without dragging DSP state along.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// A single effect stage, as configured and persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EffectConfig {
    /// Static gain trim applied before the channel fader
    Trim { db: f32 },
    /// One-pole high-pass (rumble filter)
    HighPass { cutoff_hz: f32 },
    /// One-pole low-pass
    LowPass { cutoff_hz: f32 },
    /// Hard gate: samples below the threshold are zeroed
    NoiseGate { threshold_db: f32 },
}

/// Ordered list of effect stages on one channel
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EffectsChain {
    pub effects: Vec<EffectConfig>,
}

impl EffectsChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    pub fn push(&mut self, effect: EffectConfig) {
        self.effects.push(effect);
    }
}

/// Runtime DSP stage operating in place on interleaved blocks
pub trait Effect: Send {
    fn process(&mut self, buffer: &mut [f32]);

    fn reset(&mut self);
}

/// Static gain trim
struct Trim {
    gain: f32,
}

impl Effect for Trim {
    fn process(&mut self, buffer: &mut [f32]) {
        for s in buffer.iter_mut() {
            *s *= self.gain;
        }
    }

    fn reset(&mut self) {}
}

/// One-pole filter over interleaved stereo, usable as low-pass or high-pass
struct OnePole {
    coeff: f32,
    high_pass: bool,
    // one smoothing state per interleaved channel
    state: [f32; 2],
}

impl OnePole {
    fn new(cutoff_hz: f32, sample_rate: u32, high_pass: bool) -> Self {
        let cutoff = cutoff_hz.clamp(1.0, sample_rate as f32 * 0.45);
        let x = (-2.0 * std::f32::consts::PI * cutoff / sample_rate as f32).exp();
        Self {
            coeff: x,
            high_pass,
            state: [0.0; 2],
        }
    }
}

impl Effect for OnePole {
    fn process(&mut self, buffer: &mut [f32]) {
        let a = self.coeff;
        for (i, s) in buffer.iter_mut().enumerate() {
            let ch = i & 1;
            let low = (1.0 - a) * *s + a * self.state[ch];
            self.state[ch] = low;
            *s = if self.high_pass { *s - low } else { low };
        }
    }

    fn reset(&mut self) {
        self.state = [0.0; 2];
    }
}

/// Hard gate with a linear threshold
struct NoiseGate {
    threshold: f32,
}

impl Effect for NoiseGate {
    fn process(&mut self, buffer: &mut [f32]) {
        for s in buffer.iter_mut() {
            if s.abs() < self.threshold {
                *s = 0.0;
            }
        }
    }

    fn reset(&mut self) {}
}

/// Materialized effects chain for one channel
pub struct EffectsChainProcessor {
    stages: Vec<Box<dyn Effect>>,
}

impl EffectsChainProcessor {
    /// Build runtime stages from a chain configuration
    pub fn build(chain: &EffectsChain, sample_rate: u32) -> Self {
        let stages: Vec<Box<dyn Effect>> = chain
            .effects
            .iter()
            .map(|config| -> Box<dyn Effect> {
                match *config {
                    EffectConfig::Trim { db } => Box::new(Trim {
                        gain: super::mixer::db_to_gain(db),
                    }),
                    EffectConfig::HighPass { cutoff_hz } => {
                        Box::new(OnePole::new(cutoff_hz, sample_rate, true))
                    }
                    EffectConfig::LowPass { cutoff_hz } => {
                        Box::new(OnePole::new(cutoff_hz, sample_rate, false))
                    }
                    EffectConfig::NoiseGate { threshold_db } => Box::new(NoiseGate {
                        threshold: super::mixer::db_to_gain(threshold_db),
                    }),
                }
            })
            .collect();

        if !stages.is_empty() {
            debug!(stages = stages.len(), "Built effects chain processor");
        }
        Self { stages }
    }

    pub fn process(&mut self, buffer: &mut [f32]) {
        for stage in &mut self.stages {
            stage.process(buffer);
        }
    }

    pub fn reset(&mut self) {
        for stage in &mut self.stages {
            stage.reset();
        }
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}
