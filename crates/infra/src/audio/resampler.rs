//! Linear sample-rate conversion
//!
//! Converts interleaved blocks between a device's native rate and the
//! engine rate. Linear interpolation is deliberate for v1: at mixer block
//! sizes its cost is negligible and its artifacts are inaudible next to the
//! latency budget. The resampler carries its fractional phase and the last
//! frame of the previous block across calls, so consecutive blocks join
//! without clicks.

use tracing::debug;

/// Streaming linear resampler over interleaved frames
pub struct LinearResampler {
    src_rate: u32,
    dst_rate: u32,
    channels: usize,
    /// Input frames consumed per output frame
    step: f64,
    /// Position of the next output frame, in input frames past `prev`
    phase: f64,
    /// Last frame of the previous block, the left neighbor at block seams
    prev: Vec<f32>,
    primed: bool,
}

impl LinearResampler {
    pub fn new(src_rate: u32, dst_rate: u32, channels: usize) -> Self {
        if src_rate != dst_rate {
            debug!(src_rate, dst_rate, channels, "Creating linear resampler");
        }
        Self {
            src_rate,
            dst_rate,
            channels,
            step: src_rate as f64 / dst_rate as f64,
            phase: 0.0,
            prev: vec![0.0; channels],
            primed: false,
        }
    }

    pub fn is_identity(&self) -> bool {
        self.src_rate == self.dst_rate
    }

    pub fn ratio(&self) -> f64 {
        self.dst_rate as f64 / self.src_rate as f64
    }

    /// Clear phase and the held frame
    pub fn reset(&mut self) {
        self.phase = 0.0;
        self.prev.fill(0.0);
        self.primed = false;
    }

    /// Convert one interleaved block, appending to `out`. Returns the number
    /// of frames produced. The output length is deterministic given the
    /// input length and prior phase: `ceil((n - phase) / step)` frames.
    pub fn process(&mut self, input: &[f32], out: &mut Vec<f32>) -> usize {
        let ch = self.channels;
        debug_assert_eq!(input.len() % ch, 0);

        if self.is_identity() {
            out.extend_from_slice(input);
            return input.len() / ch;
        }

        let in_frames = input.len() / ch;
        if in_frames == 0 {
            return 0;
        }

        // First ever frame doubles as its own left neighbor, so the stream
        // starts exactly on the first input sample.
        if !self.primed {
            self.prev.copy_from_slice(&input[..ch]);
            self.primed = true;
        }

        // Virtual block: [prev, input[0], .., input[in_frames-1]], with
        // positions measured in input frames from `prev`. Interpolation at
        // position p uses neighbors floor(p) and floor(p)+1, which exist
        // while p < in_frames.
        let mut produced = 0usize;
        let mut p = self.phase;
        while p < in_frames as f64 {
            let i = p as usize; // floor, p >= 0
            let frac = (p - i as f64) as f32;
            for c in 0..ch {
                let a = if i == 0 {
                    self.prev[c]
                } else {
                    input[(i - 1) * ch + c]
                };
                let b = input[i * ch + c];
                out.push(a + frac * (b - a));
            }
            produced += 1;
            p += self.step;
        }

        self.phase = p - in_frames as f64;
        self.prev.copy_from_slice(&input[(in_frames - 1) * ch..]);

        produced
    }

    /// Frames this call would produce for `in_frames` of input
    pub fn output_frames_for(&self, in_frames: usize) -> usize {
        if self.is_identity() {
            return in_frames;
        }
        let span = in_frames as f64 - self.phase;
        if span <= 0.0 {
            0
        } else {
            (span / self.step).ceil() as usize
        }
    }
}
