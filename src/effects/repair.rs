//! Repair stages: spectral denoising, click and clip reconstruction.
//!
//! The denoiser is a spectral gate: an overlapped STFT per channel, a
//! slowly rising minimum-statistics noise floor per bin, and per-bin
//! attenuation bounded by the configured amount. Declick and declip are
//! time-domain detectors with short lookahead, reconstructing by
//! interpolation.

use std::f32::consts::PI;
use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

use crate::util::db_to_ratio;

use super::node::FilterNode;

/// STFT frame size for the denoiser.
const DENOISE_FFT: usize = 1024;

/// STFT hop (50 % overlap).
const DENOISE_HOP: usize = DENOISE_FFT / 2;

/// Per-channel spectral gate state.
struct DenoiseChannel {
    input: Vec<f32>,
    /// Overlap-add accumulator.
    overlap: Vec<f32>,
    /// Per-bin noise floor estimate.
    floor: Vec<f32>,
    ready: Vec<f32>,
}

/// FFT spectral-subtraction denoiser.
pub struct DenoiseNode {
    channels: usize,
    /// Attenuation floor for gated bins.
    min_gain: f32,
    fft: Arc<dyn Fft<f32>>,
    ifft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    state: Vec<DenoiseChannel>,
    scratch: Vec<Complex<f32>>,
}

impl DenoiseNode {
    /// Over-subtraction factor against the noise floor estimate.
    const BETA: f32 = 1.5;

    /// Creates a denoiser attenuating the floor by `amount_db`.
    #[must_use]
    pub fn new(amount_db: f32, channels: usize) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(DENOISE_FFT);
        let ifft = planner.plan_fft_inverse(DENOISE_FFT);
        let window: Vec<f32> = (0..DENOISE_FFT)
            .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / DENOISE_FFT as f32).cos()))
            .collect();
        Self {
            channels,
            min_gain: db_to_ratio(-amount_db.clamp(0.0, 60.0)),
            fft,
            ifft,
            window,
            state: (0..channels)
                .map(|_| DenoiseChannel {
                    input: Vec::new(),
                    overlap: vec![0.0; DENOISE_FFT],
                    floor: vec![0.0; DENOISE_FFT / 2 + 1],
                    ready: Vec::new(),
                })
                .collect(),
            scratch: vec![Complex::default(); DENOISE_FFT],
        }
    }

    /// Processes all complete frames buffered for one channel.
    fn drain_channel(
        fft: &Arc<dyn Fft<f32>>,
        ifft: &Arc<dyn Fft<f32>>,
        window: &[f32],
        min_gain: f32,
        scratch: &mut [Complex<f32>],
        channel: &mut DenoiseChannel,
    ) {
        while channel.input.len() >= DENOISE_FFT {
            for (slot, (sample, w)) in scratch
                .iter_mut()
                .zip(channel.input.iter().zip(window.iter()))
            {
                *slot = Complex::new(sample * w, 0.0);
            }
            fft.process(scratch);

            // Update the noise floor and gate each bin. Only the first
            // half carries unique information for a real signal; mirror
            // the gain onto the conjugate half.
            let half = DENOISE_FFT / 2;
            for bin in 0..=half {
                let magnitude = scratch[bin].norm();
                let floor = &mut channel.floor[bin];
                *floor = if magnitude < *floor {
                    magnitude
                } else {
                    // Slow upward drift toward persistent content; a
                    // transient tone never becomes "noise".
                    (*floor * 1.01 + 1e-7).min(magnitude)
                };

                let gated = (magnitude - Self::BETA * *floor).max(magnitude * min_gain);
                let gain = if magnitude > 1e-9 {
                    gated / magnitude
                } else {
                    0.0
                };
                scratch[bin] *= gain;
                if bin > 0 && bin < half {
                    scratch[DENOISE_FFT - bin] *= gain;
                }
            }

            ifft.process(scratch);
            let norm = 1.0 / DENOISE_FFT as f32;

            // Overlap-add with the synthesis window.
            for i in 0..DENOISE_FFT {
                channel.overlap[i] += scratch[i].re * norm * window[i];
            }
            // Hann analysis+synthesis at 50 % overlap sums to 3/4.
            let scale = 4.0 / 3.0;
            channel
                .ready
                .extend(channel.overlap[..DENOISE_HOP].iter().map(|s| s * scale));
            channel.overlap.copy_within(DENOISE_HOP.., 0);
            channel.overlap[DENOISE_FFT - DENOISE_HOP..].fill(0.0);

            channel.input.drain(..DENOISE_HOP);
        }
    }
}

impl FilterNode for DenoiseNode {
    fn name(&self) -> &'static str {
        "fft-denoise"
    }

    fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        for (channel_index, channel) in self.state.iter_mut().enumerate() {
            channel
                .input
                .extend(input.iter().skip(channel_index).step_by(self.channels));
            Self::drain_channel(
                &self.fft,
                &self.ifft,
                &self.window,
                self.min_gain,
                &mut self.scratch,
                channel,
            );
        }

        // Emit whole frames available on every channel.
        let frames = self
            .state
            .iter()
            .map(|channel| channel.ready.len())
            .min()
            .unwrap_or(0);
        for frame in 0..frames {
            for channel in &self.state {
                out.push(channel.ready[frame]);
            }
        }
        for channel in &mut self.state {
            channel.ready.drain(..frames);
        }
    }

    fn flush(&mut self, out: &mut Vec<f32>) {
        // Pad to a frame boundary and emit the remainder raw; the last
        // hop of a stream is below audibility for gating purposes.
        let frames = self
            .state
            .iter()
            .map(|channel| channel.input.len())
            .min()
            .unwrap_or(0);
        for frame in 0..frames {
            for channel in &self.state {
                out.push(channel.input[frame]);
            }
        }
        for channel in &mut self.state {
            channel.input.clear();
        }
    }

    fn reset(&mut self) {
        for channel in &mut self.state {
            channel.input.clear();
            channel.ready.clear();
            channel.overlap.fill(0.0);
            channel.floor.fill(0.0);
        }
    }
}

/// Impulsive click removal by local outlier interpolation.
///
/// A sample that deviates from the mean of its neighbors by far more
/// than the local activity is replaced by their interpolation. One frame
/// of lookahead is kept per channel.
pub struct DeclickNode {
    channels: usize,
    window: usize,
    /// Per-channel history ring of recent samples.
    history: Vec<Vec<f32>>,
    /// One pending frame awaiting its right neighbor.
    pending: Vec<Option<f32>>,
}

impl DeclickNode {
    /// Deviation multiplier over the local mean absolute level.
    const SENSITIVITY: f32 = 8.0;

    #[must_use]
    pub fn new(window: usize, channels: usize) -> Self {
        Self {
            channels,
            window: window.clamp(8, 512),
            history: vec![Vec::new(); channels],
            pending: vec![None; channels],
        }
    }
}

impl FilterNode for DeclickNode {
    fn name(&self) -> &'static str {
        "declick"
    }

    fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        for frame in input.chunks(self.channels) {
            for (channel, sample) in frame.iter().enumerate() {
                let right = *sample;
                let Some(center) = self.pending[channel].replace(right) else {
                    continue;
                };

                let history = &mut self.history[channel];
                let left = history.last().copied().unwrap_or(0.0);

                let activity = if history.is_empty() {
                    1.0
                } else {
                    history.iter().map(|s| s.abs()).sum::<f32>() / history.len() as f32
                };

                let expected = (left + right) * 0.5;
                let deviation = (center - expected).abs();
                let emitted = if deviation > 0.1 && deviation > activity * Self::SENSITIVITY {
                    expected
                } else {
                    center
                };

                history.push(emitted);
                if history.len() > self.window {
                    history.remove(0);
                }
                out.push(emitted);
            }
        }
    }

    fn flush(&mut self, out: &mut Vec<f32>) {
        for pending in &mut self.pending {
            if let Some(sample) = pending.take() {
                out.push(sample);
            }
        }
    }

    fn reset(&mut self) {
        for history in &mut self.history {
            history.clear();
        }
        self.pending.fill(None);
    }
}

/// Clipped-run reconstruction by linear interpolation across the run.
pub struct DeclipNode {
    threshold: f32,
    channels: usize,
    /// Per-channel last emitted sample.
    last: Vec<f32>,
    /// Per-channel clipped run being accumulated.
    run: Vec<Vec<f32>>,
}

impl DeclipNode {
    /// Longest run the node will attempt to reconstruct.
    const MAX_RUN: usize = 512;

    #[must_use]
    pub fn new(threshold: f32, channels: usize) -> Self {
        Self {
            threshold: threshold.clamp(0.5, 1.0),
            channels,
            last: vec![0.0; channels],
            run: vec![Vec::new(); channels],
        }
    }
}

impl FilterNode for DeclipNode {
    fn name(&self) -> &'static str {
        "declip"
    }

    fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        // Channels are handled independently but emission must stay
        // frame-aligned, so runs are reconstructed in place into a
        // per-channel queue and re-interleaved.
        let frames = input.len() / self.channels;
        let mut columns: Vec<Vec<f32>> = vec![Vec::with_capacity(frames); self.channels];

        for frame in input.chunks(self.channels) {
            for (channel, sample) in frame.iter().enumerate() {
                let clipped = sample.abs() >= self.threshold;
                if clipped && self.run[channel].len() < Self::MAX_RUN {
                    self.run[channel].push(*sample);
                    continue;
                }

                if !self.run[channel].is_empty() {
                    // Interpolate from the last clean sample to this one,
                    // with a slight arc restoring the lost crest.
                    let start = self.last[channel];
                    let end = *sample;
                    let run = std::mem::take(&mut self.run[channel]);
                    let len = run.len();
                    let sign = run[0].signum();
                    for (i, _) in run.iter().enumerate() {
                        let t = (i + 1) as f32 / (len + 1) as f32;
                        let linear = start + (end - start) * t;
                        let arc = (t * PI).sin() * 0.1 * sign;
                        columns[channel].push((linear + arc).clamp(-1.0, 1.0));
                    }
                }

                self.last[channel] = *sample;
                columns[channel].push(*sample);
            }
        }

        // Emit only whole frames; a still-open run holds its channel back.
        let emit = columns.iter().map(Vec::len).min().unwrap_or(0);
        for frame in 0..emit {
            for column in &columns {
                out.push(column[frame]);
            }
        }
        // Anything beyond the emitted frame count is re-queued as an open
        // run tail (rare: channels desynchronized by simultaneous runs).
        for (channel, column) in columns.into_iter().enumerate() {
            for (offset, sample) in column.into_iter().skip(emit).enumerate() {
                self.run[channel].insert(offset, sample);
            }
        }
    }

    fn flush(&mut self, out: &mut Vec<f32>) {
        let frames = self.run.iter().map(Vec::len).max().unwrap_or(0);
        for frame in 0..frames {
            for channel in 0..self.channels {
                out.push(self.run[channel].get(frame).copied().unwrap_or(0.0));
            }
        }
        for run in &mut self.run {
            run.clear();
        }
    }

    fn reset(&mut self) {
        self.last.fill(0.0);
        for run in &mut self.run {
            run.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declick_removes_spike() {
        let mut node = DeclickNode::new(32, 1);
        let mut input = vec![0.01f32; 256];
        input[128] = 0.9; // isolated click

        let mut out = Vec::new();
        node.process(&input, &mut out);
        node.flush(&mut out);

        assert_eq!(out.len(), 256);
        let peak = out.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
        assert!(peak < 0.1, "click survived: {peak}");
    }

    #[test]
    fn declick_keeps_music() {
        let rate = 48_000.0;
        let mut node = DeclickNode::new(64, 1);
        let tone: Vec<f32> = (0..4800)
            .map(|i| (2.0 * PI * 440.0 * i as f32 / rate).sin() * 0.5)
            .collect();
        let mut out = Vec::new();
        node.process(&tone, &mut out);
        node.flush(&mut out);

        for (a, b) in tone.iter().zip(out.iter()) {
            assert!((a - b).abs() < 1e-6, "tone altered");
        }
    }

    #[test]
    fn declip_reconstructs_flat_top() {
        let mut node = DeclipNode::new(0.95, 1);
        // Rising edge, clipped plateau, falling edge.
        let mut input = vec![0.2f32, 0.5, 0.8];
        input.extend(std::iter::repeat(1.0).take(8));
        input.extend([0.8, 0.5, 0.2]);

        let mut out = Vec::new();
        node.process(&input, &mut out);
        node.flush(&mut out);

        assert_eq!(out.len(), input.len());
        // The plateau must no longer sit at the rail.
        let plateau = &out[3..11];
        assert!(plateau.iter().any(|s| s.abs() < 0.999));
    }

    #[test]
    fn denoise_keeps_loud_tone() {
        let rate = 48_000.0;
        let mut node = DenoiseNode::new(20.0, 1);
        let tone: Vec<f32> = (0..24_000)
            .map(|i| (2.0 * PI * 1000.0 * i as f32 / rate).sin() * 0.5)
            .collect();
        let mut out = Vec::new();
        node.process(&tone, &mut out);
        node.flush(&mut out);

        let rms = |buf: &[f32]| {
            (buf.iter().map(|s| s * s).sum::<f32>() / buf.len() as f32).sqrt()
        };
        // Allow for STFT latency; compare steady-state energy.
        let settled = &out[8192..];
        assert!(rms(settled) > rms(&tone) * 0.5, "tone attenuated too much");
    }
}
