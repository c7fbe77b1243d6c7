//! Time-domain stages: delay, fades, tempo scaling, pitch rate shifting.
//!
//! The tempo stage is a SOLA (synchronized overlap-add) time stretcher:
//! fixed-size output segments are taken from the input at a rate scaled
//! by the tempo factor, spliced by cross-correlation alignment so
//! waveform periods line up across segment boundaries. Each stage
//! supports factors in [0.5, 2.0]; the graph chains stages for factors
//! beyond that.
//!
//! The pitch stage resamples the signal while it is played back at the
//! original rate, scaling pitch by the ratio and duration by its inverse;
//! the chain compensates duration through the tempo factor.

use std::collections::VecDeque;

use rubato::{FftFixedIn, Resampler};

use super::node::FilterNode;

/// Pure delay: output lags input by a fixed interval.
pub struct DelayNode {
    queue: VecDeque<f32>,
    priming: usize,
}

impl DelayNode {
    /// Creates a delay of `delay_ms`.
    #[must_use]
    pub fn new(delay_ms: f32, channels: usize, sample_rate: f32) -> Self {
        let priming = (delay_ms.max(0.0) / 1000.0 * sample_rate) as usize * channels;
        let mut queue = VecDeque::with_capacity(priming);
        queue.extend(std::iter::repeat(0.0).take(priming));
        Self { queue, priming }
    }
}

impl FilterNode for DelayNode {
    fn name(&self) -> &'static str {
        "delay"
    }

    fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        self.queue.extend(input.iter().copied());
        out.extend(self.queue.drain(..input.len()));
    }

    fn flush(&mut self, out: &mut Vec<f32>) {
        out.extend(self.queue.drain(..));
    }

    fn reset(&mut self) {
        self.queue.clear();
        self.queue.extend(std::iter::repeat(0.0).take(self.priming));
    }
}

/// Fade-in and fade-out envelopes over absolute frame positions.
pub struct FadeNode {
    channels: usize,
    fade_in: Option<(u64, u64)>,
    fade_out: Option<(u64, u64)>,
    position: u64,
}

impl FadeNode {
    /// Creates the envelope stage.
    #[must_use]
    pub fn new(
        fade_in: Option<(u64, u64)>,
        fade_out: Option<(u64, u64)>,
        channels: usize,
    ) -> Self {
        Self {
            channels,
            fade_in,
            fade_out,
            position: 0,
        }
    }

    /// Envelope gain at an absolute frame position.
    fn gain_at(&self, frame: u64) -> f32 {
        let mut gain = 1.0;

        if let Some((start, length)) = self.fade_in {
            if frame < start {
                gain = 0.0;
            } else if frame < start + length && length > 0 {
                gain *= (frame - start) as f32 / length as f32;
            }
        }

        if let Some((start, length)) = self.fade_out {
            if frame >= start + length {
                gain = 0.0;
            } else if frame >= start && length > 0 {
                gain *= 1.0 - (frame - start) as f32 / length as f32;
            }
        }

        gain
    }
}

impl FilterNode for FadeNode {
    fn name(&self) -> &'static str {
        "fade"
    }

    fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        for frame in input.chunks(self.channels) {
            let gain = self.gain_at(self.position);
            self.position += 1;
            out.extend(frame.iter().map(|sample| sample * gain));
        }
    }

    fn reset(&mut self) {
        self.position = 0;
    }
}

/// One SOLA time-stretch stage, factor in [0.5, 2.0].
pub struct TempoNode {
    tempo: f32,
    channels: usize,

    /// Output segment length per cycle, in frames.
    sequence: usize,
    /// Cross-fade length, in frames.
    overlap: usize,
    /// Alignment search range, in frames.
    seek: usize,

    /// Deinterleaved input accumulation, one vec per channel.
    pending: Vec<Vec<f32>>,
    /// Previous segment tail used for the cross-fade, per channel.
    tail: Vec<Vec<f32>>,
    /// Fractional input read position.
    read_pos: f64,
}

impl TempoNode {
    /// Creates a stage for a clamped in-range tempo factor.
    #[must_use]
    pub fn new(tempo: f32, channels: usize, sample_rate: f32) -> Self {
        let ms = |ms: f32| ((ms / 1000.0) * sample_rate) as usize;
        Self {
            tempo: tempo.clamp(0.5, 2.0),
            channels,
            sequence: ms(40.0).max(64),
            overlap: ms(8.0).max(16),
            seek: ms(5.0).max(8),
            pending: vec![Vec::new(); channels],
            tail: vec![Vec::new(); channels],
            read_pos: 0.0,
        }
    }

    /// Frames the stage must have buffered before producing a cycle.
    fn needed(&self) -> usize {
        self.read_pos as usize + self.seek + self.sequence + self.overlap
    }

    /// Finds the splice offset with the best correlation against the
    /// previous tail, searched on a mono fold of all channels.
    fn best_offset(&self) -> usize {
        if self.tail[0].is_empty() || self.seek == 0 {
            return 0;
        }

        let base = self.read_pos as usize;
        let mut best = 0usize;
        let mut best_score = f32::MIN;
        for offset in 0..self.seek {
            let mut score = 0.0;
            let mut energy = 1e-9;
            for i in 0..self.overlap {
                let mut reference = 0.0;
                let mut candidate = 0.0;
                for channel in 0..self.channels {
                    reference += self.tail[channel][i];
                    candidate += self.pending[channel][base + offset + i];
                }
                score += reference * candidate;
                energy += candidate * candidate;
            }
            // Normalized correlation so loud segments do not always win.
            let normalized = score / energy.sqrt();
            if normalized > best_score {
                best_score = normalized;
                best = offset;
            }
        }
        best
    }

    /// Emits one output cycle: cross-faded overlap plus segment body.
    fn emit_cycle(&mut self, out: &mut Vec<f32>) {
        let base = self.read_pos as usize + self.best_offset();
        let have_tail = !self.tail[0].is_empty();

        for frame in 0..self.sequence {
            for channel in 0..self.channels {
                let incoming = self.pending[channel][base + frame];
                let sample = if have_tail && frame < self.overlap {
                    let t = frame as f32 / self.overlap as f32;
                    self.tail[channel][frame] * (1.0 - t) + incoming * t
                } else {
                    incoming
                };
                out.push(sample);
            }
        }

        // Stash the tail that follows the emitted segment for the next
        // cross-fade.
        for channel in 0..self.channels {
            self.tail[channel].clear();
            self.tail[channel].extend_from_slice(
                &self.pending[channel][base + self.sequence..base + self.sequence + self.overlap],
            );
        }

        // Advance the read position by the tempo-scaled segment length.
        self.read_pos += f64::from(self.tempo) * self.sequence as f64;

        // Drop consumed history to bound memory.
        let drop = (self.read_pos as usize).min(self.pending[0].len());
        if drop > 0 {
            for channel in &mut self.pending {
                channel.drain(..drop);
            }
            self.read_pos -= drop as f64;
        }
    }
}

impl FilterNode for TempoNode {
    fn name(&self) -> &'static str {
        "tempo"
    }

    fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        for (channel, pending) in self.pending.iter_mut().enumerate() {
            pending.extend(input.iter().skip(channel).step_by(self.channels));
        }

        while self.pending[0].len() >= self.needed() {
            self.emit_cycle(out);
        }
    }

    fn flush(&mut self, out: &mut Vec<f32>) {
        // Emit what remains verbatim; sub-segment stretching of the last
        // few frames is inaudible.
        let base = (self.read_pos as usize).min(self.pending[0].len());
        let remaining = self.pending[0].len() - base;
        for frame in 0..remaining {
            for channel in 0..self.channels {
                out.push(self.pending[channel][base + frame]);
            }
        }
        for pending in &mut self.pending {
            pending.clear();
        }
        self.read_pos = 0.0;
    }

    fn reset(&mut self) {
        for pending in &mut self.pending {
            pending.clear();
        }
        for tail in &mut self.tail {
            tail.clear();
        }
        self.read_pos = 0.0;
    }
}

/// Pitch rate shifter: resamples by the pitch ratio.
///
/// Resampling to `rate / ratio` and playing the result at the original
/// rate raises pitch by `ratio` and shortens duration by the same factor;
/// duration is restored by the compensated tempo stages.
pub struct RateShiftNode {
    channels: usize,
    resampler: FftFixedIn<f32>,
    pending: Vec<Vec<f32>>,
    scratch: Vec<Vec<f32>>,
}

impl RateShiftNode {
    /// Creates a rate shifter for a pitch ratio (2.0 = one octave up).
    ///
    /// Returns `None` for a unity ratio or when the converter cannot be
    /// constructed.
    #[must_use]
    pub fn new(ratio: f32, channels: usize, sample_rate: f32) -> Option<Self> {
        if (ratio - 1.0).abs() < 1e-4 {
            return None;
        }
        let out_rate = (sample_rate / ratio).round().max(1.0) as usize;
        let resampler =
            FftFixedIn::new(sample_rate as usize, out_rate, 1024, 2, channels).ok()?;
        let scratch = resampler.output_buffer_allocate(true);
        Some(Self {
            channels,
            resampler,
            pending: vec![Vec::new(); channels],
            scratch,
        })
    }

    /// Runs full chunks through the resampler.
    fn drain_ready(&mut self, out: &mut Vec<f32>) {
        while self.pending[0].len() >= self.resampler.input_frames_next() {
            let Ok((consumed, produced)) =
                self.resampler
                    .process_into_buffer(&self.pending, &mut self.scratch, None)
            else {
                // A converter failure mid-render degrades to dropping the
                // chunk rather than propagating across the callback.
                for pending in &mut self.pending {
                    pending.clear();
                }
                return;
            };

            for pending in &mut self.pending {
                pending.drain(..consumed);
            }
            for frame in 0..produced {
                for channel in 0..self.channels {
                    out.push(self.scratch[channel][frame]);
                }
            }
        }
    }
}

impl FilterNode for RateShiftNode {
    fn name(&self) -> &'static str {
        "set-rate"
    }

    fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        for (channel, pending) in self.pending.iter_mut().enumerate() {
            pending.extend(input.iter().skip(channel).step_by(self.channels));
        }
        self.drain_ready(out);
    }

    fn flush(&mut self, out: &mut Vec<f32>) {
        if self.pending[0].is_empty() {
            return;
        }
        let needed = self.resampler.input_frames_next();
        for pending in &mut self.pending {
            pending.resize(needed, 0.0);
        }
        self.drain_ready(out);
    }

    fn reset(&mut self) {
        for pending in &mut self.pending {
            pending.clear();
        }
        self.resampler.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_shifts_samples() {
        let rate = 1000.0;
        let mut node = DelayNode::new(10.0, 1, rate); // 10 frames
        let input: Vec<f32> = (1..=20).map(|i| i as f32).collect();
        let mut out = Vec::new();
        node.process(&input, &mut out);

        assert_eq!(out.len(), 20);
        assert!(out[..10].iter().all(|s| *s == 0.0));
        assert_eq!(out[10], 1.0);

        let mut tail = Vec::new();
        node.flush(&mut tail);
        assert_eq!(tail.len(), 10);
        assert_eq!(tail[9], 20.0);
    }

    #[test]
    fn fade_in_ramps_from_silence() {
        let mut node = FadeNode::new(Some((0, 100)), None, 1);
        let input = vec![1.0f32; 200];
        let mut out = Vec::new();
        node.process(&input, &mut out);

        assert_eq!(out[0], 0.0);
        assert!(out[50] > 0.4 && out[50] < 0.6);
        assert_eq!(out[150], 1.0);
    }

    #[test]
    fn fade_out_reaches_silence() {
        let mut node = FadeNode::new(None, Some((100, 50)), 1);
        let input = vec![1.0f32; 200];
        let mut out = Vec::new();
        node.process(&input, &mut out);

        assert_eq!(out[50], 1.0);
        assert!(out[125] > 0.4 && out[125] < 0.6);
        assert_eq!(out[180], 0.0);
    }

    #[test]
    fn tempo_changes_output_length() {
        let rate = 48_000.0;
        for tempo in [0.5f32, 1.5, 2.0] {
            let mut node = TempoNode::new(tempo, 1, rate);
            let input: Vec<f32> = (0..96_000)
                .map(|i| (2.0 * std::f32::consts::PI * 220.0 * i as f32 / rate).sin())
                .collect();
            let mut out = Vec::new();
            node.process(&input, &mut out);
            node.flush(&mut out);

            let expected = input.len() as f32 / tempo;
            let ratio = out.len() as f32 / expected;
            assert!(
                (0.85..1.15).contains(&ratio),
                "tempo {tempo}: expected ~{expected} samples, got {}",
                out.len()
            );
        }
    }

    #[test]
    fn tempo_preserves_amplitude() {
        let rate = 48_000.0;
        let mut node = TempoNode::new(1.5, 2, rate);
        let input: Vec<f32> = (0..96_000)
            .map(|i| (2.0 * std::f32::consts::PI * 330.0 * i as f32 / rate).sin() * 0.5)
            .collect();
        let mut out = Vec::new();
        node.process(&input, &mut out);

        let peak = out.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
        assert!(peak < 0.6, "splicing must not overshoot, peak {peak}");
        assert!(peak > 0.4, "signal lost in stretch, peak {peak}");
    }

    #[test]
    fn rate_shift_scales_length_inverse_to_ratio() {
        let rate = 48_000.0;
        let ratio = 2.0f32; // one octave up
        let mut node = RateShiftNode::new(ratio, 1, rate).expect("node");
        let input = vec![0.25f32; 96_000];
        let mut out = Vec::new();
        node.process(&input, &mut out);
        node.flush(&mut out);

        let expected = input.len() as f32 / ratio;
        let deviation = (out.len() as f32 - expected).abs();
        assert!(
            deviation < 8192.0,
            "expected ~{expected} samples, got {}",
            out.len()
        );
    }

    #[test]
    fn unity_rate_shift_is_elided() {
        assert!(RateShiftNode::new(1.0, 2, 48_000.0).is_none());
    }
}
