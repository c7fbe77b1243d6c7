//! Dynamics stages: gain, gate, compressor, limiter, levelers.
//!
//! The limiter is a feedforward design in the log domain, based on:
//! Giannoulis, D., Massberg, M., & Reiss, J.D. (2012). Digital Dynamic
//! Range Compressor Design—A Tutorial and Analysis. Journal of The Audio
//! Engineering Society, 60, 399-408.
//!
//! All envelope followers run per channel with attack/release smoothing
//! derived from time constants at the graph's sample rate.

use crate::util::{db_to_ratio, ratio_to_db, ToF32, ZERO_DB};

use super::node::FilterNode;

/// Converts a time constant in milliseconds to a smoothing coefficient.
///
/// Longer times give higher coefficients (slower response).
#[must_use]
pub fn ms_to_coefficient(ms: f32, sample_rate: f32) -> f32 {
    if ms <= 0.0 {
        return 0.0;
    }
    f32::exp(-1.0 / (ms / 1000.0 * sample_rate))
}

/// Fixed output gain.
pub struct GainNode {
    ratio: f32,
}

impl GainNode {
    /// Creates a gain stage from decibels.
    #[must_use]
    pub fn new(gain_db: f32) -> Self {
        Self {
            ratio: db_to_ratio(gain_db),
        }
    }
}

impl FilterNode for GainNode {
    fn name(&self) -> &'static str {
        "gain"
    }

    fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        out.extend(input.iter().map(|sample| sample * self.ratio));
    }

    fn reset(&mut self) {}
}

/// Downward noise gate with hysteresis-free envelope detection.
pub struct GateNode {
    threshold: f32,
    attack: f32,
    release: f32,
    channels: usize,
    envelope: Vec<f32>,
}

impl GateNode {
    /// Creates a gate opening above `threshold_db`.
    #[must_use]
    pub fn new(threshold_db: f32, channels: usize, sample_rate: f32) -> Self {
        Self {
            threshold: db_to_ratio(threshold_db),
            attack: ms_to_coefficient(1.0, sample_rate),
            release: ms_to_coefficient(80.0, sample_rate),
            channels,
            envelope: vec![0.0; channels],
        }
    }
}

impl FilterNode for GateNode {
    fn name(&self) -> &'static str {
        "gate"
    }

    fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        for (index, sample) in input.iter().enumerate() {
            let channel = index % self.channels;
            let level = sample.abs();
            let envelope = &mut self.envelope[channel];
            let coefficient = if level > *envelope {
                self.attack
            } else {
                self.release
            };
            *envelope = coefficient * *envelope + (1.0 - coefficient) * level;

            out.push(if *envelope >= self.threshold {
                *sample
            } else {
                0.0
            });
        }
    }

    fn reset(&mut self) {
        self.envelope.fill(0.0);
    }
}

/// Downward compressor with soft knee in the log domain.
pub struct CompressorNode {
    threshold_db: f32,
    ratio: f32,
    makeup: f32,
    attack: f32,
    release: f32,
    channels: usize,
    /// Per-channel gain-reduction envelope in dB.
    reduction: Vec<f32>,
}

impl CompressorNode {
    /// Knee width in dB over which compression fades in.
    const KNEE_DB: f32 = 6.0;

    /// Creates a compressor.
    #[must_use]
    pub fn new(
        threshold_db: f32,
        ratio: f32,
        attack_ms: f32,
        release_ms: f32,
        makeup_db: f32,
        channels: usize,
        sample_rate: f32,
    ) -> Self {
        Self {
            threshold_db,
            ratio: ratio.max(1.0),
            makeup: db_to_ratio(makeup_db),
            attack: ms_to_coefficient(attack_ms, sample_rate),
            release: ms_to_coefficient(release_ms, sample_rate),
            channels,
            reduction: vec![ZERO_DB; channels],
        }
    }
}

impl FilterNode for CompressorNode {
    fn name(&self) -> &'static str {
        "compressor"
    }

    fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        let slope = 1.0 - 1.0 / self.ratio;
        for (index, sample) in input.iter().enumerate() {
            let channel = index % self.channels;

            let mut target = ZERO_DB;
            if sample.is_normal() {
                let over_db = ratio_to_db(sample.abs()) - self.threshold_db;
                let knee = Self::KNEE_DB;
                if over_db * 2.0 > -knee {
                    target = if (over_db * 2.0).abs() <= knee {
                        slope * (over_db + knee / 2.0).powi(2) / (2.0 * knee)
                    } else {
                        slope * over_db
                    };
                }
            }

            let reduction = &mut self.reduction[channel];
            let coefficient = if target > *reduction {
                self.attack
            } else {
                self.release
            };
            *reduction = coefficient * *reduction + (1.0 - coefficient) * target;

            out.push(sample * db_to_ratio(-*reduction) * self.makeup);
        }
    }

    fn reset(&mut self) {
        self.reduction.fill(ZERO_DB);
    }
}

/// Feedforward limiter in the log domain with soft knee and decoupled
/// peak detection.
pub struct LimiterNode {
    threshold_db: f32,
    knee_db: f32,
    attack: f32,
    release: f32,
    channels: usize,
    /// Per-channel peak detector integrator states (dB).
    integrators: Vec<f32>,
    /// Per-channel smoothed peak levels (dB).
    peaks: Vec<f32>,
}

impl LimiterNode {
    /// Creates a limiter with the given ceiling.
    #[must_use]
    pub fn new(ceiling_db: f32, channels: usize, sample_rate: f32) -> Self {
        Self::with_times(ceiling_db, 12.0, 5.0, 100.0, channels, sample_rate)
    }

    /// Creates a limiter with explicit knee and time constants.
    #[must_use]
    pub fn with_times(
        ceiling_db: f32,
        knee_db: f32,
        attack_ms: f32,
        release_ms: f32,
        channels: usize,
        sample_rate: f32,
    ) -> Self {
        Self {
            threshold_db: ceiling_db,
            knee_db,
            attack: ms_to_coefficient(attack_ms, sample_rate),
            release: ms_to_coefficient(release_ms, sample_rate),
            channels,
            integrators: vec![ZERO_DB; channels],
            peaks: vec![ZERO_DB; channels],
        }
    }

    /// Limits one sample for one channel, returning the gain-reduced
    /// sample.
    #[inline]
    fn limit(&mut self, channel: usize, sample: f32) -> f32 {
        let threshold_db = self.threshold_db;
        let knee_db = self.knee_db;
        let attack_cf = self.attack;
        let release_cf = self.release;

        // Samples at exactly 0.0 are silence and need no limiting. Also
        // catch the unlikely case where a sample decodes as NaN or some
        // other non-normal value: `ratio_to_db(0.0)` would otherwise get
        // the peak detector stuck.
        let mut limiter_db = ZERO_DB;
        if sample.is_normal() {
            // Half-wave rectification, conversion into dB, and gain
            // computer with soft knee and subtractor.
            let bias_db = ratio_to_db(sample.abs()) - threshold_db;
            let knee_boundary_db = bias_db * 2.0;

            if knee_boundary_db < -knee_db {
                limiter_db = ZERO_DB;
            } else if knee_boundary_db.abs() <= knee_db {
                limiter_db = (knee_boundary_db + knee_db).powi(2) / (8.0 * knee_db);
            } else {
                limiter_db = bias_db;
            }
        }

        // Spare the CPU unless the limiter is engaged or attack/release
        // has not finished yet.
        if limiter_db > ZERO_DB
            || self.integrators[channel] > ZERO_DB
            || self.peaks[channel] > ZERO_DB
        {
            // Smooth, decoupled peak detector:
            // `release_cf * integrator + (1 - release_cf) * limiter_db`
            self.integrators[channel] = f32::max(
                limiter_db,
                release_cf * self.integrators[channel] - release_cf * limiter_db + limiter_db,
            );

            // `attack_cf * peak + (1 - attack_cf) * integrator`
            self.peaks[channel] = attack_cf * self.peaks[channel]
                - attack_cf * self.integrators[channel]
                + self.integrators[channel];

            // The loudest channel drives the gain so the image stays put.
            let max_peak = self.peaks.iter().copied().fold(ZERO_DB, f32::max);
            return sample * db_to_ratio(-max_peak);
        }

        sample
    }
}

impl FilterNode for LimiterNode {
    fn name(&self) -> &'static str {
        "limiter"
    }

    fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        for (index, sample) in input.iter().enumerate() {
            let channel = index % self.channels;
            out.push(self.limit(channel, *sample));
        }
    }

    fn reset(&mut self) {
        self.integrators.fill(ZERO_DB);
        self.peaks.fill(ZERO_DB);
    }
}

/// Automatic gain rider toward a peak target (dynamic normalization).
///
/// Measures frame peaks, smooths the implied gain over a window of past
/// frames, and ramps gain changes across each frame boundary.
pub struct AutoGainNode {
    frame_len: usize,
    peak_target: f32,
    channels: usize,
    /// Recent per-frame gains for smoothing.
    history: Vec<f32>,
    window: usize,
    current_gain: f32,
    /// Samples accumulated toward the current frame.
    pending: Vec<f32>,
}

impl AutoGainNode {
    /// Maximum boost the rider may apply.
    const MAX_GAIN: f32 = 10.0;

    /// Creates a gain rider.
    #[must_use]
    pub fn new(
        frame_ms: f32,
        window: usize,
        peak_target: f32,
        channels: usize,
        sample_rate: f32,
    ) -> Self {
        let frame_len =
            ((frame_ms / 1000.0 * sample_rate) as usize).max(256) * channels;
        Self {
            frame_len,
            peak_target: peak_target.clamp(0.1, 1.0),
            channels,
            history: Vec::new(),
            window: window.max(3) | 1,
            current_gain: 1.0,
            pending: Vec::new(),
        }
    }

    /// Emits one complete frame with the smoothed gain ramp.
    fn emit_frame(&mut self, out: &mut Vec<f32>) {
        let frame: Vec<f32> = self.pending.drain(..self.frame_len).collect();
        let peak = frame.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
        let frame_gain = if peak > 1e-6 {
            (self.peak_target / peak).min(Self::MAX_GAIN)
        } else {
            self.current_gain
        };

        self.history.push(frame_gain);
        if self.history.len() > self.window {
            self.history.remove(0);
        }
        let smoothed = self.history.iter().sum::<f32>() / self.history.len().to_f32_lossy();

        let frames = frame.len() / self.channels;
        for (index, sample) in frame.iter().enumerate() {
            let frame_pos = (index / self.channels).to_f32_lossy() / frames.to_f32_lossy();
            let gain = self.current_gain + (smoothed - self.current_gain) * frame_pos;
            out.push(sample * gain);
        }
        self.current_gain = smoothed;
    }
}

impl FilterNode for AutoGainNode {
    fn name(&self) -> &'static str {
        "auto-gain"
    }

    fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        self.pending.extend_from_slice(input);
        while self.pending.len() >= self.frame_len {
            self.emit_frame(out);
        }
    }

    fn flush(&mut self, out: &mut Vec<f32>) {
        let gain = self.current_gain;
        out.extend(self.pending.drain(..).map(|sample| sample * gain));
    }

    fn reset(&mut self) {
        self.history.clear();
        self.pending.clear();
        self.current_gain = 1.0;
    }
}

/// Streaming loudness normalization toward a LUFS target.
///
/// Runs a running K-weighted-ish power estimate over 400 ms blocks and
/// rides a slow gain toward the target, with the log-domain limiter as a
/// true-peak backstop. A two-pass measurement is impossible on the render
/// path, so this is the streaming approximation of the measure-then-apply
/// form (linear mode freezes the gain once settled).
pub struct LoudnessNormalizeNode {
    target_lufs: f32,
    linear: bool,
    channels: usize,
    limiter: LimiterNode,
    /// Running mean-square with a slow time constant.
    power: f32,
    power_coefficient: f32,
    gain: f32,
    settled: bool,
    samples_seen: u64,
}

impl LoudnessNormalizeNode {
    /// Gain slew per block toward the target.
    const GAIN_SLEW: f32 = 0.05;

    /// Creates a loudness normalizer.
    #[must_use]
    pub fn new(
        target_lufs: f32,
        true_peak_db: f32,
        linear: bool,
        channels: usize,
        sample_rate: f32,
    ) -> Self {
        Self {
            target_lufs,
            linear,
            channels,
            limiter: LimiterNode::with_times(true_peak_db, 6.0, 2.0, 50.0, channels, sample_rate),
            power: 0.0,
            power_coefficient: ms_to_coefficient(400.0, sample_rate),
            gain: 1.0,
            settled: false,
            samples_seen: 0,
        }
    }
}

impl FilterNode for LoudnessNormalizeNode {
    fn name(&self) -> &'static str {
        "loudness-normalize"
    }

    fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        for (index, sample) in input.iter().enumerate() {
            let channel = index % self.channels;

            self.power =
                self.power_coefficient * self.power + (1.0 - self.power_coefficient) * sample * sample;
            self.samples_seen += 1;

            // Update the ride once per 100 ms worth of samples, after a
            // settling period, unless linear mode froze it.
            if !(self.linear && self.settled) && self.samples_seen % 4800 == 0 && self.power > 1e-10
            {
                let lufs = -0.691 + 10.0 * self.power.log10();
                let desired = db_to_ratio((self.target_lufs - lufs).clamp(-24.0, 24.0));
                self.gain += (desired - self.gain) * Self::GAIN_SLEW;
                if (desired - self.gain).abs() < 0.05 {
                    self.settled = true;
                }
            }

            out.push(self.limiter.limit(channel, sample * self.gain));
        }
    }

    fn reset(&mut self) {
        self.power = 0.0;
        self.gain = 1.0;
        self.settled = false;
        self.samples_seen = 0;
        self.limiter.reset();
    }
}

/// Speech leveler: fixed-tuning compressor plus gate for dialogue.
pub struct SpeechNormalizeNode {
    gate: GateNode,
    compressor: CompressorNode,
    scratch: Vec<f32>,
}

impl SpeechNormalizeNode {
    /// Creates the leveler with fixed speech tuning.
    #[must_use]
    pub fn new(channels: usize, sample_rate: f32) -> Self {
        Self {
            gate: GateNode::new(-55.0, channels, sample_rate),
            compressor: CompressorNode::new(-24.0, 4.0, 5.0, 120.0, 6.0, channels, sample_rate),
            scratch: Vec::new(),
        }
    }
}

impl FilterNode for SpeechNormalizeNode {
    fn name(&self) -> &'static str {
        "speech-normalize"
    }

    fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        self.scratch.clear();
        self.gate.process(input, &mut self.scratch);
        self.compressor.process(&self.scratch, out);
    }

    fn reset(&mut self) {
        self.gate.reset();
        self.compressor.reset();
    }
}

/// Piecewise-linear compander over a transfer curve in dB.
pub struct CompandNode {
    /// Transfer points as (input dB, output dB), sorted by input.
    points: Vec<(f32, f32)>,
    channels: usize,
    envelope: Vec<f32>,
    attack: f32,
    release: f32,
}

impl CompandNode {
    /// Creates a compander from transfer points.
    #[must_use]
    pub fn new(mut points: Vec<(f32, f32)>, channels: usize, sample_rate: f32) -> Self {
        points.sort_by(|a, b| a.0.total_cmp(&b.0));
        Self {
            points,
            channels,
            envelope: vec![0.0; channels],
            attack: ms_to_coefficient(5.0, sample_rate),
            release: ms_to_coefficient(150.0, sample_rate),
        }
    }

    /// Maps an input level in dB through the transfer curve.
    fn transfer(&self, level_db: f32) -> f32 {
        match self.points.as_slice() {
            [] => level_db,
            [only] => level_db + (only.1 - only.0),
            points => {
                if level_db <= points[0].0 {
                    return points[0].1;
                }
                for pair in points.windows(2) {
                    let (x0, y0) = pair[0];
                    let (x1, y1) = pair[1];
                    if level_db <= x1 {
                        let t = (level_db - x0) / (x1 - x0).max(1e-6);
                        return y0 + (y1 - y0) * t;
                    }
                }
                points[points.len() - 1].1
            }
        }
    }
}

impl FilterNode for CompandNode {
    fn name(&self) -> &'static str {
        "compand"
    }

    fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        for (index, sample) in input.iter().enumerate() {
            let channel = index % self.channels;
            let level = sample.abs();
            let envelope = &mut self.envelope[channel];
            let coefficient = if level > *envelope {
                self.attack
            } else {
                self.release
            };
            *envelope = coefficient * *envelope + (1.0 - coefficient) * level;

            let level_db = ratio_to_db(envelope.max(1e-6));
            let gain_db = self.transfer(level_db) - level_db;
            out.push(sample * db_to_ratio(gain_db));
        }
    }

    fn reset(&mut self) {
        self.envelope.fill(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gain_scales_by_db() {
        let mut node = GainNode::new(6.0);
        let mut out = Vec::new();
        node.process(&[0.5], &mut out);
        assert!((out[0] - 0.5 * db_to_ratio(6.0)).abs() < 1e-6);
    }

    #[test]
    fn gate_mutes_below_threshold() {
        let mut node = GateNode::new(-20.0, 1, 48_000.0);
        let quiet = vec![0.001f32; 4800];
        let mut out = Vec::new();
        node.process(&quiet, &mut out);
        assert!(out.iter().skip(100).all(|s| *s == 0.0));

        let loud = vec![0.5f32; 4800];
        out.clear();
        node.process(&loud, &mut out);
        assert!(out.iter().skip(100).any(|s| *s != 0.0));
    }

    #[test]
    fn limiter_holds_ceiling() {
        let mut node = LimiterNode::new(-6.0, 1, 48_000.0);
        let hot = vec![0.9f32; 48_000];
        let mut out = Vec::new();
        node.process(&hot, &mut out);

        let ceiling = db_to_ratio(-6.0);
        // After the attack settles, output must sit at or near the ceiling.
        for sample in out.iter().skip(24_000) {
            assert!(sample.abs() <= ceiling * 1.2, "sample {sample} over ceiling");
        }
    }

    #[test]
    fn limiter_passes_quiet_signal() {
        let mut node = LimiterNode::new(-1.0, 2, 44_100.0);
        let quiet: Vec<f32> = (0..1000).map(|i| (i as f32 * 0.01).sin() * 0.1).collect();
        let mut out = Vec::new();
        node.process(&quiet, &mut out);
        for (a, b) in quiet.iter().zip(out.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn compressor_reduces_hot_signal() {
        let mut node = CompressorNode::new(-18.0, 4.0, 1.0, 50.0, 0.0, 1, 48_000.0);
        let hot = vec![0.8f32; 48_000];
        let mut out = Vec::new();
        node.process(&hot, &mut out);
        let settled = out[40_000].abs();
        assert!(settled < 0.8, "compressor must reduce level, got {settled}");
    }

    #[test]
    fn compand_follows_transfer_curve() {
        let node = CompandNode::new(vec![(-60.0, -40.0), (0.0, 0.0)], 1, 48_000.0);
        // Halfway between the points.
        let mapped = node.transfer(-30.0);
        assert!((mapped - (-20.0)).abs() < 1e-3);
    }

    #[test]
    fn auto_gain_lifts_quiet_frames() {
        let mut node = AutoGainNode::new(50.0, 3, 0.9, 1, 48_000.0);
        let quiet = vec![0.09f32; 48_000];
        let mut out = Vec::new();
        node.process(&quiet, &mut out);
        node.flush(&mut out);
        let tail_peak = out
            .iter()
            .skip(out.len().saturating_sub(4800))
            .fold(0.0f32, |acc, s| acc.max(s.abs()));
        assert!(tail_peak > 0.4, "auto gain should lift level, got {tail_peak}");
    }
}
