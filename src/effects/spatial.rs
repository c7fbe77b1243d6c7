//! Spatial stages: stereo field manipulation and room simulation.
//!
//! Every node here requires at least two channels; the graph builder
//! silently skips them on mono input. Streams with more than two channels
//! are processed on the front pair, remaining channels pass through.
//!
//! Mid/side math is used throughout: `mid = (L+R)/2`, `side = (L−R)/2`.

use super::{
    biquad::{Biquad, BiquadCoeffs},
    delay_line::DelayLine,
    node::FilterNode,
};

/// Applies a closure to each L/R pair, passing extra channels through.
fn for_each_pair(
    input: &[f32],
    channels: usize,
    out: &mut Vec<f32>,
    mut f: impl FnMut(f32, f32) -> (f32, f32),
) {
    for frame in input.chunks(channels) {
        if frame.len() < 2 {
            out.extend_from_slice(frame);
            continue;
        }
        let (left, right) = f(frame[0], frame[1]);
        out.push(left);
        out.push(right);
        out.extend_from_slice(&frame[2..]);
    }
}

/// Center-channel attenuation via mid-level scaling.
pub struct VocalRemovalNode {
    strength: f32,
    channels: usize,
}

impl VocalRemovalNode {
    /// Creates the stage; `strength` 1.0 removes the center entirely.
    #[must_use]
    pub fn new(strength: f32, channels: usize) -> Self {
        Self {
            strength: strength.clamp(0.0, 1.0),
            channels,
        }
    }
}

impl FilterNode for VocalRemovalNode {
    fn name(&self) -> &'static str {
        "vocal-removal"
    }

    fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        let keep = 1.0 - self.strength;
        for_each_pair(input, self.channels, out, |left, right| {
            let mid = (left + right) * 0.5 * keep;
            let side = (left - right) * 0.5;
            (mid + side, mid - side)
        });
    }

    fn reset(&mut self) {}
}

/// Swaps the left and right channels.
pub struct ChannelSwapNode {
    channels: usize,
}

impl ChannelSwapNode {
    #[must_use]
    pub fn new(channels: usize) -> Self {
        Self { channels }
    }
}

impl FilterNode for ChannelSwapNode {
    fn name(&self) -> &'static str {
        "channel-swap"
    }

    fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        for_each_pair(input, self.channels, out, |left, right| (right, left));
    }

    fn reset(&mut self) {}
}

/// Left/right balance; −1 is hard left, +1 hard right.
pub struct BalanceNode {
    left_gain: f32,
    right_gain: f32,
    channels: usize,
}

impl BalanceNode {
    #[must_use]
    pub fn new(balance: f32, channels: usize) -> Self {
        let balance = balance.clamp(-1.0, 1.0);
        Self {
            left_gain: (1.0 - balance).min(1.0),
            right_gain: (1.0 + balance).min(1.0),
            channels,
        }
    }
}

impl FilterNode for BalanceNode {
    fn name(&self) -> &'static str {
        "balance"
    }

    fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        let (lg, rg) = (self.left_gain, self.right_gain);
        for_each_pair(input, self.channels, out, |left, right| {
            (left * lg, right * rg)
        });
    }

    fn reset(&mut self) {}
}

/// Stereo width scaling of the side signal.
pub struct StereoWidthNode {
    width: f32,
    channels: usize,
}

impl StereoWidthNode {
    #[must_use]
    pub fn new(width: f32, channels: usize) -> Self {
        Self {
            width: width.clamp(0.0, 4.0),
            channels,
        }
    }
}

impl FilterNode for StereoWidthNode {
    fn name(&self) -> &'static str {
        "stereo-width"
    }

    fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        let width = self.width;
        for_each_pair(input, self.channels, out, |left, right| {
            let mid = (left + right) * 0.5;
            let side = (left - right) * 0.5 * width;
            (mid + side, mid - side)
        });
    }

    fn reset(&mut self) {}
}

/// Collapses the pair to dual mono.
pub struct MonoNode {
    channels: usize,
}

impl MonoNode {
    #[must_use]
    pub fn new(channels: usize) -> Self {
        Self { channels }
    }
}

impl FilterNode for MonoNode {
    fn name(&self) -> &'static str {
        "mono"
    }

    fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        for_each_pair(input, self.channels, out, |left, right| {
            let mid = (left + right) * 0.5;
            (mid, mid)
        });
    }

    fn reset(&mut self) {}
}

/// Surround expansion: widened side signal with a short decorrelating
/// delay.
pub struct SurroundNode {
    strength: f32,
    channels: usize,
    delay: DelayLine,
}

impl SurroundNode {
    #[must_use]
    pub fn new(strength: f32, channels: usize, sample_rate: f32) -> Self {
        let delay_samples = (0.012 * sample_rate) as usize;
        Self {
            strength: strength.clamp(0.0, 1.0),
            channels,
            delay: DelayLine::new(delay_samples.max(16)),
        }
    }
}

impl FilterNode for SurroundNode {
    fn name(&self) -> &'static str {
        "surround"
    }

    fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        let strength = self.strength;
        let max_delay = (self.delay.capacity() - 1) as f32;
        for frame in input.chunks(self.channels) {
            if frame.len() < 2 {
                out.extend_from_slice(frame);
                continue;
            }
            let (left, right) = (frame[0], frame[1]);
            let mid = (left + right) * 0.5;
            let side = (left - right) * 0.5;

            let echo = self.delay.read(max_delay);
            self.delay.write(side);

            let wide = side * (1.0 + strength) + echo * strength * 0.5;
            out.push(mid + wide);
            out.push(mid - wide);
            out.extend_from_slice(&frame[2..]);
        }
    }

    fn reset(&mut self) {
        self.delay.clear();
    }
}

/// Headphone crossfeed: low-passed, attenuated opposite-channel bleed.
pub struct CrossfeedNode {
    strength: f32,
    channels: usize,
    lowpass_left: Biquad,
    lowpass_right: Biquad,
}

impl CrossfeedNode {
    #[must_use]
    pub fn new(strength: f32, channels: usize, sample_rate: f32) -> Self {
        let coeffs = BiquadCoeffs::lowpass(700.0, 0.707, sample_rate);
        Self {
            strength: strength.clamp(0.0, 1.0),
            channels,
            lowpass_left: Biquad::new(coeffs),
            lowpass_right: Biquad::new(coeffs),
        }
    }
}

impl FilterNode for CrossfeedNode {
    fn name(&self) -> &'static str {
        "crossfeed"
    }

    fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        let bleed = self.strength * 0.4;
        for frame in input.chunks(self.channels) {
            if frame.len() < 2 {
                out.extend_from_slice(frame);
                continue;
            }
            let (left, right) = (frame[0], frame[1]);
            let left_bleed = self.lowpass_left.process(right) * bleed;
            let right_bleed = self.lowpass_right.process(left) * bleed;
            let norm = 1.0 / (1.0 + bleed);
            out.push((left + left_bleed) * norm);
            out.push((right + right_bleed) * norm);
            out.extend_from_slice(&frame[2..]);
        }
    }

    fn reset(&mut self) {
        self.lowpass_left.clear();
        self.lowpass_right.clear();
    }
}

/// Bauer stereophonic-to-binaural: crossfeed with interaural delay.
pub struct Bs2bNode {
    channels: usize,
    lowpass_left: Biquad,
    lowpass_right: Biquad,
    delay_left: DelayLine,
    delay_right: DelayLine,
    delay_samples: f32,
}

impl Bs2bNode {
    /// Cross-channel level, −4.5 dB.
    const FEED: f32 = 0.595;

    #[must_use]
    pub fn new(channels: usize, sample_rate: f32) -> Self {
        let coeffs = BiquadCoeffs::lowpass(700.0, 0.707, sample_rate);
        // Interaural time difference around 260 µs.
        let delay_samples = 0.00026 * sample_rate;
        let capacity = (delay_samples as usize + 4).max(8);
        Self {
            channels,
            lowpass_left: Biquad::new(coeffs),
            lowpass_right: Biquad::new(coeffs),
            delay_left: DelayLine::new(capacity),
            delay_right: DelayLine::new(capacity),
            delay_samples,
        }
    }
}

impl FilterNode for Bs2bNode {
    fn name(&self) -> &'static str {
        "bs2b"
    }

    fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        let norm = 1.0 / (1.0 + Self::FEED);
        for frame in input.chunks(self.channels) {
            if frame.len() < 2 {
                out.extend_from_slice(frame);
                continue;
            }
            let (left, right) = (frame[0], frame[1]);

            self.delay_left.write(self.lowpass_left.process(right));
            self.delay_right.write(self.lowpass_right.process(left));
            let left_feed = self.delay_left.read(self.delay_samples);
            let right_feed = self.delay_right.read(self.delay_samples);

            out.push((left + left_feed * Self::FEED) * norm);
            out.push((right + right_feed * Self::FEED) * norm);
            out.extend_from_slice(&frame[2..]);
        }
    }

    fn reset(&mut self) {
        self.lowpass_left.clear();
        self.lowpass_right.clear();
        self.delay_left.clear();
        self.delay_right.clear();
    }
}

/// Haas-effect widening: one channel delayed by a few milliseconds.
pub struct HaasNode {
    channels: usize,
    delay: DelayLine,
    delay_samples: f32,
}

impl HaasNode {
    #[must_use]
    pub fn new(delay_ms: f32, channels: usize, sample_rate: f32) -> Self {
        let delay_samples = (delay_ms.clamp(1.0, 40.0) / 1000.0) * sample_rate;
        Self {
            channels,
            delay: DelayLine::new(delay_samples as usize + 4),
            delay_samples,
        }
    }
}

impl FilterNode for HaasNode {
    fn name(&self) -> &'static str {
        "haas"
    }

    fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        for frame in input.chunks(self.channels) {
            if frame.len() < 2 {
                out.extend_from_slice(frame);
                continue;
            }
            self.delay.write(frame[1]);
            out.push(frame[0]);
            out.push(self.delay.read(self.delay_samples));
            out.extend_from_slice(&frame[2..]);
        }
    }

    fn reset(&mut self) {
        self.delay.clear();
    }
}

/// Psychoacoustic bass: harmonics synthesized from the band below the
/// cutoff, mixed back above it.
pub struct VirtualBassNode {
    strength: f32,
    channels: usize,
    lowpass: Vec<Biquad>,
    highpass: Vec<Biquad>,
}

impl VirtualBassNode {
    #[must_use]
    pub fn new(cutoff: f32, strength: f32, channels: usize, sample_rate: f32) -> Self {
        let low = BiquadCoeffs::lowpass(cutoff, 0.707, sample_rate);
        let high = BiquadCoeffs::highpass(cutoff, 0.707, sample_rate);
        Self {
            strength: strength.clamp(0.0, 1.0),
            channels,
            lowpass: vec![Biquad::new(low); channels],
            highpass: vec![Biquad::new(high); channels],
        }
    }
}

impl FilterNode for VirtualBassNode {
    fn name(&self) -> &'static str {
        "virtual-bass"
    }

    fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        for (index, sample) in input.iter().enumerate() {
            let channel = index % self.channels;
            let low = self.lowpass[channel].process(*sample);
            // Even-harmonic generator: |x|·x doubles the fundamental.
            let harmonics = self.highpass[channel].process(low.abs() * low * 4.0);
            out.push(sample + harmonics * self.strength);
        }
    }

    fn reset(&mut self) {
        for filter in self.lowpass.iter_mut().chain(self.highpass.iter_mut()) {
            filter.clear();
        }
    }
}

/// Multi-tap echo reverb.
///
/// Four feedback combs per channel with staggered delays; `level` sets
/// both the wet mix and the decay.
pub struct ReverbNode {
    level: f32,
    channels: usize,
    /// `combs[channel][tap]`
    combs: Vec<Vec<DelayLine>>,
    decays: [f32; 4],
    delays: [usize; 4],
}

impl ReverbNode {
    /// Comb delays in milliseconds, mutually prime-ish to avoid flutter.
    const DELAYS_MS: [f32; 4] = [29.7, 37.1, 41.1, 43.7];

    #[must_use]
    pub fn new(level: f32, channels: usize, sample_rate: f32) -> Self {
        let level = level.clamp(0.0, 1.0);
        let mut delays = [0usize; 4];
        let mut combs = Vec::with_capacity(channels);
        for (slot, ms) in delays.iter_mut().zip(Self::DELAYS_MS) {
            *slot = ((ms / 1000.0) * sample_rate) as usize;
        }
        for _ in 0..channels {
            combs.push(delays.iter().map(|d| DelayLine::new(d + 1)).collect());
        }
        let decay = 0.35 + 0.45 * level;
        Self {
            level,
            channels,
            combs,
            decays: [decay, decay * 0.94, decay * 0.88, decay * 0.82],
            delays,
        }
    }
}

impl FilterNode for ReverbNode {
    fn name(&self) -> &'static str {
        "reverb"
    }

    fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        let wet_mix = self.level * 0.5;
        let dry_mix = 1.0 - wet_mix * 0.5;
        for (index, sample) in input.iter().enumerate() {
            let channel = index % self.channels;
            let mut wet = 0.0;
            for (tap, comb) in self.combs[channel].iter_mut().enumerate() {
                let delayed = comb.read((self.delays[tap] - 1) as f32);
                comb.write(sample + delayed * self.decays[tap]);
                wet += delayed;
            }
            out.push(sample * dry_mix + wet * 0.25 * wet_mix);
        }
    }

    fn reset(&mut self) {
        for channel in &mut self.combs {
            for comb in channel {
                comb.clear();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_vocal_removal_cancels_center() {
        let mut node = VocalRemovalNode::new(1.0, 2);
        // Pure center content: identical on both channels.
        let input = [0.5, 0.5, -0.3, -0.3];
        let mut out = Vec::new();
        node.process(&input, &mut out);
        assert!(out.iter().all(|s| s.abs() < 1e-6));
    }

    #[test]
    fn vocal_removal_keeps_sides() {
        let mut node = VocalRemovalNode::new(1.0, 2);
        // Pure side content: opposite on both channels.
        let input = [0.5, -0.5];
        let mut out = Vec::new();
        node.process(&input, &mut out);
        assert!((out[0] - 0.5).abs() < 1e-6);
        assert!((out[1] + 0.5).abs() < 1e-6);
    }

    #[test]
    fn swap_exchanges_channels() {
        let mut node = ChannelSwapNode::new(2);
        let mut out = Vec::new();
        node.process(&[0.1, 0.9], &mut out);
        assert_eq!(out, vec![0.9, 0.1]);
    }

    #[test]
    fn width_zero_collapses_to_mid() {
        let mut node = StereoWidthNode::new(0.0, 2);
        let mut out = Vec::new();
        node.process(&[1.0, 0.0], &mut out);
        assert!((out[0] - 0.5).abs() < 1e-6);
        assert!((out[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn balance_attenuates_one_side() {
        let mut node = BalanceNode::new(1.0, 2);
        let mut out = Vec::new();
        node.process(&[0.8, 0.8], &mut out);
        assert!(out[0].abs() < 1e-6);
        assert!((out[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn mono_makes_channels_equal() {
        let mut node = MonoNode::new(2);
        let mut out = Vec::new();
        node.process(&[0.2, 0.6], &mut out);
        assert_eq!(out[0], out[1]);
    }

    #[test]
    fn reverb_produces_tail_energy() {
        let rate = 48_000.0;
        let mut node = ReverbNode::new(0.8, 1, rate);
        let mut impulse = vec![0.0f32; 9600];
        impulse[0] = 1.0;
        let mut out = Vec::new();
        node.process(&impulse, &mut out);

        // Energy must appear after the first comb delay (~29.7 ms).
        let tail: f32 = out[1500..].iter().map(|s| s.abs()).sum();
        assert!(tail > 0.01, "reverb tail missing, sum {tail}");
    }
}
