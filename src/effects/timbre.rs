//! Timbre stages: exciter, soft clipping, dialogue enhancement.

use std::f32::consts::FRAC_PI_2;

use super::{
    biquad::{Biquad, BiquadCoeffs},
    node::FilterNode,
};
use crate::effects::params::SoftClipKind;

/// Harmonic exciter: high band distorted and mixed back in.
pub struct ExciterNode {
    amount: f32,
    channels: usize,
    highpass: Vec<Biquad>,
}

impl ExciterNode {
    #[must_use]
    pub fn new(amount: f32, start_freq: f32, channels: usize, sample_rate: f32) -> Self {
        let coeffs = BiquadCoeffs::highpass(start_freq, 0.707, sample_rate);
        Self {
            amount: amount.clamp(0.0, 1.0),
            channels,
            highpass: vec![Biquad::new(coeffs); channels],
        }
    }
}

impl FilterNode for ExciterNode {
    fn name(&self) -> &'static str {
        "exciter"
    }

    fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        for (index, sample) in input.iter().enumerate() {
            let high = self.highpass[index % self.channels].process(*sample);
            // Soft saturation of the high band generates the sparkle.
            let excited = (high * 3.0).tanh();
            out.push(sample + excited * self.amount * 0.4);
        }
    }

    fn reset(&mut self) {
        for filter in &mut self.highpass {
            filter.clear();
        }
    }
}

/// Soft clipper with selectable transfer curve.
pub struct SoftClipNode {
    kind: SoftClipKind,
}

impl SoftClipNode {
    #[must_use]
    pub fn new(kind: SoftClipKind) -> Self {
        Self { kind }
    }

    /// The waveshaping transfer function.
    #[inline]
    fn shape(&self, x: f32) -> f32 {
        match self.kind {
            SoftClipKind::Tanh => x.tanh(),
            SoftClipKind::Atan => x.atan() / FRAC_PI_2,
            SoftClipKind::Cubic => {
                let x = x.clamp(-1.5, 1.5);
                x - x * x * x / 6.75
            }
            SoftClipKind::Hard => x.clamp(-1.0, 1.0),
        }
    }
}

impl FilterNode for SoftClipNode {
    fn name(&self) -> &'static str {
        "soft-clip"
    }

    fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        out.extend(input.iter().map(|sample| self.shape(*sample)));
    }

    fn reset(&mut self) {}
}

/// Dialogue enhancement: boosts the extracted center where speech lives.
///
/// Stereo only; the graph builder gates it.
pub struct DialogueEnhanceNode {
    original: f32,
    enhance: f32,
    channels: usize,
    /// Speech-band filter applied to the extracted center.
    band: Biquad,
}

impl DialogueEnhanceNode {
    #[must_use]
    pub fn new(original: f32, enhance: f32, channels: usize, sample_rate: f32) -> Self {
        Self {
            original: original.clamp(0.0, 2.0),
            enhance: enhance.clamp(0.0, 4.0),
            channels,
            band: Biquad::new(BiquadCoeffs::bandpass(1500.0, 0.6, sample_rate)),
        }
    }
}

impl FilterNode for DialogueEnhanceNode {
    fn name(&self) -> &'static str {
        "dialogue-enhance"
    }

    fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        for frame in input.chunks(self.channels) {
            if frame.len() < 2 {
                out.extend_from_slice(frame);
                continue;
            }
            let mid = (frame[0] + frame[1]) * 0.5;
            let speech = self.band.process(mid) * self.enhance * 0.5;
            out.push(frame[0] * self.original + speech);
            out.push(frame[1] * self.original + speech);
            out.extend_from_slice(&frame[2..]);
        }
    }

    fn reset(&mut self) {
        self.band.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn soft_clip_bounds_output() {
        for kind in [
            SoftClipKind::Tanh,
            SoftClipKind::Atan,
            SoftClipKind::Cubic,
            SoftClipKind::Hard,
        ] {
            let mut node = SoftClipNode::new(kind);
            let hot = [3.0f32, -3.0, 0.0, 0.5];
            let mut out = Vec::new();
            node.process(&hot, &mut out);
            for sample in &out {
                assert!(sample.abs() <= 1.01, "{kind:?} exceeded bounds: {sample}");
            }
            // Small signals stay roughly linear.
            assert!(out[3] > 0.3 && out[3] <= 0.5 + 1e-6);
        }
    }

    #[test]
    fn clip_is_monotonic() {
        let node = SoftClipNode::new(SoftClipKind::Tanh);
        let mut prev = f32::NEG_INFINITY;
        for i in -100..=100 {
            let y = node.shape(i as f32 * 0.05);
            assert!(y >= prev);
            prev = y;
        }
    }

    #[test]
    fn exciter_adds_high_content() {
        let rate = 48_000.0;
        let mut node = ExciterNode::new(1.0, 2000.0, 1, rate);
        let tone: Vec<f32> = (0..9600)
            .map(|i| (2.0 * std::f32::consts::PI * 4000.0 * i as f32 / rate).sin() * 0.5)
            .collect();
        let mut out = Vec::new();
        node.process(&tone, &mut out);
        let diff: f32 = tone
            .iter()
            .zip(out.iter())
            .map(|(a, b)| (a - b).abs())
            .sum();
        assert!(diff > 1.0, "exciter should alter the high band");
    }
}
