//! Frequency-shaping stages: shelves, sub boost, band filters.

use crate::util::db_to_ratio;

use super::{
    biquad::{Biquad, BiquadCoeffs},
    node::FilterNode,
};

/// Which end of the spectrum a shelf shapes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ShelfKind {
    /// Bass shelf below the corner frequency.
    Low,
    /// Treble shelf above the corner frequency.
    High,
}

/// Bass or treble shelving filter.
pub struct ShelfNode {
    kind: ShelfKind,
    channels: usize,
    filters: Vec<Biquad>,
}

impl ShelfNode {
    /// Creates a shelf with the given gain, corner and slope.
    #[must_use]
    pub fn new(
        kind: ShelfKind,
        gain_db: f32,
        frequency: f32,
        width: f32,
        channels: usize,
        sample_rate: f32,
    ) -> Self {
        let coeffs = match kind {
            ShelfKind::Low => BiquadCoeffs::low_shelf(frequency, gain_db, width, sample_rate),
            ShelfKind::High => BiquadCoeffs::high_shelf(frequency, gain_db, width, sample_rate),
        };
        Self {
            kind,
            channels,
            filters: vec![Biquad::new(coeffs); channels],
        }
    }
}

impl FilterNode for ShelfNode {
    fn name(&self) -> &'static str {
        match self.kind {
            ShelfKind::Low => "bass",
            ShelfKind::High => "treble",
        }
    }

    fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        for (index, sample) in input.iter().enumerate() {
            out.push(self.filters[index % self.channels].process(*sample));
        }
    }

    fn reset(&mut self) {
        for filter in &mut self.filters {
            filter.clear();
        }
    }
}

/// Sub-bass boost: the band below the cutoff is extracted and mixed back
/// with gain.
pub struct SubBoostNode {
    gain: f32,
    channels: usize,
    lowpass: Vec<Biquad>,
}

impl SubBoostNode {
    #[must_use]
    pub fn new(gain_db: f32, cutoff: f32, channels: usize, sample_rate: f32) -> Self {
        let coeffs = BiquadCoeffs::lowpass(cutoff, 0.707, sample_rate);
        Self {
            gain: db_to_ratio(gain_db) - 1.0,
            channels,
            lowpass: vec![Biquad::new(coeffs); channels],
        }
    }
}

impl FilterNode for SubBoostNode {
    fn name(&self) -> &'static str {
        "subboost"
    }

    fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        for (index, sample) in input.iter().enumerate() {
            let low = self.lowpass[index % self.channels].process(*sample);
            out.push(sample + low * self.gain);
        }
    }

    fn reset(&mut self) {
        for filter in &mut self.lowpass {
            filter.clear();
        }
    }
}

/// Band-pass stage.
pub struct BandpassNode {
    channels: usize,
    filters: Vec<Biquad>,
}

impl BandpassNode {
    #[must_use]
    pub fn new(frequency: f32, width: f32, channels: usize, sample_rate: f32) -> Self {
        let q = (frequency / width.max(1.0)).clamp(0.1, 20.0);
        let coeffs = BiquadCoeffs::bandpass(frequency, q, sample_rate);
        Self {
            channels,
            filters: vec![Biquad::new(coeffs); channels],
        }
    }
}

impl FilterNode for BandpassNode {
    fn name(&self) -> &'static str {
        "bandpass"
    }

    fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        for (index, sample) in input.iter().enumerate() {
            out.push(self.filters[index % self.channels].process(*sample));
        }
    }

    fn reset(&mut self) {
        for filter in &mut self.filters {
            filter.clear();
        }
    }
}

/// Band-reject (notch) stage.
pub struct BandrejectNode {
    channels: usize,
    filters: Vec<Biquad>,
}

impl BandrejectNode {
    #[must_use]
    pub fn new(frequency: f32, width: f32, channels: usize, sample_rate: f32) -> Self {
        let q = (frequency / width.max(1.0)).clamp(0.1, 20.0);
        let coeffs = BiquadCoeffs::notch(frequency, q, sample_rate);
        Self {
            channels,
            filters: vec![Biquad::new(coeffs); channels],
        }
    }
}

impl FilterNode for BandrejectNode {
    fn name(&self) -> &'static str {
        "bandreject"
    }

    fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        for (index, sample) in input.iter().enumerate() {
            out.push(self.filters[index % self.channels].process(*sample));
        }
    }

    fn reset(&mut self) {
        for filter in &mut self.filters {
            filter.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn tone(freq: f32, rate: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * PI * freq * i as f32 / rate).sin())
            .collect()
    }

    fn rms(buf: &[f32]) -> f32 {
        (buf.iter().map(|s| s * s).sum::<f32>() / buf.len() as f32).sqrt()
    }

    #[test]
    fn bass_shelf_boosts_lows_not_highs() {
        let rate = 48_000.0;
        let mut node = ShelfNode::new(ShelfKind::Low, 9.0, 150.0, 0.5, 1, rate);

        let low = tone(50.0, rate, 9600);
        let mut out = Vec::new();
        node.process(&low, &mut out);
        assert!(rms(&out[4800..]) > rms(&low) * 1.5);

        node.reset();
        let high = tone(5000.0, rate, 9600);
        out.clear();
        node.process(&high, &mut out);
        let ratio = rms(&out[4800..]) / rms(&high);
        assert!((0.8..1.2).contains(&ratio), "highs changed by {ratio}");
    }

    #[test]
    fn bandpass_keeps_center_rejects_far() {
        let rate = 48_000.0;
        let mut node = BandpassNode::new(1000.0, 500.0, 1, rate);

        let center = tone(1000.0, rate, 9600);
        let mut out = Vec::new();
        node.process(&center, &mut out);
        assert!(rms(&out[4800..]) > rms(&center) * 0.5);

        node.reset();
        let far = tone(8000.0, rate, 9600);
        out.clear();
        node.process(&far, &mut out);
        assert!(rms(&out[4800..]) < rms(&far) * 0.3);
    }

    #[test]
    fn bandreject_notches_center() {
        let rate = 48_000.0;
        let mut node = BandrejectNode::new(1000.0, 200.0, 1, rate);
        let center = tone(1000.0, rate, 48_000);
        let mut out = Vec::new();
        node.process(&center, &mut out);
        assert!(rms(&out[24_000..]) < rms(&center) * 0.2);
    }
}
