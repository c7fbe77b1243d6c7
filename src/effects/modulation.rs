//! Modulation and character stages: chorus, flanger, tremolo, vibrato,
//! bit crusher.
//!
//! All modulated delays use fractional reads; the LFOs advance once per
//! frame so channels stay phase-coherent.

use super::{delay_line::DelayLine, lfo::Lfo, node::FilterNode};

/// Classic chorus with one modulated voice per channel.
pub struct ChorusNode {
    depth: f32,
    channels: usize,
    lfo: Lfo,
    delays: Vec<DelayLine>,
    base_samples: f32,
    mod_samples: f32,
}

impl ChorusNode {
    const BASE_DELAY_MS: f32 = 15.0;
    const MOD_DEPTH_MS: f32 = 5.0;

    #[must_use]
    pub fn new(rate_hz: f32, depth: f32, channels: usize, sample_rate: f32) -> Self {
        let base_samples = Self::BASE_DELAY_MS / 1000.0 * sample_rate;
        let mod_samples = Self::MOD_DEPTH_MS / 1000.0 * sample_rate;
        let capacity = (base_samples + mod_samples) as usize + 4;
        Self {
            depth: depth.clamp(0.0, 1.0),
            channels,
            lfo: Lfo::new(rate_hz.clamp(0.05, 10.0), sample_rate, 0.0),
            delays: vec![DelayLine::new(capacity); channels],
            base_samples,
            mod_samples,
        }
    }
}

impl FilterNode for ChorusNode {
    fn name(&self) -> &'static str {
        "chorus"
    }

    fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        for frame in input.chunks(self.channels) {
            let modulation = self.lfo.advance();
            let delay = self.base_samples + modulation * self.depth * self.mod_samples;
            for (channel, sample) in frame.iter().enumerate() {
                let line = &mut self.delays[channel];
                line.write(*sample);
                let wet = line.read(delay);
                out.push(sample * 0.7 + wet * 0.5);
            }
        }
    }

    fn reset(&mut self) {
        self.lfo.reset();
        for line in &mut self.delays {
            line.clear();
        }
    }
}

/// Flanger: short modulated delay with feedback.
pub struct FlangerNode {
    depth: f32,
    channels: usize,
    lfo: Lfo,
    delays: Vec<DelayLine>,
    feedback: Vec<f32>,
    base_samples: f32,
    mod_samples: f32,
}

impl FlangerNode {
    const BASE_DELAY_MS: f32 = 2.5;
    const MOD_DEPTH_MS: f32 = 2.0;
    const FEEDBACK: f32 = 0.5;

    #[must_use]
    pub fn new(rate_hz: f32, depth: f32, channels: usize, sample_rate: f32) -> Self {
        let base_samples = Self::BASE_DELAY_MS / 1000.0 * sample_rate;
        let mod_samples = Self::MOD_DEPTH_MS / 1000.0 * sample_rate;
        let capacity = (base_samples + mod_samples) as usize + 4;
        Self {
            depth: depth.clamp(0.0, 1.0),
            channels,
            lfo: Lfo::new(rate_hz.clamp(0.05, 5.0), sample_rate, 0.0),
            delays: vec![DelayLine::new(capacity); channels],
            feedback: vec![0.0; channels],
            base_samples,
            mod_samples,
        }
    }
}

impl FilterNode for FlangerNode {
    fn name(&self) -> &'static str {
        "flanger"
    }

    fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        for frame in input.chunks(self.channels) {
            let modulation = self.lfo.advance();
            let delay =
                self.base_samples + (modulation * 0.5 + 0.5) * self.depth * self.mod_samples;
            for (channel, sample) in frame.iter().enumerate() {
                let line = &mut self.delays[channel];
                line.write(sample + self.feedback[channel] * Self::FEEDBACK);
                let wet = line.read(delay);
                self.feedback[channel] = wet;
                out.push((sample + wet) * 0.6);
            }
        }
    }

    fn reset(&mut self) {
        self.lfo.reset();
        self.feedback.fill(0.0);
        for line in &mut self.delays {
            line.clear();
        }
    }
}

/// Tremolo: amplitude modulation.
pub struct TremoloNode {
    depth: f32,
    channels: usize,
    lfo: Lfo,
}

impl TremoloNode {
    #[must_use]
    pub fn new(rate_hz: f32, depth: f32, channels: usize, sample_rate: f32) -> Self {
        Self {
            depth: depth.clamp(0.0, 1.0),
            channels,
            lfo: Lfo::new(rate_hz.clamp(0.1, 20.0), sample_rate, 0.0),
        }
    }
}

impl FilterNode for TremoloNode {
    fn name(&self) -> &'static str {
        "tremolo"
    }

    fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        for frame in input.chunks(self.channels) {
            let modulation = self.lfo.advance();
            // Unipolar gain in [1-depth, 1].
            let gain = 1.0 - self.depth * (modulation * 0.5 + 0.5);
            for sample in frame {
                out.push(sample * gain);
            }
        }
    }

    fn reset(&mut self) {
        self.lfo.reset();
    }
}

/// Vibrato: pitch wobble from a modulated delay with no dry mix.
pub struct VibratoNode {
    depth: f32,
    channels: usize,
    lfo: Lfo,
    delays: Vec<DelayLine>,
    base_samples: f32,
    mod_samples: f32,
}

impl VibratoNode {
    const BASE_DELAY_MS: f32 = 5.0;
    const MOD_DEPTH_MS: f32 = 3.0;

    #[must_use]
    pub fn new(rate_hz: f32, depth: f32, channels: usize, sample_rate: f32) -> Self {
        let base_samples = Self::BASE_DELAY_MS / 1000.0 * sample_rate;
        let mod_samples = Self::MOD_DEPTH_MS / 1000.0 * sample_rate;
        let capacity = (base_samples + mod_samples) as usize + 4;
        Self {
            depth: depth.clamp(0.0, 1.0),
            channels,
            lfo: Lfo::new(rate_hz.clamp(0.1, 14.0), sample_rate, 0.0),
            delays: vec![DelayLine::new(capacity); channels],
            base_samples,
            mod_samples,
        }
    }
}

impl FilterNode for VibratoNode {
    fn name(&self) -> &'static str {
        "vibrato"
    }

    fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        for frame in input.chunks(self.channels) {
            let modulation = self.lfo.advance();
            let delay = self.base_samples + modulation * self.depth * self.mod_samples;
            for (channel, sample) in frame.iter().enumerate() {
                let line = &mut self.delays[channel];
                line.write(*sample);
                out.push(line.read(delay));
            }
        }
    }

    fn reset(&mut self) {
        self.lfo.reset();
        for line in &mut self.delays {
            line.clear();
        }
    }
}

/// Bit crusher: amplitude quantization to an effective bit depth.
pub struct CrusherNode {
    levels: f32,
}

impl CrusherNode {
    #[must_use]
    pub fn new(bits: u32) -> Self {
        let bits = bits.clamp(1, 16);
        Self {
            levels: (1u32 << bits) as f32 * 0.5,
        }
    }
}

impl FilterNode for CrusherNode {
    fn name(&self) -> &'static str {
        "crusher"
    }

    fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        let levels = self.levels;
        out.extend(
            input
                .iter()
                .map(|sample| (sample * levels).round() / levels),
        );
    }

    fn reset(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tremolo_modulates_amplitude() {
        let mut node = TremoloNode::new(10.0, 1.0, 1, 1000.0);
        let input = vec![1.0f32; 200];
        let mut out = Vec::new();
        node.process(&input, &mut out);

        let min = out.iter().copied().fold(f32::MAX, f32::min);
        let max = out.iter().copied().fold(f32::MIN, f32::max);
        assert!(max > 0.9);
        assert!(min < 0.2, "full depth should dip deeply, min {min}");
    }

    #[test]
    fn crusher_quantizes() {
        let mut node = CrusherNode::new(2);
        let input = [0.1f32, 0.3, 0.6, 0.9];
        let mut out = Vec::new();
        node.process(&input, &mut out);
        // 2-bit: steps of 0.5.
        for sample in &out {
            let scaled = sample * 2.0;
            assert!((scaled - scaled.round()).abs() < 1e-6);
        }
    }

    #[test]
    fn vibrato_preserves_energy_roughly() {
        let rate = 48_000.0;
        let mut node = VibratoNode::new(5.0, 0.5, 1, rate);
        let tone: Vec<f32> = (0..9600)
            .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / rate).sin())
            .collect();
        let mut out = Vec::new();
        node.process(&tone, &mut out);

        let rms = |buf: &[f32]| {
            (buf.iter().map(|s| s * s).sum::<f32>() / buf.len() as f32).sqrt()
        };
        let ratio = rms(&out[4800..]) / rms(&tone);
        assert!((0.7..1.3).contains(&ratio), "vibrato energy ratio {ratio}");
    }
}
