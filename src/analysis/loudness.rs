//! Loudness measurement (EBU R128 style).
//!
//! Implements the BS.1770 measurement chain: K-weighting (a high-shelf
//! pre-filter followed by an RLB high-pass, both recomputed for the
//! stream's sample rate), 400 ms blocks at 75 % overlap, an absolute
//! −70 LUFS gate followed by a relative −10 LU gate, and the derived
//! integrated/short-term/momentary values, loudness range, true peak and
//! a block-loudness histogram.

use crate::effects::biquad::{Biquad, BiquadCoeffs};
use crate::util::ToF32;

/// Block length in milliseconds (momentary window).
const BLOCK_MS: f64 = 400.0;

/// Overlap between successive blocks (75 %).
const BLOCK_OVERLAP: f64 = 0.75;

/// Absolute gate threshold in LUFS.
const ABSOLUTE_GATE_LUFS: f64 = -70.0;

/// Relative gate offset below the ungated mean, in LU.
const RELATIVE_GATE_LU: f64 = 10.0;

/// Number of histogram bins over [−70, 0] LUFS.
pub const HISTOGRAM_BINS: usize = 70;

/// Complete loudness measurement.
#[derive(Clone, Debug, PartialEq)]
pub struct LoudnessAnalysis {
    /// Gated integrated loudness in LUFS.
    pub integrated_lufs: f64,
    /// Loudness of the last 3 seconds in LUFS.
    pub short_term_lufs: f64,
    /// Loudness of the last 400 ms in LUFS.
    pub momentary_lufs: f64,
    /// Loudness range: 95th − 10th percentile of gated blocks, in LU.
    pub lra: f64,
    /// Maximum absolute sample value.
    pub true_peak: f32,
    /// True peak in dBFS.
    pub true_peak_db: f32,
    /// Histogram of block loudness over [−70, 0] LUFS.
    pub histogram: Vec<u32>,
}

impl Default for LoudnessAnalysis {
    fn default() -> Self {
        Self {
            integrated_lufs: f64::NEG_INFINITY,
            short_term_lufs: f64::NEG_INFINITY,
            momentary_lufs: f64::NEG_INFINITY,
            lra: 0.0,
            true_peak: 0.0,
            true_peak_db: crate::util::DB_FLOOR,
            histogram: vec![0; HISTOGRAM_BINS],
        }
    }
}

/// K-weighting filter pair for one channel.
struct KWeighting {
    shelf: Biquad,
    highpass: Biquad,
}

impl KWeighting {
    /// Builds the two-stage K-filter for a sample rate.
    ///
    /// Stage 1 models head diffraction (+4 dB shelf near 1.7 kHz),
    /// stage 2 is the RLB low-cut at 38 Hz.
    fn new(sample_rate: f32) -> Self {
        Self {
            shelf: Biquad::new(BiquadCoeffs::high_shelf(1681.97, 3.999, 1.0, sample_rate)),
            highpass: Biquad::new(BiquadCoeffs::highpass(38.135, 0.5003, sample_rate)),
        }
    }

    #[inline]
    fn process(&mut self, sample: f32) -> f32 {
        self.highpass.process(self.shelf.process(sample))
    }
}

/// Converts a mean-square energy to loudness in LUFS.
fn energy_to_lufs(energy: f64) -> f64 {
    if energy > 0.0 {
        -0.691 + 10.0 * energy.log10()
    } else {
        f64::NEG_INFINITY
    }
}

/// Measures loudness of an interleaved buffer.
///
/// All channels carry unity weight (the surround weighting of BS.1770
/// applies to channel layouts the player does not produce).
#[must_use]
pub fn analyze_loudness(samples: &[f32], channels: usize, sample_rate: u32) -> LoudnessAnalysis {
    let mut analysis = LoudnessAnalysis::default();
    if samples.is_empty() || channels == 0 || sample_rate == 0 {
        return analysis;
    }

    // True peak from the raw signal, before weighting.
    analysis.true_peak = samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
    analysis.true_peak_db = crate::util::ratio_to_db(analysis.true_peak);

    // K-weight every channel.
    let frames = samples.len() / channels;
    let mut weighted = vec![0.0f32; frames * channels];
    for channel in 0..channels {
        let mut filter = KWeighting::new(sample_rate.to_f32_lossy());
        for frame in 0..frames {
            let index = frame * channels + channel;
            weighted[index] = filter.process(samples[index]);
        }
    }

    // Block energies: sum of per-channel mean squares.
    let block_frames = ((BLOCK_MS / 1000.0) * f64::from(sample_rate)) as usize;
    let hop_frames = ((1.0 - BLOCK_OVERLAP) * block_frames as f64).max(1.0) as usize;
    if block_frames == 0 || frames < block_frames {
        return analysis;
    }

    let mut block_energies: Vec<f64> = Vec::new();
    let mut start = 0usize;
    while start + block_frames <= frames {
        let mut energy = 0.0f64;
        for frame in start..start + block_frames {
            for channel in 0..channels {
                let sample = f64::from(weighted[frame * channels + channel]);
                energy += sample * sample;
            }
        }
        block_energies.push(energy / block_frames as f64);
        start += hop_frames;
    }

    if block_energies.is_empty() {
        return analysis;
    }

    // Histogram over [−70, 0] LUFS.
    for energy in &block_energies {
        let lufs = energy_to_lufs(*energy);
        if lufs.is_finite() {
            let bin = ((lufs + 70.0).clamp(0.0, 69.999)) as usize;
            analysis.histogram[bin.min(HISTOGRAM_BINS - 1)] += 1;
        }
    }

    // Momentary: last block. Short-term: mean energy of the last 3 s of
    // blocks.
    analysis.momentary_lufs = energy_to_lufs(*block_energies.last().unwrap());
    let blocks_in_3s = ((3000.0 - BLOCK_MS) / (BLOCK_MS * (1.0 - BLOCK_OVERLAP))) as usize + 1;
    let tail = &block_energies[block_energies.len().saturating_sub(blocks_in_3s)..];
    analysis.short_term_lufs =
        energy_to_lufs(tail.iter().sum::<f64>() / tail.len() as f64);

    // Absolute gate.
    let absolute_gated: Vec<f64> = block_energies
        .iter()
        .copied()
        .filter(|energy| energy_to_lufs(*energy) >= ABSOLUTE_GATE_LUFS)
        .collect();
    if absolute_gated.is_empty() {
        return analysis;
    }

    // Relative gate at (mean of absolute-gated) − 10 LU.
    let mean_energy = absolute_gated.iter().sum::<f64>() / absolute_gated.len() as f64;
    let relative_threshold = energy_to_lufs(mean_energy) - RELATIVE_GATE_LU;
    let gated: Vec<f64> = absolute_gated
        .into_iter()
        .filter(|energy| energy_to_lufs(*energy) >= relative_threshold)
        .collect();
    if gated.is_empty() {
        return analysis;
    }

    analysis.integrated_lufs =
        energy_to_lufs(gated.iter().sum::<f64>() / gated.len() as f64);

    // LRA from the gated block loudness distribution.
    let mut loudness: Vec<f64> = gated.iter().map(|energy| energy_to_lufs(*energy)).collect();
    loudness.sort_by(|a, b| a.total_cmp(b));
    let percentile = |p: f64| {
        let index = ((loudness.len() - 1) as f64 * p).round() as usize;
        loudness[index]
    };
    analysis.lra = (percentile(0.95) - percentile(0.10)).max(0.0);

    analysis
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn stereo_tone(freq: f32, amplitude: f32, seconds: f32, rate: u32) -> Vec<f32> {
        let frames = (seconds * rate as f32) as usize;
        let mut samples = Vec::with_capacity(frames * 2);
        for i in 0..frames {
            let value = (2.0 * PI * freq * i as f32 / rate as f32).sin() * amplitude;
            samples.push(value);
            samples.push(value);
        }
        samples
    }

    #[test]
    fn reference_tone_measures_near_expected() {
        // A 997 Hz sine at amplitude 0.5 on both channels: per-channel
        // mean square 0.125, summed 0.25 → −0.691 − 6.02 ≈ −6.7 LUFS.
        // The K-filter is near unity at 1 kHz.
        let samples = stereo_tone(997.0, 0.5, 5.0, 48_000);
        let analysis = analyze_loudness(&samples, 2, 48_000);

        assert!(
            (analysis.integrated_lufs - (-6.7)).abs() < 1.5,
            "integrated {}",
            analysis.integrated_lufs
        );
        assert!((analysis.true_peak - 0.5).abs() < 0.01);
        // A steady tone has almost no loudness range.
        assert!(analysis.lra < 1.0, "lra {}", analysis.lra);
    }

    #[test]
    fn quieter_signal_measures_lower() {
        let loud = analyze_loudness(&stereo_tone(997.0, 0.5, 3.0, 48_000), 2, 48_000);
        let quiet = analyze_loudness(&stereo_tone(997.0, 0.05, 3.0, 48_000), 2, 48_000);
        let delta = loud.integrated_lufs - quiet.integrated_lufs;
        assert!((delta - 20.0).abs() < 1.0, "delta {delta}");
    }

    #[test]
    fn silence_gates_out() {
        let silence = vec![0.0f32; 48_000 * 4];
        let analysis = analyze_loudness(&silence, 2, 48_000);
        assert!(analysis.integrated_lufs.is_infinite());
    }

    #[test]
    fn rumble_is_attenuated_by_k_filter() {
        // 20 Hz rumble sits below the RLB high-pass corner.
        let rumble = analyze_loudness(&stereo_tone(20.0, 0.5, 3.0, 48_000), 2, 48_000);
        let tone = analyze_loudness(&stereo_tone(997.0, 0.5, 3.0, 48_000), 2, 48_000);
        assert!(
            tone.integrated_lufs > rumble.integrated_lufs + 6.0,
            "tone {} rumble {}",
            tone.integrated_lufs,
            rumble.integrated_lufs
        );
    }

    #[test]
    fn histogram_counts_blocks() {
        let samples = stereo_tone(997.0, 0.5, 4.0, 48_000);
        let analysis = analyze_loudness(&samples, 2, 48_000);
        let total: u32 = analysis.histogram.iter().sum();
        assert!(total > 0);
        // All blocks of a steady tone land in one or two bins.
        let occupied = analysis.histogram.iter().filter(|count| **count > 0).count();
        assert!(occupied <= 2, "occupied bins {occupied}");
    }
}
