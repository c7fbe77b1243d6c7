//! Spectral shape analysis.
//!
//! A single 4096-point windowed FFT over a centered slice yields the
//! spectral centroid, 85 % rolloff, three-band energy ratios, spectral
//! flatness and the strongest spectral peaks.

use std::f32::consts::PI;

use rustfft::{num_complex::Complex, FftPlanner};

use crate::util::ToF32;

/// Analysis FFT size.
const FFT_SIZE: usize = 4096;

/// Rolloff energy fraction.
const ROLLOFF_FRACTION: f32 = 0.85;

/// Low/mid band split in Hz.
const LOW_SPLIT_HZ: f32 = 300.0;

/// Mid/high band split in Hz.
const HIGH_SPLIT_HZ: f32 = 4000.0;

/// Number of reported spectral peaks.
const PEAK_COUNT: usize = 5;

/// One reported spectral peak.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpectralPeak {
    /// Peak frequency in Hz.
    pub frequency: f32,
    /// Peak magnitude, linear.
    pub magnitude: f32,
}

/// Spectral shape measurement.
#[derive(Clone, Debug, PartialEq)]
pub struct SpectralAnalysis {
    /// Amplitude-weighted mean frequency in Hz.
    pub centroid: f32,
    /// Frequency below which 85 % of the energy lies, in Hz.
    pub rolloff: f32,
    /// Energy fraction below 300 Hz.
    pub low_ratio: f32,
    /// Energy fraction between 300 Hz and 4 kHz.
    pub mid_ratio: f32,
    /// Energy fraction above 4 kHz.
    pub high_ratio: f32,
    /// Geometric over arithmetic mean of the magnitude spectrum.
    pub flatness: f32,
    /// Strongest spectral peaks, descending by magnitude.
    pub peaks: Vec<SpectralPeak>,
}

/// Analyzes the spectral shape of a mono buffer.
///
/// Returns `None` when the buffer is shorter than one FFT frame.
#[must_use]
pub fn analyze_spectrum(samples: &[f32], sample_rate: u32) -> Option<SpectralAnalysis> {
    if samples.len() < FFT_SIZE || sample_rate == 0 {
        return None;
    }

    let start = (samples.len() - FFT_SIZE) / 2;
    let slice = &samples[start..start + FFT_SIZE];

    let mut scratch: Vec<Complex<f32>> = slice
        .iter()
        .enumerate()
        .map(|(i, sample)| {
            let window = 0.5 * (1.0 - (2.0 * PI * i as f32 / FFT_SIZE as f32).cos());
            Complex::new(sample * window, 0.0)
        })
        .collect();
    FftPlanner::new().plan_fft_forward(FFT_SIZE).process(&mut scratch);

    let half = FFT_SIZE / 2;
    let bin_hz = sample_rate.to_f32_lossy() / FFT_SIZE.to_f32_lossy();
    let magnitudes: Vec<f32> = scratch[..half].iter().map(|bin| bin.norm()).collect();

    let total_energy: f32 = magnitudes.iter().map(|m| m * m).sum();
    if total_energy <= 1e-12 {
        return None;
    }

    // Centroid.
    let weighted: f32 = magnitudes
        .iter()
        .enumerate()
        .map(|(bin, magnitude)| bin.to_f32_lossy() * bin_hz * magnitude)
        .sum();
    let magnitude_sum: f32 = magnitudes.iter().sum();
    let centroid = weighted / magnitude_sum.max(1e-12);

    // Rolloff.
    let mut cumulative = 0.0f32;
    let mut rolloff = bin_hz * half.to_f32_lossy();
    for (bin, magnitude) in magnitudes.iter().enumerate() {
        cumulative += magnitude * magnitude;
        if cumulative >= total_energy * ROLLOFF_FRACTION {
            rolloff = bin.to_f32_lossy() * bin_hz;
            break;
        }
    }

    // Tri-band energy ratios.
    let mut low = 0.0f32;
    let mut mid = 0.0f32;
    let mut high = 0.0f32;
    for (bin, magnitude) in magnitudes.iter().enumerate() {
        let freq = bin.to_f32_lossy() * bin_hz;
        let energy = magnitude * magnitude;
        if freq < LOW_SPLIT_HZ {
            low += energy;
        } else if freq < HIGH_SPLIT_HZ {
            mid += energy;
        } else {
            high += energy;
        }
    }

    // Flatness: geometric mean over arithmetic mean of magnitudes.
    let log_sum: f32 = magnitudes.iter().map(|m| (m + 1e-12).ln()).sum();
    let geometric_mean = (log_sum / half.to_f32_lossy()).exp();
    let arithmetic_mean = magnitude_sum / half.to_f32_lossy();
    let flatness = (geometric_mean / arithmetic_mean.max(1e-12)).clamp(0.0, 1.0);

    // Top local-maximum peaks.
    let mut candidates: Vec<SpectralPeak> = (1..half - 1)
        .filter(|bin| {
            magnitudes[*bin] > magnitudes[bin - 1] && magnitudes[*bin] >= magnitudes[bin + 1]
        })
        .map(|bin| SpectralPeak {
            frequency: bin.to_f32_lossy() * bin_hz,
            magnitude: magnitudes[bin],
        })
        .collect();
    candidates.sort_by(|a, b| b.magnitude.total_cmp(&a.magnitude));
    candidates.truncate(PEAK_COUNT);

    Some(SpectralAnalysis {
        centroid,
        rolloff,
        low_ratio: low / total_energy,
        mid_ratio: mid / total_energy,
        high_ratio: high / total_energy,
        flatness,
        peaks: candidates,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(freq: f32, rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * PI * freq * i as f32 / rate as f32).sin() * 0.5)
            .collect()
    }

    #[test]
    fn sine_centroid_is_near_its_frequency() {
        let analysis = analyze_spectrum(&tone(1000.0, 48_000, 8192), 48_000).unwrap();
        assert!(
            (analysis.centroid - 1000.0).abs() < 150.0,
            "centroid {}",
            analysis.centroid
        );
        assert!(analysis.mid_ratio > 0.9, "mid ratio {}", analysis.mid_ratio);
        assert!(!analysis.peaks.is_empty());
        assert!((analysis.peaks[0].frequency - 1000.0).abs() < 50.0);
    }

    #[test]
    fn bass_tone_lands_in_low_band() {
        let analysis = analyze_spectrum(&tone(80.0, 48_000, 8192), 48_000).unwrap();
        assert!(analysis.low_ratio > 0.8, "low ratio {}", analysis.low_ratio);
        assert!(analysis.rolloff < 500.0, "rolloff {}", analysis.rolloff);
    }

    #[test]
    fn noise_is_flatter_than_tone() {
        fastrand::seed(3);
        let noise: Vec<f32> = (0..8192).map(|_| fastrand::f32() * 2.0 - 1.0).collect();
        let noise_analysis = analyze_spectrum(&noise, 48_000).unwrap();
        let tone_analysis = analyze_spectrum(&tone(1000.0, 48_000, 8192), 48_000).unwrap();
        assert!(
            noise_analysis.flatness > tone_analysis.flatness * 5.0,
            "noise {} tone {}",
            noise_analysis.flatness,
            tone_analysis.flatness
        );
    }

    #[test]
    fn ratios_sum_to_one() {
        let analysis = analyze_spectrum(&tone(500.0, 44_100, 8192), 44_100).unwrap();
        let sum = analysis.low_ratio + analysis.mid_ratio + analysis.high_ratio;
        assert!((sum - 1.0).abs() < 1e-3, "sum {sum}");
    }
}
