//! Level-domain analyses: peak, clipping, silence, dynamic range.
//!
//! All functions take a mono f32 buffer; stereo callers downmix first
//! (clipping detection on a downmix slightly underestimates, which is
//! acceptable for reporting).

use crate::util::{ratio_to_db, ToF32};

/// Amplitude at or above which a sample counts as clipped.
pub const CLIPPING_THRESHOLD: f32 = 0.99;

/// Peak scan result.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PeakAnalysis {
    /// Maximum absolute sample value.
    pub peak: f32,
    /// Index of the maximum sample.
    pub peak_index: usize,
    /// Peak level in dBFS.
    pub peak_dbfs: f32,
    /// Samples at or above the clipping threshold.
    pub clipped_samples: usize,
}

/// Linear scan for the absolute peak.
#[must_use]
pub fn analyze_peak(samples: &[f32]) -> PeakAnalysis {
    let mut analysis = PeakAnalysis {
        peak_dbfs: ratio_to_db(0.0),
        ..PeakAnalysis::default()
    };

    for (index, sample) in samples.iter().enumerate() {
        let magnitude = sample.abs();
        if magnitude > analysis.peak {
            analysis.peak = magnitude;
            analysis.peak_index = index;
        }
        if magnitude >= CLIPPING_THRESHOLD {
            analysis.clipped_samples += 1;
        }
    }

    analysis.peak_dbfs = ratio_to_db(analysis.peak);
    analysis
}

/// Clipping scan result.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ClippingAnalysis {
    /// Samples at or above the threshold.
    pub clipped_samples: usize,
    /// Fraction of all samples clipped.
    pub clipped_ratio: f32,
    /// Number of contiguous clipped regions.
    pub regions: usize,
    /// Longest contiguous clipped run, in samples.
    pub longest_run: usize,
    /// Whether clipping is severe (> 0.1 % of samples or > 10 regions).
    pub severe: bool,
}

/// Scans for contiguous clipped regions.
#[must_use]
pub fn analyze_clipping(samples: &[f32]) -> ClippingAnalysis {
    let mut analysis = ClippingAnalysis::default();
    let mut run = 0usize;

    for sample in samples {
        if sample.abs() >= CLIPPING_THRESHOLD {
            analysis.clipped_samples += 1;
            run += 1;
            analysis.longest_run = analysis.longest_run.max(run);
        } else {
            if run > 0 {
                analysis.regions += 1;
            }
            run = 0;
        }
    }
    if run > 0 {
        analysis.regions += 1;
    }

    if !samples.is_empty() {
        analysis.clipped_ratio = analysis.clipped_samples.to_f32_lossy() / samples.len().to_f32_lossy();
    }
    analysis.severe = analysis.clipped_ratio > 0.001 || analysis.regions > 10;
    analysis
}

/// Silence scan result.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SilenceAnalysis {
    /// Leading silence in seconds.
    pub leading_secs: f64,
    /// Trailing silence in seconds.
    pub trailing_secs: f64,
    /// Fraction of all samples below the silence threshold.
    pub silent_ratio: f32,
}

/// Detects leading/trailing silence and the overall silent fraction.
///
/// `threshold_db` is typically −60 dBFS.
#[must_use]
pub fn analyze_silence(samples: &[f32], sample_rate: u32, threshold_db: f32) -> SilenceAnalysis {
    let threshold = crate::util::db_to_ratio(threshold_db);
    let rate = f64::from(sample_rate.max(1));

    let leading = samples
        .iter()
        .position(|sample| sample.abs() > threshold)
        .unwrap_or(samples.len());
    let trailing = samples
        .iter()
        .rev()
        .position(|sample| sample.abs() > threshold)
        .unwrap_or(samples.len());
    let silent = samples
        .iter()
        .filter(|sample| sample.abs() <= threshold)
        .count();

    SilenceAnalysis {
        leading_secs: leading as f64 / rate,
        trailing_secs: trailing as f64 / rate,
        silent_ratio: if samples.is_empty() {
            0.0
        } else {
            silent.to_f32_lossy() / samples.len().to_f32_lossy()
        },
    }
}

/// Dynamic range measurement.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DynamicRangeAnalysis {
    /// DR value in dB.
    pub dr_db: f32,
    /// Second-highest window peak (the DR reference peak).
    pub reference_peak: f32,
    /// Mean RMS of the loudest 20 % of windows.
    pub loud_rms: f32,
}

/// DR-style dynamic range over 100 ms windows with 50 % overlap.
///
/// `DR = 20·log10(second-highest window peak / mean of the top 20 % RMS)`.
#[must_use]
pub fn analyze_dynamic_range(samples: &[f32], sample_rate: u32) -> DynamicRangeAnalysis {
    let window = (sample_rate as usize / 10).max(1);
    let hop = (window / 2).max(1);

    let mut peaks = Vec::new();
    let mut rms_values = Vec::new();

    let mut offset = 0;
    while offset + window <= samples.len() {
        let slice = &samples[offset..offset + window];
        let peak = slice.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
        let rms =
            (slice.iter().map(|s| s * s).sum::<f32>() / window.to_f32_lossy()).sqrt();
        peaks.push(peak);
        rms_values.push(rms);
        offset += hop;
    }

    if peaks.len() < 2 {
        return DynamicRangeAnalysis::default();
    }

    peaks.sort_by(|a, b| b.total_cmp(a));
    rms_values.sort_by(|a, b| b.total_cmp(a));

    let reference_peak = peaks[1];
    let top = (rms_values.len() / 5).max(1);
    let loud_rms = rms_values[..top].iter().sum::<f32>() / top.to_f32_lossy();

    let dr_db = if loud_rms > 0.0 && reference_peak > 0.0 {
        20.0 * (reference_peak / loud_rms).log10()
    } else {
        0.0
    };

    DynamicRangeAnalysis {
        dr_db,
        reference_peak,
        loud_rms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peak_scan_finds_maximum() {
        let mut samples = vec![0.1f32; 1000];
        samples[421] = -0.85;
        let analysis = analyze_peak(&samples);
        assert!((analysis.peak - 0.85).abs() < 1e-6);
        assert_eq!(analysis.peak_index, 421);
        assert!((analysis.peak_dbfs - 20.0 * 0.85f32.log10()).abs() < 1e-3);
        assert_eq!(analysis.clipped_samples, 0);
    }

    #[test]
    fn clipping_counts_regions_and_runs() {
        let mut samples = vec![0.0f32; 1000];
        for i in 100..110 {
            samples[i] = 1.0;
        }
        for i in 500..503 {
            samples[i] = -1.0;
        }
        let analysis = analyze_clipping(&samples);
        assert_eq!(analysis.clipped_samples, 13);
        assert_eq!(analysis.regions, 2);
        assert_eq!(analysis.longest_run, 10);
        assert!(analysis.severe, "1.3 % clipped is severe");
    }

    #[test]
    fn clean_audio_is_not_severe() {
        let samples: Vec<f32> = (0..44_100)
            .map(|i| (i as f32 * 0.01).sin() * 0.5)
            .collect();
        let analysis = analyze_clipping(&samples);
        assert_eq!(analysis.clipped_samples, 0);
        assert!(!analysis.severe);
    }

    #[test]
    fn silence_detects_edges() {
        let mut samples = vec![0.0f32; 44_100];
        for slot in samples.iter_mut().take(33_075).skip(11_025) {
            *slot = 0.5;
        }
        let analysis = analyze_silence(&samples, 44_100, -60.0);
        assert!((analysis.leading_secs - 0.25).abs() < 0.01);
        assert!((analysis.trailing_secs - 0.25).abs() < 0.01);
        assert!((analysis.silent_ratio - 0.5).abs() < 0.01);
    }

    #[test]
    fn compressed_audio_has_low_dr() {
        let rate = 44_100;
        // Square-ish: always loud, nearly no crest factor.
        let flat: Vec<f32> = (0..rate as usize)
            .map(|i| if i % 2 == 0 { 0.9 } else { -0.9 })
            .collect();
        let flat_dr = analyze_dynamic_range(&flat, rate);

        // Sparse bursts: big crest factor.
        let mut dynamic = vec![0.01f32; rate as usize];
        for chunk in 0..10 {
            let start = chunk * 4410;
            for i in start..start + 200 {
                dynamic[i] = 0.9;
            }
        }
        let dynamic_dr = analyze_dynamic_range(&dynamic, rate);

        assert!(flat_dr.dr_db < 2.0, "flat signal DR {}", flat_dr.dr_db);
        assert!(
            dynamic_dr.dr_db > flat_dr.dr_db + 3.0,
            "dynamic {} vs flat {}",
            dynamic_dr.dr_db,
            flat_dr.dr_db
        );
    }
}
