//! Tempo estimation and beat tracking.
//!
//! The estimator works on an RMS energy envelope: onsets are the
//! half-wave rectified first difference of the envelope, smoothed with a
//! short box filter; tempo comes from the autocorrelation of that onset
//! curve over the lag range corresponding to 50–220 BPM. Beats are onset
//! peaks above an adaptive local mean, with every fourth beat marked as a
//! downbeat.

use crate::util::ToF32;

/// Envelope analysis window in samples.
const ENVELOPE_WINDOW: usize = 512;

/// Envelope hop in samples.
const ENVELOPE_HOP: usize = 128;

/// Box smoothing width for the onset curve, in envelope frames.
const ONSET_SMOOTHING: usize = 11;

/// Tempo search range in BPM.
const BPM_MIN: f32 = 50.0;
/// See [`BPM_MIN`].
const BPM_MAX: f32 = 220.0;

/// Correlation peaks examined before candidate selection.
const TOP_PEAKS: usize = 20;

/// Distinct BPM candidates reported.
const TOP_CANDIDATES: usize = 5;

/// Minimum BPM separation between reported candidates.
const CANDIDATE_SEPARATION: f32 = 5.0;

/// Tempo estimation result.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BpmAnalysis {
    /// Best tempo estimate in BPM.
    pub bpm: f32,
    /// Ranked distinct candidates as (bpm, correlation strength).
    pub candidates: Vec<(f32, f32)>,
    /// Peak-over-mean confidence, clamped to [0, 1].
    pub confidence: f32,
    /// Raised when half- or double-tempo peaks corroborate the estimate.
    pub stability: f32,
}

/// One detected beat.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Beat {
    /// Beat time in seconds.
    pub time: f64,
    /// Onset strength at the beat.
    pub strength: f32,
    /// Every fourth beat is a downbeat.
    pub is_downbeat: bool,
}

/// RMS energy envelope at [`ENVELOPE_HOP`] resolution.
fn energy_envelope(samples: &[f32]) -> Vec<f32> {
    if samples.len() < ENVELOPE_WINDOW {
        return Vec::new();
    }
    let mut envelope = Vec::with_capacity(samples.len() / ENVELOPE_HOP);
    let mut offset = 0;
    while offset + ENVELOPE_WINDOW <= samples.len() {
        let window = &samples[offset..offset + ENVELOPE_WINDOW];
        let mean_square = window.iter().map(|s| s * s).sum::<f32>() / ENVELOPE_WINDOW.to_f32_lossy();
        envelope.push(mean_square.sqrt());
        offset += ENVELOPE_HOP;
    }
    envelope
}

/// Half-wave rectified, box-smoothed onset curve.
fn onset_curve(envelope: &[f32]) -> Vec<f32> {
    if envelope.len() < 2 {
        return Vec::new();
    }

    let rectified: Vec<f32> = envelope
        .windows(2)
        .map(|pair| (pair[1] - pair[0]).max(0.0))
        .collect();

    // Box smoothing keeps onset mass while suppressing envelope jitter.
    let half = ONSET_SMOOTHING / 2;
    let mut smoothed = Vec::with_capacity(rectified.len());
    for index in 0..rectified.len() {
        let start = index.saturating_sub(half);
        let end = (index + half + 1).min(rectified.len());
        let sum: f32 = rectified[start..end].iter().sum();
        smoothed.push(sum / (end - start).to_f32_lossy());
    }
    smoothed
}

/// Autocorrelation of the onset curve at one lag.
fn autocorrelation_at(onsets: &[f32], lag: usize) -> f32 {
    if lag >= onsets.len() {
        return 0.0;
    }
    let n = onsets.len() - lag;
    let mut sum = 0.0;
    for i in 0..n {
        sum += onsets[i] * onsets[i + lag];
    }
    sum / n.to_f32_lossy()
}

/// Estimates the tempo of a mono buffer.
#[must_use]
pub fn detect_bpm(samples: &[f32], sample_rate: u32) -> BpmAnalysis {
    let envelope = energy_envelope(samples);
    let onsets = onset_curve(&envelope);
    if onsets.is_empty() || sample_rate == 0 {
        return BpmAnalysis::default();
    }

    let envelope_rate = sample_rate.to_f32_lossy() / ENVELOPE_HOP.to_f32_lossy();
    let lag_for = |bpm: f32| (60.0 * envelope_rate / bpm) as usize;
    let bpm_for = |lag: usize| 60.0 * envelope_rate / lag.to_f32_lossy();

    let lag_min = lag_for(BPM_MAX).max(2);
    let lag_max = lag_for(BPM_MIN).min(onsets.len().saturating_sub(1));
    if lag_max <= lag_min {
        return BpmAnalysis::default();
    }

    // Correlation over the whole search range.
    let correlations: Vec<(usize, f32)> = (lag_min..=lag_max)
        .map(|lag| (lag, autocorrelation_at(&onsets, lag)))
        .collect();

    let mean = correlations.iter().map(|(_, c)| c).sum::<f32>()
        / correlations.len().to_f32_lossy();

    // Local maxima of the correlation curve, strongest first. A mild
    // small-lag preference breaks the tie a periodic signal produces at
    // every multiple of its true period: without it, half tempo wins as
    // often as the actual tempo.
    let mut peaks: Vec<(usize, f32)> = correlations
        .windows(3)
        .filter(|trio| trio[1].1 >= trio[0].1 && trio[1].1 >= trio[2].1)
        .map(|trio| trio[1])
        .collect();
    let biased = |(lag, correlation): &(usize, f32)| {
        correlation * (1.0 - 0.1 * lag.to_f32_lossy() / lag_max.to_f32_lossy())
    };
    peaks.sort_by(|a, b| biased(b).total_cmp(&biased(a)));
    peaks.truncate(TOP_PEAKS);

    // Distinct candidates with minimum BPM separation.
    let mut candidates: Vec<(f32, f32)> = Vec::new();
    for (lag, correlation) in &peaks {
        let bpm = bpm_for(*lag);
        if candidates
            .iter()
            .all(|(existing, _)| (existing - bpm).abs() >= CANDIDATE_SEPARATION)
        {
            candidates.push((bpm, *correlation));
        }
        if candidates.len() >= TOP_CANDIDATES {
            break;
        }
    }

    let Some(&(best_bpm, best_correlation)) = candidates.first() else {
        return BpmAnalysis::default();
    };

    let confidence = if mean > 0.0 {
        (best_correlation / (3.0 * mean)).clamp(0.0, 1.0)
    } else {
        0.0
    };

    // Corroboration: half- and double-tempo peaks raise stability.
    let has_related = |target: f32| {
        (BPM_MIN..=BPM_MAX).contains(&target)
            && peaks
                .iter()
                .any(|(lag, _)| (bpm_for(*lag) - target).abs() < CANDIDATE_SEPARATION)
    };
    let mut stability = 0.4;
    if has_related(best_bpm / 2.0) {
        stability += 0.3;
    }
    if has_related(best_bpm * 2.0) {
        stability += 0.3;
    }

    BpmAnalysis {
        bpm: best_bpm,
        candidates,
        confidence,
        stability,
    }
}

/// Detects beats as onset peaks above an adaptive local mean.
#[must_use]
pub fn detect_beats(samples: &[f32], sample_rate: u32) -> Vec<Beat> {
    let envelope = energy_envelope(samples);
    let onsets = onset_curve(&envelope);
    if onsets.is_empty() || sample_rate == 0 {
        return Vec::new();
    }

    let envelope_rate = f64::from(sample_rate) / ENVELOPE_HOP as f64;
    // Refractory period: no two beats within 150 ms.
    let refractory = (0.150 * envelope_rate) as usize;

    let mut beats = Vec::new();
    let mut last_beat: Option<usize> = None;

    for index in 1..onsets.len().saturating_sub(1) {
        let start = index.saturating_sub(20);
        let end = (index + 20).min(onsets.len());
        let local_mean: f32 =
            onsets[start..end].iter().sum::<f32>() / (end - start).to_f32_lossy();

        let is_peak = onsets[index] >= onsets[index - 1]
            && onsets[index] >= onsets[index + 1]
            && onsets[index] > local_mean * 1.5
            && onsets[index] > 1e-6;
        if !is_peak {
            continue;
        }
        if last_beat.is_some_and(|last| index - last < refractory) {
            continue;
        }

        last_beat = Some(index);
        beats.push(Beat {
            time: index as f64 / envelope_rate,
            strength: onsets[index],
            is_downbeat: false,
        });
    }

    for (number, beat) in beats.iter_mut().enumerate() {
        beat.is_downbeat = number % 4 == 0;
    }
    beats
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    /// Click track: short sine bursts at an exact tempo.
    fn click_track(bpm: f32, seconds: f32, sample_rate: u32) -> Vec<f32> {
        let len = (seconds * sample_rate.to_f32_lossy()) as usize;
        let mut samples = vec![0.0f32; len];
        let period = (60.0 / bpm * sample_rate.to_f32_lossy()) as usize;
        let click_len = sample_rate as usize / 20; // 50 ms

        let mut start = 0;
        while start + click_len < len {
            for i in 0..click_len {
                let t = i.to_f32_lossy() / sample_rate.to_f32_lossy();
                let fade = 1.0 - i.to_f32_lossy() / click_len.to_f32_lossy();
                samples[start + i] = (2.0 * PI * 1000.0 * t).sin() * 0.8 * fade;
            }
            start += period;
        }
        samples
    }

    #[test]
    fn detects_120_bpm_click_track() {
        let samples = click_track(120.0, 60.0, 44_100);
        let analysis = detect_bpm(&samples, 44_100);

        assert!(
            (119.0..=121.0).contains(&analysis.bpm),
            "detected {} BPM",
            analysis.bpm
        );
        assert!(
            analysis.confidence >= 0.6,
            "confidence {}",
            analysis.confidence
        );
        assert!(analysis.stability >= 0.5, "stability {}", analysis.stability);
    }

    #[test]
    fn candidates_are_separated() {
        let samples = click_track(100.0, 30.0, 44_100);
        let analysis = detect_bpm(&samples, 44_100);
        for pair in analysis.candidates.windows(2) {
            assert!((pair[0].0 - pair[1].0).abs() >= CANDIDATE_SEPARATION);
        }
    }

    #[test]
    fn beats_land_on_clicks() {
        let sample_rate = 44_100;
        let samples = click_track(120.0, 10.0, sample_rate);
        let beats = detect_beats(&samples, sample_rate);

        assert!(
            beats.len() >= 15 && beats.len() <= 22,
            "expected ~20 beats in 10 s, got {}",
            beats.len()
        );

        // Inter-beat intervals cluster around 0.5 s.
        let intervals: Vec<f64> = beats.windows(2).map(|pair| pair[1].time - pair[0].time).collect();
        for interval in &intervals {
            let multiple = interval / 0.5;
            assert!(
                (multiple - multiple.round()).abs() < 0.2,
                "odd interval {interval}"
            );
        }

        // Downbeat marking: every fourth.
        assert!(beats[0].is_downbeat);
        if beats.len() > 4 {
            assert!(beats[4].is_downbeat);
            assert!(!beats[1].is_downbeat);
        }
    }

    #[test]
    fn silence_has_no_tempo() {
        let silence = vec![0.0f32; 44_100 * 5];
        let analysis = detect_bpm(&silence, 44_100);
        assert!(analysis.confidence < 0.6);
    }
}
