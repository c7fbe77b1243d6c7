//! Offline audio analysis.
//!
//! Everything here runs off the real-time path, either on buffers already
//! decoded or by re-decoding the source. The [`Analyzer`] entry point
//! decodes once and fans out to the individual analyses:
//!
//! * [`dynamics`]: peak, clipping, silence, dynamic range
//! * [`bpm`]: tempo estimation and beat tracking
//! * [`loudness`]: EBU R128-style measurement
//! * [`phase`]: stereo correlation and width
//! * [`pitch`]: fundamental detection
//! * [`spectral`]: spectral shape
//!
//! plus heuristic summarizers (timbre, quality) built from the above.

pub mod bpm;
pub mod dynamics;
pub mod loudness;
pub mod phase;
pub mod pitch;
pub mod spectral;

use tokio_util::sync::CancellationToken;

use crate::{
    config::Config,
    decoder::Decoder,
    error::{Error, Result},
    source::MediaInput,
};

/// Heuristic timbre description derived from the spectral shape.
#[derive(Clone, Debug, PartialEq)]
pub struct TimbreSummary {
    /// 0 (dark) to 1 (bright), from the spectral centroid.
    pub brightness: f32,
    /// 0 (thin) to 1 (warm), from low-band energy.
    pub warmth: f32,
    /// Short description, e.g. "bright", "warm", "balanced".
    pub descriptor: &'static str,
}

/// Heuristic technical quality assessment.
#[derive(Clone, Debug, PartialEq)]
pub struct QualityAssessment {
    /// 0–100 technical score.
    pub score: f32,
    /// Detected issues in display order.
    pub issues: Vec<String>,
}

/// A complete analysis report for one stream.
#[derive(Clone, Debug)]
pub struct AnalysisReport {
    /// Source sample rate in Hz.
    pub sample_rate: u32,
    /// Source channel count.
    pub channels: usize,
    /// Source duration in seconds.
    pub duration: f64,

    /// Peak scan.
    pub peak: dynamics::PeakAnalysis,
    /// Clipping scan.
    pub clipping: dynamics::ClippingAnalysis,
    /// Silence scan at −60 dBFS.
    pub silence: dynamics::SilenceAnalysis,
    /// DR-style dynamic range.
    pub dynamic_range: dynamics::DynamicRangeAnalysis,
    /// Tempo estimate.
    pub bpm: bpm::BpmAnalysis,
    /// Detected beats.
    pub beats: Vec<bpm::Beat>,
    /// Loudness measurement.
    pub loudness: loudness::LoudnessAnalysis,
    /// Stereo phase (stereo sources only).
    pub phase: Option<phase::PhaseAnalysis>,
    /// Fundamental pitch, when periodic content was found.
    pub pitch: Option<pitch::PitchAnalysis>,
    /// Spectral shape.
    pub spectral: Option<spectral::SpectralAnalysis>,
    /// Timbre summary.
    pub timbre: Option<TimbreSummary>,
    /// Technical quality assessment.
    pub quality: QualityAssessment,
}

/// Offline analyzer over decoded PCM.
pub struct Analyzer {
    config: Config,
}

impl Analyzer {
    /// Creates an analyzer with the given open/probe configuration.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Decodes a URL and runs the full analysis suite.
    ///
    /// # Errors
    ///
    /// Propagates open/decode failures; returns `Cancelled` when the
    /// token fires between decode blocks or analysis stages.
    pub async fn analyze_url(&self, url: &str, cancel: CancellationToken) -> Result<AnalysisReport> {
        let input = MediaInput::open(url, &self.config).await?;
        let url = url.to_string();
        let config = self.config.clone();
        let token = cancel.clone();

        let (samples, channels, sample_rate) = tokio::task::spawn_blocking(move || {
            let mut decoder = Decoder::new(input, &url, &config)?;
            let channels = usize::from(decoder.channels());
            let sample_rate = decoder.sample_rate();
            let mut samples = Vec::new();
            while let Some(buffer) = decoder.next_buffer()? {
                if token.is_cancelled() {
                    return Err(Error::cancelled("analysis cancelled"));
                }
                samples.extend_from_slice(buffer.samples());
            }
            Ok((samples, channels, sample_rate))
        })
        .await
        .map_err(|e| Error::internal(e.to_string()))??;

        let report = tokio::task::spawn_blocking(move || {
            analyze_samples(&samples, channels, sample_rate, &cancel)
        })
        .await
        .map_err(|e| Error::internal(e.to_string()))??;

        Ok(report)
    }
}

/// Runs the full analysis suite on an interleaved buffer.
///
/// # Errors
///
/// Returns `Cancelled` when the token fires between stages.
pub fn analyze_samples(
    samples: &[f32],
    channels: usize,
    sample_rate: u32,
    cancel: &CancellationToken,
) -> Result<AnalysisReport> {
    let channels = channels.max(1);
    let mono = crate::util::downmix_mono(samples, channels);
    let duration = if sample_rate > 0 {
        mono.len() as f64 / f64::from(sample_rate)
    } else {
        0.0
    };

    let check = |stage: &str| -> Result<()> {
        if cancel.is_cancelled() {
            Err(Error::cancelled(format!("analysis cancelled at {stage}")))
        } else {
            Ok(())
        }
    };

    let peak = dynamics::analyze_peak(&mono);
    let clipping = dynamics::analyze_clipping(&mono);
    let silence = dynamics::analyze_silence(&mono, sample_rate, -60.0);
    let dynamic_range = dynamics::analyze_dynamic_range(&mono, sample_rate);
    check("dynamics")?;

    let bpm_analysis = bpm::detect_bpm(&mono, sample_rate);
    let beats = bpm::detect_beats(&mono, sample_rate);
    check("tempo")?;

    let loudness_analysis = loudness::analyze_loudness(samples, channels, sample_rate);
    check("loudness")?;

    let phase_analysis = phase::analyze_phase(samples, channels);
    let pitch_analysis = pitch::detect_pitch(&mono, sample_rate);
    let spectral_analysis = spectral::analyze_spectrum(&mono, sample_rate);
    check("spectral")?;

    let timbre = spectral_analysis.as_ref().map(summarize_timbre);
    let quality = assess_quality(&clipping, &dynamic_range, &loudness_analysis, phase_analysis.as_ref());

    Ok(AnalysisReport {
        sample_rate,
        channels,
        duration,
        peak,
        clipping,
        silence,
        dynamic_range,
        bpm: bpm_analysis,
        beats,
        loudness: loudness_analysis,
        phase: phase_analysis,
        pitch: pitch_analysis,
        spectral: spectral_analysis,
        timbre,
        quality,
    })
}

/// Derives a timbre description from the spectral shape.
fn summarize_timbre(spectral: &spectral::SpectralAnalysis) -> TimbreSummary {
    // Centroid mapped onto [0, 1] over 200 Hz – 8 kHz, log scale.
    let brightness = ((spectral.centroid.max(200.0) / 200.0).log2() / (8000.0f32 / 200.0).log2())
        .clamp(0.0, 1.0);
    let warmth = spectral.low_ratio.clamp(0.0, 1.0);

    let descriptor = if brightness > 0.7 {
        "bright"
    } else if warmth > 0.6 {
        "warm"
    } else if spectral.flatness > 0.5 {
        "noisy"
    } else {
        "balanced"
    };

    TimbreSummary {
        brightness,
        warmth,
        descriptor,
    }
}

/// Scores technical quality from the defect detectors.
fn assess_quality(
    clipping: &dynamics::ClippingAnalysis,
    dynamic_range: &dynamics::DynamicRangeAnalysis,
    loudness: &loudness::LoudnessAnalysis,
    phase: Option<&phase::PhaseAnalysis>,
) -> QualityAssessment {
    let mut score = 100.0f32;
    let mut issues = Vec::new();

    if clipping.severe {
        score -= 30.0;
        issues.push(format!(
            "severe clipping: {:.2}% of samples in {} regions",
            clipping.clipped_ratio * 100.0,
            clipping.regions
        ));
    } else if clipping.clipped_samples > 0 {
        score -= 10.0;
        issues.push(format!("{} clipped samples", clipping.clipped_samples));
    }

    if dynamic_range.dr_db > 0.0 && dynamic_range.dr_db < 6.0 {
        score -= 20.0;
        issues.push(format!(
            "heavily compressed: DR {:.1} dB",
            dynamic_range.dr_db
        ));
    }

    if loudness.integrated_lufs.is_finite() && loudness.integrated_lufs > -8.0 {
        score -= 15.0;
        issues.push(format!(
            "very hot master: {:.1} LUFS integrated",
            loudness.integrated_lufs
        ));
    }

    if let Some(phase) = phase {
        if phase.correlation < 0.0 {
            score -= 25.0;
            issues.push(format!(
                "phase problems: correlation {:.2}",
                phase.correlation
            ));
        }
    }

    QualityAssessment {
        score: score.max(0.0),
        issues,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    #[test]
    fn full_report_on_synthetic_stereo() {
        let rate = 44_100u32;
        let frames = rate as usize * 4;
        let mut samples = Vec::with_capacity(frames * 2);
        for i in 0..frames {
            let t = i as f32 / rate as f32;
            let value = (2.0 * PI * 440.0 * t).sin() * 0.5;
            samples.push(value);
            samples.push(value);
        }

        let report =
            analyze_samples(&samples, 2, rate, &CancellationToken::new()).expect("report");

        assert_eq!(report.channels, 2);
        assert!((report.duration - 4.0).abs() < 0.01);
        assert!((report.peak.peak - 0.5).abs() < 0.01);
        assert!(!report.clipping.severe);
        assert_eq!(
            report.phase.unwrap().classification,
            phase::PhaseClassification::NearMono
        );
        assert_eq!(report.pitch.unwrap().note_name, "A4");
        assert!(report.quality.score > 50.0);
    }

    #[test]
    fn cancellation_aborts_analysis() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let samples = vec![0.0f32; 44_100];
        let result = analyze_samples(&samples, 1, 44_100, &cancel);
        assert_eq!(
            result.err().map(|e| e.kind),
            Some(crate::error::ErrorKind::Cancelled)
        );
    }

    #[test]
    fn timbre_brightness_follows_centroid() {
        let bright = spectral::analyze_spectrum(
            &(0..8192)
                .map(|i| (2.0 * PI * 6000.0 * i as f32 / 44_100.0).sin())
                .collect::<Vec<_>>(),
            44_100,
        )
        .unwrap();
        let dark = spectral::analyze_spectrum(
            &(0..8192)
                .map(|i| (2.0 * PI * 150.0 * i as f32 / 44_100.0).sin())
                .collect::<Vec<_>>(),
            44_100,
        )
        .unwrap();

        let bright_summary = summarize_timbre(&bright);
        let dark_summary = summarize_timbre(&dark);
        assert!(bright_summary.brightness > dark_summary.brightness);
        assert!(dark_summary.warmth > bright_summary.warmth);
    }
}
