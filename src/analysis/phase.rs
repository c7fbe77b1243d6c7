//! Stereo phase and correlation analysis.

/// Stereo phase classification.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PhaseClassification {
    /// Correlation below −0.5: channels largely cancel in mono.
    SevereReverse,
    /// Correlation below 0: partial polarity problems.
    PartialReverse,
    /// Correlation above 0.98: effectively a mono signal.
    NearMono,
    /// Correlation above 0.9: very narrow stereo image.
    Narrow,
    /// Healthy stereo.
    Normal,
}

/// Stereo phase measurement.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PhaseAnalysis {
    /// Pearson-style channel correlation in [−1, 1].
    pub correlation: f32,
    /// Mid energy over total energy: 1.0 collapses cleanly to mono.
    pub mono_compatibility: f32,
    /// Side energy over total energy: image width.
    pub width: f32,
    /// Derived classification.
    pub classification: PhaseClassification,
}

/// Measures phase relation of an interleaved stereo buffer.
///
/// Returns `None` for non-stereo input; phase analysis is only defined
/// for two channels.
#[must_use]
pub fn analyze_phase(samples: &[f32], channels: usize) -> Option<PhaseAnalysis> {
    if channels < 2 || samples.len() < channels {
        return None;
    }

    let mut sum_lr = 0.0f64;
    let mut sum_ll = 0.0f64;
    let mut sum_rr = 0.0f64;
    let mut mid_energy = 0.0f64;
    let mut side_energy = 0.0f64;

    for frame in samples.chunks_exact(channels) {
        let left = f64::from(frame[0]);
        let right = f64::from(frame[1]);
        sum_lr += left * right;
        sum_ll += left * left;
        sum_rr += right * right;

        let mid = (left + right) * 0.5;
        let side = (left - right) * 0.5;
        mid_energy += mid * mid;
        side_energy += side * side;
    }

    let correlation = if sum_ll > 0.0 && sum_rr > 0.0 {
        (sum_lr / (sum_ll * sum_rr).sqrt()) as f32
    } else {
        0.0
    };

    let total = mid_energy + side_energy;
    let mono_compatibility = if total > 0.0 {
        (mid_energy / total) as f32
    } else {
        1.0
    };
    let width = if total > 0.0 {
        (side_energy / total) as f32
    } else {
        0.0
    };

    let classification = if correlation < -0.5 {
        PhaseClassification::SevereReverse
    } else if correlation < 0.0 {
        PhaseClassification::PartialReverse
    } else if correlation > 0.98 {
        PhaseClassification::NearMono
    } else if correlation > 0.9 {
        PhaseClassification::Narrow
    } else {
        PhaseClassification::Normal
    };

    Some(PhaseAnalysis {
        correlation,
        mono_compatibility,
        width,
        classification,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn stereo(left: impl Fn(usize) -> f32, right: impl Fn(usize) -> f32) -> Vec<f32> {
        let mut samples = Vec::new();
        for i in 0..4800 {
            samples.push(left(i));
            samples.push(right(i));
        }
        samples
    }

    #[test]
    fn identical_channels_are_near_mono() {
        let tone = |i: usize| (2.0 * PI * 440.0 * i as f32 / 48_000.0).sin() * 0.5;
        let analysis = analyze_phase(&stereo(tone, tone), 2).unwrap();
        assert!((analysis.correlation - 1.0).abs() < 1e-3);
        assert_eq!(analysis.classification, PhaseClassification::NearMono);
        assert!((analysis.mono_compatibility - 1.0).abs() < 1e-3);
        assert!(analysis.width < 1e-3);
    }

    #[test]
    fn inverted_channels_are_severe_reverse() {
        let tone = |i: usize| (2.0 * PI * 440.0 * i as f32 / 48_000.0).sin() * 0.5;
        let inverted = |i: usize| -tone(i);
        let analysis = analyze_phase(&stereo(tone, inverted), 2).unwrap();
        assert!((analysis.correlation + 1.0).abs() < 1e-3);
        assert_eq!(analysis.classification, PhaseClassification::SevereReverse);
        assert!(analysis.mono_compatibility < 1e-3);
    }

    #[test]
    fn uncorrelated_channels_are_normal() {
        fastrand::seed(7);
        let left: Vec<f32> = (0..9600).map(|_| fastrand::f32() * 2.0 - 1.0).collect();
        let right: Vec<f32> = (0..9600).map(|_| fastrand::f32() * 2.0 - 1.0).collect();
        let mut samples = Vec::new();
        for (l, r) in left.iter().zip(right.iter()) {
            samples.push(*l);
            samples.push(*r);
        }
        let analysis = analyze_phase(&samples, 2).unwrap();
        assert_eq!(analysis.classification, PhaseClassification::Normal);
    }

    #[test]
    fn mono_input_returns_none() {
        assert!(analyze_phase(&[0.0; 128], 1).is_none());
    }
}
