//! Fundamental pitch detection.
//!
//! Autocorrelation over a centered slice of the buffer, searched over the
//! lag range for 50–2000 Hz, with the best lag converted to a frequency,
//! MIDI note number and cent deviation.

use crate::util::ToF32;

/// Analysis slice length in samples.
const SLICE_LEN: usize = 4096;

/// Pitch search range in Hz.
const FREQ_MIN: f32 = 50.0;
/// See [`FREQ_MIN`].
const FREQ_MAX: f32 = 2000.0;

/// Names of the twelve chromatic notes.
const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Pitch detection result.
#[derive(Clone, Debug, PartialEq)]
pub struct PitchAnalysis {
    /// Detected fundamental in Hz.
    pub frequency: f32,
    /// MIDI note number (69 = A4).
    pub midi_note: i32,
    /// Note name with octave, e.g. "A4".
    pub note_name: String,
    /// Deviation from the equal-tempered note in cents.
    pub cents: f32,
    /// Normalized autocorrelation strength of the detection.
    pub clarity: f32,
}

/// Detects the fundamental pitch of a mono buffer.
///
/// Returns `None` when the buffer is too short or no periodic content is
/// found.
#[must_use]
pub fn detect_pitch(samples: &[f32], sample_rate: u32) -> Option<PitchAnalysis> {
    if samples.len() < SLICE_LEN || sample_rate == 0 {
        return None;
    }

    // Centered slice: steadier than onset or tail material.
    let start = (samples.len() - SLICE_LEN) / 2;
    let slice = &samples[start..start + SLICE_LEN];

    let rate = sample_rate.to_f32_lossy();
    let lag_min = ((rate / FREQ_MAX) as usize).max(2);
    let lag_max = ((rate / FREQ_MIN) as usize).min(SLICE_LEN / 2);
    if lag_max <= lag_min {
        return None;
    }

    let energy: f32 = slice.iter().map(|s| s * s).sum();
    if energy < 1e-6 {
        return None;
    }

    let mut best_lag = 0usize;
    let mut best_value = 0.0f32;
    for lag in lag_min..=lag_max {
        let mut sum = 0.0f32;
        for i in 0..SLICE_LEN - lag {
            sum += slice[i] * slice[i + lag];
        }
        let normalized = sum / energy;
        if normalized > best_value {
            best_value = normalized;
            best_lag = lag;
        }
    }

    if best_lag == 0 || best_value < 0.3 {
        return None;
    }

    // Parabolic interpolation around the best lag for sub-sample
    // precision.
    let refined_lag = if best_lag > lag_min && best_lag < lag_max {
        let at = |lag: usize| {
            let mut sum = 0.0f32;
            for i in 0..SLICE_LEN - lag {
                sum += slice[i] * slice[i + lag];
            }
            sum / energy
        };
        let (left, center, right) = (at(best_lag - 1), best_value, at(best_lag + 1));
        let denominator = left - 2.0 * center + right;
        if denominator.abs() > 1e-9 {
            best_lag.to_f32_lossy() + 0.5 * (left - right) / denominator
        } else {
            best_lag.to_f32_lossy()
        }
    } else {
        best_lag.to_f32_lossy()
    };

    let frequency = rate / refined_lag;
    let midi_exact = 69.0 + 12.0 * (frequency / 440.0).log2();
    let midi_note = midi_exact.round() as i32;
    let cents = (midi_exact - midi_note as f32) * 100.0;

    let note_index = midi_note.rem_euclid(12) as usize;
    let octave = midi_note / 12 - 1;
    let note_name = format!("{}{octave}", NOTE_NAMES[note_index]);

    Some(PitchAnalysis {
        frequency,
        midi_note,
        note_name,
        cents,
        clarity: best_value.clamp(0.0, 1.0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn tone(freq: f32, rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * PI * freq * i as f32 / rate as f32).sin() * 0.5)
            .collect()
    }

    #[test]
    fn detects_a4() {
        let analysis = detect_pitch(&tone(440.0, 48_000, 16_384), 48_000).unwrap();
        assert!((analysis.frequency - 440.0).abs() < 3.0, "{}", analysis.frequency);
        assert_eq!(analysis.midi_note, 69);
        assert_eq!(analysis.note_name, "A4");
        assert!(analysis.cents.abs() < 20.0, "cents {}", analysis.cents);
    }

    #[test]
    fn detects_low_e() {
        // E2 = 82.4 Hz, the low guitar string.
        let analysis = detect_pitch(&tone(82.4, 44_100, 16_384), 44_100).unwrap();
        assert!((analysis.frequency - 82.4).abs() < 2.0, "{}", analysis.frequency);
        assert_eq!(analysis.note_name, "E2");
    }

    #[test]
    fn silence_has_no_pitch() {
        assert!(detect_pitch(&vec![0.0; 16_384], 48_000).is_none());
    }

    #[test]
    fn noise_has_no_confident_pitch() {
        fastrand::seed(11);
        let noise: Vec<f32> = (0..16_384).map(|_| fastrand::f32() * 2.0 - 1.0).collect();
        if let Some(analysis) = detect_pitch(&noise, 48_000) {
            assert!(analysis.clarity < 0.6, "noise clarity {}", analysis.clarity);
        }
    }
}
