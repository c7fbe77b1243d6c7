//! Utility traits and functions.
//!
//! This module provides general-purpose utilities including:
//! * Type conversion traits
//! * Decibel and linear ratio conversions
//! * Interleaved sample helpers

/// Reference level for decibel conversions (0 dB).
pub const ZERO_DB: f32 = 0.0;

/// Smallest ratio considered non-silent when converting to decibels.
///
/// Ratios at or below this value map to [`DB_FLOOR`] instead of negative
/// infinity, which would otherwise poison downstream smoothing filters.
pub const RATIO_FLOOR: f32 = 1.0e-10;

/// Decibel value reported for silence.
pub const DB_FLOOR: f32 = -200.0;

/// Trait for converting numeric values to `f32` with controlled truncation.
///
/// Provides safe conversion to `f32` by:
/// * Clamping values to `f32` range
/// * Preventing infinity values
/// * Preventing NaN values
pub trait ToF32 {
    /// Converts a value to `f32`, clamping to prevent invalid results.
    ///
    /// Values outside the `f32` range are clamped to the nearest valid value:
    /// * Values > `f32::MAX` become `f32::MAX`
    /// * Values < `f32::MIN` become `f32::MIN`
    fn to_f32_lossy(self) -> f32;
}

/// Implements conversion from `f64` to `f32` with range clamping.
impl ToF32 for f64 {
    #[expect(clippy::cast_possible_truncation)]
    fn to_f32_lossy(self) -> f32 {
        self.clamp(f64::from(f32::MIN), f64::from(f32::MAX)) as f32
    }
}

/// Implements conversion from `u64` to `f32`.
///
/// Large values lose precision but remain finite.
impl ToF32 for u64 {
    #[expect(clippy::cast_precision_loss)]
    fn to_f32_lossy(self) -> f32 {
        self as f32
    }
}

/// Implements conversion from `u32` to `f32`.
impl ToF32 for u32 {
    #[expect(clippy::cast_precision_loss)]
    fn to_f32_lossy(self) -> f32 {
        self as f32
    }
}

/// Implements conversion from `usize` to `f32`.
impl ToF32 for usize {
    #[expect(clippy::cast_precision_loss)]
    fn to_f32_lossy(self) -> f32 {
        self as f32
    }
}

/// Converts a linear amplitude ratio to decibels.
///
/// Silence (ratios at or below [`RATIO_FLOOR`]) maps to [`DB_FLOOR`]
/// instead of negative infinity.
#[must_use]
pub fn ratio_to_db(ratio: f32) -> f32 {
    if ratio <= RATIO_FLOOR {
        DB_FLOOR
    } else {
        20.0 * ratio.log10()
    }
}

/// Converts decibels to a linear amplitude ratio.
#[must_use]
pub fn db_to_ratio(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

/// Extracts one channel from an interleaved sample slice.
///
/// Returns an empty vector when `channel >= channels`.
#[must_use]
pub fn deinterleave_channel(samples: &[f32], channels: usize, channel: usize) -> Vec<f32> {
    if channels == 0 || channel >= channels {
        return Vec::new();
    }
    samples
        .iter()
        .skip(channel)
        .step_by(channels)
        .copied()
        .collect()
}

/// Downmixes an interleaved sample slice to mono by channel averaging.
#[must_use]
pub fn downmix_mono(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels == 0 {
        return Vec::new();
    }
    if channels == 1 {
        return samples.to_vec();
    }

    let frames = samples.len() / channels;
    let scale = 1.0 / channels.to_f32_lossy();
    let mut mono = Vec::with_capacity(frames);
    for frame in samples.chunks_exact(channels) {
        mono.push(frame.iter().sum::<f32>() * scale);
    }
    mono
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_ratio_round_trip() {
        for db in [-60.0, -6.0, 0.0, 6.0, 12.0] {
            let ratio = db_to_ratio(db);
            assert!((ratio_to_db(ratio) - db).abs() < 1e-4);
        }
    }

    #[test]
    fn silence_maps_to_floor() {
        assert_eq!(ratio_to_db(0.0), DB_FLOOR);
        assert_eq!(ratio_to_db(-1.0), DB_FLOOR);
    }

    #[test]
    fn to_f32_clamps() {
        assert_eq!(f64::MAX.to_f32_lossy(), f32::MAX);
        assert_eq!(f64::MIN.to_f32_lossy(), f32::MIN);
        assert!((1.5f64.to_f32_lossy() - 1.5).abs() < f32::EPSILON);
    }

    #[test]
    fn downmix_averages_frames() {
        let stereo = [1.0, -1.0, 0.5, 0.5];
        let mono = downmix_mono(&stereo, 2);
        assert_eq!(mono, vec![0.0, 0.5]);
    }

    #[test]
    fn deinterleave_picks_channel() {
        let stereo = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(deinterleave_channel(&stereo, 2, 0), vec![1.0, 3.0]);
        assert_eq!(deinterleave_channel(&stereo, 2, 1), vec![2.0, 4.0]);
        assert!(deinterleave_channel(&stereo, 2, 2).is_empty());
    }
}
