//! Audio fingerprinting.
//!
//! A constellation-style fingerprint: spectral peaks are extracted from
//! an overlapped STFT, paired into anchor/target hashes, and matched by
//! counting identical packed hashes with time-offset voting. Robust to
//! noise and codec artifacts because only peak positions survive into the
//! hash.
//!
//! Generation runs off the real-time path, either from raw samples or by
//! re-decoding a source URL.

pub mod db;

use std::{
    collections::HashSet,
    f32::consts::PI,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::{
    config::Config,
    decoder::Decoder,
    error::{Error, Result},
    source::MediaInput,
};

/// STFT frame size.
pub const FFT_SIZE: usize = 4096;

/// STFT hop (50 % overlap).
pub const HOP_SIZE: usize = 2048;

/// Logarithmic band boundaries in Hz.
const BAND_EDGES_HZ: [f32; 9] = [
    0.0, 100.0, 200.0, 400.0, 800.0, 1600.0, 3200.0, 6400.0, 12_800.0,
];

/// Maximum peaks kept per band per frame.
const PEAKS_PER_BAND: usize = 5;

/// Minimum magnitude for a bin to qualify as a peak.
const PEAK_MAGNITUDE_FLOOR: f32 = 0.01;

/// Pairing fan-out: how many frames ahead targets may lie.
const TARGET_FRAMES: u32 = 5;

/// Pairing fan-out: maximum bin distance between anchor and target.
const TARGET_BINS: i32 = 100;

/// One anchor/target hash of the fingerprint.
#[derive(Copy, Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct FingerprintHash {
    /// Anchor peak frequency bin.
    pub anchor_freq: u16,
    /// Target peak frequency bin.
    pub target_freq: u16,
    /// Frame distance between anchor and target.
    pub time_delta: u16,
    /// Anchor frame index, kept outside the packed form for offset
    /// voting.
    pub anchor_time: u32,
}

impl FingerprintHash {
    /// Packed 32-bit form: `anchor<<20 | target<<8 | delta`, lower bits
    /// truncated.
    #[must_use]
    pub fn packed(&self) -> u32 {
        (u32::from(self.anchor_freq) & 0xFFF) << 20
            | (u32::from(self.target_freq) & 0xFFF) << 8
            | (u32::from(self.time_delta) & 0xFF)
    }
}

/// A complete fingerprint of one audio stream.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Fingerprint {
    /// The hash constellation.
    pub hashes: Vec<FingerprintHash>,
    /// Source duration in seconds.
    pub duration: f64,
    /// Source sample rate in Hz.
    pub sample_rate: u32,
    /// Generation timestamp, Unix seconds.
    pub created_at: u64,
}

impl Fingerprint {
    /// The distinct packed hash set.
    #[must_use]
    pub fn packed_set(&self) -> HashSet<u32> {
        self.hashes.iter().map(FingerprintHash::packed).collect()
    }

    /// Jaccard similarity over the packed hash sets.
    ///
    /// Identical fingerprints score 1.0; unrelated material scores near
    /// zero.
    #[must_use]
    pub fn similarity(&self, other: &Fingerprint) -> f32 {
        let a = self.packed_set();
        let b = other.packed_set();
        if a.is_empty() && b.is_empty() {
            return 1.0;
        }
        let intersection = a.intersection(&b).count();
        let union = a.len() + b.len() - intersection;
        if union == 0 {
            1.0
        } else {
            intersection as f32 / union as f32
        }
    }
}

/// One spectral peak.
#[derive(Copy, Clone, Debug)]
struct Peak {
    frame: u32,
    bin: u16,
    magnitude: f32,
}

/// Fingerprint generator.
///
/// Call [`FingerprintEngine::prepare`] once before use; fingerprinting
/// before that fails with `FingerprintNotReady`.
pub struct FingerprintEngine {
    fft: Option<Arc<dyn Fft<f32>>>,
    window: Vec<f32>,
}

impl Default for FingerprintEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl FingerprintEngine {
    /// Creates an unprepared engine.
    #[must_use]
    pub fn new() -> Self {
        Self {
            fft: None,
            window: Vec::new(),
        }
    }

    /// Plans the FFT and windows; idempotent.
    pub fn prepare(&mut self) {
        if self.fft.is_none() {
            self.fft = Some(FftPlanner::new().plan_fft_forward(FFT_SIZE));
            self.window = (0..FFT_SIZE)
                .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / FFT_SIZE as f32).cos()))
                .collect();
        }
    }

    /// Whether [`FingerprintEngine::prepare`] has run.
    #[must_use]
    pub fn is_prepared(&self) -> bool {
        self.fft.is_some()
    }

    /// Fingerprints a mono sample buffer.
    ///
    /// # Errors
    ///
    /// Returns `FingerprintNotReady` when the engine is unprepared.
    pub fn fingerprint_samples(&self, samples: &[f32], sample_rate: u32) -> Result<Fingerprint> {
        let fft = self
            .fft
            .as_ref()
            .ok_or_else(|| Error::fingerprint_not_ready("call prepare() first"))?;

        let peaks = self.extract_peaks(fft, samples, sample_rate);
        let hashes = pair_peaks(&peaks);

        Ok(Fingerprint {
            hashes,
            duration: if sample_rate > 0 {
                samples.len() as f64 / f64::from(sample_rate)
            } else {
                0.0
            },
            sample_rate,
            created_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|elapsed| elapsed.as_secs())
                .unwrap_or(0),
        })
    }

    /// Decodes a URL to mono and fingerprints it.
    ///
    /// # Errors
    ///
    /// Propagates open/decode failures; returns `Cancelled` when the
    /// token fires mid-decode.
    pub async fn fingerprint_url(
        &self,
        url: &str,
        config: &Config,
        cancel: CancellationToken,
    ) -> Result<Fingerprint> {
        if !self.is_prepared() {
            return Err(Error::fingerprint_not_ready("call prepare() first"));
        }

        let input = MediaInput::open(url, config).await?;
        let url = url.to_string();
        let config = config.clone();

        let (samples, sample_rate) = tokio::task::spawn_blocking(move || {
            let mut decoder = Decoder::new(input, &url, &config)?;
            let sample_rate = decoder.sample_rate();
            let mut mono = Vec::new();
            while let Some(buffer) = decoder.next_buffer()? {
                if cancel.is_cancelled() {
                    return Err(Error::cancelled("fingerprint generation cancelled"));
                }
                mono.extend(buffer.to_mono());
            }
            Ok((mono, sample_rate))
        })
        .await
        .map_err(|e| Error::internal(e.to_string()))??;

        self.fingerprint_samples(&samples, sample_rate)
    }

    /// Runs the overlapped STFT and collects per-band peak constellations.
    fn extract_peaks(&self, fft: &Arc<dyn Fft<f32>>, samples: &[f32], sample_rate: u32) -> Vec<Peak> {
        let mut peaks = Vec::new();
        if samples.len() < FFT_SIZE || sample_rate == 0 {
            return peaks;
        }

        // Band boundaries in bins for this sample rate.
        let bin_hz = sample_rate as f32 / FFT_SIZE as f32;
        let band_bins: Vec<usize> = BAND_EDGES_HZ
            .iter()
            .map(|hz| ((hz / bin_hz) as usize).min(FFT_SIZE / 2))
            .collect();

        let mut scratch = vec![Complex::default(); FFT_SIZE];
        let mut magnitudes = vec![0.0f32; FFT_SIZE / 2];

        let mut frame = 0u32;
        let mut offset = 0usize;
        while offset + FFT_SIZE <= samples.len() {
            for (slot, (sample, w)) in scratch
                .iter_mut()
                .zip(samples[offset..offset + FFT_SIZE].iter().zip(&self.window))
            {
                *slot = Complex::new(sample * w, 0.0);
            }
            fft.process(&mut scratch);

            let scale = 2.0 / FFT_SIZE as f32;
            for (bin, magnitude) in magnitudes.iter_mut().enumerate() {
                *magnitude = scratch[bin].norm() * scale;
            }

            for band in band_bins.windows(2) {
                let (start, end) = (band[0].max(1), band[1]);
                if end <= start + 1 {
                    continue;
                }

                // Local maxima above the floor, strongest first.
                let mut candidates: Vec<Peak> = (start..end.min(magnitudes.len() - 1))
                    .filter(|bin| {
                        let magnitude = magnitudes[*bin];
                        magnitude > PEAK_MAGNITUDE_FLOOR
                            && magnitude >= magnitudes[bin - 1]
                            && magnitude >= magnitudes[bin + 1]
                    })
                    .map(|bin| Peak {
                        frame,
                        bin: bin as u16,
                        magnitude: magnitudes[bin],
                    })
                    .collect();
                candidates.sort_by(|a, b| b.magnitude.total_cmp(&a.magnitude));
                peaks.extend(candidates.into_iter().take(PEAKS_PER_BAND));
            }

            frame += 1;
            offset += HOP_SIZE;
        }

        peaks.sort_by_key(|peak| (peak.frame, peak.bin));
        peaks
    }
}

/// Pairs every anchor peak with the targets in its fan-out region.
fn pair_peaks(peaks: &[Peak]) -> Vec<FingerprintHash> {
    let mut hashes = Vec::new();
    for (index, anchor) in peaks.iter().enumerate() {
        for target in &peaks[index + 1..] {
            let frame_delta = target.frame - anchor.frame;
            if frame_delta > TARGET_FRAMES {
                break;
            }
            if frame_delta == 0 {
                continue;
            }
            let bin_delta = i32::from(target.bin) - i32::from(anchor.bin);
            if bin_delta.abs() > TARGET_BINS {
                continue;
            }
            hashes.push(FingerprintHash {
                anchor_freq: anchor.bin,
                target_freq: target.bin,
                time_delta: frame_delta as u16,
                anchor_time: anchor.frame,
            });
        }
    }
    hashes
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A deterministic multi-tone test signal with peaks moving over time.
    fn test_signal(seconds: f32, sample_rate: u32) -> Vec<f32> {
        let len = (seconds * sample_rate as f32) as usize;
        (0..len)
            .map(|i| {
                let t = i as f32 / sample_rate as f32;
                // Chirping partials spread across several bands.
                0.3 * (2.0 * PI * (220.0 + 40.0 * (t * 0.7).sin()) * t).sin()
                    + 0.25 * (2.0 * PI * (880.0 + 100.0 * (t * 0.3).cos()) * t).sin()
                    + 0.2 * (2.0 * PI * (2500.0 + 300.0 * (t * 0.5).sin()) * t).sin()
                    + 0.15 * (2.0 * PI * 5000.0 * t).sin()
            })
            .collect()
    }

    fn prepared_engine() -> FingerprintEngine {
        let mut engine = FingerprintEngine::new();
        engine.prepare();
        engine
    }

    #[test]
    fn unprepared_engine_refuses() {
        let engine = FingerprintEngine::new();
        let result = engine.fingerprint_samples(&[0.0; 8192], 24_000);
        assert_eq!(
            result.err().map(|e| e.kind),
            Some(crate::error::ErrorKind::FingerprintNotReady)
        );
    }

    #[test]
    fn self_similarity_is_one() {
        let engine = prepared_engine();
        let signal = test_signal(3.0, 24_000);
        let fingerprint = engine.fingerprint_samples(&signal, 24_000).unwrap();
        assert!(!fingerprint.hashes.is_empty(), "no hashes extracted");
        assert!((fingerprint.similarity(&fingerprint) - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn white_noise_buffers_are_dissimilar() {
        let engine = prepared_engine();
        fastrand::seed(0x5eed);
        let noise_a: Vec<f32> = (0..72_000).map(|_| fastrand::f32() * 2.0 - 1.0).collect();
        let noise_b: Vec<f32> = (0..72_000).map(|_| fastrand::f32() * 2.0 - 1.0).collect();

        let fp_a = engine.fingerprint_samples(&noise_a, 24_000).unwrap();
        let fp_b = engine.fingerprint_samples(&noise_b, 24_000).unwrap();
        let similarity = fp_a.similarity(&fp_b);
        assert!(similarity < 0.05, "noise similarity too high: {similarity}");
    }

    #[test]
    fn packed_form_truncates_fields() {
        let hash = FingerprintHash {
            anchor_freq: 0xABC,
            target_freq: 0x123,
            time_delta: 4,
            anchor_time: 99,
        };
        let packed = hash.packed();
        assert_eq!(packed >> 20, 0xABC);
        assert_eq!((packed >> 8) & 0xFFF, 0x123);
        assert_eq!(packed & 0xFF, 4);
    }

    #[test]
    fn duration_and_rate_are_recorded() {
        let engine = prepared_engine();
        let signal = test_signal(2.0, 24_000);
        let fingerprint = engine.fingerprint_samples(&signal, 24_000).unwrap();
        assert!((fingerprint.duration - 2.0).abs() < 0.01);
        assert_eq!(fingerprint.sample_rate, 24_000);
    }
}
