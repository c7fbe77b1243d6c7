//! Waveform overview generation.
//!
//! Decodes a whole file to mono and folds it into a fixed number of
//! display bins, each carrying the most positive and most negative sample
//! it covers. Runs as a cancellable background task off the real-time
//! path.

use tokio_util::sync::CancellationToken;

use crate::{
    config::Config,
    decoder::Decoder,
    error::{Error, Result},
    source::MediaInput,
};

/// Default number of display bins.
pub const DEFAULT_BIN_COUNT: usize = 200;

/// One display bin of the waveform overview.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct WaveformBin {
    /// Most positive sample in the bin, clipped to +1.
    pub max_positive: f32,
    /// Most negative sample in the bin, clipped to −1.
    pub min_negative: f32,
}

/// A complete waveform overview.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Waveform {
    /// Display bins, evenly distributed over the stream.
    pub bins: Vec<WaveformBin>,
    /// Source sample rate in Hz.
    pub sample_rate: u32,
    /// Source duration in seconds.
    pub duration: f64,
}

/// Progress callback: fraction of source samples consumed, in [0, 1].
pub type ProgressCallback = Box<dyn Fn(f32) + Send + Sync>;

/// Folds mono samples into evenly distributed bins.
///
/// Used directly by tests and the URL entry point below.
#[must_use]
pub fn summarize(samples: &[f32], sample_rate: u32, bin_count: usize) -> Waveform {
    let bin_count = bin_count.max(1);
    let mut bins = vec![WaveformBin::default(); bin_count];

    if !samples.is_empty() {
        for (index, sample) in samples.iter().enumerate() {
            // Even distribution without accumulating rounding drift.
            let bin = index * bin_count / samples.len();
            let slot = &mut bins[bin.min(bin_count - 1)];
            if *sample > slot.max_positive {
                slot.max_positive = sample.min(1.0);
            }
            if *sample < slot.min_negative {
                slot.min_negative = sample.max(-1.0);
            }
        }
    }

    Waveform {
        bins,
        sample_rate,
        duration: if sample_rate > 0 {
            samples.len() as f64 / f64::from(sample_rate)
        } else {
            0.0
        },
    }
}

/// Decodes a URL and produces its waveform overview.
///
/// The progress callback fires proportionally to samples consumed; the
/// cancellation token is observed between decode blocks.
///
/// # Errors
///
/// Returns error if the stream cannot be opened or decoded, or
/// `Cancelled` when the token fires mid-decode.
pub async fn generate(
    url: &str,
    bin_count: usize,
    config: &Config,
    progress: Option<ProgressCallback>,
    cancel: CancellationToken,
) -> Result<Waveform> {
    let input = MediaInput::open(url, config).await?;
    let url = url.to_string();
    let config = config.clone();

    // Decoding is blocking work; keep it off the async executor.
    tokio::task::spawn_blocking(move || {
        let mut decoder = Decoder::new(input, &url, &config)?;
        let sample_rate = decoder.sample_rate();
        let total_frames = decoder
            .total_duration()
            .map(|duration| duration.as_secs_f64() * f64::from(sample_rate));

        let mut mono = Vec::new();
        while let Some(buffer) = decoder.next_buffer()? {
            if cancel.is_cancelled() {
                return Err(Error::cancelled("waveform generation cancelled"));
            }

            mono.extend(buffer.to_mono());

            if let (Some(progress), Some(total)) = (progress.as_ref(), total_frames) {
                if total > 0.0 {
                    progress((mono.len() as f64 / total).min(1.0) as f32);
                }
            }
        }

        if let Some(progress) = progress.as_ref() {
            progress(1.0);
        }

        Ok(summarize(&mono, sample_rate, bin_count))
    })
    .await
    .map_err(|e| Error::internal(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bins_capture_extremes() {
        // First half positive ramp, second half negative.
        let mut samples = vec![0.0f32; 1000];
        for (i, slot) in samples.iter_mut().enumerate() {
            *slot = if i < 500 { 0.8 } else { -0.6 };
        }

        let waveform = summarize(&samples, 44_100, 10);
        assert_eq!(waveform.bins.len(), 10);
        assert!((waveform.bins[0].max_positive - 0.8).abs() < 1e-6);
        assert_eq!(waveform.bins[0].min_negative, 0.0);
        assert!((waveform.bins[9].min_negative + 0.6).abs() < 1e-6);
        assert_eq!(waveform.bins[9].max_positive, 0.0);
    }

    #[test]
    fn values_are_clipped_to_unit_range() {
        let samples = vec![2.5f32, -3.0];
        let waveform = summarize(&samples, 48_000, 1);
        assert_eq!(waveform.bins[0].max_positive, 1.0);
        assert_eq!(waveform.bins[0].min_negative, -1.0);
    }

    #[test]
    fn duration_reflects_rate() {
        let samples = vec![0.0f32; 44_100];
        let waveform = summarize(&samples, 44_100, DEFAULT_BIN_COUNT);
        assert!((waveform.duration - 1.0).abs() < 1e-9);
        assert_eq!(waveform.bins.len(), DEFAULT_BIN_COUNT);
    }

    #[test]
    fn empty_input_produces_silent_bins() {
        let waveform = summarize(&[], 44_100, 5);
        assert_eq!(waveform.bins.len(), 5);
        assert!(waveform
            .bins
            .iter()
            .all(|bin| bin.max_positive == 0.0 && bin.min_negative == 0.0));
    }
}
