//! Spectrum analysis feed for visualizers.
//!
//! A ring accumulator on the render path: interleaved samples are pushed
//! from the render callback, channel 0 is collected, and once a full FFT
//! frame accumulates it is windowed, transformed, folded into logarithmic
//! bands, normalized to [0, 1] and temporally smoothed. The band callback
//! fires on the audio thread; UI layers marshal themselves.

use std::{
    f32::consts::PI,
    sync::{Arc, Mutex},
};

use rustfft::{num_complex::Complex, Fft, FftPlanner};

/// Default FFT frame size.
pub const DEFAULT_FFT_SIZE: usize = 2048;

/// Default number of output bands.
pub const DEFAULT_BAND_COUNT: usize = 64;

/// Default temporal smoothing factor (`out = s·prev + (1−s)·new`).
pub const DEFAULT_SMOOTHING: f32 = 0.7;

/// Dynamic range mapped onto [0, 1], in dB.
const RANGE_DB: f32 = 60.0;

/// Callback receiving one normalized band frame.
pub type SpectrumCallback = Box<dyn Fn(&[f32]) + Send + Sync>;

/// Mutable analysis state behind the feed mutex.
struct FeedState {
    ring: Vec<f32>,
    /// Complex FFT scratch.
    scratch: Vec<Complex<f32>>,
    /// Smoothed band output.
    bands: Vec<f32>,
    /// Precomputed Hann window.
    window: Vec<f32>,
    /// Per-band (start, end) bin ranges.
    edges: Vec<(usize, usize)>,
    callback: Option<SpectrumCallback>,
}

/// Ring-buffered FFT band analyzer.
pub struct SpectrumFeed {
    fft_size: usize,
    smoothing: f32,
    fft: Arc<dyn Fft<f32>>,
    state: Mutex<FeedState>,
}

impl Default for SpectrumFeed {
    fn default() -> Self {
        Self::new(DEFAULT_FFT_SIZE, DEFAULT_BAND_COUNT, DEFAULT_SMOOTHING)
    }
}

impl SpectrumFeed {
    /// Creates a feed with explicit FFT size, band count and smoothing.
    #[must_use]
    pub fn new(fft_size: usize, band_count: usize, smoothing: f32) -> Self {
        let fft_size = fft_size.next_power_of_two().max(256);
        let band_count = band_count.clamp(8, fft_size / 4);

        let window = (0..fft_size)
            .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / fft_size as f32).cos()))
            .collect();

        // Logarithmic band edges over bins [1, fft_size/2].
        let half = fft_size / 2;
        let mut edges = Vec::with_capacity(band_count);
        let log_lo = 1.0_f32.ln();
        let log_hi = (half as f32).ln();
        for band in 0..band_count {
            let t0 = band as f32 / band_count as f32;
            let t1 = (band + 1) as f32 / band_count as f32;
            let start = (log_lo + (log_hi - log_lo) * t0).exp() as usize;
            let end = ((log_lo + (log_hi - log_lo) * t1).exp() as usize).max(start + 1);
            edges.push((start.min(half - 1), end.min(half)));
        }

        Self {
            fft_size,
            smoothing: smoothing.clamp(0.0, 0.99),
            fft: FftPlanner::new().plan_fft_forward(fft_size),
            state: Mutex::new(FeedState {
                ring: Vec::with_capacity(fft_size),
                scratch: vec![Complex::default(); fft_size],
                bands: vec![0.0; band_count],
                window,
                edges,
                callback: None,
            }),
        }
    }

    /// Registers the band callback (replaces any previous one).
    pub fn set_callback(&self, callback: Option<SpectrumCallback>) {
        self.state.lock().unwrap().callback = callback;
    }

    /// Returns the latest smoothed band frame.
    #[must_use]
    pub fn bands(&self) -> Vec<f32> {
        self.state.lock().unwrap().bands.clone()
    }

    /// Pushes interleaved samples from the render path.
    ///
    /// Channel 0 is accumulated; every time a full frame is available the
    /// band output is recomputed and the callback fires.
    pub fn push(&self, samples: &[f32], channels: usize) {
        if channels == 0 {
            return;
        }

        let Ok(mut state) = self.state.lock() else {
            return;
        };

        for sample in samples.iter().step_by(channels) {
            state.ring.push(*sample);
            if state.ring.len() >= self.fft_size {
                self.analyze(&mut state);
                state.ring.clear();
            }
        }
    }

    /// Runs one FFT frame and updates the smoothed bands.
    fn analyze(&self, state: &mut FeedState) {
        for (slot, (sample, w)) in state
            .scratch
            .iter_mut()
            .zip(state.ring.iter().zip(state.window.iter()))
        {
            *slot = Complex::new(sample * w, 0.0);
        }
        self.fft.process(&mut state.scratch);

        let scale = 2.0 / self.fft_size as f32;
        let smoothing = self.smoothing;
        for (band, (start, end)) in state.edges.clone().into_iter().enumerate() {
            let mut magnitude = 0.0;
            for bin in start..end {
                magnitude += state.scratch[bin].norm();
            }
            magnitude = magnitude * scale / (end - start) as f32;

            // Map the magnitude in dB onto [0, 1] over the display range.
            let db = 20.0 * magnitude.max(1e-9).log10();
            let normalized = ((db + RANGE_DB) / RANGE_DB).clamp(0.0, 1.0);

            state.bands[band] = smoothing * state.bands[band] + (1.0 - smoothing) * normalized;
        }

        if let Some(callback) = state.callback.as_ref() {
            callback(&state.bands);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn callback_fires_per_full_frame() {
        let feed = SpectrumFeed::new(1024, 32, 0.0);
        let count = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&count);
        feed.set_callback(Some(Box::new(move |bands| {
            assert_eq!(bands.len(), 32);
            sink.fetch_add(1, Ordering::SeqCst);
        })));

        // Stereo: 2048 interleaved samples carry 1024 frames of channel 0.
        feed.push(&vec![0.1f32; 2048], 2);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        feed.push(&vec![0.1f32; 4096], 2);
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn bands_stay_normalized() {
        let feed = SpectrumFeed::new(1024, 32, 0.5);
        let rate = 48_000.0;
        let tone: Vec<f32> = (0..8192)
            .map(|i| (2.0 * PI * 1000.0 * i as f32 / rate).sin())
            .collect();
        feed.push(&tone, 1);

        for value in feed.bands() {
            assert!((0.0..=1.0).contains(&value));
        }
    }

    #[test]
    fn tone_lands_in_the_right_band() {
        let fft_size = 2048;
        let feed = SpectrumFeed::new(fft_size, 64, 0.0);
        let rate = 48_000.0;
        let freq = 4000.0;
        let tone: Vec<f32> = (0..fft_size)
            .map(|i| (2.0 * PI * freq * i as f32 / rate).sin())
            .collect();
        feed.push(&tone, 1);

        let bands = feed.bands();
        let loudest = bands
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();

        // The tone bin is fft_size*freq/rate ≈ 170; find its band.
        let bin = (fft_size as f32 * freq / rate) as usize;
        let log_hi = (fft_size as f32 / 2.0).ln();
        let expected = ((bin as f32).ln() / log_hi * 64.0) as usize;
        assert!(
            loudest.abs_diff(expected) <= 2,
            "loudest band {loudest}, expected near {expected}"
        );
    }
}
