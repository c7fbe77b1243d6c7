//! 10-band parametric equalizer.
//!
//! A fixed bank of peaking biquads (Audio EQ Cookbook form), one per ISO
//! octave band from 31 Hz to 16 kHz. The equalizer sits on the render
//! path and is safe to adjust from any thread while audio renders:
//! setters store target gains under a short mutex, and the render pass
//! smooths toward them.
//!
//! # Artifact suppression
//!
//! Three mechanisms keep parameter changes inaudible:
//! * Per-pass gain smoothing: `current += (target − current) · 0.05`
//! * Coefficient interpolation: each pass blends 30 % of the newly
//!   computed coefficients into the previous set
//! * Soft state reset: a gain jump larger than 6 dB halves the filter
//!   state once, damping the transient the jump would otherwise ring
//!
//! Out-of-range gains are clamped to ±12 dB and the clamp is reported
//! through a one-shot observer callback.

use std::f32::consts::PI;
use std::sync::Mutex;

/// Lower bound for band gain in dB.
pub const GAIN_MIN_DB: f32 = -12.0;

/// Upper bound for band gain in dB.
pub const GAIN_MAX_DB: f32 = 12.0;

/// Per-pass smoothing factor toward the target gain.
const GAIN_SMOOTHING: f32 = 0.05;

/// Interpolation weight from previous to freshly computed coefficients.
const COEFF_INTERP: f32 = 0.3;

/// Gain jump beyond which the filter state is softly reset.
const SOFT_RESET_THRESHOLD_DB: f32 = 6.0;

/// Scale applied to filter state on a soft reset.
const SOFT_RESET_SCALE: f32 = 0.5;

/// The ten fixed equalizer bands.
///
/// Center frequencies follow the ISO octave series; the Q values widen
/// toward the spectrum edges where neighboring bands are farther apart.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum EqBand {
    /// 31 Hz
    Hz31,
    /// 62 Hz
    Hz62,
    /// 125 Hz
    Hz125,
    /// 250 Hz
    Hz250,
    /// 500 Hz
    Hz500,
    /// 1 kHz
    Hz1000,
    /// 2 kHz
    Hz2000,
    /// 4 kHz
    Hz4000,
    /// 8 kHz
    Hz8000,
    /// 16 kHz
    Hz16000,
}

impl EqBand {
    /// Number of bands.
    pub const COUNT: usize = 10;

    /// All bands in ascending frequency order.
    pub const ALL: [EqBand; Self::COUNT] = [
        EqBand::Hz31,
        EqBand::Hz62,
        EqBand::Hz125,
        EqBand::Hz250,
        EqBand::Hz500,
        EqBand::Hz1000,
        EqBand::Hz2000,
        EqBand::Hz4000,
        EqBand::Hz8000,
        EqBand::Hz16000,
    ];

    /// Band index, 0 (31 Hz) through 9 (16 kHz).
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            Self::Hz31 => 0,
            Self::Hz62 => 1,
            Self::Hz125 => 2,
            Self::Hz250 => 3,
            Self::Hz500 => 4,
            Self::Hz1000 => 5,
            Self::Hz2000 => 6,
            Self::Hz4000 => 7,
            Self::Hz8000 => 8,
            Self::Hz16000 => 9,
        }
    }

    /// Band from index, when in range.
    #[must_use]
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Center frequency in Hz.
    #[must_use]
    pub fn center_hz(self) -> f32 {
        match self {
            Self::Hz31 => 31.0,
            Self::Hz62 => 62.0,
            Self::Hz125 => 125.0,
            Self::Hz250 => 250.0,
            Self::Hz500 => 500.0,
            Self::Hz1000 => 1000.0,
            Self::Hz2000 => 2000.0,
            Self::Hz4000 => 4000.0,
            Self::Hz8000 => 8000.0,
            Self::Hz16000 => 16000.0,
        }
    }

    /// Filter Q for this band.
    #[must_use]
    pub fn q(self) -> f32 {
        match self {
            Self::Hz31 | Self::Hz16000 => 0.5,
            Self::Hz62 | Self::Hz8000 => 0.6,
            Self::Hz125 | Self::Hz250 | Self::Hz4000 => 0.7,
            Self::Hz500 | Self::Hz1000 | Self::Hz2000 => 0.8,
        }
    }
}

/// A reported gain clamp.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ClampEvent {
    /// The band whose setter was called.
    pub band: EqBand,
    /// The out-of-range value the caller passed.
    pub original: f32,
    /// The value actually applied.
    pub clamped: f32,
}

/// Observer invoked once per clamp event.
pub type ClampObserver = Box<dyn Fn(ClampEvent) + Send + Sync>;

/// Normalized peaking biquad coefficients.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
struct Coefficients {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
}

impl Coefficients {
    /// Identity (pass-through) coefficients.
    fn identity() -> Self {
        Self {
            b0: 1.0,
            ..Self::default()
        }
    }

    /// Peaking EQ coefficients per the Audio EQ Cookbook.
    ///
    /// `a = 10^(gain_db/40)` so boost and cut are symmetric around unity.
    fn peaking(center_hz: f32, q: f32, gain_db: f32, sample_rate: f32) -> Self {
        let a = 10.0_f32.powf(gain_db / 40.0);
        let omega = 2.0 * PI * center_hz / sample_rate;
        let cos_omega = omega.cos();
        let alpha = omega.sin() / (2.0 * q);

        let b0 = 1.0 + alpha * a;
        let b1 = -2.0 * cos_omega;
        let b2 = 1.0 - alpha * a;
        let a0 = 1.0 + alpha / a;
        let a1 = -2.0 * cos_omega;
        let a2 = 1.0 - alpha / a;

        let a0_inv = 1.0 / a0;
        Self {
            b0: b0 * a0_inv,
            b1: b1 * a0_inv,
            b2: b2 * a0_inv,
            a1: a1 * a0_inv,
            a2: a2 * a0_inv,
        }
    }

    /// Linear interpolation toward `other`.
    fn lerp(self, other: Self, t: f32) -> Self {
        Self {
            b0: self.b0 + (other.b0 - self.b0) * t,
            b1: self.b1 + (other.b1 - self.b1) * t,
            b2: self.b2 + (other.b2 - self.b2) * t,
            a1: self.a1 + (other.a1 - self.a1) * t,
            a2: self.a2 + (other.a2 - self.a2) * t,
        }
    }
}

/// One band: gain targets, coefficients, and per-channel filter state.
#[derive(Debug)]
struct BandFilter {
    /// Gain the setters asked for.
    target_db: f32,

    /// Gain the smoothing has reached.
    current_db: f32,

    /// Coefficients applied on the previous pass.
    coeffs: Coefficients,

    /// Whether `coeffs` holds a previous pass to interpolate from.
    primed: bool,

    /// Transposed direct form II state (z1, z2) per channel.
    state: Vec<[f32; 2]>,

    /// One-shot request to halve the state on the next pass.
    soft_reset: bool,
}

impl BandFilter {
    fn new() -> Self {
        Self {
            target_db: 0.0,
            current_db: 0.0,
            coeffs: Coefficients::identity(),
            primed: false,
            state: Vec::new(),
            soft_reset: false,
        }
    }

    /// Clears filter memory without touching gains.
    fn clear_state(&mut self) {
        for z in &mut self.state {
            *z = [0.0; 2];
        }
        self.primed = false;
    }
}

/// Shared state behind the equalizer mutex.
#[derive(Debug)]
struct EqState {
    bands: Vec<BandFilter>,
    sample_rate: f32,
    channels: usize,
}

/// Thread-safe 10-band parametric equalizer.
///
/// Setters may be called from any thread; [`Equalizer::process`] is called
/// from the render callback. Both take the same mutex for short, bounded
/// sections.
pub struct Equalizer {
    state: Mutex<EqState>,
    clamp_observer: Mutex<Option<ClampObserver>>,
}

impl Default for Equalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Equalizer {
    /// Creates an equalizer with all gains flat.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(EqState {
                bands: (0..EqBand::COUNT).map(|_| BandFilter::new()).collect(),
                sample_rate: 0.0,
                channels: 0,
            }),
            clamp_observer: Mutex::new(None),
        }
    }

    /// Registers the observer notified on each gain clamp.
    ///
    /// Replaces any previous observer.
    pub fn set_clamp_observer(&self, observer: ClampObserver) {
        *self.clamp_observer.lock().unwrap() = Some(observer);
    }

    /// Sets a band's gain in dB, returning the value actually applied.
    ///
    /// Out-of-range inputs are clamped to [−12, +12] dB and reported to
    /// the clamp observer. The gain takes effect gradually over the next
    /// render passes.
    pub fn set_gain(&self, band: EqBand, gain_db: f32) -> f32 {
        let clamped = if gain_db.is_finite() {
            gain_db.clamp(GAIN_MIN_DB, GAIN_MAX_DB)
        } else {
            0.0
        };

        if (clamped - gain_db).abs() > f32::EPSILON || !gain_db.is_finite() {
            warn!(
                "eq gain {gain_db} dB out of range for {band:?}, clamped to {clamped} dB"
            );
            if let Some(observer) = self.clamp_observer.lock().unwrap().as_ref() {
                observer(ClampEvent {
                    band,
                    original: gain_db,
                    clamped,
                });
            }
        }

        let mut state = self.state.lock().unwrap();
        let filter = &mut state.bands[band.index()];
        if (clamped - filter.current_db).abs() > SOFT_RESET_THRESHOLD_DB {
            filter.soft_reset = true;
        }
        filter.target_db = clamped;
        clamped
    }

    /// Returns a band's target gain in dB.
    #[must_use]
    pub fn gain(&self, band: EqBand) -> f32 {
        self.state.lock().unwrap().bands[band.index()].target_db
    }

    /// Returns all target gains in band order.
    #[must_use]
    pub fn gains(&self) -> [f32; EqBand::COUNT] {
        let state = self.state.lock().unwrap();
        let mut gains = [0.0; EqBand::COUNT];
        for (gain, band) in gains.iter_mut().zip(state.bands.iter()) {
            *gain = band.target_db;
        }
        gains
    }

    /// Resets all gains to flat and clears filter memory.
    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap();
        for band in &mut state.bands {
            band.target_db = 0.0;
            band.current_db = 0.0;
            band.soft_reset = false;
            band.clear_state();
        }
    }

    /// Whether any band is (or is moving) away from flat.
    #[must_use]
    pub fn is_active(&self) -> bool {
        let state = self.state.lock().unwrap();
        state
            .bands
            .iter()
            .any(|band| band.target_db.abs() > 1e-3 || band.current_db.abs() > 1e-3)
    }

    /// Processes one interleaved block in place.
    ///
    /// Bands run serially; each band filters every channel with its own
    /// (z1, z2) state in transposed direct form II. State survives across
    /// calls; a sample-rate change clears it.
    pub fn process(&self, samples: &mut [f32], channels: usize, sample_rate: u32) {
        if channels == 0 || samples.is_empty() || sample_rate == 0 {
            return;
        }

        // Called from the render callback: a poisoned lock must not
        // panic across the hardware boundary.
        let Ok(mut state) = self.state.lock() else {
            return;
        };

        let rate = sample_rate as f32;
        if (state.sample_rate - rate).abs() > f32::EPSILON || state.channels != channels {
            state.sample_rate = rate;
            state.channels = channels;
            for band in &mut state.bands {
                band.state = vec![[0.0; 2]; channels];
                band.primed = false;
            }
        }

        for (index, band) in state.bands.iter_mut().enumerate() {
            if band.soft_reset {
                for z in &mut band.state {
                    z[0] *= SOFT_RESET_SCALE;
                    z[1] *= SOFT_RESET_SCALE;
                }
                band.soft_reset = false;
            }

            band.current_db += (band.target_db - band.current_db) * GAIN_SMOOTHING;

            let eq_band = EqBand::ALL[index];
            let fresh = Coefficients::peaking(eq_band.center_hz(), eq_band.q(), band.current_db, rate);
            let applied = if band.primed {
                band.coeffs.lerp(fresh, COEFF_INTERP)
            } else {
                fresh
            };
            band.coeffs = applied;
            band.primed = true;

            let Coefficients { b0, b1, b2, a1, a2 } = applied;
            for (channel, z) in band.state.iter_mut().enumerate() {
                let mut z1 = z[0];
                let mut z2 = z[1];
                let mut i = channel;
                while i < samples.len() {
                    let x = samples[i];
                    let y = b0 * x + z1;
                    z1 = b1 * x - a1 * y + z2;
                    z2 = b2 * x - a2 * y;
                    samples[i] = y;
                    i += channels;
                }
                z[0] = z1;
                z[1] = z2;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn gain_is_clamped_and_reported() {
        let eq = Equalizer::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        eq.set_clamp_observer(Box::new(move |event| {
            sink.lock().unwrap().push(event);
        }));

        let applied = eq.set_gain(EqBand::Hz500, 20.0);
        assert!((applied - GAIN_MAX_DB).abs() < f32::EPSILON);
        assert!((eq.gain(EqBand::Hz500) - GAIN_MAX_DB).abs() < f32::EPSILON);

        let applied = eq.set_gain(EqBand::Hz31, -30.0);
        assert!((applied - GAIN_MIN_DB).abs() < f32::EPSILON);

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].band, EqBand::Hz500);
        assert!((events[0].original - 20.0).abs() < f32::EPSILON);
        assert!((events[0].clamped - 12.0).abs() < f32::EPSILON);
    }

    #[test]
    fn in_range_gain_does_not_notify() {
        let eq = Equalizer::new();
        let count = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&count);
        eq.set_clamp_observer(Box::new(move |_| {
            sink.fetch_add(1, Ordering::SeqCst);
        }));

        eq.set_gain(EqBand::Hz1000, 6.0);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn flat_eq_is_identity() {
        let eq = Equalizer::new();
        let input: Vec<f32> = (0..512)
            .map(|i| (i as f32 * 0.05).sin() * 0.8)
            .collect();
        let mut output = input.clone();
        eq.process(&mut output, 2, 48_000);

        for (a, b) in input.iter().zip(output.iter()) {
            assert!((a - b).abs() < 1e-6, "flat EQ must pass through");
        }
    }

    #[test]
    fn boost_raises_band_energy() {
        let eq = Equalizer::new();
        eq.set_gain(EqBand::Hz1000, 12.0);

        let rate = 48_000u32;
        let tone: Vec<f32> = (0..1024)
            .map(|i| (2.0 * PI * 1000.0 * i as f32 / rate as f32).sin() * 0.25)
            .collect();

        let rms = |buf: &[f32]| {
            (buf.iter().map(|s| s * s).sum::<f32>() / buf.len() as f32).sqrt()
        };

        // Let the gain smoothing converge, then measure.
        let mut last = 0.0;
        for _ in 0..200 {
            let mut block = tone.clone();
            eq.process(&mut block, 1, rate);
            last = rms(&block);
        }
        assert!(
            last > rms(&tone) * 1.8,
            "12 dB boost should raise 1 kHz energy, rms {last}"
        );
    }

    #[test]
    fn big_jump_requests_soft_reset() {
        let eq = Equalizer::new();
        // Prime some state.
        let mut block = vec![0.5f32; 256];
        eq.process(&mut block, 1, 44_100);

        eq.set_gain(EqBand::Hz1000, 10.0);
        assert!(eq.state.lock().unwrap().bands[EqBand::Hz1000.index()].soft_reset);

        // Small follow-up change does not.
        let mut block = vec![0.5f32; 256];
        eq.process(&mut block, 1, 44_100);
        let current = eq.state.lock().unwrap().bands[EqBand::Hz1000.index()].current_db;
        eq.set_gain(EqBand::Hz1000, current + 1.0);
        assert!(!eq.state.lock().unwrap().bands[EqBand::Hz1000.index()].soft_reset);
    }

    #[test]
    fn band_table_matches_design() {
        assert_eq!(EqBand::Hz31.center_hz(), 31.0);
        assert_eq!(EqBand::Hz31.q(), 0.5);
        assert_eq!(EqBand::Hz500.q(), 0.8);
        assert_eq!(EqBand::Hz4000.q(), 0.7);
        assert_eq!(EqBand::Hz16000.q(), 0.5);
        assert_eq!(EqBand::from_index(5), Some(EqBand::Hz1000));
        assert_eq!(EqBand::from_index(10), None);
    }
}
