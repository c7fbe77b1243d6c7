//! Low-frequency oscillator for modulation effects.

use std::f32::consts::TAU;

/// Sine LFO advanced once per frame.
#[derive(Clone, Debug)]
pub struct Lfo {
    phase: f32,
    increment: f32,
}

impl Lfo {
    /// Creates an LFO at the given frequency, with an optional phase
    /// offset in cycles (0.25 = 90°).
    #[must_use]
    pub fn new(frequency_hz: f32, sample_rate: f32, phase: f32) -> Self {
        Self {
            phase: phase.fract(),
            increment: frequency_hz / sample_rate.max(1.0),
        }
    }

    /// Advances one frame and returns the value in [-1, 1].
    #[inline]
    pub fn advance(&mut self) -> f32 {
        let value = (self.phase * TAU).sin();
        self.phase += self.increment;
        if self.phase >= 1.0 {
            self.phase -= 1.0;
        }
        value
    }

    /// Resets the phase.
    pub fn reset(&mut self) {
        self.phase = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_cycle_returns_near_zero() {
        let rate = 1000.0;
        let mut lfo = Lfo::new(10.0, rate, 0.0);
        let mut last = 0.0;
        for _ in 0..100 {
            last = lfo.advance();
        }
        // After exactly one cycle the next value is sin(0) again.
        assert!(last.abs() < 0.07);
    }

    #[test]
    fn stays_bounded() {
        let mut lfo = Lfo::new(7.3, 48_000.0, 0.25);
        for _ in 0..10_000 {
            let v = lfo.advance();
            assert!((-1.0..=1.0).contains(&v));
        }
    }
}
