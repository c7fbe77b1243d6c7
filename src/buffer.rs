//! Owned PCM audio buffers.
//!
//! [`AudioBuffer`] is the unit of exchange between the decode side and the
//! real-time renderer: the decoder allocates a buffer per packet, ownership
//! transfers into the render queue on enqueue, and the render callback
//! releases the buffer once every frame has been copied out.
//!
//! The invariant `samples.len() == frame_count * channel_count` holds for
//! every buffer ever constructed; all constructors enforce it.

use std::time::Duration;

use crate::util::ToF32;

/// Exclusively owned block of interleaved 32-bit float samples.
///
/// Samples are interleaved frame by frame: for a stereo buffer the layout
/// is `L R L R …`. Values are nominally in [-1.0, 1.0] but are not clamped;
/// DSP stages may transiently exceed the nominal range.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioBuffer {
    /// Interleaved sample storage.
    samples: Vec<f32>,

    /// Number of frames (samples per channel).
    frame_count: usize,

    /// Number of interleaved channels.
    channel_count: usize,

    /// Sample rate in Hz.
    sample_rate: u32,
}

impl AudioBuffer {
    /// Creates a buffer from interleaved samples.
    ///
    /// # Panics
    ///
    /// Panics if `samples.len()` is not a multiple of `channel_count`, or
    /// if `channel_count` is zero. Buffer construction sits on the decode
    /// path where a violated layout means decoder state corruption; there
    /// is no meaningful recovery.
    #[must_use]
    pub fn from_interleaved(samples: Vec<f32>, channel_count: usize, sample_rate: u32) -> Self {
        assert!(channel_count > 0, "channel count must be non-zero");
        assert_eq!(
            samples.len() % channel_count,
            0,
            "interleaved length must be a multiple of the channel count"
        );

        let frame_count = samples.len() / channel_count;
        Self {
            samples,
            frame_count,
            channel_count,
            sample_rate,
        }
    }

    /// Creates a silent buffer of `frame_count` frames.
    #[must_use]
    pub fn silence(frame_count: usize, channel_count: usize, sample_rate: u32) -> Self {
        Self::from_interleaved(
            vec![0.0; frame_count * channel_count.max(1)],
            channel_count.max(1),
            sample_rate,
        )
    }

    /// Number of frames (samples per channel).
    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    /// Number of interleaved channels.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    /// Sample rate in Hz.
    #[must_use]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Interleaved sample view.
    #[must_use]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Mutable interleaved sample view.
    pub fn samples_mut(&mut self) -> &mut [f32] {
        &mut self.samples
    }

    /// Consumes the buffer, returning its sample storage.
    #[must_use]
    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    /// Wall-clock duration of the buffer.
    #[must_use]
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frame_count as f64 / f64::from(self.sample_rate))
    }

    /// Duration of the buffer in seconds.
    #[must_use]
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frame_count as f64 / f64::from(self.sample_rate)
    }

    /// Peak absolute sample value.
    #[must_use]
    pub fn peak(&self) -> f32 {
        self.samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()))
    }

    /// Downmixes to a mono sample vector by channel averaging.
    #[must_use]
    pub fn to_mono(&self) -> Vec<f32> {
        crate::util::downmix_mono(&self.samples, self.channel_count)
    }

    /// Returns one deinterleaved channel.
    #[must_use]
    pub fn channel(&self, channel: usize) -> Vec<f32> {
        crate::util::deinterleave_channel(&self.samples, self.channel_count, channel)
    }

    /// Root-mean-square level across all channels.
    #[must_use]
    pub fn rms(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum: f32 = self.samples.iter().map(|s| s * s).sum();
        (sum / self.samples.len().to_f32_lossy()).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_invariant_holds() {
        let buffer = AudioBuffer::from_interleaved(vec![0.0; 8], 2, 48_000);
        assert_eq!(buffer.frame_count(), 4);
        assert_eq!(buffer.channel_count(), 2);
        assert_eq!(
            buffer.samples().len(),
            buffer.frame_count() * buffer.channel_count()
        );
    }

    #[test]
    #[should_panic(expected = "multiple of the channel count")]
    fn rejects_ragged_layout() {
        let _ = AudioBuffer::from_interleaved(vec![0.0; 7], 2, 48_000);
    }

    #[test]
    fn duration_follows_rate() {
        let buffer = AudioBuffer::silence(48_000, 2, 48_000);
        assert_eq!(buffer.duration(), Duration::from_secs(1));
    }

    #[test]
    fn mono_downmix() {
        let buffer = AudioBuffer::from_interleaved(vec![1.0, 0.0, -1.0, 1.0], 2, 44_100);
        assert_eq!(buffer.to_mono(), vec![0.5, 0.0]);
    }

    #[test]
    fn peak_is_absolute() {
        let buffer = AudioBuffer::from_interleaved(vec![0.25, -0.75], 1, 44_100);
        assert!((buffer.peak() - 0.75).abs() < f32::EPSILON);
    }
}
