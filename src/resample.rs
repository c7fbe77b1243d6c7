//! Sample-rate and channel-layout conversion.
//!
//! The renderer consumes PCM at the hardware sample rate; decoded streams
//! arrive at whatever rate the codec used. [`RateConverter`] bridges the
//! two on the decode side of the queue, so the render callback never
//! resamples. Channel layout conversion is a plain matrix fold and is
//! handled by [`convert_channels`].
//!
//! Resampling uses rubato's FFT-based converter with a fixed input chunk;
//! input is accumulated across arbitrarily sized decoder buffers and
//! flushed with zero padding at end of stream.

use rubato::{FftFixedIn, Resampler};

use crate::{buffer::AudioBuffer, error::Result};

/// Input chunk size for the FFT resampler, in frames.
const CHUNK_SIZE: usize = 1024;

/// Number of FFT sub-chunks per process call.
const SUB_CHUNKS: usize = 2;

/// Streaming sample-rate converter for decoded buffers.
///
/// Feed decoder output through [`RateConverter::process`]; each call
/// returns as many fully converted frames as the accumulated input allows
/// (possibly none). Call [`RateConverter::finish`] at end of stream to
/// drain the tail.
pub struct RateConverter {
    inner: FftFixedIn<f32>,
    channels: usize,
    input_rate: u32,
    output_rate: u32,

    /// Per-channel staging for input not yet consumed by the FFT chunks.
    pending: Vec<Vec<f32>>,

    /// Preallocated per-channel output scratch.
    scratch: Vec<Vec<f32>>,
}

impl RateConverter {
    /// Creates a converter between two rates for a channel count.
    ///
    /// # Errors
    ///
    /// Returns `ResourceAllocation` when the converter cannot be built
    /// (zero rates or an unsupported ratio).
    pub fn new(input_rate: u32, output_rate: u32, channels: usize) -> Result<Self> {
        let inner = FftFixedIn::new(
            input_rate as usize,
            output_rate as usize,
            CHUNK_SIZE,
            SUB_CHUNKS,
            channels,
        )?;
        let scratch = inner.output_buffer_allocate(true);

        Ok(Self {
            inner,
            channels,
            input_rate,
            output_rate,
            pending: vec![Vec::new(); channels],
            scratch,
        })
    }

    /// Whether this converter changes anything.
    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.input_rate == self.output_rate
    }

    /// The output sample rate in Hz.
    #[must_use]
    pub fn output_rate(&self) -> u32 {
        self.output_rate
    }

    /// Feeds one decoded buffer, returning converted frames when a full
    /// chunk became available.
    ///
    /// Identity conversions pass the buffer through untouched.
    ///
    /// # Errors
    ///
    /// Returns an error when the inner resampler rejects a chunk; this
    /// indicates converter misuse, not bad audio.
    pub fn process(&mut self, buffer: AudioBuffer) -> Result<Option<AudioBuffer>> {
        debug_assert_eq!(buffer.channel_count(), self.channels);

        if self.is_identity() {
            return Ok(Some(buffer));
        }

        // Deinterleave into the staging area.
        for (channel, staged) in self.pending.iter_mut().enumerate() {
            staged.extend(
                buffer
                    .samples()
                    .iter()
                    .skip(channel)
                    .step_by(self.channels),
            );
        }

        self.drain_ready()
    }

    /// Drains the staged tail, padding the final chunk with silence.
    ///
    /// # Errors
    ///
    /// Same failure surface as [`RateConverter::process`].
    pub fn finish(&mut self) -> Result<Option<AudioBuffer>> {
        if self.is_identity() || self.pending[0].is_empty() {
            return Ok(None);
        }

        let needed = self.inner.input_frames_next();
        let staged = self.pending[0].len();
        if staged < needed {
            for channel in &mut self.pending {
                channel.resize(needed, 0.0);
            }
        }

        self.drain_ready()
    }

    /// Runs full chunks out of the staging area.
    fn drain_ready(&mut self) -> Result<Option<AudioBuffer>> {
        let mut output: Vec<f32> = Vec::new();

        while self.pending[0].len() >= self.inner.input_frames_next() {
            let (consumed, produced) =
                self.inner
                    .process_into_buffer(&self.pending, &mut self.scratch, None)?;

            for channel in &mut self.pending {
                channel.drain(0..consumed);
            }

            let base = output.len();
            output.resize(base + produced * self.channels, 0.0);
            for (channel, converted) in self.scratch.iter().enumerate() {
                for (frame, sample) in converted.iter().take(produced).enumerate() {
                    output[base + frame * self.channels + channel] = *sample;
                }
            }
        }

        if output.is_empty() {
            Ok(None)
        } else {
            Ok(Some(AudioBuffer::from_interleaved(
                output,
                self.channels,
                self.output_rate,
            )))
        }
    }
}

/// Converts a buffer to a different channel count.
///
/// * Mono to many: the mono channel is copied to every output channel
/// * Many to mono: channels are averaged
/// * Stereo to more: L/R fill the first pair, the rest is silent
/// * More to stereo: left takes even channels, right takes odd, averaged
///
/// Identity conversions return the input unchanged.
#[must_use]
pub fn convert_channels(buffer: AudioBuffer, target: usize) -> AudioBuffer {
    let source = buffer.channel_count();
    if target == 0 || source == target {
        return buffer;
    }

    let frames = buffer.frame_count();
    let rate = buffer.sample_rate();
    let mut output = vec![0.0f32; frames * target];

    match (source, target) {
        (1, _) => {
            for (frame, sample) in buffer.samples().iter().enumerate() {
                for channel in 0..target {
                    output[frame * target + channel] = *sample;
                }
            }
        }
        (_, 1) => {
            output = buffer.to_mono();
        }
        _ => {
            let samples = buffer.samples();
            for frame in 0..frames {
                for channel in 0..target {
                    // Fold extra source channels onto the stereo pair by
                    // parity; missing channels stay silent.
                    let mut sum = 0.0;
                    let mut count = 0u32;
                    let mut src = channel;
                    while src < source {
                        sum += samples[frame * source + src];
                        count += 1;
                        src += target;
                    }
                    if count > 0 {
                        output[frame * target + channel] = sum / count as f32;
                    }
                }
            }
        }
    }

    AudioBuffer::from_interleaved(output, target, rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_rate_is_pass_through() {
        let mut converter = RateConverter::new(48_000, 48_000, 2).expect("converter");
        assert!(converter.is_identity());

        let buffer = AudioBuffer::from_interleaved(vec![0.1, 0.2, 0.3, 0.4], 2, 48_000);
        let out = converter.process(buffer.clone()).expect("process");
        assert_eq!(out, Some(buffer));
    }

    #[test]
    fn conversion_changes_frame_count_by_ratio() {
        let mut converter = RateConverter::new(44_100, 88_200, 1).expect("converter");

        let mut produced = 0usize;
        let mut consumed = 0usize;
        for _ in 0..32 {
            let block = AudioBuffer::silence(441, 1, 44_100);
            consumed += block.frame_count();
            if let Some(out) = converter.process(block).expect("process") {
                assert_eq!(out.sample_rate(), 88_200);
                produced += out.frame_count();
            }
        }
        if let Some(out) = converter.finish().expect("finish") {
            produced += out.frame_count();
        }

        let expected = consumed * 2;
        let deviation = (produced as i64 - expected as i64).unsigned_abs() as usize;
        // FFT resamplers carry latency; allow a few chunks of slack.
        assert!(
            deviation < 4 * CHUNK_SIZE,
            "expected ~{expected} frames, produced {produced}"
        );
    }

    #[test]
    fn mono_to_stereo_duplicates() {
        let mono = AudioBuffer::from_interleaved(vec![0.5, -0.5], 1, 44_100);
        let stereo = convert_channels(mono, 2);
        assert_eq!(stereo.channel_count(), 2);
        assert_eq!(stereo.samples(), &[0.5, 0.5, -0.5, -0.5]);
    }

    #[test]
    fn stereo_to_mono_averages() {
        let stereo = AudioBuffer::from_interleaved(vec![1.0, 0.0, 0.0, 1.0], 2, 44_100);
        let mono = convert_channels(stereo, 1);
        assert_eq!(mono.samples(), &[0.5, 0.5]);
    }
}
