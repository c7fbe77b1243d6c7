//! File-processing helpers.
//!
//! Self-contained conversions built on the same decode stack as
//! playback: transcode to WAV, trim with fades, concatenate, resample,
//! channel conversion, audio extraction from A/V containers, and stream
//! probing. Decoding goes through the media library; output is PCM WAV
//! (16/24-bit integer or 32-bit float).
//!
//! All helpers are blocking and intended for worker threads or CLI use;
//! none of them touch the real-time path.

use std::path::Path;

use crate::{
    buffer::AudioBuffer,
    config::Config,
    decoder::Decoder,
    error::{Error, Result},
    resample::{convert_channels, RateConverter},
    source::MediaInput,
    stream_info::StreamInfo,
};

/// Output PCM encodings for WAV.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum WavEncoding {
    /// 16-bit signed integer.
    #[default]
    Pcm16,
    /// 24-bit signed integer.
    Pcm24,
    /// 32-bit float.
    Float32,
}

/// Options for [`transcode`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TranscodeOptions {
    /// Output encoding.
    pub encoding: WavEncoding,
    /// Output sample rate; `None` keeps the source rate.
    pub sample_rate: Option<u32>,
    /// Output channel count; `None` keeps the source layout.
    pub channels: Option<usize>,
}

/// Summary of a completed conversion.
#[derive(Clone, Debug, PartialEq)]
pub struct ConversionSummary {
    /// Frames written.
    pub frames: usize,
    /// Output sample rate in Hz.
    pub sample_rate: u32,
    /// Output channel count.
    pub channels: usize,
    /// Output duration in seconds.
    pub duration: f64,
}

impl From<&AudioBuffer> for ConversionSummary {
    fn from(buffer: &AudioBuffer) -> Self {
        Self {
            frames: buffer.frame_count(),
            sample_rate: buffer.sample_rate(),
            channels: buffer.channel_count(),
            duration: buffer.duration_secs(),
        }
    }
}

/// Decodes a whole local file into one buffer.
///
/// # Errors
///
/// Propagates open and decode failures.
pub fn decode_file(path: &str, config: &Config) -> Result<AudioBuffer> {
    let input = MediaInput::open_path(path)?;
    let mut decoder = Decoder::new(input, path, config)?;
    let channels = usize::from(decoder.channels().max(1));
    let sample_rate = decoder.sample_rate();

    let mut samples = Vec::new();
    while let Some(buffer) = decoder.next_buffer()? {
        samples.extend_from_slice(buffer.samples());
    }

    Ok(AudioBuffer::from_interleaved(samples, channels, sample_rate))
}

/// Probes a local file without decoding it fully.
///
/// # Errors
///
/// Propagates open and probe failures.
pub fn audio_info(path: &str, config: &Config) -> Result<StreamInfo> {
    let input = MediaInput::open_path(path)?;
    let decoder = Decoder::new(input, path, config)?;
    Ok(decoder.stream_info().clone())
}

/// Writes a buffer as a WAV file.
///
/// # Errors
///
/// Propagates filesystem and encoder failures.
pub fn write_wav(path: impl AsRef<Path>, buffer: &AudioBuffer, encoding: WavEncoding) -> Result<()> {
    let (bits, sample_format) = match encoding {
        WavEncoding::Pcm16 => (16, hound::SampleFormat::Int),
        WavEncoding::Pcm24 => (24, hound::SampleFormat::Int),
        WavEncoding::Float32 => (32, hound::SampleFormat::Float),
    };

    let spec = hound::WavSpec {
        channels: u16::try_from(buffer.channel_count())
            .map_err(|_| Error::invalid_parameter("too many channels for WAV"))?,
        sample_rate: buffer.sample_rate(),
        bits_per_sample: bits,
        sample_format,
    };

    let mut writer = hound::WavWriter::create(path, spec)?;
    match encoding {
        WavEncoding::Pcm16 => {
            for sample in buffer.samples() {
                let scaled = (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)).round() as i16;
                writer.write_sample(scaled)?;
            }
        }
        WavEncoding::Pcm24 => {
            const MAX_24: f32 = 8_388_607.0;
            for sample in buffer.samples() {
                let scaled = (sample.clamp(-1.0, 1.0) * MAX_24).round() as i32;
                writer.write_sample(scaled)?;
            }
        }
        WavEncoding::Float32 => {
            for sample in buffer.samples() {
                writer.write_sample(*sample)?;
            }
        }
    }
    writer.finalize()?;
    Ok(())
}

/// Resamples and/or re-layouts a buffer offline.
fn convert_buffer(
    buffer: AudioBuffer,
    sample_rate: Option<u32>,
    channels: Option<usize>,
) -> Result<AudioBuffer> {
    let mut buffer = match channels {
        Some(target) if target > 0 => convert_channels(buffer, target),
        _ => buffer,
    };

    if let Some(target_rate) = sample_rate {
        if target_rate > 0 && target_rate != buffer.sample_rate() {
            let channel_count = buffer.channel_count();
            let mut converter =
                RateConverter::new(buffer.sample_rate(), target_rate, channel_count)?;

            let mut samples = Vec::new();
            if let Some(converted) = converter.process(buffer)? {
                samples.extend_from_slice(converted.samples());
            }
            if let Some(tail) = converter.finish()? {
                samples.extend_from_slice(tail.samples());
            }
            buffer = AudioBuffer::from_interleaved(samples, channel_count, target_rate);
        }
    }

    Ok(buffer)
}

/// Transcodes a file to WAV with optional rate/layout conversion.
///
/// # Errors
///
/// Propagates decode, conversion and encode failures.
pub fn transcode(
    input: &str,
    output: impl AsRef<Path>,
    options: &TranscodeOptions,
    config: &Config,
) -> Result<ConversionSummary> {
    let decoded = decode_file(input, config)?;
    let converted = convert_buffer(decoded, options.sample_rate, options.channels)?;
    write_wav(output, &converted, options.encoding)?;
    Ok(ConversionSummary::from(&converted))
}

/// Extracts the audio track of an A/V container to WAV.
///
/// Identical to [`transcode`] with default options; the decode stack
/// ignores non-audio tracks.
///
/// # Errors
///
/// Propagates decode and encode failures.
pub fn extract_audio(
    input: &str,
    output: impl AsRef<Path>,
    config: &Config,
) -> Result<ConversionSummary> {
    transcode(input, output, &TranscodeOptions::default(), config)
}

/// Resamples a file to a target rate, writing WAV.
///
/// # Errors
///
/// Propagates decode, resample and encode failures.
pub fn resample_file(
    input: &str,
    output: impl AsRef<Path>,
    target_rate: u32,
    config: &Config,
) -> Result<ConversionSummary> {
    transcode(
        input,
        output,
        &TranscodeOptions {
            sample_rate: Some(target_rate),
            ..TranscodeOptions::default()
        },
        config,
    )
}

/// Converts a file to a target channel count, writing WAV.
///
/// # Errors
///
/// Propagates decode, conversion and encode failures.
pub fn convert_channel_count(
    input: &str,
    output: impl AsRef<Path>,
    channels: usize,
    config: &Config,
) -> Result<ConversionSummary> {
    transcode(
        input,
        output,
        &TranscodeOptions {
            channels: Some(channels),
            ..TranscodeOptions::default()
        },
        config,
    )
}

/// Cuts `[start, end)` out of a buffer, applying optional edge fades.
///
/// Exposed for testability; [`trim`] wraps it with decode and encode.
#[must_use]
pub fn trim_buffer(
    buffer: &AudioBuffer,
    start: f64,
    end: Option<f64>,
    fade_in: Option<f64>,
    fade_out: Option<f64>,
) -> AudioBuffer {
    let rate = buffer.sample_rate();
    let channels = buffer.channel_count();
    let total = buffer.frame_count();

    let to_frame = |seconds: f64| ((seconds.max(0.0) * f64::from(rate)) as usize).min(total);
    let start_frame = to_frame(start);
    let end_frame = end.map_or(total, to_frame).max(start_frame);

    let mut samples =
        buffer.samples()[start_frame * channels..end_frame * channels].to_vec();
    let frames = end_frame - start_frame;

    if let Some(seconds) = fade_in {
        let fade_frames = ((seconds.max(0.0) * f64::from(rate)) as usize).min(frames);
        for frame in 0..fade_frames {
            let gain = frame as f32 / fade_frames as f32;
            for channel in 0..channels {
                samples[frame * channels + channel] *= gain;
            }
        }
    }

    if let Some(seconds) = fade_out {
        let fade_frames = ((seconds.max(0.0) * f64::from(rate)) as usize).min(frames);
        for offset in 0..fade_frames {
            let frame = frames - fade_frames + offset;
            let gain = 1.0 - offset as f32 / fade_frames as f32;
            for channel in 0..channels {
                samples[frame * channels + channel] *= gain;
            }
        }
    }

    AudioBuffer::from_interleaved(samples, channels, rate)
}

/// Trims a file to `[start, end)` seconds with optional fades, writing
/// WAV.
///
/// # Errors
///
/// Returns `InvalidParameter` when the range is empty; propagates decode
/// and encode failures.
pub fn trim(
    input: &str,
    output: impl AsRef<Path>,
    start: f64,
    end: Option<f64>,
    fade_in: Option<f64>,
    fade_out: Option<f64>,
    config: &Config,
) -> Result<ConversionSummary> {
    if end.is_some_and(|end| end <= start) {
        return Err(Error::invalid_parameter(format!(
            "empty trim range: start={start}, end={end:?}"
        )));
    }

    let decoded = decode_file(input, config)?;
    let trimmed = trim_buffer(&decoded, start, end, fade_in, fade_out);
    write_wav(output, &trimmed, WavEncoding::default())?;
    Ok(ConversionSummary::from(&trimmed))
}

/// Concatenates files back to back, writing WAV.
///
/// All inputs are converted to the first input's sample rate and channel
/// layout before joining.
///
/// # Errors
///
/// Returns `InvalidParameter` for an empty input list; propagates decode
/// and encode failures.
pub fn concatenate(
    inputs: &[String],
    output: impl AsRef<Path>,
    config: &Config,
) -> Result<ConversionSummary> {
    let Some(first) = inputs.first() else {
        return Err(Error::invalid_parameter("no inputs to concatenate"));
    };

    let mut joined = decode_file(first, config)?;
    let rate = joined.sample_rate();
    let channels = joined.channel_count();

    let mut samples = joined.into_samples();
    for input in &inputs[1..] {
        let decoded = decode_file(input, config)?;
        let aligned = convert_buffer(decoded, Some(rate), Some(channels))?;
        samples.extend_from_slice(aligned.samples());
    }

    joined = AudioBuffer::from_interleaved(samples, channels, rate);
    write_wav(output, &joined, WavEncoding::default())?;
    Ok(ConversionSummary::from(&joined))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone_buffer(seconds: f64, rate: u32, channels: usize) -> AudioBuffer {
        let frames = (seconds * f64::from(rate)) as usize;
        let mut samples = Vec::with_capacity(frames * channels);
        for i in 0..frames {
            let value = (i as f32 * 0.02).sin() * 0.5;
            for _ in 0..channels {
                samples.push(value);
            }
        }
        AudioBuffer::from_interleaved(samples, channels, rate)
    }

    #[test]
    fn trim_cuts_the_requested_range() {
        let buffer = tone_buffer(2.0, 48_000, 2);
        let trimmed = trim_buffer(&buffer, 0.5, Some(1.5), None, None);
        assert_eq!(trimmed.frame_count(), 48_000);
        assert_eq!(trimmed.sample_rate(), 48_000);
        assert_eq!(trimmed.channel_count(), 2);
    }

    #[test]
    fn trim_without_end_runs_to_eof() {
        let buffer = tone_buffer(1.0, 44_100, 1);
        let trimmed = trim_buffer(&buffer, 0.75, None, None, None);
        assert_eq!(trimmed.frame_count(), 44_100 / 4);
    }

    #[test]
    fn fades_shape_the_edges() {
        let buffer = tone_buffer(1.0, 48_000, 1);
        let trimmed = trim_buffer(&buffer, 0.0, None, Some(0.25), Some(0.25));

        // The very first samples are silent, the middle is untouched.
        assert!(trimmed.samples()[0].abs() < 1e-6);
        let middle = trimmed.samples()[24_000];
        assert!((middle - buffer.samples()[24_000]).abs() < 1e-6);
        // The last frame is fully faded.
        let last = *trimmed.samples().last().unwrap();
        assert!(last.abs() < 0.01, "tail not faded: {last}");
    }

    #[test]
    fn out_of_range_trim_is_empty() {
        let buffer = tone_buffer(1.0, 44_100, 1);
        let trimmed = trim_buffer(&buffer, 5.0, Some(6.0), None, None);
        assert_eq!(trimmed.frame_count(), 0);
    }

    #[test]
    fn wav_round_trip_16_bit() {
        let buffer = tone_buffer(0.25, 44_100, 2);
        let path = std::env::temp_dir().join("resona_test_rt16.wav");
        write_wav(&path, &buffer, WavEncoding::Pcm16).expect("write");

        let mut reader = hound::WavReader::open(&path).expect("open");
        let spec = reader.spec();
        assert_eq!(spec.channels, 2);
        assert_eq!(spec.sample_rate, 44_100);
        assert_eq!(spec.bits_per_sample, 16);

        let restored: Vec<f32> = reader
            .samples::<i16>()
            .map(|sample| f32::from(sample.unwrap()) / f32::from(i16::MAX))
            .collect();
        assert_eq!(restored.len(), buffer.samples().len());
        for (original, round_tripped) in buffer.samples().iter().zip(restored.iter()) {
            assert!((original - round_tripped).abs() < 1.0 / 16_384.0);
        }
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn wav_float_is_lossless() {
        let buffer = tone_buffer(0.1, 48_000, 1);
        let path = std::env::temp_dir().join("resona_test_f32.wav");
        write_wav(&path, &buffer, WavEncoding::Float32).expect("write");

        let mut reader = hound::WavReader::open(&path).expect("open");
        let restored: Vec<f32> = reader.samples::<f32>().map(|s| s.unwrap()).collect();
        assert_eq!(restored, buffer.samples());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn offline_conversion_changes_layout_and_rate() {
        let buffer = tone_buffer(0.5, 48_000, 2);
        let converted = convert_buffer(buffer, Some(24_000), Some(1)).expect("convert");
        assert_eq!(converted.channel_count(), 1);
        assert_eq!(converted.sample_rate(), 24_000);
        // Half the rate, half the frames (within resampler latency).
        let deviation = converted.frame_count() as i64 - 12_000;
        assert!(deviation.abs() < 4096, "frames {}", converted.frame_count());
    }
}
