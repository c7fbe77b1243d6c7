//! Audio decoder built on Symphonia.
//!
//! This module provides a decoder that directly uses Symphonia's
//! capabilities to:
//! * Probe containers (MP4/M4A, MPEG-TS, Matroska/WebM, Ogg, FLAC, WAV,
//!   MP3, ADTS) and select the audio track
//! * Decode packets into owned [`AudioBuffer`] blocks of interleaved f32
//! * Seek with proper decoder reset
//! * Surface container metadata as flat tags
//!
//! # Error Handling
//!
//! The decoder implements robust error recovery:
//! * Skips corrupted packets (up to 3 consecutive)
//! * Handles codec reset requests by rebuilding the decoder
//! * Gracefully detects end of stream
//! * Ensures clean state by clearing buffers after any decoder error
//!
//! # Performance
//!
//! * Memory efficient buffering (64 KiB minimum, matching Symphonia's
//!   requirements, coordinated with the 32 KiB [`crate::source`] buffers)
//! * Low allocation overhead (reuses the decode sample buffer)

use std::{collections::HashMap, time::Duration};

use symphonia::core::{
    audio::SampleBuffer,
    codecs::{CodecParameters, DecoderOptions, CODEC_TYPE_NULL},
    errors::Error as SymphoniaError,
    formats::{FormatOptions, FormatReader, SeekMode, SeekTo},
    io::{MediaSourceStream, MediaSourceStreamOptions},
    meta::{Limit, MetadataOptions, MetadataRevision},
    probe::Hint,
};

use crate::{
    buffer::AudioBuffer,
    config::Config,
    error::{Error, Result},
    source::{MediaInput, BUFFER_LEN},
    stream_info::StreamInfo,
};

/// Sample rate assumed when the codec does not report one.
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

/// Channel count assumed when the codec does not report one.
pub const DEFAULT_CHANNELS: u16 = 2;

/// Maximum number of consecutive corrupted packets to skip before giving up.
const MAX_RETRIES: usize = 3;

/// Audio decoder producing interleaved f32 buffers.
///
/// Works in conjunction with [`MediaInput`] to provide:
/// * Format detection and track selection
/// * Stream parameters (sample rate, channels, bit depth, duration)
/// * Block-wise decoding with error recovery
/// * Time-based seeking
pub struct Decoder {
    /// Format reader (demuxer) for extracting encoded audio packets.
    demuxer: Box<dyn FormatReader>,

    /// Codec decoder for converting encoded packets to PCM samples.
    decoder: Box<dyn symphonia::core::codecs::Decoder>,

    /// Identifier of the selected audio track.
    track_id: u32,

    /// Seeking strategy (coarse needs a known byte length).
    seek_mode: SeekMode,

    /// Reusable sample buffer to minimize allocations.
    buffer: Option<SampleBuffer<f32>>,

    /// Number of audio channels in the stream.
    channels: u16,

    /// Sample rate of the audio stream in Hz.
    sample_rate: u32,

    /// Immutable probe result for the stream.
    info: StreamInfo,
}

impl Decoder {
    /// Creates a decoder for an opened media input.
    ///
    /// Probes the container within the configured limits, selects the
    /// first decodable audio track, and initializes the codec.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// * Format detection fails (`UnsupportedFormat`)
    /// * The container has no audio track (`NoAudioStream`)
    /// * Codec initialization fails
    pub fn new(input: MediaInput, url: &str, config: &Config) -> Result<Self> {
        let byte_len = input.len();
        let is_seekable = input.is_seekable();

        // Twice the source buffer length to allow for Symphonia's
        // read-ahead behavior, and the 64 kB minimum that Symphonia
        // asserts for its ring buffer.
        let buffer_len = usize::max(64 * 1024, BUFFER_LEN * 2);
        let stream =
            MediaSourceStream::new(Box::new(input), MediaSourceStreamOptions { buffer_len });

        let mut hint = Hint::new();
        if let Some(extension) = url.rsplit('.').next() {
            if extension.len() <= 4 && !extension.contains('/') {
                hint.with_extension(extension);
            }
        }

        let metadata_opts = MetadataOptions {
            limit_metadata_bytes: Limit::Maximum(config.probe_size as usize),
            ..MetadataOptions::default()
        };

        let mut probed = symphonia::default::get_probe()
            .format(
                &hint,
                stream,
                &FormatOptions {
                    enable_gapless: true,
                    ..FormatOptions::default()
                },
                &metadata_opts,
            )
            .map_err(|e| match e {
                SymphoniaError::IoError(io) => Error::from(io),
                other => Error::unsupported_format(other.to_string()),
            })?;

        let mut demuxer = probed.format;

        let track = demuxer
            .tracks()
            .iter()
            .find(|track| track.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| Error::no_audio_stream("container has no decodable audio track"))?;
        let track_id = track.id;

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| Error::unsupported_format(e.to_string()))?;

        // Update the codec parameters with the actual decoder parameters.
        // This may yield information not available before initialization.
        let codec_params = decoder.codec_params();
        let channels = Self::calc_channels(codec_params).unwrap_or(DEFAULT_CHANNELS);
        let sample_rate = Self::calc_sample_rate(codec_params);
        let duration = Self::calc_total_duration(codec_params);

        // Coarse seeking without a known byte length is unreliable and can
        // panic inside the demuxer.
        let seek_mode = if is_seekable && byte_len.is_some() {
            SeekMode::Coarse
        } else {
            SeekMode::Accurate
        };

        let mut tags = HashMap::new();
        if let Some(metadata) = probed.metadata.get() {
            if let Some(revision) = metadata.current() {
                Self::collect_tags(revision, &mut tags);
            }
        }
        if let Some(revision) = demuxer.metadata().current() {
            Self::collect_tags(revision, &mut tags);
        }

        let bitrate = match (byte_len, duration) {
            (Some(bytes), Some(duration)) if duration.as_secs() > 0 => u32::try_from(
                bytes.saturating_mul(8) / duration.as_secs(),
            )
            .ok(),
            _ => None,
        };

        let info = StreamInfo {
            url: url.to_string(),
            has_audio: true,
            has_video: false,
            audio_codec: codec_short_name(codec_params),
            video_codec: None,
            sample_rate,
            channel_count: channels,
            bit_depth: codec_params.bits_per_sample,
            bitrate,
            width: 0,
            height: 0,
            duration,
            container: container_from_url(url),
            tags,
        };

        info!("decoder ready: {info}");

        Ok(Self {
            demuxer,
            decoder,
            track_id,
            seek_mode,
            buffer: None,
            channels,
            sample_rate,
            info,
        })
    }

    /// The immutable stream descriptor built during probing.
    #[must_use]
    pub fn stream_info(&self) -> &StreamInfo {
        &self.info
    }

    /// Number of audio channels in the stream.
    #[must_use]
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Sample rate of the audio stream in Hz.
    #[must_use]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Total duration, when the stream is not live.
    #[must_use]
    pub fn total_duration(&self) -> Option<Duration> {
        self.info.duration
    }

    /// Decodes the next block of audio.
    ///
    /// Returns `Ok(None)` at end of stream. Corrupted packets are skipped
    /// (up to [`MAX_RETRIES`] consecutive); decoder resets are handled
    /// transparently, after which the reported stream parameters may
    /// change.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// * Too many consecutive packets are corrupted
    /// * An unrecoverable demuxer or decoder error occurs
    pub fn next_buffer(&mut self) -> Result<Option<AudioBuffer>> {
        let mut discarded = 0;
        loop {
            if discarded > MAX_RETRIES {
                return Err(Error::decoding("discarded too many packets, giving up"));
            }

            let packet = match self.demuxer.next_packet() {
                Ok(packet) => packet,

                // If `ResetRequired` is returned, then the track list must
                // be re-examined and the decoder re-created.
                Err(SymphoniaError::ResetRequired) => {
                    trace!("re-creating decoder");
                    self.recreate_decoder()?;
                    continue;
                }

                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(None);
                }

                Err(e) => return Err(e.into()),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    let buffer = match self.buffer.as_mut() {
                        Some(buffer) => buffer,
                        None => {
                            // Packet sizes are not guaranteed constant, but
                            // the capacity is based on the codec's maximum
                            // frame length, so allocate once and reuse.
                            self.buffer.insert(SampleBuffer::new(
                                decoded.capacity() as u64,
                                *decoded.spec(),
                            ))
                        }
                    };
                    buffer.copy_interleaved_ref(decoded);

                    if buffer.len() == 0 {
                        discarded += 1;
                        continue;
                    }

                    return Ok(Some(AudioBuffer::from_interleaved(
                        buffer.samples().to_vec(),
                        usize::from(self.channels),
                        self.sample_rate,
                    )));
                }

                // The packet is undecodeable and should be discarded;
                // decoding may be continued with the next packet.
                Err(SymphoniaError::DecodeError(e)) => {
                    warn!("discarding malformed packet: {e}");
                    self.buffer = None;
                    discarded += 1;
                }
                Err(SymphoniaError::IoError(e)) => {
                    warn!("discarding unreadable packet: {e}");
                    self.buffer = None;
                    discarded += 1;
                }

                // Consumers should expect the stream parameters to change.
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    self.reload_spec();
                }

                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Seeks to the given position, returning where the demuxer landed.
    ///
    /// Lands on the nearest decodable position at or before the request;
    /// the decoder is reset afterwards to avoid audio glitches.
    ///
    /// # Errors
    ///
    /// Returns error if the demuxer cannot satisfy the seek (live stream,
    /// position beyond end, unseekable source).
    pub fn seek(&mut self, position: Duration) -> Result<Duration> {
        let seeked = self.demuxer.seek(
            self.seek_mode,
            SeekTo::Time {
                time: position.into(),
                track_id: Some(self.track_id),
            },
        )?;

        // Seeking is a demuxer operation, so the decoder cannot reliably
        // know when a seek took place. Reset it to avoid glitches.
        self.decoder.reset();
        self.buffer = None;

        let actual = self
            .decoder
            .codec_params()
            .time_base
            .map(|time_base| Duration::from(time_base.calc_time(seeked.actual_ts)))
            .unwrap_or(position);
        Ok(actual)
    }

    /// Rebuilds the decoder after the demuxer demanded a reset.
    fn recreate_decoder(&mut self) -> Result<()> {
        let track = self
            .demuxer
            .tracks()
            .iter()
            .find(|track| track.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| Error::no_audio_stream("track list lost its audio track"))?;
        self.track_id = track.id;
        self.decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| Error::unsupported_format(e.to_string()))?;
        self.reload_spec();
        Ok(())
    }

    /// Updates cached stream parameters after a codec reset.
    fn reload_spec(&mut self) {
        let codec_params = self.decoder.codec_params();

        self.sample_rate = Self::calc_sample_rate(codec_params);
        if let Some(channels) = Self::calc_channels(codec_params) {
            self.channels = channels;
        }

        // Drop the buffer to force reinitialization with new parameters.
        self.buffer = None;

        debug!(
            "decoder reloaded with sample rate: {} Hz; channels: {}",
            self.sample_rate, self.channels,
        );
    }

    /// Extracts channel count from codec parameters.
    #[must_use]
    fn calc_channels(codec_params: &CodecParameters) -> Option<u16> {
        codec_params
            .channels
            .and_then(|channels| u16::try_from(channels.count()).ok())
    }

    /// Gets sample rate from codec parameters, defaulting to 44.1 kHz.
    #[must_use]
    fn calc_sample_rate(codec_params: &CodecParameters) -> u32 {
        codec_params.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE)
    }

    /// Extracts total duration when time base and frame count are known.
    #[must_use]
    fn calc_total_duration(codec_params: &CodecParameters) -> Option<Duration> {
        if let (Some(time_base), Some(frames)) = (codec_params.time_base, codec_params.n_frames) {
            Some(time_base.calc_time(frames).into())
        } else {
            None
        }
    }

    /// Folds one metadata revision into the flat tag map.
    fn collect_tags(revision: &MetadataRevision, tags: &mut HashMap<String, String>) {
        for tag in revision.tags() {
            let key = tag
                .std_key
                .map_or_else(|| tag.key.to_ascii_lowercase(), |std| format!("{std:?}").to_ascii_lowercase());
            tags.entry(key).or_insert_with(|| tag.value.to_string());
        }
    }
}

/// Short codec name from codec parameters, via the codec registry.
fn codec_short_name(codec_params: &CodecParameters) -> Option<String> {
    symphonia::default::get_codecs()
        .get_codec(codec_params.codec)
        .map(|descriptor| descriptor.short_name.to_string())
}

/// Container short name inferred from the URL extension.
fn container_from_url(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let extension = path.rsplit('.').next()?.to_ascii_lowercase();
    let name = match extension.as_str() {
        "mp4" | "m4a" | "m4b" | "mov" => "mp4",
        "ts" => "mpegts",
        "flv" => "flv",
        "m3u8" => "hls",
        "mkv" | "webm" | "mka" => "matroska",
        "ogg" | "oga" | "opus" => "ogg",
        "flac" => "flac",
        "wav" | "wave" => "wav",
        "mp3" => "mp3",
        "aac" | "adts" => "aac",
        _ => return None,
    };
    Some(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_inference_from_extension() {
        assert_eq!(container_from_url("/a/b.flac").as_deref(), Some("flac"));
        assert_eq!(
            container_from_url("https://h/x.m4a?tok=1").as_deref(),
            Some("mp4")
        );
        assert_eq!(
            container_from_url("file:///m/x.webm").as_deref(),
            Some("matroska")
        );
        assert_eq!(container_from_url("/a/noext").is_none(), true);
    }

    #[test]
    fn default_parameters() {
        let params = CodecParameters::new();
        assert_eq!(Decoder::calc_sample_rate(&params), DEFAULT_SAMPLE_RATE);
        assert!(Decoder::calc_channels(&params).is_none());
        assert!(Decoder::calc_total_duration(&params).is_none());
    }
}
