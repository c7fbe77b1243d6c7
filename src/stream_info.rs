//! Stream descriptors and quality classification.
//!
//! [`StreamInfo`] is the immutable probe result for one media stream: which
//! tracks exist, how the audio is encoded, and the derived quality
//! properties used for display (`is_lossless`, `is_hi_res`,
//! `quality_label`).
//!
//! The descriptor is produced once by the decoder during session setup and
//! never mutated afterwards; a live stream is encoded as `duration: None`.

use std::{collections::HashMap, fmt, time::Duration};

/// Codecs that reconstruct the source signal bit-exactly.
const LOSSLESS_CODECS: &[&str] = &[
    "flac", "alac", "pcm", "wavpack", "ape", "tak", "tta",
];

/// Audio quality levels derived from codec and stream parameters.
///
/// Note that quality describes the source encoding, not the render path;
/// all decoding converges to 32-bit float internally.
#[derive(Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Debug, Hash)]
pub enum Quality {
    /// Lossy below 256 kbps, or unknown bitrate.
    #[default]
    Standard,
    /// Lossy at 256 kbps or above.
    High,
    /// Lossless at CD resolution (up to 48 kHz / 16-bit).
    Lossless,
    /// Lossless above CD resolution.
    HiResLossless,
}

impl Quality {
    /// Human-readable label for UI display.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Standard => "Standard",
            Self::High => "High",
            Self::Lossless => "Lossless",
            Self::HiResLossless => "Hi-Res Lossless",
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Immutable descriptor of a probed stream.
///
/// Built by the decoder from container and codec parameters; all derived
/// properties are computed, never stored.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StreamInfo {
    /// The URL the stream was opened from.
    pub url: String,

    /// Whether the container holds an audio track.
    pub has_audio: bool,

    /// Whether the container holds a video track.
    pub has_video: bool,

    /// Short audio codec name (e.g. "flac", "aac", "mp3").
    pub audio_codec: Option<String>,

    /// Short video codec name (e.g. "h264", "hevc").
    pub video_codec: Option<String>,

    /// Audio sample rate in Hz.
    pub sample_rate: u32,

    /// Number of audio channels.
    pub channel_count: u16,

    /// Source bit depth, when the codec reports one.
    pub bit_depth: Option<u32>,

    /// Average bitrate in bits per second, when known.
    pub bitrate: Option<u32>,

    /// Video frame width in pixels.
    pub width: u32,

    /// Video frame height in pixels.
    pub height: u32,

    /// Total duration; `None` for live streams.
    pub duration: Option<Duration>,

    /// Container short name (e.g. "flac", "isomp4", "ogg").
    pub container: Option<String>,

    /// Flat metadata tags from the container (title, artist, album, …).
    pub tags: HashMap<String, String>,
}

impl StreamInfo {
    /// Whether the stream is a live stream (no known duration).
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.has_audio && self.duration.is_none()
    }

    /// Whether the audio codec is lossless.
    #[must_use]
    pub fn is_lossless(&self) -> bool {
        self.audio_codec.as_deref().is_some_and(|codec| {
            LOSSLESS_CODECS
                .iter()
                .any(|lossless| codec.starts_with(lossless))
        })
    }

    /// Whether the stream exceeds CD resolution.
    ///
    /// True for lossless content above 48 kHz or deeper than 16 bits.
    #[must_use]
    pub fn is_hi_res(&self) -> bool {
        self.is_lossless()
            && (self.sample_rate > 48_000 || self.bit_depth.is_some_and(|bits| bits > 16))
    }

    /// Derived quality classification.
    #[must_use]
    pub fn quality(&self) -> Quality {
        if self.is_hi_res() {
            Quality::HiResLossless
        } else if self.is_lossless() {
            Quality::Lossless
        } else if self.bitrate.is_some_and(|bps| bps >= 256_000) {
            Quality::High
        } else {
            Quality::Standard
        }
    }

    /// Human-readable quality label.
    #[must_use]
    pub fn quality_label(&self) -> &'static str {
        self.quality().label()
    }
}

impl fmt::Display for StreamInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let codec = self.audio_codec.as_deref().unwrap_or("unknown");
        write!(
            f,
            "{codec} {} Hz {}ch ({})",
            self.sample_rate,
            self.channel_count,
            self.quality_label()
        )
    }
}

/// Container formats the core recognizes for playback.
///
/// The media library may demux more than these; this enumeration is the
/// supported, tested surface.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Container {
    /// MP4 / M4A / MOV family.
    Mp4,
    /// MPEG transport stream.
    MpegTs,
    /// Flash video.
    Flv,
    /// HTTP live streaming playlists.
    Hls,
    /// Matroska / WebM.
    Matroska,
    /// Ogg.
    Ogg,
    /// Native FLAC.
    Flac,
    /// RIFF WAVE.
    Wav,
    /// MPEG audio elementary stream.
    Mp3,
    /// ADTS AAC elementary stream.
    Aac,
}

impl Container {
    /// All supported containers.
    pub const ALL: &'static [Container] = &[
        Container::Mp4,
        Container::MpegTs,
        Container::Flv,
        Container::Hls,
        Container::Matroska,
        Container::Ogg,
        Container::Flac,
        Container::Wav,
        Container::Mp3,
        Container::Aac,
    ];

    /// Short name as reported in [`StreamInfo::container`].
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::MpegTs => "mpegts",
            Self::Flv => "flv",
            Self::Hls => "hls",
            Self::Matroska => "matroska",
            Self::Ogg => "ogg",
            Self::Flac => "flac",
            Self::Wav => "wav",
            Self::Mp3 => "mp3",
            Self::Aac => "aac",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flac_info() -> StreamInfo {
        StreamInfo {
            url: "file:///tmp/x.flac".to_string(),
            has_audio: true,
            audio_codec: Some("flac".to_string()),
            sample_rate: 48_000,
            channel_count: 2,
            bit_depth: Some(16),
            duration: Some(Duration::from_secs_f64(12.34)),
            container: Some("flac".to_string()),
            ..StreamInfo::default()
        }
    }

    #[test]
    fn cd_flac_is_lossless_not_hi_res() {
        let info = flac_info();
        assert!(info.is_lossless());
        assert!(!info.is_hi_res());
        assert_eq!(info.quality_label(), "Lossless");
    }

    #[test]
    fn hi_res_above_48k_or_16_bit() {
        let mut info = flac_info();
        info.sample_rate = 96_000;
        assert!(info.is_hi_res());
        assert_eq!(info.quality_label(), "Hi-Res Lossless");

        let mut info = flac_info();
        info.bit_depth = Some(24);
        assert!(info.is_hi_res());
    }

    #[test]
    fn lossy_quality_splits_on_bitrate() {
        let mut info = flac_info();
        info.audio_codec = Some("mp3".to_string());
        info.bit_depth = None;

        info.bitrate = Some(320_000);
        assert_eq!(info.quality_label(), "High");

        info.bitrate = Some(128_000);
        assert_eq!(info.quality_label(), "Standard");

        info.bitrate = None;
        assert_eq!(info.quality_label(), "Standard");
    }

    #[test]
    fn live_stream_has_no_duration() {
        let mut info = flac_info();
        info.duration = None;
        assert!(info.is_live());
    }
}
