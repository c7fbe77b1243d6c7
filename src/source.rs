//! Stream sources: URL recognition and media input.
//!
//! This module implements the ingest boundary of the pipeline. It provides
//! a unified [`MediaInput`] for local files and progressive HTTP downloads,
//! buffered for demuxer consumption. All network downloads are wrapped in a
//! 32 KiB buffer matching the demuxer's sequential read pattern.
//!
//! # URL recognition
//!
//! [`UrlKind::classify`] recognizes the public scheme set (`http(s)`,
//! `rtmp(s)`, `rtsp(s)`, `mms(h)`, `icy`, `file`) plus bare filesystem
//! paths. Classification is infallible; unsupported transports are only
//! rejected when the stream is actually opened.

use std::{
    fs::File,
    io::{BufReader, Read, Seek, SeekFrom},
    path::Path,
    time::Duration,
};

use stream_download::{
    http::HttpStream, source::SourceStream, storage::temp::TempStorageProvider, Settings,
    StreamDownload,
};
use symphonia::core::io::MediaSource;

use crate::{
    config::Config,
    error::{Error, Result},
};

/// Combines Read and Seek traits for stream handling.
///
/// This trait requires thread-safety (Send + Sync) to enable:
/// * Concurrent playback and downloading
/// * Safe sharing between threads
/// * Integration with async runtimes
pub trait ReadSeek: Read + Seek + Send + Sync {}

/// Blanket implementation for any type that implements both Read and Seek
impl<T: Read + Seek + Send + Sync> ReadSeek for T {}

/// Default buffer size for stream reads (32 KiB).
///
/// This size is chosen to match the demuxer's read pattern, which reads
/// sequentially in increasing chunks up to 32 KiB.
pub const BUFFER_LEN: usize = 32 * 1024;

/// Transport classification for a playback URL.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum UrlKind {
    /// Local filesystem path, bare or behind `file://`.
    File,
    /// Progressive HTTP(S) download, including `icy://` radio streams.
    Http,
    /// Real-time messaging protocol (`rtmp://`, `rtmps://`).
    Rtmp,
    /// Real-time streaming protocol (`rtsp://`, `rtsps://`).
    Rtsp,
    /// Microsoft media server (`mms://`, `mmsh://`).
    Mms,
}

impl UrlKind {
    /// Recognized scheme prefixes, longest match first per family.
    const SCHEMES: &'static [(&'static str, UrlKind)] = &[
        ("https://", UrlKind::Http),
        ("http://", UrlKind::Http),
        ("icy://", UrlKind::Http),
        ("rtmps://", UrlKind::Rtmp),
        ("rtmp://", UrlKind::Rtmp),
        ("rtsps://", UrlKind::Rtsp),
        ("rtsp://", UrlKind::Rtsp),
        ("mmsh://", UrlKind::Mms),
        ("mms://", UrlKind::Mms),
        ("file://", UrlKind::File),
    ];

    /// Classifies a URL by scheme prefix.
    ///
    /// Anything without a recognized scheme is treated as a bare
    /// filesystem path.
    #[must_use]
    pub fn classify(url: &str) -> Self {
        let lower = url.trim();
        for (scheme, kind) in Self::SCHEMES {
            if lower.len() >= scheme.len() && lower[..scheme.len()].eq_ignore_ascii_case(scheme) {
                return *kind;
            }
        }
        UrlKind::File
    }

    /// Whether the transport goes over the network.
    #[must_use]
    pub fn is_network(self) -> bool {
        !matches!(self, UrlKind::File)
    }
}

/// Represents an opened media stream, local or remote.
///
/// `MediaInput` provides a unified interface for the demuxer, wrapping all
/// sources in a [`BUFFER_LEN`] buffer. Ownership of the underlying
/// download keeps it alive; dropping the input cancels an in-flight
/// download.
pub struct MediaInput {
    /// The underlying stream implementation.
    inner: Box<dyn ReadSeek>,

    /// Indicates if seeking operations are supported (false for live
    /// streams without a known length).
    is_seekable: bool,

    /// The total size of the stream in bytes, if known.
    byte_len: Option<u64>,
}

impl MediaInput {
    /// Opens a URL as a media input.
    ///
    /// Local paths open synchronously; HTTP(S) URLs start a progressive
    /// download honoring the configured user agent and prefetch size. The
    /// call returns once the prefetch threshold is buffered, not when the
    /// download completes.
    ///
    /// The configured connect timeout is enforced by the caller
    /// (the pipeline wraps open + probe in one wall-clock budget).
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// * The file does not exist or cannot be read
    /// * The HTTP request fails or is refused
    /// * The URL uses a transport outside the reqwest stack
    ///   (`rtmp`, `rtsp`, `mms`), which maps to `UnsupportedFormat`
    pub async fn open(url: &str, config: &Config) -> Result<Self> {
        match UrlKind::classify(url) {
            UrlKind::File => Self::open_file(url),
            UrlKind::Http => Self::open_http(url, config).await,
            kind @ (UrlKind::Rtmp | UrlKind::Rtsp | UrlKind::Mms) => Err(
                Error::unsupported_format(format!("transport {kind:?} is not available")),
            ),
        }
    }

    /// Opens a local file synchronously, resolving a `file://` prefix if
    /// present.
    ///
    /// The blocking entry point for the file-processing helpers; network
    /// URLs must go through [`MediaInput::open`].
    ///
    /// # Errors
    ///
    /// Returns `ConnectionFailed` when the file cannot be opened.
    pub fn open_path(url: &str) -> Result<Self> {
        Self::open_file(url)
    }

    /// Opens a local file, resolving a `file://` prefix if present.
    fn open_file(url: &str) -> Result<Self> {
        let path = url
            .strip_prefix("file://")
            .map_or(url, |rest| rest)
            .trim();
        let file =
            File::open(Path::new(path)).map_err(|e| Error::connection_failed(e.to_string()))?;
        let byte_len = file.metadata().ok().map(|meta| meta.len());

        Ok(Self {
            inner: Box::new(BufReader::with_capacity(BUFFER_LEN, file)),
            is_seekable: true,
            byte_len,
        })
    }

    /// Starts a progressive HTTP download and wraps it for the demuxer.
    async fn open_http(url: &str, config: &Config) -> Result<Self> {
        let parsed = url
            .trim()
            .replacen("icy://", "http://", 1)
            .parse::<reqwest::Url>()?;

        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.connect_timeout)
            .read_timeout(read_timeout(config))
            .build()?;

        let stream = HttpStream::new(client, parsed).await?;
        let byte_len = stream.content_length();

        let download = StreamDownload::from_stream(
            stream,
            TempStorageProvider::default(),
            Settings::default()
                .prefetch_bytes(config.prefetch_bytes)
                .cancel_on_drop(true),
        )
        .await?;

        Ok(Self {
            // Live radio endpoints report no length; the demuxer must not
            // attempt coarse byte seeks there.
            is_seekable: byte_len.is_some(),
            byte_len,
            inner: Box::new(BufReader::with_capacity(BUFFER_LEN, download)),
        })
    }

    /// Whether seeking is supported.
    #[must_use]
    pub fn is_seekable(&self) -> bool {
        self.is_seekable
    }

    /// Total size in bytes, if known.
    #[must_use]
    pub fn len(&self) -> Option<u64> {
        self.byte_len
    }
}

/// Per-read timeout for network streams.
///
/// Stalled reads must fail fast enough for the pipeline's retry budget to
/// engage before listeners notice; a fraction of the connect budget works
/// well in practice.
fn read_timeout(config: &Config) -> Duration {
    config.connect_timeout.max(Duration::from_secs(2)) / 2
}

/// Implements reading from the media stream.
///
/// Delegates directly to the underlying stream, whether a local file or a
/// progressive download.
impl Read for MediaInput {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf)
    }
}

/// Implements seeking within the media stream.
///
/// For downloads this may block until the target byte range is buffered.
impl Seek for MediaInput {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.inner.seek(pos)
    }
}

/// Implements the demuxer-facing source interface.
impl MediaSource for MediaInput {
    /// Returns whether seeking is supported in this stream.
    #[inline]
    fn is_seekable(&self) -> bool {
        self.is_seekable
    }

    /// Returns the total size of the stream in bytes, if known.
    #[inline]
    fn byte_len(&self) -> Option<u64> {
        self.byte_len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_all_public_schemes() {
        assert_eq!(UrlKind::classify("http://a/b.mp3"), UrlKind::Http);
        assert_eq!(UrlKind::classify("https://a/b.flac"), UrlKind::Http);
        assert_eq!(UrlKind::classify("ICY://radio"), UrlKind::Http);
        assert_eq!(UrlKind::classify("rtmp://a/live"), UrlKind::Rtmp);
        assert_eq!(UrlKind::classify("rtmps://a/live"), UrlKind::Rtmp);
        assert_eq!(UrlKind::classify("rtsp://a/cam"), UrlKind::Rtsp);
        assert_eq!(UrlKind::classify("rtsps://a/cam"), UrlKind::Rtsp);
        assert_eq!(UrlKind::classify("mms://a"), UrlKind::Mms);
        assert_eq!(UrlKind::classify("mmsh://a"), UrlKind::Mms);
        assert_eq!(UrlKind::classify("file:///tmp/x.wav"), UrlKind::File);
        assert_eq!(UrlKind::classify("/tmp/x.wav"), UrlKind::File);
        assert_eq!(UrlKind::classify("relative/x.wav"), UrlKind::File);
    }

    #[test]
    fn network_classification() {
        assert!(UrlKind::classify("https://a").is_network());
        assert!(!UrlKind::classify("/tmp/a.flac").is_network());
    }

    #[test]
    fn missing_file_is_connection_failed() {
        let result = MediaInput::open_file("/nonexistent/definitely/missing.flac");
        let err = result.err().expect("must fail");
        assert_eq!(err.kind, crate::error::ErrorKind::ConnectionFailed);
    }
}
