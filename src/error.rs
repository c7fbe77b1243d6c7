//! Error handling for resona.
//!
//! Provides a unified error handling system for the whole SDK, with mapping
//! from the underlying media, audio device and I/O errors to the playback
//! error taxonomy.
//!
//! # Error Categories
//!
//! Errors are categorized by what stops a session from making progress:
//! * Connection establishment (timeout, refusal)
//! * Network transport loss mid-stream
//! * Unsupported containers or codecs
//! * Resource allocation (device, context, buffer)
//! * Decoder failures (transient, escalated only when persistent)
//! * Invalid parameters (clamped, never fatal)
//!
//! # Example
//!
//! ```rust
//! use resona::error::{Error, ErrorKind, Result};
//!
//! fn open_stream(has_audio: bool) -> Result<()> {
//!     if !has_audio {
//!         return Err(Error::no_audio_stream("container has no audio track"));
//!     }
//!     Ok(())
//! }
//! ```

#![allow(clippy::enum_glob_use)]

use std::fmt;

use thiserror::Error;

/// Main error type combining error kind and details.
///
/// Provides:
/// * Categorized error types ([`ErrorKind`])
/// * Underlying error details
/// * Conversion from common error types
#[derive(Debug)]
pub struct Error {
    /// Classification of the error
    pub kind: ErrorKind,

    /// Details of the underlying error
    pub error: Box<dyn std::error::Error + Send + Sync>,
}

/// Standard result type for resona operations.
///
/// Wraps the standard `Result` type with our custom [`struct@Error`] type.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for the playback core.
///
/// Each variant represents a distinct failure category with its own
/// recovery policy (see the crate documentation for the full table).
#[expect(clippy::module_name_repetitions)]
#[derive(Clone, Copy, Debug, Eq, Error, Hash, Ord, PartialEq, PartialOrd)]
pub enum ErrorKind {
    /// Opening the stream exceeded the configured wall-clock budget.
    ///
    /// The session terminates; the caller may retry with a new `play()`.
    #[error("Connection timed out")]
    ConnectionTimeout,

    /// Opening the stream failed outright.
    #[error("Connection failed")]
    ConnectionFailed,

    /// The network transport dropped mid-stream and the retry budget
    /// was exhausted.
    #[error("Network disconnected")]
    NetworkDisconnected,

    /// The container or codec is not in the supported set.
    #[error("Unsupported format")]
    UnsupportedFormat,

    /// A context, device or buffer could not be allocated.
    #[error("Resource allocation failed")]
    ResourceAllocation,

    /// The decoder returned an error for a packet.
    ///
    /// Transient by policy: sessions absorb these unless no frames are
    /// produced for a sustained window.
    #[error("Decoding failed")]
    Decoding,

    /// The container contained no audio track.
    #[error("No audio stream")]
    NoAudioStream,

    /// The fingerprint engine was used before `prepare()` completed.
    #[error("Fingerprint backend not ready")]
    FingerprintNotReady,

    /// An out-of-range setter input was received.
    ///
    /// Values are clamped and reported via the observer; never fatal.
    #[error("Invalid parameter")]
    InvalidParameter,

    /// The operation was cancelled before completion.
    #[error("Operation was cancelled")]
    Cancelled,

    /// An I/O error outside the categories above.
    #[error("I/O error")]
    Io,

    /// An internal invariant was violated.
    #[error("Internal error")]
    Internal,
}

impl Error {
    /// Creates a new error with specified kind and details.
    pub fn new<E>(kind: ErrorKind, error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self {
            kind,
            error: error.into(),
        }
    }

    /// Attempts to downcast the underlying error to a concrete type.
    ///
    /// Allows accessing the original error when its concrete type is known.
    #[must_use]
    pub fn downcast<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        self.error.downcast_ref::<E>()
    }

    /// Creates a connection timeout error.
    pub fn connection_timeout<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::ConnectionTimeout, error)
    }

    /// Creates a connection failure error.
    pub fn connection_failed<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::ConnectionFailed, error)
    }

    /// Creates a network disconnection error.
    pub fn network_disconnected<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::NetworkDisconnected, error)
    }

    /// Creates an unsupported format error.
    pub fn unsupported_format<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::UnsupportedFormat, error)
    }

    /// Creates a resource allocation error for a named resource.
    pub fn resource_allocation<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::ResourceAllocation, error)
    }

    /// Creates a decoding error.
    pub fn decoding<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::Decoding, error)
    }

    /// Creates a missing-audio-stream error.
    pub fn no_audio_stream<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::NoAudioStream, error)
    }

    /// Creates a fingerprint-backend-not-ready error.
    pub fn fingerprint_not_ready<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::FingerprintNotReady, error)
    }

    /// Creates an invalid parameter error.
    pub fn invalid_parameter<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::InvalidParameter, error)
    }

    /// Creates a cancellation error.
    pub fn cancelled<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::Cancelled, error)
    }

    /// Creates an internal invariant error.
    pub fn internal<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::Internal, error)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.error)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.error.as_ref())
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind, kind.to_string())
    }
}

/// Maps I/O errors to the playback taxonomy.
///
/// Transport resets, broken pipes and timeouts classify as network
/// disconnection so the pipeline retry policy can distinguish them from
/// local file errors.
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind::*;
        let kind = match e.kind() {
            ConnectionReset | ConnectionAborted | BrokenPipe | TimedOut => {
                ErrorKind::NetworkDisconnected
            }
            ConnectionRefused | NotFound | PermissionDenied => ErrorKind::ConnectionFailed,
            OutOfMemory => ErrorKind::ResourceAllocation,
            Interrupted => ErrorKind::Cancelled,
            _ => ErrorKind::Io,
        };
        Self::new(kind, e)
    }
}

/// Maps Symphonia errors to the playback taxonomy.
///
/// * Format/codec recognition failures are unsupported formats
/// * Decode errors stay transient ([`ErrorKind::Decoding`])
/// * I/O errors re-enter the [`std::io::Error`] mapping
impl From<symphonia::core::errors::Error> for Error {
    fn from(e: symphonia::core::errors::Error) -> Self {
        use symphonia::core::errors::Error::*;
        match e {
            IoError(io) => io.into(),
            DecodeError(_) => Self::new(ErrorKind::Decoding, e),
            Unsupported(_) => Self::new(ErrorKind::UnsupportedFormat, e),
            SeekError(_) => Self::new(ErrorKind::Io, e),
            ResetRequired => Self::new(ErrorKind::Decoding, e),
            LimitError(_) => Self::new(ErrorKind::ResourceAllocation, e),
        }
    }
}

impl From<cpal::DevicesError> for Error {
    fn from(e: cpal::DevicesError) -> Self {
        Self::new(ErrorKind::ResourceAllocation, e)
    }
}

impl From<cpal::DeviceNameError> for Error {
    fn from(e: cpal::DeviceNameError) -> Self {
        Self::new(ErrorKind::ResourceAllocation, e)
    }
}

impl From<cpal::SupportedStreamConfigsError> for Error {
    fn from(e: cpal::SupportedStreamConfigsError) -> Self {
        Self::new(ErrorKind::ResourceAllocation, e)
    }
}

impl From<cpal::DefaultStreamConfigError> for Error {
    fn from(e: cpal::DefaultStreamConfigError) -> Self {
        Self::new(ErrorKind::ResourceAllocation, e)
    }
}

impl From<cpal::BuildStreamError> for Error {
    fn from(e: cpal::BuildStreamError) -> Self {
        Self::new(ErrorKind::ResourceAllocation, e)
    }
}

impl From<cpal::PlayStreamError> for Error {
    fn from(e: cpal::PlayStreamError) -> Self {
        Self::new(ErrorKind::ResourceAllocation, e)
    }
}

impl From<cpal::PauseStreamError> for Error {
    fn from(e: cpal::PauseStreamError) -> Self {
        Self::new(ErrorKind::ResourceAllocation, e)
    }
}

impl From<hound::Error> for Error {
    fn from(e: hound::Error) -> Self {
        match e {
            hound::Error::IoError(io) => io.into(),
            _ => Self::new(ErrorKind::Io, e),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::new(ErrorKind::Io, e)
    }
}

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Self::new(ErrorKind::ConnectionFailed, e)
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        let kind = if e.is_timeout() {
            ErrorKind::ConnectionTimeout
        } else if e.is_connect() {
            ErrorKind::ConnectionFailed
        } else {
            ErrorKind::NetworkDisconnected
        };
        Self::new(kind, e)
    }
}

impl<T> From<std::sync::PoisonError<std::sync::MutexGuard<'_, T>>> for Error {
    /// Converts mutex poisoning errors to `Internal`.
    fn from(e: std::sync::PoisonError<std::sync::MutexGuard<'_, T>>) -> Self {
        Self::internal(e.to_string())
    }
}

impl<S> From<stream_download::StreamInitializationError<S>> for Error
where
    S: stream_download::source::SourceStream,
{
    /// Converts stream initialization errors to connection failures.
    fn from(e: stream_download::StreamInitializationError<S>) -> Self {
        Self::connection_failed(e.to_string())
    }
}

impl<C> From<stream_download::http::HttpStreamError<C>> for Error
where
    C: stream_download::http::Client,
{
    /// Converts HTTP stream errors based on their type.
    fn from(e: stream_download::http::HttpStreamError<C>) -> Self {
        use stream_download::http::HttpStreamError::*;
        match e {
            FetchFailure(e) => Self::network_disconnected(e.to_string()),
            ResponseFailure(e) => Self::connection_failed(e.to_string()),
        }
    }
}

impl From<rubato::ResamplerConstructionError> for Error {
    fn from(e: rubato::ResamplerConstructionError) -> Self {
        Self::new(ErrorKind::ResourceAllocation, e)
    }
}

impl From<rubato::ResampleError> for Error {
    fn from(e: rubato::ResampleError) -> Self {
        Self::new(ErrorKind::Internal, e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_reset_is_network_disconnected() {
        let e: Error = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset").into();
        assert_eq!(e.kind, ErrorKind::NetworkDisconnected);
    }

    #[test]
    fn io_refused_is_connection_failed() {
        let e: Error = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "no").into();
        assert_eq!(e.kind, ErrorKind::ConnectionFailed);
    }

    #[test]
    fn downcast_recovers_io_error() {
        let e: Error = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow").into();
        let io = e.downcast::<std::io::Error>().expect("io error");
        assert_eq!(io.kind(), std::io::ErrorKind::TimedOut);
    }

    #[test]
    fn display_includes_kind() {
        let e = Error::no_audio_stream("no track");
        assert!(e.to_string().contains("No audio stream"));
    }
}
