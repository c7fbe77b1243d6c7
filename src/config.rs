//! Configuration for the playback core.
//!
//! This module holds the knobs a session honors when opening and playing
//! a stream:
//! * Network open behavior (timeout, user agent, reconnection, prefetch)
//! * Container probing limits
//! * Playback behavior (normalization, initial volume, queue depth)
//! * Failure policy budgets (read retries, decode stall window)
//!
//! Most settings have defaults matching the reference player behavior and
//! can be overridden field by field.

use std::time::Duration;

/// Complete configuration for a [`Player`](crate::player::Player).
///
/// Construct with [`Config::default`] and override what you need:
///
/// ```rust
/// use resona::config::Config;
///
/// let config = Config {
///     normalization: true,
///     ..Config::default()
/// };
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// Wall-clock budget for opening and probing a stream.
    ///
    /// Exceeding it fails the session with `ConnectionTimeout`.
    /// By default this is 10 seconds.
    pub connect_timeout: Duration,

    /// Consecutive transient read failures tolerated before the session
    /// escalates to `NetworkDisconnected`.
    ///
    /// A successful read resets the counter. By default this is 10.
    pub read_retries: u32,

    /// Window after entering `Playing` within which at least one frame
    /// must decode, or decoder errors escalate.
    ///
    /// By default this is 2 seconds.
    pub decode_stall_window: Duration,

    /// Maximum bytes the prober may consume while detecting the container.
    ///
    /// By default this is 5 MiB.
    pub probe_size: u64,

    /// Maximum duration the prober may analyze while detecting stream
    /// parameters.
    ///
    /// By default this is 10 seconds.
    pub max_analyze_duration: Duration,

    /// The `User-Agent` string used for network opens.
    ///
    /// By default a browser-like agent, since some stream hosts reject
    /// obviously non-browser clients.
    pub user_agent: String,

    /// Bytes to prefetch before a network stream is considered playable.
    ///
    /// By default this is 256 KiB.
    pub prefetch_bytes: u64,

    /// Whether to apply loudness normalization on the render path.
    ///
    /// By default this is `false`.
    pub normalization: bool,

    /// Initial renderer volume in [0.0, 1.0].
    ///
    /// Logarithmically scaled at the renderer. By default this is 1.0.
    pub initial_volume: f32,

    /// Maximum buffers held in the render queue before the decode side
    /// is backpressured.
    ///
    /// By default this is 200.
    pub max_queued_buffers: usize,

    /// Audio output device specification.
    ///
    /// Format: `[<host>][|<device>][|<sample rate>]`, all parts optional
    /// and case-insensitive. Empty selects the system default output.
    pub device: String,
}

impl Config {
    /// Default browser-like user agent for network opens.
    pub const DEFAULT_USER_AGENT: &'static str = "Mozilla/5.0 (X11; Linux x86_64) \
        AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0 Safari/537.36";
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            read_retries: 10,
            decode_stall_window: Duration::from_secs(2),
            probe_size: 5 * 1024 * 1024,
            max_analyze_duration: Duration::from_secs(10),
            user_agent: Self::DEFAULT_USER_AGENT.to_string(),
            prefetch_bytes: 256 * 1024,
            normalization: false,
            initial_volume: 1.0,
            max_queued_buffers: 200,
            device: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_policy() {
        let config = Config::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.read_retries, 10);
        assert_eq!(config.decode_stall_window, Duration::from_secs(2));
        assert_eq!(config.probe_size, 5 * 1024 * 1024);
        assert_eq!(config.max_queued_buffers, 200);
    }
}
