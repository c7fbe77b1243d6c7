//! Streaming media player SDK core.
//!
//! **resona** is the real-time audio engine of a streaming player: it
//! ingests a network or file URL, demultiplexes and decodes compressed
//! audio, applies a rebuildable DSP effect chain and a 10-band parametric
//! equalizer, and renders PCM to the system audio sink under real-time
//! constraints — while side channels generate fingerprints, analyze the
//! signal, synchronize lyrics and feed visualizers.
//!
//! # Core Features
//!
//! * **Playback**: `http(s)`/`icy` streams and local files through one
//!   [`player::Player`] façade with a strict state machine
//! * **DSP**: a large catalogue of named effects ([`effects`]) rebuilt on
//!   parameter change with crossfaded transitions, plus a parametric
//!   biquad EQ ([`equalizer`]) safe to adjust from any thread
//! * **Analysis**: fingerprinting ([`fingerprint`]), BPM/loudness/phase/
//!   pitch/spectral measurement ([`analysis`]), waveform overviews
//!   ([`waveform`]) and a spectrum feed ([`spectrum`])
//! * **Lyrics**: LRC parsing, clock-driven sync and recognition
//!   alignment ([`lyrics`])
//! * **File tools**: transcode/trim/concatenate helpers ([`tools`])
//!
//! # Architecture
//!
//! The library is organized into several key modules:
//!
//! * **Pipeline**
//!   - [`player`]: session lifecycle and the playback state machine
//!   - [`pipeline`]: the per-session connect/demux/decode task
//!   - [`source`]: URL recognition and stream ingest
//!   - [`decoder`]: the media-library demux/decode adapter
//!   - [`resample`]: hardware-rate conversion
//!
//! * **Real-time path**
//!   - [`renderer`]: buffer queue and the hardware render callback
//!   - [`effects`]: the rebuildable effect graph
//!   - [`equalizer`]: the 10-band peaking EQ
//!   - [`spectrum`]: the visualizer feed
//!
//! * **Side channels**
//!   - [`fingerprint`], [`analysis`], [`waveform`], [`lyrics`]
//!
//! * **Foundation**
//!   - [`buffer`], [`clock`], [`stream_info`], [`config`], [`events`],
//!     [`error`], [`util`], [`tools`]
//!
//! # Example
//!
//! ```rust,no_run
//! use resona::{config::Config, player::Player};
//!
//! async fn example() -> resona::error::Result<()> {
//!     let config = Config::default();
//!     let mut player = Player::new(config)?;
//!
//!     let mut events = player.subscribe();
//!     player.play("https://example.com/stream.flac")?;
//!
//!     player.equalizer().set_gain(resona::equalizer::EqBand::Hz500, 3.0);
//!     player.effects().set_reverb_level(0.3);
//!
//!     while let Some(event) = events.recv().await {
//!         println!("{event:?}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Concurrency
//!
//! The session task runs on Tokio and may block on I/O; the render
//! callback runs on the OS audio thread and never blocks on I/O.
//! Parameter setters are callable from any thread and become visible to
//! the renderer no later than its next callback.
//!
//! # Error Handling
//!
//! Errors are handled through the types in the [`error`] module, with
//! most functions returning [`Result`](error::Result). Failures that
//! stop a session surface through the state machine as
//! [`player::PlaybackState::Error`].

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![doc(test(attr(ignore)))]

#[macro_use]
extern crate log;

pub mod analysis;
pub mod buffer;
pub mod clock;
pub mod config;
pub mod decoder;
pub mod effects;
pub mod equalizer;
pub mod error;
pub mod events;
pub mod fingerprint;
pub mod lyrics;
pub mod pipeline;
pub mod player;
pub mod renderer;
pub mod resample;
pub mod source;
pub mod spectrum;
pub mod stream_info;
pub mod tools;
pub mod util;
pub mod waveform;

pub use buffer::AudioBuffer;
pub use player::{PlaybackState, Player};
pub use stream_info::StreamInfo;
