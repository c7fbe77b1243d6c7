//! Playback façade and session lifecycle.
//!
//! [`Player`] drives one session at a time from URL to silence:
//!
//! 1. `play(url)` transitions `Idle → Connecting` and spawns the session
//!    task (see [`crate::pipeline`]), returning immediately
//! 2. the task connects, probes, decodes and feeds the renderer;
//!    `Connecting → Playing` once audio flows
//! 3. `pause`/`resume` gate the hardware sink without touching decoders
//! 4. `seek` flushes the render queue and moves the demuxer
//! 5. `stop` cancels the task and tears down every owned resource
//!
//! Any state may transition to `Error(kind)`, which is terminal for the
//! session; callers invoke `stop()` to return to idle. Observers receive
//! [`PlayerEvent`](crate::events::PlayerEvent)s over subscribed channels.
//!
//! Parameter surfaces (the effect chain, the equalizer, volume) hang off
//! the player as shared handles and never touch the session task.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio_util::sync::CancellationToken;

use crate::{
    clock::AvClock,
    config::Config,
    effects::EffectChain,
    equalizer::Equalizer,
    error::{Error, ErrorKind, Result},
    events::{EventHub, EventReceiver, PlayerEvent},
    pipeline::{self, SessionCommand, SessionContext},
    renderer::Renderer,
    spectrum::SpectrumFeed,
    stream_info::StreamInfo,
};

/// Playback session states.
///
/// Transitions: `Idle → Connecting → Playing ↔ Paused → Stopped`; any
/// state may enter `Error(kind)`, which only `stop()` leaves.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum PlaybackState {
    /// No session.
    #[default]
    Idle,
    /// Opening and probing the stream (10 s budget).
    Connecting,
    /// Audio is flowing to the sink.
    Playing,
    /// Sink gated, decoders alive.
    Paused,
    /// Session ended or was stopped.
    Stopped,
    /// Terminal failure; `stop()` returns to idle.
    Error(ErrorKind),
}

impl PlaybackState {
    /// Whether the state machine permits this transition.
    #[must_use]
    pub fn can_transition_to(&self, to: &PlaybackState) -> bool {
        use PlaybackState::*;
        match (self, to) {
            // Errors may be entered from anywhere except themselves.
            (_, Error(_)) => !matches!(self, Error(_)),
            // Stop is allowed from anywhere (including error teardown).
            (_, Stopped) => true,
            (Idle, Connecting) => true,
            (Stopped, Connecting) | (Stopped, Idle) => true,
            (Error(_), Idle) => true,
            (Connecting, Playing) => true,
            (Playing, Paused) | (Paused, Playing) => true,
            _ => false,
        }
    }

    /// Whether a session is currently established.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Connecting | Self::Playing | Self::Paused)
    }
}

/// A running session: its task, command channel and cancel token.
struct Session {
    task: tokio::task::JoinHandle<()>,
    commands: std::sync::mpsc::Sender<SessionCommand>,
    cancel: CancellationToken,
}

/// Streaming audio player.
///
/// One `Player` owns one renderer and at most one session task. The DSP
/// handles ([`Player::effects`], [`Player::equalizer`]) are shared and
/// remain valid across sessions.
pub struct Player {
    config: Config,
    hub: Arc<EventHub>,
    effects: Arc<EffectChain>,
    equalizer: Arc<Equalizer>,
    spectrum: Arc<SpectrumFeed>,
    clock: AvClock,
    renderer: Arc<Renderer>,
    ab_loop: Arc<Mutex<Option<(f64, f64)>>>,
    stream_info: Arc<Mutex<Option<StreamInfo>>>,
    session: Option<Session>,
}

impl Player {
    /// Creates a player and selects the output device.
    ///
    /// The device is selected but not opened; the session task opens it
    /// once the stream format is known.
    ///
    /// # Errors
    ///
    /// Returns `ResourceAllocation` when the configured audio device
    /// cannot be found.
    pub fn new(config: Config) -> Result<Self> {
        let hub = Arc::new(EventHub::new());
        let effects = Arc::new(EffectChain::new());
        let equalizer = Arc::new(Equalizer::new());
        let spectrum = Arc::new(SpectrumFeed::default());
        let clock = AvClock::new();

        // Equalizer clamp reports fan out as player events.
        {
            let hub = Arc::clone(&hub);
            equalizer.set_clamp_observer(Box::new(move |clamp| {
                hub.emit(PlayerEvent::EqGainClamped {
                    band: clamp.band.index(),
                    original: clamp.original,
                    clamped: clamp.clamped,
                });
            }));
        }

        let renderer = Renderer::new(
            &config,
            Arc::clone(&effects),
            Arc::clone(&equalizer),
            Arc::clone(&spectrum),
            clock.audio().clone(),
        )?;

        Ok(Self {
            config,
            hub,
            effects,
            equalizer,
            spectrum,
            clock,
            renderer: Arc::new(renderer),
            ab_loop: Arc::new(Mutex::new(None)),
            stream_info: Arc::new(Mutex::new(None)),
            session: None,
        })
    }

    /// The effect chain handle; safe to use from any thread.
    #[must_use]
    pub fn effects(&self) -> Arc<EffectChain> {
        Arc::clone(&self.effects)
    }

    /// The equalizer handle; safe to use from any thread.
    #[must_use]
    pub fn equalizer(&self) -> Arc<Equalizer> {
        Arc::clone(&self.equalizer)
    }

    /// The spectrum feed handle.
    #[must_use]
    pub fn spectrum(&self) -> Arc<SpectrumFeed> {
        Arc::clone(&self.spectrum)
    }

    /// Subscribes to player events.
    #[must_use]
    pub fn subscribe(&self) -> EventReceiver {
        self.hub.subscribe()
    }

    /// The current playback state.
    #[must_use]
    pub fn state(&self) -> PlaybackState {
        self.hub.state()
    }

    /// The probe result of the current session, once connected.
    #[must_use]
    pub fn stream_info(&self) -> Option<StreamInfo> {
        self.stream_info.lock().unwrap().clone()
    }

    /// Current playback position in seconds (the audio clock).
    #[must_use]
    pub fn position(&self) -> f64 {
        self.clock.audio().seconds()
    }

    /// Starts playing a URL, replacing any running session.
    ///
    /// Transitions `Idle → Connecting` and returns immediately; progress
    /// is reported through events. Must be called within a Tokio
    /// runtime.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` for an empty URL. Connection failures
    /// surface asynchronously via the state machine.
    pub fn play(&mut self, url: &str) -> Result<()> {
        if url.trim().is_empty() {
            return Err(Error::invalid_parameter("empty URL"));
        }

        self.stop();
        if matches!(self.hub.state(), PlaybackState::Stopped | PlaybackState::Error(_)) {
            self.hub.set_state(PlaybackState::Idle);
        }
        self.hub.set_state(PlaybackState::Connecting);
        self.clock.set(0.0);
        *self.stream_info.lock().unwrap() = None;

        let (command_tx, command_rx) = std::sync::mpsc::channel();
        let cancel = CancellationToken::new();

        let context = SessionContext {
            url: url.trim().to_string(),
            config: self.config.clone(),
            hub: Arc::clone(&self.hub),
            renderer: Arc::clone(&self.renderer),
            effects: Arc::clone(&self.effects),
            clock: self.clock.clone(),
            ab_loop: Arc::clone(&self.ab_loop),
            stream_info: Arc::clone(&self.stream_info),
            cancel: cancel.clone(),
        };

        let task = tokio::spawn(pipeline::run(context, command_rx));
        self.session = Some(Session {
            task,
            commands: command_tx,
            cancel,
        });
        Ok(())
    }

    /// Pauses the hardware sink without tearing down decoders.
    ///
    /// # Errors
    ///
    /// Returns an error when the audio backend rejects the pause.
    pub fn pause(&self) -> Result<()> {
        if self.hub.state() != PlaybackState::Playing {
            return Ok(());
        }
        self.renderer.pause()?;
        self.hub.set_state(PlaybackState::Paused);
        Ok(())
    }

    /// Resumes a paused session.
    ///
    /// # Errors
    ///
    /// Returns an error when the audio backend rejects the resume.
    pub fn resume(&self) -> Result<()> {
        if self.hub.state() != PlaybackState::Paused {
            return Ok(());
        }
        self.renderer.resume()?;
        self.hub.set_state(PlaybackState::Playing);
        Ok(())
    }

    /// Seeks to a position in seconds.
    ///
    /// The render queue is flushed immediately; the demuxer lands on the
    /// nearest decodable position at or before the target.
    pub fn seek(&self, seconds: f64) {
        if let Some(session) = &self.session {
            let _ = session
                .commands
                .send(SessionCommand::Seek(Duration::from_secs_f64(seconds.max(0.0))));
        }
    }

    /// Stops the session and releases its resources.
    ///
    /// Safe to call in any state; returns the player to `Stopped` (and a
    /// failed session to a restartable state).
    pub fn stop(&mut self) {
        if let Some(session) = self.session.take() {
            session.cancel.cancel();
            let _ = session.commands.send(SessionCommand::Wake);
            session.task.abort();
        }

        self.renderer.stop();
        self.effects.reset_runtime();
        *self.ab_loop.lock().unwrap() = None;

        if self.hub.state() != PlaybackState::Idle {
            self.hub.set_state(PlaybackState::Stopped);
        }
    }

    /// Sets an A-B loop: when the audio clock crosses `b`, the session
    /// seeks back to `a`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` when `a >= b` or either is negative.
    pub fn set_ab_loop(&self, a: f64, b: f64) -> Result<()> {
        if !(a >= 0.0 && b > a) {
            return Err(Error::invalid_parameter(format!(
                "invalid A-B loop: a={a}, b={b}"
            )));
        }
        *self.ab_loop.lock().unwrap() = Some((a, b));
        Ok(())
    }

    /// Clears the A-B loop.
    pub fn clear_ab_loop(&self) {
        *self.ab_loop.lock().unwrap() = None;
    }

    /// Installs (or clears) the raw-audio tap.
    ///
    /// The tap fires from the render callback with the interleaved
    /// samples about to reach the sink; it must not block.
    pub fn set_audio_tap(&self, tap: Option<crate::renderer::AudioTap>) {
        self.renderer.set_tap(tap);
    }

    /// Sets the renderer volume in [0, 1] (logarithmic taper).
    pub fn set_volume(&self, volume: f32) {
        self.renderer.set_volume(volume);
    }

    /// The renderer volume in [0, 1].
    #[must_use]
    pub fn volume(&self) -> f32 {
        self.renderer.volume()
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            session.cancel.cancel();
            session.task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_table_matches_design() {
        use PlaybackState::*;
        assert!(Idle.can_transition_to(&Connecting));
        assert!(Connecting.can_transition_to(&Playing));
        assert!(Playing.can_transition_to(&Paused));
        assert!(Paused.can_transition_to(&Playing));
        assert!(Playing.can_transition_to(&Stopped));
        assert!(Paused.can_transition_to(&Stopped));
        assert!(Stopped.can_transition_to(&Connecting));

        // Errors enter from anywhere and are terminal except for stop.
        assert!(Playing.can_transition_to(&Error(ErrorKind::Decoding)));
        assert!(Connecting.can_transition_to(&Error(ErrorKind::ConnectionTimeout)));
        assert!(!Error(ErrorKind::Decoding).can_transition_to(&Playing));
        assert!(Error(ErrorKind::Decoding).can_transition_to(&Stopped));

        // No shortcuts.
        assert!(!Idle.can_transition_to(&Playing));
        assert!(!Stopped.can_transition_to(&Playing));
        assert!(!Connecting.can_transition_to(&Paused));
    }

    #[test]
    fn active_states() {
        assert!(PlaybackState::Playing.is_active());
        assert!(PlaybackState::Paused.is_active());
        assert!(PlaybackState::Connecting.is_active());
        assert!(!PlaybackState::Idle.is_active());
        assert!(!PlaybackState::Stopped.is_active());
        assert!(!PlaybackState::Error(ErrorKind::Io).is_active());
    }

    #[test]
    fn hub_rejects_invalid_transitions() {
        let hub = EventHub::new();
        hub.set_state(PlaybackState::Playing); // invalid from Idle
        assert_eq!(hub.state(), PlaybackState::Idle);

        hub.set_state(PlaybackState::Connecting);
        hub.set_state(PlaybackState::Playing);
        assert_eq!(hub.state(), PlaybackState::Playing);
    }

    #[tokio::test]
    async fn hub_emits_state_and_error_events() {
        let hub = EventHub::new();
        let mut receiver = hub.subscribe();

        hub.set_state(PlaybackState::Connecting);
        hub.set_state(PlaybackState::Error(ErrorKind::ConnectionTimeout));

        let first = receiver.recv().await.unwrap();
        assert_eq!(
            first,
            PlayerEvent::StateChanged {
                from: PlaybackState::Idle,
                to: PlaybackState::Connecting
            }
        );
        let second = receiver.recv().await.unwrap();
        assert_eq!(second, PlayerEvent::Error(ErrorKind::ConnectionTimeout));
        let third = receiver.recv().await.unwrap();
        assert!(matches!(third, PlayerEvent::StateChanged { .. }));
    }
}
