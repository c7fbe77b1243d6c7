//! Events emitted during playback.
//!
//! This module defines the events that can be triggered while a session
//! runs. These events can be used to:
//! * Monitor playback state transitions
//! * Surface errors without polling
//! * Track duration discovery and track boundaries
//!
//! Events are delivered over an unbounded channel registered with
//! [`Player::register`](crate::player::Player::register); the receiver side
//! decides how to marshal them (UI thread, log sink, test harness).

use crate::{error::ErrorKind, player::PlaybackState};

/// Events that can be emitted by the player.
///
/// These events represent significant changes in session state. They are
/// snapshots: each carries the values at emission time, not live handles.
#[derive(Clone, Debug, PartialEq)]
pub enum PlayerEvent {
    /// The playback state machine transitioned.
    ///
    /// Emitted for every transition, including entering
    /// [`PlaybackState::Error`].
    StateChanged {
        /// State the session left.
        from: PlaybackState,
        /// State the session entered.
        to: PlaybackState,
    },

    /// The session encountered an error.
    ///
    /// Transient decode errors are absorbed by policy and do not emit
    /// this event; anything surfaced here also drove the state machine
    /// into [`PlaybackState::Error`].
    Error(ErrorKind),

    /// The stream duration became known or was refined.
    ///
    /// Live streams never emit this event.
    DurationUpdated {
        /// Total duration in seconds.
        seconds: f64,
    },

    /// Playback reached the end of the current track.
    TrackEnded,

    /// An equalizer gain setter received an out-of-range value.
    ///
    /// The gain was clamped; this event reports both values.
    EqGainClamped {
        /// Band index (0-9).
        band: usize,
        /// The value the caller passed.
        original: f32,
        /// The value actually applied.
        clamped: f32,
    },
}

/// Sending half of an event subscription.
///
/// Held by the player; delivery never blocks. A closed receiver is treated
/// as an unsubscribe.
pub type EventSender = tokio::sync::mpsc::UnboundedSender<PlayerEvent>;

/// Receiving half of an event subscription.
pub type EventReceiver = tokio::sync::mpsc::UnboundedReceiver<PlayerEvent>;

/// Creates a connected event channel pair.
#[must_use]
pub fn channel() -> (EventSender, EventReceiver) {
    tokio::sync::mpsc::unbounded_channel()
}

/// Shared state-and-observer hub between the player and its session task.
///
/// Holds the authoritative [`PlaybackState`] and fans events out to every
/// subscriber. Closed receivers are pruned on the next send.
#[derive(Default)]
pub struct EventHub {
    state: std::sync::Mutex<PlaybackState>,
    subscribers: std::sync::Mutex<Vec<EventSender>>,
}

impl EventHub {
    /// Creates a hub in [`PlaybackState::Idle`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The current playback state.
    #[must_use]
    pub fn state(&self) -> PlaybackState {
        self.state.lock().unwrap().clone()
    }

    /// Subscribes a new event receiver.
    #[must_use]
    pub fn subscribe(&self) -> EventReceiver {
        let (sender, receiver) = channel();
        self.subscribers.lock().unwrap().push(sender);
        receiver
    }

    /// Registers an externally created sender.
    pub fn register(&self, sender: EventSender) {
        self.subscribers.lock().unwrap().push(sender);
    }

    /// Sends an event to every live subscriber.
    pub fn emit(&self, event: PlayerEvent) {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|sender| sender.send(event.clone()).is_ok());
    }

    /// Transitions the state machine, emitting `StateChanged`.
    ///
    /// Invalid transitions are ignored with a warning; an error state is
    /// terminal until an explicit stop resets the session.
    pub fn set_state(&self, to: PlaybackState) {
        let mut state = self.state.lock().unwrap();
        let from = state.clone();
        if from == to {
            return;
        }
        if !from.can_transition_to(&to) {
            warn!("ignoring invalid state transition {from:?} -> {to:?}");
            return;
        }
        *state = to.clone();
        drop(state);

        if let PlaybackState::Error(kind) = &to {
            self.emit(PlayerEvent::Error(*kind));
        }
        self.emit(PlayerEvent::StateChanged { from, to });
    }
}
