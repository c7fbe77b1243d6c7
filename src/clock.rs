//! Playback clocks and audio/video synchronization.
//!
//! The audio clock is the master: it advances only when the render
//! callback actually emits samples, so every consumer (lyrics, A-B loop,
//! video sync) sees the time listeners hear. The video clock follows and
//! is only used for drift decisions.
//!
//! Clocks are shared lock-free: seconds are stored as `f64` bits in an
//! `AtomicU64`, written by the audio thread and read from anywhere.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    sync::Arc,
    time::Duration,
};

/// Maximum tolerated drift between a video frame and the audio clock.
///
/// Frames inside ±40 ms display as scheduled; beyond that they are
/// dropped or held.
pub const MAX_DRIFT: f64 = 0.040;

/// A monotonically advancing playback clock in seconds.
///
/// Cloning shares the underlying counter.
#[derive(Clone, Debug, Default)]
pub struct SharedClock {
    /// Seconds since session start, stored as `f64` bits.
    seconds: Arc<AtomicU64>,
}

impl SharedClock {
    /// Creates a clock at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current clock value in seconds.
    #[must_use]
    pub fn seconds(&self) -> f64 {
        f64::from_bits(self.seconds.load(Ordering::Acquire))
    }

    /// Sets the clock to an absolute position (used by seek).
    pub fn set(&self, seconds: f64) {
        self.seconds
            .store(seconds.max(0.0).to_bits(), Ordering::Release);
    }

    /// Advances the clock by a rendered span.
    ///
    /// Called from the render callback; the single-writer discipline makes
    /// the load/store pair race-free.
    pub fn advance(&self, seconds: f64) {
        let current = f64::from_bits(self.seconds.load(Ordering::Acquire));
        self.seconds
            .store((current + seconds).to_bits(), Ordering::Release);
    }
}

/// Decision for presenting one video frame against the audio clock.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SyncAction {
    /// Present the frame after the given non-negative delay.
    Display {
        /// Seconds to wait before presentation.
        delay: f64,
    },
    /// The frame is late; skip it entirely.
    Drop,
    /// The frame is early beyond the drift window; keep showing the
    /// previous frame and re-evaluate after the delta.
    RepeatPrevious {
        /// Seconds the frame is ahead of the audio clock.
        delta: f64,
    },
}

/// Paired audio/video clocks with the audio clock as master.
#[derive(Clone, Debug, Default)]
pub struct AvClock {
    /// Master clock, advanced by the audio renderer.
    audio: SharedClock,
    /// Follower clock, advanced as video frames present.
    video: SharedClock,
}

impl AvClock {
    /// Creates a clock pair at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The master audio clock.
    #[must_use]
    pub fn audio(&self) -> &SharedClock {
        &self.audio
    }

    /// The follower video clock.
    #[must_use]
    pub fn video(&self) -> &SharedClock {
        &self.video
    }

    /// Resets both clocks to a position (seek).
    pub fn set(&self, seconds: f64) {
        self.audio.set(seconds);
        self.video.set(seconds);
    }

    /// Decides how to present a video frame with the given PTS.
    ///
    /// The drift is `pts − audio_clock`:
    /// * below −[`MAX_DRIFT`]: the frame is stale, drop it
    /// * above +[`MAX_DRIFT`]: the frame is early, repeat the previous one
    /// * otherwise: display after the (clamped non-negative) drift
    #[must_use]
    pub fn frame_action(&self, pts: f64) -> SyncAction {
        let drift = pts - self.audio.seconds();
        if drift < -MAX_DRIFT {
            SyncAction::Drop
        } else if drift > MAX_DRIFT {
            SyncAction::RepeatPrevious { delta: drift }
        } else {
            SyncAction::Display {
                delay: drift.max(0.0),
            }
        }
    }
}

/// A decoded video frame.
///
/// Owns its pixel storage; immutable after creation. The pipeline only
/// schedules frames (see [`AvClock::frame_action`]); pixel interpretation
/// belongs to the platform view layer.
#[derive(Clone, Debug, PartialEq)]
pub struct VideoFrame {
    /// Pixel data in the platform's native layout.
    pixels: Vec<u8>,

    /// Presentation timestamp in seconds.
    pts: f64,

    /// Display duration.
    duration: Duration,

    /// Frame width in pixels.
    width: u32,

    /// Frame height in pixels.
    height: u32,
}

impl VideoFrame {
    /// Creates a frame from owned pixel data.
    #[must_use]
    pub fn new(pixels: Vec<u8>, pts: f64, duration: Duration, width: u32, height: u32) -> Self {
        Self {
            pixels,
            pts,
            duration,
            width,
            height,
        }
    }

    /// Presentation timestamp in seconds.
    #[must_use]
    pub fn pts(&self) -> f64 {
        self.pts
    }

    /// Display duration.
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Frame width in pixels.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Frame height in pixels.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Pixel data view.
    #[must_use]
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_advances_and_seeks() {
        let clock = SharedClock::new();
        clock.advance(0.5);
        clock.advance(0.25);
        assert!((clock.seconds() - 0.75).abs() < 1e-12);

        clock.set(10.0);
        assert!((clock.seconds() - 10.0).abs() < 1e-12);
    }

    #[test]
    fn clock_never_goes_negative() {
        let clock = SharedClock::new();
        clock.set(-5.0);
        assert_eq!(clock.seconds(), 0.0);
    }

    #[test]
    fn late_frames_drop() {
        let clocks = AvClock::new();
        clocks.audio().set(1.0);
        assert_eq!(clocks.frame_action(0.9), SyncAction::Drop);
    }

    #[test]
    fn early_frames_repeat_previous() {
        let clocks = AvClock::new();
        clocks.audio().set(1.0);
        match clocks.frame_action(1.2) {
            SyncAction::RepeatPrevious { delta } => assert!((delta - 0.2).abs() < 1e-9),
            other => panic!("expected repeat, got {other:?}"),
        }
    }

    #[test]
    fn in_window_frames_display() {
        let clocks = AvClock::new();
        clocks.audio().set(1.0);

        match clocks.frame_action(1.03) {
            SyncAction::Display { delay } => assert!((delay - 0.03).abs() < 1e-9),
            other => panic!("expected display, got {other:?}"),
        }

        // A frame slightly behind still displays, with zero delay.
        match clocks.frame_action(0.97) {
            SyncAction::Display { delay } => assert_eq!(delay, 0.0),
            other => panic!("expected display, got {other:?}"),
        }
    }

    #[test]
    fn drift_boundaries() {
        let clocks = AvClock::new();
        clocks.audio().set(1.0);
        assert!(matches!(
            clocks.frame_action(1.0 - 0.039),
            SyncAction::Display { .. }
        ));
        assert!(matches!(clocks.frame_action(1.0 - 0.041), SyncAction::Drop));
        assert!(matches!(
            clocks.frame_action(1.0 + 0.041),
            SyncAction::RepeatPrevious { .. }
        ));
    }
}
