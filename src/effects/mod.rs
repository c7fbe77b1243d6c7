//! Audio effect chain.
//!
//! [`EffectChain`] is the render-path DSP graph: an ordered chain of named
//! stages (see [`graph`]) built from a [`params::EffectParams`] snapshot.
//! Parameter setters are safe to call from any thread while audio
//! renders; every mutation marks the chain dirty and the graph is rebuilt
//! once, at the next `process` call, so bursts of setter calls coalesce
//! into a single rebuild.
//!
//! # Artifact suppression
//!
//! Before a rebuild the old graph is flushed (its buffered output drains
//! into the residue FIFO) and the last 64 output frames are retained; the
//! first 256 samples of the new graph's output are cross-faded against
//! that tail so a rebuild never steps the waveform.
//!
//! # Length changes
//!
//! Tempo stages produce a different frame count than they consume. The
//! chain therefore runs all graph output through a FIFO and always fills
//! the caller's buffer exactly, accumulating residue for later calls
//! (shortfalls at stream start come out as silence).

pub mod biquad;
pub mod delay_line;
pub mod dynamics;
pub mod frequency;
pub mod graph;
pub mod lfo;
pub mod modulation;
pub mod node;
pub mod params;
pub mod repair;
pub mod spatial;
pub mod timbre;
pub mod time;

use std::collections::VecDeque;
use std::sync::Mutex;

pub use graph::FilterGraph;
pub use params::{EffectParams, SoftClipKind, VoicePreset};

/// Frames of prior output retained for the rebuild cross-fade.
const TAIL_FRAMES: usize = 64;

/// Length of the rebuild cross-fade, in interleaved samples.
const CROSSFADE_SAMPLES: usize = 256;

/// Shared state behind the chain mutex.
struct ChainState {
    /// Pending parameter snapshot.
    params: EffectParams,

    /// Set by every setter; cleared when the graph is rebuilt.
    dirty: bool,

    /// The active graph, absent while the chain is in bypass.
    graph: Option<FilterGraph>,

    /// Residue FIFO between graph output and the caller's buffers.
    fifo: VecDeque<f32>,

    /// Rolling copy of the most recent output (interleaved).
    tail: Vec<f32>,

    /// Retained tail being cross-faded against, with progress.
    fade_tail: Vec<f32>,
    fade_progress: usize,

    /// Number of graph rebuilds performed.
    rebuilds: u64,

    /// Scratch for graph output, reused across calls.
    produced: Vec<f32>,
}

/// Thread-safe, rebuildable effect chain.
///
/// One instance lives on the render path per player; see the module docs
/// for the locking and rebuild contract.
pub struct EffectChain {
    state: Mutex<ChainState>,
}

impl Default for EffectChain {
    fn default() -> Self {
        Self::new()
    }
}

impl EffectChain {
    /// Creates a chain in bypass.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ChainState {
                params: EffectParams::default(),
                dirty: false,
                graph: None,
                fifo: VecDeque::new(),
                tail: Vec::new(),
                fade_tail: Vec::new(),
                fade_progress: CROSSFADE_SAMPLES,
                rebuilds: 0,
                produced: Vec::new(),
            }),
        }
    }

    /// Applies an arbitrary parameter mutation and marks the chain dirty.
    ///
    /// All named setters funnel through this; use it directly for knobs
    /// without a dedicated method.
    pub fn update(&self, mutate: impl FnOnce(&mut EffectParams)) {
        let mut state = self.state.lock().unwrap();
        mutate(&mut state.params);
        state.dirty = true;
    }

    /// Returns a copy of the pending parameter snapshot.
    #[must_use]
    pub fn params(&self) -> EffectParams {
        self.state.lock().unwrap().params.clone()
    }

    /// Number of graph rebuilds performed so far.
    #[must_use]
    pub fn rebuilds(&self) -> u64 {
        self.state.lock().unwrap().rebuilds
    }

    /// Whether any stage is active (the chain is not a bypass).
    #[must_use]
    pub fn is_active(&self) -> bool {
        let state = self.state.lock().unwrap();
        !state.params.is_bypass() || state.graph.is_some() || !state.fifo.is_empty()
    }

    // ── named setters ────────────────────────────────────────────────

    /// Sets the output gain in dB.
    pub fn set_gain_db(&self, gain_db: f32) {
        self.update(|params| params.gain_db = gain_db.clamp(-60.0, 24.0));
    }

    /// Sets the echo-network reverb level in [0, 1]; 0 disables.
    pub fn set_reverb_level(&self, level: f32) {
        self.update(|params| params.reverb_level = level.clamp(0.0, 1.0));
    }

    /// Enables or disables the chorus.
    pub fn set_chorus_enabled(&self, enabled: bool) {
        self.update(|params| params.chorus_enabled = enabled);
    }

    /// Enables or disables the flanger.
    pub fn set_flanger_enabled(&self, enabled: bool) {
        self.update(|params| params.flanger_enabled = enabled);
    }

    /// Enables or disables the tremolo.
    pub fn set_tremolo_enabled(&self, enabled: bool) {
        self.update(|params| params.tremolo_enabled = enabled);
    }

    /// Sets vocal removal strength in [0, 1]; 0 disables.
    pub fn set_vocal_removal(&self, strength: f32) {
        self.update(|params| params.vocal_removal = strength.clamp(0.0, 1.0));
    }

    /// Sets the stereo width; 1.0 is unchanged.
    pub fn set_stereo_width(&self, width: f32) {
        self.update(|params| params.stereo_width = width.clamp(0.0, 4.0));
    }

    /// Sets the left/right balance in [-1, 1].
    pub fn set_balance(&self, balance: f32) {
        self.update(|params| params.balance = balance.clamp(-1.0, 1.0));
    }

    /// Sets the bass shelf gain in dB; 0 disables the stage.
    pub fn set_bass_gain_db(&self, gain_db: f32) {
        self.update(|params| params.bass_gain_db = gain_db.clamp(-24.0, 24.0));
    }

    /// Sets the treble shelf gain in dB; 0 disables the stage.
    pub fn set_treble_gain_db(&self, gain_db: f32) {
        self.update(|params| params.treble_gain_db = gain_db.clamp(-24.0, 24.0));
    }

    /// Enables or disables the limiter.
    pub fn set_limiter_enabled(&self, enabled: bool) {
        self.update(|params| params.limiter_enabled = enabled);
    }

    /// Enables or disables the compressor.
    pub fn set_compressor_enabled(&self, enabled: bool) {
        self.update(|params| params.compressor_enabled = enabled);
    }

    /// Enables or disables loudness normalization.
    pub fn set_loudness_normalize(&self, enabled: bool) {
        self.update(|params| params.loudnorm_enabled = enabled);
    }

    /// Sets the playback tempo factor.
    ///
    /// Out-of-range factors are factorized into chained in-range stages
    /// at build time, not clamped.
    pub fn set_tempo(&self, tempo: f32) {
        self.update(|params| {
            params.tempo = if tempo.is_finite() && tempo > 0.0 {
                tempo.clamp(0.125, 8.0)
            } else {
                1.0
            };
        });
    }

    /// Sets the pitch shift in semitones.
    pub fn set_pitch_semitones(&self, semitones: f32) {
        self.update(|params| params.pitch_semitones = semitones.clamp(-24.0, 24.0));
    }

    /// Applies a voicing preset, or clears it with `None`.
    pub fn set_preset(&self, preset: Option<VoicePreset>) {
        self.update(|params| params.preset = preset);
    }

    /// Restores every parameter to its default (bypass).
    pub fn reset_params(&self) {
        self.update(|params| *params = EffectParams::default());
    }

    // ── render path ──────────────────────────────────────────────────

    /// Processes one interleaved block in place.
    ///
    /// Called from the render callback. When the chain is a bypass this
    /// is a zero-copy no-op: the buffer is returned untouched. Otherwise
    /// the block runs through the graph (rebuilding it first if any
    /// parameter changed) and the output view is filled exactly from the
    /// residue FIFO.
    pub fn process(&self, samples: &mut [f32], channels: usize, sample_rate: u32) {
        if channels == 0 || samples.is_empty() {
            return;
        }

        // Called from the render callback: a poisoned lock must not
        // panic across the hardware boundary.
        let Ok(mut state) = self.state.lock() else {
            return;
        };

        // Fast path: nothing active and nothing pending.
        if !state.dirty
            && state.graph.is_none()
            && state.fifo.is_empty()
            && state.params.is_bypass()
        {
            Self::update_tail(&mut state.tail, samples, channels);
            return;
        }

        let format_changed = state.graph.as_ref().is_some_and(|graph| {
            graph.channels() != channels || graph.sample_rate() != sample_rate
        });

        if state.dirty || format_changed || state.graph.is_none() {
            Self::rebuild(&mut state, channels, sample_rate);
        }

        // Run the block through the graph into the FIFO.
        let mut produced = std::mem::take(&mut state.produced);
        produced.clear();
        if let Some(graph) = state.graph.as_mut() {
            graph.process(samples, &mut produced);
        } else {
            // Rebuild into bypass: drain the residue, then pass through.
            produced.extend_from_slice(samples);
        }
        state.fifo.extend(produced.iter().copied());
        state.produced = produced;

        // Fill the caller's view from the FIFO; shortfall becomes silence
        // (only at stream start or right after a rebuild into a laggy
        // graph).
        for slot in samples.iter_mut() {
            *slot = state.fifo.pop_front().unwrap_or(0.0);
        }

        Self::apply_crossfade(&mut state, samples, channels);
        Self::update_tail(&mut state.tail, samples, channels);
    }

    /// Rebuilds the graph from the pending parameters.
    ///
    /// The previous graph is flushed into the FIFO so no samples strand,
    /// and the retained output tail arms the cross-fade.
    fn rebuild(state: &mut ChainState, channels: usize, sample_rate: u32) {
        if let Some(graph) = state.graph.as_mut() {
            let mut drained = Vec::new();
            graph.flush(&mut drained);
            state.fifo.extend(drained);
        }

        state.fade_tail = state.tail.clone();
        state.fade_progress = if state.fade_tail.is_empty() {
            CROSSFADE_SAMPLES
        } else {
            0
        };

        let graph = FilterGraph::build(&state.params, channels, sample_rate);
        trace!("effect graph rebuilt: {}", graph.describe());
        state.graph = if graph.is_empty() { None } else { Some(graph) };
        state.dirty = false;
        state.rebuilds += 1;
    }

    /// Cross-fades freshly produced output against the retained tail.
    ///
    /// The fade is anchored on the tail's final frame: the first faded
    /// sample continues the last sample listeners heard, then the new
    /// graph's output takes over linearly. The older tail frames feed the
    /// renderer's drift detector, not the fade itself.
    fn apply_crossfade(state: &mut ChainState, samples: &mut [f32], channels: usize) {
        if state.fade_progress >= CROSSFADE_SAMPLES || state.fade_tail.len() < channels {
            return;
        }

        let anchor = state.fade_tail.len() - channels;
        for slot in samples.iter_mut() {
            if state.fade_progress >= CROSSFADE_SAMPLES {
                break;
            }
            let channel = state.fade_progress % channels;
            let old = state.fade_tail[anchor + channel];

            let weight = state.fade_progress as f32 / CROSSFADE_SAMPLES as f32;
            *slot = old * (1.0 - weight) + *slot * weight;
            state.fade_progress += 1;
        }
    }

    /// Maintains the rolling copy of recent output.
    fn update_tail(tail: &mut Vec<f32>, samples: &[f32], channels: usize) {
        let keep = TAIL_FRAMES * channels;
        if samples.len() >= keep {
            tail.clear();
            tail.extend_from_slice(&samples[samples.len() - keep..]);
        } else {
            tail.extend_from_slice(samples);
            let excess = tail.len().saturating_sub(keep);
            if excess > 0 {
                tail.drain(..excess);
            }
        }
    }

    /// Clears all runtime state, keeping parameters.
    ///
    /// Called when playback stops or seeks so stale residue never leaks
    /// into the next stream position.
    pub fn reset_runtime(&self) {
        let mut state = self.state.lock().unwrap();
        if let Some(graph) = state.graph.as_mut() {
            graph.reset();
        }
        state.fifo.clear();
        state.tail.clear();
        state.fade_tail.clear();
        state.fade_progress = CROSSFADE_SAMPLES;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bypass_leaves_buffer_untouched() {
        let chain = EffectChain::new();
        let original: Vec<f32> = (0..512).map(|i| (i as f32 * 0.013).sin()).collect();
        let mut buffer = original.clone();
        chain.process(&mut buffer, 2, 48_000);
        assert_eq!(buffer, original, "bypass must be byte-identical");
        assert_eq!(chain.rebuilds(), 0, "bypass must not build a graph");
    }

    #[test]
    fn setter_burst_coalesces_into_one_rebuild() {
        let chain = EffectChain::new();
        let mut buffer = vec![0.0f32; 1024];

        // Prime the chain so a tail exists.
        chain.process(&mut buffer, 2, 48_000);

        chain.set_reverb_level(0.5);
        chain.set_chorus_enabled(true);
        assert_eq!(chain.rebuilds(), 0, "rebuild must defer to process");

        chain.process(&mut buffer, 2, 48_000);
        assert_eq!(chain.rebuilds(), 1, "mutations must coalesce");

        chain.process(&mut buffer, 2, 48_000);
        assert_eq!(chain.rebuilds(), 1, "no further rebuilds without changes");
    }

    #[test]
    fn rebuild_crossfades_against_previous_output() {
        let chain = EffectChain::new();
        let rate = 48_000u32;
        let tone = |offset: usize, len: usize| -> Vec<f32> {
            (0..len)
                .map(|i| {
                    let t = (offset + i / 2) as f32 / rate as f32;
                    (2.0 * std::f32::consts::PI * 220.0 * t).sin() * 0.8
                })
                .collect()
        };

        // Steady bypass playback.
        let mut block = tone(0, 2048);
        chain.process(&mut block, 2, rate);
        let last_out = *block.last().unwrap();

        // Two quick mutations, then the next callback.
        chain.set_reverb_level(0.5);
        chain.set_chorus_enabled(true);

        let mut next = tone(1024, 2048);
        chain.process(&mut next, 2, rate);

        // The first new sample must continue from the previous output.
        assert!(
            (next[0] - last_out).abs() < 0.3,
            "step at rebuild boundary: {} -> {}",
            last_out,
            next[0]
        );
        // No step discontinuities inside the cross-fade region either.
        for pair in next[..256].windows(2) {
            assert!(
                (pair[1] - pair[0]).abs() < 0.3,
                "discontinuity inside crossfade: {:?}",
                pair
            );
        }
    }

    #[test]
    fn tempo_chain_fills_view_exactly() {
        let chain = EffectChain::new();
        chain.set_tempo(1.5);

        let mut total_in = 0usize;
        for _ in 0..50 {
            let mut block = vec![0.25f32; 2048];
            total_in += block.len();
            chain.process(&mut block, 2, 48_000);
            // The view is always filled; no partial writes.
            assert_eq!(block.len(), 2048);
        }
        assert!(total_in > 0);
    }

    #[test]
    fn reset_params_returns_to_bypass() {
        let chain = EffectChain::new();
        chain.set_gain_db(6.0);
        let mut block = vec![0.5f32; 256];
        chain.process(&mut block, 1, 44_100);
        assert!(chain.is_active());

        chain.reset_params();
        chain.reset_runtime();
        let mut block = vec![0.5f32; 256];
        chain.process(&mut block, 1, 44_100);
        // One more pass drains the bypass rebuild; afterwards inactive.
        chain.reset_runtime();
        assert!(!chain.is_active());
    }

    #[test]
    fn gain_actually_applies() {
        let chain = EffectChain::new();
        chain.set_gain_db(-6.0);

        let mut block = vec![0.8f32; 4096];
        chain.process(&mut block, 1, 48_000);
        // Skip the crossfade region, then verify attenuation.
        let settled = block[1024];
        assert!(
            (settled - 0.8 * crate::util::db_to_ratio(-6.0)).abs() < 1e-3,
            "got {settled}"
        );
    }
}
