//! Effect chain parameter set.
//!
//! One flat struct holds every knob of every effect, with defaults that
//! make the whole chain a bypass. Setter methods on the chain mutate this
//! struct and mark it dirty; the graph builder reads it on the next
//! render pass.
//!
//! Values are clamped at set time so the graph builder never sees an
//! out-of-range parameter.

/// Waveshaping curve for the soft clipper.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum SoftClipKind {
    /// Hyperbolic tangent: smooth and symmetric.
    #[default]
    Tanh,
    /// Arctangent: slightly harder knee.
    Atan,
    /// Cubic polynomial with a hard limit at ±1.
    Cubic,
    /// Hard clip at the ceiling.
    Hard,
}

/// Composite voicing presets built from primitive stages.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum VoicePreset {
    /// Narrowband 300–3400 Hz with mild crushing.
    Telephone,
    /// Heavy low-pass with slow wobble.
    Underwater,
    /// Mid-band emphasis with compression and clipping.
    Radio,
}

/// Tempo factor range a single stage supports.
pub const TEMPO_STAGE_MIN: f32 = 0.5;
/// See [`TEMPO_STAGE_MIN`].
pub const TEMPO_STAGE_MAX: f32 = 2.0;

/// Full parameter set for the effect graph.
///
/// `Default` is a bypass: building a graph from defaults produces an
/// empty chain and `process` leaves buffers untouched.
#[derive(Clone, Debug, PartialEq)]
pub struct EffectParams {
    // ── volume ───────────────────────────────────────────────────────
    /// Output gain in dB.
    pub gain_db: f32,

    // ── dynamics ─────────────────────────────────────────────────────
    /// Noise gate.
    pub gate_enabled: bool,
    /// Gate threshold in dBFS.
    pub gate_threshold_db: f32,

    /// Downward compressor.
    pub compressor_enabled: bool,
    pub comp_threshold_db: f32,
    pub comp_ratio: f32,
    pub comp_attack_ms: f32,
    pub comp_release_ms: f32,
    pub comp_makeup_db: f32,

    /// Brickwall-style limiter.
    pub limiter_enabled: bool,
    /// Limiter ceiling in dBFS.
    pub limiter_ceiling_db: f32,

    /// Automatic gain rider (dynamic normalization).
    pub auto_gain_enabled: bool,
    /// Analysis frame length in milliseconds.
    pub auto_gain_frame_ms: f32,
    /// Gaussian smoothing window (frames, odd).
    pub auto_gain_window: usize,
    /// Peak target in linear amplitude.
    pub auto_gain_peak: f32,

    /// Streaming loudness normalization.
    pub loudnorm_enabled: bool,
    /// Target integrated loudness in LUFS.
    pub loudnorm_target_lufs: f32,
    /// Target loudness range in LU.
    pub loudnorm_lra: f32,
    /// True-peak ceiling in dBTP.
    pub loudnorm_true_peak_db: f32,
    /// Apply a single linear gain instead of dynamic riding.
    pub loudnorm_linear: bool,

    /// Speech leveler with fixed tuning.
    pub speech_normalize_enabled: bool,

    /// Piecewise compander.
    pub compand_enabled: bool,
    /// Transfer points as (input dB, output dB), sorted by input.
    pub compand_points: Vec<(f32, f32)>,

    // ── repair ───────────────────────────────────────────────────────
    /// FFT denoiser.
    pub denoise_enabled: bool,
    /// Attenuation applied to the noise floor in dB.
    pub denoise_amount_db: f32,

    /// Impulsive click removal.
    pub declick_enabled: bool,
    /// Detection window in samples.
    pub declick_window: usize,

    /// Clipped-sample reconstruction.
    pub declip_enabled: bool,
    /// Amplitude treated as clipped.
    pub declip_threshold: f32,

    // ── frequency shaping ────────────────────────────────────────────
    /// Bass shelf gain in dB (0 disables the stage).
    pub bass_gain_db: f32,
    /// Bass shelf corner frequency in Hz.
    pub bass_freq: f32,
    /// Bass shelf slope.
    pub bass_width: f32,

    /// Treble shelf gain in dB (0 disables the stage).
    pub treble_gain_db: f32,
    pub treble_freq: f32,
    pub treble_width: f32,

    /// Sub-bass boost below the cutoff.
    pub subboost_enabled: bool,
    pub subboost_gain_db: f32,
    pub subboost_cutoff: f32,

    /// Band-pass stage.
    pub bandpass_enabled: bool,
    pub bandpass_freq: f32,
    pub bandpass_width: f32,

    /// Band-reject stage.
    pub bandreject_enabled: bool,
    pub bandreject_freq: f32,
    pub bandreject_width: f32,

    // ── spatial (skipped on mono input) ──────────────────────────────
    /// Vocal removal strength in [0, 1] via mid-level scaling.
    pub vocal_removal: f32,

    /// Swap left and right channels.
    pub channel_swap: bool,
    /// Left/right balance in [-1, 1].
    pub balance: f32,
    /// Stereo width; 1 is unchanged, 0 collapses to mid.
    pub stereo_width: f32,
    /// Collapse to dual mono.
    pub mono_downmix: bool,

    /// Surround expansion strength in [0, 1].
    pub surround: f32,
    /// Headphone crossfeed strength in [0, 1].
    pub crossfeed: f32,
    /// Bauer stereophonic-to-binaural processing.
    pub bs2b_enabled: bool,
    /// Haas-effect widening.
    pub haas_enabled: bool,
    /// Haas delay in milliseconds.
    pub haas_delay_ms: f32,

    /// Psychoacoustic bass from harmonics above the cutoff.
    pub virtual_bass_enabled: bool,
    pub virtual_bass_cutoff: f32,
    pub virtual_bass_strength: f32,

    /// Echo-network reverb level in [0, 1] (0 disables).
    pub reverb_level: f32,

    // ── timbre ───────────────────────────────────────────────────────
    /// Harmonic exciter.
    pub exciter_enabled: bool,
    pub exciter_amount: f32,
    pub exciter_freq: f32,

    /// Soft clipper.
    pub softclip_enabled: bool,
    pub softclip_kind: SoftClipKind,

    /// Dialogue/center enhancement (stereo only).
    pub dialogue_enhance_enabled: bool,
    /// Gain on the original signal.
    pub dialogue_original: f32,
    /// Gain on the extracted center.
    pub dialogue_enhance: f32,

    // ── modulation and character ─────────────────────────────────────
    pub chorus_enabled: bool,
    pub chorus_rate_hz: f32,
    pub chorus_depth: f32,

    pub flanger_enabled: bool,
    pub flanger_rate_hz: f32,
    pub flanger_depth: f32,

    pub tremolo_enabled: bool,
    pub tremolo_rate_hz: f32,
    pub tremolo_depth: f32,

    pub vibrato_enabled: bool,
    pub vibrato_rate_hz: f32,
    pub vibrato_depth: f32,

    /// Bit crusher.
    pub crusher_enabled: bool,
    /// Effective bit depth, 1–16.
    pub crusher_bits: u32,

    /// Composite voicing preset.
    pub preset: Option<VoicePreset>,

    // ── time ─────────────────────────────────────────────────────────
    /// Plain output delay in milliseconds (0 disables).
    pub delay_ms: f32,

    // ── pitch and tempo ──────────────────────────────────────────────
    /// Pitch shift in semitones (0 disables).
    pub pitch_semitones: f32,
    /// Playback tempo factor; 1.0 is unchanged.
    pub tempo: f32,

    // ── envelope ─────────────────────────────────────────────────────
    /// Fade-in as (start frame, length in frames).
    pub fade_in: Option<(u64, u64)>,
    /// Fade-out as (start frame, length in frames).
    pub fade_out: Option<(u64, u64)>,
}

impl Default for EffectParams {
    fn default() -> Self {
        Self {
            gain_db: 0.0,

            gate_enabled: false,
            gate_threshold_db: -60.0,

            compressor_enabled: false,
            comp_threshold_db: -18.0,
            comp_ratio: 3.0,
            comp_attack_ms: 10.0,
            comp_release_ms: 200.0,
            comp_makeup_db: 0.0,

            limiter_enabled: false,
            limiter_ceiling_db: -1.0,

            auto_gain_enabled: false,
            auto_gain_frame_ms: 500.0,
            auto_gain_window: 31,
            auto_gain_peak: 0.95,

            loudnorm_enabled: false,
            loudnorm_target_lufs: -16.0,
            loudnorm_lra: 11.0,
            loudnorm_true_peak_db: -1.5,
            loudnorm_linear: false,

            speech_normalize_enabled: false,

            compand_enabled: false,
            compand_points: Vec::new(),

            denoise_enabled: false,
            denoise_amount_db: 12.0,

            declick_enabled: false,
            declick_window: 55,

            declip_enabled: false,
            declip_threshold: 0.98,

            bass_gain_db: 0.0,
            bass_freq: 100.0,
            bass_width: 0.5,

            treble_gain_db: 0.0,
            treble_freq: 3000.0,
            treble_width: 0.5,

            subboost_enabled: false,
            subboost_gain_db: 6.0,
            subboost_cutoff: 80.0,

            bandpass_enabled: false,
            bandpass_freq: 1000.0,
            bandpass_width: 1.0,

            bandreject_enabled: false,
            bandreject_freq: 1000.0,
            bandreject_width: 1.0,

            vocal_removal: 0.0,

            channel_swap: false,
            balance: 0.0,
            stereo_width: 1.0,
            mono_downmix: false,

            surround: 0.0,
            crossfeed: 0.0,
            bs2b_enabled: false,
            haas_enabled: false,
            haas_delay_ms: 20.0,

            virtual_bass_enabled: false,
            virtual_bass_cutoff: 150.0,
            virtual_bass_strength: 0.6,

            reverb_level: 0.0,

            exciter_enabled: false,
            exciter_amount: 0.5,
            exciter_freq: 3000.0,

            softclip_enabled: false,
            softclip_kind: SoftClipKind::default(),

            dialogue_enhance_enabled: false,
            dialogue_original: 1.0,
            dialogue_enhance: 1.5,

            chorus_enabled: false,
            chorus_rate_hz: 1.0,
            chorus_depth: 0.5,

            flanger_enabled: false,
            flanger_rate_hz: 0.3,
            flanger_depth: 0.7,

            tremolo_enabled: false,
            tremolo_rate_hz: 5.0,
            tremolo_depth: 0.5,

            vibrato_enabled: false,
            vibrato_rate_hz: 5.0,
            vibrato_depth: 0.3,

            crusher_enabled: false,
            crusher_bits: 8,

            preset: None,

            delay_ms: 0.0,

            pitch_semitones: 0.0,
            tempo: 1.0,

            fade_in: None,
            fade_out: None,
        }
    }
}

impl EffectParams {
    /// Whether the parameter set describes a bypass chain.
    ///
    /// The graph builder produces an empty chain for a bypass, and
    /// `process` becomes a zero-copy no-op.
    #[must_use]
    pub fn is_bypass(&self) -> bool {
        *self == Self::default()
    }

    /// Factorizes the tempo into stages each within [0.5, 2.0].
    ///
    /// A factor of 3.0 becomes `[2.0, 1.5]`; in-range factors return a
    /// single stage; 1.0 returns no stages.
    #[must_use]
    pub fn tempo_stages(&self) -> Vec<f32> {
        factorize_tempo(self.effective_tempo())
    }

    /// Pitch ratio derived from the semitone setting.
    #[must_use]
    pub fn pitch_ratio(&self) -> f32 {
        2.0_f32.powf(self.pitch_semitones / 12.0)
    }

    /// Tempo factor after pitch compensation.
    ///
    /// The pitch stage scales duration by `1 / ratio`; dividing the user
    /// tempo by the ratio restores it, so pitch changes leave duration
    /// untouched unless the user also changes tempo.
    #[must_use]
    pub fn effective_tempo(&self) -> f32 {
        let tempo = if self.tempo > 0.0 { self.tempo } else { 1.0 };
        tempo / self.pitch_ratio()
    }
}

/// Splits a tempo factor into stages within [[`TEMPO_STAGE_MIN`],
/// [`TEMPO_STAGE_MAX`]].
#[must_use]
pub fn factorize_tempo(tempo: f32) -> Vec<f32> {
    if !(tempo.is_finite()) || tempo <= 0.0 || (tempo - 1.0).abs() < 1e-6 {
        return Vec::new();
    }

    let mut stages = Vec::new();
    let mut remaining = tempo;
    while remaining > TEMPO_STAGE_MAX {
        stages.push(TEMPO_STAGE_MAX);
        remaining /= TEMPO_STAGE_MAX;
    }
    while remaining < TEMPO_STAGE_MIN {
        stages.push(TEMPO_STAGE_MIN);
        remaining /= TEMPO_STAGE_MIN;
    }
    if (remaining - 1.0).abs() > 1e-6 {
        stages.push(remaining);
    }
    stages
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_bypass() {
        assert!(EffectParams::default().is_bypass());

        let mut params = EffectParams::default();
        params.reverb_level = 0.4;
        assert!(!params.is_bypass());
    }

    #[test]
    fn tempo_factorization_stays_in_range() {
        for tempo in [0.1, 0.4, 0.5, 0.75, 1.0, 1.5, 2.0, 3.0, 5.0] {
            let stages = factorize_tempo(tempo);
            let product: f32 = stages.iter().product();
            let expected = if (tempo - 1.0).abs() < 1e-6 { 1.0 } else { tempo };
            if stages.is_empty() {
                assert!((tempo - 1.0).abs() < 1e-6);
            } else {
                assert!((product - expected).abs() / expected < 1e-3);
            }
            for stage in stages {
                assert!((TEMPO_STAGE_MIN..=TEMPO_STAGE_MAX).contains(&stage));
            }
        }
    }

    #[test]
    fn three_x_splits_into_two_stages() {
        let stages = factorize_tempo(3.0);
        assert_eq!(stages.len(), 2);
        assert!((stages[0] - 2.0).abs() < 1e-6);
        assert!((stages[1] - 1.5).abs() < 1e-6);
    }

    #[test]
    fn pitch_preserves_duration() {
        let mut params = EffectParams::default();
        params.pitch_semitones = 12.0;
        // Rate doubles, so the compensated tempo halves.
        assert!((params.pitch_ratio() - 2.0).abs() < 1e-6);
        assert!((params.effective_tempo() - 0.5).abs() < 1e-6);

        params.tempo = 2.0;
        assert!((params.effective_tempo() - 1.0).abs() < 1e-6);
    }
}
