//! Filter graph construction and execution.
//!
//! A graph is a linear chain of [`FilterNode`] stages built from one
//! snapshot of [`EffectParams`]. Stage order is fixed: level first, then
//! dynamics, repair, frequency shaping, spatial, timbre, modulation,
//! time, pitch/tempo, envelopes, and finally the output sanitizer.
//!
//! Stages whose gating condition is not met (spatial processing on mono
//! input, unity tempo) are simply not built; a parameter set at defaults
//! builds an empty graph.

use super::{
    dynamics::{
        AutoGainNode, CompandNode, CompressorNode, GainNode, GateNode, LimiterNode,
        LoudnessNormalizeNode, SpeechNormalizeNode,
    },
    frequency::{BandpassNode, BandrejectNode, ShelfKind, ShelfNode, SubBoostNode},
    modulation::{ChorusNode, CrusherNode, FlangerNode, TremoloNode, VibratoNode},
    node::FilterNode,
    params::{EffectParams, SoftClipKind, VoicePreset},
    repair::{DeclickNode, DeclipNode, DenoiseNode},
    spatial::{
        BalanceNode, Bs2bNode, ChannelSwapNode, CrossfeedNode, HaasNode, MonoNode, ReverbNode,
        StereoWidthNode, SurroundNode, VirtualBassNode, VocalRemovalNode,
    },
    time::{DelayNode, FadeNode, RateShiftNode, TempoNode},
    timbre::{DialogueEnhanceNode, ExciterNode, SoftClipNode},
};

/// Replaces non-finite samples before the sink sees them.
///
/// The terminal "aformat" stage of the chain: the graph already works in
/// interleaved f32 at the render rate, so all that remains is making sure
/// a misbehaving stage cannot push NaN or infinity into the hardware
/// buffer.
struct OutputFormatNode;

impl FilterNode for OutputFormatNode {
    fn name(&self) -> &'static str {
        "aformat"
    }

    fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        out.extend(
            input
                .iter()
                .map(|sample| if sample.is_finite() { *sample } else { 0.0 }),
        );
    }

    fn reset(&mut self) {}
}

/// An executable effect chain for one (channels, sample rate) format.
pub struct FilterGraph {
    nodes: Vec<Box<dyn FilterNode>>,
    channels: usize,
    sample_rate: u32,
    /// Ping-pong scratch buffers reused across calls.
    scratch_a: Vec<f32>,
    scratch_b: Vec<f32>,
}

impl FilterGraph {
    /// Builds a graph from a parameter snapshot.
    #[must_use]
    pub fn build(params: &EffectParams, channels: usize, sample_rate: u32) -> Self {
        let mut nodes: Vec<Box<dyn FilterNode>> = Vec::new();
        let rate = sample_rate as f32;
        let stereo = channels >= 2;

        // ── level ────────────────────────────────────────────────────
        if params.gain_db != 0.0 {
            nodes.push(Box::new(GainNode::new(params.gain_db)));
        }

        // ── dynamics ─────────────────────────────────────────────────
        if params.gate_enabled {
            nodes.push(Box::new(GateNode::new(
                params.gate_threshold_db,
                channels,
                rate,
            )));
        }
        if params.compressor_enabled {
            nodes.push(Box::new(CompressorNode::new(
                params.comp_threshold_db,
                params.comp_ratio,
                params.comp_attack_ms,
                params.comp_release_ms,
                params.comp_makeup_db,
                channels,
                rate,
            )));
        }
        if params.limiter_enabled {
            nodes.push(Box::new(LimiterNode::new(
                params.limiter_ceiling_db,
                channels,
                rate,
            )));
        }
        if params.auto_gain_enabled {
            nodes.push(Box::new(AutoGainNode::new(
                params.auto_gain_frame_ms,
                params.auto_gain_window,
                params.auto_gain_peak,
                channels,
                rate,
            )));
        }
        if params.loudnorm_enabled {
            nodes.push(Box::new(LoudnessNormalizeNode::new(
                params.loudnorm_target_lufs,
                params.loudnorm_true_peak_db,
                params.loudnorm_linear,
                channels,
                rate,
            )));
        }
        if params.speech_normalize_enabled {
            nodes.push(Box::new(SpeechNormalizeNode::new(channels, rate)));
        }
        if params.compand_enabled && !params.compand_points.is_empty() {
            nodes.push(Box::new(CompandNode::new(
                params.compand_points.clone(),
                channels,
                rate,
            )));
        }

        // ── repair ───────────────────────────────────────────────────
        if params.denoise_enabled {
            nodes.push(Box::new(DenoiseNode::new(params.denoise_amount_db, channels)));
        }
        if params.declick_enabled {
            nodes.push(Box::new(DeclickNode::new(params.declick_window, channels)));
        }
        if params.declip_enabled {
            nodes.push(Box::new(DeclipNode::new(params.declip_threshold, channels)));
        }

        // ── frequency shaping ────────────────────────────────────────
        if params.bass_gain_db != 0.0 {
            nodes.push(Box::new(ShelfNode::new(
                ShelfKind::Low,
                params.bass_gain_db,
                params.bass_freq,
                params.bass_width,
                channels,
                rate,
            )));
        }
        if params.treble_gain_db != 0.0 {
            nodes.push(Box::new(ShelfNode::new(
                ShelfKind::High,
                params.treble_gain_db,
                params.treble_freq,
                params.treble_width,
                channels,
                rate,
            )));
        }
        if params.subboost_enabled {
            nodes.push(Box::new(SubBoostNode::new(
                params.subboost_gain_db,
                params.subboost_cutoff,
                channels,
                rate,
            )));
        }
        if params.bandpass_enabled {
            nodes.push(Box::new(BandpassNode::new(
                params.bandpass_freq,
                params.bandpass_width,
                channels,
                rate,
            )));
        }
        if params.bandreject_enabled {
            nodes.push(Box::new(BandrejectNode::new(
                params.bandreject_freq,
                params.bandreject_width,
                channels,
                rate,
            )));
        }

        // ── spatial, gated to ≥ 2 channels ───────────────────────────
        if stereo {
            if params.vocal_removal > 0.0 {
                nodes.push(Box::new(VocalRemovalNode::new(
                    params.vocal_removal,
                    channels,
                )));
            }
            if params.channel_swap {
                nodes.push(Box::new(ChannelSwapNode::new(channels)));
            }
            if params.balance != 0.0 {
                nodes.push(Box::new(BalanceNode::new(params.balance, channels)));
            }
            if (params.stereo_width - 1.0).abs() > 1e-3 {
                nodes.push(Box::new(StereoWidthNode::new(params.stereo_width, channels)));
            }
            if params.mono_downmix {
                nodes.push(Box::new(MonoNode::new(channels)));
            }
            if params.surround > 0.0 {
                nodes.push(Box::new(SurroundNode::new(params.surround, channels, rate)));
            }
            if params.crossfeed > 0.0 {
                nodes.push(Box::new(CrossfeedNode::new(
                    params.crossfeed,
                    channels,
                    rate,
                )));
            }
            if params.bs2b_enabled {
                nodes.push(Box::new(Bs2bNode::new(channels, rate)));
            }
            if params.haas_enabled {
                nodes.push(Box::new(HaasNode::new(
                    params.haas_delay_ms,
                    channels,
                    rate,
                )));
            }
            if params.dialogue_enhance_enabled {
                nodes.push(Box::new(DialogueEnhanceNode::new(
                    params.dialogue_original,
                    params.dialogue_enhance,
                    channels,
                    rate,
                )));
            }
            if params.virtual_bass_enabled {
                nodes.push(Box::new(VirtualBassNode::new(
                    params.virtual_bass_cutoff,
                    params.virtual_bass_strength,
                    channels,
                    rate,
                )));
            }
        }
        if stereo && params.reverb_level > 0.0 {
            nodes.push(Box::new(ReverbNode::new(
                params.reverb_level,
                channels,
                rate,
            )));
        }

        // ── timbre ───────────────────────────────────────────────────
        if params.exciter_enabled {
            nodes.push(Box::new(ExciterNode::new(
                params.exciter_amount,
                params.exciter_freq,
                channels,
                rate,
            )));
        }
        if params.softclip_enabled {
            nodes.push(Box::new(SoftClipNode::new(params.softclip_kind)));
        }

        // ── modulation ───────────────────────────────────────────────
        if params.chorus_enabled {
            nodes.push(Box::new(ChorusNode::new(
                params.chorus_rate_hz,
                params.chorus_depth,
                channels,
                rate,
            )));
        }
        if params.flanger_enabled {
            nodes.push(Box::new(FlangerNode::new(
                params.flanger_rate_hz,
                params.flanger_depth,
                channels,
                rate,
            )));
        }
        if params.tremolo_enabled {
            nodes.push(Box::new(TremoloNode::new(
                params.tremolo_rate_hz,
                params.tremolo_depth,
                channels,
                rate,
            )));
        }
        if params.vibrato_enabled {
            nodes.push(Box::new(VibratoNode::new(
                params.vibrato_rate_hz,
                params.vibrato_depth,
                channels,
                rate,
            )));
        }
        if params.crusher_enabled {
            nodes.push(Box::new(CrusherNode::new(params.crusher_bits)));
        }

        // ── voicing presets (composites of primitive stages) ─────────
        match params.preset {
            Some(VoicePreset::Telephone) => {
                nodes.push(Box::new(BandpassNode::new(1000.0, 3100.0, channels, rate)));
                nodes.push(Box::new(CrusherNode::new(8)));
            }
            Some(VoicePreset::Underwater) => {
                nodes.push(Box::new(BandpassNode::new(240.0, 480.0, channels, rate)));
                nodes.push(Box::new(VibratoNode::new(0.5, 0.8, channels, rate)));
            }
            Some(VoicePreset::Radio) => {
                nodes.push(Box::new(BandpassNode::new(1200.0, 3600.0, channels, rate)));
                nodes.push(Box::new(CompressorNode::new(
                    -20.0, 4.0, 2.0, 80.0, 6.0, channels, rate,
                )));
                nodes.push(Box::new(SoftClipNode::new(SoftClipKind::Tanh)));
            }
            None => {}
        }

        // ── time ─────────────────────────────────────────────────────
        if params.delay_ms > 0.0 {
            nodes.push(Box::new(DelayNode::new(params.delay_ms, channels, rate)));
        }

        // ── pitch and tempo ──────────────────────────────────────────
        if let Some(shifter) = RateShiftNode::new(params.pitch_ratio(), channels, rate) {
            nodes.push(Box::new(shifter));
        }
        for stage in params.tempo_stages() {
            nodes.push(Box::new(TempoNode::new(stage, channels, rate)));
        }

        // ── envelopes ────────────────────────────────────────────────
        if params.fade_in.is_some() || params.fade_out.is_some() {
            nodes.push(Box::new(FadeNode::new(
                params.fade_in,
                params.fade_out,
                channels,
            )));
        }

        // The terminal format stage only exists when there is a chain to
        // sanitize; an empty graph stays empty so bypass is zero-copy.
        if !nodes.is_empty() {
            nodes.push(Box::new(OutputFormatNode));
        }

        let graph = Self {
            nodes,
            channels,
            sample_rate,
            scratch_a: Vec::new(),
            scratch_b: Vec::new(),
        };
        debug!("built effect graph: {}", graph.describe());
        graph
    }

    /// Whether the graph has no stages (bypass).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Channel count the graph was built for.
    #[must_use]
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Sample rate the graph was built for.
    #[must_use]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Human-readable chain description.
    #[must_use]
    pub fn describe(&self) -> String {
        if self.nodes.is_empty() {
            return "bypass".to_string();
        }
        self.nodes
            .iter()
            .map(|node| node.name())
            .collect::<Vec<_>>()
            .join(" -> ")
    }

    /// Runs one interleaved block through every stage, appending output
    /// frames to `out`.
    ///
    /// The output frame count may differ from the input when time-scaling
    /// stages are active.
    pub fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        if self.nodes.is_empty() {
            out.extend_from_slice(input);
            return;
        }

        self.scratch_a.clear();
        self.scratch_a.extend_from_slice(input);

        for node in &mut self.nodes {
            self.scratch_b.clear();
            node.process(&self.scratch_a, &mut self.scratch_b);
            std::mem::swap(&mut self.scratch_a, &mut self.scratch_b);
        }
        out.extend_from_slice(&self.scratch_a);
    }

    /// Drains buffered output from every stage in order, cascading each
    /// stage's tail through the rest of the chain.
    pub fn flush(&mut self, out: &mut Vec<f32>) {
        let count = self.nodes.len();
        for index in 0..count {
            let mut drained = Vec::new();
            self.nodes[index].flush(&mut drained);
            if drained.is_empty() {
                continue;
            }
            let mut current = drained;
            for later in index + 1..count {
                let mut next = Vec::new();
                self.nodes[later].process(&current, &mut next);
                current = next;
            }
            out.extend(current);
        }
    }

    /// Clears every stage's internal state.
    pub fn reset(&mut self) {
        for node in &mut self.nodes {
            node.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_params_build_empty_graph() {
        let graph = FilterGraph::build(&EffectParams::default(), 2, 48_000);
        assert!(graph.is_empty());
        assert_eq!(graph.describe(), "bypass");
    }

    #[test]
    fn empty_graph_passes_through() {
        let mut graph = FilterGraph::build(&EffectParams::default(), 2, 48_000);
        let input = [0.1f32, 0.2, -0.1, -0.2];
        let mut out = Vec::new();
        graph.process(&input, &mut out);
        assert_eq!(out, input);
    }

    #[test]
    fn spatial_stages_skipped_on_mono() {
        let mut params = EffectParams::default();
        params.vocal_removal = 1.0;
        params.reverb_level = 0.5;
        params.stereo_width = 2.0;

        let stereo = FilterGraph::build(&params, 2, 48_000);
        assert!(stereo.describe().contains("vocal-removal"));
        assert!(stereo.describe().contains("reverb"));

        let mono = FilterGraph::build(&params, 1, 48_000);
        assert!(mono.is_empty(), "mono graph: {}", mono.describe());
    }

    #[test]
    fn chain_order_is_stable() {
        let mut params = EffectParams::default();
        params.gain_db = 3.0;
        params.compressor_enabled = true;
        params.bass_gain_db = 6.0;
        params.chorus_enabled = true;
        params.tempo = 3.0;

        let graph = FilterGraph::build(&params, 2, 48_000);
        assert_eq!(
            graph.describe(),
            "gain -> compressor -> bass -> chorus -> tempo -> tempo -> aformat"
        );
    }

    #[test]
    fn tempo_chain_scales_length() {
        let mut params = EffectParams::default();
        params.tempo = 2.0;
        let mut graph = FilterGraph::build(&params, 1, 48_000);

        let input = vec![0.1f32; 96_000];
        let mut out = Vec::new();
        graph.process(&input, &mut out);
        graph.flush(&mut out);

        let ratio = out.len() as f32 / (input.len() as f32 / 2.0);
        assert!((0.8..1.2).contains(&ratio), "got {} samples", out.len());
    }

    #[test]
    fn sanitizer_strips_non_finite() {
        let mut params = EffectParams::default();
        params.gain_db = 0.1; // force a non-empty chain
        let mut graph = FilterGraph::build(&params, 1, 48_000);

        let input = [f32::NAN, 0.5, f32::INFINITY];
        let mut out = Vec::new();
        graph.process(&input, &mut out);
        assert!(out.iter().all(|sample| sample.is_finite()));
    }
}
