//! The filter node abstraction.
//!
//! Every effect in the graph is a [`FilterNode`]: a block processor over
//! interleaved f32 frames. Nodes are constructed for a fixed channel
//! count and sample rate; the graph is rebuilt when either changes, so
//! nodes never need to re-derive coefficients mid-stream.
//!
//! Nodes may produce a different number of frames than they consume
//! (tempo and rate stages); everything downstream must therefore consume
//! whatever arrives rather than assume 1:1 framing.

/// A single stage in the effect graph.
///
/// Processing appends to `out` instead of returning a buffer so the graph
/// can reuse one scratch vector per stage without reallocating.
pub trait FilterNode: Send {
    /// Stable node name, used for logging and graph descriptions.
    fn name(&self) -> &'static str;

    /// Processes one interleaved block, appending output frames to `out`.
    ///
    /// The default contract is 1:1 framing; time-scaling nodes may emit
    /// fewer or more frames than they consume.
    fn process(&mut self, input: &[f32], out: &mut Vec<f32>);

    /// Drains any internally buffered output at end of stream.
    ///
    /// Nodes with lookahead or windowed processing override this; the
    /// default drains nothing.
    fn flush(&mut self, _out: &mut Vec<f32>) {}

    /// Clears internal state (delay lines, envelopes, windows) without
    /// changing parameters.
    fn reset(&mut self);
}

/// Pass-through used where a gating condition disables a stage.
pub struct Bypass;

impl FilterNode for Bypass {
    fn name(&self) -> &'static str {
        "bypass"
    }

    fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        out.extend_from_slice(input);
    }

    fn reset(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bypass_is_identity() {
        let mut node = Bypass;
        let input = [0.1, -0.2, 0.3];
        let mut out = Vec::new();
        node.process(&input, &mut out);
        assert_eq!(out, input);
    }
}
