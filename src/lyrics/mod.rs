//! Lyrics: LRC parsing, playback synchronization and alignment.
//!
//! * [`parser`]: tokenizes LRC text, including multi-timestamp lines and
//!   enhanced per-word timestamps
//! * [`sync`]: drives an active-line/active-word cursor from the audio
//!   clock
//! * [`align`]: maps speech-recognition output onto lyric lines and
//!   exports enhanced LRC

pub mod align;
pub mod parser;
pub mod sync;

use std::collections::HashMap;

/// One word with its own timing inside a line.
#[derive(Clone, Debug, PartialEq)]
pub struct LyricWord {
    /// The word text, without surrounding whitespace.
    pub text: String,
    /// Start time in seconds.
    pub start: f64,
    /// End time in seconds; `start <= end`.
    pub end: f64,
}

/// One timed lyric line.
#[derive(Clone, Debug, PartialEq)]
pub struct LyricLine {
    /// Line start time in seconds.
    pub time: f64,
    /// Full line text.
    pub text: String,
    /// Word timeline; empty for plain (non-enhanced) lines.
    pub words: Vec<LyricWord>,
}

/// A parsed lyric document.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LyricDocument {
    /// Header tags: ti, ar, al, re, ve.
    pub metadata: HashMap<String, String>,
    /// Global offset from `[offset:±ms]`, in seconds.
    pub offset: f64,
    /// Lines sorted by strictly increasing time.
    pub lines: Vec<LyricLine>,
}

impl LyricDocument {
    /// Index of the active line at playback time `t` (seconds):
    /// the last line with `time <= t`. `None` before the first line.
    #[must_use]
    pub fn line_index_at(&self, t: f64) -> Option<usize> {
        // Binary search for the partition point.
        let mut low = 0usize;
        let mut high = self.lines.len();
        while low < high {
            let mid = (low + high) / 2;
            if self.lines[mid].time <= t {
                low = mid + 1;
            } else {
                high = mid;
            }
        }
        low.checked_sub(1)
    }

    /// The lines within `range` of `index`, clamped to the document.
    #[must_use]
    pub fn nearby_lines(&self, index: usize, range: usize) -> &[LyricLine] {
        if self.lines.is_empty() {
            return &[];
        }
        let start = index.saturating_sub(range);
        let end = (index + range + 1).min(self.lines.len());
        &self.lines[start.min(end - 1)..end]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(times: &[f64]) -> LyricDocument {
        LyricDocument {
            lines: times
                .iter()
                .map(|time| LyricLine {
                    time: *time,
                    text: format!("line at {time}"),
                    words: Vec::new(),
                })
                .collect(),
            ..LyricDocument::default()
        }
    }

    #[test]
    fn line_lookup_is_last_at_or_before() {
        let doc = doc(&[1.0, 5.0, 10.0]);
        assert_eq!(doc.line_index_at(0.0), None);
        assert_eq!(doc.line_index_at(1.0), Some(0));
        assert_eq!(doc.line_index_at(4.999), Some(0));
        assert_eq!(doc.line_index_at(5.0), Some(1));
        assert_eq!(doc.line_index_at(100.0), Some(2));
    }

    #[test]
    fn nearby_lines_clamp_to_bounds() {
        let doc = doc(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(doc.nearby_lines(0, 2).len(), 3);
        assert_eq!(doc.nearby_lines(2, 1).len(), 3);
        assert_eq!(doc.nearby_lines(4, 2).len(), 3);
        assert_eq!(doc.nearby_lines(2, 100).len(), 5);
    }
}
