//! Recognition-to-lyrics alignment and enhanced LRC export.
//!
//! Takes speech-recognition output (words with times and probabilities)
//! and maps it onto an untimed or line-timed lyric sheet: for each target
//! line the recognized words in a window around the line time are
//! compared by Levenshtein similarity; when the match is good enough the
//! recognized timings are transferred word by word, and character-level
//! timings are distributed uniformly within each word. The result can be
//! exported as enhanced LRC with one timestamp per character.

use super::{LyricDocument, LyricLine, LyricWord};

/// How far before the line time the recognition window opens (seconds).
const WINDOW_BEFORE: f64 = 5.0;

/// How far after the line time the recognition window closes (seconds).
const WINDOW_AFTER: f64 = 10.0;

/// Minimum line-level similarity to accept an alignment.
const LINE_SIMILARITY_THRESHOLD: f32 = 0.6;

/// Minimum per-word similarity for a greedy word match.
const WORD_SIMILARITY_THRESHOLD: f32 = 0.5;

/// One word from the speech recognizer.
#[derive(Clone, Debug, PartialEq)]
pub struct RecognizedWord {
    /// Recognized text.
    pub text: String,
    /// Start time in seconds.
    pub start: f64,
    /// End time in seconds.
    pub end: f64,
    /// Recognizer probability in [0, 1].
    pub probability: f32,
}

/// One aligned line with its confidence.
#[derive(Clone, Debug, PartialEq)]
pub struct AlignedLine {
    /// The line with word timings filled in where matched.
    pub line: LyricLine,
    /// Line alignment confidence in [0, 1]; 0 when no match was found.
    pub confidence: f32,
}

/// A whole aligned document.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Alignment {
    /// Aligned lines in input order.
    pub lines: Vec<AlignedLine>,
    /// Mean confidence over all lines.
    pub average_confidence: f32,
}

/// Aligns recognized words onto target lines.
#[must_use]
pub fn align(recognized: &[RecognizedWord], targets: &[LyricLine]) -> Alignment {
    let mut lines = Vec::with_capacity(targets.len());
    let mut confidence_sum = 0.0f32;

    for target in targets {
        let aligned = align_line(recognized, target);
        confidence_sum += aligned.confidence;
        lines.push(aligned);
    }

    let average_confidence = if lines.is_empty() {
        0.0
    } else {
        confidence_sum / lines.len() as f32
    };

    Alignment {
        lines,
        average_confidence,
    }
}

/// Aligns one target line against its recognition window.
fn align_line(recognized: &[RecognizedWord], target: &LyricLine) -> AlignedLine {
    let window: Vec<&RecognizedWord> = recognized
        .iter()
        .filter(|word| {
            word.start >= target.time - WINDOW_BEFORE && word.start <= target.time + WINDOW_AFTER
        })
        .collect();

    let target_clean = clean(&target.text);
    if window.is_empty() || target_clean.is_empty() {
        return AlignedLine {
            line: target.clone(),
            confidence: 0.0,
        };
    }

    let window_clean: String = window.iter().map(|word| clean(&word.text)).collect();
    let line_similarity = similarity(&target_clean, &window_clean);
    if line_similarity < LINE_SIMILARITY_THRESHOLD {
        return AlignedLine {
            line: target.clone(),
            confidence: 0.0,
        };
    }

    // Greedy in-order word matching.
    let target_words: Vec<&str> = target.text.split_whitespace().collect();
    let mut words = Vec::with_capacity(target_words.len());
    let mut cursor = 0usize;
    let mut probability_sum = 0.0f32;
    let mut matched = 0usize;

    for target_word in &target_words {
        let target_word_clean = clean(target_word);
        let mut best: Option<(usize, f32)> = None;
        for (index, candidate) in window.iter().enumerate().skip(cursor) {
            let score = similarity(&target_word_clean, &clean(&candidate.text));
            if score >= WORD_SIMILARITY_THRESHOLD
                && best.is_none_or(|(_, best_score)| score > best_score)
            {
                best = Some((index, score));
                if score >= 0.999 {
                    break;
                }
            }
        }

        match best {
            Some((index, _)) => {
                let source = window[index];
                cursor = index + 1;
                matched += 1;
                probability_sum += source.probability;
                words.push(LyricWord {
                    text: (*target_word).to_string(),
                    start: source.start,
                    end: source.end.max(source.start),
                });
            }
            None => {
                // Unmatched words get interpolated later from neighbors;
                // mark with the line time for now.
                words.push(LyricWord {
                    text: (*target_word).to_string(),
                    start: target.time,
                    end: target.time,
                });
            }
        }
    }

    interpolate_unmatched(&mut words, target.time);

    let mean_probability = if matched > 0 {
        probability_sum / matched as f32
    } else {
        0.0
    };
    let coverage = matched as f32 / target_words.len().max(1) as f32;
    let confidence = (line_similarity * 0.5 + coverage * 0.3 + mean_probability * 0.2)
        .clamp(0.0, 1.0);

    AlignedLine {
        line: LyricLine {
            time: words.first().map_or(target.time, |word| word.start),
            text: target.text.clone(),
            words,
        },
        confidence,
    }
}

/// Fills unmatched word times by interpolating between matched neighbors.
fn interpolate_unmatched(words: &mut [LyricWord], line_time: f64) {
    let len = words.len();
    for index in 0..len {
        if words[index].end > words[index].start {
            continue;
        }
        let previous_end = words[..index]
            .iter()
            .rev()
            .find(|word| word.end > word.start)
            .map(|word| word.end);
        let next_start = words[index + 1..]
            .iter()
            .find(|word| word.end > word.start)
            .map(|word| word.start);

        let (start, end) = match (previous_end, next_start) {
            (Some(previous), Some(next)) if next > previous => {
                // Divide the gap among the unmatched run uniformly; this
                // word takes a proportional slice.
                let run_start = words[..index]
                    .iter()
                    .rposition(|word| word.end > word.start)
                    .map_or(0, |position| position + 1);
                let run_end = words[index..]
                    .iter()
                    .position(|word| word.end > word.start)
                    .map_or(len, |position| index + position);
                let run_len = (run_end - run_start).max(1);
                let slot = index - run_start;
                let step = (next - previous) / run_len as f64;
                (previous + step * slot as f64, previous + step * (slot + 1) as f64)
            }
            (Some(previous), None) => (previous, previous + 0.5),
            (None, Some(next)) => ((next - 0.5).max(line_time), next),
            _ => (line_time, line_time + 0.5),
        };
        words[index].start = start;
        words[index].end = end;
    }
}

/// Strips punctuation and whitespace, lowercases.
fn clean(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Levenshtein distance between two strings.
fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];

    for (i, char_a) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, char_b) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(char_a != char_b);
            current[j + 1] = substitution
                .min(previous[j + 1] + 1)
                .min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

/// Normalized Levenshtein similarity in [0, 1].
#[must_use]
pub fn similarity(a: &str, b: &str) -> f32 {
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f32 / longest as f32
}

/// Formats seconds as `mm:ss.xx`.
fn format_timestamp(seconds: f64) -> String {
    let seconds = seconds.max(0.0);
    let minutes = (seconds / 60.0) as u64;
    let remainder = seconds - minutes as f64 * 60.0;
    format!("{minutes:02}:{remainder:05.2}")
}

/// Exports a document as enhanced LRC with per-character timestamps.
///
/// Each character of a timed word gets a marker at its uniform slice of
/// the word duration; whitespace between words carries no marker. Lines
/// without word timings are exported as plain timed lines.
#[must_use]
pub fn export_enhanced_lrc(document: &LyricDocument) -> String {
    let mut output = String::new();

    for key in ["ti", "ar", "al", "re", "ve"] {
        if let Some(value) = document.metadata.get(key) {
            output.push_str(&format!("[{key}:{value}]\n"));
        }
    }

    for line in &document.lines {
        output.push_str(&format!("[{}]", format_timestamp(line.time)));

        if line.words.is_empty() {
            output.push_str(&line.text);
        } else {
            for (index, word) in line.words.iter().enumerate() {
                if index > 0 {
                    output.push(' ');
                }
                let chars: Vec<char> = word.text.chars().collect();
                let count = chars.len().max(1);
                let step = (word.end - word.start).max(0.0) / count as f64;
                for (position, character) in chars.iter().enumerate() {
                    let at = word.start + step * position as f64;
                    output.push_str(&format!("<{}>", format_timestamp(at)));
                    output.push(*character);
                }
            }
        }
        output.push('\n');
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lyrics::parser;

    fn recognized(items: &[(&str, f64, f64)]) -> Vec<RecognizedWord> {
        items
            .iter()
            .map(|(text, start, end)| RecognizedWord {
                text: (*text).to_string(),
                start: *start,
                end: *end,
                probability: 0.9,
            })
            .collect()
    }

    #[test]
    fn levenshtein_basics() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("same", "same"), 0);
        assert!((similarity("hello", "hello") - 1.0).abs() < f32::EPSILON);
        assert!(similarity("hello", "help") > 0.5);
    }

    #[test]
    fn clean_strips_punctuation() {
        assert_eq!(clean("Hello, World!"), "helloworld");
        assert_eq!(clean("  don't  "), "dont");
    }

    #[test]
    fn aligns_matching_words() {
        let words = recognized(&[
            ("hello", 10.0, 10.4),
            ("beautiful", 10.5, 11.1),
            ("world", 11.2, 11.6),
        ]);
        let target = LyricLine {
            time: 10.0,
            text: "Hello beautiful world".to_string(),
            words: Vec::new(),
        };

        let alignment = align(&words, &[target]);
        assert_eq!(alignment.lines.len(), 1);
        let aligned = &alignment.lines[0];
        assert!(aligned.confidence > 0.6, "confidence {}", aligned.confidence);
        assert_eq!(aligned.line.words.len(), 3);
        assert!((aligned.line.words[0].start - 10.0).abs() < 1e-9);
        assert!((aligned.line.words[2].start - 11.2).abs() < 1e-9);
    }

    #[test]
    fn rejects_unrelated_window() {
        let words = recognized(&[("completely", 10.0, 10.5), ("different", 10.6, 11.0)]);
        let target = LyricLine {
            time: 10.0,
            text: "Hello beautiful world".to_string(),
            words: Vec::new(),
        };
        let alignment = align(&words, &[target]);
        assert_eq!(alignment.lines[0].confidence, 0.0);
        assert!(alignment.lines[0].line.words.is_empty());
    }

    #[test]
    fn window_excludes_distant_words() {
        let words = recognized(&[("hello", 100.0, 100.4), ("world", 100.5, 101.0)]);
        let target = LyricLine {
            time: 10.0,
            text: "Hello world".to_string(),
            words: Vec::new(),
        };
        let alignment = align(&words, &[target]);
        assert_eq!(alignment.lines[0].confidence, 0.0);
    }

    #[test]
    fn unmatched_words_interpolate() {
        let words = recognized(&[("hello", 10.0, 10.4), ("world", 12.0, 12.4)]);
        let target = LyricLine {
            time: 10.0,
            text: "Hello big blue world".to_string(),
            words: Vec::new(),
        };
        let alignment = align(&words, &[target]);
        let aligned = &alignment.lines[0].line;
        assert_eq!(aligned.words.len(), 4);
        // The two middle words split the gap between 10.4 and 12.0.
        assert!(aligned.words[1].start >= 10.4 - 1e-9);
        assert!(aligned.words[2].end <= 12.0 + 1e-9);
        assert!(aligned.words[1].end <= aligned.words[2].start + 1e-9);
    }

    #[test]
    fn enhanced_lrc_round_trips_within_10ms() {
        let words = recognized(&[
            ("shine", 5.0, 5.5),
            ("on", 5.6, 5.9),
            ("forever", 6.0, 6.8),
        ]);
        let target = LyricLine {
            time: 5.0,
            text: "Shine on forever".to_string(),
            words: Vec::new(),
        };
        let alignment = align(&words, &[target]);
        let document = LyricDocument {
            lines: alignment.lines.into_iter().map(|aligned| aligned.line).collect(),
            ..LyricDocument::default()
        };

        let exported = export_enhanced_lrc(&document);
        let parsed = parser::parse(&exported);
        let re_exported = export_enhanced_lrc(&parsed);
        let re_parsed = parser::parse(&re_exported);

        // Character-level timelines of the two parses agree within 10 ms.
        let timeline = |doc: &LyricDocument| -> Vec<f64> {
            doc.lines
                .iter()
                .flat_map(|line| line.words.iter().map(|word| word.start))
                .collect()
        };
        let first = timeline(&parsed);
        let second = timeline(&re_parsed);
        assert_eq!(first.len(), second.len());
        assert!(!first.is_empty());
        for (a, b) in first.iter().zip(second.iter()) {
            assert!((a - b).abs() <= 0.010 + 1e-9, "{a} vs {b}");
        }
    }

    #[test]
    fn timestamp_formatting() {
        assert_eq!(format_timestamp(0.0), "00:00.00");
        assert_eq!(format_timestamp(83.456), "01:23.46");
        assert_eq!(format_timestamp(600.0), "10:00.00");
    }
}
