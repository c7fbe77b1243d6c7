//! LRC format parsing.
//!
//! Recognized syntax:
//! * Line timestamps `[mm:ss.xx]` and `[mm:ss.xxx]`, including several
//!   timestamps on one line (the text repeats at each)
//! * Enhanced word timestamps `<mm:ss.xx>word`
//! * The global `[offset:±ms]` tag (positive shifts lyrics earlier)
//! * Header tags `[ti:]`, `[ar:]`, `[al:]`, `[re:]`, `[ve:]`
//!
//! Unrecognized bracket tags and malformed lines are skipped. Output
//! lines are sorted by time; duplicate times are kept in input order.

use super::{LyricDocument, LyricLine, LyricWord};

/// Header tags copied into the document metadata.
const HEADER_TAGS: [&str; 5] = ["ti", "ar", "al", "re", "ve"];

/// Parses LRC text into a document.
///
/// Never fails: unparseable content is skipped, an empty input produces
/// an empty document.
#[must_use]
pub fn parse(content: &str) -> LyricDocument {
    let mut document = LyricDocument::default();

    for raw_line in content.lines() {
        let line = raw_line.trim_start_matches('\u{feff}').trim();
        if line.is_empty() {
            continue;
        }

        let (timestamps, rest) = leading_timestamps(line);
        if timestamps.is_empty() {
            parse_header(line, &mut document);
            continue;
        }

        let (text, words) = parse_enhanced_text(rest);
        for time in timestamps {
            document.lines.push(LyricLine {
                time,
                text: text.clone(),
                words: words.clone(),
            });
        }
    }

    document
        .lines
        .sort_by(|a, b| a.time.total_cmp(&b.time));

    // Apply the global offset: positive offset means lyrics display
    // earlier, so it subtracts from every timestamp.
    if document.offset != 0.0 {
        let shift = document.offset;
        for line in &mut document.lines {
            line.time = (line.time - shift).max(0.0);
            for word in &mut line.words {
                word.start = (word.start - shift).max(0.0);
                word.end = (word.end - shift).max(0.0);
            }
        }
    }

    document
}

/// Collects the `[..]` timestamps at the start of a line.
///
/// Returns the parsed times and the remaining text. Header tags are left
/// for the caller (they also start with `[`, but don't parse as times).
fn leading_timestamps(line: &str) -> (Vec<f64>, &str) {
    let mut times = Vec::new();
    let mut rest = line;

    while let Some(stripped) = rest.strip_prefix('[') {
        let Some(end) = stripped.find(']') else {
            break;
        };
        let inner = &stripped[..end];
        if let Some(time) = parse_timestamp(inner) {
            times.push(time);
            rest = stripped[end + 1..].trim_start();
        } else {
            break;
        }
    }

    (times, rest)
}

/// Parses `mm:ss`, `mm:ss.xx` or `mm:ss.xxx` into seconds.
fn parse_timestamp(text: &str) -> Option<f64> {
    let (minutes, seconds) = text.split_once(':')?;
    if minutes.is_empty() || minutes.chars().any(|c| !c.is_ascii_digit()) {
        return None;
    }
    let minutes: f64 = minutes.parse().ok()?;

    let seconds: f64 = match seconds.split_once('.') {
        Some((whole, frac)) => {
            if whole.len() > 2
                || whole.chars().any(|c| !c.is_ascii_digit())
                || frac.is_empty()
                || frac.len() > 3
                || frac.chars().any(|c| !c.is_ascii_digit())
            {
                return None;
            }
            let whole: f64 = whole.parse().ok()?;
            let frac_value: f64 = frac.parse().ok()?;
            whole + frac_value / 10f64.powi(frac.len() as i32)
        }
        None => {
            if seconds.len() > 2 || seconds.chars().any(|c| !c.is_ascii_digit()) {
                return None;
            }
            seconds.parse().ok()?
        }
    };

    Some(minutes * 60.0 + seconds)
}

/// Parses a header or offset tag.
fn parse_header(line: &str, document: &mut LyricDocument) {
    let Some(inner) = line.strip_prefix('[').and_then(|rest| rest.strip_suffix(']')) else {
        return;
    };
    let Some((key, value)) = inner.split_once(':') else {
        return;
    };
    let key = key.trim().to_ascii_lowercase();
    let value = value.trim();

    if key == "offset" {
        if let Ok(ms) = value.parse::<f64>() {
            document.offset = ms / 1000.0;
        }
    } else if HEADER_TAGS.contains(&key.as_str()) {
        document.metadata.insert(key, value.to_string());
    }
}

/// Splits enhanced `<mm:ss.xx>word` markup into plain text plus a word
/// timeline.
///
/// A word's end time is the next marker's time; the last word's end is
/// its own start (closed by the syncer with the next line).
fn parse_enhanced_text(text: &str) -> (String, Vec<LyricWord>) {
    if !text.contains('<') {
        return (text.to_string(), Vec::new());
    }

    let mut plain = String::new();
    let mut words: Vec<LyricWord> = Vec::new();
    let mut pending: Option<(f64, String)> = None;
    let mut rest = text;

    loop {
        match rest.find('<') {
            Some(open) => {
                let before = &rest[..open];
                if let Some((_, word)) = pending.as_mut() {
                    word.push_str(before);
                } else {
                    plain.push_str(before);
                }

                let after = &rest[open + 1..];
                let Some(close) = after.find('>') else {
                    // A stray '<' is literal text.
                    if let Some((_, word)) = pending.as_mut() {
                        word.push('<');
                    } else {
                        plain.push('<');
                    }
                    rest = after;
                    continue;
                };

                if let Some(time) = parse_timestamp(&after[..close]) {
                    // Close the previous word at this marker.
                    if let Some((start, word)) = pending.take() {
                        push_word(&mut plain, &mut words, start, time, word);
                    }
                    pending = Some((time, String::new()));
                } else if let Some((_, word)) = pending.as_mut() {
                    word.push('<');
                    word.push_str(&after[..close]);
                    word.push('>');
                } else {
                    plain.push('<');
                    plain.push_str(&after[..close]);
                    plain.push('>');
                }
                rest = &after[close + 1..];
            }
            None => {
                if let Some((start, mut word)) = pending.take() {
                    word.push_str(rest);
                    push_word(&mut plain, &mut words, start, start, word);
                } else {
                    plain.push_str(rest);
                }
                break;
            }
        }
    }

    (plain.trim().to_string(), words)
}

/// Appends a completed word to the plain text and the timeline.
fn push_word(plain: &mut String, words: &mut Vec<LyricWord>, start: f64, end: f64, word: String) {
    let trimmed = word.trim();
    plain.push_str(&word);
    if !trimmed.is_empty() {
        words.push(LyricWord {
            text: trimmed.to_string(),
            start,
            end: end.max(start),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_basic_lines_sorted() {
        let document = parse(
            "[00:12.00]Line two comes second\n\
             [00:05.50]Line one comes first\n",
        );
        assert_eq!(document.lines.len(), 2);
        assert!((document.lines[0].time - 5.5).abs() < 1e-9);
        assert_eq!(document.lines[0].text, "Line one comes first");
        assert!((document.lines[1].time - 12.0).abs() < 1e-9);
    }

    #[test]
    fn parses_millisecond_timestamps() {
        let document = parse("[01:23.456]Precise\n");
        assert!((document.lines[0].time - 83.456).abs() < 1e-9);
    }

    #[test]
    fn multi_timestamp_lines_repeat() {
        let document = parse("[00:10.00][00:30.00]Chorus\n");
        assert_eq!(document.lines.len(), 2);
        assert_eq!(document.lines[0].text, "Chorus");
        assert_eq!(document.lines[1].text, "Chorus");
        assert!((document.lines[1].time - 30.0).abs() < 1e-9);
    }

    #[test]
    fn parses_headers_and_offset() {
        let document = parse(
            "[ti:Title]\n[ar:Artist]\n[al:Album]\n[re:Editor]\n[ve:1.0]\n\
             [offset:500]\n[00:10.00]Text\n",
        );
        assert_eq!(document.metadata.get("ti").map(String::as_str), Some("Title"));
        assert_eq!(document.metadata.get("ar").map(String::as_str), Some("Artist"));
        assert_eq!(document.metadata.get("ve").map(String::as_str), Some("1.0"));
        assert!((document.offset - 0.5).abs() < 1e-9);
        // Positive offset pulls lines earlier.
        assert!((document.lines[0].time - 9.5).abs() < 1e-9);
    }

    #[test]
    fn parses_enhanced_word_timestamps() {
        let document = parse("[00:10.00]<00:10.00>Hello <00:10.50>world\n");
        let line = &document.lines[0];
        assert_eq!(line.text, "Hello world");
        assert_eq!(line.words.len(), 2);
        assert_eq!(line.words[0].text, "Hello");
        assert!((line.words[0].start - 10.0).abs() < 1e-9);
        assert!((line.words[0].end - 10.5).abs() < 1e-9);
        assert_eq!(line.words[1].text, "world");
        assert!((line.words[1].start - 10.5).abs() < 1e-9);
    }

    #[test]
    fn skips_garbage() {
        let document = parse(
            "not a lyric line\n\
             [badtag]whatever\n\
             [99:99:99] impossible\n\
             [00:05.00]Real line\n",
        );
        assert_eq!(document.lines.len(), 1);
        assert_eq!(document.lines[0].text, "Real line");
    }

    #[test]
    fn times_are_non_decreasing_after_parse() {
        let document = parse(
            "[00:30.00]c\n[00:10.00]a\n[00:20.00]b\n[00:10.00]a2\n",
        );
        for pair in document.lines.windows(2) {
            assert!(pair[0].time <= pair[1].time);
        }
    }
}
