//! Lyric synchronization against the audio clock.
//!
//! [`LyricSyncer`] turns playback time into an active line and word
//! cursor. The owner calls [`LyricSyncer::update`] with the current
//! audio-clock time (typically from a periodic UI tick); the sync
//! callback fires only when the line or word index actually changes, so
//! repeated updates inside one word are coalesced. Events fire in
//! non-decreasing playback order by construction.

use super::{LyricDocument, LyricLine};

/// One sync event.
#[derive(Clone, Debug, PartialEq)]
pub struct SyncEvent {
    /// Active line index.
    pub line_index: usize,
    /// The active line.
    pub line: LyricLine,
    /// Active word index within the line, when word timings exist.
    pub word_index: Option<usize>,
    /// Progress through the line in [0, 1].
    pub progress: f32,
}

/// Callback invoked on line/word transitions.
pub type SyncCallback = Box<dyn Fn(&SyncEvent) + Send + Sync>;

/// Playback-time lyric cursor.
pub struct LyricSyncer {
    document: LyricDocument,
    /// User-adjustable lead/lag in seconds, added to playback time.
    user_offset: f64,
    /// Last reported (line, word) cursor.
    last: Option<(usize, Option<usize>)>,
    callback: Option<SyncCallback>,
}

impl LyricSyncer {
    /// Creates a syncer over a parsed document.
    #[must_use]
    pub fn new(document: LyricDocument) -> Self {
        Self {
            document,
            user_offset: 0.0,
            last: None,
            callback: None,
        }
    }

    /// The underlying document.
    #[must_use]
    pub fn document(&self) -> &LyricDocument {
        &self.document
    }

    /// Registers the sync callback.
    pub fn set_callback(&mut self, callback: Option<SyncCallback>) {
        self.callback = callback;
    }

    /// Sets the user offset in seconds (positive shows lyrics earlier).
    pub fn set_user_offset(&mut self, offset: f64) {
        self.user_offset = offset;
        // The cursor may move backwards after an offset change; forget
        // the last report so the next update re-fires.
        self.last = None;
    }

    /// The user offset in seconds.
    #[must_use]
    pub fn user_offset(&self) -> f64 {
        self.user_offset
    }

    /// Clears the cursor (seek); the next update re-fires.
    pub fn reset(&mut self) {
        self.last = None;
    }

    /// Advances the cursor to playback time `t_play` (seconds).
    ///
    /// Returns the event when the line or word index changed, after
    /// invoking the callback with it.
    pub fn update(&mut self, t_play: f64) -> Option<SyncEvent> {
        let t = t_play + self.user_offset;
        let line_index = self.document.line_index_at(t)?;
        let line = &self.document.lines[line_index];

        // Active word: last word with start <= t.
        let word_index = if line.words.is_empty() {
            None
        } else {
            line.words
                .iter()
                .rposition(|word| word.start <= t)
        };

        let cursor = (line_index, word_index);
        if self.last == Some(cursor) {
            return None;
        }
        self.last = Some(cursor);

        // Line progress: toward the next line's start when there is one.
        let line_end = self
            .document
            .lines
            .get(line_index + 1)
            .map(|next| next.time)
            .or_else(|| line.words.last().map(|word| word.end))
            .unwrap_or(line.time);
        let progress = if line_end > line.time {
            (((t - line.time) / (line_end - line.time)).clamp(0.0, 1.0)) as f32
        } else {
            1.0
        };

        let event = SyncEvent {
            line_index,
            line: line.clone(),
            word_index,
            progress,
        };
        if let Some(callback) = self.callback.as_ref() {
            callback(&event);
        }
        Some(event)
    }

    /// The lines around the current cursor for scroll displays.
    #[must_use]
    pub fn nearby_lines(&self, range: usize) -> &[LyricLine] {
        let index = self.last.map_or(0, |(line, _)| line);
        self.document.nearby_lines(index, range)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lyrics::parser;
    use std::sync::{Arc, Mutex};

    fn syncer() -> LyricSyncer {
        LyricSyncer::new(parser::parse(
            "[00:01.00]<00:01.00>alpha <00:02.00>beta\n\
             [00:05.00]second line\n\
             [00:09.00]third line\n",
        ))
    }

    #[test]
    fn fires_once_per_cursor_change() {
        let mut syncer = syncer();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        syncer.set_callback(Some(Box::new(move |event: &SyncEvent| {
            sink.lock().unwrap().push((event.line_index, event.word_index));
        })));

        assert!(syncer.update(0.0).is_none(), "before the first line");
        assert!(syncer.update(1.1).is_some());
        assert!(syncer.update(1.2).is_none(), "same word coalesces");
        assert!(syncer.update(2.5).is_some(), "word advanced");
        assert!(syncer.update(5.5).is_some(), "line advanced");

        let events = events.lock().unwrap();
        assert_eq!(events.as_slice(), &[(0, Some(0)), (0, Some(1)), (1, None)]);
    }

    #[test]
    fn user_offset_shifts_lookup() {
        let mut syncer = syncer();
        syncer.set_user_offset(1.0);
        // t=4.2 plus offset 1.0 lands in the second line (5.0).
        let event = syncer.update(4.2).unwrap();
        assert_eq!(event.line_index, 1);
    }

    #[test]
    fn progress_moves_through_line() {
        let mut syncer = syncer();
        let early = syncer.update(5.0).unwrap();
        assert!(early.progress < 0.2);

        syncer.reset();
        let late = syncer.update(8.8).unwrap();
        assert_eq!(late.line_index, 1);
        assert!(late.progress > 0.9);
    }

    #[test]
    fn nearby_lines_follow_cursor() {
        let mut syncer = syncer();
        syncer.update(5.5);
        let nearby = syncer.nearby_lines(1);
        assert_eq!(nearby.len(), 3);
        assert_eq!(nearby[1].text, "second line");
    }
}
