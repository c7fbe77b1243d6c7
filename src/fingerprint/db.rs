//! Fingerprint database and matching.
//!
//! An in-memory store of fingerprints keyed by id, with portable JSON
//! import/export and constellation matching: candidates are scored by
//! shared packed hashes, then the anchor-time offsets of the matches are
//! voted to find the best alignment and its confidence.

use std::{
    collections::HashMap,
    sync::Mutex,
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};

use super::{Fingerprint, HOP_SIZE};
use crate::error::{Error, Result};

/// Minimum raw score for search results.
pub const SEARCH_THRESHOLD: f32 = 0.05;

/// Minimum raw score for single-result recognition.
pub const RECOGNIZE_THRESHOLD: f32 = 0.1;

/// One stored fingerprint with its metadata.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct FingerprintEntry {
    /// Caller-chosen unique id.
    pub id: String,
    /// Track title.
    pub title: String,
    /// Track artist.
    pub artist: String,
    /// Optional album.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    /// The fingerprint itself.
    pub fingerprint: Fingerprint,
    /// When the entry was added, Unix seconds.
    pub added_at: u64,
}

/// One match returned by search or recognition.
#[derive(Clone, Debug, PartialEq)]
pub struct MatchResult {
    /// Matched entry id.
    pub id: String,
    /// Matched entry title.
    pub title: String,
    /// Matched entry artist.
    pub artist: String,
    /// Raw score: shared hashes over the larger hash count.
    pub score: f32,
    /// Agreement of the winning time offset among all matches.
    pub confidence: f32,
    /// Query position within the matched entry, in seconds.
    pub time_offset: f64,
}

/// On-disk form of the whole database.
#[derive(Debug, Deserialize, Serialize)]
struct DbFile {
    entries: Vec<FingerprintEntry>,
}

/// Thread-safe fingerprint store.
pub struct FingerprintDb {
    entries: Mutex<HashMap<String, FingerprintEntry>>,
}

impl Default for FingerprintDb {
    fn default() -> Self {
        Self::new()
    }
}

impl FingerprintDb {
    /// Creates an empty database.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Adds or replaces an entry.
    pub fn add(
        &self,
        id: impl Into<String>,
        title: impl Into<String>,
        artist: impl Into<String>,
        album: Option<String>,
        fingerprint: Fingerprint,
    ) {
        let id = id.into();
        let entry = FingerprintEntry {
            id: id.clone(),
            title: title.into(),
            artist: artist.into(),
            album,
            fingerprint,
            added_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|elapsed| elapsed.as_secs())
                .unwrap_or(0),
        };
        self.entries.lock().unwrap().insert(id, entry);
    }

    /// Removes an entry, returning whether it existed.
    pub fn remove(&self, id: &str) -> bool {
        self.entries.lock().unwrap().remove(id).is_some()
    }

    /// Number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Whether the database is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Serializes the database to portable JSON.
    ///
    /// # Errors
    ///
    /// Returns an error when serialization fails.
    pub fn export_json(&self) -> Result<String> {
        let entries = self.entries.lock().unwrap();
        let mut list: Vec<FingerprintEntry> = entries.values().cloned().collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(serde_json::to_string_pretty(&DbFile { entries: list })?)
    }

    /// Merges entries from portable JSON into the database.
    ///
    /// Returns the number of entries imported. Existing ids are
    /// replaced.
    ///
    /// # Errors
    ///
    /// Returns an error when the JSON does not match the schema.
    pub fn import_json(&self, json: &str) -> Result<usize> {
        let file: DbFile =
            serde_json::from_str(json).map_err(|e| Error::invalid_parameter(e.to_string()))?;
        let count = file.entries.len();
        let mut entries = self.entries.lock().unwrap();
        for entry in file.entries {
            entries.insert(entry.id.clone(), entry);
        }
        Ok(count)
    }

    /// Searches the database, returning matches ranked by score.
    ///
    /// Candidates below `threshold` are dropped.
    #[must_use]
    pub fn search(&self, query: &Fingerprint, threshold: f32) -> Vec<MatchResult> {
        // Query index: packed hash -> anchor times.
        let mut query_index: HashMap<u32, Vec<u32>> = HashMap::new();
        for hash in &query.hashes {
            query_index.entry(hash.packed()).or_default().push(hash.anchor_time);
        }
        if query_index.is_empty() {
            return Vec::new();
        }

        let entries = self.entries.lock().unwrap();
        let mut results = Vec::new();

        for entry in entries.values() {
            let candidate = &entry.fingerprint;
            let mut matches = 0usize;
            // Offset histogram: candidate anchor − query anchor.
            let mut offsets: HashMap<i64, usize> = HashMap::new();

            let mut matched_keys = 0usize;
            let mut seen_keys = std::collections::HashSet::new();
            for hash in &candidate.hashes {
                let packed = hash.packed();
                let Some(query_times) = query_index.get(&packed) else {
                    continue;
                };
                if seen_keys.insert(packed) {
                    matched_keys += 1;
                }
                // Vote with the closest query occurrence of this hash;
                // repeated musical content shares packed keys and voting
                // every occurrence would dilute the true offset.
                let offset = query_times
                    .iter()
                    .map(|query_time| i64::from(hash.anchor_time) - i64::from(*query_time))
                    .min_by_key(|offset| offset.abs())
                    .unwrap_or(0);
                matches += 1;
                *offsets.entry(offset).or_insert(0) += 1;
            }

            if matches == 0 {
                continue;
            }

            let score = matched_keys as f32
                / query_index.len().max(candidate.packed_set().len()) as f32;
            if score < threshold {
                continue;
            }

            let (best_offset, best_count) = offsets
                .iter()
                .max_by_key(|(_, count)| **count)
                .map(|(offset, count)| (*offset, *count))
                .unwrap_or((0, 0));
            let confidence = best_count as f32 / matches as f32;

            let time_offset = if candidate.sample_rate > 0 {
                best_offset as f64 * HOP_SIZE as f64 / f64::from(candidate.sample_rate)
            } else {
                0.0
            };

            results.push(MatchResult {
                id: entry.id.clone(),
                title: entry.title.clone(),
                artist: entry.artist.clone(),
                score,
                confidence,
                time_offset,
            });
        }

        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        results
    }

    /// Recognizes the single best match, if any clears the recognition
    /// threshold.
    #[must_use]
    pub fn recognize(&self, query: &Fingerprint) -> Option<MatchResult> {
        self.search(query, RECOGNIZE_THRESHOLD).into_iter().next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::FingerprintEngine;
    use std::f32::consts::PI;

    fn signal(seconds: f32, rate: u32, detune: f32) -> Vec<f32> {
        let len = (seconds * rate as f32) as usize;
        (0..len)
            .map(|i| {
                let t = i as f32 / rate as f32;
                0.3 * (2.0 * PI * (330.0 + detune + 50.0 * (t * 0.8).sin()) * t).sin()
                    + 0.25 * (2.0 * PI * (1200.0 + detune * 3.0 + 200.0 * (t * 0.4).cos()) * t).sin()
                    + 0.2 * (2.0 * PI * (3000.0 + detune * 5.0) * t).sin()
            })
            .collect()
    }

    fn engine() -> FingerprintEngine {
        let mut engine = FingerprintEngine::new();
        engine.prepare();
        engine
    }

    #[test]
    fn recognizes_identical_audio() {
        let engine = engine();
        let rate = 24_000;
        let audio = signal(30.0, rate, 0.0);
        let fingerprint = engine.fingerprint_samples(&audio, rate).unwrap();

        let db = FingerprintDb::new();
        db.add("e1", "Test Track", "Test Artist", None, fingerprint.clone());

        let result = db.recognize(&fingerprint).expect("must recognize");
        assert_eq!(result.id, "e1");
        assert!(result.score >= 0.8, "score {}", result.score);
        assert!(result.confidence >= 0.9, "confidence {}", result.confidence);
        assert!(result.time_offset.abs() < 0.1);
    }

    #[test]
    fn unrelated_audio_does_not_recognize() {
        let engine = engine();
        let rate = 24_000;
        let stored = engine
            .fingerprint_samples(&signal(10.0, rate, 0.0), rate)
            .unwrap();

        fastrand::seed(42);
        let noise: Vec<f32> = (0..rate as usize * 5)
            .map(|_| fastrand::f32() * 2.0 - 1.0)
            .collect();
        let query = engine.fingerprint_samples(&noise, rate).unwrap();

        let db = FingerprintDb::new();
        db.add("e1", "Stored", "Artist", None, stored);
        assert!(db.recognize(&query).is_none());
    }

    #[test]
    fn search_ranks_by_score() {
        let engine = engine();
        let rate = 24_000;
        let audio = signal(10.0, rate, 0.0);
        let near = signal(10.0, rate, 2.0);
        let far = signal(10.0, rate, 400.0);

        let db = FingerprintDb::new();
        db.add(
            "exact",
            "Exact",
            "A",
            None,
            engine.fingerprint_samples(&audio, rate).unwrap(),
        );
        db.add(
            "near",
            "Near",
            "A",
            None,
            engine.fingerprint_samples(&near, rate).unwrap(),
        );
        db.add(
            "far",
            "Far",
            "A",
            None,
            engine.fingerprint_samples(&far, rate).unwrap(),
        );

        let query = engine.fingerprint_samples(&audio, rate).unwrap();
        let results = db.search(&query, SEARCH_THRESHOLD);
        assert!(!results.is_empty());
        assert_eq!(results[0].id, "exact");
        for pair in results.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn json_round_trip_preserves_entries() {
        let engine = engine();
        let rate = 24_000;
        let fingerprint = engine
            .fingerprint_samples(&signal(5.0, rate, 0.0), rate)
            .unwrap();

        let db = FingerprintDb::new();
        db.add(
            "id-1",
            "Title",
            "Artist",
            Some("Album".to_string()),
            fingerprint.clone(),
        );

        let json = db.export_json().unwrap();
        let restored = FingerprintDb::new();
        assert_eq!(restored.import_json(&json).unwrap(), 1);
        assert_eq!(restored.len(), 1);

        // Recognition still works after the round trip.
        let result = restored.recognize(&fingerprint).expect("recognize");
        assert_eq!(result.id, "id-1");
    }

    #[test]
    fn remove_deletes_entry() {
        let db = FingerprintDb::new();
        let engine = engine();
        let fingerprint = engine
            .fingerprint_samples(&signal(2.0, 24_000, 0.0), 24_000)
            .unwrap();
        db.add("x", "T", "A", None, fingerprint);
        assert_eq!(db.len(), 1);
        assert!(db.remove("x"));
        assert!(!db.remove("x"));
        assert!(db.is_empty());
    }
}
