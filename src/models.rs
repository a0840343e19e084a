//! Core data models for the duplicate engine.
//!
//! This module contains the catalog projection consumed by the engine, the
//! per-field verdicts, duplicate groups, and the per-scan statistics object.

use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;

use crate::error::{EngineError, Result};

// ============================================================================
// Catalog Models
// ============================================================================

/// Read-only projection of one catalog row.
///
/// Missing text metadata is an empty string; callers substitute "" before
/// handing entries to the engine.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CatalogEntry {
    pub key: String, // Stable identity: file path or row id
    pub title: String,
    pub artist: String,
    pub album: String,
    pub track_number: Option<u32>,
    pub duration_secs: Option<f64>,
    pub bitrate_kbps: Option<u32>, // Only used to rank which copy to keep
}

impl CatalogEntry {
    pub fn new(
        key: impl Into<String>,
        title: impl Into<String>,
        artist: impl Into<String>,
        album: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            title: title.into(),
            artist: artist.into(),
            album: album.into(),
            ..Self::default()
        }
    }

    pub fn with_duration(mut self, secs: f64) -> Self {
        self.duration_secs = Some(secs);
        self
    }

    pub fn with_track_number(mut self, number: u32) -> Self {
        self.track_number = Some(number);
        self
    }

    pub fn with_bitrate(mut self, kbps: u32) -> Self {
        self.bitrate_kbps = Some(kbps);
        self
    }

    /// Duration usable for comparison (present and positive).
    pub fn known_duration(&self) -> Option<f64> {
        self.duration_secs.and_then(usable_duration)
    }
}

/// `secs` when it is finite and positive.
pub fn usable_duration(secs: f64) -> Option<f64> {
    (secs.is_finite() && secs > 0.0).then_some(secs)
}

/// Reject runs with empty or repeated identity keys.
///
/// Every corrupt entry is reported through the error rather than skipped.
pub fn validate_entries(entries: &[CatalogEntry]) -> Result<()> {
    let mut counts: FxHashMap<&str, usize> = FxHashMap::default();
    for (index, entry) in entries.iter().enumerate() {
        if entry.key.trim().is_empty() {
            return Err(EngineError::MissingIdentityKey { index });
        }
        *counts.entry(entry.key.as_str()).or_default() += 1;
    }

    if let Some((key, count)) = counts
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .min_by(|a, b| a.0.cmp(b.0))
    {
        return Err(EngineError::DuplicateIdentityKey {
            key: key.to_string(),
            count,
        });
    }

    Ok(())
}

// ============================================================================
// Field Verdicts
// ============================================================================

/// The four counted fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Field {
    Title,
    Artist,
    Album,
    Duration,
}

impl Field {
    pub fn label(self) -> &'static str {
        match self {
            Field::Title => "Title",
            Field::Artist => "Artist",
            Field::Album => "Album",
            Field::Duration => "Duration",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum FieldOutcome {
    /// String field compared by percent similarity
    Scored {
        similarity: u8,
        threshold: u8,
        passed: bool,
    },
    /// Durations compared against the larger of the two tolerances
    Duration {
        diff_secs: f64,
        allowed_secs: f64,
        passed: bool,
    },
    /// Unknown on at least one side; neither pass nor fail
    Excluded,
}

/// Ephemeral outcome of comparing one field between two entries.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FieldVerdict {
    pub field: Field,
    pub outcome: FieldOutcome,
}

impl FieldVerdict {
    pub fn is_evaluated(&self) -> bool {
        !matches!(self.outcome, FieldOutcome::Excluded)
    }

    pub fn passed(&self) -> bool {
        match self.outcome {
            FieldOutcome::Scored { passed, .. } | FieldOutcome::Duration { passed, .. } => passed,
            FieldOutcome::Excluded => false,
        }
    }
}

// ============================================================================
// Duplicate Groups
// ============================================================================

/// Entries transitively connected by passing pairwise verdicts.
///
/// `id` is the smallest catalog index in the component, so an updated group
/// streamed later keeps the id of its oldest member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateGroup {
    pub id: usize,
    pub members: Vec<String>,
}

impl DuplicateGroup {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Pick the copy to keep: highest bitrate, then longest duration,
    /// then the smallest identity key.
    pub fn keeper<'a>(&self, entries: &'a [CatalogEntry]) -> Option<&'a CatalogEntry> {
        let members: FxHashSet<&str> = self.members.iter().map(String::as_str).collect();
        entries
            .iter()
            .filter(|e| members.contains(e.key.as_str()))
            .max_by(|a, b| {
                a.bitrate_kbps
                    .unwrap_or(0)
                    .cmp(&b.bitrate_kbps.unwrap_or(0))
                    .then_with(|| {
                        a.known_duration()
                            .unwrap_or(0.0)
                            .partial_cmp(&b.known_duration().unwrap_or(0.0))
                            .unwrap_or(Ordering::Equal)
                    })
                    // Reversed so the smaller key wins the max
                    .then_with(|| b.key.cmp(&a.key))
            })
    }
}

impl fmt::Display for DuplicateGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "group #{} ({} entries)", self.id, self.members.len())
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Per-scan counters, owned by the caller of one scan.
#[derive(Default, Debug, Clone, Serialize)]
pub struct ScanStats {
    pub entries: usize,
    pub candidate_pairs: usize,
    pub pairs_compared: usize,
    pub pairs_vetoed: usize,
    pub matching_pairs: usize,
    pub groups: usize,
    pub grouped_entries: usize,
    pub exhaustive: bool,
    pub store_fallback: bool,
    pub elapsed_seconds: f64,
}

impl ScanStats {
    /// Fraction of the full n(n-1)/2 pair space that blocking kept, in percent.
    pub fn reduction_rate(&self) -> f64 {
        let full = self.entries.saturating_mul(self.entries.saturating_sub(1)) / 2;
        if full == 0 {
            0.0
        } else {
            100.0 * self.candidate_pairs as f64 / full as f64
        }
    }

    /// Merge counters from a worker's partial stats.
    pub fn absorb(&mut self, other: &ScanStats) {
        self.candidate_pairs += other.candidate_pairs;
        self.pairs_compared += other.pairs_compared;
        self.pairs_vetoed += other.pairs_vetoed;
        self.matching_pairs += other.matching_pairs;
    }

    /// Log stats at debug level in JSON format
    pub fn log_phase(&self, phase: &str) {
        if let Ok(json) = serde_json::to_string(self) {
            tracing::debug!(phase, stats = %json, "scan statistics");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_entries_missing_key() {
        let entries = vec![
            CatalogEntry::new("a.mp3", "Song", "Artist", ""),
            CatalogEntry::new("  ", "Song", "Artist", ""),
        ];
        match validate_entries(&entries) {
            Err(EngineError::MissingIdentityKey { index }) => assert_eq!(index, 1),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_validate_entries_duplicate_key() {
        let entries = vec![
            CatalogEntry::new("a.mp3", "Song", "Artist", ""),
            CatalogEntry::new("b.mp3", "Song", "Artist", ""),
            CatalogEntry::new("a.mp3", "Other", "Artist", ""),
        ];
        match validate_entries(&entries) {
            Err(EngineError::DuplicateIdentityKey { key, count }) => {
                assert_eq!(key, "a.mp3");
                assert_eq!(count, 2);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_known_duration_filters_zero() {
        let e = CatalogEntry::new("a", "t", "a", "").with_duration(0.0);
        assert_eq!(e.known_duration(), None);
        let e = CatalogEntry::new("a", "t", "a", "").with_duration(201.5);
        assert_eq!(e.known_duration(), Some(201.5));
    }

    #[test]
    fn test_keeper_prefers_bitrate_then_duration_then_key() {
        let entries = vec![
            CatalogEntry::new("c.mp3", "Song", "A", "").with_bitrate(320).with_duration(200.0),
            CatalogEntry::new("b.mp3", "Song", "A", "").with_bitrate(320).with_duration(200.0),
            CatalogEntry::new("a.mp3", "Song", "A", "").with_bitrate(128).with_duration(210.0),
            CatalogEntry::new("z.mp3", "Song", "A", "").with_bitrate(999),
        ];
        let group = DuplicateGroup {
            id: 0,
            members: vec!["c.mp3".into(), "b.mp3".into(), "a.mp3".into()],
        };
        assert_eq!(group.keeper(&entries).unwrap().key, "b.mp3");
    }

    #[test]
    fn test_reduction_rate() {
        let stats = ScanStats {
            entries: 5,
            candidate_pairs: 5,
            ..ScanStats::default()
        };
        assert!((stats.reduction_rate() - 50.0).abs() < 1e-9);
        assert_eq!(ScanStats::default().reduction_rate(), 0.0);
    }
}
