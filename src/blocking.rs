//! Candidate reduction ahead of pairwise scoring.
//!
//! Each entry gets a coarse blocking key: the first K normalized characters
//! of title and artist, a duration bucket, and its exact (artist, album)
//! pair. Two entries are candidates when they share any one signal (or sit
//! in adjacent duration buckets). This is an optimization, not a filter on
//! correctness, with one documented gap: duplicates whose title prefix,
//! artist prefix, duration bucket and artist/album pair all differ are never
//! compared. `ScanMode::Exhaustive` closes that gap at O(n²) cost.
//!
//! Candidates are enumerated per anchor. An anchor only yields partners with
//! a higher index, each at most once, so anchors can be split across workers
//! without ever materializing the full pair set.

use rustc_hash::FxHashMap;

use crate::config::MatchConfig;
use crate::models::CatalogEntry;
use crate::normalize::NormalizedFields;

/// How candidate pairs are chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanMode {
    /// Pairs sharing at least one blocking signal
    #[default]
    Blocked,
    /// Every pair; exhaustive recall
    Exhaustive,
}

/// Bucket index of a known duration. Huge durations saturate at the i64 range.
pub fn duration_bucket(secs: f64, bucket_secs: f64) -> i64 {
    (secs / bucket_secs).round() as i64
}

/// Coarse signature of one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockingKey {
    pub title_prefix: String,
    pub artist_prefix: String,
    pub duration_bucket: Option<i64>,
    pub artist_album: Option<(String, String)>,
}

impl BlockingKey {
    pub fn of(entry: &CatalogEntry, norm: &NormalizedFields, config: &MatchConfig) -> Self {
        let k = config.blocking_prefix_len;
        let artist_album = match &norm.album {
            Some(album) if !norm.artist.is_empty() && !album.is_empty() => {
                Some((norm.artist.to_string(), album.to_string()))
            }
            _ => None,
        };

        Self {
            title_prefix: norm.title.prefix(k).to_string(),
            artist_prefix: norm.artist.prefix(k).to_string(),
            duration_bucket: entry
                .known_duration()
                .map(|d| duration_bucket(d, config.duration_bucket_secs)),
            artist_album,
        }
    }

    /// Compact display form: title prefix + artist prefix + bucket.
    pub fn signature(&self) -> String {
        match self.duration_bucket {
            Some(bucket) => format!("{}{}#{}", self.title_prefix, self.artist_prefix, bucket),
            None => format!("{}{}#-", self.title_prefix, self.artist_prefix),
        }
    }
}

/// Inverted index from each blocking signal to the entries carrying it.
pub struct CandidateIndex {
    mode: ScanMode,
    len: usize,
    by_title: FxHashMap<String, Vec<usize>>,
    by_artist: FxHashMap<String, Vec<usize>>,
    by_bucket: FxHashMap<i64, Vec<usize>>,
    by_artist_album: FxHashMap<(String, String), Vec<usize>>,
    keys: Vec<BlockingKey>,
}

impl CandidateIndex {
    pub fn build(
        entries: &[CatalogEntry],
        prepared: &[NormalizedFields],
        config: &MatchConfig,
        mode: ScanMode,
    ) -> Self {
        let mut index = Self {
            mode,
            len: entries.len(),
            by_title: FxHashMap::default(),
            by_artist: FxHashMap::default(),
            by_bucket: FxHashMap::default(),
            by_artist_album: FxHashMap::default(),
            keys: Vec::new(),
        };

        if mode == ScanMode::Exhaustive {
            return index;
        }

        index.keys = entries
            .iter()
            .zip(prepared)
            .map(|(entry, norm)| BlockingKey::of(entry, norm, config))
            .collect();

        // Empty signals never block two entries together
        for (i, key) in index.keys.iter().enumerate() {
            if !key.title_prefix.is_empty() {
                index.by_title.entry(key.title_prefix.clone()).or_default().push(i);
            }
            if !key.artist_prefix.is_empty() {
                index.by_artist.entry(key.artist_prefix.clone()).or_default().push(i);
            }
            if let Some(bucket) = key.duration_bucket {
                index.by_bucket.entry(bucket).or_default().push(i);
            }
            if let Some(pair) = &key.artist_album {
                index.by_artist_album.entry(pair.clone()).or_default().push(i);
            }
        }

        index
    }

    pub fn mode(&self) -> ScanMode {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Partners of `anchor` with a higher index, ascending, without repeats.
    pub fn candidates_for(&self, anchor: usize) -> Vec<usize> {
        if anchor >= self.len {
            return Vec::new();
        }
        if self.mode == ScanMode::Exhaustive {
            return ((anchor + 1)..self.len).collect();
        }

        let key = &self.keys[anchor];
        let mut partners: Vec<usize> = Vec::new();
        let mut take = |list: Option<&Vec<usize>>| {
            if let Some(list) = list {
                // Lists are ascending, so skip straight past the anchor
                let start = list.partition_point(|&j| j <= anchor);
                partners.extend_from_slice(&list[start..]);
            }
        };

        if !key.title_prefix.is_empty() {
            take(self.by_title.get(&key.title_prefix));
        }
        if !key.artist_prefix.is_empty() {
            take(self.by_artist.get(&key.artist_prefix));
        }
        if let Some(bucket) = key.duration_bucket {
            // Float-to-int casts saturate, so the edge buckets must too
            for b in [bucket.saturating_sub(1), bucket, bucket.saturating_add(1)] {
                take(self.by_bucket.get(&b));
            }
        }
        if let Some(pair) = &key.artist_album {
            take(self.by_artist_album.get(pair));
        }

        partners.sort_unstable();
        partners.dedup();
        partners
    }

    /// Total candidate pairs across all anchors.
    pub fn count_pairs(&self) -> usize {
        (0..self.len).map(|i| self.candidates_for(i).len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(entries: &[CatalogEntry], mode: ScanMode) -> CandidateIndex {
        let config = MatchConfig::default();
        let prepared: Vec<NormalizedFields> = entries
            .iter()
            .map(|e| NormalizedFields::of(e, &config))
            .collect();
        CandidateIndex::build(entries, &prepared, &config, mode)
    }

    #[test]
    fn test_blocking_key() {
        let config = MatchConfig::default();
        let entry = CatalogEntry::new("k", "Hotel California (Live)", "The Eagles", "Hell Freezes Over")
            .with_duration(391.0);
        let norm = NormalizedFields::of(&entry, &config);
        let key = BlockingKey::of(&entry, &norm, &config);
        assert_eq!(key.title_prefix, "hotel cali");
        assert_eq!(key.artist_prefix, "eagles");
        assert_eq!(key.duration_bucket, Some(13));
        assert_eq!(
            key.artist_album,
            Some(("eagles".to_string(), "hell freezes over".to_string()))
        );
        assert_eq!(key.signature(), "hotel calieagles#13");
    }

    #[test]
    fn test_shared_signals_make_candidates() {
        let entries = vec![
            CatalogEntry::new("0", "Yesterday", "Beatles", "Help").with_duration(125.0),
            // same title prefix only
            CatalogEntry::new("1", "Yesterday", "Carpenters", "").with_duration(400.0),
            // same artist prefix only
            CatalogEntry::new("2", "Something", "The Beatles", "").with_duration(900.0),
            // adjacent duration bucket only (125/30 = 4, 150/30 = 5)
            CatalogEntry::new("3", "Roxanne", "Police", "").with_duration(150.0),
            // nothing shared
            CatalogEntry::new("4", "Bohemian Rhapsody", "Queen", "").with_duration(700.0),
        ];
        let index = build(&entries, ScanMode::Blocked);
        assert_eq!(index.candidates_for(0), vec![1, 2, 3]);
        assert!(index.candidates_for(4).is_empty());
        assert!(index.candidates_for(99).is_empty());
    }

    #[test]
    fn test_artist_album_signal() {
        let entries = vec![
            CatalogEntry::new("0", "Intro", "Some Band", "First Album"),
            CatalogEntry::new("1", "Completely Other", "Some Band", "First Album"),
        ];
        let index = build(&entries, ScanMode::Blocked);
        assert_eq!(index.candidates_for(0), vec![1]);
    }

    #[test]
    fn test_empty_signals_never_match() {
        let entries = vec![
            CatalogEntry::new("0", "", "", ""),
            CatalogEntry::new("1", "", "", ""),
        ];
        let index = build(&entries, ScanMode::Blocked);
        assert!(index.candidates_for(0).is_empty());
        assert_eq!(index.count_pairs(), 0);
    }

    #[test]
    fn test_partners_unique_and_higher() {
        let entries: Vec<CatalogEntry> = (0..6)
            .map(|i| {
                CatalogEntry::new(i.to_string(), "Same Title", "Same Artist", "Same Album")
                    .with_duration(200.0)
            })
            .collect();
        let index = build(&entries, ScanMode::Blocked);
        assert_eq!(index.candidates_for(2), vec![3, 4, 5]);
        assert_eq!(index.count_pairs(), 15);
    }

    #[test]
    fn test_duration_bucket_saturates() {
        assert_eq!(duration_bucket(391.0, 30.0), 13);
        assert_eq!(duration_bucket(1e300, 30.0), i64::MAX);
        assert_eq!(duration_bucket(f64::MAX, 0.5), i64::MAX);
    }

    #[test]
    fn test_extreme_duration_buckets() {
        let entries = vec![
            CatalogEntry::new("0", "Song", "Artist", "Album").with_duration(1e300),
            CatalogEntry::new("1", "Song", "Artist", "Album").with_duration(200.0),
            CatalogEntry::new("2", "Other", "Someone", "").with_duration(-1e300),
            CatalogEntry::new("3", "Else", "Nobody", "").with_duration(f64::MAX),
        ];
        let index = build(&entries, ScanMode::Blocked);
        assert_eq!(index.candidates_for(0), vec![1, 3]);
        assert!(index.candidates_for(2).is_empty());
        assert!(index.candidates_for(3).is_empty());
        assert_eq!(index.count_pairs(), 2);
    }

    #[test]
    fn test_exhaustive_mode_pairs_everything() {
        let entries = vec![
            CatalogEntry::new("0", "Alpha", "One", ""),
            CatalogEntry::new("1", "Beta", "Two", ""),
            CatalogEntry::new("2", "Gamma", "Three", ""),
        ];
        let index = build(&entries, ScanMode::Exhaustive);
        assert_eq!(index.candidates_for(0), vec![1, 2]);
        assert_eq!(index.count_pairs(), 3);
        assert_eq!(index.mode(), ScanMode::Exhaustive);
    }
}
