//! Match configuration and named profiles.
//!
//! A `MatchConfig` is owned by the caller and handed to every engine call by
//! reference. The engine reads it, validates it at the call boundary, and
//! never mutates it. Profiles are stored as a JSON object mapping a profile
//! name to a (possibly partial) config; missing fields take the defaults.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{EngineError, Result};

// ============================================================================
// Defaults
// ============================================================================

pub const DEFAULT_THRESHOLD: u8 = 85;
pub const DEFAULT_DURATION_TOLERANCE_SECS: f64 = 5.0;
pub const DEFAULT_DURATION_TOLERANCE_FRACTION: f64 = 0.02;
pub const DEFAULT_MINIMUM_FIELDS: u8 = 3;

/// Number of normalized characters of title/artist used as blocking prefixes.
pub const DEFAULT_BLOCKING_PREFIX_LEN: usize = 10;

/// Width of a duration blocking bucket in seconds.
pub const DEFAULT_DURATION_BUCKET_SECS: f64 = 30.0;

/// Number of fields counted toward `minimum_fields_to_match`
/// (title, artist, album, duration).
pub const COUNTED_FIELDS: u8 = 4;

// ============================================================================
// MatchConfig
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    pub title_threshold: u8,
    pub artist_threshold: u8,
    pub album_threshold: u8,

    pub duration_tolerance_secs: f64,
    /// Fraction of the longer duration, e.g. 0.02 for 2%
    pub duration_tolerance_fraction: f64,

    pub minimum_fields_to_match: u8,
    pub require_exact_track_number: bool,

    pub ignore_case: bool,
    pub ignore_punctuation: bool,
    pub ignore_artist_prefixes: bool,
    pub ignore_featuring: bool,
    pub ignore_album_editions: bool,
    pub fold_diacritics: bool,

    pub blocking_prefix_len: usize,
    pub duration_bucket_secs: f64,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            title_threshold: DEFAULT_THRESHOLD,
            artist_threshold: DEFAULT_THRESHOLD,
            album_threshold: DEFAULT_THRESHOLD,
            duration_tolerance_secs: DEFAULT_DURATION_TOLERANCE_SECS,
            duration_tolerance_fraction: DEFAULT_DURATION_TOLERANCE_FRACTION,
            minimum_fields_to_match: DEFAULT_MINIMUM_FIELDS,
            require_exact_track_number: false,
            ignore_case: true,
            ignore_punctuation: true,
            ignore_artist_prefixes: true,
            ignore_featuring: true,
            ignore_album_editions: true,
            fold_diacritics: false,
            blocking_prefix_len: DEFAULT_BLOCKING_PREFIX_LEN,
            duration_bucket_secs: DEFAULT_DURATION_BUCKET_SECS,
        }
    }
}

impl MatchConfig {
    /// Check every bound the engine relies on.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("title_threshold", self.title_threshold),
            ("artist_threshold", self.artist_threshold),
            ("album_threshold", self.album_threshold),
        ] {
            if value > 100 {
                return Err(EngineError::InvalidConfig(format!(
                    "{} must be within 0..=100, got {}",
                    name, value
                )));
            }
        }

        if !(1..=COUNTED_FIELDS).contains(&self.minimum_fields_to_match) {
            return Err(EngineError::InvalidConfig(format!(
                "minimum_fields_to_match must be within 1..={}, got {}",
                COUNTED_FIELDS, self.minimum_fields_to_match
            )));
        }

        for (name, value) in [
            ("duration_tolerance_secs", self.duration_tolerance_secs),
            ("duration_tolerance_fraction", self.duration_tolerance_fraction),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(EngineError::InvalidConfig(format!(
                    "{} must be a non-negative number, got {}",
                    name, value
                )));
            }
        }

        if self.blocking_prefix_len == 0 {
            return Err(EngineError::InvalidConfig(
                "blocking_prefix_len must be at least 1".to_string(),
            ));
        }

        if !self.duration_bucket_secs.is_finite() || self.duration_bucket_secs <= 0.0 {
            return Err(EngineError::InvalidConfig(format!(
                "duration_bucket_secs must be positive, got {}",
                self.duration_bucket_secs
            )));
        }

        Ok(())
    }
}

// ============================================================================
// Profiles
// ============================================================================

/// Named match configurations, one per logical profile.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MatchProfiles {
    profiles: FxHashMap<String, MatchConfig>,
}

impl MatchProfiles {
    pub fn from_json_str(text: &str) -> Result<Self> {
        let profiles: MatchProfiles = serde_json::from_str(text)?;
        for (name, config) in &profiles.profiles {
            config.validate().map_err(|e| {
                EngineError::InvalidConfig(format!("profile '{}': {}", name, e))
            })?;
        }
        Ok(profiles)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn get(&self, name: &str) -> Result<&MatchConfig> {
        self.profiles
            .get(name)
            .ok_or_else(|| EngineError::ProfileNotFound(name.to_string()))
    }

    /// Profile names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.profiles.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}
