//! Config-driven text normalization for catalog metadata.
//!
//! Every transform is gated by a flag on `MatchConfig` and applied in a fixed
//! order: case, punctuation, artist article, featuring credit, album edition
//! suffix. Whitespace collapsing always runs last.
//!
//! CRITICAL: blocking keys and field comparison both read these outputs.
//! Changing a rule changes which pairs are ever compared.

use any_ascii::any_ascii;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::ops::Deref;
use unicode_normalization::UnicodeNormalization;

use crate::config::MatchConfig;
use crate::models::CatalogEntry;

// ============================================================================
// REGEX PATTERNS
// ============================================================================

/// Leading article on artist names: "The Beatles", "A Perfect Circle"
pub static ARTICLE_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*(?:the|a|an)\s+").unwrap());

/// Bracketed featuring credit: "(feat. Artist)", "[ft Someone]"
pub static FEATURING_BRACKETED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\s*[\(\[]\s*(?:featuring|feat|ft)\b\.?[^\)\]]*[\)\]]").unwrap()
});

/// Trailing featuring credit: "Song feat. Artist", "Artist ft Someone"
pub static FEATURING_TRAILING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\s+(?:featuring|feat|ft)\b\.?\s+\S.*$").unwrap());

/// One trailing edition/version word, optionally bracketed or dash separated:
/// "Album (Deluxe Edition)", "Album - Remastered", "Album Live"
pub static EDITION_SUFFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)[\s\-–—:,\(\[]+(?:deluxe|remastered|extended|edition|version|live)[\s\)\]]*$")
        .unwrap()
});

/// Album values that mean "no album" rather than a real title.
pub const UNKNOWN_ALBUMS: [&str; 5] = ["unknown", "unknown album", "<unknown>", "null", "-"];

// ============================================================================
// TYPES
// ============================================================================

/// Which per-field rule set applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextField {
    Title,
    Artist,
    Album,
}

/// Output of `normalize`. Only constructed by the normalizer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NormalizedText(String);

impl NormalizedText {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First `k` characters (not bytes).
    pub fn prefix(&self, k: usize) -> &str {
        match self.0.char_indices().nth(k) {
            Some((end, _)) => &self.0[..end],
            None => &self.0,
        }
    }
}

impl Deref for NormalizedText {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NormalizedText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Check if a character is a Unicode combining mark (diacritical mark).
pub fn is_combining_mark(c: char) -> bool {
    matches!(c as u32, 0x0300..=0x036F | 0x1AB0..=0x1AFF | 0x1DC0..=0x1DFF | 0x20D0..=0x20FF | 0xFE20..=0xFE2F)
}

/// Fold Unicode text to ASCII by applying NFKD decomposition and removing
/// combining marks, then transliterating what remains.
/// e.g., "Björk" → "Bjork", "Beyoncé" → "Beyonce"
pub fn fold_to_ascii(s: &str) -> String {
    let stripped: String = s.nfkd().filter(|c| !is_combining_mark(*c)).collect();
    any_ascii(&stripped)
}

/// Keep letters, digits and whitespace only.
fn strip_punctuation(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect()
}

fn strip_article(s: &str) -> String {
    let stripped = ARTICLE_PREFIX.replace(s, "");
    if stripped.trim().is_empty() {
        s.to_string()
    } else {
        stripped.into_owned()
    }
}

fn strip_featuring(s: &str) -> String {
    let result = FEATURING_BRACKETED.replace_all(s, "");
    FEATURING_TRAILING.replace(&result, "").into_owned()
}

/// Remove edition words from the end until none remain, never emptying the value.
fn strip_album_editions(s: &str) -> String {
    let mut result = s.to_string();
    while let Some(m) = EDITION_SUFFIX.find(&result) {
        if result[..m.start()].trim().is_empty() {
            break;
        }
        result.truncate(m.start());
    }
    result
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// True when the raw album value carries no album information.
pub fn is_unknown_album(album: &str) -> bool {
    let lower = album.trim().to_lowercase();
    lower.is_empty() || UNKNOWN_ALBUMS.contains(&lower.as_str())
}

// ============================================================================
// NORMALIZATION FUNCTIONS
// ============================================================================

/// Normalize one metadata value under the rules for `field`.
pub fn normalize(text: &str, field: TextField, config: &MatchConfig) -> NormalizedText {
    let mut result = text.to_string();

    if config.ignore_case {
        result = result.to_lowercase();
    }
    if config.fold_diacritics {
        result = fold_to_ascii(&result);
        // Transliteration can reintroduce capitals
        if config.ignore_case {
            result = result.to_lowercase();
        }
    }

    if config.ignore_punctuation {
        result = strip_punctuation(&result);
    }

    if field == TextField::Artist && config.ignore_artist_prefixes {
        result = strip_article(&result);
    }

    if matches!(field, TextField::Title | TextField::Artist) && config.ignore_featuring {
        result = strip_featuring(&result);
    }

    if field == TextField::Album && config.ignore_album_editions {
        result = strip_album_editions(&result);
    }

    NormalizedText(collapse_whitespace(&result))
}

pub fn normalize_title(title: &str, config: &MatchConfig) -> NormalizedText {
    normalize(title, TextField::Title, config)
}

pub fn normalize_artist(artist: &str, config: &MatchConfig) -> NormalizedText {
    normalize(artist, TextField::Artist, config)
}

pub fn normalize_album(album: &str, config: &MatchConfig) -> NormalizedText {
    normalize(album, TextField::Album, config)
}

/// Normalized fields of one entry, computed once per scan.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedFields {
    pub title: NormalizedText,
    pub artist: NormalizedText,
    /// None when the raw album is empty or a placeholder
    pub album: Option<NormalizedText>,
}

impl NormalizedFields {
    pub fn of(entry: &CatalogEntry, config: &MatchConfig) -> Self {
        Self {
            title: normalize_title(&entry.title, config),
            artist: normalize_artist(&entry.artist, config),
            album: if is_unknown_album(&entry.album) {
                None
            } else {
                Some(normalize_album(&entry.album, config))
            },
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
