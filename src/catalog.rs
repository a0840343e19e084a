//! Catalog store boundary and the SQLite-backed store.
//!
//! The engine asks a store for either every entry or a loosely filtered
//! subset that could plausibly duplicate one target entry. The loose query
//! only narrows what gets materialized; fuzzy scoring still decides. When
//! the loose query fails the engine falls back to every entry and logs it.
//!
//! The SQLite store evaluates the blocking signals inside the query through
//! two scalar functions backed by the Rust normalizer, so its loose subset
//! holds every entry that in-memory blocking would pair with the target.

use rusqlite::functions::{Context, FunctionFlags};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use std::path::Path;
use std::time::Instant;

use crate::blocking::{duration_bucket, BlockingKey, ScanMode};
use crate::compare::are_duplicates;
use crate::config::MatchConfig;
use crate::error::{EngineError, Result};
use crate::grouping::{group_duplicates_with, GroupingReport};
use crate::models::{usable_duration, CatalogEntry, ScanStats};
use crate::normalize::{normalize, NormalizedFields, TextField};

// ============================================================================
// Store Boundary
// ============================================================================

/// Entries handed over by a store, plus rows it had to drop.
#[derive(Debug, Clone, Default)]
pub struct CatalogLoad {
    pub entries: Vec<CatalogEntry>,
    /// Rows without an identity key; surfaced, never silently dropped
    pub skipped_rows: usize,
}

pub trait CatalogStore {
    /// Every entry in the catalog.
    fn all_entries(&self) -> Result<CatalogLoad>;

    /// A loose superset of the entries that could duplicate `target`.
    fn loose_candidates(&self, target: &CatalogEntry, config: &MatchConfig) -> Result<CatalogLoad>;
}

// ============================================================================
// SQLite Store
// ============================================================================

const SELECT_COLUMNS: &str =
    "SELECT path, title, artist, album, track_number, duration, bitrate FROM tracks";

/// Read-only view of a `tracks(path, title, artist, album, track_number,
/// duration, bitrate)` table.
pub struct SqliteCatalog {
    conn: Connection,
}

impl SqliteCatalog {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.execute_batch(
            "PRAGMA cache_size = -64000;
             PRAGMA temp_store = MEMORY;",
        )?;
        Ok(Self { conn })
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }

    /// One entry by identity key, without loading the rest of the catalog.
    pub fn entry_by_key(&self, key: &str) -> Result<Option<CatalogEntry>> {
        let sql = format!("{SELECT_COLUMNS} WHERE path = ?1 LIMIT 1");
        let entry = self
            .conn
            .query_row(&sql, params![key], read_entry)
            .optional()?;
        Ok(entry.flatten())
    }

    /// (Re)register `dedupe_normalize(text, field)` and
    /// `dedupe_bucket(duration)` for the given config.
    fn register_functions(&self, config: &MatchConfig) -> Result<()> {
        let flags = FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC;

        let norm_config = config.clone();
        self.conn
            .create_scalar_function("dedupe_normalize", 2, flags, move |ctx| {
                let text: Option<String> = ctx.get(0)?;
                let field = text_field(ctx)?;
                Ok(normalize(text.as_deref().unwrap_or(""), field, &norm_config).to_string())
            })?;

        let bucket_secs = config.duration_bucket_secs;
        self.conn
            .create_scalar_function("dedupe_bucket", 1, flags, move |ctx| {
                let secs: Option<f64> = ctx.get(0)?;
                Ok(secs
                    .and_then(usable_duration)
                    .map(|d| duration_bucket(d, bucket_secs)))
            })?;
        Ok(())
    }

    fn collect(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<CatalogLoad> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query(params)?;
        let mut load = CatalogLoad::default();

        while let Some(row) = rows.next()? {
            match read_entry(row)? {
                Some(entry) => load.entries.push(entry),
                None => load.skipped_rows += 1,
            }
        }

        if load.skipped_rows > 0 {
            tracing::warn!(
                skipped = load.skipped_rows,
                "catalog rows without an identity key were skipped"
            );
        }
        Ok(load)
    }
}

/// Map one row; None when the identity key is NULL or blank.
fn read_entry(row: &Row<'_>) -> rusqlite::Result<Option<CatalogEntry>> {
    let key: Option<String> = row.get(0)?;
    let key = match key {
        Some(k) if !k.trim().is_empty() => k,
        _ => return Ok(None),
    };
    let track_number: Option<i64> = row.get(4)?;
    let duration: Option<f64> = row.get(5)?;
    let bitrate: Option<i64> = row.get(6)?;

    Ok(Some(CatalogEntry {
        key,
        title: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
        artist: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        album: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        track_number: track_number.and_then(|n| u32::try_from(n).ok()),
        duration_secs: duration,
        bitrate_kbps: bitrate.and_then(|b| u32::try_from(b).ok()),
    }))
}

fn text_field(ctx: &Context<'_>) -> rusqlite::Result<TextField> {
    let name: String = ctx.get(1)?;
    match name.as_str() {
        "title" => Ok(TextField::Title),
        "artist" => Ok(TextField::Artist),
        "album" => Ok(TextField::Album),
        other => Err(rusqlite::Error::UserFunctionError(
            format!("unknown text field '{other}'").into(),
        )),
    }
}

/// Blank signals bind as NULL, which never compares equal.
fn non_empty(value: &str) -> Option<&str> {
    (!value.is_empty()).then_some(value)
}

impl CatalogStore for SqliteCatalog {
    fn all_entries(&self) -> Result<CatalogLoad> {
        self.collect(&format!("{SELECT_COLUMNS} ORDER BY rowid"), &[])
    }

    fn loose_candidates(&self, target: &CatalogEntry, config: &MatchConfig) -> Result<CatalogLoad> {
        self.register_functions(config)?;

        let norm = NormalizedFields::of(target, config);
        let key = BlockingKey::of(target, &norm, config);
        let (bucket_low, bucket_high) = match key.duration_bucket {
            Some(b) => (Some(b.saturating_sub(1)), Some(b.saturating_add(1))),
            None => (None, None),
        };
        let (artist, album) = match &key.artist_album {
            Some((artist, album)) => (Some(artist.as_str()), Some(album.as_str())),
            None => (None, None),
        };

        // SUBSTR counts characters, as NormalizedText::prefix does.
        // NULL parameters disable their branch.
        let sql = format!(
            "{SELECT_COLUMNS}
             WHERE SUBSTR(dedupe_normalize(title, 'title'), 1, ?1) = ?2
                OR SUBSTR(dedupe_normalize(artist, 'artist'), 1, ?1) = ?3
                OR dedupe_bucket(duration) BETWEEN ?4 AND ?5
                OR (dedupe_normalize(artist, 'artist') = ?6
                    AND album IS NOT NULL
                    AND dedupe_normalize(album, 'album') = ?7)
             ORDER BY rowid"
        );
        self.collect(
            &sql,
            params![
                config.blocking_prefix_len as i64,
                non_empty(&key.title_prefix),
                non_empty(&key.artist_prefix),
                bucket_low,
                bucket_high,
                artist,
                album
            ],
        )
    }
}

// ============================================================================
// Store-Driven Queries
// ============================================================================

/// Matches for one target entry, found through the store's loose query.
#[derive(Debug, Clone)]
pub struct DuplicateLookup {
    pub matches: Vec<CatalogEntry>,
    pub skipped_rows: usize,
    pub stats: ScanStats,
}

/// Entries in `store` that are duplicates of `target`.
///
/// A failed loose query degrades to a scan of every entry; it is not retried.
pub fn find_duplicates_of(
    target: &CatalogEntry,
    store: &dyn CatalogStore,
    config: &MatchConfig,
) -> Result<DuplicateLookup> {
    config.validate()?;
    if target.key.trim().is_empty() {
        return Err(EngineError::MissingIdentityKey { index: 0 });
    }
    let start = Instant::now();
    let mut stats = ScanStats::default();

    let load = match store.loose_candidates(target, config) {
        Ok(load) => load,
        Err(e) => {
            tracing::warn!(error = %e, "loose candidate query failed, scanning full catalog");
            stats.store_fallback = true;
            store.all_entries()?
        }
    };

    stats.entries = load.entries.len();
    let mut matches = Vec::new();
    for entry in load.entries {
        if entry.key == target.key {
            continue;
        }
        stats.candidate_pairs += 1;
        stats.pairs_compared += 1;
        if are_duplicates(target, &entry, config) {
            stats.matching_pairs += 1;
            matches.push(entry);
        }
    }
    stats.elapsed_seconds = start.elapsed().as_secs_f64();
    stats.log_phase("lookup");

    Ok(DuplicateLookup {
        matches,
        skipped_rows: load.skipped_rows,
        stats,
    })
}

/// Load every entry from `store` and group them.
pub fn group_catalog(
    store: &dyn CatalogStore,
    config: &MatchConfig,
    mode: ScanMode,
) -> Result<(CatalogLoad, GroupingReport)> {
    config.validate()?;
    let load = store.all_entries()?;
    let report = group_duplicates_with(&load.entries, config, mode)?;
    Ok((load, report))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_catalog() -> SqliteCatalog {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE tracks (
                path TEXT,
                title TEXT,
                artist TEXT,
                album TEXT,
                track_number INTEGER,
                duration REAL,
                bitrate INTEGER
            );
            INSERT INTO tracks VALUES ('/m/a.mp3', 'Hotel California', 'Eagles', 'Hotel California', 1, 391.0, 320);
            INSERT INTO tracks VALUES ('/m/b.flac', 'Hotel California (Remastered)', 'Eagles ft. Someone', 'Hotel California', 1, 395.0, 900);
            INSERT INTO tracks VALUES ('/m/c.mp3', 'Take It Easy', 'Eagles', 'Eagles', 1, 211.0, 192);
            INSERT INTO tracks VALUES ('/m/d.mp3', 'Roxanne', 'The Police', NULL, NULL, 1000.0, NULL);
            INSERT INTO tracks VALUES (NULL, 'Orphan', 'Nobody', NULL, NULL, NULL, NULL);",
        )
        .unwrap();
        SqliteCatalog::from_connection(conn)
    }

    struct BrokenLooseQuery(SqliteCatalog);

    impl CatalogStore for BrokenLooseQuery {
        fn all_entries(&self) -> Result<CatalogLoad> {
            self.0.all_entries()
        }

        fn loose_candidates(&self, _target: &CatalogEntry, _config: &MatchConfig) -> Result<CatalogLoad> {
            Err(EngineError::Store(rusqlite::Error::InvalidQuery))
        }
    }

    #[test]
    fn test_all_entries_skips_null_keys() {
        let load = memory_catalog().all_entries().unwrap();
        assert_eq!(load.entries.len(), 4);
        assert_eq!(load.skipped_rows, 1);

        let roxanne = &load.entries[3];
        assert_eq!(roxanne.album, "");
        assert_eq!(roxanne.track_number, None);
        assert_eq!(roxanne.bitrate_kbps, None);
    }

    #[test]
    fn test_loose_candidates_prefilter() {
        let store = memory_catalog();
        let target = CatalogEntry::new("/new.mp3", "Hotel California", "Eagles", "Hotel California")
            .with_duration(390.0);
        let load = store.loose_candidates(&target, &MatchConfig::default()).unwrap();
        let keys: Vec<&str> = load.entries.iter().map(|e| e.key.as_str()).collect();
        // Roxanne shares nothing with the target
        assert_eq!(keys, vec!["/m/a.mp3", "/m/b.flac", "/m/c.mp3"]);
    }

    fn catalog_with(rows: &str) -> SqliteCatalog {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(&format!(
            "CREATE TABLE tracks (
                path TEXT, title TEXT, artist TEXT, album TEXT,
                track_number INTEGER, duration REAL, bitrate INTEGER
            );
            {rows}"
        ))
        .unwrap();
        SqliteCatalog::from_connection(conn)
    }

    fn two_field_config() -> MatchConfig {
        MatchConfig {
            minimum_fields_to_match: 2,
            ..MatchConfig::default()
        }
    }

    #[test]
    fn test_loose_candidates_fold_non_ascii_titles() {
        let store = catalog_with(
            "INSERT INTO tracks VALUES ('/m/edith.mp3', 'Édith Song', 'Zedd', NULL, NULL, NULL, NULL);
             INSERT INTO tracks VALUES ('/m/other.mp3', 'Other Song', 'Someone', NULL, NULL, NULL, NULL);",
        );
        let config = two_field_config();
        let target = CatalogEntry::new("/new.mp3", "Édith Song", "Zed", "");

        let load = store.loose_candidates(&target, &config).unwrap();
        let keys: Vec<&str> = load.entries.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["/m/edith.mp3"]);

        let lookup = find_duplicates_of(&target, &store, &config).unwrap();
        assert_eq!(lookup.matches.len(), 1);
        assert!(!lookup.stats.store_fallback);
    }

    #[test]
    fn test_loose_candidates_match_normalized_prefixes() {
        let store = catalog_with(
            "INSERT INTO tracks VALUES ('/m/1.mp3', 'Don''t Stop Me Now!', 'Queen', NULL, NULL, NULL, NULL);
             INSERT INTO tracks VALUES ('/m/2.mp3', 'Somebody', 'The Beatles', NULL, NULL, NULL, NULL);
             INSERT INTO tracks VALUES ('/m/3.mp3', 'Other', 'Nobody', 'Greatest Hits (Deluxe Edition)', NULL, NULL, NULL);",
        );
        let config = two_field_config();
        let target = CatalogEntry::new("/new.mp3", "dont stop me now", "Beatles", "");
        let load = store.loose_candidates(&target, &config).unwrap();
        let keys: Vec<&str> = load.entries.iter().map(|e| e.key.as_str()).collect();
        // Punctuation and the leading article are gone before the prefix is cut
        assert_eq!(keys, vec!["/m/1.mp3", "/m/2.mp3"]);

        let lookup = find_duplicates_of(
            &CatalogEntry::new("/new.mp3", "Dont Stop Me Now", "Qeen", ""),
            &store,
            &config,
        )
        .unwrap();
        let keys: Vec<&str> = lookup.matches.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["/m/1.mp3"]);
    }

    #[test]
    fn test_loose_candidates_duration_buckets() {
        let store = catalog_with(
            "INSERT INTO tracks VALUES ('/m/1.mp3', 'Zebra', 'Xylo', NULL, NULL, 1e300, NULL);
             INSERT INTO tracks VALUES ('/m/2.mp3', 'Quiet', 'Vance', NULL, NULL, 200.0, NULL);
             INSERT INTO tracks VALUES ('/m/3.mp3', 'Lunar', 'Wolf', NULL, NULL, 250.0, NULL);
             INSERT INTO tracks VALUES ('/m/4.mp3', 'Polar', 'Umber', NULL, NULL, 300.0, NULL);",
        );
        let config = MatchConfig::default();
        let keys_for = |target: CatalogEntry| -> Vec<String> {
            let load = store.loose_candidates(&target, &config).unwrap();
            load.entries.into_iter().map(|e| e.key).collect()
        };

        // 215s sits in bucket 7; 250s is the adjacent bucket 8, 300s is bucket 10
        assert_eq!(
            keys_for(CatalogEntry::new("/new.mp3", "Outro", "Nobody", "").with_duration(215.0)),
            vec!["/m/2.mp3", "/m/3.mp3"]
        );
        // Huge durations share the saturated bucket
        assert_eq!(
            keys_for(CatalogEntry::new("/new.mp3", "Outro", "Nobody", "").with_duration(2e300)),
            vec!["/m/1.mp3"]
        );
    }

    #[test]
    fn test_entry_by_key() {
        let store = memory_catalog();
        let entry = store.entry_by_key("/m/c.mp3").unwrap().unwrap();
        assert_eq!(entry.title, "Take It Easy");
        assert_eq!(entry.duration_secs, Some(211.0));
        assert!(store.entry_by_key("/m/missing.mp3").unwrap().is_none());
    }

    #[test]
    fn test_find_duplicates_of() {
        let store = memory_catalog();
        let target = CatalogEntry::new("/m/a.mp3", "Hotel California", "Eagles", "Hotel California")
            .with_duration(391.0);
        let lookup = find_duplicates_of(&target, &store, &MatchConfig::default()).unwrap();
        let keys: Vec<&str> = lookup.matches.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["/m/b.flac"]);
        assert!(!lookup.stats.store_fallback);
    }

    #[test]
    fn test_failed_loose_query_falls_back() {
        let store = BrokenLooseQuery(memory_catalog());
        let target = CatalogEntry::new("/m/a.mp3", "Hotel California", "Eagles", "Hotel California")
            .with_duration(391.0);
        let lookup = find_duplicates_of(&target, &store, &MatchConfig::default()).unwrap();
        assert!(lookup.stats.store_fallback);
        assert_eq!(lookup.matches.len(), 1);
        assert_eq!(lookup.skipped_rows, 1);
        assert_eq!(lookup.stats.entries, 4);
    }

    #[test]
    fn test_group_catalog() {
        let store = memory_catalog();
        let (load, report) = group_catalog(&store, &MatchConfig::default(), ScanMode::Blocked).unwrap();
        assert_eq!(load.skipped_rows, 1);
        assert_eq!(report.groups.len(), 1);
        assert_eq!(
            report.groups[0].members,
            vec!["/m/a.mp3".to_string(), "/m/b.flac".to_string()]
        );
        assert_eq!(report.groups[0].keeper(&load.entries).unwrap().key, "/m/b.flac");
    }
}
