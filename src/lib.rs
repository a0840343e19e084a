//! Fuzzy duplicate detection for music catalogs - shared modules for all binaries.

pub mod blocking;
pub mod catalog;
pub mod compare;
pub mod config;
pub mod error;
pub mod grouping;
pub mod models;
pub mod normalize;
pub mod progress;
pub mod safety;
pub mod scanner;
pub mod similarity;

pub use blocking::ScanMode;
pub use catalog::{find_duplicates_of, group_catalog, CatalogLoad, CatalogStore, SqliteCatalog};
pub use compare::{are_duplicates, evaluate_pair, similarity_breakdown, PairEvaluation};
pub use config::{MatchConfig, MatchProfiles};
pub use error::{EngineError, Result};
pub use grouping::{find_fuzzy_duplicates, group_duplicates, group_duplicates_with, GroupingReport};
pub use models::{CatalogEntry, DuplicateGroup, ScanStats};
pub use normalize::{normalize, NormalizedText, TextField};
pub use scanner::{CancellationToken, ParallelScanner, ScanEvent, ScanHandle, ScanOutcome, ScanSummary};
pub use similarity::{jaro_winkler_similarity, levenshtein_distance, percent_similarity};
