//! Field comparison and the pairwise duplicate verdict.
//!
//! Four fields are counted toward `minimum_fields_to_match`: title, artist,
//! album and duration. Album and duration drop out of the count entirely
//! when either side is unknown, so a missing tag never penalizes a true
//! duplicate. Track number is a separate veto evaluated before counting.

use std::fmt::Write as _;

use crate::config::MatchConfig;
use crate::models::{CatalogEntry, Field, FieldOutcome, FieldVerdict};
use crate::normalize::{NormalizedFields, NormalizedText};
use crate::similarity::percent_similarity;

// ============================================================================
// Pair Evaluation
// ============================================================================

/// Full outcome for one pair, used for both control flow and diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct PairEvaluation {
    pub verdicts: [FieldVerdict; 4],
    pub vetoed: bool,
    pub evaluated: u8,
    pub passed: u8,
    pub is_duplicate: bool,
}

// ============================================================================
// Field Tests
// ============================================================================

fn scored(field: Field, a: &NormalizedText, b: &NormalizedText, threshold: u8) -> FieldVerdict {
    let similarity = percent_similarity(a, b);
    FieldVerdict {
        field,
        outcome: FieldOutcome::Scored {
            similarity,
            threshold,
            passed: similarity >= threshold,
        },
    }
}

fn album_verdict(a: &NormalizedFields, b: &NormalizedFields, config: &MatchConfig) -> FieldVerdict {
    match (&a.album, &b.album) {
        (Some(x), Some(y)) => scored(Field::Album, x, y, config.album_threshold),
        _ => FieldVerdict {
            field: Field::Album,
            outcome: FieldOutcome::Excluded,
        },
    }
}

/// Duration test: the allowed gap is the larger of the absolute and the
/// relative tolerance for this pair.
pub fn duration_verdict(a: &CatalogEntry, b: &CatalogEntry, config: &MatchConfig) -> FieldVerdict {
    let outcome = match (a.known_duration(), b.known_duration()) {
        (Some(d1), Some(d2)) => {
            let diff_secs = (d1 - d2).abs();
            let allowed_secs = config
                .duration_tolerance_secs
                .max(config.duration_tolerance_fraction * d1.max(d2));
            FieldOutcome::Duration {
                diff_secs,
                allowed_secs,
                passed: diff_secs <= allowed_secs,
            }
        }
        _ => FieldOutcome::Excluded,
    };
    FieldVerdict {
        field: Field::Duration,
        outcome,
    }
}

/// Hard veto: both track numbers present, nonzero and different while the
/// config requires exact track numbers.
pub fn track_number_veto(a: &CatalogEntry, b: &CatalogEntry, config: &MatchConfig) -> bool {
    if !config.require_exact_track_number {
        return false;
    }
    match (a.track_number, b.track_number) {
        (Some(x), Some(y)) => x != 0 && y != 0 && x != y,
        _ => false,
    }
}

/// The four counted verdicts, in title/artist/album/duration order.
pub fn compare_fields(
    a: &CatalogEntry,
    na: &NormalizedFields,
    b: &CatalogEntry,
    nb: &NormalizedFields,
    config: &MatchConfig,
) -> [FieldVerdict; 4] {
    [
        scored(Field::Title, &na.title, &nb.title, config.title_threshold),
        scored(Field::Artist, &na.artist, &nb.artist, config.artist_threshold),
        album_verdict(na, nb, config),
        duration_verdict(a, b, config),
    ]
}

/// Evaluate a pair whose fields were normalized up front.
pub fn evaluate_prepared(
    a: &CatalogEntry,
    na: &NormalizedFields,
    b: &CatalogEntry,
    nb: &NormalizedFields,
    config: &MatchConfig,
) -> PairEvaluation {
    let vetoed = track_number_veto(a, b, config);
    let verdicts = compare_fields(a, na, b, nb, config);

    let evaluated = verdicts.iter().filter(|v| v.is_evaluated()).count() as u8;
    let passed = verdicts.iter().filter(|v| v.passed()).count() as u8;

    PairEvaluation {
        verdicts,
        vetoed,
        evaluated,
        passed,
        // Fewer evaluable fields than the minimum can never qualify
        is_duplicate: !vetoed && passed >= config.minimum_fields_to_match,
    }
}

/// Hot-path verdict: the veto short-circuits before any string scoring.
pub fn is_duplicate_prepared(
    a: &CatalogEntry,
    na: &NormalizedFields,
    b: &CatalogEntry,
    nb: &NormalizedFields,
    config: &MatchConfig,
) -> bool {
    if track_number_veto(a, b, config) {
        return false;
    }
    let passed = compare_fields(a, na, b, nb, config)
        .iter()
        .filter(|v| v.passed())
        .count() as u8;
    passed >= config.minimum_fields_to_match
}

// ============================================================================
// Public Oracle
// ============================================================================

/// Evaluate a pair from raw entries.
pub fn evaluate_pair(a: &CatalogEntry, b: &CatalogEntry, config: &MatchConfig) -> PairEvaluation {
    let na = NormalizedFields::of(a, config);
    let nb = NormalizedFields::of(b, config);
    evaluate_prepared(a, &na, b, &nb, config)
}

/// Whether two entries are the same recording under `config`.
///
/// Entries sharing an identity key are the same catalog row and are never
/// compared; they are reported as not duplicates of each other.
pub fn are_duplicates(a: &CatalogEntry, b: &CatalogEntry, config: &MatchConfig) -> bool {
    if a.key == b.key {
        return false;
    }
    if track_number_veto(a, b, config) {
        return false;
    }
    let na = NormalizedFields::of(a, config);
    let nb = NormalizedFields::of(b, config);
    is_duplicate_prepared(a, &na, b, &nb, config)
}

/// Human-readable report of every field score and the final verdict.
pub fn similarity_breakdown(a: &CatalogEntry, b: &CatalogEntry, config: &MatchConfig) -> String {
    let eval = evaluate_pair(a, b, config);
    let mut out = String::new();

    let _ = writeln!(out, "Comparing '{}' vs '{}'", a.key, b.key);
    for verdict in &eval.verdicts {
        let label = format!("{}:", verdict.field.label());
        let _ = match verdict.outcome {
            FieldOutcome::Scored {
                similarity,
                threshold,
                passed,
            } => writeln!(
                out,
                "  {:<10}{:>3}% (threshold {}%) {}",
                label,
                similarity,
                threshold,
                pass_fail(passed)
            ),
            FieldOutcome::Duration {
                diff_secs,
                allowed_secs,
                passed,
            } => writeln!(
                out,
                "  {:<10}diff {:.1}s (allowed {:.1}s) {}",
                label,
                diff_secs,
                allowed_secs,
                pass_fail(passed)
            ),
            FieldOutcome::Excluded => writeln!(out, "  {:<10}N/A (excluded)", label),
        };
    }

    let track_status = if !config.require_exact_track_number {
        "not required".to_string()
    } else if eval.vetoed {
        format!(
            "VETO ({} vs {})",
            a.track_number.unwrap_or(0),
            b.track_number.unwrap_or(0)
        )
    } else {
        "OK".to_string()
    };
    let _ = writeln!(out, "  {:<10}{}", "Track #:", track_status);

    let _ = writeln!(
        out,
        "  Fields passed: {}/{} evaluated (minimum {})",
        eval.passed, eval.evaluated, config.minimum_fields_to_match
    );
    let _ = write!(
        out,
        "  Verdict: {}",
        if eval.is_duplicate {
            "DUPLICATE"
        } else {
            "NOT DUPLICATE"
        }
    );
    out
}

fn pass_fail(passed: bool) -> &'static str {
    if passed {
        "PASS"
    } else {
        "FAIL"
    }
}
