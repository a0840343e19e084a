//! String similarity primitives over normalized metadata.
//!
//! Thin wrappers around `strsim` that pin down the edge cases the engine
//! depends on (empty inputs, percent rounding, argument order).

/// Jaro-Winkler similarity in [0, 1].
///
/// Equal strings (including two empty strings) score 1.0; exactly one empty
/// string scores 0.0. Prefix bonus covers up to 4 characters at 0.1.
pub fn jaro_winkler_similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    strsim::jaro_winkler(a, b).clamp(0.0, 1.0)
}

/// Unit-cost edit distance (insert, delete, substitute) in characters.
pub fn levenshtein_distance(a: &str, b: &str) -> usize {
    strsim::levenshtein(a, b)
}

/// `round(jaro_winkler * 100)`.
///
/// Arguments are put in a canonical order first so that the score, and
/// every verdict built on it, is symmetric.
pub fn percent_similarity(a: &str, b: &str) -> u8 {
    let (first, second) = if a <= b { (a, b) } else { (b, a) };
    (jaro_winkler_similarity(first, second) * 100.0).round() as u8
}

/// Edit-distance similarity as a percentage of the longer string.
pub fn levenshtein_percent(a: &str, b: &str) -> u8 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 100;
    }
    let dist = levenshtein_distance(a, b);
    (100.0 * (1.0 - dist as f64 / max_len as f64)).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_and_empty() {
        assert_eq!(jaro_winkler_similarity("eagles", "eagles"), 1.0);
        assert_eq!(jaro_winkler_similarity("", ""), 1.0);
        assert_eq!(jaro_winkler_similarity("", "eagles"), 0.0);
        assert_eq!(jaro_winkler_similarity("eagles", ""), 0.0);
    }

    #[test]
    fn test_known_values() {
        // Classic textbook pair
        let jw = jaro_winkler_similarity("martha", "marhta");
        assert!((jw - 0.9611).abs() < 1e-3, "got {}", jw);

        let jw = jaro_winkler_similarity("dwayne", "duane");
        assert!((jw - 0.84).abs() < 1e-2, "got {}", jw);
    }

    #[test]
    fn test_percent_similarity_suffix() {
        assert_eq!(
            percent_similarity("hotel california", "hotel california remastered"),
            92
        );
        assert_eq!(percent_similarity("abc", "xyz"), 0);
        assert_eq!(percent_similarity("", ""), 100);
    }

    #[test]
    fn test_levenshtein_basic() {
        assert_eq!(levenshtein_distance("kitten", "sitting"), 3);
        assert_eq!(levenshtein_distance("", "abc"), 3);
        assert_eq!(levenshtein_distance("abc", "abc"), 0);
        assert_eq!(levenshtein_distance("flaw", "lawn"), 2);
        // Counted in characters, not bytes
        assert_eq!(levenshtein_distance("björk", "bjork"), 1);
    }

    #[test]
    fn test_levenshtein_percent() {
        assert_eq!(levenshtein_percent("", ""), 100);
        assert_eq!(levenshtein_percent("abcd", "abcx"), 75);
        assert_eq!(levenshtein_percent("abc", ""), 0);
    }
}
