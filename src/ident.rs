//! Identifier normalization.
//!
//! Turns a translated (or already-English) phrase into a PostgreSQL-safe
//! identifier: lowercase snake_case, restricted alphabet, length-bounded,
//! with a deterministic hash suffix when truncation is needed. Everything in
//! this module is pure so it can be tested without a network or a database.

use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::OnceLock;

/// PostgreSQL truncates identifiers beyond 63 bytes.
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Sentinel returned when normalization consumes the whole phrase.
pub const UNNAMED: &str = "unnamed";

/// Hex digits appended (after an underscore) when truncating.
const HASH_LEN: usize = 8;

static IDENTIFIER_REGEX: OnceLock<Regex> = OnceLock::new();

/// Check a string against the storage engine's identifier grammar.
pub fn is_valid_identifier(s: &str) -> bool {
    let regex =
        IDENTIFIER_REGEX.get_or_init(|| Regex::new(r"^[a-z_][a-z0-9_]*$").unwrap());
    !s.is_empty() && s.len() <= MAX_IDENTIFIER_LEN && regex.is_match(s)
}

/// Deterministic 8-hex-digit digest of arbitrary text.
///
/// A stability id, not a security primitive: it only needs to make
/// truncation collisions unlikely while staying reproducible.
pub fn short_hash(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    digest[..HASH_LEN / 2]
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Normalize a phrase into a valid, length-bounded identifier.
///
/// The phrase may come from any translation tier or may already be English;
/// the same steps apply regardless. `prefix` is prepended (joined with an
/// underscore) unless the slug already starts with it. When the result
/// exceeds `max_len` it is truncated and suffixed with a hash of the
/// *original* phrase, so equal inputs always truncate to equal outputs.
pub fn to_identifier(phrase: &str, prefix: Option<&str>, max_len: usize) -> String {
    let mut slug = String::with_capacity(phrase.len());
    let mut last_was_sep = true; // swallow leading separators

    for ch in phrase.to_lowercase().chars() {
        match ch {
            'a'..='z' | '0'..='9' => {
                slug.push(ch);
                last_was_sep = false;
            }
            ' ' | '-' | '_' => {
                if !last_was_sep {
                    slug.push('_');
                    last_was_sep = true;
                }
            }
            // Everything outside [a-z0-9 _-] is stripped.
            _ => {}
        }
    }
    while slug.ends_with('_') {
        slug.pop();
    }

    if let Some(prefix) = prefix {
        if !prefix.is_empty() && !slug.starts_with(prefix) {
            slug = if slug.is_empty() {
                prefix.to_string()
            } else {
                format!("{}_{}", prefix, slug)
            };
        }
    }

    if slug.is_empty() {
        return UNNAMED.to_string();
    }

    if !slug.starts_with(|c: char| c.is_ascii_lowercase() || c == '_') {
        slug.insert(0, '_');
    }

    if slug.len() > max_len {
        let hash = short_hash(phrase);
        if max_len <= HASH_LEN + 1 {
            return hash[..max_len.min(HASH_LEN)].to_string();
        }
        slug.truncate(max_len - HASH_LEN - 1);
        while slug.ends_with('_') {
            slug.pop();
        }
        slug.push('_');
        slug.push_str(&hash);
    }

    slug
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    // ==================== Grammar Tests ====================

    #[test]
    fn test_is_valid_identifier_accepts_snake_case() {
        assert!(is_valid_identifier("contact_form"));
        assert!(is_valid_identifier("_internal"));
        assert!(is_valid_identifier("a1_b2"));
    }

    #[test]
    fn test_is_valid_identifier_rejects_bad_input() {
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier("1starts_with_digit"));
        assert!(!is_valid_identifier("Mixed_Case"));
        assert!(!is_valid_identifier("has space"));
        assert!(!is_valid_identifier("has-dash"));
        assert!(!is_valid_identifier(&"x".repeat(MAX_IDENTIFIER_LEN + 1)));
    }

    // ==================== Normalization Tests ====================

    #[test]
    fn test_to_identifier_basic_phrase() {
        assert_eq!(to_identifier("Contact Form", None, 63), "contact_form");
    }

    #[test]
    fn test_to_identifier_collapses_separator_runs() {
        assert_eq!(to_identifier("a  - -  b", None, 63), "a_b");
        assert_eq!(to_identifier("a___b", None, 63), "a_b");
    }

    #[test]
    fn test_to_identifier_trims_edge_underscores() {
        assert_eq!(to_identifier("  -contact form- ", None, 63), "contact_form");
    }

    #[test]
    fn test_to_identifier_strips_foreign_characters() {
        // Untranslated Thai has no representable characters left.
        assert_eq!(to_identifier("แบบฟอร์ม", None, 63), UNNAMED);
        // Mixed input keeps the ASCII part.
        assert_eq!(to_identifier("แบบ form", None, 63), "form");
    }

    #[test]
    fn test_to_identifier_prefix() {
        assert_eq!(to_identifier("age", Some("fld"), 63), "fld_age");
        // Already-prefixed slugs are not double-prefixed.
        assert_eq!(to_identifier("fld_age", Some("fld"), 63), "fld_age");
        // Prefix alone when the phrase strips to nothing.
        assert_eq!(to_identifier("ฟอร์ม", Some("fld"), 63), "fld");
    }

    #[test]
    fn test_to_identifier_leading_digit_gets_underscore() {
        assert_eq!(to_identifier("2nd visit", None, 63), "_2nd_visit");
    }

    #[test]
    fn test_to_identifier_empty_returns_sentinel() {
        assert_eq!(to_identifier("", None, 63), UNNAMED);
        assert_eq!(to_identifier("!!!", None, 63), UNNAMED);
    }

    // ==================== Truncation Tests ====================

    #[test]
    fn test_to_identifier_truncates_with_hash() {
        let long = "a very long field label that keeps going and going and going well past the limit";
        let ident = to_identifier(long, None, 63);

        assert_eq!(ident.len(), 63);
        assert!(is_valid_identifier(&ident));
        assert!(ident.ends_with(&short_hash(long)));
    }

    #[test]
    fn test_truncation_hash_is_of_original_not_truncated() {
        // Two phrases sharing a 54-char prefix must not collide.
        let base = "shared prefix shared prefix shared prefix shared prefix";
        let a = format!("{} tail one", base);
        let b = format!("{} tail two", base);

        let ia = to_identifier(&a, None, 63);
        let ib = to_identifier(&b, None, 63);
        assert_ne!(ia, ib);
    }

    #[test]
    fn test_truncation_is_reproducible() {
        let long = "x".repeat(200);
        assert_eq!(to_identifier(&long, None, 63), to_identifier(&long, None, 63));
    }

    // ==================== Hash Tests ====================

    #[test]
    fn test_short_hash_is_deterministic() {
        assert_eq!(short_hash("แบบฟอร์มติดต่อ"), short_hash("แบบฟอร์มติดต่อ"));
        assert_ne!(short_hash("a"), short_hash("b"));
    }

    #[test]
    fn test_short_hash_is_lower_hex() {
        let h = short_hash("anything");
        assert_eq!(h.len(), 8);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    // ==================== Properties ====================

    proptest! {
        #[test]
        fn prop_output_matches_grammar(phrase in "\\PC{0,120}", max in 12usize..=63) {
            let ident = to_identifier(&phrase, None, max);
            prop_assert!(ident.len() <= max.max(UNNAMED.len()));
            prop_assert!(
                is_valid_identifier(&ident) || ident == UNNAMED,
                "bad identifier {:?} from {:?}", ident, phrase
            );
        }

        #[test]
        fn prop_deterministic(phrase in "\\PC{0,120}") {
            prop_assert_eq!(
                to_identifier(&phrase, None, 63),
                to_identifier(&phrase, None, 63)
            );
        }

        #[test]
        fn prop_idempotent(phrase in "\\PC{0,120}") {
            let once = to_identifier(&phrase, None, 63);
            let twice = to_identifier(&once, None, 63);
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn prop_valid_ascii_round_trips(ident in "[a-z][a-z0-9]{0,20}(_[a-z0-9]{1,8}){0,4}") {
            prop_assert_eq!(to_identifier(&ident, None, 63), ident);
        }
    }
}
