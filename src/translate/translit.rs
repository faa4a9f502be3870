//! Transliteration detection.
//!
//! A translation provider that cannot find a real translation sometimes
//! returns a phonetic (sound-alike) romanization of the Thai input instead,
//! e.g. "baep fom tit to" for "แบบฟอร์มติดต่อ". Turning that into a column
//! name produces gibberish identifiers, so flagged results are treated as
//! tier failures and the chain falls through.
//!
//! This is a heuristic classifier, not a language model: it looks for
//! consonant clusters and Thai-romanization digraph patterns, gated by the
//! candidate being roughly the same length as the source.

use regex::Regex;
use std::sync::OnceLock;

static DIGRAPH_PREFIX_REGEX: OnceLock<Regex> = OnceLock::new();

/// Common English words that begin with the same digraphs Thai
/// romanization uses. Checked before a word counts as suspicious.
const ENGLISH_DIGRAPH_WORDS: &[&str] = &[
    "the", "this", "that", "these", "those", "then", "than", "they", "them", "their", "there",
    "theme", "theory", "therapy", "thumb", "phone", "photo", "phase", "physical", "pharmacy",
    "phrase",
];

/// Classify `candidate` as a transliteration of `source` rather than a
/// translation.
pub fn looks_transliterated(source: &str, candidate: &str) -> bool {
    let candidate = candidate.trim();
    if candidate.is_empty() {
        return false;
    }

    // Four consecutive consonants never come out of the curated dictionary
    // or a genuine English translation of a form label.
    if max_consonant_run(candidate) >= 4 {
        return true;
    }

    let words: Vec<&str> = candidate
        .split(|c: char| !c.is_ascii_alphabetic())
        .filter(|w| !w.is_empty())
        .collect();
    if words.is_empty() {
        return false;
    }

    let suspicious = words.iter().filter(|w| is_suspicious_word(w)).count();

    // Romanization converts every syllable, so most words look Thai-shaped
    // and the output stays close to the source length.
    suspicious * 2 >= words.len() && length_ratio_close(source, candidate)
}

/// Longest run of ASCII consonants ('y' counts as a vowel).
fn max_consonant_run(text: &str) -> usize {
    let mut longest = 0;
    let mut current = 0;

    for ch in text.chars() {
        let lower = ch.to_ascii_lowercase();
        if lower.is_ascii_alphabetic() && !matches!(lower, 'a' | 'e' | 'i' | 'o' | 'u' | 'y') {
            current += 1;
            longest = longest.max(current);
        } else {
            current = 0;
        }
    }

    longest
}

fn is_suspicious_word(word: &str) -> bool {
    let lower = word.to_ascii_lowercase();
    if ENGLISH_DIGRAPH_WORDS.contains(&lower.as_str()) {
        return false;
    }

    let prefix_regex = DIGRAPH_PREFIX_REGEX
        .get_or_init(|| Regex::new(r"^(kh|th|ph)[aeiou]").unwrap());
    if prefix_regex.is_match(&lower) {
        return true;
    }

    // "-ng" finals (muang, bang, rayong) but not the English "-ing" suffix.
    lower.len() >= 4 && lower.ends_with("ng") && !lower.ends_with("ing")
}

fn length_ratio_close(source: &str, candidate: &str) -> bool {
    let source_len = source.chars().count().max(1);
    let candidate_len = candidate.chars().count();
    let ratio = candidate_len as f32 / source_len as f32;
    (0.4..=2.5).contains(&ratio)
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== Consonant Run Tests ====================

    #[test]
    fn test_consonant_run_counts() {
        assert_eq!(max_consonant_run("krungthep"), 4); // n-g-t-h
        assert_eq!(max_consonant_run("contact"), 2);
        assert_eq!(max_consonant_run("survey"), 2); // y is a vowel here
    }

    #[test]
    fn test_consonant_cluster_rejected() {
        // "sngkh" style clusters are classic romanization artifacts.
        assert!(looks_transliterated("สงขลา", "sngkhla"));
        assert!(looks_transliterated("สงคราม", "songkhram"));
    }

    #[test]
    fn test_plain_english_not_rejected() {
        assert!(!looks_transliterated("แบบฟอร์มติดต่อ", "contact form"));
        assert!(!looks_transliterated("เบอร์โทรศัพท์", "phone number"));
        assert!(!looks_transliterated("วันที่", "date"));
        assert!(!looks_transliterated("สิ่งของ", "things"));
    }

    // ==================== Digraph Tests ====================

    #[test]
    fn test_digraph_romanization_rejected() {
        assert!(looks_transliterated("เขตบางเขน", "khet bang khen"));
        assert!(looks_transliterated("ถนนเพชรบุรี", "thanon phetchaburi"));
    }

    #[test]
    fn test_english_th_words_are_not_suspicious() {
        assert!(!is_suspicious_word("the"));
        assert!(!is_suspicious_word("theory"));
        assert!(!is_suspicious_word("phone"));
        assert!(is_suspicious_word("thanon"));
        assert!(is_suspicious_word("khet"));
    }

    #[test]
    fn test_ing_suffix_is_not_suspicious() {
        assert!(!is_suspicious_word("rating"));
        assert!(!is_suspicious_word("building"));
        assert!(is_suspicious_word("bang"));
        assert!(is_suspicious_word("rayong"));
    }

    // ==================== Length Gate Tests ====================

    #[test]
    fn test_digraph_rule_needs_similar_length() {
        // A long English sentence that happens to contain one Thai-shaped
        // word is not length-close to a four-character source.
        assert!(!looks_transliterated(
            "เขต",
            "the administrative district boundary of the khet area in the city"
        ));
    }

    #[test]
    fn test_empty_candidate_is_not_transliteration() {
        assert!(!looks_transliterated("แบบฟอร์ม", ""));
        assert!(!looks_transliterated("แบบฟอร์ม", "   "));
    }
}
