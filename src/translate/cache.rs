//! Cache tier: time-boxed translations keyed by (normalized text, context).
//!
//! The context tag is part of the key because the same Thai phrase can
//! translate differently as a form title than as a field label. Entries
//! expire after the configured TTL; expired entries are evicted on read.
//!
//! The store is in-process. The tier contract (normalized key, TTL,
//! write-through from later tiers) is what the rest of the chain depends
//! on, so a networked store could replace this without touching callers.

use super::TranslationContext;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Cache key: whitespace-normalized source text plus the context tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub text: String,
    pub context: TranslationContext,
}

impl CacheKey {
    pub fn new(text: &str, context: TranslationContext) -> Self {
        Self {
            text: normalize_text(text),
            context,
        }
    }
}

/// Collapse internal whitespace and trim, so " ชื่อ " and "ชื่อ" share an
/// entry.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug, Clone)]
struct CacheEntry {
    translated: String,
    quality: f32,
    expires_at: Instant,
}

pub struct TranslationCache {
    ttl: Duration,
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
}

impl TranslationCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Look up a live entry. Expired entries count as misses and are
    /// removed. `now` is explicit so tests control time.
    pub fn get(
        &self,
        text: &str,
        context: TranslationContext,
        now: Instant,
    ) -> Option<(String, f32)> {
        let key = CacheKey::new(text, context);
        let mut entries = self.entries.lock().unwrap();

        match entries.get(&key) {
            Some(entry) if entry.expires_at > now => {
                Some((entry.translated.clone(), entry.quality))
            }
            Some(_) => {
                entries.remove(&key);
                None
            }
            None => None,
        }
    }

    /// Store a translation; later tiers write through here on success.
    pub fn put(
        &self,
        text: &str,
        context: TranslationContext,
        translated: &str,
        quality: f32,
        now: Instant,
    ) {
        let key = CacheKey::new(text, context);
        let entry = CacheEntry {
            translated: translated.to_string(),
            quality,
            expires_at: now + self.ttl,
        };
        self.entries.lock().unwrap().insert(key, entry);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
