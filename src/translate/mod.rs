//! Translation tier chain.
//!
//! Converts a local-language phrase into an English phrase with a quality
//! score. Tiers are tried strictly in order: curated dictionary, TTL cache,
//! external API. Each tier failure is a tagged result recovered by falling
//! through; when every tier fails the chain terminates with a deterministic
//! hash-derived token so the identifier pipeline always produces something
//! valid, and the miss is logged for human follow-up.

mod api;
mod cache;
mod dictionary;
mod translit;

pub use api::{ApiTier, CircuitBreakerState};
pub use cache::{CacheKey, TranslationCache};
pub use dictionary::DictionaryTier;
pub use translit::looks_transliterated;

use crate::config::Config;
use crate::ident;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// What a phrase is naming; part of every cache key and the source of the
/// API context hint, because the same Thai word can translate differently
/// per context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TranslationContext {
    Form,
    Field,
    Department,
    Action,
    General,
}

impl TranslationContext {
    pub fn tag(self) -> &'static str {
        match self {
            TranslationContext::Form => "form",
            TranslationContext::Field => "field",
            TranslationContext::Department => "department",
            TranslationContext::Action => "action",
            TranslationContext::General => "general",
        }
    }

    /// Hint appended to API queries to bias part-of-speech; stripped from
    /// the result before use. Empty for the general context.
    pub fn hint(self) -> &'static str {
        match self {
            TranslationContext::Form => "form",
            TranslationContext::Field => "field name",
            TranslationContext::Department => "department",
            TranslationContext::Action => "action",
            TranslationContext::General => "",
        }
    }
}

/// Which tier produced a translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    /// Input was already English/ASCII and passed through untouched.
    Source,
    Dictionary,
    Cache,
    Api,
    /// Hash-derived token after every tier failed.
    Fallback,
}

#[derive(Debug, Clone)]
pub struct Translation {
    pub text: String,
    pub quality: f32,
    pub provenance: Provenance,
}

pub struct Translator {
    dictionary: DictionaryTier,
    cache: TranslationCache,
    api: Option<ApiTier>,
    /// Per-key locks coalescing concurrent callers for the same
    /// (text, context) into one outbound API call.
    inflight: Mutex<HashMap<CacheKey, Arc<Mutex<()>>>>,
}

impl Translator {
    pub fn new(dictionary: DictionaryTier, cache: TranslationCache, api: Option<ApiTier>) -> Self {
        Self {
            dictionary,
            cache,
            api,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            DictionaryTier::new(),
            TranslationCache::new(config.cache_ttl),
            Some(ApiTier::from_config(config)),
        )
    }

    /// Dictionary and cache only; used where network translation is
    /// unavailable or unwanted.
    pub fn offline(cache_ttl: Duration) -> Self {
        Self::new(DictionaryTier::new(), TranslationCache::new(cache_ttl), None)
    }

    /// Translate a phrase. Never fails: exhausting every tier yields the
    /// deterministic hash fallback token.
    pub async fn translate(&self, text: &str, context: TranslationContext) -> Translation {
        let text = text.trim();

        // Already-English input needs no tier at all.
        if text.is_ascii() {
            return Translation {
                text: text.to_string(),
                quality: 1.0,
                provenance: Provenance::Source,
            };
        }

        if let Some(translated) = self.dictionary.lookup(text) {
            self.cache
                .put(text, context, &translated, 1.0, Instant::now());
            return Translation {
                text: translated,
                quality: 1.0,
                provenance: Provenance::Dictionary,
            };
        }

        let key = CacheKey::new(text, context);
        let lock = {
            let mut inflight = self.inflight.lock().await;
            inflight
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };

        let result = {
            let _guard = lock.lock().await;
            self.translate_uncached(text, context).await
        };

        // Drop the in-flight entry once the last holder finishes.
        {
            let mut inflight = self.inflight.lock().await;
            if Arc::strong_count(inflight.get(&key).unwrap_or(&lock)) <= 2 {
                inflight.remove(&key);
            }
        }

        result
    }

    async fn translate_uncached(&self, text: &str, context: TranslationContext) -> Translation {
        if let Some((translated, quality)) = self.cache.get(text, context, Instant::now()) {
            debug!("translation cache hit for {:?} ({})", text, context.tag());
            return Translation {
                text: translated,
                quality,
                provenance: Provenance::Cache,
            };
        }

        if let Some(api) = &self.api {
            match api.translate(text, context).await {
                Ok(translation) => {
                    self.cache.put(
                        text,
                        context,
                        &translation.text,
                        translation.quality,
                        Instant::now(),
                    );
                    return translation;
                }
                Err(e) => {
                    warn!(
                        "translation API tier failed for {:?} ({}): {}",
                        text,
                        context.tag(),
                        e
                    );
                }
            }
        }

        // Deterministic terminal fallback; not cached, so a later call can
        // still recover a real translation once the API is healthy again.
        let token = format!("t_{}", ident::short_hash(text));
        warn!(
            "all translation tiers failed for {:?} ({}), using hash fallback {:?}",
            text,
            context.tag(),
            token
        );
        Translation {
            text: token,
            quality: 0.0,
            provenance: Provenance::Fallback,
        }
    }

    /// Translate and normalize in one step: the identifier every schema
    /// operation derives from a title or label.
    pub async fn identifier_for(
        &self,
        text: &str,
        context: TranslationContext,
        max_len: usize,
    ) -> String {
        let translation = self.translate(text, context).await;
        let identifier = ident::to_identifier(&translation.text, None, max_len);
        // A phrase whose translation strips to nothing still gets a unique,
        // reproducible name.
        if identifier == ident::UNNAMED {
            ident::to_identifier(&format!("t_{}", ident::short_hash(text)), None, max_len)
        } else {
            identifier
        }
    }
}
