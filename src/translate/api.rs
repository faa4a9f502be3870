//! External translation API tier.
//!
//! Calls a MyMemory-style translation endpoint with a context hint appended
//! to the query ("(form)", "(field name)") to bias the translation toward
//! the intended part of speech; the hint is stripped back out of the result.
//!
//! Guard rails, in order: a process-wide cooldown after a rate-limit
//! response (fail fast, no network), a short per-call timeout with a single
//! retry, a configurable quality floor, and the transliteration detector.
//! Every failure is a typed error the chain recovers from by falling
//! through to the hash fallback.

use super::translit::looks_transliterated;
use super::{Provenance, Translation, TranslationContext};
use crate::config::Config;
use crate::error::SchemaError;
use crate::retry::{with_retry_if, RetryConfig};
use regex::Regex;
use reqwest::StatusCode;
use serde::Deserialize;
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Rate-limit cooldown state, held as an explicit value so tests can drive
/// it with synthetic instants instead of waiting on wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct CircuitBreakerState {
    armed_until: Option<Instant>,
}

impl CircuitBreakerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the breaker for `cooldown` from `now`.
    pub fn arm(&mut self, now: Instant, cooldown: Duration) {
        self.armed_until = Some(now + cooldown);
    }

    /// Disarm early (on the next successful call).
    pub fn disarm(&mut self) {
        self.armed_until = None;
    }

    /// Time left in the cooldown, or `None` when calls may proceed.
    /// An elapsed cooldown disarms implicitly.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        match self.armed_until {
            Some(until) if until > now => Some(until - now),
            _ => None,
        }
    }

    pub fn is_armed(&self, now: Instant) -> bool {
        self.remaining(now).is_some()
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(rename = "responseData")]
    response_data: ApiResponseData,
}

#[derive(Debug, Deserialize)]
struct ApiResponseData {
    #[serde(rename = "translatedText")]
    translated_text: String,
    #[serde(rename = "match", default)]
    match_score: f32,
}

pub struct ApiTier {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    langpair: String,
    timeout: Duration,
    min_quality: f32,
    cooldown: Duration,
    retry: RetryConfig,
    breaker: Mutex<CircuitBreakerState>,
}

impl ApiTier {
    pub fn new(base_url: &str, langpair: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: None,
            langpair: langpair.to_string(),
            timeout: Duration::from_secs(5),
            min_quality: 0.5,
            cooldown: Duration::from_secs(60),
            retry: RetryConfig::translation_api(),
            breaker: Mutex::new(CircuitBreakerState::new()),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let mut tier = Self::new(&config.translate_api_url, &config.translate_langpair);
        tier.api_key = config.translate_api_key.clone();
        tier.timeout = config.translate_timeout;
        tier.min_quality = config.translate_min_quality;
        tier.cooldown = config.translate_cooldown;
        tier
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_min_quality(mut self, min_quality: f32) -> Self {
        self.min_quality = min_quality;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Translate one phrase. Fails fast while the rate-limit cooldown is
    /// armed; otherwise makes at most two network attempts.
    pub async fn translate(
        &self,
        text: &str,
        context: TranslationContext,
    ) -> Result<Translation, SchemaError> {
        if let Some(retry_after) = self.breaker.lock().unwrap().remaining(Instant::now()) {
            debug!(
                "translation API cooling down for {:?}, failing fast",
                retry_after
            );
            return Err(SchemaError::TranslationRateLimited { retry_after });
        }

        let query = match context.hint() {
            "" => text.to_string(),
            hint => format!("{} ({})", text, hint),
        };

        let (raw, score) = with_retry_if(
            &self.retry,
            "translation API",
            || self.request(&query),
            // Timeouts and transport/5xx errors are transient; an armed
            // rate limit or a 4xx is not.
            |e| {
                matches!(
                    e,
                    SchemaError::TranslationTimeout(_) | SchemaError::Http(_)
                )
            },
        )
        .await?;

        let translated = strip_context_hint(&raw);

        if score < self.min_quality {
            return Err(SchemaError::TranslationQualityTooLow {
                score,
                floor: self.min_quality,
            });
        }

        if looks_transliterated(text, &translated) {
            return Err(SchemaError::TransliterationRejected(translated));
        }

        self.breaker.lock().unwrap().disarm();

        Ok(Translation {
            text: translated,
            quality: score,
            provenance: Provenance::Api,
        })
    }

    async fn request(&self, query: &str) -> Result<(String, f32), SchemaError> {
        let mut request = self
            .client
            .get(format!("{}/get", self.base_url))
            .query(&[("q", query), ("langpair", self.langpair.as_str())])
            .timeout(self.timeout);
        if let Some(key) = &self.api_key {
            request = request.query(&[("key", key.as_str())]);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                SchemaError::TranslationTimeout(self.timeout)
            } else {
                SchemaError::Http(e)
            }
        })?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            self.breaker
                .lock()
                .unwrap()
                .arm(Instant::now(), self.cooldown);
            warn!(
                "translation API returned 429, cooling down for {:?}",
                self.cooldown
            );
            return Err(SchemaError::TranslationRateLimited {
                retry_after: self.cooldown,
            });
        }

        let response = response.error_for_status()?;
        let body: ApiResponse = response.json().await?;

        Ok((
            body.response_data.translated_text,
            body.response_data.match_score,
        ))
    }
}

static HINT_REGEX: OnceLock<Regex> = OnceLock::new();

/// Remove any echoed context hint from a translation result.
fn strip_context_hint(text: &str) -> String {
    let regex = HINT_REGEX.get_or_init(|| {
        Regex::new(r"(?i)\s*\((?:form|field name|department|action)\)").unwrap()
    });
    regex.replace_all(text, "").trim().to_string()
}
