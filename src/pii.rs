//! PII detection and masking.
//!
//! Two detection backends sit behind the [`PiiBackend`] trait:
//!
//! - **[`AnalyzerClient`]**: a Presidio-compatible REST analyzer
//!   (`POST /analyze`). High recall, preferred when reachable.
//! - **[`RegexRecognizer`]**: built-in patterns for email addresses,
//!   phone numbers, and candidate credit-card digit runs.
//!
//! [`PiiDetector`] pins the choice once at construction. Building a
//! detector never fails: an unreachable analyzer resolves to the regex
//! recognizer, and a failing analyzer call falls back to regex for that
//! call only.
//!
//! Span offsets are half-open **character** offsets, not byte offsets.
//! [`mask`] keeps the character count of the input unchanged.

use anyhow::{bail, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use std::time::Duration;

use crate::config::GuardrailsConfig;

/// Replacement for every masked character.
pub const MASK_CHAR: char = '*';

pub const ENTITY_EMAIL: &str = "EMAIL_ADDRESS";
pub const ENTITY_PHONE: &str = "PHONE_NUMBER";
pub const ENTITY_CREDIT_CARD: &str = "CREDIT_CARD";

const ANALYZER_TIMEOUT: Duration = Duration::from_secs(5);

/// A detected sensitive region of a specific text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PiiSpan {
    pub start: usize,
    pub end: usize,
    pub entity_type: String,
    pub score: f64,
}

/// A PII detection engine.
#[async_trait]
pub trait PiiBackend: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Detect sensitive spans in `text` (character offsets).
    async fn detect(&self, text: &str) -> Result<Vec<PiiSpan>>;
}

// ============ Regex recognizer ============

macro_rules! pii_pattern {
    ($name:ident, $regex_str:expr) => {
        static $name: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new($regex_str).ok());
    };
}

pii_pattern!(RE_EMAIL, r"[\w.+-]+@[\w-]+(?:\.[\w-]+)*\.[A-Za-z]{2,}");

// North-American style groups with an optional area code, or five
// two-digit groups (e.g. 06 12 34 56 78).
pii_pattern!(
    RE_PHONE,
    r"(?:\+\d{1,3}[\s.-]?)?(?:(?:\(\d{2,4}\)|\b\d{3})[\s.-]?)?\b\d{3}[\s.-]?\d{4}\b|(?:\+\d{1,3}[\s.-]?|\b0)\d(?:[\s.-]?\d{2}){4}\b"
);

// 13-19 digits, optionally separated by spaces or dashes.
pii_pattern!(RE_CREDIT_CARD, r"\b(?:\d[ -]*?){13,19}\b");

/// Pattern-based fallback detector.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegexRecognizer;

impl RegexRecognizer {
    fn patterns() -> [(&'static LazyLock<Option<Regex>>, &'static str, f64); 3] {
        [
            (&RE_EMAIL, ENTITY_EMAIL, 0.8),
            (&RE_PHONE, ENTITY_PHONE, 0.7),
            (&RE_CREDIT_CARD, ENTITY_CREDIT_CARD, 0.9),
        ]
    }

    /// Synchronous detection; the regex backend cannot fail.
    pub fn detect_spans(&self, text: &str) -> Vec<PiiSpan> {
        let char_at = byte_to_char_offsets(text);
        let mut spans = Vec::new();

        for (pattern, entity_type, score) in Self::patterns() {
            let Some(re) = pattern.as_ref() else {
                continue;
            };
            for m in re.find_iter(text) {
                spans.push(PiiSpan {
                    start: char_at[m.start()],
                    end: char_at[m.end()],
                    entity_type: entity_type.to_string(),
                    score,
                });
            }
        }

        spans.sort_by_key(|s| (s.start, s.end));
        spans
    }
}

#[async_trait]
impl PiiBackend for RegexRecognizer {
    fn name(&self) -> &str {
        "regex"
    }

    async fn detect(&self, text: &str) -> Result<Vec<PiiSpan>> {
        Ok(self.detect_spans(text))
    }
}

/// Map every byte offset that starts a character (plus `text.len()`) to
/// its character index.
fn byte_to_char_offsets(text: &str) -> Vec<usize> {
    let mut map = vec![0usize; text.len() + 1];
    let mut count = 0;
    for (byte_idx, _) in text.char_indices() {
        map[byte_idx] = count;
        count += 1;
    }
    map[text.len()] = count;
    map
}

// ============ Remote analyzer ============

/// Client for a Presidio-compatible analyzer service.
pub struct AnalyzerClient {
    base_url: String,
    language: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct AnalyzerResult {
    start: usize,
    end: usize,
    entity_type: String,
    score: f64,
}

impl AnalyzerClient {
    /// Connect to the analyzer and verify it answers `GET /health`.
    pub async fn connect(base_url: &str, language: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(ANALYZER_TIMEOUT)
            .build()?;
        let base_url = base_url.trim_end_matches('/').to_string();

        let resp = client.get(format!("{}/health", base_url)).send().await?;
        if !resp.status().is_success() {
            bail!("PII analyzer health check failed: {}", resp.status());
        }

        Ok(Self {
            base_url,
            language: language.to_string(),
            client,
        })
    }
}

#[async_trait]
impl PiiBackend for AnalyzerClient {
    fn name(&self) -> &str {
        "analyzer"
    }

    async fn detect(&self, text: &str) -> Result<Vec<PiiSpan>> {
        let body = serde_json::json!({
            "text": text,
            "language": self.language,
        });

        let resp = self
            .client
            .post(format!("{}/analyze", self.base_url))
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            bail!("PII analyzer error {}: {}", status, body_text);
        }

        let results: Vec<AnalyzerResult> = resp.json().await?;
        let len = text.chars().count();

        Ok(results
            .into_iter()
            .filter(|r| r.start < r.end && r.end <= len)
            .map(|r| PiiSpan {
                start: r.start,
                end: r.end,
                entity_type: r.entity_type,
                score: r.score,
            })
            .collect())
    }
}

// ============ Detector ============

/// The detection backend resolved at construction time.
pub enum PiiDetector {
    /// A preferred engine; falls back to regex per call on error.
    Primary(Box<dyn PiiBackend>),
    /// Built-in regex patterns.
    Fallback(RegexRecognizer),
}

impl PiiDetector {
    pub fn regex() -> Self {
        PiiDetector::Fallback(RegexRecognizer)
    }

    /// Resolve the detector from configuration. Never fails.
    pub async fn from_config(config: &GuardrailsConfig) -> Self {
        let Some(url) = config.pii_analyzer_url.as_deref() else {
            return Self::regex();
        };

        match AnalyzerClient::connect(url, &config.pii_language).await {
            Ok(client) => {
                tracing::info!(url, "using PII analyzer");
                PiiDetector::Primary(Box::new(client))
            }
            Err(e) => {
                tracing::warn!(url, error = %e, "PII analyzer unavailable, using regex detection");
                Self::regex()
            }
        }
    }

    /// Name of the pinned backend.
    pub fn backend_name(&self) -> &str {
        match self {
            PiiDetector::Primary(backend) => backend.name(),
            PiiDetector::Fallback(regex) => regex.name(),
        }
    }

    pub async fn detect(&self, text: &str) -> Vec<PiiSpan> {
        match self {
            PiiDetector::Primary(backend) => match backend.detect(text).await {
                Ok(spans) => spans,
                Err(e) => {
                    tracing::warn!(
                        backend = backend.name(),
                        error = %e,
                        "PII detection failed, using regex for this call"
                    );
                    RegexRecognizer.detect_spans(text)
                }
            },
            PiiDetector::Fallback(regex) => regex.detect_spans(text),
        }
    }

    /// Detect and mask in one step.
    pub async fn redact(&self, text: &str) -> String {
        let spans = self.detect(text).await;
        mask(text, &spans)
    }
}

/// Replace every character covered by any span with [`MASK_CHAR`].
///
/// Offsets past the end of `text` are ignored. Overlapping spans are
/// harmless: masking a masked character changes nothing.
pub fn mask(text: &str, spans: &[PiiSpan]) -> String {
    let len = text.chars().count();
    let mut covered = vec![false; len];
    for span in spans {
        for flag in covered.iter_mut().take(span.end.min(len)).skip(span.start) {
            *flag = true;
        }
    }

    text.chars()
        .zip(covered)
        .map(|(c, hidden)| if hidden { MASK_CHAR } else { c })
        .collect()
}
