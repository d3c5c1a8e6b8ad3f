//! Language-model gateway: generation, streaming, structured JSON, and
//! embeddings, each under a hard per-call timeout with graceful
//! degradation.
//!
//! The gateway never raises toward the state machine. Every outcome is a
//! value: [`Generation`] tags success, timeout, rate limiting, and plain
//! failure so downstream stages can branch on the degradation kind
//! instead of re-parsing error strings.

mod http;
mod provider;

pub use http::HttpCompletionProvider;
pub use provider::CompletionProvider;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use tracing::{debug, warn};

use crate::config::AgentConfig;
use crate::provider::ProviderError;

/// Instruction prepended to every JSON-mode prompt.
const JSON_ONLY_INSTRUCTION: &str = "Respond with a single valid JSON object and nothing else. \
No markdown fences, no commentary.";

/// Outcome of a text-generation call.
///
/// Timeouts and rate limits are first-class variants because they map to
/// distinct user-facing messages; any other failure collapses to
/// [`Generation::Failed`] and lets the caller apply its own fallback.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Generation {
    /// The model produced text (possibly empty).
    Text(String),
    /// The call exceeded the configured hard timeout.
    TimedOut,
    /// Upstream quota or rate limit.
    RateLimited,
    /// Any other provider failure.
    Failed,
}

impl Generation {
    /// Produced text, if any.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Generation::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Collapses the outcome into the user-facing answer text: degraded
    /// messages for timeout and rate limiting, empty for other failures.
    pub fn text_or_degraded(self, config: &AgentConfig) -> String {
        match self {
            Generation::Text(text) => text,
            Generation::TimedOut => config.timeout_message.clone(),
            Generation::RateLimited => config.rate_limit_message.clone(),
            Generation::Failed => String::new(),
        }
    }
}

/// Embedding capability consumed by the vector index.
///
/// A `None` means "skip this operation": the embedding backend being
/// down must never fail ingestion or retrieval wholesale.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str, is_query: bool) -> Option<Vec<f32>>;
}

/// Timeout-enforcing wrapper around a [`CompletionProvider`].
#[derive(Clone)]
pub struct LlmGateway {
    provider: Arc<dyn CompletionProvider>,
    timeout: Duration,
}

impl LlmGateway {
    pub fn new(provider: Arc<dyn CompletionProvider>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    /// Runs one generation under the hard timeout.
    pub async fn generate_text(&self, prompt: &str) -> Generation {
        match tokio::time::timeout(self.timeout, self.provider.complete(prompt)).await {
            Ok(Ok(text)) => Generation::Text(text),
            Ok(Err(ProviderError::RateLimited(message))) => {
                warn!(%message, "generation rate limited");
                Generation::RateLimited
            }
            Ok(Err(err)) => {
                warn!(error = %err, "generation failed");
                Generation::Failed
            }
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "generation timed out");
                Generation::TimedOut
            }
        }
    }

    /// Streams generation output as it arrives.
    ///
    /// A failure mid-stream cannot retract fragments already delivered,
    /// so errors are surfaced as an inline marker and the stream ends.
    pub fn generate_text_stream(&self, prompt: &str) -> BoxStream<'static, String> {
        let mut inner = self.provider.complete_stream(prompt);
        Box::pin(async_stream::stream! {
            while let Some(item) = inner.next().await {
                match item {
                    Ok(fragment) => {
                        if !fragment.is_empty() {
                            yield fragment;
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, "stream interrupted");
                        yield format!("\n[stream-error] {err}");
                        break;
                    }
                }
            }
        })
    }

    /// Asks the model for JSON and parses it defensively.
    ///
    /// Strict parsing first; if the model wrapped the object in prose,
    /// the first balanced `{...}` span is extracted and parsed instead.
    /// Returns `None` on total parse failure — never an error.
    pub async fn generate_json(&self, prompt: &str) -> Option<serde_json::Value> {
        let instructed = format!("{JSON_ONLY_INSTRUCTION}\n\n{prompt}");
        let raw = self.generate_text(&instructed).await;
        let Generation::Text(raw) = raw else {
            return None;
        };
        let parsed = parse_json_lenient(&raw);
        if parsed.is_none() {
            debug!(response_len = raw.len(), "JSON mode response did not parse");
        }
        parsed
    }

    /// Embeds `text`, treating any failure or empty vector as absent.
    pub async fn embed_text(&self, text: &str, is_query: bool) -> Option<Vec<f32>> {
        match tokio::time::timeout(self.timeout, self.provider.embed(text, is_query)).await {
            Ok(Ok(vector)) if !vector.is_empty() => Some(vector),
            Ok(Ok(_)) => {
                debug!("embedding backend returned an empty vector");
                None
            }
            Ok(Err(err)) => {
                debug!(error = %err, "embedding failed");
                None
            }
            Err(_) => {
                warn!("embedding timed out");
                None
            }
        }
    }
}

#[async_trait]
impl Embedder for LlmGateway {
    async fn embed(&self, text: &str, is_query: bool) -> Option<Vec<f32>> {
        self.embed_text(text, is_query).await
    }
}

/// Parses `raw` as JSON, falling back to the first balanced `{...}` span.
pub fn parse_json_lenient(raw: &str) -> Option<serde_json::Value> {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(raw.trim()) {
        if value.is_object() {
            return Some(value);
        }
    }
    let span = balanced_object_span(raw)?;
    serde_json::from_str(span).ok()
}

/// Finds the first balanced top-level `{...}` span, respecting strings
/// and escapes so braces inside values do not confuse the scan.
fn balanced_object_span(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in raw[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&raw[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strict_json_parses() {
        let value = parse_json_lenient(r#"{"need_search": true}"#).unwrap();
        assert_eq!(value, json!({"need_search": true}));
    }

    #[test]
    fn json_wrapped_in_prose_is_extracted() {
        let raw = "Sure, here you go:\n```json\n{\"queries\": [\"a\", \"b\"]}\n```\nDone.";
        let value = parse_json_lenient(raw).unwrap();
        assert_eq!(value, json!({"queries": ["a", "b"]}));
    }

    #[test]
    fn braces_inside_strings_do_not_truncate_the_span() {
        let raw = r#"noise {"text": "curly } brace", "ok": true} trailing"#;
        let value = parse_json_lenient(raw).unwrap();
        assert_eq!(value["ok"], json!(true));
    }

    #[test]
    fn unparsable_input_yields_none() {
        assert!(parse_json_lenient("no json here").is_none());
        assert!(parse_json_lenient("{broken").is_none());
        assert!(parse_json_lenient("").is_none());
    }

    #[test]
    fn degraded_text_uses_configured_messages() {
        let config = AgentConfig::default();
        assert_eq!(
            Generation::TimedOut.text_or_degraded(&config),
            config.timeout_message
        );
        assert_eq!(
            Generation::RateLimited.text_or_degraded(&config),
            config.rate_limit_message
        );
        assert_eq!(Generation::Failed.text_or_degraded(&config), "");
        assert_eq!(
            Generation::Text("hi".into()).text_or_degraded(&config),
            "hi"
        );
    }
}
