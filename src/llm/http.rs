//! HTTP completion provider for Gemini-style generative APIs.
//!
//! Endpoints covered: `generateContent` (blocking), `streamGenerateContent`
//! with SSE framing (streaming), and `embedContent` (embeddings). Response
//! bodies are walked defensively; a missing field degrades to
//! [`ProviderError::Malformed`] rather than a panic.

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::warn;

use crate::provider::ProviderError;

use super::CompletionProvider;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-2.5-flash";
const DEFAULT_EMBED_MODEL: &str = "text-embedding-004";

/// System instruction sent with every generation request.
const SYSTEM_INSTRUCTION: &str = "You are an assistant that analyses the web page the user is \
currently viewing. Read the provided page context in full before answering. Answer strictly \
from that context; when it is insufficient, use all supplied data to produce the best answer. \
If a STRUCTURED section is present, treat it as the source of truth. Keep answers short and \
concrete: one idea per line, lists prefixed with '- ', no links or markup.";

/// Generative-API client configured with an API key and model names.
#[derive(Clone, Debug)]
pub struct HttpCompletionProvider {
    client: Client,
    base_url: String,
    model: String,
    embed_model: String,
    api_key: String,
}

impl HttpCompletionProvider {
    pub fn new(client: Client, api_key: impl Into<String>) -> Self {
        Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            embed_model: DEFAULT_EMBED_MODEL.to_string(),
            api_key: api_key.into(),
        }
    }

    /// Builds the provider from `LLM_API_KEY`. Returns `None` (with one
    /// warning) when the key is absent, so callers can degrade to
    /// "feature disabled" instead of failing per request.
    pub fn from_env(client: Client) -> Option<Self> {
        match std::env::var("LLM_API_KEY") {
            Ok(key) if !key.trim().is_empty() => Some(Self::new(client, key.trim().to_string())),
            _ => {
                warn!("LLM_API_KEY is not set; generation is disabled");
                None
            }
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    #[must_use]
    pub fn with_embed_model(mut self, model: impl Into<String>) -> Self {
        self.embed_model = model.into();
        self
    }

    fn generate_url(&self, streaming: bool) -> String {
        if streaming {
            format!(
                "{}/models/{}:streamGenerateContent?alt=sse&key={}",
                self.base_url, self.model, self.api_key
            )
        } else {
            format!(
                "{}/models/{}:generateContent?key={}",
                self.base_url, self.model, self.api_key
            )
        }
    }

    fn request_body(prompt: &str) -> Value {
        json!({
            "systemInstruction": {"parts": [{"text": SYSTEM_INSTRUCTION}]},
            "contents": [{"role": "user", "parts": [{"text": prompt}]}],
        })
    }
}

/// Concatenates the text parts of the first candidate, if any.
fn candidate_text(body: &Value) -> Option<String> {
    let parts = body
        .get("candidates")?
        .get(0)?
        .get("content")?
        .get("parts")?
        .as_array()?;
    let texts: Vec<&str> = parts
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect();
    if texts.is_empty() {
        None
    } else {
        Some(texts.join(""))
    }
}

/// Extracts the payload of one SSE `data:` line as a text fragment.
fn sse_fragment(line: &str) -> Option<String> {
    let payload = line.strip_prefix("data:")?.trim();
    if payload.is_empty() || payload == "[DONE]" {
        return None;
    }
    let body: Value = serde_json::from_str(payload).ok()?;
    candidate_text(&body)
}

#[async_trait]
impl CompletionProvider for HttpCompletionProvider {
    async fn complete(&self, prompt: &str) -> Result<String, ProviderError> {
        let response = self
            .client
            .post(self.generate_url(false))
            .json(&Self::request_body(prompt))
            .send()
            .await
            .map_err(ProviderError::from_http)?;
        if response.status().as_u16() == 429 {
            return Err(ProviderError::RateLimited("HTTP 429".into()));
        }
        let response = response.error_for_status().map_err(ProviderError::from_http)?;
        let body: Value = response.json().await.map_err(ProviderError::from_http)?;
        candidate_text(&body)
            .ok_or_else(|| ProviderError::Malformed("no candidate text in response".into()))
    }

    fn complete_stream(&self, prompt: &str) -> BoxStream<'static, Result<String, ProviderError>> {
        let client = self.client.clone();
        let url = self.generate_url(true);
        let body = Self::request_body(prompt);
        Box::pin(async_stream::stream! {
            let response = match client.post(url).json(&body).send().await {
                Ok(response) => response,
                Err(err) => {
                    yield Err(ProviderError::from_http(err));
                    return;
                }
            };
            if response.status().as_u16() == 429 {
                yield Err(ProviderError::RateLimited("HTTP 429".into()));
                return;
            }
            let response = match response.error_for_status() {
                Ok(response) => response,
                Err(err) => {
                    yield Err(ProviderError::from_http(err));
                    return;
                }
            };

            let mut bytes = response.bytes_stream();
            let mut buffer = String::new();
            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(err) => {
                        yield Err(ProviderError::from_http(err));
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));
                while let Some(newline) = buffer.find('\n') {
                    let line = buffer[..newline].trim_end_matches('\r').to_string();
                    buffer.drain(..=newline);
                    if let Some(fragment) = sse_fragment(&line) {
                        yield Ok(fragment);
                    }
                }
            }
            if let Some(fragment) = sse_fragment(buffer.trim_end()) {
                yield Ok(fragment);
            }
        })
    }

    async fn embed(&self, text: &str, is_query: bool) -> Result<Vec<f32>, ProviderError> {
        let url = format!(
            "{}/models/{}:embedContent?key={}",
            self.base_url, self.embed_model, self.api_key
        );
        let task = if is_query {
            "RETRIEVAL_QUERY"
        } else {
            "RETRIEVAL_DOCUMENT"
        };
        let body = json!({
            "content": {"parts": [{"text": text}]},
            "taskType": task,
        });
        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(ProviderError::from_http)?
            .error_for_status()
            .map_err(ProviderError::from_http)?;
        let body: Value = response.json().await.map_err(ProviderError::from_http)?;
        let values = body
            .get("embedding")
            .and_then(|embedding| embedding.get("values"))
            .and_then(Value::as_array)
            .ok_or_else(|| ProviderError::Malformed("no embedding values in response".into()))?;
        Ok(values
            .iter()
            .filter_map(Value::as_f64)
            .map(|v| v as f32)
            .collect())
    }
}
