//! HTTP search provider for Exa-style search APIs.
//!
//! `search` maps to a single search-and-contents POST; `research` starts
//! an asynchronous research task and polls it under its own timeout,
//! normalizing whatever item shape the endpoint returns.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::warn;

use crate::provider::ProviderError;

use super::provider::{SearchProvider, SearchRequest};
use super::SearchHit;

const DEFAULT_BASE_URL: &str = "https://api.exa.ai";
const RESEARCH_MODEL: &str = "exa-research";
const RESEARCH_POLL_INTERVAL: Duration = Duration::from_millis(800);
const RESEARCH_DEADLINE: Duration = Duration::from_secs(15);
const RESEARCH_MAX_RESULTS: usize = 6;

/// Search-API client configured with an API key.
#[derive(Clone, Debug)]
pub struct HttpSearchProvider {
    client: Client,
    base_url: String,
    api_key: String,
    research_deadline: Duration,
    research_poll_interval: Duration,
}

impl HttpSearchProvider {
    pub fn new(client: Client, api_key: impl Into<String>) -> Self {
        Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            research_deadline: RESEARCH_DEADLINE,
            research_poll_interval: RESEARCH_POLL_INTERVAL,
        }
    }

    /// Builds the provider from `SEARCH_API_KEY`. Returns `None` (with
    /// one warning) when the key is absent.
    pub fn from_env(client: Client) -> Option<Self> {
        match std::env::var("SEARCH_API_KEY") {
            Ok(key) if !key.trim().is_empty() => Some(Self::new(client, key.trim().to_string())),
            _ => {
                warn!("SEARCH_API_KEY is not set; web search is disabled");
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
    pub fn with_research_timing(mut self, deadline: Duration, poll_interval: Duration) -> Self {
        self.research_deadline = deadline;
        self.research_poll_interval = poll_interval;
        self
    }

    async fn post_json(&self, url: &str, body: &Value) -> Result<Value, ProviderError> {
        let response = self
            .client
            .post(url)
            .header("x-api-key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(ProviderError::from_http)?;
        if response.status().as_u16() == 429 {
            return Err(ProviderError::RateLimited("HTTP 429".into()));
        }
        response
            .error_for_status()
            .map_err(ProviderError::from_http)?
            .json()
            .await
            .map_err(ProviderError::from_http)
    }
}

/// Normalizes one result item; tolerates the field aliases the research
/// endpoint is known to emit.
fn normalize_hit(item: &Value) -> Option<SearchHit> {
    let url = ["url", "source_url", "link"]
        .iter()
        .find_map(|key| item.get(*key).and_then(Value::as_str))
        .unwrap_or_default()
        .to_string();
    let title = ["title", "headline"]
        .iter()
        .find_map(|key| item.get(*key).and_then(Value::as_str))
        .unwrap_or_default()
        .to_string();
    let snippet = ["text", "content", "snippet", "summary"]
        .iter()
        .find_map(|key| item.get(*key).and_then(Value::as_str))
        .unwrap_or_default()
        .to_string();
    if url.is_empty() && snippet.is_empty() {
        return None;
    }
    let highlights = item
        .get("highlights")
        .and_then(Value::as_array)
        .map(|values| {
            values
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    let summary = item
        .get("summary")
        .and_then(Value::as_str)
        .map(str::to_string);
    Some(SearchHit {
        title,
        url,
        snippet,
        highlights,
        summary,
    })
}

fn collect_hits(body: &Value) -> Vec<SearchHit> {
    body.get("results")
        .or_else(|| body.get("events"))
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(normalize_hit).collect())
        .unwrap_or_default()
}

#[async_trait]
impl SearchProvider for HttpSearchProvider {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>, ProviderError> {
        let mut body = json!({
            "query": request.query,
            "numResults": request.num_results,
        });
        if request.snippet_chars > 0 {
            body["contents"] = json!({"text": {"maxCharacters": request.snippet_chars}});
        }
        if request.language != "auto" {
            body["userLocation"] = json!(request.language);
        }
        let url = format!("{}/search", self.base_url);
        let response = self.post_json(&url, &body).await?;
        Ok(collect_hits(&response))
    }

    async fn research(&self, instructions: &str) -> Result<Vec<SearchHit>, ProviderError> {
        let base = format!("{}/research/v1", self.base_url);
        let started = self
            .post_json(&base, &json!({"instructions": instructions, "model": RESEARCH_MODEL}))
            .await?;
        let task_id = started
            .get("research_id")
            .or_else(|| started.get("id"))
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::Malformed("research task id missing".into()))?
            .to_string();

        let poll_url = format!("{base}/{task_id}");
        let deadline = tokio::time::Instant::now() + self.research_deadline;
        while tokio::time::Instant::now() < deadline {
            let response = self
                .client
                .get(&poll_url)
                .header("x-api-key", &self.api_key)
                .send()
                .await
                .map_err(ProviderError::from_http)?;
            if response.status().is_success() {
                let body: Value = response.json().await.map_err(ProviderError::from_http)?;
                let mut hits = collect_hits(&body);
                if !hits.is_empty() {
                    hits.truncate(RESEARCH_MAX_RESULTS);
                    return Ok(hits);
                }
            }
            tokio::time::sleep(self.research_poll_interval).await;
        }
        Err(ProviderError::Malformed(
            "research task produced no results before the deadline".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hits_are_normalized_across_aliases() {
        let body = json!({"results": [
            {"title": "A", "url": "https://a", "text": "alpha"},
            {"headline": "B", "source_url": "https://b", "content": "beta",
             "highlights": ["h1"], "summary": "sum"},
            {"irrelevant": true},
        ]});
        let hits = collect_hits(&body);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].snippet, "alpha");
        assert_eq!(hits[1].url, "https://b");
        assert_eq!(hits[1].highlights, vec!["h1".to_string()]);
        assert_eq!(hits[1].summary.as_deref(), Some("sum"));
    }

    #[test]
    fn items_without_url_or_text_are_dropped() {
        assert!(normalize_hit(&json!({"title": "only a title"})).is_none());
        assert!(normalize_hit(&json!({"url": "https://a"})).is_some());
        assert!(normalize_hit(&json!({"content": "text only"})).is_some());
    }
}
