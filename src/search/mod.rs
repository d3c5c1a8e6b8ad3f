//! External web search: result types, the TTL cache, the provider seam,
//! and the time-budgeted gateway that ties them together.
//!
//! A failed search is a value, not an exception: [`SearchResponse::Error`]
//! carries the message downstream so later stages can degrade gracefully
//! (and so failures can be negatively cached).

mod cache;
mod gateway;
mod http;
mod provider;

pub use cache::{CacheKey, SearchCache};
pub use gateway::SearchGateway;
pub use http::HttpSearchProvider;
pub use provider::{SearchProvider, SearchRequest};

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// One ranked search result.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
    /// Highlighted passages from content enrichment, when requested.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub highlights: Vec<String>,
    /// Synthesized per-hit summary from content enrichment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// Outcome of a search attempt: hits, or an upstream error carried as
/// a first-class value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum SearchResponse {
    Hits(Vec<SearchHit>),
    Error(String),
}

impl Default for SearchResponse {
    fn default() -> Self {
        SearchResponse::Hits(Vec::new())
    }
}

impl SearchResponse {
    /// True for a non-empty, non-error result set.
    pub fn is_usable(&self) -> bool {
        matches!(self, SearchResponse::Hits(hits) if !hits.is_empty())
    }

    /// The hits, empty for errors.
    pub fn hits(&self) -> &[SearchHit] {
        match self {
            SearchResponse::Hits(hits) => hits,
            SearchResponse::Error(_) => &[],
        }
    }

    /// The error message, if this is an error response.
    pub fn error(&self) -> Option<&str> {
        match self {
            SearchResponse::Error(message) => Some(message),
            SearchResponse::Hits(_) => None,
        }
    }

    /// Keeps at most `max` hits; errors pass through unchanged.
    pub fn truncated(self, max: usize) -> Self {
        match self {
            SearchResponse::Hits(mut hits) => {
                hits.truncate(max);
                SearchResponse::Hits(hits)
            }
            error => error,
        }
    }
}

static CYRILLIC: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)[а-яё]").unwrap());
static LATIN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)[a-z]").unwrap());

/// Guesses a search language hint from user-visible text.
///
/// Cyrillic wins over Latin so mixed pages keep their primary language;
/// anything else maps to `"auto"`.
pub fn detect_language(text: &str) -> &'static str {
    if CYRILLIC.is_match(text) {
        "ru"
    } else if LATIN.is_match(text) {
        "en"
    } else {
        "auto"
    }
}

/// Normalizes a query for cache keying: lowercase, collapsed whitespace.
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
