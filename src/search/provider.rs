//! Provider seam for external web search.

use async_trait::async_trait;

use crate::provider::ProviderError;

use super::SearchHit;

/// Parameters for one ranked-search call.
#[derive(Clone, Debug)]
pub struct SearchRequest {
    pub query: String,
    /// Results to request from the provider.
    pub num_results: usize,
    /// Language hint (`"ru"`, `"en"`, `"auto"`).
    pub language: String,
    /// Per-hit content enrichment budget, in characters. Zero skips
    /// enrichment entirely.
    pub snippet_chars: usize,
}

/// A backend issuing ranked searches and synthesized research lookups.
///
/// Implementations return raw hits or a [`ProviderError`]; the gateway
/// owns caching, budgets, and the error-as-value conversion.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Ranked search with optional content enrichment.
    async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>, ProviderError>;

    /// Broader research call returning synthesized cross-source findings
    /// instead of a ranked list. Used once, as a fallback.
    async fn research(&self, instructions: &str) -> Result<Vec<SearchHit>, ProviderError>;
}
