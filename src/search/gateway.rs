//! Time-budgeted search orchestration over a provider and the cache.
//!
//! The budget is wall-clock and stage-wide: a slow first attempt consumes
//! time a second attempt can no longer use. Sequential attempts with a
//! bounded worst case are preferred over parallel fan-out because search
//! is the highest-latency, highest-failure-rate dependency in the
//! pipeline.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use crate::config::AgentConfig;
use crate::provider::ProviderError;

use super::cache::{CacheKey, SearchCache};
use super::provider::{SearchProvider, SearchRequest};
use super::SearchResponse;

/// Queries attempted per stage entry, before the research fallback.
const MAX_QUERY_ATTEMPTS: usize = 2;

/// Gateway owning the provider handle and the result cache.
pub struct SearchGateway {
    provider: Arc<dyn SearchProvider>,
    cache: Arc<SearchCache>,
    config: Arc<AgentConfig>,
}

impl SearchGateway {
    pub fn new(
        provider: Arc<dyn SearchProvider>,
        cache: Arc<SearchCache>,
        config: Arc<AgentConfig>,
    ) -> Self {
        Self {
            provider,
            cache,
            config,
        }
    }

    /// Shared cache handle, for source-scoped invalidation by the owner.
    pub fn cache(&self) -> &Arc<SearchCache> {
        &self.cache
    }

    /// Runs up to two of `queries` sequentially under the configured time
    /// budget, consulting the cache per query, then falls back to one
    /// research call when nothing usable came back and budget remains.
    ///
    /// The final response may be an error or empty: both are legitimate
    /// values for downstream stages.
    pub async fn search(
        &self,
        queries: &[String],
        source: &str,
        language: &str,
        use_cache: bool,
    ) -> SearchResponse {
        if queries.is_empty() {
            return SearchResponse::Error("no search queries to run".into());
        }
        let budget = self.config.search_time_budget;
        let started = Instant::now();
        let mut last = SearchResponse::default();

        for query in queries.iter().take(MAX_QUERY_ATTEMPTS) {
            if started.elapsed() >= budget {
                debug!("search budget exhausted before next attempt");
                break;
            }
            last = self.run_query(query, source, language, use_cache, started).await;
            if last.is_usable() {
                return last;
            }
        }

        if started.elapsed() < budget {
            let instructions = format!(
                "{}. List 3 to 5 concise facts, no filler.",
                queries[0].trim()
            );
            let remaining = budget - started.elapsed();
            match tokio::time::timeout(remaining, self.provider.research(&instructions)).await {
                Ok(Ok(hits)) if !hits.is_empty() => {
                    debug!(hits = hits.len(), "research fallback produced results");
                    return SearchResponse::Hits(hits);
                }
                Ok(Ok(_)) => {}
                Ok(Err(err)) => warn!(error = %err, "research fallback failed"),
                Err(_) => debug!("research fallback hit the stage budget"),
            }
        }

        last
    }

    async fn run_query(
        &self,
        query: &str,
        source: &str,
        language: &str,
        use_cache: bool,
        started: Instant,
    ) -> SearchResponse {
        let caching = use_cache && self.config.cache_enabled;
        let key = CacheKey::new(source, language, query);
        if caching {
            if let Some(cached) = self.cache.get(&key) {
                debug!(%query, "search cache hit");
                return cached;
            }
        }

        let request = SearchRequest {
            query: query.to_string(),
            num_results: self.config.search_num_results,
            language: language.to_string(),
            snippet_chars: self.config.search_snippet_chars,
        };
        let remaining = self
            .config
            .search_time_budget
            .saturating_sub(started.elapsed());
        let response =
            match tokio::time::timeout(remaining, self.provider.search(&request)).await {
                Ok(Ok(hits)) => SearchResponse::Hits(hits),
                Ok(Err(ProviderError::RateLimited(message))) => {
                    warn!(%message, "search rate limited");
                    SearchResponse::Error(format!("search rate limited: {message}"))
                }
                Ok(Err(err)) => {
                    warn!(error = %err, "search failed");
                    SearchResponse::Error(format!("search failed: {err}"))
                }
                Err(_) => {
                    warn!(%query, "search attempt hit the stage budget");
                    SearchResponse::Error("search timed out".into())
                }
            };

        if caching {
            self.cache.set(key, response.clone());
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::SearchHit;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct ScriptedSearch {
        searches: AtomicUsize,
        researches: AtomicUsize,
        /// Queries that should produce hits; others return empty sets.
        productive: Vec<String>,
        research_hits: Vec<SearchHit>,
        delay: Duration,
    }

    impl ScriptedSearch {
        fn new(productive: &[&str]) -> Self {
            Self {
                searches: AtomicUsize::new(0),
                researches: AtomicUsize::new(0),
                productive: productive.iter().map(|s| s.to_string()).collect(),
                research_hits: Vec::new(),
                delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl SearchProvider for ScriptedSearch {
        async fn search(
            &self,
            request: &SearchRequest,
        ) -> Result<Vec<SearchHit>, ProviderError> {
            self.searches.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.productive.contains(&request.query) {
                Ok(vec![SearchHit {
                    title: request.query.clone(),
                    url: "https://example.com".into(),
                    snippet: "snippet".into(),
                    ..Default::default()
                }])
            } else {
                Ok(Vec::new())
            }
        }

        async fn research(&self, _instructions: &str) -> Result<Vec<SearchHit>, ProviderError> {
            self.researches.fetch_add(1, Ordering::SeqCst);
            if self.research_hits.is_empty() {
                Err(ProviderError::Malformed("no findings".into()))
            } else {
                Ok(self.research_hits.clone())
            }
        }
    }

    fn gateway(provider: Arc<ScriptedSearch>, config: AgentConfig) -> SearchGateway {
        let config = Arc::new(config);
        let cache = Arc::new(SearchCache::new(config.cache_ttl, config.cache_capacity));
        SearchGateway::new(provider, cache, config)
    }

    #[tokio::test]
    async fn stops_at_first_usable_result() {
        let provider = Arc::new(ScriptedSearch::new(&["good"]));
        let gateway = gateway(provider.clone(), AgentConfig::default());
        let queries = vec!["good".to_string(), "never tried".to_string()];
        let response = gateway.search(&queries, "src", "en", true).await;
        assert!(response.is_usable());
        assert_eq!(provider.searches.load(Ordering::SeqCst), 1);
        assert_eq!(provider.researches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn tries_at_most_two_queries_then_research() {
        let provider = Arc::new(ScriptedSearch::new(&[]));
        let gateway = gateway(provider.clone(), AgentConfig::default());
        let queries = vec!["a".into(), "b".into(), "c".into()];
        let response = gateway.search(&queries, "src", "en", true).await;
        assert!(!response.is_usable());
        assert_eq!(provider.searches.load(Ordering::SeqCst), 2);
        assert_eq!(provider.researches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn research_fallback_replaces_empty_results() {
        let mut provider = ScriptedSearch::new(&[]);
        provider.research_hits = vec![SearchHit {
            snippet: "synthesized".into(),
            url: "https://research".into(),
            ..Default::default()
        }];
        let provider = Arc::new(provider);
        let gateway = gateway(provider.clone(), AgentConfig::default());
        let response = gateway.search(&["q".into()], "src", "en", true).await;
        assert!(response.is_usable());
        assert_eq!(response.hits()[0].snippet, "synthesized");
    }

    #[tokio::test]
    async fn exhausted_budget_skips_second_attempt_and_fallback() {
        let mut provider = ScriptedSearch::new(&[]);
        provider.delay = Duration::from_millis(50);
        let provider = Arc::new(provider);
        let mut config = AgentConfig::default();
        config.search_time_budget = Duration::from_millis(30);
        let gateway = gateway(provider.clone(), config);
        let queries = vec!["a".into(), "b".into()];
        let response = gateway.search(&queries, "src", "en", true).await;
        // first attempt timed out against the budget; nothing else ran
        assert_eq!(provider.searches.load(Ordering::SeqCst), 1);
        assert_eq!(provider.researches.load(Ordering::SeqCst), 0);
        assert_eq!(response.error(), Some("search timed out"));
    }

    #[tokio::test]
    async fn second_identical_call_is_served_from_cache() {
        let provider = Arc::new(ScriptedSearch::new(&["q"]));
        let gateway = gateway(provider.clone(), AgentConfig::default());
        let queries = vec!["q".to_string()];
        let first = gateway.search(&queries, "src", "en", true).await;
        let second = gateway.search(&queries, "src", "en", true).await;
        assert_eq!(first, second);
        assert_eq!(provider.searches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cache_bypass_reissues_the_call() {
        let provider = Arc::new(ScriptedSearch::new(&["q"]));
        let gateway = gateway(provider.clone(), AgentConfig::default());
        let queries = vec!["q".to_string()];
        gateway.search(&queries, "src", "en", true).await;
        gateway.search(&queries, "src", "en", false).await;
        assert_eq!(provider.searches.load(Ordering::SeqCst), 2);
    }
}
