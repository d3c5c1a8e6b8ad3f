//! Shared plumbing for upstream providers.
//!
//! The completion and search gateways wrap their providers behind traits
//! so tests can substitute scripted implementations. Both families of
//! providers fail in the same handful of ways, captured here as
//! [`ProviderError`]. Gateways convert these into degraded *values*
//! (see [`crate::llm::Generation`] and [`crate::search::SearchResponse`]);
//! the error type itself never crosses a stage boundary.

use miette::Diagnostic;
use thiserror::Error;

/// Failure modes of an external provider call.
#[derive(Debug, Error, Diagnostic)]
pub enum ProviderError {
    /// The provider was built without credentials; the feature is off.
    #[error("provider not configured: {what}")]
    #[diagnostic(
        code(pagesage::provider::not_configured),
        help("Set the corresponding API key in the environment to enable this provider.")
    )]
    NotConfigured { what: &'static str },

    /// Upstream quota or rate limit.
    #[error("rate limited by upstream: {0}")]
    #[diagnostic(code(pagesage::provider::rate_limited))]
    RateLimited(String),

    /// Transport-level failure (connect, TLS, non-2xx status).
    #[error("transport error: {0}")]
    #[diagnostic(code(pagesage::provider::transport))]
    Transport(String),

    /// The provider answered, but with a body we cannot use.
    #[error("malformed upstream response: {0}")]
    #[diagnostic(code(pagesage::provider::malformed))]
    Malformed(String),
}

impl ProviderError {
    /// Maps a reqwest failure, surfacing HTTP 429 as [`ProviderError::RateLimited`].
    pub fn from_http(err: reqwest::Error) -> Self {
        if err.status().is_some_and(|status| status.as_u16() == 429) {
            ProviderError::RateLimited(err.to_string())
        } else {
            ProviderError::Transport(err.to_string())
        }
    }
}
