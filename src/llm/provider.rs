//! Provider seam for text generation and embeddings.

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::provider::ProviderError;

/// A backend capable of completion, streaming completion, and embedding.
///
/// Implementations must not retry internally; the gateway owns timeouts
/// and degradation policy. Streams must be `'static` so they can outlive
/// the call that produced them (the caller may hand them to a response
/// writer).
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Generates a full completion for `prompt`.
    async fn complete(&self, prompt: &str) -> Result<String, ProviderError>;

    /// Generates a completion as a stream of text fragments.
    fn complete_stream(&self, prompt: &str) -> BoxStream<'static, Result<String, ProviderError>>;

    /// Embeds `text`; `is_query` selects the query-side embedding task
    /// for backends that distinguish document and query vectors.
    async fn embed(&self, text: &str, is_query: bool) -> Result<Vec<f32>, ProviderError>;
}
