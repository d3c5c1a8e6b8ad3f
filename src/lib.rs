//! # Pagesage: Retrieval-Augmented Page Answering
//!
//! Pagesage answers questions about the web page a user is currently
//! reading. Given a question and the page's text, it decides whether
//! extra context is needed, pulls that context from a local per-source
//! vector index or a time-budgeted external search, assembles a grounded
//! prompt, asks a language model, and judges whether the answer is
//! sufficient — retrying the search-and-generate cycle at most once.
//!
//! ## Module guide
//!
//! - [`chunker`]: overlapping fixed-size text windows, shared by note
//!   extraction and index ingestion.
//! - [`index`]: per-source on-disk vector store with idempotent upsert
//!   and cosine top-k retrieval.
//! - [`search`]: result cache, provider seam, and the budget-enforcing
//!   search gateway.
//! - [`llm`]: generation (blocking and streaming), lenient JSON mode,
//!   and embeddings under hard timeouts.
//! - [`planner`]: search-need assessment and query synthesis.
//! - [`orchestrator`]: the fixed-topology state machine tying it all
//!   together.
//! - [`config`]: every threshold the pipeline consults, with environment
//!   overrides.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use pagesage::config::AgentConfig;
//! use pagesage::llm::HttpCompletionProvider;
//! use pagesage::orchestrator::{AgentOrchestrator, PageContext};
//! use pagesage::search::HttpSearchProvider;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let client = reqwest::Client::new();
//! let config = AgentConfig::from_env();
//! let completion = HttpCompletionProvider::from_env(client.clone())
//!     .ok_or("LLM_API_KEY is required")?;
//! let search = HttpSearchProvider::from_env(client)
//!     .ok_or("SEARCH_API_KEY is required")?;
//! let orchestrator =
//!     AgentOrchestrator::new(config, Arc::new(completion), Arc::new(search));
//!
//! let page = PageContext::new(
//!     "https://example.com/article",
//!     "An Article",
//!     "The page text…",
//! );
//! let reply = orchestrator.invoke("What is this page about?", page, false).await?;
//! println!("{}", reply.answer);
//! # Ok(())
//! # }
//! ```
//!
//! Every external dependency degrades to a value rather than an error:
//! a timed-out generation becomes a configured message, a failed search
//! becomes an error-carrying result the prompt simply omits, and a
//! missing embedding skips index participation for that request.

pub mod chunker;
pub mod config;
pub mod index;
pub mod llm;
pub mod orchestrator;
pub mod planner;
pub mod provider;
pub mod search;
pub mod telemetry;
