//! Scripted providers shared by the integration tests.
//!
//! One completion double serves every LLM call site by branching on the
//! JSON schema embedded in each prompt: the need-search assessment asks
//! for `"need_search"`, query synthesis for `"queries"`, and the
//! sufficiency judgment for `"insufficient"`. Anything else is either a
//! note-summarization fragment or the final generation.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use pagesage::llm::CompletionProvider;
use pagesage::provider::ProviderError;
use pagesage::search::{SearchHit, SearchProvider, SearchRequest};

pub struct ScriptedCompletion {
    /// Final answer text for plain generation prompts.
    pub answer: String,
    /// Need-search verdict handed to the planner.
    pub need_search: bool,
    /// Queries handed back from query synthesis.
    pub queries: Vec<String>,
    /// How many sufficiency judgments should come back "insufficient".
    pub insufficient_budget: AtomicU32,
    /// Query suggested alongside an "insufficient" judgment.
    pub refined_query: String,
    pub generations: AtomicUsize,
}

impl ScriptedCompletion {
    pub fn answering(answer: &str) -> Self {
        Self {
            answer: answer.to_string(),
            need_search: false,
            queries: Vec::new(),
            insufficient_budget: AtomicU32::new(0),
            refined_query: "refined query".to_string(),
            generations: AtomicUsize::new(0),
        }
    }

    pub fn searching(answer: &str, queries: &[&str]) -> Self {
        Self {
            need_search: true,
            queries: queries.iter().map(|q| q.to_string()).collect(),
            ..Self::answering(answer)
        }
    }
}

#[async_trait]
impl CompletionProvider for ScriptedCompletion {
    async fn complete(&self, prompt: &str) -> Result<String, ProviderError> {
        if prompt.contains("\"need_search\"") {
            return Ok(format!(
                "{{\"need_search\": {}, \"search_query\": null, \"rationale\": \"scripted\"}}",
                self.need_search
            ));
        }
        if prompt.contains("\"insufficient\"") {
            let remaining = self
                .insufficient_budget
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            return Ok(if remaining {
                format!(
                    "{{\"insufficient\": true, \"should_search\": true, \"search_query\": \"{}\"}}",
                    self.refined_query
                )
            } else {
                "{\"insufficient\": false, \"should_search\": false}".to_string()
            });
        }
        if prompt.contains("\"queries\"") {
            let list: Vec<String> = self.queries.iter().map(|q| format!("\"{q}\"")).collect();
            return Ok(format!("{{\"queries\": [{}]}}", list.join(", ")));
        }
        if prompt.contains("FRAGMENT") {
            return Ok("- key fact\n- released in 2021".to_string());
        }
        self.generations.fetch_add(1, Ordering::SeqCst);
        Ok(self.answer.clone())
    }

    fn complete_stream(&self, _prompt: &str) -> BoxStream<'static, Result<String, ProviderError>> {
        let answer = self.answer.clone();
        Box::pin(futures_util::stream::once(async move { Ok(answer) }))
    }

    async fn embed(&self, text: &str, _is_query: bool) -> Result<Vec<f32>, ProviderError> {
        let axis = (text.len() % 4) as usize;
        let mut vector = vec![0.0f32; 4];
        vector[axis] = 1.0;
        Ok(vector)
    }
}

/// Sleeps past any reasonable test timeout on every call.
pub struct SleepyCompletion {
    pub delay: Duration,
}

#[async_trait]
impl CompletionProvider for SleepyCompletion {
    async fn complete(&self, _prompt: &str) -> Result<String, ProviderError> {
        tokio::time::sleep(self.delay).await;
        Ok("too late".to_string())
    }

    fn complete_stream(&self, _prompt: &str) -> BoxStream<'static, Result<String, ProviderError>> {
        Box::pin(futures_util::stream::empty())
    }

    async fn embed(&self, _text: &str, _is_query: bool) -> Result<Vec<f32>, ProviderError> {
        tokio::time::sleep(self.delay).await;
        Ok(Vec::new())
    }
}

/// Fails every call, so generation degrades to an empty answer.
pub struct FailingCompletion;

#[async_trait]
impl CompletionProvider for FailingCompletion {
    async fn complete(&self, _prompt: &str) -> Result<String, ProviderError> {
        Err(ProviderError::Transport("connection refused".into()))
    }

    fn complete_stream(&self, _prompt: &str) -> BoxStream<'static, Result<String, ProviderError>> {
        Box::pin(futures_util::stream::once(async {
            Err(ProviderError::Transport("connection refused".into()))
        }))
    }

    async fn embed(&self, _text: &str, _is_query: bool) -> Result<Vec<f32>, ProviderError> {
        Err(ProviderError::Transport("connection refused".into()))
    }
}

/// Counting search double returning one fixed hit per query.
pub struct CountingSearch {
    pub searches: AtomicUsize,
    pub researches: AtomicUsize,
    /// When false, `search` returns an empty result set.
    pub productive: bool,
}

impl CountingSearch {
    pub fn productive() -> Arc<Self> {
        Arc::new(Self {
            searches: AtomicUsize::new(0),
            researches: AtomicUsize::new(0),
            productive: true,
        })
    }

    pub fn barren() -> Arc<Self> {
        Arc::new(Self {
            searches: AtomicUsize::new(0),
            researches: AtomicUsize::new(0),
            productive: false,
        })
    }
}

#[async_trait]
impl SearchProvider for CountingSearch {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>, ProviderError> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        if !self.productive {
            return Ok(Vec::new());
        }
        Ok(vec![SearchHit {
            title: format!("result for {}", request.query),
            url: "https://results.example/1".to_string(),
            snippet: "library X 9.9 was released".to_string(),
            ..Default::default()
        }])
    }

    async fn research(&self, _instructions: &str) -> Result<Vec<SearchHit>, ProviderError> {
        self.researches.fetch_add(1, Ordering::SeqCst);
        Ok(Vec::new())
    }
}
