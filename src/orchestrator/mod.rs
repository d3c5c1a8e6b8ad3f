//! Fixed-topology answer pipeline.
//!
//! One request is one pass of an explicit state machine:
//!
//! ```text
//! prepare -> [chunk_notes] -> plan_query -> [search] -> compose_prompt
//!   -> generate -> postprocess -> assess -> [search (one retry)]
//!   -> ensure_answer -> finalize
//! ```
//!
//! Branches are decided by the stage handlers and the retry loop is
//! bounded by the configured budget. No stage raises on a degraded
//! upstream; the only hard error is an empty question, rejected before
//! the machine starts.

mod answer;
mod compose;
mod state;

pub use state::{AgentState, Decision, PageContext, Stage};

use std::sync::Arc;

use futures_util::stream::BoxStream;
use miette::Diagnostic;
use parking_lot::Mutex;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::chunker::{chunk, truncate_chars};
use crate::config::AgentConfig;
use crate::index::{RetrievedChunk, UpsertParams, VectorIndex};
use crate::llm::{CompletionProvider, LlmGateway};
use crate::planner::QueryPlanner;
use crate::search::{SearchCache, SearchGateway, SearchHit, SearchProvider, detect_language};

/// Caller input rejected before orchestration begins.
#[derive(Debug, Error, Diagnostic)]
pub enum PipelineError {
    #[error("question must not be empty")]
    #[diagnostic(
        code(pagesage::orchestrator::empty_question),
        help("Provide a non-empty question; whitespace-only input is rejected.")
    )]
    EmptyQuestion,
}

/// Final pipeline output.
#[derive(Clone, Debug)]
pub struct AgentReply {
    pub answer: String,
    pub sources: Vec<SearchHit>,
    pub used_search: bool,
    pub decision: Decision,
    pub trace: Vec<String>,
}

/// Output of [`AgentOrchestrator::build_prompt_only`]: everything except
/// the generated answer, for callers that stream generation themselves.
#[derive(Clone, Debug)]
pub struct PreparedPrompt {
    pub prompt: String,
    pub sources: Vec<SearchHit>,
    pub used_search: bool,
    pub trace: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SufficiencyJudgment {
    #[serde(default)]
    insufficient: bool,
    #[serde(default)]
    should_search: bool,
    #[serde(default)]
    search_query: Option<String>,
}

/// The pipeline and the long-lived resources it owns: the model and
/// search gateways, the per-source vector index, and the last-seen
/// source used for cache invalidation.
pub struct AgentOrchestrator {
    config: Arc<AgentConfig>,
    llm: Arc<LlmGateway>,
    planner: QueryPlanner,
    search: SearchGateway,
    index: VectorIndex,
    last_source: Mutex<Option<String>>,
}

impl AgentOrchestrator {
    pub fn new(
        config: AgentConfig,
        completion: Arc<dyn CompletionProvider>,
        search_provider: Arc<dyn SearchProvider>,
    ) -> Self {
        let config = Arc::new(config);
        let llm = Arc::new(LlmGateway::new(completion, config.generation_timeout));
        let cache = Arc::new(SearchCache::new(config.cache_ttl, config.cache_capacity));
        Self {
            planner: QueryPlanner::new(llm.clone(), config.clone()),
            search: SearchGateway::new(search_provider, cache, config.clone()),
            index: VectorIndex::new(config.index_dir.clone()),
            llm,
            config,
            last_source: Mutex::new(None),
        }
    }

    /// Runs the full pipeline for one question.
    #[instrument(skip_all, fields(force_search))]
    pub async fn invoke(
        &self,
        question: &str,
        page: PageContext,
        force_search: bool,
    ) -> Result<AgentReply, PipelineError> {
        let mut state = self.start(question, page, force_search)?;
        self.drive(&mut state, false).await;
        info!(
            used_search = state.used_search,
            attempts = state.search_attempts,
            decision = state.decision.as_str(),
            trace_len = state.trace.len(),
            "pipeline finished"
        );
        Ok(AgentReply {
            answer: state.answer,
            sources: state.search.hits().to_vec(),
            used_search: state.used_search,
            decision: state.decision,
            trace: state.trace,
        })
    }

    /// Runs every stage up to and including prompt composition, leaving
    /// generation to the caller (the streaming path).
    pub async fn build_prompt_only(
        &self,
        question: &str,
        page: PageContext,
        force_search: bool,
    ) -> Result<PreparedPrompt, PipelineError> {
        let mut state = self.start(question, page, force_search)?;
        self.drive(&mut state, true).await;
        let sources: Vec<SearchHit> = state
            .search
            .hits()
            .iter()
            .take(self.config.max_sources)
            .cloned()
            .collect();
        Ok(PreparedPrompt {
            prompt: state.prompt,
            sources,
            used_search: state.used_search,
            trace: state.trace,
        })
    }

    /// Streams generation over an already composed prompt.
    pub fn answer_stream(&self, prompt: &str) -> BoxStream<'static, String> {
        self.llm.generate_text_stream(prompt)
    }

    fn start(
        &self,
        question: &str,
        page: PageContext,
        force_search: bool,
    ) -> Result<AgentState, PipelineError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(PipelineError::EmptyQuestion);
        }
        self.note_source_change(page.host().as_deref());
        Ok(AgentState::new(question.to_string(), page, force_search))
    }

    /// Drops cached search results for a source the user just navigated
    /// to, so a revisit after browsing elsewhere starts fresh.
    fn note_source_change(&self, host: Option<&str>) {
        let Some(host) = host else { return };
        let mut last = self.last_source.lock();
        if last.as_deref() != Some(host) {
            if last.is_some() {
                let removed = self.search.cache().invalidate_source(host);
                if removed > 0 {
                    debug!(host, removed, "invalidated cache entries for new source");
                }
            }
            *last = Some(host.to_string());
        }
    }

    async fn drive(&self, state: &mut AgentState, stop_before_generate: bool) {
        let mut stage = Stage::Prepare;
        loop {
            state.trace.push(stage.name().to_string());
            let next = match stage {
                Stage::Prepare => {
                    self.prepare(state);
                    let needs_chunking = state.page.text.chars().count()
                        > self.config.effective_note_threshold();
                    if needs_chunking {
                        Stage::ChunkNotes
                    } else {
                        Stage::PlanQuery
                    }
                }
                Stage::ChunkNotes => {
                    self.chunk_notes(state).await;
                    Stage::PlanQuery
                }
                Stage::PlanQuery => {
                    if self.plan_query(state).await {
                        Stage::Search
                    } else {
                        Stage::ComposePrompt
                    }
                }
                Stage::Search => {
                    self.run_search(state).await;
                    Stage::ComposePrompt
                }
                Stage::ComposePrompt => {
                    self.compose(state).await;
                    if stop_before_generate {
                        return;
                    }
                    Stage::Generate
                }
                Stage::Generate => {
                    self.generate(state).await;
                    Stage::Postprocess
                }
                Stage::Postprocess => {
                    self.postprocess(state);
                    Stage::Assess
                }
                Stage::Assess => {
                    if self.assess(state).await {
                        Stage::Search
                    } else {
                        Stage::EnsureAnswer
                    }
                }
                Stage::EnsureAnswer => {
                    self.ensure_answer(state);
                    Stage::Finalize
                }
                Stage::Finalize => {
                    self.finalize(state);
                    return;
                }
            };
            stage = next;
        }
    }

    fn prepare(&self, state: &mut AgentState) {
        let trimmed = state.page.text.trim();
        state.page.text = truncate_chars(trimmed, self.config.page_text_cap).to_string();
        state.focus = compose::extract_focus_snippets(
            &state.question,
            &state.page.text,
            self.config.focus_window,
            self.config.max_focus_snippets,
        );
    }

    /// Summarizes the leading page chunks into short bullet notes. A
    /// chunk that fails to summarize is skipped, not retried.
    async fn chunk_notes(&self, state: &mut AgentState) {
        if state.page.text.is_empty() {
            return;
        }
        let windows = chunk(
            &state.page.text,
            self.config.note_chunk_size,
            self.config.note_chunk_overlap,
        );
        let total = windows.len();
        let mut collected: Vec<String> = Vec::new();
        for (ordinal, window) in windows
            .into_iter()
            .take(self.config.note_chunk_limit)
            .enumerate()
        {
            let prompt = format!(
                "Read the page fragment below carefully. Extract the key facts, \
numbers, definitions, and subheadings. List one fact per line, each line \
starting with '- '.\n\nFRAGMENT {}/{}:\n{}",
                ordinal + 1,
                total,
                window,
            );
            let Some(text) = self.llm.generate_text(&prompt).await.as_text().map(str::to_string)
            else {
                debug!(ordinal, "note summarization failed; skipping chunk");
                continue;
            };
            for line in text.lines() {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                collected.push(line.strip_prefix("- ").unwrap_or(line).trim().to_string());
            }
            if collected.len() >= self.config.max_notes {
                break;
            }
        }
        collected.truncate(self.config.max_notes);
        state.notes = collected;
    }

    /// Returns true when the search branch should be taken.
    async fn plan_query(&self, state: &mut AgentState) -> bool {
        let decision = self
            .planner
            .assess_need_search(
                &state.question,
                &state.page.text,
                &state.notes,
                state.force_search,
            )
            .await;
        debug!(
            need_search = decision.need_search,
            rationale = %decision.rationale,
            "search-need decision"
        );
        state.need_search = decision.need_search;
        if !state.need_search {
            state.queries.clear();
            return false;
        }
        state.queries = self
            .planner
            .synthesize_queries(
                &state.question,
                &state.page.title,
                decision.suggested_query.as_deref(),
            )
            .await;
        true
    }

    async fn run_search(&self, state: &mut AgentState) {
        state.used_search = true;
        let language = detect_language(&format!("{} {}", state.question, state.page.title));
        let source = state.page.host().unwrap_or_else(|| "_".to_string());
        // A retry pass may bypass the cache so it cannot re-judge the
        // very results found insufficient.
        let use_cache =
            !(state.search_attempts > 0 && self.config.fresh_search_on_retry);
        state.search = self
            .search
            .search(&state.queries, &source, language, use_cache)
            .await;
    }

    async fn compose(&self, state: &mut AgentState) {
        let retrieved = self.index_context(state).await;
        state.prompt = compose::compose_prompt(&compose::PromptInputs {
            question: &state.question,
            url: &state.page.url,
            title: &state.page.title,
            page_text: &state.page.text,
            focus: &state.focus,
            notes: &state.notes,
            retrieved: &retrieved,
            results: state.search.hits(),
            text_cap: self.config.prompt_text_cap,
        });
    }

    /// Opportunistically ingests the current page, then retrieves the
    /// best-matching indexed chunks for the prompt. Any failure here
    /// degrades to an empty context block.
    async fn index_context(&self, state: &AgentState) -> Vec<RetrievedChunk> {
        if !self.config.index_enabled {
            return Vec::new();
        }
        let Some(source) = state.page.host() else {
            return Vec::new();
        };
        let upserted = self
            .index
            .upsert(
                &source,
                &state.page.url,
                &state.page.title,
                &state.page.text,
                &*self.llm,
                UpsertParams {
                    chunk_size: self.config.index_chunk_size,
                    overlap: self.config.index_chunk_overlap,
                    max_docs: self.config.index_max_docs,
                },
            )
            .await;
        match upserted {
            Ok(added) if added > 0 => debug!(added, %source, "indexed page chunks"),
            Ok(_) => {}
            Err(err) => debug!(error = %err, "index upsert failed; continuing without it"),
        }
        let query = state
            .queries
            .first()
            .map(String::as_str)
            .unwrap_or(&state.question);
        self.index
            .retrieve_top_k(&source, query, self.config.retrieve_top_k, &*self.llm)
            .await
    }

    async fn generate(&self, state: &mut AgentState) {
        let generation = self.llm.generate_text(&state.prompt).await;
        state.answer = generation.text_or_degraded(&self.config);
    }

    fn postprocess(&self, state: &mut AgentState) {
        let cleaned = answer::sanitize_answer(&state.answer);
        state.answer = if answer::is_overview_question(&state.question) {
            answer::limit_sentences(&cleaned, self.config.max_sentences)
        } else {
            cleaned
        };
    }

    /// Judges sufficiency and schedules at most one retry pass. Returns
    /// true when the machine should loop back to search.
    async fn assess(&self, state: &mut AgentState) -> bool {
        let judgment = self.judge_sufficiency(state).await;
        let need_retry = judgment.insufficient || judgment.should_search;
        let budget_left = state.search_attempts < self.config.retry_budget;
        if need_retry && budget_left && !self.config.search_disabled() {
            let refined = judgment
                .search_query
                .filter(|query| !query.trim().is_empty())
                .unwrap_or_else(|| {
                    format!("{} {}", state.question, state.page.title)
                        .trim()
                        .to_string()
                });
            let mut queries = vec![refined.clone()];
            queries.extend(
                state
                    .queries
                    .iter()
                    .filter(|existing| **existing != refined)
                    .cloned(),
            );
            queries.truncate(3);
            state.queries = queries;
            state.search_attempts += 1;
            state.decision = Decision::Retry;
            debug!(attempts = state.search_attempts, "answer judged insufficient; retrying");
            return true;
        }
        state.decision = Decision::Continue;
        false
    }

    async fn judge_sufficiency(&self, state: &AgentState) -> SufficiencyJudgment {
        let prompt = format!(
            "Judge whether the answer below sufficiently addresses the question.\n\
Return JSON: {{\"insufficient\": bool, \"should_search\": bool, \
\"search_query\": string or null}}.\n\n\
Question: {}\n\nAnswer:\n{}",
            state.question,
            truncate_chars(&state.answer, 2_000),
        );
        match self.llm.generate_json(&prompt).await {
            Some(value) => serde_json::from_value(value).unwrap_or_default(),
            None => {
                debug!("sufficiency judgment did not parse; keeping the answer");
                SufficiencyJudgment::default()
            }
        }
    }

    fn ensure_answer(&self, state: &mut AgentState) {
        if !state.answer.trim().is_empty() {
            return;
        }
        state.answer = answer::fallback_answer(
            &state.notes,
            &state.page.text,
            &self.config.no_answer_message,
        );
    }

    fn finalize(&self, state: &mut AgentState) {
        state.search = state.search.clone().truncated(self.config.max_sources);
    }
}
