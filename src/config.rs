//! Runtime configuration for the answer pipeline.
//!
//! [`AgentConfig`] carries every threshold the pipeline consults: chunking
//! parameters, search budgets, cache sizing, retry policy, and the
//! user-facing degradation messages. It is read once when the orchestrator
//! is built; hot reload means rebuilding the orchestrator with a fresh
//! config.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration surface for [`AgentOrchestrator`](crate::orchestrator::AgentOrchestrator)
/// and the gateways it owns.
///
/// Defaults mirror production values; [`AgentConfig::from_env`] applies
/// environment overrides on top of them. Unparsable variables are ignored
/// rather than rejected, so a stray value can never prevent startup.
#[derive(Clone, Debug)]
pub struct AgentConfig {
    /// Hard cap on page text carried into the pipeline, in characters.
    pub page_text_cap: usize,
    /// Window size for note-extraction chunking, in characters.
    pub note_chunk_size: usize,
    /// Overlap between note-extraction windows, in characters.
    pub note_chunk_overlap: usize,
    /// At most this many leading windows are summarized into notes.
    pub note_chunk_limit: usize,
    /// Upper bound on collected notes.
    pub max_notes: usize,
    /// Page length above which note extraction kicks in. Zero means
    /// "twice `note_chunk_size`".
    pub note_threshold: usize,

    /// Characters of context kept on each side of a focus-term match.
    pub focus_window: usize,
    /// Upper bound on focus snippets injected into the prompt.
    pub max_focus_snippets: usize,

    /// Results requested per external search call. Zero disables search.
    pub search_num_results: usize,
    /// Wall-clock budget for the whole search stage, across query
    /// attempts and the research fallback. Zero disables search.
    pub search_time_budget: Duration,
    /// Per-hit content enrichment budget, in characters.
    pub search_snippet_chars: usize,
    /// Search cache entry lifetime.
    pub cache_ttl: Duration,
    /// Search cache capacity; the oldest ~10% are evicted at the cap.
    pub cache_capacity: usize,
    /// Master switch for the search cache.
    pub cache_enabled: bool,
    /// When true, the sufficiency retry bypasses the cache so it cannot
    /// re-judge the same stale results.
    pub fresh_search_on_retry: bool,
    /// When false, the planner relies on the page-size heuristic alone
    /// and never asks the model whether search is needed.
    pub assess_with_llm: bool,
    /// Page length at which the heuristic considers context sufficient.
    pub min_context_chars: usize,

    /// Root directory for per-source vector indexes.
    pub index_dir: PathBuf,
    /// Window size for index ingestion chunking, in characters.
    pub index_chunk_size: usize,
    /// Overlap between index ingestion windows, in characters.
    pub index_chunk_overlap: usize,
    /// Per-source chunk cap; oldest entries are evicted first.
    pub index_max_docs: usize,
    /// Top-k for vector retrieval into the prompt.
    pub retrieve_top_k: usize,
    /// Master switch for vector-index participation.
    pub index_enabled: bool,

    /// Hard timeout for a single generation or embedding call.
    pub generation_timeout: Duration,
    /// Characters of raw page text included in the composed prompt.
    pub prompt_text_cap: usize,
    /// Sentence cap applied to answers for overview-style questions.
    pub max_sentences: usize,
    /// Search results exposed to the caller after finalize.
    pub max_sources: usize,
    /// Bounded retries of the search-and-generate cycle.
    pub retry_budget: u32,

    /// Answer substituted when generation times out.
    pub timeout_message: String,
    /// Answer substituted when the model is rate limited.
    pub rate_limit_message: String,
    /// Last-resort answer when every fallback source is empty.
    pub no_answer_message: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            page_text_cap: 24_000,
            note_chunk_size: 3_500,
            note_chunk_overlap: 150,
            note_chunk_limit: 6,
            max_notes: 12,
            note_threshold: 0,
            focus_window: 260,
            max_focus_snippets: 6,
            search_num_results: 5,
            search_time_budget: Duration::from_millis(2_500),
            search_snippet_chars: 1_000,
            cache_ttl: Duration::from_secs(600),
            cache_capacity: 512,
            cache_enabled: true,
            fresh_search_on_retry: true,
            assess_with_llm: true,
            min_context_chars: 600,
            index_dir: PathBuf::from(".rag_index"),
            index_chunk_size: 900,
            index_chunk_overlap: 120,
            index_max_docs: 5_000,
            retrieve_top_k: 5,
            index_enabled: true,
            generation_timeout: Duration::from_secs(20),
            prompt_text_cap: 12_000,
            max_sentences: 10,
            max_sources: 3,
            retry_budget: 1,
            timeout_message: "The model took too long to respond. Please try again.".to_string(),
            rate_limit_message:
                "The model is temporarily rate limited. Please retry in a moment.".to_string(),
            no_answer_message: "No meaningful answer could be produced for this page.".to_string(),
        }
    }
}

impl AgentConfig {
    /// Builds a config from defaults plus environment overrides.
    ///
    /// A `.env` file is honored when present, matching how the rest of
    /// the deployment resolves its settings.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let mut config = Self::default();

        read_usize("PAGE_TEXT_CAP", &mut config.page_text_cap);
        read_usize("NOTE_CHUNK_SIZE", &mut config.note_chunk_size);
        read_usize("NOTE_CHUNK_OVERLAP", &mut config.note_chunk_overlap);
        read_usize("NOTE_CHUNK_LIMIT", &mut config.note_chunk_limit);
        read_usize("MAX_NOTES", &mut config.max_notes);
        read_usize("NOTE_THRESHOLD", &mut config.note_threshold);
        read_usize("FOCUS_WINDOW", &mut config.focus_window);
        read_usize("MAX_FOCUS_SNIPPETS", &mut config.max_focus_snippets);
        read_usize("SEARCH_NUM_RESULTS", &mut config.search_num_results);
        read_millis("SEARCH_TIME_BUDGET_MS", &mut config.search_time_budget);
        read_usize("SEARCH_SNIPPET_CHARS", &mut config.search_snippet_chars);
        read_secs("SEARCH_CACHE_TTL_S", &mut config.cache_ttl);
        read_usize("SEARCH_CACHE_MAX", &mut config.cache_capacity);
        if read_flag("SEARCH_CACHE_DISABLED") {
            config.cache_enabled = false;
        }
        read_bool("FRESH_SEARCH_ON_RETRY", &mut config.fresh_search_on_retry);
        read_bool("ASSESS_WITH_LLM", &mut config.assess_with_llm);
        read_usize("MIN_CONTEXT_CHARS", &mut config.min_context_chars);
        if let Ok(dir) = std::env::var("RAG_INDEX_DIR") {
            config.index_dir = PathBuf::from(dir);
        }
        read_usize("RAG_CHUNK_SIZE", &mut config.index_chunk_size);
        read_usize("RAG_CHUNK_OVERLAP", &mut config.index_chunk_overlap);
        read_usize("RAG_MAX_DOCS", &mut config.index_max_docs);
        read_usize("RAG_TOP_K", &mut config.retrieve_top_k);
        if read_flag("RAG_DISABLED") {
            config.index_enabled = false;
        }
        read_millis("GENERATION_TIMEOUT_MS", &mut config.generation_timeout);
        read_usize("PROMPT_TEXT_CAP", &mut config.prompt_text_cap);
        read_usize("MAX_SENTENCES", &mut config.max_sentences);
        read_usize("MAX_SOURCES", &mut config.max_sources);
        if let Some(budget) = read_parsed::<u32>("RETRY_BUDGET") {
            config.retry_budget = budget;
        }

        config
    }

    /// True when configuration rules out external search entirely: a zero
    /// result cap, a zero time budget, or a zero source cap.
    pub fn search_disabled(&self) -> bool {
        self.search_num_results == 0
            || self.search_time_budget.is_zero()
            || self.max_sources == 0
    }

    /// Page length above which note extraction runs.
    pub fn effective_note_threshold(&self) -> usize {
        if self.note_threshold > 0 {
            self.note_threshold
        } else {
            self.note_chunk_size * 2
        }
    }
}

fn read_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.trim().parse().ok()
}

fn read_usize(key: &str, slot: &mut usize) {
    if let Some(value) = read_parsed(key) {
        *slot = value;
    }
}

fn read_millis(key: &str, slot: &mut Duration) {
    if let Some(ms) = read_parsed::<u64>(key) {
        *slot = Duration::from_millis(ms);
    }
}

fn read_secs(key: &str, slot: &mut Duration) {
    if let Some(secs) = read_parsed::<u64>(key) {
        *slot = Duration::from_secs(secs);
    }
}

fn read_bool(key: &str, slot: &mut bool) {
    if let Ok(raw) = std::env::var(key) {
        match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => *slot = true,
            "0" | "false" | "no" => *slot = false,
            _ => {}
        }
    }
}

fn read_flag(key: &str) -> bool {
    matches!(
        std::env::var(key).as_deref().map(str::trim),
        Ok("1") | Ok("true") | Ok("yes")
    )
}
