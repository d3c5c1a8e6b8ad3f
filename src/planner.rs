//! Search-need assessment and query synthesis.
//!
//! Both decisions are model-assisted but never model-dependent: a parse
//! failure or a disabled model path falls back to heuristics, and a
//! broken assessment fails open toward searching (a wasted search is
//! recoverable, a hallucinated answer is not).

use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;

use crate::chunker::truncate_chars;
use crate::config::AgentConfig;
use crate::llm::LlmGateway;

/// Question/page excerpt folded into assessment prompts.
const ASSESS_EXCERPT_CHARS: usize = 1_500;
/// Upper bound on synthesized queries.
const MAX_QUERIES: usize = 3;

/// Outcome of the search-need assessment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SearchDecision {
    pub need_search: bool,
    /// Model-suggested query, when the assessment produced one.
    pub suggested_query: Option<String>,
    /// Short human-readable reason, kept for the stage trace.
    pub rationale: String,
}

impl SearchDecision {
    fn no_search(rationale: &str) -> Self {
        Self {
            need_search: false,
            suggested_query: None,
            rationale: rationale.to_string(),
        }
    }

    fn search(rationale: &str) -> Self {
        Self {
            need_search: true,
            suggested_query: None,
            rationale: rationale.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct NeedSearchAssessment {
    #[serde(default)]
    need_search: bool,
    #[serde(default)]
    search_query: Option<String>,
    #[serde(default)]
    rationale: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SynthesizedQueries {
    #[serde(default)]
    queries: Vec<String>,
}

/// Decides whether to search and what to search for.
#[derive(Clone)]
pub struct QueryPlanner {
    llm: Arc<LlmGateway>,
    config: Arc<AgentConfig>,
}

impl QueryPlanner {
    pub fn new(llm: Arc<LlmGateway>, config: Arc<AgentConfig>) -> Self {
        Self { llm, config }
    }

    /// Decides whether external search should run for this question.
    ///
    /// Precedence: configuration that disables search wins over
    /// everything, then an explicit force flag, then the page-size
    /// heuristic, then the model's own judgment. When the model path is
    /// active but its answer cannot be parsed, the decision fails open
    /// to searching.
    pub async fn assess_need_search(
        &self,
        question: &str,
        page_text: &str,
        notes: &[String],
        force: bool,
    ) -> SearchDecision {
        if self.config.search_disabled() {
            return SearchDecision::no_search("search disabled by configuration");
        }
        if force {
            return SearchDecision::search("search forced by caller");
        }

        let context_chars = page_text.chars().count()
            + notes.iter().map(|note| note.chars().count()).sum::<usize>();
        if !self.config.assess_with_llm {
            return if context_chars >= self.config.min_context_chars {
                SearchDecision::no_search("heuristic: page context looks sufficient")
            } else {
                SearchDecision::search("heuristic: page context too thin")
            };
        }

        let prompt = format!(
            "Decide whether answering the user's question requires a web search \
beyond the page content below.\n\
Return JSON: {{\"need_search\": bool, \"search_query\": string or null, \
\"rationale\": short string}}.\n\n\
Question: {}\n\nPage excerpt:\n{}\n\nNotes:\n{}",
            question,
            truncate_chars(page_text, ASSESS_EXCERPT_CHARS),
            if notes.is_empty() {
                "(none)".to_string()
            } else {
                notes.join("\n")
            },
        );
        match self.llm.generate_json(&prompt).await {
            Some(value) => {
                let assessment: NeedSearchAssessment =
                    serde_json::from_value(value).unwrap_or(NeedSearchAssessment {
                        need_search: true,
                        search_query: None,
                        rationale: None,
                    });
                SearchDecision {
                    need_search: assessment.need_search,
                    suggested_query: assessment
                        .search_query
                        .filter(|query| !query.trim().is_empty()),
                    rationale: assessment
                        .rationale
                        .unwrap_or_else(|| "model assessment".to_string()),
                }
            }
            None => {
                debug!("need-search assessment did not parse; failing open");
                SearchDecision::search("assessment unavailable; searching to be safe")
            }
        }
    }

    /// Produces one to three deduplicated search queries for `question`.
    ///
    /// The model proposes; the deterministic fallback of
    /// "question plus page title" guarantees at least one query even when
    /// the model is down.
    pub async fn synthesize_queries(
        &self,
        question: &str,
        title: &str,
        suggested: Option<&str>,
    ) -> Vec<String> {
        let mut queries: Vec<String> = Vec::new();
        if let Some(query) = suggested {
            push_unique(&mut queries, query);
        }

        let prompt = format!(
            "Write up to {MAX_QUERIES} short web search queries that would help answer \
the question below. Prefer specific phrasings over broad ones.\n\
Return JSON: {{\"queries\": [string, ...]}}.\n\n\
Question: {question}\nPage title: {title}",
        );
        if let Some(value) = self.llm.generate_json(&prompt).await {
            if let Ok(parsed) = serde_json::from_value::<SynthesizedQueries>(value) {
                for query in parsed.queries {
                    push_unique(&mut queries, &query);
                }
            }
        }

        if queries.is_empty() {
            let fallback = if title.trim().is_empty() {
                question.trim().to_string()
            } else {
                format!("{} {}", question.trim(), title.trim())
            };
            push_unique(&mut queries, &fallback);
        }
        queries.truncate(MAX_QUERIES);
        queries
    }
}

fn push_unique(queries: &mut Vec<String>, candidate: &str) {
    let trimmed = candidate.trim();
    if trimmed.is_empty() {
        return;
    }
    let folded = trimmed.to_lowercase();
    if queries.iter().any(|existing| existing.to_lowercase() == folded) {
        return;
    }
    queries.push(trimmed.to_string());
}
