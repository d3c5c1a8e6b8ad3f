//! Per-request state threaded through the pipeline.

use url::Url;

use crate::search::SearchResponse;

/// The document the question is being asked about.
#[derive(Clone, Debug, Default)]
pub struct PageContext {
    pub url: String,
    pub title: String,
    pub text: String,
}

impl PageContext {
    pub fn new(
        url: impl Into<String>,
        title: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            text: text.into(),
        }
    }

    /// Normalized host of the page URL, when it parses.
    pub fn host(&self) -> Option<String> {
        Url::parse(self.url.trim())
            .ok()
            .and_then(|url| url.host_str().map(|host| host.to_lowercase()))
    }
}

/// Pipeline stages, in topology order.
///
/// Transitions are decided by the stage handlers; this enum only names
/// the positions so the driver loop and the trace stay in sync.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Prepare,
    ChunkNotes,
    PlanQuery,
    Search,
    ComposePrompt,
    Generate,
    Postprocess,
    Assess,
    EnsureAnswer,
    Finalize,
}

impl Stage {
    /// Trace label for the stage.
    pub fn name(self) -> &'static str {
        match self {
            Stage::Prepare => "prepare",
            Stage::ChunkNotes => "chunk_notes",
            Stage::PlanQuery => "plan_query",
            Stage::Search => "search",
            Stage::ComposePrompt => "compose_prompt",
            Stage::Generate => "generate",
            Stage::Postprocess => "postprocess",
            Stage::Assess => "assess",
            Stage::EnsureAnswer => "ensure_answer",
            Stage::Finalize => "finalize",
        }
    }
}

/// Outcome of the sufficiency assessment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Decision {
    /// Assessment has not run.
    #[default]
    Pending,
    /// One more search-and-generate pass was scheduled.
    Retry,
    /// The answer stands; proceed to finalize.
    Continue,
}

impl Decision {
    pub fn as_str(self) -> &'static str {
        match self {
            Decision::Pending => "pending",
            Decision::Retry => "retry",
            Decision::Continue => "continue",
        }
    }
}

/// Mutable request state. Created per invocation, discarded afterwards.
#[derive(Clone, Debug, Default)]
pub struct AgentState {
    pub question: String,
    pub page: PageContext,
    pub force_search: bool,

    pub need_search: bool,
    pub queries: Vec<String>,
    pub search: SearchResponse,
    pub used_search: bool,
    /// Retry passes taken so far; bounded by the retry budget.
    pub search_attempts: u32,

    pub notes: Vec<String>,
    pub focus: Vec<String>,
    pub prompt: String,
    pub answer: String,
    pub decision: Decision,
    /// Append-only record of visited stage names.
    pub trace: Vec<String>,
}

impl AgentState {
    pub fn new(question: String, page: PageContext, force_search: bool) -> Self {
        Self {
            question,
            page,
            force_search,
            ..Self::default()
        }
    }
}
