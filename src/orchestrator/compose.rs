//! Prompt assembly: focus snippets, structured facts, and the
//! deterministic context layout handed to the model.

use std::sync::LazyLock;

use regex::Regex;

use crate::chunker::truncate_chars;
use crate::index::RetrievedChunk;
use crate::search::SearchHit;

static FOCUS_TERM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[a-zа-яё0-9]{3,}").unwrap());
static STRUCTURED_FACT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^(PRODUCT|BRAND|PRICE):\s*(.+)$").unwrap());

/// Structured facts folded into the prompt, at most.
const MAX_STRUCTURED_FACTS: usize = 6;
/// Notes folded into the prompt, at most.
const PROMPT_NOTE_LIMIT: usize = 6;
/// Per-snippet character caps inside the prompt.
const FOCUS_SNIPPET_CHARS: usize = 400;
const SEARCH_SNIPPET_CHARS: usize = 300;
const RETRIEVED_CHUNK_CHARS: usize = 400;
/// Search results folded into the prompt, at most.
const PROMPT_RESULT_LIMIT: usize = 3;

const PROMPT_INSTRUCTIONS: &str = "You are an assistant analyzing the content of a web page. \
Study the full page text, including lists and subheadings, before answering. \
Answer strictly from the page context; when it is not enough, use all \
provided data to prepare the answer. \
Format: short clear points; start list items with '- '. No links or meta remarks.";

/// Extracts windows of page text around occurrences of the question's
/// terms, so the model sees the most relevant passages first.
///
/// Matching is case-insensitive at the character level; windows are
/// measured in characters and deduplicated by position.
pub fn extract_focus_snippets(
    question: &str,
    page_text: &str,
    window: usize,
    max_snippets: usize,
) -> Vec<String> {
    if page_text.is_empty() || max_snippets == 0 {
        return Vec::new();
    }
    let chars: Vec<char> = page_text.chars().collect();
    let lowered: Vec<char> = chars
        .iter()
        .map(|c| c.to_lowercase().next().unwrap_or(*c))
        .collect();
    let question = question.to_lowercase();
    let mut seen_terms = rustc_hash::FxHashSet::default();
    let terms: Vec<&str> = FOCUS_TERM
        .find_iter(&question)
        .map(|found| found.as_str())
        .filter(|term| seen_terms.insert(*term))
        .collect();

    let mut snippets = Vec::new();
    let mut used = rustc_hash::FxHashSet::default();
    for term in terms {
        let term_chars: Vec<char> = term.chars().collect();
        let mut position = 0usize;
        while snippets.len() < max_snippets {
            let Some(found) = find_chars(&lowered, &term_chars, position) else {
                break;
            };
            let start = found.saturating_sub(window);
            let end = (found + term_chars.len() + window).min(chars.len());
            let snippet: String = chars[start..end].iter().collect();
            let snippet = snippet.trim().to_string();
            if !snippet.is_empty() && used.insert((start, end)) {
                snippets.push(snippet);
            }
            position = found + term_chars.len();
        }
        if snippets.len() >= max_snippets {
            break;
        }
    }
    snippets
}

fn find_chars(haystack: &[char], needle: &[char], from: usize) -> Option<usize> {
    if needle.is_empty() || from >= haystack.len() || needle.len() > haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|offset| from + offset)
}

/// Pulls `KEY: value` product facts out of the raw page text.
pub fn structured_facts(page_text: &str) -> Vec<String> {
    STRUCTURED_FACT
        .captures_iter(page_text)
        .take(MAX_STRUCTURED_FACTS)
        .map(|captures| format!("{}: {}", &captures[1], captures[2].trim()))
        .collect()
}

/// Everything the prompt is assembled from, gathered by the compose
/// stage.
pub struct PromptInputs<'a> {
    pub question: &'a str,
    pub url: &'a str,
    pub title: &'a str,
    pub page_text: &'a str,
    pub focus: &'a [String],
    pub notes: &'a [String],
    pub retrieved: &'a [RetrievedChunk],
    pub results: &'a [SearchHit],
    /// Character cap applied to the raw page text section.
    pub text_cap: usize,
}

/// Assembles the final prompt, sections in fixed priority order:
/// instructions, page metadata, focus snippets, structured facts,
/// retrieved index context, truncated raw text, notes, search snippets,
/// then the verbatim question.
pub fn compose_prompt(inputs: &PromptInputs<'_>) -> String {
    let mut parts: Vec<String> = vec![PROMPT_INSTRUCTIONS.to_string()];

    let mut lines: Vec<String> = Vec::new();
    if !inputs.url.is_empty() {
        lines.push(format!("URL: {}", inputs.url));
    }
    if !inputs.title.is_empty() {
        lines.push(format!("TITLE: {}", inputs.title));
    }
    if !inputs.focus.is_empty() {
        let items: Vec<String> = inputs
            .focus
            .iter()
            .map(|snippet| flatten(snippet, FOCUS_SNIPPET_CHARS))
            .collect();
        lines.push(format!("FOCUS SNIPPETS:\n- {}", items.join("\n- ")));
    }
    let facts = structured_facts(inputs.page_text);
    if !facts.is_empty() {
        lines.push(format!("STRUCTURED:\n- {}", facts.join("\n- ")));
    }
    if !inputs.retrieved.is_empty() {
        let items: Vec<String> = inputs
            .retrieved
            .iter()
            .map(|chunk| flatten(&chunk.text, RETRIEVED_CHUNK_CHARS))
            .collect();
        lines.push(format!("RETRIEVED CONTEXT:\n- {}", items.join("\n- ")));
    }
    if !inputs.page_text.is_empty() {
        lines.push(format!(
            "TEXT: {}",
            truncate_chars(inputs.page_text, inputs.text_cap)
        ));
    }
    if !inputs.notes.is_empty() {
        let items: Vec<&str> = inputs
            .notes
            .iter()
            .take(PROMPT_NOTE_LIMIT)
            .map(String::as_str)
            .collect();
        lines.push(format!("NOTES:\n- {}", items.join("\n- ")));
    }
    if !lines.is_empty() {
        parts.push(format!("PAGE CONTEXT:\n{}", lines.join("\n")));
    }

    let snippets: Vec<String> = inputs
        .results
        .iter()
        .take(PROMPT_RESULT_LIMIT)
        .map(|hit| flatten(&hit.snippet, SEARCH_SNIPPET_CHARS))
        .filter(|snippet| !snippet.is_empty())
        .collect();
    if !snippets.is_empty() {
        parts.push(format!("SEARCH RESULTS:\n- {}", snippets.join("\n- ")));
    }

    parts.push(format!("USER QUESTION:\n{}", inputs.question));
    parts.join("\n\n")
}

fn flatten(text: &str, cap: usize) -> String {
    let joined: String = text
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    truncate_chars(&joined, cap).to_string()
}
