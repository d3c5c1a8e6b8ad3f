//! Answer normalization and the non-empty-answer guarantees.

use std::sync::LazyLock;

use regex::Regex;

static MARKDOWN_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]+)\]\([^\)]+\)").unwrap());
static BRACKETED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[([^\]]+)\]").unwrap());
static BULLET: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n\s*[-*]\s+").unwrap());
static BLANK_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());
static HAS_DIGIT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d").unwrap());
static OVERVIEW_QUESTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        \bwhat\s+is\s+this\s+page\s+about
        | \bwhat\s+is\s+this\s+site
        | \boverview\b
        | \bsummary\b
        | о\s+ч[её]м\s+эта\s+страниц
        | что\s+за\s+страниц",
    )
    .unwrap()
});

/// Notes used by the synthesized fallback answer.
const FALLBACK_NOTE_LIMIT: usize = 6;
/// Page excerpt length for the last-resort fallback, in characters.
const FALLBACK_EXCERPT_CHARS: usize = 800;

/// Cleans a raw model answer for display: markdown links become their
/// text, stray brackets are stripped, bullets and newlines are
/// normalized, and blank-line runs collapse to one.
pub fn sanitize_answer(raw: &str) -> String {
    if raw.is_empty() {
        return String::new();
    }
    let text = MARKDOWN_LINK.replace_all(raw, "$1");
    let text = BRACKETED.replace_all(&text, "$1");
    let text = text.replace("\r\n", "\n").replace('\r', "\n");
    let text = BULLET.replace_all(&text, "\n- ");
    let text = BLANK_RUN.replace_all(&text, "\n\n");
    text.lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// True for broad "what is this page" style questions, where a long
/// answer is worse than a short one.
pub fn is_overview_question(question: &str) -> bool {
    OVERVIEW_QUESTION.is_match(&question.trim().to_lowercase())
}

/// Keeps at most `max` sentences, splitting after `.`, `!` or `?`
/// followed by whitespace.
pub fn limit_sentences(text: &str, max: usize) -> String {
    if max == 0 {
        return text.to_string();
    }
    let mut sentences: Vec<&str> = Vec::new();
    let mut start = 0usize;
    let mut previous_was_terminator = false;
    for (offset, ch) in text.char_indices() {
        if previous_was_terminator && ch.is_whitespace() {
            sentences.push(text[start..offset].trim());
            start = offset;
        }
        previous_was_terminator = matches!(ch, '.' | '!' | '?');
    }
    sentences.push(text[start..].trim());
    if sentences.len() <= max {
        return text.to_string();
    }
    sentences[..max].join(" ").trim().to_string()
}

/// Synthesizes a fallback answer when generation produced nothing:
/// bullet points from notes (numeric facts first), then a raw page
/// excerpt, then the configured last-resort message.
pub fn fallback_answer(notes: &[String], page_text: &str, no_answer_message: &str) -> String {
    if !notes.is_empty() {
        let mut prioritized: Vec<&String> =
            notes.iter().filter(|note| HAS_DIGIT.is_match(note)).collect();
        prioritized.extend(notes.iter().filter(|note| !HAS_DIGIT.is_match(note)));
        let bullets: Vec<String> = prioritized
            .into_iter()
            .take(FALLBACK_NOTE_LIMIT)
            .map(|note| format!("- {note}"))
            .collect();
        return bullets.join("\n");
    }
    let excerpt = crate::chunker::truncate_chars(page_text, FALLBACK_EXCERPT_CHARS).trim();
    if !excerpt.is_empty() {
        return excerpt.to_string();
    }
    no_answer_message.to_string()
}
