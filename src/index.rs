//! Per-source on-disk vector index with idempotent upsert and cosine
//! top-k retrieval.
//!
//! Each source (normalized document host) owns one JSONL file under the
//! index root; every line is one [`IndexEntry`]. The whole per-source set
//! is loaded on read — the store is append-mostly and deliberately not a
//! database. Writes go through a temporary file plus an atomic rename so
//! a crash mid-write never corrupts the existing index.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};

use crate::chunker::{chunk, truncate_chars};
use crate::llm::Embedder;

/// Characters of chunk text folded into the entry id.
const ID_PREFIX_CHARS: usize = 200;

/// Errors surfaced by index persistence.
///
/// Retrieval never returns these; a missing or partially unreadable
/// index degrades to fewer (or zero) results instead.
#[derive(Debug, Error, Diagnostic)]
pub enum IndexError {
    #[error("index io failure: {0}")]
    #[diagnostic(
        code(pagesage::index::io),
        help("Check that the index directory exists and is writable.")
    )]
    Io(#[from] std::io::Error),

    #[error("index entry serialization failed: {0}")]
    #[diagnostic(code(pagesage::index::serde))]
    Serde(#[from] serde_json::Error),
}

/// One persisted chunk: content-addressed id, text, provenance, vector.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: String,
    pub url: String,
    pub title: String,
    pub text: String,
    pub embedding: Vec<f32>,
    pub ingested_at: DateTime<Utc>,
}

/// A retrieval result ranked by cosine similarity.
#[derive(Clone, Debug, PartialEq)]
pub struct RetrievedChunk {
    pub text: String,
    pub url: String,
    pub title: String,
    pub score: f32,
}

/// Ingestion parameters for one upsert call.
#[derive(Clone, Copy, Debug)]
pub struct UpsertParams {
    pub chunk_size: usize,
    pub overlap: usize,
    /// Per-source chunk cap; zero means unbounded.
    pub max_docs: usize,
}

/// Handle to the on-disk index root.
#[derive(Clone, Debug)]
pub struct VectorIndex {
    root: PathBuf,
}

impl VectorIndex {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn index_path(&self, source: &str) -> PathBuf {
        self.root.join(sanitize_source(source)).join("index.jsonl")
    }

    /// Chunks `text`, embeds each new chunk, and appends the results to
    /// the source's entry set, evicting the oldest entries past
    /// `max_docs`. Returns the number of chunks actually added.
    ///
    /// Re-ingesting identical content is a no-op: ids are derived from
    /// `(url, chunk ordinal, chunk prefix)`. A chunk whose embedding
    /// fails is skipped, not fatal.
    pub async fn upsert(
        &self,
        source: &str,
        url: &str,
        title: &str,
        text: &str,
        embedder: &dyn Embedder,
        params: UpsertParams,
    ) -> Result<usize, IndexError> {
        if source.is_empty() || text.is_empty() {
            return Ok(0);
        }
        let mut entries = self.load(source).await;
        let mut seen: rustc_hash::FxHashSet<String> =
            entries.iter().map(|entry| entry.id.clone()).collect();

        let mut added = 0usize;
        for (ordinal, window) in chunk(text, params.chunk_size, params.overlap)
            .into_iter()
            .enumerate()
        {
            let id = entry_id(url, ordinal, window);
            if seen.contains(&id) {
                continue;
            }
            let Some(embedding) = embedder.embed(window, false).await else {
                debug!(ordinal, "skipping chunk without embedding");
                continue;
            };
            entries.push(IndexEntry {
                id: id.clone(),
                url: url.to_string(),
                title: title.to_string(),
                text: window.to_string(),
                embedding,
                ingested_at: Utc::now(),
            });
            seen.insert(id);
            added += 1;
        }

        if params.max_docs > 0 && entries.len() > params.max_docs {
            let excess = entries.len() - params.max_docs;
            entries.drain(..excess);
        }

        if added > 0 {
            self.save(source, &entries).await?;
        }
        Ok(added)
    }

    /// Scores every entry of `source` against the embedded query and
    /// returns the `k` best, descending by cosine score with insertion
    /// order breaking ties.
    ///
    /// Soft-fails to an empty list when the query cannot be embedded or
    /// the index is missing.
    pub async fn retrieve_top_k(
        &self,
        source: &str,
        query: &str,
        k: usize,
        embedder: &dyn Embedder,
    ) -> Vec<RetrievedChunk> {
        if source.is_empty() || query.is_empty() || k == 0 {
            return Vec::new();
        }
        let Some(query_vector) = embedder.embed(query, true).await else {
            debug!("query embedding unavailable; skipping retrieval");
            return Vec::new();
        };
        let entries = self.load(source).await;
        let mut scored: Vec<(f32, &IndexEntry)> = entries
            .iter()
            .map(|entry| (cosine(&query_vector, &entry.embedding), entry))
            .collect();
        // stable sort keeps insertion order for equal scores
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored
            .into_iter()
            .take(k)
            .map(|(score, entry)| RetrievedChunk {
                text: entry.text.clone(),
                url: entry.url.clone(),
                title: entry.title.clone(),
                score,
            })
            .collect()
    }

    /// Number of entries currently persisted for `source`.
    pub async fn len(&self, source: &str) -> usize {
        self.load(source).await.len()
    }

    async fn load(&self, source: &str) -> Vec<IndexEntry> {
        let path = self.index_path(source);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "index load failed");
                return Vec::new();
            }
        };
        raw.lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str(line) {
                Ok(entry) => Some(entry),
                Err(err) => {
                    debug!(error = %err, "skipping unreadable index line");
                    None
                }
            })
            .collect()
    }

    async fn save(&self, source: &str, entries: &[IndexEntry]) -> Result<(), IndexError> {
        let path = self.index_path(source);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut body = String::new();
        for entry in entries {
            body.push_str(&serde_json::to_string(entry)?);
            body.push('\n');
        }
        let tmp = path.with_extension("jsonl.tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

/// Deterministic content-addressed id for one chunk.
fn entry_id(url: &str, ordinal: usize, window: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hasher.update(b"\n");
    hasher.update(ordinal.to_string().as_bytes());
    hasher.update(b"\n");
    hasher.update(truncate_chars(window, ID_PREFIX_CHARS).as_bytes());
    let digest = hasher.finalize();
    let mut id = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(id, "{byte:02x}");
    }
    id
}

/// Normalizes a source key into a safe directory name.
fn sanitize_source(source: &str) -> String {
    let cleaned: String = source
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_'))
        .collect();
    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned
    }
}

/// Cosine similarity; 0.0 for empty, zero-norm, or mismatched vectors.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a <= 0.0 || norm_b <= 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Maps each distinct text to a distinct axis-aligned unit vector so
    /// cosine scores are exactly 1.0 for matches and 0.0 otherwise.
    struct AxisEmbedder {
        dimensions: usize,
        calls: AtomicUsize,
    }

    impl AxisEmbedder {
        fn new(dimensions: usize) -> Self {
            Self {
                dimensions,
                calls: AtomicUsize::new(0),
            }
        }

        fn axis_for(&self, text: &str) -> usize {
            (text.len() + text.chars().map(|c| c as usize).sum::<usize>()) % self.dimensions
        }
    }

    #[async_trait]
    impl Embedder for AxisEmbedder {
        async fn embed(&self, text: &str, _is_query: bool) -> Option<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut vector = vec![0.0; self.dimensions];
            vector[self.axis_for(text)] = 1.0;
            Some(vector)
        }
    }

    struct NoEmbedder;

    #[async_trait]
    impl Embedder for NoEmbedder {
        async fn embed(&self, _text: &str, _is_query: bool) -> Option<Vec<f32>> {
            None
        }
    }

    /// Embeds everything to the same vector, so every entry scores
    /// identically against every query.
    struct UniformEmbedder {
        dimensions: usize,
    }

    #[async_trait]
    impl Embedder for UniformEmbedder {
        async fn embed(&self, _text: &str, _is_query: bool) -> Option<Vec<f32>> {
            Some(vec![1.0; self.dimensions])
        }
    }

    fn params(chunk_size: usize, max_docs: usize) -> UpsertParams {
        UpsertParams {
            chunk_size,
            overlap: 0,
            max_docs,
        }
    }

    #[test]
    fn cosine_edge_cases() {
        assert_eq!(cosine(&[], &[]), 0.0);
        assert_eq!(cosine(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine(&[0.0, 0.0], &[0.0, 0.0]), 0.0);
        assert!((cosine(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!((cosine(&[1.0, 0.0], &[0.0, 1.0])).abs() < 1e-6);
    }

    #[test]
    fn entry_ids_are_stable_and_distinct() {
        let a = entry_id("https://a", 0, "chunk text");
        assert_eq!(a, entry_id("https://a", 0, "chunk text"));
        assert_ne!(a, entry_id("https://a", 1, "chunk text"));
        assert_ne!(a, entry_id("https://b", 0, "chunk text"));
    }

    #[test]
    fn source_names_are_sanitized() {
        assert_eq!(sanitize_source("Docs.Example.COM"), "docs.example.com");
        assert_eq!(sanitize_source("a/b\\c"), "abc");
        assert_eq!(sanitize_source("///"), "unknown");
    }

    #[tokio::test]
    async fn upsert_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let index = VectorIndex::new(dir.path());
        let embedder = AxisEmbedder::new(8);

        let first = index
            .upsert("host", "https://host/p", "T", "abcdefghij", &embedder, params(4, 100))
            .await
            .unwrap();
        assert!(first > 0);
        let second = index
            .upsert("host", "https://host/p", "T", "abcdefghij", &embedder, params(4, 100))
            .await
            .unwrap();
        assert_eq!(second, 0);
        assert_eq!(index.len("host").await, first);
    }

    #[tokio::test]
    async fn eviction_keeps_the_newest_entries() {
        let dir = tempfile::tempdir().unwrap();
        let index = VectorIndex::new(dir.path());
        let embedder = AxisEmbedder::new(16);

        for page in 0..6 {
            index
                .upsert(
                    "host",
                    &format!("https://host/p{page}"),
                    "T",
                    &format!("page number {page} body"),
                    &embedder,
                    params(100, 4),
                )
                .await
                .unwrap();
        }
        assert_eq!(index.len("host").await, 4);

        // the survivors are the four most recently inserted, oldest first
        let uniform = UniformEmbedder { dimensions: 16 };
        let survivors: Vec<String> = index
            .retrieve_top_k("host", "q", 10, &uniform)
            .await
            .into_iter()
            .map(|chunk| chunk.url)
            .collect();
        assert_eq!(
            survivors,
            vec![
                "https://host/p2".to_string(),
                "https://host/p3".to_string(),
                "https://host/p4".to_string(),
                "https://host/p5".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn retrieval_orders_by_score_then_insertion() {
        let dir = tempfile::tempdir().unwrap();
        let index = VectorIndex::new(dir.path());
        let embedder = AxisEmbedder::new(8);

        index
            .upsert("host", "https://host/a", "A", "aaaa", &embedder, params(100, 100))
            .await
            .unwrap();
        index
            .upsert("host", "https://host/b", "B", "bbbb", &embedder, params(100, 100))
            .await
            .unwrap();

        // query embeds onto the same axis as "aaaa"
        let results = index.retrieve_top_k("host", "aaaa", 5, &embedder).await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].url, "https://host/a");
        assert!(results[0].score > results[1].score);
        assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[tokio::test]
    async fn equal_scores_keep_insertion_order() {
        let dir = tempfile::tempdir().unwrap();
        let index = VectorIndex::new(dir.path());
        let uniform = UniformEmbedder { dimensions: 8 };

        for label in ["first", "second", "third"] {
            index
                .upsert(
                    "host",
                    &format!("https://host/{label}"),
                    label,
                    &format!("{label} entry body"),
                    &uniform,
                    params(100, 100),
                )
                .await
                .unwrap();
        }

        // every entry ties against the query; order must be insertion order
        let results = index.retrieve_top_k("host", "query", 3, &uniform).await;
        let urls: Vec<&str> = results.iter().map(|chunk| chunk.url.as_str()).collect();
        assert_eq!(
            urls,
            vec!["https://host/first", "https://host/second", "https://host/third"]
        );
        assert!(results.windows(2).all(|w| w[0].score == w[1].score));
    }

    #[tokio::test]
    async fn embedding_failure_soft_fails() {
        let dir = tempfile::tempdir().unwrap();
        let index = VectorIndex::new(dir.path());

        let added = index
            .upsert("host", "https://host/a", "A", "text", &NoEmbedder, params(100, 100))
            .await
            .unwrap();
        assert_eq!(added, 0);
        assert_eq!(index.len("host").await, 0);
        assert!(
            index
                .retrieve_top_k("host", "query", 3, &NoEmbedder)
                .await
                .is_empty()
        );
    }

    #[tokio::test]
    async fn retrieval_tolerates_mismatched_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let index = VectorIndex::new(dir.path());
        let wide = AxisEmbedder::new(8);
        let narrow = AxisEmbedder::new(4);

        index
            .upsert("host", "https://host/a", "A", "entry text", &wide, params(100, 100))
            .await
            .unwrap();
        let results = index.retrieve_top_k("host", "query", 3, &narrow).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].score, 0.0);
    }
}
