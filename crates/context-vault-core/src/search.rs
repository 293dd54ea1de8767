//! Hybrid ranking over an already-filtered candidate set.
//!
//! The ranking function is pure: the caller (the vault) removes tombstoned
//! chunks and chunks of tombstoned documents before calling [`rank`], and
//! supplies the query embedding if one is available.
//!
//! # Hybrid Scoring Algorithm
//!
//! 1. Keyword score: Okapi BM25 of the query terms against each candidate,
//!    with document frequencies and average length taken over the candidate
//!    set.
//! 2. Vector score: cosine similarity between the query embedding and each
//!    candidate's embedding. When the query has no embedding, or any
//!    candidate lacks one of matching dimensionality, every candidate is
//!    scored with the bag-of-words cosine instead ([`VectorMode`]).
//! 3. Normalize both score sets to `[0, 1]` using min-max normalization.
//! 4. Merge: `score = (1 - α) × keyword + α × vector` (α defaults to 0.4).
//! 5. Stable sort by score (desc); ties keep candidate insertion order.
//! 6. Truncate to `final_limit`.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::embedding::{bag_of_words, cosine_similarity, sparse_cosine, tokenize};
use crate::models::Chunk;

/// Snippet length in characters.
pub const SNIPPET_CHARS: usize = 240;

/// Retrieval tuning parameters, decoupled from application config.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchParams {
    /// Weight for vector vs keyword: `hybrid = (1-α)*keyword + α*vector`.
    pub hybrid_alpha: f64,
    /// Maximum results to return.
    pub final_limit: usize,
    pub bm25_k1: f64,
    pub bm25_b: f64,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            hybrid_alpha: 0.4,
            final_limit: 12,
            bm25_k1: 1.2,
            bm25_b: 0.75,
        }
    }
}

/// Which signal produced the vector score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorMode {
    Embedding,
    BagOfWords,
}

/// A ranked chunk with its score breakdown.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredChunk {
    pub chunk_id: String,
    pub document_id: String,
    pub start: usize,
    pub end: usize,
    /// Fused score in `[0.0, 1.0]`.
    pub score: f64,
    /// Normalized keyword (BM25) score.
    pub keyword_score: f64,
    /// Normalized vector score.
    pub vector_score: f64,
    pub vector_mode: VectorMode,
    pub snippet: String,
}

/// Rank `candidates` (in insertion order) for `query`.
///
/// Returns an empty list for a blank query or an empty candidate set.
/// Otherwise every candidate is scored, so a non-empty index always
/// produces results even when no term matches.
pub fn rank(
    query: &str,
    query_vec: Option<&[f32]>,
    candidates: &[&Chunk],
    params: &SearchParams,
) -> Vec<ScoredChunk> {
    if query.trim().is_empty() || candidates.is_empty() || params.final_limit == 0 {
        return Vec::new();
    }

    let keyword = normalize_scores(&bm25_scores(query, candidates, params));
    let (mode, raw_vector) = vector_scores(query, query_vec, candidates);
    let vector = normalize_scores(&raw_vector);
    let alpha = params.hybrid_alpha;

    let mut scored: Vec<ScoredChunk> = candidates
        .iter()
        .zip(keyword.iter().zip(vector.iter()))
        .map(|(chunk, (&k, &v))| ScoredChunk {
            chunk_id: chunk.id.clone(),
            document_id: chunk.document_id.clone(),
            start: chunk.start,
            end: chunk.end,
            score: (1.0 - alpha) * k + alpha * v,
            keyword_score: k,
            vector_score: v,
            vector_mode: mode,
            snippet: snippet(&chunk.text),
        })
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    scored.truncate(params.final_limit);
    scored
}

/// Okapi BM25 per candidate.
pub fn bm25_scores(query: &str, candidates: &[&Chunk], params: &SearchParams) -> Vec<f64> {
    let terms: BTreeSet<String> = tokenize(query).into_iter().collect();
    let docs: Vec<BTreeMap<String, f64>> = candidates
        .iter()
        .map(|c| {
            let mut tf = BTreeMap::new();
            for t in tokenize(&c.text) {
                *tf.entry(t).or_insert(0.0) += 1.0;
            }
            tf
        })
        .collect();
    let lengths: Vec<f64> = docs.iter().map(|d| d.values().sum()).collect();
    let n = candidates.len() as f64;
    let avgdl = (lengths.iter().sum::<f64>() / n).max(f64::EPSILON);

    let idf: BTreeMap<&str, f64> = terms
        .iter()
        .map(|t| {
            let df = docs.iter().filter(|d| d.contains_key(t)).count() as f64;
            (t.as_str(), (1.0 + (n - df + 0.5) / (df + 0.5)).ln())
        })
        .collect();

    let (k1, b) = (params.bm25_k1, params.bm25_b);
    docs.iter()
        .zip(lengths.iter())
        .map(|(tf, &dl)| {
            idf.iter()
                .map(|(term, idf)| {
                    let f = tf.get(*term).copied().unwrap_or(0.0);
                    idf * f * (k1 + 1.0) / (f + k1 * (1.0 - b + b * dl / avgdl))
                })
                .sum()
        })
        .collect()
}

fn vector_scores(
    query: &str,
    query_vec: Option<&[f32]>,
    candidates: &[&Chunk],
) -> (VectorMode, Vec<f64>) {
    if let Some(qv) = query_vec {
        let usable = !qv.is_empty()
            && candidates
                .iter()
                .all(|c| c.embedding.as_ref().is_some_and(|e| e.len() == qv.len()));
        if usable {
            let scores = candidates
                .iter()
                .map(|c| {
                    let e = c.embedding.as_deref().unwrap_or_default();
                    finite(cosine_similarity(qv, e))
                })
                .collect();
            return (VectorMode::Embedding, scores);
        }
    }

    let q = bag_of_words(query);
    let scores = candidates
        .iter()
        .map(|c| finite(sparse_cosine(&q, &bag_of_words(&c.text))))
        .collect();
    (VectorMode::BagOfWords, scores)
}

fn finite(v: f32) -> f64 {
    if v.is_finite() {
        f64::from(v)
    } else {
        0.0
    }
}

/// Min-max normalize raw scores to `[0.0, 1.0]`.
///
/// If all scores are equal they normalize to `1.0`, unless they are all
/// zero (no signal), in which case they stay `0.0`.
pub fn normalize_scores(raw: &[f64]) -> Vec<f64> {
    if raw.is_empty() {
        return Vec::new();
    }

    let s_min = raw.iter().copied().fold(f64::INFINITY, f64::min);
    let s_max = raw.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    raw.iter()
        .map(|&s| {
            if (s_max - s_min).abs() < f64::EPSILON {
                if s_max.abs() < f64::EPSILON {
                    0.0
                } else {
                    1.0
                }
            } else {
                (s - s_min) / (s_max - s_min)
            }
        })
        .collect()
}

/// The first [`SNIPPET_CHARS`] characters of `text`.
pub fn snippet(text: &str) -> String {
    text.chars().take(SNIPPET_CHARS).collect()
}
