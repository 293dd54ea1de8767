//! Embedding provider trait and vector utilities.
//!
//! Defines the [`EmbeddingProvider`] trait that embedding backends
//! implement, the built-in deterministic [`HashingEmbedder`], and the
//! similarity functions used by the retriever:
//!
//! - [`cosine_similarity`] for dense embedding vectors.
//! - [`bag_of_words`] / [`sparse_cosine`] for the term-count fallback used
//!   when embeddings are unavailable.
//!
//! Provider selection from configuration lives in the `context-vault` app
//! crate.

use std::collections::BTreeMap;

use anyhow::{bail, Result};
use sha2::{Digest, Sha256};

/// Trait for embedding providers.
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"hashing-v1"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality.
    fn dims(&self) -> usize;
    /// Embed a batch of texts, returning one vector per input in order.
    fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;
}

/// Deterministic feature-hashing embedder.
///
/// Each term is hashed with SHA-256; the first 8 bytes pick a dimension and
/// the ninth byte picks a sign. The resulting vector is L2-normalized. No
/// model files or network access are needed, and identical text always
/// produces identical vectors.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dims: usize,
}

impl HashingEmbedder {
    pub fn new(dims: usize) -> Result<Self> {
        if dims == 0 {
            bail!("hashing embedder needs at least one dimension");
        }
        Ok(Self { dims })
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        for term in tokenize(text) {
            let digest = Sha256::digest(term.as_bytes());
            let mut bucket = [0u8; 8];
            bucket.copy_from_slice(&digest[..8]);
            let index = (u64::from_be_bytes(bucket) % self.dims as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            v[index] += sign;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

impl EmbeddingProvider for HashingEmbedder {
    fn model_name(&self) -> &str {
        "hashing-v1"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

/// Lowercase alphanumeric terms of `text`, in order.
///
/// ```rust
/// use context_vault_core::embedding::tokenize;
///
/// assert_eq!(tokenize("The quick, brown FOX!"), vec!["the", "quick", "brown", "fox"]);
/// ```
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Term-count vector of `text`.
pub fn bag_of_words(text: &str) -> BTreeMap<String, f32> {
    let mut counts = BTreeMap::new();
    for term in tokenize(text) {
        *counts.entry(term).or_insert(0.0) += 1.0;
    }
    counts
}

/// Cosine similarity between two sparse term vectors.
///
/// Returns `0.0` when either vector is empty.
pub fn sparse_cosine(a: &BTreeMap<String, f32>, b: &BTreeMap<String, f32>) -> f32 {
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let dot: f32 = small
        .iter()
        .filter_map(|(term, x)| large.get(term).map(|y| x * y))
        .sum();
    let norm_a = a.values().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.values().map(|x| x * x).sum::<f32>().sqrt();
    let denom = norm_a * norm_b;
    if denom < f32::EPSILON {
        return 0.0;
    }
    dot / denom
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`:
/// - `1.0` = identical direction
/// - `0.0` = orthogonal (unrelated)
/// - `-1.0` = opposite direction
///
/// Returns `0.0` for empty vectors or vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_opposite() {
        let sim = cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]);
        assert!((sim + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_empty_and_mismatched() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }

    #[test]
    fn test_bag_of_words_counts_terms() {
        let bow = bag_of_words("Fox fox, dog.");
        assert_eq!(bow.get("fox"), Some(&2.0));
        assert_eq!(bow.get("dog"), Some(&1.0));
    }

    #[test]
    fn test_sparse_cosine() {
        let a = bag_of_words("fox fox");
        let b = bag_of_words("fox");
        assert!((sparse_cosine(&a, &b) - 1.0).abs() < 1e-6);
        let c = bag_of_words("cat");
        assert_eq!(sparse_cosine(&a, &c), 0.0);
        assert_eq!(sparse_cosine(&a, &BTreeMap::new()), 0.0);
    }

    #[test]
    fn test_hashing_embedder_is_deterministic_and_normalized() {
        let e = HashingEmbedder::new(64).unwrap();
        let out = e.embed(&["quick brown fox", "quick brown fox"]).unwrap();
        assert_eq!(out[0], out[1]);
        assert_eq!(out[0].len(), 64);
        let norm: f32 = out[0].iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_hashing_embedder_similarity_tracks_overlap() {
        let e = HashingEmbedder::new(256).unwrap();
        let v = e.embed(&["fox jumps", "fox jumps high", "tax form"]).unwrap();
        assert!(cosine_similarity(&v[0], &v[1]) > cosine_similarity(&v[0], &v[2]));
    }

    #[test]
    fn test_hashing_embedder_rejects_zero_dims() {
        assert!(HashingEmbedder::new(0).is_err());
        let e = HashingEmbedder::new(8).unwrap();
        assert_eq!(e.embed(&[""]).unwrap()[0], vec![0.0; 8]);
    }
}
