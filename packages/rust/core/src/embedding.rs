//! Sentence-embedding boundary.
//!
//! The model itself is opaque: strings in, one fixed-length vector per string
//! out. [`BridgeEmbedder`](crate::bridge::BridgeEmbedder) talks to an external
//! process; [`CachedEmbedder`] memoizes any embedder per instruction string.

use std::collections::HashMap;

use sha2::{Digest, Sha256};
use tracing::debug;

use bridge_rlds_shared::{BridgeRldsError, NUM_INSTRUCTIONS, Result};

/// Maps instruction strings to embedding vectors.
pub trait Embedder {
    /// Embed each text. Must return exactly one vector per input.
    fn embed(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Length of every returned vector.
    fn dimension(&self) -> usize;

    /// Release backend resources (e.g. stop a subprocess).
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }

    /// `(hits, misses)` when the embedder caches.
    fn cache_stats(&self) -> (usize, usize) {
        (0, 0)
    }
}

impl<E: Embedder + ?Sized> Embedder for Box<E> {
    fn embed(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        (**self).embed(texts)
    }

    fn dimension(&self) -> usize {
        (**self).dimension()
    }

    fn finish(&mut self) -> Result<()> {
        (**self).finish()
    }

    fn cache_stats(&self) -> (usize, usize) {
        (**self).cache_stats()
    }
}

/// The fallback embedding used when no embedder is configured.
pub fn zero_embeddings(dimension: usize) -> Vec<Vec<f32>> {
    vec![vec![0.0; dimension]; NUM_INSTRUCTIONS]
}

/// Check an embedder's output against the request.
pub fn validate_embeddings(
    vectors: &[Vec<f32>],
    expected_count: usize,
    dimension: usize,
) -> Result<()> {
    if vectors.len() != expected_count {
        return Err(BridgeRldsError::EmbeddingFailure(format!(
            "expected {expected_count} vectors, got {}",
            vectors.len()
        )));
    }
    if let Some((i, v)) = vectors.iter().enumerate().find(|(_, v)| v.len() != dimension) {
        return Err(BridgeRldsError::EmbeddingFailure(format!(
            "vector {i} has length {}, expected {dimension}",
            v.len()
        )));
    }
    if vectors.iter().flatten().any(|x| !x.is_finite()) {
        return Err(BridgeRldsError::EmbeddingFailure(
            "embedding contains non-finite values".into(),
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

/// Cache key for one instruction string.
fn text_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Memoizes an inner embedder per instruction string.
///
/// Instructions repeat heavily across episodes (and the empty padding string
/// is everywhere), so only unseen strings reach the inner embedder.
pub struct CachedEmbedder<E> {
    inner: E,
    cache: HashMap<String, Vec<f32>>,
    hits: usize,
    misses: usize,
}

impl<E: Embedder> CachedEmbedder<E> {
    pub fn new(inner: E) -> Self {
        Self {
            inner,
            cache: HashMap::new(),
            hits: 0,
            misses: 0,
        }
    }

    pub fn into_inner(self) -> E {
        self.inner
    }
}

impl<E: Embedder> Embedder for CachedEmbedder<E> {
    fn embed(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let keys: Vec<String> = texts.iter().map(|t| text_hash(t)).collect();

        let mut pending: Vec<String> = Vec::new();
        let mut pending_keys: Vec<&String> = Vec::new();
        for (text, key) in texts.iter().zip(&keys) {
            if self.cache.contains_key(key) || pending_keys.contains(&key) {
                self.hits += 1;
            } else {
                self.misses += 1;
                pending.push(text.clone());
                pending_keys.push(key);
            }
        }

        if !pending.is_empty() {
            let vectors = self.inner.embed(&pending)?;
            validate_embeddings(&vectors, pending.len(), self.inner.dimension())?;
            for (key, vector) in pending_keys.into_iter().zip(vectors) {
                self.cache.insert(key.clone(), vector);
            }
            debug!(computed = pending.len(), cached = self.cache.len(), "embedding cache updated");
        }

        keys.iter()
            .map(|key| {
                self.cache.get(key).cloned().ok_or_else(|| {
                    BridgeRldsError::EmbeddingFailure("embedding cache lost an entry".into())
                })
            })
            .collect()
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn finish(&mut self) -> Result<()> {
        self.inner.finish()
    }

    fn cache_stats(&self) -> (usize, usize) {
        (self.hits, self.misses)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
