//! In-memory cosine-similarity store over [`RagEmbedding`]s.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use cvportal_shared::{PortalGenError, RagEmbedding, Result};

/// `dot(a, b) / (|a| * |b|)`, or 0 when either norm is zero or the lengths
/// differ. Never NaN.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let sim = dot / (norm_a.sqrt() * norm_b.sqrt());
    if sim.is_finite() { sim as f32 } else { 0.0 }
}

/// A search match borrowed from the store.
#[derive(Debug, Clone, Copy)]
pub struct SearchHit<'a> {
    pub embedding: &'a RagEmbedding,
    pub similarity: f32,
}

/// Serialized snapshot of a store, shipped to the deployed portal.
#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    dimension: usize,
    model: String,
    embeddings: Vec<RagEmbedding>,
}

#[derive(Debug, Clone)]
pub struct VectorStore {
    dimension: usize,
    model: String,
    embeddings: Vec<RagEmbedding>,
}

impl VectorStore {
    pub fn new(dimension: usize, model: impl Into<String>) -> Self {
        Self {
            dimension,
            model: model.into(),
            embeddings: Vec::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }

    pub fn embeddings(&self) -> &[RagEmbedding] {
        &self.embeddings
    }

    /// Append one embedding. Its vector must match the store dimension.
    pub fn insert(&mut self, embedding: RagEmbedding) -> Result<()> {
        if embedding.vector.len() != self.dimension {
            return Err(PortalGenError::VectorStore(format!(
                "embedding {} has dimension {}, store expects {}",
                embedding.id,
                embedding.vector.len(),
                self.dimension
            )));
        }
        self.embeddings.push(embedding);
        Ok(())
    }

    /// Insert all or nothing.
    pub fn extend(&mut self, embeddings: Vec<RagEmbedding>) -> Result<()> {
        if let Some(bad) = embeddings.iter().find(|e| e.vector.len() != self.dimension) {
            return Err(PortalGenError::VectorStore(format!(
                "embedding {} has dimension {}, store expects {}",
                bad.id,
                bad.vector.len(),
                self.dimension
            )));
        }
        self.embeddings.extend(embeddings);
        Ok(())
    }

    /// Up to `top_k` hits with `similarity >= min_score`, best first.
    ///
    /// Ties on similarity go to the higher importance, then to the earlier
    /// insertion.
    pub fn search(&self, query: &[f32], top_k: usize, min_score: f32) -> Result<Vec<SearchHit<'_>>> {
        if query.len() != self.dimension {
            return Err(PortalGenError::VectorStore(format!(
                "query has dimension {}, store expects {}",
                query.len(),
                self.dimension
            )));
        }

        let mut scored: Vec<(usize, f32)> = self
            .embeddings
            .iter()
            .enumerate()
            .map(|(i, e)| (i, cosine_similarity(query, &e.vector)))
            .filter(|(_, sim)| *sim >= min_score)
            .collect();

        scored.sort_by(|(ia, sa), (ib, sb)| {
            sb.partial_cmp(sa)
                .unwrap_or(Ordering::Equal)
                .then_with(|| {
                    self.embeddings[*ib]
                        .metadata
                        .importance
                        .cmp(&self.embeddings[*ia].metadata.importance)
                })
                .then_with(|| ia.cmp(ib))
        });
        scored.truncate(top_k);

        Ok(scored
            .into_iter()
            .map(|(i, similarity)| SearchHit {
                embedding: &self.embeddings[i],
                similarity,
            })
            .collect())
    }

    pub fn to_json(&self) -> Result<String> {
        let snapshot = Snapshot {
            dimension: self.dimension,
            model: self.model.clone(),
            embeddings: self.embeddings.clone(),
        };
        Ok(serde_json::to_string(&snapshot)?)
    }

    /// Rebuild a store from [`VectorStore::to_json`] output, re-checking
    /// every vector's dimension.
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: Snapshot = serde_json::from_str(json)
            .map_err(|e| PortalGenError::VectorStore(format!("invalid snapshot: {e}")))?;
        let mut store = Self::new(snapshot.dimension, snapshot.model);
        store.extend(snapshot.embeddings)?;
        Ok(store)
    }
}
