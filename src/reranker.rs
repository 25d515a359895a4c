use rayon::prelude::*;

use crate::{embedding_db::EmbeddingDb, error::Result};

/// A reranked document with its cosine similarity to the query.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedDocument {
    pub doc_id: String,
    pub score: f32,
}

/// Rerank candidate documents by embedding similarity.
///
/// For each candidate:
/// 1. Load its stored vector
/// 2. Score it by cosine similarity against the query vector
///
/// Candidates without a stored vector, or whose vector has a different
/// dimension than the query, are left out of the result; placing them is up
/// to the caller. Returns the scored candidates sorted by score descending,
/// ties by id.
pub fn rerank(
    query_embedding: &[f32],
    candidate_ids: &[String],
    embedding_db: &EmbeddingDb,
) -> Result<Vec<RankedDocument>> {
    let loaded = embedding_db.batch_load(candidate_ids)?;

    let mut ranked: Vec<RankedDocument> = loaded
        .into_par_iter()
        .filter_map(|(doc_id, vector)| {
            let vector = vector?;
            let score = cosine(query_embedding, &vector)?;
            Some(RankedDocument { doc_id, score })
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.doc_id.cmp(&b.doc_id))
    });

    Ok(ranked)
}

/// Cosine similarity of two vectors, `None` when the dimensions differ.
///
/// A zero vector on either side scores 0.
fn cosine(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() {
        return None;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return Some(0.0);
    }
    Some(dot / (norm_a.sqrt() * norm_b.sqrt()))
}
