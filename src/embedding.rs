//! Document and query embeddings.
//!
//! The index stores one L2-normalised vector per document. Vectors come from
//! an [`Embedder`]; the default [`HashingEmbedder`] hashes word tokens into a
//! fixed number of signed buckets, so it needs no model files and produces
//! identical vectors on every run.

use rayon::prelude::*;

use crate::loader::Document;

pub const DEFAULT_DIMENSION: usize = 384;

/// Turns text into a fixed-dimension vector.
pub trait Embedder: Send + Sync {
    /// Length of every vector returned by [`Embedder::embed`].
    fn dimension(&self) -> usize;

    fn embed(&self, text: &str) -> Vec<f32>;
}

/// Feature-hashing bag-of-words embedder.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSION)
    }
}

impl Embedder for HashingEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];

        for token in tokenize(text) {
            let hash = blake3::hash(token.as_bytes());
            let bytes = hash.as_bytes();
            let mut head = [0u8; 8];
            head.copy_from_slice(&bytes[..8]);
            let bucket = (u64::from_le_bytes(head) % self.dimension as u64)
                as usize;
            let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        normalize(&mut vector);
        vector
    }
}

/// Lowercased alphanumeric word tokens.
pub fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

/// Scale `vector` to unit length. Zero vectors are left alone.
pub fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

/// Text that represents a document for embedding purposes.
fn embedding_text(doc: &Document) -> String {
    format!("{}\n{}", doc.title, doc.text)
}

/// Embed a batch of documents in parallel.
///
/// Returns `(id, vector)` pairs in input order.
pub fn embed_documents(
    embedder: &dyn Embedder,
    documents: &[Document],
) -> Vec<(String, Vec<f32>)> {
    documents
        .par_iter()
        .map(|doc| {
            (doc.id.as_str().to_string(), embedder.embed(&embedding_text(doc)))
        })
        .collect()
}
