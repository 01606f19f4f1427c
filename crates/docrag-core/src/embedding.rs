//! The [`Embedder`] seam plus the stored vector format.
//!
//! Query and chunk vectors must come from the same embedder; the SQLite
//! index pins its model and dimension count on first open. Network
//! embedders live in the `docrag` app crate.

use anyhow::{bail, Result};
use async_trait::async_trait;

/// Turns text into a fixed-length vector.
///
/// Implementations must not retry internally; retry policy is layered on
/// top by the caller.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;
    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Bytes per stored vector component.
pub const BYTES_PER_DIM: usize = 4;

/// Pack a vector into the `index_entries.vector` column format: the
/// components as consecutive little-endian `f32`s, no header. The
/// dimension count lives in `index_meta`, not in the blob.
///
/// ```rust
/// use docrag_core::embedding::{decode_vector, encode_vector};
///
/// let blob = encode_vector(&[0.5, -1.0]);
/// assert_eq!(blob, [0, 0, 0, 63, 0, 0, 128, 191]);
/// assert_eq!(decode_vector(&blob, 2).unwrap(), vec![0.5, -1.0]);
/// ```
pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|x| x.to_le_bytes()).collect()
}

/// Unpack an `index_entries.vector` blob written for a `dims`-wide index.
///
/// A blob of any other length was written under different settings and
/// is rejected rather than silently scored.
pub fn decode_vector(blob: &[u8], dims: usize) -> Result<Vec<f32>> {
    if blob.len() != dims * BYTES_PER_DIM {
        bail!(
            "stored vector is {} bytes, a {}-dimensional index expects {}",
            blob.len(),
            dims,
            dims * BYTES_PER_DIM
        );
    }
    Ok(blob
        .chunks_exact(BYTES_PER_DIM)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

/// Raw cosine similarity, compared as-is against `score_threshold`.
///
/// Mismatched lengths and zero vectors score `0.0`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let (dot, aa, bb) = a
        .iter()
        .zip(b)
        .fold((0.0f32, 0.0f32, 0.0f32), |(dot, aa, bb), (x, y)| {
            (dot + x * y, aa + x * x, bb + y * y)
        });
    let norm = (aa * bb).sqrt();
    if norm < f32::EPSILON {
        0.0
    } else {
        dot / norm
    }
}
