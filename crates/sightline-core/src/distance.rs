//! Euclidean distance between embeddings and nearest-sample search.

use crate::types::{Embedding, Profile};
use thiserror::Error;

/// Data-integrity faults when two embeddings cannot be compared.
///
/// These signal a corrupted profile store or a model-version mismatch and are
/// never coerced into a distance.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DistanceError {
    #[error("embedding dimension mismatch: query has {expected} values, sample has {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("embedding model mismatch: query from {query}, sample from {sample}")]
    ModelMismatch { query: String, sample: String },
    #[error("empty embedding")]
    Empty,
}

/// Euclidean distance over two equal-length vectors.
///
/// When both embeddings carry a model version, the versions must agree.
pub fn distance(a: &Embedding, b: &Embedding) -> Result<f32, DistanceError> {
    check_comparable(a, b)?;
    Ok(euclidean(a, b))
}

/// Minimum distance from `query` to any sample of `identity`.
///
/// Returns `f32::INFINITY` when the identity has no samples. All samples are
/// validated up front; the scan itself stops at an exact match.
pub fn best_distance_to_identity(query: &Embedding, identity: &Profile) -> Result<f32, DistanceError> {
    for sample in &identity.samples {
        check_comparable(query, sample)?;
    }

    let mut best = f32::INFINITY;
    for sample in &identity.samples {
        let d = euclidean(query, sample);
        if d < best {
            best = d;
            if best == 0.0 {
                break;
            }
        }
    }
    Ok(best)
}

fn check_comparable(a: &Embedding, b: &Embedding) -> Result<(), DistanceError> {
    if a.values.len() != b.values.len() {
        return Err(DistanceError::DimensionMismatch {
            expected: a.values.len(),
            actual: b.values.len(),
        });
    }
    if a.values.is_empty() {
        return Err(DistanceError::Empty);
    }
    if let (Some(qa), Some(qb)) = (&a.model_version, &b.model_version) {
        if qa != qb {
            return Err(DistanceError::ModelMismatch {
                query: qa.clone(),
                sample: qb.clone(),
            });
        }
    }
    Ok(())
}

fn euclidean(a: &Embedding, b: &Embedding) -> f32 {
    a.values
        .iter()
        .zip(b.values.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}
