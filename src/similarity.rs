use crate::error::{AppError, Result};

/// Cosine similarity of two equal-length vectors, clamped to `[0, 1]`.
///
/// Provider embeddings land in the non-negative half of the space, so the
/// clamp only absorbs floating-point drift. A zero-magnitude input is an
/// error rather than a zero score.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.is_empty() || b.is_empty() {
        return Err(AppError::EmptyVector);
    }
    if a.len() != b.len() {
        return Err(AppError::DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }

    let mut dot = 0.0_f64;
    let mut norm_a = 0.0_f64;
    let mut norm_b = 0.0_f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return Err(AppError::ZeroMagnitude);
    }

    let similarity = dot / (norm_a.sqrt() * norm_b.sqrt());
    Ok(similarity.clamp(0.0, 1.0) as f32)
}
