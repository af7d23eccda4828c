//! Median-threshold binarization of embeddings.
//!
//! Each position becomes '1' when its value is strictly greater than the
//! median of the *same* vector, '0' otherwise (ties go to '0'). The threshold
//! is recomputed for every vector, so a hash is only meaningful next to
//! hashes derived the same way from comparable embeddings. It is not a
//! stable global fingerprint: two embeddings that differ only by an offset
//! on a few dimensions can shift the median and flip unrelated bits.

use crate::types::BinaryHash;

/// Median of `values`. For even lengths, the mean of the two middle values
/// after sorting. `None` for an empty slice.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Binarize a vector against its own median. Output length equals input length.
pub fn binarize(values: &[f64]) -> BinaryHash {
    let Some(threshold) = median(values) else {
        return BinaryHash::from_bits(std::iter::empty());
    };
    BinaryHash::from_bits(values.iter().map(|&v| v > threshold))
}
