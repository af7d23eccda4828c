//! Hamming-distance comparison of binary hashes.

use crate::types::BinaryHash;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompareError {
    #[error("Hash length mismatch: {left} vs {right}")]
    LengthMismatch { left: usize, right: usize },
}

/// Outcome of comparing two hashes under a threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Comparison {
    pub distance: u32,
    pub is_match: bool,
}

/// Number of positions at which two equal-length hashes differ.
pub fn hamming_distance(a: &BinaryHash, b: &BinaryHash) -> Result<u32, CompareError> {
    if a.len() != b.len() {
        return Err(CompareError::LengthMismatch {
            left: a.len(),
            right: b.len(),
        });
    }
    Ok(a.bits().zip(b.bits()).filter(|(x, y)| x != y).count() as u32)
}

/// Compare two hashes; a match is `distance <= threshold`.
pub fn compare(a: &BinaryHash, b: &BinaryHash, threshold: u32) -> Result<Comparison, CompareError> {
    let distance = hamming_distance(a, b)?;
    Ok(Comparison {
        distance,
        is_match: distance <= threshold,
    })
}

/// Strategy for deciding whether a probe hash matches a reference hash.
pub trait Matcher {
    fn compare(&self, probe: &BinaryHash, reference: &BinaryHash) -> Result<Comparison, CompareError>;
}

/// Hamming matcher with a fixed threshold. There is deliberately no default:
/// each call site picks its own.
#[derive(Debug, Clone, Copy)]
pub struct HammingMatcher {
    pub threshold: u32,
}

impl HammingMatcher {
    pub fn new(threshold: u32) -> Self {
        Self { threshold }
    }
}

impl Matcher for HammingMatcher {
    fn compare(&self, probe: &BinaryHash, reference: &BinaryHash) -> Result<Comparison, CompareError> {
        compare(probe, reference, self.threshold)
    }
}
