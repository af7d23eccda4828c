//! facehash-core — facial similarity hashing.
//!
//! A face is detected (SCRFD, or the whole image with the `skip` backend),
//! embedded with FaceNet via ONNX Runtime, and the embedding is binarized
//! against its own median into a '0'/'1' string. Hashes are compared by
//! Hamming distance under an explicit threshold.

pub mod aggregate;
pub mod binarize;
pub mod compare;
pub mod detector;
pub mod embedder;
pub mod pipeline;
pub mod types;

use std::path::PathBuf;

pub use aggregate::{AggregateError, AggregationResult, FailedImage, LabeledImage, MIN_IMAGES};
pub use compare::{compare, CompareError, Comparison, HammingMatcher, Matcher};
pub use detector::{DetectError, DetectorBackend};
pub use embedder::EmbedError;
pub use pipeline::{FaceHasher, HashError, LoadError, ModelOptions};
pub use types::{BinaryHash, ChannelOrder, Embedding, FaceCrop, InvalidHash};

/// System-wide model directory used when none is configured.
pub fn default_model_dir() -> PathBuf {
    PathBuf::from("/usr/share/facehash/models")
}
