//! Multi-image averaging.
//!
//! Every image is run through detection and embedding in input order.
//! Failures are recorded against the image's original index and never stop
//! the remaining images. The surviving embeddings are averaged element-wise
//! and the mean is binarized.

use crate::binarize::binarize;
use crate::pipeline::HashError;
use crate::types::{BinaryHash, Embedding};
use serde::Serialize;
use thiserror::Error;

/// Fewest images an average hash may be built from.
pub const MIN_IMAGES: usize = 2;

/// An encoded image plus the name it was submitted under.
#[derive(Debug, Clone)]
pub struct LabeledImage {
    pub label: String,
    pub data: Vec<u8>,
}

impl LabeledImage {
    pub fn new(label: impl Into<String>, data: Vec<u8>) -> Self {
        Self { label: label.into(), data }
    }
}

/// Why one input image did not contribute to the average.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedImage {
    pub index: usize,
    #[serde(rename = "filename")]
    pub label: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AggregationResult {
    pub average_hash: BinaryHash,
    #[serde(skip)]
    pub mean_embedding: Vec<f64>,
    pub processed_images: usize,
    pub failed_images: Vec<FailedImage>,
}

impl AggregationResult {
    /// Number of inputs this result accounts for.
    pub fn total_images(&self) -> usize {
        self.processed_images + self.failed_images.len()
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AggregateError {
    #[error("At least 2 images required, got {got}")]
    InsufficientInput { got: usize },
    #[error("No valid faces detected in any images")]
    NoValidFaces { failed: Vec<FailedImage> },
}

/// Average the embeddings of `images` and binarize the mean.
///
/// `embed` runs detection + embedding for one image; it is not called at all
/// when there are fewer than [`MIN_IMAGES`] inputs.
pub fn aggregate<F>(images: &[LabeledImage], mut embed: F) -> Result<AggregationResult, AggregateError>
where
    F: FnMut(&[u8]) -> Result<Embedding, HashError>,
{
    if images.len() < MIN_IMAGES {
        return Err(AggregateError::InsufficientInput { got: images.len() });
    }

    let mut embeddings: Vec<Embedding> = Vec::with_capacity(images.len());
    let mut failed_images = Vec::new();

    for (index, image) in images.iter().enumerate() {
        let outcome = embed(&image.data).map_err(|e| e.to_string()).and_then(|embedding| {
            match embeddings.first() {
                Some(first) if first.dim() != embedding.dim() => Err(format!(
                    "embedding dimension mismatch: expected {}, got {}",
                    first.dim(),
                    embedding.dim()
                )),
                _ => Ok(embedding),
            }
        });

        match outcome {
            Ok(embedding) => embeddings.push(embedding),
            Err(error) => {
                tracing::warn!(index, label = %image.label, %error, "image skipped from average");
                failed_images.push(FailedImage {
                    index,
                    label: image.label.clone(),
                    error,
                });
            }
        }
    }

    let Some(mean_embedding) = Embedding::mean(&embeddings) else {
        return Err(AggregateError::NoValidFaces { failed: failed_images });
    };

    tracing::debug!(
        processed = embeddings.len(),
        failed = failed_images.len(),
        dim = mean_embedding.len(),
        "average embedding computed"
    );

    Ok(AggregationResult {
        average_hash: binarize(&mean_embedding),
        mean_embedding,
        processed_images: embeddings.len(),
        failed_images,
    })
}
