//! FaceNet face embedder via ONNX Runtime.
//!
//! Maps a 160×160 face crop to a 128-dimensional embedding. The crop is
//! expected to be already detected and resized; no detection happens here.

use crate::types::{ChannelOrder, Embedding, FaceCrop, FACE_CROP_SIZE};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const FACENET_INPUT_SIZE: usize = FACE_CROP_SIZE as usize;
const FACENET_PIXEL_SCALE: f32 = 1.0 / 255.0;
const FACENET_EMBEDDING_DIM: usize = 128;

#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("embedding extraction failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Produces a fixed-length embedding for a face crop.
pub trait Embedder {
    fn embed(&mut self, face: &FaceCrop) -> Result<Embedding, EmbedError>;
}

/// FaceNet-based embedder.
pub struct FacenetEmbedder {
    session: Session,
    channel_order: ChannelOrder,
}

impl FacenetEmbedder {
    /// Load the FaceNet ONNX model. `channel_order` is the order the model was
    /// trained on; crops are converted from RGB as needed.
    pub fn load(model_path: &str, channel_order: ChannelOrder) -> Result<Self, EmbedError> {
        if !Path::new(model_path).exists() {
            return Err(EmbedError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            ?channel_order,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded FaceNet model"
        );

        Ok(Self { session, channel_order })
    }

    /// NHWC float tensor in [0, 1], channels in `order`.
    fn preprocess(face: &FaceCrop, order: ChannelOrder) -> Array4<f32> {
        let size = FACENET_INPUT_SIZE;
        let mut tensor = Array4::<f32>::zeros((1, size, size, 3));

        for (x, y, pixel) in face.as_image().enumerate_pixels() {
            let [r, g, b] = pixel.0;
            let ordered = match order {
                ChannelOrder::Rgb => [r, g, b],
                ChannelOrder::Bgr => [b, g, r],
            };
            for (c, value) in ordered.into_iter().enumerate() {
                tensor[[0, y as usize, x as usize, c]] = value as f32 * FACENET_PIXEL_SCALE;
            }
        }

        tensor
    }
}

impl Embedder for FacenetEmbedder {
    fn embed(&mut self, face: &FaceCrop) -> Result<Embedding, EmbedError> {
        let input = Self::preprocess(face, self.channel_order);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedError::InferenceFailed(format!("output tensor: {e}")))?;

        if raw.len() != FACENET_EMBEDDING_DIM {
            return Err(EmbedError::InferenceFailed(format!(
                "expected {FACENET_EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }
        if raw.iter().any(|v| !v.is_finite()) {
            return Err(EmbedError::InferenceFailed("non-finite value in embedding".into()));
        }

        Ok(Embedding::new(raw.to_vec()))
    }
}
