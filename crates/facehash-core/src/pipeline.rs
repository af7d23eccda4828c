//! Detector + embedder wired into the hashing protocol.

use crate::aggregate::{aggregate, AggregateError, AggregationResult, LabeledImage};
use crate::binarize::binarize;
use crate::detector::{DetectError, Detector, DetectorBackend, ScrfdDetector, SkipDetector};
use crate::embedder::{EmbedError, Embedder, FacenetEmbedder};
use crate::types::{BinaryHash, ChannelOrder, Embedding};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// SCRFD detection model file name inside the model directory.
pub const SCRFD_MODEL_FILE: &str = "det_10g.onnx";
/// FaceNet embedding model file name inside the model directory.
pub const FACENET_MODEL_FILE: &str = "facenet.onnx";

/// Per-image failure. Kept distinct internally; callers that only care about
/// "was there a usable face" can treat every variant alike.
#[derive(Error, Debug)]
pub enum HashError {
    #[error(transparent)]
    Detect(#[from] DetectError),
    #[error(transparent)]
    Embed(#[from] EmbedError),
}

impl HashError {
    /// Short machine-readable kind, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            HashError::Detect(DetectError::Decode(_)) => "decode_failure",
            HashError::Detect(DetectError::NoFace) => "no_face",
            HashError::Detect(_) => "detection_failure",
            HashError::Embed(_) => "embedding_failure",
        }
    }
}

/// Model loading failure at startup.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("detector: {0}")]
    Detector(#[from] DetectError),
    #[error("embedder: {0}")]
    Embedder(#[from] EmbedError),
}

/// Where to find models and how to run them.
#[derive(Debug, Clone)]
pub struct ModelOptions {
    pub model_dir: PathBuf,
    pub backend: DetectorBackend,
    pub channel_order: ChannelOrder,
}

impl ModelOptions {
    pub fn scrfd_model_path(&self) -> String {
        model_path(&self.model_dir, SCRFD_MODEL_FILE)
    }

    pub fn facenet_model_path(&self) -> String {
        model_path(&self.model_dir, FACENET_MODEL_FILE)
    }
}

fn model_path(dir: &Path, file: &str) -> String {
    dir.join(file).to_string_lossy().into_owned()
}

/// Owns one detector and one embedder. Both need `&mut self` for inference,
/// so a `FaceHasher` serves one image at a time.
pub struct FaceHasher {
    detector: Box<dyn Detector + Send>,
    embedder: Box<dyn Embedder + Send>,
}

impl FaceHasher {
    pub fn new(detector: Box<dyn Detector + Send>, embedder: Box<dyn Embedder + Send>) -> Self {
        Self { detector, embedder }
    }

    /// Load the configured detector backend and the FaceNet embedder.
    pub fn load(options: &ModelOptions) -> Result<Self, LoadError> {
        let detector: Box<dyn Detector + Send> = match options.backend {
            DetectorBackend::Scrfd => Box::new(ScrfdDetector::load(&options.scrfd_model_path())?),
            DetectorBackend::Skip => {
                tracing::info!("detector backend 'skip': images are used as pre-cropped faces");
                Box::new(SkipDetector)
            }
        };

        let embedder = FacenetEmbedder::load(&options.facenet_model_path(), options.channel_order)?;

        Ok(Self::new(detector, Box::new(embedder)))
    }

    /// Detect the face in `image` and embed it.
    pub fn embed_image(&mut self, image: &[u8]) -> Result<Embedding, HashError> {
        let face = self.detector.detect(image)?;
        let embedding = self.embedder.embed(&face)?;
        Ok(embedding)
    }

    /// Binary hash of the single face in `image`.
    pub fn hash_image(&mut self, image: &[u8]) -> Result<BinaryHash, HashError> {
        let embedding = self.embed_image(image)?;
        Ok(binarize(&embedding.to_f64()))
    }

    /// Binary hash of the mean embedding across `images`.
    pub fn average_hash(&mut self, images: &[LabeledImage]) -> Result<AggregationResult, AggregateError> {
        aggregate(images, |data| self.embed_image(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compare::compare;
    use crate::types::FaceCrop;

    /// Treats the first byte of the buffer as the "face": 0 means no face.
    struct ByteDetector;

    impl Detector for ByteDetector {
        fn detect(&mut self, image: &[u8]) -> Result<FaceCrop, DetectError> {
            match image.first() {
                Some(&v) if v > 0 => Ok(FaceCrop::from_rgb(&image::RgbImage::from_pixel(
                    4,
                    4,
                    image::Rgb([v, v, v]),
                ))),
                _ => Err(DetectError::NoFace),
            }
        }
    }

    /// Always returns the same embedding; fails for dark crops.
    struct FixedEmbedder(Vec<f32>);

    impl Embedder for FixedEmbedder {
        fn embed(&mut self, face: &FaceCrop) -> Result<Embedding, EmbedError> {
            if face.rgb(0, 0)[0] < 10 {
                return Err(EmbedError::InferenceFailed("crop too dark".into()));
            }
            Ok(Embedding::new(self.0.clone()))
        }
    }

    fn hasher() -> FaceHasher {
        FaceHasher::new(
            Box::new(ByteDetector),
            Box::new(FixedEmbedder(vec![1.0, 5.0, 3.0, 2.0])),
        )
    }

    #[test]
    fn test_hash_image() {
        assert_eq!(hasher().hash_image(&[200]).unwrap().as_str(), "0101");
    }

    #[test]
    fn test_same_embedding_hashes_match() {
        let mut h = hasher();
        let a = h.hash_image(&[200]).unwrap();
        let b = h.hash_image(&[120]).unwrap();
        let result = compare(&a, &b, 25).unwrap();
        assert_eq!(result.distance, 0);
        assert!(result.is_match);
    }

    #[test]
    fn test_error_kinds_stay_distinct() {
        let mut h = hasher();
        assert_eq!(h.hash_image(&[0]).unwrap_err().kind(), "no_face");
        assert_eq!(h.hash_image(&[5]).unwrap_err().kind(), "embedding_failure");
    }

    #[test]
    fn test_average_hash_records_embedding_failures() {
        let images = vec![
            LabeledImage::new("ok.png", vec![200]),
            LabeledImage::new("dark.png", vec![5]),
            LabeledImage::new("empty.png", vec![]),
        ];
        let result = hasher().average_hash(&images).unwrap();
        assert_eq!(result.processed_images, 1);
        assert_eq!(result.failed_images.len(), 2);
        assert!(result.failed_images[0].error.starts_with("embedding extraction failed"));
        assert_eq!(result.failed_images[1].error, "No face detected");
    }

    #[test]
    fn test_model_paths() {
        let options = ModelOptions {
            model_dir: PathBuf::from("/models"),
            backend: DetectorBackend::Scrfd,
            channel_order: ChannelOrder::Rgb,
        };
        assert_eq!(options.scrfd_model_path(), "/models/det_10g.onnx");
        assert_eq!(options.facenet_model_path(), "/models/facenet.onnx");
    }

    #[test]
    fn test_load_reports_missing_models() {
        let options = ModelOptions {
            model_dir: PathBuf::from("/nonexistent"),
            backend: DetectorBackend::Skip,
            channel_order: ChannelOrder::Rgb,
        };
        let err = FaceHasher::load(&options).err().unwrap();
        assert!(matches!(err, LoadError::Embedder(EmbedError::ModelNotFound(_))));
    }
}
