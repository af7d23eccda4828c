//! Face detection: decode an encoded image and produce a normalized face crop.
//!
//! Two backends sit behind [`Detector`]:
//! - [`ScrfdDetector`]: SCRFD via ONNX Runtime, 3-stride anchor decoding + NMS.
//! - [`SkipDetector`]: no detection, the whole image is the face region.

use crate::types::{BoundingBox, FaceCrop};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

// --- Named constants (no magic numbers) ---
const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("invalid image data: {0}")]
    Decode(#[from] image::ImageError),
    #[error("No face detected")]
    NoFace,
    #[error("detection failed: {0}")]
    Inference(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Locates the most confident face in an encoded image.
///
/// Implementations never panic on bad input: undecodable bytes, empty
/// detections and backend failures are all returned as [`DetectError`].
pub trait Detector {
    fn detect(&mut self, image: &[u8]) -> Result<FaceCrop, DetectError>;
}

/// Detector backend identifier, selected by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DetectorBackend {
    #[default]
    Scrfd,
    Skip,
}

impl DetectorBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scrfd => "scrfd",
            Self::Skip => "skip",
        }
    }
}

impl FromStr for DetectorBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "scrfd" => Ok(Self::Scrfd),
            "skip" => Ok(Self::Skip),
            other => Err(format!("unknown detector backend: {other} (expected scrfd or skip)")),
        }
    }
}

/// Decode an encoded image into interleaved RGB regardless of its source
/// colour type (grayscale, RGBA, 16-bit, ...).
pub fn decode_rgb(image: &[u8]) -> Result<RgbImage, DetectError> {
    Ok(image::load_from_memory(image)?.to_rgb8())
}

/// Crop `face` out of `frame` (clamped to the frame) and resize to the crop size.
pub fn crop_face(frame: &RgbImage, face: &BoundingBox) -> Result<FaceCrop, DetectError> {
    let (w, h) = frame.dimensions();
    let x0 = face.x.max(0.0).floor() as u32;
    let y0 = face.y.max(0.0).floor() as u32;
    let x1 = ((face.x + face.width).ceil().max(0.0) as u32).min(w);
    let y1 = ((face.y + face.height).ceil().max(0.0) as u32).min(h);

    if x0 >= x1 || y0 >= y1 {
        return Err(DetectError::Inference(format!(
            "face box outside image: ({}, {}, {}, {}) in {w}x{h}",
            face.x, face.y, face.width, face.height
        )));
    }

    let region = image::imageops::crop_imm(frame, x0, y0, x1 - x0, y1 - y0).to_image();
    Ok(FaceCrop::from_rgb(&region))
}

/// Pass-through backend: the whole decoded image is treated as the face.
#[derive(Debug, Default)]
pub struct SkipDetector;

impl Detector for SkipDetector {
    fn detect(&mut self, image: &[u8]) -> Result<FaceCrop, DetectError> {
        let frame = decode_rgb(image)?;
        if frame.width() == 0 || frame.height() == 0 {
            return Err(DetectError::NoFace);
        }
        Ok(FaceCrop::from_rgb(&frame))
    }
}

/// Metadata for coordinate de-mapping after letterbox resize.
struct LetterboxInfo {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

/// Output tensor indices for one stride: (score_idx, bbox_idx).
type StrideOutputIndices = (usize, usize);

/// SCRFD-based face detector.
pub struct ScrfdDetector {
    session: Session,
    /// Per-stride output indices [(score, bbox)] for strides [8, 16, 32].
    stride_indices: [StrideOutputIndices; 3],
}

impl ScrfdDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, DetectError> {
        if !Path::new(model_path).exists() {
            return Err(DetectError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?output_names,
            "loaded SCRFD model"
        );

        // score + bbox per stride; kps outputs, when present, are unused.
        if output_names.len() < 6 {
            return Err(DetectError::Inference(format!(
                "SCRFD model requires at least 6 outputs (3 strides × score/bbox), got {}",
                output_names.len()
            )));
        }

        let stride_indices = discover_output_indices(&output_names);
        tracing::debug!(?stride_indices, "SCRFD output tensor mapping");

        Ok(Self { session, stride_indices })
    }

    /// Run SCRFD on an RGB frame, returning boxes sorted by confidence (best first).
    pub fn detect_boxes(&mut self, frame: &RgbImage) -> Result<Vec<BoundingBox>, DetectError> {
        let (input, letterbox) = preprocess(frame);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut all_detections = Vec::new();

        for (stride_pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx) = self.stride_indices[stride_pos];

            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectError::Inference(format!("scores stride {stride}: {e}")))?;
            let (_, bboxes) = outputs[bbox_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectError::Inference(format!("bboxes stride {stride}: {e}")))?;

            all_detections.extend(decode_stride(
                scores,
                bboxes,
                stride,
                &letterbox,
                SCRFD_CONFIDENCE_THRESHOLD,
            ));
        }

        Ok(nms(all_detections, SCRFD_NMS_THRESHOLD))
    }
}

impl Detector for ScrfdDetector {
    fn detect(&mut self, image: &[u8]) -> Result<FaceCrop, DetectError> {
        let frame = decode_rgb(image)?;
        let boxes = self.detect_boxes(&frame)?;
        // Multiple faces are not disambiguated: the top-ranked box wins.
        let face = boxes.first().ok_or(DetectError::NoFace)?;
        tracing::debug!(
            candidates = boxes.len(),
            confidence = face.confidence,
            x = face.x,
            y = face.y,
            "SCRFD face selected"
        );
        crop_face(&frame, face)
    }
}

/// Letterbox an RGB frame into a 640×640 NCHW tensor normalized for SCRFD.
fn preprocess(frame: &RgbImage) -> (Array4<f32>, LetterboxInfo) {
    let (width, height) = (frame.width() as f32, frame.height() as f32);
    let scale = (SCRFD_INPUT_SIZE as f32 / width).min(SCRFD_INPUT_SIZE as f32 / height);

    let new_w = ((width * scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE as u32);
    let new_h = ((height * scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE as u32);
    let pad_x = (SCRFD_INPUT_SIZE as u32 - new_w) as f32 / 2.0;
    let pad_y = (SCRFD_INPUT_SIZE as u32 - new_h) as f32 / 2.0;

    let resized = image::imageops::resize(frame, new_w, new_h, image::imageops::FilterType::Triangle);

    let pad_x_start = pad_x.floor() as usize;
    let pad_y_start = pad_y.floor() as usize;

    // Padding stays at 0.0, i.e. SCRFD_MEAN after normalization.
    let mut tensor = Array4::<f32>::zeros((1, 3, SCRFD_INPUT_SIZE, SCRFD_INPUT_SIZE));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let tx = pad_x_start + x as usize;
        let ty = pad_y_start + y as usize;
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = (pixel.0[c] as f32 - SCRFD_MEAN) / SCRFD_STD;
        }
    }

    (tensor, LetterboxInfo { scale, pad_x, pad_y })
}

/// Discover output tensor ordering by name.
///
/// Named exports ("score_8", "bbox_16", ...) are mapped directly. Otherwise
/// the standard positional layout is assumed: [0-2] scores, [3-5] bboxes.
fn discover_output_indices(names: &[String]) -> [StrideOutputIndices; 3] {
    let find = |prefix: &str, stride: usize| -> Option<usize> {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| n == &target)
    };

    let named: Option<Vec<StrideOutputIndices>> = SCRFD_STRIDES
        .iter()
        .map(|&stride| Some((find("score", stride)?, find("bbox", stride)?)))
        .collect();

    match named {
        Some(indices) => {
            tracing::info!("SCRFD: using name-based output tensor mapping");
            [indices[0], indices[1], indices[2]]
        }
        None => {
            tracing::info!(
                ?names,
                "SCRFD: output names not recognized, using positional mapping [0-2]=scores, [3-5]=bboxes"
            );
            [(0, 3), (1, 4), (2, 5)]
        }
    }
}

/// Decode detections for a single stride level.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    stride: usize,
    letterbox: &LetterboxInfo,
    threshold: f32,
) -> Vec<BoundingBox> {
    let grid_w = SCRFD_INPUT_SIZE / stride;
    let grid_h = SCRFD_INPUT_SIZE / stride;
    let num_anchors = grid_h * grid_w * SCRFD_ANCHORS_PER_CELL;
    let step = stride as f32;

    let mut detections = Vec::new();

    for idx in 0..num_anchors {
        let score = scores.get(idx).copied().unwrap_or(0.0);
        if score <= threshold {
            continue;
        }

        let Some(offsets) = bboxes.get(idx * 4..idx * 4 + 4) else {
            continue;
        };

        let cell = idx / SCRFD_ANCHORS_PER_CELL;
        let anchor_x = (cell % grid_w) as f32 * step;
        let anchor_y = (cell / grid_w) as f32 * step;

        // Distances to the four box edges, in stride units, then back to the source frame.
        let unmap_x = |v: f32| (v - letterbox.pad_x) / letterbox.scale;
        let unmap_y = |v: f32| (v - letterbox.pad_y) / letterbox.scale;
        let x1 = unmap_x(anchor_x - offsets[0] * step);
        let y1 = unmap_y(anchor_y - offsets[1] * step);
        let x2 = unmap_x(anchor_x + offsets[2] * step);
        let y2 = unmap_y(anchor_y + offsets[3] * step);

        detections.push(BoundingBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence: score,
        });
    }

    detections
}

/// Non-maximum suppression. Output is sorted by confidence, best first.
fn nms(mut detections: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<BoundingBox> = Vec::new();
    for candidate in detections {
        if keep.iter().all(|kept| iou(kept, &candidate) <= iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

/// Intersection-over-Union between two bounding boxes.
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let inter_w = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let inter_h = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter_area = inter_w * inter_h;
    let union_area = a.width * a.height + b.width * b.height - inter_area;

    if union_area > 0.0 {
        inter_area / union_area
    } else {
        0.0
    }
}
