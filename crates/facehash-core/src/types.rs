use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Side length of the square crop the embedder consumes.
pub const FACE_CROP_SIZE: u32 = 160;

/// Bounding box for a detected face, in source image pixel coordinates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

/// Colour channel order of an interleaved pixel buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelOrder {
    #[default]
    Rgb,
    Bgr,
}

impl FromStr for ChannelOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rgb" => Ok(Self::Rgb),
            "bgr" => Ok(Self::Bgr),
            other => Err(format!("unknown channel order: {other} (expected rgb or bgr)")),
        }
    }
}

/// A detected face, cropped and resized to `FACE_CROP_SIZE`², interleaved RGB.
///
/// Only constructed through [`FaceCrop::from_rgb`], which enforces the size,
/// so holding a `FaceCrop` means the embedder input shape is already right.
#[derive(Debug, Clone)]
pub struct FaceCrop {
    pixels: image::RgbImage,
}

impl FaceCrop {
    /// Resize an RGB region to the crop size (bilinear).
    pub fn from_rgb(region: &image::RgbImage) -> Self {
        let pixels = if region.dimensions() == (FACE_CROP_SIZE, FACE_CROP_SIZE) {
            region.clone()
        } else {
            image::imageops::resize(
                region,
                FACE_CROP_SIZE,
                FACE_CROP_SIZE,
                image::imageops::FilterType::Triangle,
            )
        };
        Self { pixels }
    }

    pub fn size(&self) -> u32 {
        FACE_CROP_SIZE
    }

    /// RGB triple at (x, y).
    pub fn rgb(&self, x: u32, y: u32) -> [u8; 3] {
        self.pixels.get_pixel(x, y).0
    }

    pub fn as_image(&self) -> &image::RgbImage {
        &self.pixels
    }
}

/// Face embedding vector (128-dimensional for FaceNet).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Values widened to `f64`, the precision used for medians and means.
    pub fn to_f64(&self) -> Vec<f64> {
        self.values.iter().map(|&v| f64::from(v)).collect()
    }

    /// Element-wise arithmetic mean. `None` for an empty slice or when the
    /// embeddings disagree on dimensionality.
    pub fn mean(embeddings: &[Embedding]) -> Option<Vec<f64>> {
        let first = embeddings.first()?;
        let dim = first.dim();
        if embeddings.iter().any(|e| e.dim() != dim) {
            return None;
        }

        let mut sums = vec![0.0f64; dim];
        for embedding in embeddings {
            for (sum, &v) in sums.iter_mut().zip(&embedding.values) {
                *sum += f64::from(v);
            }
        }

        let n = embeddings.len() as f64;
        Some(sums.into_iter().map(|s| s / n).collect())
    }
}

/// Binary facial hash: one '0'/'1' character per embedding dimension.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct BinaryHash(String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid hash character {found:?} at position {position}; hashes contain only '0' and '1'")]
pub struct InvalidHash {
    pub position: usize,
    pub found: char,
}

impl BinaryHash {
    /// Build a hash from per-position bits.
    pub fn from_bits<I: IntoIterator<Item = bool>>(bits: I) -> Self {
        Self(bits.into_iter().map(|b| if b { '1' } else { '0' }).collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Number of bits (always equals the source embedding dimensionality).
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn bits(&self) -> impl Iterator<Item = bool> + '_ {
        self.0.bytes().map(|b| b == b'1')
    }

    /// Lowercase hex SHA-256 of the hash text. Irreversible and not
    /// comparable by Hamming distance.
    pub fn digest(&self) -> String {
        use sha2::{Digest, Sha256};
        format!("{:x}", Sha256::digest(self.0.as_bytes()))
    }
}

impl FromStr for BinaryHash {
    type Err = InvalidHash;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some((position, found)) = s.chars().enumerate().find(|(_, c)| !matches!(c, '0' | '1')) {
            return Err(InvalidHash { position, found });
        }
        Ok(Self(s.to_string()))
    }
}

impl<'de> Deserialize<'de> for BinaryHash {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl fmt::Display for BinaryHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
