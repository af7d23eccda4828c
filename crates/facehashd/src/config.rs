use facehash_core::{ChannelOrder, DetectorBackend, ModelOptions};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Threshold for comparing an uploaded image against a caller-supplied hash.
pub const DEFAULT_HASH_MATCH_THRESHOLD: u32 = 25;
/// Threshold for comparing two uploaded images.
pub const DEFAULT_IMAGE_MATCH_THRESHOLD: u32 = 30;

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listen address (default: 0.0.0.0:3000).
    pub bind_addr: String,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Face detector backend: `scrfd` or `skip`.
    pub detector_backend: DetectorBackend,
    /// Channel order the embedding model expects.
    pub channel_order: ChannelOrder,
    /// Max Hamming distance for /compare-hash to report a match.
    pub hash_match_threshold: u32,
    /// Max Hamming distance for /compare-images to report a match.
    pub image_match_threshold: u32,
    /// How long a request waits for the engine before failing.
    pub request_timeout_secs: u64,
    /// Pending engine requests before handlers start waiting to enqueue.
    pub queue_depth: usize,
    /// Request body limit in bytes (all uploaded files together).
    pub max_upload_bytes: usize,
}

impl Config {
    /// Load configuration from `FACEHASH_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let model_dir = std::env::var("FACEHASH_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| facehash_core::default_model_dir());

        Self {
            bind_addr: std::env::var("FACEHASH_BIND_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            model_dir,
            detector_backend: env_parse("FACEHASH_DETECTOR_BACKEND", DetectorBackend::Scrfd),
            channel_order: env_parse("FACEHASH_CHANNEL_ORDER", ChannelOrder::Rgb),
            hash_match_threshold: env_parse(
                "FACEHASH_HASH_MATCH_THRESHOLD",
                DEFAULT_HASH_MATCH_THRESHOLD,
            ),
            image_match_threshold: env_parse(
                "FACEHASH_IMAGE_MATCH_THRESHOLD",
                DEFAULT_IMAGE_MATCH_THRESHOLD,
            ),
            request_timeout_secs: env_parse("FACEHASH_REQUEST_TIMEOUT_SECS", 30),
            queue_depth: env_parse("FACEHASH_QUEUE_DEPTH", 16usize).max(1),
            max_upload_bytes: env_parse("FACEHASH_MAX_UPLOAD_BYTES", 20 * 1024 * 1024),
        }
    }

    pub fn model_options(&self) -> ModelOptions {
        ModelOptions {
            model_dir: self.model_dir.clone(),
            backend: self.detector_backend,
            channel_order: self.channel_order,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".to_string(),
            model_dir: facehash_core::default_model_dir(),
            detector_backend: DetectorBackend::Scrfd,
            channel_order: ChannelOrder::Rgb,
            hash_match_threshold: DEFAULT_HASH_MATCH_THRESHOLD,
            image_match_threshold: DEFAULT_IMAGE_MATCH_THRESHOLD,
            request_timeout_secs: 30,
            queue_depth: 16,
            max_upload_bytes: 20 * 1024 * 1024,
        }
    }
}

/// Parse `key`, falling back to `default` when unset or unparseable.
fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(v) => v.parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %v, "unparseable value, using default");
            default
        }),
        Err(_) => default,
    }
}
