//! HTTP interface for the facehash daemon.
//!
//! All face-level failures (undecodable image, no face, embedding failure)
//! collapse into a 400 here; the engine and core keep them distinct.

use crate::engine::{EngineError, EngineHandle};
use crate::error::AppError;
use axum::body::Bytes;
use axum::extract::multipart::MultipartError;
use axum::extract::{DefaultBodyLimit, Multipart, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use facehash_core::{
    AggregateError, AggregationResult, BinaryHash, CompareError, HammingMatcher, LabeledImage, Matcher,
    MIN_IMAGES,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub struct AppState {
    pub engine: EngineHandle,
    pub hash_match_threshold: u32,
    pub image_match_threshold: u32,
}

pub fn router(state: Arc<AppState>, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/generate-hash", post(generate_hash))
        .route("/average-hash", post(average_hash))
        .route("/compare-hash", post(compare_hash))
        .route("/compare-images", post(compare_images))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
pub struct HashParams {
    #[serde(default)]
    pub secure: bool,
}

#[derive(Serialize)]
pub struct HashResponse {
    pub hash: String,
}

#[derive(Serialize)]
pub struct CompareHashResponse {
    pub hamming_distance: u32,
    pub is_match: bool,
    pub hash_length: usize,
    pub threshold: u32,
}

#[derive(Serialize)]
pub struct ImageHashes {
    pub image1: BinaryHash,
    pub image2: BinaryHash,
}

#[derive(Serialize)]
pub struct CompareImagesResponse {
    pub hashes: ImageHashes,
    pub hamming_distance: u32,
    pub is_match: bool,
    pub hash_length: usize,
}

/// POST /generate-hash — binary hash of one face image.
async fn generate_hash(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashParams>,
    multipart: Multipart,
) -> Result<Json<HashResponse>, AppError> {
    let mut form = Form::read(multipart).await?;
    let file = form.take_file("file")?;

    let hash = state
        .engine
        .hash(file.data.to_vec())
        .await
        .map_err(|e| face_failure(e, "No face detected", &file.label))?;

    tracing::info!(file = %file.label, secure = params.secure, "hash generated");

    let hash = if params.secure {
        hash.digest()
    } else {
        hash.to_string()
    };
    Ok(Json(HashResponse { hash }))
}

/// POST /average-hash — hash of the mean embedding of two or more images.
async fn average_hash(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<AggregationResult>, AppError> {
    let form = Form::read(multipart).await?;
    let images: Vec<LabeledImage> = form
        .files_named("files")
        .map(|f| LabeledImage::new(f.label.clone(), f.data.to_vec()))
        .collect();
    let count = images.len();
    // Rejected here so a short request never waits behind queued inference.
    if count < MIN_IMAGES {
        return Err(AppError::BadRequest("At least 2 images required".into()));
    }

    let result = state.engine.average_hash(images).await.map_err(|e| match e {
        EngineError::Aggregate(AggregateError::InsufficientInput { .. }) => {
            AppError::BadRequest("At least 2 images required".into())
        }
        EngineError::Aggregate(AggregateError::NoValidFaces { .. }) => {
            AppError::BadRequest("No valid faces detected in any images".into())
        }
        other => AppError::Internal(format!("average-hash over {count} images: {other}")),
    })?;

    tracing::info!(
        images = count,
        processed = result.processed_images,
        failed = result.failed_images.len(),
        "average hash generated"
    );

    Ok(Json(result))
}

/// POST /compare-hash — compare an uploaded face against a known hash.
async fn compare_hash(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<CompareHashResponse>, AppError> {
    let mut form = Form::read(multipart).await?;
    let file = form.take_file("file")?;
    let target: BinaryHash = form
        .take_text("target_hash")?
        .trim()
        .parse()
        .map_err(|e| AppError::BadRequest(format!("Invalid target hash: {e}")))?;

    let image_hash = state
        .engine
        .hash(file.data.to_vec())
        .await
        .map_err(|e| face_failure(e, "No face detected in image", &file.label))?;

    let threshold = state.hash_match_threshold;
    let comparison = HammingMatcher::new(threshold)
        .compare(&image_hash, &target)
        .map_err(|e| match e {
            CompareError::LengthMismatch { .. } => AppError::BadRequest("Hash length mismatch".into()),
        })?;

    tracing::info!(
        file = %file.label,
        distance = comparison.distance,
        is_match = comparison.is_match,
        threshold,
        "hash compared"
    );

    Ok(Json(CompareHashResponse {
        hamming_distance: comparison.distance,
        is_match: comparison.is_match,
        hash_length: image_hash.len(),
        threshold,
    }))
}

/// POST /compare-images — hash two uploaded faces and compare them.
async fn compare_images(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<CompareImagesResponse>, AppError> {
    const NO_FACE: &str = "Face not detected in one or both images";

    let mut form = Form::read(multipart).await?;
    let first = form.take_file("image1")?;
    let second = form.take_file("image2")?;

    // Both images are hashed before either failure is reported.
    let hash1 = state.engine.hash(first.data.to_vec()).await;
    let hash2 = state.engine.hash(second.data.to_vec()).await;
    let hash1 = hash1.map_err(|e| face_failure(e, NO_FACE, &first.label))?;
    let hash2 = hash2.map_err(|e| face_failure(e, NO_FACE, &second.label))?;

    let comparison = HammingMatcher::new(state.image_match_threshold)
        .compare(&hash1, &hash2)
        .map_err(|e| AppError::Internal(format!("compare {} / {}: {e}", first.label, second.label)))?;

    tracing::info!(
        image1 = %first.label,
        image2 = %second.label,
        distance = comparison.distance,
        is_match = comparison.is_match,
        "images compared"
    );

    let hash_length = hash1.len();
    Ok(Json(CompareImagesResponse {
        hashes: ImageHashes {
            image1: hash1,
            image2: hash2,
        },
        hamming_distance: comparison.distance,
        is_match: comparison.is_match,
        hash_length,
    }))
}

/// GET /health
async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Map an engine failure for a single image: face problems are the caller's,
/// anything else is ours.
fn face_failure(err: EngineError, detail: &str, label: &str) -> AppError {
    match err {
        EngineError::Hash(e) => {
            tracing::info!(file = %label, kind = e.kind(), error = %e, "no usable face");
            AppError::BadRequest(detail.to_string())
        }
        other => AppError::Internal(format!("processing {label}: {other}")),
    }
}

/// Oversized uploads keep their 413; other malformed bodies are 400s.
fn multipart_failure(err: MultipartError, context: &str) -> AppError {
    AppError::Rejected(err.status(), format!("{context}: {}", err.body_text()))
}

/// One uploaded multipart part.
struct UploadedFile {
    name: String,
    label: String,
    data: Bytes,
}

/// All parts of a multipart form, in submission order.
struct Form {
    parts: Vec<UploadedFile>,
}

impl Form {
    async fn read(mut multipart: Multipart) -> Result<Self, AppError> {
        let mut parts = Vec::new();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| multipart_failure(e, "Multipart error"))?
        {
            let name = field.name().unwrap_or_default().to_string();
            let label = field.file_name().unwrap_or(&name).to_string();
            let data = field
                .bytes()
                .await
                .map_err(|e| multipart_failure(e, &format!("Failed to read field {name}")))?;
            parts.push(UploadedFile { name, label, data });
        }
        Ok(Self { parts })
    }

    fn take_file(&mut self, name: &str) -> Result<UploadedFile, AppError> {
        let pos = self
            .parts
            .iter()
            .position(|p| p.name == name)
            .ok_or_else(|| AppError::BadRequest(format!("Missing form field: {name}")))?;
        Ok(self.parts.remove(pos))
    }

    fn take_text(&mut self, name: &str) -> Result<String, AppError> {
        let part = self.take_file(name)?;
        String::from_utf8(part.data.to_vec())
            .map_err(|_| AppError::BadRequest(format!("Form field {name} is not valid UTF-8")))
    }

    fn files_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a UploadedFile> + 'a {
        self.parts.iter().filter(move |p| p.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::spawn_engine;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use facehash_core::detector::{DetectError, Detector};
    use facehash_core::embedder::{EmbedError, Embedder};
    use facehash_core::{Embedding, FaceCrop, FaceHasher};
    use std::time::Duration;
    use tower::ServiceExt;

    const BOUNDARY: &str = "facehash-test-boundary";

    /// First byte selects the face: 0 = none, 1 = face A, 2 = face B.
    struct TagDetector;

    impl Detector for TagDetector {
        fn detect(&mut self, image: &[u8]) -> Result<FaceCrop, DetectError> {
            match image.first() {
                Some(&tag) if tag > 0 => Ok(FaceCrop::from_rgb(&image::RgbImage::from_pixel(
                    1,
                    1,
                    image::Rgb([tag, 0, 0]),
                ))),
                _ => Err(DetectError::NoFace),
            }
        }
    }

    struct TagEmbedder;

    impl Embedder for TagEmbedder {
        fn embed(&mut self, face: &FaceCrop) -> Result<Embedding, EmbedError> {
            match face.rgb(0, 0)[0] {
                1 => Ok(Embedding::new(vec![1.0, 5.0, 3.0, 2.0])),
                _ => Ok(Embedding::new(vec![5.0, 1.0, 2.0, 3.0])),
            }
        }
    }

    /// Holds the engine for `delay` per face.
    struct SlowEmbedder {
        delay: Duration,
    }

    impl Embedder for SlowEmbedder {
        fn embed(&mut self, _face: &FaceCrop) -> Result<Embedding, EmbedError> {
            std::thread::sleep(self.delay);
            Ok(Embedding::new(vec![1.0, 5.0, 3.0, 2.0]))
        }
    }

    fn app_with(embedder: Box<dyn Embedder + Send>, timeout: Duration, max_upload_bytes: usize) -> Router {
        let hasher = FaceHasher::new(Box::new(TagDetector), embedder);
        let state = Arc::new(AppState {
            engine: spawn_engine(hasher, 4, timeout),
            hash_match_threshold: 25,
            image_match_threshold: 30,
        });
        router(state, max_upload_bytes)
    }

    fn app() -> Router {
        app_with(Box::new(TagEmbedder), Duration::from_secs(5), 1024 * 1024)
    }

    /// Inference outlives the 20 ms request timeout.
    fn stalled_app() -> Router {
        app_with(
            Box::new(SlowEmbedder {
                delay: Duration::from_millis(300),
            }),
            Duration::from_millis(20),
            1024 * 1024,
        )
    }

    enum Part<'a> {
        File(&'a str, &'a str, &'a [u8]),
        Text(&'a str, &'a str),
    }

    fn multipart(uri: &str, parts: &[Part<'_>]) -> Request<Body> {
        let mut body = Vec::new();
        for part in parts {
            body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            match part {
                Part::File(name, filename, data) => {
                    body.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n\
                             Content-Type: application/octet-stream\r\n\r\n"
                        )
                        .as_bytes(),
                    );
                    body.extend_from_slice(data);
                }
                Part::Text(name, value) => {
                    body.extend_from_slice(
                        format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}").as_bytes(),
                    );
                }
            }
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", format!("multipart/form-data; boundary={BOUNDARY}"))
            .body(Body::from(body))
            .unwrap()
    }

    async fn send(request: Request<Body>) -> (StatusCode, serde_json::Value) {
        send_to(app(), request).await
    }

    async fn send_to(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let (status, json) = send(request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn test_generate_hash() {
        let (status, json) = send(multipart("/generate-hash", &[Part::File("file", "a.jpg", &[1])])).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["hash"], "0101");
    }

    #[tokio::test]
    async fn test_generate_hash_secure() {
        let (status, json) =
            send(multipart("/generate-hash?secure=true", &[Part::File("file", "a.jpg", &[1])])).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            json["hash"],
            "07334386287751ba02a4588c1a0875dbd074a61bd9e6ab7c48d244eacd0c99e0"
        );
    }

    #[tokio::test]
    async fn test_generate_hash_no_face() {
        let (status, json) = send(multipart("/generate-hash", &[Part::File("file", "a.jpg", &[0])])).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["detail"], "No face detected");
    }

    #[tokio::test]
    async fn test_generate_hash_missing_field() {
        let (status, json) = send(multipart("/generate-hash", &[Part::File("image", "a.jpg", &[1])])).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["detail"], "Missing form field: file");
    }

    #[tokio::test]
    async fn test_average_hash_requires_two_images() {
        let (status, json) = send(multipart("/average-hash", &[Part::File("files", "a.jpg", &[1])])).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["detail"], "At least 2 images required");
    }

    #[tokio::test]
    async fn test_average_hash_reports_failures() {
        let request = multipart(
            "/average-hash",
            &[
                Part::File("files", "a.jpg", &[1]),
                Part::File("files", "b.jpg", &[0]),
                Part::File("files", "c.jpg", &[1]),
            ],
        );
        let (status, json) = send(request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["average_hash"], "0101");
        assert_eq!(json["processed_images"], 2);
        assert_eq!(json["failed_images"][0]["index"], 1);
        assert_eq!(json["failed_images"][0]["filename"], "b.jpg");
        assert_eq!(json["failed_images"][0]["error"], "No face detected");
    }

    #[tokio::test]
    async fn test_average_hash_all_failed() {
        let request = multipart(
            "/average-hash",
            &[Part::File("files", "a.jpg", &[0]), Part::File("files", "b.jpg", &[])],
        );
        let (status, json) = send(request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["detail"], "No valid faces detected in any images");
    }

    #[tokio::test]
    async fn test_compare_hash() {
        let request = multipart(
            "/compare-hash",
            &[Part::File("file", "a.jpg", &[1]), Part::Text("target_hash", "0110")],
        );
        let (status, json) = send(request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["hamming_distance"], 2);
        assert_eq!(json["is_match"], true);
        assert_eq!(json["hash_length"], 4);
        assert_eq!(json["threshold"], 25);
    }

    #[tokio::test]
    async fn test_compare_hash_length_mismatch() {
        let request = multipart(
            "/compare-hash",
            &[Part::File("file", "a.jpg", &[1]), Part::Text("target_hash", "010")],
        );
        let (status, json) = send(request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["detail"], "Hash length mismatch");
    }

    #[tokio::test]
    async fn test_compare_hash_rejects_malformed_target() {
        let request = multipart(
            "/compare-hash",
            &[Part::File("file", "a.jpg", &[1]), Part::Text("target_hash", "01x1")],
        );
        let (status, _) = send(request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_compare_hash_no_face() {
        let request = multipart(
            "/compare-hash",
            &[Part::File("file", "a.jpg", &[0]), Part::Text("target_hash", "0101")],
        );
        let (status, json) = send(request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["detail"], "No face detected in image");
    }

    #[tokio::test]
    async fn test_compare_images_same_face() {
        let request = multipart(
            "/compare-images",
            &[Part::File("image1", "a.jpg", &[1]), Part::File("image2", "b.jpg", &[1])],
        );
        let (status, json) = send(request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["hashes"]["image1"], "0101");
        assert_eq!(json["hashes"]["image2"], "0101");
        assert_eq!(json["hamming_distance"], 0);
        assert_eq!(json["is_match"], true);
        assert_eq!(json["hash_length"], 4);
    }

    #[tokio::test]
    async fn test_compare_images_different_faces() {
        let request = multipart(
            "/compare-images",
            &[Part::File("image1", "a.jpg", &[1]), Part::File("image2", "b.jpg", &[2])],
        );
        let (status, json) = send(request).await;
        assert_eq!(status, StatusCode::OK);
        // [5,1,2,3] median 2.5 -> "1001"
        assert_eq!(json["hashes"]["image2"], "1001");
        assert_eq!(json["hamming_distance"], 2);
    }

    #[tokio::test]
    async fn test_compare_images_no_face() {
        let request = multipart(
            "/compare-images",
            &[Part::File("image1", "a.jpg", &[1]), Part::File("image2", "b.jpg", &[0])],
        );
        let (status, json) = send(request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["detail"], "Face not detected in one or both images");
    }

    #[tokio::test]
    async fn test_average_hash_single_image_rejected_while_engine_busy() {
        let app = stalled_app();
        let busy = app.clone();
        tokio::spawn(async move {
            busy.oneshot(multipart("/generate-hash", &[Part::File("file", "a.jpg", &[1])]))
                .await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        let (status, json) = send_to(app, multipart("/average-hash", &[Part::File("files", "a.jpg", &[1])])).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["detail"], "At least 2 images required");
    }

    #[tokio::test]
    async fn test_generate_hash_timeout_is_opaque_500() {
        let (status, json) = send_to(
            stalled_app(),
            multipart("/generate-hash", &[Part::File("file", "a.jpg", &[1])]),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json, serde_json::json!({ "detail": "Internal server error" }));
    }

    #[tokio::test]
    async fn test_compare_images_timeout_is_opaque_500() {
        let request = multipart(
            "/compare-images",
            &[Part::File("image1", "a.jpg", &[1]), Part::File("image2", "b.jpg", &[1])],
        );
        let (status, json) = send_to(stalled_app(), request).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json, serde_json::json!({ "detail": "Internal server error" }));
    }

    #[tokio::test]
    async fn test_oversized_upload_is_413() {
        let app = app_with(Box::new(TagEmbedder), Duration::from_secs(5), 256);
        let image = vec![1u8; 4096];
        let response = app
            .oneshot(multipart("/generate-hash", &[Part::File("file", "a.jpg", &image)]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
