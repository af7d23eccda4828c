use facehash_core::{AggregateError, AggregationResult, BinaryHash, FaceHasher, HashError, LabeledImage};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Hash(#[from] HashError),
    #[error(transparent)]
    Aggregate(#[from] AggregateError),
    #[error("engine thread exited")]
    ChannelClosed,
    #[error("engine did not answer within {0:?}")]
    Timeout(Duration),
}

/// Messages sent from HTTP handlers to the engine thread.
enum EngineRequest {
    Hash {
        image: Vec<u8>,
        reply: oneshot::Sender<Result<BinaryHash, HashError>>,
    },
    Average {
        images: Vec<LabeledImage>,
        reply: oneshot::Sender<Result<AggregationResult, AggregateError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    timeout: Duration,
}

impl EngineHandle {
    /// Detect, embed and binarize a single image.
    pub async fn hash(&self, image: Vec<u8>) -> Result<BinaryHash, EngineError> {
        Ok(self.submit(|reply| EngineRequest::Hash { image, reply }).await??)
    }

    /// Average hash across several images.
    pub async fn average_hash(&self, images: Vec<LabeledImage>) -> Result<AggregationResult, EngineError> {
        Ok(self.submit(|reply| EngineRequest::Average { images, reply }).await??)
    }

    /// Enqueue a request and wait for its reply. The timeout covers both the
    /// wait for queue space and the job itself. A timed-out job that already
    /// reached the engine still runs to completion; its reply is dropped.
    async fn submit<T>(
        &self,
        request: impl FnOnce(oneshot::Sender<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let exchange = async {
            self.tx
                .send(request(reply_tx))
                .await
                .map_err(|_| EngineError::ChannelClosed)?;
            reply_rx.await.map_err(|_| EngineError::ChannelClosed)
        };
        tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| EngineError::Timeout(self.timeout))?
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The thread owns `hasher` exclusively, so inference runs one request at a
/// time in arrival order. The thread exits once every handle is dropped.
pub fn spawn_engine(hasher: FaceHasher, queue_depth: usize, timeout: Duration) -> EngineHandle {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(queue_depth);

    std::thread::Builder::new()
        .name("facehash-engine".into())
        .spawn(move || {
            let mut hasher = hasher;
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Hash { image, reply } => {
                        let result = hasher.hash_image(&image);
                        if let Err(e) = &result {
                            tracing::debug!(kind = e.kind(), error = %e, "hash: no usable face");
                        }
                        let _ = reply.send(result);
                    }
                    EngineRequest::Average { images, reply } => {
                        let result = hasher.average_hash(&images);
                        match &result {
                            Ok(r) => tracing::debug!(
                                processed = r.processed_images,
                                failed = r.failed_images.len(),
                                "average: done"
                            ),
                            Err(e) => tracing::debug!(error = %e, "average: rejected"),
                        }
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .expect("failed to spawn engine thread");

    EngineHandle { tx, timeout }
}
