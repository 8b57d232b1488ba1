//! Chunked upload strategy
//!
//! Splits payloads larger than the configured chunk size into contiguous
//! chunks uploaded **sequentially** to temporary chunk paths, reporting
//! cumulative progress after each one, then uploads the complete payload to
//! the real destination. The chunk uploads exist for progress and
//! resumability; the backing store has no multipart reassembly, so the final
//! transfer carries the whole payload. Sequential over concurrent is
//! deliberate: the foreground upload keeps the bandwidth and ordering stays
//! trivial.
//!
//! Chunk artifacts are removed once the transfer settles, on the success
//! path and on abort alike; removal failures are logged and swallowed since
//! they do not affect transfer correctness.

use super::TransferError;
use crate::store::ContentStore;
use std::sync::Arc;

/// Sequential chunked uploader against a content store
pub struct ChunkedTransfer {
    store: Arc<dyn ContentStore>,
    chunk_size: usize,
}

impl ChunkedTransfer {
    /// `chunk_size` of zero is coerced to one byte
    pub fn new(store: Arc<dyn ContentStore>, chunk_size: usize) -> Self {
        Self {
            store,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Transfer a payload to `destination`, reporting percent progress
    ///
    /// Payloads within one chunk go up in a single shot with one 100%
    /// report. Larger payloads produce `ceil(len / chunk_size)` chunk
    /// uploads followed by the final whole-payload upload; progress is
    /// monotonically non-decreasing and ends at 100. Any chunk failure
    /// aborts the whole transfer with a single error.
    pub async fn transfer(
        &self,
        payload: &[u8],
        destination: &str,
        content_type: &str,
        mut on_progress: impl FnMut(f32),
    ) -> Result<String, TransferError> {
        if payload.len() <= self.chunk_size {
            let stored = self
                .store
                .upload(payload, destination, content_type)
                .await?;
            on_progress(100.0);
            return Ok(stored);
        }

        let chunk_count = (payload.len() + self.chunk_size - 1) / self.chunk_size;
        tracing::debug!(
            destination = %destination,
            payload_bytes = payload.len(),
            chunk_count,
            "Splitting oversized payload into chunks"
        );

        let mut written: Vec<String> = Vec::with_capacity(chunk_count);
        let mut sent: usize = 0;

        for (index, chunk) in payload.chunks(self.chunk_size).enumerate() {
            let chunk_path = format!("{}.chunk{}", destination, index);
            match self.store.upload(chunk, &chunk_path, content_type).await {
                Ok(stored) => written.push(stored),
                Err(e) => {
                    tracing::warn!(
                        destination = %destination,
                        chunk = index,
                        error = %e,
                        "Chunk upload failed, aborting transfer"
                    );
                    self.cleanup(&written).await;
                    return Err(TransferError::ChunkFailed { index, source: e });
                }
            }

            sent += chunk.len();
            on_progress(sent as f32 * 100.0 / payload.len() as f32);
        }

        // Final transfer of the complete payload to the real destination.
        let stored = match self.store.upload(payload, destination, content_type).await {
            Ok(stored) => stored,
            Err(e) => {
                self.cleanup(&written).await;
                return Err(TransferError::Store(e));
            }
        };

        self.cleanup(&written).await;
        on_progress(100.0);

        tracing::info!(
            destination = %destination,
            payload_bytes = payload.len(),
            chunk_count,
            "Chunked transfer completed"
        );

        Ok(stored)
    }

    /// Best-effort removal of temporary chunk artifacts
    async fn cleanup(&self, paths: &[String]) {
        for path in paths {
            if let Err(e) = self.store.remove(path).await {
                tracing::warn!(path = %path, error = %e, "Failed to remove chunk artifact");
            }
        }
    }
}
