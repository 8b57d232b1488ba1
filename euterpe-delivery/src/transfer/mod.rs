//! File transfer pipeline
//!
//! Batch uploads run through the bounded-concurrency [`TransferScheduler`];
//! oversized payloads go through the [`ChunkedTransfer`] strategy against
//! the content store.

mod chunked;
mod scheduler;

pub use chunked::ChunkedTransfer;
pub use scheduler::{BatchHandle, TransferScheduler};

use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// One input of a transfer batch as submitted by the caller
#[derive(Debug, Clone)]
pub struct TransferItem {
    /// Human-readable label for progress display (typically the file name)
    pub label: String,
    /// Payload reference; shared, never copied per worker
    pub bytes: Arc<Vec<u8>>,
    /// Destination path in the content store
    pub destination: String,
    /// MIME type recorded with the stored object
    pub content_type: String,
    /// Local identity for reference-store tracking, if any
    pub local_id: Option<Uuid>,
}

/// One unit of upload work
///
/// Created at submission, immutable, consumed exactly once by a worker.
#[derive(Debug, Clone)]
pub struct TransferTask {
    pub id: Uuid,
    /// Position in the submitted batch
    pub sequence: usize,
    pub item: TransferItem,
}

/// Outcome of one task, collected in completion order
#[derive(Debug, Clone)]
pub struct TransferResult {
    pub task_id: Uuid,
    pub label: String,
    pub success: bool,
    /// Stored path on success
    pub stored_path: Option<String>,
    /// Error detail on failure
    pub error: Option<String>,
}

/// Aggregate progress snapshot, recomputed on every task completion
///
/// Derived, never stored; `percentage` is completed over the total at
/// submission time.
#[derive(Debug, Clone, Serialize)]
pub struct TransferProgress {
    pub completed: usize,
    pub total: usize,
    pub current_label: Option<String>,
    pub percentage: f32,
    pub bytes_per_second: f64,
    pub eta_seconds: Option<u64>,
}

/// Transfer path errors
#[derive(Debug, Error)]
pub enum TransferError {
    /// A chunk upload failed; the whole chunked transfer aborted
    #[error("Chunk {index} failed: {source}")]
    ChunkFailed {
        index: usize,
        #[source]
        source: euterpe_common::Error,
    },

    /// The final or single-shot upload failed
    #[error("Store error: {0}")]
    Store(#[from] euterpe_common::Error),
}

impl From<TransferError> for euterpe_common::Error {
    fn from(e: TransferError) -> Self {
        match e {
            TransferError::Store(inner) => inner,
            chunked => euterpe_common::Error::Store(chunked.to_string()),
        }
    }
}
