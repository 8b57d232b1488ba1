//! # Euterpe Media Delivery Library
//!
//! Resilience layer between the player and its upstream content services:
//! keeps playback fast and robust over unreliable networks and flaky
//! content/metadata APIs.
//!
//! **Purpose:** bounded-concurrency transfer scheduling, per-upstream
//! failure isolation, connection warming, chunked uploads with progress,
//! and predictive preloading into a bounded in-memory cache.
//!
//! Everything outside this layer (rendering, persistence, auth, decoding)
//! is an external collaborator reached through the contracts in [`store`].

pub mod breaker;
pub mod layer;
pub mod preload;
pub mod store;
pub mod transfer;
pub mod warmer;

pub use breaker::CircuitBreaker;
pub use layer::{DeliveryLayer, UploadRequest};
pub use preload::{CacheStats, ContentCache, PreloadHandle, PreloadService, Preloader, QueueItem};
pub use store::{ContentFetcher, ContentStore, ReferenceStore};
pub use transfer::{
    BatchHandle, ChunkedTransfer, TransferError, TransferItem, TransferProgress, TransferResult,
    TransferScheduler, TransferTask,
};
pub use warmer::ConnectionWarmer;
