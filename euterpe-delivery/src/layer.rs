//! Delivery layer composition root
//!
//! Wires the breaker, warmer, scheduler, chunked strategy and preloader into
//! one process-wide instance and exposes the surface the rest of the player
//! consumes: `submit_transfer_batch` for the upload UI,
//! `preload_for_playback` for the playback controller, `cache_stats` for
//! diagnostics, and the event bus for anyone who wants to watch.
//!
//! There are no hidden globals: every component is constructed here and
//! injected where needed; "one instance per process" is a property of the
//! composition, not of statics.

use crate::breaker::CircuitBreaker;
use crate::preload::{CacheStats, ContentCache, Preloader, QueueItem};
use crate::store::{ContentFetcher, ContentStore, ReferenceStore};
use crate::transfer::{BatchHandle, ChunkedTransfer, TransferItem, TransferScheduler};
use crate::warmer::ConnectionWarmer;
use euterpe_common::config::DeliveryParams;
use euterpe_common::events::EventBus;
use euterpe_common::Result;
use std::sync::Arc;
use uuid::Uuid;

/// Breaker key for the content storage backend
const CONTENT_STORE_UPSTREAM: &str = "content-store";

/// One file the upload UI wants migrated into the content store
#[derive(Debug, Clone)]
pub struct UploadRequest {
    /// Local identity, recorded against the stored path after upload
    pub local_id: Uuid,
    /// Display label (typically the file name)
    pub label: String,
    pub bytes: Arc<Vec<u8>>,
    /// Destination path in the content store
    pub destination: String,
    pub content_type: String,
}

/// The assembled media delivery resilience layer
///
/// Construct once at startup, inside a tokio runtime; the warmer and the
/// cache sweeper start immediately and run until [`DeliveryLayer::shutdown`].
pub struct DeliveryLayer {
    event_bus: EventBus,
    breaker: Arc<CircuitBreaker>,
    warmer: Arc<ConnectionWarmer>,
    scheduler: TransferScheduler,
    chunked: Arc<ChunkedTransfer>,
    reference_store: Arc<dyn ReferenceStore>,
    cache: Arc<ContentCache>,
    preloader: Arc<Preloader>,
}

impl DeliveryLayer {
    pub fn new(
        params: DeliveryParams,
        warm_endpoints: Vec<String>,
        content_store: Arc<dyn ContentStore>,
        reference_store: Arc<dyn ReferenceStore>,
        fetcher: Arc<dyn ContentFetcher>,
    ) -> Result<Self> {
        let event_bus = EventBus::new(256);

        let breaker = Arc::new(
            CircuitBreaker::new(
                params.breaker_failure_threshold,
                params.breaker_reset_timeout(),
            )
            .with_event_bus(event_bus.clone()),
        );

        let warmer = Arc::new(
            ConnectionWarmer::new(warm_endpoints, &params)?.with_event_bus(event_bus.clone()),
        );
        warmer.start();

        let scheduler = TransferScheduler::new(params.transfer_concurrency)
            .with_event_bus(event_bus.clone());
        let chunked = Arc::new(ChunkedTransfer::new(
            Arc::clone(&content_store),
            params.chunk_size_bytes,
        ));

        let cache = Arc::new(
            ContentCache::new(params.cache_capacity).with_event_bus(event_bus.clone()),
        );
        let preloader = Arc::new(Preloader::with_event_bus(
            fetcher,
            Arc::clone(&breaker),
            Arc::clone(&cache),
            &params,
            Some(event_bus.clone()),
        ));

        tracing::info!("Delivery layer assembled");

        Ok(Self {
            event_bus,
            breaker,
            warmer,
            scheduler,
            chunked,
            reference_store,
            cache,
            preloader,
        })
    }

    /// Submit a batch of uploads; returns the per-batch progress stream and
    /// completion handle
    ///
    /// Each task consults the breaker for the storage upstream, goes through
    /// the chunked strategy (single-shot for small payloads) and, on
    /// success, its stored path is recorded in the reference store under the
    /// file's local identity. A breaker-open store fails the task without a
    /// network attempt; the batch continues.
    pub fn submit_transfer_batch(&self, files: Vec<UploadRequest>) -> BatchHandle {
        let items: Vec<TransferItem> = files
            .into_iter()
            .map(|f| TransferItem {
                label: f.label,
                bytes: f.bytes,
                destination: f.destination,
                content_type: f.content_type,
                local_id: Some(f.local_id),
            })
            .collect();

        let chunked = Arc::clone(&self.chunked);
        let reference_store = Arc::clone(&self.reference_store);
        let breaker = Arc::clone(&self.breaker);

        self.scheduler.submit(items, move |task| {
            let chunked = Arc::clone(&chunked);
            let reference_store = Arc::clone(&reference_store);
            let breaker = Arc::clone(&breaker);
            async move {
                if breaker.is_open(CONTENT_STORE_UPSTREAM) {
                    return Err(euterpe_common::Error::Store(
                        "content store circuit open".to_string(),
                    ));
                }

                let label = task.item.label.clone();
                let transferred = chunked
                    .transfer(
                        &task.item.bytes,
                        &task.item.destination,
                        &task.item.content_type,
                        |percent| {
                            tracing::trace!(label = %label, percent, "Chunk progress");
                        },
                    )
                    .await;

                let stored = match transferred {
                    Ok(stored) => {
                        breaker.record_success(CONTENT_STORE_UPSTREAM);
                        stored
                    }
                    Err(e) => {
                        breaker.record_failure(CONTENT_STORE_UPSTREAM);
                        return Err(e.into());
                    }
                };

                if let Some(local_id) = task.item.local_id {
                    reference_store.upsert(local_id, &stored).await?;
                }

                Ok(stored)
            }
        })
    }

    /// Fire-and-forget preload hint from the playback controller
    ///
    /// Runs the immediate-horizon trigger for the item that just started
    /// and feeds the queue to the queue-change trigger, which no-ops unless
    /// the ordered ID sequence actually changed.
    pub fn preload_for_playback(&self, current: &QueueItem, queue: &[QueueItem]) {
        self.preloader.track_started(current, queue);
        self.preloader.queue_changed(queue);
    }

    /// Cache occupancy for the diagnostics UI
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// The cache, for playback-start logic checking for preloaded payloads
    pub fn cache(&self) -> Arc<ContentCache> {
        Arc::clone(&self.cache)
    }

    /// The shared breaker, for callers wrapping their own upstream calls
    pub fn breaker(&self) -> Arc<CircuitBreaker> {
        Arc::clone(&self.breaker)
    }

    /// The warmer, for its pooled reuse-biased client
    pub fn warmer(&self) -> Arc<ConnectionWarmer> {
        Arc::clone(&self.warmer)
    }

    /// Subscribe-anywhere bus carrying progress and diagnostics
    pub fn events(&self) -> EventBus {
        self.event_bus.clone()
    }

    /// Stop the periodic tasks (warmup cycles, cache sweeps, pending
    /// preload triggers)
    pub fn shutdown(&self) {
        self.warmer.stop();
        self.preloader.stop();
        tracing::info!("Delivery layer shut down");
    }
}
