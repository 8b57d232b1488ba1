//! Isolated preload execution context
//!
//! Runs a preloader inside its own task so speculative work never competes
//! with the interactive path for anything but bandwidth. The service owns
//! its cache and failure memory outright; the caller's context talks to it
//! only through typed message envelopes and sees results as events on the
//! bus — a remote peer in all but address space. Stale reads across the
//! boundary are acceptable because the cache is a hint, not a
//! correctness-bearing store.
//!
//! A single-context deployment simply holds a [`Preloader`] directly; this
//! service is the performance-isolation option, not a correctness
//! requirement.

use super::{CacheStats, ContentCache, Preloader, QueueItem};
use crate::breaker::CircuitBreaker;
use crate::store::ContentFetcher;
use euterpe_common::config::DeliveryParams;
use euterpe_common::events::EventBus;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Request envelopes accepted by the preload context
#[derive(Debug)]
pub enum PreloadCommand {
    /// A new item started playing; run the immediate-horizon trigger
    TrackStarted {
        current: QueueItem,
        queue: Vec<QueueItem>,
    },
    /// The queue was edited; run the queue-change trigger
    QueueChanged { queue: Vec<QueueItem> },
    /// Reply with a cache occupancy snapshot
    Stats {
        reply: oneshot::Sender<CacheStats>,
    },
    /// Drop every cached payload
    ClearCache,
    /// Stop the context after draining queued commands
    Shutdown,
}

/// Spawns the isolated preload context
pub struct PreloadService;

impl PreloadService {
    /// Start the context and return its handle
    ///
    /// The context builds its own cache and circuit breaker from `params`;
    /// nothing in it is reachable from the caller except through the
    /// returned handle and the event bus.
    pub fn spawn(
        fetcher: Arc<dyn ContentFetcher>,
        params: &DeliveryParams,
        event_bus: Option<EventBus>,
    ) -> PreloadHandle {
        let (tx, mut rx) = mpsc::channel::<PreloadCommand>(64);
        let params = params.clone();

        tokio::spawn(async move {
            let breaker = Arc::new(
                CircuitBreaker::new(
                    params.breaker_failure_threshold,
                    params.breaker_reset_timeout(),
                ),
            );
            let cache = Arc::new(ContentCache::new(params.cache_capacity));
            let preloader = Preloader::with_event_bus(
                fetcher,
                breaker,
                Arc::clone(&cache),
                &params,
                event_bus,
            );

            tracing::debug!("Preload service context started");

            while let Some(command) = rx.recv().await {
                match command {
                    PreloadCommand::TrackStarted { current, queue } => {
                        preloader.track_started(&current, &queue);
                    }
                    PreloadCommand::QueueChanged { queue } => {
                        preloader.queue_changed(&queue);
                    }
                    PreloadCommand::Stats { reply } => {
                        let _ = reply.send(cache.stats());
                    }
                    PreloadCommand::ClearCache => {
                        cache.clear();
                    }
                    PreloadCommand::Shutdown => break,
                }
            }

            preloader.stop();
            tracing::debug!("Preload service context stopped");
        });

        PreloadHandle { tx }
    }
}

/// Caller-side handle to the isolated preload context
///
/// All methods are fire-and-forget sends except [`PreloadHandle::stats`],
/// which round-trips over a oneshot reply channel.
#[derive(Clone)]
pub struct PreloadHandle {
    tx: mpsc::Sender<PreloadCommand>,
}

impl PreloadHandle {
    pub async fn track_started(&self, current: QueueItem, queue: Vec<QueueItem>) {
        let _ = self
            .tx
            .send(PreloadCommand::TrackStarted { current, queue })
            .await;
    }

    pub async fn queue_changed(&self, queue: Vec<QueueItem>) {
        let _ = self.tx.send(PreloadCommand::QueueChanged { queue }).await;
    }

    /// Cache occupancy snapshot; None if the context has shut down
    pub async fn stats(&self) -> Option<CacheStats> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(PreloadCommand::Stats { reply }).await.ok()?;
        rx.await.ok()
    }

    pub async fn clear_cache(&self) {
        let _ = self.tx.send(PreloadCommand::ClearCache).await;
    }

    pub async fn shutdown(&self) {
        let _ = self.tx.send(PreloadCommand::Shutdown).await;
    }
}
