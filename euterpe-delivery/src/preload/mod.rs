//! Predictive preloader
//!
//! Fetches audio payloads the listener is likely to need next and stores
//! them in the bounded content cache, so playback of an upcoming item can
//! start from memory instead of the network. Preloading is best-effort:
//! failures stay in the logs, and the currently playing item is never
//! touched.
//!
//! Two triggers with different aggressiveness:
//! - **immediate-horizon**: fires shortly after a new item starts playing
//!   and targets the next 1-2 queue items; a newer trigger cancels and
//!   replaces a pending one (cancel-and-restart, not coalescing).
//! - **queue-change**: fires when the queue's ordered ID sequence actually
//!   changes, waits a longer settle delay to ride out rapid edits, then
//!   targets the first few queue items that are not already cached.
//!
//! Both triggers drop candidates the fetcher cannot resolve, and each fetch
//! consults the circuit breaker for the URL's upstream. Per-batch fetch
//! concurrency is bounded below the foreground transfer limit.

mod cache;
mod service;

pub use cache::{CacheEntry, CacheStats, ContentCache};
pub use service::{PreloadCommand, PreloadHandle, PreloadService};

use crate::breaker::CircuitBreaker;
use crate::store::ContentFetcher;
use chrono::Utc;
use euterpe_common::config::DeliveryParams;
use euterpe_common::events::{DeliveryEvent, EventBus};
use futures::stream::StreamExt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// An entry in the playback queue, as the preloader sees it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueItem {
    pub id: Uuid,
    /// Content URL; doubles as the cache key
    pub url: String,
}

/// Everything a spawned preload batch needs, detached from the Preloader
#[derive(Clone)]
struct FetchContext {
    fetcher: Arc<dyn ContentFetcher>,
    breaker: Arc<CircuitBreaker>,
    cache: Arc<ContentCache>,
    concurrency: usize,
    event_bus: Option<EventBus>,
}

/// Predictive content preloader
///
/// Owns the pending-trigger tasks and the cache eviction sweeper; both are
/// cancelled by [`Preloader::stop`]. Must be constructed inside a tokio
/// runtime.
pub struct Preloader {
    ctx: FetchContext,
    immediate_delay: Duration,
    settle_delay: Duration,
    horizon: usize,
    queue_depth: usize,
    pending_immediate: Mutex<Option<JoinHandle<()>>>,
    pending_queue: Mutex<Option<JoinHandle<()>>>,
    last_queue_ids: Mutex<Vec<Uuid>>,
    sweep_cancel: CancellationToken,
}

impl Preloader {
    /// Wire a preloader over a shared cache and breaker
    ///
    /// Spawns the periodic eviction sweep for the cache; the sweep stops
    /// with [`Preloader::stop`].
    pub fn new(
        fetcher: Arc<dyn ContentFetcher>,
        breaker: Arc<CircuitBreaker>,
        cache: Arc<ContentCache>,
        params: &DeliveryParams,
    ) -> Self {
        Self::with_event_bus(fetcher, breaker, cache, params, None)
    }

    pub fn with_event_bus(
        fetcher: Arc<dyn ContentFetcher>,
        breaker: Arc<CircuitBreaker>,
        cache: Arc<ContentCache>,
        params: &DeliveryParams,
        event_bus: Option<EventBus>,
    ) -> Self {
        let sweep_cancel = CancellationToken::new();
        {
            let cache = Arc::clone(&cache);
            let cancel = sweep_cancel.clone();
            let sweep_interval = params.cache_sweep_interval();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(sweep_interval);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                // Skip the immediate first tick; a fresh cache has nothing
                // to evict.
                interval.tick().await;
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = interval.tick() => { cache.sweep(); }
                    }
                }
            });
        }

        Self {
            ctx: FetchContext {
                fetcher,
                breaker,
                cache,
                concurrency: params.preload_concurrency.max(1),
                event_bus,
            },
            immediate_delay: params.preload_immediate_delay(),
            settle_delay: params.preload_settle_delay(),
            horizon: params.preload_horizon.max(1),
            queue_depth: params.preload_queue_depth.max(1),
            pending_immediate: Mutex::new(None),
            pending_queue: Mutex::new(None),
            last_queue_ids: Mutex::new(Vec::new()),
            sweep_cancel,
        }
    }

    /// Immediate-horizon trigger: a new item started playing
    ///
    /// Schedules a fetch of the next `preload_horizon` queue items after a
    /// short delay. A pending schedule from a previous call is aborted and
    /// replaced, so rapid track changes only preload for the last one.
    /// Fire-and-forget; never blocks playback of the current item.
    pub fn track_started(&self, current: &QueueItem, queue: &[QueueItem]) {
        let start = queue
            .iter()
            .position(|item| item.id == current.id)
            .map(|pos| pos + 1)
            .unwrap_or(0);
        let candidates: Vec<QueueItem> = queue
            .iter()
            .skip(start)
            .take(self.horizon)
            .cloned()
            .collect();

        let ctx = self.ctx.clone();
        let delay = self.immediate_delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            preload_batch(ctx, candidates, "immediate").await;
        });

        let mut pending = self.pending_immediate.lock().unwrap();
        if let Some(previous) = pending.replace(handle) {
            previous.abort();
        }
    }

    /// Queue-change trigger: the queue's identity sequence may have changed
    ///
    /// Compares the ordered ID sequence against the last observed one; on a
    /// real change waits out the settle delay (restarting on further edits)
    /// and then fetches the first `preload_queue_depth` items that are not
    /// already cached.
    pub fn queue_changed(&self, queue: &[QueueItem]) {
        let ids: Vec<Uuid> = queue.iter().map(|item| item.id).collect();
        {
            let mut last = self.last_queue_ids.lock().unwrap();
            if *last == ids {
                return;
            }
            *last = ids;
        }

        let prefix: Vec<QueueItem> = queue.iter().take(self.queue_depth).cloned().collect();
        let ctx = self.ctx.clone();
        let delay = self.settle_delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Cached items are skipped at fire time, not trigger time.
            let candidates: Vec<QueueItem> = prefix
                .into_iter()
                .filter(|item| !ctx.cache.contains(&item.url))
                .collect();
            preload_batch(ctx, candidates, "queue-change").await;
        });

        let mut pending = self.pending_queue.lock().unwrap();
        if let Some(previous) = pending.replace(handle) {
            previous.abort();
        }
    }

    /// Occupancy snapshot of the shared cache
    pub fn cache_stats(&self) -> CacheStats {
        self.ctx.cache.stats()
    }

    /// The cache this preloader populates
    pub fn cache(&self) -> Arc<ContentCache> {
        Arc::clone(&self.ctx.cache)
    }

    /// Abort pending triggers and stop the eviction sweep
    pub fn stop(&self) {
        if let Some(handle) = self.pending_immediate.lock().unwrap().take() {
            handle.abort();
        }
        if let Some(handle) = self.pending_queue.lock().unwrap().take() {
            handle.abort();
        }
        self.sweep_cancel.cancel();
    }
}

impl Drop for Preloader {
    fn drop(&mut self) {
        self.sweep_cancel.cancel();
    }
}

/// Fetch a batch of candidates into the cache, bounded concurrency
///
/// Unresolvable URLs are dropped, breaker-open upstreams are skipped, and
/// every failure stays silent beyond diagnostics.
async fn preload_batch(ctx: FetchContext, items: Vec<QueueItem>, trigger: &'static str) {
    let candidates: Vec<QueueItem> = items
        .into_iter()
        .filter(|item| ctx.fetcher.can_fetch(&item.url))
        .collect();

    if candidates.is_empty() {
        return;
    }

    tracing::debug!(trigger, count = candidates.len(), "Starting preload batch");

    let fetches = candidates.into_iter().map(|item| {
        let ctx = ctx.clone();
        async move {
            let upstream = ctx.fetcher.upstream(&item.url);
            if ctx.breaker.is_open(&upstream) {
                tracing::debug!(
                    url = %item.url,
                    upstream = %upstream,
                    "Skipping preload, circuit open"
                );
                return;
            }

            match ctx.fetcher.fetch(&item.url).await {
                Ok(bytes) => {
                    ctx.breaker.record_success(&upstream);
                    let size = bytes.len();
                    ctx.cache.insert(&item.url, bytes);
                    tracing::debug!(url = %item.url, bytes = size, "Preloaded content");
                    if let Some(bus) = &ctx.event_bus {
                        bus.emit_lossy(DeliveryEvent::PreloadCompleted {
                            url: item.url,
                            bytes: size,
                            timestamp: Utc::now(),
                        });
                    }
                }
                Err(e) => {
                    // Best-effort: never surfaces to the playback path.
                    ctx.breaker.record_failure(&upstream);
                    tracing::debug!(url = %item.url, error = %e, "Preload fetch failed");
                    if let Some(bus) = &ctx.event_bus {
                        bus.emit_lossy(DeliveryEvent::PreloadFailed {
                            url: item.url,
                            timestamp: Utc::now(),
                        });
                    }
                }
            }
        }
    });

    futures::stream::iter(fetches)
        .buffer_unordered(ctx.concurrency)
        .collect::<Vec<()>>()
        .await;
}
