//! Event types for the Euterpe delivery layer
//!
//! Provides shared event definitions and the EventBus used by every delivery
//! component. Events are broadcast via EventBus and can be serialized for
//! transmission to connected UIs.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Delivery-layer event types
///
/// All components publish to this central enum for type safety and
/// exhaustive matching on the subscriber side.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DeliveryEvent {
    /// A transfer batch was submitted and its workers started
    ///
    /// Triggers:
    /// - Upload UI: show the batch progress panel
    TransferBatchStarted {
        /// Batch identifier
        batch_id: Uuid,
        /// Number of tasks at submission time
        total: usize,
        /// When the batch started
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Aggregate progress, recomputed after every task completion
    ///
    /// Emitted per task completion (success or failure), never on a timer.
    ///
    /// Triggers:
    /// - Upload UI: update progress bar, speed and ETA readouts
    TransferProgress {
        /// Batch identifier
        batch_id: Uuid,
        /// Tasks finished so far (successes + failures)
        completed: usize,
        /// Total tasks at submission time
        total: usize,
        /// Label of the most recently finished task
        current_label: Option<String>,
        /// completed / total, in percent
        percentage: f32,
        /// Cumulative payload throughput since submission
        bytes_per_second: f64,
        /// Estimated seconds until the batch finishes (None until measurable)
        eta_seconds: Option<u64>,
        /// When this snapshot was computed
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// All tasks of a batch have finished
    ///
    /// Fires exactly once per batch, including for empty submissions.
    ///
    /// Triggers:
    /// - Upload UI: show final success/failure summary
    TransferBatchCompleted {
        /// Batch identifier
        batch_id: Uuid,
        /// Tasks that succeeded
        succeeded: usize,
        /// Tasks that failed
        failed: usize,
        /// Wall-clock duration of the batch
        duration_seconds: u64,
        /// When the batch completed
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// An upstream crossed its failure threshold and will be skipped
    ///
    /// Triggers:
    /// - Diagnostics UI: flag the degraded upstream
    CircuitOpened {
        /// Upstream name (breaker key)
        upstream: String,
        /// Consecutive failures recorded at the transition
        consecutive_failures: u32,
        /// When the circuit opened
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A previously open upstream is accepting calls again
    ///
    /// Emitted on explicit success or when the reset timeout is observed.
    CircuitClosed {
        /// Upstream name (breaker key)
        upstream: String,
        /// When the circuit closed
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A warmup probe completed against an endpoint
    EndpointWarmed {
        /// Probed endpoint
        endpoint: String,
        /// Probe round-trip latency
        latency_ms: u64,
        /// When the probe completed
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A warmup probe failed; advisory only, never escalated
    ProbeFailed {
        /// Probed endpoint
        endpoint: String,
        /// When the probe failed
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A speculative fetch finished and the payload entered the cache
    PreloadCompleted {
        /// Content URL (cache key)
        url: String,
        /// Payload size
        bytes: usize,
        /// When the fetch completed
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A speculative fetch failed; silent beyond diagnostics
    PreloadFailed {
        /// Content URL
        url: String,
        /// When the fetch failed
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A cache eviction sweep ran
    CacheSwept {
        /// Entries dropped by the sweep
        evicted: usize,
        /// Entries remaining after the sweep
        remaining: usize,
        /// When the sweep ran
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

/// Central event distribution bus for delivery events
///
/// Uses tokio::broadcast internally, providing:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Automatic cleanup when subscribers drop
///
/// # Examples
///
/// ```
/// use euterpe_common::events::{DeliveryEvent, EventBus};
///
/// let bus = EventBus::new(100);
/// let mut rx = bus.subscribe();
///
/// bus.emit_lossy(DeliveryEvent::CacheSwept {
///     evicted: 3,
///     remaining: 20,
///     timestamp: chrono::Utc::now(),
/// });
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<DeliveryEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with the given channel capacity
    ///
    /// Capacity is the number of events buffered before slow subscribers
    /// start lagging. 100-1000 is reasonable; tests can use 10.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<DeliveryEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists,
    /// `Err` if nobody is listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: DeliveryEvent,
    ) -> Result<usize, broadcast::error::SendError<DeliveryEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring whether anyone is listening
    ///
    /// Used for non-critical diagnostic events where a missing subscriber
    /// is acceptable.
    pub fn emit_lossy(&self, event: DeliveryEvent) {
        let _ = self.tx.send(event);
    }

    /// Current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
