//! Bounded-concurrency transfer scheduler
//!
//! Drives N-at-a-time uploads from a FIFO queue. Up to the configured limit
//! of workers pull tasks in submission order; completion order is whatever
//! finishes first. Aggregate progress (count, speed, ETA) is recomputed and
//! emitted after every task completion, and batch completion is signaled
//! exactly once, when the queue is empty and the last worker has exited.
//!
//! Per-task failures never abort the batch: a failed task becomes a
//! `TransferResult` carrying the error detail and the remaining tasks keep
//! going. There is no automatic retry and no mid-batch cancellation; once
//! submitted, a batch runs to completion.

use super::{TransferItem, TransferProgress, TransferResult, TransferTask};
use chrono::Utc;
use euterpe_common::events::{DeliveryEvent, EventBus};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// Handle to one submitted batch
///
/// `progress` yields one snapshot per task completion and closes when the
/// batch is done; `completion` resolves once with all results in completion
/// order.
pub struct BatchHandle {
    pub batch_id: Uuid,
    pub progress: mpsc::UnboundedReceiver<TransferProgress>,
    pub completion: oneshot::Receiver<Vec<TransferResult>>,
}

/// Bounded-concurrency upload scheduler
pub struct TransferScheduler {
    concurrency: usize,
    event_bus: Option<EventBus>,
}

struct BatchState {
    queue: VecDeque<TransferTask>,
    active: usize,
    results: Vec<TransferResult>,
    bytes_done: u64,
    completion: Option<oneshot::Sender<Vec<TransferResult>>>,
}

struct BatchShared<F> {
    batch_id: Uuid,
    total: usize,
    total_bytes: u64,
    started: Instant,
    transfer: F,
    state: Mutex<BatchState>,
    progress_tx: mpsc::UnboundedSender<TransferProgress>,
    event_bus: Option<EventBus>,
}

impl TransferScheduler {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
            event_bus: None,
        }
    }

    /// Attach an event bus; progress and completion are mirrored onto it
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Submit a batch of items driven by the given transfer function
    ///
    /// Immediately starts `min(limit, items.len())` workers. The transfer
    /// function performs one upload and returns the stored path; its error
    /// becomes that task's error detail. An empty submission completes
    /// immediately with zero results.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit<F, Fut>(&self, items: Vec<TransferItem>, transfer: F) -> BatchHandle
    where
        F: Fn(TransferTask) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = euterpe_common::Result<String>> + Send + 'static,
    {
        let batch_id = Uuid::new_v4();
        let total = items.len();
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        let (completion_tx, completion_rx) = oneshot::channel();

        if let Some(bus) = &self.event_bus {
            bus.emit_lossy(DeliveryEvent::TransferBatchStarted {
                batch_id,
                total,
                timestamp: Utc::now(),
            });
        }

        if items.is_empty() {
            tracing::debug!(batch_id = %batch_id, "Empty batch, completing immediately");
            if let Some(bus) = &self.event_bus {
                bus.emit_lossy(DeliveryEvent::TransferBatchCompleted {
                    batch_id,
                    succeeded: 0,
                    failed: 0,
                    duration_seconds: 0,
                    timestamp: Utc::now(),
                });
            }
            let _ = completion_tx.send(Vec::new());
            return BatchHandle {
                batch_id,
                progress: progress_rx,
                completion: completion_rx,
            };
        }

        let total_bytes: u64 = items.iter().map(|i| i.bytes.len() as u64).sum();
        let queue: VecDeque<TransferTask> = items
            .into_iter()
            .enumerate()
            .map(|(sequence, item)| TransferTask {
                id: Uuid::new_v4(),
                sequence,
                item,
            })
            .collect();

        let workers = self.concurrency.min(total);
        let shared = Arc::new(BatchShared {
            batch_id,
            total,
            total_bytes,
            started: Instant::now(),
            transfer,
            state: Mutex::new(BatchState {
                queue,
                active: workers,
                results: Vec::with_capacity(total),
                bytes_done: 0,
                completion: Some(completion_tx),
            }),
            progress_tx,
            event_bus: self.event_bus.clone(),
        });

        tracing::info!(
            batch_id = %batch_id,
            total,
            workers,
            total_bytes,
            "Transfer batch submitted"
        );

        for _ in 0..workers {
            let shared = Arc::clone(&shared);
            tokio::spawn(worker_loop(shared));
        }

        BatchHandle {
            batch_id,
            progress: progress_rx,
            completion: completion_rx,
        }
    }
}

/// One worker: pull the next queued task until the queue drains
///
/// The completion check runs on every worker exit, not only the first, so
/// the batch signal can neither fire early (queue empty but peers still
/// active) nor be missed.
async fn worker_loop<F, Fut>(shared: Arc<BatchShared<F>>)
where
    F: Fn(TransferTask) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = euterpe_common::Result<String>> + Send + 'static,
{
    loop {
        let task = shared.state.lock().unwrap().queue.pop_front();
        let Some(task) = task else { break };

        let task_id = task.id;
        let label = task.item.label.clone();
        let task_bytes = task.item.bytes.len() as u64;

        tracing::debug!(
            batch_id = %shared.batch_id,
            task_id = %task_id,
            label = %label,
            sequence = task.sequence,
            "Starting transfer task"
        );

        let result = match (shared.transfer)(task).await {
            Ok(stored_path) => TransferResult {
                task_id,
                label: label.clone(),
                success: true,
                stored_path: Some(stored_path),
                error: None,
            },
            Err(e) => {
                tracing::warn!(
                    batch_id = %shared.batch_id,
                    task_id = %task_id,
                    label = %label,
                    error = %e,
                    "Transfer task failed, batch continues"
                );
                TransferResult {
                    task_id,
                    label: label.clone(),
                    success: false,
                    stored_path: None,
                    error: Some(e.to_string()),
                }
            }
        };

        let progress = {
            let mut state = shared.state.lock().unwrap();
            state.results.push(result);
            state.bytes_done += task_bytes;

            let completed = state.results.len();
            let elapsed = shared.started.elapsed().as_secs_f64();
            let bytes_per_second = if elapsed > 0.0 {
                state.bytes_done as f64 / elapsed
            } else {
                0.0
            };
            let remaining = shared.total_bytes.saturating_sub(state.bytes_done);
            let eta_seconds = if bytes_per_second > 0.0 {
                Some((remaining as f64 / bytes_per_second).ceil() as u64)
            } else {
                None
            };

            TransferProgress {
                completed,
                total: shared.total,
                current_label: Some(label),
                percentage: completed as f32 * 100.0 / shared.total as f32,
                bytes_per_second,
                eta_seconds,
            }
        };

        let _ = shared.progress_tx.send(progress.clone());
        if let Some(bus) = &shared.event_bus {
            bus.emit_lossy(DeliveryEvent::TransferProgress {
                batch_id: shared.batch_id,
                completed: progress.completed,
                total: progress.total,
                current_label: progress.current_label.clone(),
                percentage: progress.percentage,
                bytes_per_second: progress.bytes_per_second,
                eta_seconds: progress.eta_seconds,
                timestamp: Utc::now(),
            });
        }
    }

    // Worker exit: the last one out signals completion.
    let finished = {
        let mut state = shared.state.lock().unwrap();
        state.active -= 1;
        if state.active == 0 && state.queue.is_empty() {
            state
                .completion
                .take()
                .map(|tx| (tx, std::mem::take(&mut state.results)))
        } else {
            None
        }
    };

    if let Some((completion_tx, results)) = finished {
        let succeeded = results.iter().filter(|r| r.success).count();
        let failed = results.len() - succeeded;
        let duration_seconds = shared.started.elapsed().as_secs();

        tracing::info!(
            batch_id = %shared.batch_id,
            succeeded,
            failed,
            duration_seconds,
            "Transfer batch completed"
        );

        if let Some(bus) = &shared.event_bus {
            bus.emit_lossy(DeliveryEvent::TransferBatchCompleted {
                batch_id: shared.batch_id,
                succeeded,
                failed,
                duration_seconds,
                timestamp: Utc::now(),
            });
        }

        let _ = completion_tx.send(results);
    }
}
