//! Bounded in-memory content cache
//!
//! Keyed by content URL. Inserts are idempotent overwrites (re-inserting a
//! key refreshes its insertion order); eviction drops the oldest-inserted
//! entries beyond capacity, FIFO by insertion rather than LRU. Eviction
//! runs on a periodic sweep rather than synchronously on insert, so the
//! entry count may transiently exceed capacity between sweeps.

use chrono::Utc;
use euterpe_common::events::{DeliveryEvent, EventBus};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// One cached payload
#[derive(Debug)]
pub struct CacheEntry {
    pub url: String,
    pub bytes: Vec<u8>,
}

impl CacheEntry {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Cache occupancy snapshot for diagnostics
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CacheStats {
    pub entry_count: usize,
    pub total_bytes: usize,
}

struct CacheInner {
    entries: HashMap<String, Arc<CacheEntry>>,
    /// Insertion order, oldest first
    order: VecDeque<String>,
}

/// Bounded audio payload cache shared by the preloader and playback start
pub struct ContentCache {
    inner: Mutex<CacheInner>,
    capacity: usize,
    event_bus: Option<EventBus>,
}

impl ContentCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
            capacity: capacity.max(1),
            event_bus: None,
        }
    }

    /// Attach an event bus for sweep diagnostics
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Insert a payload under its URL
    ///
    /// Overwrites any existing entry for the key and moves it to the back
    /// of the eviction order.
    pub fn insert(&self, url: &str, bytes: Vec<u8>) {
        let mut inner = self.inner.lock().unwrap();
        if inner.entries.contains_key(url) {
            inner.order.retain(|u| u != url);
        }
        inner.order.push_back(url.to_string());
        inner.entries.insert(
            url.to_string(),
            Arc::new(CacheEntry {
                url: url.to_string(),
                bytes,
            }),
        );
    }

    pub fn get(&self, url: &str) -> Option<Arc<CacheEntry>> {
        self.inner.lock().unwrap().entries.get(url).cloned()
    }

    pub fn contains(&self, url: &str) -> bool {
        self.inner.lock().unwrap().entries.contains_key(url)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().entries.is_empty()
    }

    /// Drop everything
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.entries.clear();
        inner.order.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().unwrap();
        CacheStats {
            entry_count: inner.entries.len(),
            total_bytes: inner.entries.values().map(|e| e.len()).sum(),
        }
    }

    /// Evict oldest-inserted entries beyond capacity; returns how many went
    pub fn sweep(&self) -> usize {
        let (evicted, remaining) = {
            let mut inner = self.inner.lock().unwrap();
            let mut evicted = 0;
            while inner.entries.len() > self.capacity {
                let Some(oldest) = inner.order.pop_front() else {
                    break;
                };
                if inner.entries.remove(&oldest).is_some() {
                    evicted += 1;
                }
            }
            (evicted, inner.entries.len())
        };

        if evicted > 0 {
            tracing::debug!(evicted, remaining, "Cache sweep evicted oldest entries");
            if let Some(bus) = &self.event_bus {
                bus.emit_lossy(DeliveryEvent::CacheSwept {
                    evicted,
                    remaining,
                    timestamp: Utc::now(),
                });
            }
        }

        evicted
    }
}
