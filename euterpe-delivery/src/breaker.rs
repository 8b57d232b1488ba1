//! Circuit breaker for upstream content and metadata APIs
//!
//! Tracks consecutive failures per upstream name and lets callers skip a
//! degraded dependency instead of waiting on it. Two-state design: a circuit
//! is either closed (calls pass) or open (calls should be skipped). An open
//! circuit is reset lazily by the next `is_open` inspection once the reset
//! timeout has elapsed; there is no background timer and no half-open probe
//! state, so the first call after the timeout passes through unconditionally
//! and its outcome is recorded normally.
//!
//! Callers wrap their own upstream call: check `is_open` first, then invoke
//! `record_success`/`record_failure` with the outcome. Transitions never
//! raise errors; they are logged and mirrored to the EventBus for
//! diagnostics only.

use chrono::Utc;
use euterpe_common::events::{DeliveryEvent, EventBus};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Failure memory for one upstream name
///
/// Created lazily on the first recorded outcome; at most one per name;
/// never persisted across process restarts.
#[derive(Debug, Clone, Default)]
pub struct CircuitState {
    /// Failures since the last success or reset
    pub consecutive_failures: u32,
    /// When the most recent failure was recorded
    pub last_failure: Option<Instant>,
    /// Whether calls to this upstream should currently be skipped
    pub open: bool,
}

/// Per-upstream circuit breaker
///
/// One instance per process, injected into every component that calls
/// upstreams. The open/closed decision is a pure function of
/// {consecutive_failures, now - last_failure}.
pub struct CircuitBreaker {
    states: Mutex<HashMap<String, CircuitState>>,
    failure_threshold: u32,
    reset_timeout: Duration,
    event_bus: Option<EventBus>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
            failure_threshold,
            reset_timeout,
            event_bus: None,
        }
    }

    /// Attach an event bus for diagnostic transition events
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Whether calls to this upstream should be skipped right now
    ///
    /// Observing an elapsed reset timeout closes the circuit as a side
    /// effect; this is the only path that auto-closes an open circuit.
    pub fn is_open(&self, name: &str) -> bool {
        let mut just_closed = false;
        let open = {
            let mut states = self.states.lock().unwrap();
            match states.get_mut(name) {
                None => false,
                Some(state) if !state.open => false,
                Some(state) => {
                    let elapsed = state
                        .last_failure
                        .map(|t| t.elapsed())
                        .unwrap_or(Duration::MAX);
                    if elapsed >= self.reset_timeout {
                        *state = CircuitState::default();
                        just_closed = true;
                        false
                    } else {
                        true
                    }
                }
            }
        };

        if just_closed {
            tracing::info!(upstream = %name, "Circuit closed after reset timeout");
            if let Some(bus) = &self.event_bus {
                bus.emit_lossy(DeliveryEvent::CircuitClosed {
                    upstream: name.to_string(),
                    timestamp: Utc::now(),
                });
            }
        }

        open
    }

    /// Record a failed upstream call
    pub fn record_failure(&self, name: &str) {
        let opened = {
            let mut states = self.states.lock().unwrap();
            let state = states.entry(name.to_string()).or_default();
            state.consecutive_failures += 1;
            state.last_failure = Some(Instant::now());
            if !state.open && state.consecutive_failures >= self.failure_threshold {
                state.open = true;
                Some(state.consecutive_failures)
            } else {
                None
            }
        };

        if let Some(failures) = opened {
            tracing::warn!(
                upstream = %name,
                consecutive_failures = failures,
                "Circuit opened, skipping upstream until reset timeout"
            );
            if let Some(bus) = &self.event_bus {
                bus.emit_lossy(DeliveryEvent::CircuitOpened {
                    upstream: name.to_string(),
                    consecutive_failures: failures,
                    timestamp: Utc::now(),
                });
            }
        }
    }

    /// Record a successful upstream call; unconditionally closes the circuit
    pub fn record_success(&self, name: &str) {
        let was_open = {
            let mut states = self.states.lock().unwrap();
            let state = states.entry(name.to_string()).or_default();
            let was_open = state.open;
            *state = CircuitState::default();
            was_open
        };

        if was_open {
            tracing::info!(upstream = %name, "Circuit closed after successful call");
            if let Some(bus) = &self.event_bus {
                bus.emit_lossy(DeliveryEvent::CircuitClosed {
                    upstream: name.to_string(),
                    timestamp: Utc::now(),
                });
            }
        }
    }

    /// Current state for an upstream, for diagnostics
    pub fn snapshot(&self, name: &str) -> Option<CircuitState> {
        self.states.lock().unwrap().get(name).cloned()
    }
}
