//! Connection warmer
//!
//! Keeps outbound connections to known hosts warm by issuing cheap
//! header-only probes on a fixed cadence plus once at startup, so the first
//! real request to an endpoint skips connection setup. Probe results are
//! advisory: failures are logged and recorded, never escalated and never
//! retried before the next cycle.

use chrono::Utc;
use euterpe_common::config::DeliveryParams;
use euterpe_common::events::{DeliveryEvent, EventBus};
use euterpe_common::{Error, Result};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const USER_AGENT: &str = "Euterpe/0.1.0 (https://github.com/euterpe/euterpe)";

/// Advisory record of the last successful probe for an endpoint
///
/// Absence never blocks any operation.
#[derive(Debug, Clone)]
pub struct ConnectionHealth {
    pub endpoint: String,
    pub last_warmed: Instant,
}

/// Periodic prober for a fixed endpoint set
///
/// One instance per process, started once and stopped on teardown. The
/// pooled client it exposes is the "reuse hints" contract: any request sent
/// through it benefits from the warmed connection pool.
pub struct ConnectionWarmer {
    http_client: reqwest::Client,
    endpoints: Vec<String>,
    warm_interval: Duration,
    probe_timeout: Duration,
    health: Arc<Mutex<HashMap<String, Instant>>>,
    event_bus: Option<EventBus>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionWarmer {
    pub fn new(endpoints: Vec<String>, params: &DeliveryParams) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(4)
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;

        Ok(Self {
            http_client,
            endpoints,
            warm_interval: params.warm_interval(),
            probe_timeout: params.probe_timeout(),
            health: Arc::new(Mutex::new(HashMap::new())),
            event_bus: None,
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        })
    }

    /// Attach an event bus for probe diagnostics
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Start the periodic warmup task
    ///
    /// The first cycle runs immediately; subsequent cycles follow the
    /// configured cadence. Calling `start` on an already started warmer
    /// replaces nothing and is a no-op.
    pub fn start(&self) {
        let mut task = self.task.lock().unwrap();
        if task.is_some() {
            return;
        }

        let client = self.http_client.clone();
        let endpoints = self.endpoints.clone();
        let probe_timeout = self.probe_timeout;
        let warm_interval = self.warm_interval;
        let health = Arc::clone(&self.health);
        let event_bus = self.event_bus.clone();
        let cancel = self.cancel.clone();

        *task = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(warm_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        Self::warm_cycle(&client, &endpoints, probe_timeout, &health, &event_bus)
                            .await;
                    }
                }
            }

            tracing::debug!("Connection warmer stopped");
        }));

        tracing::info!(endpoints = self.endpoints.len(), "Connection warmer started");
    }

    /// Stop the periodic warmup task
    pub fn stop(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.task.lock().unwrap().take() {
            handle.abort();
        }
    }

    /// One warmup cycle: probe every endpoint concurrently
    ///
    /// Each probe settles independently within its own timeout; the cycle
    /// never waits beyond that and never gates on probe success.
    async fn warm_cycle(
        client: &reqwest::Client,
        endpoints: &[String],
        probe_timeout: Duration,
        health: &Arc<Mutex<HashMap<String, Instant>>>,
        event_bus: &Option<EventBus>,
    ) {
        let probes = endpoints.iter().map(|endpoint| {
            let client = client.clone();
            let endpoint = endpoint.clone();
            async move {
                let started = Instant::now();
                let outcome = client
                    .head(&endpoint)
                    .timeout(probe_timeout)
                    .send()
                    .await;
                (endpoint, started.elapsed(), outcome)
            }
        });

        for (endpoint, latency, outcome) in join_all(probes).await {
            match outcome {
                Ok(response) => {
                    tracing::debug!(
                        endpoint = %endpoint,
                        status = %response.status(),
                        latency_ms = latency.as_millis() as u64,
                        "Warmup probe completed"
                    );
                    health.lock().unwrap().insert(endpoint.clone(), Instant::now());
                    if let Some(bus) = event_bus {
                        bus.emit_lossy(DeliveryEvent::EndpointWarmed {
                            endpoint,
                            latency_ms: latency.as_millis() as u64,
                            timestamp: Utc::now(),
                        });
                    }
                }
                Err(e) => {
                    // Diagnostic only; no retry until the next cycle.
                    tracing::debug!(endpoint = %endpoint, error = %e, "Warmup probe failed");
                    if let Some(bus) = event_bus {
                        bus.emit_lossy(DeliveryEvent::ProbeFailed {
                            endpoint,
                            timestamp: Utc::now(),
                        });
                    }
                }
            }
        }
    }

    /// Pooled client biased toward connection reuse
    ///
    /// Performance only; requests sent through any other client remain
    /// correct.
    pub fn client(&self) -> reqwest::Client {
        self.http_client.clone()
    }

    /// Build a GET request on the warmed pool with reuse hints applied
    pub fn get_with_reuse(&self, url: &str) -> reqwest::RequestBuilder {
        self.http_client
            .get(url)
            .header(reqwest::header::CONNECTION, "keep-alive")
    }

    /// When the endpoint last answered a probe, if ever
    pub fn last_warmed(&self, endpoint: &str) -> Option<Instant> {
        self.health.lock().unwrap().get(endpoint).copied()
    }

    /// Advisory health records for all endpoints probed so far
    pub fn health(&self) -> Vec<ConnectionHealth> {
        self.health
            .lock()
            .unwrap()
            .iter()
            .map(|(endpoint, last_warmed)| ConnectionHealth {
                endpoint: endpoint.clone(),
                last_warmed: *last_warmed,
            })
            .collect()
    }
}

impl Drop for ConnectionWarmer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// Minimal HTTP listener answering every request with 200 and no body.
    async fn spawn_probe_target() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let _ = socket.read(&mut buf).await;
                    let _ = socket
                        .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n")
                        .await;
                });
            }
        });
        format!("http://{}", addr)
    }

    fn test_params(warm_interval_ms: u64) -> DeliveryParams {
        DeliveryParams {
            warm_interval_ms,
            probe_timeout_ms: 500,
            ..DeliveryParams::default()
        }
    }

    #[tokio::test]
    async fn test_startup_cycle_records_health() {
        let endpoint = spawn_probe_target().await;
        let warmer = ConnectionWarmer::new(vec![endpoint.clone()], &test_params(60_000)).unwrap();

        assert!(warmer.last_warmed(&endpoint).is_none());
        warmer.start();

        // First cycle fires immediately; give it a moment to settle.
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(warmer.last_warmed(&endpoint).is_some());
        assert_eq!(warmer.health().len(), 1);
        warmer.stop();
    }

    #[tokio::test]
    async fn test_probe_failure_is_advisory_only() {
        // Nothing listens on this port; the probe fails but nothing surfaces.
        let bus = EventBus::new(10);
        let mut rx = bus.subscribe();
        let warmer = ConnectionWarmer::new(
            vec!["http://127.0.0.1:9".to_string()],
            &test_params(60_000),
        )
        .unwrap()
        .with_event_bus(bus);

        warmer.start();
        tokio::time::sleep(Duration::from_millis(700)).await;

        assert!(warmer.last_warmed("http://127.0.0.1:9").is_none());
        assert!(matches!(
            rx.try_recv().unwrap(),
            DeliveryEvent::ProbeFailed { .. }
        ));
        warmer.stop();
    }

    #[tokio::test]
    async fn test_stop_cancels_periodic_cycle() {
        let endpoint = spawn_probe_target().await;
        let warmer = ConnectionWarmer::new(vec![endpoint.clone()], &test_params(100)).unwrap();

        warmer.start();
        tokio::time::sleep(Duration::from_millis(250)).await;
        warmer.stop();

        let after_stop = warmer.last_warmed(&endpoint);
        tokio::time::sleep(Duration::from_millis(250)).await;
        // No further cycles ran after stop.
        assert_eq!(warmer.last_warmed(&endpoint), after_stop);
    }
}
