//! Configuration loading and delivery tuning parameters
//!
//! Two-tier configuration:
//! 1. **TOML bootstrap**: logging, warm endpoint list, parameter overrides
//!    (static, read once at startup)
//! 2. **DeliveryParams**: every tunable of the delivery layer with built-in
//!    defaults, injected into components by the composition root
//!
//! Settings sources priority:
//! 1. Command-line argument (config file path)
//! 2. Environment variable (EUTERPE_CONFIG)
//! 3. OS-dependent default config location
//! 4. Built-in defaults (code constants)

use crate::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Bootstrap configuration loaded from a TOML file
///
/// These settings cannot change during runtime; the application must restart
/// to pick up changes. Minimal by design.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    /// Endpoints the connection warmer keeps warm
    #[serde(default)]
    pub warm_endpoints: Vec<String>,

    /// Logging configuration (optional)
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Delivery tuning overrides (optional; defaults apply per field)
    #[serde(default)]
    pub delivery: DeliveryParams,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Tunable parameters of the delivery layer
///
/// All values have built-in defaults; a TOML `[delivery]` table may override
/// any subset. Components receive this struct (or individual values) by
/// injection; there is no global parameter singleton.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeliveryParams {
    /// Max concurrent transfers per batch
    ///
    /// Valid range: [1, 16]. Default: 3.
    pub transfer_concurrency: usize,

    /// Payloads above this size go through the chunked strategy
    ///
    /// Default: 1 MiB.
    pub chunk_size_bytes: usize,

    /// Consecutive failures before an upstream circuit opens
    ///
    /// Default: 3.
    pub breaker_failure_threshold: u32,

    /// How long an open circuit stays open before the next inspection
    /// closes it again
    ///
    /// Default: 30000 ms.
    pub breaker_reset_timeout_ms: u64,

    /// Cadence of connection warmup cycles
    ///
    /// Default: 30000 ms.
    pub warm_interval_ms: u64,

    /// Per-probe timeout for warmup probes
    ///
    /// Default: 1000 ms.
    pub probe_timeout_ms: u64,

    /// Delay between a track starting and the immediate-horizon preload
    ///
    /// Default: 100 ms.
    pub preload_immediate_delay_ms: u64,

    /// Settle delay after a queue edit before the queue-change preload
    ///
    /// Default: 2000 ms.
    pub preload_settle_delay_ms: u64,

    /// How many upcoming items the immediate-horizon trigger fetches
    ///
    /// Valid range: [1, 2]. Default: 2.
    pub preload_horizon: usize,

    /// How many queue-front items the queue-change trigger fetches
    ///
    /// Valid range: [3, 5]. Default: 4.
    pub preload_queue_depth: usize,

    /// Max concurrent preload fetches per batch
    ///
    /// Kept below the transfer concurrency so preloading never starves the
    /// foreground transfer. Default: 3.
    pub preload_concurrency: usize,

    /// Content cache entry cap; oldest-inserted entries beyond it are
    /// dropped by the sweep
    ///
    /// Default: 20.
    pub cache_capacity: usize,

    /// Cadence of cache eviction sweeps
    ///
    /// Default: 300000 ms (5 minutes).
    pub cache_sweep_interval_ms: u64,
}

impl Default for DeliveryParams {
    fn default() -> Self {
        Self {
            transfer_concurrency: 3,
            chunk_size_bytes: 1024 * 1024,
            breaker_failure_threshold: 3,
            breaker_reset_timeout_ms: 30_000,
            warm_interval_ms: 30_000,
            probe_timeout_ms: 1_000,
            preload_immediate_delay_ms: 100,
            preload_settle_delay_ms: 2_000,
            preload_horizon: 2,
            preload_queue_depth: 4,
            preload_concurrency: 3,
            cache_capacity: 20,
            cache_sweep_interval_ms: 300_000,
        }
    }
}

impl DeliveryParams {
    /// Breaker reset timeout as Duration
    pub fn breaker_reset_timeout(&self) -> Duration {
        Duration::from_millis(self.breaker_reset_timeout_ms)
    }

    /// Warmup cycle cadence as Duration
    pub fn warm_interval(&self) -> Duration {
        Duration::from_millis(self.warm_interval_ms)
    }

    /// Warmup probe timeout as Duration
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Immediate-horizon preload delay as Duration
    pub fn preload_immediate_delay(&self) -> Duration {
        Duration::from_millis(self.preload_immediate_delay_ms)
    }

    /// Queue-change settle delay as Duration
    pub fn preload_settle_delay(&self) -> Duration {
        Duration::from_millis(self.preload_settle_delay_ms)
    }

    /// Cache sweep cadence as Duration
    pub fn cache_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.cache_sweep_interval_ms)
    }
}

/// Load bootstrap configuration from a TOML file
pub fn load_toml_config(path: &PathBuf) -> Result<TomlConfig> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Failed to read config file {:?}: {}", path, e)))?;

    let config: TomlConfig = toml::from_str(&text)
        .map_err(|e| Error::Config(format!("Failed to parse TOML {:?}: {}", path, e)))?;

    tracing::info!(
        path = ?path,
        warm_endpoints = config.warm_endpoints.len(),
        "Loaded delivery configuration"
    );
    Ok(config)
}

/// Resolve the config file path following the priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. OS-dependent default location
///
/// Returns None when no candidate exists on disk, in which case built-in
/// defaults apply.
pub fn resolve_config_path(cli_arg: Option<&str>, env_var_name: &str) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(PathBuf::from(path));
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        return Some(PathBuf::from(path));
    }

    // Priority 3: OS-dependent default
    let default = dirs::config_dir().map(|d| d.join("euterpe").join("config.toml"))?;
    if default.exists() {
        Some(default)
    } else {
        None
    }
}
