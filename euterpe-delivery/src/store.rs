//! Collaborator contracts
//!
//! The delivery layer drives a content store (uploads, chunk artifacts,
//! signed retrieval URLs), a reference store (tracking migrated files) and
//! upstream content fetchers. These are external collaborators; the traits
//! here capture only what the layer consumes.

use async_trait::async_trait;
use euterpe_common::{Error, Result};
use std::time::Duration;
use uuid::Uuid;

const USER_AGENT: &str = "Euterpe/0.1.0 (https://github.com/euterpe/euterpe)";

/// Cloud storage backend holding audio payloads
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Upload a payload, returning the stored path
    async fn upload(&self, bytes: &[u8], path: &str, content_type: &str) -> Result<String>;

    /// Remove a stored object
    async fn remove(&self, path: &str) -> Result<()>;

    /// Whether an object exists at the given path
    async fn exists(&self, path: &str) -> Result<bool>;

    /// Time-limited retrieval URL for a stored path
    async fn signed_url(&self, path: &str, ttl: Duration) -> Result<String>;
}

/// Metadata/reference store tracking where migrated files ended up
#[async_trait]
pub trait ReferenceStore: Send + Sync {
    /// Record (or update) the external path for a local item
    async fn upsert(&self, local_id: Uuid, external_path: &str) -> Result<()>;
}

/// Source of raw audio payloads for preloading
///
/// `can_fetch` is the resolvability predicate both preload triggers apply
/// before any network attempt; `upstream` names the circuit breaker key
/// for a URL.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    /// Whether this URL can be resolved to fetchable content at all
    fn can_fetch(&self, url: &str) -> bool;

    /// Upstream name used as the circuit breaker key for this URL
    fn upstream(&self, url: &str) -> String;

    /// Fetch the payload behind a content URL
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// HTTP content fetcher over a shared reqwest client
///
/// Callers normally pass the connection warmer's pooled client so preload
/// fetches reuse warmed connections.
pub struct HttpContentFetcher {
    http_client: reqwest::Client,
}

impl HttpContentFetcher {
    /// Wrap an existing client (preferred: the warmer's pooled client)
    pub fn new(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }

    /// Build with a standalone client
    pub fn standalone() -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;

        Ok(Self { http_client })
    }
}

#[async_trait]
impl ContentFetcher for HttpContentFetcher {
    fn can_fetch(&self, url: &str) -> bool {
        url.starts_with("http://") || url.starts_with("https://")
    }

    fn upstream(&self, url: &str) -> String {
        reqwest::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_string()))
            .unwrap_or_else(|| "unknown".to_string())
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Http(format!("{} returned {}", url, status)));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        Ok(bytes.to_vec())
    }
}
