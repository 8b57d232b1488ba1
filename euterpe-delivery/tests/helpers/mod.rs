//! Shared test doubles for delivery integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use euterpe_common::{Error, Result};
use euterpe_delivery::store::{ContentFetcher, ContentStore, ReferenceStore};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

/// In-memory content store recording every call
#[derive(Default)]
pub struct MockContentStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    upload_log: Mutex<Vec<String>>,
    removed: Mutex<Vec<String>>,
    fail_paths: Mutex<HashSet<String>>,
}

impl MockContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make uploads to this exact path fail
    pub fn fail_on(&self, path: &str) {
        self.fail_paths.lock().unwrap().insert(path.to_string());
    }

    /// Upload destinations in call order
    pub fn uploads(&self) -> Vec<String> {
        self.upload_log.lock().unwrap().clone()
    }

    /// Removed paths in call order
    pub fn removed_paths(&self) -> Vec<String> {
        self.removed.lock().unwrap().clone()
    }

    pub fn object(&self, path: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(path).cloned()
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().unwrap().len()
    }
}

#[async_trait]
impl ContentStore for MockContentStore {
    async fn upload(&self, bytes: &[u8], path: &str, _content_type: &str) -> Result<String> {
        if self.fail_paths.lock().unwrap().contains(path) {
            return Err(Error::Store(format!("injected failure for {}", path)));
        }
        self.upload_log.lock().unwrap().push(path.to_string());
        self.objects
            .lock()
            .unwrap()
            .insert(path.to_string(), bytes.to_vec());
        Ok(path.to_string())
    }

    async fn remove(&self, path: &str) -> Result<()> {
        self.removed.lock().unwrap().push(path.to_string());
        self.objects.lock().unwrap().remove(path);
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.objects.lock().unwrap().contains_key(path))
    }

    async fn signed_url(&self, path: &str, _ttl: Duration) -> Result<String> {
        if self.objects.lock().unwrap().contains_key(path) {
            Ok(format!("https://signed.example.com/{}", path))
        } else {
            Err(Error::NotFound(path.to_string()))
        }
    }
}

/// In-memory reference store
#[derive(Default)]
pub struct MockReferenceStore {
    records: Mutex<HashMap<Uuid, String>>,
}

impl MockReferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, local_id: Uuid) -> Option<String> {
        self.records.lock().unwrap().get(&local_id).cloned()
    }

    pub fn record_count(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

#[async_trait]
impl ReferenceStore for MockReferenceStore {
    async fn upsert(&self, local_id: Uuid, external_path: &str) -> Result<()> {
        self.records
            .lock()
            .unwrap()
            .insert(local_id, external_path.to_string());
        Ok(())
    }
}

/// Scripted fetcher counting every fetch per URL
///
/// Serves payloads registered via `serve`; everything else errors. URLs not
/// starting with `https://` are reported unresolvable.
#[derive(Default)]
pub struct MockFetcher {
    payloads: Mutex<HashMap<String, Vec<u8>>>,
    fetch_counts: Mutex<HashMap<String, usize>>,
    delay: Option<Duration>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn serve(&self, url: &str, bytes: Vec<u8>) {
        self.payloads.lock().unwrap().insert(url.to_string(), bytes);
    }

    pub fn fetch_count(&self, url: &str) -> usize {
        self.fetch_counts.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    pub fn total_fetches(&self) -> usize {
        self.fetch_counts.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl ContentFetcher for MockFetcher {
    fn can_fetch(&self, url: &str) -> bool {
        url.starts_with("https://")
    }

    fn upstream(&self, url: &str) -> String {
        url.strip_prefix("https://")
            .and_then(|rest| rest.split('/').next())
            .unwrap_or("unknown")
            .to_string()
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        *self
            .fetch_counts
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_insert(0) += 1;

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.payloads
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| Error::Http(format!("404 for {}", url)))
    }
}
