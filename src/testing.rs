//! Test support: an in-memory cache host.
//!
//! `MockHost` implements the full [`CacheHost`] contract against a
//! local map, with switches for injecting transport failures. It backs
//! this crate's own tests and is exported so embedding applications
//! can exercise their cache wiring without a live fleet.

use crate::error::{NetworkError, Result};
use crate::network::CacheHost;
use crate::types::{HostEndpoint, ResolvedWrite};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[derive(Debug, Clone)]
struct StoredEntry {
    value: Bytes,
    tag: Option<String>,
}

/// In-memory [`CacheHost`] for tests.
pub struct MockHost {
    endpoint: HostEndpoint,
    connected: AtomicBool,
    fail_remaining: AtomicUsize,
    store: Mutex<HashMap<String, StoredEntry>>,
    clear_calls: AtomicUsize,
    request_log: Mutex<Vec<String>>,
}

impl MockHost {
    /// Create a mock host for the given endpoint, initially connected.
    pub fn new(endpoint: HostEndpoint) -> Self {
        Self {
            endpoint,
            connected: AtomicBool::new(true),
            fail_remaining: AtomicUsize::new(0),
            store: Mutex::new(HashMap::new()),
            clear_calls: AtomicUsize::new(0),
            request_log: Mutex::new(Vec::new()),
        }
    }

    /// Arm a transport failure for the next operation.
    pub fn fail_next(&self) {
        self.fail_times(1);
    }

    /// Arm transport failures for the next `n` operations.
    pub fn fail_times(&self, n: usize) {
        self.fail_remaining.store(n, Ordering::SeqCst);
    }

    /// Number of `clear` calls served.
    pub fn clear_calls(&self) -> usize {
        self.clear_calls.load(Ordering::SeqCst)
    }

    /// Every operation served, as `"op key1,key2"` strings.
    pub fn request_log(&self) -> Vec<String> {
        self.request_log.lock().clone()
    }

    /// Raw value currently stored under a key.
    pub fn stored(&self, key: &str) -> Option<Bytes> {
        self.store.lock().get(key).map(|e| e.value.clone())
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.store.lock().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.store.lock().is_empty()
    }

    fn check_fault(&self) -> Result<()> {
        let mut remaining = self.fail_remaining.load(Ordering::SeqCst);
        while remaining > 0 {
            match self.fail_remaining.compare_exchange(
                remaining,
                remaining - 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Err(NetworkError::ConnectionClosed.into()),
                Err(actual) => remaining = actual,
            }
        }
        Ok(())
    }

    fn log(&self, op: &str, items: &[String]) {
        self.request_log.lock().push(format!("{op} {}", items.join(",")));
    }

    fn matches(pattern: &str, key: &str) -> bool {
        pattern == "*" || key.contains(pattern)
    }
}

#[async_trait]
impl CacheHost for MockHost {
    fn endpoint(&self) -> &HostEndpoint {
        &self.endpoint
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn connect(&self) -> Result<()> {
        self.check_fault()?;
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    async fn get(&self, keys: &[String]) -> Result<Vec<Option<Bytes>>> {
        self.check_fault()?;
        self.log("get", keys);
        let store = self.store.lock();
        Ok(keys
            .iter()
            .map(|k| store.get(k).map(|e| e.value.clone()))
            .collect())
    }

    async fn add_or_update(
        &self,
        entries: &[(String, Bytes)],
        tag: Option<&str>,
        _write: &ResolvedWrite,
    ) -> Result<()> {
        self.check_fault()?;
        let keys: Vec<String> = entries.iter().map(|(k, _)| k.clone()).collect();
        self.log("add_or_update", &keys);
        let mut store = self.store.lock();
        for (key, value) in entries {
            store.insert(
                key.clone(),
                StoredEntry {
                    value: value.clone(),
                    tag: tag.map(str::to_string),
                },
            );
        }
        Ok(())
    }

    async fn remove(&self, keys: &[String]) -> Result<()> {
        self.check_fault()?;
        self.log("remove", keys);
        let mut store = self.store.lock();
        for key in keys {
            store.remove(key);
        }
        Ok(())
    }

    async fn get_tagged(&self, tags: &[String], pattern: &str) -> Result<Vec<Bytes>> {
        self.check_fault()?;
        self.log("get_tagged", tags);
        let store = self.store.lock();
        let mut values: Vec<(String, Bytes)> = store
            .iter()
            .filter(|(key, entry)| {
                entry
                    .tag
                    .as_ref()
                    .is_some_and(|t| tags.contains(t))
                    && Self::matches(pattern, key)
            })
            .map(|(key, entry)| (key.clone(), entry.value.clone()))
            .collect();
        values.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(values.into_iter().map(|(_, v)| v).collect())
    }

    async fn remove_tagged(&self, tags: &[String], pattern: &str) -> Result<()> {
        self.check_fault()?;
        self.log("remove_tagged", tags);
        let mut store = self.store.lock();
        store.retain(|key, entry| {
            !(entry
                .tag
                .as_ref()
                .is_some_and(|t| tags.contains(t))
                && Self::matches(pattern, key))
        });
        Ok(())
    }

    async fn get_cache_keys(&self, pattern: &str) -> Result<Vec<String>> {
        self.check_fault()?;
        self.log("get_cache_keys", &[pattern.to_string()]);
        let store = self.store.lock();
        let mut keys: Vec<String> = store
            .keys()
            .filter(|k| Self::matches(pattern, k))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn get_cache_keys_tagged(&self, tags: &[String], pattern: &str) -> Result<Vec<String>> {
        self.check_fault()?;
        self.log("get_cache_keys_tagged", tags);
        let store = self.store.lock();
        let mut keys: Vec<String> = store
            .iter()
            .filter(|(key, entry)| {
                entry
                    .tag
                    .as_ref()
                    .is_some_and(|t| tags.contains(t))
                    && Self::matches(pattern, key)
            })
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn clear(&self) -> Result<()> {
        self.check_fault()?;
        self.clear_calls.fetch_add(1, Ordering::SeqCst);
        self.store.lock().clear();
        Ok(())
    }
}
