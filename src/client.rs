//! The cache client facade.
//!
//! Every operation shares the same shape: validate arguments, compute
//! routing and payload, attempt the host calls, and on any transport
//! failure recompute routing and try again. Precondition violations
//! and serializer failures surface immediately; only transport faults
//! are retried. With no operation deadline configured the retry loop
//! runs until it succeeds or the whole fleet is offline.

use crate::config::ClientConfig;
use crate::discovery::{Beacon, DiscoveryListener};
use crate::error::{Error, NetworkError, Result};
use crate::events::{ClientEvent, EventBus};
use crate::invalidation::InvalidationDispatcher;
use crate::metrics::{ClientMetrics, MetricsSnapshot};
use crate::network::{
    CacheHost, ConnectionOptions, HostEvent, HostEventKind, TcpCacheHost,
};
use crate::routing::{RedundancyBucket, RoutingTable};
use crate::serialize::{BincodeSerializer, Serializer};
use crate::types::WriteOptions;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Pattern matching every key, the default for pattern-scoped reads.
const MATCH_ALL: &str = "*";

/// Client for a fleet of cache hosts.
///
/// The client is safe for unbounded concurrent callers; a process
/// normally holds exactly one and shares it.
pub struct CacheClient<S: Serializer = BincodeSerializer> {
    table: Arc<RoutingTable>,
    config: ClientConfig,
    serializer: S,
    events: EventBus,
    metrics: Arc<ClientMetrics>,
    host_events: mpsc::UnboundedSender<HostEvent>,
    stop: CancellationToken,
    shutdown: AtomicBool,
}

impl CacheClient<BincodeSerializer> {
    /// Connect to the configured fleet with the default serializer.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        Self::connect_with(config, BincodeSerializer).await
    }
}

impl<S: Serializer> CacheClient<S> {
    /// Connect to the configured fleet with a custom serializer.
    ///
    /// Hosts that cannot be reached at startup are marked offline and
    /// recovered by their own reconnect loops.
    pub async fn connect_with(config: ClientConfig, serializer: S) -> Result<Self> {
        let (host_events_tx, host_events_rx) = mpsc::unbounded_channel();
        let options = ConnectionOptions::from_config(&config);

        let hosts: Vec<Arc<dyn CacheHost>> = config
            .cache_hosts
            .iter()
            .cloned()
            .map(|endpoint| {
                Arc::new(TcpCacheHost::new(
                    endpoint,
                    options.clone(),
                    host_events_tx.clone(),
                )) as Arc<dyn CacheHost>
            })
            .collect();

        let client = Self::from_parts(config, hosts, serializer, host_events_tx, host_events_rx)?;

        for host in client.table.all_hosts() {
            if let Err(e) = host.connect().await {
                warn!(endpoint = %host.endpoint(), error = %e, "initial connect failed");
                client.table.handle_disconnected(host.endpoint());
            }
        }

        client.start_discovery();
        Ok(client)
    }

    /// Assemble a client around existing host connections.
    ///
    /// This is the seam for custom transports and for tests: the
    /// connections must already report events on the supplied channel.
    pub fn from_parts(
        config: ClientConfig,
        hosts: Vec<Arc<dyn CacheHost>>,
        serializer: S,
        host_events_tx: mpsc::UnboundedSender<HostEvent>,
        host_events_rx: mpsc::UnboundedReceiver<HostEvent>,
    ) -> Result<Self> {
        config.validate().map_err(Error::Config)?;

        let table = Arc::new(RoutingTable::assemble(
            hosts,
            config.host_redundancy_layers,
        ));
        let events = EventBus::new();
        let metrics = Arc::new(ClientMetrics::new());
        let stop = CancellationToken::new();

        let dispatcher = InvalidationDispatcher::new(events.clone(), metrics.clone());
        tokio::spawn(dispatch_host_events(
            host_events_rx,
            table.clone(),
            events.clone(),
            metrics.clone(),
            dispatcher,
            stop.clone(),
        ));

        Ok(Self {
            table,
            config,
            serializer,
            events,
            metrics,
            host_events: host_events_tx,
            stop,
            shutdown: AtomicBool::new(false),
        })
    }

    /// Subscribe to host and expiration events.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Snapshot the client counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Fetch a value. `Ok(None)` for a miss or a value that fails to
    /// deserialize (the failure is logged).
    pub async fn get<T: DeserializeOwned>(&self, cache_key: &str) -> Result<Option<T>> {
        self.ensure_running()?;
        ensure_not_blank(cache_key, "cacheKey")?;

        let key_batch = [cache_key.to_string()];
        let key_batch = &key_batch;
        let raw = self
            .retry("get", || async move {
                let bucket = self.table.bucket_for(cache_key)?;
                let host = pick(&bucket)?;
                let mut values = host.get(key_batch).await?;
                Ok(values.pop().flatten())
            })
            .await?;

        Ok(raw.and_then(|bytes| self.decode(cache_key, &bytes)))
    }

    /// Fetch many values in one pass, batched per bucket. Results are
    /// concatenated in bucket iteration order; misses and undecodable
    /// values come back as `None`.
    pub async fn get_many<T: DeserializeOwned>(
        &self,
        cache_keys: &[String],
    ) -> Result<Vec<Option<T>>> {
        self.ensure_running()?;
        ensure_not_empty(cache_keys, "cacheKeys")?;
        for key in cache_keys {
            ensure_not_blank(key, "cacheKeys")?;
        }

        let raw = self
            .retry("get_many", || async move {
                let groups = self
                    .table
                    .group_by_bucket(cache_keys.iter().map(String::as_str))?;
                let mut collected = Vec::with_capacity(cache_keys.len());
                for group in groups {
                    let host = pick(&group.bucket)?;
                    let batch: Vec<String> = group
                        .positions
                        .iter()
                        .map(|&p| cache_keys[p].clone())
                        .collect();
                    collected.extend(host.get(&batch).await?);
                }
                Ok(collected)
            })
            .await?;

        Ok(raw
            .into_iter()
            .map(|value| value.and_then(|bytes| self.decode("", &bytes)))
            .collect())
    }

    /// Fetch every value carrying a tag.
    pub async fn get_tagged<T: DeserializeOwned>(&self, tag_name: &str) -> Result<Vec<T>> {
        self.get_tagged_matching(tag_name, MATCH_ALL).await
    }

    /// Fetch every value carrying a tag whose key matches a pattern.
    /// Undecodable values are logged and skipped.
    pub async fn get_tagged_matching<T: DeserializeOwned>(
        &self,
        tag_name: &str,
        pattern: &str,
    ) -> Result<Vec<T>> {
        self.ensure_running()?;
        ensure_not_blank(tag_name, "tagName")?;
        ensure_not_blank(pattern, "pattern")?;

        let raw = self
            .retry("get_tagged", || async move {
                let bucket = self.table.bucket_for(tag_name)?;
                let host = pick(&bucket)?;
                let tags = [tag_name.to_string()];
                host.get_tagged(&tags, pattern).await
            })
            .await?;

        Ok(raw
            .iter()
            .filter_map(|bytes| self.decode(tag_name, bytes))
            .collect())
    }

    /// Insert or update one entry. Serialization failures are fatal
    /// and never retried.
    pub async fn add_or_update<T: Serialize + ?Sized>(
        &self,
        cache_key: &str,
        value: &T,
        options: &WriteOptions,
    ) -> Result<()> {
        self.ensure_running()?;
        ensure_not_blank(cache_key, "cacheKey")?;
        if let Some(tag) = &options.tag {
            ensure_not_blank(tag, "tagName")?;
        }

        let bytes = self
            .serializer
            .to_bytes(value)
            .map_err(|e| Error::Serialization(e.to_string()))?;

        let entries = [(cache_key.to_string(), Bytes::from(bytes))];
        let entries = &entries[..];
        let write = options.resolve();
        let write = &write;
        let tag = options.tag.as_deref();
        let routing = tag.unwrap_or(cache_key);

        self.retry("add_or_update", || async move {
            let bucket = self.table.bucket_for(routing)?;
            bucket
                .for_all(|host| async move { host.add_or_update(entries, tag, write).await })
                .await
        })
        .await
    }

    /// Insert or update many entries, batched per bucket and fanned
    /// out to every replica. Items that fail to serialize are logged
    /// and skipped; the rest of the batch still goes out.
    pub async fn add_or_update_many<T: Serialize>(
        &self,
        items: &[(String, T)],
        options: &WriteOptions,
    ) -> Result<()> {
        self.ensure_running()?;
        ensure_not_empty(items, "cacheKeysAndValues")?;
        for (key, _) in items {
            ensure_not_blank(key, "cacheKeysAndValues")?;
        }
        if let Some(tag) = &options.tag {
            ensure_not_blank(tag, "tagName")?;
        }

        let mut entries: Vec<(String, Bytes)> = Vec::with_capacity(items.len());
        for (key, value) in items {
            match self.serializer.to_bytes(value) {
                Ok(bytes) => entries.push((key.clone(), Bytes::from(bytes))),
                Err(e) => warn!(key = %key, error = %e, "skipping item that failed to serialize"),
            }
        }
        if entries.is_empty() {
            return Ok(());
        }

        let entries = &entries;
        let write = options.resolve();
        let write = &write;
        let tag = options.tag.as_deref();

        self.retry("add_or_update_many", || async move {
            let groups = self.table.group_by_bucket(
                entries
                    .iter()
                    .map(|(key, _)| tag.unwrap_or(key.as_str())),
            )?;
            for group in groups {
                let batch: Vec<(String, Bytes)> = group
                    .positions
                    .iter()
                    .map(|&p| entries[p].clone())
                    .collect();
                let batch = &batch;
                group
                    .bucket
                    .for_all(|host| async move { host.add_or_update(batch, tag, write).await })
                    .await?;
            }
            Ok(())
        })
        .await
    }

    /// Remove one key from every replica of its bucket.
    pub async fn remove(&self, cache_key: &str) -> Result<()> {
        self.ensure_running()?;
        ensure_not_blank(cache_key, "cacheKey")?;

        let keys = [cache_key.to_string()];
        let keys = &keys[..];
        self.retry("remove", || async move {
            let bucket = self.table.bucket_for(cache_key)?;
            bucket
                .for_all(|host| async move { host.remove(keys).await })
                .await
        })
        .await
    }

    /// Remove many keys, batched per bucket.
    pub async fn remove_many(&self, cache_keys: &[String]) -> Result<()> {
        self.ensure_running()?;
        ensure_not_empty(cache_keys, "cacheKeys")?;
        for key in cache_keys {
            ensure_not_blank(key, "cacheKeys")?;
        }

        self.retry("remove_many", || async move {
            let groups = self
                .table
                .group_by_bucket(cache_keys.iter().map(String::as_str))?;
            for group in groups {
                let batch: Vec<String> = group
                    .positions
                    .iter()
                    .map(|&p| cache_keys[p].clone())
                    .collect();
                let batch = &batch;
                group
                    .bucket
                    .for_all(|host| async move { host.remove(batch).await })
                    .await?;
            }
            Ok(())
        })
        .await
    }

    /// Remove every key carrying a tag.
    pub async fn remove_tagged(&self, tag_name: &str) -> Result<()> {
        self.remove_tagged_matching(tag_name, MATCH_ALL).await
    }

    /// Remove every key carrying a tag and matching a pattern.
    pub async fn remove_tagged_matching(&self, tag_name: &str, pattern: &str) -> Result<()> {
        self.ensure_running()?;
        ensure_not_blank(tag_name, "tagName")?;
        ensure_not_blank(pattern, "pattern")?;

        let tags = [tag_name.to_string()];
        let tags = &tags[..];
        self.retry("remove_tagged", || async move {
            let bucket = self.table.bucket_for(tag_name)?;
            bucket
                .for_all(|host| async move { host.remove_tagged(tags, pattern).await })
                .await
        })
        .await
    }

    /// Remove every key carrying any of the tags, batched per bucket.
    pub async fn remove_tagged_many(&self, tag_names: &[String], pattern: &str) -> Result<()> {
        self.ensure_running()?;
        ensure_not_empty(tag_names, "tagNames")?;
        for tag in tag_names {
            ensure_not_blank(tag, "tagNames")?;
        }
        ensure_not_blank(pattern, "pattern")?;

        self.retry("remove_tagged_many", || async move {
            let groups = self
                .table
                .group_by_bucket(tag_names.iter().map(String::as_str))?;
            for group in groups {
                let batch: Vec<String> = group
                    .positions
                    .iter()
                    .map(|&p| tag_names[p].clone())
                    .collect();
                let batch = &batch;
                group
                    .bucket
                    .for_all(|host| async move { host.remove_tagged(batch, pattern).await })
                    .await?;
            }
            Ok(())
        })
        .await
    }

    /// List keys matching a pattern across the whole fleet, asking one
    /// member of every serving bucket. Offline buckets are skipped.
    pub async fn cache_keys(&self, pattern: &str) -> Result<Vec<String>> {
        self.ensure_running()?;
        ensure_not_blank(pattern, "pattern")?;

        self.retry("cache_keys", || async move {
            let buckets = self.table.all_buckets();
            if buckets.is_empty() {
                return Err(Error::NoCacheHostsAvailable);
            }
            let mut keys = Vec::new();
            for bucket in buckets {
                let Some(host) = bucket.next() else { continue };
                keys.extend(host.get_cache_keys(pattern).await?);
            }
            Ok(keys)
        })
        .await
    }

    /// List keys carrying a tag and matching a pattern.
    pub async fn cache_keys_tagged(&self, tag_name: &str, pattern: &str) -> Result<Vec<String>> {
        self.ensure_running()?;
        ensure_not_blank(tag_name, "tagName")?;
        ensure_not_blank(pattern, "pattern")?;

        let tags = [tag_name.to_string()];
        let tags = &tags[..];
        self.retry("cache_keys_tagged", || async move {
            let bucket = self.table.bucket_for(tag_name)?;
            let host = pick(&bucket)?;
            host.get_cache_keys_tagged(tags, pattern).await
        })
        .await
    }

    /// List keys carrying any of the tags, batched per bucket.
    pub async fn cache_keys_tagged_many(
        &self,
        tag_names: &[String],
        pattern: &str,
    ) -> Result<Vec<String>> {
        self.ensure_running()?;
        ensure_not_empty(tag_names, "tagNames")?;
        for tag in tag_names {
            ensure_not_blank(tag, "tagNames")?;
        }
        ensure_not_blank(pattern, "pattern")?;

        self.retry("cache_keys_tagged_many", || async move {
            let groups = self
                .table
                .group_by_bucket(tag_names.iter().map(String::as_str))?;
            let mut keys = Vec::new();
            for group in groups {
                let host = pick(&group.bucket)?;
                let batch: Vec<String> = group
                    .positions
                    .iter()
                    .map(|&p| tag_names[p].clone())
                    .collect();
                keys.extend(host.get_cache_keys_tagged(&batch, pattern).await?);
            }
            Ok(keys)
        })
        .await
    }

    /// Drop every entry on every reachable replica.
    pub async fn clear(&self) -> Result<()> {
        self.ensure_running()?;

        self.retry("clear", || async move {
            let buckets = self.table.all_buckets();
            if buckets.is_empty() {
                return Err(Error::NoCacheHostsAvailable);
            }
            for bucket in buckets {
                bucket
                    .for_all(|host| async move { host.clear().await })
                    .await?;
            }
            Ok(())
        })
        .await
    }

    /// Disconnect every host and stop discovery. Repeated calls are
    /// no-ops after the first.
    pub async fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }

        info!("cache client shutting down");
        self.stop.cancel();
        for host in self.table.all_hosts() {
            host.disconnect().await;
        }
    }

    fn start_discovery(&self) {
        if !self.config.auto_detect_cache_hosts {
            return;
        }
        // validate() guarantees the group parses.
        let Some((group, port)) = self.config.multicast_group() else {
            return;
        };

        let (beacons_tx, beacons_rx) = mpsc::unbounded_channel();
        let listener = DiscoveryListener::new(group, port, beacons_tx, self.stop.clone());
        tokio::spawn(async move {
            if let Err(e) = listener.run().await {
                warn!(error = %e, "discovery listener failed");
            }
        });

        tokio::spawn(handle_beacons(
            beacons_rx,
            self.table.clone(),
            ConnectionOptions::from_config(&self.config),
            self.host_events.clone(),
            self.stop.clone(),
        ));
    }

    async fn retry<T, F, Fut>(&self, op: &'static str, attempt: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.metrics.record_operation();
        let deadline = self.config.operation_deadline.map(|d| Instant::now() + d);

        loop {
            match attempt().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transport() => {
                    self.metrics.record_transport_failure();
                    warn!(op, error = %e, "transport failure, rerouting");
                    if let Some(deadline) = deadline {
                        if Instant::now() >= deadline {
                            return Err(Error::Timeout);
                        }
                    }
                    self.metrics.record_retry();
                    sleep(self.config.retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn decode<T: DeserializeOwned>(&self, context: &str, bytes: &[u8]) -> Option<T> {
        match self.serializer.from_bytes(bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(context, error = %e, "failed to deserialize cached value");
                None
            }
        }
    }

    fn ensure_running(&self) -> Result<()> {
        if self.shutdown.load(Ordering::SeqCst) {
            Err(Error::Shutdown)
        } else {
            Ok(())
        }
    }
}

impl<S: Serializer> Drop for CacheClient<S> {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

fn pick(bucket: &RedundancyBucket) -> Result<Arc<dyn CacheHost>> {
    bucket.next().ok_or_else(|| NetworkError::NotConnected.into())
}

fn ensure_not_blank(value: &str, what: &'static str) -> Result<()> {
    if value.trim().is_empty() {
        Err(Error::InvalidArgument(what))
    } else {
        Ok(())
    }
}

fn ensure_not_empty<T>(items: &[T], what: &'static str) -> Result<()> {
    if items.is_empty() {
        Err(Error::InvalidArgument(what))
    } else {
        Ok(())
    }
}

/// Applies connection events to the routing table and republishes them
/// to subscribers. Runs on its own task so transport threads never
/// touch facade state directly.
async fn dispatch_host_events(
    mut rx: mpsc::UnboundedReceiver<HostEvent>,
    table: Arc<RoutingTable>,
    events: EventBus,
    metrics: Arc<ClientMetrics>,
    invalidation: InvalidationDispatcher,
    stop: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = stop.cancelled() => break,
            event = rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        match event.kind {
            HostEventKind::Disconnected => {
                if table.handle_disconnected(&event.endpoint) {
                    metrics.record_host_disconnected();
                    events.publish(ClientEvent::HostDisconnected {
                        endpoint: event.endpoint,
                    });
                }
            }
            HostEventKind::Reconnected => {
                if table.handle_reconnected(&event.endpoint) {
                    metrics.record_host_reconnected();
                    events.publish(ClientEvent::HostReconnected {
                        endpoint: event.endpoint,
                    });
                }
            }
            HostEventKind::MessageReceived(payload) => invalidation.handle(&payload),
        }
    }
}

/// Applies discovery beacons to the routing table.
async fn handle_beacons(
    mut rx: mpsc::UnboundedReceiver<Beacon>,
    table: Arc<RoutingTable>,
    options: ConnectionOptions,
    host_events: mpsc::UnboundedSender<HostEvent>,
    stop: CancellationToken,
) {
    loop {
        let beacon = tokio::select! {
            _ = stop.cancelled() => break,
            beacon = rx.recv() => match beacon {
                Some(beacon) => beacon,
                None => break,
            },
        };

        match beacon {
            Beacon::Hello(endpoint) => {
                if table.contains(&endpoint) {
                    continue;
                }
                let host: Arc<dyn CacheHost> = Arc::new(TcpCacheHost::new(
                    endpoint.clone(),
                    options.clone(),
                    host_events.clone(),
                ));
                table.insert_discovered(host.clone());
                if let Err(e) = host.connect().await {
                    warn!(%endpoint, error = %e, "connect to discovered host failed");
                    table.handle_disconnected(&endpoint);
                }
            }
            Beacon::Bye(endpoint) => {
                if let Some(host) = table.remove_host(&endpoint) {
                    host.disconnect().await;
                }
            }
        }
    }
}
