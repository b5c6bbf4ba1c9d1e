//! Host connection contract and the shipped TCP transport.

pub mod connection;
pub mod wire;

#[cfg(test)]
mod connection_tests;

pub use connection::TcpCacheHost;

use crate::config::ClientConfig;
use crate::error::Result;
use crate::types::{HostEndpoint, ResolvedWrite};
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

/// Connection-level event emitted by a host connection.
///
/// Events are delivered over a channel rather than callbacks so the
/// connection never re-enters routing-table locks from its own tasks.
#[derive(Debug, Clone)]
pub struct HostEvent {
    /// Endpoint of the connection that raised the event.
    pub endpoint: HostEndpoint,

    /// What happened.
    pub kind: HostEventKind,
}

/// The kinds of connection events.
#[derive(Debug, Clone)]
pub enum HostEventKind {
    /// The transport lost its connection.
    Disconnected,

    /// The transport re-established its connection.
    Reconnected,

    /// The host pushed an unsolicited message (e.g. an expiration
    /// notification frame).
    MessageReceived(Bytes),
}

impl HostEvent {
    /// A disconnect transition for the endpoint.
    pub fn disconnected(endpoint: HostEndpoint) -> Self {
        Self {
            endpoint,
            kind: HostEventKind::Disconnected,
        }
    }

    /// A reconnect transition for the endpoint.
    pub fn reconnected(endpoint: HostEndpoint) -> Self {
        Self {
            endpoint,
            kind: HostEventKind::Reconnected,
        }
    }

    /// An unsolicited message pushed by the endpoint.
    pub fn message(endpoint: HostEndpoint, payload: Bytes) -> Self {
        Self {
            endpoint,
            kind: HostEventKind::MessageReceived(payload),
        }
    }
}

/// One connection to one cache host.
///
/// Reconnection after a drop is the connection's own responsibility:
/// it retries on a configured interval until [`disconnect`] is called.
/// The routing layer only observes the resulting events.
///
/// [`disconnect`]: CacheHost::disconnect
#[async_trait]
pub trait CacheHost: Send + Sync {
    /// The endpoint this connection targets.
    fn endpoint(&self) -> &HostEndpoint;

    /// Whether the transport currently holds a live connection.
    fn is_connected(&self) -> bool;

    /// Establish the connection. On failure the connection keeps
    /// retrying in the background and returns the first error.
    async fn connect(&self) -> Result<()>;

    /// Tear down the connection permanently and stop reconnecting.
    async fn disconnect(&self);

    /// Fetch raw values for the given keys, position-aligned; a miss
    /// is `None`.
    async fn get(&self, keys: &[String]) -> Result<Vec<Option<Bytes>>>;

    /// Insert or update the given entries.
    async fn add_or_update(
        &self,
        entries: &[(String, Bytes)],
        tag: Option<&str>,
        write: &ResolvedWrite,
    ) -> Result<()>;

    /// Remove the given keys.
    async fn remove(&self, keys: &[String]) -> Result<()>;

    /// Fetch raw values for all keys carrying any of the given tags
    /// and matching the pattern.
    async fn get_tagged(&self, tags: &[String], pattern: &str) -> Result<Vec<Bytes>>;

    /// Remove all keys carrying any of the given tags and matching the
    /// pattern.
    async fn remove_tagged(&self, tags: &[String], pattern: &str) -> Result<()>;

    /// List keys matching the pattern.
    async fn get_cache_keys(&self, pattern: &str) -> Result<Vec<String>>;

    /// List keys carrying any of the given tags and matching the
    /// pattern.
    async fn get_cache_keys_tagged(&self, tags: &[String], pattern: &str) -> Result<Vec<String>>;

    /// Drop every entry held by the host.
    async fn clear(&self) -> Result<()>;
}

/// Transport tuning for one host connection, derived from the client
/// configuration.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Timeout for establishing the TCP connection.
    pub connect_timeout: Duration,

    /// Per-request timeout.
    pub request_timeout: Duration,

    /// Interval between reconnection attempts.
    pub reconnect_interval: Duration,

    /// Initial write buffer capacity in bytes.
    pub write_buffer_size: usize,

    /// Largest inbound frame accepted, in bytes.
    pub max_frame_bytes: usize,
}

impl ConnectionOptions {
    /// Derive options from the client configuration.
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout,
            request_timeout: config.communication_timeout,
            reconnect_interval: config.host_reconnect_interval,
            write_buffer_size: config.message_buffer_size,
            max_frame_bytes: config.maximum_message_size(),
        }
    }
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self::from_config(&ClientConfig::default())
    }
}
