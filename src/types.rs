//! Core types used throughout the cache client.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Address and port of a cache host. Identity of a connection; never
/// mutated once created.
///
/// The derived ordering (address first, then port) is the fleet sort
/// order used when the routing table is assembled, so every client
/// instance seeing the same configuration builds identical buckets.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HostEndpoint {
    /// Host address (IP or DNS name).
    pub address: String,

    /// TCP port the cache host listens on.
    pub port: u16,
}

impl HostEndpoint {
    /// Create a new endpoint.
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }
}

impl fmt::Display for HostEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// Options for write operations.
///
/// If both an absolute and a sliding expiration are supplied, the
/// sliding value is ignored. If the item is interned, expirations and
/// remove notifications are all ignored.
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// Tag to associate with the written items. When present, the tag
    /// is also the routing string, so all items sharing it co-reside
    /// in one bucket.
    pub tag: Option<String>,

    /// Point in time at which the items expire.
    pub absolute_expiration: Option<SystemTime>,

    /// Idle window after which the items expire.
    pub sliding_expiration: Option<Duration>,

    /// Ask the host to push a removal notification when the items are
    /// evicted or expired.
    pub notify_removed: bool,

    /// Intern the items: they never expire and never notify.
    pub interned: bool,
}

impl WriteOptions {
    /// Set the tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Set an absolute expiration.
    pub fn with_absolute_expiration(mut self, at: SystemTime) -> Self {
        self.absolute_expiration = Some(at);
        self
    }

    /// Set a sliding expiration.
    pub fn with_sliding_expiration(mut self, window: Duration) -> Self {
        self.sliding_expiration = Some(window);
        self
    }

    /// Request removal notifications.
    pub fn with_notify_removed(mut self, notify: bool) -> Self {
        self.notify_removed = notify;
        self
    }

    /// Mark the items as interned.
    pub fn with_interned(mut self, interned: bool) -> Self {
        self.interned = interned;
        self
    }

    /// Apply the precedence rules and produce the wire-ready form.
    pub fn resolve(&self) -> ResolvedWrite {
        if self.interned {
            return ResolvedWrite {
                absolute_expiration_ms: None,
                sliding_expiration_ms: None,
                notify_removed: false,
                interned: true,
            };
        }

        let absolute_expiration_ms = self.absolute_expiration.map(|at| {
            at.duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0)
        });

        // Absolute beats sliding when both are supplied.
        let sliding_expiration_ms = if absolute_expiration_ms.is_some() {
            None
        } else {
            self.sliding_expiration.map(|d| d.as_millis() as u64)
        };

        ResolvedWrite {
            absolute_expiration_ms,
            sliding_expiration_ms,
            notify_removed: self.notify_removed,
            interned: false,
        }
    }
}

/// Expiration settings after precedence resolution, as sent on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedWrite {
    /// Unix-epoch milliseconds at which the items expire.
    pub absolute_expiration_ms: Option<u64>,

    /// Sliding window in milliseconds.
    pub sliding_expiration_ms: Option<u64>,

    /// Whether the host should push removal notifications.
    pub notify_removed: bool,

    /// Whether the items are interned.
    pub interned: bool,
}
