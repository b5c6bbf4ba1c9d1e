//! Client-side routing and host-fleet management for the Dache
//! distributed cache.
//!
//! This crate owns the live set of cache hosts, decides which host
//! receives a given key, replicates writes across redundancy layers,
//! rebalances on failure, and repairs itself on reconnect:
//!
//! - **Deterministic routing** — hosts sort by `(address, port)` into
//!   redundancy buckets of `layers + 1` replicas, and a stable hash of
//!   the cache key (or tag) picks the bucket, so every client instance
//!   with the same configuration routes identically.
//! - **Replicated writes, balanced reads** — writes fan out to every
//!   reachable replica of the owning bucket; reads round-robin over
//!   them.
//! - **Self-healing fleet** — each connection reconnects on its own
//!   schedule; the routing table skips exhausted buckets and folds
//!   them back in on recovery. Optional UDP multicast discovery grows
//!   and shrinks the fleet at runtime.
//!
//! # Example
//!
//! ```rust,no_run
//! use dache_client::{CacheClient, ClientConfig, HostEndpoint, WriteOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::new(vec![
//!         HostEndpoint::new("10.0.0.1", 11211),
//!         HostEndpoint::new("10.0.0.2", 11211),
//!     ])
//!     .with_redundancy_layers(1);
//!
//!     let client = CacheClient::connect(config).await?;
//!
//!     client
//!         .add_or_update("user:42", "Alice", &WriteOptions::default())
//!         .await?;
//!
//!     if let Some(name) = client.get::<String>("user:42").await? {
//!         println!("found: {name}");
//!     }
//!
//!     client.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │                 CacheClient                   │
//! │   get / add_or_update / remove / tagged ops   │
//! └───────────────────────────────────────────────┘
//!                       │ routing string
//!                       ▼
//! ┌───────────────────────────────────────────────┐
//! │                RoutingTable                   │
//! │   hash → bucket, skip offline indices         │
//! └───────────────────────────────────────────────┘
//!           │                         ▲
//!           ▼                         │ events
//! ┌──────────────────┐      ┌──────────────────┐
//! │ RedundancyBucket │      │  Host connection │
//! │ round-robin /    │─────▶│  (framed TCP,    │
//! │ fan-out          │      │   auto-reconnect)│
//! └──────────────────┘      └──────────────────┘
//! ```
//!
//! Operations retry on transport failure until they succeed, the whole
//! fleet is offline (`Error::NoCacheHostsAvailable`), or a configured
//! operation deadline elapses. Host-pushed expiration notifications
//! and connection transitions surface through
//! [`CacheClient::subscribe`].

pub mod client;
pub mod config;
pub mod discovery;
pub mod error;
pub mod events;
pub mod invalidation;
pub mod metrics;
pub mod network;
pub mod routing;
pub mod serialize;
pub mod testing;
pub mod types;

// Re-export main types for convenience
pub use client::CacheClient;
pub use config::ClientConfig;
pub use error::{Error, NetworkError, Result};
pub use events::ClientEvent;
pub use types::{HostEndpoint, ResolvedWrite, WriteOptions};

// Re-export the transport seam
pub use network::{CacheHost, ConnectionOptions, HostEvent, HostEventKind, TcpCacheHost};

// Re-export routing types
pub use routing::{RedundancyBucket, RoutingTable};

// Re-export serialization plug-in types
pub use serialize::{BincodeSerializer, Serializer, SerializerError};

// Re-export metrics types
pub use metrics::{ClientMetrics, MetricsSnapshot};

// Re-export discovery types
pub use discovery::{Beacon, DiscoveryListener};
