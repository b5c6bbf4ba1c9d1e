//! Key routing across the host fleet.
//!
//! Hosts are grouped into redundancy buckets; a deterministic hash of
//! the routing string picks the bucket, and offline buckets are
//! skipped by walking to the first available successor.

pub mod bucket;
pub mod table;

pub use bucket::RedundancyBucket;
pub use table::{routing_hash, BucketGroup, RoutingTable};
