//! The routing table: ordered buckets plus the offline-index set.

use crate::error::{Error, Result};
use crate::network::CacheHost;
use crate::routing::bucket::RedundancyBucket;
use crate::types::HostEndpoint;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Hash a routing string: a wrapping character sum on a 32-bit signed
/// accumulator seeded at 17.
///
/// Weak on purpose — this is the on-the-wire routing function shared
/// with other client implementations, so keys land on the same bucket
/// regardless of which client wrote them.
pub fn routing_hash(routing: &str) -> i32 {
    let mut hash: i32 = 17;
    for ch in routing.chars() {
        hash = hash.wrapping_add(ch as i32);
    }
    hash
}

/// A bucket reference with the input positions routed to it. Groups
/// come back in first-seen order, which is also the concatenation
/// order for batched results.
pub struct BucketGroup {
    /// The target bucket.
    pub bucket: Arc<RedundancyBucket>,

    /// Indices into the caller's input that route to this bucket.
    pub positions: Vec<usize>,
}

struct TableState {
    buckets: Vec<Arc<RedundancyBucket>>,
    offline: HashSet<usize>,
}

/// The ordered sequence of redundancy buckets and the set of bucket
/// indices whose every member is unreachable.
///
/// Lookups take the read lock; membership transitions take the write
/// lock and only mutate in-memory state, so the transport side never
/// deadlocks against the hot path. Bucket order is fixed for the
/// client's lifetime; discovery only appends.
pub struct RoutingTable {
    width: usize,
    state: RwLock<TableState>,
}

impl RoutingTable {
    /// Assemble the table from the configured fleet.
    ///
    /// Hosts are sorted by `(address, port)` and packed into buckets
    /// of `layers + 1` members; a short final bucket is kept. The
    /// result is identical across client instances seeing the same
    /// configuration.
    pub fn assemble(hosts: Vec<Arc<dyn CacheHost>>, layers: usize) -> Self {
        let width = layers + 1;

        let mut hosts = hosts;
        hosts.sort_by(|a, b| a.endpoint().cmp(b.endpoint()));

        let mut buckets: Vec<Arc<RedundancyBucket>> = Vec::new();
        for chunk in hosts.chunks(width) {
            let bucket = RedundancyBucket::new(width);
            for host in chunk {
                bucket.add(host.clone());
            }
            buckets.push(Arc::new(bucket));
        }

        info!(
            hosts = hosts.len(),
            buckets = buckets.len(),
            width,
            "routing table assembled"
        );

        Self {
            width,
            state: RwLock::new(TableState {
                buckets,
                offline: HashSet::new(),
            }),
        }
    }

    /// Bucket width the table was configured with.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Number of buckets.
    pub fn len(&self) -> usize {
        self.state.read().buckets.len()
    }

    /// Whether the table holds no buckets at all.
    pub fn is_empty(&self) -> bool {
        self.state.read().buckets.is_empty()
    }

    /// Resolve a routing string to its serving bucket.
    pub fn bucket_for(&self, routing: &str) -> Result<Arc<RedundancyBucket>> {
        let state = self.state.read();
        let index = Self::resolve(&state, routing)?;
        Ok(state.buckets[index].clone())
    }

    /// Group routing strings by target bucket, in first-seen order,
    /// under a single read-lock pass.
    pub fn group_by_bucket<'a, I>(&self, routings: I) -> Result<Vec<BucketGroup>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let state = self.state.read();
        let mut groups: Vec<BucketGroup> = Vec::new();
        let mut by_index: HashMap<usize, usize> = HashMap::new();

        for (position, routing) in routings.into_iter().enumerate() {
            let index = Self::resolve(&state, routing)?;
            match by_index.get(&index) {
                Some(&slot) => groups[slot].positions.push(position),
                None => {
                    by_index.insert(index, groups.len());
                    groups.push(BucketGroup {
                        bucket: state.buckets[index].clone(),
                        positions: vec![position],
                    });
                }
            }
        }

        Ok(groups)
    }

    /// Snapshot every bucket in table order.
    pub fn all_buckets(&self) -> Vec<Arc<RedundancyBucket>> {
        self.state.read().buckets.clone()
    }

    /// Snapshot every member connection in the fleet.
    pub fn all_hosts(&self) -> Vec<Arc<dyn CacheHost>> {
        self.state
            .read()
            .buckets
            .iter()
            .flat_map(|b| b.snapshot_all())
            .collect()
    }

    /// Whether any bucket holds the endpoint.
    pub fn contains(&self, endpoint: &HostEndpoint) -> bool {
        self.state
            .read()
            .buckets
            .iter()
            .any(|b| b.contains(endpoint))
    }

    /// Bucket indices currently considered unreachable, sorted.
    pub fn offline_indices(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = self.state.read().offline.iter().copied().collect();
        indices.sort_unstable();
        indices
    }

    /// React to a host disconnect: move it offline in its bucket and
    /// mark the bucket's index when the bucket is exhausted. Returns
    /// `false` when no bucket owned the endpoint online, so repeated
    /// disconnect events do nothing.
    pub fn handle_disconnected(&self, endpoint: &HostEndpoint) -> bool {
        let mut state = self.state.write();
        for index in 0..state.buckets.len() {
            let bucket = state.buckets[index].clone();
            if bucket.take_offline(endpoint) {
                if bucket.is_exhausted() {
                    state.offline.insert(index);
                    warn!(%endpoint, bucket = index, "bucket exhausted, skipping in routing");
                } else {
                    debug!(%endpoint, bucket = index, "host taken offline");
                }
                return true;
            }
        }
        false
    }

    /// React to a host reconnect: bring it online and clear every
    /// offline index whose bucket has a reachable member again.
    pub fn handle_reconnected(&self, endpoint: &HostEndpoint) -> bool {
        let mut state = self.state.write();
        let mut found = false;
        for bucket in state.buckets.iter() {
            if bucket.bring_online(endpoint) {
                found = true;
                break;
            }
        }
        if found {
            let revived: Vec<usize> = state
                .offline
                .iter()
                .copied()
                .filter(|&i| !state.buckets[i].is_exhausted())
                .collect();
            for index in revived {
                state.offline.remove(&index);
                debug!(bucket = index, "bucket serving again");
            }
        }
        found
    }

    /// Insert a discovered host: the last bucket with free width takes
    /// it, otherwise a new bucket is appended. This keeps existing
    /// key→bucket placements stable while the fleet grows.
    pub fn insert_discovered(&self, host: Arc<dyn CacheHost>) {
        let mut state = self.state.write();
        let endpoint = host.endpoint().clone();

        if let Some(index) = state.buckets.len().checked_sub(1) {
            let bucket = state.buckets[index].clone();
            if bucket.member_len() < bucket.count() {
                bucket.add(host);
                // The new member is online, so the bucket serves again.
                state.offline.remove(&index);
                info!(%endpoint, bucket = index, "discovered host joined bucket");
                return;
            }
        }

        let bucket = RedundancyBucket::new(self.width);
        bucket.add(host);
        state.buckets.push(Arc::new(bucket));
        info!(%endpoint, bucket = state.buckets.len() - 1, "discovered host opened new bucket");
    }

    /// Remove a host permanently (discovery BYE). The bucket keeps its
    /// position; if the removal empties its online list the index goes
    /// into the offline set. Returns the removed connection so the
    /// caller can disconnect it outside the lock.
    pub fn remove_host(&self, endpoint: &HostEndpoint) -> Option<Arc<dyn CacheHost>> {
        let mut state = self.state.write();
        for index in 0..state.buckets.len() {
            let bucket = state.buckets[index].clone();
            if let Some(host) = bucket.remove_member(endpoint) {
                if bucket.is_exhausted() {
                    state.offline.insert(index);
                }
                info!(%endpoint, bucket = index, "host removed from fleet");
                return Some(host);
            }
        }
        None
    }

    fn resolve(state: &TableState, routing: &str) -> Result<usize> {
        let bucket_count = state.buckets.len();
        if bucket_count == 0 || state.offline.len() == bucket_count {
            return Err(Error::NoCacheHostsAvailable);
        }

        let mut index = routing_hash(routing).unsigned_abs() as usize % bucket_count;
        while state.offline.contains(&index) {
            index = (index + 1) % bucket_count;
        }
        Ok(index)
    }
}

impl std::fmt::Debug for RoutingTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("RoutingTable")
            .field("width", &self.width)
            .field("buckets", &state.buckets.len())
            .field("offline", &state.offline)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockHost;

    fn host(address: &str, port: u16) -> Arc<dyn CacheHost> {
        Arc::new(MockHost::new(HostEndpoint::new(address, port)))
    }

    fn table(endpoints: &[(&str, u16)], layers: usize) -> RoutingTable {
        let hosts = endpoints.iter().map(|(a, p)| host(a, *p)).collect();
        RoutingTable::assemble(hosts, layers)
    }

    #[test]
    fn test_routing_hash_seed_and_sum() {
        // 17 + 'u' + 's' + 'e' + 'r' + ':' + '4' + '2'
        assert_eq!(routing_hash("user:42"), 624);
        assert_eq!(routing_hash(""), 17);

        // The character sum is commutative, a known weakness kept for
        // routing parity.
        assert_eq!(routing_hash("ab"), routing_hash("ba"));
    }

    #[test]
    fn test_deterministic_assembly() {
        // Unsorted input must sort to (address, port) ascending.
        let table = table(&[("10.0.0.2", 1), ("10.0.0.1", 2), ("10.0.0.1", 1)], 1);

        assert_eq!(table.len(), 2);
        let buckets = table.all_buckets();
        assert_eq!(buckets[0].member_len(), 2);
        assert_eq!(buckets[1].member_len(), 1);

        let first: Vec<HostEndpoint> = buckets[0]
            .snapshot_online()
            .iter()
            .map(|h| h.endpoint().clone())
            .collect();
        assert_eq!(
            first,
            vec![
                HostEndpoint::new("10.0.0.1", 1),
                HostEndpoint::new("10.0.0.1", 2)
            ]
        );
        assert_eq!(
            buckets[1].snapshot_online()[0].endpoint(),
            &HostEndpoint::new("10.0.0.2", 1)
        );
    }

    #[test]
    fn test_seven_hosts_two_layers() {
        let endpoints: Vec<(String, u16)> =
            (1..=7).map(|i| (format!("10.0.0.{i}"), 1)).collect();
        let hosts = endpoints
            .iter()
            .map(|(a, p)| host(a, *p))
            .collect();
        let table = RoutingTable::assemble(hosts, 2);

        assert_eq!(table.len(), 3);
        let sizes: Vec<usize> = table.all_buckets().iter().map(|b| b.member_len()).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
    }

    #[test]
    fn test_lookup_is_stable() {
        let table = table(&[("a", 1), ("b", 1), ("c", 1)], 0);

        let first = table.bucket_for("user:42").unwrap();
        for _ in 0..1000 {
            let again = table.bucket_for("user:42").unwrap();
            assert!(Arc::ptr_eq(&first, &again));
        }

        // 624 % 3 == 0: the first bucket serves this key.
        assert!(Arc::ptr_eq(&first, &table.all_buckets()[0]));
    }

    #[test]
    fn test_empty_fleet() {
        let table = RoutingTable::assemble(Vec::new(), 0);
        assert!(matches!(
            table.bucket_for("k"),
            Err(Error::NoCacheHostsAvailable)
        ));
    }

    #[test]
    fn test_failover_and_recovery() {
        let table = table(&[("a", 1), ("a", 2), ("b", 1), ("b", 2)], 1);
        assert_eq!(table.len(), 2);

        // Keys that hash to bucket 1.
        let key = "x"; // 17 + 120 = 137, 137 % 2 = 1
        assert_eq!(routing_hash(key).unsigned_abs() % 2, 1);
        let routed = table.bucket_for(key).unwrap();
        assert!(Arc::ptr_eq(&routed, &table.all_buckets()[1]));

        // Bucket 1 loses both members.
        assert!(table.handle_disconnected(&HostEndpoint::new("b", 1)));
        assert!(table.handle_disconnected(&HostEndpoint::new("b", 2)));
        assert_eq!(table.offline_indices(), vec![1]);

        // The key now routes to the first available successor.
        let failover = table.bucket_for(key).unwrap();
        assert!(Arc::ptr_eq(&failover, &table.all_buckets()[0]));

        // One member returns; routing snaps back.
        assert!(table.handle_reconnected(&HostEndpoint::new("b", 2)));
        assert!(table.offline_indices().is_empty());
        let restored = table.bucket_for(key).unwrap();
        assert!(Arc::ptr_eq(&restored, &table.all_buckets()[1]));
    }

    #[test]
    fn test_fleet_exhaustion() {
        let table = table(&[("a", 1), ("b", 1)], 0);
        table.handle_disconnected(&HostEndpoint::new("a", 1));
        table.handle_disconnected(&HostEndpoint::new("b", 1));

        assert!(matches!(
            table.bucket_for("k"),
            Err(Error::NoCacheHostsAvailable)
        ));
    }

    #[test]
    fn test_disconnect_unknown_endpoint_is_noop() {
        let table = table(&[("a", 1)], 0);
        assert!(!table.handle_disconnected(&HostEndpoint::new("z", 9)));
        assert!(!table.handle_reconnected(&HostEndpoint::new("z", 9)));
        assert!(table.offline_indices().is_empty());
    }

    #[test]
    fn test_offline_set_matches_exhaustion() {
        let table = table(&[("a", 1), ("a", 2), ("b", 1)], 1);

        table.handle_disconnected(&HostEndpoint::new("a", 1));
        assert!(table.offline_indices().is_empty());

        table.handle_disconnected(&HostEndpoint::new("a", 2));
        assert_eq!(table.offline_indices(), vec![0]);

        for (index, bucket) in table.all_buckets().iter().enumerate() {
            assert_eq!(
                table.offline_indices().contains(&index),
                bucket.next().is_none()
            );
        }
    }

    #[test]
    fn test_group_by_bucket_first_seen_order() {
        let table = table(&[("a", 1), ("b", 1), ("c", 1)], 0);

        // "x" = 137 -> bucket 2? 137 % 3 = 2; "y" = 138 % 3 = 0; "z" = 139 % 3 = 1.
        let routings = ["x", "y", "z", "x"];
        let groups = table
            .group_by_bucket(routings.iter().copied())
            .unwrap();

        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].positions, vec![0, 3]);
        assert_eq!(groups[1].positions, vec![1]);
        assert_eq!(groups[2].positions, vec![2]);
        assert!(Arc::ptr_eq(&groups[0].bucket, &table.all_buckets()[2]));
    }

    #[test]
    fn test_discovery_fills_short_bucket_then_opens_new() {
        let table = table(&[("a", 1), ("a", 2), ("b", 1)], 1);
        assert_eq!(table.len(), 2);
        assert_eq!(table.all_buckets()[1].member_len(), 1);

        table.insert_discovered(host("b", 2));
        assert_eq!(table.len(), 2);
        assert_eq!(table.all_buckets()[1].member_len(), 2);

        table.insert_discovered(host("c", 1));
        assert_eq!(table.len(), 3);
        assert_eq!(table.all_buckets()[2].member_len(), 1);
    }

    #[test]
    fn test_discovery_revives_exhausted_tail_bucket() {
        let table = table(&[("a", 1), ("a", 2), ("b", 1)], 1);
        table.handle_disconnected(&HostEndpoint::new("b", 1));
        assert_eq!(table.offline_indices(), vec![1]);

        table.insert_discovered(host("b", 2));
        assert!(table.offline_indices().is_empty());
        assert!(table.bucket_for("anything").is_ok());
    }

    #[test]
    fn test_remove_host_permanently() {
        let table = table(&[("a", 1), ("b", 1)], 0);

        let removed = table.remove_host(&HostEndpoint::new("a", 1)).unwrap();
        assert_eq!(removed.endpoint(), &HostEndpoint::new("a", 1));
        assert!(table.remove_host(&HostEndpoint::new("a", 1)).is_none());

        // The emptied bucket keeps its slot but is skipped.
        assert_eq!(table.len(), 2);
        assert_eq!(table.offline_indices(), vec![0]);
        assert!(table.bucket_for("k").is_ok());
    }
}
