//! Redundancy buckets: ordered groups of replica connections.

use crate::error::Result;
use crate::network::CacheHost;
use crate::types::HostEndpoint;
use parking_lot::RwLock;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// An ordered group of host connections that are logical replicas of
/// one another. Reads are load-balanced over the online members with a
/// round-robin cursor; writes are fanned out to every online member.
///
/// Every connection handed to a bucket lives in exactly one of the two
/// member lists. A single lock guards both lists; the cursor is a
/// relaxed atomic, so concurrent readers get approximate rather than
/// strict rotation.
pub struct RedundancyBucket {
    target_width: usize,
    cursor: AtomicUsize,
    members: RwLock<MemberLists>,
}

#[derive(Default)]
struct MemberLists {
    online: Vec<Arc<dyn CacheHost>>,
    offline: Vec<Arc<dyn CacheHost>>,
}

impl RedundancyBucket {
    /// Create an empty bucket with the given target replication width.
    pub fn new(target_width: usize) -> Self {
        Self {
            target_width,
            cursor: AtomicUsize::new(0),
            members: RwLock::new(MemberLists::default()),
        }
    }

    /// Target replication width, not the current online size.
    pub fn count(&self) -> usize {
        self.target_width
    }

    /// Append a connection to the online list.
    pub fn add(&self, host: Arc<dyn CacheHost>) {
        self.members.write().online.push(host);
    }

    /// Pick an online member round-robin. Returns `None` when every
    /// member is offline.
    pub fn next(&self) -> Option<Arc<dyn CacheHost>> {
        let members = self.members.read();
        if members.online.is_empty() {
            return None;
        }
        let slot = self.cursor.fetch_add(1, Ordering::Relaxed) % members.online.len();
        Some(members.online[slot].clone())
    }

    /// Apply `f` to every online member, outside the bucket lock. Any
    /// failure fails the whole call; the facade retries with a fresh
    /// routing pass.
    pub async fn for_all<F, Fut>(&self, f: F) -> Result<()>
    where
        F: Fn(Arc<dyn CacheHost>) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        for host in self.snapshot_online() {
            f(host).await?;
        }
        Ok(())
    }

    /// Snapshot the online list.
    pub fn snapshot_online(&self) -> Vec<Arc<dyn CacheHost>> {
        self.members.read().online.clone()
    }

    /// Snapshot both member lists.
    pub fn snapshot_all(&self) -> Vec<Arc<dyn CacheHost>> {
        let members = self.members.read();
        members
            .online
            .iter()
            .chain(members.offline.iter())
            .cloned()
            .collect()
    }

    /// Move a member from online to offline and reset the cursor.
    /// Returns `false` if the endpoint was not online, which makes
    /// repeated disconnect events harmless.
    pub fn take_offline(&self, endpoint: &HostEndpoint) -> bool {
        let mut members = self.members.write();
        let Some(position) = members
            .online
            .iter()
            .position(|h| h.endpoint() == endpoint)
        else {
            return false;
        };
        let host = members.online.remove(position);
        members.offline.push(host);
        self.cursor.store(0, Ordering::Relaxed);
        true
    }

    /// Move a member from offline back to online. Idempotent like
    /// [`take_offline`].
    ///
    /// [`take_offline`]: RedundancyBucket::take_offline
    pub fn bring_online(&self, endpoint: &HostEndpoint) -> bool {
        let mut members = self.members.write();
        let Some(position) = members
            .offline
            .iter()
            .position(|h| h.endpoint() == endpoint)
        else {
            return false;
        };
        let host = members.offline.remove(position);
        members.online.push(host);
        true
    }

    /// Remove a member entirely, from whichever list holds it.
    pub fn remove_member(&self, endpoint: &HostEndpoint) -> Option<Arc<dyn CacheHost>> {
        let mut members = self.members.write();
        if let Some(position) = members
            .online
            .iter()
            .position(|h| h.endpoint() == endpoint)
        {
            self.cursor.store(0, Ordering::Relaxed);
            return Some(members.online.remove(position));
        }
        if let Some(position) = members
            .offline
            .iter()
            .position(|h| h.endpoint() == endpoint)
        {
            return Some(members.offline.remove(position));
        }
        None
    }

    /// Whether every member of this bucket is offline.
    pub fn is_exhausted(&self) -> bool {
        self.members.read().online.is_empty()
    }

    /// Total number of members, online and offline.
    pub fn member_len(&self) -> usize {
        let members = self.members.read();
        members.online.len() + members.offline.len()
    }

    /// Number of online members.
    pub fn online_len(&self) -> usize {
        self.members.read().online.len()
    }

    /// Whether either list holds the endpoint.
    pub fn contains(&self, endpoint: &HostEndpoint) -> bool {
        let members = self.members.read();
        members.online.iter().any(|h| h.endpoint() == endpoint)
            || members.offline.iter().any(|h| h.endpoint() == endpoint)
    }

    /// Whether the offline list holds the endpoint.
    pub fn contains_offline(&self, endpoint: &HostEndpoint) -> bool {
        self.members
            .read()
            .offline
            .iter()
            .any(|h| h.endpoint() == endpoint)
    }
}

impl std::fmt::Debug for RedundancyBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let members = self.members.read();
        f.debug_struct("RedundancyBucket")
            .field("target_width", &self.target_width)
            .field("online", &members.online.len())
            .field("offline", &members.offline.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockHost;

    fn bucket_with(endpoints: &[(&str, u16)]) -> (RedundancyBucket, Vec<Arc<MockHost>>) {
        let bucket = RedundancyBucket::new(endpoints.len());
        let mut hosts = Vec::new();
        for (address, port) in endpoints {
            let host = Arc::new(MockHost::new(HostEndpoint::new(*address, *port)));
            bucket.add(host.clone());
            hosts.push(host);
        }
        (bucket, hosts)
    }

    #[test]
    fn test_next_round_robins() {
        let (bucket, _hosts) = bucket_with(&[("a", 1), ("b", 1), ("c", 1)]);

        let picks: Vec<_> = (0..6)
            .map(|_| bucket.next().unwrap().endpoint().clone())
            .collect();

        assert_eq!(picks[0], picks[3]);
        assert_eq!(picks[1], picks[4]);
        assert_eq!(picks[2], picks[5]);
        assert_ne!(picks[0], picks[1]);
    }

    #[test]
    fn test_next_on_empty_bucket() {
        let bucket = RedundancyBucket::new(2);
        assert!(bucket.next().is_none());
        assert!(bucket.is_exhausted());
    }

    #[test]
    fn test_take_offline_is_idempotent() {
        let (bucket, _hosts) = bucket_with(&[("a", 1), ("b", 1)]);
        let endpoint = HostEndpoint::new("a", 1);

        assert!(bucket.take_offline(&endpoint));
        assert!(!bucket.take_offline(&endpoint));
        assert_eq!(bucket.online_len(), 1);
        assert!(bucket.contains_offline(&endpoint));
    }

    #[test]
    fn test_bring_online_is_idempotent() {
        let (bucket, _hosts) = bucket_with(&[("a", 1)]);
        let endpoint = HostEndpoint::new("a", 1);

        assert!(bucket.take_offline(&endpoint));
        assert!(bucket.is_exhausted());

        assert!(bucket.bring_online(&endpoint));
        assert!(!bucket.bring_online(&endpoint));
        assert_eq!(bucket.online_len(), 1);
        assert!(!bucket.contains_offline(&endpoint));
    }

    #[test]
    fn test_membership_is_total() {
        let (bucket, _hosts) = bucket_with(&[("a", 1), ("b", 1)]);
        let endpoint = HostEndpoint::new("a", 1);

        bucket.take_offline(&endpoint);
        assert_eq!(bucket.member_len(), 2);
        bucket.bring_online(&endpoint);
        assert_eq!(bucket.member_len(), 2);
        assert_eq!(bucket.online_len(), 2);
    }

    #[test]
    fn test_count_is_target_width() {
        let (bucket, _hosts) = bucket_with(&[("a", 1), ("b", 1)]);
        bucket.take_offline(&HostEndpoint::new("a", 1));
        assert_eq!(bucket.count(), 2);
    }

    #[test]
    fn test_remove_member() {
        let (bucket, _hosts) = bucket_with(&[("a", 1), ("b", 1)]);
        let endpoint = HostEndpoint::new("b", 1);

        assert!(bucket.remove_member(&endpoint).is_some());
        assert!(bucket.remove_member(&endpoint).is_none());
        assert_eq!(bucket.member_len(), 1);
        assert!(!bucket.contains(&endpoint));
    }

    #[tokio::test]
    async fn test_for_all_visits_online_members_only() {
        let (bucket, hosts) = bucket_with(&[("a", 1), ("b", 1), ("c", 1)]);
        bucket.take_offline(&HostEndpoint::new("b", 1));

        bucket
            .for_all(|host| async move { host.clear().await })
            .await
            .unwrap();

        assert_eq!(hosts[0].clear_calls(), 1);
        assert_eq!(hosts[1].clear_calls(), 0);
        assert_eq!(hosts[2].clear_calls(), 1);
    }

    #[tokio::test]
    async fn test_for_all_propagates_failure() {
        let (bucket, hosts) = bucket_with(&[("a", 1), ("b", 1)]);
        hosts[1].fail_next();

        let result = bucket
            .for_all(|host| async move { host.clear().await })
            .await;
        assert!(result.is_err());
    }
}
