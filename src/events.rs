//! Events raised to cache client subscribers.

use crate::types::HostEndpoint;
use tokio::sync::broadcast;

/// Default capacity of the subscriber channel. Lagging subscribers
/// lose the oldest events.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Events observable through [`CacheClient::subscribe`].
///
/// [`CacheClient::subscribe`]: crate::client::CacheClient::subscribe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// A host became unreachable and was taken offline.
    HostDisconnected {
        /// The affected endpoint.
        endpoint: HostEndpoint,
    },

    /// A previously offline host is reachable again.
    HostReconnected {
        /// The affected endpoint.
        endpoint: HostEndpoint,
    },

    /// A host pushed an expiration notification for a key.
    CacheItemExpired {
        /// The expired cache key.
        cache_key: String,
    },
}

/// Fan-out channel for [`ClientEvent`]s.
#[derive(Debug, Clone)]
pub(crate) struct EventBus {
    tx: broadcast::Sender<ClientEvent>,
}

impl EventBus {
    pub(crate) fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish an event. A send with no subscribers is not an error.
    pub(crate) fn publish(&self, event: ClientEvent) {
        let _ = self.tx.send(event);
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_and_receive() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(ClientEvent::CacheItemExpired {
            cache_key: "k".to_string(),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            ClientEvent::CacheItemExpired {
                cache_key: "k".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = EventBus::new();
        bus.publish(ClientEvent::HostDisconnected {
            endpoint: HostEndpoint::new("127.0.0.1", 1),
        });
    }
}
