//! Host-pushed invalidation frames.
//!
//! A frame is a sequence of length-prefixed UTF-16LE segments (u32
//! little-endian prefix). The first segment names the command,
//! compared ASCII case-insensitively; for `expire` every following
//! segment is a cache key to raise [`ClientEvent::CacheItemExpired`]
//! for. Unknown commands are ignored.
//!
//! [`ClientEvent::CacheItemExpired`]: crate::events::ClientEvent::CacheItemExpired

use crate::events::{ClientEvent, EventBus};
use crate::metrics::ClientMetrics;
use std::sync::Arc;
use tracing::{debug, warn};

/// Command name for key expiration frames.
pub const COMMAND_EXPIRE: &str = "expire";

/// Encode a string as UTF-16LE bytes.
pub(crate) fn encode_utf16le(text: &str) -> Vec<u8> {
    text.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

/// Decode UTF-16LE bytes. `None` for odd lengths or invalid code units.
pub(crate) fn decode_utf16le(bytes: &[u8]) -> Option<String> {
    if bytes.len() % 2 != 0 {
        return None;
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units).ok()
}

/// Encode segments into a frame.
pub fn encode_frame<'a, I>(segments: I) -> Vec<u8>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut frame = Vec::new();
    for segment in segments {
        let encoded = encode_utf16le(segment);
        frame.extend_from_slice(&(encoded.len() as u32).to_le_bytes());
        frame.extend_from_slice(&encoded);
    }
    frame
}

/// Decode a frame into its segments. `None` on any truncated prefix,
/// truncated segment, or invalid UTF-16.
pub fn decode_frame(payload: &[u8]) -> Option<Vec<String>> {
    let mut segments = Vec::new();
    let mut rest = payload;
    while !rest.is_empty() {
        if rest.len() < 4 {
            return None;
        }
        let len = u32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
        rest = &rest[4..];
        if rest.len() < len {
            return None;
        }
        segments.push(decode_utf16le(&rest[..len])?);
        rest = &rest[len..];
    }
    Some(segments)
}

/// Turns raw pushed frames into subscriber events.
#[derive(Clone)]
pub(crate) struct InvalidationDispatcher {
    events: EventBus,
    metrics: Arc<ClientMetrics>,
}

impl InvalidationDispatcher {
    pub(crate) fn new(events: EventBus, metrics: Arc<ClientMetrics>) -> Self {
        Self { events, metrics }
    }

    /// Handle one pushed frame.
    pub(crate) fn handle(&self, payload: &[u8]) {
        let Some(segments) = decode_frame(payload) else {
            warn!(bytes = payload.len(), "discarding malformed invalidation frame");
            return;
        };
        let Some((command, keys)) = segments.split_first() else {
            return;
        };

        if command.eq_ignore_ascii_case(COMMAND_EXPIRE) {
            for key in keys {
                self.metrics.record_expiration();
                self.events.publish(ClientEvent::CacheItemExpired {
                    cache_key: key.clone(),
                });
            }
        } else {
            debug!(command = %command, "ignoring unknown inbound command");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_round_trip() {
        let frame = encode_frame(["expire", "a", "b"]);
        let segments = decode_frame(&frame).unwrap();
        assert_eq!(segments, vec!["expire", "a", "b"]);
    }

    #[test]
    fn test_decode_rejects_truncation() {
        let mut frame = encode_frame(["expire", "key"]);
        frame.truncate(frame.len() - 1);
        assert!(decode_frame(&frame).is_none());

        // A prefix shorter than four bytes.
        assert!(decode_frame(&[1, 0]).is_none());
    }

    #[test]
    fn test_empty_frame_decodes_empty() {
        assert_eq!(decode_frame(&[]), Some(Vec::new()));
    }

    #[tokio::test]
    async fn test_expire_raises_events_in_order() {
        let bus = EventBus::new();
        let metrics = Arc::new(ClientMetrics::new());
        let dispatcher = InvalidationDispatcher::new(bus.clone(), metrics.clone());
        let mut rx = bus.subscribe();

        dispatcher.handle(&encode_frame(["EXPIRE", "a", "b"]));

        assert_eq!(
            rx.recv().await.unwrap(),
            ClientEvent::CacheItemExpired {
                cache_key: "a".to_string()
            }
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            ClientEvent::CacheItemExpired {
                cache_key: "b".to_string()
            }
        );
        assert_eq!(metrics.snapshot().expirations_received, 2);
    }

    #[tokio::test]
    async fn test_unknown_command_ignored() {
        let bus = EventBus::new();
        let dispatcher =
            InvalidationDispatcher::new(bus.clone(), Arc::new(ClientMetrics::new()));
        let mut rx = bus.subscribe();

        dispatcher.handle(&encode_frame(["compact", "a"]));
        assert!(rx.try_recv().is_err());
    }
}
