//! RPC frame types and framing codec for host communication.
//!
//! Every frame on the wire is a u32 big-endian length prefix followed
//! by a bincode body. Client-to-host frames carry a correlation id;
//! host-to-client frames are either a reply to one of those ids or an
//! unsolicited push (expiration notifications).

use crate::types::ResolvedWrite;
use serde::{Deserialize, Serialize};

/// Width of the length prefix on every frame.
pub const LENGTH_PREFIX_BYTES: usize = 4;

/// A cache operation as executed by one host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    /// Fetch values for the given keys.
    Get { keys: Vec<String> },

    /// Insert or update entries.
    AddOrUpdate {
        entries: Vec<(String, Vec<u8>)>,
        tag: Option<String>,
        write: ResolvedWrite,
    },

    /// Remove the given keys.
    Remove { keys: Vec<String> },

    /// Fetch values for all keys carrying any of the tags.
    GetTagged { tags: Vec<String>, pattern: String },

    /// Remove all keys carrying any of the tags.
    RemoveTagged { tags: Vec<String>, pattern: String },

    /// List keys matching the pattern.
    GetCacheKeys { pattern: String },

    /// List keys carrying any of the tags.
    GetCacheKeysTagged { tags: Vec<String>, pattern: String },

    /// Drop everything.
    Clear,
}

/// Result payload of a [`Request`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response {
    /// Position-aligned values for a `Get`; a miss is `None`.
    Values(Vec<Option<Vec<u8>>>),

    /// Values for a tag scan, in host order.
    Items(Vec<Vec<u8>>),

    /// Key listings.
    Keys(Vec<String>),

    /// Acknowledgement of a write.
    Ack,
}

/// Client-to-host frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestFrame {
    /// Correlation id, unique per connection.
    pub id: u64,

    /// The operation to execute.
    pub request: Request,
}

/// Host-to-client frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum HostFrame {
    /// Reply to a [`RequestFrame`] with the same id.
    Reply {
        id: u64,
        result: Result<Response, String>,
    },

    /// Unsolicited push; the payload is an invalidation frame.
    Push { payload: Vec<u8> },
}

/// Encode a message with its length prefix for TCP transmission.
pub fn encode_framed<T: Serialize>(msg: &T) -> Result<Vec<u8>, bincode::Error> {
    let body = bincode::serialize(msg)?;
    let mut framed = Vec::with_capacity(LENGTH_PREFIX_BYTES + body.len());
    framed.extend_from_slice(&(body.len() as u32).to_be_bytes());
    framed.extend_from_slice(&body);
    Ok(framed)
}

/// Decode a frame body (the bytes after the length prefix).
pub fn decode_body<'a, T: Deserialize<'a>>(body: &'a [u8]) -> Result<T, bincode::Error> {
    bincode::deserialize(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_frame_round_trip() {
        let frame = RequestFrame {
            id: 42,
            request: Request::Get {
                keys: vec!["a".to_string(), "b".to_string()],
            },
        };

        let framed = encode_framed(&frame).unwrap();
        let len = u32::from_be_bytes([framed[0], framed[1], framed[2], framed[3]]) as usize;
        assert_eq!(len, framed.len() - LENGTH_PREFIX_BYTES);

        let decoded: RequestFrame = decode_body(&framed[LENGTH_PREFIX_BYTES..]).unwrap();
        assert_eq!(decoded.id, 42);
        match decoded.request {
            Request::Get { keys } => assert_eq!(keys, vec!["a", "b"]),
            other => panic!("wrong request: {other:?}"),
        }
    }

    #[test]
    fn test_host_frame_reply_round_trip() {
        let frame = HostFrame::Reply {
            id: 7,
            result: Ok(Response::Values(vec![Some(b"v".to_vec()), None])),
        };

        let framed = encode_framed(&frame).unwrap();
        let decoded: HostFrame = decode_body(&framed[LENGTH_PREFIX_BYTES..]).unwrap();
        match decoded {
            HostFrame::Reply {
                id,
                result: Ok(Response::Values(values)),
            } => {
                assert_eq!(id, 7);
                assert_eq!(values, vec![Some(b"v".to_vec()), None]);
            }
            other => panic!("wrong frame: {other:?}"),
        }
    }

    #[test]
    fn test_host_frame_push_round_trip() {
        let frame = HostFrame::Push {
            payload: vec![1, 2, 3],
        };
        let framed = encode_framed(&frame).unwrap();
        let decoded: HostFrame = decode_body(&framed[LENGTH_PREFIX_BYTES..]).unwrap();
        match decoded {
            HostFrame::Push { payload } => assert_eq!(payload, vec![1, 2, 3]),
            other => panic!("wrong frame: {other:?}"),
        }
    }
}
