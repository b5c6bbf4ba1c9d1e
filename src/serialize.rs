//! Pluggable value serialization.
//!
//! The facade is generic over a [`Serializer`], so a deployment can
//! swap the wire representation of cached values without touching the
//! routing core. The default is bincode.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Error produced by a serializer implementation.
#[derive(Error, Debug)]
#[error("{0}")]
pub struct SerializerError(pub String);

/// Converts cached values to and from raw bytes.
pub trait Serializer: Send + Sync + 'static {
    /// Serialize a value into bytes.
    fn to_bytes<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, SerializerError>;

    /// Deserialize a value from bytes.
    fn from_bytes<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, SerializerError>;
}

/// Default serializer backed by bincode.
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeSerializer;

impl Serializer for BincodeSerializer {
    fn to_bytes<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, SerializerError> {
        bincode::serialize(value).map_err(|e| SerializerError(e.to_string()))
    }

    fn from_bytes<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, SerializerError> {
        bincode::deserialize(bytes).map_err(|e| SerializerError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let serializer = BincodeSerializer;
        let bytes = serializer.to_bytes("hello").unwrap();
        let back: String = serializer.from_bytes(&bytes).unwrap();
        assert_eq!(back, "hello");
    }

    #[test]
    fn test_deserialize_garbage_fails() {
        let serializer = BincodeSerializer;
        let result: Result<u64, _> = serializer.from_bytes(&[0xff]);
        assert!(result.is_err());
    }
}
