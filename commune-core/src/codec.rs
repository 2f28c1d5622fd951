//! Pluggable object serialization.
//!
//! The [`MessageCodec`] trait is the seam between the framed byte transport
//! and typed application messages. Both ends of a path must agree on the
//! codec out of band; nothing on the wire identifies it.
//!
//! [`JsonCodec`] is the shipped default. Custom codecs (MessagePack, CBOR,
//! bincode, ...) implement the same two-method capability pair:
//!
//! ```rust
//! use commune_core::{MessageCodec, JsonCodec};
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Serialize, Deserialize, Debug, PartialEq)]
//! struct Greeting {
//!     who: String,
//! }
//!
//! let codec = JsonCodec;
//! let msg = Greeting { who: "world".to_string() };
//! let bytes = codec.encode(&msg).unwrap();
//! let back: Greeting = codec.decode(&bytes).unwrap();
//! assert_eq!(back, msg);
//! ```

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Error type for codec operations.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Failed to encode a message to bytes.
    ///
    /// Encoding a well-formed message should not fail; when it does, it is a
    /// local error reported to the sender, never a transport condition.
    #[error("encode error: {0}")]
    Encode(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Failed to decode bytes to a message.
    #[error("decode error: {0}")]
    Decode(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Pluggable object serialization format.
///
/// `Clone + 'static` so codec instances can be stored in per-connection
/// decode pumps.
pub trait MessageCodec: Clone + 'static {
    /// Encode a serializable message to bytes.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Encode` if serialization fails.
    fn encode<T: Serialize>(&self, msg: &T) -> Result<Vec<u8>, CodecError>;

    /// Decode bytes to a deserializable message.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Decode` on malformed input.
    fn decode<T: DeserializeOwned>(&self, buf: &[u8]) -> Result<T, CodecError>;
}

/// JSON codec using serde_json.
///
/// Human-readable and schema-free; the default for cooperating processes
/// that have not agreed on anything more compact.
#[derive(Clone, Copy, Default, Debug)]
pub struct JsonCodec;

impl MessageCodec for JsonCodec {
    fn encode<T: Serialize>(&self, msg: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(msg).map_err(|e| CodecError::Encode(Box::new(e)))
    }

    fn decode<T: DeserializeOwned>(&self, buf: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(buf).map_err(|e| CodecError::Decode(Box::new(e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
    struct TestMessage {
        id: u32,
        content: String,
    }

    #[test]
    fn json_roundtrip() {
        let codec = JsonCodec;
        let msg = TestMessage {
            id: 42,
            content: "hello world".to_string(),
        };

        let bytes = codec.encode(&msg).expect("encode");
        let decoded: TestMessage = codec.decode(&bytes).expect("decode");
        assert_eq!(msg, decoded);
    }

    #[test]
    fn json_roundtrip_primitives() {
        let codec = JsonCodec;

        let n = 12345u64;
        let bytes = codec.encode(&n).expect("encode");
        let decoded: u64 = codec.decode(&bytes).expect("decode");
        assert_eq!(n, decoded);

        let v = vec![1, 2, 3];
        let bytes = codec.encode(&v).expect("encode");
        let decoded: Vec<i32> = codec.decode(&bytes).expect("decode");
        assert_eq!(v, decoded);
    }

    #[test]
    fn decode_error_on_malformed_input() {
        let codec = JsonCodec;
        let result: Result<TestMessage, CodecError> = codec.decode(b"not valid json {");
        let err = result.expect_err("malformed input");
        assert!(matches!(err, CodecError::Decode(_)));
        assert!(err.to_string().contains("decode error"));
    }

    #[test]
    fn decode_error_on_type_mismatch() {
        let codec = JsonCodec;
        let bytes = codec
            .encode(&TestMessage {
                id: 1,
                content: "x".to_string(),
            })
            .expect("encode");
        let result: Result<String, CodecError> = codec.decode(&bytes);
        assert!(result.is_err());
    }
}
