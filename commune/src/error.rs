//! Error types for the object-messaging layer.

use thiserror::Error;

use crate::engine::EngineError;

/// Errors surfaced by [`ObjectNetwork`](crate::network::ObjectNetwork).
#[derive(Debug, Clone, Error)]
pub enum NetworkError {
    /// `send` was called with neither the leader role nor a live outbound
    /// connection. Reported to the caller immediately, never retried.
    #[error("no leader connection to send to")]
    NotConnected,

    /// A leader-only operation was called while not leading.
    #[error("not the leader")]
    NotLeader,

    /// The codec or framer rejected an outgoing message. A local error of
    /// the sender, not a transport condition.
    #[error("encode failed: {0}")]
    Encode(String),

    /// One incoming frame failed to decode. Isolated to that frame; the
    /// stream continues.
    #[error("decode failed: {0}")]
    Decode(String),

    /// An engine-level condition, forwarded from the election layer.
    #[error("engine: {0}")]
    Engine(#[from] EngineError),
}

impl NetworkError {
    /// Whether this error ends automatic recovery.
    pub fn is_fatal(&self) -> bool {
        matches!(self, NetworkError::Engine(e) if e.is_fatal())
    }
}
