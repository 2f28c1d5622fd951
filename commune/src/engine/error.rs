//! Error types for the election engine.

use thiserror::Error;

/// Errors surfaced by the election engine.
///
/// Only the fatal variants ever reject `start()`; everything else arrives
/// as `error`-event notifications while the engine recovers on its own.
/// Carried as strings where the source is an `io::Error` so the type stays
/// `Clone` for fan-out.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// The held lock was invalidated externally. The engine releases and
    /// re-enters election; informational.
    #[error("lock compromised, re-entering election")]
    LockCompromised,

    /// Binding the socket failed on every allowed attempt. Fatal: the
    /// engine stops retrying.
    #[error("bind failed after {attempts} attempts: {last}")]
    BindExhausted {
        /// How many attempts were made.
        attempts: u32,
        /// The last bind error observed.
        last: String,
    },

    /// A stale socket file could not be removed for a reason other than
    /// "not found". Fatal for the leader attempt.
    #[error("could not remove stale socket {path}: {message}")]
    StaleSocket {
        /// The socket path that could not be cleared.
        path: String,
        /// The unlink error.
        message: String,
    },

    /// Socket-level failure after a role was established. The engine tears
    /// down and re-elects; informational.
    #[error("transport error: {0}")]
    Transport(String),

    /// Filesystem failure talking to the lock, other than contention.
    #[error("lock error: {0}")]
    Lock(String),

    /// The engine stopped before ever becoming ready.
    #[error("engine stopped")]
    Stopped,
}

impl EngineError {
    /// Whether this error ends the engine's automatic retrying.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::BindExhausted { .. }
                | EngineError::StaleSocket { .. }
                | EngineError::Stopped
        )
    }
}
