//! # commune
//!
//! Single-machine process networking with automatic leader election.
//!
//! Cooperating processes that agree on one filesystem path form a single
//! logical network: exactly one process wins the cross-process lock,
//! becomes the *leader*, and hosts a local socket endpoint; every other
//! process dials in as a *follower*. Roles are not fixed: when the leader
//! dies, a follower takes the lock and the rest reconnect to it, with
//! jittered backoff so nobody stampedes.
//!
//! This crate provides:
//! - **[`ConnectionEngine`]**: the leader-election + reconnection state
//!   machine over raw sockets
//! - **[`ObjectNetwork`]**: typed, codec-framed messaging on top, with
//!   leader-local loopback and per-message return paths
//! - **[`wire`]**: length-prefixed packet framing
//! - **[`LockCoordinator`]**: the exclusive lock with compromise detection
//! - **[`EventHub`]**: the typed pub/sub primitive every layer exposes
//!   itself through
//!
//! # Example
//!
//! ```ignore
//! use commune::{JsonCodec, NetworkConfig, ObjectNetwork, TokioProviders};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize, Clone)]
//! struct Note {
//!     text: String,
//! }
//!
//! # async fn run() -> Result<(), commune::NetworkError> {
//! let mut network: ObjectNetwork<Note, _, _> = ObjectNetwork::new(
//!     TokioProviders::new(),
//!     NetworkConfig::new("/tmp/my-app").with_id("worker-1"),
//!     JsonCodec,
//! );
//!
//! let mut inbox = network.on_message();
//! network.start().await?;
//!
//! network.send(&Note { text: "hello".into() })?;
//! if let Some(message) = inbox.next().await {
//!     // Reply straight back along the message's return path.
//!     network.reply(&message.origin, &Note { text: "ack".into() })?;
//! }
//!
//! network.stop().await?;
//! # Ok(())
//! # }
//! ```
//!
//! Whether `send` crossed a socket or looped back locally depends only on
//! the role at that moment; callers never branch on it.

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

// Re-export core types for convenience
pub use commune_core::{
    CodecError, JsonCodec, MessageCodec, NetworkIdentity, Providers, RandomProvider,
    SocketListener, SocketProvider, TaskProvider, TimeError, TimeProvider, TokioRandomProvider,
    TokioTaskProvider, TokioTimeProvider,
};
#[cfg(unix)]
pub use commune_core::{TokioProviders, TokioSocketProvider, TokioUnixListener};

// =============================================================================
// Modules
// =============================================================================

/// Typed publish/subscribe hubs.
pub mod events;

/// Length-prefixed wire framing.
pub mod wire;

/// Cross-process lock with compromise detection.
pub mod lock;

/// Live socket wrapper with role context.
pub mod connection;

/// Leader election and reconnection engine.
pub mod engine;

/// Object messaging over the engine.
pub mod network;

mod error;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use connection::{Connection, ConnectionClosed, Direction};
pub use engine::{ConnectionEngine, ElectionPolicy, EngineError, Role};
pub use error::NetworkError;
pub use events::{EventHub, EventSubscription};
pub use lock::{LockCoordinator, LockError, LockHandle};
pub use network::{NetworkConfig, ObjectMessage, ObjectNetwork, ReturnPath};
pub use wire::{FrameDecoder, WireError, encode_frame};
