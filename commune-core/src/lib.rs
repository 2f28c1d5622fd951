//! # commune-core
//!
//! Core abstractions for the commune process network.
//!
//! This crate provides the leaf building blocks that the election engine and
//! object-messaging layer in the `commune` crate are written against:
//!
//! - **Provider traits**: single-threaded abstractions for sockets, time,
//!   tasks, and randomness
//! - **Rendezvous addressing**: deterministic socket/lock path derivation
//!   from one configured path
//! - **Codec trait**: pluggable object serialization
//!
//! ## Provider Traits
//!
//! The provider traits keep the engine independent of the concrete runtime
//! environment, so tests can substitute refusing or scripted implementations:
//!
//! - [`SocketProvider`]: bind, dial, and unlink path-addressed stream sockets
//! - [`TimeProvider`]: sleep, timeout, and time queries
//! - [`TaskProvider`]: named task spawning on the current thread
//! - [`RandomProvider`]: uniform sampling for retry jitter
//!
//! All async traits are `(?Send)`: the whole system runs on a current-thread
//! runtime and shares state through `Rc`, never across threads.

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

mod codec;
mod net;
mod providers;
mod random;
mod rendezvous;
mod task;
mod time;

// Codec exports
pub use codec::{CodecError, JsonCodec, MessageCodec};

// Provider trait exports
pub use net::{SocketListener, SocketProvider};
#[cfg(unix)]
pub use net::{TokioSocketProvider, TokioUnixListener};
pub use providers::Providers;
#[cfg(unix)]
pub use providers::TokioProviders;
pub use random::{RandomProvider, TokioRandomProvider};
pub use task::{TaskProvider, TokioTaskProvider};
pub use time::{TimeError, TimeProvider, TokioTimeProvider};

// Addressing exports
pub use rendezvous::NetworkIdentity;
