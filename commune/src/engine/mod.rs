//! Leader election and connection lifecycle.
//!
//! The [`ConnectionEngine`] turns one configured rendezvous path into a
//! running role: it races the cross-process lock, binds or dials based on
//! the outcome, and keeps re-electing with jittered backoff for as long as
//! the process wants to stay connected.
//!
//! # Election cycle
//!
//! ```text
//! ┌───────────┐ start() ┌──────────┐ lock won   ┌────────┐
//! │ Unstarted ├────────►│ Electing ├───────────►│ Leader │
//! └───────────┘         │          │            └───┬────┘
//!                       │          │ lock held      │ listener error /
//!                       │          │ elsewhere      │ lock compromised
//!                       │          ├───────────►┌───┴──────┐
//!                       │          │            │ Follower │
//!                       │          │◄───────────┴──────────┘
//!                       └────┬─────┘   disconnect (jittered retry)
//!                            │ stop()
//!                            ▼
//!                       ┌─────────┐
//!                       │ Stopped │
//!                       └─────────┘
//! ```
//!
//! Exactly one process per path holds the lock at any instant; that is the
//! OS's guarantee, not this module's. Everything here is about converging on
//! the surviving leader without thundering herds or busy loops.

/// Engine implementation and role state machine.
pub mod core;

/// Retry policy constants as configurable data.
pub mod config;

/// Engine error taxonomy.
pub mod error;

pub use config::ElectionPolicy;
pub use core::{ConnectionEngine, Role};
pub use error::EngineError;
