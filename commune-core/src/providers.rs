//! Provider bundle trait for simplified type parameters.
//!
//! Without bundling, everything downstream carries four type parameters and
//! their where clauses. [`Providers`] collapses them into one.

use crate::{RandomProvider, SocketProvider, TaskProvider, TimeProvider};

/// Bundle of all provider types for a runtime environment.
///
/// Accessor methods hand out individual providers; associated types keep the
/// concrete stream/listener types visible to the compiler without dynamic
/// dispatch.
pub trait Providers: Clone + 'static {
    /// Socket provider type for local listeners and connections.
    type Socket: SocketProvider + 'static;

    /// Time provider type for sleeps, timeouts, and time queries.
    type Time: TimeProvider + 'static;

    /// Task provider type for spawning local tasks.
    type Task: TaskProvider + 'static;

    /// Random provider type for retry jitter.
    type Random: RandomProvider + 'static;

    /// Access the socket provider.
    fn socket(&self) -> &Self::Socket;

    /// Access the time provider.
    fn time(&self) -> &Self::Time;

    /// Access the task provider.
    fn task(&self) -> &Self::Task;

    /// Access the random provider.
    fn random(&self) -> &Self::Random;
}

/// Production provider bundle over Tokio and Unix domain sockets.
#[cfg(unix)]
#[derive(Clone, Debug)]
pub struct TokioProviders {
    socket: crate::TokioSocketProvider,
    time: crate::TokioTimeProvider,
    task: crate::TokioTaskProvider,
    random: crate::TokioRandomProvider,
}

#[cfg(unix)]
impl TokioProviders {
    /// Create the production bundle.
    pub fn new() -> Self {
        Self {
            socket: crate::TokioSocketProvider::new(),
            time: crate::TokioTimeProvider::new(),
            task: crate::TokioTaskProvider,
            random: crate::TokioRandomProvider::new(),
        }
    }
}

#[cfg(unix)]
impl Default for TokioProviders {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
impl Providers for TokioProviders {
    type Socket = crate::TokioSocketProvider;
    type Time = crate::TokioTimeProvider;
    type Task = crate::TokioTaskProvider;
    type Random = crate::TokioRandomProvider;

    fn socket(&self) -> &Self::Socket {
        &self.socket
    }

    fn time(&self) -> &Self::Time {
        &self.time
    }

    fn task(&self) -> &Self::Task {
        &self.task
    }

    fn random(&self) -> &Self::Random {
        &self.random
    }
}
