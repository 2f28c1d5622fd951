//! Task spawning abstraction for single-threaded execution.

use std::future::Future;

/// Provider for spawning local tasks in a single-threaded context.
///
/// Tasks are spawned with `spawn_local`, so futures carry no `Send` bound.
/// The name is attached to trace events for debugging; it has no runtime
/// effect.
pub trait TaskProvider: Clone {
    /// Spawn a named task that runs on the current thread.
    fn spawn_task<F>(&self, name: &str, future: F) -> tokio::task::JoinHandle<()>
    where
        F: Future<Output = ()> + 'static;
}

/// Tokio-based task provider using `spawn_local`.
///
/// Requires running inside a `tokio::task::LocalSet` (or a current-thread
/// runtime entered through one).
#[derive(Clone, Debug, Default)]
pub struct TokioTaskProvider;

impl TaskProvider for TokioTaskProvider {
    fn spawn_task<F>(&self, name: &str, future: F) -> tokio::task::JoinHandle<()>
    where
        F: Future<Output = ()> + 'static,
    {
        let task_name = name.to_string();
        tokio::task::spawn_local(async move {
            tracing::trace!(task = %task_name, "task starting");
            future.await;
            tracing::trace!(task = %task_name, "task completed");
        })
    }
}
