//! The leader-election and reconnection state machine.
//!
//! One background election task drives all transitions. Shared state lives
//! in `Rc<RefCell<…>>` and is never borrowed across an await; shutdown is a
//! channel whose sender is dropped by `stop()`, so every pending `select!`
//! wakes at once.

use std::cell::RefCell;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use commune_core::{
    NetworkIdentity, Providers, SocketListener, SocketProvider, TaskProvider, TimeProvider,
};
use tokio::sync::mpsc;

use crate::connection::{Connection, Direction};
use crate::events::{EventHub, EventSubscription};
use crate::lock::{LockCoordinator, LockError, LockHandle};

use super::config::ElectionPolicy;
use super::error::EngineError;

/// Where one engine instance currently stands in the election cycle.
///
/// Recomputed on every (re)election; never inherited across restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// `start()` has not been called.
    Unstarted,
    /// Between roles: negotiating the lock or retrying.
    Electing,
    /// Holds the lock and the listening socket.
    Leader,
    /// Connected as a client to the leader.
    Follower,
    /// `stop()` completed; terminal.
    Stopped,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Unstarted => write!(f, "unstarted"),
            Role::Electing => write!(f, "electing"),
            Role::Leader => write!(f, "leader"),
            Role::Follower => write!(f, "follower"),
            Role::Stopped => write!(f, "stopped"),
        }
    }
}

/// Event hubs owned by one engine.
#[derive(Clone)]
pub(crate) struct EngineEvents {
    /// This instance became leader.
    pub leader: EventHub<()>,
    /// This instance connected to a leader (payload: the outbound connection).
    pub connect: EventHub<Rc<Connection>>,
    /// The leader accepted an inbound connection.
    pub connection: EventHub<Rc<Connection>>,
    /// A role is established, leader-bound or follower-connected.
    pub ready: EventHub<Role>,
    /// Errors, fatal and informational.
    pub error: EventHub<EngineError>,
}

impl EngineEvents {
    fn new() -> Self {
        Self {
            leader: EventHub::new(),
            connect: EventHub::new(),
            connection: EventHub::new(),
            ready: EventHub::new(),
            error: EventHub::new(),
        }
    }
}

struct EngineShared {
    role: Role,
    outbound: Option<Rc<Connection>>,
    inbound: Vec<Rc<Connection>>,
    stopping: bool,
}

/// The election + reconnection engine for one network path.
///
/// Multiple engines with different paths coexist in one process; nothing is
/// global. All I/O goes through the provider bundle, so tests can inject
/// refusing sockets or scripted clocks.
pub struct ConnectionEngine<P: Providers> {
    providers: P,
    identity: NetworkIdentity,
    policy: ElectionPolicy,
    shared: Rc<RefCell<EngineShared>>,
    events: EngineEvents,
    shutdown_tx: Option<mpsc::UnboundedSender<()>>,
    election: Option<tokio::task::JoinHandle<()>>,
}

impl<P: Providers> ConnectionEngine<P> {
    /// Create an engine with the default policy.
    pub fn new(providers: P, identity: NetworkIdentity) -> Self {
        Self::with_policy(providers, identity, ElectionPolicy::default())
    }

    /// Create an engine with an explicit policy.
    pub fn with_policy(providers: P, identity: NetworkIdentity, policy: ElectionPolicy) -> Self {
        Self {
            providers,
            identity,
            policy,
            shared: Rc::new(RefCell::new(EngineShared {
                role: Role::Unstarted,
                outbound: None,
                inbound: Vec::new(),
                stopping: false,
            })),
            events: EngineEvents::new(),
            shutdown_tx: None,
            election: None,
        }
    }

    /// Current role.
    pub fn role(&self) -> Role {
        self.shared.borrow().role
    }

    /// Whether this instance currently leads its path.
    pub fn is_leader(&self) -> bool {
        self.role() == Role::Leader
    }

    /// The identity this engine was configured with.
    pub fn identity(&self) -> &NetworkIdentity {
        &self.identity
    }

    /// The follower's link to the leader, when one is live.
    pub fn outbound_connection(&self) -> Option<Rc<Connection>> {
        self.shared.borrow().outbound.clone()
    }

    /// The leader's accepted peers, when leading.
    pub fn inbound_connections(&self) -> Vec<Rc<Connection>> {
        self.shared.borrow().inbound.clone()
    }

    /// Subscribe to leadership announcements.
    pub fn on_leader(&self) -> EventSubscription<()> {
        self.events.leader.subscribe()
    }

    /// Subscribe to follower-connected announcements.
    pub fn on_connect(&self) -> EventSubscription<Rc<Connection>> {
        self.events.connect.subscribe()
    }

    /// Subscribe to the leader's accepted connections.
    pub fn on_connection(&self) -> EventSubscription<Rc<Connection>> {
        self.events.connection.subscribe()
    }

    /// Subscribe to readiness (either role established).
    pub fn on_ready(&self) -> EventSubscription<Role> {
        self.events.ready.subscribe()
    }

    /// Subscribe to error notifications.
    pub fn on_error(&self) -> EventSubscription<EngineError> {
        self.events.error.subscribe()
    }

    /// Start the engine and wait for the first established role.
    ///
    /// Idempotent: calling again while running waits for (or returns) the
    /// same readiness.
    ///
    /// # Errors
    ///
    /// Rejects only on a fatal error before readiness: bind-retry
    /// exhaustion, an unremovable stale socket, or a stop that beat the
    /// first election. Transient contention and disconnects never surface
    /// here.
    pub async fn start(&mut self) -> Result<(), EngineError> {
        match self.role() {
            Role::Leader | Role::Follower => return Ok(()),
            Role::Stopped => return Err(EngineError::Stopped),
            Role::Unstarted | Role::Electing => {}
        }
        // A previous election that halted fatally will produce no more
        // events; don't wait on it.
        if self.election.as_ref().is_some_and(|t| t.is_finished()) {
            return Err(EngineError::Stopped);
        }

        // Subscribe before spawning so the first ready cannot be missed.
        let mut ready = self.events.ready.subscribe();
        let mut errors = self.events.error.subscribe();

        if self.election.is_none() {
            let (shutdown_tx, shutdown_rx) = mpsc::unbounded_channel();
            self.shutdown_tx = Some(shutdown_tx);

            let ctx = ElectionCtx {
                providers: self.providers.clone(),
                identity: self.identity.clone(),
                policy: self.policy.clone(),
                socket_path: self.identity.socket_path(),
                shared: self.shared.clone(),
                events: self.events.clone(),
                lock: LockCoordinator::new(
                    self.providers.clone(),
                    self.identity.lock_path(),
                    self.policy.lock_poll_interval,
                ),
            };
            self.election = Some(
                self.providers
                    .task()
                    .spawn_task("election", election_task(ctx, shutdown_rx)),
            );
        }

        loop {
            tokio::select! {
                established = ready.next() => {
                    return match established {
                        Some(_) => Ok(()),
                        None => Err(EngineError::Stopped),
                    };
                }
                reported = errors.next() => {
                    match reported {
                        Some(error) if error.is_fatal() => return Err(error),
                        Some(_) => continue,
                        None => return Err(EngineError::Stopped),
                    }
                }
            }
        }
    }

    /// Stop the engine from any state.
    ///
    /// Cancels pending retries, suppresses any in-flight election step from
    /// assuming a role, closes the owned listener or connections, unlinks
    /// the socket path if this instance was leader, and releases any held
    /// lock. Resolves once cleanup completes; safe to call repeatedly.
    ///
    /// # Errors
    ///
    /// Currently infallible; the `Result` reserves room for cleanup
    /// failures to become visible.
    pub async fn stop(&mut self) -> Result<(), EngineError> {
        self.shared.borrow_mut().stopping = true;
        // Dropping the sender wakes every select! on the shutdown channel.
        self.shutdown_tx.take();

        if let Some(handle) = self.election.take() {
            let _ = handle.await;
        }
        self.shared.borrow_mut().role = Role::Stopped;
        tracing::debug!(identity = %self.identity, "engine stopped");
        Ok(())
    }
}

/// Everything the election task needs, clonable into helpers.
struct ElectionCtx<P: Providers> {
    providers: P,
    identity: NetworkIdentity,
    policy: ElectionPolicy,
    socket_path: PathBuf,
    shared: Rc<RefCell<EngineShared>>,
    events: EngineEvents,
    lock: LockCoordinator<P>,
}

impl<P: Providers> ElectionCtx<P> {
    fn stopping(&self) -> bool {
        self.shared.borrow().stopping
    }

    fn set_role(&self, role: Role) {
        let mut shared = self.shared.borrow_mut();
        if shared.role != role {
            tracing::debug!(identity = %self.identity, role = %role, "role transition");
            shared.role = role;
        }
    }

    /// Wrap a fresh stream in a [`Connection`] and spawn its I/O task.
    fn spawn_connection<S>(&self, direction: Direction, peer: String, stream: S) -> Rc<Connection>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + 'static,
    {
        let (connection, io) = Connection::open(direction, peer, stream);
        let for_task = connection.clone();
        let shared = self.shared.clone();
        self.providers.task().spawn_task(
            &format!("connection-{}", connection.id()),
            async move {
                let result = io.await;
                for_task.mark_closed(result.err().map(|e| e.to_string()));
                if for_task.direction() == Direction::Inbound {
                    shared
                        .borrow_mut()
                        .inbound
                        .retain(|c| c.id() != for_task.id());
                }
            },
        );
        connection
    }

    /// Close and forget every inbound connection.
    fn close_inbound(&self) {
        let inbound = std::mem::take(&mut self.shared.borrow_mut().inbound);
        for connection in inbound {
            connection.close();
        }
    }
}

/// How one election cycle ended.
enum Flow {
    /// Re-enter election after the jittered delay.
    Reelect,
    /// A fatal error was emitted; halt automatic transitions.
    Fatal,
    /// Shutdown requested.
    Stopped,
}

/// Result of the leader's bind-retry loop.
enum BindOutcome<L> {
    Bound(L),
    Compromised,
    Fatal(EngineError),
    Stopped,
}

/// The engine's single background task.
async fn election_task<P: Providers>(
    ctx: ElectionCtx<P>,
    mut shutdown: mpsc::UnboundedReceiver<()>,
) {
    let mut became_ready = false;
    let mut first_cycle = true;

    loop {
        if ctx.stopping() {
            break;
        }
        ctx.set_role(Role::Electing);

        // Every automatic retry is jittered; only the very first cycle
        // starts immediately.
        if !first_cycle && sleep_jitter(&ctx, &mut shutdown).await {
            break;
        }
        first_cycle = false;
        if ctx.stopping() {
            break;
        }

        let flow = match ctx.lock.acquire().await {
            Ok(handle) => lead(&ctx, handle, &mut shutdown, &mut became_ready).await,
            Err(LockError::Contended) => follow(&ctx, &mut shutdown, &mut became_ready).await,
            Err(error) => {
                ctx.events.error.publish(EngineError::Lock(error.to_string()));
                Flow::Reelect
            }
        };

        match flow {
            Flow::Reelect => continue,
            Flow::Fatal => {
                tracing::warn!(identity = %ctx.identity, "fatal election error, engine halted");
                return;
            }
            Flow::Stopped => break,
        }
    }

    // Voluntary stop: lead()/follow() already released the lock, listener,
    // and socket path on their way out; connections remain to close.
    let leftovers: Vec<Rc<Connection>> = {
        let mut shared = ctx.shared.borrow_mut();
        let mut all = std::mem::take(&mut shared.inbound);
        all.extend(shared.outbound.take());
        all
    };
    for connection in leftovers {
        connection.close();
    }
    ctx.set_role(Role::Stopped);

    if !became_ready {
        // Unblock a start() still waiting on first readiness.
        ctx.events.error.publish(EngineError::Stopped);
    }
}

/// Leader path: clear the stale socket, bind (with retries), accept until
/// something ends the tenure.
async fn lead<P: Providers>(
    ctx: &ElectionCtx<P>,
    handle: LockHandle,
    shutdown: &mut mpsc::UnboundedReceiver<()>,
    became_ready: &mut bool,
) -> Flow {
    let listener = match bind_with_retries(ctx, &handle, shutdown).await {
        BindOutcome::Bound(listener) => listener,
        BindOutcome::Compromised => {
            ctx.events.error.publish(EngineError::LockCompromised);
            release_lock(ctx, handle).await;
            return Flow::Reelect;
        }
        BindOutcome::Fatal(error) => {
            ctx.events.error.publish(error);
            release_lock(ctx, handle).await;
            return Flow::Fatal;
        }
        BindOutcome::Stopped => {
            release_lock(ctx, handle).await;
            return Flow::Stopped;
        }
    };

    if ctx.stopping() {
        drop(listener);
        return teardown_leader(ctx, handle, Flow::Stopped).await;
    }

    ctx.set_role(Role::Leader);
    tracing::info!(identity = %ctx.identity, socket = %ctx.socket_path.display(), "became leader");
    ctx.events.leader.publish(());
    *became_ready = true;
    ctx.events.ready.publish(Role::Leader);

    let mut compromised = handle.compromised();
    let flow = loop {
        tokio::select! {
            _ = shutdown.recv() => break Flow::Stopped,

            _ = compromised.changed() => {
                ctx.events.error.publish(EngineError::LockCompromised);
                break Flow::Reelect;
            }

            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let connection = ctx.spawn_connection(Direction::Inbound, peer, stream);
                    ctx.shared.borrow_mut().inbound.push(connection.clone());
                    tracing::debug!(
                        identity = %ctx.identity,
                        connection = connection.id(),
                        "accepted follower connection"
                    );
                    ctx.events.connection.publish(connection);
                }
                Err(error) => {
                    ctx.events.error.publish(EngineError::Transport(error.to_string()));
                    break Flow::Reelect;
                }
            },
        }
    };

    drop(listener);
    teardown_leader(ctx, handle, flow).await
}

/// End a leader tenure: drop peers, release the lock, then unlink the
/// socket path (lock first, so its lifecycle never outlives socket
/// ownership).
async fn teardown_leader<P: Providers>(
    ctx: &ElectionCtx<P>,
    handle: LockHandle,
    flow: Flow,
) -> Flow {
    ctx.close_inbound();
    release_lock(ctx, handle).await;
    if let Err(error) = ctx.providers.socket().unlink(&ctx.socket_path).await {
        if error.kind() != io::ErrorKind::NotFound {
            tracing::warn!(
                socket = %ctx.socket_path.display(),
                error = %error,
                "could not unlink socket on teardown"
            );
        }
    }
    flow
}

async fn release_lock<P: Providers>(ctx: &ElectionCtx<P>, handle: LockHandle) {
    // Best-effort: a compromised lock may already be unlockable.
    if let Err(error) = ctx.lock.release(handle).await {
        tracing::warn!(identity = %ctx.identity, error = %error, "lock release failed");
    }
}

/// Unlink any stale socket, then bind, retrying with jitter while the lock
/// is held.
async fn bind_with_retries<P: Providers>(
    ctx: &ElectionCtx<P>,
    handle: &LockHandle,
    shutdown: &mut mpsc::UnboundedReceiver<()>,
) -> BindOutcome<<P::Socket as SocketProvider>::Listener> {
    let mut last_error = String::new();

    for attempt in 1..=ctx.policy.bind_attempts {
        if ctx.stopping() {
            return BindOutcome::Stopped;
        }
        if handle.is_compromised() {
            return BindOutcome::Compromised;
        }

        if let Err(error) = clear_stale_socket(ctx, &ctx.socket_path).await {
            return BindOutcome::Fatal(error);
        }

        match ctx.providers.socket().bind(&ctx.socket_path).await {
            Ok(listener) => return BindOutcome::Bound(listener),
            Err(error) => {
                last_error = error.to_string();
                tracing::warn!(
                    identity = %ctx.identity,
                    attempt,
                    of = ctx.policy.bind_attempts,
                    error = %last_error,
                    "bind failed"
                );
                if attempt < ctx.policy.bind_attempts && sleep_jitter(ctx, shutdown).await {
                    return BindOutcome::Stopped;
                }
            }
        }
    }

    BindOutcome::Fatal(EngineError::BindExhausted {
        attempts: ctx.policy.bind_attempts,
        last: last_error,
    })
}

/// Remove a leftover socket file. "Not found" is the normal case; anything
/// else fails the leader attempt outright.
async fn clear_stale_socket<P: Providers>(
    ctx: &ElectionCtx<P>,
    path: &Path,
) -> Result<(), EngineError> {
    match ctx.providers.socket().unlink(path).await {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(error) => Err(EngineError::StaleSocket {
            path: path.display().to_string(),
            message: error.to_string(),
        }),
    }
}

/// Follower path: dial the leader's socket and hold the link until it
/// drops.
async fn follow<P: Providers>(
    ctx: &ElectionCtx<P>,
    shutdown: &mut mpsc::UnboundedReceiver<()>,
    became_ready: &mut bool,
) -> Flow {
    let dial = ctx
        .providers
        .time()
        .timeout(
            ctx.policy.connect_timeout,
            ctx.providers.socket().connect(&ctx.socket_path),
        );

    let stream = tokio::select! {
        _ = shutdown.recv() => return Flow::Stopped,
        dialed = dial => match dialed {
            Ok(Ok(stream)) => stream,
            // Leader mid-handover or already gone: the expected race, not
            // an error. Retry after jitter.
            Ok(Err(_)) | Err(_) => return Flow::Reelect,
        },
    };

    if ctx.stopping() {
        return Flow::Stopped;
    }

    let connection = ctx.spawn_connection(Direction::Outbound, "leader".to_string(), stream);
    ctx.shared.borrow_mut().outbound = Some(connection.clone());
    ctx.set_role(Role::Follower);
    tracing::info!(identity = %ctx.identity, "connected to leader");
    ctx.events.connect.publish(connection.clone());
    *became_ready = true;
    ctx.events.ready.publish(Role::Follower);

    let flow = tokio::select! {
        _ = shutdown.recv() => Flow::Stopped,
        _ = connection.closed() => {
            if let Some(error) = connection.last_error() {
                ctx.events.error.publish(EngineError::Transport(error));
            }
            Flow::Reelect
        }
    };

    connection.close();
    ctx.shared.borrow_mut().outbound = None;
    flow
}

/// Jittered pause, interruptible by shutdown. Returns `true` to stop.
async fn sleep_jitter<P: Providers>(
    ctx: &ElectionCtx<P>,
    shutdown: &mut mpsc::UnboundedReceiver<()>,
) -> bool {
    let delay = ctx.policy.sample_retry_delay(ctx.providers.random());
    tokio::select! {
        _ = shutdown.recv() => true,
        slept = ctx.providers.time().sleep(delay) => slept.is_err() || ctx.stopping(),
    }
}
