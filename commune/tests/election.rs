//! Integration tests for the election engine: single-leader convergence,
//! failover, bind exhaustion, and stop semantics.

#![cfg(unix)]

use std::cell::Cell;
use std::io;
use std::path::Path;
use std::rc::Rc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use commune::{
    ConnectionEngine, ElectionPolicy, EngineError, NetworkIdentity, Providers, Role,
    SocketListener, SocketProvider, TokioProviders, TokioRandomProvider, TokioTaskProvider,
    TokioTimeProvider,
};
use tokio::sync::mpsc;

const TEST_TIMEOUT: Duration = Duration::from_secs(10);

async fn run_local<F: std::future::Future>(fut: F) -> F::Output {
    tokio::task::LocalSet::new().run_until(fut).await
}

fn identity(dir: &tempfile::TempDir, id: &str) -> NetworkIdentity {
    NetworkIdentity::new(dir.path().join("net")).with_id(id)
}

/// Fast-failover policy so tests don't sit in default connect timeouts.
fn test_policy() -> ElectionPolicy {
    ElectionPolicy::default()
        .with_connect_timeout(Duration::from_millis(500))
        .with_lock_poll_interval(Duration::from_millis(50))
}

async fn wait_until(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = Instant::now() + TEST_TIMEOUT;
    while !check() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn single_engine_becomes_leader() {
    run_local(async {
        let dir = tempfile::tempdir().expect("tempdir");
        let identity = identity(&dir, "solo");
        let socket_path = identity.socket_path();

        let mut engine =
            ConnectionEngine::with_policy(TokioProviders::new(), identity, test_policy());
        assert_eq!(engine.role(), Role::Unstarted);

        let mut on_leader = engine.on_leader();
        let mut on_ready = engine.on_ready();

        engine.start().await.expect("start");
        assert_eq!(engine.role(), Role::Leader);
        assert!(socket_path.exists(), "leader binds the derived socket path");

        assert!(on_leader.try_next().is_some(), "leader event fired");
        assert_eq!(on_ready.try_next(), Some(Role::Leader));

        engine.stop().await.expect("stop");
        assert_eq!(engine.role(), Role::Stopped);
        assert!(
            !socket_path.exists(),
            "stop unlinks the leader's socket path"
        );
    })
    .await;
}

#[tokio::test]
async fn exactly_one_leader_among_concurrent_engines() {
    run_local(async {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("net");

        let (tx, mut rx) = mpsc::unbounded_channel();
        for n in 0..4 {
            let tx = tx.clone();
            let identity = NetworkIdentity::new(path.clone()).with_id(format!("engine-{n}"));
            tokio::task::spawn_local(async move {
                let mut engine = ConnectionEngine::with_policy(
                    TokioProviders::new(),
                    identity,
                    test_policy(),
                );
                engine.start().await.expect("start");
                assert!(tx.send(engine).is_ok(), "result channel closed early");
            });
        }
        drop(tx);

        let mut engines = Vec::new();
        while let Some(engine) = rx.recv().await {
            engines.push(engine);
        }
        assert_eq!(engines.len(), 4);

        let leaders = engines.iter().filter(|e| e.is_leader()).count();
        let followers = engines
            .iter()
            .filter(|e| e.role() == Role::Follower)
            .count();
        assert_eq!(leaders, 1, "exactly one leader per path");
        assert_eq!(followers, 3, "everyone else converges to follower");

        for mut engine in engines {
            engine.stop().await.expect("stop");
        }
    })
    .await;
}

#[tokio::test]
async fn followers_fail_over_when_leader_stops() {
    run_local(async {
        let dir = tempfile::tempdir().expect("tempdir");

        let mut engines = Vec::new();
        for n in 0..3 {
            let mut engine = ConnectionEngine::with_policy(
                TokioProviders::new(),
                identity(&dir, &format!("engine-{n}")),
                test_policy(),
            );
            engine.start().await.expect("start");
            engines.push(engine);
        }

        let leader_pos = engines
            .iter()
            .position(|e| e.is_leader())
            .expect("one engine leads");
        let mut old_leader = engines.remove(leader_pos);
        old_leader.stop().await.expect("stop leader");

        wait_until("failover to a single new leader", || {
            let leaders = engines.iter().filter(|e| e.is_leader()).count();
            let followers = engines
                .iter()
                .filter(|e| e.role() == Role::Follower)
                .count();
            leaders == 1 && followers == engines.len() - 1
        })
        .await;

        for mut engine in engines {
            engine.stop().await.expect("stop");
        }
    })
    .await;
}

#[tokio::test]
async fn compromised_lock_triggers_reelection() {
    run_local(async {
        let dir = tempfile::tempdir().expect("tempdir");
        let identity = identity(&dir, "leader");
        let lock_path = identity.lock_path();

        let mut engine =
            ConnectionEngine::with_policy(TokioProviders::new(), identity, test_policy());
        let mut errors = engine.on_error();
        let mut on_leader = engine.on_leader();

        engine.start().await.expect("start");
        assert!(on_leader.try_next().is_some());

        // Yank the lock file out from under the holder.
        std::fs::remove_file(&lock_path).expect("delete lock file");

        let reported = tokio::time::timeout(TEST_TIMEOUT, errors.next())
            .await
            .expect("error within timeout")
            .expect("error event");
        assert!(matches!(reported, EngineError::LockCompromised));

        // The engine recovers on its own and leads again.
        let reelected = tokio::time::timeout(TEST_TIMEOUT, on_leader.next())
            .await
            .expect("re-led within timeout");
        assert!(reelected.is_some());
        assert!(engine.is_leader());

        engine.stop().await.expect("stop");
    })
    .await;
}

#[tokio::test]
async fn stop_is_safe_from_any_state() {
    run_local(async {
        let dir = tempfile::tempdir().expect("tempdir");

        // Never started.
        let mut unstarted = ConnectionEngine::new(
            TokioProviders::new(),
            identity(&dir, "unstarted"),
        );
        unstarted.stop().await.expect("stop unstarted");
        assert_eq!(unstarted.role(), Role::Stopped);

        // Started, stopped twice.
        let mut engine = ConnectionEngine::with_policy(
            TokioProviders::new(),
            identity(&dir, "leader"),
            test_policy(),
        );
        engine.start().await.expect("start");
        engine.stop().await.expect("first stop");
        engine.stop().await.expect("second stop");
        assert_eq!(engine.role(), Role::Stopped);

        // Start after stop is refused: roles are never inherited.
        let refused = engine.start().await;
        assert!(matches!(refused, Err(EngineError::Stopped)));
    })
    .await;
}

// ============================================================================
// Scripted socket provider for failure-path tests
// ============================================================================

/// Socket provider that refuses every bind and connect, counting attempts.
#[derive(Clone, Default)]
struct RefusingSocketProvider {
    binds: Rc<Cell<u32>>,
    unlink_error: Option<io::ErrorKind>,
}

struct RefusingListener;

#[async_trait(?Send)]
impl SocketListener for RefusingListener {
    type Stream = tokio::io::DuplexStream;

    async fn accept(&self) -> io::Result<(Self::Stream, String)> {
        Err(io::Error::other("refusing listener"))
    }
}

#[async_trait(?Send)]
impl SocketProvider for RefusingSocketProvider {
    type Stream = tokio::io::DuplexStream;
    type Listener = RefusingListener;

    async fn bind(&self, _path: &Path) -> io::Result<Self::Listener> {
        self.binds.set(self.binds.get() + 1);
        Err(io::Error::new(io::ErrorKind::AddrInUse, "bind refused"))
    }

    async fn connect(&self, _path: &Path) -> io::Result<Self::Stream> {
        Err(io::Error::new(
            io::ErrorKind::ConnectionRefused,
            "connect refused",
        ))
    }

    async fn unlink(&self, _path: &Path) -> io::Result<()> {
        match self.unlink_error {
            None => Err(io::Error::from(io::ErrorKind::NotFound)),
            Some(kind) => Err(io::Error::new(kind, "unlink refused")),
        }
    }
}

/// Provider bundle pairing the scripted sockets with real time and tasks.
#[derive(Clone)]
struct ScriptedProviders {
    socket: RefusingSocketProvider,
    time: TokioTimeProvider,
    task: TokioTaskProvider,
    random: TokioRandomProvider,
}

impl ScriptedProviders {
    fn new(socket: RefusingSocketProvider) -> Self {
        Self {
            socket,
            time: TokioTimeProvider::new(),
            task: TokioTaskProvider,
            random: TokioRandomProvider::new(),
        }
    }
}

impl Providers for ScriptedProviders {
    type Socket = RefusingSocketProvider;
    type Time = TokioTimeProvider;
    type Task = TokioTaskProvider;
    type Random = TokioRandomProvider;

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

#[tokio::test]
async fn bind_exhaustion_is_fatal_after_exactly_ten_attempts() {
    run_local(async {
        let dir = tempfile::tempdir().expect("tempdir");
        let socket = RefusingSocketProvider::default();
        let binds = socket.binds.clone();

        let mut engine = ConnectionEngine::new(
            ScriptedProviders::new(socket),
            identity(&dir, "bind-doomed"),
        );
        let mut errors = engine.on_error();

        let started_at = Instant::now();
        let result = engine.start().await;
        let elapsed = started_at.elapsed();

        match result {
            Err(EngineError::BindExhausted { attempts, .. }) => assert_eq!(attempts, 10),
            other => panic!("expected BindExhausted, got {other:?}"),
        }
        assert_eq!(binds.get(), 10, "exactly ten attempts, no more, no fewer");

        // Nine jittered backoffs of at least 30 ms each separate the ten
        // attempts: no zero-delay retry loop.
        assert!(
            elapsed >= Duration::from_millis(9 * 30),
            "retries were not backed off: {elapsed:?}"
        );

        let fatal = errors.try_next().expect("fatal error published");
        assert!(matches!(fatal, EngineError::BindExhausted { .. }));

        // The engine does not self-heal after a fatal error.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(binds.get(), 10);

        engine.stop().await.expect("stop after fatal");
    })
    .await;
}

#[tokio::test]
async fn stale_socket_unlink_failure_is_fatal() {
    run_local(async {
        let dir = tempfile::tempdir().expect("tempdir");
        let socket = RefusingSocketProvider {
            binds: Rc::new(Cell::new(0)),
            unlink_error: Some(io::ErrorKind::PermissionDenied),
        };
        let binds = socket.binds.clone();

        let mut engine = ConnectionEngine::new(
            ScriptedProviders::new(socket),
            identity(&dir, "unlink-doomed"),
        );

        let result = engine.start().await;
        match result {
            Err(EngineError::StaleSocket { message, .. }) => {
                assert!(message.contains("unlink refused"));
            }
            other => panic!("expected StaleSocket, got {other:?}"),
        }
        assert_eq!(binds.get(), 0, "bind is never reached past a hard unlink error");
    })
    .await;
}

#[tokio::test]
async fn lock_contention_is_not_an_error() {
    run_local(async {
        let dir = tempfile::tempdir().expect("tempdir");

        let mut leader = ConnectionEngine::with_policy(
            TokioProviders::new(),
            identity(&dir, "leader"),
            test_policy(),
        );
        leader.start().await.expect("leader start");

        let mut follower = ConnectionEngine::with_policy(
            TokioProviders::new(),
            identity(&dir, "follower"),
            test_policy(),
        );
        let mut follower_errors = follower.on_error();
        let mut follower_connect = follower.on_connect();

        follower.start().await.expect("follower start");
        assert_eq!(follower.role(), Role::Follower);
        assert!(follower_connect.try_next().is_some(), "connect event fired");
        assert!(
            follower_errors.try_next().is_none(),
            "contention recovered silently, no error event"
        );

        // Leader saw the inbound connection.
        wait_until("leader sees one inbound connection", || {
            leader.inbound_connections().len() == 1
        })
        .await;

        follower.stop().await.expect("stop follower");
        leader.stop().await.expect("stop leader");
    })
    .await;
}
