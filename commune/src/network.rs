//! Object messaging over the election engine.
//!
//! [`ObjectNetwork`] wraps every raw socket the engine produces in a
//! framer + codec pipeline and surfaces decoded, typed messages with a
//! return path for replying. Sending from the leader never touches the
//! socket layer: the message loops back to local subscribers directly.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use commune_core::{MessageCodec, NetworkIdentity, Providers, TaskProvider};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::connection::Connection;
use crate::engine::{ConnectionEngine, ElectionPolicy, EngineError, Role};
use crate::error::NetworkError;
use crate::events::{EventHub, EventSubscription};
use crate::wire::{FrameDecoder, encode_frame};

/// Configuration for one [`ObjectNetwork`].
#[derive(Clone, Debug)]
pub struct NetworkConfig {
    /// Rendezvous identity: the path all cooperating processes agree on.
    pub identity: NetworkIdentity,
    /// Election retry policy.
    pub policy: ElectionPolicy,
}

impl NetworkConfig {
    /// Configuration for the network rendezvoused at `path`, default policy.
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self {
            identity: NetworkIdentity::new(path),
            policy: ElectionPolicy::default(),
        }
    }

    /// Attach a participant label.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.identity = self.identity.with_id(id);
        self
    }

    /// Override the election policy.
    pub fn with_policy(mut self, policy: ElectionPolicy) -> Self {
        self.policy = policy;
        self
    }
}

/// Where a message came from, and therefore where a reply goes.
///
/// A reference back to the producing socket (or to this process itself for
/// leader loopback), not ownership of it.
#[derive(Clone)]
pub enum ReturnPath {
    /// Produced by this process's own loopback `send`.
    Local,
    /// Produced by a specific live connection.
    Remote(Rc<Connection>),
}

impl ReturnPath {
    /// Whether this message looped back locally.
    pub fn is_local(&self) -> bool {
        matches!(self, ReturnPath::Local)
    }

    /// The producing connection, for remote origins.
    pub fn connection(&self) -> Option<&Rc<Connection>> {
        match self {
            ReturnPath::Local => None,
            ReturnPath::Remote(connection) => Some(connection),
        }
    }
}

impl std::fmt::Debug for ReturnPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReturnPath::Local => write!(f, "ReturnPath::Local"),
            ReturnPath::Remote(connection) => {
                write!(f, "ReturnPath::Remote({})", connection.id())
            }
        }
    }
}

/// One decoded message with its return path.
#[derive(Debug, Clone)]
pub struct ObjectMessage<M> {
    /// The decoded payload.
    pub data: M,
    /// Reference for replying to the sender.
    pub origin: ReturnPath,
}

type PeerHubs<M> = Rc<RefCell<HashMap<u64, EventHub<ObjectMessage<M>>>>>;

/// Message-level networking over one rendezvous path.
///
/// Generic over the message type `M`, the codec `C`, and the provider
/// bundle `P`. Both ends of a path must use the same codec and message
/// type; nothing on the wire negotiates them.
pub struct ObjectNetwork<M, C, P: Providers> {
    engine: ConnectionEngine<P>,
    providers: P,
    codec: C,
    messages: EventHub<ObjectMessage<M>>,
    errors: EventHub<NetworkError>,
    peer_hubs: PeerHubs<M>,
    router: Option<tokio::task::JoinHandle<()>>,
}

impl<M, C, P> ObjectNetwork<M, C, P>
where
    M: Serialize + DeserializeOwned + Clone + 'static,
    C: MessageCodec,
    P: Providers,
{
    /// Create a network over `providers` with the given codec.
    pub fn new(providers: P, config: NetworkConfig, codec: C) -> Self {
        let engine =
            ConnectionEngine::with_policy(providers.clone(), config.identity, config.policy);
        Self {
            engine,
            providers,
            codec,
            messages: EventHub::new(),
            errors: EventHub::new(),
            peer_hubs: Rc::new(RefCell::new(HashMap::new())),
            router: None,
        }
    }

    /// The identity this network was configured with.
    pub fn identity(&self) -> &NetworkIdentity {
        self.engine.identity()
    }

    /// Current election role.
    pub fn role(&self) -> Role {
        self.engine.role()
    }

    /// Whether this instance currently leads its path.
    pub fn is_leader(&self) -> bool {
        self.engine.is_leader()
    }

    /// The follower's link to the leader, when one is live.
    pub fn outbound_connection(&self) -> Option<Rc<Connection>> {
        self.engine.outbound_connection()
    }

    /// The leader's accepted peers, when leading.
    pub fn inbound_connections(&self) -> Vec<Rc<Connection>> {
        self.engine.inbound_connections()
    }

    /// Start the engine and wait for the first established role.
    ///
    /// # Errors
    ///
    /// Rejects only on fatal engine errors; see
    /// [`ConnectionEngine::start`](crate::engine::ConnectionEngine::start).
    pub async fn start(&mut self) -> Result<(), NetworkError> {
        if self.router.is_none() {
            let router = router_task(
                self.engine.on_connect(),
                self.engine.on_connection(),
                self.engine.on_error(),
                self.codec.clone(),
                self.providers.task().clone(),
                self.messages.clone(),
                self.errors.clone(),
                self.peer_hubs.clone(),
            );
            self.router = Some(
                self.providers
                    .task()
                    .spawn_task("message-router", router),
            );
        }
        self.engine.start().await?;
        Ok(())
    }

    /// Stop the network and the engine beneath it.
    ///
    /// # Errors
    ///
    /// Forwards engine cleanup failures.
    pub async fn stop(&mut self) -> Result<(), NetworkError> {
        self.engine.stop().await?;
        if let Some(router) = self.router.take() {
            router.abort();
        }
        Ok(())
    }

    /// Send a message toward the leader.
    ///
    /// As leader this is pure loopback: the message is enqueued for every
    /// local subscriber with a `Local` return path before this call
    /// returns, and no socket is involved. As follower the message is
    /// encoded, framed, and queued on the outbound connection.
    ///
    /// # Errors
    ///
    /// [`NetworkError::NotConnected`] when neither leading nor connected;
    /// [`NetworkError::Encode`] if the codec rejects the message.
    pub fn send(&self, message: &M) -> Result<(), NetworkError> {
        if self.engine.is_leader() {
            self.messages.publish(ObjectMessage {
                data: message.clone(),
                origin: ReturnPath::Local,
            });
            return Ok(());
        }

        let connection = self
            .engine
            .outbound_connection()
            .filter(|c| !c.is_closed())
            .ok_or(NetworkError::NotConnected)?;
        self.write_framed(&connection, message)
    }

    /// Reply along a received message's return path.
    ///
    /// # Errors
    ///
    /// [`NetworkError::NotConnected`] if the producing connection has
    /// closed since; [`NetworkError::Encode`] on codec failure.
    pub fn reply(&self, origin: &ReturnPath, message: &M) -> Result<(), NetworkError> {
        match origin {
            ReturnPath::Local => {
                self.messages.publish(ObjectMessage {
                    data: message.clone(),
                    origin: ReturnPath::Local,
                });
                Ok(())
            }
            ReturnPath::Remote(connection) => self.write_framed(connection, message),
        }
    }

    /// Broadcast to every connected follower. Leader only.
    ///
    /// The message is encoded once and queued on each live inbound
    /// connection; returns how many connections it was queued for.
    ///
    /// # Errors
    ///
    /// [`NetworkError::NotLeader`] when not leading;
    /// [`NetworkError::Encode`] on codec failure.
    pub fn send_to_all(&self, message: &M) -> Result<usize, NetworkError> {
        if !self.engine.is_leader() {
            return Err(NetworkError::NotLeader);
        }
        let frame = self.encode_framed(message)?;
        let mut delivered = 0;
        for connection in self.engine.inbound_connections() {
            if connection.send(frame.clone()).is_ok() {
                delivered += 1;
            }
        }
        Ok(delivered)
    }

    /// Subscribe to every decoded message on this network.
    pub fn on_message(&self) -> EventSubscription<ObjectMessage<M>> {
        self.messages.subscribe()
    }

    /// Subscribe to messages from one specific connection.
    pub fn on_connection_message(
        &self,
        connection: &Connection,
    ) -> EventSubscription<ObjectMessage<M>> {
        self.peer_hubs
            .borrow_mut()
            .entry(connection.id())
            .or_default()
            .subscribe()
    }

    /// Subscribe to error notifications (engine conditions and per-frame
    /// decode failures).
    pub fn on_error(&self) -> EventSubscription<NetworkError> {
        self.errors.subscribe()
    }

    /// Subscribe to leadership announcements.
    pub fn on_leader(&self) -> EventSubscription<()> {
        self.engine.on_leader()
    }

    /// Subscribe to follower-connected announcements.
    pub fn on_connect(&self) -> EventSubscription<Rc<Connection>> {
        self.engine.on_connect()
    }

    /// Subscribe to the leader's accepted connections.
    pub fn on_connection(&self) -> EventSubscription<Rc<Connection>> {
        self.engine.on_connection()
    }

    /// Subscribe to readiness events.
    pub fn on_ready(&self) -> EventSubscription<Role> {
        self.engine.on_ready()
    }

    fn encode_framed(&self, message: &M) -> Result<Vec<u8>, NetworkError> {
        let payload = self
            .codec
            .encode(message)
            .map_err(|e| NetworkError::Encode(e.to_string()))?;
        encode_frame(&payload).map_err(|e| NetworkError::Encode(e.to_string()))
    }

    fn write_framed(&self, connection: &Connection, message: &M) -> Result<(), NetworkError> {
        let frame = self.encode_framed(message)?;
        connection
            .send(frame)
            .map_err(|_| NetworkError::NotConnected)
    }
}

/// Attaches a decode pump to every connection the engine surfaces and
/// forwards engine errors onto the network error hub.
#[allow(clippy::too_many_arguments)]
async fn router_task<M, C, T>(
    mut connect: EventSubscription<Rc<Connection>>,
    mut connection: EventSubscription<Rc<Connection>>,
    mut engine_errors: EventSubscription<EngineError>,
    codec: C,
    tasks: T,
    messages: EventHub<ObjectMessage<M>>,
    errors: EventHub<NetworkError>,
    peer_hubs: PeerHubs<M>,
) where
    M: DeserializeOwned + Clone + 'static,
    C: MessageCodec,
    T: TaskProvider + 'static,
{
    loop {
        tokio::select! {
            outbound = connect.next() => match outbound {
                Some(conn) => attach_pump(&tasks, conn, codec.clone(), &messages, &errors, &peer_hubs),
                None => break,
            },

            inbound = connection.next() => match inbound {
                Some(conn) => attach_pump(&tasks, conn, codec.clone(), &messages, &errors, &peer_hubs),
                None => break,
            },

            reported = engine_errors.next() => match reported {
                Some(error) => {
                    errors.publish(NetworkError::Engine(error));
                }
                None => break,
            },
        }
    }
}

fn attach_pump<M, C, T>(
    tasks: &T,
    connection: Rc<Connection>,
    codec: C,
    messages: &EventHub<ObjectMessage<M>>,
    errors: &EventHub<NetworkError>,
    peer_hubs: &PeerHubs<M>,
) where
    M: DeserializeOwned + Clone + 'static,
    C: MessageCodec,
    T: TaskProvider,
{
    let name = format!("decode-pump-{}", connection.id());
    let pump = decode_pump(
        connection,
        codec,
        messages.clone(),
        errors.clone(),
        peer_hubs.clone(),
    );
    tasks.spawn_task(&name, pump);
}

/// Per-connection pipeline: chunks → frames → codec → message hubs.
///
/// A frame that fails to decode is reported and skipped; the pump keeps
/// going with the next frame.
async fn decode_pump<M, C>(
    connection: Rc<Connection>,
    codec: C,
    messages: EventHub<ObjectMessage<M>>,
    errors: EventHub<NetworkError>,
    peer_hubs: PeerHubs<M>,
) where
    M: DeserializeOwned + Clone + 'static,
    C: MessageCodec,
{
    let Some(mut incoming) = connection.take_incoming() else {
        tracing::warn!(
            connection = connection.id(),
            "incoming stream already claimed; decode pump not attached"
        );
        return;
    };

    let peer_hub = peer_hubs
        .borrow_mut()
        .entry(connection.id())
        .or_default()
        .clone();

    let mut decoder = FrameDecoder::new();
    while let Some(chunk) = incoming.recv().await {
        for frame in decoder.feed(&chunk) {
            match codec.decode::<M>(&frame) {
                Ok(data) => {
                    let message = ObjectMessage {
                        data,
                        origin: ReturnPath::Remote(connection.clone()),
                    };
                    peer_hub.publish(message.clone());
                    messages.publish(message);
                }
                Err(error) => {
                    tracing::warn!(
                        connection = connection.id(),
                        error = %error,
                        "dropping undecodable frame"
                    );
                    errors.publish(NetworkError::Decode(error.to_string()));
                }
            }
        }
    }

    peer_hubs.borrow_mut().remove(&connection.id());
}
