//! One live socket with its role context.
//!
//! A [`Connection`] wraps a stream accepted by the leader (`Inbound`) or
//! dialed by a follower (`Outbound`). The stream itself is owned exclusively
//! by a background I/O task that drains an outgoing byte queue and forwards
//! incoming chunks; the `Connection` value is the cheap, `Rc`-shared handle
//! the rest of the system passes around.
//!
//! The incoming chunk stream is claimed once via [`Connection::take_incoming`];
//! later claimants get `None`. Chunks buffer in the channel until claimed, so
//! no bytes are lost between `accept` and the object layer attaching its
//! decode pump.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::io;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{Notify, mpsc};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

const READ_CHUNK_SIZE: usize = 4096;

/// Which side of the link this process is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Accepted by this process while leading.
    Inbound,
    /// Dialed by this process while following.
    Outbound,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Inbound => write!(f, "inbound"),
            Direction::Outbound => write!(f, "outbound"),
        }
    }
}

/// Writing to a connection whose I/O task has exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("connection is closed")]
pub struct ConnectionClosed;

/// Handle to one live socket.
pub struct Connection {
    id: u64,
    direction: Direction,
    peer: String,
    outgoing_tx: mpsc::UnboundedSender<Vec<u8>>,
    incoming_rx: RefCell<Option<mpsc::UnboundedReceiver<Vec<u8>>>>,
    close_tx: mpsc::UnboundedSender<()>,
    closed: Cell<bool>,
    close_notify: Notify,
    last_error: RefCell<Option<String>>,
}

impl Connection {
    /// Wrap a stream, returning the shared handle and the I/O task future.
    ///
    /// The caller spawns the future; it resolves when the connection ends
    /// (EOF, close request, I/O error, or handle dropped) and its result
    /// distinguishes clean closure from an error.
    pub(crate) fn open<S>(
        direction: Direction,
        peer: String,
        stream: S,
    ) -> (Rc<Self>, impl Future<Output = io::Result<()>>)
    where
        S: AsyncRead + AsyncWrite + Unpin + 'static,
    {
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let (close_tx, close_rx) = mpsc::unbounded_channel();

        let connection = Rc::new(Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            direction,
            peer,
            outgoing_tx,
            incoming_rx: RefCell::new(Some(incoming_rx)),
            close_tx,
            closed: Cell::new(false),
            close_notify: Notify::new(),
            last_error: RefCell::new(None),
        });

        let io = connection_io(stream, incoming_tx, outgoing_rx, close_rx);
        (connection, io)
    }

    /// Process-unique connection id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Role context of this connection.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Display label for the remote end.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Queue raw bytes for writing.
    ///
    /// Returns without blocking; the I/O task drains the queue in order.
    ///
    /// # Errors
    ///
    /// [`ConnectionClosed`] once the connection has ended.
    pub fn send(&self, bytes: Vec<u8>) -> Result<(), ConnectionClosed> {
        if self.closed.get() {
            return Err(ConnectionClosed);
        }
        self.outgoing_tx.send(bytes).map_err(|_| ConnectionClosed)
    }

    /// Claim the incoming chunk stream.
    ///
    /// The first caller receives the receiver; everyone after gets `None`.
    pub fn take_incoming(&self) -> Option<mpsc::UnboundedReceiver<Vec<u8>>> {
        self.incoming_rx.borrow_mut().take()
    }

    /// Ask the I/O task to shut the connection down.
    pub fn close(&self) {
        let _ = self.close_tx.send(());
    }

    /// Whether the connection has ended.
    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }

    /// Wait until the connection ends.
    ///
    /// Resolves immediately if it already has.
    pub async fn closed(&self) {
        loop {
            if self.closed.get() {
                return;
            }
            let notified = self.close_notify.notified();
            if self.closed.get() {
                return;
            }
            notified.await;
        }
    }

    /// The I/O error that ended the connection, if it was not a clean close.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.borrow().clone()
    }

    /// Record the connection's end. Called by the engine when the I/O task
    /// resolves.
    pub(crate) fn mark_closed(&self, error: Option<String>) {
        if let Some(message) = error {
            tracing::debug!(
                connection = self.id,
                direction = %self.direction,
                error = %message,
                "connection ended with error"
            );
            *self.last_error.borrow_mut() = Some(message);
        } else {
            tracing::debug!(connection = self.id, direction = %self.direction, "connection closed");
        }
        self.closed.set(true);
        self.close_notify.notify_waiters();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("direction", &self.direction)
            .field("peer", &self.peer)
            .field("closed", &self.closed.get())
            .finish()
    }
}

/// The connection's I/O task: owns the stream, select!s between draining the
/// outgoing queue and reading chunks.
async fn connection_io<S>(
    mut stream: S,
    incoming_tx: mpsc::UnboundedSender<Vec<u8>>,
    mut outgoing_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    mut close_rx: mpsc::UnboundedReceiver<()>,
) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + 'static,
{
    let mut read_buf = vec![0u8; READ_CHUNK_SIZE];
    loop {
        tokio::select! {
            _ = close_rx.recv() => {
                return Ok(());
            }

            queued = outgoing_rx.recv() => match queued {
                Some(bytes) => stream.write_all(&bytes).await?,
                // Every handle dropped; nothing more can be sent.
                None => return Ok(()),
            },

            read = stream.read(&mut read_buf) => match read? {
                0 => return Ok(()),
                n => {
                    // Receiver not yet claimed or already dropped is fine:
                    // chunks buffer until claimed, or fall on the floor once
                    // the claimant is gone.
                    let _ = incoming_tx.send(read_buf[..n].to_vec());
                }
            },
        }
    }
}
