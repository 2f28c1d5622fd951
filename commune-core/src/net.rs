//! Socket provider abstraction over path-addressed stream sockets.
//!
//! The election engine never touches `tokio::net` directly: it binds, dials,
//! and unlinks through [`SocketProvider`], which lets tests substitute
//! refusing or scripted implementations without a real filesystem socket.

use async_trait::async_trait;
use std::io;
use std::path::Path;
use tokio::io::{AsyncRead, AsyncWrite};

/// Provider trait for creating local stream-socket connections and listeners.
///
/// Addresses are filesystem paths: a Unix domain socket path on Unix, the
/// equivalent named-pipe path on Windows. Single-threaded design, no `Send`
/// bounds. `Clone` allows sharing one provider across engine and lock tasks.
#[async_trait(?Send)]
pub trait SocketProvider: Clone {
    /// The connected stream type for this provider.
    type Stream: AsyncRead + AsyncWrite + Unpin + 'static;
    /// The listener type for this provider.
    type Listener: SocketListener<Stream = Self::Stream> + 'static;

    /// Create a listener bound at the given socket path.
    async fn bind(&self, path: &Path) -> io::Result<Self::Listener>;

    /// Connect to the socket at the given path.
    async fn connect(&self, path: &Path) -> io::Result<Self::Stream>;

    /// Remove a (possibly stale) socket file at the given path.
    ///
    /// Callers decide how to treat `NotFound`; the provider reports it as-is.
    async fn unlink(&self, path: &Path) -> io::Result<()>;
}

/// Trait for listeners that accept incoming local connections.
#[async_trait(?Send)]
pub trait SocketListener {
    /// The stream type this listener produces.
    type Stream: AsyncRead + AsyncWrite + Unpin + 'static;

    /// Accept a single incoming connection.
    ///
    /// The returned string is a display label for the remote end; local
    /// sockets rarely carry a meaningful peer address.
    async fn accept(&self) -> io::Result<(Self::Stream, String)>;
}

/// Real Unix-domain-socket implementation backed by Tokio.
#[cfg(unix)]
#[derive(Debug, Clone, Default)]
pub struct TokioSocketProvider;

#[cfg(unix)]
impl TokioSocketProvider {
    /// Create a new Tokio socket provider.
    pub fn new() -> Self {
        Self
    }
}

#[cfg(unix)]
#[async_trait(?Send)]
impl SocketProvider for TokioSocketProvider {
    type Stream = tokio::net::UnixStream;
    type Listener = TokioUnixListener;

    async fn bind(&self, path: &Path) -> io::Result<Self::Listener> {
        let listener = tokio::net::UnixListener::bind(path)?;
        Ok(TokioUnixListener { inner: listener })
    }

    async fn connect(&self, path: &Path) -> io::Result<Self::Stream> {
        tokio::net::UnixStream::connect(path).await
    }

    async fn unlink(&self, path: &Path) -> io::Result<()> {
        tokio::fs::remove_file(path).await
    }
}

/// Wrapper for Tokio's `UnixListener` to implement [`SocketListener`].
#[cfg(unix)]
#[derive(Debug)]
pub struct TokioUnixListener {
    inner: tokio::net::UnixListener,
}

#[cfg(unix)]
#[async_trait(?Send)]
impl SocketListener for TokioUnixListener {
    type Stream = tokio::net::UnixStream;

    async fn accept(&self) -> io::Result<(Self::Stream, String)> {
        let (stream, addr) = self.inner.accept().await?;
        // Unix client sockets are usually unnamed; fall back to debug form.
        let label = addr
            .as_pathname()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "unnamed".to_string());
        Ok((stream, label))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn bind_connect_accept_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("roundtrip.sock");
        let provider = TokioSocketProvider::new();

        let listener = provider.bind(&path).await.expect("bind");
        let (client, server) = tokio::join!(provider.connect(&path), listener.accept());
        let mut client = client.expect("connect");
        let (mut server, _label) = server.expect("accept");

        client.write_all(b"ping").await.expect("write");
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).await.expect("read");
        assert_eq!(&buf, b"ping");
    }

    #[tokio::test]
    async fn bind_fails_on_existing_socket_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("stale.sock");
        let provider = TokioSocketProvider::new();

        let _listener = provider.bind(&path).await.expect("first bind");
        let second = provider.bind(&path).await;
        assert!(second.is_err(), "second bind on same path must fail");
    }

    #[tokio::test]
    async fn unlink_reports_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let provider = TokioSocketProvider::new();

        let err = provider
            .unlink(&dir.path().join("missing.sock"))
            .await
            .expect_err("unlink of missing file");
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }
}
