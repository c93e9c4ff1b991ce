//! Opening byte streams to a server.
//!
//! The session never dials sockets itself; it asks a [`Connector`] for a
//! stream. [`TcpConnector`] is the production implementation and
//! [`MemoryConnector`] hands out pre-made in-memory pipes for tests and
//! embedding.

use std::collections::VecDeque;
use std::future::Future;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};
use tokio::net::TcpStream;

use crate::framing::FrameError;

/// Transport-level failures: recoverable, the caller may reconnect.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to connect to {host}:{port}: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("connecting to {host}:{port} timed out after {timeout:?}")]
    ConnectTimeout {
        host: String,
        port: u16,
        timeout: Duration,
    },

    #[error("write timed out after {0:?}")]
    WriteTimeout(Duration),

    /// The server went quiet while a reply was owed.
    #[error("server did not respond within {0:?}")]
    ResponseTimeout(Duration),

    #[error("connection closed by peer")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("framing error: {0}")]
    Frame(#[from] FrameError),
}

/// Source of byte streams to a `host:port`.
pub trait Connector: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    fn connect(
        &self,
        host: &str,
        port: u16,
    ) -> impl Future<Output = io::Result<Self::Stream>> + Send;
}

/// Dial with an upper bound on how long the attempt may take.
pub async fn connect_with_timeout<C: Connector>(
    connector: Arc<C>,
    host: String,
    port: u16,
    timeout: Duration,
) -> Result<C::Stream, TransportError> {
    tracing::debug!(%host, port, ?timeout, "Opening transport");
    let attempt = tokio::time::timeout(timeout, connector.connect(&host, port)).await;
    match attempt {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(source)) => Err(TransportError::Connect { host, port, source }),
        Err(_) => Err(TransportError::ConnectTimeout {
            host,
            port,
            timeout,
        }),
    }
}

/// Plain TCP with `TCP_NODELAY`, since the protocol is many small frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    type Stream = TcpStream;

    fn connect(&self, host: &str, port: u16) -> impl Future<Output = io::Result<TcpStream>> + Send {
        let addr = format!("{host}:{port}");
        async move {
            let stream = TcpStream::connect(addr).await?;
            stream.set_nodelay(true)?;
            Ok(stream)
        }
    }
}

/// Hands out queued in-memory streams, one per `connect` call.
///
/// Once the queue is empty further attempts fail with `ConnectionRefused`.
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    streams: Arc<Mutex<VecDeque<DuplexStream>>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a pipe, queue the client end, and return the server end.
    pub fn push_pipe(&self, buffer: usize) -> DuplexStream {
        let (client, server) = tokio::io::duplex(buffer);
        self.push(client);
        server
    }

    pub fn push(&self, stream: DuplexStream) {
        if let Ok(mut streams) = self.streams.lock() {
            streams.push_back(stream);
        }
    }

    /// Streams still waiting to be handed out.
    pub fn pending(&self) -> usize {
        self.streams.lock().map(|s| s.len()).unwrap_or(0)
    }
}

impl Connector for MemoryConnector {
    type Stream = DuplexStream;

    fn connect(&self, host: &str, port: u16) -> impl Future<Output = io::Result<DuplexStream>> + Send {
        let next = self.streams.lock().ok().and_then(|mut s| s.pop_front());
        let target = format!("{host}:{port}");
        async move {
            next.ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    format!("no in-memory stream queued for {target}"),
                )
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// A connector whose attempts never complete.
    struct BlackHole;

    impl Connector for BlackHole {
        type Stream = DuplexStream;

        fn connect(&self, _: &str, _: u16) -> impl Future<Output = io::Result<DuplexStream>> + Send {
            std::future::pending()
        }
    }

    #[tokio::test]
    async fn test_tcp_connector_reaches_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(b"hi").await.unwrap();
        });

        let mut stream = connect_with_timeout(
            Arc::new(TcpConnector),
            "127.0.0.1".to_string(),
            port,
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert!(stream.nodelay().unwrap());

        let mut buf = [0u8; 2];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hi");
    }

    #[tokio::test]
    async fn test_refused_connection_is_connect_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = connect_with_timeout(
            Arc::new(TcpConnector),
            "127.0.0.1".to_string(),
            port,
            Duration::from_secs(5),
        )
        .await;
        assert!(matches!(result, Err(TransportError::Connect { .. })));
    }

    #[tokio::test]
    async fn test_connect_timeout() {
        let result = connect_with_timeout(
            Arc::new(BlackHole),
            "10.255.255.1".to_string(),
            3678,
            Duration::from_millis(50),
        )
        .await;
        assert!(matches!(
            result,
            Err(TransportError::ConnectTimeout { port: 3678, .. })
        ));
    }

    #[tokio::test]
    async fn test_memory_connector_hands_out_queued_pipes() {
        let connector = MemoryConnector::new();
        let mut server = connector.push_pipe(64);
        assert_eq!(connector.pending(), 1);

        let mut client = connector.connect("localhost", 1).await.unwrap();
        assert_eq!(connector.pending(), 0);

        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        let err = connector.connect("localhost", 1).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionRefused);
    }
}
