//! Transport: open a byte stream to host:port. TLS for the real endpoints, plain TCP for local servers.

use std::future::Future;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tweetstream_core::chunked::ChunkedError;

/// Transport-class failure. Always recoverable by reconnecting.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(#[source] std::io::Error),
    #[error("invalid server name {0:?}")]
    InvalidServerName(String),
    #[error("TLS handshake failed: {0}")]
    Tls(#[source] std::io::Error),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("timed out")]
    Timeout,
    #[error("stream ended")]
    Closed,
    #[error("connection closed before the response head was complete")]
    IncompleteHead,
    #[error("malformed response: {0}")]
    Protocol(String),
    #[error("chunked body: {0}")]
    Chunked(#[from] ChunkedError),
}

/// Opens one connection per attempt.
pub trait Connector: Send + Sync {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send;

    fn connect(
        &self,
        host: &str,
        port: u16,
    ) -> impl Future<Output = Result<Self::Stream, TransportError>> + Send;
}

/// TLS over TCP, verified against the webpki root set.
#[derive(Clone)]
pub struct TlsConnector {
    inner: tokio_rustls::TlsConnector,
}

impl TlsConnector {
    pub fn new() -> Self {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        Self::with_config(Arc::new(config))
    }

    /// Use a caller-built rustls config (custom roots, client certs).
    pub fn with_config(config: Arc<ClientConfig>) -> Self {
        Self {
            inner: tokio_rustls::TlsConnector::from(config),
        }
    }
}

impl Default for TlsConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl Connector for TlsConnector {
    type Stream = TlsStream<TcpStream>;

    async fn connect(&self, host: &str, port: u16) -> Result<Self::Stream, TransportError> {
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|_| TransportError::InvalidServerName(host.to_string()))?;
        let tcp = TcpStream::connect((host, port))
            .await
            .map_err(TransportError::Connect)?;
        tcp.set_nodelay(true)?;
        self.inner
            .connect(server_name, tcp)
            .await
            .map_err(TransportError::Tls)
    }
}

/// Unencrypted TCP. For local proxies and test servers.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainConnector;

impl Connector for PlainConnector {
    type Stream = TcpStream;

    async fn connect(&self, host: &str, port: u16) -> Result<Self::Stream, TransportError> {
        let tcp = TcpStream::connect((host, port))
            .await
            .map_err(TransportError::Connect)?;
        tcp.set_nodelay(true)?;
        Ok(tcp)
    }
}
