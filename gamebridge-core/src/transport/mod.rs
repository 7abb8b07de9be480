//! Transport layer abstraction for TCP and mutual-TLS streams

pub mod socket_tuning;
pub mod tcp;
pub mod tls;

use std::io;
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

pub type BoxedStream = Pin<Box<dyn AsyncStream>>;

/// How the bridge terminates connections. The shipped binary always runs
/// TLS with required client certificates; TCP exists for embedding and
/// tests.
#[derive(Debug, Clone, Default)]
pub enum TransportConfig {
    #[default]
    Tcp,
    Tls(tls::TlsTransportConfig),
}

/// Server-side stream upgrader, built once at startup so certificate
/// problems surface before the listener accepts anything.
pub enum Acceptor {
    Tcp,
    Tls(tokio_rustls::TlsAcceptor),
}

impl Acceptor {
    pub fn from_config(config: &TransportConfig) -> io::Result<Self> {
        match config {
            TransportConfig::Tcp => Ok(Acceptor::Tcp),
            TransportConfig::Tls(tls_config) => {
                let server_config = tls::create_server_config(tls_config)?;
                Ok(Acceptor::Tls(tokio_rustls::TlsAcceptor::from(server_config)))
            }
        }
    }

    /// Upgrade a freshly accepted TCP stream. TLS handshake failures come
    /// back as errors; the caller drops the connection without a reply.
    pub async fn upgrade(&self, tcp_stream: TcpStream) -> io::Result<BoxedStream> {
        socket_tuning::configure_socket_silent(&tcp_stream);
        match self {
            Acceptor::Tcp => Ok(Box::pin(tcp_stream)),
            Acceptor::Tls(acceptor) => {
                let tls_stream = acceptor.accept(tcp_stream).await?;
                Ok(Box::pin(tls_stream))
            }
        }
    }
}

/// Dial a bridge endpoint using the given transport.
pub async fn connect(config: &TransportConfig, addr: &str) -> io::Result<BoxedStream> {
    match config {
        TransportConfig::Tcp => tcp::connect(addr).await,
        TransportConfig::Tls(tls_config) => tls::connect(addr, tls_config).await,
    }
}
