//! Mutual-TLS transport using rustls
//!
//! The bridge requires certificate presentation on both sides: the server
//! validates client certificates against the configured CA, and the client
//! presents its own certificate when dialing.

use super::socket_tuning::configure_socket_silent;
use super::BoxedStream;
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use rustls_pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls_pemfile::{certs, private_key};
use std::fs::File;
use std::io::{self, BufReader, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

/// Certificate material for one side of a bridge connection. All three
/// paths are mandatory; the protocol has no anonymous mode.
#[derive(Debug, Clone)]
pub struct TlsTransportConfig {
    /// CA bundle the peer's certificate chain must validate against
    pub ca_path: PathBuf,
    /// Own certificate chain (PEM)
    pub cert_path: PathBuf,
    /// Own private key (PEM)
    pub key_path: PathBuf,
    /// Server name for SNI (client-side); defaults to the host part of the
    /// dialed address
    pub server_name: Option<String>,
}

fn load_certs(path: &Path) -> io::Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path)
        .map_err(|e| io::Error::new(e.kind(), format!("{}: {e}", path.display())))?;
    let mut reader = BufReader::new(file);
    certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| io::Error::new(ErrorKind::InvalidData, e))
}

fn load_private_key(path: &Path) -> io::Result<PrivateKeyDer<'static>> {
    let file = File::open(path)
        .map_err(|e| io::Error::new(e.kind(), format!("{}: {e}", path.display())))?;
    let mut reader = BufReader::new(file);
    private_key(&mut reader)?
        .ok_or_else(|| io::Error::new(ErrorKind::InvalidData, "no private key found"))
}

fn load_root_store(path: &Path) -> io::Result<RootCertStore> {
    let mut roots = RootCertStore::empty();
    for cert in load_certs(path)? {
        roots
            .add(cert)
            .map_err(|e| io::Error::new(ErrorKind::InvalidData, format!("invalid CA cert: {e}")))?;
    }
    Ok(roots)
}

pub fn create_server_config(config: &TlsTransportConfig) -> io::Result<Arc<ServerConfig>> {
    let roots = load_root_store(&config.ca_path)?;
    let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
        .build()
        .map_err(|e| {
            io::Error::new(ErrorKind::InvalidData, format!("client verifier: {e}"))
        })?;

    let certs = load_certs(&config.cert_path)?;
    let key = load_private_key(&config.key_path)?;

    let server_config = ServerConfig::builder()
        .with_client_cert_verifier(verifier)
        .with_single_cert(certs, key)
        .map_err(|e| io::Error::new(ErrorKind::InvalidData, format!("TLS config error: {e}")))?;

    Ok(Arc::new(server_config))
}

pub fn create_client_config(config: &TlsTransportConfig) -> io::Result<Arc<ClientConfig>> {
    let roots = load_root_store(&config.ca_path)?;
    let certs = load_certs(&config.cert_path)?;
    let key = load_private_key(&config.key_path)?;

    let client_config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_client_auth_cert(certs, key)
        .map_err(|e| io::Error::new(ErrorKind::InvalidData, format!("TLS config error: {e}")))?;

    Ok(Arc::new(client_config))
}

pub async fn connect(addr: &str, config: &TlsTransportConfig) -> io::Result<BoxedStream> {
    let client_config = create_client_config(config)?;
    let connector = TlsConnector::from(client_config);

    let tcp_stream = TcpStream::connect(addr).await?;
    configure_socket_silent(&tcp_stream);

    let host = config
        .server_name
        .clone()
        .unwrap_or_else(|| addr.split(':').next().unwrap_or("localhost").to_string());
    let server_name = ServerName::try_from(host)
        .map_err(|e| io::Error::new(ErrorKind::InvalidInput, format!("invalid server name: {e}")))?;

    let tls_stream = connector.connect(server_name, tcp_stream).await?;
    Ok(Box::pin(tls_stream))
}
