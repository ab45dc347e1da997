//! TLS client sessions.
//!
//! Certificates are verified against the webpki root set. Session
//! resumption is disabled so repeated commands negotiate identically.

use std::net::TcpStream;
use std::sync::Arc;

use rustls::client::Resumption;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, RootCertStore, StreamOwned};

use crate::TransportError;

pub type TlsStream = StreamOwned<ClientConnection, TcpStream>;

/// Wrap a connected TCP stream in a TLS client session for `host`.
pub fn wrap(tcp: TcpStream, host: &str) -> Result<TlsStream, TransportError> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let mut config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    config.resumption = Resumption::disabled();

    let server_name = ServerName::try_from(host.to_string())
        .map_err(|_| TransportError::InvalidServerName(host.to_string()))?;
    let session = ClientConnection::new(Arc::new(config), server_name)?;
    Ok(StreamOwned::new(session, tcp))
}
