//! Network transport for treeup.
//!
//! This crate owns the physical path to the repository server: TCP connect
//! (directly or through an HTTP CONNECT proxy), the TLS client session, and
//! the HTTP/1.1 request/response driver with Content-Length and chunked
//! decoding. Higher-level protocol logic lives in `treeup-protocol`.
//!
//! A connection is single-use: each command dials, sends one request, and
//! reads one complete response.

pub mod http;
mod progress;
mod proxy;
mod tcp;
mod tls;

pub use http::{HttpEndpoint, HttpResponse};
pub use progress::TransferProgress;
pub use proxy::ProxyConfig;

/// Errors that can occur on the wire below the git protocol.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("cannot resolve {host}: {source}")]
    Dns {
        host: String,
        source: std::io::Error,
    },

    #[error("cannot connect to {host}:{port}: {source}")]
    Connect {
        host: String,
        port: u16,
        source: std::io::Error,
    },

    #[error("cannot set socket option: {0}")]
    SocketOption(std::io::Error),

    #[error("TLS failure: {0}")]
    Tls(#[from] rustls::Error),

    #[error("invalid server name '{0}'")]
    InvalidServerName(String),

    #[error("connection closed by server")]
    Closed,

    #[error("server returned HTTP {status} for {context}")]
    Status { status: u16, context: String },

    #[error("malformed HTTP response: {0}")]
    Framing(String),

    #[error("proxy error: {0}")]
    Proxy(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
