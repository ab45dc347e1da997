//! The version-2 wire protocol, as a working-tree synchronizer needs it:
//! pkt-line framing, the `ls-refs` and three `fetch` request bodies
//! (clone, pull, repair), reference selection including the `quarterly`
//! pseudo-branch, and extraction of the pack stream from a fetch response.

pub mod commands;
pub mod pktline;
pub mod refs;
pub mod sideband;

use treeup_hash::HashError;

/// Errors produced by protocol encoding and response parsing.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid pkt-line: {0}")]
    InvalidPktLine(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("server does not support the version 2 wire protocol")]
    VersionUnsupported,

    #[error("{refname} not found in the advertised references")]
    RefNotFound { refname: String },

    #[error("server error: {0}")]
    ServerError(String),

    #[error("too many files to repair ({size} bytes of wants) -- please re-clone the repository")]
    RepairTooLarge { size: usize },

    #[error(transparent)]
    Hash(#[from] HashError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
