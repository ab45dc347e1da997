//! Pack stream decoding and object storage for treeup.
//!
//! A fetch response carries a version-2 pack: a 12-byte header, a sequence
//! of zlib-compressed entries (plain objects and ofs/ref deltas), and a
//! 20-byte SHA-1 trailer over everything before it. This crate decodes that
//! stream into an [`ObjectStore`] — an insertion-ordered array plus a
//! hash-keyed index — and resolves all delta entries into plain objects.
//!
//! In low-memory mode inflated payloads are spilled to a scratch file as
//! they are produced and read back on demand; objects synthesized by the
//! delta engine stay in memory.

mod decode;
pub mod delta;
mod entry;
mod file;
mod store;
#[cfg(test)]
pub(crate) mod tests_support;

pub use decode::decode_pack;
pub use entry::{encode_entry_header, encode_ofs_delta_offset, parse_entry_header, EntryHeader};
pub use file::MappedPack;
pub use store::{EntryKind, Object, ObjectStore, PayloadRef};

use treeup_hash::{HashError, ObjectId};

/// Magic bytes at the start of a pack stream.
pub const PACK_SIGNATURE: &[u8; 4] = b"PACK";

/// The only supported pack version.
pub const PACK_VERSION: u32 = 2;

/// Bytes of signature + version + object count.
pub const PACK_HEADER_SIZE: usize = 12;

/// Errors produced while decoding pack data or resolving deltas.
#[derive(Debug, thiserror::Error)]
pub enum PackError {
    #[error("invalid pack header: {0}")]
    InvalidHeader(String),

    #[error("unsupported pack version {0}")]
    UnsupportedVersion(u32),

    #[error("pack checksum mismatch: expected {expected}, computed {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("pack object count mismatch: header says {expected}, decoded {actual}")]
    CountMismatch { expected: u32, actual: u32 },

    #[error("corrupt pack entry at offset {offset}: {reason}")]
    CorruptEntry { offset: u64, reason: String },

    #[error("invalid delta at offset {offset}: {reason}")]
    InvalidDelta { offset: u64, reason: String },

    #[error("delta base object {0} is not available")]
    MissingBase(ObjectId),

    #[error(transparent)]
    Hash(#[from] HashError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
