//! Hash computation and object identity for treeup.
//!
//! The wire protocol treeup speaks is pinned to `object-format=sha1`, so
//! everything here is 20-byte SHA-1: the `ObjectId` type, lowercase hex
//! encoding/decoding, and object-hash computation over the canonical
//! `"<kind> <size>\0"` header.

mod error;
pub mod hasher;
pub mod hex;
mod oid;

pub use error::HashError;
pub use hasher::Hasher;
pub use oid::ObjectId;
