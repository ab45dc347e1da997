//! Synthetic pack construction for unit tests.

use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use treeup_hash::Hasher;

use crate::entry::{encode_entry_header, encode_ofs_delta_offset};
use crate::{PACK_SIGNATURE, PACK_VERSION};

/// Builds a valid pack stream entry by entry, tracking offsets so tests
/// can wire up ofs-deltas.
pub struct PackBuilder {
    data: Vec<u8>,
    offsets: Vec<u64>,
}

impl PackBuilder {
    pub fn new() -> Self {
        let mut data = Vec::new();
        data.extend_from_slice(PACK_SIGNATURE);
        data.extend_from_slice(&PACK_VERSION.to_be_bytes());
        data.extend_from_slice(&0u32.to_be_bytes()); // patched in build()
        Self {
            data,
            offsets: Vec::new(),
        }
    }

    fn deflate(payload: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(payload).unwrap();
        encoder.finish().unwrap()
    }

    /// Append a plain entry (1 commit, 2 tree, 3 blob, 4 tag).
    pub fn plain(mut self, type_num: u8, payload: &[u8]) -> Self {
        self.offsets.push(self.data.len() as u64);
        self.data
            .extend_from_slice(&encode_entry_header(type_num, payload.len() as u64));
        self.data.extend_from_slice(&Self::deflate(payload));
        self
    }

    /// Append an ofs-delta whose base is the entry added `back` steps ago
    /// (1 = the previous entry).
    pub fn ofs_delta(mut self, back: usize, delta: &[u8]) -> Self {
        let offset = self.data.len() as u64;
        let base_offset = self.offsets[self.offsets.len() - back];
        self.offsets.push(offset);
        self.data
            .extend_from_slice(&encode_entry_header(6, delta.len() as u64));
        self.data
            .extend_from_slice(&encode_ofs_delta_offset(offset - base_offset));
        self.data.extend_from_slice(&Self::deflate(delta));
        self
    }

    /// Append a ref-delta against the given base hash.
    pub fn ref_delta(mut self, base: &treeup_hash::ObjectId, delta: &[u8]) -> Self {
        self.offsets.push(self.data.len() as u64);
        self.data
            .extend_from_slice(&encode_entry_header(7, delta.len() as u64));
        self.data.extend_from_slice(base.as_bytes());
        self.data.extend_from_slice(&Self::deflate(delta));
        self
    }

    /// Patch the object count, append the SHA-1 trailer, and return the
    /// finished pack bytes.
    pub fn build(mut self) -> Vec<u8> {
        let count = self.offsets.len() as u32;
        self.data[8..12].copy_from_slice(&count.to_be_bytes());
        let trailer = Hasher::digest(&self.data).unwrap();
        self.data.extend_from_slice(trailer.as_bytes());
        self.data
    }
}

/// Encode a delta-header varint.
pub fn delta_varint(mut value: u64) -> Vec<u8> {
    let mut buf = Vec::new();
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value > 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            return buf;
        }
    }
}

/// Build a delta that replaces the entire base with `literal` using insert
/// instructions (literal must be under 128 bytes).
pub fn replace_with(base_len: usize, literal: &[u8]) -> Vec<u8> {
    assert!(literal.len() < 128);
    let mut delta = delta_varint(base_len as u64);
    delta.extend_from_slice(&delta_varint(literal.len() as u64));
    if !literal.is_empty() {
        delta.push(literal.len() as u8);
        delta.extend_from_slice(literal);
    }
    delta
}
