//! Streaming decode of a version-2 pack into the object store.

use std::collections::HashMap;

use flate2::{Decompress, FlushDecompress, Status};
use treeup_hash::{hex, Hasher};

use crate::entry::parse_entry_header;
use crate::store::ObjectStore;
use crate::{PackError, PACK_HEADER_SIZE, PACK_SIGNATURE, PACK_VERSION};

/// Decode a complete pack stream into `store`.
///
/// Verifies the `PACK` signature, version, SHA-1 trailer, and that the
/// number of decoded entries matches the header count. Returns the number
/// of entries decoded.
pub fn decode_pack(data: &[u8], store: &mut ObjectStore) -> Result<u32, PackError> {
    if data.len() < PACK_HEADER_SIZE + 20 {
        return Err(PackError::InvalidHeader("pack data too small".into()));
    }
    if &data[0..4] != PACK_SIGNATURE {
        return Err(PackError::InvalidHeader("missing PACK signature".into()));
    }
    let version = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
    if version != PACK_VERSION {
        return Err(PackError::UnsupportedVersion(version));
    }
    let count = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);

    // The trailer hashes every byte before it.
    let body_end = data.len() - 20;
    let computed = Hasher::digest(&data[..body_end])?;
    if computed.as_bytes() != &data[body_end..] {
        return Err(PackError::ChecksumMismatch {
            expected: hex::encode(&data[body_end..]),
            actual: computed.to_hex(),
        });
    }

    // Pack offsets of decoded entries, for ofs-delta base lookup. A
    // duplicate object keeps its first index, so the offset of the skipped
    // copy still resolves.
    let mut by_offset: HashMap<u64, usize> = HashMap::new();

    let mut pos = PACK_HEADER_SIZE;
    let mut decoded = 0u32;

    while pos < body_end && decoded < count {
        let entry_offset = pos as u64;
        let header = parse_entry_header(&data[pos..body_end], entry_offset)?;
        pos += header.header_len;

        let base_index = match header.base_offset {
            Some(offset) => Some(*by_offset.get(&offset).ok_or(PackError::CorruptEntry {
                offset: entry_offset,
                reason: format!("ofs-delta base at offset {offset} not found"),
            })?),
            None => None,
        };

        let payload = inflate_entry(&data[pos..body_end], header.size, entry_offset, &mut pos)?;

        let index = store.insert_pack_entry(
            header.kind,
            entry_offset,
            base_index,
            header.base_id,
            payload,
        )?;
        by_offset.insert(entry_offset, index);
        decoded += 1;
    }

    if decoded != count {
        return Err(PackError::CountMismatch {
            expected: count,
            actual: decoded,
        });
    }

    store.seal_spill()?;
    Ok(decoded)
}

/// Inflate one zlib stream starting at `input[0]`, advancing `pos` by the
/// number of compressed bytes consumed.
fn inflate_entry(
    input: &[u8],
    expected_size: usize,
    entry_offset: u64,
    pos: &mut usize,
) -> Result<Vec<u8>, PackError> {
    let corrupt = |reason: &str| PackError::CorruptEntry {
        offset: entry_offset,
        reason: reason.into(),
    };

    let mut inflater = Decompress::new(true);
    let mut out = Vec::with_capacity(expected_size.max(64));
    let mut consumed = 0usize;

    loop {
        let in_before = inflater.total_in();
        let out_before = inflater.total_out();
        let status = inflater
            .decompress_vec(&input[consumed..], &mut out, FlushDecompress::None)
            .map_err(|_| corrupt("zlib stream failure"))?;
        consumed += (inflater.total_in() - in_before) as usize;

        match status {
            Status::StreamEnd => break,
            Status::Ok | Status::BufError => {
                if out.len() == out.capacity() {
                    out.reserve(16 * 1024);
                } else if inflater.total_in() == in_before && inflater.total_out() == out_before {
                    return Err(corrupt("truncated zlib stream"));
                }
            }
        }
    }

    if out.len() != expected_size {
        return Err(corrupt(&format!(
            "inflated size mismatch: header says {expected_size}, got {}",
            out.len()
        )));
    }

    *pos += consumed;
    Ok(out)
}
