//! Pack entry header parsing.

use treeup_hash::ObjectId;

use crate::store::EntryKind;
use crate::PackError;

/// A decoded entry header: kind, inflated size, and the delta base
/// reference when the entry is a delta.
#[derive(Debug, Clone)]
pub struct EntryHeader {
    pub kind: EntryKind,
    pub size: usize,
    /// Absolute pack offset of the base (ofs-delta only).
    pub base_offset: Option<u64>,
    /// Hash of the base object (ref-delta only).
    pub base_id: Option<ObjectId>,
    /// Bytes consumed by the header; compressed data follows.
    pub header_len: usize,
}

/// Parse an entry header starting at `data[0]`, which sits at absolute
/// offset `entry_offset` in the pack.
pub fn parse_entry_header(data: &[u8], entry_offset: u64) -> Result<EntryHeader, PackError> {
    let corrupt = |reason: &str| PackError::CorruptEntry {
        offset: entry_offset,
        reason: reason.into(),
    };

    if data.is_empty() {
        return Err(corrupt("truncated entry header"));
    }

    let mut pos = 0;
    let mut byte = data[pos];
    pos += 1;

    // First byte: bits 6-4 are the type, bits 3-0 the low size bits.
    let type_num = (byte >> 4) & 0x07;
    let mut size: u64 = (byte & 0x0f) as u64;
    let mut shift = 4;

    while byte & 0x80 != 0 {
        if pos >= data.len() {
            return Err(corrupt("truncated entry size"));
        }
        byte = data[pos];
        pos += 1;
        size |= ((byte & 0x7f) as u64) << shift;
        shift += 7;
    }

    let kind = match type_num {
        1 => EntryKind::Commit,
        2 => EntryKind::Tree,
        3 => EntryKind::Blob,
        4 => EntryKind::Tag,
        6 => EntryKind::OfsDelta,
        7 => EntryKind::RefDelta,
        other => return Err(corrupt(&format!("unknown object type {other}"))),
    };

    let mut base_offset = None;
    let mut base_id = None;

    match kind {
        EntryKind::OfsDelta => {
            // Variable-length negative offset, with an implicit +1 at each
            // continuation step.
            if pos >= data.len() {
                return Err(corrupt("truncated ofs-delta offset"));
            }
            let mut byte = data[pos];
            pos += 1;
            let mut distance = (byte & 0x7f) as u64;
            while byte & 0x80 != 0 {
                if pos >= data.len() {
                    return Err(corrupt("truncated ofs-delta offset"));
                }
                distance += 1;
                byte = data[pos];
                pos += 1;
                distance = (distance << 7) + (byte & 0x7f) as u64;
            }
            if distance == 0 || distance > entry_offset {
                return Err(corrupt("ofs-delta base lies at or after the delta"));
            }
            base_offset = Some(entry_offset - distance);
        }
        EntryKind::RefDelta => {
            if pos + 20 > data.len() {
                return Err(corrupt("truncated ref-delta base hash"));
            }
            base_id = Some(
                ObjectId::from_bytes(&data[pos..pos + 20])
                    .map_err(|_| corrupt("bad ref-delta base hash"))?,
            );
            pos += 20;
        }
        _ => {}
    }

    Ok(EntryHeader {
        kind,
        size: size as usize,
        base_offset,
        base_id,
        header_len: pos,
    })
}

/// Encode an entry header (type + size varint). Used to build packs in
/// tests; deltas additionally need their base reference appended.
pub fn encode_entry_header(type_num: u8, size: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(10);
    let mut s = size;

    let mut c = (type_num << 4) | (s & 0x0f) as u8;
    s >>= 4;

    while s > 0 {
        buf.push(c | 0x80);
        c = (s & 0x7f) as u8;
        s >>= 7;
    }
    buf.push(c);
    buf
}

/// Encode an ofs-delta distance (the negative offset to the base).
pub fn encode_ofs_delta_offset(distance: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(10);
    let mut d = distance;

    buf.push((d & 0x7f) as u8);
    d >>= 7;
    while d > 0 {
        d -= 1;
        buf.push(0x80 | (d & 0x7f) as u8);
        d >>= 7;
    }
    buf.reverse();
    buf
}
