//! The delta engine: copy/insert interpretation and chain resolution.
//!
//! A delta payload starts with two variable-length integers (the base and
//! result sizes) followed by instructions. A set top bit means copy: bits
//! 0-3 select which of four offset bytes follow, bits 4-6 which of three
//! length bytes; a zero length means 65536. A clear top bit means insert:
//! the low seven bits count literal bytes that follow.

use treeup_hash::ObjectId;

use crate::store::ObjectStore;
use crate::PackError;

/// Read a variable-length integer (7 data bits per byte, bit 7 continues).
pub fn read_varint(data: &[u8], pos: &mut usize) -> Option<u64> {
    let mut value: u64 = 0;
    let mut shift = 0;
    loop {
        let byte = *data.get(*pos)?;
        *pos += 1;
        value |= ((byte & 0x7f) as u64) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            return Some(value);
        }
    }
}

/// Apply one delta to its base, producing the target bytes.
pub fn apply_delta(base: &[u8], delta: &[u8]) -> Result<Vec<u8>, PackError> {
    let invalid = |pos: usize, reason: String| PackError::InvalidDelta {
        offset: pos as u64,
        reason,
    };

    let mut pos = 0;
    let base_size = read_varint(delta, &mut pos)
        .ok_or_else(|| invalid(0, "truncated base size".into()))? as usize;
    let target_size = read_varint(delta, &mut pos)
        .ok_or_else(|| invalid(pos, "truncated target size".into()))? as usize;

    if base_size != base.len() {
        return Err(invalid(
            0,
            format!("base size mismatch: delta says {base_size}, base is {}", base.len()),
        ));
    }

    let mut out = Vec::with_capacity(target_size);

    while pos < delta.len() {
        let cmd = delta[pos];
        pos += 1;

        if cmd & 0x80 != 0 {
            // Copy from the base.
            let offset = read_spread_int(delta, &mut pos, cmd & 0x0f)
                .ok_or_else(|| invalid(pos, "truncated copy offset".into()))?
                as usize;
            let mut length = read_spread_int(delta, &mut pos, (cmd >> 4) & 0x07)
                .ok_or_else(|| invalid(pos, "truncated copy length".into()))?
                as usize;
            if length == 0 {
                length = 0x10000;
            }

            if offset + length > base.len() {
                return Err(invalid(
                    pos,
                    format!(
                        "copy out of bounds: offset={offset}, length={length}, base={}",
                        base.len()
                    ),
                ));
            }
            if out.len() + length > target_size {
                return Err(invalid(
                    pos,
                    format!(
                        "result overflow: {} + {length} > {target_size}",
                        out.len()
                    ),
                ));
            }
            out.extend_from_slice(&base[offset..offset + length]);
        } else if cmd != 0 {
            // Insert literal bytes.
            let length = cmd as usize;
            if pos + length > delta.len() {
                return Err(invalid(pos, "truncated insert data".into()));
            }
            if out.len() + length > target_size {
                return Err(invalid(
                    pos,
                    format!(
                        "result overflow: {} + {length} > {target_size}",
                        out.len()
                    ),
                ));
            }
            out.extend_from_slice(&delta[pos..pos + length]);
            pos += length;
        } else {
            return Err(invalid(pos - 1, "reserved opcode 0".into()));
        }
    }

    if out.len() != target_size {
        return Err(invalid(
            0,
            format!("target size mismatch: delta says {target_size}, got {}", out.len()),
        ));
    }

    Ok(out)
}

/// Read an integer whose bytes are selected by `bits`: bit `i` set means
/// byte `i` (least significant first) is present in the stream, missing
/// bytes are zero.
fn read_spread_int(data: &[u8], pos: &mut usize, bits: u8) -> Option<u64> {
    let mut value: u64 = 0;
    for i in 0..4 {
        if bits & (1 << i) != 0 {
            let byte = *data.get(*pos)?;
            *pos += 1;
            value |= (byte as u64) << (i * 8);
        }
    }
    Some(value)
}

/// Resolve every delta entry in the store, in reverse insertion order.
///
/// For each delta the chain of bases is walked down to a plain object,
/// then replayed outward from that base. A ref-delta base absent from the
/// store is requested from `resolver` (typically a lookup of a local file
/// whose content hashes to the base) and inserted as a blob. Returns the
/// number of deltas resolved.
pub fn resolve_deltas(
    store: &mut ObjectStore,
    mut resolver: impl FnMut(&ObjectId) -> Option<Vec<u8>>,
) -> Result<usize, PackError> {
    let initial_len = store.len();
    let mut resolved = 0usize;

    for index in (0..initial_len).rev() {
        if !store.get(index).kind.is_delta() {
            continue;
        }

        // Walk the chain: collect delta indices until a plain base.
        let mut chain = Vec::new();
        let mut cursor = index;
        let base_index = loop {
            let obj = store.get(cursor);
            if let Some(base) = obj.base_index {
                chain.push(cursor);
                cursor = base;
                continue;
            }
            if let Some(base_id) = obj.base_id {
                chain.push(cursor);
                match store.find(&base_id) {
                    Some(found) => break found,
                    None => {
                        let bytes = resolver(&base_id)
                            .ok_or(PackError::MissingBase(base_id))?;
                        break store.insert(treeup_object::ObjectKind::Blob, bytes)?;
                    }
                }
            }
            break cursor;
        };

        let base_kind = store
            .get(base_index)
            .kind
            .object_kind()
            .ok_or(PackError::InvalidDelta {
                offset: store.get(base_index).pack_offset,
                reason: "delta chain ends in another delta".into(),
            })?;

        // Replay the chain from the innermost base outward.
        let mut merge = store.payload(base_index)?.to_vec();
        for &delta_index in chain.iter().rev() {
            let delta_payload = store.payload(delta_index)?;
            merge = apply_delta(&merge, &delta_payload)?;
        }

        store.insert(base_kind, merge)?;
        resolved += 1;
    }

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Encode a varint the way the delta header carries sizes.
    fn write_varint(mut value: u64) -> Vec<u8> {
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

    fn encode_copy(offset: u32, length: u32) -> Vec<u8> {
        let mut cmd: u8 = 0x80;
        let mut extra = Vec::new();
        for i in 0..4 {
            let byte = ((offset >> (i * 8)) & 0xff) as u8;
            if byte != 0 {
                cmd |= 1 << i;
                extra.push(byte);
            }
        }
        let len = if length == 0x10000 { 0 } else { length };
        for i in 0..3 {
            let byte = ((len >> (i * 8)) & 0xff) as u8;
            if byte != 0 {
                cmd |= 0x10 << i;
                extra.push(byte);
            }
        }
        let mut buf = vec![cmd];
        buf.extend_from_slice(&extra);
        buf
    }

    fn build_delta(base_size: usize, target_size: usize, instructions: &[u8]) -> Vec<u8> {
        let mut delta = write_varint(base_size as u64);
        delta.extend_from_slice(&write_varint(target_size as u64));
        delta.extend_from_slice(instructions);
        delta
    }

    #[test]
    fn varint_roundtrip() {
        for value in [0u64, 1, 127, 128, 255, 16383, 16384, 1_000_000] {
            let encoded = write_varint(value);
            let mut pos = 0;
            assert_eq!(read_varint(&encoded, &mut pos), Some(value));
            assert_eq!(pos, encoded.len());
        }
    }

    #[test]
    fn apply_copy_only() {
        let base = b"Hello, World!";
        let mut ins = encode_copy(0, 5);
        ins.extend_from_slice(&encode_copy(7, 5));
        let delta = build_delta(base.len(), 10, &ins);
        assert_eq!(apply_delta(base, &delta).unwrap(), b"HelloWorld");
    }

    #[test]
    fn apply_insert_only() {
        let base = b"unused";
        let delta = build_delta(base.len(), 3, &[3, b'N', b'E', b'W']);
        assert_eq!(apply_delta(base, &delta).unwrap(), b"NEW");
    }

    #[test]
    fn apply_mixed() {
        let base = b"ABCDEFGHIJ";
        let mut ins = encode_copy(0, 3);
        ins.extend_from_slice(&[3, b'x', b'y', b'z']);
        ins.extend_from_slice(&encode_copy(7, 3));
        let delta = build_delta(base.len(), 9, &ins);
        assert_eq!(apply_delta(base, &delta).unwrap(), b"ABCxyzHIJ");
    }

    #[test]
    fn zero_length_copy_means_64k() {
        let base = vec![0x5a_u8; 0x10000];
        // Copy with no length bytes present.
        let delta = build_delta(base.len(), 0x10000, &[0x80]);
        assert_eq!(apply_delta(&base, &delta).unwrap(), base);
    }

    #[test]
    fn copy_out_of_bounds_fails() {
        let base = b"short";
        let delta = build_delta(base.len(), 100, &encode_copy(0, 100));
        assert!(matches!(
            apply_delta(base, &delta).unwrap_err(),
            PackError::InvalidDelta { .. }
        ));
    }

    #[test]
    fn result_overflow_fails() {
        let base = b"0123456789";
        // Two copies of 8 bytes into a 10-byte target.
        let mut ins = encode_copy(0, 8);
        ins.extend_from_slice(&encode_copy(0, 8));
        let delta = build_delta(base.len(), 10, &ins);
        let err = apply_delta(base, &delta).unwrap_err();
        match err {
            PackError::InvalidDelta { reason, .. } => {
                assert!(reason.contains("overflow"), "got: {reason}")
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn base_size_mismatch_fails() {
        let base = b"Hello";
        let delta = build_delta(100, 5, &encode_copy(0, 5));
        assert!(apply_delta(base, &delta).is_err());
    }

    #[test]
    fn short_target_fails() {
        let base = b"Hello";
        let delta = build_delta(base.len(), 10, &encode_copy(0, 5));
        assert!(apply_delta(base, &delta).is_err());
    }

    #[test]
    fn chain_application_matches_stepwise() {
        // Applying D1, D2, D3 one at a time must equal replaying the chain.
        let base = b"The quick brown fox jumps over the lazy dog".to_vec();

        let d1 = build_delta(base.len(), 9, &{
            let mut ins = encode_copy(4, 6);
            ins.extend_from_slice(&[3, b'c', b'a', b't']);
            ins
        });
        let step1 = apply_delta(&base, &d1).unwrap();
        assert_eq!(step1, b"quick cat");

        let d2 = build_delta(step1.len(), 13, &{
            let mut ins = vec![4, b'v', b'e', b'r', b'y'];
            ins.extend_from_slice(&encode_copy(5, 4));
            ins.extend_from_slice(&encode_copy(0, 5));
            ins
        });
        let step2 = apply_delta(&step1, &d2).unwrap();
        assert_eq!(step2, b"very catquick");

        let d3 = build_delta(step2.len(), 4, &encode_copy(0, 4));
        let step3 = apply_delta(&step2, &d3).unwrap();
        assert_eq!(step3, b"very");

        let mut merge = base;
        for d in [&d1, &d2, &d3] {
            merge = apply_delta(&merge, d).unwrap();
        }
        assert_eq!(merge, step3);
    }

    proptest! {
        #[test]
        fn varint_roundtrip_prop(value in 0u64..1 << 40) {
            let encoded = write_varint(value);
            let mut pos = 0;
            prop_assert_eq!(read_varint(&encoded, &mut pos), Some(value));
            prop_assert_eq!(pos, encoded.len());
        }
    }

    mod resolution {
        use super::*;
        use crate::decode_pack;
        use crate::store::ObjectStore;
        use crate::tests_support::{replace_with, PackBuilder};
        use treeup_hash::Hasher;

        #[test]
        fn ofs_delta_chain_of_three() {
            let base = b"layer zero content";
            let d1 = replace_with(base.len(), b"layer one");
            let d2 = replace_with(b"layer one".len(), b"layer two");
            let d3 = replace_with(b"layer two".len(), b"layer three");

            let pack = PackBuilder::new()
                .plain(3, base)
                .ofs_delta(1, &d1)
                .ofs_delta(1, &d2)
                .ofs_delta(1, &d3)
                .build();

            let mut store = ObjectStore::new();
            decode_pack(&pack, &mut store).unwrap();
            let resolved = resolve_deltas(&mut store, |_| None).unwrap();
            assert_eq!(resolved, 3);

            for expected in [&b"layer one"[..], b"layer two", b"layer three"] {
                let id = Hasher::hash_object("blob", expected).unwrap();
                let index = store.find(&id).expect("resolved object indexed");
                assert_eq!(&*store.payload(index).unwrap(), expected);
            }
        }

        #[test]
        fn ref_delta_base_from_resolver() {
            let local = b"content that lives on disk";
            let local_id = Hasher::hash_object("blob", local).unwrap();
            let delta = replace_with(local.len(), b"patched");

            let pack = PackBuilder::new().ref_delta(&local_id, &delta).build();

            let mut store = ObjectStore::new();
            decode_pack(&pack, &mut store).unwrap();

            let mut asked = Vec::new();
            let resolved = resolve_deltas(&mut store, |id| {
                asked.push(*id);
                (*id == local_id).then(|| local.to_vec())
            })
            .unwrap();

            assert_eq!(resolved, 1);
            assert_eq!(asked, vec![local_id]);
            // The synthesized base is stored too.
            assert!(store.contains(&local_id));
            let patched_id = Hasher::hash_object("blob", b"patched").unwrap();
            assert!(store.contains(&patched_id));
        }

        #[test]
        fn missing_ref_delta_base_is_fatal() {
            let ghost = Hasher::hash_object("blob", b"never seen").unwrap();
            let delta = replace_with(b"never seen".len(), b"x");
            let pack = PackBuilder::new().ref_delta(&ghost, &delta).build();

            let mut store = ObjectStore::new();
            decode_pack(&pack, &mut store).unwrap();
            assert!(matches!(
                resolve_deltas(&mut store, |_| None).unwrap_err(),
                PackError::MissingBase(id) if id == ghost
            ));
        }

        #[test]
        fn resolved_kind_follows_base() {
            let tree_payload = b"100644 file\0\x11\x11\x11\x11\x11\x11\x11\x11\x11\x11\x11\x11\x11\x11\x11\x11\x11\x11\x11\x11";
            let d = replace_with(tree_payload.len(), b"");

            let pack = PackBuilder::new()
                .plain(2, tree_payload)
                .ofs_delta(1, &d)
                .build();

            let mut store = ObjectStore::new();
            decode_pack(&pack, &mut store).unwrap();
            resolve_deltas(&mut store, |_| None).unwrap();

            let empty_tree = Hasher::hash_object("tree", b"").unwrap();
            assert_eq!(
                empty_tree.to_hex(),
                "4b825dc642cb6eb9a060e54bf8d69288fbee4904"
            );
            assert!(store.contains(&empty_tree));
        }
    }
}
