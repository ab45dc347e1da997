use proptest::prelude::*;
use treeup_hash::hex::{decode, decode_to_vec, encode, is_hex};
use treeup_hash::ObjectId;

proptest! {
    #[test]
    fn encode_decode_roundtrip(bytes in proptest::collection::vec(any::<u8>(), 0..128)) {
        let hex = encode(&bytes);
        let decoded = decode_to_vec(&hex).unwrap();
        prop_assert_eq!(&decoded, &bytes);
    }

    #[test]
    fn encoding_is_lowercase(bytes in proptest::collection::vec(any::<u8>(), 1..64)) {
        let hex = encode(&bytes);
        prop_assert!(hex.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn encoding_doubles_length(bytes in proptest::collection::vec(any::<u8>(), 0..128)) {
        prop_assert_eq!(encode(&bytes).len(), bytes.len() * 2);
    }

    #[test]
    fn fixed_buffer_roundtrip(bytes in proptest::collection::vec(any::<u8>(), 0..128)) {
        let hex = encode(&bytes);
        let mut decoded = vec![0u8; bytes.len()];
        decode(&hex, &mut decoded).unwrap();
        prop_assert_eq!(&decoded, &bytes);
    }

    #[test]
    fn encoded_form_is_valid_hex(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
        prop_assert!(is_hex(encode(&bytes).as_bytes()));
    }

    #[test]
    fn oid_hex_roundtrip(bytes in proptest::collection::vec(any::<u8>(), 20..=20)) {
        let oid = ObjectId::from_bytes(&bytes).unwrap();
        let parsed: ObjectId = oid.to_hex().parse().unwrap();
        prop_assert_eq!(oid, parsed);
    }
}
