//! Reading a saved pack from disk.

use std::fs::File;
use std::path::Path;

use memmap2::Mmap;

use crate::{PackError, PACK_HEADER_SIZE};

/// A memory-mapped pack file, as written by a previous run with `-k`.
///
/// The mapping is only read; full validation (signature, version, trailer)
/// happens in [`decode_pack`](crate::decode_pack).
#[derive(Debug)]
pub struct MappedPack {
    map: Mmap,
}

impl MappedPack {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PackError> {
        let file = File::open(path.as_ref())?;
        let map = unsafe { Mmap::map(&file)? };
        if map.len() < PACK_HEADER_SIZE + 20 {
            return Err(PackError::InvalidHeader(format!(
                "{} is too small to be a pack file",
                path.as_ref().display()
            )));
        }
        Ok(Self { map })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ObjectStore;
    use crate::tests_support::PackBuilder;
    use crate::decode_pack;

    #[test]
    fn open_and_decode_saved_pack() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("section-abc.pack");
        let pack = PackBuilder::new().plain(3, b"saved pack payload").build();
        std::fs::write(&path, &pack).unwrap();

        let mapped = MappedPack::open(&path).unwrap();
        let mut store = ObjectStore::new();
        assert_eq!(decode_pack(mapped.bytes(), &mut store).unwrap(), 1);
        assert_eq!(&*store.payload(0).unwrap(), b"saved pack payload");
    }

    #[test]
    fn tiny_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiny.pack");
        std::fs::write(&path, b"PACK").unwrap();
        assert!(matches!(
            MappedPack::open(&path).unwrap_err(),
            PackError::InvalidHeader(_)
        ));
    }
}
