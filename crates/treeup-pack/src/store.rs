//! The object store: insertion-ordered array plus hash-keyed index, with
//! optional disk-backed payload storage for low-memory mode.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::ops::Deref;
use std::path::{Path, PathBuf};

use treeup_hash::{Hasher, ObjectId};
use treeup_object::ObjectKind;

use crate::PackError;

/// The six entry kinds a pack stream can carry. The two delta kinds are
/// transient: after delta resolution every stored delta has a resolved
/// counterpart whose kind equals its base's kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Commit,
    Tree,
    Blob,
    Tag,
    OfsDelta,
    RefDelta,
}

impl EntryKind {
    pub fn is_delta(&self) -> bool {
        matches!(self, Self::OfsDelta | Self::RefDelta)
    }

    /// The materialized kind, if this is not a delta.
    pub fn object_kind(&self) -> Option<ObjectKind> {
        match self {
            Self::Commit => Some(ObjectKind::Commit),
            Self::Tree => Some(ObjectKind::Tree),
            Self::Blob => Some(ObjectKind::Blob),
            Self::Tag => Some(ObjectKind::Tag),
            Self::OfsDelta | Self::RefDelta => None,
        }
    }
}

impl From<ObjectKind> for EntryKind {
    fn from(kind: ObjectKind) -> Self {
        match kind {
            ObjectKind::Commit => Self::Commit,
            ObjectKind::Tree => Self::Tree,
            ObjectKind::Blob => Self::Blob,
            ObjectKind::Tag => Self::Tag,
        }
    }
}

enum Backing {
    Memory(Vec<u8>),
    Spilled { offset: u64 },
}

/// One stored object or (pre-resolution) delta entry.
pub struct Object {
    /// Content hash. Deltas are never hashed; they carry `None`.
    pub id: Option<ObjectId>,
    pub kind: EntryKind,
    /// Byte position of this entry within the received pack.
    pub pack_offset: u64,
    /// Insertion index of the base object (ofs-delta only, resolved at
    /// decode time).
    pub base_index: Option<usize>,
    /// Hash of the base object (ref-delta only).
    pub base_id: Option<ObjectId>,
    size: usize,
    backing: Backing,
}

impl Object {
    pub fn size(&self) -> usize {
        self.size
    }
}

/// A loaned object payload. Memory-backed objects lend their bytes;
/// disk-backed ones are read into an owned buffer released on drop.
pub enum PayloadRef<'a> {
    Borrowed(&'a [u8]),
    Loaded(Vec<u8>),
}

impl Deref for PayloadRef<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Self::Borrowed(b) => b,
            Self::Loaded(v) => v,
        }
    }
}

struct SpillFile {
    file: File,
    len: u64,
}

impl SpillFile {
    fn create(path: &Path) -> std::io::Result<Self> {
        use std::os::unix::fs::OpenOptionsExt;
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o644)
            .open(path)?;
        Ok(Self { file, len: 0 })
    }

    fn append(&mut self, bytes: &[u8]) -> std::io::Result<u64> {
        use std::io::Write;
        let offset = self.len;
        self.file.write_all(bytes)?;
        self.len += bytes.len() as u64;
        Ok(offset)
    }

    /// Reopen the scratch file read-only and unlink its path, so the
    /// filesystem entry vanishes on process exit even if abnormal.
    fn seal(&mut self, path: &Path) -> std::io::Result<()> {
        use std::io::Write;
        self.file.flush()?;
        self.file = File::open(path)?;
        std::fs::remove_file(path)?;
        Ok(())
    }

    fn read_at(&self, offset: u64, len: usize) -> std::io::Result<Vec<u8>> {
        use std::os::unix::fs::FileExt;
        let mut buf = vec![0u8; len];
        self.file.read_exact_at(&mut buf, offset)?;
        Ok(buf)
    }
}

/// Insertion-ordered object storage with a hash-keyed lookup index.
///
/// Duplicate hashes are rejected silently in normal mode (the first
/// instance wins). In repair mode the later instance takes over the index
/// entry, because a repair re-fetches objects already recorded on disk.
pub struct ObjectStore {
    objects: Vec<Object>,
    by_id: HashMap<ObjectId, usize>,
    replace_duplicates: bool,
    spill: Option<(SpillFile, PathBuf)>,
}

impl ObjectStore {
    pub fn new() -> Self {
        Self {
            objects: Vec::new(),
            by_id: HashMap::new(),
            replace_duplicates: false,
            spill: None,
        }
    }

    /// Later duplicates replace earlier instances (repair mode).
    pub fn replace_duplicates(&mut self, on: bool) {
        self.replace_duplicates = on;
    }

    /// Route pack-entry payloads through a scratch file at `path`
    /// (low-memory mode). Objects inserted via [`insert`](Self::insert)
    /// stay memory-backed.
    pub fn spill_to(&mut self, path: &Path) -> Result<(), PackError> {
        let file = SpillFile::create(path)?;
        self.spill = Some((file, path.to_path_buf()));
        Ok(())
    }

    /// Seal the scratch file once decoding completes: reopened read-only,
    /// path unlinked.
    pub fn seal_spill(&mut self) -> Result<(), PackError> {
        if let Some((file, path)) = self.spill.as_mut() {
            file.seal(path)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn get(&self, index: usize) -> &Object {
        &self.objects[index]
    }

    /// Look up an object's insertion index by hash.
    pub fn find(&self, id: &ObjectId) -> Option<usize> {
        self.by_id.get(id).copied()
    }

    pub fn contains(&self, id: &ObjectId) -> bool {
        self.by_id.contains_key(id)
    }

    /// Insert a materialized object, hashing it under its kind header.
    /// Returns the index holding the object (an existing index when the
    /// hash is already present and duplicates are not being replaced).
    pub fn insert(&mut self, kind: ObjectKind, payload: Vec<u8>) -> Result<usize, PackError> {
        let id = Hasher::hash_object(kind.as_str(), &payload)?;
        if let Some(&existing) = self.by_id.get(&id) {
            if !self.replace_duplicates {
                return Ok(existing);
            }
        }
        let index = self.objects.len();
        self.objects.push(Object {
            id: Some(id),
            kind: kind.into(),
            pack_offset: 0,
            base_index: None,
            base_id: None,
            size: payload.len(),
            backing: Backing::Memory(payload),
        });
        self.by_id.insert(id, index);
        Ok(index)
    }

    /// Insert an entry decoded from a pack stream. Plain objects are hashed
    /// and indexed; deltas are stored unhashed. When a spill file is active
    /// the payload is appended there and only the offset retained.
    pub(crate) fn insert_pack_entry(
        &mut self,
        kind: EntryKind,
        pack_offset: u64,
        base_index: Option<usize>,
        base_id: Option<ObjectId>,
        payload: Vec<u8>,
    ) -> Result<usize, PackError> {
        let id = match kind.object_kind() {
            Some(obj_kind) => {
                let id = Hasher::hash_object(obj_kind.as_str(), &payload)?;
                if let Some(&existing) = self.by_id.get(&id) {
                    if !self.replace_duplicates {
                        return Ok(existing);
                    }
                }
                Some(id)
            }
            None => None,
        };

        let size = payload.len();
        let backing = match self.spill.as_mut() {
            Some((file, _)) => Backing::Spilled {
                offset: file.append(&payload)?,
            },
            None => Backing::Memory(payload),
        };

        let index = self.objects.len();
        self.objects.push(Object {
            id,
            kind,
            pack_offset,
            base_index,
            base_id,
            size,
            backing,
        });
        if let Some(id) = id {
            self.by_id.insert(id, index);
        }
        Ok(index)
    }

    /// Acquire the payload of the object at `index`.
    pub fn payload(&self, index: usize) -> Result<PayloadRef<'_>, PackError> {
        let obj = &self.objects[index];
        match &obj.backing {
            Backing::Memory(bytes) => Ok(PayloadRef::Borrowed(bytes)),
            Backing::Spilled { offset } => {
                let (file, _) = self
                    .spill
                    .as_ref()
                    .expect("spilled object without spill file");
                Ok(PayloadRef::Loaded(file.read_at(*offset, obj.size)?))
            }
        }
    }

}

impl Default for ObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_find() {
        let mut store = ObjectStore::new();
        let index = store.insert(ObjectKind::Blob, b"hello world\n".to_vec()).unwrap();
        let obj = store.get(index);
        assert_eq!(
            obj.id.unwrap().to_hex(),
            "3b18e512dba79e4c8300dd08aeb37f8e728b8dad"
        );
        assert_eq!(store.find(&obj.id.unwrap()), Some(index));
        assert_eq!(&*store.payload(index).unwrap(), b"hello world\n");
    }

    #[test]
    fn duplicate_rejected_in_normal_mode() {
        let mut store = ObjectStore::new();
        let first = store.insert(ObjectKind::Blob, b"same".to_vec()).unwrap();
        let second = store.insert(ObjectKind::Blob, b"same".to_vec()).unwrap();
        assert_eq!(first, second);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn duplicate_replaces_in_repair_mode() {
        let mut store = ObjectStore::new();
        store.replace_duplicates(true);
        let first = store.insert(ObjectKind::Blob, b"same".to_vec()).unwrap();
        let second = store.insert(ObjectKind::Blob, b"same".to_vec()).unwrap();
        assert_ne!(first, second);
        assert_eq!(store.len(), 2);
        let id = store.get(second).id.unwrap();
        assert_eq!(store.find(&id), Some(second));
    }

    #[test]
    fn deltas_are_not_indexed() {
        let mut store = ObjectStore::new();
        let index = store
            .insert_pack_entry(EntryKind::OfsDelta, 12, Some(0), None, vec![1, 2, 3])
            .unwrap();
        assert!(store.get(index).id.is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn spilled_payload_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scratch.tmp");

        let mut store = ObjectStore::new();
        store.spill_to(&path).unwrap();
        let index = store
            .insert_pack_entry(EntryKind::Blob, 12, None, None, b"spilled bytes".to_vec())
            .unwrap();
        store.seal_spill().unwrap();

        // Sealing unlinks the path; the payload must still be readable.
        assert!(!path.exists());
        assert_eq!(&*store.payload(index).unwrap(), b"spilled bytes");
    }

    #[test]
    fn insert_after_spill_stays_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scratch.tmp");

        let mut store = ObjectStore::new();
        store.spill_to(&path).unwrap();
        store.seal_spill().unwrap();

        let index = store.insert(ObjectKind::Blob, b"resolved".to_vec()).unwrap();
        assert_eq!(&*store.payload(index).unwrap(), b"resolved");
    }
}
