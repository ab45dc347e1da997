use bstr::{BString, ByteSlice};
use treeup_hash::ObjectId;

use crate::{FileMode, ObjectError};

/// A single entry in a tree object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub mode: FileMode,
    pub name: BString,
    pub oid: ObjectId,
}

/// A parsed tree object: the entry list of one directory.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Tree {
    pub entries: Vec<TreeEntry>,
}

impl Tree {
    /// Parse a tree payload: a sequence of
    /// `<octal-mode> <name>\0<20-byte-hash>` records.
    pub fn parse(payload: &[u8]) -> Result<Self, ObjectError> {
        let mut entries = Vec::new();
        let mut pos = 0;

        while pos < payload.len() {
            let rest = &payload[pos..];
            let space = rest.find_byte(b' ').ok_or(ObjectError::InvalidTreeEntry {
                offset: pos,
                reason: "missing space after mode".into(),
            })?;
            let mode = FileMode::from_octal(&rest[..space])?;

            let after_mode = &rest[space + 1..];
            let nul = after_mode
                .find_byte(0)
                .ok_or(ObjectError::InvalidTreeEntry {
                    offset: pos,
                    reason: "missing NUL after name".into(),
                })?;
            if nul == 0 {
                return Err(ObjectError::InvalidTreeEntry {
                    offset: pos,
                    reason: "empty entry name".into(),
                });
            }
            let name = BString::from(&after_mode[..nul]);

            let hash_start = space + 1 + nul + 1;
            if rest.len() < hash_start + 20 {
                return Err(ObjectError::InvalidTreeEntry {
                    offset: pos,
                    reason: "truncated entry hash".into(),
                });
            }
            let oid = ObjectId::from_bytes(&rest[hash_start..hash_start + 20])?;

            entries.push(TreeEntry { mode, name, oid });
            pos += hash_start + 20;
        }

        Ok(Self { entries })
    }

    /// Serialize back to the canonical payload form.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for entry in &self.entries {
            out.extend_from_slice(entry.mode.to_octal().as_bytes());
            out.push(b' ');
            out.extend_from_slice(&entry.name);
            out.push(0);
            out.extend_from_slice(entry.oid.as_bytes());
        }
        out
    }
}
