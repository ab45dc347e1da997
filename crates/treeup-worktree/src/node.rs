//! File nodes and the indexes over them.
//!
//! The previous manifest, the local scan, and the committed tree each need
//! a view of the same paths. Every node is owned by exactly one primary
//! index (a path-keyed map); the hash index stores paths and looks nodes
//! up through the primary.

use std::collections::{BTreeMap, HashMap};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use treeup_hash::ObjectId;
use treeup_object::FileMode;

/// One tracked path: its mode, its content hash, and the two
/// reconciliation flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileNode {
    pub mode: FileMode,
    /// Blob hash for files, tree hash for directories, hash of the link
    /// target for symlinks. `None` for a directory first seen this run.
    pub id: Option<ObjectId>,
    /// Confirmed present in the new remote tree; unmarked nodes are
    /// candidates for deletion.
    pub keep: bool,
    /// Content must be written to disk (new or modified).
    pub save: bool,
}

impl FileNode {
    pub fn new(mode: FileMode, id: Option<ObjectId>) -> Self {
        Self {
            mode,
            id,
            keep: false,
            save: false,
        }
    }
}

/// The persisted remote state: path-keyed, mutated during reconciliation
/// and rewritten into the manifest at the end.
pub type RemoteTree = BTreeMap<PathBuf, FileNode>;

/// The local scan result: path-keyed nodes plus a hash index so a missing
/// delta base can be found by content.
#[derive(Debug, Default)]
pub struct LocalTree {
    pub by_path: BTreeMap<PathBuf, FileNode>,
    pub by_hash: HashMap<ObjectId, PathBuf>,
}

impl LocalTree {
    /// Look up a path whose content hashes to `id`.
    pub fn path_of(&self, id: &ObjectId) -> Option<&Path> {
        self.by_hash.get(id).map(PathBuf::as_path)
    }

    pub fn mark_keep(&mut self, path: &Path) {
        if let Some(node) = self.by_path.get_mut(path) {
            node.keep = true;
            node.save = false;
        }
    }
}

/// Path prefixes excluded from hashing, repair, and pruning.
#[derive(Debug, Clone, Default)]
pub struct IgnoreList {
    prefixes: Vec<PathBuf>,
}

impl IgnoreList {
    pub fn new(prefixes: Vec<PathBuf>) -> Self {
        Self { prefixes }
    }

    /// Prefix comparison on raw path bytes.
    pub fn matches(&self, path: &Path) -> bool {
        let bytes = path.as_os_str().as_bytes();
        self.prefixes
            .iter()
            .any(|prefix| bytes.starts_with(prefix.as_os_str().as_bytes()))
    }
}
