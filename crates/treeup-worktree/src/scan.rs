//! Recursive scan of the target directory.

use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use treeup_hash::{Hasher, ObjectId};
use treeup_object::FileMode;

use crate::node::{FileNode, IgnoreList, LocalTree, RemoteTree};
use crate::WorktreeError;

/// Walk the target directory and build the local path and hash indexes.
///
/// Files and symlinks are content-hashed; paths on the ignore list get a
/// synthetic digest of the path string instead, so they can never match a
/// remote hash. Directory nodes take their tree hash from the previous
/// manifest when one is known. A `.git` directory anywhere in the tree is
/// a hard error.
pub fn scan_local(
    target: &Path,
    ignores: &IgnoreList,
    previous: &RemoteTree,
) -> Result<LocalTree, WorktreeError> {
    let mut local = LocalTree::default();
    scan_directory(target, target, ignores, previous, &mut local)?;
    Ok(local)
}

fn scan_directory(
    target: &Path,
    base: &Path,
    ignores: &IgnoreList,
    previous: &RemoteTree,
    local: &mut LocalTree,
) -> Result<(), WorktreeError> {
    // The base directory itself, seeded from the previous manifest.
    let known = previous.get(base);
    let mut node = FileNode::new(
        known.map(|n| n.mode).unwrap_or(FileMode::DIR),
        known.and_then(|n| n.id),
    );
    node.keep = base == target;
    if let Some(id) = node.id {
        local.by_hash.insert(id, base.to_path_buf());
    }
    local.by_path.insert(base.to_path_buf(), node);

    let entries = match std::fs::read_dir(base) {
        Ok(entries) => entries,
        // A directory recorded in the manifest but absent on disk is not
        // fatal; the reconciler will re-create or prune it.
        Err(_) => return Ok(()),
    };

    for entry in entries {
        let entry = entry.map_err(|source| WorktreeError::Scan {
            path: base.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        let name = entry.file_name();

        let metadata =
            std::fs::symlink_metadata(&path).map_err(|source| WorktreeError::Scan {
                path: path.clone(),
                source,
            })?;

        if metadata.is_dir() {
            if name.as_bytes() == b".git" {
                return Err(WorktreeError::GitDirFound(path));
            }
            scan_directory(target, &path, ignores, previous, local)?;
            continue;
        }

        let mode = FileMode(metadata.mode());
        let id = if ignores.matches(&path) {
            synthetic_hash(&path)?
        } else {
            hash_on_disk(&path, mode)?
        };

        let mut node = FileNode::new(mode, Some(id));
        node.keep = path.as_os_str().as_bytes().ends_with(b".gituprevision");

        local.by_hash.insert(id, path.clone());
        local.by_path.insert(path, node);
    }

    Ok(())
}

/// Blob hash of a file's contents, or of a symlink's target string.
pub fn hash_on_disk(path: &Path, mode: FileMode) -> Result<ObjectId, WorktreeError> {
    let bytes = if mode.is_symlink() {
        std::fs::read_link(path)?.into_os_string().into_encoded_bytes()
    } else {
        std::fs::read(path)?
    };
    Ok(Hasher::hash_object("blob", &bytes)?)
}

/// A digest of the path string itself: deliberately not an object hash, so
/// an ignored file cannot collide with any remote blob.
fn synthetic_hash(path: &Path) -> Result<ObjectId, WorktreeError> {
    Ok(Hasher::digest(path.as_os_str().as_bytes())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn write(path: &Path, content: &[u8]) {
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn scans_files_and_directories() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path();
        write(&target.join("a.txt"), b"alpha\n");
        std::fs::create_dir(target.join("sub")).unwrap();
        write(&target.join("sub/b.txt"), b"beta\n");

        let local = scan_local(target, &IgnoreList::default(), &BTreeMap::new()).unwrap();

        assert!(local.by_path.contains_key(target));
        assert!(local.by_path.contains_key(&target.join("sub")));
        let a = &local.by_path[&target.join("a.txt")];
        let expected = Hasher::hash_object("blob", b"alpha\n").unwrap();
        assert_eq!(a.id, Some(expected));
        assert_eq!(local.path_of(&expected), Some(target.join("a.txt").as_path()));

        // Only the root is pre-marked keep.
        assert!(local.by_path[target].keep);
        assert!(!a.keep);
    }

    #[test]
    fn symlink_hashes_its_target_string() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path();
        std::os::unix::fs::symlink("dest/inatio.n", target.join("link")).unwrap();

        let local = scan_local(target, &IgnoreList::default(), &BTreeMap::new()).unwrap();
        let node = &local.by_path[&target.join("link")];
        assert!(node.mode.is_symlink());
        assert_eq!(
            node.id,
            Some(Hasher::hash_object("blob", b"dest/inatio.n").unwrap())
        );
    }

    #[test]
    fn ignored_path_gets_synthetic_hash() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path();
        write(&target.join("keep.log"), b"local only\n");

        let ignores = IgnoreList::new(vec![target.join("keep.log")]);
        let local = scan_local(target, &ignores, &BTreeMap::new()).unwrap();

        let content_hash = Hasher::hash_object("blob", b"local only\n").unwrap();
        let node = &local.by_path[&target.join("keep.log")];
        assert_ne!(node.id, Some(content_hash));
    }

    #[test]
    fn git_directory_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(".git")).unwrap();

        let err = scan_local(dir.path(), &IgnoreList::default(), &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, WorktreeError::GitDirFound(_)));
    }

    #[test]
    fn directory_hash_comes_from_previous_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path();
        std::fs::create_dir(target.join("sub")).unwrap();

        let tree_id = Hasher::hash_object("tree", b"").unwrap();
        let mut previous: RemoteTree = BTreeMap::new();
        previous.insert(
            target.join("sub"),
            FileNode::new(FileMode::DIR, Some(tree_id)),
        );

        let local = scan_local(target, &IgnoreList::default(), &previous).unwrap();
        assert_eq!(local.by_path[&target.join("sub")].id, Some(tree_id));
        assert_eq!(local.path_of(&tree_id), Some(target.join("sub").as_path()));
    }

    #[test]
    fn revision_file_is_pre_marked_keep() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join(".gituprevision"), b"main:abc123def\n");

        let local =
            scan_local(dir.path(), &IgnoreList::default(), &BTreeMap::new()).unwrap();
        assert!(local.by_path[&dir.path().join(".gituprevision")].keep);
    }

    #[test]
    fn missing_target_yields_only_root() {
        let dir = tempfile::tempdir().unwrap();
        let gone = dir.path().join("never-created");
        let local = scan_local(&gone, &IgnoreList::default(), &BTreeMap::new()).unwrap();
        assert_eq!(local.by_path.len(), 1);
    }
}
