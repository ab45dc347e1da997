//! The tree materializer and reconciler.
//!
//! Walks the committed tree depth-first, marks surviving local paths,
//! queues new or modified content for writing, streams the new manifest,
//! and finally prunes everything the remote tree no longer contains.

use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use bstr::ByteSlice;
use treeup_hash::ObjectId;
use treeup_object::{Commit, FileMode, ObjectKind, Tree};
use treeup_pack::ObjectStore;

use crate::manifest::{directory_line, ManifestWriter};
use crate::node::{FileNode, IgnoreList, LocalTree, RemoteTree};
use crate::report::Reporter;
use crate::scan::hash_on_disk;
use crate::WorktreeError;

/// Everything one synchronization run threads through the walk: the object
/// store, the three node indexes, the ignore list, and the reporter.
pub struct SyncContext<'a> {
    pub store: &'a mut ObjectStore,
    pub local: &'a mut LocalTree,
    pub remote: &'a mut RemoteTree,
    pub ignores: &'a IgnoreList,
    pub reporter: &'a mut Reporter,
    pub target: &'a Path,
}

impl SyncContext<'_> {
    /// Materialize the tree of commit `want`: walk it, rewrite the manifest
    /// atomically, then write every queued file.
    pub fn checkout(
        &mut self,
        want: &ObjectId,
        manifest_path: &Path,
    ) -> Result<(), WorktreeError> {
        let commit_index = self
            .store
            .find(want)
            .ok_or(WorktreeError::CommitNotFound(*want))?;
        let payload = self.store.payload(commit_index)?.to_vec();
        let commit = Commit::parse(&payload)?;

        let mut writer = ManifestWriter::create(manifest_path, want)?;
        let target = self.target.to_path_buf();
        self.process_tree(&commit.tree, &target, &mut writer)?;
        writer.commit()?;

        self.save_pending()
    }

    /// One directory of the committed tree. Children write their manifest
    /// blocks first; this directory's block follows them.
    fn process_tree(
        &mut self,
        hash: &ObjectId,
        base: &Path,
        out: &mut ManifestWriter,
    ) -> Result<(), WorktreeError> {
        let index = self.store.find(hash).ok_or_else(|| WorktreeError::MissingTree {
            path: base.to_path_buf(),
            id: *hash,
        })?;
        let payload = self.store.payload(index)?.to_vec();
        let tree = Tree::parse(&payload)?;

        self.local.mark_keep(base);

        let mut block = directory_line(hash, base);

        for entry in &tree.entries {
            let full_path = base.join(std::ffi::OsStr::from_bytes(&entry.name));
            block.extend_from_slice(&ManifestWriter::format_line(
                entry.mode,
                &entry.oid,
                &entry.name,
                false,
            ));

            if entry.mode.is_dir() {
                self.process_tree(&entry.oid, &full_path, out)?;
                continue;
            }

            // If the local copy already matches, nothing to write.
            let unchanged = match self.local.by_path.get_mut(&full_path) {
                Some(node) => {
                    node.keep = true;
                    node.save = false;
                    node.id == Some(entry.oid)
                }
                None => false,
            };
            if unchanged {
                continue;
            }

            self.ensure_object(&entry.oid, &full_path)?;

            let node = self
                .remote
                .entry(full_path)
                .or_insert_with(|| FileNode::new(entry.mode, Some(entry.oid)));
            node.mode = entry.mode;
            node.id = Some(entry.oid);
            node.keep = true;
            node.save = true;
        }

        out.write_block(&block)
    }

    /// Locate `id` in the store, synthesizing it from a local file whose
    /// content hashes to `id` when the pack did not deliver it.
    fn ensure_object(&mut self, id: &ObjectId, path: &Path) -> Result<usize, WorktreeError> {
        if let Some(index) = self.store.find(id) {
            return Ok(index);
        }

        let candidate = self
            .local
            .path_of(id)
            .map(Path::to_path_buf)
            .or_else(|| {
                self.local
                    .by_path
                    .contains_key(path)
                    .then(|| path.to_path_buf())
            });

        if let Some(candidate) = candidate {
            let node = &self.local.by_path[&candidate];
            if !node.mode.is_dir() {
                let bytes = if node.mode.is_symlink() {
                    std::fs::read_link(&candidate)?
                        .into_os_string()
                        .into_encoded_bytes()
                } else {
                    std::fs::read(&candidate)?
                };
                self.store.insert(ObjectKind::Blob, bytes)?;
            }
        }

        self.store.find(id).ok_or_else(|| WorktreeError::MissingObject {
            path: path.to_path_buf(),
            id: *id,
        })
    }

    /// Write every remote node queued with `save`, preserving its mode.
    fn save_pending(&mut self) -> Result<(), WorktreeError> {
        let pending: Vec<(PathBuf, FileMode, ObjectId)> = self
            .remote
            .iter()
            .filter(|(_, node)| node.save)
            .filter_map(|(path, node)| node.id.map(|id| (path.clone(), node.mode, id)))
            .collect();

        for (path, mode, id) in pending {
            let index = self.store.find(&id).ok_or_else(|| WorktreeError::MissingObject {
                path: path.clone(),
                id,
            })?;
            let payload = self.store.payload(index)?;
            save_file(&path, mode, &payload, self.reporter)?;
            if path.as_os_str().as_bytes().contains_str("UPDATING") {
                self.reporter.note_updating(&path);
            }
        }
        Ok(())
    }

    /// The repair comparison: every remote-recorded path whose local copy
    /// is missing or (unless ignored) hashes differently becomes a want.
    pub fn plan_repairs(&mut self) -> Vec<ObjectId> {
        let mut wants = Vec::new();
        for (path, node) in self.remote.iter() {
            let Some(id) = node.id else { continue };
            match self.local.by_path.get(path) {
                None => {
                    self.reporter.repair_needed(path, true);
                    wants.push(id);
                }
                Some(local) if local.id != Some(id) && !self.ignores.matches(path) => {
                    self.reporter.repair_needed(path, false);
                    wants.push(id);
                }
                Some(_) => {}
            }
        }
        wants
    }

    /// Write the repaired objects that arrived in the pack. Identical
    /// content already on disk is left alone, and every remote path is
    /// spared from pruning.
    pub fn save_repairs(&mut self) -> Result<(), WorktreeError> {
        let entries: Vec<(PathBuf, FileMode, ObjectId)> = self
            .remote
            .iter()
            .filter_map(|(path, node)| node.id.map(|id| (path.clone(), node.mode, id)))
            .collect();

        for (path, mode, id) in entries {
            let Some(index) = self.store.find(&id) else {
                continue;
            };

            if mode.is_dir() {
                std::fs::create_dir_all(&path).map_err(|source| WorktreeError::Storage {
                    path: path.clone(),
                    source,
                })?;
                continue;
            }

            // Identical files can exist at multiple paths; rewrite only
            // what actually differs.
            if path.symlink_metadata().is_ok() && hash_on_disk(&path, mode)? == id {
                continue;
            }

            let payload = self.store.payload(index)?;
            save_file(&path, mode, &payload, self.reporter)?;
            if path.as_os_str().as_bytes().contains_str("UPDATING") {
                self.reporter.note_updating(&path);
            }
        }

        for path in self.remote.keys() {
            if let Some(node) = self.local.by_path.get_mut(path) {
                node.keep = true;
            }
        }
        Ok(())
    }

    /// Remove every local path the walk did not mark `keep`, sparing the
    /// ignore list. Runs strictly after materialization.
    pub fn prune_stale(&mut self) -> Result<(), WorktreeError> {
        let stale: Vec<(PathBuf, FileMode)> = self
            .local
            .by_path
            .iter()
            .filter(|(_, node)| !node.keep)
            .map(|(path, node)| (path.clone(), node.mode))
            .collect();

        for (path, mode) in stale {
            if self.ignores.matches(&path) {
                continue;
            }
            if mode.is_dir() {
                self.reporter.dir_pruned(&path);
                prune_tree(&path, self.target)?;
            } else {
                self.reporter.file_deleted(&path);
                match std::fs::remove_file(&path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(_) => eprintln!(" ! cannot remove {}", path.display()),
                }
            }
        }
        Ok(())
    }
}

/// Recursively delete a directory, guarding against escapes: the path must
/// sit inside the target root and contain no `../` component.
fn prune_tree(base: &Path, target: &Path) -> Result<(), WorktreeError> {
    let base_bytes = base.as_os_str().as_bytes();
    if !base_bytes.starts_with(target.as_os_str().as_bytes()) {
        return Err(WorktreeError::OutsideTarget {
            path: base.to_path_buf(),
            target: target.to_path_buf(),
        });
    }
    if base_bytes.find(b"../").is_some() {
        return Err(WorktreeError::PathTraversal(base.to_path_buf()));
    }

    let entries = match std::fs::read_dir(base) {
        Ok(entries) => entries,
        Err(_) => return Ok(()),
    };
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            prune_tree(&path, target)?;
        } else if std::fs::remove_file(&path).is_err() {
            eprintln!(" ! cannot remove {}", path.display());
        }
    }

    if std::fs::remove_dir(base).is_err() {
        eprintln!(" ! cannot remove {}", base.display());
    }
    Ok(())
}

/// Write one file or symlink, creating parent directories as needed. The
/// mode is passed to open; a pre-existing file is re-chmodded so a
/// mode-only change still lands.
fn save_file(
    path: &Path,
    mode: FileMode,
    payload: &[u8],
    reporter: &mut Reporter,
) -> Result<(), WorktreeError> {
    let storage = |source: std::io::Error| WorktreeError::Storage {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        if !parent.exists() {
            std::fs::create_dir_all(parent).map_err(storage)?;
        }
    }

    let existed = path.symlink_metadata().is_ok();
    reporter.file_written(path, existed);

    if mode.is_symlink() {
        if existed {
            std::fs::remove_file(path).map_err(storage)?;
        }
        let link_target = std::ffi::OsStr::from_bytes(payload);
        std::os::unix::fs::symlink(link_target, path).map_err(storage)?;
    } else {
        use std::os::unix::fs::PermissionsExt;
        if existed {
            std::fs::set_permissions(
                path,
                std::fs::Permissions::from_mode(mode.permissions()),
            )
            .map_err(storage)?;
        }
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(mode.permissions())
            .open(path)
            .map_err(storage)?;
        file.write_all(payload).map_err(storage)?;
    }
    Ok(())
}

/// Record the synchronized revision: `<branch-or-tag>:<first-9-hex>`.
pub fn write_revision(
    target: &Path,
    label: &str,
    want: &ObjectId,
) -> Result<(), WorktreeError> {
    let path = target.join(".gituprevision");
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o644)
        .open(&path)
        .map_err(|source| WorktreeError::Storage {
            path: path.clone(),
            source,
        })?;
    writeln!(file, "{}:{}", label, want.short_hex(9)).map_err(|source| {
        WorktreeError::Storage {
            path,
            source,
        }
    })
}
