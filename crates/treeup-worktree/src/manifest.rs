//! The persisted manifest: one line with the materialized commit, then one
//! block per directory.
//!
//! A block starts with the directory's own line (`40000\t<tree-hash>\t
//! <path>/`, the trailing slash marking it as a directory), followed by one
//! `<octal-mode>\t<hex-hash>\t<name>` line per entry, and ends with a blank
//! line. Child blocks precede their parent's, because the walker finishes
//! children first. On load, each block is reassembled into the payload of
//! its tree object and inserted into the object store, so the next pull can
//! treat the previous state as known objects.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use bstr::ByteSlice;
use treeup_hash::{hex, ObjectId};
use treeup_object::{FileMode, ObjectKind};
use treeup_pack::ObjectStore;

use crate::node::{FileNode, RemoteTree};
use crate::WorktreeError;

/// The manifest contents after a load.
pub struct LoadedManifest {
    /// The commit materialized by the previous run.
    pub have: Option<ObjectId>,
    pub remote: RemoteTree,
}

/// Load the manifest at `path`. When `rebuild_trees` is set (every run but
/// a clone), each directory block is reassembled into a tree object and
/// inserted into `store`.
///
/// Malformed lines are skipped with a warning; they never abort a run.
pub fn load_manifest(
    path: &Path,
    store: &mut ObjectStore,
    rebuild_trees: bool,
) -> Result<LoadedManifest, WorktreeError> {
    let data = std::fs::read(path)?;
    let mut lines = data.split(|&b| b == b'\n');

    let have = lines
        .next()
        .and_then(|line| std::str::from_utf8(line).ok())
        .and_then(|line| ObjectId::from_hex(line).ok());

    let mut remote = RemoteTree::new();
    let mut base_path = PathBuf::new();
    let mut tree_payload: Vec<u8> = Vec::new();

    for line in lines {
        if line.is_empty() {
            // End of a directory block.
            if !tree_payload.is_empty() {
                if rebuild_trees {
                    store.insert(ObjectKind::Tree, std::mem::take(&mut tree_payload))?;
                } else {
                    tree_payload.clear();
                }
            }
            continue;
        }

        let Some((mode, id, rest)) = parse_line(line) else {
            eprintln!(
                " ! Malformed line '{}' in {}.  Skipping...",
                line.as_bstr(),
                path.display()
            );
            continue;
        };

        let node_path = if rest.last() == Some(&b'/') {
            // A directory's own line: switches the base for the names that
            // follow.
            let dir = bytes_to_path(&rest[..rest.len() - 1]);
            base_path = dir.clone();
            dir
        } else {
            // An entry line: part of the current tree's payload.
            tree_payload.extend_from_slice(mode.to_octal().as_bytes());
            tree_payload.push(b' ');
            tree_payload.extend_from_slice(rest);
            tree_payload.push(0);
            tree_payload.extend_from_slice(id.as_bytes());

            base_path.join(bytes_to_path(rest))
        };

        // The first node recorded for a path wins; a directory's own line
        // lands before its entry line in the parent's block.
        remote
            .entry(node_path)
            .or_insert_with(|| FileNode::new(mode, Some(id)));
    }

    Ok(LoadedManifest { have, remote })
}

/// Split `<octal-mode>\t<40-hex>\t<rest>`. The hash field is fixed-width,
/// so paths are free to contain tabs.
fn parse_line(line: &[u8]) -> Option<(FileMode, ObjectId, &[u8])> {
    let tab = line.iter().position(|&b| b == b'\t')?;
    let mode = FileMode::from_octal(&line[..tab]).ok()?;

    let rest = &line[tab + 1..];
    if rest.len() < 42 || !hex::is_hex(&rest[..40]) || rest[40] != b'\t' {
        return None;
    }
    let id = ObjectId::from_hex(std::str::from_utf8(&rest[..40]).ok()?).ok()?;

    Some((mode, id, &rest[41..]))
}

fn bytes_to_path(bytes: &[u8]) -> PathBuf {
    use std::os::unix::ffi::OsStringExt;
    PathBuf::from(std::ffi::OsString::from_vec(bytes.to_vec()))
}

/// Streams the new manifest into a `.new` sibling, renamed over the real
/// file only on [`commit`](ManifestWriter::commit).
pub struct ManifestWriter {
    out: BufWriter<File>,
    temp_path: PathBuf,
    final_path: PathBuf,
}

impl ManifestWriter {
    pub fn create(path: &Path, have: &ObjectId) -> Result<Self, WorktreeError> {
        let mut temp_path = path.as_os_str().to_os_string();
        temp_path.push(".new");
        let temp_path = PathBuf::from(temp_path);

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o644)
            .open(&temp_path)
            .map_err(|source| WorktreeError::Storage {
                path: temp_path.clone(),
                source,
            })?;
        let mut out = BufWriter::new(file);
        writeln!(out, "{have}")?;

        Ok(Self {
            out,
            temp_path,
            final_path: path.to_path_buf(),
        })
    }

    /// Append one directory block. The caller supplies the lines; the
    /// terminating blank line is added here.
    pub fn write_block(&mut self, block: &[u8]) -> Result<(), WorktreeError> {
        self.out.write_all(block)?;
        self.out.write_all(b"\n")?;
        Ok(())
    }

    /// Format one manifest line.
    pub fn format_line(mode: FileMode, id: &ObjectId, name: &[u8], directory: bool) -> Vec<u8> {
        let mut line = Vec::with_capacity(name.len() + 50);
        line.extend_from_slice(mode.to_octal().as_bytes());
        line.push(b'\t');
        line.extend_from_slice(id.to_hex().as_bytes());
        line.push(b'\t');
        line.extend_from_slice(name);
        if directory {
            line.push(b'/');
        }
        line.push(b'\n');
        line
    }

    /// Atomically replace the manifest.
    pub fn commit(self) -> Result<(), WorktreeError> {
        let file = self
            .out
            .into_inner()
            .map_err(|e| WorktreeError::Io(e.into_error()))?;
        file.sync_all().ok();
        std::fs::rename(&self.temp_path, &self.final_path).map_err(|source| {
            WorktreeError::ManifestReplace {
                path: self.final_path.clone(),
                source,
            }
        })
    }
}

/// The absolute-path line opening a directory's block.
pub(crate) fn directory_line(id: &ObjectId, path: &Path) -> Vec<u8> {
    ManifestWriter::format_line(FileMode::DIR, id, path.as_os_str().as_bytes(), true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use treeup_hash::Hasher;

    fn oid(fill: u8) -> ObjectId {
        ObjectId::from_bytes(&[fill; 20]).unwrap()
    }

    #[test]
    fn line_parsing_uses_fixed_width_hash() {
        let line = format!("100644\t{}\tname\twith\ttabs", oid(0x42));
        let (mode, id, rest) = parse_line(line.as_bytes()).unwrap();
        assert_eq!(mode, FileMode(0o100644));
        assert_eq!(id, oid(0x42));
        assert_eq!(rest, b"name\twith\ttabs");
    }

    #[test]
    fn malformed_lines_are_rejected() {
        assert!(parse_line(b"").is_none());
        assert!(parse_line(b"100644").is_none());
        assert!(parse_line(b"100644\tnothex").is_none());
        let no_path = format!("100644\t{}", oid(1));
        assert!(parse_line(no_path.as_bytes()).is_none());
    }

    #[test]
    fn write_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let manifest_path = dir.path().join("section");
        let have = oid(0xaa);

        let file_id = Hasher::hash_object("blob", b"content\n").unwrap();
        let tree_payload = {
            let mut p = Vec::new();
            p.extend_from_slice(b"100644 a.txt\0");
            p.extend_from_slice(file_id.as_bytes());
            p
        };
        let tree_id = Hasher::hash_object("tree", &tree_payload).unwrap();

        let mut writer = ManifestWriter::create(&manifest_path, &have).unwrap();
        let mut block = directory_line(&tree_id, Path::new("/t"));
        block.extend_from_slice(&ManifestWriter::format_line(
            FileMode(0o100644),
            &file_id,
            b"a.txt",
            false,
        ));
        writer.write_block(&block).unwrap();
        writer.commit().unwrap();

        assert!(!manifest_path.with_extension("new").exists());

        let mut store = ObjectStore::new();
        let loaded = load_manifest(&manifest_path, &mut store, true).unwrap();
        assert_eq!(loaded.have, Some(have));

        let dir_node = &loaded.remote[Path::new("/t")];
        assert_eq!(dir_node.id, Some(tree_id));
        assert!(dir_node.mode.is_dir());

        let file_node = &loaded.remote[Path::new("/t/a.txt")];
        assert_eq!(file_node.id, Some(file_id));

        // The reconstructed tree payload hashes back to the recorded id.
        assert!(store.contains(&tree_id));
    }

    #[test]
    fn malformed_line_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("section");
        let good = format!(
            "{}\n40000\t{}\t/t/\nnot a manifest line\n100644\t{}\ta\n\n",
            oid(0x01),
            oid(0x02),
            oid(0x03)
        );
        std::fs::write(&path, good).unwrap();

        let mut store = ObjectStore::new();
        let loaded = load_manifest(&path, &mut store, false).unwrap();
        assert_eq!(loaded.have, Some(oid(0x01)));
        assert_eq!(loaded.remote.len(), 2);
    }

    #[test]
    fn clone_mode_skips_tree_rebuild() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("section");
        let text = format!(
            "{}\n40000\t{}\t/t/\n100644\t{}\ta\n\n",
            oid(0x01),
            oid(0x02),
            oid(0x03)
        );
        std::fs::write(&path, text).unwrap();

        let mut store = ObjectStore::new();
        load_manifest(&path, &mut store, false).unwrap();
        assert!(store.is_empty());
    }
}
