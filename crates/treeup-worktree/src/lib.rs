//! The working-tree side of treeup: scanning the local tree, loading and
//! rewriting the persisted manifest, and materializing a committed tree —
//! reconciling remote state against what is on disk, writing what changed,
//! and pruning what disappeared.

mod manifest;
mod materialize;
mod node;
mod report;
mod scan;

pub use manifest::{load_manifest, LoadedManifest, ManifestWriter};
pub use materialize::{write_revision, SyncContext};
pub use node::{FileNode, IgnoreList, LocalTree, RemoteTree};
pub use report::Reporter;
pub use scan::scan_local;

use std::path::PathBuf;

use treeup_hash::{HashError, ObjectId};
use treeup_object::ObjectError;
use treeup_pack::PackError;

/// Errors produced while scanning, materializing, or pruning.
#[derive(Debug, thiserror::Error)]
pub enum WorktreeError {
    #[error(
        "a .git directory was found at {0} -- treeup does not update working \
         trees managed by git; please remove it and rerun"
    )]
    GitDirFound(PathBuf),

    #[error("cannot scan {path}: {source}")]
    Scan {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("commit {0} cannot be found in the fetched objects")]
    CommitNotFound(ObjectId),

    #[error("tree {id} for {path} cannot be found")]
    MissingTree { path: PathBuf, id: ObjectId },

    #[error("file {path} -- {id} cannot be found")]
    MissingObject { path: PathBuf, id: ObjectId },

    #[error("{path} is not located in the {target} tree")]
    OutsideTarget { path: PathBuf, target: PathBuf },

    #[error("illegal path traverse in {0}")]
    PathTraversal(PathBuf),

    #[error("cannot write {path}: {source}")]
    Storage {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot replace manifest {path}: {source}")]
    ManifestReplace {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Object(#[from] ObjectError),

    #[error(transparent)]
    Pack(#[from] PackError),

    #[error(transparent)]
    Hash(#[from] HashError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
