//! Object model for treeup: object kinds, file modes, tree entry
//! parsing/serialization, and commit root-tree extraction.
//!
//! Only the pieces of the git object model a working-tree synchronizer
//! needs: there is no author/committer parsing and no tag object model —
//! a peeled tag is just a commit hash by the time it reaches this crate.

mod commit;
mod mode;
mod tree;

pub use commit::Commit;
pub use mode::FileMode;
pub use tree::{Tree, TreeEntry};

use bstr::BString;
use treeup_hash::HashError;

/// Errors produced by object parsing.
#[derive(Debug, thiserror::Error)]
pub enum ObjectError {
    #[error("invalid object kind: {0}")]
    InvalidKind(BString),

    #[error("invalid tree entry at offset {offset}: {reason}")]
    InvalidTreeEntry { offset: usize, reason: String },

    #[error("invalid commit: {0}")]
    InvalidCommit(String),

    #[error("invalid file mode: {0}")]
    InvalidFileMode(String),

    #[error(transparent)]
    Hash(#[from] HashError),
}

/// The four materialized object kinds.
///
/// Delta entries exist only inside a pack stream; by the time an object is
/// addressed by hash it has one of these kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Commit,
    Tree,
    Blob,
    Tag,
}

impl ObjectKind {
    /// Parse from the kind string used in object headers.
    pub fn from_bytes(s: &[u8]) -> Result<Self, ObjectError> {
        match s {
            b"commit" => Ok(Self::Commit),
            b"tree" => Ok(Self::Tree),
            b"blob" => Ok(Self::Blob),
            b"tag" => Ok(Self::Tag),
            _ => Err(ObjectError::InvalidKind(BString::from(s))),
        }
    }

    /// The canonical header spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Commit => "commit",
            Self::Tree => "tree",
            Self::Blob => "blob",
            Self::Tag => "tag",
        }
    }
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
