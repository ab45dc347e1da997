use treeup_hash::ObjectId;

use crate::ObjectError;

/// The slice of a commit object a tree synchronizer needs: the root tree.
///
/// A commit payload begins with `tree <40-hex>\n`; the author, committer,
/// parents and message are irrelevant here and are not modeled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Commit {
    pub tree: ObjectId,
}

impl Commit {
    /// Parse the root tree hash out of a commit payload.
    pub fn parse(payload: &[u8]) -> Result<Self, ObjectError> {
        let rest = payload
            .strip_prefix(b"tree ")
            .ok_or_else(|| ObjectError::InvalidCommit("payload does not start with 'tree '".into()))?;
        if rest.len() < 40 {
            return Err(ObjectError::InvalidCommit("truncated tree hash".into()));
        }
        let hex = std::str::from_utf8(&rest[..40])
            .map_err(|_| ObjectError::InvalidCommit("tree hash is not ASCII".into()))?;
        let tree = ObjectId::from_hex(hex)?;
        Ok(Self { tree })
    }
}
