//! Request bodies for the version-2 fetch protocol.

use treeup_hash::ObjectId;

use crate::pktline::PktLineWriter;
use crate::ProtocolError;

/// Ceiling on the aggregate size of `want` lines in a repair fetch; past
/// this the repair is infeasible and a re-clone is the answer.
pub const REPAIR_WANT_LIMIT: usize = 3_276_800;

/// Bytes of one `want <hash>\n` pkt-line frame.
const WANT_LINE_LEN: usize = 4 + 5 + 40 + 1;

/// Reference discovery: `ls-refs` with peel, symrefs, and the three ref
/// prefixes a synchronizer cares about.
pub fn ls_refs() -> Vec<u8> {
    let mut writer = PktLineWriter::new(Vec::new());
    writer.write_line(b"command=ls-refs\n").unwrap();
    writer.write_line(b"object-format=sha1").unwrap();
    writer.write_delimiter().unwrap();
    writer.write_line(b"peel\n").unwrap();
    writer.write_line(b"symrefs\n").unwrap();
    writer.write_line(b"ref-prefix HEAD\n").unwrap();
    writer.write_line(b"ref-prefix refs/heads/\n").unwrap();
    writer.write_line(b"ref-prefix refs/tags/\n").unwrap();
    writer.write_flush().unwrap();
    writer.into_inner()
}

/// A full shallow fetch of `want`.
pub fn clone_fetch(want: &ObjectId) -> Vec<u8> {
    let mut writer = PktLineWriter::new(Vec::new());
    writer.write_line(b"command=fetch").unwrap();
    writer.write_delimiter().unwrap();
    writer.write_line(b"no-progress").unwrap();
    writer.write_line(b"ofs-delta").unwrap();
    writer
        .write_line(format!("shallow {want}").as_bytes())
        .unwrap();
    writer
        .write_line(format!("want {want}\n").as_bytes())
        .unwrap();
    writer.write_line(b"done\n").unwrap();
    writer.write_flush().unwrap();
    writer.into_inner()
}

/// An incremental fetch: everything reachable from `want` at depth 1 that
/// is not already in `have`.
pub fn pull_fetch(want: &ObjectId, have: &ObjectId) -> Vec<u8> {
    let mut writer = PktLineWriter::new(Vec::new());
    writer.write_line(b"command=fetch").unwrap();
    writer.write_delimiter().unwrap();
    writer.write_line(b"thin-pack").unwrap();
    writer.write_line(b"no-progress").unwrap();
    writer.write_line(b"ofs-delta").unwrap();
    writer
        .write_line(format!("shallow {want}").as_bytes())
        .unwrap();
    writer
        .write_line(format!("shallow {have}").as_bytes())
        .unwrap();
    writer.write_line(b"deepen 1").unwrap();
    writer
        .write_line(format!("want {want}\n").as_bytes())
        .unwrap();
    writer
        .write_line(format!("have {have}\n").as_bytes())
        .unwrap();
    writer.write_line(b"done\n").unwrap();
    writer.write_flush().unwrap();
    writer.into_inner()
}

/// A repair fetch: one `want` per missing or mismatched blob, no commits.
///
/// Returns `None` when there is nothing to repair.
pub fn repair_fetch(wants: &[ObjectId]) -> Result<Option<Vec<u8>>, ProtocolError> {
    if wants.is_empty() {
        return Ok(None);
    }
    let want_size = wants.len() * WANT_LINE_LEN;
    if want_size > REPAIR_WANT_LIMIT {
        return Err(ProtocolError::RepairTooLarge { size: want_size });
    }

    let mut writer = PktLineWriter::new(Vec::new());
    writer.write_line(b"command=fetch").unwrap();
    writer.write_delimiter().unwrap();
    writer.write_line(b"thin-pack").unwrap();
    writer.write_line(b"no-progress").unwrap();
    writer.write_line(b"ofs-delta").unwrap();
    for want in wants {
        writer
            .write_line(format!("want {want}\n").as_bytes())
            .unwrap();
    }
    writer.write_line(b"deepen 1").unwrap();
    writer.write_line(b"done\n").unwrap();
    writer.write_flush().unwrap();
    Ok(Some(writer.into_inner()))
}
