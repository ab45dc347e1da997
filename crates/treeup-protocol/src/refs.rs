//! Reference discovery: parsing the `ls-refs` response and picking the
//! commit to fetch.

use std::io::Cursor;

use time::{Date, OffsetDateTime};
use treeup_hash::ObjectId;

use crate::pktline::{PktLine, PktLineReader};
use crate::ProtocolError;

/// One advertised reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisedRef {
    pub oid: ObjectId,
    pub name: String,
    /// The commit a tag points at, when the server peeled it.
    pub peeled: Option<ObjectId>,
    pub symref_target: Option<String>,
}

/// What the configuration asked to synchronize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefChoice {
    Branch(String),
    Tag(String),
    /// `refs/heads/<YYYY>Q<n>`, falling back to the previous quarter.
    Quarterly,
}

/// Check the `info/refs` capability advertisement for version 2 support.
pub fn server_supports_v2(body: &[u8]) -> bool {
    let mut reader = PktLineReader::new(Cursor::new(body));
    while let Ok(Some(pkt)) = reader.try_read_pkt() {
        if let PktLine::Data(line) = pkt {
            if trim_newline(&line) == b"version 2" {
                return true;
            }
        }
    }
    false
}

/// Parse an `ls-refs` response body into its advertised references.
///
/// Each line is `<oid> <refname>` optionally followed by
/// `symref-target:<name>` and `peeled:<oid>` attributes.
pub fn parse_ls_refs(body: &[u8]) -> Result<Vec<AdvertisedRef>, ProtocolError> {
    let mut reader = PktLineReader::new(Cursor::new(body));
    let mut refs = Vec::new();

    while let Some(pkt) = reader.try_read_pkt()? {
        let line = match pkt {
            PktLine::Data(line) => line,
            _ => continue,
        };
        let line = trim_newline(&line);
        let text = std::str::from_utf8(line)
            .map_err(|_| ProtocolError::Protocol("non-UTF-8 ls-refs line".into()))?;

        let mut fields = text.split(' ');
        let (Some(oid_hex), Some(name)) = (fields.next(), fields.next()) else {
            continue;
        };
        let oid = ObjectId::from_hex(oid_hex)
            .map_err(|e| ProtocolError::Protocol(format!("bad ref hash: {e}")))?;

        let mut peeled = None;
        let mut symref_target = None;
        for attr in fields {
            if let Some(target) = attr.strip_prefix("symref-target:") {
                symref_target = Some(target.to_string());
            } else if let Some(hex) = attr.strip_prefix("peeled:") {
                peeled = Some(
                    ObjectId::from_hex(hex)
                        .map_err(|e| ProtocolError::Protocol(format!("bad peeled hash: {e}")))?,
                );
            }
        }

        refs.push(AdvertisedRef {
            oid,
            name: name.to_string(),
            peeled,
            symref_target,
        });
    }

    Ok(refs)
}

/// Pick the commit to fetch. Returns the hash and the resolved short name
/// (the branch or tag, with `quarterly` replaced by the actual quarter).
///
/// A peeled hash is preferred over the ref's own hash, so an annotated tag
/// resolves to the commit it tags.
pub fn select_want(
    refs: &[AdvertisedRef],
    choice: &RefChoice,
) -> Result<(ObjectId, String), ProtocolError> {
    let today = OffsetDateTime::now_utc().date();
    select_want_at(refs, choice, today)
}

/// [`select_want`] against an explicit date, for the quarterly fallback.
pub fn select_want_at(
    refs: &[AdvertisedRef],
    choice: &RefChoice,
    today: Date,
) -> Result<(ObjectId, String), ProtocolError> {
    let candidates: Vec<String> = match choice {
        RefChoice::Branch(branch) => vec![format!("refs/heads/{branch}")],
        RefChoice::Tag(tag) => vec![format!("refs/tags/{tag}")],
        RefChoice::Quarterly => vec![
            format!("refs/heads/{}", quarterly_branch(today, false)),
            format!("refs/heads/{}", quarterly_branch(today, true)),
        ],
    };

    for refname in &candidates {
        if let Some(found) = refs.iter().find(|r| &r.name == refname) {
            let oid = found.peeled.unwrap_or(found.oid);
            let short = refname
                .strip_prefix("refs/heads/")
                .or_else(|| refname.strip_prefix("refs/tags/"))
                .unwrap_or(refname)
                .to_string();
            return Ok((oid, short));
        }
    }

    Err(ProtocolError::RefNotFound {
        refname: candidates.into_iter().next().unwrap_or_default(),
    })
}

/// The quarterly branch name for `date`: `<YYYY>Q<n>`, or the preceding
/// quarter when `previous` is set.
pub fn quarterly_branch(date: Date, previous: bool) -> String {
    let month0 = date.month() as i32 - 1;
    let mut year = date.year();
    let quarter = if previous {
        if month0 < 3 {
            year -= 1;
        }
        (month0 / 3 + 3) % 4 + 1
    } else {
        month0 / 3 + 1
    };
    format!("{year:04}Q{quarter}")
}

fn trim_newline(line: &[u8]) -> &[u8] {
    match line.last() {
        Some(b'\n') => &line[..line.len() - 1],
        _ => line,
    }
}
