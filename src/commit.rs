//! Parser for commit object bodies.
//!
//! A commit body is a run of `<key> <value>` header lines, a blank line,
//! and a free-form message:
//!
//! ```text
//! tree <hex-oid>\n
//! parent <id>\n        (zero or more; the last one is kept)
//! author <name> <email> <timestamp> <tz>\n
//! committer <name> <email> <timestamp> <tz>\n
//! \n
//! <message>
//! ```
//!
//! Only the headers needed for tree walking are interpreted; author and
//! committer lines are kept verbatim. An unrecognised header key is
//! reported as corruption rather than skipped.

use std::fmt;

use crate::object_id::ObjectId;

/// Errors from commit parsing.
#[derive(Debug, PartialEq, Eq)]
pub enum CommitParseError {
    /// Commit body is corrupt or malformed.
    Corrupt { detail: &'static str },
    /// A header line has an unrecognised key.
    UnknownHeader { key: String },
}

impl CommitParseError {
    #[inline]
    pub(crate) const fn corrupt(detail: &'static str) -> Self {
        Self::Corrupt { detail }
    }
}

impl fmt::Display for CommitParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Corrupt { detail } => write!(f, "corrupt commit: {detail}"),
            Self::UnknownHeader { key } => write!(f, "unknown commit header: {key}"),
        }
    }
}

impl std::error::Error for CommitParseError {}

/// Parsed commit data.
#[derive(Debug, Clone)]
pub struct Commit {
    /// The tree this commit points at.
    pub tree: ObjectId,
    /// The last `parent` header, verbatim (absent for root commits).
    pub parent: Option<String>,
    /// The `author` line, verbatim.
    pub author: String,
    /// The `committer` line, verbatim.
    pub committer: String,
    /// Message text after the blank line.
    pub message: String,
}

impl Commit {
    /// Parses a commit body (decompressed, no object frame).
    pub fn parse(body: &[u8]) -> Result<Self, CommitParseError> {
        let mut tree = None;
        let mut parent = None;
        let mut author = None;
        let mut committer = None;

        let mut rest = body;
        loop {
            let line_end = rest
                .iter()
                .position(|&b| b == b'\n')
                .ok_or(CommitParseError::corrupt("missing blank line"))?;
            let line = &rest[..line_end];
            rest = &rest[line_end + 1..];

            if line.is_empty() {
                break;
            }

            let space = line
                .iter()
                .position(|&b| b == b' ')
                .ok_or(CommitParseError::corrupt("header line without value"))?;
            let (key, value) = (&line[..space], &line[space + 1..]);
            let value = String::from_utf8_lossy(value).into_owned();

            match key {
                b"tree" => {
                    let id = ObjectId::from_hex(&value)
                        .map_err(|_| CommitParseError::corrupt("bad tree id"))?;
                    tree = Some(id);
                }
                b"parent" => parent = Some(value),
                b"author" => author = Some(value),
                b"committer" => committer = Some(value),
                _ => {
                    return Err(CommitParseError::UnknownHeader {
                        key: String::from_utf8_lossy(key).into_owned(),
                    })
                }
            }
        }

        Ok(Self {
            tree: tree.ok_or(CommitParseError::corrupt("missing tree header"))?,
            parent,
            author: author.unwrap_or_default(),
            committer: committer.unwrap_or_default(),
            message: String::from_utf8_lossy(rest).into_owned(),
        })
    }
}
