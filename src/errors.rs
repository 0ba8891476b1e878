//! Crate-level error type.
//!
//! Each parsing stage raises its own error enum next to the code that
//! detects the problem; this module aggregates them behind one `Error`
//! for the public surface, together with the facade-level kinds (invalid
//! repo, not found, unknown ref, type mismatches).
//!
//! `NotFound` is the loader fall-through signal: the repository swallows
//! it while iterating loaders and tries the next one. Every other error
//! aborts the current call; nothing is retried or downgraded.

use std::fmt;
use std::io;
use std::path::PathBuf;

use crate::commit::CommitParseError;
use crate::delta::DeltaError;
use crate::inflate::InflateError;
use crate::object::{FrameError, ObjectKind};
use crate::object_id::ParseIdError;
use crate::pack_entry::PackParseError;
use crate::pack_idx::IdxError;
use crate::tree::TreeParseError;

/// Errors from object database reads.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// No objects directory at any tried location.
    InvalidRepo { path: PathBuf },
    /// The object id is not present in the queried loader(s).
    NotFound,
    /// The name is neither a reference file nor a commit id.
    UnknownRef { name: String },
    /// A typed object was requested for a kind outside commit/tree/blob.
    UnknownType { kind: ObjectKind },
    /// The resolved object is not a commit.
    NotACommit { kind: ObjectKind },
    /// The walked object is not a tree.
    NotATree { kind: ObjectKind },
    /// The target object is not a blob.
    NotABlob { kind: ObjectKind },
    /// A textual object id failed to parse.
    BadId(ParseIdError),
    /// The pack index is malformed or unsupported.
    BadIndex(IdxError),
    /// The pack data is malformed or unsupported.
    BadPack(PackParseError),
    /// A delta stream is malformed.
    BadDelta(DeltaError),
    /// A loose object frame is malformed.
    BadFrame(FrameError),
    /// A commit body is malformed.
    BadCommit(CommitParseError),
    /// A tree body is malformed.
    BadTree(TreeParseError),
    /// A ref-delta chain crossed more loader hops than allowed.
    DeltaChainTooDeep { max: u8 },
    /// Zlib inflation failed.
    Inflate(InflateError),
    /// An underlying filesystem operation failed.
    Io(io::Error),
}

impl Error {
    /// Returns true for the loader-level *not found* signal.
    #[inline]
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidRepo { path } => {
                write!(f, "invalid repo: no objects directory under {}", path.display())
            }
            Self::NotFound => write!(f, "object not found"),
            Self::UnknownRef { name } => write!(f, "unknown ref: {name}"),
            Self::UnknownType { kind } => write!(f, "unknown object type: {kind}"),
            Self::NotACommit { kind } => write!(f, "object is a {kind}, not a commit"),
            Self::NotATree { kind } => write!(f, "object is a {kind}, not a tree"),
            Self::NotABlob { kind } => write!(f, "object is a {kind}, not a blob"),
            Self::BadId(err) => write!(f, "{err}"),
            Self::BadIndex(err) => write!(f, "{err}"),
            Self::BadPack(err) => write!(f, "bad pack: {err}"),
            Self::BadDelta(err) => write!(f, "{err}"),
            Self::BadFrame(err) => write!(f, "{err}"),
            Self::BadCommit(err) => write!(f, "{err}"),
            Self::BadTree(err) => write!(f, "{err}"),
            Self::DeltaChainTooDeep { max } => {
                write!(f, "ref-delta chain exceeded {max} loader hops")
            }
            Self::Inflate(err) => write!(f, "{err}"),
            Self::Io(err) => write!(f, "I/O error: {err}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::BadId(err) => Some(err),
            Self::BadIndex(err) => Some(err),
            Self::BadPack(err) => Some(err),
            Self::BadDelta(err) => Some(err),
            Self::BadFrame(err) => Some(err),
            Self::BadCommit(err) => Some(err),
            Self::BadTree(err) => Some(err),
            Self::Inflate(err) => Some(err),
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<ParseIdError> for Error {
    fn from(err: ParseIdError) -> Self {
        Self::BadId(err)
    }
}

impl From<IdxError> for Error {
    fn from(err: IdxError) -> Self {
        Self::BadIndex(err)
    }
}

impl From<PackParseError> for Error {
    fn from(err: PackParseError) -> Self {
        Self::BadPack(err)
    }
}

impl From<DeltaError> for Error {
    fn from(err: DeltaError) -> Self {
        Self::BadDelta(err)
    }
}

impl From<FrameError> for Error {
    fn from(err: FrameError) -> Self {
        Self::BadFrame(err)
    }
}

impl From<InflateError> for Error {
    fn from(err: InflateError) -> Self {
        Self::Inflate(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_is_the_only_fall_through() {
        assert!(Error::NotFound.is_not_found());
        assert!(!Error::UnknownRef {
            name: "HEAD".into()
        }
        .is_not_found());
        assert!(!Error::Io(io::Error::new(io::ErrorKind::NotFound, "x")).is_not_found());
    }

    #[test]
    fn wrapped_errors_keep_their_source() {
        use std::error::Error as _;
        let err = Error::BadDelta(DeltaError::BadOpcodeZero);
        assert!(err.source().is_some());
        assert_eq!(err.to_string(), "bad delta: opcode zero");
    }
}
