//! Typed objects and the shared object frame.
//!
//! A loose object file inflates to `"<type> <decimal-size>\0"` followed by
//! exactly `<size>` body bytes. Packed entries carry type and size in the
//! entry header instead, so the frame parser runs only on the loose path;
//! both paths meet at [`Object::new`], the boundary where only commits,
//! trees, and blobs are accepted as typed objects.
//!
//! Tag entries decode fine below this boundary (a tag may serve as a delta
//! base) but constructing a typed `Object` from one is an error.

use std::fmt;

use crate::commit::Commit;
use crate::errors::Error;
use crate::tree::Tree;

/// Object type tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectKind {
    Commit,
    Tree,
    Blob,
    Tag,
}

impl ObjectKind {
    /// Returns the on-disk type name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Commit => "commit",
            Self::Tree => "tree",
            Self::Blob => "blob",
            Self::Tag => "tag",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from parsing a loose object frame.
#[derive(Debug, PartialEq, Eq)]
pub enum FrameError {
    /// No NUL terminator within the inflated bytes.
    MissingTerminator,
    /// Header is not `<type> <size>`.
    MalformedHeader,
    /// Type name is not one of the four object types.
    UnknownKind,
    /// Size field is not a decimal number.
    BadSize,
    /// Body length does not match the declared size.
    SizeMismatch { declared: u64, actual: u64 },
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingTerminator => write!(f, "object frame missing NUL terminator"),
            Self::MalformedHeader => write!(f, "malformed object frame header"),
            Self::UnknownKind => write!(f, "unknown object type in frame"),
            Self::BadSize => write!(f, "invalid size in object frame"),
            Self::SizeMismatch { declared, actual } => {
                write!(f, "object size mismatch: declared {declared}, got {actual}")
            }
        }
    }
}

impl std::error::Error for FrameError {}

/// An immutable object loaded from the database.
///
/// The body is fully materialised; `size` always equals the body length
/// (the loose frame and the pack entry header are both validated against
/// the inflated byte count before an `Object` exists).
#[derive(Debug)]
pub struct Object {
    kind: ObjectKind,
    size: u64,
    data: Vec<u8>,
}

impl Object {
    /// Constructs a typed object from a decoded kind and body.
    ///
    /// This is the typed boundary: tags are rejected here with
    /// `UnknownType`, even though they decode fine as raw entries.
    pub(crate) fn new(kind: ObjectKind, data: Vec<u8>) -> Result<Self, Error> {
        match kind {
            ObjectKind::Commit | ObjectKind::Tree | ObjectKind::Blob => Ok(Self {
                kind,
                size: data.len() as u64,
                data,
            }),
            ObjectKind::Tag => Err(Error::UnknownType { kind }),
        }
    }

    /// Returns the object's type tag.
    #[inline]
    #[must_use]
    pub const fn kind(&self) -> ObjectKind {
        self.kind
    }

    /// Returns the declared body size in bytes.
    #[inline]
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }

    /// Returns the object body.
    #[inline]
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Consumes the object, returning the body.
    #[inline]
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Parses the body as a commit.
    ///
    /// # Errors
    /// `NotACommit` if the object is a tree or blob; `BadCommit` if the
    /// body does not parse.
    pub fn commit(&self) -> Result<Commit, Error> {
        if self.kind != ObjectKind::Commit {
            return Err(Error::NotACommit { kind: self.kind });
        }
        Commit::parse(&self.data).map_err(Error::BadCommit)
    }

    /// Parses the body as a tree.
    ///
    /// # Errors
    /// `NotATree` if the object is a commit or blob; `BadTree` if the
    /// body does not parse.
    pub fn tree(&self) -> Result<Tree, Error> {
        if self.kind != ObjectKind::Tree {
            return Err(Error::NotATree { kind: self.kind });
        }
        Tree::parse(&self.data).map_err(Error::BadTree)
    }
}

/// Parses an inflated loose object into its kind and body.
///
/// The declared size must match the byte count after the NUL exactly.
pub(crate) fn parse_frame(bytes: &[u8]) -> Result<(ObjectKind, Vec<u8>), FrameError> {
    let nul = bytes
        .iter()
        .position(|&b| b == 0)
        .ok_or(FrameError::MissingTerminator)?;

    let header = &bytes[..nul];
    let space = header
        .iter()
        .position(|&b| b == b' ')
        .ok_or(FrameError::MalformedHeader)?;

    let kind = match &header[..space] {
        b"commit" => ObjectKind::Commit,
        b"tree" => ObjectKind::Tree,
        b"blob" => ObjectKind::Blob,
        b"tag" => ObjectKind::Tag,
        _ => return Err(FrameError::UnknownKind),
    };

    let declared = parse_decimal(&header[space + 1..]).ok_or(FrameError::BadSize)?;
    let body = &bytes[nul + 1..];
    if body.len() as u64 != declared {
        return Err(FrameError::SizeMismatch {
            declared,
            actual: body.len() as u64,
        });
    }

    Ok((kind, body.to_vec()))
}

fn parse_decimal(bytes: &[u8]) -> Option<u64> {
    if bytes.is_empty() {
        return None;
    }
    let mut value: u64 = 0;
    for &b in bytes {
        if !b.is_ascii_digit() {
            return None;
        }
        value = value.checked_mul(10)?.checked_add(u64::from(b - b'0'))?;
    }
    Some(value)
}
