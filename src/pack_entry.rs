//! Pack data (`.pack`) framing and entry header decoding.
//!
//! A pack data file is `"PACK"`, a big-endian version (2), a big-endian
//! object count, a stream of variable-length entries, and a trailing
//! 20-byte checksum. The object count and checksum are not consumed; the
//! trailer is excluded from the decodable region so corrupt offsets can
//! never misparse the checksum as an entry.
//!
//! An entry header packs three things into its first byte: continuation
//! bit, a 3-bit type code, and the low 4 bits of the uncompressed size.
//! Continuation bytes contribute 7 more size bits each at shifts 4, 11,
//! 18, ... For deltified entries the header is followed by the base
//! reference: an offset varint (ofs-delta) or a raw 20-byte id
//! (ref-delta). The zlib payload starts immediately after.
//!
//! For delta entries `size` is the inflated delta stream length, not the
//! final object length; the delta stream carries the result length itself.

use std::fmt;

use crate::object::ObjectKind;
use crate::object_id::ObjectId;
use crate::span::{read_ofs_varint, Span, SpanError};

/// Pack header size: magic(4) + version(4) + object count(4).
pub(crate) const PACK_HEADER_SIZE: usize = 12;
/// Trailing pack checksum length.
const PACK_TRAILER_SIZE: usize = ObjectId::RAW_LEN;
/// Safety bound on entry header bytes, including the base reference.
const MAX_ENTRY_HEADER_BYTES: usize = 32;

const PACK_MAGIC: &[u8; 4] = b"PACK";
const PACK_VERSION: u32 = 2;

/// Errors from pack framing and entry header parsing.
#[derive(Debug, PartialEq, Eq)]
pub enum PackParseError {
    /// File is smaller than header plus trailer.
    TooSmall,
    /// File does not start with `PACK`.
    BadSignature,
    /// Pack version is not 2.
    UnsupportedVersion { version: u32 },
    /// Offset does not point into the entry region.
    OffsetOutOfRange { offset: u32 },
    /// Entry header ran past its safety bound.
    HeaderTooLong,
    /// Entry header ran off the end of the data region.
    Truncated,
    /// Type code is reserved or unknown.
    BadObjType { code: u8 },
    /// Ofs-delta base distance is zero or reaches before the pack start.
    OfsUnderflow,
}

impl fmt::Display for PackParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooSmall => write!(f, "pack too small"),
            Self::BadSignature => write!(f, "bad pack signature"),
            Self::UnsupportedVersion { version } => {
                write!(f, "unsupported pack version {version}")
            }
            Self::OffsetOutOfRange { offset } => write!(f, "pack offset {offset} out of range"),
            Self::HeaderTooLong => write!(f, "entry header exceeded safety bound"),
            Self::Truncated => write!(f, "truncated pack entry"),
            Self::BadObjType { code } => write!(f, "bad object type code {code}"),
            Self::OfsUnderflow => write!(f, "ofs-delta base distance out of range"),
        }
    }
}

impl std::error::Error for PackParseError {}

/// Decoded pack entry kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum EntryKind {
    /// Full object: commit, tree, blob, or tag.
    NonDelta { kind: ObjectKind },
    /// Delta whose base starts at `base_offset` in the same pack.
    OfsDelta { base_offset: u32 },
    /// Delta whose base is named by id and may live anywhere.
    RefDelta { base_id: ObjectId },
}

/// Decoded entry header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct EntryHeader {
    /// Inflated payload size (for deltas: the delta stream, not the result).
    pub(crate) size: u64,
    /// Offset where the zlib stream begins.
    pub(crate) data_start: usize,
    /// Entry kind with any base reference.
    pub(crate) kind: EntryKind,
}

/// Validates pack framing and returns the end of the entry region
/// (everything before the trailing checksum).
pub(crate) fn validate_pack(data: &[u8]) -> Result<usize, PackParseError> {
    if data.len() < PACK_HEADER_SIZE + PACK_TRAILER_SIZE {
        return Err(PackParseError::TooSmall);
    }
    if &data[..4] != PACK_MAGIC {
        return Err(PackParseError::BadSignature);
    }
    let version = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
    if version != PACK_VERSION {
        return Err(PackParseError::UnsupportedVersion { version });
    }
    Ok(data.len() - PACK_TRAILER_SIZE)
}

/// Parses the entry header at `offset`.
///
/// `data_end` is the value returned by [`validate_pack`]; header bytes and
/// base references must lie entirely inside the entry region.
pub(crate) fn entry_header_at(
    data: &[u8],
    data_end: usize,
    offset: u32,
) -> Result<EntryHeader, PackParseError> {
    let start = offset as usize;
    if start < PACK_HEADER_SIZE || start >= data_end {
        return Err(PackParseError::OffsetOutOfRange { offset });
    }

    let region = &data[..data_end];
    let span = Span::new(region);
    let mut pos = start;

    let first = span.byte_at(pos).map_err(truncated)?;
    pos += 1;

    let obj_type = (first >> 4) & 0x07;
    let mut size = u64::from(first & 0x0f);
    let mut shift: u32 = 4;

    let mut byte = first;
    while byte & 0x80 != 0 {
        if pos - start >= MAX_ENTRY_HEADER_BYTES {
            return Err(PackParseError::HeaderTooLong);
        }
        byte = span.byte_at(pos).map_err(truncated)?;
        pos += 1;
        size |= u64::from(byte & 0x7f) << shift;
        shift += 7;
        if shift > 63 {
            return Err(PackParseError::HeaderTooLong);
        }
    }

    let kind = match obj_type {
        1 => EntryKind::NonDelta {
            kind: ObjectKind::Commit,
        },
        2 => EntryKind::NonDelta {
            kind: ObjectKind::Tree,
        },
        3 => EntryKind::NonDelta {
            kind: ObjectKind::Blob,
        },
        4 => EntryKind::NonDelta {
            kind: ObjectKind::Tag,
        },
        6 => {
            let distance = read_ofs_varint(region, &mut pos).map_err(|err| match err {
                SpanError::Truncated => PackParseError::Truncated,
                SpanError::Overflow => PackParseError::HeaderTooLong,
            })?;
            if pos - start > MAX_ENTRY_HEADER_BYTES {
                return Err(PackParseError::HeaderTooLong);
            }
            // A zero distance would alias the entry itself; a distance past
            // the entry start points before the pack.
            if distance == 0 || distance > u64::from(offset) {
                return Err(PackParseError::OfsUnderflow);
            }
            EntryKind::OfsDelta {
                base_offset: offset - distance as u32,
            }
        }
        7 => {
            let raw = span.slice(pos, ObjectId::RAW_LEN).map_err(truncated)?;
            let base_id = ObjectId::try_from_slice(raw).ok_or(PackParseError::Truncated)?;
            pos += ObjectId::RAW_LEN;
            EntryKind::RefDelta { base_id }
        }
        code => return Err(PackParseError::BadObjType { code }),
    };

    Ok(EntryHeader {
        size,
        data_start: pos,
        kind,
    })
}

#[inline]
fn truncated(_err: SpanError) -> PackParseError {
    PackParseError::Truncated
}
