//! Pack index (`.idx`) version 2 lookup.
//!
//! Maps an object id to a 32-bit byte offset in the pack data file using
//! the v2 layout: magic + version, a 256-entry fan-out table of cumulative
//! counts keyed by the id's first byte, the sorted id table, a CRC-32
//! table (not consumed), and the 32-bit offset table.
//!
//! # Scope
//! - Version 2 only.
//! - Offsets with the high bit set indicate 64-bit offset indirection,
//!   which this reader rejects as unsupported.
//! - Checksum trailers are required to be present but are not verified.
//!
//! # Complexity
//! Lookup is a binary search inside one fan-out bucket: `O(log N)` with
//! no allocation.

use std::fmt;
use std::fs::File;
use std::path::Path;

use memmap2::Mmap;

use crate::errors::Error;
use crate::object_id::ObjectId;
use crate::span::Span;

/// Index magic: `\xff t O c` followed by version 2.
const IDX_MAGIC: [u8; 4] = [0xff, b't', b'O', b'c'];
const IDX_VERSION: u32 = 2;

const HEADER_SIZE: usize = 8;
const FANOUT_ENTRIES: usize = 256;
const FANOUT_SIZE: usize = FANOUT_ENTRIES * 4;
const IDS_START: usize = HEADER_SIZE + FANOUT_SIZE;
/// Trailing pack checksum + index checksum.
const TRAILER_SIZE: usize = 2 * ObjectId::RAW_LEN;

/// High bit of an offset entry selects 64-bit indirection.
const LARGE_OFFSET_FLAG: u32 = 0x8000_0000;

/// Errors from pack index parsing and lookup.
#[derive(Debug, PartialEq, Eq)]
pub enum IdxError {
    /// Index file is corrupt or malformed.
    Corrupt { detail: &'static str },
    /// Index version is not 2.
    UnsupportedVersion { version: u32 },
    /// The matched entry uses 64-bit offset indirection.
    UnsupportedOffset { id: ObjectId },
}

impl IdxError {
    #[inline]
    pub(crate) const fn corrupt(detail: &'static str) -> Self {
        Self::Corrupt { detail }
    }
}

impl fmt::Display for IdxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Corrupt { detail } => write!(f, "bad pack index: {detail}"),
            Self::UnsupportedVersion { version } => {
                write!(f, "unsupported pack index version: {version} (expected 2)")
            }
            Self::UnsupportedOffset { id } => {
                write!(f, "unsupported 64-bit pack offset for {id}")
            }
        }
    }
}

impl std::error::Error for IdxError {}

/// Memory-mapped pack index.
///
/// The mapping is opened read-only, validated once, and held until drop.
#[derive(Debug)]
pub struct PackIndex {
    map: Mmap,
    object_count: u32,
}

impl PackIndex {
    /// Opens and validates `<path>` as a v2 pack index.
    pub fn open(path: &Path) -> Result<Self, Error> {
        let file = File::open(path)?;
        // SAFETY: pack index files are immutable for the life of the reader.
        let map = unsafe { Mmap::map(&file)? };
        let object_count = validate(&map).map_err(Error::BadIndex)?;
        Ok(Self { map, object_count })
    }

    /// Returns the number of objects the index declares.
    #[inline]
    #[must_use]
    pub fn object_count(&self) -> u32 {
        self.object_count
    }

    /// Finds the pack data offset for `id`.
    ///
    /// Returns `Ok(None)` when the id is not in this index; that is the
    /// loader-level *not found* signal, distinct from structural errors.
    pub fn find_offset(&self, id: &ObjectId) -> Result<Option<u32>, IdxError> {
        lookup(&self.map, self.object_count, id)
    }
}

/// Validates the fixed layout and returns the declared object count.
fn validate(data: &[u8]) -> Result<u32, IdxError> {
    let span = Span::new(data);

    if span.len() < IDS_START + TRAILER_SIZE {
        return Err(IdxError::corrupt("file too small"));
    }
    if data[..4] != IDX_MAGIC {
        return Err(IdxError::corrupt("bad magic"));
    }
    let version = span.be_u32_at(4).map_err(|_| IdxError::corrupt("bad magic"))?;
    if version != IDX_VERSION {
        return Err(IdxError::UnsupportedVersion { version });
    }

    let mut prev = 0u32;
    for i in 0..FANOUT_ENTRIES {
        let val = span
            .be_u32_at(HEADER_SIZE + i * 4)
            .map_err(|_| IdxError::corrupt("fanout truncated"))?;
        if val < prev {
            return Err(IdxError::corrupt("fanout not monotonic"));
        }
        prev = val;
    }
    let object_count = prev;

    // ids + crc32s + offsets must fit between the fanout and the trailer.
    let tables = (object_count as usize)
        .checked_mul(ObjectId::RAW_LEN + 4 + 4)
        .ok_or(IdxError::corrupt("object count overflow"))?;
    if span.len() < IDS_START + tables + TRAILER_SIZE {
        return Err(IdxError::corrupt("tables truncated"));
    }

    Ok(object_count)
}

/// Fan-out windowed binary search over the sorted id table.
fn lookup(data: &[u8], count: u32, id: &ObjectId) -> Result<Option<u32>, IdxError> {
    let span = Span::new(data);
    let fanout_at = |byte: usize| span.be_u32_at(HEADER_SIZE + byte * 4);

    let first = id.first_byte() as usize;
    let mut hi = fanout_at(first).map_err(|_| IdxError::corrupt("fanout truncated"))?;
    let mut lo = if first == 0 {
        0
    } else {
        fanout_at(first - 1).map_err(|_| IdxError::corrupt("fanout truncated"))?
    };

    let offsets_start = IDS_START + count as usize * (ObjectId::RAW_LEN + 4);

    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        let probe = span
            .slice(IDS_START + mid as usize * ObjectId::RAW_LEN, ObjectId::RAW_LEN)
            .map_err(|_| IdxError::corrupt("id table truncated"))?;

        match id.as_bytes().as_slice().cmp(probe) {
            std::cmp::Ordering::Equal => {
                let raw = span
                    .be_u32_at(offsets_start + mid as usize * 4)
                    .map_err(|_| IdxError::corrupt("offset table truncated"))?;
                if raw & LARGE_OFFSET_FLAG != 0 {
                    return Err(IdxError::UnsupportedOffset { id: *id });
                }
                return Ok(Some(raw));
            }
            std::cmp::Ordering::Less => hi = mid,
            std::cmp::Ordering::Greater => lo = mid + 1,
        }
    }

    Ok(None)
}
