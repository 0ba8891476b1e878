//! Pack reader: id lookup, delta chain resolution, object materialisation.
//!
//! A pack is a pair of memory-mapped files sharing a path prefix: the
//! index (`<prefix>.idx`) and the data (`<prefix>.pack`). Both mappings
//! are opened read-only at construction, validated once, and released
//! when the `Pack` is dropped; dropping is the single close.
//!
//! Reading an object walks the delta chain iteratively: follow ofs-delta
//! base references toward the front of the pack collecting pending delta
//! frames, inflate the non-delta root once, then apply the deltas in
//! reverse. Chain length costs a heap frame, not a stack frame, so deep
//! chains cannot overflow the stack.
//!
//! Ref-delta bases are named by id and may live in a *different* pack (or
//! loose); resolution goes through [`BaseProvider`] so the enclosing
//! repository can search its full loader set. A `Pack` is its own
//! provider for standalone use. Cross-provider hops are bounded to keep
//! adversarial ref cycles from recursing forever.
//!
//! A pack handle is single-threaded: open one pack per worker to
//! parallelise.

use std::fs::File;
use std::path::{Path, PathBuf};

use memmap2::Mmap;

use crate::delta::apply_delta;
use crate::errors::Error;
use crate::inflate::inflate_exact;
use crate::object::{Object, ObjectKind};
use crate::object_id::ObjectId;
use crate::pack_entry::{entry_header_at, validate_pack, EntryHeader, EntryKind, PackParseError};
use crate::pack_idx::PackIndex;

/// Maximum ref-delta hops through the base provider.
///
/// Realistic chains stay under ~50 delta steps total; the bound only
/// exists to stop reference cycles between packs.
pub(crate) const MAX_REF_DELTA_HOPS: u8 = 64;

/// Resolves a ref-delta base id to its raw kind and bytes.
///
/// The repository implements this over its full loader set so a base may
/// be found in any pack or in loose storage; a standalone pack implements
/// it over itself. `depth` is the remaining hop budget and must be passed
/// through to nested reads.
pub trait BaseProvider {
    /// Loads the raw object for `id`, tags included.
    fn load_base(&self, id: &ObjectId, depth: u8) -> Result<(ObjectKind, Vec<u8>), Error>;
}

/// A memory-mapped pack index and data file pair.
#[derive(Debug)]
pub struct Pack {
    index: PackIndex,
    data: Mmap,
    data_end: usize,
}

impl Pack {
    /// Opens `<prefix>.idx` and `<prefix>.pack`.
    pub fn open(prefix: &Path) -> Result<Self, Error> {
        let index = PackIndex::open(&path_with_suffix(prefix, ".idx"))?;

        let file = File::open(path_with_suffix(prefix, ".pack"))?;
        // SAFETY: pack files are immutable for the life of the reader.
        let data = unsafe { Mmap::map(&file)? };
        advise_random(&data);
        let data_end = validate_pack(&data).map_err(Error::BadPack)?;

        Ok(Self {
            index,
            data,
            data_end,
        })
    }

    /// Returns the number of objects the pack's index declares.
    #[must_use]
    pub fn object_count(&self) -> u32 {
        self.index.object_count()
    }

    /// Finds the in-range data offset for `id`.
    ///
    /// # Errors
    /// `NotFound` when the id is not in this pack's index; `BadIndex` /
    /// `BadPack` for structural problems, including an offset that does
    /// not point into the entry region.
    pub fn find_offset(&self, id: &ObjectId) -> Result<u32, Error> {
        let offset = self
            .index
            .find_offset(id)
            .map_err(Error::BadIndex)?
            .ok_or(Error::NotFound)?;

        if (offset as usize) < crate::pack_entry::PACK_HEADER_SIZE
            || offset as usize >= self.data_end
        {
            return Err(Error::BadPack(PackParseError::OffsetOutOfRange { offset }));
        }
        Ok(offset)
    }

    /// Loads a typed object, resolving ref-delta bases within this pack.
    pub fn load_object(&self, id: &ObjectId) -> Result<Object, Error> {
        self.load_object_with(id, self)
    }

    /// Loads a typed object, resolving ref-delta bases through `bases`.
    pub fn load_object_with(
        &self,
        id: &ObjectId,
        bases: &dyn BaseProvider,
    ) -> Result<Object, Error> {
        let offset = self.find_offset(id)?;
        let (kind, data) = self.read_raw(offset, bases, MAX_REF_DELTA_HOPS)?;
        Object::new(kind, data)
    }

    /// Reads the raw object at `offset`, applying any delta chain.
    ///
    /// The returned kind is inherited from the chain's root, so it may be
    /// `Tag`; the typed boundary is the caller's concern.
    pub(crate) fn read_raw(
        &self,
        offset: u32,
        bases: &dyn BaseProvider,
        depth: u8,
    ) -> Result<(ObjectKind, Vec<u8>), Error> {
        let mut frames: Vec<EntryHeader> = Vec::new();
        let mut at = offset;

        // Walk to the non-delta root. Ofs distances point strictly toward
        // the front of the pack, so this loop terminates.
        let (kind, mut bytes) = loop {
            let header =
                entry_header_at(&self.data, self.data_end, at).map_err(Error::BadPack)?;

            match header.kind {
                EntryKind::NonDelta { kind } => {
                    break (kind, self.inflate_payload(&header)?);
                }
                EntryKind::OfsDelta { base_offset } => {
                    frames.push(header);
                    at = base_offset;
                }
                EntryKind::RefDelta { base_id } => {
                    if depth == 0 {
                        return Err(Error::DeltaChainTooDeep {
                            max: MAX_REF_DELTA_HOPS,
                        });
                    }
                    frames.push(header);
                    break bases.load_base(&base_id, depth - 1)?;
                }
            }
        };

        // Apply pending deltas root-first.
        for frame in frames.iter().rev() {
            let delta = self.inflate_payload(frame)?;
            bytes = apply_delta(&bytes, &delta).map_err(Error::BadDelta)?;
        }

        Ok((kind, bytes))
    }

    /// Inflates an entry payload to exactly its declared size.
    fn inflate_payload(&self, header: &EntryHeader) -> Result<Vec<u8>, Error> {
        let mut out = Vec::with_capacity(header.size as usize);
        inflate_exact(
            &self.data[header.data_start..self.data_end],
            &mut out,
            header.size as usize,
        )
        .map_err(Error::Inflate)?;
        Ok(out)
    }
}

impl BaseProvider for Pack {
    fn load_base(&self, id: &ObjectId, depth: u8) -> Result<(ObjectKind, Vec<u8>), Error> {
        let offset = self.find_offset(id)?;
        self.read_raw(offset, self, depth)
    }
}

fn path_with_suffix(prefix: &Path, suffix: &str) -> PathBuf {
    let mut raw = prefix.as_os_str().to_os_string();
    raw.push(suffix);
    PathBuf::from(raw)
}

/// Advisory hint that pack access is random (delta chains jump backward).
/// Failures are ignored; this never affects correctness.
#[cfg(unix)]
fn advise_random(map: &Mmap) {
    if map.len() == 0 {
        return;
    }
    // SAFETY: the pointer and length describe a live mapping; madvise is
    // advisory only.
    unsafe {
        let _ = libc::madvise(map.as_ptr() as *mut libc::c_void, map.len(), libc::MADV_RANDOM);
    }
}

#[cfg(not(unix))]
fn advise_random(_map: &Mmap) {}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::delta::tests::encode_varint;
    use crate::pack_entry::tests::{encode_entry_header, encode_ofs_distance};
    use crate::pack_idx::tests::IdxBuilder;

    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    pub(crate) fn compress(data: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    /// Insert-only delta stream producing `result` from a `base_len` base.
    pub(crate) fn insert_delta(base_len: usize, result: &[u8]) -> Vec<u8> {
        assert!(result.len() <= 127);
        let mut delta = encode_varint(base_len as u64);
        delta.extend_from_slice(&encode_varint(result.len() as u64));
        delta.push(result.len() as u8);
        delta.extend_from_slice(result);
        delta
    }

    /// One pack entry to lay out with `build_pack`.
    pub(crate) enum Entry {
        Full { type_code: u8, body: Vec<u8> },
        Ofs { distance_to: usize, delta: Vec<u8> },
        Ref { base_id: ObjectId, delta: Vec<u8> },
    }

    /// Assembles a pack image, returning the bytes and per-entry offsets.
    pub(crate) fn build_pack(entries: &[Entry]) -> (Vec<u8>, Vec<u32>) {
        let mut out = Vec::new();
        out.extend_from_slice(b"PACK");
        out.extend_from_slice(&2u32.to_be_bytes());
        out.extend_from_slice(&(entries.len() as u32).to_be_bytes());

        let mut offsets = Vec::new();
        for entry in entries {
            let offset = out.len() as u32;
            offsets.push(offset);
            match entry {
                Entry::Full { type_code, body } => {
                    out.extend_from_slice(&encode_entry_header(*type_code, body.len() as u64));
                    out.extend_from_slice(&compress(body));
                }
                Entry::Ofs { distance_to, delta } => {
                    out.extend_from_slice(&encode_entry_header(6, delta.len() as u64));
                    let distance = offset as u64 - offsets[*distance_to] as u64;
                    out.extend_from_slice(&encode_ofs_distance(distance));
                    out.extend_from_slice(&compress(delta));
                }
                Entry::Ref { base_id, delta } => {
                    out.extend_from_slice(&encode_entry_header(7, delta.len() as u64));
                    out.extend_from_slice(base_id.as_bytes());
                    out.extend_from_slice(&compress(delta));
                }
            }
        }
        out.extend_from_slice(&[0u8; 20]);
        (out, offsets)
    }

    /// Writes a pack and matching index into `dir`, returning the prefix.
    pub(crate) fn write_pack(
        dir: &Path,
        name: &str,
        entries: &[Entry],
        ids: &[ObjectId],
    ) -> PathBuf {
        let (pack, offsets) = build_pack(entries);
        assert_eq!(ids.len(), offsets.len());

        let mut builder = IdxBuilder::new();
        for (id, offset) in ids.iter().zip(&offsets) {
            builder.add_object(*id, *offset);
        }

        let prefix = dir.join(name);
        std::fs::write(path_with_suffix(&prefix, ".pack"), &pack).unwrap();
        std::fs::write(path_with_suffix(&prefix, ".idx"), builder.build()).unwrap();
        prefix
    }

    fn id(fill: u8) -> ObjectId {
        ObjectId::from_bytes([fill; 20])
    }

    #[test]
    fn loads_non_delta_object() {
        let dir = tempfile::tempdir().unwrap();
        let body = b"web: puma\nworker: sidekiq\n".to_vec();
        let prefix = write_pack(
            dir.path(),
            "pack-basic",
            &[Entry::Full {
                type_code: 3,
                body: body.clone(),
            }],
            &[id(0x11)],
        );

        let pack = Pack::open(&prefix).unwrap();
        assert_eq!(pack.object_count(), 1);
        assert!(pack.find_offset(&id(0x11)).unwrap() >= 12);

        let obj = pack.load_object(&id(0x11)).unwrap();
        assert_eq!(obj.kind(), ObjectKind::Blob);
        assert_eq!(obj.size(), body.len() as u64);
        assert_eq!(obj.bytes(), body);
    }

    #[test]
    fn missing_id_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = write_pack(
            dir.path(),
            "pack-miss",
            &[Entry::Full {
                type_code: 3,
                body: b"x".to_vec(),
            }],
            &[id(0x11)],
        );

        let pack = Pack::open(&prefix).unwrap();
        let err = pack.load_object(&id(0x22)).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn resolves_ofs_delta_chain() {
        let dir = tempfile::tempdir().unwrap();
        let base = b"base".to_vec();
        let mid = b"midpoint".to_vec();
        let tip = b"tip!".to_vec();

        let prefix = write_pack(
            dir.path(),
            "pack-chain",
            &[
                Entry::Full {
                    type_code: 3,
                    body: base.clone(),
                },
                Entry::Ofs {
                    distance_to: 0,
                    delta: insert_delta(base.len(), &mid),
                },
                Entry::Ofs {
                    distance_to: 1,
                    delta: insert_delta(mid.len(), &tip),
                },
            ],
            &[id(0x11), id(0x22), id(0x33)],
        );

        let pack = Pack::open(&prefix).unwrap();
        let obj = pack.load_object(&id(0x33)).unwrap();
        assert_eq!(obj.kind(), ObjectKind::Blob);
        assert_eq!(obj.bytes(), tip);

        // The intermediate link resolves on its own too.
        assert_eq!(pack.load_object(&id(0x22)).unwrap().bytes(), mid);
    }

    #[test]
    fn resolves_in_pack_ref_delta() {
        let dir = tempfile::tempdir().unwrap();
        let base = b"base".to_vec();
        let result = b"base plus".to_vec();

        let prefix = write_pack(
            dir.path(),
            "pack-ref",
            &[
                Entry::Full {
                    type_code: 1,
                    body: base.clone(),
                },
                Entry::Ref {
                    base_id: id(0x11),
                    delta: insert_delta(base.len(), &result),
                },
            ],
            &[id(0x11), id(0x22)],
        );

        let pack = Pack::open(&prefix).unwrap();
        let obj = pack.load_object(&id(0x22)).unwrap();
        // Type is inherited from the base.
        assert_eq!(obj.kind(), ObjectKind::Commit);
        assert_eq!(obj.bytes(), result);
    }

    #[test]
    fn tag_entry_decodes_but_fails_the_typed_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = write_pack(
            dir.path(),
            "pack-tag",
            &[Entry::Full {
                type_code: 4,
                body: b"tag body".to_vec(),
            }],
            &[id(0x11)],
        );

        let pack = Pack::open(&prefix).unwrap();

        let (kind, bytes) = pack.load_base(&id(0x11), MAX_REF_DELTA_HOPS).unwrap();
        assert_eq!(kind, ObjectKind::Tag);
        assert_eq!(bytes, b"tag body");

        let err = pack.load_object(&id(0x11)).unwrap_err();
        assert!(matches!(
            err,
            Error::UnknownType {
                kind: ObjectKind::Tag
            }
        ));
    }

    #[test]
    fn ref_delta_cycle_exhausts_hop_budget() {
        let dir = tempfile::tempdir().unwrap();
        // The entry names itself as its base.
        let prefix = write_pack(
            dir.path(),
            "pack-cycle",
            &[Entry::Ref {
                base_id: id(0x11),
                delta: insert_delta(0, b"loop"),
            }],
            &[id(0x11)],
        );

        let pack = Pack::open(&prefix).unwrap();
        let err = pack.load_object(&id(0x11)).unwrap_err();
        assert!(matches!(err, Error::DeltaChainTooDeep { .. }));
    }

    #[test]
    fn missing_pack_twin_is_an_open_error() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = write_pack(
            dir.path(),
            "pack-orphan",
            &[Entry::Full {
                type_code: 3,
                body: b"x".to_vec(),
            }],
            &[id(0x11)],
        );
        std::fs::remove_file(path_with_suffix(&prefix, ".pack")).unwrap();

        let err = Pack::open(&prefix).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
