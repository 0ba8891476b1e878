//! Loose object storage.
//!
//! A loose object lives at `<base>/objects/xx/yyyy…` where `xx` is the
//! first two hex characters of the id and `yyyy…` the remaining 38. The
//! file is one zlib stream; the inflated bytes carry the shared object
//! frame (`"<type> <size>\0"` + body).
//!
//! A missing file is the loader-level *not found*; any other filesystem
//! failure is an error.

use std::fs;
use std::io;
use std::path::PathBuf;

use crate::errors::Error;
use crate::inflate::inflate_all;
use crate::object::{parse_frame, Object, ObjectKind};
use crate::object_id::ObjectId;

/// Reader for the two-level loose object directory.
#[derive(Debug)]
pub struct LooseStore {
    objects_dir: PathBuf,
}

impl LooseStore {
    /// Creates a store rooted at `<base>/objects`.
    #[must_use]
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self {
            objects_dir: base.into().join("objects"),
        }
    }

    /// Loads a typed object by id.
    pub fn load_object(&self, id: &ObjectId) -> Result<Object, Error> {
        let (kind, body) = self.load_raw(id)?;
        Object::new(kind, body)
    }

    /// Loads the raw kind and body, tags included.
    pub(crate) fn load_raw(&self, id: &ObjectId) -> Result<(ObjectKind, Vec<u8>), Error> {
        let hex = id.to_hex();
        let path = self.objects_dir.join(&hex[..2]).join(&hex[2..]);

        let compressed = match fs::read(&path) {
            Ok(data) => data,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Err(Error::NotFound),
            Err(err) => return Err(Error::Io(err)),
        };

        let mut inflated = Vec::new();
        inflate_all(&compressed, &mut inflated).map_err(Error::Inflate)?;
        parse_frame(&inflated).map_err(Error::BadFrame)
    }
}
