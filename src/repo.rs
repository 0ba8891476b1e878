//! Repository facade: loader registration, ref resolution, tree walking.
//!
//! A repository is an ordered list of object loaders over one object
//! database: the loose store first, then one loader per pack found under
//! `objects/pack` (sorted by file name for deterministic registration).
//! `load_object` tries each loader in order, treating *not found* as
//! fall-through and anything else as fatal.
//!
//! The repository is also the [`BaseProvider`] for its packs, so a
//! ref-delta whose base lives in a different pack (or loose) resolves
//! through the same loader list.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::errors::Error;
use crate::loose::LooseStore;
use crate::object::{Object, ObjectKind};
use crate::object_id::ObjectId;
use crate::pack::{BaseProvider, Pack, MAX_REF_DELTA_HOPS};

/// Ref search directories, in order.
const REF_DIRS: [&str; 2] = ["heads", "tags"];

/// One registered object source.
#[derive(Debug)]
enum Loader {
    Loose(LooseStore),
    Pack(Pack),
}

impl Loader {
    fn load_raw(
        &self,
        id: &ObjectId,
        bases: &dyn BaseProvider,
        depth: u8,
    ) -> Result<(ObjectKind, Vec<u8>), Error> {
        match self {
            Self::Loose(store) => store.load_raw(id),
            Self::Pack(pack) => {
                let offset = pack.find_offset(id)?;
                pack.read_raw(offset, bases, depth)
            }
        }
    }
}

/// An opened repository, normal or bare.
///
/// Dropping the repository unmaps every pack it holds.
#[derive(Debug)]
pub struct Repository {
    base: PathBuf,
    loaders: Vec<Loader>,
}

impl Repository {
    /// Opens a repository at `path`.
    ///
    /// The object database is located at `<path>/.git/objects` (normal)
    /// or `<path>/objects` (bare); every `*.idx` under `objects/pack`
    /// registers a pack loader.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let base = [path.join(".git"), path.to_path_buf()]
            .into_iter()
            .find(|dir| dir.join("objects").is_dir())
            .ok_or_else(|| Error::InvalidRepo {
                path: path.to_path_buf(),
            })?;

        let mut loaders = vec![Loader::Loose(LooseStore::new(&base))];
        for prefix in pack_prefixes(&base.join("objects").join("pack"))? {
            loaders.push(Loader::Pack(Pack::open(&prefix)?));
        }

        Ok(Self { base, loaders })
    }

    /// Loads a typed object by id from the first loader that has it.
    pub fn load_object(&self, id: &ObjectId) -> Result<Object, Error> {
        let (kind, data) = self.load_base(id, MAX_REF_DELTA_HOPS)?;
        Object::new(kind, data)
    }

    /// Resolves a reference name to an object id.
    ///
    /// Search order: `HEAD` (chasing `ref:` indirection), then
    /// `refs/heads/<name>`, `refs/tags/<name>`, the literal path
    /// `<base>/<name>`, and finally `<name>` as a raw id naming a commit.
    pub fn resolve_ref(&self, name: &str) -> Result<ObjectId, Error> {
        if name == "HEAD" {
            return self.resolve_indirect(name, &self.base.join("HEAD"));
        }

        for dir in REF_DIRS {
            let path = self.base.join("refs").join(dir).join(name);
            if let Some(content) = read_ref_file(&path)? {
                return Ok(ObjectId::from_hex(content.trim())?);
            }
        }

        if let Some(content) = read_ref_file(&self.base.join(name))? {
            return Ok(ObjectId::from_hex(content.trim())?);
        }

        // A raw id is accepted as-is when it names a loadable commit.
        if let Ok(id) = ObjectId::from_hex(name) {
            if let Ok(obj) = self.load_object(&id) {
                if obj.kind() == ObjectKind::Commit {
                    return Ok(id);
                }
            }
        }

        Err(Error::UnknownRef {
            name: name.to_string(),
        })
    }

    /// Resolves a ref plus a `/`-separated path to the leaf object id.
    ///
    /// Intermediate segments must name trees; a missing segment is
    /// *not found*.
    pub fn resolve(&self, reference: &str, path: &str) -> Result<ObjectId, Error> {
        let commit_id = self.resolve_ref(reference)?;
        let commit = self.load_object(&commit_id)?.commit()?;

        let mut tree = self.load_object(&commit.tree)?.tree()?;

        let mut segments = path.split('/').peekable();
        while let Some(segment) = segments.next() {
            let entry = tree.get(segment).ok_or(Error::NotFound)?;
            if segments.peek().is_none() {
                return Ok(entry.id);
            }
            tree = self.load_object(&entry.id)?.tree()?;
        }

        // `split` always yields at least one segment.
        Err(Error::NotFound)
    }

    /// Resolves a ref plus a path and returns the blob at that path.
    pub fn cat_file(&self, reference: &str, path: &str) -> Result<Object, Error> {
        let id = self.resolve(reference, path)?;
        let obj = self.load_object(&id)?;
        if obj.kind() != ObjectKind::Blob {
            return Err(Error::NotABlob { kind: obj.kind() });
        }
        Ok(obj)
    }

    /// Chases `ref:` indirection starting from a reference file.
    fn resolve_indirect(&self, name: &str, path: &Path) -> Result<ObjectId, Error> {
        let content = read_ref_file(path)?.ok_or_else(|| Error::UnknownRef {
            name: name.to_string(),
        })?;

        let content = content.trim();
        match content.strip_prefix("ref:") {
            Some(target) => self.resolve_ref(target.trim()),
            None => Ok(ObjectId::from_hex(content)?),
        }
    }
}

impl BaseProvider for Repository {
    fn load_base(&self, id: &ObjectId, depth: u8) -> Result<(ObjectKind, Vec<u8>), Error> {
        for loader in &self.loaders {
            match loader.load_raw(id, self, depth) {
                Err(err) if err.is_not_found() => continue,
                other => return other,
            }
        }
        Err(Error::NotFound)
    }
}

/// Reads a reference file, mapping a missing file to `None`.
fn read_ref_file(path: &Path) -> Result<Option<String>, Error> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(Error::Io(err)),
    }
}

/// Lists pack prefixes (paths minus `.idx`) under `pack_dir`, sorted.
fn pack_prefixes(pack_dir: &Path) -> Result<Vec<PathBuf>, Error> {
    let entries = match fs::read_dir(pack_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(Error::Io(err)),
    };

    let mut prefixes = Vec::new();
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let path = Path::new(&name);
        if let Some(stem) = path.file_stem() {
            if path.extension().is_some_and(|ext| ext == "idx") {
                prefixes.push(pack_dir.join(stem));
            }
        }
    }
    prefixes.sort();
    Ok(prefixes)
}
