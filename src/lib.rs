//! Read-only access to a Git object database.
//!
//! Given a repository directory, this crate resolves references, loads
//! commits, trees, and blobs by id, walks tree paths, and reads blob
//! contents from loose storage and from version-2 pack files, including
//! deltified entries.
//!
//! Read path for a packed object:
//! 1) Fan-out window + binary search in the mmap'd `.idx` gives an offset.
//! 2) The entry header at that offset yields type, size, and any base
//!    reference (backward offset or base id).
//! 3) The delta chain is walked iteratively to its non-delta root.
//! 4) The root inflates (bounded zlib), then deltas apply in reverse.
//!
//! The crate never writes, never verifies checksums, and reports corrupt
//! input as structured errors rather than recovering. Pack handles are
//! not safe for concurrent use; open one per worker to parallelise.
//!
//! ```no_run
//! use gitodb::Repository;
//!
//! # fn main() -> Result<(), gitodb::Error> {
//! let repo = Repository::open("/path/to/project")?;
//! let id = repo.resolve_ref("HEAD")?;
//! let commit = repo.load_object(&id)?.commit()?;
//! let blob = repo.cat_file("HEAD", "Procfile")?;
//! println!("{} bytes at {}", blob.size(), commit.tree);
//! # Ok(())
//! # }
//! ```

pub mod commit;
pub mod delta;
pub mod errors;
pub mod inflate;
pub mod loose;
pub mod object;
pub mod object_id;
pub mod pack;
pub mod pack_entry;
pub mod pack_idx;
pub mod repo;
pub mod span;
pub mod tree;

pub use commit::{Commit, CommitParseError};
pub use delta::{apply_delta, DeltaError};
pub use errors::Error;
pub use inflate::InflateError;
pub use loose::LooseStore;
pub use object::{FrameError, Object, ObjectKind};
pub use object_id::{ObjectId, ParseIdError};
pub use pack::{BaseProvider, Pack};
pub use pack_entry::PackParseError;
pub use pack_idx::{IdxError, PackIndex};
pub use repo::Repository;
pub use span::SpanError;
pub use tree::{Tree, TreeEntry, TreeParseError};
