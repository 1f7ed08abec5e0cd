//! zipcore reads, writes, and updates ZIP archives over any seekable
//! backing store — a file on disk or a buffer in memory — with a simple,
//! synchronous API:
//!
//! ```no_run
//! # use std::path::Path;
//! # use zipcore::*;
//! let mut archive = Archive::open_path(Path::new("foo.zip"), AccessMode::Read)?;
//!
//! // We can iterate through the entries in the archive directly...
//! for entry in archive.entries() {
//!     println!("{}", entry.path());
//! }
//!
//! // ...or look one up by path and extract it, with its checksum
//! // verified and its permissions and timestamps applied.
//! let entry = archive.lookup("some/specific/file").unwrap().clone();
//! archive.extract(&entry, Path::new("out"), &ExtractOptions::default(), None)?;
//! # Ok::<(), zipcore::ZipError>(())
//! ```
//!
//! Updating an archive in place works the same way: add entries from
//! buffers or readers, remove entries by path, and commit the new
//! central directory when done.
//!
//! ```no_run
//! # use std::path::Path;
//! # use zipcore::*;
//! let mut archive = Archive::open_path(Path::new("foo.zip"), AccessMode::Update)?;
//! archive.add_buffer("notes/today.txt", b"hello", &AddOptions::default())?;
//! archive.remove_entry("stale.log")?;
//! archive.finalize()?;
//! # Ok::<(), zipcore::ZipError>(())
//! ```
//!
//! Zip is an interesting archive format: unlike compressed tarballs often
//! seen in Linux land (`*.tar.gz`, `*.tar.zst`, ...), each file in a Zip
//! archive is compressed independently, with a central directory telling
//! us where to find each file. Opening an archive means scanning backward
//! from the end of the store for that directory and indexing it; nothing
//! is decompressed until a specific entry is read.
//!
//! Long extractions and additions report progress through a shared
//! [`Progress`] and can be cancelled from another thread; cancellation
//! takes effect at the next chunk boundary.

pub mod archive;
pub mod codec;
pub mod entry;
pub mod extract;
pub mod progress;
pub mod read;
pub mod result;
pub mod store;

pub use archive::{AccessMode, Archive, PathEncoding};
pub use codec::CompressionMethod;
pub use crc_reader::Crc32Reader;
pub use entry::{AddOptions, Entry, EntryKind};
pub use extract::resolve_destination;
pub use progress::Progress;
pub use read::{EntryReader, ExtractOptions};
pub use result::{ZipError, ZipResult};
pub use store::Store;

mod arch;
mod crc_reader;
mod spec;
mod write;

/// Default granularity for read and decompression buffers.
pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;
