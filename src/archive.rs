//! The archive index: opening an archive and cataloging its entries.
//!
//! Opening scans backward from the end of the store for the End of
//! central directory record, then walks the central directory and decodes
//! each record into an [`Entry`]. The index lives in memory; mutations
//! (see the [`write`] module) are committed back by `finalize()`.
//!
//! [`Entry`]: ../entry/struct.Entry.html
//! [`write`]: ../write/index.html

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::Path;

use camino::{Utf8Path, Utf8PathBuf};
use log::*;

use crate::arch::usize;
use crate::entry::Entry;
use crate::result::*;
use crate::spec;
use crate::store::{read_exact_at, Store};

/// How an archive intends to use its backing store.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AccessMode {
    /// Create a new archive; the backing store must not already hold one.
    Create,
    /// Read an existing archive.
    Read,
    /// Read an existing archive and buffer mutations for commit.
    Update,
}

/// How to decode entry paths read from the central directory.
///
/// Only decoding is configurable: paths of entries added through this
/// library are always encoded in UTF-8 (with the corresponding flag set).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum PathEncoding {
    /// Honor the per-entry UTF-8 flag, falling back to CP437 (the
    /// historical default) when it's unset.
    #[default]
    Auto,
    /// Treat every path as UTF-8 regardless of flags.
    Utf8,
    /// Treat every path as CP437 regardless of flags.
    Cp437,
}

/// A ZIP archive over some backing store.
///
/// ```no_run
/// # use std::path::Path;
/// # use zipcore::{AccessMode, Archive};
/// let archive = Archive::open_path(Path::new("backup.zip"), AccessMode::Read)?;
/// for entry in archive.entries() {
///     println!("{}", entry.path());
/// }
/// # Ok::<(), zipcore::ZipError>(())
/// ```
pub struct Archive<S: Store> {
    pub(crate) store: S,
    pub(crate) mode: AccessMode,
    pub(crate) path_encoding: PathEncoding,
    /// Entries in central-directory (insertion) order.
    pub(crate) entries: Vec<Entry>,
    /// Path (as stored) to index into `entries`.
    pub(crate) index: HashMap<Utf8PathBuf, usize>,
    /// The archive comment, preserved across rewrites.
    pub(crate) comment: Vec<u8>,
    /// Where entry data ends and the central directory begins.
    pub(crate) cd_offset: u64,
    /// Removals logged since open; compaction happens once, at commit.
    pub(crate) removed_any: bool,
}

impl Archive<std::fs::File> {
    /// Opens (or, for [`AccessMode::Create`], creates) an archive file.
    pub fn open_path(path: &Path, mode: AccessMode) -> ZipResult<Self> {
        Self::open_path_with_encoding(path, mode, PathEncoding::default())
    }

    pub fn open_path_with_encoding(
        path: &Path,
        mode: AccessMode,
        encoding: PathEncoding,
    ) -> ZipResult<Self> {
        let mut options = OpenOptions::new();
        match mode {
            AccessMode::Create => options.read(true).write(true).create_new(true),
            AccessMode::Read => options.read(true),
            AccessMode::Update => options.read(true).write(true),
        };
        let file = options.open(path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => ZipError::NotFound(path.display().to_string()),
            ErrorKind::AlreadyExists => ZipError::AlreadyExists(path.display().to_string()),
            _ => ZipError::Io(e),
        })?;
        Self::new(file, mode, encoding)
    }
}

impl<S: Store> Archive<S> {
    /// Wraps an archive around any backing store: a `File`, a
    /// `Cursor<Vec<u8>>`, or your own [`Store`] implementation.
    ///
    /// For `Read` and `Update` the store must already hold a valid
    /// archive; for `Create` it must be empty.
    pub fn new(mut store: S, mode: AccessMode, encoding: PathEncoding) -> ZipResult<Self> {
        match mode {
            AccessMode::Create => {
                if !store.is_empty()? {
                    return Err(ZipError::AlreadyExists(
                        "backing store already holds data".to_string(),
                    ));
                }
                Ok(Self {
                    store,
                    mode,
                    path_encoding: encoding,
                    entries: Vec::new(),
                    index: HashMap::new(),
                    comment: Vec::new(),
                    cd_offset: 0,
                    removed_any: false,
                })
            }
            AccessMode::Read | AccessMode::Update => Self::scan(store, mode, encoding),
        }
    }

    /// Locates the End of central directory record and decodes the whole
    /// central directory into an index.
    fn scan(mut store: S, mode: AccessMode, encoding: PathEncoding) -> ZipResult<Self> {
        let store_len = store.len()?;

        // The EOCDR sits at the very end of the file, except that a
        // comment of up to 64K may trail it. Read the whole region it
        // could occupy (plus room for a Zip64 locator right before it)
        // and search backward.
        let max_trailer = (spec::EndOfCentralDirectory::FIXED_LEN
            + u16::MAX as usize
            + spec::Zip64EndOfCentralDirectoryLocator::FIXED_LEN) as u64;
        let trailer_len = store_len.min(max_trailer);
        let trailer_base = store_len - trailer_len;
        let mut trailer = vec![0u8; usize(trailer_len)?];
        read_exact_at(&mut store, trailer_base, &mut trailer)?;

        let eocdr_posit = spec::find_eocdr(&trailer)?;
        let eocdr_offset = trailer_base + eocdr_posit as u64;
        let eocdr = spec::EndOfCentralDirectory::parse(&trailer[eocdr_posit..], eocdr_offset)?;
        trace!("{:?}", eocdr);

        if eocdr.disk_number != eocdr.disk_with_central_directory {
            return Err(ZipError::UnsupportedArchive(format!(
                "No support for multi-disk archives: disk ({}) != disk with central directory ({})",
                eocdr.disk_number, eocdr.disk_with_central_directory
            )));
        }
        if eocdr.entries != eocdr.entries_on_this_disk {
            return Err(ZipError::UnsupportedArchive(format!(
                "No support for multi-disk archives: entries ({}) != entries this disk ({})",
                eocdr.entries, eocdr.entries_on_this_disk
            )));
        }

        let entry_count: u64;
        let cd_offset: u64;
        let cd_size: u64;

        // A Zip64 locator immediately precedes the EOCDR when the archive
        // outgrew the 16/32-bit fields above.
        let locator = eocdr_posit
            .checked_sub(spec::Zip64EndOfCentralDirectoryLocator::FIXED_LEN)
            .and_then(|posit| spec::Zip64EndOfCentralDirectoryLocator::parse(&trailer[posit..]));
        if let Some(locator) = locator {
            trace!("{:?}", locator);
            if locator.disks > 1 {
                return Err(ZipError::UnsupportedArchive(format!(
                    "No support for multi-disk archives: Zip64 EOCDR locator reports {} disks",
                    locator.disks
                )));
            }

            let mut fixed = [0u8; spec::Zip64EndOfCentralDirectory::FIXED_LEN];
            read_exact_at(&mut store, locator.zip64_eocdr_offset, &mut fixed)?;
            let zip64_eocdr =
                spec::Zip64EndOfCentralDirectory::parse(&fixed, locator.zip64_eocdr_offset)?;
            trace!("{:?}", zip64_eocdr);

            entry_count = zip64_eocdr.entries;
            cd_offset = zip64_eocdr.central_directory_offset;
            cd_size = zip64_eocdr.central_directory_size;
        } else {
            entry_count = eocdr.entries as u64;
            cd_offset = eocdr.central_directory_offset as u64;
            cd_size = eocdr.central_directory_size as u64;
        }

        if cd_offset
            .checked_add(cd_size)
            .map_or(true, |end| end > eocdr_offset)
        {
            return Err(ZipError::invalid(
                "Invalid central directory size or offset",
                eocdr_offset,
            ));
        }

        trace!("{} entries at offset {}", entry_count, cd_offset);

        let mut central_directory = vec![0u8; usize(cd_size)?];
        read_exact_at(&mut store, cd_offset, &mut central_directory)?;
        let mut remaining = central_directory.as_slice();

        let mut entries = Vec::with_capacity(usize(entry_count)?.min(1 << 16));
        let mut index = HashMap::with_capacity(entries.capacity());

        for _ in 0..entry_count {
            let record_offset = cd_offset + (cd_size - remaining.len() as u64);
            let record = spec::CentralDirectoryEntry::parse_and_consume(&mut remaining, record_offset)?;
            trace!("{:?}", record);

            let entry = Entry::from_record(&record, encoding, record_offset)?;
            debug!("{:?}", entry);

            match index.entry(entry.path.clone()) {
                std::collections::hash_map::Entry::Vacant(slot) => {
                    slot.insert(entries.len());
                    entries.push(entry);
                }
                std::collections::hash_map::Entry::Occupied(_) => {
                    // Paths are unique per the data model; tolerate the
                    // duplicate on read but keep only the first.
                    warn!("Duplicate entry for {}; keeping the first", entry.path);
                }
            }
        }

        Ok(Self {
            store,
            mode,
            path_encoding: encoding,
            entries,
            index,
            comment: eocdr.file_comment,
            cd_offset,
            removed_any: false,
        })
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    /// The archive's entries, in the order they appear in the central
    /// directory.
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Looks up an entry by its path.
    ///
    /// Directory entries are stored with a trailing slash, but looking
    /// them up without one works too.
    pub fn lookup<P: AsRef<Utf8Path>>(&self, path: P) -> Option<&Entry> {
        let path = path.as_ref();
        if let Some(&i) = self.index.get(path) {
            return Some(&self.entries[i]);
        }
        // Try the directory form.
        let with_slash = Utf8PathBuf::from(format!("{}/", path));
        self.index.get(&with_slash).map(|&i| &self.entries[i])
    }

    pub fn contains<P: AsRef<Utf8Path>>(&self, path: P) -> bool {
        self.lookup(path).is_some()
    }

    /// Returns the first entry satisfying `predicate`, scanning in
    /// catalog order.
    pub fn first_matching<F>(&self, mut predicate: F) -> Option<&Entry>
    where
        F: FnMut(&Entry) -> bool,
    {
        self.entries.iter().find(|e| predicate(e))
    }

    /// The archive comment bytes (empty if there is none).
    pub fn comment(&self) -> &[u8] {
        &self.comment
    }

    /// Replaces the archive comment; written out at commit.
    pub fn set_comment(&mut self, comment: Vec<u8>) -> ZipResult<()> {
        if self.mode == AccessMode::Read {
            return Err(ZipError::InvalidMode(
                "can't set a comment on a read-only archive",
            ));
        }
        if comment.len() > u16::MAX as usize {
            return Err(ZipError::InvalidPath(
                "archive comment longer than 64K".to_string(),
            ));
        }
        self.comment = comment;
        Ok(())
    }
}
