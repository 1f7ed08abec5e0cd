//! Entries: the catalog items an archive is made of.

use camino::{Utf8Path, Utf8PathBuf};
use chrono::NaiveDateTime;
use codepage_437::*;
use log::warn;

use crate::archive::PathEncoding;
use crate::codec::CompressionMethod;
use crate::result::*;
use crate::spec::{self, CentralDirectoryEntry, ExtraField};

// Unix file type bits, as stored in the high half of the external
// attributes by Unix-born archives.
pub(crate) const S_IFMT: u32 = 0o170000;
pub(crate) const S_IFDIR: u32 = 0o040000;
pub(crate) const S_IFREG: u32 = 0o100000;
pub(crate) const S_IFLNK: u32 = 0o120000;

/// DOS directory bit in the low byte of the external attributes.
const DOS_DIRECTORY_BIT: u32 = 0x10;

/// What kind of filesystem object an entry represents.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    /// A symbolic link; the entry's content is the link target.
    Symlink,
}

/// The OS a file in the archive was compressed with.
/// Used to decode additional metadata like permissions
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum System {
    Dos,
    Unix,
    Unknown,
}

impl System {
    fn from_source_version(source_version: u16) -> Self {
        // 4.4.2.1 The upper byte indicates the compatibility of the file
        // attribute information. 0 is MS-DOS, 3 is UNIX; the rest don't
        // carry mode bits we know how to read.
        match source_version >> 8 {
            0 => System::Dos,
            3 => System::Unix,
            _ => System::Unknown,
        }
    }
}

/// One file, directory, or symbolic link in an archive.
///
/// Entries are value snapshots: mutating the archive replaces catalog
/// entries but never changes an `Entry` a caller already holds.
#[derive(Debug, Clone)]
pub struct Entry {
    pub(crate) path: Utf8PathBuf,
    pub(crate) kind: EntryKind,
    pub(crate) compression_method: CompressionMethod,
    pub(crate) crc32: u32,
    pub(crate) compressed_size: u64,
    pub(crate) uncompressed_size: u64,
    pub(crate) unix_mode: Option<u32>,
    pub(crate) modified: NaiveDateTime,
    pub(crate) flags: u16,
    pub(crate) version_needed: u16,
    /// "Version made by" from the central directory, preserved so a
    /// rewrite doesn't change how other tools interpret the attributes.
    pub(crate) source_version: u16,
    pub(crate) external_attributes: u32,
    pub(crate) header_offset: u64,
    pub(crate) extra_fields: Vec<ExtraField>,
    pub(crate) comment: Vec<u8>,
}

impl Entry {
    /// The entry's path, exactly as stored (directories keep their
    /// trailing slash).
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    pub fn is_symlink(&self) -> bool {
        self.kind == EntryKind::Symlink
    }

    /// The CRC-32 of the decompressed content
    pub fn crc32(&self) -> u32 {
        self.crc32
    }

    /// Uncompressed size of the content in bytes
    pub fn uncompressed_size(&self) -> u64 {
        self.uncompressed_size
    }

    /// Compressed size of the content in bytes
    pub fn compressed_size(&self) -> u64 {
        self.compressed_size
    }

    pub fn compression_method(&self) -> CompressionMethod {
        self.compression_method
    }

    /// Full Unix mode bits (type and permissions), if the entry was
    /// archived on a Unix OS.
    ///
    /// This library does _not_ try to convert DOS permission bits into
    /// roughly-equivalent Unix mode bits, or do other cross-OS handwaving.
    pub fn unix_mode(&self) -> Option<u32> {
        self.unix_mode
    }

    /// POSIX permission bits, with kind-appropriate defaults when the
    /// archive didn't record any.
    pub fn permissions(&self) -> u32 {
        match self.unix_mode {
            Some(mode) => mode & 0o7777,
            None => match self.kind {
                EntryKind::File => 0o644,
                EntryKind::Directory => 0o755,
                EntryKind::Symlink => 0o777,
            },
        }
    }

    /// The date and time the content was last modified
    pub fn modified(&self) -> NaiveDateTime {
        self.modified
    }

    /// The entry's comment bytes from the central directory
    pub fn comment(&self) -> &[u8] {
        &self.comment
    }

    /// The ZIP spec version needed to extract this entry
    pub fn version_needed(&self) -> u16 {
        self.version_needed
    }

    pub(crate) fn is_encrypted(&self) -> bool {
        self.flags & spec::FLAG_ENCRYPTED != 0
    }

    pub(crate) fn has_data_descriptor(&self) -> bool {
        self.flags & spec::FLAG_HAS_DATA_DESCRIPTOR != 0
    }

    /// Builds an `Entry` from a decoded central directory record.
    pub(crate) fn from_record(
        record: &CentralDirectoryEntry,
        encoding: PathEncoding,
        record_offset: u64,
    ) -> ZipResult<Self> {
        let path = decode_path(&record.path, record.flags, encoding)?;

        if record.disk_number != 0 {
            return Err(ZipError::UnsupportedArchive(format!(
                "No support for multi-disk archives: file {} claims to be on disk {}",
                path, record.disk_number,
            )));
        }

        let values = spec::apply_zip64(
            record.uncompressed_size,
            record.compressed_size,
            record.header_offset,
            &record.extra_fields,
            record_offset,
        )?;

        let unix_mode = match System::from_source_version(record.source_version) {
            System::Unix => Some(record.external_file_attributes >> 16),
            _ => None,
        };

        let kind = derive_kind(&path, unix_mode, record.external_file_attributes);
        if let Err(reason) = validate_archive_path(path.as_str()) {
            // Tolerated on read: the index keeps the entry, extraction
            // will refuse it.
            warn!("Entry {path} has a suspect path: {reason}");
        }

        // The Zip64 field is derived data; everything else is carried
        // verbatim so a rewrite preserves foreign metadata.
        let extra_fields = record
            .extra_fields
            .iter()
            .filter(|f| f.id != spec::ZIP64_EXTRA_ID)
            .cloned()
            .collect();

        Ok(Self {
            path,
            kind,
            compression_method: CompressionMethod::from_u16(record.compression_method),
            crc32: record.crc32,
            compressed_size: values.compressed_size,
            uncompressed_size: values.uncompressed_size,
            unix_mode,
            modified: spec::parse_msdos(record.last_modified_time, record.last_modified_date),
            flags: record.flags,
            version_needed: record.minimum_extract_version,
            source_version: record.source_version,
            external_attributes: record.external_file_attributes,
            header_offset: values.header_offset,
            extra_fields,
            comment: record.file_comment.clone(),
        })
    }
}

pub(crate) fn decode_path(raw: &[u8], flags: u16, encoding: PathEncoding) -> ZipResult<Utf8PathBuf> {
    let utf8 = match encoding {
        PathEncoding::Utf8 => true,
        PathEncoding::Cp437 => false,
        PathEncoding::Auto => flags & spec::FLAG_UTF8 != 0,
    };
    if utf8 {
        Ok(Utf8PathBuf::from(std::str::from_utf8(raw).map_err(ZipError::Encoding)?))
    } else {
        let decoded: std::borrow::Cow<str> = std::borrow::Cow::borrow_from_cp437(raw, &CP437_CONTROL);
        Ok(Utf8PathBuf::from(decoded.into_owned()))
    }
}

fn derive_kind(path: &Utf8Path, unix_mode: Option<u32>, external_attributes: u32) -> EntryKind {
    if let Some(mode) = unix_mode {
        match mode & S_IFMT {
            S_IFLNK => return EntryKind::Symlink,
            S_IFDIR => return EntryKind::Directory,
            S_IFREG => return EntryKind::File,
            _ => {} // Fall through to the DOS heuristics.
        }
    }
    if external_attributes & DOS_DIRECTORY_BIT != 0 || path.as_str().ends_with('/') {
        EntryKind::Directory
    } else {
        EntryKind::File
    }
}

/// Checks that a path is fit to live in an archive: relative, with
/// non-empty, non-traversing, forward-slash-separated segments.
/// A single trailing slash (the directory form) is allowed.
pub(crate) fn validate_archive_path(path: &str) -> Result<(), &'static str> {
    if path.is_empty() {
        return Err("path is empty");
    }
    if path.starts_with('/') {
        return Err("path is absolute");
    }
    if path.contains('\\') {
        return Err("path contains a backslash");
    }
    let trimmed = path.strip_suffix('/').unwrap_or(path);
    if trimmed.is_empty() {
        return Err("path has no segments");
    }
    for segment in trimmed.split('/') {
        match segment {
            "" => return Err("path has an empty segment"),
            "." => return Err("path contains a . segment"),
            ".." => return Err("path contains a .. segment"),
            _ => {}
        }
    }
    Ok(())
}

/// Per-entry settings for the add operations.
///
/// The defaults match what most ZIP producers write: deflate compression,
/// the current time, and kind-appropriate permissions.
#[derive(Debug, Clone)]
pub struct AddOptions {
    pub compression_method: CompressionMethod,
    /// POSIX permission bits; kind-appropriate defaults when `None`.
    pub permissions: Option<u32>,
    /// Recorded modification time; "now" when `None`.
    pub modified: Option<NaiveDateTime>,
    /// Read-buffer granularity for the streaming add path.
    pub buffer_size: usize,
}

impl Default for AddOptions {
    fn default() -> Self {
        Self {
            compression_method: CompressionMethod::Deflate,
            permissions: None,
            modified: None,
            buffer_size: crate::DEFAULT_CHUNK_SIZE,
        }
    }
}

impl AddOptions {
    pub fn stored() -> Self {
        Self {
            compression_method: CompressionMethod::Stored,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn path_validation() {
        assert!(validate_archive_path("a/b/c.txt").is_ok());
        assert!(validate_archive_path("dir/").is_ok());
        assert!(validate_archive_path("single").is_ok());

        assert!(validate_archive_path("").is_err());
        assert!(validate_archive_path("/etc/passwd").is_err());
        assert!(validate_archive_path("../escape").is_err());
        assert!(validate_archive_path("a/../b").is_err());
        assert!(validate_archive_path("a//b").is_err());
        assert!(validate_archive_path("./a").is_err());
        assert!(validate_archive_path("a\\b").is_err());
        assert!(validate_archive_path("/").is_err());
    }

    #[test]
    fn kind_from_unix_mode() {
        let path = Utf8Path::new("some/path");
        assert_eq!(
            derive_kind(path, Some(S_IFLNK | 0o777), 0),
            EntryKind::Symlink
        );
        assert_eq!(
            derive_kind(path, Some(S_IFDIR | 0o755), 0),
            EntryKind::Directory
        );
        assert_eq!(
            derive_kind(path, Some(S_IFREG | 0o644), 0),
            EntryKind::File
        );
    }

    #[test]
    fn kind_from_dos_attributes() {
        assert_eq!(
            derive_kind(Utf8Path::new("dir/"), None, DOS_DIRECTORY_BIT),
            EntryKind::Directory
        );
        assert_eq!(
            derive_kind(Utf8Path::new("trailing/"), None, 0),
            EntryKind::Directory
        );
        assert_eq!(derive_kind(Utf8Path::new("plain"), None, 0), EntryKind::File);
    }

    #[test]
    fn permission_defaults() {
        let entry = Entry {
            path: Utf8PathBuf::from("f"),
            kind: EntryKind::File,
            compression_method: CompressionMethod::Stored,
            crc32: 0,
            compressed_size: 0,
            uncompressed_size: 0,
            unix_mode: None,
            modified: spec::parse_msdos(0, 0),
            flags: 0,
            version_needed: 20,
            source_version: 20,
            external_attributes: 0,
            header_offset: 0,
            extra_fields: Vec::new(),
            comment: Vec::new(),
        };
        assert_eq!(entry.permissions(), 0o644);

        let with_mode = Entry {
            unix_mode: Some(S_IFREG | 0o600),
            ..entry
        };
        assert_eq!(with_mode.permissions(), 0o600);
    }
}
