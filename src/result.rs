//! Error types and the related `Result<T>`

use camino::Utf8PathBuf;
use thiserror::Error;

pub type ZipResult<T> = Result<T, ZipError>;

#[derive(Debug, Error)]
pub enum ZipError {
    /// An error from underlying I/O
    #[error("I/O Error")]
    Io(#[from] std::io::Error),

    /// A structural record was malformed or missing.
    #[error("Invalid Zip archive: {reason} (at byte offset {offset})")]
    InvalidFormat { reason: &'static str, offset: u64 },

    /// Decoding a UTF-8 name or comment failed
    #[error("Invalid UTF-8")]
    Encoding(#[from] std::str::Utf8Error),

    /// The ZIP archive uses an unsupported feature
    #[error("Unsupported Zip archive: {0}")]
    UnsupportedArchive(String),

    /// A header declared a compression method this library can't handle.
    #[error("Unsupported compression method code {0}")]
    UnsupportedCompressionMethod(u16),

    /// The codec rejected the compressed byte stream before producing
    /// all of the declared output.
    #[error("Corrupted data in entry {0}")]
    CorruptedData(Utf8PathBuf),

    /// The content decoded cleanly but its CRC32 doesn't match the
    /// checksum recorded in the central directory.
    #[error("Checksum mismatch in entry {path}: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        path: Utf8PathBuf,
        expected: u32,
        actual: u32,
    },

    /// No archive or entry at the provided path
    #[error("Not found: {0}")]
    NotFound(String),

    /// An archive or entry already exists at the provided path
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// A user-provided path (not one from a ZIP archive) was invalid.
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// A path would resolve outside the extraction destination.
    #[error("Path escapes the extraction destination: {0}")]
    PathTraversal(String),

    /// The destination exists but is the wrong kind of filesystem object.
    #[error("Destination exists with conflicting type: {0}")]
    TypeConflict(String),

    /// The operation was cancelled through its progress handle.
    #[error("Operation cancelled")]
    Cancelled,

    /// A record requires sizes or offsets beyond the supported limits.
    #[error("Zip64 unsupported: {0}")]
    Zip64Unsupported(&'static str),

    /// The operation isn't available in the archive's access mode.
    #[error("Invalid access mode: {0}")]
    InvalidMode(&'static str),
}

impl ZipError {
    pub(crate) fn invalid(reason: &'static str, offset: u64) -> Self {
        ZipError::InvalidFormat { reason, offset }
    }
}
