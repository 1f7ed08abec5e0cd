//! The entry stream engine: reading bytes back out of an archive.
//!
//! [`Archive::read_entry`] gives an [`EntryReader`] over one entry's
//! post-decompression bytes. [`Archive::extract`] and
//! [`Archive::extract_with`] drive a stream end-to-end, with CRC32
//! verification, progress reporting, and chunk-boundary cancellation.
//!
//! [`Archive::read_entry`]: ../archive/struct.Archive.html#method.read_entry
//! [`Archive::extract`]: ../archive/struct.Archive.html#method.extract
//! [`Archive::extract_with`]: ../archive/struct.Archive.html#method.extract_with
//! [`EntryReader`]: struct.EntryReader.html

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use camino::Utf8PathBuf;
use crc32fast::Hasher;
use log::*;

use crate::archive::Archive;
use crate::codec::Decompressor;
use crate::crc_reader::Crc32Reader;
use crate::entry::{decode_path, Entry, EntryKind};
use crate::extract;
use crate::progress::Progress;
use crate::result::*;
use crate::spec::{self, LocalFileHeader};
use crate::store::{read_exact_at, Store};

/// Settings for the extract operations.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Size of the read and decompression buffers; also the cancellation
    /// latency, since the flag is polled once per chunk.
    pub buffer_size: usize,
    /// Skip checksum verification. The extract call then returns 0
    /// instead of the content's CRC32.
    pub skip_crc32: bool,
    /// Allow symlink entries whose target points outside the extraction
    /// destination. Off by default.
    pub allow_uncontained_symlinks: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            buffer_size: crate::DEFAULT_CHUNK_SIZE,
            skip_crc32: false,
            allow_uncontained_symlinks: false,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum StreamState {
    Reading,
    Done,
    Failed,
}

/// A single-use stream over one entry's decompressed bytes.
///
/// Reads pull compressed bytes from the backing store in bounded chunks
/// and run them through the codec; no decompressed content is buffered
/// beyond what the caller asks for.
pub struct EntryReader<'a, S: Store> {
    store: &'a mut S,
    decompressor: Decompressor,
    path: Utf8PathBuf,
    stored: bool,
    compressed_remaining: u64,
    in_buf: Vec<u8>,
    in_posit: usize,
    in_len: usize,
    state: StreamState,
}

impl<S: Store> EntryReader<'_, S> {
    /// Reads up to `buf.len()` decompressed bytes, returning how many
    /// were produced; 0 means the entry is exhausted.
    pub fn read_chunk(&mut self, buf: &mut [u8]) -> ZipResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        match self.state {
            StreamState::Done => return Ok(0),
            StreamState::Failed => return Err(ZipError::CorruptedData(self.path.clone())),
            StreamState::Reading => {}
        }
        loop {
            if self.in_posit == self.in_len && self.compressed_remaining > 0 {
                let step = (self.in_buf.len() as u64).min(self.compressed_remaining) as usize;
                if let Err(e) = self.store.read_exact(&mut self.in_buf[..step]) {
                    self.state = StreamState::Failed;
                    return Err(e.into());
                }
                self.in_posit = 0;
                self.in_len = step;
                self.compressed_remaining -= step as u64;
            }

            let input = &self.in_buf[self.in_posit..self.in_len];
            let input_was_empty = input.is_empty();
            let (consumed, produced) =
                match self.decompressor.decompress(input, buf, &self.path) {
                    Ok(counts) => counts,
                    Err(e) => {
                        self.state = StreamState::Failed;
                        return Err(e);
                    }
                };
            self.in_posit += consumed;

            let drained = self.compressed_remaining == 0 && self.in_posit == self.in_len;
            if self.decompressor.is_finished() || (self.stored && drained) {
                self.state = StreamState::Done;
            }

            if produced > 0 {
                return Ok(produced);
            }
            if self.state == StreamState::Done {
                return Ok(0);
            }
            if drained && input_was_empty {
                // The store ran out before the codec saw its end marker.
                self.state = StreamState::Failed;
                return Err(ZipError::CorruptedData(self.path.clone()));
            }
            if consumed == 0 && !input_was_empty {
                // The codec is stalled on valid-looking input.
                self.state = StreamState::Failed;
                return Err(ZipError::CorruptedData(self.path.clone()));
            }
        }
    }
}

impl<S: Store> io::Read for EntryReader<'_, S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.read_chunk(buf) {
            Ok(n) => Ok(n),
            Err(ZipError::Io(e)) => Err(e),
            Err(other) => Err(io::Error::new(io::ErrorKind::InvalidData, other)),
        }
    }
}

impl<S: Store> Archive<S> {
    /// Opens a read stream over one entry's decompressed bytes.
    ///
    /// The local file header is validated (and, by default, cross-checked
    /// against the central directory record) before any content is read.
    pub fn read_entry(&mut self, entry: &Entry) -> ZipResult<EntryReader<'_, S>> {
        if entry.is_encrypted() {
            return Err(ZipError::UnsupportedArchive(format!(
                "Can't read encrypted file {}",
                entry.path
            )));
        }

        let mut fixed = [0u8; LocalFileHeader::FIXED_LEN];
        read_exact_at(&mut self.store, entry.header_offset, &mut fixed)?;
        let trailing_len = LocalFileHeader::trailing_len(&fixed, entry.header_offset)?;
        let mut header = fixed.to_vec();
        header.resize(LocalFileHeader::FIXED_LEN + trailing_len, 0);
        self.store.read_exact(&mut header[LocalFileHeader::FIXED_LEN..])?;

        let local =
            LocalFileHeader::parse_and_consume(&mut header.as_slice(), entry.header_offset)?;
        trace!("{:?}", local);
        if cfg!(feature = "check-local-metadata") {
            self.check_local_header(entry, &local)?;
        }

        debug!("Reading {}", entry.path);
        // The store now sits at the entry's first content byte.
        Ok(EntryReader {
            store: &mut self.store,
            decompressor: Decompressor::new(entry.compression_method)?,
            path: entry.path.clone(),
            stored: entry.compression_method == crate::CompressionMethod::Stored,
            compressed_remaining: entry.compressed_size,
            in_buf: vec![0u8; crate::DEFAULT_CHUNK_SIZE],
            in_posit: 0,
            in_len: 0,
            state: StreamState::Reading,
        })
    }

    /// Like [`read_entry`], but the returned reader validates the
    /// entry's recorded CRC32 when it reaches EOF, failing the final
    /// read on a mismatch.
    ///
    /// [`read_entry`]: #method.read_entry
    pub fn read_entry_verified(
        &mut self,
        entry: &Entry,
    ) -> ZipResult<Crc32Reader<EntryReader<'_, S>>> {
        let crc32 = entry.crc32;
        Ok(Crc32Reader::new(self.read_entry(entry)?, crc32))
    }

    /// The central directory is authoritative; a local header that
    /// disagrees with it on path, method, or (when it has them) sizes
    /// and checksum means the archive is damaged or hostile.
    fn check_local_header(&self, entry: &Entry, local: &LocalFileHeader) -> ZipResult<()> {
        let local_path = decode_path(&local.path, local.flags, self.path_encoding)?;
        if local_path != entry.path
            || local.compression_method != entry.compression_method.to_u16()
        {
            return Err(ZipError::invalid(
                "Central directory entry doesn't match local file header",
                entry.header_offset,
            ));
        }
        if local.flags & spec::FLAG_HAS_DATA_DESCRIPTOR == 0 {
            let values = spec::apply_zip64(
                local.uncompressed_size,
                local.compressed_size,
                0,
                &local.extra_fields,
                entry.header_offset,
            )?;
            if local.crc32 != entry.crc32
                || values.compressed_size != entry.compressed_size
                || values.uncompressed_size != entry.uncompressed_size
            {
                return Err(ZipError::invalid(
                    "Central directory entry doesn't match local file header",
                    entry.header_offset,
                ));
            }
        }
        Ok(())
    }

    /// Streams one entry's content to a caller-supplied consumer,
    /// chunk by chunk.
    ///
    /// Returns the CRC32 of the produced bytes, or 0 when
    /// `options.skip_crc32` is set. A consumer error aborts the stream
    /// with that error.
    pub fn extract_with<F>(
        &mut self,
        entry: &Entry,
        options: &ExtractOptions,
        progress: Option<&Progress>,
        mut consumer: F,
    ) -> ZipResult<u32>
    where
        F: FnMut(&[u8]) -> ZipResult<()>,
    {
        if let Some(progress) = progress {
            progress.set_total(entry.uncompressed_size);
        }
        let mut hasher = if options.skip_crc32 {
            None
        } else {
            Some(Hasher::new())
        };

        let mut reader = self.read_entry(entry)?;
        let mut buf = vec![0u8; options.buffer_size.max(1)];
        loop {
            if progress.is_some_and(Progress::is_cancelled) {
                return Err(ZipError::Cancelled);
            }
            let n = reader.read_chunk(&mut buf)?;
            if n == 0 {
                break;
            }
            if let Some(hasher) = hasher.as_mut() {
                hasher.update(&buf[..n]);
            }
            consumer(&buf[..n])?;
            if let Some(progress) = progress {
                progress.add_completed(n as u64);
            }
        }

        match hasher.map(Hasher::finalize) {
            Some(actual) if actual != entry.crc32 => Err(ZipError::ChecksumMismatch {
                path: entry.path.clone(),
                expected: entry.crc32,
                actual,
            }),
            Some(actual) => Ok(actual),
            None => Ok(0),
        }
    }

    /// Extracts one entry beneath `base` on the filesystem, resolving
    /// and validating its path and applying its recorded type,
    /// permissions, and modification time.
    ///
    /// On cancellation or checksum failure a partially-written file is
    /// left in place; cleaning it up is the caller's call.
    pub fn extract(
        &mut self,
        entry: &Entry,
        base: &Path,
        options: &ExtractOptions,
        progress: Option<&Progress>,
    ) -> ZipResult<u32> {
        let destination = extract::resolve_destination(base, &entry.path)?;
        debug!("Extracting {} to {}", entry.path, destination.display());

        match entry.kind {
            EntryKind::Directory => {
                extract::create_directory(&destination)?;
                extract::apply_attributes(&destination, entry)?;
                Ok(0)
            }
            EntryKind::Symlink => {
                let mut target = Vec::new();
                let crc = self.extract_with(entry, options, progress, |chunk| {
                    target.extend_from_slice(chunk);
                    Ok(())
                })?;
                let target = std::str::from_utf8(&target).map_err(ZipError::Encoding)?;
                extract::materialize_symlink(
                    base,
                    &destination,
                    target,
                    options.allow_uncontained_symlinks,
                )?;
                extract::apply_symlink_attributes(&destination, entry)?;
                Ok(crc)
            }
            EntryKind::File => {
                if let Some(parent) = destination.parent() {
                    fs::create_dir_all(parent)?;
                }
                if destination.is_dir() {
                    return Err(ZipError::TypeConflict(destination.display().to_string()));
                }
                let mut file = fs::File::create(&destination)?;
                let crc = self.extract_with(entry, options, progress, |chunk| {
                    file.write_all(chunk).map_err(ZipError::from)
                })?;
                drop(file);
                extract::apply_attributes(&destination, entry)?;
                Ok(crc)
            }
        }
    }
}
