//! Adding and removing entries, and committing the result.
//!
//! Mutations touch the in-memory index immediately; the backing store's
//! central directory is only rewritten when the archive is finalized.
//! New entry data lands where the old central directory started, and
//! removals leave gaps that are compacted once, at commit.

use std::io::Read;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::NaiveDateTime;
use crc32fast::Hasher;
use log::*;

use crate::arch::{u16_from, u32_from};
use crate::archive::{AccessMode, Archive};
use crate::codec::{CompressionMethod, Compressor};
use crate::entry::{
    validate_archive_path, AddOptions, Entry, EntryKind, S_IFDIR, S_IFLNK, S_IFREG,
};
use crate::progress::Progress;
use crate::result::*;
use crate::spec::{self, CentralDirectoryEntry, DataDescriptor, LocalFileHeader};
use crate::store::{copy_region, read_exact_at, write_all_at, Store};

/// "Version made by": Unix file attributes, ZIP spec 2.0.
const VERSION_MADE_BY: u16 = (3 << 8) | 20;

/// "Version needed to extract": 2.0 covers deflate and directories.
const VERSION_NEEDED: u16 = 20;

/// DOS directory bit in the external attributes, for tools that don't
/// read the Unix mode half.
const DOS_DIRECTORY_BIT: u32 = 0x10;

impl<S: Store> Archive<S> {
    /// Adds a file entry, streaming `source` through the compressor and
    /// checksum engine concurrently with writing.
    ///
    /// The content size isn't known up front, so the local header is
    /// written with the has-data-descriptor flag and the sizes and
    /// checksum land in a data descriptor after the content.
    pub fn add_file<R: Read>(
        &mut self,
        path: &str,
        source: &mut R,
        options: &AddOptions,
        progress: Option<&Progress>,
    ) -> ZipResult<Entry> {
        self.prepare_add(path, EntryKind::File)?;
        let mut compressor = Compressor::new(options.compression_method)?;
        let stored_path = Utf8PathBuf::from(path);
        let modified = resolve_modified(options);
        let flags = spec::FLAG_UTF8 | spec::FLAG_HAS_DATA_DESCRIPTOR;
        let (time, date) = spec::to_msdos(modified);

        let offset = self.cd_offset;
        let header = LocalFileHeader {
            minimum_extract_version: VERSION_NEEDED,
            flags,
            compression_method: options.compression_method.to_u16(),
            last_modified_time: time,
            last_modified_date: date,
            crc32: 0,
            compressed_size: 0,
            uncompressed_size: 0,
            path: stored_path.as_str().as_bytes().to_vec(),
            extra_fields: Vec::new(),
        };
        let mut encoded = Vec::new();
        header.encode(&mut encoded);
        write_all_at(&mut self.store, offset, &encoded)?;
        let data_start = offset + encoded.len() as u64;

        let mut hasher = Hasher::new();
        let mut uncompressed = 0u64;
        let mut compressed = 0u64;
        let streamed: ZipResult<()> = {
            let store = &mut self.store;
            let mut sink = |chunk: &[u8]| -> ZipResult<()> {
                store.write_all(chunk)?;
                compressed += chunk.len() as u64;
                Ok(())
            };
            let mut buf = vec![0u8; options.buffer_size.max(1)];
            let mut pump = || -> ZipResult<()> {
                loop {
                    if progress.is_some_and(Progress::is_cancelled) {
                        return Err(ZipError::Cancelled);
                    }
                    let n = source.read(&mut buf)?;
                    if n == 0 {
                        break;
                    }
                    hasher.update(&buf[..n]);
                    uncompressed += n as u64;
                    compressor.push(&buf[..n], &mut sink)?;
                    if let Some(progress) = progress {
                        progress.add_completed(n as u64);
                    }
                }
                compressor.finish(&mut sink)
            };
            pump()
        };
        if let Err(e) = streamed {
            // Roll the store back so a later commit doesn't bake the
            // partial entry in.
            self.store.truncate(offset)?;
            return Err(e);
        }

        let crc32 = hasher.finalize();
        let descriptor = DataDescriptor {
            crc32,
            compressed_size: self.narrow(compressed, offset, "entry too large without Zip64")?,
            uncompressed_size: self.narrow(uncompressed, offset, "entry too large without Zip64")?,
        };
        let mut encoded = Vec::new();
        descriptor.encode(&mut encoded);
        self.store.write_all(&encoded)?;
        self.cd_offset = data_start + compressed + encoded.len() as u64;

        let permissions = options.permissions.unwrap_or(0o644) & 0o7777;
        let unix_mode = S_IFREG | permissions;
        let entry = Entry {
            path: stored_path,
            kind: EntryKind::File,
            compression_method: options.compression_method,
            crc32,
            compressed_size: compressed,
            uncompressed_size: uncompressed,
            unix_mode: Some(unix_mode),
            modified,
            flags,
            version_needed: VERSION_NEEDED,
            source_version: VERSION_MADE_BY,
            external_attributes: unix_mode << 16,
            header_offset: offset,
            extra_fields: Vec::new(),
            comment: Vec::new(),
        };
        Ok(self.insert_entry(entry))
    }

    /// Adds a file entry from an in-memory buffer.
    ///
    /// With the whole content at hand the sizes and checksum go straight
    /// into the local header; no data descriptor is written.
    pub fn add_buffer(&mut self, path: &str, bytes: &[u8], options: &AddOptions) -> ZipResult<Entry> {
        self.prepare_add(path, EntryKind::File)?;
        let permissions = options.permissions.unwrap_or(0o644) & 0o7777;
        self.add_known_content(
            Utf8PathBuf::from(path),
            EntryKind::File,
            bytes,
            options.compression_method,
            S_IFREG | permissions,
            resolve_modified(options),
        )
    }

    /// Adds a directory entry. A trailing slash on `path` is optional;
    /// the stored form always has one.
    pub fn add_directory(&mut self, path: &str, options: &AddOptions) -> ZipResult<Entry> {
        let trimmed = path.strip_suffix('/').unwrap_or(path);
        self.prepare_add(trimmed, EntryKind::Directory)?;
        let permissions = options.permissions.unwrap_or(0o755) & 0o7777;
        self.add_known_content(
            Utf8PathBuf::from(format!("{trimmed}/")),
            EntryKind::Directory,
            &[],
            CompressionMethod::Stored,
            S_IFDIR | permissions,
            resolve_modified(options),
        )
    }

    /// Adds a symbolic link entry; `target` is stored, uncompressed, as
    /// the entry's content.
    pub fn add_symlink(&mut self, path: &str, target: &str, options: &AddOptions) -> ZipResult<Entry> {
        self.prepare_add(path, EntryKind::Symlink)?;
        let permissions = options.permissions.unwrap_or(0o777) & 0o7777;
        self.add_known_content(
            Utf8PathBuf::from(path),
            EntryKind::Symlink,
            target.as_bytes(),
            CompressionMethod::Stored,
            S_IFLNK | permissions,
            resolve_modified(options),
        )
    }

    /// Removes the entry at `path` from the index.
    ///
    /// The bytes stay put for now; every pending gap is closed in one
    /// compaction pass when the archive is finalized.
    pub fn remove_entry<P: AsRef<Utf8Path>>(&mut self, path: P) -> ZipResult<()> {
        self.require_writable()?;
        let path = path.as_ref();
        let key = if self.index.contains_key(path) {
            path.to_owned()
        } else {
            let dir_form = Utf8PathBuf::from(format!("{path}/"));
            if !self.index.contains_key(&dir_form) {
                return Err(ZipError::NotFound(path.to_string()));
            }
            dir_form
        };
        let posit = self.index.remove(&key).expect("key was just found");
        self.entries.remove(posit);
        self.reindex();
        self.removed_any = true;
        debug!("Removed {key}; gap compaction deferred to commit");
        Ok(())
    }

    /// Commits buffered mutations (central directory rewrite, gap
    /// compaction, truncation) and returns the backing store.
    ///
    /// A `Read`-mode archive is returned untouched. Commit happens in
    /// place; callers that need crash atomicity should stage to a
    /// temporary file and rename over the original.
    pub fn finalize(mut self) -> ZipResult<S> {
        if self.mode != AccessMode::Read {
            self.commit()?;
        }
        Ok(self.store)
    }

    fn commit(&mut self) -> ZipResult<()> {
        if self.removed_any {
            self.compact()?;
        }

        let mut tail = Vec::new();
        for entry in &self.entries {
            record_for(entry)?.encode(&mut tail);
        }
        let cd_size = u32_from(tail.len() as u64, "central directory too large without Zip64")?;
        let entries = u16_from(self.entries.len(), "too many entries without Zip64")?;
        let eocdr = spec::EndOfCentralDirectory {
            disk_number: 0,
            disk_with_central_directory: 0,
            entries_on_this_disk: entries,
            entries,
            central_directory_size: cd_size,
            central_directory_offset: u32_from(
                self.cd_offset,
                "central directory offset beyond 32 bits",
            )?,
            file_comment: self.comment.clone(),
        };
        eocdr.encode(&mut tail);

        write_all_at(&mut self.store, self.cd_offset, &tail)?;
        self.store.truncate(self.cd_offset + tail.len() as u64)?;
        self.store.flush()?;
        debug!(
            "Committed {} entries; central directory at {}",
            self.entries.len(),
            self.cd_offset
        );
        Ok(())
    }

    /// Shifts every surviving entry's local region down over the gaps
    /// removed entries left, fixing up header offsets as it goes.
    fn compact(&mut self) -> ZipResult<()> {
        let mut order: Vec<usize> = (0..self.entries.len()).collect();
        order.sort_by_key(|&i| self.entries[i].header_offset);

        let mut write_posit = 0u64;
        for i in order {
            let offset = self.entries[i].header_offset;
            let len = self.local_region_len(i)?;
            if offset != write_posit {
                trace!("Shifting {} from {} to {}", self.entries[i].path, offset, write_posit);
                copy_region(&mut self.store, offset, write_posit, len)?;
                self.entries[i].header_offset = write_posit;
            }
            write_posit += len;
        }
        self.cd_offset = write_posit;
        self.removed_any = false;
        Ok(())
    }

    /// Measures one entry's local region: header, name, extra field,
    /// content, and data descriptor when the flag says one follows.
    fn local_region_len(&mut self, i: usize) -> ZipResult<u64> {
        let offset = self.entries[i].header_offset;
        let compressed_size = self.entries[i].compressed_size;
        let has_descriptor = self.entries[i].has_data_descriptor();

        let mut fixed = [0u8; LocalFileHeader::FIXED_LEN];
        read_exact_at(&mut self.store, offset, &mut fixed)?;
        let trailing = LocalFileHeader::trailing_len(&fixed, offset)? as u64;
        let mut len = LocalFileHeader::FIXED_LEN as u64 + trailing + compressed_size;
        if has_descriptor {
            // There's always an EOCDR after the data region, so a
            // full-sized read can't run off the end of the store.
            let mut tail = [0u8; DataDescriptor::FIXED_LEN];
            read_exact_at(&mut self.store, offset + len, &mut tail)?;
            let (_, consumed) = DataDescriptor::parse(&tail, offset + len)?;
            len += consumed as u64;
        }
        Ok(len)
    }

    fn require_writable(&self) -> ZipResult<()> {
        if self.mode == AccessMode::Read {
            Err(ZipError::InvalidMode(
                "archive was opened read-only; open it in update mode to mutate it",
            ))
        } else {
            Ok(())
        }
    }

    /// Mode and path checks shared by every add operation.
    fn prepare_add(&self, path: &str, kind: EntryKind) -> ZipResult<()> {
        self.require_writable()?;
        if kind != EntryKind::Directory && path.ends_with('/') {
            return Err(ZipError::InvalidPath(format!(
                "{path}: only directories may end in a slash"
            )));
        }
        if let Err(reason) = validate_archive_path(path) {
            return Err(ZipError::InvalidPath(format!("{path}: {reason}")));
        }
        let trimmed = path.strip_suffix('/').unwrap_or(path);
        if self.index.contains_key(Utf8Path::new(trimmed))
            || self
                .index
                .contains_key(&Utf8PathBuf::from(format!("{trimmed}/")))
        {
            return Err(ZipError::AlreadyExists(trimmed.to_string()));
        }
        Ok(())
    }

    /// Writes an entry whose content is fully in hand: local header
    /// with real sizes, then the (possibly compressed) bytes.
    fn add_known_content(
        &mut self,
        stored_path: Utf8PathBuf,
        kind: EntryKind,
        content: &[u8],
        method: CompressionMethod,
        unix_mode: u32,
        modified: NaiveDateTime,
    ) -> ZipResult<Entry> {
        let mut hasher = Hasher::new();
        hasher.update(content);
        let crc32 = hasher.finalize();

        let mut data = Vec::with_capacity(content.len() / 2);
        let mut compressor = Compressor::new(method)?;
        let mut sink = |chunk: &[u8]| -> ZipResult<()> {
            data.extend_from_slice(chunk);
            Ok(())
        };
        compressor.push(content, &mut sink)?;
        compressor.finish(&mut sink)?;

        let offset = self.cd_offset;
        let (time, date) = spec::to_msdos(modified);
        let header = LocalFileHeader {
            minimum_extract_version: VERSION_NEEDED,
            flags: spec::FLAG_UTF8,
            compression_method: method.to_u16(),
            last_modified_time: time,
            last_modified_date: date,
            crc32,
            compressed_size: self.narrow(data.len() as u64, offset, "entry too large without Zip64")?,
            uncompressed_size: self.narrow(
                content.len() as u64,
                offset,
                "entry too large without Zip64",
            )?,
            path: stored_path.as_str().as_bytes().to_vec(),
            extra_fields: Vec::new(),
        };
        let mut encoded = Vec::new();
        header.encode(&mut encoded);
        encoded.extend_from_slice(&data);
        write_all_at(&mut self.store, offset, &encoded)?;
        self.cd_offset = offset + encoded.len() as u64;

        let mut external_attributes = unix_mode << 16;
        if kind == EntryKind::Directory {
            external_attributes |= DOS_DIRECTORY_BIT;
        }
        let entry = Entry {
            path: stored_path,
            kind,
            compression_method: method,
            crc32,
            compressed_size: data.len() as u64,
            uncompressed_size: content.len() as u64,
            unix_mode: Some(unix_mode),
            modified,
            flags: spec::FLAG_UTF8,
            version_needed: VERSION_NEEDED,
            source_version: VERSION_MADE_BY,
            external_attributes,
            header_offset: offset,
            extra_fields: Vec::new(),
            comment: Vec::new(),
        };
        Ok(self.insert_entry(entry))
    }

    fn insert_entry(&mut self, entry: Entry) -> Entry {
        let snapshot = entry.clone();
        self.index.insert(entry.path.clone(), self.entries.len());
        self.entries.push(entry);
        snapshot
    }

    fn reindex(&mut self) {
        self.index = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.path.clone(), i))
            .collect();
    }

    /// `u32_from` that also rolls the store back to `offset` so a failed
    /// add doesn't leave half an entry in the data region.
    fn narrow(&mut self, value: u64, offset: u64, what: &'static str) -> ZipResult<u32> {
        match u32_from(value, what) {
            Ok(v) => Ok(v),
            Err(e) => {
                self.store.truncate(offset)?;
                Err(e)
            }
        }
    }
}

fn resolve_modified(options: &AddOptions) -> NaiveDateTime {
    options
        .modified
        .unwrap_or_else(|| chrono::Local::now().naive_local())
}

/// Re-encodes one entry as a central directory record.
fn record_for(entry: &Entry) -> ZipResult<CentralDirectoryEntry> {
    let (time, date) = spec::to_msdos(entry.modified);
    let path = entry.path.as_str().as_bytes().to_vec();
    // Paths re-encode as UTF-8 no matter how they were decoded, so make
    // sure non-ASCII ones carry the flag that says so.
    let mut flags = entry.flags;
    if !entry.path.as_str().is_ascii() {
        flags |= spec::FLAG_UTF8;
    }
    Ok(CentralDirectoryEntry {
        source_version: entry.source_version,
        minimum_extract_version: entry.version_needed,
        flags,
        compression_method: entry.compression_method.to_u16(),
        last_modified_time: time,
        last_modified_date: date,
        crc32: entry.crc32,
        compressed_size: u32_from(entry.compressed_size, "entry too large without Zip64")?,
        uncompressed_size: u32_from(entry.uncompressed_size, "entry too large without Zip64")?,
        disk_number: 0,
        internal_file_attributes: 0,
        external_file_attributes: entry.external_attributes,
        header_offset: u32_from(entry.header_offset, "entry offset beyond 32 bits")?,
        path,
        extra_fields: entry.extra_fields.clone(),
        file_comment: entry.comment.clone(),
    })
}
