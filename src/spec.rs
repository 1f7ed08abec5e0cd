//! Code specific to the ZIP file format specification.
//!
//! We try to keep the nitty gritty here,
//! and higher-level stuff in the [`archive`], [`read`], and [`write`] modules.
//!
//! Most comments quote the ZIP spec, [`APPNOTE.TXT`].
//!
//! Each record kind decodes with [`parse_and_consume`] and encodes with
//! [`encode`]; the two are exact inverses for well-formed records.
//!
//! [`archive`]: ../archive/index.html
//! [`read`]: ../read/index.html
//! [`write`]: ../write/index.html
//! [`APPNOTE.TXT`]: https://pkware.cachefly.net/webdocs/APPNOTE/APPNOTE-6.3.6.TXT
//! [`parse_and_consume`]: struct.LocalFileHeader.html#method.parse_and_consume
//! [`encode`]: struct.LocalFileHeader.html#method.encode

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use memchr::memmem;

use crate::arch::usize;
use crate::result::*;

// Magic numbers denoting various sections of a ZIP archive

/// End of central directory magic number (0x06054b50)
pub const EOCDR_MAGIC: [u8; 4] = [b'P', b'K', 5, 6];
/// Zip64 end of central directory magic number (0x06064b50)
pub const ZIP64_EOCDR_MAGIC: [u8; 4] = [b'P', b'K', 6, 6];
/// Zip64 end of central directory locator magic number (0x07064b50)
pub const ZIP64_EOCDR_LOCATOR_MAGIC: [u8; 4] = [b'P', b'K', 6, 7];
/// Central directory magic number (0x02014b50)
pub const CENTRAL_DIRECTORY_MAGIC: [u8; 4] = [b'P', b'K', 1, 2];
/// Local file header magic number (0x04034b50)
pub const LOCAL_FILE_HEADER_MAGIC: [u8; 4] = [b'P', b'K', 3, 4];
/// Data descriptor magic number (0x08074b50)
pub const DATA_DESCRIPTOR_MAGIC: [u8; 4] = [b'P', b'K', 7, 8];

/// Bit 3 of the general purpose flags: sizes and CRC32 follow the data
/// in a data descriptor because they were unknown at header-write time.
pub const FLAG_HAS_DATA_DESCRIPTOR: u16 = 1 << 3;

/// Bit 11 of the general purpose flags: the path and comment are UTF-8.
pub const FLAG_UTF8: u16 = 1 << 11;

/// Bit 0 of the general purpose flags: the entry is encrypted.
pub const FLAG_ENCRYPTED: u16 = 1;

/// Zip64 extended information extra field ID
pub const ZIP64_EXTRA_ID: u16 = 0x0001;

/// The sentinel a 32-bit size or offset field holds when the real value
/// lives in the Zip64 extra field.
pub const ZIP64_SENTINEL: u32 = u32::MAX;

// Straight from the Rust docs:

/// Reads a little-endian u64 from the front of the provided slice, shrinking it.
fn read_u64(input: &mut &[u8]) -> u64 {
    let (int_bytes, rest) = input.split_at(std::mem::size_of::<u64>());
    *input = rest;
    u64::from_le_bytes(int_bytes.try_into().expect("less than eight bytes for u64"))
}

/// Reads a little-endian u32 from the front of the provided slice, shrinking it.
fn read_u32(input: &mut &[u8]) -> u32 {
    let (int_bytes, rest) = input.split_at(std::mem::size_of::<u32>());
    *input = rest;
    u32::from_le_bytes(int_bytes.try_into().expect("less than four bytes for u32"))
}

/// Reads a little-endian u16 from the front of the provided slice, shrinking it.
fn read_u16(input: &mut &[u8]) -> u16 {
    let (int_bytes, rest) = input.split_at(std::mem::size_of::<u16>());
    *input = rest;
    u16::from_le_bytes(int_bytes.try_into().expect("less than two bytes for u16"))
}

// ...and their write-side counterparts:

fn put_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

/// Checks that `input` has at least `needed` bytes left for the record
/// being parsed at `offset`.
fn need(input: &[u8], needed: usize, reason: &'static str, offset: u64) -> ZipResult<()> {
    if input.len() < needed {
        Err(ZipError::invalid(reason, offset))
    } else {
        Ok(())
    }
}

/// Data from the End of central directory record
///
/// Found at the back of the ZIP archive and provides offsets for finding
/// its central directory, along with lots of stuff that stopped being relevant
/// when we stopped breaking ZIP archives onto multiple floppies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndOfCentralDirectory {
    pub disk_number: u16,
    pub disk_with_central_directory: u16,
    pub entries_on_this_disk: u16,
    pub entries: u16,
    pub central_directory_size: u32,
    pub central_directory_offset: u32,
    pub file_comment: Vec<u8>,
}

impl EndOfCentralDirectory {
    /// Size of the record without the trailing comment.
    pub const FIXED_LEN: usize = 22;

    pub fn parse(mut eocdr: &[u8], offset: u64) -> ZipResult<Self> {
        // 4.3.16  End of central directory record:
        //
        // end of central dir signature    4 bytes  (0x06054b50)
        // number of this disk             2 bytes
        // number of the disk with the
        // start of the central directory  2 bytes
        // total number of entries in
        // the central dir on this disk    2 bytes
        // total number of entries in
        // the central dir                 2 bytes
        // size of the central directory   4 bytes
        // offset of start of central
        // directory with respect to
        // the starting disk number        4 bytes
        // zipfile comment length          2 bytes
        need(
            eocdr,
            Self::FIXED_LEN,
            "Truncated End Of Central Directory Record",
            offset,
        )?;
        if eocdr[..4] != EOCDR_MAGIC {
            return Err(ZipError::invalid(
                "Bad End Of Central Directory Record signature",
                offset,
            ));
        }
        eocdr = &eocdr[4..];
        let disk_number = read_u16(&mut eocdr);
        let disk_with_central_directory = read_u16(&mut eocdr);
        let entries_on_this_disk = read_u16(&mut eocdr);
        let entries = read_u16(&mut eocdr);
        let central_directory_size = read_u32(&mut eocdr);
        let central_directory_offset = read_u32(&mut eocdr);
        let comment_length = usize(read_u16(&mut eocdr))?;
        need(
            eocdr,
            comment_length,
            "End Of Central Directory Record comment overruns the file",
            offset,
        )?;
        let file_comment = eocdr[..comment_length].to_vec();

        Ok(Self {
            disk_number,
            disk_with_central_directory,
            entries_on_this_disk,
            entries,
            central_directory_size,
            central_directory_offset,
            file_comment,
        })
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&EOCDR_MAGIC);
        put_u16(out, self.disk_number);
        put_u16(out, self.disk_with_central_directory);
        put_u16(out, self.entries_on_this_disk);
        put_u16(out, self.entries);
        put_u32(out, self.central_directory_size);
        put_u32(out, self.central_directory_offset);
        put_u16(out, self.file_comment.len() as u16);
        out.extend_from_slice(&self.file_comment);
    }
}

/// Searches backward through `trailer` (the tail of the archive) for the
/// End of central directory record.
///
/// It should be right at the end of the file, but a variable-length comment
/// may follow it, so we can't jump to a known offset. A candidate only
/// counts if its comment length lines up with the end of the buffer;
/// that skips signature bytes that happen to sit inside the comment.
pub fn find_eocdr(trailer: &[u8]) -> ZipResult<usize> {
    let mut finder = memmem::rfind_iter(trailer, &EOCDR_MAGIC);
    finder
        .find(|&posit| {
            let after_fixed = posit + EndOfCentralDirectory::FIXED_LEN;
            if after_fixed > trailer.len() {
                return false;
            }
            let comment_length =
                u16::from_le_bytes([trailer[after_fixed - 2], trailer[after_fixed - 1]]) as usize;
            after_fixed + comment_length == trailer.len()
        })
        .ok_or(ZipError::invalid(
            "Couldn't find End Of Central Directory Record",
            0,
        ))
}

/// Data from the Zip64 end of central directory locator
///
/// This should immediately precede the End of central directory record
/// on Zip64 files and tell us where to find the Zip64 end of central directory record.
#[derive(Debug)]
pub struct Zip64EndOfCentralDirectoryLocator {
    pub disk_with_central_directory: u32,
    pub zip64_eocdr_offset: u64,
    pub disks: u32,
}

impl Zip64EndOfCentralDirectoryLocator {
    pub const FIXED_LEN: usize = 20;

    pub fn parse(mut mapping: &[u8]) -> Option<Self> {
        // 4.3.15 Zip64 end of central directory locator
        //
        // zip64 end of central dir locator
        // signature                       4 bytes  (0x07064b50)
        // number of the disk with the
        // start of the zip64 end of
        // central directory               4 bytes
        // relative offset of the zip64
        // end of central directory record 8 bytes
        // total number of disks           4 bytes
        if mapping.len() < Self::FIXED_LEN || mapping[..4] != ZIP64_EOCDR_LOCATOR_MAGIC {
            return None;
        }
        mapping = &mapping[4..];
        let disk_with_central_directory = read_u32(&mut mapping);
        let zip64_eocdr_offset = read_u64(&mut mapping);
        let disks = read_u32(&mut mapping);

        Some(Self {
            disk_with_central_directory,
            zip64_eocdr_offset,
            disks,
        })
    }
}

/// Data from the Zip64 end of central directory record
///
/// Present when the archive's sizes, offsets, or entry counts overflow
/// the 32- and 16-bit fields of the classic End of central directory record.
#[derive(Debug)]
pub struct Zip64EndOfCentralDirectory {
    pub source_version: u16,
    pub minimum_extract_version: u16,
    pub disk_number: u32,
    pub disk_with_central_directory: u32,
    pub entries_on_this_disk: u64,
    pub entries: u64,
    pub central_directory_size: u64,
    pub central_directory_offset: u64,
}

impl Zip64EndOfCentralDirectory {
    pub const FIXED_LEN: usize = 56;

    pub fn parse(mut eocdr: &[u8], offset: u64) -> ZipResult<Self> {
        // 4.3.14  Zip64 end of central directory record
        //
        // zip64 end of central dir
        // signature                       4 bytes  (0x06064b50)
        // size of zip64 end of central
        // directory record                8 bytes
        // version made by                 2 bytes
        // version needed to extract       2 bytes
        // number of this disk             4 bytes
        // number of the disk with the
        // start of the central directory  4 bytes
        // total number of entries in the
        // central directory on this disk  8 bytes
        // total number of entries in the
        // central directory               8 bytes
        // size of the central directory   8 bytes
        // offset of start of central
        // directory with respect to
        // the starting disk number        8 bytes
        // zip64 extensible data sector    (variable size)
        need(
            eocdr,
            Self::FIXED_LEN,
            "Truncated Zip64 End Of Central Directory Record",
            offset,
        )?;
        if eocdr[..4] != ZIP64_EOCDR_MAGIC {
            return Err(ZipError::invalid(
                "Bad Zip64 End Of Central Directory Record signature",
                offset,
            ));
        }
        eocdr = &eocdr[4..];
        let eocdr_size = read_u64(&mut eocdr);
        let source_version = read_u16(&mut eocdr);
        let minimum_extract_version = read_u16(&mut eocdr);
        let disk_number = read_u32(&mut eocdr);
        let disk_with_central_directory = read_u32(&mut eocdr);
        let entries_on_this_disk = read_u64(&mut eocdr);
        let entries = read_u64(&mut eocdr);
        let central_directory_size = read_u64(&mut eocdr);
        let central_directory_offset = read_u64(&mut eocdr);

        // 4.3.14.1 The value stored into the "size of zip64 end of central
        // directory record" SHOULD be the size of the remaining
        // record and SHOULD NOT include the leading 12 bytes.
        let eocdr_size = usize(eocdr_size)?;
        if eocdr_size + 12 < Self::FIXED_LEN {
            return Err(ZipError::invalid(
                "Invalid extensible data length in Zip64 End Of Central Directory Record",
                offset,
            ));
        }
        // Whatever follows the fixed fields is the extensible data sector;
        // nothing in it concerns us.

        Ok(Self {
            source_version,
            minimum_extract_version,
            disk_number,
            disk_with_central_directory,
            entries_on_this_disk,
            entries,
            central_directory_size,
            central_directory_offset,
        })
    }
}

/// One field of the "extra field" area found in central directory entries
/// and local file headers.
///
/// Fields with IDs we don't understand are carried as opaque bytes and
/// re-emitted verbatim on encode, so foreign metadata survives a rewrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtraField {
    pub id: u16,
    pub data: Vec<u8>,
}

/// Parses the "extra fields" found in central directory entries
/// and local file headers.
pub fn parse_extra_fields(mut extra_field: &[u8], offset: u64) -> ZipResult<Vec<ExtraField>> {
    // 4.5.1 In order to allow different programs and different types
    // of information to be stored in the 'extra' field in .ZIP
    // files, the following structure MUST be used for all
    // programs storing data in this field:
    //
    //     header1+data1 + header2+data2 . . .
    //
    // Each header MUST consist of:
    //
    //     Header ID - 2 bytes
    //     Data Size - 2 bytes
    let mut fields = Vec::new();
    while !extra_field.is_empty() {
        need(extra_field, 4, "Truncated extra field header", offset)?;
        let id = read_u16(&mut extra_field);
        let field_len = usize(read_u16(&mut extra_field))?;
        need(extra_field, field_len, "Truncated extra field data", offset)?;
        let (data, rest) = extra_field.split_at(field_len);
        fields.push(ExtraField {
            id,
            data: data.to_vec(),
        });
        extra_field = rest;
    }
    Ok(fields)
}

pub fn encode_extra_fields(fields: &[ExtraField], out: &mut Vec<u8>) {
    for field in fields {
        put_u16(out, field.id);
        put_u16(out, field.data.len() as u16);
        out.extend_from_slice(&field.data);
    }
}

fn extra_fields_len(fields: &[ExtraField]) -> usize {
    fields.iter().map(|f| 4 + f.data.len()).sum()
}

/// The 64-bit sizes and offset of one entry after applying its Zip64
/// extended information field (when present) over the 32-bit record fields.
#[derive(Debug, Clone, Copy)]
pub struct Zip64Values {
    pub uncompressed_size: u64,
    pub compressed_size: u64,
    pub header_offset: u64,
}

/// Widens an entry's 32-bit size/offset fields, pulling the real values
/// out of the Zip64 extra field for each one that holds the sentinel.
pub fn apply_zip64(
    uncompressed_size: u32,
    compressed_size: u32,
    header_offset: u32,
    fields: &[ExtraField],
    offset: u64,
) -> ZipResult<Zip64Values> {
    let mut values = Zip64Values {
        uncompressed_size: uncompressed_size as u64,
        compressed_size: compressed_size as u64,
        header_offset: header_offset as u64,
    };
    let Some(zip64) = fields.iter().find(|f| f.id == ZIP64_EXTRA_ID) else {
        return Ok(values);
    };

    // 4.5.3 The fields MUST only appear if the corresponding Local or
    // Central directory record field is set to 0xFFFF or 0xFFFFFFFF,
    // and they appear in this fixed order.
    let mut data = zip64.data.as_slice();
    let mut take = |which: &mut u64| -> ZipResult<()> {
        need(data, 8, "Truncated Zip64 extra field", offset)?;
        *which = read_u64(&mut data);
        Ok(())
    };
    if uncompressed_size == ZIP64_SENTINEL {
        take(&mut values.uncompressed_size)?;
    }
    if compressed_size == ZIP64_SENTINEL {
        take(&mut values.compressed_size)?;
    }
    if header_offset == ZIP64_SENTINEL {
        take(&mut values.header_offset)?;
    }
    Ok(values)
}

/// Data from a central directory entry
///
/// Each of these records contains information about a file or folder
/// stored in the ZIP archive. The central directory is authoritative
/// for catalog membership; local file headers are checked against it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CentralDirectoryEntry {
    pub source_version: u16,
    pub minimum_extract_version: u16,
    pub flags: u16,
    pub compression_method: u16,
    pub last_modified_time: u16,
    pub last_modified_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub disk_number: u16,
    pub internal_file_attributes: u16,
    pub external_file_attributes: u32,
    pub header_offset: u32,
    pub path: Vec<u8>,
    pub extra_fields: Vec<ExtraField>,
    pub file_comment: Vec<u8>,
}

impl CentralDirectoryEntry {
    pub const FIXED_LEN: usize = 46;

    pub fn parse_and_consume(entry: &mut &[u8], offset: u64) -> ZipResult<Self> {
        // 4.3.12  Central directory structure:
        //
        //   central file header signature   4 bytes  (0x02014b50)
        //   version made by                 2 bytes
        //   version needed to extract       2 bytes
        //   general purpose bit flag        2 bytes
        //   compression method              2 bytes
        //   last mod file time              2 bytes
        //   last mod file date              2 bytes
        //   crc-32                          4 bytes
        //   compressed size                 4 bytes
        //   uncompressed size               4 bytes
        //   file name length                2 bytes
        //   extra field length              2 bytes
        //   file comment length             2 bytes
        //   disk number start               2 bytes
        //   internal file attributes        2 bytes
        //   external file attributes        4 bytes
        //   relative offset of local header 4 bytes
        //
        //   file name (variable size)
        //   extra field (variable size)
        //   file comment (variable size)
        need(
            entry,
            Self::FIXED_LEN,
            "Truncated central directory entry",
            offset,
        )?;
        if entry[..4] != CENTRAL_DIRECTORY_MAGIC {
            return Err(ZipError::invalid("Invalid central directory entry", offset));
        }
        *entry = &entry[4..];
        let source_version = read_u16(entry);
        let minimum_extract_version = read_u16(entry);
        let flags = read_u16(entry);
        let compression_method = read_u16(entry);
        let last_modified_time = read_u16(entry);
        let last_modified_date = read_u16(entry);
        let crc32 = read_u32(entry);
        let compressed_size = read_u32(entry);
        let uncompressed_size = read_u32(entry);
        let path_length = usize(read_u16(entry))?;
        let extra_field_length = usize(read_u16(entry))?;
        let file_comment_length = usize(read_u16(entry))?;
        let disk_number = read_u16(entry);
        let internal_file_attributes = read_u16(entry);
        let external_file_attributes = read_u32(entry);
        let header_offset = read_u32(entry);
        need(
            entry,
            path_length + extra_field_length + file_comment_length,
            "Central directory entry overruns the central directory",
            offset,
        )?;
        let (path, remaining) = entry.split_at(path_length);
        let (extra_field, remaining) = remaining.split_at(extra_field_length);
        let (file_comment, remaining) = remaining.split_at(file_comment_length);
        let extra_fields = parse_extra_fields(extra_field, offset)?;
        let path = path.to_vec();
        let file_comment = file_comment.to_vec();
        *entry = remaining;

        Ok(Self {
            source_version,
            minimum_extract_version,
            flags,
            compression_method,
            last_modified_time,
            last_modified_date,
            crc32,
            compressed_size,
            uncompressed_size,
            disk_number,
            internal_file_attributes,
            external_file_attributes,
            header_offset,
            path,
            extra_fields,
            file_comment,
        })
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&CENTRAL_DIRECTORY_MAGIC);
        put_u16(out, self.source_version);
        put_u16(out, self.minimum_extract_version);
        put_u16(out, self.flags);
        put_u16(out, self.compression_method);
        put_u16(out, self.last_modified_time);
        put_u16(out, self.last_modified_date);
        put_u32(out, self.crc32);
        put_u32(out, self.compressed_size);
        put_u32(out, self.uncompressed_size);
        put_u16(out, self.path.len() as u16);
        put_u16(out, extra_fields_len(&self.extra_fields) as u16);
        put_u16(out, self.file_comment.len() as u16);
        put_u16(out, self.disk_number);
        put_u16(out, self.internal_file_attributes);
        put_u32(out, self.external_file_attributes);
        put_u32(out, self.header_offset);
        out.extend_from_slice(&self.path);
        encode_extra_fields(&self.extra_fields, out);
        out.extend_from_slice(&self.file_comment);
    }
}

/// Data from a local file header
///
/// Each file's actual contents is preceded by this header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFileHeader {
    pub minimum_extract_version: u16,
    pub flags: u16,
    pub compression_method: u16,
    pub last_modified_time: u16,
    pub last_modified_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub path: Vec<u8>,
    pub extra_fields: Vec<ExtraField>,
}

impl LocalFileHeader {
    pub const FIXED_LEN: usize = 30;

    /// Length of the name and extra field that trail the fixed portion,
    /// from just the fixed portion's bytes. Validates the signature.
    pub fn trailing_len(fixed: &[u8], offset: u64) -> ZipResult<usize> {
        need(fixed, Self::FIXED_LEN, "Truncated local file header", offset)?;
        if fixed[..4] != LOCAL_FILE_HEADER_MAGIC {
            return Err(ZipError::invalid("Invalid local file header", offset));
        }
        let path_length = u16::from_le_bytes([fixed[26], fixed[27]]) as usize;
        let extra_field_length = u16::from_le_bytes([fixed[28], fixed[29]]) as usize;
        Ok(path_length + extra_field_length)
    }

    pub fn parse_and_consume(header: &mut &[u8], offset: u64) -> ZipResult<Self> {
        // 4.3.7  Local file header:
        //
        // local file header signature     4 bytes  (0x04034b50)
        // version needed to extract       2 bytes
        // general purpose bit flag        2 bytes
        // compression method              2 bytes
        // last mod file time              2 bytes
        // last mod file date              2 bytes
        // crc-32                          4 bytes
        // compressed size                 4 bytes
        // uncompressed size               4 bytes
        // file name length                2 bytes
        // extra field length              2 bytes
        //
        // file name (variable size)
        // extra field (variable size)
        need(
            header,
            Self::FIXED_LEN,
            "Truncated local file header",
            offset,
        )?;
        if header[..4] != LOCAL_FILE_HEADER_MAGIC {
            return Err(ZipError::invalid("Invalid local file header", offset));
        }
        *header = &header[4..];
        let minimum_extract_version = read_u16(header);
        let flags = read_u16(header);
        let compression_method = read_u16(header);
        let last_modified_time = read_u16(header);
        let last_modified_date = read_u16(header);
        let crc32 = read_u32(header);
        let compressed_size = read_u32(header);
        let uncompressed_size = read_u32(header);
        let path_length = usize(read_u16(header))?;
        let extra_field_length = usize(read_u16(header))?;
        need(
            header,
            path_length + extra_field_length,
            "Local file header overruns the file",
            offset,
        )?;
        let (path, remaining) = header.split_at(path_length);
        let (extra_field, remaining) = remaining.split_at(extra_field_length);
        let extra_fields = parse_extra_fields(extra_field, offset)?;
        let path = path.to_vec();
        *header = remaining;

        Ok(Self {
            minimum_extract_version,
            flags,
            compression_method,
            last_modified_time,
            last_modified_date,
            crc32,
            compressed_size,
            uncompressed_size,
            path,
            extra_fields,
        })
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&LOCAL_FILE_HEADER_MAGIC);
        put_u16(out, self.minimum_extract_version);
        put_u16(out, self.flags);
        put_u16(out, self.compression_method);
        put_u16(out, self.last_modified_time);
        put_u16(out, self.last_modified_date);
        put_u32(out, self.crc32);
        put_u32(out, self.compressed_size);
        put_u32(out, self.uncompressed_size);
        put_u16(out, self.path.len() as u16);
        put_u16(out, extra_fields_len(&self.extra_fields) as u16);
        out.extend_from_slice(&self.path);
        encode_extra_fields(&self.extra_fields, out);
    }
}

/// The data descriptor trailing an entry whose sizes and checksum were
/// unknown when its local file header was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataDescriptor {
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
}

impl DataDescriptor {
    /// Encoded length with the signature, which we always write.
    pub const FIXED_LEN: usize = 16;
    /// Encoded length without the optional signature.
    pub const UNSIGNED_LEN: usize = 12;

    /// Parses a data descriptor, returning it and the number of bytes it
    /// occupied.
    ///
    /// 4.3.9.3 Although not originally assigned a signature, the value
    /// 0x08074b50 has commonly been adopted as a signature value for the
    /// data descriptor record. Implementers SHOULD be aware that ZIP files
    /// MAY be encountered with or without this signature.
    pub fn parse(mut bytes: &[u8], offset: u64) -> ZipResult<(Self, usize)> {
        need(bytes, Self::UNSIGNED_LEN, "Truncated data descriptor", offset)?;
        let signed = bytes[..4] == DATA_DESCRIPTOR_MAGIC;
        if signed {
            need(bytes, Self::FIXED_LEN, "Truncated data descriptor", offset)?;
            bytes = &bytes[4..];
        }
        let crc32 = read_u32(&mut bytes);
        let compressed_size = read_u32(&mut bytes);
        let uncompressed_size = read_u32(&mut bytes);
        let consumed = if signed {
            Self::FIXED_LEN
        } else {
            Self::UNSIGNED_LEN
        };
        Ok((
            Self {
                crc32,
                compressed_size,
                uncompressed_size,
            },
            consumed,
        ))
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&DATA_DESCRIPTOR_MAGIC);
        put_u32(out, self.crc32);
        put_u32(out, self.compressed_size);
        put_u32(out, self.uncompressed_size);
    }
}

/// Converts an MS-DOS time/date bitfield pair to a calendar timestamp.
///
/// Nonsense dates (ZIP producers emit plenty) fall back to the DOS epoch.
pub fn parse_msdos(time: u16, date: u16) -> NaiveDateTime {
    let seconds = (0b0000_0000_0001_1111 & time) as u32 * 2; // MSDOS uses 2-second precision
    let minutes = (0b0000_0111_1110_0000 & time) as u32 >> 5;
    let hours = (0b1111_1000_0000_0000 & time) as u32 >> 11;

    let days = (0b0000_0000_0001_1111 & date) as u32;
    let months = (0b0000_0001_1110_0000 & date) as u32 >> 5;
    // MSDOS uses years since 1980; always interpreted as a positive value
    let years = ((0b1111_1110_0000_0000 & date) >> 9) as i32 + 1980;

    NaiveDate::from_ymd_opt(years, months, days)
        .and_then(|d| d.and_hms_opt(hours, minutes, seconds))
        .unwrap_or_else(dos_epoch)
}

/// Converts a calendar timestamp to MS-DOS (time, date) bitfields,
/// clamping to the representable 1980..=2107 range.
pub fn to_msdos(when: NaiveDateTime) -> (u16, u16) {
    let when = if when.year() < 1980 {
        dos_epoch()
    } else if when.year() > 2107 {
        NaiveDate::from_ymd_opt(2107, 12, 31)
            .and_then(|d| d.and_hms_opt(23, 59, 58))
            .expect("valid clamp date")
    } else {
        when
    };
    let time =
        (when.second() / 2) as u16 | ((when.minute() as u16) << 5) | ((when.hour() as u16) << 11);
    let date = when.day() as u16
        | ((when.month() as u16) << 5)
        | (((when.year() - 1980) as u16) << 9);
    (time, date)
}

fn dos_epoch() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1980, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .expect("valid epoch")
}
