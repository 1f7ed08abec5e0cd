//! The backing store boundary.
//!
//! The engine reads and writes archives through [`Store`]: a seekable,
//! byte-addressable chunk of storage. Files and in-memory buffers both
//! qualify; nothing above this seam assumes a filesystem.

use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};

/// A seekable, byte-addressable backing store for one archive.
pub trait Store: Read + Write + Seek {
    /// Cuts the store down to `len` bytes.
    fn truncate(&mut self, len: u64) -> io::Result<()>;

    /// The store's current length in bytes.
    ///
    /// The default implementation seeks to the end and back.
    fn len(&mut self) -> io::Result<u64> {
        let posit = self.stream_position()?;
        let end = self.seek(SeekFrom::End(0))?;
        self.seek(SeekFrom::Start(posit))?;
        Ok(end)
    }

    fn is_empty(&mut self) -> io::Result<bool> {
        Ok(self.len()? == 0)
    }
}

impl Store for File {
    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }

    fn len(&mut self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }
}

impl Store for Cursor<Vec<u8>> {
    fn truncate(&mut self, len: u64) -> io::Result<()> {
        // Cursor positions are u64 already; usize is the only narrowing.
        let len = usize::try_from(len)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "length beyond address space"))?;
        self.get_mut().truncate(len);
        Ok(())
    }

    fn len(&mut self) -> io::Result<u64> {
        Ok(self.get_ref().len() as u64)
    }
}

/// Reads exactly `buf.len()` bytes at `offset`, leaving the position
/// just past the read.
pub(crate) fn read_exact_at<S: Store>(store: &mut S, offset: u64, buf: &mut [u8]) -> io::Result<()> {
    store.seek(SeekFrom::Start(offset))?;
    store.read_exact(buf)
}

/// Writes all of `bytes` at `offset`, leaving the position just past
/// the write.
pub(crate) fn write_all_at<S: Store>(store: &mut S, offset: u64, bytes: &[u8]) -> io::Result<()> {
    store.seek(SeekFrom::Start(offset))?;
    store.write_all(bytes)
}

/// Copies `len` bytes from `from` down to `to` within the store.
///
/// Only forward copies (`to < from`) are needed here: regions shift
/// toward the front when removed entries leave gaps behind.
pub(crate) fn copy_region<S: Store>(store: &mut S, from: u64, to: u64, len: u64) -> io::Result<()> {
    debug_assert!(to <= from);
    let mut buf = [0u8; 64 * 1024];
    let mut moved = 0u64;
    while moved < len {
        let step = (len - moved).min(buf.len() as u64) as usize;
        read_exact_at(store, from + moved, &mut buf[..step])?;
        write_all_at(store, to + moved, &buf[..step])?;
        moved += step as u64;
    }
    Ok(())
}
