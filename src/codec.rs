//! The compression codec layer: streaming transforms between entry
//! content and its stored form.
//!
//! Both directions work the same way: feed bounded input chunks, get zero
//! or more output chunks back, with codec state (the deflate sliding
//! window) carried across calls. `Stored` is the identity transform.

use camino::Utf8Path;
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

use crate::result::*;

/// The compression method used to store a file
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CompressionMethod {
    /// The file is uncompressed
    Stored,
    /// The file is [DEFLATE](https://en.wikipedia.org/wiki/DEFLATE)d.
    /// This is the most common format used by ZIP archives.
    Deflate,
    /// The file is compressed with a yet-unsupported format.
    /// (The u16 indicates the internal format code.)
    Unsupported(u16),
}

impl CompressionMethod {
    pub fn from_u16(u: u16) -> Self {
        match u {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflate,
            // 12 => CompressionMethod::Bzip2,
            v => CompressionMethod::Unsupported(v),
        }
    }

    pub fn to_u16(self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflate => 8,
            CompressionMethod::Unsupported(v) => v,
        }
    }
}

/// Granularity of the scratch buffer the deflate transforms fill before
/// handing bytes to their sink.
const SCRATCH_LEN: usize = 32 * 1024;

/// A streaming compressor for one entry's content.
pub(crate) enum Compressor {
    Stored,
    Deflate(Box<Compress>),
}

impl Compressor {
    pub fn new(method: CompressionMethod) -> ZipResult<Self> {
        match method {
            CompressionMethod::Stored => Ok(Compressor::Stored),
            CompressionMethod::Deflate => Ok(Compressor::Deflate(Box::new(Compress::new(
                Compression::default(),
                false, // raw deflate, no zlib wrapper
            )))),
            CompressionMethod::Unsupported(v) => Err(ZipError::UnsupportedCompressionMethod(v)),
        }
    }

    /// Feeds one input chunk through, passing each produced chunk to `sink`.
    pub fn push<F>(&mut self, mut input: &[u8], sink: &mut F) -> ZipResult<()>
    where
        F: FnMut(&[u8]) -> ZipResult<()>,
    {
        match self {
            Compressor::Stored => {
                if !input.is_empty() {
                    sink(input)?;
                }
                Ok(())
            }
            Compressor::Deflate(deflate) => {
                let mut scratch = [0u8; SCRATCH_LEN];
                while !input.is_empty() {
                    let before_in = deflate.total_in();
                    let before_out = deflate.total_out();
                    deflate
                        .compress(input, &mut scratch, FlushCompress::None)
                        .expect("raw deflate compression can't error");
                    let consumed = (deflate.total_in() - before_in) as usize;
                    let produced = (deflate.total_out() - before_out) as usize;
                    input = &input[consumed..];
                    if produced > 0 {
                        sink(&scratch[..produced])?;
                    }
                }
                Ok(())
            }
        }
    }

    /// Flushes any bytes the codec still holds and terminates the stream.
    pub fn finish<F>(&mut self, sink: &mut F) -> ZipResult<()>
    where
        F: FnMut(&[u8]) -> ZipResult<()>,
    {
        match self {
            Compressor::Stored => Ok(()),
            Compressor::Deflate(deflate) => {
                let mut scratch = [0u8; SCRATCH_LEN];
                loop {
                    let before_out = deflate.total_out();
                    let status = deflate
                        .compress(&[], &mut scratch, FlushCompress::Finish)
                        .expect("raw deflate compression can't error");
                    let produced = (deflate.total_out() - before_out) as usize;
                    if produced > 0 {
                        sink(&scratch[..produced])?;
                    }
                    if status == Status::StreamEnd {
                        return Ok(());
                    }
                }
            }
        }
    }
}

/// A streaming decompressor for one entry's stored bytes.
pub(crate) enum Decompressor {
    Stored,
    Deflate {
        inflate: Box<Decompress>,
        finished: bool,
    },
}

impl Decompressor {
    pub fn new(method: CompressionMethod) -> ZipResult<Self> {
        match method {
            CompressionMethod::Stored => Ok(Decompressor::Stored),
            CompressionMethod::Deflate => Ok(Decompressor::Deflate {
                inflate: Box::new(Decompress::new(false)),
                finished: false,
            }),
            CompressionMethod::Unsupported(v) => Err(ZipError::UnsupportedCompressionMethod(v)),
        }
    }

    /// Decompresses as much of `input` into `out` as fits.
    ///
    /// Returns `(consumed, produced)` byte counts. `entry_path` only
    /// flavors the error when the codec rejects the stream.
    pub fn decompress(
        &mut self,
        input: &[u8],
        out: &mut [u8],
        entry_path: &Utf8Path,
    ) -> ZipResult<(usize, usize)> {
        match self {
            Decompressor::Stored => {
                let n = input.len().min(out.len());
                out[..n].copy_from_slice(&input[..n]);
                Ok((n, n))
            }
            Decompressor::Deflate { inflate, finished } => {
                let before_in = inflate.total_in();
                let before_out = inflate.total_out();
                let status = inflate
                    .decompress(input, out, FlushDecompress::None)
                    .map_err(|_| ZipError::CorruptedData(entry_path.to_owned()))?;
                if status == Status::StreamEnd {
                    *finished = true;
                }
                let consumed = (inflate.total_in() - before_in) as usize;
                let produced = (inflate.total_out() - before_out) as usize;
                Ok((consumed, produced))
            }
        }
    }

    /// True once the codec has seen the end of its stream.
    ///
    /// `Stored` data has no framing of its own, so the caller decides
    /// when the identity transform is done.
    pub fn is_finished(&self) -> bool {
        match self {
            Decompressor::Stored => false,
            Decompressor::Deflate { finished, .. } => *finished,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn path() -> &'static Utf8Path {
        Utf8Path::new("test.bin")
    }

    fn compress_all(method: CompressionMethod, data: &[u8], chunk: usize) -> Vec<u8> {
        let mut compressor = Compressor::new(method).unwrap();
        let mut out = Vec::new();
        let mut sink = |bytes: &[u8]| {
            out.extend_from_slice(bytes);
            Ok(())
        };
        for piece in data.chunks(chunk.max(1)) {
            compressor.push(piece, &mut sink).unwrap();
        }
        compressor.finish(&mut sink).unwrap();
        out
    }

    fn decompress_all(method: CompressionMethod, data: &[u8], chunk: usize) -> ZipResult<Vec<u8>> {
        let mut decompressor = Decompressor::new(method)?;
        let mut out = Vec::new();
        let mut scratch = [0u8; 256];
        for mut piece in data.chunks(chunk.max(1)) {
            while !piece.is_empty() {
                let (consumed, produced) = decompressor.decompress(piece, &mut scratch, path())?;
                piece = &piece[consumed..];
                out.extend_from_slice(&scratch[..produced]);
                if consumed == 0 && produced == 0 {
                    return Err(ZipError::CorruptedData(path().to_owned()));
                }
            }
        }
        // Drain whatever the sliding window still holds.
        loop {
            let (_, produced) = decompressor.decompress(&[], &mut scratch, path())?;
            if produced == 0 {
                break;
            }
            out.extend_from_slice(&scratch[..produced]);
        }
        Ok(out)
    }

    #[test]
    fn method_codes_round_trip() {
        assert_eq!(CompressionMethod::from_u16(0), CompressionMethod::Stored);
        assert_eq!(CompressionMethod::from_u16(8), CompressionMethod::Deflate);
        assert_eq!(
            CompressionMethod::from_u16(12),
            CompressionMethod::Unsupported(12)
        );
        assert_eq!(CompressionMethod::Deflate.to_u16(), 8);
    }

    #[test]
    fn unsupported_method_is_rejected() {
        assert!(matches!(
            Decompressor::new(CompressionMethod::Unsupported(12)),
            Err(ZipError::UnsupportedCompressionMethod(12))
        ));
        assert!(matches!(
            Compressor::new(CompressionMethod::Unsupported(99)),
            Err(ZipError::UnsupportedCompressionMethod(99))
        ));
    }

    #[test]
    fn stored_is_identity() {
        let data = b"some bytes that should pass through unchanged";
        let stored = compress_all(CompressionMethod::Stored, data, 7);
        assert_eq!(stored, data);
        let back = decompress_all(CompressionMethod::Stored, &stored, 5).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn deflate_round_trips_across_chunk_boundaries() {
        let data: Vec<u8> = b"the quick brown fox jumps over the lazy dog "
            .iter()
            .cycle()
            .take(50_000)
            .copied()
            .collect();
        let compressed = compress_all(CompressionMethod::Deflate, &data, 613);
        assert!(compressed.len() < data.len());
        for chunk in [1, 17, 4096, compressed.len()] {
            let back = decompress_all(CompressionMethod::Deflate, &compressed, chunk).unwrap();
            assert_eq!(back, data, "decompressing with chunk size {chunk}");
        }
    }

    #[test]
    fn garbage_deflate_stream_is_corrupted_data() {
        let garbage = [0xfe; 64];
        match decompress_all(CompressionMethod::Deflate, &garbage, 64) {
            Err(ZipError::CorruptedData(p)) => assert_eq!(p, path()),
            other => panic!("expected CorruptedData, got {other:?}"),
        }
    }
}
