//! End-to-end scenarios: archives built with this crate's writer,
//! closed, reopened, and read back.

use std::io::Cursor;

use anyhow::Result;
use log::*;

use zipcore::*;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn reopen(bytes: Vec<u8>, mode: AccessMode) -> ZipResult<Archive<Cursor<Vec<u8>>>> {
    Archive::new(Cursor::new(bytes), mode, PathEncoding::Auto)
}

fn read_back(archive: &mut Archive<Cursor<Vec<u8>>>, path: &str) -> Result<Vec<u8>> {
    let entry = archive
        .lookup(path)
        .unwrap_or_else(|| panic!("no entry {path}"))
        .clone();
    let mut content = Vec::new();
    archive.extract_with(&entry, &ExtractOptions::default(), None, |chunk| {
        content.extend_from_slice(chunk);
        Ok(())
    })?;
    Ok(content)
}

#[test]
fn create_add_reopen_extract() -> Result<()> {
    init_logger();

    let mut archive = Archive::new(
        Cursor::new(Vec::new()),
        AccessMode::Create,
        PathEncoding::Auto,
    )?;
    archive.add_buffer("a.txt", b"hello", &AddOptions::stored())?;
    let bytes = archive.finalize()?.into_inner();

    let mut reopened = reopen(bytes, AccessMode::Read)?;
    let entry = reopened.lookup("a.txt").expect("a.txt should be there");
    assert_eq!(entry.crc32(), 0x3610a686); // CRC32("hello")
    assert_eq!(entry.uncompressed_size(), 5);
    assert!(entry.is_file());

    assert_eq!(read_back(&mut reopened, "a.txt")?, b"hello");
    Ok(())
}

#[test]
fn empty_archive_round_trips() -> Result<()> {
    init_logger();

    let archive = Archive::new(
        Cursor::new(Vec::new()),
        AccessMode::Create,
        PathEncoding::Auto,
    )?;
    let bytes = archive.finalize()?.into_inner();
    info!("empty archive is {} bytes", bytes.len());

    let reopened = reopen(bytes, AccessMode::Read)?;
    assert!(reopened.entries().is_empty());
    assert!(reopened.lookup("anything").is_none());
    Ok(())
}

#[test]
fn streamed_add_uses_data_descriptor_and_reads_back() -> Result<()> {
    init_logger();

    let content: Vec<u8> = b"entropy is overrated "
        .iter()
        .cycle()
        .take(100_000)
        .copied()
        .collect();

    let mut archive = Archive::new(
        Cursor::new(Vec::new()),
        AccessMode::Create,
        PathEncoding::Auto,
    )?;
    let entry = archive.add_file(
        "dir/f.txt",
        &mut content.as_slice(),
        &AddOptions::default(),
        None,
    )?;
    assert_eq!(entry.uncompressed_size(), content.len() as u64);
    assert!(entry.compressed_size() < entry.uncompressed_size());
    let bytes = archive.finalize()?.into_inner();

    let mut reopened = reopen(bytes, AccessMode::Read)?;
    assert_eq!(read_back(&mut reopened, "dir/f.txt")?, content);
    Ok(())
}

#[test]
fn corrupted_payload_is_detected() -> Result<()> {
    init_logger();

    // Incompressible content, so the deflate payload is comfortably
    // larger than the byte offset we poke below.
    let mut state = 0x2545f491u32;
    let content: Vec<u8> = std::iter::repeat_with(|| {
        state = state.wrapping_mul(1664525).wrapping_add(1013904223);
        (state >> 24) as u8
    })
    .take(50_000)
    .collect();

    let mut archive = Archive::new(
        Cursor::new(Vec::new()),
        AccessMode::Create,
        PathEncoding::Auto,
    )?;
    archive.add_file(
        "dir/f.txt",
        &mut content.as_slice(),
        &AddOptions::default(),
        None,
    )?;
    let mut bytes = archive.finalize()?.into_inner();

    // Flip one byte of the compressed payload. The local header is
    // 30 bytes plus the 9-byte path, so the payload starts at 39.
    bytes[39 + 1000] ^= 0xff;

    let mut reopened = reopen(bytes, AccessMode::Read)?;
    let entry = reopened.lookup("dir/f.txt").unwrap().clone();
    let result = reopened.extract_with(&entry, &ExtractOptions::default(), None, |_| Ok(()));
    match result {
        Err(ZipError::CorruptedData(_)) | Err(ZipError::ChecksumMismatch { .. }) => {}
        other => panic!("corruption went undetected: {other:?}"),
    }
    Ok(())
}

#[test]
fn add_then_remove_before_close_leaves_no_trace() -> Result<()> {
    init_logger();

    let mut archive = Archive::new(
        Cursor::new(Vec::new()),
        AccessMode::Create,
        PathEncoding::Auto,
    )?;
    archive.add_buffer("keep.txt", b"keep me", &AddOptions::default())?;
    archive.add_buffer("doomed.txt", b"remove me", &AddOptions::default())?;
    archive.remove_entry("doomed.txt")?;
    assert!(archive.lookup("doomed.txt").is_none());
    let bytes = archive.finalize()?.into_inner();

    let mut reopened = reopen(bytes, AccessMode::Read)?;
    assert!(reopened.lookup("doomed.txt").is_none());
    assert_eq!(reopened.entries().len(), 1);
    assert_eq!(read_back(&mut reopened, "keep.txt")?, b"keep me");
    Ok(())
}

#[test]
fn removal_compacts_and_survivors_still_extract() -> Result<()> {
    init_logger();

    let first: Vec<u8> = (0u8..=255).cycle().take(10_000).collect();
    let second = b"short and stored".to_vec();
    let third: Vec<u8> = b"third entry content ".iter().cycle().take(30_000).copied().collect();

    let mut archive = Archive::new(
        Cursor::new(Vec::new()),
        AccessMode::Create,
        PathEncoding::Auto,
    )?;
    archive.add_file("one.bin", &mut first.as_slice(), &AddOptions::default(), None)?;
    archive.add_buffer("two.txt", &second, &AddOptions::stored())?;
    archive.add_file("three.bin", &mut third.as_slice(), &AddOptions::default(), None)?;
    let bytes = archive.finalize()?.into_inner();
    let full_len = bytes.len();

    let mut updating = reopen(bytes, AccessMode::Update)?;
    updating.remove_entry("one.bin")?;
    let bytes = updating.finalize()?.into_inner();
    assert!(
        bytes.len() < full_len,
        "compaction should shrink the archive"
    );

    let mut reopened = reopen(bytes, AccessMode::Read)?;
    assert!(reopened.lookup("one.bin").is_none());
    let paths: Vec<_> = reopened.entries().iter().map(|e| e.path().to_string()).collect();
    assert_eq!(paths, ["two.txt", "three.bin"]);
    assert_eq!(read_back(&mut reopened, "two.txt")?, second);
    assert_eq!(read_back(&mut reopened, "three.bin")?, third);
    Ok(())
}

#[test]
fn update_mode_appends_entries() -> Result<()> {
    init_logger();

    let mut archive = Archive::new(
        Cursor::new(Vec::new()),
        AccessMode::Create,
        PathEncoding::Auto,
    )?;
    archive.add_buffer("first.txt", b"first", &AddOptions::default())?;
    let bytes = archive.finalize()?.into_inner();

    let mut updating = reopen(bytes, AccessMode::Update)?;
    updating.add_buffer("second.txt", b"second", &AddOptions::default())?;
    let bytes = updating.finalize()?.into_inner();

    let mut reopened = reopen(bytes, AccessMode::Read)?;
    assert_eq!(reopened.entries().len(), 2);
    assert_eq!(read_back(&mut reopened, "first.txt")?, b"first");
    assert_eq!(read_back(&mut reopened, "second.txt")?, b"second");
    Ok(())
}

#[test]
fn idempotent_open() -> Result<()> {
    init_logger();

    let mut archive = Archive::new(
        Cursor::new(Vec::new()),
        AccessMode::Create,
        PathEncoding::Auto,
    )?;
    archive.add_buffer("z.txt", b"zzz", &AddOptions::default())?;
    archive.add_directory("a-dir", &AddOptions::default())?;
    archive.add_buffer("a.txt", b"aaa", &AddOptions::default())?;
    let bytes = archive.finalize()?.into_inner();

    let once = reopen(bytes.clone(), AccessMode::Read)?;
    let twice = reopen(bytes, AccessMode::Read)?;
    let paths = |a: &Archive<Cursor<Vec<u8>>>| {
        a.entries()
            .iter()
            .map(|e| e.path().to_string())
            .collect::<Vec<_>>()
    };
    // Catalog order is insertion order, not path order.
    assert_eq!(paths(&once), ["z.txt", "a-dir/", "a.txt"]);
    assert_eq!(paths(&once), paths(&twice));
    Ok(())
}

#[test]
fn lookup_and_first_matching() -> Result<()> {
    init_logger();

    let mut archive = Archive::new(
        Cursor::new(Vec::new()),
        AccessMode::Create,
        PathEncoding::Auto,
    )?;
    archive.add_buffer("docs/readme.md", b"# hi", &AddOptions::default())?;
    archive.add_directory("docs/img", &AddOptions::default())?;

    // Directories can be looked up with or without the trailing slash.
    assert!(archive.lookup("docs/img/").is_some());
    assert!(archive.lookup("docs/img").is_some());
    assert!(archive.contains("docs/readme.md"));
    assert!(!archive.contains("docs/other.md"));

    let dir = archive.first_matching(|e| e.is_dir()).expect("one dir");
    assert_eq!(dir.path(), "docs/img/");
    assert!(archive.first_matching(|e| e.is_symlink()).is_none());
    Ok(())
}

#[test]
fn mutation_errors() -> Result<()> {
    init_logger();

    let mut archive = Archive::new(
        Cursor::new(Vec::new()),
        AccessMode::Create,
        PathEncoding::Auto,
    )?;
    archive.add_buffer("a.txt", b"a", &AddOptions::default())?;

    assert!(matches!(
        archive.add_buffer("a.txt", b"again", &AddOptions::default()),
        Err(ZipError::AlreadyExists(_))
    ));
    assert!(matches!(
        archive.add_buffer("../escape", b"x", &AddOptions::default()),
        Err(ZipError::InvalidPath(_))
    ));
    assert!(matches!(
        archive.add_buffer("/absolute", b"x", &AddOptions::default()),
        Err(ZipError::InvalidPath(_))
    ));
    assert!(matches!(
        archive.remove_entry("missing.txt"),
        Err(ZipError::NotFound(_))
    ));

    // Read-mode archives refuse mutation outright.
    let bytes = archive.finalize()?.into_inner();
    let mut read_only = reopen(bytes, AccessMode::Read)?;
    assert!(matches!(
        read_only.add_buffer("b.txt", b"b", &AddOptions::default()),
        Err(ZipError::InvalidMode(_))
    ));
    assert!(matches!(
        read_only.remove_entry("a.txt"),
        Err(ZipError::InvalidMode(_))
    ));
    Ok(())
}

#[test]
fn archive_comment_survives_rewrites() -> Result<()> {
    init_logger();

    let mut archive = Archive::new(
        Cursor::new(Vec::new()),
        AccessMode::Create,
        PathEncoding::Auto,
    )?;
    archive.add_buffer("a.txt", b"a", &AddOptions::default())?;
    archive.set_comment(b"backup set 7".to_vec())?;
    let bytes = archive.finalize()?.into_inner();

    let mut updating = reopen(bytes, AccessMode::Update)?;
    assert_eq!(updating.comment(), b"backup set 7");
    updating.add_buffer("b.txt", b"b", &AddOptions::default())?;
    let bytes = updating.finalize()?.into_inner();

    let reopened = reopen(bytes, AccessMode::Read)?;
    assert_eq!(reopened.comment(), b"backup set 7");
    Ok(())
}

#[test]
fn skip_crc32_returns_zero() -> Result<()> {
    init_logger();

    let mut archive = Archive::new(
        Cursor::new(Vec::new()),
        AccessMode::Create,
        PathEncoding::Auto,
    )?;
    archive.add_buffer("a.txt", b"hello", &AddOptions::default())?;
    let bytes = archive.finalize()?.into_inner();

    let mut reopened = reopen(bytes, AccessMode::Read)?;
    let entry = reopened.lookup("a.txt").unwrap().clone();
    let options = ExtractOptions {
        skip_crc32: true,
        ..Default::default()
    };
    let mut content = Vec::new();
    let crc = reopened.extract_with(&entry, &options, None, |chunk| {
        content.extend_from_slice(chunk);
        Ok(())
    })?;
    assert_eq!(crc, 0);
    assert_eq!(content, b"hello");
    Ok(())
}

#[test]
fn cancellation_stops_at_a_chunk_boundary() -> Result<()> {
    init_logger();

    let content: Vec<u8> = b"plenty of bytes to go around "
        .iter()
        .cycle()
        .take(200_000)
        .copied()
        .collect();

    let mut archive = Archive::new(
        Cursor::new(Vec::new()),
        AccessMode::Create,
        PathEncoding::Auto,
    )?;
    archive.add_file("big.bin", &mut content.as_slice(), &AddOptions::default(), None)?;
    let bytes = archive.finalize()?.into_inner();

    let mut reopened = reopen(bytes, AccessMode::Read)?;
    let entry = reopened.lookup("big.bin").unwrap().clone();

    let progress = Progress::new();
    let options = ExtractOptions {
        buffer_size: 1024,
        ..Default::default()
    };
    let mut chunks_seen = 0usize;
    let mut bytes_seen = 0u64;
    let result = reopened.extract_with(&entry, &options, Some(&progress), |chunk| {
        chunks_seen += 1;
        bytes_seen += chunk.len() as u64;
        if chunks_seen == 3 {
            progress.cancel();
        }
        Ok(())
    });
    assert!(matches!(result, Err(ZipError::Cancelled)));
    assert_eq!(chunks_seen, 3, "no chunks after the flag was observed");
    assert_eq!(progress.completed_units(), bytes_seen);
    assert!(bytes_seen < entry.uncompressed_size());
    assert_eq!(progress.total_units(), entry.uncompressed_size());
    Ok(())
}

#[test]
fn cancelled_add_rolls_back_cleanly() -> Result<()> {
    init_logger();

    let mut archive = Archive::new(
        Cursor::new(Vec::new()),
        AccessMode::Create,
        PathEncoding::Auto,
    )?;
    archive.add_buffer("before.txt", b"already here", &AddOptions::default())?;

    let progress = Progress::new();
    progress.cancel();
    let content = vec![0u8; 100_000];
    let result = archive.add_file(
        "never.bin",
        &mut content.as_slice(),
        &AddOptions::default(),
        Some(&progress),
    );
    assert!(matches!(result, Err(ZipError::Cancelled)));
    assert!(archive.lookup("never.bin").is_none());

    // The aborted add left nothing behind; the archive still commits
    // and reopens cleanly.
    archive.add_buffer("after.txt", b"still works", &AddOptions::default())?;
    let bytes = archive.finalize()?.into_inner();
    let mut reopened = reopen(bytes, AccessMode::Read)?;
    assert_eq!(reopened.entries().len(), 2);
    assert_eq!(read_back(&mut reopened, "before.txt")?, b"already here");
    assert_eq!(read_back(&mut reopened, "after.txt")?, b"still works");
    Ok(())
}

#[test]
fn progress_reports_all_units_on_success() -> Result<()> {
    init_logger();

    let content = vec![7u8; 40_000];
    let mut archive = Archive::new(
        Cursor::new(Vec::new()),
        AccessMode::Create,
        PathEncoding::Auto,
    )?;
    archive.add_buffer("data.bin", &content, &AddOptions::default())?;
    let bytes = archive.finalize()?.into_inner();

    let mut reopened = reopen(bytes, AccessMode::Read)?;
    let entry = reopened.lookup("data.bin").unwrap().clone();
    let progress = Progress::new();
    reopened.extract_with(&entry, &ExtractOptions::default(), Some(&progress), |_| Ok(()))?;
    assert_eq!(progress.total_units(), content.len() as u64);
    assert_eq!(progress.completed_units(), content.len() as u64);
    Ok(())
}

#[test]
fn entry_reader_is_a_plain_reader() -> Result<()> {
    init_logger();

    let mut archive = Archive::new(
        Cursor::new(Vec::new()),
        AccessMode::Create,
        PathEncoding::Auto,
    )?;
    archive.add_buffer("a.txt", b"hello, reader", &AddOptions::default())?;
    let bytes = archive.finalize()?.into_inner();

    let mut reopened = reopen(bytes, AccessMode::Read)?;
    let entry = reopened.lookup("a.txt").unwrap().clone();
    let mut reader = reopened.read_entry(&entry)?;
    let mut content = String::new();
    std::io::Read::read_to_string(&mut reader, &mut content)?;
    assert_eq!(content, "hello, reader");

    // The verified flavor checks the recorded CRC32 at EOF.
    let mut reader = reopened.read_entry_verified(&entry)?;
    let mut content = String::new();
    std::io::Read::read_to_string(&mut reader, &mut content)?;
    assert_eq!(content, "hello, reader");
    Ok(())
}
