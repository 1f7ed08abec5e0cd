//! Materializing entries onto a real filesystem: destination
//! resolution, type handling, attributes, and symlink containment.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveDate;

use zipcore::*;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn build_archive(path: &Path) -> Result<()> {
    let mut archive = Archive::open_path(path, AccessMode::Create)?;
    let modified = NaiveDate::from_ymd_opt(2024, 5, 6)
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap();
    let options = AddOptions {
        modified: Some(modified),
        ..Default::default()
    };
    archive.add_directory("hello", &options)?;
    archive.add_buffer("hello/hi.txt", b"hi there\n", &options)?;
    archive.add_buffer(
        "hello/nested/deep.txt",
        b"parents get created on demand\n",
        &options,
    )?;
    let executable = AddOptions {
        permissions: Some(0o755),
        modified: Some(modified),
        ..Default::default()
    };
    archive.add_buffer("hello/run.sh", b"#!/bin/sh\necho hi\n", &executable)?;
    archive.finalize()?;
    Ok(())
}

fn extract_all(zip_path: &Path, out: &Path) -> ZipResult<()> {
    let mut archive = Archive::open_path(zip_path, AccessMode::Read)?;
    let entries: Vec<Entry> = archive.entries().to_vec();
    for entry in &entries {
        archive.extract(entry, out, &ExtractOptions::default(), None)?;
    }
    Ok(())
}

#[test]
fn extracts_a_tree_with_attributes() -> Result<()> {
    init_logger();
    let scratch = tempfile::tempdir()?;
    let zip_path = scratch.path().join("tree.zip");
    build_archive(&zip_path)?;

    let out = scratch.path().join("out");
    extract_all(&zip_path, &out)?;

    assert!(out.join("hello").is_dir());
    assert_eq!(fs::read(out.join("hello/hi.txt"))?, b"hi there\n");
    assert_eq!(
        fs::read(out.join("hello/nested/deep.txt"))?,
        b"parents get created on demand\n"
    );

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = fs::metadata(out.join("hello/run.sh"))?.permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
        let mode = fs::metadata(out.join("hello/hi.txt"))?.permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
    }

    // The recorded modification time was applied (UTC noon, May 6 2024,
    // give or take DOS 2-second precision).
    let mtime = filetime_of(&out.join("hello/hi.txt"))?;
    let expected = NaiveDate::from_ymd_opt(2024, 5, 6)
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap()
        .and_utc()
        .timestamp();
    assert!((mtime - expected).abs() <= 2, "mtime {mtime} vs {expected}");
    Ok(())
}

fn filetime_of(path: &Path) -> Result<i64> {
    let meta = fs::metadata(path).context("stat failed")?;
    let modified = meta.modified()?;
    Ok(modified
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default())
}

#[test]
fn directory_extraction_is_idempotent_but_type_checked() -> Result<()> {
    init_logger();
    let scratch = tempfile::tempdir()?;
    let zip_path = scratch.path().join("tree.zip");
    build_archive(&zip_path)?;

    let out = scratch.path().join("out");
    extract_all(&zip_path, &out)?;
    // Extracting again over the same tree works: directories already
    // exist and files are rewritten.
    extract_all(&zip_path, &out)?;

    // A file squatting where a directory should go is a conflict.
    let out2 = scratch.path().join("out2");
    fs::create_dir_all(&out2)?;
    fs::write(out2.join("hello"), b"not a directory")?;
    match extract_all(&zip_path, &out2) {
        Err(ZipError::TypeConflict(_)) => {}
        other => panic!("expected TypeConflict, got {other:?}"),
    }
    Ok(())
}

#[cfg(unix)]
#[test]
fn symlinks_round_trip_and_stay_contained() -> Result<()> {
    init_logger();
    let scratch = tempfile::tempdir()?;
    let zip_path = scratch.path().join("links.zip");

    let mut archive = Archive::open_path(&zip_path, AccessMode::Create)?;
    archive.add_buffer("data/real.txt", b"the real thing", &AddOptions::default())?;
    archive.add_symlink("data/alias", "real.txt", &AddOptions::default())?;
    archive.finalize()?;

    let mut archive = Archive::open_path(&zip_path, AccessMode::Read)?;
    let link = archive.lookup("data/alias").unwrap().clone();
    assert!(link.is_symlink());

    let out = scratch.path().join("out");
    let entries: Vec<Entry> = archive.entries().to_vec();
    for entry in &entries {
        archive.extract(entry, &out, &ExtractOptions::default(), None)?;
    }

    let materialized = out.join("data/alias");
    assert!(fs::symlink_metadata(&materialized)?.file_type().is_symlink());
    assert_eq!(fs::read_link(&materialized)?, Path::new("real.txt"));
    // Following the link lands on the extracted file.
    assert_eq!(fs::read(&materialized)?, b"the real thing");
    Ok(())
}

#[cfg(unix)]
#[test]
fn escaping_symlink_is_rejected_unless_allowed() -> Result<()> {
    init_logger();
    let scratch = tempfile::tempdir()?;
    let zip_path = scratch.path().join("evil.zip");

    let mut archive = Archive::open_path(&zip_path, AccessMode::Create)?;
    archive.add_symlink("escape", "../../../etc/passwd", &AddOptions::default())?;
    archive.finalize()?;

    let mut archive = Archive::open_path(&zip_path, AccessMode::Read)?;
    let entry = archive.lookup("escape").unwrap().clone();

    let out = scratch.path().join("out");
    match archive.extract(&entry, &out, &ExtractOptions::default(), None) {
        Err(ZipError::PathTraversal(_)) => {}
        other => panic!("expected PathTraversal, got {other:?}"),
    }
    assert!(fs::symlink_metadata(out.join("escape")).is_err());

    // The escape hatch is explicit.
    let options = ExtractOptions {
        allow_uncontained_symlinks: true,
        ..Default::default()
    };
    archive.extract(&entry, &out, &options, None)?;
    assert!(fs::symlink_metadata(out.join("escape"))?.file_type().is_symlink());
    Ok(())
}

#[test]
fn hostile_entry_paths_never_leave_the_destination() {
    init_logger();
    let base = Path::new("/tmp/wherever");
    assert!(matches!(
        resolve_destination(base, camino::Utf8Path::new("../../etc/passwd")),
        Err(ZipError::PathTraversal(_))
    ));
    let fine = resolve_destination(base, camino::Utf8Path::new("a/b/c")).unwrap();
    assert!(fine.starts_with(base));
}

#[test]
fn concurrent_readers_over_one_file() -> Result<()> {
    init_logger();
    use rayon::prelude::*;

    let scratch = tempfile::tempdir()?;
    let zip_path = scratch.path().join("parallel.zip");

    let mut archive = Archive::open_path(&zip_path, AccessMode::Create)?;
    let mut expected = Vec::new();
    for i in 0..8 {
        let content: Vec<u8> = format!("entry number {i} ")
            .bytes()
            .cycle()
            .take(20_000 + i * 1000)
            .collect();
        archive.add_file(
            &format!("data/{i}.bin"),
            &mut content.as_slice(),
            &AddOptions::default(),
            None,
        )?;
        expected.push(content);
    }
    archive.finalize()?;

    // Independent read-mode archives over the same file are safe to
    // drive from as many threads as we like.
    (0..8usize)
        .into_par_iter()
        .try_for_each(|i| -> Result<()> {
            let mut archive = Archive::open_path(&zip_path, AccessMode::Read)?;
            let entry = archive.lookup(format!("data/{i}.bin")).unwrap().clone();
            let mut content = Vec::new();
            archive.extract_with(&entry, &ExtractOptions::default(), None, |chunk| {
                content.extend_from_slice(chunk);
                Ok(())
            })?;
            assert_eq!(content, expected[i]);
            Ok(())
        })?;
    Ok(())
}
