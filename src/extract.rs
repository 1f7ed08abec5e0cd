//! The extraction safety layer: deciding where an entry may land on a
//! real filesystem, and materializing it there.
//!
//! Everything here is lexical — no path is resolved through the
//! filesystem, so a hostile archive can't use the destination's own
//! symlinks against us during the check.

use std::fs;
use std::path::{Component, Path, PathBuf};

use camino::Utf8Path;
use filetime::FileTime;

use crate::entry::Entry;
use crate::result::*;

/// Joins `entry_path` beneath `base`, refusing anything that could
/// land outside it.
///
/// Traversal attempts (`..` segments, absolute paths) fail with
/// [`ZipError::PathTraversal`]; structurally broken paths (empty
/// segments, backslashes) fail with [`ZipError::InvalidPath`].
///
/// [`ZipError::PathTraversal`]: ../result/enum.ZipError.html#variant.PathTraversal
/// [`ZipError::InvalidPath`]: ../result/enum.ZipError.html#variant.InvalidPath
pub fn resolve_destination(base: &Path, entry_path: &Utf8Path) -> ZipResult<PathBuf> {
    let raw = entry_path.as_str();
    if raw.starts_with('/') {
        return Err(ZipError::PathTraversal(raw.to_string()));
    }
    let trimmed = raw.strip_suffix('/').unwrap_or(raw);
    if trimmed.is_empty() {
        return Err(ZipError::InvalidPath(format!("{raw}: path has no segments")));
    }

    let mut destination = base.to_path_buf();
    for segment in trimmed.split('/') {
        match segment {
            ".." => return Err(ZipError::PathTraversal(raw.to_string())),
            "" | "." => {
                return Err(ZipError::InvalidPath(format!(
                    "{raw}: path has an empty or . segment"
                )))
            }
            s if s.contains('\\') => {
                return Err(ZipError::InvalidPath(format!(
                    "{raw}: path contains a backslash"
                )))
            }
            s => destination.push(s),
        }
    }
    Ok(destination)
}

/// Creates a directory entry's destination, idempotently.
pub(crate) fn create_directory(destination: &Path) -> ZipResult<()> {
    match fs::metadata(destination) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(ZipError::TypeConflict(destination.display().to_string())),
        Err(_) => Ok(fs::create_dir_all(destination)?),
    }
}

/// Creates a symlink entry's destination.
///
/// Unless `allow_uncontained` is set, the link target is resolved
/// (lexically) relative to the link's location and rejected when it
/// would escape `base`.
pub(crate) fn materialize_symlink(
    base: &Path,
    destination: &Path,
    target: &str,
    allow_uncontained: bool,
) -> ZipResult<()> {
    if !allow_uncontained && !symlink_is_contained(base, destination, target) {
        return Err(ZipError::PathTraversal(target.to_string()));
    }
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)?;
    }
    if fs::symlink_metadata(destination).is_ok() {
        return Err(ZipError::TypeConflict(destination.display().to_string()));
    }
    create_symlink(target, destination)
}

#[cfg(unix)]
fn create_symlink(target: &str, destination: &Path) -> ZipResult<()> {
    Ok(std::os::unix::fs::symlink(target, destination)?)
}

#[cfg(not(unix))]
fn create_symlink(_target: &str, destination: &Path) -> ZipResult<()> {
    Err(ZipError::UnsupportedArchive(format!(
        "Can't create symlink {} on this platform",
        destination.display()
    )))
}

/// Applies an entry's recorded modification time and permissions to its
/// materialized destination. The timestamp goes first: permission bits
/// that remove write access must land last.
pub(crate) fn apply_attributes(destination: &Path, entry: &Entry) -> ZipResult<()> {
    let mtime = FileTime::from_unix_time(entry.modified().and_utc().timestamp(), 0);
    filetime::set_file_mtime(destination, mtime)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(destination, fs::Permissions::from_mode(entry.permissions()))?;
    }
    Ok(())
}

/// Like [`apply_attributes`], but touching the link itself rather than
/// what it points at. Link permissions aren't settable portably, so only
/// the timestamp is applied.
pub(crate) fn apply_symlink_attributes(destination: &Path, entry: &Entry) -> ZipResult<()> {
    let mtime = FileTime::from_unix_time(entry.modified().and_utc().timestamp(), 0);
    filetime::set_symlink_file_times(destination, mtime, mtime)?;
    Ok(())
}

/// True if `target`, resolved relative to the link at `link_location`,
/// stays under `base`.
fn symlink_is_contained(base: &Path, link_location: &Path, target: &str) -> bool {
    let Some(base) = normalize_lexically(base) else {
        return false;
    };
    let target_path = Path::new(target);
    let resolved = if target_path.is_absolute() {
        normalize_lexically(target_path)
    } else {
        link_location
            .parent()
            .map(|parent| parent.join(target_path))
            .and_then(|joined| normalize_lexically(&joined))
    };
    match resolved {
        Some(resolved) => resolved.starts_with(&base),
        // `..` walked off the front of the path; that's an escape.
        None => false,
    }
}

/// Folds `.` and `..` components without touching the filesystem.
/// Returns `None` when `..` would climb past the path's start.
fn normalize_lexically(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(prefix) => out.push(prefix.as_os_str()),
            Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
            Component::Normal(segment) => out.push(segment),
        }
    }
    Some(out)
}
