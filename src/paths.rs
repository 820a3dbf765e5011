//! Path helpers for archive-relative paths
//!
//! 7-Zip lists entries with the separator of the platform the archive was
//! built on, and DAZ products are usually packed on Windows. This module
//! handles:
//! - Converting `\` to `/` before joining onto native paths
//! - File name / extension lookups that accept either separator
//! - Creating parent directories before files are moved into place

use std::path::{Path, PathBuf};

/// Convert Windows path separators to `/`
/// `Content\People\Genesis 8.duf` -> `Content/People/Genesis 8.duf`
pub fn to_forward_slashes(path: &str) -> String {
    path.replace('\\', "/")
}

/// Join a base directory with an archive-relative path.
///
/// Leading separators are dropped so an absolute-looking entry can't escape
/// `base`, and `..` components are discarded.
pub fn join_relative(base: &Path, relative: &str) -> PathBuf {
    let mut joined = base.to_path_buf();
    for component in relative.split(['\\', '/']) {
        match component {
            "" | "." | ".." => continue,
            part => joined.push(part),
        }
    }
    joined
}

/// Get the filename from a path (handles both / and \)
pub fn file_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches(['\\', '/']);
    trimmed
        .rfind(['\\', '/'])
        .map(|idx| &trimmed[idx + 1..])
        .unwrap_or(trimmed)
}

/// Get the file extension without the dot, case preserved
pub fn extension(path: &str) -> Option<&str> {
    let name = file_name(path);
    match name.rfind('.') {
        Some(0) | None => None,
        Some(idx) => Some(&name[idx + 1..]),
    }
}

/// File name without its final extension
pub fn file_stem(path: &str) -> &str {
    let name = file_name(path);
    match name.rfind('.') {
        Some(0) | None => name,
        Some(idx) => &name[..idx],
    }
}

/// Create parent directories for a path if they don't exist
pub fn ensure_parent_dirs(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
