//! Staging directories for extraction.
//!
//! Each archive extracts into `<temp_root>/<stem>-<hash>`, where `hash` is
//! the xxHash64 of the archive's full logical path. Two archives that share
//! a file name but live in different places never share a staging directory.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use xxhash_rust::xxh64::xxh64;

use crate::paths;

/// Staging directory for an archive identified by `key`.
pub fn staging_dir(temp_root: &Path, key: &str) -> PathBuf {
    let stem = paths::file_stem(key);
    let stem = if stem.is_empty() { "archive" } else { stem };
    temp_root.join(format!("{}-{:016x}", stem, xxh64(key.as_bytes(), 0)))
}

/// Remove a staging directory and everything left in it.
///
/// Returns the number of files that were still present.
pub fn remove_staging(dir: &Path) -> usize {
    if !dir.exists() {
        return 0;
    }

    let leftover = walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .count();

    match fs::remove_dir_all(dir) {
        Ok(()) => debug!("Removed staging dir {} ({} leftover files)", dir.display(), leftover),
        Err(e) => warn!("Failed to remove staging dir {}: {}", dir.display(), e),
    }
    leftover
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_same_name_different_location() {
        let root = Path::new("/tmp/stage");
        let a = staging_dir(root, "/downloads/a/Product.zip");
        let b = staging_dir(root, "/downloads/b/Product.zip");
        assert_ne!(a, b);
        assert!(a.file_name().unwrap().to_string_lossy().starts_with("Product-"));
    }

    #[test]
    fn test_staging_dir_is_stable() {
        let root = Path::new("/tmp/stage");
        assert_eq!(
            staging_dir(root, "/downloads/Product.zip"),
            staging_dir(root, "/downloads/Product.zip")
        );
    }

    #[test]
    fn test_remove_staging_counts_leftovers() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let stage = dir.path().join("stage");
        fs::create_dir_all(stage.join("sub"))?;
        fs::write(stage.join("a.txt"), b"a")?;
        fs::write(stage.join("sub/b.txt"), b"b")?;

        assert_eq!(remove_staging(&stage), 2);
        assert!(!stage.exists());
        assert_eq!(remove_staging(&stage), 0);
        Ok(())
    }
}
