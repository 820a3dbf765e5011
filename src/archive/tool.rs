//! Locating the 7-Zip binary.
//!
//! Search order:
//! 1. An explicit path from the configuration
//! 2. `7zz` / `7za` / `7z` next to the executable, then in its `bin/`
//! 3. `bin/7zz` relative to the current directory
//! 4. System PATH (`7zz`, `7za`, `7z`), via the `which` crate

use anyhow::{bail, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

#[cfg(windows)]
const CANDIDATE_NAMES: &[&str] = &["7z.exe", "7za.exe", "7zz.exe"];
#[cfg(not(windows))]
const CANDIDATE_NAMES: &[&str] = &["7zz", "7za", "7z"];

/// Get the path to the 7-Zip binary.
pub fn find_seven_zip(configured: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = configured {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        bail!("Configured 7-Zip binary does not exist: {}", path.display());
    }

    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            for dir in [exe_dir.to_path_buf(), exe_dir.join("bin")] {
                if let Some(found) = first_existing(&dir) {
                    debug!("Using 7-Zip next to executable: {}", found.display());
                    return Ok(found);
                }
            }
        }
    }

    if let Some(found) = first_existing(Path::new("bin")) {
        return Ok(found);
    }

    for name in CANDIDATE_NAMES {
        if let Ok(path) = which::which(name) {
            debug!("Using 7-Zip from PATH: {}", path.display());
            return Ok(path);
        }
    }

    bail!("7-Zip binary not found. Install p7zip/7-Zip or place 7zz next to the executable.")
}

fn first_existing(dir: &Path) -> Option<PathBuf> {
    CANDIDATE_NAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
}
