//! Installation orchestrator
//!
//! Installs one top-level archive into a content library:
//! 1. Inspect  - list the archive into its entity tree
//! 2. Extract  - extract to staging, validate, move files to the library
//! 3. Read     - parse `asset_info` from installed user files
//! 4. Recurse  - repeat for every nested archive that landed in staging
//! 5. Cleanup  - remove staging directories
//!
//! Sibling nested archives are processed in parallel; each has its own
//! handle, staging directory and 7-Zip process.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use rayon::prelude::*;
use tracing::{info, warn};

use crate::archive::{staging, ArchiveContext, ArchiveHandle, DirectoryTargets};

fn log_phase_metrics(phase: &str, archive: &str, started: Instant) {
    info!(
        "Phase done: phase='{}' archive='{}' elapsed_ms={}",
        phase,
        archive,
        started.elapsed().as_millis()
    );
}

/// Installation statistics
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InstallStats {
    /// Archives processed, the top-level one included
    pub archives: usize,
    /// Nested archives processed
    pub nested: usize,
    /// Nested archives beyond the depth limit
    pub nested_skipped: usize,
    /// Nested archives that never showed up in staging
    pub nested_missing: usize,
    pub files_listed: usize,
    pub files_installed: usize,
    pub files_failed: usize,
    pub folders: usize,
    /// Archives that stopped on encrypted content
    pub encrypted: usize,
    /// Archives for which 7-Zip reported errors
    pub errored: usize,
    /// Archives whose list or extract never completed
    pub incomplete: usize,
    /// User files whose `asset_info` was read
    pub assets_read: usize,
    /// Files still in staging when it was removed
    pub staging_leftovers: usize,
    /// Uncompressed size listed by 7-Zip
    pub total_size: u64,
}

impl InstallStats {
    fn merge(&mut self, other: &InstallStats) {
        self.archives += other.archives;
        self.nested += other.nested;
        self.nested_skipped += other.nested_skipped;
        self.nested_missing += other.nested_missing;
        self.files_listed += other.files_listed;
        self.files_installed += other.files_installed;
        self.files_failed += other.files_failed;
        self.folders += other.folders;
        self.encrypted += other.encrypted;
        self.errored += other.errored;
        self.incomplete += other.incomplete;
        self.assets_read += other.assets_read;
        self.staging_leftovers += other.staging_leftovers;
        self.total_size = self.total_size.saturating_add(other.total_size);
    }

    /// Nothing went wrong anywhere in the archive tree.
    pub fn is_clean(&self) -> bool {
        self.files_failed == 0
            && self.encrypted == 0
            && self.errored == 0
            && self.incomplete == 0
            && self.nested_missing == 0
    }
}

/// List an archive without extracting it.
pub fn inspect(ctx: &Arc<ArchiveContext>, archive: &Path, password: Option<&str>) -> Result<ArchiveHandle> {
    if !archive.is_file() {
        bail!("Archive does not exist: {}", archive.display());
    }
    let mut handle = ArchiveHandle::open(Arc::clone(ctx), archive);
    if let Some(password) = password {
        handle.set_password(password);
    }
    handle.inspect();
    Ok(handle)
}

/// Main installer orchestrator
pub struct Installer {
    ctx: Arc<ArchiveContext>,
    destination: PathBuf,
}

impl Installer {
    /// Create an installer that mirrors archive contents under `destination`.
    pub fn new(ctx: ArchiveContext, destination: impl Into<PathBuf>) -> Result<Self> {
        let destination = destination.into();
        fs::create_dir_all(&destination)
            .with_context(|| format!("Failed to create destination: {}", destination.display()))?;
        fs::create_dir_all(&ctx.config().temp_root).with_context(|| {
            format!("Failed to create temp directory: {}", ctx.config().temp_root.display())
        })?;

        let ctx = ctx.with_targets(Arc::new(DirectoryTargets::new(&destination)));
        Ok(Self {
            ctx: Arc::new(ctx),
            destination,
        })
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn context(&self) -> &Arc<ArchiveContext> {
        &self.ctx
    }

    /// Install `archive` and everything nested inside it.
    pub fn install(&self, archive: &Path, password: Option<&str>) -> Result<InstallStats> {
        if !archive.is_file() {
            bail!("Archive does not exist: {}", archive.display());
        }
        info!("Installing {} into {}", archive.display(), self.destination.display());

        let mut handle = ArchiveHandle::open(Arc::clone(&self.ctx), archive);
        if let Some(password) = password {
            handle.set_password(password);
        }
        let stats = self.process(&mut handle, 0);
        handle.release();

        info!(
            "Installed {}: {}/{} files, {} archives ({} nested), {} failed",
            handle.display_name(),
            stats.files_installed,
            stats.files_listed,
            stats.archives,
            stats.nested,
            stats.files_failed
        );
        Ok(stats)
    }

    fn process(&self, handle: &mut ArchiveHandle, depth: usize) -> InstallStats {
        let mut stats = InstallStats {
            archives: 1,
            ..Default::default()
        };
        let name = handle.display_name().to_string();

        let started = Instant::now();
        handle.inspect();
        log_phase_metrics("Inspect", &name, started);

        if handle.inspect_errored() {
            stats.errored += 1;
        }
        if handle.is_encrypted() || handle.is_header_encrypted() {
            stats.encrypted += 1;
            self.cleanup(handle, &mut stats);
            return stats;
        }
        if !handle.inspect_finished() {
            warn!("Listing of {} did not complete; skipping extraction", name);
            stats.incomplete += 1;
            self.cleanup(handle, &mut stats);
            return stats;
        }

        stats.total_size = handle.total_size();
        stats.files_listed = handle.tree().files().count();
        stats.folders = handle.tree().folders().count();

        let started = Instant::now();
        handle.extract();
        log_phase_metrics("Extract", &name, started);

        if handle.is_encrypted() {
            stats.encrypted += 1;
        } else if !handle.extract_finished() {
            stats.incomplete += 1;
        }
        if handle.extract_errored() {
            stats.errored += 1;
        }
        for file in handle.tree().files() {
            if file.is_relocated() {
                stats.files_installed += 1;
            } else {
                stats.files_failed += 1;
            }
        }

        stats.assets_read = handle.read_content_files();

        self.process_nested(handle, depth, &mut stats);
        self.cleanup(handle, &mut stats);
        stats
    }

    fn process_nested(&self, handle: &mut ArchiveHandle, depth: usize, stats: &mut InstallStats) {
        let max_depth = self.ctx.config().max_nesting_depth;
        let name = handle.display_name().to_string();
        let mut available = Vec::new();
        for nested in handle.tree_mut().archives_mut() {
            if nested.is_available() {
                available.push(nested);
            } else {
                stats.nested_missing += 1;
            }
        }
        if available.is_empty() {
            return;
        }

        if depth >= max_depth {
            warn!(
                "Not descending into {} nested archives of {}: depth limit {} reached",
                available.len(),
                name,
                max_depth
            );
            stats.nested_skipped += available.len();
            return;
        }

        let results: Vec<InstallStats> = available
            .into_par_iter()
            .map(|nested| {
                let mut nested_stats = self.process(nested, depth + 1);
                nested.release();
                nested_stats.nested += 1;
                nested_stats
            })
            .collect();
        for result in &results {
            stats.merge(result);
        }
    }

    fn cleanup(&self, handle: &ArchiveHandle, stats: &mut InstallStats) {
        if self.ctx.config().cleanup_staging {
            stats.staging_leftovers += staging::remove_staging(handle.staging_dir());
        }
    }
}
