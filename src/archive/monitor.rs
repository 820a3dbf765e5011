//! Watching `7z x` output and moving files out of staging.
//!
//! Extraction output is only interesting for its last word: either
//! `Everything is Ok` or a summary containing `Errors`. Whichever arrives
//! first ends the operation. After that every expected file is checked on
//! disk, because 7-Zip can report success while silently skipping entries
//! when the destination runs out of space, and the files that made it are
//! moved to their targets.

use std::fs;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use crate::config::ValidationPolicy;
use crate::paths;

use super::context::{ArchiveContext, ProgressEvent};
use super::driver::{Flow, LineHandler};
use super::flags::{ArchiveFlags, Flag};
use super::handle::ArchiveIdentity;
use super::listing::ENCRYPTED_ARCHIVE;
use super::tree::{file_exists, ContentFile, EntityTree};

const SUCCESS_PHRASE: &str = "Everything is Ok";
const WRONG_PASSWORD: &str = "Wrong password";

/// Terminal outcome of an extraction run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractSignal {
    /// 7-Zip printed its summary; `errored` if it mentioned errors
    Completed { errored: bool },
    /// Encrypted content; nothing is relocated
    Encrypted,
    /// Stdout closed without a summary
    Ended,
}

/// Counts from one relocation pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RelocationStats {
    pub moved: usize,
    pub failed: usize,
    /// Extracted, but no target was assigned
    pub left_staged: usize,
    /// Not extracted at all
    pub missing: usize,
}

pub struct ExtractionMonitor {
    tree: EntityTree,
    policy: ValidationPolicy,
    done: bool,
}

impl ExtractionMonitor {
    pub fn new(tree: EntityTree, policy: ValidationPolicy) -> Self {
        Self {
            tree,
            policy,
            done: false,
        }
    }

    /// Feed one stdout line; `None` means stdout closed.
    pub fn feed(&mut self, line: Option<&str>) -> Option<ExtractSignal> {
        if self.done {
            return None;
        }
        let Some(line) = line else {
            self.done = true;
            return Some(ExtractSignal::Ended);
        };
        if is_encryption_message(line) {
            self.done = true;
            return Some(ExtractSignal::Encrypted);
        }

        let ok = line.starts_with(SUCCESS_PHRASE);
        let errors = line.contains("Errors");
        if !ok && !errors {
            return None;
        }
        self.done = true;
        Some(ExtractSignal::Completed { errored: errors })
    }

    /// Feed one stderr line. Only encryption matters here.
    pub fn feed_error(&mut self, line: &str) -> Option<ExtractSignal> {
        if self.done || !is_encryption_message(line) {
            return None;
        }
        self.done = true;
        Some(ExtractSignal::Encrypted)
    }

    /// Check every file at the location recorded for it and set its
    /// `extracted` flag. Returns how many files passed.
    pub fn validate(&mut self) -> usize {
        let policy = self.policy;
        let mut passed = 0;
        for file in self.tree.files_mut() {
            file.extracted = match file.extracted_path {
                Some(ref path) => check_file(path, file.size, policy),
                None => false,
            };
            if file.extracted {
                passed += 1;
            } else {
                debug!("Not extracted: {}", file.path);
            }
        }
        passed
    }

    /// Move every extracted file to its target. Failures are logged and the
    /// batch continues.
    pub fn relocate(&mut self) -> RelocationStats {
        let mut stats = RelocationStats::default();
        for file in self.tree.files_mut() {
            if !file.extracted {
                stats.missing += 1;
                continue;
            }
            match relocate_file(file) {
                Ok(true) => stats.moved += 1,
                Ok(false) => stats.left_staged += 1,
                Err(e) => {
                    stats.failed += 1;
                    warn!(
                        "Failed to move {} to {}. REASON: {}",
                        file.path,
                        file.target_path
                            .as_deref()
                            .map(|p| p.display().to_string())
                            .unwrap_or_default(),
                        e
                    );
                }
            }
        }
        stats
    }

    pub fn tree(&self) -> &EntityTree {
        &self.tree
    }

    pub fn take_tree(&mut self) -> EntityTree {
        std::mem::take(&mut self.tree)
    }
}

fn is_encryption_message(line: &str) -> bool {
    line.contains(WRONG_PASSWORD) || line.contains(ENCRYPTED_ARCHIVE)
}

fn check_file(path: &Path, listed_size: u64, policy: ValidationPolicy) -> bool {
    match policy {
        ValidationPolicy::Exists => file_exists(path),
        ValidationPolicy::SizeMatches => match fs::metadata(path) {
            Ok(meta) if meta.is_file() => listed_size == 0 || meta.len() == listed_size,
            _ => false,
        },
    }
}

/// Move one file to its target, replacing whatever is there.
///
/// Returns `Ok(false)` when the file has no target and stays staged. The
/// recorded location only changes once the move succeeded.
fn relocate_file(file: &mut ContentFile) -> io::Result<bool> {
    let (Some(from), Some(to)) = (file.extracted_path.clone(), file.target_path.clone()) else {
        return Ok(false);
    };
    if from == to {
        return Ok(true);
    }

    paths::ensure_parent_dirs(&to)?;
    if to.is_file() {
        fs::remove_file(&to)?;
    }
    if let Err(rename_err) = fs::rename(&from, &to) {
        // Staging and target may be on different filesystems
        debug!("Rename failed ({}), copying {} instead", rename_err, from.display());
        fs::copy(&from, &to)?;
        if let Err(e) = fs::remove_file(&from) {
            debug!("Could not remove staged copy {}: {}", from.display(), e);
        }
    }

    file.extracted_path = Some(to);
    Ok(true)
}

/// Drives an [`ExtractionMonitor`] from the driver's delivery thread.
pub(crate) struct ExtractionHandler {
    pub monitor: Arc<Mutex<ExtractionMonitor>>,
    pub flags: Arc<ArchiveFlags>,
    pub ctx: Arc<ArchiveContext>,
    pub identity: Arc<ArchiveIdentity>,
}

impl ExtractionHandler {
    fn apply(&self, monitor: &mut ExtractionMonitor, signal: Option<ExtractSignal>) -> Flow {
        let name = self.identity.display_name();
        match signal {
            None => Flow::Continue,
            Some(ExtractSignal::Encrypted) => {
                warn!("{} is encrypted; nothing will be moved", name);
                self.flags.raise(Flag::Encrypted);
                self.ctx.notify_encrypted(&self.identity, &self.flags);
                self.flags.raise(Flag::ExtractFinished);
                Flow::Detach
            }
            Some(ExtractSignal::Ended) => {
                warn!("7-Zip exited before reporting a result for {}", name);
                self.flags.raise(Flag::ExtractErrored);
                self.flags.raise(Flag::ExtractFinished);
                Flow::Continue
            }
            Some(ExtractSignal::Completed { errored }) => {
                if errored {
                    warn!("7-Zip reported errors while extracting {}", name);
                    self.flags.raise(Flag::ExtractErrored);
                }
                let passed = monitor.validate();
                self.ctx.status(format!("Moving files from archive {}...", name));
                let stats = monitor.relocate();
                info!(
                    "Extracted {}: {} validated, {} moved, {} failed, {} missing, {} left staged",
                    name, passed, stats.moved, stats.failed, stats.missing, stats.left_staged
                );
                self.ctx.report(ProgressEvent::Style { busy: false });
                self.flags.raise(Flag::ExtractFinished);
                Flow::Continue
            }
        }
    }
}

impl LineHandler for ExtractionHandler {
    fn on_output(&mut self, line: Option<&str>) -> Flow {
        debug!("7z output: {:?}", line);
        let monitor = Arc::clone(&self.monitor);
        let mut monitor = monitor.lock().unwrap_or_else(|e| e.into_inner());
        let signal = monitor.feed(line);
        self.apply(&mut monitor, signal)
    }

    fn on_error(&mut self, line: &str) -> Flow {
        debug!("7z error output for {}: {}", self.identity.display_name(), line);
        let monitor = Arc::clone(&self.monitor);
        let mut monitor = monitor.lock().unwrap_or_else(|e| e.into_inner());
        let signal = monitor.feed_error(line);
        self.apply(&mut monitor, signal)
    }
}
