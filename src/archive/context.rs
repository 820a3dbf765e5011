//! Explicit context shared by every archive handle of one installation.
//!
//! Holds the configuration and the collaborators the engine calls out to:
//! the archive factory, the target resolver, the user notifier and an
//! optional progress sink. Handles keep an `Arc` to it; nothing is global.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use tracing::error;

use crate::config::EngineConfig;
use crate::paths;

use super::factory::{ArchiveFactory, ExtensionFactory};
use super::flags::ArchiveFlags;
use super::handle::ArchiveIdentity;
use super::tool;

/// Progress updates emitted at well-defined points of an operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// Human-readable status ("Seeking files in archive ...")
    Status(String),
    /// Switch between an indeterminate (busy) and a determinate indicator
    Style { busy: bool },
}

/// Progress callback for reporting archive status
pub type ProgressCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Tells the user about conditions they have to act on.
pub trait Notifier: Send + Sync {
    /// The archive is encrypted and can't be installed.
    fn unsupported_encryption(&self, archive_name: &str);
}

/// Default notifier: writes to the log.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn unsupported_encryption(&self, archive_name: &str) {
        error!(
            "Unfortunately, {} is encrypted and encrypted archives are not supported yet.",
            archive_name
        );
    }
}

/// Computes where each extracted file should end up.
pub trait TargetResolver: Send + Sync {
    /// `None` leaves the file in staging.
    fn target_for(&self, archive: &ArchiveIdentity, relative_path: &str) -> Option<PathBuf>;
}

/// Mirrors archive paths under a destination root.
#[derive(Debug, Clone)]
pub struct DirectoryTargets {
    root: PathBuf,
}

impl DirectoryTargets {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl TargetResolver for DirectoryTargets {
    fn target_for(&self, _archive: &ArchiveIdentity, relative_path: &str) -> Option<PathBuf> {
        Some(paths::join_relative(&self.root, relative_path))
    }
}

/// Resolver used when no destination is known: everything stays staged.
#[derive(Debug, Default)]
pub struct NoTargets;

impl TargetResolver for NoTargets {
    fn target_for(&self, _archive: &ArchiveIdentity, _relative_path: &str) -> Option<PathBuf> {
        None
    }
}

pub struct ArchiveContext {
    config: EngineConfig,
    seven_zip: PathBuf,
    factory: Arc<dyn ArchiveFactory>,
    targets: Arc<dyn TargetResolver>,
    notifier: Arc<dyn Notifier>,
    progress: Option<ProgressCallback>,
}

impl ArchiveContext {
    /// Validate `config` and locate 7-Zip.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let seven_zip = tool::find_seven_zip(config.seven_zip.as_deref())?;
        Ok(Self::with_tool(config, seven_zip))
    }

    /// Build a context around an already-known 7-Zip binary.
    pub fn with_tool(config: EngineConfig, seven_zip: impl Into<PathBuf>) -> Self {
        let factory = Arc::new(ExtensionFactory::from_config(&config));
        Self {
            config,
            seven_zip: seven_zip.into(),
            factory,
            targets: Arc::new(NoTargets),
            notifier: Arc::new(LogNotifier),
            progress: None,
        }
    }

    pub fn with_factory(mut self, factory: Arc<dyn ArchiveFactory>) -> Self {
        self.factory = factory;
        self
    }

    pub fn with_targets(mut self, targets: Arc<dyn TargetResolver>) -> Self {
        self.targets = targets;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn seven_zip(&self) -> &Path {
        &self.seven_zip
    }

    pub fn factory(&self) -> &dyn ArchiveFactory {
        self.factory.as_ref()
    }

    pub fn targets(&self) -> &dyn TargetResolver {
        self.targets.as_ref()
    }

    /// Report a progress event to the callback if one is set
    pub fn report(&self, event: ProgressEvent) {
        if let Some(ref callback) = self.progress {
            callback(event);
        }
    }

    pub fn status(&self, message: impl Into<String>) {
        self.report(ProgressEvent::Status(message.into()));
    }

    /// Show the encryption notice, at most once per archive.
    pub fn notify_encrypted(&self, identity: &ArchiveIdentity, flags: &ArchiveFlags) {
        if flags.claim_notice() {
            self.notifier.unsupported_encryption(identity.display_name());
        }
    }
}

impl fmt::Debug for ArchiveContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchiveContext")
            .field("config", &self.config)
            .field("seven_zip", &self.seven_zip)
            .field("progress", &self.progress.is_some())
            .finish_non_exhaustive()
    }
}
