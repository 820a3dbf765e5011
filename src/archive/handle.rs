//! Archive handle: one archive's inspect/extract lifecycle.
//!
//! ```text
//!   open ──inspect()──> tree listed ──extract()──> files staged, validated, moved
//! ```
//!
//! Both operations block the caller until 7-Zip reaches a terminal line or
//! the configured ceiling (60 s by default) passes. Nothing escapes as an
//! error: callers look at the flags and at each file's `extracted` state.
//! Neither operation retries on its own.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, error, info, warn};

use crate::content;
use crate::paths;

use super::context::{ArchiveContext, ProgressEvent};
use super::driver::{Invocation, Mode, ProcessDriver};
use super::flags::{ArchiveFlags, Flag};
use super::listing::{ListingHandler, ListingParser};
use super::monitor::{ExtractionHandler, ExtractionMonitor};
use super::staging;
use super::tree::EntityTree;

/// Who an archive is and where its files go while being extracted.
#[derive(Debug, Clone)]
pub struct ArchiveIdentity {
    /// On-disk path (top level) or path inside the parent (inner)
    source: PathBuf,
    /// File name for top-level archives, full inner path for nested ones
    entry_path: String,
    display_name: String,
    inner: bool,
    /// Logical path of the enclosing archive, for nested archives
    relative_base: Option<String>,
    /// Unique logical path used to derive the staging directory
    key: String,
    staging_dir: PathBuf,
}

impl ArchiveIdentity {
    pub fn top_level(source: &Path, temp_root: &Path) -> Self {
        let key = source.to_string_lossy().into_owned();
        let display_name = paths::file_name(&key).to_string();
        Self {
            source: source.to_path_buf(),
            entry_path: display_name.clone(),
            display_name,
            inner: false,
            relative_base: None,
            staging_dir: staging::staging_dir(temp_root, &key),
            key,
        }
    }

    pub fn inner(entry_path: &str, relative_base: Option<&str>, temp_root: &Path) -> Self {
        let key = match relative_base {
            Some(base) => format!("{}/{}", base, paths::to_forward_slashes(entry_path)),
            None => paths::to_forward_slashes(entry_path),
        };
        Self {
            source: PathBuf::from(paths::to_forward_slashes(entry_path)),
            entry_path: entry_path.to_string(),
            display_name: paths::file_name(entry_path).to_string(),
            inner: true,
            relative_base: relative_base.map(str::to_string),
            staging_dir: staging::staging_dir(temp_root, &key),
            key,
        }
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn entry_path(&self) -> &str {
        &self.entry_path
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn is_inner(&self) -> bool {
        self.inner
    }

    pub fn relative_base(&self) -> Option<&str> {
        self.relative_base.as_deref()
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }
}

#[derive(Debug)]
pub struct ArchiveHandle {
    ctx: Arc<ArchiveContext>,
    identity: Arc<ArchiveIdentity>,
    parent: Option<Weak<ArchiveIdentity>>,
    mode: Option<Mode>,
    password: Option<String>,
    driver: ProcessDriver,
    tree: EntityTree,
    flags: Arc<ArchiveFlags>,
    total_size: u64,
    /// Where a nested archive sits on disk once its parent extracted it
    extracted_path: Option<PathBuf>,
}

impl ArchiveHandle {
    /// Handle for an archive on disk.
    pub fn open(ctx: Arc<ArchiveContext>, path: impl AsRef<Path>) -> Self {
        let identity = ArchiveIdentity::top_level(path.as_ref(), &ctx.config().temp_root);
        Self::from_identity(ctx, identity)
    }

    /// Handle built the way the archive factory builds them.
    pub fn with_identity(
        ctx: Arc<ArchiveContext>,
        path: &str,
        inner: bool,
        relative_base: Option<&str>,
    ) -> Self {
        let temp_root = ctx.config().temp_root.clone();
        let identity = if inner {
            ArchiveIdentity::inner(path, relative_base, &temp_root)
        } else {
            ArchiveIdentity::top_level(Path::new(path), &temp_root)
        };
        Self::from_identity(ctx, identity)
    }

    fn from_identity(ctx: Arc<ArchiveContext>, identity: ArchiveIdentity) -> Self {
        let driver = ProcessDriver::new(ctx.seven_zip());
        Self {
            ctx,
            identity: Arc::new(identity),
            parent: None,
            mode: None,
            password: None,
            driver,
            tree: EntityTree::new(),
            flags: Arc::new(ArchiveFlags::new()),
            total_size: 0,
            extracted_path: None,
        }
    }

    /// Supply the password. Only the first one given is kept.
    pub fn set_password(&mut self, password: impl Into<String>) {
        if self.password.is_some() {
            warn!("Password for {} already set; ignoring", self.display_name());
            return;
        }
        self.password = Some(password.into());
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.set_password(password);
        self
    }

    pub fn set_parent(&mut self, parent: &Arc<ArchiveIdentity>) {
        self.parent = Some(Arc::downgrade(parent));
    }

    /// The enclosing archive, if this one is nested and the parent is alive.
    pub fn parent(&self) -> Option<Arc<ArchiveIdentity>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    pub fn identity(&self) -> &Arc<ArchiveIdentity> {
        &self.identity
    }

    pub fn path(&self) -> &Path {
        self.identity.source()
    }

    pub fn display_name(&self) -> &str {
        self.identity.display_name()
    }

    pub fn relative_path(&self) -> &str {
        self.identity.entry_path()
    }

    pub fn is_inner(&self) -> bool {
        self.identity.is_inner()
    }

    pub fn staging_dir(&self) -> &Path {
        self.identity.staging_dir()
    }

    pub fn mode(&self) -> Option<Mode> {
        self.mode
    }

    pub fn tree(&self) -> &EntityTree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut EntityTree {
        &mut self.tree
    }

    /// Total uncompressed size reported by the listing.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn extracted_path(&self) -> Option<&Path> {
        self.extracted_path.as_deref()
    }

    pub fn set_extracted_path(&mut self, path: PathBuf) {
        self.extracted_path = Some(path);
    }

    /// Whether a nested archive is actually present where its parent put it.
    pub fn is_available(&self) -> bool {
        self.disk_path().is_some_and(|p| p.is_file())
    }

    pub fn is_encrypted(&self) -> bool {
        self.flags.get(Flag::Encrypted)
    }

    pub fn is_header_encrypted(&self) -> bool {
        self.flags.get(Flag::HeaderEncrypted)
    }

    pub fn inspect_errored(&self) -> bool {
        self.flags.get(Flag::InspectErrored)
    }

    pub fn inspect_finished(&self) -> bool {
        self.flags.get(Flag::InspectFinished)
    }

    pub fn extract_errored(&self) -> bool {
        self.flags.get(Flag::ExtractErrored)
    }

    pub fn extract_finished(&self) -> bool {
        self.flags.get(Flag::ExtractFinished)
    }

    /// What 7-Zip should open: the archive itself, or for a nested archive
    /// its staged copy.
    fn disk_path(&self) -> Option<&Path> {
        if self.identity.is_inner() {
            self.extracted_path.as_deref()
        } else {
            Some(self.identity.source())
        }
    }

    fn stop_running(&mut self) {
        if self.driver.is_running() {
            info!("Stopping running 7-Zip process for {}", self.display_name());
            self.driver.terminate();
        }
    }

    /// List the archive and build its entity tree.
    pub fn inspect(&mut self) {
        self.mode = Some(Mode::Inspect);
        self.stop_running();

        let Some(archive_path) = self.disk_path().map(Path::to_path_buf) else {
            warn!("Cannot inspect {}: it has not been extracted from its parent", self.display_name());
            return;
        };

        let parser = Arc::new(Mutex::new(ListingParser::new(
            Arc::clone(&self.ctx),
            Arc::clone(&self.identity),
        )));
        let handler = ListingHandler {
            parser: Arc::clone(&parser),
            flags: Arc::clone(&self.flags),
            ctx: Arc::clone(&self.ctx),
            identity: Arc::clone(&self.identity),
        };

        self.ctx.report(ProgressEvent::Style { busy: true });
        self.ctx.status(format!("Seeking files in archive {}...", self.display_name()));

        let invocation = Invocation {
            mode: Mode::Inspect,
            archive: &archive_path,
            password: self.password.as_deref(),
            output_dir: None,
        };
        if let Err(e) = self.driver.start(invocation, handler) {
            error!("Failed to start listing of {}: {}", self.display_name(), e);
            return;
        }

        let timeout = self.ctx.config().timeout;
        if !self.flags.wait_for(Flag::InspectFinished, timeout) {
            warn!("Peek timeout exceeded for {}.", self.display_name());
        }

        let mut parser = parser.lock().unwrap_or_else(|e| e.into_inner());
        self.tree = parser.take_tree();
        self.total_size = parser.total_size();
        debug!(
            "Inspected {}: {} entries, {} bytes",
            self.display_name(),
            self.tree.len(),
            self.total_size
        );
    }

    /// Extract everything into staging, then move files to their targets.
    pub fn extract(&mut self) {
        self.mode = Some(Mode::Extract);
        self.stop_running();

        if self.is_encrypted() || self.is_header_encrypted() {
            info!("Skipping extraction of encrypted archive {}", self.display_name());
            self.ctx.notify_encrypted(&self.identity, &self.flags);
            self.flags.raise(Flag::ExtractFinished);
            return;
        }

        let Some(archive_path) = self.disk_path().map(Path::to_path_buf) else {
            warn!("Cannot extract {}: it has not been extracted from its parent", self.display_name());
            return;
        };

        let staging = self.identity.staging_dir().to_path_buf();
        if let Err(e) = fs::create_dir_all(&staging) {
            // Validation will fail file by file if the directory is unusable
            warn!("Failed to create staging dir {}: {}", staging.display(), e);
        }

        let targets = self.ctx.targets();
        for file in self.tree.files_mut() {
            file.stage_at(paths::join_relative(&staging, &file.path));
            file.target_path = targets.target_for(&self.identity, &file.path);
        }
        for nested in self.tree.archives_mut() {
            let location = paths::join_relative(&staging, nested.relative_path());
            nested.set_extracted_path(location);
        }

        let monitor = Arc::new(Mutex::new(ExtractionMonitor::new(
            std::mem::take(&mut self.tree),
            self.ctx.config().validation,
        )));
        let handler = ExtractionHandler {
            monitor: Arc::clone(&monitor),
            flags: Arc::clone(&self.flags),
            ctx: Arc::clone(&self.ctx),
            identity: Arc::clone(&self.identity),
        };

        self.ctx.status(format!(
            "Extracting to temp from archive {}...",
            self.display_name()
        ));

        let invocation = Invocation {
            mode: Mode::Extract,
            archive: &archive_path,
            password: self.password.as_deref(),
            output_dir: Some(&staging),
        };
        let started = self.driver.start(invocation, handler);
        if let Err(ref e) = started {
            error!("Failed to start extraction of {}: {}", self.display_name(), e);
        } else if !self
            .flags
            .wait_for(Flag::ExtractFinished, self.ctx.config().timeout)
        {
            warn!("Extract timeout exceeded for {}.", self.display_name());
        }

        self.tree = monitor.lock().unwrap_or_else(|e| e.into_inner()).take_tree();

        for nested in self.tree.archives() {
            if !nested.is_available() {
                warn!(
                    "Nested archive {} was not extracted from {}",
                    nested.relative_path(),
                    self.display_name()
                );
            }
        }
    }

    /// Read DAZ user files that made it to their targets and attach their
    /// `asset_info`. Unreadable files are logged and skipped.
    pub fn read_content_files(&mut self) -> usize {
        let mut read = 0;
        for file in self.tree.files_mut() {
            if !file.is_relocated() || !file.extension().is_some_and(|e| content::is_user_file(&e)) {
                continue;
            }
            let Some(path) = file.extracted_path.clone() else {
                continue;
            };
            match content::read_asset_info(&path) {
                Ok(Some(info)) => {
                    file.asset = Some(info);
                    read += 1;
                }
                Ok(None) => debug!("No asset_info in {}", path.display()),
                Err(e) => debug!("Could not read {}: {:#}", path.display(), e),
            }
        }
        read
    }

    /// Stop any running 7-Zip process.
    pub fn release(&mut self) {
        self.driver.terminate();
    }
}
