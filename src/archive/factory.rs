//! Deciding what a listed entry becomes.
//!
//! The listing parser never hard-codes which extensions are archives; it
//! asks an [`ArchiveFactory`].

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::paths;

use super::context::ArchiveContext;
use super::handle::ArchiveHandle;
use super::tree::ContentFile;

/// What a (non-directory) listed entry is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    NestedArchive,
    ContentFile,
}

pub trait ArchiveFactory: Send + Sync {
    /// Classify an entry by its path inside the archive.
    fn classify(&self, path: &str) -> EntryKind;

    /// Build a handle for an archive found inside another archive.
    fn create_archive(
        &self,
        ctx: &Arc<ArchiveContext>,
        path: &str,
        inner: bool,
        relative_base: Option<&str>,
    ) -> ArchiveHandle {
        ArchiveHandle::with_identity(Arc::clone(ctx), path, inner, relative_base)
    }

    /// Build a terminal content file.
    fn create_file(&self, path: &str) -> ContentFile {
        ContentFile::new(path)
    }
}

/// Classifies by file extension (`zip`, `rar`, `7z` unless configured otherwise).
#[derive(Debug, Clone)]
pub struct ExtensionFactory {
    extensions: Vec<String>,
}

impl ExtensionFactory {
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            extensions: extensions
                .into_iter()
                .map(|e| e.into().to_lowercase())
                .collect(),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.archive_extensions.iter().cloned())
    }
}

impl ArchiveFactory for ExtensionFactory {
    fn classify(&self, path: &str) -> EntryKind {
        match paths::extension(path) {
            Some(ext) if self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)) => {
                EntryKind::NestedArchive
            }
            _ => EntryKind::ContentFile,
        }
    }
}
