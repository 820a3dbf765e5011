//! In-memory view of an archive's contents.
//!
//! Entries are kept in exactly the order 7-Zip listed them. Nothing here
//! reorders or deduplicates.

use std::path::{Path, PathBuf};

use crate::content::AssetInfo;

use super::handle::ArchiveHandle;

/// A plain file inside an archive.
#[derive(Debug, Clone, Default)]
pub struct ContentFile {
    /// Path inside the archive, as listed by 7-Zip
    pub path: String,
    /// Uncompressed size as listed (0 if 7-Zip didn't report one)
    pub size: u64,
    /// Where extraction writes this file before it is moved
    pub staged_path: Option<PathBuf>,
    /// Final destination, supplied by the target resolver
    pub target_path: Option<PathBuf>,
    /// Where the file currently lives on disk (staging, then target)
    pub extracted_path: Option<PathBuf>,
    /// Set by post-extraction validation
    pub extracted: bool,
    /// Parsed `asset_info` for DAZ user files, once read
    pub asset: Option<AssetInfo>,
}

impl ContentFile {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Assign the staging location; the file is expected there after extraction.
    pub fn stage_at(&mut self, staged: PathBuf) {
        self.extracted_path = Some(staged.clone());
        self.staged_path = Some(staged);
    }

    /// True once the file has been moved to its target.
    pub fn is_relocated(&self) -> bool {
        match (&self.extracted_path, &self.target_path) {
            (Some(current), Some(target)) => self.extracted && current == target,
            _ => false,
        }
    }

    pub fn extension(&self) -> Option<String> {
        crate::paths::extension(&self.path).map(|e| e.to_lowercase())
    }
}

/// A directory entry. Directories are created implicitly when files are
/// staged or moved, so nothing else is tracked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentFolder {
    pub path: String,
}

impl ContentFolder {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

/// One node of the tree.
#[derive(Debug)]
pub enum Entry {
    Folder(ContentFolder),
    File(ContentFile),
    /// An archive inside this archive, with its own handle
    Archive(Box<ArchiveHandle>),
}

impl Entry {
    /// Path of the entry inside its archive.
    pub fn path(&self) -> &str {
        match self {
            Entry::Folder(folder) => &folder.path,
            Entry::File(file) => &file.path,
            Entry::Archive(archive) => archive.relative_path(),
        }
    }
}

#[derive(Debug, Default)]
pub struct EntityTree {
    entries: Vec<Entry>,
}

impl EntityTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: Entry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn files(&self) -> impl Iterator<Item = &ContentFile> {
        self.entries.iter().filter_map(|e| match e {
            Entry::File(f) => Some(f),
            _ => None,
        })
    }

    pub fn files_mut(&mut self) -> impl Iterator<Item = &mut ContentFile> {
        self.entries.iter_mut().filter_map(|e| match e {
            Entry::File(f) => Some(f),
            _ => None,
        })
    }

    pub fn folders(&self) -> impl Iterator<Item = &ContentFolder> {
        self.entries.iter().filter_map(|e| match e {
            Entry::Folder(f) => Some(f),
            _ => None,
        })
    }

    pub fn archives(&self) -> impl Iterator<Item = &ArchiveHandle> {
        self.entries.iter().filter_map(|e| match e {
            Entry::Archive(a) => Some(a.as_ref()),
            _ => None,
        })
    }

    pub fn archives_mut(&mut self) -> impl Iterator<Item = &mut ArchiveHandle> {
        self.entries.iter_mut().filter_map(|e| match e {
            Entry::Archive(a) => Some(a.as_mut()),
            _ => None,
        })
    }

    /// Visit every entry, descending into nested archives depth-first.
    /// The callback receives the nesting depth (0 for this tree).
    pub fn walk<F>(&self, mut visit: F)
    where
        F: FnMut(usize, &Entry),
    {
        self.walk_inner(0, &mut visit);
    }

    fn walk_inner<F>(&self, depth: usize, visit: &mut F)
    where
        F: FnMut(usize, &Entry),
    {
        for entry in &self.entries {
            visit(depth, entry);
            if let Entry::Archive(archive) = entry {
                archive.tree().walk_inner(depth + 1, visit);
            }
        }
    }

    /// Find a file by its path inside the archive.
    pub fn find_file(&self, path: &str) -> Option<&ContentFile> {
        self.files().find(|f| f.path == path)
    }
}

/// Check a staged/relocated path exists as a regular file.
pub(crate) fn file_exists(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tree_preserves_insertion_order() {
        let mut tree = EntityTree::new();
        tree.push(Entry::File(ContentFile::new("b.duf")));
        tree.push(Entry::Folder(ContentFolder::new("a/")));
        tree.push(Entry::File(ContentFile::new("b.duf")));

        let paths: Vec<&str> = tree.entries().iter().map(|e| e.path()).collect();
        assert_eq!(paths, vec!["b.duf", "a/", "b.duf"]);
        assert_eq!(tree.files().count(), 2);
        assert_eq!(tree.folders().count(), 1);
    }

    #[test]
    fn test_stage_at_sets_current_location() {
        let mut file = ContentFile::new("data/x.dsf");
        file.stage_at(PathBuf::from("/tmp/stage/data/x.dsf"));
        assert_eq!(file.staged_path, file.extracted_path);
        assert!(!file.is_relocated());
    }

    #[test]
    fn test_is_relocated() {
        let mut file = ContentFile::new("x.duf");
        file.target_path = Some(PathBuf::from("/lib/x.duf"));
        file.extracted_path = Some(PathBuf::from("/lib/x.duf"));
        assert!(!file.is_relocated());
        file.extracted = true;
        assert!(file.is_relocated());
    }

    #[test]
    fn test_extension_is_lowercased() {
        assert_eq!(ContentFile::new("People/Thing.DUF").extension().as_deref(), Some("duf"));
        assert_eq!(ContentFile::new("README").extension(), None);
    }
}
