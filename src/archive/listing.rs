//! Streaming parser for `7z l -slt` output.
//!
//! 7-Zip prints a header describing the archive itself, a line of dashes,
//! then one `Key = Value` block per entry:
//!
//! ```text
//! Path = Content/People/Genesis 8 Female/Characters/Aiko.duf
//! Folder = -
//! Size = 18234
//! Packed Size = 4021
//! Attributes = A
//! Encrypted = -
//! ```
//!
//! The parser holds one pending entity at a time and turns it into a tree
//! node when the next `Path` line arrives or stdout closes. It never looks
//! back, so each line is processed exactly once.

use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use super::context::ArchiveContext;
use super::driver::{Flow, LineHandler};
use super::factory::EntryKind;
use super::flags::{ArchiveFlags, Flag};
use super::handle::ArchiveIdentity;
use super::tree::{ContentFolder, EntityTree, Entry};

/// Marks the end of the archive header and the start of the entry list
const SEPARATOR: &str = "----------";

/// 7-Zip's message when headers are encrypted and no password was given
pub(crate) const ENCRYPTED_ARCHIVE: &str = "Can not open encrypted archive";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingState {
    /// Still inside the archive header
    AwaitingListing,
    /// Reading entry blocks
    Listing,
    /// Stdout closed or encryption found; further lines are ignored
    Done,
}

/// Outcome of feeding a line that the handle has to act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingSignal {
    /// `Errors:` seen; listing goes on
    Errored,
    /// Headers are encrypted
    HeaderEncrypted,
    /// An entry is encrypted; listing stops here
    Encrypted,
    /// Stdout closed
    Finished,
}

#[derive(Debug, Default)]
struct PendingEntity {
    path: String,
    is_dir: bool,
    size: u64,
}

pub struct ListingParser {
    ctx: Arc<ArchiveContext>,
    owner: Arc<ArchiveIdentity>,
    state: ListingState,
    pending: Option<PendingEntity>,
    tree: EntityTree,
    total_size: u64,
    errored: bool,
    encrypted: bool,
    header_encrypted: bool,
}

impl ListingParser {
    pub fn new(ctx: Arc<ArchiveContext>, owner: Arc<ArchiveIdentity>) -> Self {
        Self {
            ctx,
            owner,
            state: ListingState::AwaitingListing,
            pending: None,
            tree: EntityTree::new(),
            total_size: 0,
            errored: false,
            encrypted: false,
            header_encrypted: false,
        }
    }

    /// Feed one stdout line; `None` means stdout closed.
    pub fn feed(&mut self, line: Option<&str>) -> Option<ListingSignal> {
        if self.state == ListingState::Done {
            return None;
        }

        let Some(line) = line else {
            self.finalize();
            self.state = ListingState::Done;
            return Some(ListingSignal::Finished);
        };

        if line.contains(ENCRYPTED_ARCHIVE) {
            return self.mark_header_encrypted();
        }

        if self.state == ListingState::AwaitingListing {
            if line.starts_with(SEPARATOR) {
                self.state = ListingState::Listing;
            } else if line.contains("Errors:") {
                self.errored = true;
                return Some(ListingSignal::Errored);
            }
            return None;
        }

        if let Some(path) = field(line, "Path") {
            self.finalize();
            self.pending = Some(PendingEntity {
                path: path.to_string(),
                ..Default::default()
            });
        } else if let Some(value) = field(line, "Size") {
            // Formatting drift is tolerated: a size we can't read is skipped
            if let Ok(size) = value.trim().parse::<u64>() {
                // Sizes come from archive headers and may be hostile
                self.total_size = self.total_size.saturating_add(size);
                if let Some(ref mut pending) = self.pending {
                    pending.size = pending.size.saturating_add(size);
                }
            }
        } else if let Some(value) = field(line, "Attributes") {
            if let Some(ref mut pending) = self.pending {
                // `Folder = +` comes first and must survive attributes without `D`
                pending.is_dir = pending.is_dir || value.contains('D');
            }
        } else if let Some(value) = field(line, "Folder") {
            if value.trim() == "+" {
                if let Some(ref mut pending) = self.pending {
                    pending.is_dir = true;
                }
            }
        } else if let Some(value) = field(line, "Encrypted") {
            if value.contains('+') {
                self.encrypted = true;
                self.pending = None;
                self.state = ListingState::Done;
                return Some(ListingSignal::Encrypted);
            }
        } else if line.contains("Errors:") {
            self.errored = true;
            return Some(ListingSignal::Errored);
        }

        None
    }

    /// Feed one stderr line.
    pub fn feed_error(&mut self, line: &str) -> Option<ListingSignal> {
        if self.state != ListingState::Done && line.contains(ENCRYPTED_ARCHIVE) {
            return self.mark_header_encrypted();
        }
        None
    }

    fn mark_header_encrypted(&mut self) -> Option<ListingSignal> {
        if self.header_encrypted {
            return None;
        }
        self.header_encrypted = true;
        Some(ListingSignal::HeaderEncrypted)
    }

    /// Turn the pending entity into a tree node. No-op when nothing is pending.
    fn finalize(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        if pending.path.is_empty() {
            debug!("Skipping entry with empty path in {}", self.owner.display_name());
            return;
        }

        if pending.is_dir {
            self.tree.push(Entry::Folder(ContentFolder::new(pending.path)));
            return;
        }

        let factory = self.ctx.factory();
        match factory.classify(&pending.path) {
            EntryKind::NestedArchive => {
                let mut nested =
                    factory.create_archive(&self.ctx, &pending.path, true, Some(self.owner.key()));
                nested.set_parent(&self.owner);
                self.tree.push(Entry::Archive(Box::new(nested)));
            }
            EntryKind::ContentFile => {
                let mut file = factory.create_file(&pending.path);
                file.size = pending.size;
                self.tree.push(Entry::File(file));
            }
        }
    }

    pub fn state(&self) -> ListingState {
        self.state
    }

    pub fn tree(&self) -> &EntityTree {
        &self.tree
    }

    pub fn take_tree(&mut self) -> EntityTree {
        std::mem::take(&mut self.tree)
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn is_errored(&self) -> bool {
        self.errored
    }

    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }
}

/// `Name = value` -> `value`. The name must start the line.
fn field<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(name)?.trim_start_matches(' ');
    let value = rest.strip_prefix('=')?;
    Some(value.strip_prefix(' ').unwrap_or(value))
}

/// Drives a [`ListingParser`] from the driver's delivery thread and raises
/// the handle's flags.
pub(crate) struct ListingHandler {
    pub parser: Arc<Mutex<ListingParser>>,
    pub flags: Arc<ArchiveFlags>,
    pub ctx: Arc<ArchiveContext>,
    pub identity: Arc<ArchiveIdentity>,
}

impl ListingHandler {
    fn apply(&self, signal: Option<ListingSignal>) -> Flow {
        match signal {
            None => Flow::Continue,
            Some(ListingSignal::Errored) => {
                warn!("7-Zip reported errors while listing {}", self.identity.display_name());
                self.flags.raise(Flag::InspectErrored);
                Flow::Continue
            }
            Some(ListingSignal::HeaderEncrypted) => {
                warn!("{} has encrypted headers", self.identity.display_name());
                self.flags.raise(Flag::HeaderEncrypted);
                self.ctx.notify_encrypted(&self.identity, &self.flags);
                Flow::Continue
            }
            Some(ListingSignal::Encrypted) => {
                warn!("{} contains encrypted files; stopping inspection", self.identity.display_name());
                self.flags.raise(Flag::Encrypted);
                self.ctx.notify_encrypted(&self.identity, &self.flags);
                self.flags.raise(Flag::InspectFinished);
                Flow::Detach
            }
            Some(ListingSignal::Finished) => {
                debug!("Listing of {} finished", self.identity.display_name());
                self.flags.raise(Flag::InspectFinished);
                Flow::Continue
            }
        }
    }
}

impl LineHandler for ListingHandler {
    fn on_output(&mut self, line: Option<&str>) -> Flow {
        debug!("7z output: {:?}", line);
        let signal = self
            .parser
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .feed(line);
        self.apply(signal)
    }

    fn on_error(&mut self, line: &str) -> Flow {
        debug!("7z error output for {}: {}", self.identity.display_name(), line);
        let signal = self
            .parser
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .feed_error(line);
        self.apply(signal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::factory::ArchiveFactory;
    use crate::config::EngineConfig;
    use std::path::Path;

    fn parser() -> ListingParser {
        let ctx = Arc::new(ArchiveContext::with_tool(EngineConfig::default(), "7zz"));
        let owner = Arc::new(ArchiveIdentity::top_level(
            Path::new("/downloads/Product.zip"),
            Path::new("/tmp/stage"),
        ));
        ListingParser::new(ctx, owner)
    }

    fn feed_all(parser: &mut ListingParser, text: &str) -> Vec<ListingSignal> {
        let mut signals = Vec::new();
        for line in text.lines() {
            signals.extend(parser.feed(Some(line)));
        }
        signals
    }

    const HEADER: &str = "\
7-Zip (z) 23.01 (x64) : Copyright (c) 1999-2023 Igor Pavlov : 2023-06-20

Scanning the drive for archives:
1 file, 4096 bytes (4 KiB)

Listing archive: /downloads/Product.zip

--
Path = /downloads/Product.zip
Type = zip
Physical Size = 4096

----------
";

    #[test]
    fn test_header_lines_ignored() {
        let mut p = parser();
        feed_all(&mut p, HEADER);
        assert_eq!(p.state(), ListingState::Listing);
        p.feed(None);
        assert!(p.tree().is_empty());
        assert_eq!(p.total_size(), 0);
    }

    #[test]
    fn test_file_and_folder_scenario() {
        let mut p = parser();
        feed_all(&mut p, HEADER);
        feed_all(
            &mut p,
            "Path = foo/bar.duf\nSize = 120\nAttributes = A\n\nPath = foo/\nAttributes = D\n",
        );
        assert_eq!(p.feed(None), Some(ListingSignal::Finished));

        let tree = p.tree();
        assert_eq!(tree.len(), 2);
        let file = tree.find_file("foo/bar.duf").unwrap();
        assert_eq!(file.size, 120);
        let folders: Vec<_> = tree.folders().map(|f| f.path.as_str()).collect();
        assert_eq!(folders, vec!["foo/"]);
        assert_eq!(p.total_size(), 120);
        assert_eq!(p.state(), ListingState::Done);
    }

    #[test]
    fn test_entry_count_and_order_match_path_lines() {
        let mut p = parser();
        feed_all(&mut p, HEADER);
        let mut body = String::new();
        let names = ["c.duf", "a/", "b.dsf", "a/b/", "z.png"];
        for name in names {
            let attr = if name.ends_with('/') { "D" } else { "A" };
            body.push_str(&format!("Path = {}\nSize = 1\nAttributes = {}\n\n", name, attr));
        }
        feed_all(&mut p, &body);
        p.feed(None);

        let paths: Vec<&str> = p.tree().entries().iter().map(|e| e.path()).collect();
        assert_eq!(paths, names);
    }

    #[test]
    fn test_round_trip_counts_and_sizes() {
        let mut p = parser();
        feed_all(&mut p, HEADER);
        let mut body = String::new();
        let mut expected = 0u64;
        for i in 0..7u64 {
            body.push_str(&format!("Path = data/file{}.dsf\nSize = {}\nAttributes = A\n\n", i, i * 10 + 3));
            expected += i * 10 + 3;
            if i % 2 == 0 {
                body.push_str(&format!("Path = data/dir{}\nSize = \nAttributes = D\n\n", i));
            }
        }
        feed_all(&mut p, &body);
        p.feed(None);

        assert_eq!(p.tree().files().count(), 7);
        assert_eq!(p.tree().folders().count(), 4);
        assert_eq!(p.total_size(), expected);
        assert!(!p.is_errored());
        assert!(!p.is_encrypted());
    }

    #[test]
    fn test_attribute_applies_to_current_pending_only() {
        let mut p = parser();
        feed_all(&mut p, HEADER);
        feed_all(&mut p, "Path = one\nAttributes = A\nPath = two\nAttributes = D\nPath = three\n");
        p.feed(None);

        let kinds: Vec<bool> = p
            .tree()
            .entries()
            .iter()
            .map(|e| matches!(e, Entry::Folder(_)))
            .collect();
        assert_eq!(kinds, vec![false, true, false]);
    }

    #[test]
    fn test_folder_plus_marks_directory() {
        let mut p = parser();
        feed_all(&mut p, HEADER);
        feed_all(&mut p, "Path = textures\nFolder = +\nSize = 0\n");
        p.feed(None);
        assert_eq!(p.tree().folders().count(), 1);
    }

    #[test]
    fn test_folder_marker_survives_attributes() {
        let mut p = parser();
        feed_all(&mut p, HEADER);
        feed_all(&mut p, "Path = textures\nFolder = +\nSize = 0\nAttributes = A\nPath = a.duf\nFolder = -\nAttributes = A\n");
        p.feed(None);
        let folders: Vec<_> = p.tree().folders().map(|f| f.path.as_str()).collect();
        assert_eq!(folders, vec!["textures"]);
        assert_eq!(p.tree().files().count(), 1);
    }

    #[test]
    fn test_huge_sizes_saturate() {
        let mut p = parser();
        feed_all(&mut p, HEADER);
        feed_all(
            &mut p,
            "Path = a.duf\nSize = 18446744073709551615\nSize = 1\nPath = b.duf\nSize = 2\n",
        );
        assert_eq!(p.feed(None), Some(ListingSignal::Finished));
        assert_eq!(p.total_size(), u64::MAX);
        assert_eq!(p.tree().find_file("a.duf").unwrap().size, u64::MAX);
        assert_eq!(p.tree().find_file("b.duf").unwrap().size, 2);
    }

    #[test]
    fn test_unparseable_size_skipped() {
        let mut p = parser();
        feed_all(&mut p, HEADER);
        feed_all(&mut p, "Path = a.duf\nSize = lots\nPath = b.duf\nSize = 5\n");
        p.feed(None);
        assert_eq!(p.tree().len(), 2);
        assert_eq!(p.tree().find_file("a.duf").unwrap().size, 0);
        assert_eq!(p.total_size(), 5);
    }

    #[test]
    fn test_encrypted_halts_after_two_entities() {
        let mut p = parser();
        feed_all(&mut p, HEADER);
        let signals = feed_all(
            &mut p,
            "Path = a.duf\nSize = 1\nAttributes = A\nEncrypted = -\n\n\
             Path = b.duf\nSize = 2\nAttributes = A\nEncrypted = -\n\n\
             Path = c.duf\nSize = 3\nAttributes = A\nEncrypted = +\n\n\
             Path = d.duf\nSize = 4\nAttributes = A\n",
        );
        assert_eq!(signals, vec![ListingSignal::Encrypted]);
        assert_eq!(p.feed(None), None);

        let paths: Vec<&str> = p.tree().entries().iter().map(|e| e.path()).collect();
        assert_eq!(paths, vec!["a.duf", "b.duf"]);
        assert!(p.is_encrypted());
        assert!(!p.is_errored());
        assert_eq!(p.state(), ListingState::Done);
    }

    #[test]
    fn test_errors_line_is_not_fatal() {
        let mut p = parser();
        feed_all(&mut p, HEADER);
        let signals = feed_all(&mut p, "Path = a.duf\nSize = 1\n\nErrors: 1\n");
        assert_eq!(signals, vec![ListingSignal::Errored]);
        assert_eq!(p.feed(None), Some(ListingSignal::Finished));
        assert!(p.is_errored());
        assert_eq!(p.tree().len(), 1);
    }

    #[test]
    fn test_errors_before_listing_recorded() {
        let mut p = parser();
        let signals = feed_all(&mut p, "ERROR: broken.zip\nCan not open the file as archive\n\nErrors: 1\n");
        assert_eq!(signals, vec![ListingSignal::Errored]);
        assert_eq!(p.state(), ListingState::AwaitingListing);
    }

    #[test]
    fn test_header_encryption_from_stderr_once() {
        let mut p = parser();
        let msg = "ERROR: locked.7z : Can not open encrypted archive. Wrong password?";
        assert_eq!(p.feed_error(msg), Some(ListingSignal::HeaderEncrypted));
        assert_eq!(p.feed_error(msg), None);
        assert_eq!(p.feed(Some(msg)), None);
    }

    #[test]
    fn test_nested_archive_gets_parent_link() {
        let mut p = parser();
        feed_all(&mut p, HEADER);
        feed_all(&mut p, "Path = Content/Inner.zip\nSize = 900\nAttributes = A\n");
        p.feed(None);

        let nested: Vec<_> = p.tree().archives().collect();
        assert_eq!(nested.len(), 1);
        let inner = nested[0];
        assert!(inner.is_inner());
        assert_eq!(inner.relative_path(), "Content/Inner.zip");
        let parent = inner.parent().expect("parent still alive");
        assert_eq!(parent.display_name(), "Product.zip");
        assert!(!inner.inspect_finished());
    }

    #[test]
    fn test_custom_factory_decides_nesting() {
        struct NeverNested;
        impl ArchiveFactory for NeverNested {
            fn classify(&self, _path: &str) -> EntryKind {
                EntryKind::ContentFile
            }
        }

        let ctx = Arc::new(
            ArchiveContext::with_tool(EngineConfig::default(), "7zz").with_factory(Arc::new(NeverNested)),
        );
        let owner = Arc::new(ArchiveIdentity::top_level(Path::new("/dl/p.zip"), Path::new("/tmp")));
        let mut p = ListingParser::new(ctx, owner);
        feed_all(&mut p, HEADER);
        feed_all(&mut p, "Path = Content/Inner.zip\nSize = 9\nAttributes = A\n");
        p.feed(None);

        assert_eq!(p.tree().archives().count(), 0);
        assert_eq!(p.tree().find_file("Content/Inner.zip").unwrap().size, 9);
    }

    #[test]
    fn test_finalize_without_pending_is_noop() {
        let mut p = parser();
        feed_all(&mut p, HEADER);
        p.finalize();
        p.finalize();
        assert!(p.tree().is_empty());
    }

    #[test]
    fn test_field_parsing() {
        assert_eq!(field("Path = a b.duf", "Path"), Some("a b.duf"));
        assert_eq!(field("Path = ", "Path"), Some(""));
        assert_eq!(field("Packed Size = 3", "Size"), None);
        assert_eq!(field("PathX = 3", "Path"), None);
        assert_eq!(field("Size=3", "Size"), Some("3"));
    }
}
