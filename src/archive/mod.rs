//! Archive inspection and extraction through the 7-Zip command line.
//!
//! An [`ArchiveHandle`] lists an archive with `7z l -slt` into an
//! [`EntityTree`] of files, folders and nested archives, then extracts it
//! with `7z x` into a staging directory, checks what actually landed on
//! disk and moves each file to the target its [`TargetResolver`] picked.

pub mod context;
pub mod driver;
pub mod factory;
pub mod flags;
pub mod handle;
pub mod listing;
pub mod monitor;
pub mod staging;
pub mod tool;
pub mod tree;

#[cfg(test)]
pub(crate) mod test_support;

pub use context::{
    ArchiveContext, DirectoryTargets, LogNotifier, NoTargets, Notifier, ProgressCallback,
    ProgressEvent, TargetResolver,
};
pub use driver::{DriverError, Mode};
pub use factory::{ArchiveFactory, EntryKind, ExtensionFactory};
pub use flags::{ArchiveFlags, Flag};
pub use handle::{ArchiveHandle, ArchiveIdentity};
pub use monitor::RelocationStats;
pub use tool::find_seven_zip;
pub use tree::{ContentFile, ContentFolder, EntityTree, Entry};
