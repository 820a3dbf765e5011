//! Completion and error flags shared between an archive handle and the
//! thread delivering 7-Zip output.
//!
//! Every flag is monotonic: once raised it never goes back to `false`.
//! Only the delivery thread raises flags; the thread that called
//! `inspect()`/`extract()` waits on them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Individual flags tracked per archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flag {
    /// At least one entry (or the whole archive) is encrypted
    Encrypted,
    /// The archive headers are encrypted; nothing can be listed without a password
    HeaderEncrypted,
    /// 7-Zip reported errors while listing
    InspectErrored,
    /// Listing reached a terminal state
    InspectFinished,
    /// 7-Zip reported errors while extracting
    ExtractErrored,
    /// Extraction reached a terminal state (validation and relocation done)
    ExtractFinished,
}

#[derive(Debug, Default)]
pub struct ArchiveFlags {
    encrypted: AtomicBool,
    header_encrypted: AtomicBool,
    inspect_errored: AtomicBool,
    inspect_finished: AtomicBool,
    extract_errored: AtomicBool,
    extract_finished: AtomicBool,
    /// Set once the user has been told about encryption
    notified: AtomicBool,
    lock: Mutex<()>,
    changed: Condvar,
}

impl ArchiveFlags {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, flag: Flag) -> &AtomicBool {
        match flag {
            Flag::Encrypted => &self.encrypted,
            Flag::HeaderEncrypted => &self.header_encrypted,
            Flag::InspectErrored => &self.inspect_errored,
            Flag::InspectFinished => &self.inspect_finished,
            Flag::ExtractErrored => &self.extract_errored,
            Flag::ExtractFinished => &self.extract_finished,
        }
    }

    pub fn get(&self, flag: Flag) -> bool {
        self.slot(flag).load(Ordering::Acquire)
    }

    /// Raise a flag and wake any waiter.
    pub fn raise(&self, flag: Flag) {
        self.slot(flag).store(true, Ordering::Release);
        // Taking the lock before notifying closes the window between a
        // waiter's check and its call to `wait_timeout`.
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        self.changed.notify_all();
    }

    /// Returns `true` exactly once per archive: the first time anyone asks
    /// to show the encryption notice.
    pub fn claim_notice(&self) -> bool {
        !self.notified.swap(true, Ordering::AcqRel)
    }

    /// Block until `flag` is raised or `timeout` elapses.
    ///
    /// Returns whether the flag was observed raised.
    pub fn wait_for(&self, flag: Flag, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if self.get(flag) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (next, _) = self
                .changed
                .wait_timeout(guard, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            guard = next;
        }
    }
}
