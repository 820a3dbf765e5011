//! 7-Zip subprocess driver.
//!
//! Spawns one 7-Zip process per operation and hands every line it prints to
//! a [`LineHandler`] on a dedicated delivery thread:
//!
//! ```text
//!   stdout reader ─┐
//!                  ├─> channel ─> delivery thread ─> LineHandler
//!   stderr reader ─┘
//! ```
//!
//! Lines from one stream arrive in the order 7-Zip wrote them. End of
//! standard output is delivered as `on_output(None)`.
//!
//! # Command line
//!
//! - List: `7zz l -aoa -slt -bd <archive>`
//! - Extract: `7zz x -aoa -slt -bd -o<dir> <archive>`
//!   - `-aoa`: Overwrite all existing files without prompting
//!   - `-slt`: Technical listing (key = value blocks)
//!   - `-bd`: No progress indicator (keeps lines clean)
//!
//! The password (or an empty line) is always written to stdin so 7-Zip never
//! sits waiting at a prompt.

use std::ffi::OsString;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Sender};
use std::sync::Arc;
use std::thread;

use tracing::{debug, warn};

/// Which 7-Zip verb an invocation uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// List contents (`l`)
    Inspect,
    /// Extract with full paths (`x`)
    Extract,
}

impl Mode {
    pub fn verb(self) -> &'static str {
        match self {
            Mode::Inspect => "l",
            Mode::Extract => "x",
        }
    }
}

/// What the delivery thread should do after a callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Stop calling the handler for this process
    Detach,
}

/// Receives 7-Zip output on the delivery thread.
pub trait LineHandler: Send + 'static {
    /// A line from stdout, or `None` once stdout is closed.
    fn on_output(&mut self, line: Option<&str>) -> Flow;

    /// A line from stderr.
    fn on_error(&mut self, line: &str) -> Flow;
}

/// Driver errors
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("Failed to spawn {tool}: {source}")]
    Spawn {
        tool: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to start output thread: {0}")]
    Thread(#[source] io::Error),
}

/// Everything needed to build one command line.
#[derive(Debug, Clone, Copy)]
pub struct Invocation<'a> {
    pub mode: Mode,
    pub archive: &'a Path,
    pub password: Option<&'a str>,
    /// Extraction target (`-o`); ignored when listing
    pub output_dir: Option<&'a Path>,
}

impl Invocation<'_> {
    pub fn args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            self.mode.verb().into(),
            "-aoa".into(),
            "-slt".into(),
            "-bd".into(),
        ];
        if let (Mode::Extract, Some(dir)) = (self.mode, self.output_dir) {
            let mut out = OsString::from("-o");
            out.push(dir.as_os_str());
            args.push(out);
        }
        args.push(self.archive.as_os_str().to_os_string());
        args
    }
}

enum Line {
    Out(String),
    OutClosed,
    Err(String),
}

/// Owns at most one running 7-Zip process.
#[derive(Debug)]
pub struct ProcessDriver {
    tool: PathBuf,
    child: Option<Child>,
    cancelled: Arc<AtomicBool>,
}

impl ProcessDriver {
    pub fn new(tool: impl Into<PathBuf>) -> Self {
        Self {
            tool: tool.into(),
            child: None,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Spawn 7-Zip and start delivering its output to `handler`.
    ///
    /// Any process still running from an earlier call is terminated first.
    pub fn start<H: LineHandler>(
        &mut self,
        invocation: Invocation<'_>,
        handler: H,
    ) -> Result<(), DriverError> {
        self.terminate();

        let args = invocation.args();
        debug!("Spawning {} {:?}", self.tool.display(), args);

        let mut child = Command::new(&self.tool)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| DriverError::Spawn {
                tool: self.tool.clone(),
                source,
            })?;

        let cancelled = Arc::new(AtomicBool::new(false));
        let (tx, rx) = channel::<Line>();

        let spawned = (|| {
            if let Some(stdout) = child.stdout.take() {
                let tx = tx.clone();
                thread::Builder::new()
                    .name("7z-stdout".into())
                    .spawn(move || {
                        pump(stdout, &tx, Line::Out);
                        let _ = tx.send(Line::OutClosed);
                    })?;
            }
            if let Some(stderr) = child.stderr.take() {
                let tx = tx.clone();
                thread::Builder::new()
                    .name("7z-stderr".into())
                    .spawn(move || pump(stderr, &tx, Line::Err))?;
            }
            let cancel = Arc::clone(&cancelled);
            thread::Builder::new()
                .name("7z-delivery".into())
                .spawn(move || deliver(rx, handler, &cancel))?;
            Ok::<(), io::Error>(())
        })();

        if let Err(e) = spawned {
            let _ = child.kill();
            let _ = child.wait();
            return Err(DriverError::Thread(e));
        }
        drop(tx);

        if let Some(mut stdin) = child.stdin.take() {
            let line = format!("{}\n", invocation.password.unwrap_or(""));
            if let Err(e) = stdin.write_all(line.as_bytes()) {
                // 7-Zip may already have exited (e.g. missing archive)
                debug!("Could not write password line: {}", e);
            }
        }

        self.child = Some(child);
        self.cancelled = cancelled;
        Ok(())
    }

    /// Whether the last spawned process is still running.
    pub fn is_running(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Kill the process if it is still running and stop delivering its output.
    pub fn terminate(&mut self) {
        self.cancelled.store(true, Ordering::Release);
        if let Some(mut child) = self.child.take() {
            match child.try_wait() {
                Ok(Some(_)) => {}
                Ok(None) => {
                    debug!("Killing 7-Zip process {}", child.id());
                    if let Err(e) = child.kill() {
                        warn!("Failed to kill 7-Zip process {}: {}", child.id(), e);
                    }
                    let _ = child.wait();
                }
                Err(e) => warn!("Failed to query 7-Zip process state: {}", e),
            }
        }
    }
}

impl Drop for ProcessDriver {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Read `stream` line by line into the channel. Invalid UTF-8 is replaced
/// rather than ending the stream.
fn pump<R: Read>(stream: R, tx: &Sender<Line>, wrap: fn(String) -> Line) {
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&buf);
                let line = text.trim_end_matches(['\n', '\r']).to_string();
                if tx.send(wrap(line)).is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!("7-Zip output stream ended with error: {}", e);
                break;
            }
        }
    }
}

fn deliver<H: LineHandler>(rx: std::sync::mpsc::Receiver<Line>, mut handler: H, cancelled: &AtomicBool) {
    let mut detached = false;
    // Keep draining after detaching so 7-Zip never blocks on a full pipe.
    for line in rx {
        if detached || cancelled.load(Ordering::Acquire) {
            continue;
        }
        let flow = match line {
            Line::Out(text) => handler.on_output(Some(&text)),
            Line::OutClosed => handler.on_output(None),
            Line::Err(text) => handler.on_error(&text),
        };
        detached = flow == Flow::Detach;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::sync::Mutex;
    use std::time::Duration;

    struct Recorder {
        out: Arc<Mutex<Vec<String>>>,
        err: Arc<Mutex<Vec<String>>>,
        done: mpsc::Sender<()>,
        detach_on: Option<&'static str>,
    }

    impl LineHandler for Recorder {
        fn on_output(&mut self, line: Option<&str>) -> Flow {
            match line {
                Some(l) => {
                    self.out.lock().unwrap().push(l.to_string());
                    if self.detach_on == Some(l) {
                        let _ = self.done.send(());
                        return Flow::Detach;
                    }
                }
                None => {
                    let _ = self.done.send(());
                }
            }
            Flow::Continue
        }

        fn on_error(&mut self, line: &str) -> Flow {
            self.err.lock().unwrap().push(line.to_string());
            Flow::Continue
        }
    }

    #[test]
    fn test_list_args() {
        let inv = Invocation {
            mode: Mode::Inspect,
            archive: Path::new("/dl/product.zip"),
            password: None,
            output_dir: Some(Path::new("/ignored")),
        };
        let args: Vec<String> = inv.args().iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(args, vec!["l", "-aoa", "-slt", "-bd", "/dl/product.zip"]);
    }

    #[test]
    fn test_extract_args() {
        let inv = Invocation {
            mode: Mode::Extract,
            archive: Path::new("/dl/product.zip"),
            password: Some("secret"),
            output_dir: Some(Path::new("/tmp/stage")),
        };
        let args: Vec<String> = inv.args().iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(args, vec!["x", "-aoa", "-slt", "-bd", "-o/tmp/stage", "/dl/product.zip"]);
    }

    #[test]
    fn test_spawn_failure_is_error() {
        let mut driver = ProcessDriver::new("/no/such/seven-zip-binary");
        let (done, _rx) = mpsc::channel();
        let handler = Recorder {
            out: Arc::default(),
            err: Arc::default(),
            done,
            detach_on: None,
        };
        let inv = Invocation {
            mode: Mode::Inspect,
            archive: Path::new("x.zip"),
            password: None,
            output_dir: None,
        };
        let result = driver.start(inv, handler);
        assert!(matches!(result, Err(DriverError::Spawn { .. })));
        assert!(!driver.is_running());
    }

    #[cfg(unix)]
    #[test]
    fn test_lines_and_password_delivered_in_order() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let script = crate::archive::test_support::write_script(
            dir.path(),
            "echo-tool",
            "read pw\necho \"first $1\"\necho \"pw=$pw\"\necho oops >&2\necho last\n",
        )?;

        let out = Arc::new(Mutex::new(Vec::new()));
        let err = Arc::new(Mutex::new(Vec::new()));
        let (done, rx) = mpsc::channel();
        let mut driver = ProcessDriver::new(&script);
        driver.start(
            Invocation {
                mode: Mode::Inspect,
                archive: Path::new("a.zip"),
                password: Some("hunter2"),
                output_dir: None,
            },
            Recorder {
                out: Arc::clone(&out),
                err: Arc::clone(&err),
                done,
                detach_on: None,
            },
        )?;

        rx.recv_timeout(Duration::from_secs(10))?;
        assert_eq!(*out.lock().unwrap(), vec!["first l", "pw=hunter2", "last"]);
        // stderr may trail stdout slightly
        for _ in 0..100 {
            if !err.lock().unwrap().is_empty() {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(*err.lock().unwrap(), vec!["oops"]);
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_detach_stops_callbacks() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let script = crate::archive::test_support::write_script(
            dir.path(),
            "chatty",
            "echo one\necho stop\necho two\necho three\n",
        )?;

        let out = Arc::new(Mutex::new(Vec::new()));
        let (done, rx) = mpsc::channel();
        let mut driver = ProcessDriver::new(&script);
        driver.start(
            Invocation {
                mode: Mode::Inspect,
                archive: Path::new("a.zip"),
                password: None,
                output_dir: None,
            },
            Recorder {
                out: Arc::clone(&out),
                err: Arc::default(),
                done,
                detach_on: Some("stop"),
            },
        )?;

        rx.recv_timeout(Duration::from_secs(10))?;
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(*out.lock().unwrap(), vec!["one", "stop"]);
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_terminate_kills_running_process() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let script = crate::archive::test_support::write_script(dir.path(), "sleeper", "sleep 30\n")?;

        let (done, _rx) = mpsc::channel();
        let mut driver = ProcessDriver::new(&script);
        driver.start(
            Invocation {
                mode: Mode::Inspect,
                archive: Path::new("a.zip"),
                password: None,
                output_dir: None,
            },
            Recorder {
                out: Arc::default(),
                err: Arc::default(),
                done,
                detach_on: None,
            },
        )?;
        assert!(driver.is_running());
        driver.terminate();
        assert!(!driver.is_running());
        Ok(())
    }
}
