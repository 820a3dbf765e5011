//! daz-installer - DAZ Studio content archive installer
//!
//! Lists and installs DAZ content archives (zip, rar, 7z, and archives
//! nested inside them) into a content library using the 7-Zip CLI.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use daz_installer::archive::{ArchiveContext, Entry, Notifier, ProgressEvent};
use daz_installer::config::EngineConfig;
use daz_installer::installer::{self, Installer};
use daz_installer::settings::Settings;
use indicatif::{HumanBytes, ProgressBar, ProgressStyle};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "daz-installer")]
#[command(version)]
#[command(about = "Install DAZ Studio content archives into a content library")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging (use RUST_LOG=debug for more detail)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Also write the log to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Path to the 7-Zip binary (7zz, 7za or 7z)
    #[arg(long, global = true, env = "DAZ_INSTALLER_7Z")]
    seven_zip: Option<PathBuf>,

    /// Seconds to wait for each 7-Zip run
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// List the contents of an archive
    Inspect {
        /// Path to the archive
        archive: PathBuf,

        /// Archive password
        #[arg(short, long)]
        password: Option<String>,
    },

    /// Install an archive into a content library
    Install {
        /// Path to the archive
        archive: PathBuf,

        /// Content library directory (defaults to the one in settings)
        #[arg(short, long)]
        dest: Option<PathBuf>,

        /// Directory for staging extracted files
        #[arg(long)]
        temp: Option<PathBuf>,

        /// Archive password
        #[arg(short, long)]
        password: Option<String>,

        /// Leave staging directories in place
        #[arg(long)]
        keep_staging: bool,
    },
}

/// Prints the encryption notice for the user.
struct ConsoleNotifier {
    spinner: ProgressBar,
}

impl Notifier for ConsoleNotifier {
    fn unsupported_encryption(&self, archive_name: &str) {
        self.spinner.suspend(|| {
            eprintln!(
                "Unfortunately, {} is encrypted and encrypted archives are not supported yet.",
                archive_name
            );
        });
    }
}

fn init_logging(verbose: bool, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::from_default_env().add_directive(if verbose {
        "daz_installer=debug".parse()?
    } else {
        "daz_installer=warn".parse()?
    });

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path.parent().filter(|d| !d.as_os_str().is_empty()).unwrap_or(Path::new("."));
            let name = path.file_name().context("Log file path has no file name")?;
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            (Some(fmt::layer().with_ansi(false).with_writer(writer)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    Ok(guard)
}

fn spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {wide_msg}") {
        pb.set_style(style);
    }
    pb
}

fn build_context(config: EngineConfig, pb: &ProgressBar) -> Result<ArchiveContext> {
    let progress_pb = pb.clone();
    let ctx = ArchiveContext::new(config)?
        .with_notifier(Arc::new(ConsoleNotifier { spinner: pb.clone() }))
        .with_progress(Arc::new(move |event| match event {
            ProgressEvent::Status(message) => progress_pb.set_message(message),
            ProgressEvent::Style { busy: true } => progress_pb.enable_steady_tick(Duration::from_millis(100)),
            ProgressEvent::Style { busy: false } => progress_pb.disable_steady_tick(),
        }));
    Ok(ctx)
}

fn print_tree(handle: &daz_installer::archive::ArchiveHandle) {
    handle.tree().walk(|depth, entry| {
        let indent = "  ".repeat(depth + 1);
        match entry {
            Entry::Folder(folder) => println!("{}{}", indent, folder.path),
            Entry::File(file) => println!("{}{}  ({})", indent, file.path, HumanBytes(file.size)),
            Entry::Archive(archive) => println!("{}{}  [archive]", indent, archive.relative_path()),
        }
    });
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_logging(cli.verbose, cli.log_file.as_deref())?;

    let settings = Settings::load();
    let mut config = settings.to_config();
    if let Some(tool) = cli.seven_zip {
        config.seven_zip = Some(tool);
    }
    if let Some(secs) = cli.timeout_secs {
        config.timeout = Duration::from_secs(secs);
    }

    match cli.command {
        Commands::Inspect { archive, password } => {
            let pb = spinner();
            let ctx = Arc::new(build_context(config, &pb)?);
            let handle = installer::inspect(&ctx, &archive, password.as_deref())?;
            pb.finish_and_clear();

            println!("{}", handle.display_name());
            print_tree(&handle);
            println!();
            println!(
                "Files: {}  Folders: {}  Nested archives: {}  Size: {}",
                handle.tree().files().count(),
                handle.tree().folders().count(),
                handle.tree().archives().count(),
                HumanBytes(handle.total_size())
            );
            if handle.is_encrypted() || handle.is_header_encrypted() {
                println!("Archive is encrypted; listing stopped early.");
            } else if handle.inspect_errored() {
                println!("7-Zip reported errors while listing this archive.");
            } else if !handle.inspect_finished() {
                println!("Listing did not complete in time.");
            }
        }

        Commands::Install {
            archive,
            dest,
            temp,
            password,
            keep_staging,
        } => {
            let dest = dest
                .or_else(|| settings.default_library())
                .context("No destination given and no default library configured")?;
            if let Some(temp) = temp {
                config.temp_root = temp;
            }
            if keep_staging {
                config.cleanup_staging = false;
            }

            let pb = spinner();
            let installer = Installer::new(build_context(config, &pb)?, &dest)?;
            let stats = installer.install(&archive, password.as_deref())?;
            pb.finish_and_clear();

            println!("=== Installation Summary ===");
            println!("Destination: {}", installer.destination().display());
            println!(
                "Archives:    {} ({} nested, {} skipped, {} missing)",
                stats.archives, stats.nested, stats.nested_skipped, stats.nested_missing
            );
            println!(
                "Files:       {} installed, {} failed, {} listed ({})",
                stats.files_installed,
                stats.files_failed,
                stats.files_listed,
                HumanBytes(stats.total_size)
            );
            println!("Assets read: {}", stats.assets_read);
            if stats.encrypted > 0 {
                println!("\n{} encrypted archive(s) could not be installed.", stats.encrypted);
            }
            if stats.is_clean() {
                println!("\nInstallation complete!");
            } else {
                println!("\nInstallation incomplete. Check logs and run again.");
            }
        }
    }

    Ok(())
}
