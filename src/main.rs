//! Shoebox CLI: resumable Google Photos backup with album organization.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use shoebox::backup::{self, BackupOptions, ResetMode};
use shoebox::config::{DEFAULT_MAX_REQUESTS_PER_SESSION, DEFAULT_STATE_DIR};
use shoebox::remote::{HttpPhotoLibrary, TokenManager};
use shoebox::signal::spawn_shutdown_watcher;
use shoebox::state;
use shoebox::{AlbumNaming, ExistsPolicy};

#[derive(Parser, Debug)]
#[command(name = "shoebox")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "\
The service only exposes albums created by this tool, so --skip-existing and \
--merge-existing detect only albums this tool created; a folder name matching \
a pre-existing library album will still produce a second album.")]
struct Args {
    /// Directory to back up (required unless --list-states is given).
    directory: Option<PathBuf>,

    /// Skip albums that already exist.
    #[arg(long, conflicts_with = "merge_existing")]
    skip_existing: bool,

    /// Upload into existing albums with the same name.
    #[arg(long)]
    merge_existing: bool,

    /// Upload every file into one album with this name, ignoring directory
    /// structure.
    #[arg(long)]
    album_name: Option<String>,

    /// Include the base directory in album names:
    /// pics/south-america/brazil -> "pics-south-america-brazil".
    #[arg(long, conflicts_with = "album_name_leaf")]
    album_name_full: bool,

    /// Use only the leaf directory name: pics/south-america/brazil -> "brazil".
    #[arg(long)]
    album_name_leaf: bool,

    /// Show what would be uploaded without uploading.
    #[arg(long)]
    dry_run: bool,

    /// Verbose logging output.
    #[arg(short, long)]
    verbose: bool,

    /// Maximum API requests this session before stopping.
    #[arg(long, default_value_t = DEFAULT_MAX_REQUESTS_PER_SESSION)]
    max_requests: u64,

    /// Ignore the existing state file and start fresh.
    #[arg(long)]
    reset_state: bool,

    /// Reset only the quota counters to 0, keeping upload progress.
    #[arg(long, conflicts_with = "reset_state")]
    reset_quota_only: bool,

    /// Set the daily quota usage to a specific count (for example, from the
    /// provider's API console), keeping upload progress.
    #[arg(long, value_name = "COUNT", conflicts_with_all = ["reset_state", "reset_quota_only"])]
    set_quota_usage: Option<u64>,

    /// List all persisted backup states and exit.
    #[arg(long)]
    list_states: bool,

    /// Path to the OAuth credentials file.
    #[arg(long, default_value = "credentials.json")]
    credentials: PathBuf,

    /// Directory holding persisted state files.
    #[arg(long, default_value = DEFAULT_STATE_DIR)]
    state_dir: PathBuf,
}

impl Args {
    fn exists_policy(&self) -> ExistsPolicy {
        if self.skip_existing {
            ExistsPolicy::Skip
        } else if self.merge_existing {
            ExistsPolicy::Merge
        } else {
            ExistsPolicy::Stop
        }
    }

    fn naming(&self) -> AlbumNaming {
        if self.album_name_full {
            AlbumNaming::Full
        } else if self.album_name_leaf {
            AlbumNaming::Leaf
        } else {
            AlbumNaming::Relative
        }
    }

    fn reset_mode(&self) -> ResetMode {
        if self.reset_state {
            ResetMode::Full
        } else if self.reset_quota_only {
            ResetMode::QuotaOnly
        } else if let Some(count) = self.set_quota_usage {
            ResetMode::SetDailyUsage(count)
        } else {
            ResetMode::Resume
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn list_states(state_dir: &PathBuf) -> ExitCode {
    let overviews = state::list_states(state_dir).await;
    if overviews.is_empty() {
        println!("No backup states found.");
        return ExitCode::SUCCESS;
    }

    println!("Found {} backup state(s):\n", overviews.len());
    for overview in overviews {
        println!("State file: {}", overview.file_name);
        println!(
            "  Directory: {}",
            overview.base_directory.as_deref().unwrap_or("Unknown")
        );
        println!("  Files uploaded: {}", overview.uploaded);
        println!("  Files failed: {}", overview.failed);
        println!(
            "  Last updated: {}",
            overview.last_updated.as_deref().unwrap_or("Unknown")
        );
        println!();
    }
    ExitCode::SUCCESS
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);

    if args.list_states {
        return list_states(&args.state_dir).await;
    }

    let Some(directory) = args.directory.clone() else {
        eprintln!("Error: directory argument is required unless using --list-states");
        return ExitCode::FAILURE;
    };

    let mut options = BackupOptions::new(directory, args.state_dir.clone());
    options.exists_policy = args.exists_policy();
    options.naming = args.naming();
    options.custom_album = args.album_name.clone();
    options.max_session_requests = args.max_requests;
    options.reset = args.reset_mode();

    if args.dry_run {
        return match backup::run_preview(options).await {
            Ok(_) => {
                info!("Dry run completed successfully");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Dry run failed: {e}");
                ExitCode::FAILURE
            }
        };
    }

    let auth = match TokenManager::from_file(&args.credentials) {
        Ok(auth) => auth,
        Err(e) => {
            eprintln!("Failed to load credentials: {e}");
            return ExitCode::FAILURE;
        }
    };
    let library = Arc::new(HttpPhotoLibrary::new(auth));

    let shutdown = spawn_shutdown_watcher();

    match backup::run_backup(options, library, shutdown).await {
        Ok(report) if report.interrupted => {
            info!("Backup interrupted; progress saved");
            ExitCode::SUCCESS
        }
        Ok(report) if report.is_clean() => {
            info!("Backup completed successfully");
            ExitCode::SUCCESS
        }
        Ok(report) => {
            info!(failed = report.failed, "Backup completed with failures");
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("Backup failed: {e}");
            ExitCode::FAILURE
        }
    }
}
