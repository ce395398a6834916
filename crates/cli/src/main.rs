//! fsstream CLI - stream file system changes to stdout
//!
//! This binary provides the command-line interface for the fsstream system.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use fsstream_core::config::{StreamConfig, StreamSettings};
use fsstream_core::event::{Event, EventIdentifier};
use fsstream_watcher::{current_event_identifier, EventsManager};
use std::env;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Parser)]
#[command(name = "fsstream")]
#[command(about = "Ordered, resumable file system change streams")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print change records for directory trees until interrupted
    Watch(WatchArgs),
    /// Print the most recent event identifier
    CurrentId,
}

#[derive(Args, Debug, Default)]
struct WatchArgs {
    /// Directories to watch (defaults to the configured paths, then the
    /// current directory)
    paths: Vec<PathBuf>,

    /// Suppress changes under this path (repeatable)
    #[arg(short, long, value_name = "PATH")]
    exclude: Vec<PathBuf>,

    /// Coalescing window in seconds
    #[arg(long, value_name = "SECONDS")]
    latency: Option<f64>,

    /// Resume after this event identifier
    #[arg(long, value_name = "ID", conflicts_with = "cursor")]
    since: Option<u64>,

    /// Resume from, and save the last delivered identifier to, this file
    #[arg(long, value_name = "FILE")]
    cursor: Option<PathBuf>,

    /// Report only changes to the roots and their direct children
    #[arg(long)]
    no_subdirs: bool,

    /// Report individual files rather than their directories
    #[arg(long)]
    file_events: bool,

    /// Deliver the first change after a quiet period immediately
    #[arg(long)]
    no_defer: bool,

    /// Print records as JSON lines
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose)?;

    match cli.command {
        Some(Commands::Watch(args)) => watch(args, cli.config.as_deref()).await,
        Some(Commands::CurrentId) => {
            println!("{}", current_event_identifier());
            Ok(())
        }
        None => {
            println!("Run 'fsstream watch [PATHS]' to stream changes, or --help for more options");
            Ok(())
        }
    }
}

/// Initialize logging system
///
/// Logs go to stderr so stdout carries only change records.
fn init_logging(verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { "info" };

    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "fsstream={level},fsstream_core={level},fsstream_watcher={level}"
        ))
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}

async fn watch(args: WatchArgs, config_path: Option<&Path>) -> Result<()> {
    let settings = StreamSettings::load(config_path).context("Failed to load settings")?;
    let cursor = args.cursor.clone();
    let config = stream_config(&args, settings)?;
    let json = args.json;

    let mut manager = EventsManager::builder(config.watched_paths().iter().cloned())
        .config(config)
        .callback(move |_, event| print_event(event, json))
        .build()
        .context("Failed to open event stream")?;
    info!("{}", manager.describe());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for interrupt")?;
    info!("Interrupted; flushing pending changes");

    manager.flush_synchronously().await?;
    let last = manager.last_event();
    manager.close();

    if let (Some(path), Some(event)) = (cursor, last) {
        write_cursor(&path, event.identifier())?;
        info!("Saved cursor {} to {:?}", event.identifier(), path);
    }
    Ok(())
}

fn print_event(event: &Event, json: bool) {
    if !json {
        println!("{event}");
        return;
    }
    match serde_json::to_string(event) {
        Ok(line) => println!("{line}"),
        Err(e) => warn!("Failed to serialize record {}: {}", event.identifier(), e),
    }
}

/// Merge command line arguments over loaded settings
fn stream_config(args: &WatchArgs, mut settings: StreamSettings) -> Result<StreamConfig> {
    let cwd = env::current_dir().context("Failed to get current directory")?;

    if !args.paths.is_empty() {
        settings.watched_paths = args.paths.clone();
    }
    if settings.watched_paths.is_empty() {
        settings.watched_paths.push(cwd.clone());
    }
    settings.watched_paths = settings
        .watched_paths
        .iter()
        .map(|path| resolve(&cwd, path))
        .collect();

    settings.excluded_paths.extend(args.exclude.iter().cloned());
    settings.excluded_paths = settings
        .excluded_paths
        .iter()
        .map(|path| resolve(&cwd, path))
        .collect();

    if let Some(latency) = args.latency {
        settings.latency_secs = latency;
    }
    if args.no_subdirs {
        settings.ignore_sub_directories = true;
    }
    if args.file_events {
        settings.creation_flags.push("FILE_EVENTS".to_string());
    }
    if args.no_defer {
        settings.creation_flags.push("NO_DEFER".to_string());
    }

    if let Some(since) = args.since {
        settings.since = Some(since);
    } else if let Some(cursor) = &args.cursor {
        if let Some(since) = read_cursor(cursor)? {
            debug!("Resuming after {} from {:?}", since, cursor);
            settings.since = Some(since.value());
        }
    }

    Ok(settings.into_stream_config()?)
}

/// Absolute form of `path`, canonical when it exists
fn resolve(cwd: &Path, path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    };
    absolute.canonicalize().unwrap_or(absolute)
}

fn read_cursor(path: &Path) -> Result<Option<EventIdentifier>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read cursor file {path:?}"))?;
    let value = content
        .trim()
        .parse::<u64>()
        .map_err(|e| anyhow!("Invalid cursor in {path:?}: {e}"))?;
    Ok(Some(EventIdentifier::new(value)))
}

fn write_cursor(path: &Path, identifier: EventIdentifier) -> Result<()> {
    std::fs::write(path, format!("{}\n", identifier.value()))
        .with_context(|| format!("Failed to write cursor file {path:?}"))
}
