//! linksync CLI
//!
//! Command-line interface for creating symlinks from instruction lines.

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use is_terminal::IsTerminal;
use std::env;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::Level;

use linksync::config::{Config, Overrides, Settings};
use linksync::scanner::ScanProgress;
use linksync::{ExecuteOptions, InstructionSource, Pipeline, RunOptions, RunSummary};

const PROGRESS_INTERVAL: Duration = Duration::from_millis(200);

/// Conventional status for a process stopped by SIGINT
const INTERRUPTED_EXIT_CODE: u8 = 130;

#[derive(Parser)]
#[command(name = "linksync")]
#[command(
    author,
    version,
    about = "Create symbolic links from source,target[,force] instruction lines"
)]
struct Cli {
    /// Find marker files under this directory and run each one's instructions
    #[arg(short, long, value_name = "DIR", env = "LINKSYNC_RECURSE")]
    recurse: Option<PathBuf>,

    /// Read instructions from a file
    #[arg(short, long, value_name = "FILE")]
    file: Option<PathBuf>,

    /// Path to configuration file (default: search for linksync.toml upward)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Marker file name used with --recurse
    #[arg(long, env = "LINKSYNC_MARKER")]
    marker: Option<String>,

    /// Number of directories scanned concurrently
    #[arg(long, env = "LINKSYNC_SCAN_WORKERS")]
    scan_workers: Option<usize>,

    /// Number of instructions executed concurrently
    #[arg(long, env = "LINKSYNC_LINK_WORKERS")]
    link_workers: Option<usize>,

    /// Check instructions without changing the filesystem
    #[arg(long)]
    dry_run: bool,

    /// Show scan progress
    #[arg(long)]
    progress: bool,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,

    /// Show detailed output
    #[arg(short, long, env = "LINKSYNC_DEBUG")]
    debug: bool,

    /// Instructions in the form source,target[,force]
    #[arg(value_name = "INSTRUCTION")]
    instructions: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let working_dir = env::current_dir().context("Failed to determine working directory")?;

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => match Config::find_config(&working_dir) {
            Some(path) => {
                tracing::debug!(config = %path.display(), "Using config");
                Config::load(&path)?
            }
            None => Config::default(),
        },
    };

    let settings = Settings::resolve(
        &config,
        Overrides {
            marker: cli.marker,
            scan_workers: cli.scan_workers,
            link_workers: cli.link_workers,
            progress: cli.progress,
        },
    )?;

    let source = InstructionSource::select(cli.recurse, cli.file, cli.instructions);

    let options = RunOptions {
        working_dir,
        scan: settings.scan_options(),
        execute: ExecuteOptions {
            dry_run: cli.dry_run,
        },
        link_workers: settings.link_workers,
    };

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, finishing in-flight work");
                cancel.cancel();
            }
        });
    }

    if cli.dry_run {
        eprintln!("{}", "Running in dry-run mode".cyan());
    }

    let run = Pipeline::new(options)
        .with_cancellation(cancel.clone())
        .start(source);

    let ticker = match (&run.progress, settings.progress) {
        (Some(progress), true) => Some(spawn_progress(Arc::clone(progress))),
        _ => None,
    };

    let result = run.finish().await;

    if let Some((stop, handle)) = ticker {
        stop.cancel();
        let _ = handle.await;
    }

    let summary = result.context("Failed to run instructions")?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }

    // An interrupted run reports what it got through, even if that is nothing.
    if cancel.is_cancelled() {
        if !cli.json {
            print_summary(&summary, true);
        }
        return Ok(ExitCode::from(INTERRUPTED_EXIT_CODE));
    }

    if summary.is_failure() {
        print_usage_hints();
        return Ok(ExitCode::FAILURE);
    }

    if !cli.json {
        print_summary(&summary, false);
    }

    Ok(ExitCode::SUCCESS)
}

fn init_logging(debug: bool) {
    let level = if debug { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr)
        .init();
}

/// Redraw scan counters on stderr until stopped
fn spawn_progress(
    progress: Arc<ScanProgress>,
) -> (CancellationToken, tokio::task::JoinHandle<()>) {
    let stop = CancellationToken::new();
    let handle = {
        let stop = stop.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(PROGRESS_INTERVAL);
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = interval.tick() => draw_progress(&progress),
                }
            }
            draw_progress(&progress);
            eprintln!();
        })
    };
    (stop, handle)
}

fn draw_progress(progress: &ScanProgress) {
    let snap = progress.snapshot();
    let mut stderr = std::io::stderr();
    let _ = write!(
        stderr,
        "\rFiles scanned: {}; Directories scanned: {}; Markers: {}; Workers: {}; Queued: {};",
        snap.files,
        snap.directories,
        snap.markers.to_string().cyan(),
        snap.active_workers,
        snap.queued
    );
    let _ = stderr.flush();
}

fn print_summary(summary: &RunSummary, cancelled: bool) {
    if cancelled {
        println!("\n{}", "Interrupted".yellow().bold());
    } else {
        println!("\n{}", "✨ Sync complete!".green().bold());
    }
    println!("{}", summary.render());
}

fn print_usage_hints() {
    let program = env::args()
        .next()
        .unwrap_or_else(|| "linksync".to_string());

    eprintln!("{} No input provided", "✘".red());
    eprintln!("Supply input as:");
    eprintln!(
        "  Arguments - {} {}",
        program,
        "<source>,<target>,<force?>".cyan()
    );
    eprintln!("  File      - {} -f {}", program, "<file>".cyan());
    eprintln!(
        "  Folder    - {} -r {} (finds 'sync' files recursively)",
        program,
        "<folder>".cyan()
    );
    eprintln!("  Stdin     - cat {} | {}", "<file>".cyan(), program);
}
