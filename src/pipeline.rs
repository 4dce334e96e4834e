//! Run orchestration
//!
//! Connects an [`InstructionSource`] to a bounded pool of link workers and
//! folds every outcome into a [`RunSummary`].

use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::error::RunError;
use crate::executor::{ExecuteOptions, ExecutionOutcome, LinkExecutor};
use crate::report::RunSummary;
use crate::scanner::{ScanOptions, ScanProgress};
use crate::source::{InstructionSource, InstructionStream};

/// Default number of instructions executed at once
pub const DEFAULT_LINK_WORKERS: usize = 64;

/// Everything a run needs besides its source
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Context directory for every source except recursive marker files
    pub working_dir: PathBuf,
    pub scan: ScanOptions,
    pub execute: ExecuteOptions,
    /// Maximum number of instructions executed concurrently
    pub link_workers: usize,
}

impl RunOptions {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            scan: ScanOptions::default(),
            execute: ExecuteOptions::default(),
            link_workers: DEFAULT_LINK_WORKERS,
        }
    }
}

/// Runs instruction sources through the link executor
#[derive(Debug, Clone)]
pub struct Pipeline {
    options: RunOptions,
    cancel: CancellationToken,
}

/// A pipeline run in progress
pub struct Run {
    /// Scan counters, present when the source is recursive
    pub progress: Option<Arc<ScanProgress>>,
    handle: JoinHandle<Result<RunSummary, RunError>>,
}

impl Run {
    pub async fn finish(self) -> Result<RunSummary, RunError> {
        self.handle
            .await
            .map_err(|e| RunError::WorkerPanicked(e.to_string()))?
    }
}

impl Pipeline {
    pub fn new(options: RunOptions) -> Self {
        Self {
            options,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop taking new work once `cancel` fires; in-flight work drains
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Start a run on the current tokio runtime
    pub fn start(&self, source: InstructionSource) -> Run {
        tracing::debug!(mode = source.name(), "Starting run");
        let stream = source.spawn(
            self.options.working_dir.clone(),
            self.options.scan.clone(),
            self.cancel.clone(),
        );
        let progress = stream.progress.clone();
        let executor = LinkExecutor::new(self.options.execute);
        let handle = tokio::spawn(drive(
            stream,
            executor,
            self.options.link_workers,
            self.cancel.clone(),
        ));
        Run { progress, handle }
    }

    /// Run `source` to completion
    pub async fn run(&self, source: InstructionSource) -> Result<RunSummary, RunError> {
        self.start(source).finish().await
    }
}

async fn drive(
    mut stream: InstructionStream,
    executor: LinkExecutor,
    workers: usize,
    cancel: CancellationToken,
) -> Result<RunSummary, RunError> {
    let permits = Arc::new(Semaphore::new(workers.max(1)));
    let mut tasks: JoinSet<ExecutionOutcome> = JoinSet::new();
    let mut summary = RunSummary::default();

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::warn!("Cancelled, waiting for in-flight instructions");
                break;
            }
            Some(joined) = tasks.join_next() => {
                let outcome = joined.map_err(|e| RunError::WorkerPanicked(e.to_string()))?;
                summary.record(&outcome);
            }
            next = stream.instructions.recv() => {
                let Some(instruction) = next else { break };
                let permit = tokio::select! {
                    permit = Arc::clone(&permits).acquire_owned() => permit,
                    _ = cancel.cancelled() => break,
                };
                let Ok(permit) = permit else { break };
                tracing::debug!(instruction = %instruction, "Processing");
                tasks.spawn_blocking(move || {
                    let _permit = permit;
                    executor.execute(instruction)
                });
            }
        }
    }

    while let Some(joined) = tasks.join_next().await {
        let outcome = joined.map_err(|e| RunError::WorkerPanicked(e.to_string()))?;
        summary.record(&outcome);
    }

    let stats = stream.finish().await?;
    summary.attach_source(stats);
    Ok(summary)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn options(cwd: &std::path::Path) -> RunOptions {
        let mut options = RunOptions::new(cwd);
        options.link_workers = 4;
        options.scan.workers = 8;
        options
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_args_run_creates_links() {
        let temp_dir = TempDir::new().unwrap();
        let cwd = temp_dir.path();
        fs::write(cwd.join("a"), "a").unwrap();
        fs::write(cwd.join("b"), "b").unwrap();

        let source = InstructionSource::Args(vec![
            "a,link-a".to_string(),
            "b,link-b".to_string(),
            "missing,link-c".to_string(),
        ]);
        let summary = Pipeline::new(options(cwd)).run(source).await.unwrap();

        assert_eq!(summary.processed, 3);
        assert_eq!(summary.linked, 2);
        assert_eq!(summary.failed, 1);
        assert!(!summary.is_failure());
        assert_eq!(fs::read_to_string(cwd.join("link-a")).unwrap(), "a");
        assert!(fs::symlink_metadata(cwd.join("link-c")).is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_recursive_run_links_relative_to_each_marker() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        for name in ["x", "y/z"] {
            let dir = root.join(name);
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join("data"), name).unwrap();
            fs::write(dir.join("sync"), "data,linked\n").unwrap();
        }

        let elsewhere = TempDir::new().unwrap();
        let summary = Pipeline::new(options(elsewhere.path()))
            .run(InstructionSource::Recursive(root.to_path_buf()))
            .await
            .unwrap();

        assert_eq!(summary.linked, 2);
        assert_eq!(fs::read_to_string(root.join("x/linked")).unwrap(), "x");
        assert_eq!(fs::read_to_string(root.join("y/z/linked")).unwrap(), "y/z");
        assert_eq!(summary.source.unwrap().markers, 2);
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let cwd = temp_dir.path();
        fs::write(cwd.join("a"), "a").unwrap();
        let pipeline = Pipeline::new(options(cwd));

        let first = pipeline
            .run(InstructionSource::Args(vec!["a,b".to_string()]))
            .await
            .unwrap();
        let second = pipeline
            .run(InstructionSource::Args(vec!["a,b".to_string()]))
            .await
            .unwrap();

        assert_eq!(first.linked, 1);
        assert_eq!(second.skipped, 1);
        assert_eq!(second.failed, 0);
    }

    #[tokio::test]
    async fn test_no_valid_instructions_is_failure() {
        let temp_dir = TempDir::new().unwrap();
        let summary = Pipeline::new(options(temp_dir.path()))
            .run(InstructionSource::Args(vec!["garbage".to_string()]))
            .await
            .unwrap();

        assert!(summary.is_failure());
        assert_eq!(summary.parse_errors, 1);
    }

    #[tokio::test]
    async fn test_fatal_source_error_surfaces() {
        let temp_dir = TempDir::new().unwrap();
        let result = Pipeline::new(options(temp_dir.path()))
            .run(InstructionSource::Recursive(temp_dir.path().join("nope")))
            .await;

        assert!(matches!(result, Err(RunError::Source(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_racing_instructions_on_one_target() {
        let temp_dir = TempDir::new().unwrap();
        let cwd = temp_dir.path();
        let mut args = Vec::new();
        for i in 0..16 {
            fs::write(cwd.join(format!("s{i}")), i.to_string()).unwrap();
            args.push(format!("s{i},shared,true"));
        }

        let summary = Pipeline::new(options(cwd))
            .run(InstructionSource::Args(args))
            .await
            .unwrap();

        assert_eq!(summary.processed, 16);
        assert!(summary.linked + summary.relinked >= 1);
        assert!(fs::symlink_metadata(cwd.join("shared")).unwrap().file_type().is_symlink());
    }

    #[tokio::test]
    async fn test_cancelled_pipeline_returns_summary() {
        let temp_dir = TempDir::new().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let summary = Pipeline::new(options(temp_dir.path()))
            .with_cancellation(cancel)
            .run(InstructionSource::Args(vec!["a,b".to_string()]))
            .await
            .unwrap();

        assert_eq!(summary.processed, 0);
    }
}
