//! Concurrent marker-file discovery
//!
//! Walks a directory tree with a bounded pool of async workers and reports
//! every file whose name equals the marker token. Workers pull directories
//! from a FIFO queue and push subdirectories back onto it.
//!
//! Completion is tracked with a pending-task counter that starts at 1 for the
//! root. A worker adds the number of subdirectories it found before queueing
//! them, and subtracts 1 once its own directory is done. The worker whose
//! decrement reaches zero wakes the coordinator, which joins every worker and
//! then drops the output senders.

use serde::Serialize;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore, mpsc};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::error::ScanError;

/// Default marker file name
pub const DEFAULT_MARKER: &str = "sync";

/// Default number of directories enumerated at once
pub const DEFAULT_SCAN_WORKERS: usize = 2048;

const MARKER_CHANNEL_CAPACITY: usize = 1024;

/// A discovered instruction file
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MarkerFile {
    pub path: PathBuf,
}

impl MarkerFile {
    /// Directory that relative paths inside this file are resolved against
    pub fn context_dir(&self) -> &Path {
        self.path.parent().unwrap_or(&self.path)
    }
}

/// One directory waiting to be enumerated
#[derive(Debug)]
pub struct ScanTask {
    pub dir: PathBuf,
    /// Distance from the scan root; the root is 0
    pub depth: usize,
}

#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// File name that marks an instruction file
    pub marker: String,
    /// Maximum number of directories enumerated concurrently
    pub workers: usize,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            marker: DEFAULT_MARKER.to_string(),
            workers: DEFAULT_SCAN_WORKERS,
        }
    }
}

/// Live counters, safe to read from any thread while a scan runs
#[derive(Debug, Default)]
pub struct ScanProgress {
    files: AtomicUsize,
    directories: AtomicUsize,
    markers: AtomicUsize,
    errors: AtomicUsize,
    active_workers: AtomicUsize,
    queued: AtomicUsize,
}

/// Point-in-time copy of [`ScanProgress`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub files: usize,
    pub directories: usize,
    pub markers: usize,
    pub active_workers: usize,
    pub queued: usize,
}

impl ScanProgress {
    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            files: self.files.load(Ordering::Relaxed),
            directories: self.directories.load(Ordering::Relaxed),
            markers: self.markers.load(Ordering::Relaxed),
            active_workers: self.active_workers.load(Ordering::Relaxed),
            queued: self.queued.load(Ordering::Relaxed),
        }
    }

    fn stats(&self, cancelled: bool) -> ScanStats {
        ScanStats {
            files: self.files.load(Ordering::Relaxed),
            directories: self.directories.load(Ordering::Relaxed),
            markers: self.markers.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            cancelled,
        }
    }
}

/// Totals for a finished scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanStats {
    pub files: usize,
    pub directories: usize,
    pub markers: usize,
    /// Subdirectories that could not be read
    pub errors: usize,
    pub cancelled: bool,
}

/// A running scan.
///
/// Drain `markers` before awaiting [`Scan::finish`]; workers wait on the
/// marker channel when it is full.
pub struct Scan {
    pub markers: mpsc::Receiver<MarkerFile>,
    pub errors: mpsc::UnboundedReceiver<ScanError>,
    pub progress: Arc<ScanProgress>,
    handle: JoinHandle<Result<ScanStats, ScanError>>,
}

impl Scan {
    /// Wait for the scan to end and return its totals or its fatal error
    pub async fn finish(self) -> Result<ScanStats, ScanError> {
        let Scan {
            markers, handle, ..
        } = self;
        drop(markers);
        handle
            .await
            .map_err(|e| ScanError::WorkerPanicked(e.to_string()))?
    }
}

/// Bounded, concurrent marker-file scanner
#[derive(Debug, Clone, Default)]
pub struct Scanner {
    options: ScanOptions,
    cancel: CancellationToken,
}

impl Scanner {
    pub fn new(options: ScanOptions) -> Self {
        Self {
            options,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop dispatching new directories once `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Start scanning `root` on the current tokio runtime
    pub fn spawn(&self, root: impl Into<PathBuf>) -> Scan {
        let (markers_tx, markers) = mpsc::channel(MARKER_CHANNEL_CAPACITY);
        let (errors_tx, errors) = mpsc::unbounded_channel();
        let progress = Arc::new(ScanProgress::default());

        let handle = tokio::spawn(coordinate(
            root.into(),
            self.options.clone(),
            markers_tx,
            errors_tx,
            Arc::clone(&progress),
            self.cancel.clone(),
        ));

        Scan {
            markers,
            errors,
            progress,
            handle,
        }
    }

    /// Scan `root` to completion and return every marker found
    pub async fn collect(
        &self,
        root: impl Into<PathBuf>,
    ) -> Result<(Vec<MarkerFile>, ScanStats), ScanError> {
        let mut scan = self.spawn(root);
        let mut found = Vec::new();
        while let Some(marker) = scan.markers.recv().await {
            found.push(marker);
        }
        let stats = scan.finish().await?;
        Ok((found, stats))
    }
}

/// State shared by the coordinator and its workers. Dropping the last
/// reference closes the marker and error channels.
struct Shared {
    marker: OsString,
    pending: AtomicUsize,
    done: Notify,
    queue: mpsc::UnboundedSender<ScanTask>,
    markers: mpsc::Sender<MarkerFile>,
    errors: mpsc::UnboundedSender<ScanError>,
    progress: Arc<ScanProgress>,
}

async fn coordinate(
    root: PathBuf,
    options: ScanOptions,
    markers: mpsc::Sender<MarkerFile>,
    errors: mpsc::UnboundedSender<ScanError>,
    progress: Arc<ScanProgress>,
    cancel: CancellationToken,
) -> Result<ScanStats, ScanError> {
    match tokio::fs::metadata(&root).await {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => return Err(ScanError::RootNotDirectory(root)),
        Err(source) => return Err(ScanError::RootUnreadable { path: root, source }),
    }

    let (queue, mut tasks) = mpsc::unbounded_channel();
    let shared = Arc::new(Shared {
        marker: OsString::from(options.marker),
        pending: AtomicUsize::new(1),
        done: Notify::new(),
        queue,
        markers,
        errors,
        progress: Arc::clone(&progress),
    });

    shared.progress.queued.fetch_add(1, Ordering::Relaxed);
    // The receiver is alive for the whole loop, so this cannot fail.
    let _ = shared.queue.send(ScanTask {
        dir: root.clone(),
        depth: 0,
    });

    let permits = Arc::new(Semaphore::new(options.workers.max(1)));
    let mut workers: JoinSet<Result<(), ScanError>> = JoinSet::new();
    let mut fatal: Option<ScanError> = None;
    let mut cancelled = false;

    tracing::debug!(root = %root.display(), workers = options.workers, "Starting scan");

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                cancelled = true;
                break;
            }
            _ = shared.done.notified() => break,
            Some(joined) = workers.join_next() => {
                if let Err(e) = flatten(joined) {
                    fatal = Some(e);
                    break;
                }
            }
            Some(task) = tasks.recv() => {
                let permit = tokio::select! {
                    permit = Arc::clone(&permits).acquire_owned() => permit,
                    _ = cancel.cancelled() => {
                        cancelled = true;
                        break;
                    }
                };
                let Ok(permit) = permit else { break };
                shared.progress.queued.fetch_sub(1, Ordering::Relaxed);
                workers.spawn(scan_directory(Arc::clone(&shared), task, permit));
            }
        }
    }

    // Let in-flight workers finish before the channels close.
    while let Some(joined) = workers.join_next().await {
        if let Err(e) = flatten(joined)
            && fatal.is_none()
        {
            fatal = Some(e);
        }
    }
    drop(tasks);
    drop(shared);

    if let Some(e) = fatal {
        return Err(e);
    }

    let stats = progress.stats(cancelled);
    tracing::debug!(
        files = stats.files,
        directories = stats.directories,
        markers = stats.markers,
        errors = stats.errors,
        cancelled = stats.cancelled,
        "Scan finished"
    );
    Ok(stats)
}

fn flatten(joined: Result<Result<(), ScanError>, JoinError>) -> Result<(), ScanError> {
    joined.map_err(|e| ScanError::WorkerPanicked(e.to_string()))?
}

async fn scan_directory(
    shared: Arc<Shared>,
    task: ScanTask,
    _permit: OwnedSemaphorePermit,
) -> Result<(), ScanError> {
    shared.progress.active_workers.fetch_add(1, Ordering::Relaxed);
    let result = enumerate(&shared, &task).await;
    shared.progress.active_workers.fetch_sub(1, Ordering::Relaxed);

    let outcome = match result {
        Ok(()) => Ok(()),
        Err(source) if task.depth == 0 => Err(ScanError::RootUnreadable {
            path: task.dir,
            source,
        }),
        Err(source) => {
            tracing::debug!(dir = %task.dir.display(), error = %source, "Error reading directory");
            shared.progress.errors.fetch_add(1, Ordering::Relaxed);
            let _ = shared.errors.send(ScanError::DirectoryRead {
                path: task.dir,
                source,
            });
            Ok(())
        }
    };

    if shared.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
        shared.done.notify_one();
    }
    outcome
}

/// Enumerate one directory: report markers, queue subdirectories.
async fn enumerate(shared: &Shared, task: &ScanTask) -> io::Result<()> {
    let mut entries = tokio::fs::read_dir(&task.dir).await?;
    shared.progress.directories.fetch_add(1, Ordering::Relaxed);

    let mut subdirs = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let file_type = match entry.file_type().await {
            Ok(t) => t,
            Err(e) => {
                tracing::debug!(path = %entry.path().display(), error = %e, "Skipping entry");
                continue;
            }
        };

        // Symlinked directories are not followed.
        if file_type.is_dir() {
            subdirs.push(entry.path());
            continue;
        }

        shared.progress.files.fetch_add(1, Ordering::Relaxed);
        if entry.file_name() == shared.marker {
            shared.progress.markers.fetch_add(1, Ordering::Relaxed);
            // A closed receiver means nobody wants more markers; keep walking
            // so the counter still settles.
            let _ = shared
                .markers
                .send(MarkerFile { path: entry.path() })
                .await;
        }
    }

    if subdirs.is_empty() {
        return Ok(());
    }

    shared.pending.fetch_add(subdirs.len(), Ordering::AcqRel);
    shared
        .progress
        .queued
        .fetch_add(subdirs.len(), Ordering::Relaxed);
    for dir in subdirs {
        let _ = shared.queue.send(ScanTask {
            dir,
            depth: task.depth + 1,
        });
    }
    Ok(())
}
