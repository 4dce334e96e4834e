//! Instruction sources
//!
//! Exactly one source feeds a run: marker files found under a directory, a
//! single instruction file, command-line arguments, or piped stdin. Each
//! line is parsed against its own context directory and sent on a bounded
//! channel to the executor.

use is_terminal::IsTerminal;
use serde::Serialize;
use std::borrow::Cow;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{ParseError, SourceError};
use crate::instruction::{self, LinkInstruction};
use crate::scanner::{Scan, ScanOptions, ScanProgress, ScanStats, Scanner};

const INSTRUCTION_CHANNEL_CAPACITY: usize = 256;

/// Where instructions come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstructionSource {
    /// Every marker file under a directory, each with its own context
    Recursive(PathBuf),
    /// One instruction file
    File(PathBuf),
    /// One instruction per argument
    Args(Vec<String>),
    /// Lines piped on standard input
    Stdin,
}

impl InstructionSource {
    /// Pick the active source. Recursion wins over a file, a file over
    /// arguments, and stdin is the fallback.
    pub fn select(recurse: Option<PathBuf>, file: Option<PathBuf>, args: Vec<String>) -> Self {
        if let Some(dir) = recurse {
            InstructionSource::Recursive(dir)
        } else if let Some(file) = file {
            InstructionSource::File(file)
        } else if !args.is_empty() {
            InstructionSource::Args(args)
        } else {
            InstructionSource::Stdin
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            InstructionSource::Recursive(_) => "recursive",
            InstructionSource::File(_) => "file",
            InstructionSource::Args(_) => "args",
            InstructionSource::Stdin => "stdin",
        }
    }

    /// Start producing instructions on the current tokio runtime.
    ///
    /// Relative paths are resolved against `working_dir`, except in
    /// recursive mode where each marker file's directory is used.
    pub fn spawn(
        self,
        working_dir: PathBuf,
        scan: ScanOptions,
        cancel: CancellationToken,
    ) -> InstructionStream {
        let (tx, instructions) = mpsc::channel(INSTRUCTION_CHANNEL_CAPACITY);

        let (progress, handle) = match self {
            InstructionSource::Recursive(dir) => {
                let root = crate::paths::clean(&working_dir.join(dir));
                tracing::info!(root = %root.display(), "Recursively finding marker files");
                let scan = Scanner::new(scan)
                    .with_cancellation(cancel.clone())
                    .spawn(root);
                let progress = std::sync::Arc::clone(&scan.progress);
                (
                    Some(progress),
                    tokio::spawn(read_markers(scan, tx, cancel)),
                )
            }
            InstructionSource::File(path) => {
                let path = crate::paths::clean(&working_dir.join(path));
                (None, tokio::spawn(read_file(path, working_dir, tx, cancel)))
            }
            InstructionSource::Args(args) => {
                (None, tokio::spawn(read_args(args, working_dir, tx, cancel)))
            }
            InstructionSource::Stdin => (None, tokio::spawn(read_stdin(working_dir, tx, cancel))),
        };

        InstructionStream {
            instructions,
            progress,
            handle,
        }
    }
}

/// Counters for everything a source read
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SourceStats {
    /// Marker files read (recursive mode only)
    pub markers: usize,
    /// Non-blank, non-comment lines seen
    pub lines: usize,
    pub instructions: usize,
    pub parse_errors: usize,
    /// Subdirectories the scan reported as unreadable
    pub skipped_dirs: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scan: Option<ScanStats>,
}

/// A running source. Drain `instructions` before awaiting [`InstructionStream::finish`].
pub struct InstructionStream {
    pub instructions: mpsc::Receiver<LinkInstruction>,
    /// Scan counters, present in recursive mode
    pub progress: Option<std::sync::Arc<ScanProgress>>,
    handle: JoinHandle<Result<SourceStats, SourceError>>,
}

impl InstructionStream {
    pub async fn finish(self) -> Result<SourceStats, SourceError> {
        let InstructionStream {
            instructions,
            handle,
            ..
        } = self;
        drop(instructions);
        handle
            .await
            .map_err(|e| SourceError::TaskFailed(e.to_string()))?
    }
}

/// Parse one raw line and send the instruction. Returns false once the
/// receiving side has gone away.
async fn emit(
    line: &[u8],
    context_dir: &Path,
    origin: &str,
    tx: &mpsc::Sender<LinkInstruction>,
    stats: &mut SourceStats,
) -> bool {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let text = String::from_utf8_lossy(line);
    if instruction::is_ignorable(&text) {
        return true;
    }
    stats.lines += 1;

    // Lossy decoding only borrows when the bytes were valid UTF-8.
    let parsed = match &text {
        Cow::Borrowed(valid) => LinkInstruction::parse(valid.trim(), context_dir),
        Cow::Owned(_) => Err(ParseError::NotUtf8),
    };

    match parsed {
        Ok(inst) => {
            stats.instructions += 1;
            tx.send(inst).await.is_ok()
        }
        Err(e) => {
            stats.parse_errors += 1;
            tracing::warn!(origin, line = %text, error = %e, "Error parsing line");
            true
        }
    }
}

async fn emit_bytes(
    contents: &[u8],
    context_dir: &Path,
    origin: &str,
    tx: &mpsc::Sender<LinkInstruction>,
    stats: &mut SourceStats,
    cancel: &CancellationToken,
) -> bool {
    for line in contents.split(|b| *b == b'\n') {
        if cancel.is_cancelled() || !emit(line, context_dir, origin, tx, stats).await {
            return false;
        }
    }
    true
}

async fn read_markers(
    mut scan: Scan,
    tx: mpsc::Sender<LinkInstruction>,
    cancel: CancellationToken,
) -> Result<SourceStats, SourceError> {
    let mut stats = SourceStats::default();

    loop {
        tokio::select! {
            Some(error) = scan.errors.recv() => {
                stats.skipped_dirs += 1;
                tracing::warn!(error = %error, "Skipping unreadable directory");
            }
            next = scan.markers.recv() => {
                let Some(marker) = next else { break };
                if cancel.is_cancelled() {
                    break;
                }
                stats.markers += 1;

                let contents = match tokio::fs::read(&marker.path).await {
                    Ok(contents) => contents,
                    Err(e) => {
                        tracing::warn!(file = %marker.path.display(), error = %e, "Failed to read marker file");
                        continue;
                    }
                };

                let before = stats.instructions;
                let origin = marker.path.display().to_string();
                if !emit_bytes(
                    &contents,
                    marker.context_dir(),
                    &origin,
                    &tx,
                    &mut stats,
                    &cancel,
                )
                .await
                {
                    break;
                }
                tracing::info!(
                    file = %origin,
                    instructions = stats.instructions - before,
                    "Read instructions from marker file"
                );
            }
        }
    }

    // Errors sent before the marker channel closed.
    while let Ok(error) = scan.errors.try_recv() {
        stats.skipped_dirs += 1;
        tracing::warn!(error = %error, "Skipping unreadable directory");
    }

    stats.scan = Some(scan.finish().await?);
    Ok(stats)
}

async fn read_file(
    path: PathBuf,
    working_dir: PathBuf,
    tx: mpsc::Sender<LinkInstruction>,
    cancel: CancellationToken,
) -> Result<SourceStats, SourceError> {
    tracing::info!(file = %path.display(), "Reading input from file");
    let contents = tokio::fs::read(&path)
        .await
        .map_err(|source| SourceError::Read {
            path: path.clone(),
            source,
        })?;

    let mut stats = SourceStats::default();
    let origin = path.display().to_string();
    emit_bytes(&contents, &working_dir, &origin, &tx, &mut stats, &cancel).await;
    tracing::info!(instructions = stats.instructions, "Read instructions from file");
    Ok(stats)
}

async fn read_args(
    args: Vec<String>,
    working_dir: PathBuf,
    tx: mpsc::Sender<LinkInstruction>,
    cancel: CancellationToken,
) -> Result<SourceStats, SourceError> {
    tracing::info!("Reading input from args");
    let mut stats = SourceStats::default();
    for arg in &args {
        if cancel.is_cancelled() || !emit(arg.as_bytes(), &working_dir, "args", &tx, &mut stats).await {
            break;
        }
    }
    tracing::info!(instructions = stats.instructions, "Read instructions from args");
    Ok(stats)
}

async fn read_stdin(
    working_dir: PathBuf,
    tx: mpsc::Sender<LinkInstruction>,
    cancel: CancellationToken,
) -> Result<SourceStats, SourceError> {
    if std::io::stdin().is_terminal() {
        tracing::debug!("Standard input is a terminal, not reading instructions from it");
        return Ok(SourceStats::default());
    }
    tracing::info!("Reading input from stdin");
    let stats = read_lines(
        BufReader::new(tokio::io::stdin()),
        &working_dir,
        "stdin",
        &tx,
        &cancel,
    )
    .await
    .map_err(|source| SourceError::Read {
        path: PathBuf::from("<stdin>"),
        source,
    })?;
    tracing::info!(instructions = stats.instructions, "Read instructions from stdin");
    Ok(stats)
}

/// Read instructions line by line from any buffered reader. Lines are split
/// on raw bytes, so one undecodable line does not end the stream.
pub async fn read_lines<R>(
    reader: R,
    context_dir: &Path,
    origin: &str,
    tx: &mpsc::Sender<LinkInstruction>,
    cancel: &CancellationToken,
) -> std::io::Result<SourceStats>
where
    R: AsyncBufRead + Unpin,
{
    let mut stats = SourceStats::default();
    let mut lines = reader.split(b'\n');
    while let Some(line) = lines.next_segment().await? {
        if cancel.is_cancelled() || !emit(&line, context_dir, origin, tx, &mut stats).await {
            break;
        }
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    async fn drain(source: InstructionSource, cwd: &Path) -> (Vec<LinkInstruction>, SourceStats) {
        let mut stream = source.spawn(
            cwd.to_path_buf(),
            ScanOptions::default(),
            CancellationToken::new(),
        );
        let mut out = Vec::new();
        while let Some(inst) = stream.instructions.recv().await {
            out.push(inst);
        }
        let stats = stream.finish().await.unwrap();
        out.sort_by(|a, b| a.source.cmp(&b.source));
        (out, stats)
    }

    #[test]
    fn test_select_priority() {
        let dir = Some(PathBuf::from("d"));
        let file = Some(PathBuf::from("f"));
        let args = vec!["a,b".to_string()];

        assert_eq!(
            InstructionSource::select(dir.clone(), file.clone(), args.clone()),
            InstructionSource::Recursive(PathBuf::from("d"))
        );
        assert_eq!(
            InstructionSource::select(None, file, args.clone()),
            InstructionSource::File(PathBuf::from("f"))
        );
        assert_eq!(
            InstructionSource::select(None, None, args.clone()),
            InstructionSource::Args(args)
        );
        assert_eq!(
            InstructionSource::select(None, None, Vec::new()),
            InstructionSource::Stdin
        );
    }

    #[tokio::test]
    async fn test_args_resolve_against_working_dir() {
        let temp_dir = TempDir::new().unwrap();
        let cwd = temp_dir.path();
        let args = vec![
            "src,dst".to_string(),
            "broken".to_string(),
            "/abs/src,out,true".to_string(),
        ];

        let (insts, stats) = drain(InstructionSource::Args(args), cwd).await;

        assert_eq!(stats.instructions, 2);
        assert_eq!(stats.parse_errors, 1);
        assert_eq!(insts.len(), 2);
        assert!(insts.iter().any(|i| i.source == cwd.join("src") && i.target == cwd.join("dst")));
        assert!(insts.iter().any(|i| i.target == cwd.join("out") && i.force));
    }

    #[tokio::test]
    async fn test_file_skips_blank_and_comment_lines() {
        let temp_dir = TempDir::new().unwrap();
        let cwd = temp_dir.path();
        let file = cwd.join("links.txt");
        fs::write(&file, "# header\n\na,b\r\nnot-an-instruction\nc,d,t\n").unwrap();

        let (insts, stats) = drain(InstructionSource::File(file), cwd).await;

        assert_eq!(insts.len(), 2);
        assert_eq!(stats.lines, 3);
        assert_eq!(stats.parse_errors, 1);
        assert_eq!(insts[0].target, cwd.join("b"));
        assert!(insts[1].force);
    }

    #[tokio::test]
    async fn test_file_with_undecodable_line_keeps_other_lines() {
        let temp_dir = TempDir::new().unwrap();
        let cwd = temp_dir.path();
        let file = cwd.join("links.txt");
        fs::write(&file, b"a,good\ncaf\xe9,bad\n# caf\xe9\n").unwrap();

        let (insts, stats) = drain(InstructionSource::File(file), cwd).await;

        assert_eq!(insts.len(), 1);
        assert_eq!(insts[0].target, cwd.join("good"));
        assert_eq!(stats.lines, 2);
        assert_eq!(stats.parse_errors, 1);
    }

    #[tokio::test]
    async fn test_marker_with_undecodable_line_keeps_other_lines() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("sync"), b"caf\xe9,bad\na,good\n").unwrap();

        let elsewhere = TempDir::new().unwrap();
        let (insts, stats) =
            drain(InstructionSource::Recursive(root.to_path_buf()), elsewhere.path()).await;

        assert_eq!(insts.len(), 1);
        assert_eq!(insts[0].target, root.join("good"));
        assert_eq!(stats.markers, 1);
        assert_eq!(stats.parse_errors, 1);
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_paths_with_quotes_and_backslashes_are_used_verbatim() {
        let temp_dir = TempDir::new().unwrap();
        let cwd = temp_dir.path();
        let odd = cwd.join("we\"ird\\dir");
        fs::create_dir(&odd).unwrap();
        fs::write(odd.join("sync"), "a,b\n").unwrap();
        fs::write(odd.join("links.txt"), "c,d\n").unwrap();

        let (insts, stats) =
            drain(InstructionSource::Recursive(PathBuf::from("we\"ird\\dir")), cwd).await;
        assert_eq!(stats.markers, 1);
        assert_eq!(insts[0].target, odd.join("b"));

        let (insts, _) = drain(
            InstructionSource::File(PathBuf::from("we\"ird\\dir/links.txt")),
            cwd,
        )
        .await;
        assert_eq!(insts.len(), 1);
        assert_eq!(insts[0].target, cwd.join("d"));
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_recursive_counts_unreadable_directories() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("sync"), "a,b\n").unwrap();
        let locked = root.join("locked");
        fs::create_dir(&locked).unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        // Privileged users can read the directory anyway.
        if fs::read_dir(&locked).is_ok() {
            fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let elsewhere = TempDir::new().unwrap();
        let (insts, stats) =
            drain(InstructionSource::Recursive(root.to_path_buf()), elsewhere.path()).await;
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        assert_eq!(insts.len(), 1);
        assert_eq!(stats.skipped_dirs, 1);
        assert_eq!(stats.scan.unwrap().errors, 1);
    }

    #[tokio::test]
    async fn test_missing_file_is_fatal() {
        let temp_dir = TempDir::new().unwrap();
        let stream = InstructionSource::File(temp_dir.path().join("nope")).spawn(
            temp_dir.path().to_path_buf(),
            ScanOptions::default(),
            CancellationToken::new(),
        );

        let err = stream.finish().await.unwrap_err();

        assert!(matches!(err, SourceError::Read { .. }));
    }

    #[tokio::test]
    async fn test_recursive_uses_marker_directory_as_context() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("one")).unwrap();
        fs::create_dir_all(root.join("two/deeper")).unwrap();
        fs::write(root.join("one/sync"), "a,b\n").unwrap();
        fs::write(root.join("two/deeper/sync"), "a,b\n../c,d\n").unwrap();

        let elsewhere = TempDir::new().unwrap();
        let (insts, stats) =
            drain(InstructionSource::Recursive(root.to_path_buf()), elsewhere.path()).await;

        assert_eq!(stats.markers, 2);
        assert_eq!(stats.instructions, 3);
        assert_eq!(stats.scan.unwrap().markers, 2);
        let pairs: Vec<_> = insts.iter().map(|i| (i.source.clone(), i.target.clone())).collect();
        assert!(pairs.contains(&(root.join("one/a"), root.join("one/b"))));
        assert!(pairs.contains(&(root.join("two/deeper/a"), root.join("two/deeper/b"))));
        assert!(pairs.contains(&(root.join("two/c"), root.join("two/deeper/d"))));
    }

    #[tokio::test]
    async fn test_recursive_missing_root_is_fatal() {
        let temp_dir = TempDir::new().unwrap();
        let stream = InstructionSource::Recursive(temp_dir.path().join("missing")).spawn(
            temp_dir.path().to_path_buf(),
            ScanOptions::default(),
            CancellationToken::new(),
        );

        let err = stream.finish().await.unwrap_err();

        assert!(matches!(err, SourceError::Scan(_)));
    }

    #[tokio::test]
    async fn test_read_lines_from_reader() {
        let input: &[u8] = b"x,y\n\n# skip\nbad\n";
        let (tx, mut rx) = mpsc::channel(8);

        let stats = read_lines(
            input,
            Path::new("/ctx"),
            "test",
            &tx,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        drop(tx);

        assert_eq!(stats.instructions, 1);
        assert_eq!(stats.parse_errors, 1);
        let inst = rx.recv().await.unwrap();
        assert!(inst.source.ends_with("x"));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_read_lines_survives_undecodable_bytes() {
        let input: &[u8] = b"\xff\xfe,x\nc,d\r\n";
        let (tx, mut rx) = mpsc::channel(8);

        let stats = read_lines(
            input,
            Path::new("/ctx"),
            "test",
            &tx,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        drop(tx);

        assert_eq!(stats.parse_errors, 1);
        assert_eq!(stats.instructions, 1);
        assert_eq!(rx.recv().await.unwrap().target, Path::new("/ctx/d"));
    }

    #[tokio::test]
    async fn test_cancelled_source_stops_emitting() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (tx, mut rx) = mpsc::channel(8);

        let stats = read_lines(&b"a,b\nc,d\n"[..], Path::new("/"), "test", &tx, &cancel)
            .await
            .unwrap();
        drop(tx);

        assert_eq!(stats.instructions, 0);
        assert!(rx.recv().await.is_none());
    }
}
