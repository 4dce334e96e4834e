//! Symbolic link creation
//!
//! Runs one [`LinkInstruction`] through the link protocol: check the source,
//! skip when already linked, refuse to clobber anything that is not a
//! symlink, then create the link. Every call yields exactly one outcome and
//! never panics on filesystem state.

use std::fs;
use std::io;
use std::path::Path;

use crate::error::LinkError;
use crate::instruction::LinkInstruction;

/// Options for executing instructions
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecuteOptions {
    /// Run the checks but leave the filesystem untouched
    pub dry_run: bool,
}

/// Why an instruction made no change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Source and target are already the same file
    AlreadyLinked,
    /// A change was needed but dry-run mode is active
    DryRun,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::AlreadyLinked => "already linked",
            SkipReason::DryRun => "dry run",
        }
    }
}

#[derive(Debug)]
pub enum LinkResult {
    /// A new symlink was created
    Linked,
    /// An existing symlink was replaced
    Relinked,
    Skipped(SkipReason),
    Failed(LinkError),
}

/// The single result of executing one instruction
#[derive(Debug)]
pub struct ExecutionOutcome {
    pub instruction: LinkInstruction,
    pub result: LinkResult,
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self.result, LinkResult::Linked | LinkResult::Relinked)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.result, LinkResult::Failed(_))
    }
}

/// Executes link instructions against the filesystem.
///
/// Holds no state between calls, so one executor can be shared by any number
/// of concurrent tasks.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinkExecutor {
    options: ExecuteOptions,
}

impl LinkExecutor {
    pub fn new(options: ExecuteOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> ExecuteOptions {
        self.options
    }

    /// Execute one instruction and report what happened
    pub fn execute(&self, instruction: LinkInstruction) -> ExecutionOutcome {
        let result = match self.apply(&instruction) {
            Ok(result) => result,
            Err(e) => LinkResult::Failed(e),
        };
        ExecutionOutcome {
            instruction,
            result,
        }
    }

    fn apply(&self, instruction: &LinkInstruction) -> Result<LinkResult, LinkError> {
        let source = instruction.source.as_path();
        let target = instruction.target.as_path();

        // The source itself may be a symlink; only its own entry must exist.
        if fs::symlink_metadata(source).is_err() {
            return Err(LinkError::SourceMissing);
        }

        if same_file(source, target) {
            return Ok(LinkResult::Skipped(SkipReason::AlreadyLinked));
        }

        // Any lstat failure means "absent"; creating the link reports the cause.
        let mut replacing = false;
        if fs::symlink_metadata(target).is_ok() {
            if !instruction.force {
                return Err(LinkError::TargetExists);
            }
            let meta = fs::symlink_metadata(target).map_err(LinkError::SymlinkProbeFailed)?;
            if !meta.file_type().is_symlink() {
                return Err(LinkError::RefuseOverwriteRealFile);
            }
            if self.options.dry_run {
                return Ok(LinkResult::Skipped(SkipReason::DryRun));
            }
            tracing::debug!(target = %target.display(), "Removing symlink");
            remove_symlink(target).map_err(LinkError::SymlinkRemoveFailed)?;
            replacing = true;
        }

        if self.options.dry_run {
            return Ok(LinkResult::Skipped(SkipReason::DryRun));
        }

        create_symlink(source, target).map_err(LinkError::LinkCreateFailed)?;

        Ok(if replacing {
            LinkResult::Relinked
        } else {
            LinkResult::Linked
        })
    }
}

/// Whether both paths resolve to the same underlying file. Missing paths
/// are never the same.
#[cfg(unix)]
pub fn same_file(lhs: &Path, rhs: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    match (fs::metadata(lhs), fs::metadata(rhs)) {
        (Ok(l), Ok(r)) => l.dev() == r.dev() && l.ino() == r.ino(),
        _ => false,
    }
}

#[cfg(not(unix))]
pub fn same_file(lhs: &Path, rhs: &Path) -> bool {
    match (fs::canonicalize(lhs), fs::canonicalize(rhs)) {
        (Ok(l), Ok(r)) => l == r,
        _ => false,
    }
}

#[cfg(unix)]
fn create_symlink(source: &Path, target: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(source, target)
}

#[cfg(windows)]
fn create_symlink(source: &Path, target: &Path) -> io::Result<()> {
    if source.is_dir() {
        std::os::windows::fs::symlink_dir(source, target)
    } else {
        std::os::windows::fs::symlink_file(source, target)
    }
}

#[cfg(unix)]
fn remove_symlink(target: &Path) -> io::Result<()> {
    fs::remove_file(target)
}

#[cfg(windows)]
fn remove_symlink(target: &Path) -> io::Result<()> {
    // Directory symlinks on Windows are removed like directories.
    fs::remove_file(target).or_else(|_| fs::remove_dir(target))
}
