//! Error types for linksync
//!
//! Every failure the engine can report is one of these enums. Per-line,
//! per-instruction and per-subtree errors are recovered by their callers;
//! only the ones documented as fatal end a run.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// A line that could not be turned into a link instruction
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid format - not enough parameters (must have at least source and target)")]
    MissingFields,
    #[error("{0} path is empty")]
    EmptyField(&'static str),
    #[error("line is not valid UTF-8")]
    NotUtf8,
}

/// Why a single link instruction failed
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("instruction source does not exist")]
    SourceMissing,
    #[error("target exists - handle manually or set the 'force' flag (3rd field)")]
    TargetExists,
    #[error("refusing to delete actual (non symlink) file")]
    RefuseOverwriteRealFile,
    #[error("could not determine whether target is a symlink: {0}")]
    SymlinkProbeFailed(#[source] io::Error),
    #[error("failed removing existing symlink: {0}")]
    SymlinkRemoveFailed(#[source] io::Error),
    #[error("failed creating symlink: {0}")]
    LinkCreateFailed(#[source] io::Error),
}

impl LinkError {
    /// Short stable name of the failure kind, used in logs and summaries
    pub fn kind(&self) -> &'static str {
        match self {
            LinkError::SourceMissing => "source_missing",
            LinkError::TargetExists => "target_exists",
            LinkError::RefuseOverwriteRealFile => "refuse_overwrite_real_file",
            LinkError::SymlinkProbeFailed(_) => "symlink_probe_failed",
            LinkError::SymlinkRemoveFailed(_) => "symlink_remove_failed",
            LinkError::LinkCreateFailed(_) => "link_create_failed",
        }
    }
}

/// Errors raised while walking a tree for marker files
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("failed reading directory {}: {source}", path.display())]
    DirectoryRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot scan root directory {}: {source}", path.display())]
    RootUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("scan root {} is not a directory", .0.display())]
    RootNotDirectory(PathBuf),
    #[error("scan worker panicked: {0}")]
    WorkerPanicked(String),
}

impl ScanError {
    /// Whether this error ends the whole scan
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ScanError::DirectoryRead { .. })
    }
}

/// Errors that stop an instruction source from producing anything more
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to read instructions from {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error("instruction source task failed: {0}")]
    TaskFailed(String),
}

/// Errors loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Errors that end a pipeline run
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("link worker panicked: {0}")]
    WorkerPanicked(String),
}
