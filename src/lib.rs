//! linksync - declarative symbolic link creation
//!
//! Reads `source,target[,force]` instruction lines from a file, arguments,
//! stdin, or from `sync` marker files discovered across a directory tree,
//! and creates the requested symlinks concurrently. Existing targets are
//! only ever replaced when they are symlinks themselves.

pub mod config;
pub mod error;
pub mod executor;
pub mod instruction;
pub mod paths;
pub mod pipeline;
pub mod report;
pub mod scanner;
pub mod source;

pub use config::{Config, Settings};
pub use executor::{ExecuteOptions, ExecutionOutcome, LinkExecutor, LinkResult, SkipReason};
pub use instruction::LinkInstruction;
pub use pipeline::{Pipeline, RunOptions};
pub use report::RunSummary;
pub use scanner::{MarkerFile, ScanOptions, Scanner};
pub use source::InstructionSource;
