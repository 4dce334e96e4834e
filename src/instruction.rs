//! Link instructions and their line format
//!
//! A line has the form `source,target[,force]`. Paths are resolved against
//! the instruction context directory the line was read under.

use colored::Colorize;
use regex::Regex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use crate::error::ParseError;
use crate::paths;

/// Field separator within an instruction line
pub const DELIMITER: char = ',';

// Anything starting with `t` or ending with `true`, case-insensitive
static FORCE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(?i:t)|(?i:true)$").unwrap());

/// A single request to link `target` to `source`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkInstruction {
    pub source: PathBuf,
    pub target: PathBuf,
    /// Permission to replace an existing symlink at `target`
    pub force: bool,
}

impl LinkInstruction {
    pub fn new(source: impl Into<PathBuf>, target: impl Into<PathBuf>, force: bool) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            force,
        }
    }

    /// Parse one instruction line, resolving relative paths against `context_dir`.
    pub fn parse(line: &str, context_dir: &Path) -> Result<Self, ParseError> {
        let mut parts = line.split(DELIMITER);
        let (Some(source), Some(target)) = (parts.next(), parts.next()) else {
            return Err(ParseError::MissingFields);
        };

        if is_blank_path(source) {
            return Err(ParseError::EmptyField("source"));
        }
        if is_blank_path(target) {
            return Err(ParseError::EmptyField("target"));
        }

        let force = parts.next().is_some_and(parse_force);

        Ok(Self {
            source: paths::resolve(source, context_dir),
            target: paths::resolve(target, context_dir),
            force,
        })
    }
}

fn is_blank_path(field: &str) -> bool {
    field.replace('"', "").trim().is_empty()
}

/// Interpret the third field of an instruction line
pub fn parse_force(field: &str) -> bool {
    FORCE_RE.is_match(field.trim())
}

/// Whether a raw input line carries no instruction at all
pub fn is_ignorable(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.is_empty() || trimmed.starts_with('#')
}

impl fmt::Display for LinkInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}{}{}",
            self.source.display().to_string().magenta(),
            DELIMITER,
            self.target.display().to_string().yellow(),
            DELIMITER,
            self.force
        )
    }
}
