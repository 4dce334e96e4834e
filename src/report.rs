//! Outcome aggregation
//!
//! Tallies every [`ExecutionOutcome`] of a run, logs each one with enough
//! context to diagnose it, and decides whether the run as a whole failed.

use colored::Colorize;
use serde::Serialize;

use crate::executor::{ExecutionOutcome, LinkResult, SkipReason};
use crate::source::SourceStats;

/// Totals for a whole run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Instructions that reached the executor
    pub processed: usize,
    pub linked: usize,
    pub relinked: usize,
    pub skipped: usize,
    pub failed: usize,
    pub parse_errors: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceStats>,
}

impl RunSummary {
    /// Count and log one outcome
    pub fn record(&mut self, outcome: &ExecutionOutcome) {
        self.processed += 1;
        let inst = &outcome.instruction;

        match &outcome.result {
            LinkResult::Linked => {
                self.linked += 1;
                tracing::info!(
                    source = %inst.source.display(),
                    target = %inst.target.display(),
                    "Created symlink"
                );
            }
            LinkResult::Relinked => {
                self.relinked += 1;
                tracing::info!(
                    source = %inst.source.display(),
                    target = %inst.target.display(),
                    "Replaced symlink"
                );
            }
            LinkResult::Skipped(reason) => {
                self.skipped += 1;
                match reason {
                    SkipReason::AlreadyLinked => tracing::debug!(
                        source = %inst.source.display(),
                        target = %inst.target.display(),
                        "Source and target are the same, nothing to do"
                    ),
                    SkipReason::DryRun => tracing::info!(
                        source = %inst.source.display(),
                        target = %inst.target.display(),
                        force = inst.force,
                        "Would link"
                    ),
                }
            }
            LinkResult::Failed(error) => {
                self.failed += 1;
                tracing::error!(
                    source = %inst.source.display(),
                    target = %inst.target.display(),
                    force = inst.force,
                    kind = error.kind(),
                    error = %error,
                    "Failed processing instruction"
                );
            }
        }
    }

    /// Fold in what the instruction source reported
    pub fn attach_source(&mut self, stats: SourceStats) {
        self.parse_errors = stats.parse_errors;
        self.source = Some(stats);
    }

    /// No instruction was supplied by any source. An interrupted run can
    /// have read instructions that never reached the executor.
    pub fn is_empty(&self) -> bool {
        match &self.source {
            Some(stats) => stats.instructions == 0,
            None => self.processed == 0,
        }
    }

    /// Whether the process should exit with failure. Only a run without any
    /// instruction fails; individual instruction failures do not.
    pub fn is_failure(&self) -> bool {
        self.is_empty()
    }

    /// Human readable one-line summary
    pub fn render(&self) -> String {
        format!(
            "  Linked: {}, Relinked: {}, Skipped: {}, Failed: {}, Parse errors: {}",
            self.linked.to_string().green(),
            self.relinked.to_string().yellow(),
            self.skipped.to_string().dimmed(),
            if self.failed > 0 {
                self.failed.to_string().red()
            } else {
                self.failed.to_string().dimmed()
            },
            if self.parse_errors > 0 {
                self.parse_errors.to_string().red()
            } else {
                self.parse_errors.to_string().dimmed()
            }
        )
    }
}
