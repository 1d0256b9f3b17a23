//! End-of-run report: one line per mapping entry plus totals.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::mapping::RejectedLine;
use crate::models::{MigrationResult, Outcome};

/// Per-outcome totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReportCounts {
    pub done: usize,
    pub failed: usize,
    /// Rejected mapping lines plus tasks cancelled before they started.
    pub skipped: usize,
    /// The cancelled share of `skipped`.
    pub cancelled: usize,
}

/// One rendered report line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportLine {
    /// Mapping line the entry belongs to.
    pub line: usize,
    pub outcome: Outcome,
    pub text: String,
}

/// Aggregated outcome of a batch.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub results: Vec<MigrationResult>,
    pub rejected: Vec<RejectedLine>,
    pub counts: ReportCounts,
}

impl MigrationReport {
    pub fn new(mut results: Vec<MigrationResult>, mut rejected: Vec<RejectedLine>) -> Self {
        results.sort_by_key(|r| r.line);
        rejected.sort_by_key(|r| r.line);

        let mut counts = ReportCounts {
            skipped: rejected.len(),
            ..ReportCounts::default()
        };
        for result in &results {
            match result.outcome {
                Outcome::Done => counts.done += 1,
                Outcome::Failed => counts.failed += 1,
                Outcome::Skipped => {
                    counts.skipped += 1;
                    counts.cancelled += 1;
                }
            }
        }

        Self {
            run_id: Uuid::new_v4(),
            generated_at: Utc::now(),
            results,
            rejected,
            counts,
        }
    }

    pub fn has_failures(&self) -> bool {
        self.counts.failed > 0
    }

    /// Whether shutdown left queued tasks unprocessed.
    pub fn was_interrupted(&self) -> bool {
        self.counts.cancelled > 0
    }

    /// Every task ran and none failed; rejected mapping lines do not count.
    pub fn is_success(&self) -> bool {
        !self.has_failures() && !self.was_interrupted()
    }

    /// One entry per task and rejected line, in mapping order.
    pub fn entries(&self) -> Vec<ReportLine> {
        let mut entries: Vec<ReportLine> = self
            .results
            .iter()
            .map(|r| ReportLine {
                line: r.line,
                outcome: r.outcome,
                text: render_result(r),
            })
            .chain(self.rejected.iter().map(|r| ReportLine {
                line: r.line,
                outcome: Outcome::Skipped,
                text: format!("line {} \"{}\": Skipped ({})", r.line, r.content, r.reason),
            }))
            .collect();
        entries.sort_by_key(|e| e.line);
        entries
    }

    /// The rendered text of [`entries`](Self::entries).
    pub fn lines(&self) -> Vec<String> {
        self.entries().into_iter().map(|e| e.text).collect()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} done, {} failed, {} skipped",
            self.counts.done, self.counts.failed, self.counts.skipped
        )
    }
}

fn render_result(result: &MigrationResult) -> String {
    let pair = format!("{} → {}", result.source, result.target);
    match result.outcome {
        Outcome::Done => format!("{}: Done", pair),
        Outcome::Failed => {
            let reason = result
                .error
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "unknown error".into());
            format!("{}: Failed ({})", pair, reason)
        }
        Outcome::Skipped => format!("{}: Skipped (cancelled)", pair),
    }
}

impl fmt::Display for MigrationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in self.lines() {
            writeln!(f, "{}", line)?;
        }
        write!(f, "{}", self.summary())
    }
}
