//! Outcome accounting for migrations.
//!
//! Every unit of work a pipeline attempts, one (entity, resource) pair
//! or one entity-level step, lands in the [`MigrationReport`] exactly
//! once. The report is append-only while a pipeline runs and immutable
//! once returned.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CaravelError, ErrorKind};
use crate::resources::ResourceType;

/// Why a unit of work transferred nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    /// The source holds no data of this type for this entity.
    NotApplicable,
    /// The store already has it and overwrite was off.
    AlreadyPresent,
    /// The transfer filter removed every file.
    FilteredOut,
    /// Incremental sync saw nothing newer than the watermark.
    UpToDate,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::NotApplicable => "not-applicable",
            SkipReason::AlreadyPresent => "already-present",
            SkipReason::FilteredOut => "filtered-out",
            SkipReason::UpToDate => "up-to-date",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Outcome {
    Succeeded,
    Skipped(SkipReason),
    Failed { kind: ErrorKind, message: String },
}

impl Outcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failed { .. })
    }
}

/// One attempted unit of work. `resource` is `None` for entity-level
/// steps: entity creation, symlink copies, enumeration failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportEntry {
    pub locator_path: String,
    pub resource: Option<ResourceType>,
    pub outcome: Outcome,
}

impl ReportEntry {
    pub fn succeeded(path: impl Into<String>, resource: Option<ResourceType>) -> ReportEntry {
        ReportEntry {
            locator_path: path.into(),
            resource,
            outcome: Outcome::Succeeded,
        }
    }

    pub fn skipped(
        path: impl Into<String>,
        resource: Option<ResourceType>,
        reason: SkipReason,
    ) -> ReportEntry {
        ReportEntry {
            locator_path: path.into(),
            resource,
            outcome: Outcome::Skipped(reason),
        }
    }

    pub fn failed(
        path: impl Into<String>,
        resource: Option<ResourceType>,
        error: &CaravelError,
    ) -> ReportEntry {
        ReportEntry {
            locator_path: path.into(),
            resource,
            outcome: Outcome::Failed {
                kind: error.kind(),
                message: error.to_string(),
            },
        }
    }
}

/// The full record of one migration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// In completion order within an entity; entities interleave under
    /// concurrency.
    pub entries: Vec<ReportEntry>,
}

impl MigrationReport {
    pub fn begin() -> MigrationReport {
        let now = Utc::now();
        MigrationReport {
            id: Uuid::new_v4(),
            started_at: now,
            finished_at: now,
            entries: Vec::new(),
        }
    }

    pub fn record(&mut self, entry: ReportEntry) {
        self.entries.push(entry);
    }

    pub fn extend(&mut self, entries: impl IntoIterator<Item = ReportEntry>) {
        self.entries.extend(entries);
    }

    /// Stamp the end time. Call once, when the pipeline is done.
    pub fn finish(mut self) -> MigrationReport {
        self.finished_at = Utc::now();
        self
    }

    /// True when nothing failed. Skips are not failures.
    pub fn is_success(&self) -> bool {
        !self.entries.iter().any(|e| e.outcome.is_failure())
    }

    pub fn failures(&self) -> impl Iterator<Item = &ReportEntry> {
        self.entries.iter().filter(|e| e.outcome.is_failure())
    }

    pub fn summary(&self) -> ReportSummary {
        let mut summary = ReportSummary::default();
        for entry in &self.entries {
            let counts = match entry.resource {
                Some(resource) => summary.resources.entry(resource).or_default(),
                None => &mut summary.entities,
            };
            match &entry.outcome {
                Outcome::Succeeded => {
                    counts.succeeded += 1;
                    summary.totals.succeeded += 1;
                }
                Outcome::Skipped(_) => {
                    counts.skipped += 1;
                    summary.totals.skipped += 1;
                }
                Outcome::Failed { .. } => {
                    counts.failed += 1;
                    summary.totals.failed += 1;
                }
            }
        }
        summary
    }

    /// Concatenate two reports into one, keeping this report's id and
    /// the widest time span. Entry order is preserved: all of `self`,
    /// then all of `other`.
    pub fn merge(mut self, other: MigrationReport) -> MigrationReport {
        self.started_at = self.started_at.min(other.started_at);
        self.finished_at = self.finished_at.max(other.finished_at);
        self.entries.extend(other.entries);
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeCounts {
    pub succeeded: u64,
    pub skipped: u64,
    pub failed: u64,
}

/// Per-resource tallies in resource order, plus entity-level steps and
/// grand totals. [`fmt::Display`] renders the summary table.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReportSummary {
    pub resources: BTreeMap<ResourceType, OutcomeCounts>,
    pub entities: OutcomeCounts,
    pub totals: OutcomeCounts,
}

impl fmt::Display for ReportSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<20} {:>9} {:>9} {:>9}",
            "resource", "succeeded", "skipped", "failed"
        )?;
        for (resource, counts) in &self.resources {
            writeln!(
                f,
                "{:<20} {:>9} {:>9} {:>9}",
                resource.as_str(),
                counts.succeeded,
                counts.skipped,
                counts.failed
            )?;
        }
        if self.entities != OutcomeCounts::default() {
            writeln!(
                f,
                "{:<20} {:>9} {:>9} {:>9}",
                "entities", self.entities.succeeded, self.entities.skipped, self.entities.failed
            )?;
        }
        write!(
            f,
            "{:<20} {:>9} {:>9} {:>9}",
            "total", self.totals.succeeded, self.totals.skipped, self.totals.failed
        )
    }
}
