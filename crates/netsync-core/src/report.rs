//! Run reports: per-type change counts, per-record failures and excluded
//! hosts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use uuid::Uuid;

use crate::cache::CacheStats;
use crate::handler::Operation;

/// Change counts for one record type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeCounts {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Present on both sides with identical attributes.
    pub unchanged: usize,
    /// Target-only records kept by the unmatched-destination rule.
    pub skipped: usize,
    /// Records whose handler returned an error.
    pub failed: usize,
    /// Operations the type does not permit.
    pub forbidden: usize,
}

impl TypeCounts {
    /// Returns the field-wise sum of two counts.
    pub fn merged(&self, other: &TypeCounts) -> TypeCounts {
        TypeCounts {
            created: self.created + other.created,
            updated: self.updated + other.updated,
            deleted: self.deleted + other.deleted,
            unchanged: self.unchanged + other.unchanged,
            skipped: self.skipped + other.skipped,
            failed: self.failed + other.failed,
            forbidden: self.forbidden + other.forbidden,
        }
    }

    /// Returns true if any record was created, updated or deleted.
    pub fn has_changes(&self) -> bool {
        self.created + self.updated + self.deleted > 0
    }
}

/// A handler failure for one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordFailure {
    pub kind: String,
    pub key: String,
    pub operation: Operation,
    /// Attributes that were being applied.
    #[serde(default)]
    pub attributes: serde_json::Value,
    pub message: String,
}

/// How the apply phase ended.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ApplyOutcome {
    /// Every change was attempted.
    #[default]
    Completed,
    /// Apply was not run (dry run).
    Skipped,
    /// A failure stopped the remaining changes.
    Aborted {
        kind: String,
        key: String,
        message: String,
        /// True when the failure was a contract violation rather than a
        /// per-record data problem.
        fatal: bool,
    },
}

impl ApplyOutcome {
    /// Returns true if the apply phase stopped early.
    pub fn is_aborted(&self) -> bool {
        matches!(self, ApplyOutcome::Aborted { .. })
    }
}

/// Result of the apply phase.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApplyReport {
    pub counts: BTreeMap<String, TypeCounts>,
    pub failures: Vec<RecordFailure>,
    pub outcome: ApplyOutcome,
}

impl ApplyReport {
    /// Returns the counts entry of a type, creating it on first use.
    pub fn counts_mut(&mut self, kind: &str) -> &mut TypeCounts {
        self.counts.entry(kind.to_string()).or_default()
    }

    /// Returns the counts of a type (zero when absent).
    pub fn counts_for(&self, kind: &str) -> TypeCounts {
        self.counts.get(kind).copied().unwrap_or_default()
    }

    /// Returns the sum over all types.
    pub fn totals(&self) -> TypeCounts {
        self.counts
            .values()
            .fold(TypeCounts::default(), |acc, c| acc.merged(c))
    }
}

/// Final report of one run, always produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub job: String,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Hosts excluded from the source store, with the reason.
    pub excluded_hosts: BTreeMap<String, String>,
    /// Fields that had no satisfying candidate, per host.
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub empty_fields: BTreeMap<String, Vec<String>>,
    pub counts: BTreeMap<String, TypeCounts>,
    pub failures: Vec<RecordFailure>,
    pub outcome: ApplyOutcome,
    /// Hosts whose primary address was restored after apply.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub repaired_primary_ips: Vec<String>,
    pub cache: CacheStats,
    /// Run-level error that prevented diff or apply.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunReport {
    /// Starts a report for a job.
    pub fn new(job: impl Into<String>, dry_run: bool) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            job: job.into(),
            dry_run,
            started_at: Utc::now(),
            finished_at: None,
            excluded_hosts: BTreeMap::new(),
            empty_fields: BTreeMap::new(),
            counts: BTreeMap::new(),
            failures: Vec::new(),
            outcome: if dry_run {
                ApplyOutcome::Skipped
            } else {
                ApplyOutcome::Completed
            },
            repaired_primary_ips: Vec::new(),
            cache: CacheStats::default(),
            error: None,
        }
    }

    /// Records an excluded host.
    pub fn exclude_host(&mut self, host: impl Into<String>, reason: impl ToString) {
        self.excluded_hosts.insert(host.into(), reason.to_string());
    }

    /// Copies the apply phase result into the report.
    pub fn record_apply(&mut self, apply: ApplyReport) {
        self.counts = apply.counts;
        self.failures = apply.failures;
        self.outcome = apply.outcome;
    }

    /// Stamps the finish time.
    pub fn finish(&mut self, cache: CacheStats) {
        self.cache = cache;
        self.finished_at = Some(Utc::now());
    }

    /// Returns true if the run completed without excluded hosts, failures
    /// or errors.
    pub fn is_clean(&self) -> bool {
        self.excluded_hosts.is_empty()
            && self.failures.is_empty()
            && self.error.is_none()
            && !self.outcome.is_aborted()
    }

    /// Returns the sum over all types.
    pub fn totals(&self) -> TypeCounts {
        self.counts
            .values()
            .fold(TypeCounts::default(), |acc, c| acc.merged(c))
    }

    /// Renders a human-readable summary.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Run {} ({}{})",
            self.run_id,
            self.job,
            if self.dry_run { ", dry run" } else { "" }
        );

        for (kind, c) in &self.counts {
            let _ = writeln!(
                out,
                "  {:<28} created={} updated={} deleted={} unchanged={} skipped={} failed={} forbidden={}",
                kind, c.created, c.updated, c.deleted, c.unchanged, c.skipped, c.failed, c.forbidden
            );
        }

        if !self.excluded_hosts.is_empty() {
            let _ = writeln!(out, "Excluded hosts:");
            for (host, reason) in &self.excluded_hosts {
                let _ = writeln!(out, "  {}: {}", host, reason);
            }
        }

        if !self.failures.is_empty() {
            let _ = writeln!(out, "Failures:");
            for failure in &self.failures {
                let _ = writeln!(
                    out,
                    "  {} {} '{}': {}",
                    failure.operation, failure.kind, failure.key, failure.message
                );
            }
        }

        for host in &self.repaired_primary_ips {
            let _ = writeln!(out, "Restored primary address on {}", host);
        }

        if let ApplyOutcome::Aborted { kind, key, message, .. } = &self.outcome {
            let _ = writeln!(out, "Aborted at {} '{}': {}", kind, key, message);
        }
        if let Some(error) = &self.error {
            let _ = writeln!(out, "Error: {}", error);
        }

        let _ = write!(
            out,
            "Cache: {} hits, {} misses",
            self.cache.hits, self.cache.misses
        );
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_type_counts_merge() {
        let a = TypeCounts {
            created: 1,
            deleted: 2,
            ..TypeCounts::default()
        };
        let b = TypeCounts {
            created: 3,
            unchanged: 4,
            ..TypeCounts::default()
        };
        let merged = a.merged(&b);
        assert_eq!(merged.created, 4);
        assert_eq!(merged.deleted, 2);
        assert_eq!(merged.unchanged, 4);
        assert!(merged.has_changes());
        assert!(!TypeCounts::default().has_changes());
    }

    #[test]
    fn test_run_report_serializes() {
        let mut report = RunReport::new("sync_network_data", false);
        report.exclude_host("leaf3", "device unreachable");
        report.counts.insert(
            "vlan".to_string(),
            TypeCounts {
                created: 2,
                ..TypeCounts::default()
            },
        );
        report.finish(CacheStats { hits: 3, misses: 1 });

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["job"], "sync_network_data");
        assert_eq!(json["excluded_hosts"]["leaf3"], "device unreachable");
        assert_eq!(json["counts"]["vlan"]["created"], 2);
        assert_eq!(json["outcome"]["status"], "completed");
        assert_eq!(json["cache"]["hits"], 3);
        assert!(!report.is_clean());
    }

    #[test]
    fn test_dry_run_outcome_is_skipped() {
        let report = RunReport::new("sync_devices", true);
        assert_eq!(report.outcome, ApplyOutcome::Skipped);
        assert!(report.render_text().contains("dry run"));
    }

    #[test]
    fn test_render_text_lists_failures() {
        let mut report = RunReport::new("sync_devices", false);
        report.record_apply(ApplyReport {
            counts: BTreeMap::new(),
            failures: vec![RecordFailure {
                kind: "device".to_string(),
                key: "leaf1".to_string(),
                operation: Operation::Create,
                attributes: serde_json::Value::Null,
                message: "Related platform not found for name=eos".to_string(),
            }],
            outcome: ApplyOutcome::Completed,
        });
        let text = report.render_text();
        assert!(text.contains("create device 'leaf1': Related platform not found"));
    }
}
