use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

/// Hard checks guard structure; soft checks guard data quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Hard,
    Soft,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Passed,
    CompletedWithWarnings,
    Failed,
}

impl std::fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ValidationStatus::Passed => "passed",
            ValidationStatus::CompletedWithWarnings => "completed with warnings",
            ValidationStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Where the rejected-row count used by the row-count check came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectedCountSource {
    Report,
    Manifest,
    Recount,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaIssue {
    pub file: PathBuf,
    pub column: String,
    pub expected: String,
    pub found: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MisplacedRows {
    pub partition: i32,
    pub rows: u64,
    /// Year of the first misplaced timestamp found
    pub example_year: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeExample {
    pub partition: i32,
    /// Zero-based row index within the partition file
    pub row: u64,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeFinding {
    pub column: String,
    pub min: f64,
    pub max: f64,
    pub checked: u64,
    pub out_of_range: u64,
    pub ratio: f64,
    pub examples: Vec<RangeExample>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NullComparison {
    pub column: String,
    pub source_null_pct: f64,
    pub destination_null_pct: f64,
    pub difference_pp: f64,
    pub within_tolerance: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnStats {
    pub count: u64,
    pub mean: Option<f64>,
    pub median: Option<f64>,
    pub std: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatComparison {
    pub column: String,
    pub source: ColumnStats,
    pub destination: ColumnStats,
    /// Largest relative difference across mean, median and std; absent when
    /// only one side has values
    pub max_relative_difference: Option<f64>,
    pub within_tolerance: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CheckDetails {
    RowCount {
        source_rows: u64,
        rejected_rows: u64,
        rejected_from: RejectedCountSource,
        expected_rows: u64,
        destination_rows: u64,
    },
    Schema {
        files_checked: usize,
        issues: Vec<SchemaIssue>,
    },
    PartitionKeys {
        partitions_checked: usize,
        misplaced: Vec<MisplacedRows>,
    },
    ValueRanges {
        findings: Vec<RangeFinding>,
    },
    NullPatterns {
        columns: Vec<NullComparison>,
    },
    Statistics {
        columns: Vec<StatComparison>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub severity: Severity,
    pub status: CheckStatus,
    pub message: String,
    pub details: CheckDetails,
}

impl CheckResult {
    pub fn new(
        name: &str,
        severity: Severity,
        status: CheckStatus,
        message: impl Into<String>,
        details: CheckDetails,
    ) -> Self {
        Self {
            name: name.to_string(),
            severity,
            status,
            message: message.into(),
            details,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub status: ValidationStatus,
    pub checks: Vec<CheckResult>,
    pub elapsed_seconds: f64,
}

impl ValidationReport {
    pub fn new(
        source: PathBuf,
        destination: PathBuf,
        checks: Vec<CheckResult>,
        elapsed_seconds: f64,
    ) -> Self {
        let status = overall_status(&checks);
        Self {
            source,
            destination,
            status,
            checks,
            elapsed_seconds,
        }
    }

    pub fn check(&self, name: &str) -> Option<&CheckResult> {
        self.checks.iter().find(|c| c.name == name)
    }

    pub fn is_failed(&self) -> bool {
        self.status == ValidationStatus::Failed
    }

    pub fn summary(&self) -> String {
        let mut summary = String::new();

        summary.push_str("=== Validation Report ===\n");
        summary.push_str(&format!("Source: {}\n", self.source.display()));
        summary.push_str(&format!("Destination: {}\n", self.destination.display()));
        for check in &self.checks {
            let marker = match check.status {
                CheckStatus::Pass => "PASS",
                CheckStatus::Warn => "WARN",
                CheckStatus::Fail => "FAIL",
            };
            summary.push_str(&format!("[{}] {}: {}\n", marker, check.name, check.message));
        }
        summary.push_str(&format!("Overall: {}\n", self.status));
        summary.push_str(&format!("Elapsed: {:.2}s\n", self.elapsed_seconds));

        summary
    }
}

/// Any failing check fails the run; otherwise any warning downgrades it.
pub fn overall_status(checks: &[CheckResult]) -> ValidationStatus {
    if checks.iter().any(|c| c.status == CheckStatus::Fail) {
        ValidationStatus::Failed
    } else if checks.iter().any(|c| c.status == CheckStatus::Warn) {
        ValidationStatus::CompletedWithWarnings
    } else {
        ValidationStatus::Passed
    }
}
