use crate::readers::coercion::Rejection;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedRow {
    /// 1-based data row number, header excluded
    pub row: u64,
    pub reason: Rejection,
}

/// Row-level problems aggregated over a batch or a whole run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RejectionSummary {
    /// Rejected rows per reason, keyed by [`Rejection::as_str`]
    pub reasons: BTreeMap<String, u64>,
    pub examples: Vec<RejectedRow>,
    /// Optional fields that failed to parse and were stored as null, per column
    pub coerced_nulls: BTreeMap<String, u64>,
}

impl RejectionSummary {
    pub fn reject(&mut self, reason: Rejection, example: Option<RejectedRow>) {
        *self.reasons.entry(reason.as_str().to_string()).or_insert(0) += 1;
        if let Some(example) = example {
            self.examples.push(example);
        }
    }

    pub fn coerced_null(&mut self, column: &str) {
        *self.coerced_nulls.entry(column.to_string()).or_insert(0) += 1;
    }

    pub fn total(&self) -> u64 {
        self.reasons.values().sum()
    }

    pub fn count(&self, reason: Rejection) -> u64 {
        self.reasons.get(reason.as_str()).copied().unwrap_or(0)
    }

    pub fn merge(&mut self, other: RejectionSummary) {
        for (reason, n) in other.reasons {
            *self.reasons.entry(reason).or_insert(0) += n;
        }
        self.examples.extend(other.examples);
        for (column, n) in other.coerced_nulls {
            *self.coerced_nulls.entry(column).or_insert(0) += n;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionSummary {
    pub year: i32,
    pub rows: u64,
    pub bytes: u64,
    /// Path relative to the store root
    pub path: PathBuf,
}

/// Outcome of one conversion run. Written into the finalized store as its
/// manifest, and read back by the validator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionReport {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub source_bytes: u64,
    pub rows_read: u64,
    pub rows_written: u64,
    pub rows_rejected: u64,
    pub rejections: RejectionSummary,
    pub partitions: Vec<PartitionSummary>,
    pub batches: u64,
    /// Transient read failures recovered by retrying
    #[serde(default)]
    pub read_retries: u64,
    pub elapsed_seconds: f64,
    pub output_bytes: u64,
    pub compression: String,
}

impl ConversionReport {
    pub fn compression_ratio(&self) -> f64 {
        if self.output_bytes == 0 {
            0.0
        } else {
            self.source_bytes as f64 / self.output_bytes as f64
        }
    }

    pub fn partition_rows(&self, year: i32) -> Option<u64> {
        self.partitions.iter().find(|p| p.year == year).map(|p| p.rows)
    }

    pub fn summary(&self) -> String {
        let mut summary = String::new();

        summary.push_str("=== Conversion Report ===\n");
        summary.push_str(&format!("Source: {}\n", self.source.display()));
        summary.push_str(&format!("Destination: {}\n", self.destination.display()));
        summary.push_str(&format!("Rows read: {}\n", self.rows_read));
        summary.push_str(&format!("Rows written: {}\n", self.rows_written));
        summary.push_str(&format!("Rows rejected: {}\n", self.rows_rejected));
        for (reason, n) in &self.rejections.reasons {
            summary.push_str(&format!("  - {}: {}\n", reason, n));
        }
        if !self.rejections.coerced_nulls.is_empty() {
            summary.push_str("Unparseable values stored as null:\n");
            for (column, n) in &self.rejections.coerced_nulls {
                summary.push_str(&format!("  - {}: {}\n", column, n));
            }
        }
        summary.push_str(&format!("Partitions: {}\n", self.partitions.len()));
        for p in &self.partitions {
            summary.push_str(&format!(
                "  year={}: {} rows, {:.2} MB\n",
                p.year,
                p.rows,
                p.bytes as f64 / 1_048_576.0
            ));
        }
        summary.push_str(&format!(
            "Output size: {:.2} MB ({} compression, {:.1}x smaller than source)\n",
            self.output_bytes as f64 / 1_048_576.0,
            self.compression,
            self.compression_ratio()
        ));
        if self.read_retries > 0 {
            summary.push_str(&format!("Read retries: {}\n", self.read_retries));
        }
        summary.push_str(&format!("Elapsed: {:.2}s\n", self.elapsed_seconds));

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_summary_merge() {
        let mut a = RejectionSummary::default();
        a.reject(
            Rejection::EmptyTimestamp,
            Some(RejectedRow {
                row: 3,
                reason: Rejection::EmptyTimestamp,
            }),
        );
        a.coerced_null("aqi");

        let mut b = RejectionSummary::default();
        b.reject(Rejection::EmptyTimestamp, None);
        b.reject(Rejection::UnparseableTimestamp, None);
        b.coerced_null("aqi");
        b.coerced_null("so2");

        a.merge(b);
        assert_eq!(a.total(), 3);
        assert_eq!(a.count(Rejection::EmptyTimestamp), 2);
        assert_eq!(a.examples.len(), 1);
        assert_eq!(a.coerced_nulls["aqi"], 2);
        assert_eq!(a.coerced_nulls["so2"], 1);
    }

    #[test]
    fn test_report_round_trips_through_json() {
        let mut rejections = RejectionSummary::default();
        rejections.reject(Rejection::MalformedRow, None);
        let report = ConversionReport {
            source: PathBuf::from("air_quality.csv"),
            destination: PathBuf::from("store"),
            source_bytes: 2048,
            rows_read: 11,
            rows_written: 10,
            rows_rejected: 1,
            rejections,
            partitions: vec![PartitionSummary {
                year: 2023,
                rows: 10,
                bytes: 512,
                path: PathBuf::from("year=2023/part-0.parquet"),
            }],
            batches: 1,
            read_retries: 2,
            elapsed_seconds: 0.5,
            output_bytes: 512,
            compression: "snappy".to_string(),
        };

        let json = serde_json::to_string(&report).unwrap();
        let back: ConversionReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back, report);
        assert_eq!(back.partition_rows(2023), Some(10));
        assert!((report.compression_ratio() - 4.0).abs() < f64::EPSILON);
        assert!(report.summary().contains("malformed_row: 1"));
        assert!(report.summary().contains("Read retries: 2"));

        // Manifests written before retries were reported still load
        let mut legacy: serde_json::Value = serde_json::from_str(&json).unwrap();
        legacy.as_object_mut().unwrap().remove("read_retries");
        let old: ConversionReport = serde_json::from_value(legacy).unwrap();
        assert_eq!(old.read_retries, 0);
    }
}
