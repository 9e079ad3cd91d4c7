use crate::config::{PipelineConfig, ValidationConfig};
use crate::error::{ProcessingError, Result};
use crate::models::report::ConversionReport;
use crate::models::schema::CanonicalSchema;
use crate::models::validation::{
    CheckDetails, CheckResult, CheckStatus, ColumnStats, MisplacedRows, NullComparison,
    RejectedCountSource, SchemaIssue, Severity, StatComparison, ValidationReport,
};
use crate::processors::profile::{relative_difference, ColumnProfile, RangeTally, SampleSelector};
use crate::query::store::PartitionedStore;
use crate::readers::chunked_reader::resolve_positions;
use crate::readers::coercion::{coerce, parse_timestamp, NullTokens};
use crate::utils::columns::{timestamps, NumericColumn, TextColumn};
use crate::utils::progress::ProgressReporter;
use crate::writers::partition_writer::year_of_millis;
use arrow::array::{Array, ArrayRef};
use csv::{ReaderBuilder, StringRecord, Trim};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use rayon::prelude::*;
use std::fs::File;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

pub const CHECK_ROW_COUNT: &str = "row_count";
pub const CHECK_SCHEMA: &str = "schema";
pub const CHECK_PARTITION_KEYS: &str = "partition_keys";
pub const CHECK_VALUE_RANGES: &str = "value_ranges";
pub const CHECK_NULL_PATTERNS: &str = "null_patterns";
pub const CHECK_STATISTICS: &str = "statistics";

const SCAN_BATCH_SIZE: usize = 8192;

struct SourceProfile {
    data_rows: u64,
    unusable_rows: u64,
    columns: Vec<ColumnProfile>,
}

struct DestinationProfile {
    rows: u64,
    files: usize,
    schema_issues: Vec<SchemaIssue>,
    misplaced: Vec<MisplacedRows>,
    columns: Vec<ColumnProfile>,
    ranges: Vec<(usize, RangeTally)>,
}

/// Read-only comparison of a source extract with the store converted from it.
pub struct IntegrityValidator {
    config: ValidationConfig,
    nulls: NullTokens,
    schema: CanonicalSchema,
    silent: bool,
}

impl IntegrityValidator {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            config: config.validation.clone(),
            nulls: config.null_tokens(),
            schema: CanonicalSchema::air_quality(),
            silent: config.silent,
        }
    }

    pub fn with_schema(mut self, schema: CanonicalSchema) -> Self {
        self.schema = schema;
        self
    }

    /// Run every check. `report` supplies the converter's rejected-row count;
    /// without it the store manifest is used, then a recount of the source.
    pub fn validate(
        &self,
        source: &Path,
        destination: &Path,
        report: Option<&ConversionReport>,
    ) -> Result<ValidationReport> {
        let start = Instant::now();
        info!(
            source = %source.display(),
            destination = %destination.display(),
            "starting validation"
        );

        let store = PartitionedStore::open(destination)?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.max_workers)
            .build()
            .map_err(|e| ProcessingError::Config(e.to_string()))?;

        let progress = ProgressReporter::new_spinner("Profiling source and destination...", self.silent);
        let (src, dst) = pool.install(|| {
            rayon::join(
                || self.profile_source(source),
                || self.profile_destination(&store),
            )
        });
        let (src, mut dst) = (src?, dst?);

        progress.set_message("Comparing column summaries...");
        let (src_stats, dst_stats): (Vec<ColumnStats>, Vec<ColumnStats>) = pool.install(|| {
            rayon::join(
                || src.columns.par_iter().map(ColumnProfile::summarize).collect(),
                || dst.columns.par_iter().map(ColumnProfile::summarize).collect(),
            )
        });

        let (rejected, rejected_from) = match report {
            Some(r) => (r.rows_rejected, RejectedCountSource::Report),
            None => match store.manifest()? {
                Some(m) => (m.rows_rejected, RejectedCountSource::Manifest),
                None => (src.unusable_rows, RejectedCountSource::Recount),
            },
        };

        let checks = vec![
            self.check_row_count(&src, &dst, rejected, rejected_from),
            self.check_schema(&dst),
            self.check_partition_keys(&dst, store.years().len()),
            self.check_ranges(std::mem::take(&mut dst.ranges)),
            self.check_nulls(&src, &dst),
            self.check_statistics(&src_stats, &dst_stats),
        ];

        for check in checks.iter().filter(|c| c.status != CheckStatus::Pass) {
            warn!(check = %check.name, status = ?check.status, "{}", check.message);
        }

        let report = ValidationReport::new(
            source.to_path_buf(),
            destination.to_path_buf(),
            checks,
            start.elapsed().as_secs_f64(),
        );
        progress.finish_with_message(&format!("Validation {}", report.status));
        info!(status = %report.status, elapsed = report.elapsed_seconds, "validation finished");

        Ok(report)
    }

    fn profile_source(&self, path: &Path) -> Result<SourceProfile> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(Trim::All)
            .from_path(path)?;
        let headers = reader.headers()?.clone();
        let positions = resolve_positions(&headers, &self.schema)?;

        let ts_index = self.schema.timestamp_index();
        let station_index = self.schema.index_of("sitename");
        let sampler = SampleSelector::new(self.config.stats_sample_modulus);
        let columns = self.schema.columns();

        let mut profile = SourceProfile {
            data_rows: 0,
            unusable_rows: 0,
            columns: vec![ColumnProfile::new(self.config.median_sample_size); columns.len()],
        };

        let mut record = StringRecord::new();
        while reader.read_record(&mut record)? {
            profile.data_rows += 1;

            let timestamp = record
                .get(positions[ts_index])
                .filter(|raw| !self.nulls.is_null(raw))
                .and_then(parse_timestamp);
            let Some(timestamp) = timestamp else {
                profile.unusable_rows += 1;
                continue;
            };

            let station = station_index
                .and_then(|i| record.get(positions[i]))
                .filter(|s| !self.nulls.is_null(s))
                .unwrap_or("");
            let key = sampler.key(timestamp.and_utc().timestamp_millis(), station);

            for (i, def) in columns.iter().enumerate() {
                let column = &mut profile.columns[i];
                column.rows += 1;
                if i == ts_index {
                    continue;
                }

                let raw = record.get(positions[i]).unwrap_or("");
                if self.nulls.is_null(raw) {
                    column.nulls += 1;
                    continue;
                }
                // Values the converter could not coerce are left out of the moments
                if def.kind.is_numeric() && coerce(raw, def.kind, &self.nulls).is_ok() {
                    if let Ok(value) = raw.parse::<f64>() {
                        column.push_value(value, key);
                    }
                }
            }
        }

        debug!(
            rows = profile.data_rows,
            unusable = profile.unusable_rows,
            "profiled source"
        );
        Ok(profile)
    }

    fn profile_destination(&self, store: &PartitionedStore) -> Result<DestinationProfile> {
        let columns = self.schema.columns();
        let ts_index = self.schema.timestamp_index();
        let station_index = self.schema.index_of("sitename");
        let sampler = SampleSelector::new(self.config.stats_sample_modulus);

        let mut profile = DestinationProfile {
            rows: 0,
            files: store.partition_info().len(),
            schema_issues: Vec::new(),
            misplaced: Vec::new(),
            columns: vec![ColumnProfile::new(self.config.median_sample_size); columns.len()],
            ranges: self
                .schema
                .bounded_columns()
                .filter_map(|(i, def)| {
                    def.bounds
                        .map(|b| (i, RangeTally::new(def.name, b, self.config.example_limit)))
                })
                .collect(),
        };

        for info in store.partition_info() {
            let builder = ParquetRecordBatchReaderBuilder::try_new(File::open(&info.path)?)?;
            for (column, expected, found) in self.schema.diff(builder.schema()) {
                profile.schema_issues.push(SchemaIssue {
                    file: info.path.clone(),
                    column,
                    expected,
                    found,
                });
            }
            let reader = builder.with_batch_size(SCAN_BATCH_SIZE).build()?;

            let mut offset = 0u64;
            let mut misplaced = MisplacedRows {
                partition: info.year,
                rows: 0,
                example_year: None,
            };

            for batch in reader {
                let batch = batch?;
                let num_rows = batch.num_rows();
                profile.rows += num_rows as u64;

                let arrays: Vec<Option<&ArrayRef>> =
                    columns.iter().map(|d| batch.column_by_name(d.name)).collect();
                for (i, array) in arrays.iter().enumerate() {
                    if let Some(array) = array {
                        profile.columns[i].rows += num_rows as u64;
                        profile.columns[i].nulls += array.null_count() as u64;
                    }
                }

                let dates = arrays[ts_index].and_then(timestamps);
                let stations = station_index
                    .and_then(|i| arrays[i])
                    .and_then(TextColumn::try_new);
                let numerics: Vec<Option<NumericColumn>> = arrays
                    .iter()
                    .zip(columns)
                    .map(|(a, d)| {
                        if d.kind.is_numeric() {
                            a.and_then(NumericColumn::try_new)
                        } else {
                            None
                        }
                    })
                    .collect();

                for row in 0..num_rows {
                    let millis = dates.and_then(|d| d.is_valid(row).then(|| d.value(row)));
                    let year = millis.and_then(year_of_millis);
                    if year != Some(info.year) {
                        misplaced.rows += 1;
                        if misplaced.example_year.is_none() {
                            misplaced.example_year = year;
                        }
                    }

                    let key = millis.and_then(|m| {
                        let station = stations.and_then(|s| s.get(row)).unwrap_or("");
                        sampler.key(m, station)
                    });
                    for (i, numeric) in numerics.iter().enumerate() {
                        if let Some(value) = numeric.and_then(|n| n.get(row)) {
                            profile.columns[i].push_value(value, key);
                        }
                    }
                    for (i, tally) in profile.ranges.iter_mut() {
                        if let Some(value) = numerics[*i].and_then(|n| n.get(row)) {
                            tally.observe(value, info.year, offset + row as u64);
                        }
                    }
                }
                offset += num_rows as u64;
            }

            if misplaced.rows > 0 {
                profile.misplaced.push(misplaced);
            }
        }

        debug!(rows = profile.rows, files = profile.files, "profiled destination");
        Ok(profile)
    }

    fn check_row_count(
        &self,
        src: &SourceProfile,
        dst: &DestinationProfile,
        rejected: u64,
        rejected_from: RejectedCountSource,
    ) -> CheckResult {
        let expected = src.data_rows.saturating_sub(rejected);
        let status = if dst.rows == expected && rejected <= src.data_rows {
            CheckStatus::Pass
        } else {
            CheckStatus::Fail
        };
        CheckResult::new(
            CHECK_ROW_COUNT,
            Severity::Hard,
            status,
            format!(
                "{} destination rows, expected {} ({} source rows - {} rejected)",
                dst.rows, expected, src.data_rows, rejected
            ),
            CheckDetails::RowCount {
                source_rows: src.data_rows,
                rejected_rows: rejected,
                rejected_from,
                expected_rows: expected,
                destination_rows: dst.rows,
            },
        )
    }

    fn check_schema(&self, dst: &DestinationProfile) -> CheckResult {
        let (status, message) = match dst.schema_issues.first() {
            None => (
                CheckStatus::Pass,
                format!("{} partition files match the canonical schema", dst.files),
            ),
            Some(first) => (
                CheckStatus::Fail,
                format!(
                    "{} divergences, first in column '{}' of {}: expected {}, found {}",
                    dst.schema_issues.len(),
                    first.column,
                    first.file.display(),
                    first.expected,
                    first.found
                ),
            ),
        };
        CheckResult::new(
            CHECK_SCHEMA,
            Severity::Hard,
            status,
            message,
            CheckDetails::Schema {
                files_checked: dst.files,
                issues: dst.schema_issues.clone(),
            },
        )
    }

    fn check_partition_keys(&self, dst: &DestinationProfile, partitions: usize) -> CheckResult {
        let misplaced: u64 = dst.misplaced.iter().map(|m| m.rows).sum();
        let (status, message) = if misplaced == 0 {
            (
                CheckStatus::Pass,
                format!("every row matches its partition year across {} partitions", partitions),
            )
        } else {
            (
                CheckStatus::Fail,
                format!("{} rows stored under the wrong year", misplaced),
            )
        };
        CheckResult::new(
            CHECK_PARTITION_KEYS,
            Severity::Hard,
            status,
            message,
            CheckDetails::PartitionKeys {
                partitions_checked: partitions,
                misplaced: dst.misplaced.clone(),
            },
        )
    }

    fn check_ranges(&self, tallies: Vec<(usize, RangeTally)>) -> CheckResult {
        let findings: Vec<_> = tallies.into_iter().map(|(_, t)| t.into_finding()).collect();
        let offending: Vec<_> = findings.iter().filter(|f| f.out_of_range > 0).collect();

        let status = if offending
            .iter()
            .any(|f| f.ratio > self.config.range_failure_ratio)
        {
            CheckStatus::Fail
        } else if !offending.is_empty() {
            CheckStatus::Warn
        } else {
            CheckStatus::Pass
        };

        let message = if offending.is_empty() {
            "all bounded values within their physical range".to_string()
        } else {
            offending
                .iter()
                .map(|f| {
                    format!(
                        "{}: {} of {} outside [{}, {}]",
                        f.column, f.out_of_range, f.checked, f.min, f.max
                    )
                })
                .collect::<Vec<_>>()
                .join("; ")
        };

        let findings = findings.into_iter().filter(|f| f.out_of_range > 0).collect();
        CheckResult::new(
            CHECK_VALUE_RANGES,
            Severity::Soft,
            status,
            message,
            CheckDetails::ValueRanges { findings },
        )
    }

    fn check_nulls(&self, src: &SourceProfile, dst: &DestinationProfile) -> CheckResult {
        let columns: Vec<NullComparison> = self
            .schema
            .columns()
            .iter()
            .enumerate()
            .map(|(i, def)| {
                let source_null_pct = src.columns[i].null_pct();
                let destination_null_pct = dst.columns[i].null_pct();
                let difference_pp = (source_null_pct - destination_null_pct).abs();
                NullComparison {
                    column: def.name.to_string(),
                    source_null_pct,
                    destination_null_pct,
                    difference_pp,
                    within_tolerance: difference_pp <= self.config.null_tolerance_pp,
                }
            })
            .collect();

        let drifted: Vec<&str> = columns
            .iter()
            .filter(|c| !c.within_tolerance)
            .map(|c| c.column.as_str())
            .collect();
        let (status, message) = if drifted.is_empty() {
            (
                CheckStatus::Pass,
                format!(
                    "null rates agree within {} pp",
                    self.config.null_tolerance_pp
                ),
            )
        } else {
            (
                CheckStatus::Warn,
                format!("null rate drift in {}", drifted.join(", ")),
            )
        };

        CheckResult::new(
            CHECK_NULL_PATTERNS,
            Severity::Soft,
            status,
            message,
            CheckDetails::NullPatterns { columns },
        )
    }

    fn check_statistics(&self, src: &[ColumnStats], dst: &[ColumnStats]) -> CheckResult {
        let tolerance = self.config.relative_tolerance;
        let columns: Vec<StatComparison> = self
            .schema
            .numeric_columns()
            .map(|(i, def)| {
                let source = src[i].clone();
                let destination = dst[i].clone();
                let max_relative_difference = max_difference(&source, &destination);
                StatComparison {
                    column: def.name.to_string(),
                    within_tolerance: max_relative_difference.is_some_and(|d| d < tolerance),
                    source,
                    destination,
                    max_relative_difference,
                }
            })
            .collect();

        let diverged: Vec<&str> = columns
            .iter()
            .filter(|c| !c.within_tolerance)
            .map(|c| c.column.as_str())
            .collect();
        let (status, message) = if diverged.is_empty() {
            (
                CheckStatus::Pass,
                format!("mean, median and std agree within {}", tolerance),
            )
        } else {
            (
                CheckStatus::Warn,
                format!("statistics diverge in {}", diverged.join(", ")),
            )
        };

        CheckResult::new(
            CHECK_STATISTICS,
            Severity::Soft,
            status,
            message,
            CheckDetails::Statistics { columns },
        )
    }
}

/// Largest relative difference between matching moments. Two empty columns
/// agree; a moment present on one side only does not.
fn max_difference(source: &ColumnStats, destination: &ColumnStats) -> Option<f64> {
    let pairs = [
        (source.mean, destination.mean),
        (source.median, destination.median),
        (source.std, destination.std),
    ];
    let mut max = 0.0f64;
    for pair in pairs {
        match pair {
            (Some(a), Some(b)) => max = max.max(relative_difference(a, b)),
            (None, None) => {}
            _ => return None,
        }
    }
    Some(max)
}
