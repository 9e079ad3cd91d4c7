use crate::config::PipelineConfig;
use crate::error::{ProcessingError, Result};
use crate::models::report::{ConversionReport, RejectionSummary};
use crate::models::schema::CanonicalSchema;
use crate::readers::ChunkedReader;
use crate::utils::progress::ProgressReporter;
use crate::writers::partition_writer::{is_vacant, staging_path_for, PartitionWriter};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Drives the chunked reader into the partition writer for one run.
///
/// Each converter carries its own configuration, so independent runs into
/// disjoint destinations can execute on separate threads.
pub struct Converter {
    config: PipelineConfig,
    schema: CanonicalSchema,
    abort: Option<Arc<AtomicBool>>,
}

impl Converter {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            schema: CanonicalSchema::air_quality(),
            abort: None,
        }
    }

    pub fn with_schema(mut self, schema: CanonicalSchema) -> Self {
        self.schema = schema;
        self
    }

    /// Flag checked between batches; once set the run stops with
    /// [`ProcessingError::Cancelled`] and its output stays in staging.
    pub fn with_abort(mut self, abort: Arc<AtomicBool>) -> Self {
        self.abort = Some(abort);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn aborted(&self) -> bool {
        self.abort
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    pub fn convert(&self, source: &Path, destination: &Path) -> Result<ConversionReport> {
        let start = Instant::now();

        if !self.config.overwrite && !is_vacant(destination)? {
            return Err(ProcessingError::DestinationExists(destination.to_path_buf()));
        }

        let reader = ChunkedReader::open(source, self.schema.clone(), &self.config)?;
        let source_bytes = reader.source_bytes();
        info!(
            source = %source.display(),
            destination = %destination.display(),
            source_bytes,
            batch_size = self.config.batch_size,
            "starting conversion"
        );

        let staging = staging_path_for(destination)?;
        let mut writer = PartitionWriter::create(
            &staging,
            self.schema.arrow_schema(),
            self.schema.timestamp_index(),
            &self.config.compression,
            self.config.row_group_size,
        )?;

        let progress = ProgressReporter::bytes(
            source_bytes,
            &format!("Converting {}", source.display()),
            self.config.silent,
        );

        let mut rows_read = 0u64;
        let mut rows_written = 0u64;
        let mut batches = 0u64;
        let mut read_retries = 0u64;
        let mut rejections = RejectionSummary::default();

        for batch in reader {
            if self.aborted() {
                warn!(
                    staging = %staging.display(),
                    batches,
                    "conversion aborted, partial output kept in staging"
                );
                return Err(ProcessingError::Cancelled);
            }

            let batch = batch?;
            let written = writer.append(&batch.batch)?;
            let accepted: u64 = written.values().sum();

            batches += 1;
            rows_read += batch.rows_read;
            rows_written += accepted;
            read_retries += batch.read_retries;
            debug!(
                batch = batches,
                first_row = batch.first_row,
                rows = batch.rows_read,
                accepted,
                rejected = batch.rejections.total(),
                years = ?written.keys().collect::<Vec<_>>(),
                "batch written"
            );
            rejections.merge(batch.rejections);
            progress.update(batch.byte_position);
        }

        let compression = self.config.compression.clone();
        let report = writer.finalize(destination, self.config.overwrite, |partitions| {
            ConversionReport {
                source: source.to_path_buf(),
                destination: destination.to_path_buf(),
                source_bytes,
                rows_read,
                rows_written,
                rows_rejected: rejections.total(),
                output_bytes: partitions.iter().map(|p| p.bytes).sum(),
                rejections,
                partitions,
                batches,
                read_retries,
                elapsed_seconds: start.elapsed().as_secs_f64(),
                compression,
            }
        })?;

        progress.finish_with_message(&format!(
            "Converted {} rows into {} partitions",
            report.rows_written,
            report.partitions.len()
        ));
        info!(
            rows_read = report.rows_read,
            rows_written = report.rows_written,
            rows_rejected = report.rows_rejected,
            partitions = report.partitions.len(),
            elapsed = report.elapsed_seconds,
            "conversion finished"
        );

        Ok(report)
    }
}
