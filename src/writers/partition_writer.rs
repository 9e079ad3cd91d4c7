use crate::error::{ProcessingError, Result};
use crate::models::report::{ConversionReport, PartitionSummary};
use crate::models::schema::describe_field;
use crate::utils::constants::{MANIFEST_FILE, PARTITION_FILE, PARTITION_PREFIX, STAGING_SUFFIX};
use arrow::array::{AsArray, UInt32Array};
use arrow::compute::take_record_batch;
use arrow::datatypes::{SchemaRef, TimestampMillisecondType};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Datelike};
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, GzipLevel, ZstdLevel};
use parquet::file::properties::WriterProperties;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub fn parse_compression(compression: &str) -> Result<Compression> {
    match compression.to_lowercase().as_str() {
        "snappy" => Ok(Compression::SNAPPY),
        "gzip" => Ok(Compression::GZIP(GzipLevel::default())),
        "lz4" => Ok(Compression::LZ4),
        "zstd" => Ok(Compression::ZSTD(ZstdLevel::default())),
        "none" => Ok(Compression::UNCOMPRESSED),
        _ => Err(ProcessingError::Config(format!(
            "Unsupported compression: {}",
            compression
        ))),
    }
}

/// Hidden sibling directory a run stages its output in before publishing.
pub fn staging_path_for(destination: &Path) -> Result<PathBuf> {
    let name = destination
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            ProcessingError::Config(format!(
                "Destination has no directory name: {}",
                destination.display()
            ))
        })?;
    let parent = destination.parent().unwrap_or_else(|| Path::new(""));
    Ok(parent.join(format!(".{}{}", name, STAGING_SUFFIX)))
}

/// Relative location of a year's data file inside the store.
pub fn partition_file(year: i32) -> PathBuf {
    PathBuf::from(format!("{}{}", PARTITION_PREFIX, year)).join(PARTITION_FILE)
}

/// Year of a naive millisecond timestamp.
pub fn year_of_millis(millis: i64) -> Option<i32> {
    DateTime::from_timestamp_millis(millis).map(|dt| dt.year())
}

/// True when `path` is missing or an empty directory.
pub fn is_vacant(path: &Path) -> Result<bool> {
    if !path.exists() {
        return Ok(true);
    }
    if !path.is_dir() {
        return Ok(false);
    }
    Ok(fs::read_dir(path)?.next().is_none())
}

struct OpenPartition {
    writer: ArrowWriter<File>,
    schema: SchemaRef,
    rows: u64,
}

/// Routes typed batches into one staged Parquet file per year.
///
/// The writer owns every open partition file for the lifetime of a run.
/// Nothing becomes visible at the destination until [`finalize`] renames the
/// staging directory into place; dropping the writer instead releases the
/// handles and leaves staging behind for inspection.
///
/// [`finalize`]: PartitionWriter::finalize
pub struct PartitionWriter {
    staging: PathBuf,
    schema: SchemaRef,
    timestamp_index: usize,
    properties: WriterProperties,
    partitions: BTreeMap<i32, OpenPartition>,
}

impl PartitionWriter {
    /// Start a fresh staging area, discarding leftovers of an aborted run.
    pub fn create(
        staging: &Path,
        schema: SchemaRef,
        timestamp_index: usize,
        compression: &str,
        row_group_size: usize,
    ) -> Result<Self> {
        if staging.exists() {
            warn!(path = %staging.display(), "removing stale staging directory");
            fs::remove_dir_all(staging)?;
        }
        fs::create_dir_all(staging)?;

        let properties = WriterProperties::builder()
            .set_compression(parse_compression(compression)?)
            .set_max_row_group_size(row_group_size)
            .build();

        Ok(Self {
            staging: staging.to_path_buf(),
            schema,
            timestamp_index,
            properties,
            partitions: BTreeMap::new(),
        })
    }

    pub fn staging_path(&self) -> &Path {
        &self.staging
    }

    pub fn years(&self) -> Vec<i32> {
        self.partitions.keys().copied().collect()
    }

    /// Append a batch, splitting it by the year of each row's timestamp.
    /// Returns the rows written per year.
    pub fn append(&mut self, batch: &RecordBatch) -> Result<BTreeMap<i32, u64>> {
        let mut written = BTreeMap::new();
        if batch.num_rows() == 0 {
            return Ok(written);
        }

        let timestamps = batch
            .column(self.timestamp_index)
            .as_primitive_opt::<TimestampMillisecondType>()
            .ok_or_else(|| {
                ProcessingError::InvalidFormat("Timestamp column has unexpected type".to_string())
            })?;

        let mut groups: BTreeMap<i32, Vec<u32>> = BTreeMap::new();
        for (i, millis) in timestamps.iter().enumerate() {
            let year = millis.and_then(year_of_millis).ok_or_else(|| {
                ProcessingError::InvalidFormat(format!("Row {} has no usable timestamp", i))
            })?;
            groups.entry(year).or_default().push(i as u32);
        }

        for (year, indices) in groups {
            let rows = indices.len() as u64;
            let slice = take_record_batch(batch, &UInt32Array::from(indices))?;
            self.write_partition(year, &slice)?;
            written.insert(year, rows);
        }

        Ok(written)
    }

    fn write_partition(&mut self, year: i32, batch: &RecordBatch) -> Result<()> {
        if !self.partitions.contains_key(&year) {
            let path = self.staging.join(partition_file(year));
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let file = File::create(&path)?;
            let writer =
                ArrowWriter::try_new(file, self.schema.clone(), Some(self.properties.clone()))?;
            debug!(year, path = %path.display(), "created partition");
            self.partitions.insert(
                year,
                OpenPartition {
                    writer,
                    schema: self.schema.clone(),
                    rows: 0,
                },
            );
        }

        let partition = self
            .partitions
            .get_mut(&year)
            .ok_or_else(|| ProcessingError::InvalidFormat(format!("Partition {} vanished", year)))?;

        check_conforms(year, &partition.schema, batch)?;

        partition.writer.write(batch)?;
        // One row group per append keeps buffered memory to a single batch
        partition.writer.flush()?;
        partition.rows += batch.num_rows() as u64;

        Ok(())
    }

    /// Close every partition, write the run manifest and publish the staging
    /// directory at `destination`.
    ///
    /// An existing destination is only replaced when `overwrite` is set; the
    /// old tree is moved aside first and removed once the new one is in place.
    pub fn finalize<F>(
        mut self,
        destination: &Path,
        overwrite: bool,
        build_manifest: F,
    ) -> Result<ConversionReport>
    where
        F: FnOnce(Vec<PartitionSummary>) -> ConversionReport,
    {
        let mut summaries = Vec::with_capacity(self.partitions.len());
        for (year, partition) in std::mem::take(&mut self.partitions) {
            partition.writer.close()?;
            let relative = partition_file(year);
            let bytes = fs::metadata(self.staging.join(&relative))?.len();
            summaries.push(PartitionSummary {
                year,
                rows: partition.rows,
                bytes,
                path: relative,
            });
        }

        let report = build_manifest(summaries);

        let mut manifest = BufWriter::new(File::create(self.staging.join(MANIFEST_FILE))?);
        serde_json::to_writer_pretty(&mut manifest, &report)?;
        manifest.flush()?;
        drop(manifest);

        publish(&self.staging, destination, overwrite)?;
        info!(
            destination = %destination.display(),
            partitions = report.partitions.len(),
            "store finalized"
        );

        Ok(report)
    }
}

impl Drop for PartitionWriter {
    fn drop(&mut self) {
        if !self.partitions.is_empty() {
            warn!(
                path = %self.staging.display(),
                partitions = self.partitions.len(),
                "run ended without finalizing, output left in staging"
            );
        }
    }
}

fn check_conforms(year: i32, expected: &SchemaRef, batch: &RecordBatch) -> Result<()> {
    let found = batch.schema();
    for (i, field) in expected.fields().iter().enumerate() {
        let conforms = found.fields().get(i).is_some_and(|f| {
            f.name() == field.name()
                && f.data_type() == field.data_type()
                && f.is_nullable() == field.is_nullable()
        });
        if !conforms {
            return Err(ProcessingError::SchemaMismatch {
                partition: year,
                column: field.name().to_string(),
                expected: describe_field(field),
                found: found
                    .fields()
                    .get(i)
                    .map(|f| describe_field(f))
                    .unwrap_or_else(|| "<missing>".to_string()),
            });
        }
    }
    if let Some(extra) = found.fields().get(expected.fields().len()) {
        return Err(ProcessingError::SchemaMismatch {
            partition: year,
            column: extra.name().to_string(),
            expected: "<absent>".to_string(),
            found: describe_field(extra),
        });
    }
    Ok(())
}

fn publish(staging: &Path, destination: &Path, overwrite: bool) -> Result<()> {
    if let Some(parent) = destination.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    if is_vacant(destination)? {
        if destination.exists() {
            fs::remove_dir(destination)?;
        }
        fs::rename(staging, destination)?;
        return Ok(());
    }

    if !overwrite {
        return Err(ProcessingError::DestinationExists(destination.to_path_buf()));
    }

    let mut aside = staging.to_path_buf();
    aside.set_extension("replaced");
    if aside.exists() {
        fs::remove_dir_all(&aside)?;
    }
    fs::rename(destination, &aside)?;
    fs::rename(staging, destination)?;
    if aside.is_dir() {
        fs::remove_dir_all(&aside)?;
    } else {
        fs::remove_file(&aside)?;
    }
    debug!(destination = %destination.display(), "replaced previous store");

    Ok(())
}
