use crate::error::{ProcessingError, Result};
use crate::models::report::ConversionReport;
use crate::utils::constants::{MANIFEST_FILE, PARTITION_PREFIX};
use arrow::array::{ArrayRef, Int32Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::{ParquetRecordBatchReader, ParquetRecordBatchReaderBuilder};
use parquet::arrow::ProjectionMask;
use parquet::file::reader::{FileReader, SerializedFileReader};
use serde::Serialize;
use std::collections::VecDeque;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

const DEFAULT_SCAN_BATCH: usize = 8192;

/// One data file of a year partition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartitionInfo {
    pub year: i32,
    pub path: PathBuf,
    pub rows: u64,
    pub bytes: u64,
    pub row_groups: usize,
}

/// What to read from a store: which columns, which years, how many rows at a time.
#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub columns: Option<Vec<String>>,
    pub years: Option<Vec<i32>>,
    pub batch_size: usize,
    /// Append the partition key as an Int32 `year` column
    pub include_year: bool,
}

impl Default for ScanRequest {
    fn default() -> Self {
        Self {
            columns: None,
            years: None,
            batch_size: DEFAULT_SCAN_BATCH,
            include_year: false,
        }
    }
}

impl ScanRequest {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn columns(mut self, columns: &[&str]) -> Self {
        self.columns = Some(columns.iter().map(|c| c.to_string()).collect());
        self
    }

    pub fn years(mut self, years: &[i32]) -> Self {
        self.years = Some(years.to_vec());
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn include_year(mut self, include: bool) -> Self {
        self.include_year = include;
        self
    }

    fn wants(&self, year: i32) -> bool {
        self.years.as_ref().map_or(true, |ys| ys.contains(&year))
    }
}

/// Read-only handle on a finalized `year=YYYY` partitioned store.
#[derive(Debug, Clone)]
pub struct PartitionedStore {
    root: PathBuf,
    partitions: Vec<PartitionInfo>,
}

impl PartitionedStore {
    pub fn open(root: &Path) -> Result<Self> {
        if !root.is_dir() {
            return Err(ProcessingError::InvalidFormat(format!(
                "{} is not a partitioned store directory",
                root.display()
            )));
        }

        let mut partitions = Vec::new();
        for entry in fs::read_dir(root)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(year) = partition_year(&path) else {
                continue;
            };

            let mut files: Vec<PathBuf> = fs::read_dir(&path)?
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| p.extension().is_some_and(|ext| ext == "parquet"))
                .collect();
            files.sort();

            for file in files {
                let bytes = fs::metadata(&file)?.len();
                let reader = SerializedFileReader::new(File::open(&file)?)?;
                let metadata = reader.metadata();
                partitions.push(PartitionInfo {
                    year,
                    rows: metadata.file_metadata().num_rows().max(0) as u64,
                    row_groups: metadata.num_row_groups(),
                    bytes,
                    path: file,
                });
            }
        }

        partitions.sort_by(|a, b| a.year.cmp(&b.year).then_with(|| a.path.cmp(&b.path)));
        debug!(root = %root.display(), files = partitions.len(), "opened store");

        Ok(Self {
            root: root.to_path_buf(),
            partitions,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn partition_info(&self) -> &[PartitionInfo] {
        &self.partitions
    }

    pub fn years(&self) -> Vec<i32> {
        let mut years: Vec<i32> = self.partitions.iter().map(|p| p.year).collect();
        years.dedup();
        years
    }

    /// Row total from the parquet footers, without reading any data pages
    pub fn total_rows(&self) -> u64 {
        self.partitions.iter().map(|p| p.rows).sum()
    }

    pub fn total_bytes(&self) -> u64 {
        self.partitions.iter().map(|p| p.bytes).sum()
    }

    /// The conversion report the writer left next to the partitions, if any.
    pub fn manifest(&self) -> Result<Option<ConversionReport>> {
        let path = self.root.join(MANIFEST_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let report = serde_json::from_slice(&fs::read(path)?)?;
        Ok(Some(report))
    }

    pub fn scan(&self, request: ScanRequest) -> Result<StoreScan> {
        let pending: VecDeque<PartitionInfo> = self
            .partitions
            .iter()
            .filter(|p| request.wants(p.year))
            .cloned()
            .collect();

        Ok(StoreScan {
            pending,
            current: None,
            request,
        })
    }
}

/// Year encoded in a `year=YYYY` directory name.
pub fn partition_year(path: &Path) -> Option<i32> {
    path.file_name()?
        .to_str()?
        .strip_prefix(PARTITION_PREFIX)?
        .parse()
        .ok()
}

/// Streaming scan over the selected partitions, one file at a time.
pub struct StoreScan {
    pending: VecDeque<PartitionInfo>,
    current: Option<(i32, ParquetRecordBatchReader)>,
    request: ScanRequest,
}

impl StoreScan {
    fn open_next(&mut self) -> Result<bool> {
        let Some(info) = self.pending.pop_front() else {
            return Ok(false);
        };

        let builder = ParquetRecordBatchReaderBuilder::try_new(File::open(&info.path)?)?;
        let builder = match &self.request.columns {
            Some(columns) => {
                let schema = builder.schema().clone();
                let indices = columns
                    .iter()
                    .map(|name| {
                        schema
                            .index_of(name)
                            .map_err(|_| ProcessingError::MissingColumn {
                                column: name.clone(),
                            })
                    })
                    .collect::<Result<Vec<usize>>>()?;
                let mask = ProjectionMask::roots(builder.parquet_schema(), indices);
                builder.with_projection(mask)
            }
            None => builder,
        };

        let reader = builder.with_batch_size(self.request.batch_size).build()?;
        self.current = Some((info.year, reader));
        Ok(true)
    }

    fn with_year(year: i32, batch: RecordBatch) -> Result<RecordBatch> {
        let mut fields: Vec<Field> = batch
            .schema()
            .fields()
            .iter()
            .map(|f| f.as_ref().clone())
            .collect();
        fields.push(Field::new("year", DataType::Int32, false));

        let mut columns: Vec<ArrayRef> = batch.columns().to_vec();
        columns.push(Arc::new(Int32Array::from(vec![year; batch.num_rows()])));

        Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?)
    }
}

impl Iterator for StoreScan {
    type Item = Result<(i32, RecordBatch)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((year, reader)) = self.current.as_mut() {
                let year = *year;
                match reader.next() {
                    Some(Ok(batch)) if self.request.include_year => {
                        return Some(Self::with_year(year, batch).map(|b| (year, b)));
                    }
                    Some(Ok(batch)) => return Some(Ok((year, batch))),
                    Some(Err(e)) => {
                        self.current = None;
                        self.pending.clear();
                        return Some(Err(e.into()));
                    }
                    None => self.current = None,
                }
            }

            match self.open_next() {
                Ok(true) => continue,
                Ok(false) => return None,
                Err(e) => {
                    self.pending.clear();
                    return Some(Err(e));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::processors::Converter;
    use crate::test_support::{write_csv, SampleRow};
    use tempfile::TempDir;

    fn build_store(dir: &Path) -> PathBuf {
        let mut rows: Vec<SampleRow> = (0..6).map(|i| SampleRow::hourly(2018, i)).collect();
        rows.extend((0..4).map(|i| SampleRow::hourly(2019, i)));
        let source = write_csv(dir, "source.csv", &rows);
        let dest = dir.join("store");
        Converter::new(PipelineConfig::default().with_batch_size(3).with_silent(true))
            .convert(&source, &dest)
            .unwrap();
        dest
    }

    #[test]
    fn test_open_discovers_partitions() {
        let dir = TempDir::new().unwrap();
        let store = PartitionedStore::open(&build_store(dir.path())).unwrap();

        assert_eq!(store.years(), vec![2018, 2019]);
        assert_eq!(store.total_rows(), 10);
        assert!(store.partition_info().iter().all(|p| p.row_groups >= 1));
        assert_eq!(store.manifest().unwrap().unwrap().rows_written, 10);
    }

    #[test]
    fn test_scan_prunes_and_projects() {
        let dir = TempDir::new().unwrap();
        let store = PartitionedStore::open(&build_store(dir.path())).unwrap();

        let request = ScanRequest::all()
            .columns(&["date", "aqi"])
            .years(&[2019])
            .include_year(true);
        let batches: Vec<(i32, RecordBatch)> =
            store.scan(request).unwrap().map(|r| r.unwrap()).collect();

        let rows: usize = batches.iter().map(|(_, b)| b.num_rows()).sum();
        assert_eq!(rows, 4);
        for (year, batch) in &batches {
            assert_eq!(*year, 2019);
            let names: Vec<String> =
                batch.schema().fields().iter().map(|f| f.name().clone()).collect();
            assert_eq!(names, vec!["date", "aqi", "year"]);
        }
    }

    #[test]
    fn test_unknown_projection_column() {
        let dir = TempDir::new().unwrap();
        let store = PartitionedStore::open(&build_store(dir.path())).unwrap();
        let mut scan = store
            .scan(ScanRequest::all().columns(&["no_such_column"]))
            .unwrap();
        assert!(matches!(
            scan.next(),
            Some(Err(ProcessingError::MissingColumn { .. }))
        ));
        assert!(scan.next().is_none());
    }

    #[test]
    fn test_partition_year_parsing() {
        assert_eq!(partition_year(Path::new("/x/year=2023")), Some(2023));
        assert_eq!(partition_year(Path::new("/x/.store.staging")), None);
        assert_eq!(partition_year(Path::new("/x/year=abc")), None);
    }
}
