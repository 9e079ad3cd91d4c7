use crate::config::PipelineConfig;
use crate::error::{ProcessingError, Result};
use crate::models::report::{RejectedRow, RejectionSummary};
use crate::models::schema::{CanonicalSchema, ColumnType};
use crate::readers::coercion::{coerce, NullTokens, Rejection, TypedValue};
use crate::readers::retry::RetryingReader;
use arrow::array::{
    ArrayRef, Float32Builder, Float64Builder, Int32Builder, StringDictionaryBuilder,
    TimestampMillisecondBuilder,
};
use arrow::datatypes::Int32Type;
use arrow::record_batch::RecordBatch;
use csv::{ReaderBuilder, StringRecord, Trim};
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// One batch of typed rows plus what happened to the raw rows behind it.
#[derive(Debug, Clone)]
pub struct RowBatch {
    pub batch: RecordBatch,
    /// 1-based data row number of the first raw row in this batch
    pub first_row: u64,
    /// Raw rows consumed, accepted or not
    pub rows_read: u64,
    pub rejections: RejectionSummary,
    /// Byte offset in the source after this batch
    pub byte_position: u64,
    /// Transient read failures retried while reading this batch
    pub read_retries: u64,
    pub source_bytes: u64,
}

impl RowBatch {
    pub fn rows_accepted(&self) -> usize {
        self.batch.num_rows()
    }

    /// Fraction of the source consumed so far, for progress display only
    pub fn progress(&self) -> f64 {
        if self.source_bytes == 0 {
            1.0
        } else {
            self.byte_position as f64 / self.source_bytes as f64
        }
    }
}

enum ColumnBuilder {
    Timestamp(TimestampMillisecondBuilder),
    Narrow(Float32Builder),
    Wide(Float64Builder),
    Integer(Int32Builder),
    Categorical(StringDictionaryBuilder<Int32Type>),
}

impl ColumnBuilder {
    fn new(kind: ColumnType, capacity: usize) -> Self {
        match kind {
            ColumnType::Timestamp => {
                ColumnBuilder::Timestamp(TimestampMillisecondBuilder::with_capacity(capacity))
            }
            ColumnType::NarrowFloat => ColumnBuilder::Narrow(Float32Builder::with_capacity(capacity)),
            ColumnType::WideFloat => ColumnBuilder::Wide(Float64Builder::with_capacity(capacity)),
            ColumnType::Integer => ColumnBuilder::Integer(Int32Builder::with_capacity(capacity)),
            ColumnType::Categorical => ColumnBuilder::Categorical(StringDictionaryBuilder::new()),
        }
    }

    fn append(&mut self, value: TypedValue<'_>) -> Result<()> {
        match (self, value) {
            (ColumnBuilder::Timestamp(b), TypedValue::Timestamp(ts)) => {
                b.append_value(ts.and_utc().timestamp_millis())
            }
            (ColumnBuilder::Narrow(b), TypedValue::Narrow(v)) => b.append_value(v),
            (ColumnBuilder::Wide(b), TypedValue::Wide(v)) => b.append_value(v),
            (ColumnBuilder::Integer(b), TypedValue::Integer(v)) => b.append_value(v),
            (ColumnBuilder::Categorical(b), TypedValue::Text(s)) => {
                b.append(s)?;
            }
            (builder, TypedValue::Null) => builder.append_null(),
            (_, other) => {
                return Err(ProcessingError::InvalidFormat(format!(
                    "Value {:?} does not match its column builder",
                    other
                )))
            }
        }
        Ok(())
    }

    fn append_null(&mut self) {
        match self {
            ColumnBuilder::Timestamp(b) => b.append_null(),
            ColumnBuilder::Narrow(b) => b.append_null(),
            ColumnBuilder::Wide(b) => b.append_null(),
            ColumnBuilder::Integer(b) => b.append_null(),
            ColumnBuilder::Categorical(b) => b.append_null(),
        }
    }

    fn finish(&mut self) -> ArrayRef {
        match self {
            ColumnBuilder::Timestamp(b) => Arc::new(b.finish()),
            ColumnBuilder::Narrow(b) => Arc::new(b.finish()),
            ColumnBuilder::Wide(b) => Arc::new(b.finish()),
            ColumnBuilder::Integer(b) => Arc::new(b.finish()),
            ColumnBuilder::Categorical(b) => Arc::new(b.finish()),
        }
    }
}

/// Lazy sequence of typed row batches read from a delimited source.
///
/// Each batch holds at most `batch_size` accepted rows and is independent of
/// the others; nothing from an earlier batch is retained once it is yielded.
pub struct ChunkedReader {
    reader: csv::Reader<RetryingReader<File>>,
    schema: CanonicalSchema,
    /// Source field position for each canonical column
    positions: Vec<usize>,
    nulls: NullTokens,
    batch_size: usize,
    example_limit: usize,
    examples_kept: usize,
    rows_read: u64,
    source_bytes: u64,
    record: StringRecord,
    finished: bool,
}

impl ChunkedReader {
    pub fn open(path: &Path, schema: CanonicalSchema, config: &PipelineConfig) -> Result<Self> {
        let file = File::open(path)?;
        let source_bytes = file.metadata()?.len();
        let source = RetryingReader::new(file, config.max_read_retries, config.retry_backoff());

        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(Trim::All)
            .buffer_capacity(crate::utils::constants::DEFAULT_BUFFER_SIZE)
            .from_reader(source);

        let headers = reader.headers()?.clone();
        let positions = resolve_positions(&headers, &schema)?;

        debug!(
            path = %path.display(),
            columns = headers.len(),
            source_bytes,
            "opened source"
        );

        Ok(Self {
            reader,
            schema,
            positions,
            nulls: config.null_tokens(),
            batch_size: config.batch_size.max(1),
            example_limit: config.rejected_examples,
            examples_kept: 0,
            rows_read: 0,
            source_bytes,
            record: StringRecord::new(),
            finished: false,
        })
    }

    pub fn schema(&self) -> &CanonicalSchema {
        &self.schema
    }

    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    pub fn source_bytes(&self) -> u64 {
        self.source_bytes
    }

    fn read_batch(&mut self) -> Result<Option<RowBatch>> {
        let mut builders: Vec<ColumnBuilder> = self
            .schema
            .columns()
            .iter()
            .map(|c| ColumnBuilder::new(c.kind, self.batch_size))
            .collect();

        let first_row = self.rows_read + 1;
        let retries_before = self.reader.get_ref().retries_used();
        let mut rejections = RejectionSummary::default();
        let mut accepted = 0usize;
        let mut consumed = 0u64;
        let ts_index = self.schema.timestamp_index();

        while accepted < self.batch_size {
            let has_record = match self.reader.read_record(&mut self.record) {
                Ok(has_record) => has_record,
                Err(source) => {
                    let byte = source
                        .position()
                        .map(|p| p.byte())
                        .unwrap_or_else(|| self.reader.position().byte());
                    return Err(ProcessingError::ReadFailed {
                        row: self.rows_read + 1,
                        byte,
                        source,
                    });
                }
            };
            if !has_record {
                self.finished = true;
                break;
            }

            self.rows_read += 1;
            consumed += 1;
            let row = self.rows_read;

            let timestamp = match self.record.get(self.positions[ts_index]) {
                Some(raw) => coerce(raw, ColumnType::Timestamp, &self.nulls),
                None => Err(Rejection::MalformedRow),
            };
            let timestamp = match timestamp {
                Ok(value) => value,
                Err(reason) => {
                    let keep = self.examples_kept < self.example_limit;
                    if keep {
                        self.examples_kept += 1;
                    }
                    rejections.reject(reason, keep.then(|| RejectedRow { row, reason }));
                    continue;
                }
            };

            for (i, def) in self.schema.columns().iter().enumerate() {
                if i == ts_index {
                    builders[i].append(timestamp.clone())?;
                    continue;
                }
                let raw = self.record.get(self.positions[i]).unwrap_or("");
                match coerce(raw, def.kind, &self.nulls) {
                    Ok(value) => builders[i].append(value)?,
                    Err(_) => {
                        rejections.coerced_null(def.name);
                        builders[i].append_null();
                    }
                }
            }
            accepted += 1;
        }

        if consumed == 0 {
            return Ok(None);
        }

        let columns: Vec<ArrayRef> = builders.iter_mut().map(ColumnBuilder::finish).collect();
        let batch = RecordBatch::try_new(self.schema.arrow_schema(), columns)?;

        Ok(Some(RowBatch {
            batch,
            first_row,
            rows_read: consumed,
            rejections,
            byte_position: self.reader.position().byte(),
            read_retries: self.reader.get_ref().retries_used() - retries_before,
            source_bytes: self.source_bytes,
        }))
    }
}

impl Iterator for ChunkedReader {
    type Item = Result<RowBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.read_batch() {
            Ok(Some(batch)) => Some(Ok(batch)),
            Ok(None) => None,
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

/// Map each canonical column to its field position by header name.
pub fn resolve_positions(headers: &StringRecord, schema: &CanonicalSchema) -> Result<Vec<usize>> {
    schema
        .columns()
        .iter()
        .map(|def| {
            headers
                .iter()
                .position(|h| h.trim() == def.source_name)
                .ok_or_else(|| ProcessingError::MissingColumn {
                    column: def.source_name.to_string(),
                })
        })
        .collect()
}
