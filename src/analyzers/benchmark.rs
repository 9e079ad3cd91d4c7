use crate::config::PipelineConfig;
use crate::error::{ProcessingError, Result};
use crate::models::schema::{CanonicalSchema, ColumnType};
use crate::query::store::{PartitionedStore, ScanRequest};
use crate::readers::chunked_reader::{resolve_positions, ChunkedReader};
use crate::readers::coercion::{coerce, TypedValue};
use crate::utils::columns::{NumericColumn, TextColumn};
use csv::{ReaderBuilder, StringRecord, Trim};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Instant;
use tracing::info;

#[derive(Debug, Clone, Serialize)]
pub struct StorageFootprint {
    pub csv_bytes: u64,
    pub store_bytes: u64,
    pub compression_ratio: Option<f64>,
    pub space_saved_pct: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Timing {
    pub rows: usize,
    pub csv_seconds: f64,
    pub store_seconds: f64,
}

impl Timing {
    pub fn speedup(&self) -> Option<f64> {
        (self.store_seconds > 0.0).then(|| self.csv_seconds / self.store_seconds)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkReport {
    pub footprint: StorageFootprint,
    pub load: Timing,
    /// Mean aqi per county, aggregated over each format in full
    pub query: Timing,
    pub counties: usize,
}

impl BenchmarkReport {
    pub fn summary(&self) -> String {
        let mut summary = String::new();
        let mb = |b: u64| b as f64 / 1_048_576.0;

        summary.push_str("=== Benchmark Report ===\n");
        summary.push_str(&format!("CSV size:         {:>10.2} MB\n", mb(self.footprint.csv_bytes)));
        summary.push_str(&format!("Store size:       {:>10.2} MB\n", mb(self.footprint.store_bytes)));
        if let Some(ratio) = self.footprint.compression_ratio {
            summary.push_str(&format!("Compression:      {:>10.2}x\n", ratio));
        }
        if let Some(saved) = self.footprint.space_saved_pct {
            summary.push_str(&format!("Space saved:      {:>10.1}%\n", saved));
        }
        summary.push_str(&format!("Load ({} rows)\n", self.load.rows));
        summary.push_str(&format!("  CSV:            {:>10.3} s\n", self.load.csv_seconds));
        summary.push_str(&format!("  Store:          {:>10.3} s\n", self.load.store_seconds));
        if let Some(speedup) = self.load.speedup() {
            summary.push_str(&format!("  Speedup:        {:>10.1}x\n", speedup));
        }
        summary.push_str(&format!(
            "Query: mean aqi by county ({} rows, {} counties)\n",
            self.query.rows, self.counties
        ));
        summary.push_str(&format!("  CSV:            {:>10.3} s\n", self.query.csv_seconds));
        summary.push_str(&format!("  Store:          {:>10.3} s\n", self.query.store_seconds));
        if let Some(speedup) = self.query.speedup() {
            summary.push_str(&format!("  Speedup:        {:>10.1}x\n", speedup));
        }

        summary
    }
}

/// Compares the source extract with its converted store. Diagnostic only.
pub struct Benchmark {
    config: PipelineConfig,
    sample_rows: usize,
}

impl Benchmark {
    pub fn new(config: PipelineConfig, sample_rows: usize) -> Self {
        Self {
            config,
            sample_rows: sample_rows.max(1),
        }
    }

    pub fn run(&self, source: &Path, store_root: &Path) -> Result<BenchmarkReport> {
        let store = PartitionedStore::open(store_root)?;
        let footprint = footprint(fs::metadata(source)?.len(), store.total_bytes());

        let start = Instant::now();
        let csv_rows = self.load_csv(source)?;
        let csv_seconds = start.elapsed().as_secs_f64();

        let start = Instant::now();
        let store_rows = self.load_store(&store)?;
        let store_seconds = start.elapsed().as_secs_f64();
        info!(csv_rows, store_rows, csv_seconds, store_seconds, "load benchmark");

        let start = Instant::now();
        let (csv_means, query_rows) = self.mean_aqi_by_county_csv(source)?;
        let csv_query = start.elapsed().as_secs_f64();

        let start = Instant::now();
        let store_means = mean_aqi_by_county_store(&store)?;
        let store_query = start.elapsed().as_secs_f64();

        if csv_means.len() != store_means.len() {
            tracing::warn!(
                csv = csv_means.len(),
                store = store_means.len(),
                "county aggregates differ between formats"
            );
        }

        Ok(BenchmarkReport {
            footprint,
            load: Timing {
                rows: csv_rows.min(store_rows),
                csv_seconds,
                store_seconds,
            },
            query: Timing {
                rows: query_rows,
                csv_seconds: csv_query,
                store_seconds: store_query,
            },
            counties: store_means.len(),
        })
    }

    fn load_csv(&self, source: &Path) -> Result<usize> {
        let config = self.config.clone().with_batch_size(self.sample_rows);
        let mut reader = ChunkedReader::open(source, CanonicalSchema::air_quality(), &config)?;
        match reader.next() {
            Some(batch) => Ok(batch?.rows_accepted()),
            None => Ok(0),
        }
    }

    fn load_store(&self, store: &PartitionedStore) -> Result<usize> {
        let mut rows = 0;
        for item in store.scan(ScanRequest::all().batch_size(self.sample_rows))? {
            let (_, batch) = item?;
            rows += batch.num_rows();
            if rows >= self.sample_rows {
                break;
            }
        }
        Ok(rows.min(self.sample_rows))
    }

    fn mean_aqi_by_county_csv(&self, source: &Path) -> Result<(BTreeMap<String, f64>, usize)> {
        let schema = CanonicalSchema::air_quality();
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(Trim::All)
            .from_path(source)?;
        let positions = resolve_positions(&reader.headers()?.clone(), &schema)?;
        let county_pos = schema
            .index_of("county")
            .map(|i| positions[i])
            .ok_or_else(|| ProcessingError::MissingColumn {
                column: "county".to_string(),
            })?;
        let aqi_pos = schema
            .index_of("aqi")
            .map(|i| positions[i])
            .ok_or_else(|| ProcessingError::MissingColumn {
                column: "aqi".to_string(),
            })?;

        let nulls = self.config.null_tokens();
        let mut sums: BTreeMap<String, (f64, u64)> = BTreeMap::new();
        let mut rows = 0;
        let mut record = StringRecord::new();
        while reader.read_record(&mut record)? {
            rows += 1;
            let county = record.get(county_pos).unwrap_or("");
            if nulls.is_null(county) {
                continue;
            }
            let raw = record.get(aqi_pos).unwrap_or("");
            if let Ok(TypedValue::Narrow(aqi)) = coerce(raw, ColumnType::NarrowFloat, &nulls) {
                let entry = sums.entry(county.to_string()).or_insert((0.0, 0));
                entry.0 += aqi as f64;
                entry.1 += 1;
            }
        }

        Ok((finish_means(sums), rows))
    }
}

fn footprint(csv_bytes: u64, store_bytes: u64) -> StorageFootprint {
    let (compression_ratio, space_saved_pct) = if store_bytes > 0 && csv_bytes > 0 {
        (
            Some(csv_bytes as f64 / store_bytes as f64),
            Some((1.0 - store_bytes as f64 / csv_bytes as f64) * 100.0),
        )
    } else {
        (None, None)
    };
    StorageFootprint {
        csv_bytes,
        store_bytes,
        compression_ratio,
        space_saved_pct,
    }
}

/// Mean aqi per county read through the store's column projection.
pub fn mean_aqi_by_county_store(store: &PartitionedStore) -> Result<BTreeMap<String, f64>> {
    let mut sums: BTreeMap<String, (f64, u64)> = BTreeMap::new();
    for item in store.scan(ScanRequest::all().columns(&["county", "aqi"]))? {
        let (_, batch) = item?;
        let (Some(county), Some(aqi)) = (
            batch.column_by_name("county").and_then(TextColumn::try_new),
            batch.column_by_name("aqi").and_then(NumericColumn::try_new),
        ) else {
            return Err(ProcessingError::InvalidFormat(
                "county or aqi column has an unexpected type".to_string(),
            ));
        };
        for row in 0..batch.num_rows() {
            if let (Some(c), Some(v)) = (county.get(row), aqi.get(row)) {
                let entry = sums.entry(c.to_string()).or_insert((0.0, 0));
                entry.0 += v;
                entry.1 += 1;
            }
        }
    }
    Ok(finish_means(sums))
}

fn finish_means(sums: BTreeMap<String, (f64, u64)>) -> BTreeMap<String, f64> {
    sums.into_iter()
        .filter(|(_, (_, n))| *n > 0)
        .map(|(k, (sum, n))| (k, sum / n as f64))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processors::Converter;
    use crate::test_support::{write_csv, SampleRow};
    use tempfile::TempDir;

    #[test]
    fn test_benchmark_reports_both_formats() {
        let dir = TempDir::new().unwrap();
        let rows: Vec<SampleRow> = (0..50).map(|i| SampleRow::hourly(2024, i)).collect();
        let source = write_csv(dir.path(), "source.csv", &rows);
        let dest = dir.path().join("store");
        let config = PipelineConfig::default().with_silent(true);
        Converter::new(config.clone()).convert(&source, &dest).unwrap();

        let report = Benchmark::new(config, 20).run(&source, &dest).unwrap();
        assert_eq!(report.load.rows, 20);
        assert_eq!(report.query.rows, 50);
        assert_eq!(report.counties, 1);
        assert!(report.footprint.store_bytes > 0);
        assert!(report.summary().contains("mean aqi by county"));
    }

    #[test]
    fn test_store_and_csv_aggregates_agree() {
        let dir = TempDir::new().unwrap();
        let mut rows: Vec<SampleRow> = (0..6).map(|i| SampleRow::hourly(2024, i)).collect();
        rows.push(SampleRow::hourly(2024, 7).with_site("Hualien", "Hualien County", 24));
        let source = write_csv(dir.path(), "source.csv", &rows);
        let dest = dir.path().join("store");
        let config = PipelineConfig::default().with_silent(true);
        Converter::new(config.clone()).convert(&source, &dest).unwrap();

        let store = PartitionedStore::open(&dest).unwrap();
        let from_store = mean_aqi_by_county_store(&store).unwrap();
        let (from_csv, _) = Benchmark::new(config, 10)
            .mean_aqi_by_county_csv(&source)
            .unwrap();

        assert_eq!(from_store.len(), 2);
        for (county, mean) in &from_store {
            assert!((mean - from_csv[county]).abs() < 1e-6, "{}", county);
        }
    }

    #[test]
    fn test_footprint_ratios() {
        let f = footprint(1000, 250);
        assert_eq!(f.compression_ratio, Some(4.0));
        assert_eq!(f.space_saved_pct, Some(75.0));
        assert_eq!(footprint(1000, 0).compression_ratio, None);
    }
}
