//! Derived views over the store, computed lazily by scanning only the columns
//! each view needs.

use crate::error::{ProcessingError, Result};
use crate::models::views::{
    DailyStationAverage, ExceedanceEvent, MonthlyRegionSummary, StationMetadata,
};
use crate::query::store::{PartitionedStore, ScanRequest};
use crate::utils::columns::{naive_from_millis, timestamps, NumericColumn, TextColumn};
use arrow::array::{Array, ArrayRef};
use arrow::record_batch::RecordBatch;
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Default)]
struct Mean {
    sum: f64,
    count: u64,
}

impl Mean {
    fn push(&mut self, value: Option<f64>) {
        if let Some(v) = value {
            self.sum += v;
            self.count += 1;
        }
    }

    fn get(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }
}

fn column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a ArrayRef> {
    batch
        .column_by_name(name)
        .ok_or_else(|| ProcessingError::MissingColumn {
            column: name.to_string(),
        })
}

fn numeric<'a>(batch: &'a RecordBatch, name: &str) -> Result<NumericColumn<'a>> {
    NumericColumn::try_new(column(batch, name)?).ok_or_else(|| {
        ProcessingError::InvalidFormat(format!("Column '{}' is not numeric", name))
    })
}

fn text<'a>(batch: &'a RecordBatch, name: &str) -> Result<TextColumn<'a>> {
    TextColumn::try_new(column(batch, name)?).ok_or_else(|| {
        ProcessingError::InvalidFormat(format!("Column '{}' is not a label column", name))
    })
}

/// Walk every row that has a usable timestamp.
fn for_each_row<F>(store: &PartitionedStore, columns: &[&str], mut visit: F) -> Result<()>
where
    F: FnMut(&RecordBatch, usize, NaiveDateTime) -> Result<()>,
{
    for item in store.scan(ScanRequest::all().columns(columns))? {
        let (_, batch) = item?;
        let dates = timestamps(column(&batch, "date")?).ok_or_else(|| {
            ProcessingError::InvalidFormat("Column 'date' is not a timestamp".to_string())
        })?;
        for row in 0..batch.num_rows() {
            if dates.is_null(row) {
                continue;
            }
            if let Some(ts) = naive_from_millis(dates.value(row)) {
                visit(&batch, row, ts)?;
            }
        }
    }
    Ok(())
}

#[derive(Default)]
struct DailyAccumulator {
    county: Option<String>,
    aqi: Mean,
    pm2_5: Mean,
    pm10: Mean,
    o3: Mean,
    count: u64,
}

/// Mean readings per station per calendar day.
pub fn daily_station_averages(store: &PartitionedStore) -> Result<Vec<DailyStationAverage>> {
    let mut groups: BTreeMap<(NaiveDate, Option<String>, Option<String>), DailyAccumulator> =
        BTreeMap::new();

    for_each_row(
        store,
        &["date", "sitename", "county", "aqi", "pm2_5", "pm10", "o3"],
        |batch, row, ts| {
            let sitename = text(batch, "sitename")?.get(row).map(str::to_string);
            let county = text(batch, "county")?.get(row).map(str::to_string);
            let acc = groups
                .entry((ts.date(), sitename, county.clone()))
                .or_default();
            acc.county = county;
            acc.aqi.push(numeric(batch, "aqi")?.get(row));
            acc.pm2_5.push(numeric(batch, "pm2_5")?.get(row));
            acc.pm10.push(numeric(batch, "pm10")?.get(row));
            acc.o3.push(numeric(batch, "o3")?.get(row));
            acc.count += 1;
            Ok(())
        },
    )?;

    Ok(groups
        .into_iter()
        .map(|((date, sitename, _), acc)| DailyStationAverage {
            date,
            sitename,
            county: acc.county,
            avg_aqi: acc.aqi.get(),
            avg_pm2_5: acc.pm2_5.get(),
            avg_pm10: acc.pm10.get(),
            avg_o3: acc.o3.get(),
            measurement_count: acc.count,
        })
        .collect())
}

#[derive(Default)]
struct MonthlyAccumulator {
    aqi: Mean,
    max_aqi: Option<f64>,
    min_aqi: Option<f64>,
    pm2_5: Mean,
    count: u64,
    stations: BTreeSet<String>,
}

/// Aqi spread and mean pm2.5 per county per month.
pub fn monthly_region_summary(store: &PartitionedStore) -> Result<Vec<MonthlyRegionSummary>> {
    let mut groups: BTreeMap<(i32, u32, Option<String>), MonthlyAccumulator> = BTreeMap::new();

    for_each_row(
        store,
        &["date", "sitename", "county", "aqi", "pm2_5"],
        |batch, row, ts| {
            let county = text(batch, "county")?.get(row).map(str::to_string);
            let acc = groups
                .entry((ts.year(), ts.month(), county))
                .or_default();
            let aqi = numeric(batch, "aqi")?.get(row);
            acc.aqi.push(aqi);
            if let Some(v) = aqi {
                acc.max_aqi = Some(acc.max_aqi.map_or(v, |m| m.max(v)));
                acc.min_aqi = Some(acc.min_aqi.map_or(v, |m| m.min(v)));
            }
            acc.pm2_5.push(numeric(batch, "pm2_5")?.get(row));
            if let Some(site) = text(batch, "sitename")?.get(row) {
                if !acc.stations.contains(site) {
                    acc.stations.insert(site.to_string());
                }
            }
            acc.count += 1;
            Ok(())
        },
    )?;

    Ok(groups
        .into_iter()
        .map(|((year, month, county), acc)| MonthlyRegionSummary {
            year,
            month,
            county,
            avg_aqi: acc.aqi.get(),
            max_aqi: acc.max_aqi,
            min_aqi: acc.min_aqi,
            avg_pm2_5: acc.pm2_5.get(),
            measurement_count: acc.count,
            station_count: acc.stations.len(),
        })
        .collect())
}

/// Readings whose aqi is strictly above `threshold`, worst first.
pub fn exceedance_events(store: &PartitionedStore, threshold: f64) -> Result<Vec<ExceedanceEvent>> {
    let mut events = Vec::new();

    for_each_row(
        store,
        &[
            "date", "sitename", "county", "aqi", "pollutant", "status", "pm2_5", "pm10", "o3",
        ],
        |batch, row, ts| {
            let Some(aqi) = numeric(batch, "aqi")?.get(row) else {
                return Ok(());
            };
            if aqi <= threshold {
                return Ok(());
            }
            events.push(ExceedanceEvent {
                date: ts,
                sitename: text(batch, "sitename")?.get(row).map(str::to_string),
                county: text(batch, "county")?.get(row).map(str::to_string),
                aqi,
                pollutant: text(batch, "pollutant")?.get(row).map(str::to_string),
                status: text(batch, "status")?.get(row).map(str::to_string),
                pm2_5: numeric(batch, "pm2_5")?.get(row),
                pm10: numeric(batch, "pm10")?.get(row),
                o3: numeric(batch, "o3")?.get(row),
            });
            Ok(())
        },
    )?;

    events.sort_by(|a, b| b.aqi.total_cmp(&a.aqi).then_with(|| a.date.cmp(&b.date)));
    Ok(events)
}

type StationKey = (Option<String>, Option<String>, Option<i32>, Option<u64>, Option<u64>);

/// Distinct station descriptions with their observation span.
pub fn station_metadata(store: &PartitionedStore) -> Result<Vec<StationMetadata>> {
    let mut stations: BTreeMap<StationKey, (NaiveDateTime, NaiveDateTime)> = BTreeMap::new();

    for_each_row(
        store,
        &["date", "sitename", "county", "longitude", "latitude", "siteid"],
        |batch, row, ts| {
            let key = (
                text(batch, "sitename")?.get(row).map(str::to_string),
                text(batch, "county")?.get(row).map(str::to_string),
                numeric(batch, "siteid")?.get(row).map(|v| v as i32),
                // Bit patterns so coordinates can key an ordered map
                numeric(batch, "longitude")?.get(row).map(f64::to_bits),
                numeric(batch, "latitude")?.get(row).map(f64::to_bits),
            );
            stations
                .entry(key)
                .and_modify(|(first, last)| {
                    *first = (*first).min(ts);
                    *last = (*last).max(ts);
                })
                .or_insert((ts, ts));
            Ok(())
        },
    )?;

    Ok(stations
        .into_iter()
        .map(
            |((sitename, county, siteid, lon, lat), (first, last))| StationMetadata {
                sitename,
                county,
                siteid,
                longitude: lon.map(f64::from_bits),
                latitude: lat.map(f64::from_bits),
                first_measurement: first,
                last_measurement: last,
            },
        )
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::processors::Converter;
    use crate::test_support::{write_csv, SampleRow};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn store_from(dir: &std::path::Path, rows: &[SampleRow]) -> PartitionedStore {
        let source = write_csv(dir, "source.csv", rows);
        let dest = dir.join("store");
        Converter::new(PipelineConfig::default().with_silent(true))
            .convert(&source, &dest)
            .unwrap();
        PartitionedStore::open(&dest).unwrap()
    }

    fn two_stations() -> Vec<SampleRow> {
        let mut rows = Vec::new();
        for (i, aqi) in [40.0, 60.0, 150.0].iter().enumerate() {
            let mut row = SampleRow::hourly(2023, i as u32);
            row.aqi = aqi.to_string();
            rows.push(row);
        }
        let mut other = SampleRow::hourly(2023, 30).with_site("Banqiao", "New Taipei City", 2);
        other.aqi = "120".to_string();
        rows.push(other);
        rows
    }

    #[test]
    fn test_daily_station_averages() {
        let dir = TempDir::new().unwrap();
        let store = store_from(dir.path(), &two_stations());
        let daily = daily_station_averages(&store).unwrap();

        assert_eq!(daily.len(), 2);
        let first = &daily[0];
        assert_eq!(first.date, NaiveDate::from_ymd_opt(2023, 1, 1).unwrap());
        assert_eq!(first.measurement_count, 3);
        assert!((first.avg_aqi.unwrap() - 250.0 / 3.0).abs() < 1e-3);
        assert_eq!(daily[1].sitename.as_deref(), Some("Banqiao"));
    }

    #[test]
    fn test_monthly_region_summary() {
        let dir = TempDir::new().unwrap();
        let store = store_from(dir.path(), &two_stations());
        let monthly = monthly_region_summary(&store).unwrap();

        let taipei = monthly
            .iter()
            .find(|m| m.county.as_deref() == Some("Taipei City"))
            .unwrap();
        assert_eq!((taipei.year, taipei.month), (2023, 1));
        assert_eq!(taipei.max_aqi, Some(150.0));
        assert_eq!(taipei.min_aqi, Some(40.0));
        assert_eq!(taipei.station_count, 1);
        assert_eq!(taipei.measurement_count, 3);
    }

    #[test]
    fn test_exceedance_events_sorted_worst_first() {
        let dir = TempDir::new().unwrap();
        let store = store_from(dir.path(), &two_stations());
        let events = exceedance_events(&store, 100.0).unwrap();

        let aqis: Vec<f64> = events.iter().map(|e| e.aqi).collect();
        assert_eq!(aqis, vec![150.0, 120.0]);
        assert!(exceedance_events(&store, 500.0).unwrap().is_empty());
    }

    #[test]
    fn test_station_metadata_span() {
        let dir = TempDir::new().unwrap();
        let store = store_from(dir.path(), &two_stations());
        let stations = station_metadata(&store).unwrap();

        assert_eq!(stations.len(), 2);
        let banqiao = stations
            .iter()
            .find(|s| s.sitename.as_deref() == Some("Banqiao"))
            .unwrap();
        assert_eq!(banqiao.siteid, Some(2));
        assert_eq!(banqiao.first_measurement, banqiao.last_measurement);

        let other = stations
            .iter()
            .find(|s| s.sitename.as_deref() != Some("Banqiao"))
            .unwrap();
        assert_eq!(other.first_measurement.date(), other.last_measurement.date());
        assert!(other.first_measurement < other.last_measurement);
    }
}
