pub mod analyzers;
pub mod cli;
pub mod config;
pub mod error;
pub mod models;
pub mod processors;
pub mod query;
pub mod readers;
pub mod utils;
pub mod writers;

pub use config::{PipelineConfig, ValidationConfig};
pub use error::{ProcessingError, Result};
pub use models::{CanonicalSchema, ConversionReport, ValidationReport, ValidationStatus};
pub use processors::{Converter, IntegrityValidator};
pub use query::{PartitionedStore, ScanRequest};

#[cfg(test)]
pub(crate) mod test_support {
    use crate::models::schema::CanonicalSchema;
    use chrono::{Duration, NaiveDate};
    use std::path::{Path, PathBuf};

    /// One source row with plausible values for every canonical column.
    #[derive(Debug, Clone)]
    pub struct SampleRow {
        pub date: String,
        pub sitename: String,
        pub county: String,
        pub aqi: String,
        pub pollutant: String,
        pub status: String,
        pub so2: String,
        pub co: String,
        pub o3: String,
        pub o3_8hr: String,
        pub pm10: String,
        pub pm25: String,
        pub no2: String,
        pub nox: String,
        pub no: String,
        pub windspeed: String,
        pub winddirec: String,
        pub unit: String,
        pub co_8hr: String,
        pub pm25_avg: String,
        pub pm10_avg: String,
        pub so2_avg: String,
        pub longitude: String,
        pub latitude: String,
        pub siteid: String,
    }

    impl SampleRow {
        /// Reading `hour` hours after midnight on 1 January of `year`.
        pub fn hourly(year: i32, hour: u32) -> Self {
            let ts = NaiveDate::from_ymd_opt(year, 1, 1)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|d| d + Duration::hours(hour as i64))
                .unwrap();
            let v = (hour % 24) as f64;

            Self {
                date: ts.format("%Y-%m-%d %H:%M").to_string(),
                sitename: "Zhongshan".to_string(),
                county: "Taipei City".to_string(),
                aqi: format!("{}", 30.0 + v),
                pollutant: if hour % 3 == 0 { String::new() } else { "PM2.5".to_string() },
                status: "Good".to_string(),
                so2: format!("{:.1}", 1.0 + v / 10.0),
                co: format!("{:.2}", 0.25 + v / 100.0),
                o3: format!("{:.1}", 20.0 + v),
                o3_8hr: format!("{:.1}", 25.0 + v / 2.0),
                pm10: format!("{:.1}", 18.0 + v),
                pm25: format!("{:.1}", 9.0 + v / 2.0),
                no2: format!("{:.1}", 12.0 + v),
                nox: format!("{:.1}", 15.0 + v),
                no: format!("{:.1}", 2.0 + v / 4.0),
                windspeed: format!("{:.1}", 1.5 + v / 10.0),
                winddirec: format!("{}", (hour * 15) % 360),
                unit: String::new(),
                co_8hr: format!("{:.2}", 0.3 + v / 100.0),
                pm25_avg: format!("{:.1}", 10.0 + v / 3.0),
                pm10_avg: format!("{:.1}", 20.0 + v / 3.0),
                so2_avg: format!("{:.1}", 1.2 + v / 20.0),
                longitude: "121.526528".to_string(),
                latitude: "25.062361".to_string(),
                siteid: "12".to_string(),
            }
        }

        pub fn with_date(mut self, date: &str) -> Self {
            self.date = date.to_string();
            self
        }

        pub fn with_site(mut self, sitename: &str, county: &str, siteid: i32) -> Self {
            self.sitename = sitename.to_string();
            self.county = county.to_string();
            self.siteid = siteid.to_string();
            self
        }

        fn fields(&self) -> [&str; 25] {
            [
                &self.date,
                &self.sitename,
                &self.county,
                &self.aqi,
                &self.pollutant,
                &self.status,
                &self.so2,
                &self.co,
                &self.o3,
                &self.o3_8hr,
                &self.pm10,
                &self.pm25,
                &self.no2,
                &self.nox,
                &self.no,
                &self.windspeed,
                &self.winddirec,
                &self.unit,
                &self.co_8hr,
                &self.pm25_avg,
                &self.pm10_avg,
                &self.so2_avg,
                &self.longitude,
                &self.latitude,
                &self.siteid,
            ]
        }
    }

    /// Write rows under the canonical header, in canonical column order.
    pub fn write_csv(dir: &Path, name: &str, rows: &[SampleRow]) -> PathBuf {
        let path = dir.join(name);
        let mut writer = csv::Writer::from_path(&path).unwrap();
        let schema = CanonicalSchema::air_quality();
        let header: Vec<&str> = schema.columns().iter().map(|c| c.source_name).collect();
        writer.write_record(&header).unwrap();
        for row in rows {
            writer.write_record(row.fields()).unwrap();
        }
        writer.flush().unwrap();
        path
    }
}
