use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyStationAverage {
    pub date: NaiveDate,
    pub sitename: Option<String>,
    pub county: Option<String>,
    pub avg_aqi: Option<f64>,
    pub avg_pm2_5: Option<f64>,
    pub avg_pm10: Option<f64>,
    pub avg_o3: Option<f64>,
    pub measurement_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyRegionSummary {
    pub year: i32,
    pub month: u32,
    pub county: Option<String>,
    pub avg_aqi: Option<f64>,
    pub max_aqi: Option<f64>,
    pub min_aqi: Option<f64>,
    pub avg_pm2_5: Option<f64>,
    pub measurement_count: u64,
    pub station_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceedanceEvent {
    pub date: NaiveDateTime,
    pub sitename: Option<String>,
    pub county: Option<String>,
    pub aqi: f64,
    pub pollutant: Option<String>,
    pub status: Option<String>,
    pub pm2_5: Option<f64>,
    pub pm10: Option<f64>,
    pub o3: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationMetadata {
    pub sitename: Option<String>,
    pub county: Option<String>,
    pub siteid: Option<i32>,
    pub longitude: Option<f64>,
    pub latitude: Option<f64>,
    pub first_measurement: NaiveDateTime,
    pub last_measurement: NaiveDateTime,
}
