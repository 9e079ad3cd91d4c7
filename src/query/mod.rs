pub mod store;
pub mod views;

pub use store::{PartitionInfo, PartitionedStore, ScanRequest, StoreScan};
pub use views::{daily_station_averages, exceedance_events, monthly_region_summary, station_metadata};
