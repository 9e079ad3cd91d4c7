pub mod report;
pub mod schema;
pub mod validation;
pub mod views;

pub use report::{ConversionReport, PartitionSummary, RejectedRow, RejectionSummary};
pub use schema::{CanonicalSchema, ColumnDef, ColumnType};
pub use validation::{
    CheckDetails, CheckResult, CheckStatus, Severity, ValidationReport, ValidationStatus,
};
pub use views::{DailyStationAverage, ExceedanceEvent, MonthlyRegionSummary, StationMetadata};
