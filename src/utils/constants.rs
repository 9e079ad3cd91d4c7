/// Partition directory prefix (`year=YYYY`)
pub const PARTITION_PREFIX: &str = "year=";

/// Run manifest written into every finalized store
pub const MANIFEST_FILE: &str = "_conversion.json";

/// Data file name inside a partition directory
pub const PARTITION_FILE: &str = "part-0.parquet";

/// Staging directory suffix, placed next to the destination
pub const STAGING_SUFFIX: &str = ".staging";

/// Null tokens recognised in the source extract
pub const DEFAULT_NULL_TOKENS: [&str; 6] = ["", "-", "NA", "N/A", "null", "NULL"];

/// Processing defaults
pub const DEFAULT_BATCH_SIZE: usize = 100_000;
pub const DEFAULT_ROW_GROUP_SIZE: usize = 100_000;
pub const DEFAULT_BUFFER_SIZE: usize = 8192 * 16; // 128KB
pub const DEFAULT_MAX_READ_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 100;
pub const DEFAULT_REJECTED_EXAMPLES: usize = 20;

/// Validation defaults
pub const DEFAULT_RELATIVE_TOLERANCE: f64 = 1e-3;
pub const DEFAULT_NULL_TOLERANCE_PP: f64 = 0.5;
/// Out-of-range values only warn unless a stricter ratio is configured
pub const DEFAULT_RANGE_FAILURE_RATIO: f64 = 1.0;
pub const DEFAULT_MEDIAN_SAMPLE_SIZE: usize = 50_000;
pub const DEFAULT_EXAMPLE_LIMIT: usize = 5;

/// AQI above which an hour counts as an exceedance event
pub const DEFAULT_EXCEEDANCE_THRESHOLD: f64 = 100.0;

/// Parquet compression options
pub const COMPRESSION_SNAPPY: &str = "snappy";
pub const COMPRESSION_GZIP: &str = "gzip";
pub const COMPRESSION_LZ4: &str = "lz4";
pub const COMPRESSION_ZSTD: &str = "zstd";
pub const COMPRESSION_NONE: &str = "none";
