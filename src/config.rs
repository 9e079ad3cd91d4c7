use crate::error::{ProcessingError, Result};
use crate::readers::coercion::NullTokens;
use crate::utils::constants::*;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use validator::Validate;

/// Environment variable prefix, e.g. `AQI__BATCH_SIZE=50000`
pub const ENV_PREFIX: &str = "AQI";

/// Settings for one conversion run. Passed by value into every component so
/// independent runs never share state.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct PipelineConfig {
    #[validate(range(min = 1))]
    pub batch_size: usize,

    /// Replace an already finalized destination instead of refusing
    pub overwrite: bool,

    #[validate(length(min = 1))]
    pub compression: String,

    #[validate(range(min = 1))]
    pub row_group_size: usize,

    #[validate(range(max = 20))]
    pub max_read_retries: u32,

    pub retry_backoff_ms: u64,

    pub null_tokens: Vec<String>,

    /// Rejected rows kept verbatim in the run report
    pub rejected_examples: usize,

    /// Suppress progress bars
    pub silent: bool,

    #[validate(nested)]
    pub validation: ValidationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ValidationConfig {
    #[validate(range(min = 0.0, max = 1.0))]
    pub relative_tolerance: f64,

    /// Allowed null-rate drift, in percentage points
    #[validate(range(min = 0.0, max = 100.0))]
    pub null_tolerance_pp: f64,

    /// Out-of-range share of a column above which the range check fails.
    /// At 1.0 the check can only warn.
    #[validate(range(min = 0.0, max = 1.0))]
    pub range_failure_ratio: f64,

    /// Keep one row in N for medians (1 = every row)
    #[validate(range(min = 1))]
    pub stats_sample_modulus: u64,

    /// Most values per column held for a median; 0 keeps every selected value
    pub median_sample_size: usize,

    pub example_limit: usize,

    #[validate(range(min = 1))]
    pub max_workers: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            overwrite: false,
            compression: COMPRESSION_SNAPPY.to_string(),
            row_group_size: DEFAULT_ROW_GROUP_SIZE,
            max_read_retries: DEFAULT_MAX_READ_RETRIES,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            null_tokens: DEFAULT_NULL_TOKENS.iter().map(|s| s.to_string()).collect(),
            rejected_examples: DEFAULT_REJECTED_EXAMPLES,
            silent: false,
            validation: ValidationConfig::default(),
        }
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            relative_tolerance: DEFAULT_RELATIVE_TOLERANCE,
            null_tolerance_pp: DEFAULT_NULL_TOLERANCE_PP,
            range_failure_ratio: DEFAULT_RANGE_FAILURE_RATIO,
            stats_sample_modulus: 1,
            median_sample_size: DEFAULT_MEDIAN_SAMPLE_SIZE,
            example_limit: DEFAULT_EXAMPLE_LIMIT,
            max_workers: num_cpus::get(),
        }
    }
}

impl PipelineConfig {
    /// Layer defaults, an optional config file and `AQI__*` environment
    /// variables, then check the result.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Some(path) = path {
            if !path.exists() {
                return Err(ProcessingError::Config(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            builder = builder.add_source(File::from(path));
        }

        let loaded: Self = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize()?;

        loaded.checked()
    }

    /// Run the declarative checks and return `self` if they pass.
    pub fn checked(self) -> Result<Self> {
        self.validate()?;
        crate::writers::partition_writer::parse_compression(&self.compression)?;
        Ok(self)
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn with_compression(mut self, compression: &str) -> Self {
        self.compression = compression.to_string();
        self
    }

    pub fn with_silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    pub fn null_tokens(&self) -> NullTokens {
        NullTokens::new(self.null_tokens.iter().cloned())
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}
