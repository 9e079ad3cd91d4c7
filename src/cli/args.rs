use crate::utils::constants::DEFAULT_EXCEEDANCE_THRESHOLD;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "aqi-processor")]
#[command(about = "Convert hourly air-quality CSV extracts into a year-partitioned Parquet store")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(long, global = true, help = "Log file path")]
    pub log_file: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        help = "Config file (TOML, JSON or YAML); AQI__* environment variables override it"
    )]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Convert a CSV extract into a partitioned store, then validate it
    Convert {
        #[arg(short, long, help = "Source CSV file")]
        input: PathBuf,

        #[arg(short, long, help = "Destination store directory")]
        output: PathBuf,

        #[arg(short, long)]
        batch_size: Option<usize>,

        #[arg(short, long, help = "snappy, gzip, lz4, zstd or none")]
        compression: Option<String>,

        #[arg(long, help = "Replace an existing store at the destination")]
        overwrite: bool,

        #[arg(long, help = "Do not run the integrity checks after converting")]
        skip_validation: bool,

        #[arg(long, help = "Print reports as JSON")]
        json: bool,
    },

    /// Check a converted store against its source extract
    Validate {
        #[arg(short, long, help = "Source CSV file")]
        input: PathBuf,

        #[arg(short, long, help = "Store directory")]
        store: PathBuf,

        #[arg(long)]
        max_workers: Option<usize>,

        #[arg(long, help = "Print the report as JSON")]
        json: bool,
    },

    /// Describe a store: partitions, row counts, last conversion, sample rows
    Info {
        #[arg(short, long)]
        store: PathBuf,

        #[arg(short = 'n', long, default_value = "5")]
        sample: usize,
    },

    /// Compute one of the derived views
    View {
        #[arg(short, long)]
        store: PathBuf,

        #[arg(value_enum)]
        view: ViewKind,

        #[arg(long, default_value_t = DEFAULT_EXCEEDANCE_THRESHOLD)]
        threshold: f64,

        #[arg(short, long, default_value = "20", help = "Rows to print (0 = all)")]
        limit: usize,

        #[arg(long, help = "Print rows as JSON lines")]
        json: bool,
    },

    /// Compare storage footprint and read latency of the CSV and the store
    Benchmark {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        store: PathBuf,

        #[arg(long, default_value = "100000")]
        sample_rows: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ViewKind {
    Daily,
    Monthly,
    Exceedances,
    Stations,
}
