pub mod partition_writer;

pub use partition_writer::{parse_compression, partition_file, staging_path_for, PartitionWriter};
