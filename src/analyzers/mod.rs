pub mod benchmark;

pub use benchmark::{Benchmark, BenchmarkReport};
