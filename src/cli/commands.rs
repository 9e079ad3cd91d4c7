use crate::analyzers::Benchmark;
use crate::cli::args::{Cli, Commands, ViewKind};
use crate::config::PipelineConfig;
use crate::error::{ProcessingError, Result};
use crate::models::validation::{CheckStatus, ValidationReport};
use crate::processors::{Converter, IntegrityValidator};
use crate::query::{self, PartitionedStore, ScanRequest};
use arrow::util::pretty::pretty_format_batches;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

pub async fn run(cli: Cli) -> Result<()> {
    let config = PipelineConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Convert {
            input,
            output,
            batch_size,
            compression,
            overwrite,
            skip_validation,
            json,
        } => {
            let overwrite = overwrite || config.overwrite;
            let mut config = config.with_overwrite(overwrite);
            if let Some(batch_size) = batch_size {
                config = config.with_batch_size(batch_size);
            }
            if let Some(compression) = compression {
                config = config.with_compression(&compression);
            }
            let config = config.checked()?;

            println!("Converting air-quality data...");
            println!("Input file: {}", input.display());
            println!("Output store: {}", output.display());
            println!(
                "Batch size: {}, Compression: {}",
                config.batch_size, config.compression
            );

            let abort = Arc::new(AtomicBool::new(false));
            let flag = abort.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupt received, stopping after the current batch");
                    flag.store(true, Ordering::Relaxed);
                }
            });

            let converter = Converter::new(config.clone()).with_abort(abort);
            let (source, destination) = (input.clone(), output.clone());
            let report =
                tokio::task::spawn_blocking(move || converter.convert(&source, &destination))
                    .await??;

            if json {
                print_json(&report)?;
            } else {
                println!("\n{}", report.summary());
            }

            if skip_validation {
                println!("Validation skipped");
                return Ok(());
            }

            let validation = tokio::task::spawn_blocking(move || {
                IntegrityValidator::new(&config).validate(&input, &output, Some(&report))
            })
            .await??;
            finish_validation(&validation, json)?;
        }

        Commands::Validate {
            input,
            store,
            max_workers,
            json,
        } => {
            let mut config = config;
            if let Some(max_workers) = max_workers {
                config.validation.max_workers = max_workers;
            }
            let config = config.checked()?;

            println!("Validating {} against {}", store.display(), input.display());
            let validation = tokio::task::spawn_blocking(move || {
                IntegrityValidator::new(&config).validate(&input, &store, None)
            })
            .await??;
            finish_validation(&validation, json)?;
        }

        Commands::Info { store, sample } => {
            tokio::task::spawn_blocking(move || describe_store(store, sample)).await??;
        }

        Commands::View {
            store,
            view,
            threshold,
            limit,
            json,
        } => {
            tokio::task::spawn_blocking(move || -> Result<()> {
                let store = PartitionedStore::open(&store)?;
                match view {
                    ViewKind::Daily => print_rows(&query::daily_station_averages(&store)?, limit, json),
                    ViewKind::Monthly => print_rows(&query::monthly_region_summary(&store)?, limit, json),
                    ViewKind::Exceedances => {
                        print_rows(&query::exceedance_events(&store, threshold)?, limit, json)
                    }
                    ViewKind::Stations => print_rows(&query::station_metadata(&store)?, limit, json),
                }
            })
            .await??;
        }

        Commands::Benchmark {
            input,
            store,
            sample_rows,
        } => {
            println!("Benchmarking {} against {}", input.display(), store.display());
            let report = tokio::task::spawn_blocking(move || {
                Benchmark::new(config, sample_rows).run(&input, &store)
            })
            .await??;
            println!("\n{}", report.summary());
        }
    }

    Ok(())
}

fn finish_validation(report: &ValidationReport, json: bool) -> Result<()> {
    if json {
        print_json(report)?;
    } else {
        println!("\n{}", report.summary());
    }

    if report.is_failed() {
        let failed = report
            .checks
            .iter()
            .filter(|c| c.status == CheckStatus::Fail)
            .map(|c| c.name.clone())
            .collect();
        return Err(ProcessingError::ValidationFailed { failed });
    }
    Ok(())
}

fn describe_store(root: PathBuf, sample: usize) -> Result<()> {
    let store = PartitionedStore::open(&root)?;

    println!("Store: {}", root.display());
    println!(
        "Partitions: {} ({} rows, {:.2} MB)",
        store.years().len(),
        store.total_rows(),
        store.total_bytes() as f64 / 1_048_576.0
    );
    for info in store.partition_info() {
        println!(
            "  year={}: {} rows, {} row groups, {:.2} MB",
            info.year,
            info.rows,
            info.row_groups,
            info.bytes as f64 / 1_048_576.0
        );
    }

    match store.manifest()? {
        Some(manifest) => println!("\nLast conversion:\n{}", manifest.summary()),
        None => println!("\nNo conversion manifest found"),
    }

    if sample > 0 {
        let first = store
            .scan(ScanRequest::all().batch_size(sample).include_year(true))?
            .next()
            .transpose()?;
        if let Some((_, batch)) = first {
            println!("Sample rows:");
            println!("{}", pretty_format_batches(&[batch])?);
        }
    }

    Ok(())
}

fn print_rows<T: Serialize + std::fmt::Debug>(rows: &[T], limit: usize, json: bool) -> Result<()> {
    let shown = if limit == 0 { rows.len() } else { limit.min(rows.len()) };
    for row in &rows[..shown] {
        if json {
            println!("{}", serde_json::to_string(row)?);
        } else {
            println!("{:?}", row);
        }
    }
    if shown < rows.len() {
        println!("... {} more rows", rows.len() - shown);
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
