//! CLI entry point: parses arguments, wires a `PipelineOrchestrator` over
//! the no-op default capability implementations, and dispatches to one of
//! the CLI subcommands.

use clap::Parser;
use statement_crawler::cli::{Cli, Command, RunArgs};
use statement_crawler::config::ConfigFilter;
use statement_crawler::defaults::{NoopBackendImporter, NoopConfigGenerator, NoopCrawler, NoopExporter};
use statement_crawler::pipeline::{PipelineOptions, PipelineOrchestrator};
use statement_crawler::{OutputFileManager, RetryQueue};
use std::process::ExitCode;
use std::sync::Arc;

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_CLEANUP_DAYS: i64 = 7;

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            log::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<bool> {
    let max_retries = match &cli.command {
        Command::Run(args) => args.max_retries,
        _ => DEFAULT_MAX_RETRIES,
    };
    let retry_queue = Arc::new(RetryQueue::load(&cli.retry_queue_path, max_retries, DEFAULT_CLEANUP_DAYS)?);

    let orchestrator = PipelineOrchestrator::new(
        &cli.config_root,
        &cli.output_root,
        &cli.progress_dir,
        Arc::clone(&retry_queue),
        Arc::new(NoopCrawler),
        Some(Arc::new(NoopExporter)),
        Some(Arc::new(NoopBackendImporter)),
        Some(Arc::new(NoopConfigGenerator)),
    );

    match cli.command {
        Command::Run(args) => {
            let options = pipeline_options(&args);
            let result = orchestrator.run(&options).await?;
            println!(
                "completed={} failed={} skipped={} retried={} aggregated={} symbols={} fundamentals={} labels={}",
                result.crawled_completed,
                result.crawled_failed,
                result.crawled_skipped,
                result.retried,
                result.aggregated_records,
                result.symbols_imported,
                result.fundamentals_imported,
                result.labels_synced,
            );
            for error in &result.error_tail {
                println!(" error: {error}");
            }
            Ok(result.error_tail.is_empty())
        }
        Command::Stats => {
            let (file_stats, retry_stats, backend_stats) = orchestrator.statistics().await;
            println!("files: {} ({} bytes, {} symbols)", file_stats.total_files, file_stats.total_size, file_stats.unique_symbols);
            println!("retries pending: {}", retry_stats.total);
            println!("backend: {backend_stats}");
            Ok(true)
        }
        Command::Clean { days } => {
            let removed = OutputFileManager::new(&cli.output_root).clean_old_files(days);
            println!("removed {removed} artifacts older than {days} days");
            Ok(true)
        }
        Command::Retry => {
            let options = PipelineOptions {
                retry_only: true,
                max_retries,
                ..Default::default()
            };
            let result = orchestrator.run(&options).await?;
            println!("retried {} configs", result.retried);
            Ok(result.error_tail.is_empty())
        }
        Command::RetryStatus => {
            let stats = retry_queue.statistics();
            println!("pending: {}", stats.total);
            for (reason, count) in &stats.by_reason {
                println!(" {reason}: {count}");
            }
            for (region, count) in &stats.by_region {
                println!(" region {region}: {count}");
            }
            Ok(true)
        }
        Command::ClearRetries => {
            let removed = retry_queue.clear_all()?;
            println!("cleared {removed} retry records");
            Ok(true)
        }
    }
}

fn pipeline_options(args: &RunArgs) -> PipelineOptions {
    PipelineOptions {
        skip_config_generation: args.skip_config_generation,
        skip_crawling: args.skip_crawling,
        skip_aggregation: args.skip_aggregation,
        skip_symbol_import: args.skip_symbol_import,
        skip_fundamental_import: args.skip_fundamental_import,
        skip_label_sync: args.skip_label_sync,
        retry_only: args.retry_only,
        clear_retries: args.clear_retries,
        max_retries: args.max_retries,
        regions: args.regions.clone(),
        filter: ConfigFilter {
            market: args.regions.first().cloned(),
            r#type: args.data_types.first().cloned(),
            category: args.symbols.first().cloned(),
            ..Default::default()
        },
    }
}
