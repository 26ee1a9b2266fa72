//! Command-line surface: a `clap`-derive `Parser` with one subcommand per
//! pipeline action.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Root directory of configuration descriptors.
    #[arg(long, global = true, default_value = "./configs")]
    pub config_root: PathBuf,

    /// Root directory for exported artifacts.
    #[arg(long, global = true, default_value = "./output")]
    pub output_root: PathBuf,

    /// Directory for persisted progress summaries.
    #[arg(long, global = true, default_value = "./progress")]
    pub progress_dir: PathBuf,

    /// Path to the durable retry queue file.
    #[arg(long, global = true, default_value = "./progress/pipeline-retries.json")]
    pub retry_queue_path: PathBuf,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the pipeline: config generation, crawling, validation, retry, aggregation, import.
    Run(RunArgs),
    /// Print output, retry-queue, and backend statistics.
    Stats,
    /// Delete artifacts older than `--days`.
    Clean {
        #[arg(long, default_value_t = 30)]
        days: i64,
    },
    /// Re-run configs currently pending retry.
    Retry,
    /// Print the retry queue's current contents and counts.
    RetryStatus,
    /// Drop every pending retry record.
    ClearRetries,
}

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Regions/markets to crawl, e.g. `--regions tw,us,jp`.
    #[arg(long, value_delimiter = ',')]
    pub regions: Vec<String>,

    /// Report/data types; maps to the config descriptor's `type` field.
    #[arg(long = "data-types", value_delimiter = ',')]
    pub data_types: Vec<String>,

    /// Symbol/category filters.
    #[arg(long, value_delimiter = ',')]
    pub symbols: Vec<String>,

    /// Backend import batch size (overrides the stage defaults).
    #[arg(long, default_value_t = 30)]
    pub batch_size: usize,

    /// Crawl concurrency (used only when per-site concurrency is disabled).
    #[arg(long, default_value_t = 4)]
    pub concurrent: usize,

    #[arg(long)]
    pub skip_config_generation: bool,
    #[arg(long)]
    pub skip_crawling: bool,
    #[arg(long)]
    pub skip_aggregation: bool,
    #[arg(long)]
    pub skip_symbol_import: bool,
    #[arg(long)]
    pub skip_fundamental_import: bool,
    #[arg(long)]
    pub skip_label_sync: bool,

    /// Skip everything except the retry pass.
    #[arg(long)]
    pub retry_only: bool,

    /// Drop all pending retry records before running.
    #[arg(long)]
    pub clear_retries: bool,

    /// Never enqueue new retry records.
    #[arg(long)]
    pub disable_retry: bool,

    #[arg(long, default_value_t = 3)]
    pub max_retries: u32,

    #[arg(long, default_value_t = 5_000)]
    pub retry_delay: u64,

    #[arg(long, default_value_t = 7)]
    pub clean_days: i64,
}
