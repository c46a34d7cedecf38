//! Command-line interface definitions and argument parsing

use crate::config::{
    BinningPolicy, PipelineConfig, DEFAULT_PROCESSED_PATH, DEFAULT_RAW_PATH, DEFAULT_RFM_PATH,
    DEFAULT_SAMPLE_PATH,
};
use crate::segment::Segment;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Retail transaction cleaning and RFM customer segmentation
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Clean the raw export into the canonical transaction table
    Clean(DataArgs),

    /// Compute RFM scores and segments and save the RFM table
    Segment(DataArgs),

    /// Print seasonality and segment views and render charts
    Report(ReportArgs),

    /// Save the first rows of a raw sheet as a small sample CSV
    Sample {
        /// Raw sheet to sample
        #[arg(long, default_value = DEFAULT_RAW_PATH)]
        raw: PathBuf,

        /// Where to write the sample
        #[arg(short, long, default_value = DEFAULT_SAMPLE_PATH)]
        output: PathBuf,

        /// Number of rows to keep
        #[arg(short = 'n', long, default_value = "1000")]
        rows: usize,
    },
}

/// Input and output locations shared by the pipeline commands
#[derive(clap::Args, Debug, Clone)]
pub struct DataArgs {
    /// Raw export sheets (CSV), comma-separated or repeated
    #[arg(
        long = "raw",
        env = "RFMFORGE_RAW",
        value_delimiter = ',',
        default_value = DEFAULT_RAW_PATH
    )]
    pub raw_sheets: Vec<PathBuf>,

    /// Canonical transaction table
    #[arg(long, env = "RFMFORGE_PROCESSED", default_value = DEFAULT_PROCESSED_PATH)]
    pub processed: PathBuf,

    /// Output path for the RFM table
    #[arg(long, env = "RFMFORGE_RFM", default_value = DEFAULT_RFM_PATH)]
    pub rfm_output: PathBuf,

    /// Reprocess the raw sheets even if the canonical table is fresh
    #[arg(short, long)]
    pub force: bool,

    /// Bin tied metrics by rank instead of failing
    #[arg(long)]
    pub rank_fallback: bool,
}

impl DataArgs {
    pub fn to_config(&self) -> PipelineConfig {
        PipelineConfig {
            raw_sheets: self.raw_sheets.clone(),
            processed_path: self.processed.clone(),
            rfm_path: self.rfm_output.clone(),
            force: self.force,
            binning: BinningPolicy::from_rank_fallback(self.rank_fallback),
            ..PipelineConfig::default()
        }
    }
}

/// The report reads only the canonical table, so it takes no raw-sheet options
#[derive(clap::Args, Debug, Clone)]
pub struct ReportArgs {
    /// Canonical transaction table written by `clean`
    #[arg(long, env = "RFMFORGE_PROCESSED", default_value = DEFAULT_PROCESSED_PATH)]
    pub processed: PathBuf,

    /// Bin tied metrics by rank instead of failing
    #[arg(long)]
    pub rank_fallback: bool,

    /// Years to include, comma-separated (default: all)
    #[arg(short, long, value_delimiter = ',')]
    pub years: Vec<i32>,

    /// Directory for the rendered charts
    #[arg(short, long, default_value = "charts")]
    pub output_dir: PathBuf,

    /// Segment to drill into
    #[arg(short, long)]
    pub segment: Option<Segment>,

    /// Customers shown in the drill-down
    #[arg(long, default_value = "10")]
    pub top: usize,
}

impl ReportArgs {
    pub fn binning(&self) -> BinningPolicy {
        BinningPolicy::from_rank_fallback(self.rank_fallback)
    }
}
