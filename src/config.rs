//! Pipeline configuration shared by the CLI commands

use std::path::PathBuf;

/// Default location of the raw export sheets
pub const DEFAULT_RAW_PATH: &str = "data/raw/online_retail_II.csv";
/// Default location of the cleaned transaction table
pub const DEFAULT_PROCESSED_PATH: &str = "data/processed/cleaned_transactions.csv";
/// Default location of the per-customer RFM table
pub const DEFAULT_RFM_PATH: &str = "data/processed/rfm_segments.csv";
/// Default location of the development sample
pub const DEFAULT_SAMPLE_PATH: &str = "data/sample/sample_data.csv";

/// What to do when a metric cannot be split into five quantile buckets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BinningPolicy {
    /// Fail with `DegenerateDistribution`
    #[default]
    Strict,
    /// Bin the stable ordinal ranks of the metric instead of its raw values
    RankFallback,
}

impl BinningPolicy {
    /// Policy selected by the `--rank-fallback` switch
    pub fn from_rank_fallback(rank_fallback: bool) -> Self {
        if rank_fallback {
            BinningPolicy::RankFallback
        } else {
            BinningPolicy::Strict
        }
    }
}

/// Paths and knobs for one run of the pipeline
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Raw export sheets, concatenated in order
    pub raw_sheets: Vec<PathBuf>,
    /// Canonical transaction table written by the cleaning stage
    pub processed_path: PathBuf,
    /// RFM table written by the segment command
    pub rfm_path: PathBuf,
    /// Ignore a fresh canonical table and reprocess the raw sheets
    pub force: bool,
    /// Invoice prefix that marks a cancellation
    pub cancellation_marker: char,
    pub binning: BinningPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            raw_sheets: vec![PathBuf::from(DEFAULT_RAW_PATH)],
            processed_path: PathBuf::from(DEFAULT_PROCESSED_PATH),
            rfm_path: PathBuf::from(DEFAULT_RFM_PATH),
            force: false,
            cancellation_marker: 'C',
            binning: BinningPolicy::Strict,
        }
    }
}
