//! rfmforge: cleaning, RFM segmentation and reporting CLI
//!
//! This is the main entrypoint that dispatches to the pipeline stages.

use anyhow::Result;
use clap::Parser;
use rfmforge::cli::{Command, DataArgs, ReportArgs};
use rfmforge::error::failure_message;
use rfmforge::{compute_rfm, data, report, viz, Args};
use std::path::Path;
use std::process::ExitCode;
use std::time::Instant;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("RFMFORGE_LOG")
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{}", failure_message(&err));
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<()> {
    match &args.command {
        Command::Clean(data_args) => run_clean(data_args),
        Command::Segment(data_args) => run_segment(data_args),
        Command::Report(report_args) => run_report(report_args),
        Command::Sample { raw, output, rows } => run_sample(raw, output, *rows),
    }
}

/// Run the cleaning stage only
fn run_clean(data_args: &DataArgs) -> Result<()> {
    let start_time = Instant::now();
    let config = data_args.to_config();

    let transactions = data::load_and_clean(&config)?;
    let revenue: f64 = transactions.iter().map(|t| t.total_amount).sum();

    println!("✓ Canonical table: {} transactions", transactions.len());
    println!("  Saved to: {}", config.processed_path.display());
    println!("  Total revenue in dataset: £{:.2}", revenue);
    println!("  Processing time: {:.2}s", start_time.elapsed().as_secs_f64());
    Ok(())
}

/// Clean (or load) transactions, score customers and save the RFM table
fn run_segment(data_args: &DataArgs) -> Result<()> {
    let start_time = Instant::now();
    let config = data_args.to_config();

    let transactions = data::load_and_clean(&config)?;
    let table = compute_rfm(&transactions, config.binning)?;
    table.write_csv(&config.rfm_path)?;

    println!("✓ Segmented {} customers", table.len());
    println!("  Snapshot date: {}", table.snapshot_date.date());
    println!("  Saved to: {}", config.rfm_path.display());
    viz::print_segment_summary(&report::segment_summary(&table));
    println!("\nProcessing time: {:.2}s", start_time.elapsed().as_secs_f64());
    Ok(())
}

/// Dashboard views over the canonical table
fn run_report(report_args: &ReportArgs) -> Result<()> {
    let transactions = data::load_canonical(&report_args.processed)?;
    let table = compute_rfm(&transactions, report_args.binning())?;

    let years = report::available_years(&transactions);
    println!(
        "Years available: {}",
        years.iter().map(i32::to_string).collect::<Vec<_>>().join(", ")
    );

    let filtered = report::filter_years(&transactions, &report_args.years);
    let seasonality = report::seasonality(&filtered);
    let segments = report::segment_summary(&table);

    viz::print_seasonality(&seasonality);
    viz::print_segment_summary(&segments);

    if let Some(segment) = report_args.segment {
        let top = report::top_customers(&table, segment, report_args.top);
        viz::print_top_customers(segment.label(), &top);
    }

    if seasonality.monthly.is_empty() {
        println!("\nNo transactions in the selected years, skipping charts");
        return Ok(());
    }

    let charts = viz::generate_report_charts(&seasonality, &segments, &report_args.output_dir)?;
    println!("\n✓ Charts generated");
    for path in charts {
        println!("  {}", path.display());
    }
    Ok(())
}

fn run_sample(raw: &Path, output: &Path, rows: usize) -> Result<()> {
    let written = data::create_sample(raw, output, rows)?;
    println!("✓ Sample of {} rows saved to {}", written, output.display());
    Ok(())
}
