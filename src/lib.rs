//! rfmforge: retail transaction cleaning and RFM customer segmentation
//!
//! The cleaning stage turns a raw transaction export into a canonical table,
//! the RFM engine scores every customer on Recency, Frequency and Monetary
//! value and labels them with a named segment.

pub mod cli;
pub mod config;
pub mod data;
pub mod error;
pub mod model;
pub mod report;
pub mod segment;
pub mod viz;

// Re-export public items for easier access
pub use cli::Args;
pub use config::{BinningPolicy, PipelineConfig};
pub use data::{load_and_clean, load_canonical, Transaction};
pub use error::Error;
pub use model::{compute_rfm, CustomerRfm, RfmTable};
pub use segment::Segment;

/// Common result type used throughout the library
pub type Result<T> = std::result::Result<T, Error>;
