//! Error types for the cleaning stage and the RFM engine

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// The raw export (or a previously cleaned table) is not on disk.
    #[error("source not found: {}", path.display())]
    MissingSource { path: PathBuf },

    #[error("no transactions to segment")]
    EmptyInput,

    /// Quintile edges collapsed because too many customers share a value.
    #[error("cannot split {metric} into 5 quantile buckets: only {distinct} distinct value(s)")]
    DegenerateDistribution { metric: &'static str, distinct: usize },

    #[error("{metric} contains non-finite values")]
    NonFinite { metric: &'static str },

    #[error("column '{column}' not found in {}", path.display())]
    MissingColumn { column: String, path: PathBuf },

    #[error("invalid {column} value '{value}' at row {row} of {}", path.display())]
    InvalidValue {
        column: &'static str,
        value: String,
        row: usize,
        path: PathBuf,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("dataframe error: {0}")]
    Polars(#[from] polars::prelude::PolarsError),
}

impl Error {
    /// Message shown to a user of the report host instead of a bare error.
    pub fn user_hint(&self) -> Option<&'static str> {
        match self {
            Error::MissingSource { .. } => {
                Some("Data not found. Place the raw export in place and run `rfmforge clean` first.")
            }
            Error::EmptyInput => Some("No valid transactions remain after cleaning."),
            Error::DegenerateDistribution { .. } => Some(
                "Too few distinct customer values to form quintiles. Try --rank-fallback or a larger dataset.",
            ),
            _ => None,
        }
    }
}

/// Text printed by the CLI when a command fails.
///
/// Library errors with a hint get the hint on its own line, anything else is
/// printed with its full context chain.
pub fn failure_message(err: &anyhow::Error) -> String {
    match err.downcast_ref::<Error>().and_then(Error::user_hint) {
        Some(hint) => format!("❌ {err}\n{hint}"),
        None => format!("❌ {err:#}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_hint_for_core_errors() {
        let missing = Error::MissingSource {
            path: PathBuf::from("data/raw/online_retail_II.csv"),
        };
        assert!(missing.user_hint().unwrap().contains("rfmforge clean"));
        assert!(Error::EmptyInput.user_hint().unwrap().contains("No valid transactions"));

        let degenerate = Error::DegenerateDistribution {
            metric: "recency",
            distinct: 2,
        };
        assert!(degenerate.user_hint().unwrap().contains("--rank-fallback"));
        assert_eq!(
            degenerate.to_string(),
            "cannot split recency into 5 quantile buckets: only 2 distinct value(s)"
        );
    }

    #[test]
    fn test_no_hint_for_other_errors() {
        let err = Error::MissingColumn {
            column: "price".to_string(),
            path: PathBuf::from("sheet.csv"),
        };
        assert_eq!(err.user_hint(), None);
        assert_eq!(Error::NonFinite { metric: "monetary" }.user_hint(), None);
    }

    #[test]
    fn test_failure_message_uses_hint() {
        let err = anyhow::Error::from(Error::MissingSource {
            path: PathBuf::from("clean.csv"),
        });
        let message = failure_message(&err);
        let lines: Vec<&str> = message.lines().collect();
        assert_eq!(lines[0], "❌ source not found: clean.csv");
        assert!(lines[1].starts_with("Data not found."));

        let plain = anyhow::anyhow!("chart backend failed").context("drawing segments.png");
        assert_eq!(
            failure_message(&plain),
            "❌ drawing segments.png: chart backend failed"
        );
    }
}
