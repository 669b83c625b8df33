//! Error taxonomy shared by the merge and recommendation engines

use std::io;
use std::path::PathBuf;

use polars::prelude::PolarsError;
use thiserror::Error;

/// Result type used throughout the library
pub type Result<T> = std::result::Result<T, Error>;

/// Failures raised while loading, merging or querying trade data.
///
/// "Account not found" is deliberately absent: query methods return `Option`
/// so interactive consumers can branch without error handling.
#[derive(Debug, Error)]
pub enum Error {
    /// A raw or cached file is missing, unreadable or malformed.
    #[error("data source '{}' failed during {step}: {reason}", path.display())]
    DataSource {
        path: PathBuf,
        step: &'static str,
        reason: String,
    },

    /// No analytical table exists at any of the probed locations.
    #[error("no analytical table found (tried {tried:?})")]
    DataNotFound { tried: Vec<PathBuf> },

    #[error("table '{table}' is missing required column '{column}'")]
    MissingColumn { table: String, column: String },

    /// A denormalization invariant did not hold after a merge.
    #[error("merge invariant violated: {0}")]
    Invariant(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Polars(#[from] PolarsError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    pub(crate) fn data_source(
        path: impl Into<PathBuf>,
        step: &'static str,
        reason: impl ToString,
    ) -> Self {
        Self::DataSource {
            path: path.into(),
            step,
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_source_message_names_file_and_step() {
        let err = Error::data_source("data/raw/transactions.csv", "load", "file not found");
        let message = err.to_string();
        assert!(message.contains("transactions.csv"));
        assert!(message.contains("load"));
        assert!(message.contains("file not found"));
    }

    #[test]
    fn test_data_not_found_lists_candidates() {
        let err = Error::DataNotFound {
            tried: vec![PathBuf::from("a.parquet"), PathBuf::from("b.parquet")],
        };
        let message = err.to_string();
        assert!(message.contains("a.parquet"));
        assert!(message.contains("b.parquet"));
    }
}
