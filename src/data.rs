//! Table loading and column normalization using Polars

use std::fs::File;
use std::path::Path;

use chrono::{Duration, NaiveDate};
use polars::prelude::*;
use tracing::{debug, error};

use crate::error::{Error, Result};
use crate::schema::{as_text, ACCOUNT_ID, ITEM_ID, NET_REVENUE, QUANTITY};

/// Read a delimited file with a header row
pub fn read_csv(path: &Path) -> Result<DataFrame> {
    ensure_exists(path)?;

    LazyCsvReader::new(path)
        .with_has_header(true)
        .with_infer_schema_length(Some(10_000))
        .finish()
        .and_then(|lf| lf.collect())
        .map_err(|e| {
            error!(path = %path.display(), error = %e, "failed to parse csv");
            Error::data_source(path, "load", e)
        })
}

/// Read a CSV or Parquet table, chosen by file extension
pub fn read_table(path: &Path) -> Result<DataFrame> {
    let is_parquet = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("parquet"));

    if !is_parquet {
        return read_csv(path);
    }

    ensure_exists(path)?;
    let file = File::open(path).map_err(|e| {
        error!(path = %path.display(), error = %e, "failed to open parquet file");
        Error::data_source(path, "load", e)
    })?;

    ParquetReader::new(file).finish().map_err(|e| {
        error!(path = %path.display(), error = %e, "failed to parse parquet");
        Error::data_source(path, "load", e)
    })
}

fn ensure_exists(path: &Path) -> Result<()> {
    if path.is_file() {
        return Ok(());
    }
    error!(path = %path.display(), "required file is missing");
    Err(Error::data_source(path, "load", "file not found"))
}

/// Convert the named column to a date type.
///
/// Text is parsed with `format` (prefix match, so timestamps keep only their
/// date part); datetimes are truncated to dates; dates pass through.
pub fn normalize_dates(df: DataFrame, column: &str, format: &str) -> Result<DataFrame> {
    let dtype = df.column(column)?.dtype().clone();
    let expr = match dtype {
        DataType::Date => return Ok(df),
        DataType::String => col(column).str().to_date(StrptimeOptions {
            format: Some(format.into()),
            strict: true,
            exact: false,
            cache: true,
        }),
        DataType::Datetime(_, _) => col(column).cast(DataType::Date),
        // Columns that are entirely empty are inferred as text or null
        DataType::Null => col(column).cast(DataType::Date),
        other => {
            return Err(Error::Invariant(format!(
                "column '{}' has type {} and cannot hold dates",
                column, other
            )))
        }
    };

    debug!(column, format, "parsing date column");
    Ok(df.lazy().with_column(expr).collect()?)
}

/// Coerce identifier, quantity and revenue columns to their canonical types.
///
/// Identifiers become text so numeric-looking ids compare equal across
/// tables and across the cache round-trip. Quantities stay fractional
/// (fabric is sold by the yard). Values that do not parse as numbers fail
/// the whole table instead of turning into nulls.
pub fn conform_transactions(df: DataFrame, source: &Path) -> Result<DataFrame> {
    df.lazy()
        .with_columns([
            as_text(ACCOUNT_ID),
            as_text(ITEM_ID),
            col(QUANTITY).strict_cast(DataType::Float64),
            col(NET_REVENUE).strict_cast(DataType::Float64),
        ])
        .collect()
        .map_err(|e| {
            error!(path = %source.display(), error = %e, "non-numeric quantity or revenue");
            Error::data_source(source, "conform", e)
        })
}

/// Convert a physical date value (days since the Unix epoch) to a calendar date
pub fn date_from_days(days: i32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(1970, 1, 1)?.checked_add_signed(Duration::days(i64::from(days)))
}

/// Calendar dates of a date column, preserving nulls
pub fn column_dates(df: &DataFrame, column: &str) -> Result<Vec<Option<NaiveDate>>> {
    let days: &Int32Chunked = df.column(column)?.date()?;
    Ok(days
        .into_iter()
        .map(|d| d.and_then(date_from_days))
        .collect())
}
