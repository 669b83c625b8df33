//! Column contract between the raw sources, the merged table and the
//! analytical table consumed by the recommender.

use polars::prelude::*;

use crate::error::{Error, Result};

pub const ACCOUNT_ID: &str = "trade_account_id";
pub const ITEM_ID: &str = "item_number";
pub const EVENT_TYPE: &str = "type";
pub const QUANTITY: &str = "quantity";
pub const NET_REVENUE: &str = "netrevenue";
pub const SHIPPED_DATE: &str = "shipped_dt";
pub const BUSINESS_TYPE: &str = "business_type";
pub const CATEGORY_NAME: &str = "category_name";
pub const MOTIF: &str = "motif";
pub const CLUSTER: &str = "Cluster";

/// Date format of the merged cache and of the default analytical table
pub const ISO_DATE_FORMAT: &str = "%Y-%m-%d";

/// Fill value for missing business type and motif
pub const UNKNOWN: &str = "Unknown";
/// Fill value for missing category name
pub const UNCATEGORIZED: &str = "Uncategorized";
/// Top category reported for accounts without any category values
pub const NOT_AVAILABLE: &str = "N/A";

pub const TRANSACTION_COLUMNS: &[&str] = &[
    ACCOUNT_ID,
    ITEM_ID,
    EVENT_TYPE,
    QUANTITY,
    NET_REVENUE,
    SHIPPED_DATE,
];
pub const CUSTOMER_COLUMNS: &[&str] = &[ACCOUNT_ID, BUSINESS_TYPE];
pub const ITEM_COLUMNS: &[&str] = &[ITEM_ID, CATEGORY_NAME, MOTIF];
pub const ANALYTICS_COLUMNS: &[&str] = &[
    ACCOUNT_ID,
    ITEM_ID,
    EVENT_TYPE,
    QUANTITY,
    NET_REVENUE,
    CATEGORY_NAME,
    MOTIF,
    CLUSTER,
];

/// Transaction event kinds carried in the `type` column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Sale,
    Sample,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Sale => "SALE",
            EventType::Sample => "SAMPLE",
        }
    }
}

/// Fail with `MissingColumn` naming the first absent column
pub fn require_columns(df: &DataFrame, table: &str, columns: &[&str]) -> Result<()> {
    let present = df.get_column_names();
    match columns.iter().find(|name| !present.contains(*name)) {
        Some(missing) => Err(Error::MissingColumn {
            table: table.to_string(),
            column: missing.to_string(),
        }),
        None => Ok(()),
    }
}

/// Expression coercing an identifier column to text
pub(crate) fn as_text(column: &str) -> Expr {
    col(column).cast(DataType::String)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_columns_reports_first_missing() {
        let df = df!(
            ACCOUNT_ID => &["A1"],
            ITEM_ID => &["I1"]
        )
        .unwrap();

        assert!(require_columns(&df, "transactions", &[ACCOUNT_ID, ITEM_ID]).is_ok());

        let err = require_columns(&df, "transactions", &[ACCOUNT_ID, QUANTITY, MOTIF]).unwrap_err();
        match err {
            Error::MissingColumn { table, column } => {
                assert_eq!(table, "transactions");
                assert_eq!(column, QUANTITY);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_event_type_strings() {
        assert_eq!(EventType::Sale.as_str(), "SALE");
        assert_eq!(EventType::Sample.as_str(), "SAMPLE");
    }
}
