//! Merge engine: joins transactions with customer and item masters into one
//! denormalized table and caches it on disk.

use std::fs;
use std::path::{Path, PathBuf};

use polars::prelude::*;
use tempfile::NamedTempFile;
use tracing::{error, info, warn};

use crate::config::MergeSettings;
use crate::data::{conform_transactions, normalize_dates, read_csv};
use crate::error::{Error, Result};
use crate::schema::{
    as_text, require_columns, ACCOUNT_ID, BUSINESS_TYPE, CATEGORY_NAME, CUSTOMER_COLUMNS,
    ISO_DATE_FORMAT, ITEM_COLUMNS, ITEM_ID, MOTIF, NET_REVENUE, SHIPPED_DATE,
    TRANSACTION_COLUMNS, UNCATEGORIZED, UNKNOWN,
};

pub const TRANSACTIONS_FILE: &str = "transactions.csv";
pub const CUSTOMER_MASTER_FILE: &str = "customer_master.csv";
pub const ITEM_MASTER_FILE: &str = "item_master.csv";

/// The three raw inputs; transactions already carry canonical column types
#[derive(Debug, Clone)]
pub struct RawTables {
    pub transactions: DataFrame,
    pub customers: DataFrame,
    pub items: DataFrame,
}

/// Produces the merged master table, reusing the on-disk cache when present.
#[derive(Debug)]
pub struct MergeEngine {
    settings: MergeSettings,
    tables: Option<RawTables>,
    master: Option<DataFrame>,
    joins_performed: usize,
}

impl MergeEngine {
    pub fn new(settings: MergeSettings) -> Self {
        Self {
            settings,
            tables: None,
            master: None,
            joins_performed: 0,
        }
    }

    pub fn cache_path(&self) -> PathBuf {
        self.settings.cache_path()
    }

    /// Merged table produced by the last successful `merge`
    pub fn master(&self) -> Option<&DataFrame> {
        self.master.as_ref()
    }

    /// Number of times the join step has actually run
    pub fn joins_performed(&self) -> usize {
        self.joins_performed
    }

    /// Read all three raw sources. Nothing is kept unless every file loads.
    pub fn load(&mut self) -> Result<&RawTables> {
        let raw_dir = &self.settings.raw_dir;
        let transactions_path = raw_dir.join(TRANSACTIONS_FILE);
        let transactions = read_source(&transactions_path, TRANSACTION_COLUMNS)
            .and_then(|df| conform_transactions(df, &transactions_path))?;
        let customers = read_source(&raw_dir.join(CUSTOMER_MASTER_FILE), CUSTOMER_COLUMNS)?;
        let items = read_source(&raw_dir.join(ITEM_MASTER_FILE), ITEM_COLUMNS)?;

        info!(
            transactions = transactions.height(),
            customers = customers.height(),
            items = items.height(),
            "raw data loaded"
        );

        Ok(self.tables.insert(RawTables {
            transactions,
            customers,
            items,
        }))
    }

    /// Build (or reload) the merged table.
    ///
    /// With a cache file present and `force_refresh` unset, the cache is read
    /// back and the join is skipped entirely. `force_refresh` re-reads the raw
    /// sources before joining.
    pub fn merge(&mut self, force_refresh: bool) -> Result<&DataFrame> {
        let cache_path = self.cache_path();

        if !force_refresh && cache_path.is_file() {
            let master = self.read_cache(&cache_path)?;
            info!(path = %cache_path.display(), rows = master.height(), "loaded merged table from cache");
            return Ok(self.master.insert(master));
        }

        if force_refresh || self.tables.is_none() {
            self.load()?;
        }
        let tables = match &self.tables {
            Some(tables) => tables.clone(),
            None => return Err(Error::Invariant("raw tables unavailable after load".to_string())),
        };

        let mut master = join_tables(tables, &self.settings.date_format).map_err(|e| {
            error!(error = %e, "failed to merge raw tables");
            e
        })?;
        self.joins_performed += 1;

        write_cache(&mut master, &cache_path).map_err(|e| {
            error!(path = %cache_path.display(), error = %e, "failed to write merged table");
            e
        })?;
        info!(path = %cache_path.display(), rows = master.height(), "merged table written");

        Ok(self.master.insert(master))
    }

    fn read_cache(&self, path: &Path) -> Result<DataFrame> {
        let df = read_csv(path)?;
        let df = match require_columns(&df, "merged cache", TRANSACTION_COLUMNS) {
            Ok(()) => conform_transactions(df, path)?,
            Err(e) => {
                error!(path = %path.display(), error = %e, "merged cache is malformed");
                return Err(Error::data_source(path, "cache reload", e));
            }
        };

        normalize_dates(df, SHIPPED_DATE, ISO_DATE_FORMAT).map_err(|e| {
            error!(path = %path.display(), error = %e, "merged cache has unreadable dates");
            Error::data_source(path, "cache reload", e)
        })
    }
}

fn read_source(path: &Path, columns: &[&str]) -> Result<DataFrame> {
    let df = read_csv(path)?;
    let table = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("source");

    require_columns(&df, table, columns).map_err(|e| {
        error!(path = %path.display(), error = %e, "source has unexpected schema");
        Error::data_source(path, "schema check", e)
    })?;
    Ok(df)
}

/// Left-join transactions to customers and items, filling categorical gaps
fn join_tables(tables: RawTables, date_format: &str) -> Result<DataFrame> {
    let expected_rows = tables.transactions.height();

    let transactions = normalize_dates(tables.transactions, SHIPPED_DATE, date_format)?
        .lazy()
        .with_column(col(NET_REVENUE).fill_null(lit(0.0)));

    let customers = unique_by_key(tables.customers, ACCOUNT_ID, "customer_master")?;
    let items = unique_by_key(tables.items, ITEM_ID, "item_master")?;

    let master = transactions
        .join(
            customers.lazy(),
            [col(ACCOUNT_ID)],
            [col(ACCOUNT_ID)],
            JoinArgs::new(JoinType::Left),
        )
        .join(
            items.lazy(),
            [col(ITEM_ID)],
            [col(ITEM_ID)],
            JoinArgs::new(JoinType::Left),
        )
        .with_columns([
            col(BUSINESS_TYPE).fill_null(lit(UNKNOWN)),
            col(CATEGORY_NAME).fill_null(lit(UNCATEGORIZED)),
            col(MOTIF).fill_null(lit(UNKNOWN)),
        ])
        .collect()?;

    if master.height() != expected_rows {
        return Err(Error::Invariant(format!(
            "merged table has {} rows, expected one per transaction ({})",
            master.height(),
            expected_rows
        )));
    }

    Ok(master)
}

/// One row per key, first occurrence wins
fn unique_by_key(df: DataFrame, key: &str, table: &str) -> Result<DataFrame> {
    let before = df.height();
    let deduped = df
        .lazy()
        .with_column(as_text(key))
        .unique_stable(Some(vec![key.to_string()]), UniqueKeepStrategy::First)
        .collect()?;

    let dropped = before - deduped.height();
    if dropped > 0 {
        warn!(table, key, dropped, "duplicate keys in master table, keeping first occurrence");
    }
    Ok(deduped)
}

/// Write to a temporary file beside the cache and rename it into place
fn write_cache(df: &mut DataFrame, path: &Path) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir).map_err(|e| Error::data_source(&dir, "create output directory", e))?;

    let mut tmp = NamedTempFile::new_in(&dir).map_err(|e| Error::data_source(&dir, "cache write", e))?;
    CsvWriter::new(&mut tmp)
        .include_header(true)
        .with_date_format(Some(ISO_DATE_FORMAT.into()))
        .finish(df)
        .map_err(|e| Error::data_source(path, "cache write", e))?;
    tmp.persist(path)
        .map_err(|e| Error::data_source(path, "cache write", e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::QUANTITY;
    use std::io::Write;
    use tempfile::{tempdir, TempDir};

    fn write_file(dir: &Path, name: &str, lines: &[&str]) {
        let mut file = fs::File::create(dir.join(name)).unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
    }

    fn create_raw_dir() -> TempDir {
        let dir = tempdir().unwrap();
        write_file(
            dir.path(),
            TRANSACTIONS_FILE,
            &[
                "trade_account_id,item_number,type,quantity,netrevenue,shipped_dt",
                "A1,I1,SALE,2,100.0,2023-01-05",
                "A1,I2,SAMPLE,1,,2023-01-06",
                "A2,I1,SALE,4,250.5,2023-03-01",
                "A3,I9,SALE,1,75.0,2023-04-12",
            ],
        );
        write_file(
            dir.path(),
            CUSTOMER_MASTER_FILE,
            &["trade_account_id,business_type", "A1,Designer", "A2,"],
        );
        write_file(
            dir.path(),
            ITEM_MASTER_FILE,
            &[
                "item_number,category_name,motif",
                "I1,Fabric,Floral",
                "I2,,Stripe",
            ],
        );
        dir
    }

    fn settings_for(raw: &Path, processed: &Path) -> MergeSettings {
        MergeSettings {
            raw_dir: raw.to_path_buf(),
            processed_dir: processed.to_path_buf(),
            ..MergeSettings::default()
        }
    }

    #[test]
    fn test_merge_fills_sentinels_and_keeps_every_transaction() {
        let raw = create_raw_dir();
        let out = tempdir().unwrap();
        let mut engine = MergeEngine::new(settings_for(raw.path(), &out.path().join("processed")));

        let master = engine.merge(false).unwrap().clone();
        assert_eq!(master.height(), 4);

        let business: Vec<Option<&str>> =
            master.column(BUSINESS_TYPE).unwrap().str().unwrap().into_iter().collect();
        assert_eq!(
            business,
            vec![Some("Designer"), Some("Designer"), Some(UNKNOWN), Some(UNKNOWN)]
        );

        let categories: Vec<Option<&str>> =
            master.column(CATEGORY_NAME).unwrap().str().unwrap().into_iter().collect();
        assert_eq!(
            categories,
            vec![Some("Fabric"), Some(UNCATEGORIZED), Some("Fabric"), Some(UNCATEGORIZED)]
        );

        let revenue: Vec<Option<f64>> =
            master.column(NET_REVENUE).unwrap().f64().unwrap().into_iter().collect();
        assert_eq!(revenue[1], Some(0.0));

        assert_eq!(master.column(SHIPPED_DATE).unwrap().dtype(), &DataType::Date);
        assert!(engine.cache_path().is_file());
    }

    #[test]
    fn test_duplicate_master_keys_do_not_fan_out() {
        let raw = create_raw_dir();
        write_file(
            raw.path(),
            CUSTOMER_MASTER_FILE,
            &["trade_account_id,business_type", "A1,Designer", "A1,Retail"],
        );
        let out = tempdir().unwrap();
        let mut engine = MergeEngine::new(settings_for(raw.path(), out.path()));

        let master = engine.merge(true).unwrap();
        assert_eq!(master.height(), 4);
        let first: Option<&str> = master.column(BUSINESS_TYPE).unwrap().str().unwrap().get(0);
        assert_eq!(first, Some("Designer"));
    }

    #[test]
    fn test_load_fails_on_missing_file() {
        let raw = create_raw_dir();
        fs::remove_file(raw.path().join(ITEM_MASTER_FILE)).unwrap();
        let out = tempdir().unwrap();
        let mut engine = MergeEngine::new(settings_for(raw.path(), out.path()));

        let err = engine.load().unwrap_err();
        match err {
            Error::DataSource { path, .. } => assert!(path.ends_with(ITEM_MASTER_FILE)),
            other => panic!("unexpected error: {other}"),
        }
        assert!(engine.merge(false).is_err());
        assert!(engine.master().is_none());
        assert!(!engine.cache_path().exists());
    }

    #[test]
    fn test_load_rejects_wrong_schema() {
        let raw = create_raw_dir();
        write_file(raw.path(), ITEM_MASTER_FILE, &["item_number,category_name", "I1,Fabric"]);
        let out = tempdir().unwrap();
        let mut engine = MergeEngine::new(settings_for(raw.path(), out.path()));

        let err = engine.load().unwrap_err();
        assert!(matches!(err, Error::DataSource { step: "schema check", .. }));
    }

    #[test]
    fn test_merge_rejects_non_numeric_revenue() {
        let raw = create_raw_dir();
        write_file(
            raw.path(),
            TRANSACTIONS_FILE,
            &[
                "trade_account_id,item_number,type,quantity,netrevenue,shipped_dt",
                "A1,I1,SALE,2.5,100.0,2023-01-05",
                "A2,I1,SALE,1.5,abc,2023-01-06",
            ],
        );
        let out = tempdir().unwrap();
        let mut engine = MergeEngine::new(settings_for(raw.path(), out.path()));

        let err = engine.merge(true).unwrap_err();
        match err {
            Error::DataSource { path, step, .. } => {
                assert_eq!(step, "conform");
                assert!(path.ends_with(TRANSACTIONS_FILE));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(engine.master().is_none());
        assert!(!engine.cache_path().exists());
    }

    #[test]
    fn test_merge_keeps_fractional_quantities() {
        let raw = create_raw_dir();
        write_file(
            raw.path(),
            TRANSACTIONS_FILE,
            &[
                "trade_account_id,item_number,type,quantity,netrevenue,shipped_dt",
                "A1,I1,SALE,2.5,100.0,2023-01-05",
                "A2,I1,SALE,1.5,,2023-01-06",
            ],
        );
        let out = tempdir().unwrap();
        let mut engine = MergeEngine::new(settings_for(raw.path(), out.path()));

        let master = engine.merge(true).unwrap().clone();
        let quantities: Vec<Option<f64>> =
            master.column(QUANTITY).unwrap().f64().unwrap().into_iter().collect();
        assert_eq!(quantities, vec![Some(2.5), Some(1.5)]);
        let revenue: Vec<Option<f64>> =
            master.column(NET_REVENUE).unwrap().f64().unwrap().into_iter().collect();
        assert_eq!(revenue, vec![Some(100.0), Some(0.0)]);

        // Cached copy keeps the fractions too
        let mut cached = MergeEngine::new(settings_for(raw.path(), out.path()));
        assert!(master.equals_missing(cached.merge(false).unwrap()));
    }
}
