//! Recommendation engine over the merged, clustered analytical table.
//!
//! Accounts are recommended the items most widely bought within their
//! cluster, minus anything they have already bought.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use polars::prelude::*;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::RecommenderSettings;
use crate::data::{normalize_dates, read_table};
use crate::error::{Error, Result};
use crate::schema::{
    as_text, require_columns, EventType, ACCOUNT_ID, ANALYTICS_COLUMNS, CATEGORY_NAME, CLUSTER,
    EVENT_TYPE, ITEM_ID, MOTIF, NET_REVENUE, NOT_AVAILABLE, QUANTITY, SHIPPED_DATE,
};
use crate::segments::SegmentTable;

const TOTAL_QUANTITY: &str = "total_quantity";
const UNIQUE_BUYERS: &str = "unique_buyers";
const YEAR: &str = "year";

/// Account-level fields, read from the account's first row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountProfile {
    pub cluster: Option<i64>,
    pub first_row: usize,
}

/// Key metrics for one account
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountSummary {
    pub account_id: String,
    pub cluster: Option<i64>,
    pub cluster_name: String,
    pub total_spend: f64,
    pub sample_count: usize,
    pub sale_count: usize,
    pub top_category: String,
}

impl AccountSummary {
    /// SALE rows per SAMPLE row, as a percentage
    pub fn conversion_rate(&self) -> f64 {
        self.sale_count as f64 / self.sample_count.max(1) as f64 * 100.0
    }
}

/// One ranked item within a cluster
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopSeller {
    pub item_number: String,
    pub category_name: Option<String>,
    pub motif: Option<String>,
    pub total_quantity: f64,
    pub unique_buyers: u64,
}

/// Number of accounts assigned to one segment
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentSize {
    pub cluster: Option<i64>,
    pub label: String,
    pub accounts: usize,
}

/// Read-only query engine over the analytical table
#[derive(Debug)]
pub struct Recommender {
    df: DataFrame,
    sales: DataFrame,
    profiles: IndexMap<String, AccountProfile>,
    segments: SegmentTable,
    candidate_pool: usize,
}

impl Recommender {
    /// Probe the configured data path, then each candidate path in order
    pub fn discover(settings: &RecommenderSettings, segments: SegmentTable) -> Result<Self> {
        let tried: Vec<PathBuf> = settings
            .data_path
            .iter()
            .chain(settings.candidate_paths.iter())
            .cloned()
            .collect();

        match tried.iter().find(|p| p.is_file()) {
            Some(path) => Self::from_path(path, settings, segments),
            None => Err(Error::DataNotFound { tried }),
        }
    }

    /// Load a CSV or Parquet analytical table
    pub fn from_path(
        path: &Path,
        settings: &RecommenderSettings,
        segments: SegmentTable,
    ) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::DataNotFound {
                tried: vec![path.to_path_buf()],
            });
        }

        info!(path = %path.display(), "loading analytical table");
        let df = read_table(path)?;
        Self::from_frame(df, settings, segments).map_err(|e| match e {
            Error::Polars(e) => {
                error!(path = %path.display(), error = %e, "analytical table has malformed values");
                Error::data_source(path, "conform", e)
            }
            other => other,
        })
    }

    pub fn from_frame(
        df: DataFrame,
        settings: &RecommenderSettings,
        segments: SegmentTable,
    ) -> Result<Self> {
        require_columns(&df, "analytical table", ANALYTICS_COLUMNS)?;
        if settings.candidate_pool == 0 {
            return Err(Error::Config("candidate_pool must be at least 1".to_string()));
        }

        let mut df = df
            .lazy()
            .with_columns([
                as_text(ACCOUNT_ID),
                as_text(ITEM_ID),
                as_text(EVENT_TYPE),
                col(QUANTITY).strict_cast(DataType::Float64),
                col(NET_REVENUE).strict_cast(DataType::Float64),
                // float codes written upstream (1.0) become integer codes
                col(CLUSTER).cast(DataType::Int64),
            ])
            .collect()?;

        if df.get_column_names().contains(&SHIPPED_DATE) {
            df = normalize_dates(df, SHIPPED_DATE, &settings.date_format)?;
        }

        let sales = df
            .clone()
            .lazy()
            .filter(
                col(EVENT_TYPE)
                    .eq(lit(EventType::Sale.as_str()))
                    .and(col(ITEM_ID).is_not_null()),
            )
            .collect()?;

        let profiles = build_profiles(&df)?;
        info!(
            rows = df.height(),
            sales = sales.height(),
            accounts = profiles.len(),
            "analytical table ready"
        );

        Ok(Self {
            df,
            sales,
            profiles,
            segments,
            candidate_pool: settings.candidate_pool,
        })
    }

    /// The full analytical table
    pub fn frame(&self) -> &DataFrame {
        &self.df
    }

    pub fn segments(&self) -> &SegmentTable {
        &self.segments
    }

    pub fn profile(&self, account_id: &str) -> Option<&AccountProfile> {
        self.profiles.get(account_id)
    }

    /// Distinct accounts in first-seen order
    pub fn account_ids(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }

    /// Summary metrics for an account; `None` when it has no rows
    pub fn account_summary(&self, account_id: &str) -> Result<Option<AccountSummary>> {
        let Some(profile) = self.profiles.get(account_id) else {
            return Ok(None);
        };
        let rows = self.account_rows(account_id)?;

        let total_spend = rows.column(NET_REVENUE)?.f64()?.sum().unwrap_or(0.0);
        let events = rows.column(EVENT_TYPE)?.str()?;
        let sample_count = events
            .into_iter()
            .filter(|t| *t == Some(EventType::Sample.as_str()))
            .count();
        let sale_count = events
            .into_iter()
            .filter(|t| *t == Some(EventType::Sale.as_str()))
            .count();

        let categories = rows.column(CATEGORY_NAME)?.str()?;
        let top_category = most_frequent(categories.into_iter().flatten())
            .unwrap_or(NOT_AVAILABLE)
            .to_string();

        Ok(Some(AccountSummary {
            account_id: account_id.to_string(),
            cluster: profile.cluster,
            cluster_name: self.segments.label(profile.cluster).to_string(),
            total_spend,
            sample_count,
            sale_count,
            top_category,
        }))
    }

    /// Items within a cluster ranked by how many distinct accounts bought them.
    ///
    /// Ties keep the order in which groups first appear in the sales rows.
    pub fn cluster_top_sellers(&self, cluster_id: i64, top_n: usize) -> Result<Vec<TopSeller>> {
        let limit = IdxSize::try_from(top_n).unwrap_or(IdxSize::MAX);
        let ranked = self
            .sales
            .clone()
            .lazy()
            .filter(col(CLUSTER).eq(lit(cluster_id)))
            .group_by_stable([col(ITEM_ID), col(CATEGORY_NAME), col(MOTIF)])
            .agg([
                col(QUANTITY).sum().alias(TOTAL_QUANTITY),
                col(ACCOUNT_ID)
                    .drop_nulls()
                    .n_unique()
                    .cast(DataType::UInt64)
                    .alias(UNIQUE_BUYERS),
            ])
            .sort_by_exprs(
                [col(UNIQUE_BUYERS)],
                SortMultipleOptions::default()
                    .with_order_descending(true)
                    .with_maintain_order(true),
            )
            .limit(limit)
            .collect()?;

        let items = ranked.column(ITEM_ID)?.str()?;
        let categories = ranked.column(CATEGORY_NAME)?.str()?;
        let motifs = ranked.column(MOTIF)?.str()?;
        let quantities = ranked.column(TOTAL_QUANTITY)?.f64()?;
        let buyers = ranked.column(UNIQUE_BUYERS)?.u64()?;

        let sellers = items
            .into_iter()
            .zip(categories)
            .zip(motifs)
            .zip(quantities)
            .zip(buyers)
            .filter_map(|((((item, category), motif), quantity), buyers)| {
                Some(TopSeller {
                    item_number: item?.to_string(),
                    category_name: category.map(str::to_string),
                    motif: motif.map(str::to_string),
                    total_quantity: quantity.unwrap_or(0.0),
                    unique_buyers: buyers.unwrap_or(0),
                })
            })
            .collect::<Vec<_>>();

        debug!(cluster_id, top_n, returned = sellers.len(), "cluster top sellers");
        Ok(sellers)
    }

    /// Cluster best sellers the account has not bought yet.
    ///
    /// `None` when the account has no rows. Fewer than `top_n` items (possibly
    /// none) come back when the candidate pool runs out after exclusion.
    pub fn recommend_for_account(
        &self,
        account_id: &str,
        top_n: usize,
    ) -> Result<Option<Vec<TopSeller>>> {
        let Some(profile) = self.profiles.get(account_id) else {
            return Ok(None);
        };
        let Some(cluster) = profile.cluster else {
            debug!(account_id, "account has no cluster, nothing to rank");
            return Ok(Some(Vec::new()));
        };

        let candidates = self.cluster_top_sellers(cluster, self.candidate_pool)?;
        let purchased = self.purchased_items(account_id)?;

        let recommendations: Vec<TopSeller> = candidates
            .into_iter()
            .filter(|seller| !purchased.contains(seller.item_number.as_str()))
            .take(top_n)
            .collect();

        debug!(
            account_id,
            cluster,
            purchased = purchased.len(),
            returned = recommendations.len(),
            "recommendations computed"
        );
        Ok(Some(recommendations))
    }

    /// Item identifiers on the account's SALE rows
    pub fn purchased_items(&self, account_id: &str) -> Result<HashSet<String>> {
        let bought = self
            .sales
            .clone()
            .lazy()
            .filter(col(ACCOUNT_ID).eq(lit(account_id)))
            .select([col(ITEM_ID)])
            .collect()?;

        let items = bought.column(ITEM_ID)?.str()?;
        Ok(items.into_iter().flatten().map(str::to_string).collect())
    }

    /// Row counts per category for an account, most frequent first
    pub fn category_mix(&self, account_id: &str) -> Result<Vec<(String, usize)>> {
        if !self.profiles.contains_key(account_id) {
            return Ok(Vec::new());
        }
        let rows = self.account_rows(account_id)?;
        let categories = rows.column(CATEGORY_NAME)?.str()?;

        let mut mix: Vec<(String, usize)> = count_in_order(categories.into_iter().flatten())
            .into_iter()
            .map(|(category, count)| (category.to_string(), count))
            .collect();
        // stable: equal counts stay in first-seen order
        mix.sort_by(|a, b| b.1.cmp(&a.1));
        Ok(mix)
    }

    /// Net revenue per shipped year, ascending
    pub fn revenue_timeline(&self, account_id: &str) -> Result<Vec<(i32, f64)>> {
        require_columns(&self.df, "analytical table", &[SHIPPED_DATE])?;
        if !self.profiles.contains_key(account_id) {
            return Ok(Vec::new());
        }

        let timeline = self
            .df
            .clone()
            .lazy()
            .filter(
                col(ACCOUNT_ID)
                    .eq(lit(account_id))
                    .and(col(SHIPPED_DATE).is_not_null()),
            )
            .group_by([col(SHIPPED_DATE).dt().year().alias(YEAR)])
            .agg([col(NET_REVENUE).sum()])
            .sort_by_exprs([col(YEAR)], SortMultipleOptions::default())
            .collect()?;

        let years = timeline.column(YEAR)?.i32()?;
        let revenue = timeline.column(NET_REVENUE)?.f64()?;
        Ok(years
            .into_iter()
            .zip(revenue)
            .filter_map(|(year, total)| Some((year?, total.unwrap_or(0.0))))
            .collect())
    }

    /// Accounts per cluster, in ascending cluster order with unclustered last
    pub fn segment_sizes(&self) -> Vec<SegmentSize> {
        let mut counts: IndexMap<Option<i64>, usize> = IndexMap::new();
        for profile in self.profiles.values() {
            *counts.entry(profile.cluster).or_insert(0) += 1;
        }
        counts.sort_by(|a, _, b, _| match (a, b) {
            (Some(x), Some(y)) => x.cmp(y),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        });

        counts
            .into_iter()
            .map(|(cluster, accounts)| SegmentSize {
                cluster,
                label: self.segments.label(cluster).to_string(),
                accounts,
            })
            .collect()
    }

    fn account_rows(&self, account_id: &str) -> Result<DataFrame> {
        Ok(self
            .df
            .clone()
            .lazy()
            .filter(col(ACCOUNT_ID).eq(lit(account_id)))
            .collect()?)
    }
}

/// First row per account defines its profile; later disagreements are reported
fn build_profiles(df: &DataFrame) -> Result<IndexMap<String, AccountProfile>> {
    let accounts = df.column(ACCOUNT_ID)?.str()?;
    let clusters = df.column(CLUSTER)?.i64()?;

    let mut profiles: IndexMap<String, AccountProfile> = IndexMap::new();
    let mut conflicting: HashSet<&str> = HashSet::new();
    // (account, first row, first disagreeing row)
    let mut example: Option<(&str, usize, usize)> = None;

    for (row, (account, cluster)) in accounts.into_iter().zip(clusters).enumerate() {
        let Some(account) = account else { continue };
        match profiles.get(account) {
            Some(profile) if profile.cluster != cluster => {
                conflicting.insert(account);
                example.get_or_insert((account, profile.first_row, row));
            }
            Some(_) => {}
            None => {
                profiles.insert(
                    account.to_string(),
                    AccountProfile {
                        cluster,
                        first_row: row,
                    },
                );
            }
        }
    }

    if let Some((account, first_row, row)) = example {
        warn!(
            accounts = conflicting.len(),
            example = account,
            first_row,
            row,
            "accounts with inconsistent cluster labels, using first row"
        );
    }
    Ok(profiles)
}

fn count_in_order<'a>(values: impl Iterator<Item = &'a str>) -> IndexMap<&'a str, usize> {
    let mut counts = IndexMap::new();
    for value in values {
        *counts.entry(value).or_insert(0) += 1;
    }
    counts
}

/// Most frequent value, ties resolved to the one encountered first
fn most_frequent<'a>(values: impl Iterator<Item = &'a str>) -> Option<&'a str> {
    let mut best: Option<(&str, usize)> = None;
    for (value, count) in count_in_order(values) {
        if best.map_or(true, |(_, top)| count > top) {
            best = Some((value, count));
        }
    }
    best.map(|(value, _)| value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> RecommenderSettings {
        RecommenderSettings::default()
    }

    fn create_test_frame() -> DataFrame {
        df!(
            ACCOUNT_ID => &["A100", "A100", "B1", "B1", "B2", "B3", "C1", "C1"],
            ITEM_ID => &["I1", "I2", "I1", "I3", "I3", "I2", "I1", "I4"],
            EVENT_TYPE => &["SALE", "SAMPLE", "SALE", "SALE", "SALE", "SALE", "SALE", "SAMPLE"],
            QUANTITY => &[1i64, 1, 5, 2, 1, 9, 3, 1],
            NET_REVENUE => &[100.0, 0.0, 500.0, 80.0, 40.0, 300.0, 60.0, 0.0],
            CATEGORY_NAME => &[Some("Fabric"), Some("Wallcovering"), Some("Fabric"), Some("Trim"), Some("Trim"), Some("Wallcovering"), None, None],
            MOTIF => &["Floral", "Stripe", "Floral", "Damask", "Damask", "Stripe", "Floral", "Plain"],
            CLUSTER => &[0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 3.0, 3.0]
        )
        .unwrap()
    }

    fn engine() -> Recommender {
        Recommender::from_frame(create_test_frame(), &settings(), SegmentTable::default()).unwrap()
    }

    #[test]
    fn test_account_summary() {
        let summary = engine().account_summary("A100").unwrap().unwrap();
        assert_eq!(summary.cluster, Some(0));
        assert_eq!(summary.cluster_name, "Champions (VIPs)");
        assert_eq!(summary.total_spend, 100.0);
        assert_eq!(summary.sample_count, 1);
        assert_eq!(summary.sale_count, 1);
        // Fabric and Wallcovering tie; Fabric is seen first
        assert_eq!(summary.top_category, "Fabric");
        assert_eq!(summary.conversion_rate(), 100.0);
    }

    #[test]
    fn test_account_summary_without_categories() {
        let summary = engine().account_summary("C1").unwrap().unwrap();
        assert_eq!(summary.top_category, NOT_AVAILABLE);
        assert_eq!(summary.cluster_name, "Hibernating/Lost");
    }

    #[test]
    fn test_unknown_account() {
        let engine = engine();
        assert!(engine.account_summary("ZZZ").unwrap().is_none());
        assert!(engine.recommend_for_account("ZZZ", 5).unwrap().is_none());
        assert!(engine.category_mix("ZZZ").unwrap().is_empty());
    }

    #[test]
    fn test_cluster_top_sellers_ranked_by_distinct_buyers() {
        let sellers = engine().cluster_top_sellers(0, 10).unwrap();
        let items: Vec<&str> = sellers.iter().map(|s| s.item_number.as_str()).collect();
        // I1 and I3 have two buyers each (I1 first seen), I2 one buyer despite quantity 9
        assert_eq!(items, vec!["I1", "I3", "I2"]);
        assert_eq!(sellers[0].unique_buyers, 2);
        assert_eq!(sellers[0].total_quantity, 6.0);
        assert_eq!(sellers[2].total_quantity, 9.0);

        for pair in sellers.windows(2) {
            assert!(pair[0].unique_buyers >= pair[1].unique_buyers);
        }

        assert_eq!(engine().cluster_top_sellers(0, 1).unwrap().len(), 1);
        assert!(engine().cluster_top_sellers(42, 10).unwrap().is_empty());
    }

    #[test]
    fn test_recommend_excludes_purchases_but_not_samples() {
        let recs = engine().recommend_for_account("A100", 5).unwrap().unwrap();
        let items: Vec<&str> = recs.iter().map(|s| s.item_number.as_str()).collect();
        assert_eq!(items, vec!["I3", "I2"]);
    }

    #[test]
    fn test_recommend_may_be_empty() {
        // B1 bought I1 and I3; only I2 remains
        let recs = engine().recommend_for_account("B1", 5).unwrap().unwrap();
        assert_eq!(recs.len(), 1);

        // C1's cluster has a single seller which C1 already bought
        let recs = engine().recommend_for_account("C1", 5).unwrap().unwrap();
        assert!(recs.is_empty());
    }

    #[test]
    fn test_candidate_pool_limits_headroom() {
        let pool_of_one = RecommenderSettings {
            candidate_pool: 1,
            ..settings()
        };
        let engine =
            Recommender::from_frame(create_test_frame(), &pool_of_one, SegmentTable::default())
                .unwrap();
        // The only candidate, I1, is already owned by A100
        let recs = engine.recommend_for_account("A100", 5).unwrap().unwrap();
        assert!(recs.is_empty());
    }

    #[test]
    fn test_missing_cluster_column() {
        let df = create_test_frame().drop(CLUSTER).unwrap();
        let err = Recommender::from_frame(df, &settings(), SegmentTable::default()).unwrap_err();
        assert!(matches!(err, Error::MissingColumn { .. }));
    }

    #[test]
    fn test_profiles_use_first_row() {
        let df = df!(
            ACCOUNT_ID => &["A1", "A1"],
            ITEM_ID => &["I1", "I2"],
            EVENT_TYPE => &["SALE", "SALE"],
            QUANTITY => &[1i64, 1],
            NET_REVENUE => &[1.0, 1.0],
            CATEGORY_NAME => &["Fabric", "Fabric"],
            MOTIF => &["Floral", "Floral"],
            CLUSTER => &[2i64, 4]
        )
        .unwrap();
        let engine = Recommender::from_frame(df, &settings(), SegmentTable::default()).unwrap();
        let profile = engine.profile("A1").unwrap();
        assert_eq!(profile.cluster, Some(2));
        assert_eq!(profile.first_row, 0);
    }

    #[test]
    fn test_fractional_quantities_are_summed() {
        let df = df!(
            ACCOUNT_ID => &["A1", "A2"],
            ITEM_ID => &["I1", "I1"],
            EVENT_TYPE => &["SALE", "SALE"],
            QUANTITY => &[2.5, 1.25],
            NET_REVENUE => &[10.0, 5.0],
            CATEGORY_NAME => &["Fabric", "Fabric"],
            MOTIF => &["Floral", "Floral"],
            CLUSTER => &[1i64, 1]
        )
        .unwrap();
        let engine = Recommender::from_frame(df, &settings(), SegmentTable::default()).unwrap();
        let sellers = engine.cluster_top_sellers(1, 5).unwrap();
        assert_eq!(sellers[0].total_quantity, 3.75);
        assert_eq!(sellers[0].unique_buyers, 2);
    }

    #[test]
    fn test_text_quantity_is_rejected() {
        let df = df!(
            ACCOUNT_ID => &["A1"],
            ITEM_ID => &["I1"],
            EVENT_TYPE => &["SALE"],
            QUANTITY => &["two"],
            NET_REVENUE => &[10.0],
            CATEGORY_NAME => &["Fabric"],
            MOTIF => &["Floral"],
            CLUSTER => &[1i64]
        )
        .unwrap();
        let err = Recommender::from_frame(df, &settings(), SegmentTable::default()).unwrap_err();
        assert!(matches!(err, Error::Polars(_)));
    }

    #[test]
    fn test_category_mix_and_segment_sizes() {
        let engine = engine();
        let mix = engine.category_mix("B1").unwrap();
        assert_eq!(mix, vec![("Fabric".to_string(), 1), ("Trim".to_string(), 1)]);

        let sizes = engine.segment_sizes();
        assert_eq!(sizes.len(), 2);
        assert_eq!(sizes[0].cluster, Some(0));
        assert_eq!(sizes[0].accounts, 4);
        assert_eq!(sizes[1].label, "Hibernating/Lost");

        let accounts: Vec<&str> = engine.account_ids().collect();
        assert_eq!(accounts, vec!["A100", "B1", "B2", "B3", "C1"]);
    }

    #[test]
    fn test_most_frequent() {
        assert_eq!(most_frequent(["b", "a", "a", "b"].into_iter()), Some("b"));
        assert_eq!(most_frequent(["b", "a", "a"].into_iter()), Some("a"));
        assert_eq!(most_frequent(std::iter::empty()), None);
    }
}
