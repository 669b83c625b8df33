//! Settings for the merge and recommendation engines, loadable from TOML

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::schema::ISO_DATE_FORMAT;
use crate::segments::SegmentTable;

/// Top-level settings file layout
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub merge: MergeSettings,
    pub recommender: RecommenderSettings,
    /// Optional replacement for the default segment labels, keyed by code
    pub segments: BTreeMap<String, String>,
}

/// Locations and parsing options for the merge step
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MergeSettings {
    /// Directory holding transactions.csv, customer_master.csv and item_master.csv
    pub raw_dir: PathBuf,
    /// Directory receiving the merged cache file
    pub processed_dir: PathBuf,
    /// File name of the merged cache inside `processed_dir`
    pub cache_file: String,
    /// strftime format of the shipped date column
    pub date_format: String,
}

impl Default for MergeSettings {
    fn default() -> Self {
        Self {
            raw_dir: PathBuf::from("data/raw"),
            processed_dir: PathBuf::from("data/processed"),
            cache_file: "master.csv".to_string(),
            date_format: ISO_DATE_FORMAT.to_string(),
        }
    }
}

impl MergeSettings {
    pub fn cache_path(&self) -> PathBuf {
        self.processed_dir.join(&self.cache_file)
    }
}

/// Analytical table location and ranking parameters
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecommenderSettings {
    /// Explicit analytical table; probed before `candidate_paths`
    pub data_path: Option<PathBuf>,
    /// Fallback locations probed in order
    pub candidate_paths: Vec<PathBuf>,
    /// Cluster top sellers fetched before history exclusion
    pub candidate_pool: usize,
    /// Recommendations returned when the caller does not ask for a count
    pub top_n: usize,
    /// strftime format of text shipped dates in CSV analytical tables
    pub date_format: String,
}

impl Default for RecommenderSettings {
    fn default() -> Self {
        Self {
            data_path: None,
            candidate_paths: vec![
                PathBuf::from("data/processed/notebooks/final_analytics_data.parquet"),
                PathBuf::from("../data/processed/notebooks/final_analytics_data.parquet"),
            ],
            candidate_pool: 20,
            top_n: 5,
            date_format: ISO_DATE_FORMAT.to_string(),
        }
    }
}

impl Settings {
    /// Read settings from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let settings: Settings =
            toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Settings from `path` when given, defaults otherwise
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::from_file(p),
            None => Ok(Self::default()),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.recommender.candidate_pool == 0 {
            return Err(Error::Config("candidate_pool must be at least 1".to_string()));
        }
        self.segment_table().map(|_| ())
    }

    /// Segment labels, falling back to the built-in table when none are configured
    pub fn segment_table(&self) -> Result<SegmentTable> {
        if self.segments.is_empty() {
            return Ok(SegmentTable::default());
        }

        let pairs = self
            .segments
            .iter()
            .map(|(code, label)| {
                code.trim()
                    .parse::<i64>()
                    .map(|c| (c, label.clone()))
                    .map_err(|_| Error::Config(format!("invalid segment code: {}", code)))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(SegmentTable::from_pairs(pairs))
    }
}
