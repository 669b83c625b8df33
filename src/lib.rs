//! TradeForge: trade-account analytics and next-best-item recommendations
//!
//! The merge engine joins raw transactions with customer and item masters
//! into one cached master table. The recommender loads the clustered
//! analytical table built from it and answers account summary and
//! recommendation queries.

pub mod cli;
pub mod config;
pub mod data;
pub mod error;
pub mod merge;
pub mod recommender;
pub mod report;
pub mod schema;
pub mod segments;

// Re-export public items for easier access
pub use cli::{Cli, Command};
pub use config::{MergeSettings, RecommenderSettings, Settings};
pub use error::{Error, Result};
pub use merge::{MergeEngine, RawTables};
pub use recommender::{AccountProfile, AccountSummary, Recommender, SegmentSize, TopSeller};
pub use segments::SegmentTable;
