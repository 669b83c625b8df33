//! Command-line interface definitions and argument parsing

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Settings;

/// Trade-account analytics: merge raw data, summarize accounts, recommend items
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to a TOML settings file
    #[arg(short, long, global = true, env = "TRADEFORGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Print results as JSON instead of text tables
    #[arg(long, global = true)]
    pub json: bool,

    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Join transactions with customer and item masters into the cached master table
    Merge {
        /// Directory holding the raw CSV files
        #[arg(long)]
        raw_dir: Option<PathBuf>,

        /// Directory receiving the merged table
        #[arg(long)]
        processed_dir: Option<PathBuf>,

        /// Rebuild even if a cached master table exists
        #[arg(short, long)]
        force_refresh: bool,
    },

    /// Show key metrics for one account
    Summary {
        account: String,

        /// Analytical table (CSV or Parquet)
        #[arg(short, long)]
        data: Option<PathBuf>,
    },

    /// Recommend cluster best sellers the account has not bought
    Recommend {
        account: String,

        /// Number of recommendations
        #[arg(short = 'n', long)]
        top_n: Option<usize>,

        #[arg(short, long)]
        data: Option<PathBuf>,
    },

    /// List the most widely bought items within a cluster
    TopSellers {
        cluster: i64,

        #[arg(short = 'n', long, default_value = "10")]
        top_n: usize,

        #[arg(short, long)]
        data: Option<PathBuf>,
    },

    /// Show the number of accounts in each segment
    Segments {
        #[arg(short, long)]
        data: Option<PathBuf>,
    },

    /// List account identifiers in table order
    Accounts {
        #[arg(short, long, default_value = "500")]
        limit: usize,

        #[arg(short, long)]
        data: Option<PathBuf>,
    },
}

impl Command {
    /// Analytical table override given on the command line
    pub fn data_path(&self) -> Option<&PathBuf> {
        match self {
            Command::Merge { .. } => None,
            Command::Summary { data, .. }
            | Command::Recommend { data, .. }
            | Command::TopSellers { data, .. }
            | Command::Segments { data }
            | Command::Accounts { data, .. } => data.as_ref(),
        }
    }

    /// Fold command-line overrides into file/default settings
    pub fn apply_overrides(&self, settings: &mut Settings) {
        if let Command::Merge {
            raw_dir,
            processed_dir,
            ..
        } = self
        {
            if let Some(dir) = raw_dir {
                settings.merge.raw_dir = dir.clone();
            }
            if let Some(dir) = processed_dir {
                settings.merge.processed_dir = dir.clone();
            }
        }
        if let Some(path) = self.data_path() {
            settings.recommender.data_path = Some(path.clone());
        }
    }
}
