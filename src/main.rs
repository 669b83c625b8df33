//! TradeForge CLI: merges raw trade data and serves account summaries and
//! recommendations on the console.

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tradeforge::report::{
    format_category_mix, format_segment_sizes, format_sellers, format_summary, format_timeline,
};
use tradeforge::{AccountSummary, Cli, Command, Error, MergeEngine, Recommender, Settings};

/// Everything the summary view shows for one account
#[derive(Serialize)]
struct AccountReport {
    #[serde(flatten)]
    summary: AccountSummary,
    category_mix: Vec<(String, usize)>,
    revenue_by_year: Vec<(i32, f64)>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut settings = Settings::load(cli.config.as_deref()).context("failed to load settings")?;
    cli.command.apply_overrides(&mut settings);

    match &cli.command {
        Command::Merge { force_refresh, .. } => run_merge(&settings, *force_refresh),
        command => run_query(&cli, command, &settings),
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run_merge(settings: &Settings, force_refresh: bool) -> Result<()> {
    let mut engine = MergeEngine::new(settings.merge.clone());
    let master = engine.merge(force_refresh).context("merge failed")?;

    println!(
        "✓ Master table: {} rows, {} columns",
        master.height(),
        master.width()
    );
    println!("  Saved to: {}", engine.cache_path().display());
    Ok(())
}

fn run_query(cli: &Cli, command: &Command, settings: &Settings) -> Result<()> {
    let segments = settings.segment_table()?;
    let engine = Recommender::discover(&settings.recommender, segments)
        .context("could not load the analytical table")?;
    info!(accounts = engine.account_ids().count(), "engine ready");

    match command {
        Command::Summary { account, .. } => match engine.account_summary(account)? {
            Some(summary) => {
                let category_mix = engine.category_mix(account)?;
                let revenue_by_year = match engine.revenue_timeline(account) {
                    Ok(timeline) => timeline,
                    Err(Error::MissingColumn { .. }) => Vec::new(),
                    Err(e) => return Err(e.into()),
                };

                if cli.json {
                    print_json(&AccountReport {
                        summary,
                        category_mix,
                        revenue_by_year,
                    })?;
                } else {
                    print!("{}", format_summary(&summary));
                    print!("{}", format_category_mix(&category_mix));
                    print!("{}", format_timeline(&revenue_by_year));
                }
            }
            None => println!("Account {} not found.", account),
        },
        Command::Recommend { account, top_n, .. } => {
            let top_n = top_n.unwrap_or(settings.recommender.top_n);
            match engine.recommend_for_account(account, top_n)? {
                Some(recs) if cli.json => print_json(&recs)?,
                Some(recs) if recs.is_empty() => println!(
                    "No new recommendations for {} (the cluster's top sellers are already owned).",
                    account
                ),
                Some(recs) => print!(
                    "{}",
                    format_sellers(&format!("Recommendations for {}", account), &recs)
                ),
                None => println!("Account {} not found.", account),
            }
        }
        Command::TopSellers { cluster, top_n, .. } => {
            let sellers = engine.cluster_top_sellers(*cluster, *top_n)?;
            if cli.json {
                print_json(&sellers)?;
            } else {
                let title = format!("Top sellers: {}", engine.segments().label(Some(*cluster)));
                print!("{}", format_sellers(&title, &sellers));
            }
        }
        Command::Segments { .. } => {
            let sizes = engine.segment_sizes();
            if cli.json {
                print_json(&sizes)?;
            } else {
                print!("{}", format_segment_sizes(&sizes));
            }
        }
        Command::Accounts { limit, .. } => {
            let accounts: Vec<&str> = engine.account_ids().take(*limit).collect();
            if cli.json {
                print_json(&accounts)?;
            } else {
                accounts.iter().for_each(|a| println!("{}", a));
            }
        }
        Command::Merge { .. } => unreachable!("merge is handled before loading the engine"),
    }

    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
