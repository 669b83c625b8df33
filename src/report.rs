//! Plain-text rendering of query results for the console

use std::fmt::Write;

use crate::recommender::{AccountSummary, SegmentSize, TopSeller};
use crate::schema::UNKNOWN;

/// Render an account summary as labelled lines
pub fn format_summary(summary: &AccountSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "=== Account {} ===", summary.account_id);
    let _ = writeln!(out, "Segment:           {}", summary.cluster_name);
    let _ = writeln!(out, "Total net revenue: ${:.2}", summary.total_spend);
    let _ = writeln!(out, "Samples requested: {}", summary.sample_count);
    let _ = writeln!(out, "Conversion rate:   {:.1}%", summary.conversion_rate());
    let _ = writeln!(out, "Top category:      {}", summary.top_category);
    out
}

/// Render ranked items as a fixed-width table
pub fn format_sellers(title: &str, sellers: &[TopSeller]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "=== {} ===", title);
    if sellers.is_empty() {
        let _ = writeln!(out, "No items to show.");
        return out;
    }

    let _ = writeln!(
        out,
        "  {:<4} | {:<14} | {:<20} | {:<16} | {:>8} | {:>6}",
        "Rank", "Item", "Category", "Motif", "Quantity", "Buyers"
    );
    let _ = writeln!(out, "  {}", "-".repeat(84));
    for (rank, seller) in sellers.iter().enumerate() {
        let _ = writeln!(
            out,
            "  {:<4} | {:<14} | {:<20} | {:<16} | {:>8} | {:>6}",
            rank + 1,
            seller.item_number,
            seller.category_name.as_deref().unwrap_or(UNKNOWN),
            seller.motif.as_deref().unwrap_or(UNKNOWN),
            seller.total_quantity,
            seller.unique_buyers
        );
    }
    out
}

/// Render segment sizes with their share of all accounts
pub fn format_segment_sizes(sizes: &[SegmentSize]) -> String {
    let total: usize = sizes.iter().map(|s| s.accounts).sum();
    let mut out = String::new();
    let _ = writeln!(out, "=== Segments ===");
    let _ = writeln!(out, "Total accounts: {}", total);

    for size in sizes {
        let code = size
            .cluster
            .map(|c| c.to_string())
            .unwrap_or_else(|| "-".to_string());
        let percentage = size.accounts as f64 / total.max(1) as f64 * 100.0;
        let _ = writeln!(
            out,
            "  {:>3} {:<22} {:>7} accounts ({:.1}%)",
            code, size.label, size.accounts, percentage
        );
    }
    out
}

/// Render category counts with their share of the account's rows
pub fn format_category_mix(mix: &[(String, usize)]) -> String {
    let total: usize = mix.iter().map(|(_, count)| count).sum();
    let mut out = String::new();
    let _ = writeln!(out, "Purchase category mix:");
    for (category, count) in mix {
        let percentage = *count as f64 / total.max(1) as f64 * 100.0;
        let _ = writeln!(out, "  {:<24} {:>6} ({:.1}%)", category, count, percentage);
    }
    out
}

pub fn format_timeline(timeline: &[(i32, f64)]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Activity timeline:");
    for (year, revenue) in timeline {
        let _ = writeln!(out, "  {}  ${:>12.2}", year, revenue);
    }
    out
}
