// src/commands/summary.rs
//! Summaries of saved batch reports

use anyhow::{Context, Result};
use refstash::report::ReportAggregator;
use std::path::Path;

/// Re-read a report file and print its counts
pub fn cmd_summary(report: &Path) -> Result<()> {
    let aggregator = ReportAggregator::read(report)
        .with_context(|| format!("Failed to load report {}", report.display()))?;

    println!("REPORT:\t{}", report.display());
    println!("SUMMARY:");
    println!("{}", aggregator.summary());

    let errored: Vec<_> = aggregator
        .reports()
        .values()
        .filter_map(|r| r.error.as_deref().map(|e| (r.path.as_str(), e)))
        .collect();
    if !errored.is_empty() {
        println!("\nErrors:");
        for (path, error) in errored {
            println!("  {}: {}", path, error);
        }
    }
    Ok(())
}
