// src/commands/stash.rs
//! Single-document conversion

use super::{build_pipeline, open_repository, open_store};
use anyhow::{Context, Result};
use refstash::config::RefstashConfig;
use tracing::info;

/// Convert one document, stash it, and print its report as JSON
pub fn cmd_stash(
    config: &RefstashConfig,
    path: &str,
    bucket: Option<String>,
    replace: bool,
) -> Result<()> {
    info!("Stashing {}", path);
    let repository = open_repository(config)?;
    let store = open_store(config)?;
    let pipeline = build_pipeline(config, repository, store, bucket, replace)?;

    let report = pipeline
        .run(path)
        .with_context(|| format!("Failed to process {}", path))?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    if let Some(location) = report.s3_location.as_deref().filter(|_| report.stashed == Some(true)) {
        println!("Stashed at {}", location);
    }
    Ok(())
}
