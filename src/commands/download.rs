// src/commands/download.rs
//! Fetch a document's master file without converting it

use super::open_repository;
use anyhow::{Context, Result};
use refstash::config::RefstashConfig;
use refstash::repository::download_original;
use std::path::PathBuf;

/// Download the master file of `path` into `output` (default: current dir)
pub fn cmd_download(config: &RefstashConfig, path: &str, output: Option<PathBuf>) -> Result<()> {
    let repository = open_repository(config)?;
    let dir = output.unwrap_or_else(|| PathBuf::from("."));

    let dest = download_original(repository.as_ref(), path, &dir)
        .with_context(|| format!("Failed to download {}", path))?;
    println!("Downloaded {} to {}", path, dest.display());
    Ok(())
}
