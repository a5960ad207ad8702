// src/main.rs

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use refstash::config::RefstashConfig;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;

use cli::{Cli, Commands};

/// Initialize tracing, to `log_file` when given and stderr otherwise
fn init_tracing(verbose: bool, log_file: Option<File>) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    match log_file {
        Some(file) => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .init(),
        None => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
    }
}

/// Open (appending) the per-collection log file
fn open_log_file(log_dir: &Path, collection: &str) -> Result<(PathBuf, File)> {
    fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;
    let path = log_dir.join(format!("{}.log", collection));
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("Failed to open log file {}", path.display()))?;
    Ok((path, file))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = &cli.command {
        clap_complete::generate(*shell, &mut Cli::command(), "refstash", &mut std::io::stdout());
        return Ok(());
    }

    let config = RefstashConfig::load_or_default(cli.config.as_deref())?;

    // Batch runs log to a file per collection
    let log_file = match &cli.command {
        Commands::Collection { path, log_dir, .. } => {
            let log_dir = log_dir.clone().unwrap_or_else(|| config.conversion.log_dir.clone());
            let (log_path, file) = open_log_file(&log_dir, &commands::collection_name(path))?;
            println!("LOG:\t{}", log_path.display());
            Some(file)
        }
        _ => None,
    };
    init_tracing(cli.verbose, log_file);

    match cli.command {
        Commands::Stash {
            path,
            bucket,
            replace,
        } => commands::cmd_stash(&config, &path, bucket, replace),

        Commands::Collection {
            path,
            bucket,
            replace,
            components,
            workers,
            report_dir,
            log_dir: _,
        } => commands::cmd_collection(
            &config,
            &path,
            commands::CollectionOptions {
                bucket,
                replace,
                components,
                workers,
                report_dir,
            },
        ),

        Commands::Check {
            path,
            bucket,
            components,
        } => commands::cmd_check(&config, &path, bucket, components),

        Commands::Download { path, output } => commands::cmd_download(&config, &path, output),

        Commands::Convert {
            input,
            output,
            mimetype,
        } => commands::cmd_convert(&config, &input, &output, mimetype),

        Commands::Summary { report } => commands::cmd_summary(&report),

        Commands::BucketStats { bucket } => commands::cmd_bucket_stats(&config, bucket),

        Commands::Completions { .. } => Ok(()),
    }
}
