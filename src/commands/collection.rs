// src/commands/collection.rs
//! Collection-wide commands: batch conversion and the missing-image check

use super::progress::BatchProgress;
use super::{bucket_or_default, build_pipeline, collection_name, open_repository, open_store};
use anyhow::{Context, Result};
use rayon::prelude::*;
use refstash::archive::{ArchiveIndex, DestinationKey};
use refstash::config::RefstashConfig;
use refstash::report::ReportAggregator;
use refstash::repository::SourceRepository;
use std::path::PathBuf;
use tracing::{error, info, warn};

/// Options for [`cmd_collection`] beyond the config file
pub struct CollectionOptions {
    pub bucket: Option<String>,
    pub replace: bool,
    pub components: bool,
    pub workers: Option<usize>,
    pub report_dir: Option<PathBuf>,
}

/// Paths to process: the collection's children, then (optionally) each
/// child's own children
fn enumerate(
    repository: &dyn SourceRepository,
    path: &str,
    components: bool,
    aggregator: &mut ReportAggregator,
) -> Result<Vec<String>> {
    let spinner = BatchProgress::spinner(&format!("Listing {}", path));
    let objects = repository
        .children(path)
        .with_context(|| format!("Failed to list documents under {}", path))?;

    let mut paths = Vec::with_capacity(objects.len());
    for object in objects {
        if components {
            match repository.children(&object) {
                Ok(children) => {
                    paths.push(object);
                    paths.extend(children);
                }
                Err(e) => {
                    warn!("Failed to list components of {}: {}", object, e);
                    aggregator.record_error(&object, format!("Failed to list components: {e}"));
                }
            }
        } else {
            paths.push(object);
        }
        spinner.set_message(format!("Listing {} ({} found)", path, paths.len()));
    }
    spinner.finish_and_clear();
    Ok(paths)
}

/// Convert and stash every document under a collection
pub fn cmd_collection(config: &RefstashConfig, path: &str, options: CollectionOptions) -> Result<()> {
    let collection = collection_name(path);
    let workers = options.workers.unwrap_or(config.conversion.workers).max(1);
    info!("Processing collection {} with {} workers", path, workers);

    let repository = open_repository(config)?;
    let store = open_store(config)?;
    let pipeline = build_pipeline(
        config,
        repository.clone(),
        store,
        options.bucket,
        options.replace,
    )?;

    let mut aggregator = ReportAggregator::new();
    let paths = enumerate(repository.as_ref(), path, options.components, &mut aggregator)?;
    println!("Found {} documents under {}", paths.len(), path);

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .context("Failed to create worker pool")?;

    let progress = BatchProgress::new(paths.len() as u64, "Converting");
    let results: Vec<_> = pool.install(|| {
        paths
            .par_iter()
            .map(|doc_path| {
                let result = pipeline.run(doc_path);
                let label = match &result {
                    Ok(report) => report
                        .outcome
                        .map(|state| state.as_str())
                        .unwrap_or("done"),
                    Err(_) => "FAILED",
                };
                progress.complete(doc_path, label);
                (doc_path.clone(), result)
            })
            .collect()
    });
    progress.finish("Done");

    for (doc_path, result) in results {
        match result {
            Ok(report) => aggregator.record(report),
            Err(e) => {
                error!("Failed to process {}: {}", doc_path, e);
                aggregator.record_error(&doc_path, e.to_string());
            }
        }
    }

    let report_dir = options
        .report_dir
        .unwrap_or_else(|| config.conversion.report_dir.clone());
    let timestamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
    let report_file = report_dir.join(format!("{}-{}.json", collection, timestamp));
    aggregator
        .write(&report_file)
        .with_context(|| format!("Failed to write report {}", report_file.display()))?;

    println!("REPORT:\t{}", report_file.display());
    println!("SUMMARY:");
    println!("{}", aggregator.summary());
    Ok(())
}

/// Report documents under a collection that have no object in the bucket
pub fn cmd_check(
    config: &RefstashConfig,
    path: &str,
    bucket: Option<String>,
    components: bool,
) -> Result<()> {
    let bucket_path = bucket_or_default(config, bucket);
    let repository = open_repository(config)?;
    let archive = ArchiveIndex::new(open_store(config)?);

    let mut ignored = ReportAggregator::new();
    let paths = enumerate(repository.as_ref(), path, components, &mut ignored)?;
    println!(
        "Found {} documents at {}. Checking {} for existing images.",
        paths.len(),
        path,
        bucket_path
    );

    let mut missing = 0usize;
    for doc_path in &paths {
        let uid = repository
            .resolve(doc_path)
            .with_context(|| format!("Failed to resolve {}", doc_path))?;
        let dest = DestinationKey::new(&bucket_path, &uid)?;
        if !archive.exists(&dest.bucket, &dest.key)? {
            println!("missing: {} ({})", dest, doc_path);
            missing += 1;
        }
    }

    println!("Done. Checked {} documents, {} missing", paths.len(), missing);
    Ok(())
}
