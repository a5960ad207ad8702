// src/commands/mod.rs
//! Command handlers for the refstash CLI

mod bucket;
mod collection;
mod convert;
mod download;
pub mod progress;
mod stash;
mod summary;

pub use bucket::cmd_bucket_stats;
pub use collection::{cmd_check, cmd_collection, CollectionOptions};
pub use convert::cmd_convert;
pub use download::cmd_download;
pub use stash::cmd_stash;
pub use summary::cmd_summary;

use anyhow::{Context, Result};
use refstash::archive::{ArchiveIndex, ObjectStore, S3Store};
use refstash::config::RefstashConfig;
use refstash::pipeline::{ConversionPipeline, PipelineOptions};
use refstash::repository::{NuxeoClient, SourceRepository};
use std::sync::Arc;

/// Connect to the configured Nuxeo instance
pub(crate) fn open_repository(config: &RefstashConfig) -> Result<Arc<dyn SourceRepository>> {
    let client = NuxeoClient::new(
        &config.nuxeo.api,
        config.nuxeo.user.clone(),
        config.nuxeo.password.clone(),
        config.http_timeout()?,
    )
    .context("Failed to create Nuxeo client")?
    .with_page_size(config.nuxeo.page_size);
    Ok(Arc::new(client))
}

/// Connect to the configured object store
pub(crate) fn open_store(config: &RefstashConfig) -> Result<Arc<dyn ObjectStore>> {
    let store = S3Store::new(
        &config.s3.region,
        config.s3.endpoint.as_deref(),
        config.s3.path_style,
    )
    .context("Failed to connect to S3")?;
    Ok(Arc::new(store))
}

/// Bucket from the command line, else from the config
pub(crate) fn bucket_or_default(config: &RefstashConfig, bucket: Option<String>) -> String {
    bucket.unwrap_or_else(|| config.s3.bucket.clone())
}

/// Assemble a pipeline from config plus command-line overrides
pub(crate) fn build_pipeline(
    config: &RefstashConfig,
    repository: Arc<dyn SourceRepository>,
    store: Arc<dyn ObjectStore>,
    bucket: Option<String>,
    replace: bool,
) -> Result<ConversionPipeline> {
    let options = PipelineOptions {
        bucket: bucket_or_default(config, bucket),
        replace,
        scratch_dir: config.conversion.scratch_dir.clone(),
        picture_types: config.nuxeo.picture_types.clone(),
    };
    Ok(ConversionPipeline::new(
        repository,
        ArchiveIndex::new(store),
        config.classifier()?,
        config.tool_invoker()?,
        options,
    ))
}

/// Last path segment of a collection path, used to name reports and logs
pub fn collection_name(path: &str) -> String {
    path.rsplit('/')
        .find(|segment| !segment.is_empty())
        .unwrap_or("collection")
        .to_string()
}
