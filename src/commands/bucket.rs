// src/commands/bucket.rs
//! Destination bucket statistics

use super::{bucket_or_default, open_store};
use anyhow::Result;
use refstash::config::RefstashConfig;
use tracing::info;

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Print object count and total size under the bucket (and prefix)
pub fn cmd_bucket_stats(config: &RefstashConfig, bucket: Option<String>) -> Result<()> {
    let bucket_path = bucket_or_default(config, bucket);
    let bucket_path = bucket_path.trim_matches('/');
    let (bucket, prefix) = bucket_path.split_once('/').unwrap_or((bucket_path, ""));
    info!("Counting objects in s3://{}", bucket_path);

    let store = open_store(config)?;
    let usage = store.usage(bucket, prefix)?;

    println!("total size:\t{:.3} GB", usage.bytes as f64 / GIB);
    println!("total count:\t{}", usage.objects);
    Ok(())
}
