// src/archive/mod.rs

//! Destination object store and the archive decision
//!
//! Every converted image lands at one deterministic key derived from the
//! document's unique id, so the existence of that key is the whole archive
//! index. [`ArchiveIndex`] asks the [`ObjectStore`] whether the key is there,
//! decides between create, replace and skip, and performs the upload.

mod s3;

pub use s3::S3Store;

use crate::error::{Error, Result};
use crate::sniff;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Object storage operations the archive needs
pub trait ObjectStore: Send + Sync {
    /// Whether the bucket exists; absence is `Ok(false)`, not an error
    fn bucket_exists(&self, bucket: &str) -> Result<bool>;

    /// Whether an object exists at `key`
    fn key_exists(&self, bucket: &str, key: &str) -> Result<bool>;

    /// Write (or overwrite) an object
    fn put_object(&self, bucket: &str, key: &str, data: &[u8], content_type: &str) -> Result<()>;

    /// Object count and total size under a prefix
    fn usage(&self, bucket: &str, prefix: &str) -> Result<BucketUsage>;
}

/// Totals returned by [`ObjectStore::usage`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BucketUsage {
    pub objects: u64,
    pub bytes: u64,
}

/// What to do with the destination key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArchiveDecision {
    #[serde(rename = "created")]
    Create,
    #[serde(rename = "replaced")]
    Replace,
    #[serde(rename = "skipped")]
    Skip,
}

impl ArchiveDecision {
    /// Past-tense action label recorded in reports
    pub fn action(&self) -> &'static str {
        match self {
            Self::Create => "created",
            Self::Replace => "replaced",
            Self::Skip => "skipped",
        }
    }
}

impl fmt::Display for ArchiveDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.action())
    }
}

/// Canonical location of one document's converted image
///
/// `bucket_path` is a bucket name optionally followed by a key prefix
/// (`"bucket"` or `"bucket/some/prefix"`). The key itself is the document's
/// unique id with no extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationKey {
    pub bucket: String,
    pub key: String,
    /// `s3://{bucket_path}/{uid}`
    pub location: String,
}

impl DestinationKey {
    pub fn new(bucket_path: &str, uid: &str) -> Result<Self> {
        let bucket_path = bucket_path.trim_matches('/');
        if bucket_path.is_empty() {
            return Err(Error::ConfigError("Destination bucket is empty".to_string()));
        }
        if uid.is_empty() || uid.contains('/') {
            return Err(Error::ParseError(format!(
                "Invalid document id for destination key: '{}'",
                uid
            )));
        }

        let (bucket, key) = match bucket_path.split_once('/') {
            Some((bucket, prefix)) => {
                let prefix = prefix.trim_matches('/');
                if prefix.is_empty() {
                    (bucket, uid.to_string())
                } else {
                    (bucket, format!("{}/{}", prefix, uid))
                }
            }
            None => (bucket_path, uid.to_string()),
        };

        Ok(Self {
            bucket: bucket.to_string(),
            key,
            location: format!("s3://{}/{}", bucket_path, uid),
        })
    }
}

impl fmt::Display for DestinationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.location)
    }
}

/// Existence checks and uploads against the destination store
#[derive(Clone)]
pub struct ArchiveIndex {
    store: Arc<dyn ObjectStore>,
}

impl ArchiveIndex {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Whether `key` exists; a missing bucket means it does not
    pub fn exists(&self, bucket: &str, key: &str) -> Result<bool> {
        if !self.store.bucket_exists(bucket)? {
            debug!("Bucket {} does not exist", bucket);
            return Ok(false);
        }
        self.store.key_exists(bucket, key)
    }

    /// Skip iff the key exists and replacement was not requested
    pub fn decide(exists: bool, replace: bool) -> ArchiveDecision {
        match (exists, replace) {
            (false, _) => ArchiveDecision::Create,
            (true, true) => ArchiveDecision::Replace,
            (true, false) => ArchiveDecision::Skip,
        }
    }

    /// Carry out `decision` for the artifact at `artifact`
    ///
    /// The Content-Type is sniffed from the artifact's bytes. Skip does
    /// nothing and does not read the file.
    pub fn stash(
        &self,
        artifact: &Path,
        dest: &DestinationKey,
        decision: ArchiveDecision,
    ) -> Result<()> {
        if decision == ArchiveDecision::Skip {
            info!("{} already archived, not uploading", dest);
            return Ok(());
        }

        let data = std::fs::read(artifact).map_err(|e| {
            Error::IoError(format!("Failed to read {}: {e}", artifact.display()))
        })?;
        let content_type = sniff::from_magic_bytes(&data);

        info!(
            "Uploading {} ({} bytes, {}) to {}",
            artifact.display(),
            data.len(),
            content_type,
            dest
        );
        self.store
            .put_object(&dest.bucket, &dest.key, &data, content_type)?;
        info!("{} {}", decision.action(), dest);
        Ok(())
    }
}
