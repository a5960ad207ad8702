// src/archive/s3.rs

//! S3-compatible object store
//!
//! rust-s3 is async; the pipeline is not. Each store owns a small tokio
//! runtime and blocks on it, so callers never need a runtime of their own.
//! Batch workers share one store and may block on it concurrently.

use crate::error::{Error, Result};
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::{Bucket, Region};
use tokio::runtime::Runtime;
use tracing::debug;

use super::{BucketUsage, ObjectStore};

/// [`ObjectStore`] backed by S3 (or an S3-compatible endpoint)
pub struct S3Store {
    runtime: Runtime,
    region: Region,
    credentials: Credentials,
    path_style: bool,
}

impl S3Store {
    /// Connect using credentials from the environment, profile or instance
    /// metadata; `endpoint` selects a non-AWS service
    pub fn new(region: &str, endpoint: Option<&str>, path_style: bool) -> Result<Self> {
        let credentials = Credentials::default()
            .map_err(|e| Error::InitError(format!("Failed to load S3 credentials: {e}")))?;
        Self::with_credentials(region, endpoint, path_style, credentials)
    }

    /// Connect with explicit credentials
    pub fn with_credentials(
        region: &str,
        endpoint: Option<&str>,
        path_style: bool,
        credentials: Credentials,
    ) -> Result<Self> {
        let region = match endpoint {
            Some(endpoint) => Region::Custom {
                region: region.to_string(),
                endpoint: endpoint.to_string(),
            },
            None => region
                .parse()
                .map_err(|e| Error::ConfigError(format!("Invalid S3 region '{}': {}", region, e)))?,
        };
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .map_err(|e| Error::InitError(format!("Failed to create async runtime: {e}")))?;

        Ok(Self {
            runtime,
            region,
            credentials,
            path_style,
        })
    }

    /// HEAD `path` in `bucket`: `Ok(true)` on 2xx, `Ok(false)` on 404
    fn head(&self, bucket: &str, path: &str, what: &str) -> Result<bool> {
        let handle = self.bucket(bucket)?;
        let (_, status) = self
            .runtime
            .block_on(handle.head_object(path))
            .map_err(|e| store_error(&format!("Failed to check {}", what), e))?;
        debug!("HEAD {} -> {}", what, status);

        match status {
            200..=299 => Ok(true),
            404 => Ok(false),
            other => Err(Error::StoreError(format!(
                "HEAD {} returned HTTP {}",
                what, other
            ))),
        }
    }

    fn bucket(&self, name: &str) -> Result<Box<Bucket>> {
        let bucket = Bucket::new(name, self.region.clone(), self.credentials.clone())
            .map_err(|e| store_error(&format!("Failed to open bucket {}", name), e))?;
        Ok(if self.path_style {
            bucket.with_path_style()
        } else {
            bucket
        })
    }
}

fn store_error(context: &str, e: S3Error) -> Error {
    Error::StoreError(format!("{}: {}", context, e))
}

impl ObjectStore for S3Store {
    /// HeadBucket on this one bucket; ListBuckets is often denied to
    /// credentials scoped to a single bucket
    fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        self.head(bucket, "/", &format!("bucket {}", bucket))
    }

    fn key_exists(&self, bucket: &str, key: &str) -> Result<bool> {
        self.head(bucket, key, &format!("s3://{}/{}", bucket, key))
    }

    fn put_object(&self, bucket: &str, key: &str, data: &[u8], content_type: &str) -> Result<()> {
        let handle = self.bucket(bucket)?;
        let response = self
            .runtime
            .block_on(handle.put_object_with_content_type(key, data, content_type))
            .map_err(|e| store_error(&format!("Failed to upload s3://{}/{}", bucket, key), e))?;

        let status = response.status_code();
        if !(200..300).contains(&status) {
            return Err(Error::StoreError(format!(
                "PUT s3://{}/{} returned HTTP {}",
                bucket, key, status
            )));
        }
        Ok(())
    }

    fn usage(&self, bucket: &str, prefix: &str) -> Result<BucketUsage> {
        let handle = self.bucket(bucket)?;
        let pages = self
            .runtime
            .block_on(handle.list(prefix.to_string(), None))
            .map_err(|e| store_error(&format!("Failed to list s3://{}/{}", bucket, prefix), e))?;

        let mut usage = BucketUsage::default();
        for object in pages.iter().flat_map(|page| page.contents.iter()) {
            usage.objects += 1;
            usage.bytes += object.size;
        }
        Ok(usage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ArchiveIndex;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::sync::{Arc, Mutex};
    use std::thread;

    /// Minimal HTTP endpoint answering each request with the status chosen
    /// by `status_for(request_line)`; returns the endpoint URL and the
    /// request lines seen so far
    fn mock_endpoint<F>(status_for: F) -> (String, Arc<Mutex<Vec<String>>>)
    where
        F: Fn(&str) -> u16 + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let endpoint = format!("http://{}", listener.local_addr().unwrap());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();

        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { break };
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                let mut request_line = String::new();
                reader.read_line(&mut request_line).unwrap();
                loop {
                    let mut header = String::new();
                    if reader.read_line(&mut header).unwrap() == 0 || header == "\r\n" {
                        break;
                    }
                }
                let request_line = request_line.trim_end().to_string();
                let status = status_for(&request_line);
                log.lock().unwrap().push(request_line);
                let response = format!(
                    "HTTP/1.1 {} Mock\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                    status
                );
                let _ = stream.write_all(response.as_bytes());
            }
        });

        (endpoint, seen)
    }

    fn store(endpoint: &str) -> S3Store {
        let credentials =
            Credentials::new(Some("AKIDEXAMPLE"), Some("secret"), None, None, None).unwrap();
        S3Store::with_credentials("us-west-2", Some(endpoint), true, credentials).unwrap()
    }

    #[test]
    fn test_bucket_check_is_head_bucket_not_list_buckets() {
        // ListBuckets denied, everything else allowed
        let (endpoint, seen) =
            mock_endpoint(|line| if line.starts_with("GET / ") { 403 } else { 200 });
        let index = ArchiveIndex::new(Arc::new(store(&endpoint)));

        assert!(index.exists("ref-images", "abc-123").unwrap());

        let seen = seen.lock().unwrap();
        assert!(seen.iter().all(|line| line.starts_with("HEAD ")), "{:?}", seen);
        assert!(seen[0].starts_with("HEAD /ref-images/ "), "{:?}", seen);
        assert!(seen[1].starts_with("HEAD /ref-images/abc-123 "), "{:?}", seen);
    }

    #[test]
    fn test_missing_bucket_is_not_archived() {
        let (endpoint, seen) = mock_endpoint(|_| 404);
        let index = ArchiveIndex::new(Arc::new(store(&endpoint)));

        assert!(!index.exists("ref-images", "abc-123").unwrap());
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_missing_key_is_not_archived() {
        let (endpoint, _) =
            mock_endpoint(|line| if line.starts_with("HEAD /ref-images/ ") { 200 } else { 404 });
        let store = store(&endpoint);

        assert!(store.bucket_exists("ref-images").unwrap());
        assert!(!store.key_exists("ref-images", "abc-123").unwrap());
    }

    #[test]
    fn test_forbidden_key_check_escalates() {
        let (endpoint, _) =
            mock_endpoint(|line| if line.starts_with("HEAD /ref-images/ ") { 200 } else { 403 });
        let err = store(&endpoint).key_exists("ref-images", "abc-123").unwrap_err();
        assert!(err.to_string().contains("403"), "{}", err);
    }
}
