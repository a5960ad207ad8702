// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.
//!
//! In-memory stand-ins for the repository and object store, plus tiny shell
//! scripts standing in for the conversion executables.

#![allow(dead_code)]

use refstash::archive::{ArchiveIndex, BucketUsage, ObjectStore};
use refstash::classifier::FormatClassifier;
use refstash::pipeline::{ConversionPipeline, PipelineOptions};
use refstash::repository::{DocumentMetadata, SourceAsset, SourceRepository};
use refstash::tools::{ColorNormalizer, ToolInvoker, ToolPaths};
use refstash::{Error, Result};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const BUCKET: &str = "ucldc-nuxeo-ref-images";

/// Build repository metadata for a picture document
pub fn picture(uid: &str, path: &str, mimetype: &str) -> DocumentMetadata {
    let name = path.rsplit('/').next().unwrap();
    serde_json::from_value(serde_json::json!({
        "uid": uid,
        "path": path,
        "type": "SampleCustomPicture",
        "properties": {
            "file:content": {"name": name, "mime-type": mimetype, "length": "6"},
            "picture:views": [
                {"tag": "original", "content": {"mime-type": mimetype, "name": name}}
            ]
        }
    }))
    .unwrap()
}

/// A picture document whose file:content is empty
pub fn picture_without_file(uid: &str, path: &str) -> DocumentMetadata {
    serde_json::from_value(serde_json::json!({
        "uid": uid,
        "path": path,
        "type": "SampleCustomPicture",
        "properties": {"file:content": null, "picture:views": null}
    }))
    .unwrap()
}

/// A document of a non-picture type
pub fn organization(uid: &str, path: &str) -> DocumentMetadata {
    serde_json::from_value(serde_json::json!({
        "uid": uid,
        "path": path,
        "type": "Organization",
        "properties": {}
    }))
    .unwrap()
}

/// Repository backed by a map of path -> (metadata, file bytes)
#[derive(Default)]
pub struct FakeRepository {
    docs: HashMap<String, (DocumentMetadata, Vec<u8>)>,
    children: HashMap<String, Vec<String>>,
    failing_downloads: HashSet<String>,
    pub downloads: AtomicUsize,
}

impl FakeRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_doc(mut self, metadata: DocumentMetadata, content: &[u8]) -> Self {
        self.docs
            .insert(metadata.path.clone(), (metadata, content.to_vec()));
        self
    }

    pub fn with_children(mut self, parent: &str, children: &[&str]) -> Self {
        self.children.insert(
            parent.to_string(),
            children.iter().map(|c| c.to_string()).collect(),
        );
        self
    }

    /// Make downloads of the document with this uid fail
    pub fn with_failing_download(mut self, uid: &str) -> Self {
        self.failing_downloads.insert(uid.to_string());
        self
    }

    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }
}

impl SourceRepository for FakeRepository {
    fn get_metadata(&self, path: &str) -> Result<DocumentMetadata> {
        self.docs
            .get(path)
            .map(|(metadata, _)| metadata.clone())
            .ok_or_else(|| Error::NotFoundError(format!("No document at {}", path)))
    }

    fn download(&self, asset: &SourceAsset, dest: &Path) -> Result<u64> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        if self.failing_downloads.contains(&asset.id) {
            return Err(Error::DownloadError(format!("HTTP 503 for {}", asset.id)));
        }
        let (_, content) = self
            .docs
            .values()
            .find(|(metadata, _)| metadata.uid == asset.id)
            .ok_or_else(|| Error::NotFoundError(asset.id.clone()))?;
        fs::write(dest, content)?;
        Ok(content.len() as u64)
    }

    fn children(&self, path: &str) -> Result<Vec<String>> {
        Ok(self.children.get(path).cloned().unwrap_or_default())
    }
}

/// Object store held in memory, counting uploads
#[derive(Default)]
pub struct MemoryStore {
    buckets: HashSet<String>,
    objects: Mutex<HashMap<(String, String), (Vec<u8>, String)>>,
    pub puts: AtomicUsize,
}

impl MemoryStore {
    pub fn with_bucket(name: &str) -> Self {
        Self {
            buckets: HashSet::from([name.to_string()]),
            ..Default::default()
        }
    }

    /// Seed an object as if an earlier run had stored it
    pub fn preload(&self, bucket: &str, key: &str, data: &[u8]) {
        self.objects.lock().unwrap().insert(
            (bucket.to_string(), key.to_string()),
            (data.to_vec(), "image/jp2".to_string()),
        );
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<(Vec<u8>, String)> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}

impl ObjectStore for MemoryStore {
    fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        Ok(self.buckets.contains(bucket))
    }

    fn key_exists(&self, bucket: &str, key: &str) -> Result<bool> {
        Ok(self.object(bucket, key).is_some())
    }

    fn put_object(&self, bucket: &str, key: &str, data: &[u8], content_type: &str) -> Result<()> {
        if !self.buckets.contains(bucket) {
            return Err(Error::StoreError(format!("NoSuchBucket: {}", bucket)));
        }
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.objects.lock().unwrap().insert(
            (bucket.to_string(), key.to_string()),
            (data.to_vec(), content_type.to_string()),
        );
        Ok(())
    }

    fn usage(&self, bucket: &str, prefix: &str) -> Result<BucketUsage> {
        let objects = self.objects.lock().unwrap();
        let mut usage = BucketUsage::default();
        for ((b, k), (data, _)) in objects.iter() {
            if b == bucket && k.starts_with(prefix) {
                usage.objects += 1;
                usage.bytes += data.len() as u64;
            }
        }
        Ok(usage)
    }
}

/// Write an executable /bin/sh script
pub fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Copies the second-to-last argument to the last one
const COPY: &str = r#"for last; do :; done
prev=""
for a in "$@"; do [ "$a" = "$last" ] || prev="$a"; done
cp "$prev" "$last""#;

/// kdu_compress stand-in: writes a JP2 signature box and ftyp header, then
/// the input bytes. With `reject_srgb` it fails whenever `-jp2_space` is
/// passed.
pub fn kdu_compress_body(reject_srgb: bool) -> String {
    let mut body = String::new();
    if reject_srgb {
        body.push_str(
            "for a in \"$@\"; do if [ \"$a\" = \"-jp2_space\" ]; then echo 'Kakadu Error: colour space' >&2; exit 1; fi; done\n",
        );
    }
    body.push_str(
        r#"while [ $# -gt 0 ]; do
case "$1" in -i) shift; in="$1";; -o) shift; out="$1";; esac
shift
done
printf '\000\000\000\014jP  \015\012\207\012\000\000\000\024ftypjp2 ' > "$out"
cat "$in" >> "$out""#,
    );
    body
}

/// Tool paths whose every tool succeeds
pub fn fake_tool_paths(dir: &Path) -> ToolPaths {
    ToolPaths {
        tiffcp: script(dir, "tiffcp", COPY),
        kdu_expand: script(
            dir,
            "kdu_expand",
            r#"while [ $# -gt 0 ]; do
case "$1" in -i) shift; in="$1";; -o) shift; out="$1";; esac
shift
done
cp "$in" "$out""#,
        ),
        kdu_compress: script(dir, "kdu_compress", &kdu_compress_body(false)),
        magick_convert: script(dir, "convert", COPY),
        tiff2rgba: script(dir, "tiff2rgba", COPY),
        tifficc: script(dir, "tifficc", COPY),
    }
}

pub fn fake_tools(dir: &Path) -> ToolInvoker {
    ToolInvoker::new(fake_tool_paths(dir), ColorNormalizer::Tiff2Rgba)
}

/// Scratch space for one test: tool scripts plus a scratch parent
pub struct TestEnv {
    pub dir: tempfile::TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("bin")).unwrap();
        fs::create_dir(dir.path().join("scratch")).unwrap();
        Self { dir }
    }

    pub fn bin(&self) -> PathBuf {
        self.dir.path().join("bin")
    }

    pub fn scratch(&self) -> PathBuf {
        self.dir.path().join("scratch")
    }

    /// Entries left in the scratch parent
    pub fn scratch_entries(&self) -> usize {
        fs::read_dir(self.scratch()).unwrap().count()
    }

    pub fn options(&self, replace: bool) -> PipelineOptions {
        PipelineOptions {
            bucket: BUCKET.to_string(),
            replace,
            scratch_dir: Some(self.scratch()),
            ..PipelineOptions::default()
        }
    }

    pub fn pipeline(
        &self,
        repository: Arc<FakeRepository>,
        store: Arc<MemoryStore>,
        tools: ToolInvoker,
        replace: bool,
    ) -> ConversionPipeline {
        ConversionPipeline::new(
            repository,
            ArchiveIndex::new(store),
            FormatClassifier::new(),
            tools,
            self.options(replace),
        )
    }
}
