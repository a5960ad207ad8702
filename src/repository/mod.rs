// src/repository/mod.rs

//! Source document repository
//!
//! The pipeline only needs three things from the repository: a document's
//! metadata (which carries its unique id), the original file's bytes, and,
//! for batch runs, the children of a folder-like document. Those are the
//! [`SourceRepository`] trait; [`NuxeoClient`] implements it over the Nuxeo
//! REST API.

mod client;

pub use client::NuxeoClient;

use crate::error::{Error, Result};
use crate::pipeline::sanitize_filename;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Picture view tag holding the uploaded master
const ORIGINAL_VIEW_TAG: &str = "original";

/// Access to documents in the source repository
pub trait SourceRepository: Send + Sync {
    /// Resolve a document path to its unique identifier
    fn resolve(&self, path: &str) -> Result<String> {
        Ok(self.get_metadata(path)?.uid)
    }

    /// Fetch full document metadata
    fn get_metadata(&self, path: &str) -> Result<DocumentMetadata>;

    /// Download the asset's original file to `dest`, returning bytes written
    fn download(&self, asset: &SourceAsset, dest: &Path) -> Result<u64>;

    /// Paths of the direct children of a document
    fn children(&self, path: &str) -> Result<Vec<String>>;
}

/// Document as returned by the repository
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub uid: String,
    #[serde(default)]
    pub path: String,
    /// Document type, e.g. "SampleCustomPicture"
    #[serde(rename = "type", default)]
    pub doc_type: String,
    #[serde(default)]
    pub properties: DocumentProperties,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentProperties {
    #[serde(rename = "file:content", default)]
    pub file_content: Option<BlobInfo>,
    #[serde(rename = "picture:views", default)]
    pub picture_views: Option<Vec<PictureView>>,
}

/// Blob descriptor (`file:content` and picture view content)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlobInfo {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "mime-type", default)]
    pub mime_type: Option<String>,
    /// Nuxeo reports this as a string; numbers are accepted too
    #[serde(default)]
    pub length: Option<serde_json::Value>,
}

impl BlobInfo {
    /// Length in bytes, if reported and parseable
    pub fn length_bytes(&self) -> Option<u64> {
        match self.length.as_ref()? {
            serde_json::Value::Number(n) => n.as_u64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PictureView {
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub content: Option<BlobInfo>,
}

/// The facts about one document the pipeline acts on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceAsset {
    pub id: String,
    pub path: String,
    pub doc_type: String,
    /// Declared mimetype of the master file
    pub mimetype: Option<String>,
    pub has_content: bool,
    /// File name used when downloading
    pub filename: String,
}

impl SourceAsset {
    pub fn from_metadata(metadata: &DocumentMetadata) -> Self {
        let file_content = metadata.properties.file_content.as_ref();

        let original_view_type = metadata
            .properties
            .picture_views
            .iter()
            .flatten()
            .find(|view| view.tag.as_deref() == Some(ORIGINAL_VIEW_TAG))
            .and_then(|view| view.content.as_ref())
            .and_then(|content| content.mime_type.clone());
        let mimetype =
            original_view_type.or_else(|| file_content.and_then(|blob| blob.mime_type.clone()));

        let has_content = file_content
            .map(|blob| blob.length_bytes() != Some(0))
            .unwrap_or(false);

        let filename = file_content
            .and_then(|blob| blob.name.clone())
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| {
                metadata
                    .path
                    .rsplit('/')
                    .find(|segment| !segment.is_empty())
                    .unwrap_or("source")
                    .to_string()
            });

        Self {
            id: metadata.uid.clone(),
            path: metadata.path.clone(),
            doc_type: metadata.doc_type.clone(),
            mimetype,
            has_content,
            filename,
        }
    }
}

/// Download the master file of the document at `path` into `dir`
///
/// The file keeps the name the repository gives it. Returns the written
/// path.
pub fn download_original(
    repository: &dyn SourceRepository,
    path: &str,
    dir: &Path,
) -> Result<PathBuf> {
    let metadata = repository.get_metadata(path)?;
    let asset = SourceAsset::from_metadata(&metadata);
    if !asset.has_content {
        return Err(Error::NotFoundError(format!(
            "No file content for {} ({})",
            path, asset.id
        )));
    }

    fs::create_dir_all(dir)
        .map_err(|e| Error::IoError(format!("Failed to create {}: {e}", dir.display())))?;
    let dest = dir.join(sanitize_filename(&asset.filename));
    let bytes = repository.download(&asset, &dest)?;
    info!("Downloaded {} ({}, {} bytes) to {}", path, asset.id, bytes, dest.display());
    Ok(dest)
}
