// src/repository/client.rs

//! HTTP client for the Nuxeo REST API
//!
//! Wraps a blocking reqwest client with basic auth. Requests are not retried
//! here: a failed fetch escalates to the caller of the pipeline run.

use crate::error::{Error, Result};
use reqwest::blocking::{Client, RequestBuilder};
use serde::Deserialize;
use std::fs::{self, File};
use std::io;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use super::{DocumentMetadata, SourceAsset, SourceRepository};

/// Ask Nuxeo to include every schema in document responses
const PROPERTIES_HEADER: &str = "X-NXDocumentProperties";

/// One page of `@children`
#[derive(Debug, Deserialize)]
struct ChildrenPage {
    #[serde(default)]
    entries: Vec<ChildEntry>,
    #[serde(rename = "isNextPageAvailable", default)]
    is_next_page_available: bool,
}

#[derive(Debug, Deserialize)]
struct ChildEntry {
    path: String,
}

/// Nuxeo REST client
pub struct NuxeoClient {
    client: Client,
    api: Url,
    user: Option<String>,
    password: Option<String>,
    page_size: u32,
}

impl NuxeoClient {
    /// Create a new client for the REST API rooted at `api`
    pub fn new(
        api: &str,
        user: Option<String>,
        password: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let api = Url::parse(api)
            .map_err(|e| Error::ConfigError(format!("Invalid Nuxeo API URL '{}': {}", api, e)))?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::InitError(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api,
            user,
            password,
            page_size: 100,
        })
    }

    /// Set the page size used when listing children
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// `{api}/path/<segments>`, each segment percent-encoded
    pub fn document_url(&self, path: &str) -> Result<Url> {
        let mut url = self.api.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| Error::ConfigError(format!("Nuxeo API URL cannot be a base: {}", self.api)))?;
            segments.pop_if_empty().push("path");
            segments.extend(path.split('/').filter(|s| !s.is_empty()));
        }
        Ok(url)
    }

    /// Download URL for a document's main blob
    ///
    /// `{scheme}://{host}/Nuxeo/nxbigfile/default/{uid}/file:content/{filename}`
    pub fn download_url(&self, uid: &str, filename: &str) -> Result<Url> {
        let mut url = self.api.clone();
        url.set_query(None);
        url.set_fragment(None);
        url.set_path("/");
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| Error::ConfigError(format!("Nuxeo API URL cannot be a base: {}", self.api)))?;
            segments
                .clear()
                .extend(["Nuxeo", "nxbigfile", "default", uid, "file:content", filename]);
        }
        Ok(url)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.user {
            Some(user) => request.basic_auth(user, self.password.as_deref()),
            None => request,
        }
    }

    fn get_json<T: for<'de> Deserialize<'de>>(&self, url: Url) -> Result<T> {
        debug!("GET {}", url);
        let response = self
            .authorized(self.client.get(url.clone()))
            .header(PROPERTIES_HEADER, "*")
            .send()
            .map_err(|e| Error::RepositoryError(format!("Failed to fetch {}: {}", url, e)))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::NotFoundError(format!("No document at {}", url)));
        }
        if !response.status().is_success() {
            return Err(Error::RepositoryError(format!(
                "HTTP {} from {}",
                response.status(),
                url
            )));
        }

        response
            .json()
            .map_err(|e| Error::ParseError(format!("Failed to parse response from {}: {}", url, e)))
    }
}

impl SourceRepository for NuxeoClient {
    fn get_metadata(&self, path: &str) -> Result<DocumentMetadata> {
        let url = self.document_url(path)?;
        let metadata: DocumentMetadata = self.get_json(url)?;
        if metadata.uid.is_empty() {
            return Err(Error::RepositoryError(format!(
                "Document at {} has no uid",
                path
            )));
        }
        Ok(metadata)
    }

    fn download(&self, asset: &SourceAsset, dest_path: &Path) -> Result<u64> {
        let url = self.download_url(&asset.id, &asset.filename)?;
        info!("Downloading {} to {}", url, dest_path.display());

        if let Some(parent) = dest_path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                Error::IoError(format!("Failed to create directory {}: {e}", parent.display()))
            })?;
        }

        let mut response = self
            .authorized(self.client.get(url.clone()))
            .send()
            .map_err(|e| Error::DownloadError(format!("Failed to fetch {}: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(Error::DownloadError(format!(
                "HTTP {} from {}",
                response.status(),
                url
            )));
        }

        // Write to temporary file first
        let temp_path = dest_path.with_extension("part");
        let mut file = File::create(&temp_path).map_err(|e| {
            Error::IoError(format!("Failed to create file {}: {e}", temp_path.display()))
        })?;

        let downloaded = io::copy(&mut response, &mut file).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            Error::DownloadError(format!("Failed to write downloaded data from {}: {e}", url))
        })?;

        // Atomic rename from temp to final destination
        fs::rename(&temp_path, dest_path).map_err(|e| {
            Error::IoError(format!(
                "Failed to move {} to {}: {e}",
                temp_path.display(),
                dest_path.display()
            ))
        })?;

        info!("Downloaded {} bytes to {}", downloaded, dest_path.display());
        Ok(downloaded)
    }

    fn children(&self, path: &str) -> Result<Vec<String>> {
        let mut children = Vec::new();
        let mut page_index = 0u32;

        loop {
            let mut url = self.document_url(path)?;
            url.path_segments_mut()
                .map_err(|_| Error::ConfigError(format!("Nuxeo API URL cannot be a base: {}", self.api)))?
                .push("@children");
            url.query_pairs_mut()
                .append_pair("currentPageIndex", &page_index.to_string())
                .append_pair("pageSize", &self.page_size.to_string());

            let page: ChildrenPage = self.get_json(url)?;
            children.extend(page.entries.into_iter().map(|entry| entry.path));

            if !page.is_next_page_available {
                break;
            }
            page_index += 1;
        }

        debug!("Found {} children under {}", children.len(), path);
        Ok(children)
    }
}
