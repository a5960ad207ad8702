// src/config.rs
//! Configuration file parsing
//!
//! Supports TOML configuration files with the following sections:
//! - [nuxeo] - Repository API endpoint, credentials, picture document types
//! - [s3] - Destination bucket and region
//! - [tools] - Conversion executable locations and color normalizer
//! - [conversion] - Worker pool, scratch, report and log directories
//! - [recipes] - Extra or replacement mimetype recipes
//!
//! Tool locations can also be set through `PATH_<TOOL>` environment
//! variables, which take precedence over the file.

use crate::classifier::{FormatClassifier, NormalizationRecipe};
use crate::tools::{ColorNormalizer, ToolInvoker, ToolPaths};
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// TOML configuration file structure
#[derive(Debug, Default, Deserialize)]
pub struct RefstashConfig {
    /// Document repository settings
    #[serde(default)]
    pub nuxeo: NuxeoSection,

    /// Object store settings
    #[serde(default)]
    pub s3: S3Section,

    /// Conversion tool settings
    #[serde(default)]
    pub tools: ToolsSection,

    /// Batch run settings
    #[serde(default)]
    pub conversion: ConversionSection,

    /// Mimetype -> stage names
    #[serde(default)]
    pub recipes: BTreeMap<String, Vec<String>>,
}

/// Nuxeo REST API configuration
#[derive(Debug, Deserialize)]
pub struct NuxeoSection {
    /// REST API base URL
    #[serde(default = "default_api")]
    pub api: String,

    #[serde(default)]
    pub user: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Document types treated as images
    #[serde(default = "default_picture_types")]
    pub picture_types: Vec<String>,

    /// HTTP timeout (e.g., "5m", "30s")
    #[serde(default = "default_http_timeout")]
    pub timeout: String,

    /// Page size when listing children
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl Default for NuxeoSection {
    fn default() -> Self {
        Self {
            api: default_api(),
            user: None,
            password: None,
            picture_types: default_picture_types(),
            timeout: default_http_timeout(),
            page_size: default_page_size(),
        }
    }
}

fn default_api() -> String {
    "http://localhost:8080/nuxeo/site/api/v1".to_string()
}

fn default_picture_types() -> Vec<String> {
    vec!["SampleCustomPicture".to_string()]
}

fn default_http_timeout() -> String {
    "5m".to_string()
}

fn default_page_size() -> u32 {
    100
}

/// S3 configuration
#[derive(Debug, Deserialize)]
pub struct S3Section {
    /// Destination bucket, optionally with a key prefix ("bucket/prefix")
    #[serde(default = "default_bucket")]
    pub bucket: String,

    #[serde(default = "default_region")]
    pub region: String,

    /// Custom endpoint for S3-compatible stores
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Use path-style bucket addressing
    #[serde(default)]
    pub path_style: bool,
}

impl Default for S3Section {
    fn default() -> Self {
        Self {
            bucket: default_bucket(),
            region: default_region(),
            endpoint: None,
            path_style: false,
        }
    }
}

fn default_bucket() -> String {
    "ucldc-nuxeo-ref-images".to_string()
}

fn default_region() -> String {
    "us-west-2".to_string()
}

/// Conversion tool configuration
#[derive(Debug, Deserialize)]
pub struct ToolsSection {
    #[serde(default = "default_tiffcp")]
    pub tiffcp: PathBuf,

    #[serde(default = "default_kdu_expand")]
    pub kdu_expand: PathBuf,

    #[serde(default = "default_kdu_compress")]
    pub kdu_compress: PathBuf,

    #[serde(default = "default_magick_convert")]
    pub magick_convert: PathBuf,

    #[serde(default = "default_tiff2rgba")]
    pub tiff2rgba: PathBuf,

    #[serde(default = "default_tifficc")]
    pub tifficc: PathBuf,

    /// "tiff2rgba" or "tifficc"
    #[serde(default = "default_color_normalizer")]
    pub color_normalizer: String,

    /// Kill a tool after this long (e.g., "2h"); unset waits forever
    #[serde(default)]
    pub timeout: Option<String>,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tiffcp: default_tiffcp(),
            kdu_expand: default_kdu_expand(),
            kdu_compress: default_kdu_compress(),
            magick_convert: default_magick_convert(),
            tiff2rgba: default_tiff2rgba(),
            tifficc: default_tifficc(),
            color_normalizer: default_color_normalizer(),
            timeout: None,
        }
    }
}

fn default_tiffcp() -> PathBuf {
    ToolPaths::default().tiffcp
}

fn default_kdu_expand() -> PathBuf {
    ToolPaths::default().kdu_expand
}

fn default_kdu_compress() -> PathBuf {
    ToolPaths::default().kdu_compress
}

fn default_magick_convert() -> PathBuf {
    ToolPaths::default().magick_convert
}

fn default_tiff2rgba() -> PathBuf {
    ToolPaths::default().tiff2rgba
}

fn default_tifficc() -> PathBuf {
    ToolPaths::default().tifficc
}

fn default_color_normalizer() -> String {
    ColorNormalizer::default().as_str().to_string()
}

/// Batch run configuration
#[derive(Debug, Deserialize)]
pub struct ConversionSection {
    /// Concurrent pipeline runs in a batch
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Parent directory for per-run scratch directories (system temp if unset)
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,

    #[serde(default = "default_report_dir")]
    pub report_dir: PathBuf,

    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

impl Default for ConversionSection {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            scratch_dir: None,
            report_dir: default_report_dir(),
            log_dir: default_log_dir(),
        }
    }
}

fn default_workers() -> usize {
    4
}

fn default_report_dir() -> PathBuf {
    PathBuf::from("reports")
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

impl RefstashConfig {
    /// Default config file location (~/.config/refstash/config.toml)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("refstash").join("config.toml"))
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: RefstashConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Load from an explicit path, or the default path if it exists, or defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::load(&path)?,
                _ => Self::default(),
            },
        };
        config.apply_env(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply `PATH_<TOOL>` and `NUXEO_PASSWORD` overrides
    pub fn apply_env<F: Fn(&str) -> Option<String>>(&mut self, lookup: F) {
        let tools = &mut self.tools;
        let slots: [(&str, &mut PathBuf); 6] = [
            ("PATH_TIFFCP", &mut tools.tiffcp),
            ("PATH_KDU_EXPAND", &mut tools.kdu_expand),
            ("PATH_KDU_COMPRESS", &mut tools.kdu_compress),
            ("PATH_MAGICK_CONVERT", &mut tools.magick_convert),
            ("PATH_TIFF2RGBA", &mut tools.tiff2rgba),
            ("PATH_TIFFICC", &mut tools.tifficc),
        ];
        for (var, slot) in slots {
            if let Some(value) = lookup(var).filter(|v| !v.is_empty()) {
                *slot = PathBuf::from(value);
            }
        }
        if let Some(password) = lookup("NUXEO_PASSWORD").filter(|v| !v.is_empty()) {
            self.nuxeo.password = Some(password);
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.nuxeo.api.trim().is_empty() {
            bail!("nuxeo.api must not be empty");
        }
        url::Url::parse(&self.nuxeo.api)
            .with_context(|| format!("Invalid nuxeo.api URL: {}", self.nuxeo.api))?;
        if self.nuxeo.picture_types.is_empty() {
            bail!("nuxeo.picture_types must list at least one document type");
        }
        if self.nuxeo.page_size == 0 {
            bail!("nuxeo.page_size must be greater than 0");
        }
        parse_duration(&self.nuxeo.timeout)?;

        if self.s3.bucket.trim_matches('/').is_empty() {
            bail!("s3.bucket must not be empty");
        }

        if ColorNormalizer::parse(&self.tools.color_normalizer).is_none() {
            bail!(
                "tools.color_normalizer must be 'tiff2rgba' or 'tifficc', got '{}'",
                self.tools.color_normalizer
            );
        }
        if let Some(timeout) = &self.tools.timeout {
            parse_duration(timeout)?;
        }

        if self.conversion.workers == 0 {
            bail!("conversion.workers must be greater than 0");
        }

        self.classifier()?;
        Ok(())
    }

    /// HTTP timeout for repository requests
    pub fn http_timeout(&self) -> Result<Duration> {
        parse_duration(&self.nuxeo.timeout)
    }

    /// Tool locations
    pub fn tool_paths(&self) -> ToolPaths {
        ToolPaths {
            tiffcp: self.tools.tiffcp.clone(),
            kdu_expand: self.tools.kdu_expand.clone(),
            kdu_compress: self.tools.kdu_compress.clone(),
            magick_convert: self.tools.magick_convert.clone(),
            tiff2rgba: self.tools.tiff2rgba.clone(),
            tifficc: self.tools.tifficc.clone(),
        }
    }

    /// Build the tool invoker described by the [tools] section
    pub fn tool_invoker(&self) -> Result<ToolInvoker> {
        let color = ColorNormalizer::parse(&self.tools.color_normalizer).with_context(|| {
            format!("Unknown color normalizer: {}", self.tools.color_normalizer)
        })?;
        let timeout = self.tools.timeout.as_deref().map(parse_duration).transpose()?;
        Ok(ToolInvoker::new(self.tool_paths(), color).with_timeout(timeout))
    }

    /// Build the classifier with [recipes] registered
    pub fn classifier(&self) -> Result<FormatClassifier> {
        let mut classifier = FormatClassifier::new();
        for (mimetype, stages) in &self.recipes {
            let recipe = NormalizationRecipe::parse(stages)
                .with_context(|| format!("Invalid recipe for {}", mimetype))?;
            classifier = classifier
                .with_recipe(mimetype, recipe)
                .with_context(|| format!("Invalid recipe for {}", mimetype))?;
        }
        Ok(classifier)
    }
}

/// Parse `"<n>s"`, `"<n>m"`, `"<n>h"` or bare seconds
///
/// Used for the HTTP timeout and the per-tool timeout, neither of which
/// needs anything coarser than hours.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    let (digits, unit_secs) = match s.char_indices().last() {
        Some((i, 's')) => (&s[..i], 1),
        Some((i, 'm')) => (&s[..i], 60),
        Some((i, 'h')) => (&s[..i], 3600),
        _ => (s, 1),
    };
    let count: u64 = digits
        .trim()
        .parse()
        .with_context(|| format!("Invalid duration '{}': expected e.g. 30s, 5m or 2h", s))?;
    Ok(Duration::from_secs(count * unit_secs))
}
