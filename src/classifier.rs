// src/classifier.rs

//! Mimetype-to-recipe classification
//!
//! Maps the declared mimetype of a source asset to the ordered list of
//! conversion stages that turns it into a lossless JPEG 2000. Mimetypes in
//! the rejected set never produce a recipe, not even through an override.

use std::collections::HashMap;
use std::fmt;
use tracing::{info, warn};

use crate::error::{Error, Result};

/// Mimetypes we recognize and know how to convert, in table order
const TIFF_TYPES: &[&str] = &["image/tiff"];
const JP2_TYPES: &[&str] = &["image/jp2", "image/jpx", "image/jpm"];
const RASTER_TYPES: &[&str] = &["image/jpeg", "image/gif", "image/png"];
const COMPRESS_ONLY_TYPES: &[&str] = &[
    "image/bmp",
    "image/x-portable-pixmap",
    "image/x-portable-graymap",
    "image/x-portable-anymap",
];

/// Mimetypes we recognize but refuse to convert
const REJECTED_TYPES: &[&str] = &["application/pdf"];

/// File extension the conversion tools expect for a mimetype
///
/// Kakadu picks its reader from the input's suffix, so a source saved as
/// `scan` or `scan.pnm` must be renamed before it reaches kdu_compress.
pub fn canonical_extension(mimetype: &str) -> Option<&'static str> {
    let ext = match mimetype.trim().to_ascii_lowercase().as_str() {
        "image/tiff" => "tif",
        "image/jp2" => "jp2",
        "image/jpx" => "jpx",
        "image/jpm" => "jpm",
        "image/jpeg" => "jpg",
        "image/gif" => "gif",
        "image/png" => "png",
        "image/bmp" => "bmp",
        "image/x-portable-pixmap" => "ppm",
        "image/x-portable-graymap" => "pgm",
        "image/x-portable-anymap" => "pnm",
        _ => return None,
    };
    Some(ext)
}

/// A single external-tool step within a recipe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Write an uncompressed TIFF from a compressed TIFF (tiffcp)
    DecompressTiff,
    /// Expand a JPEG 2000 family file to TIFF (kdu_expand)
    DecompressJp2,
    /// Convert pixel data to the sRGB color space
    ColorNormalize,
    /// Rasterize palette or lossy formats to uncompressed TIFF (ImageMagick)
    Preconvert,
    /// Lossless JPEG 2000 encode (kdu_compress)
    Compress,
}

impl Stage {
    /// Get the string representation of the stage
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DecompressTiff => "decompress-tiff",
            Self::DecompressJp2 => "decompress-jp2",
            Self::ColorNormalize => "color-normalize",
            Self::Preconvert => "preconvert",
            Self::Compress => "compress",
        }
    }

    /// Parse a stage from a string
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "decompress-tiff" => Some(Self::DecompressTiff),
            "decompress-jp2" => Some(Self::DecompressJp2),
            "color-normalize" => Some(Self::ColorNormalize),
            "preconvert" => Some(Self::Preconvert),
            "compress" => Some(Self::Compress),
            _ => None,
        }
    }

    /// Broad step name used in reports ("decompress", "color-normalize", ...)
    pub fn step(&self) -> &'static str {
        match self {
            Self::DecompressTiff | Self::DecompressJp2 => "decompress",
            Self::ColorNormalize => "color-normalize",
            Self::Preconvert => "preconvert",
            Self::Compress => "compress",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered sequence of stages that normalizes one source file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizationRecipe {
    stages: Vec<Stage>,
}

impl NormalizationRecipe {
    /// Build a recipe, enforcing that it is non-empty and ends with `compress`
    pub fn new(stages: Vec<Stage>) -> Result<Self> {
        match stages.last() {
            Some(Stage::Compress) => Ok(Self { stages }),
            Some(last) => Err(Error::ConfigError(format!(
                "recipe must end with the compress stage, not '{}'",
                last
            ))),
            None => Err(Error::ConfigError("recipe has no stages".to_string())),
        }
    }

    /// Parse a recipe from stage names
    pub fn parse<S: AsRef<str>>(names: &[S]) -> Result<Self> {
        let stages = names
            .iter()
            .map(|name| {
                Stage::parse(name.as_ref()).ok_or_else(|| {
                    Error::ConfigError(format!("unknown stage '{}'", name.as_ref()))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(stages)
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

impl fmt::Display for NormalizationRecipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.stages.iter().map(Stage::as_str).collect();
        write!(f, "{}", names.join(" -> "))
    }
}

/// Why a mimetype did not get a recipe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Recognized, but explicitly not something we convert
    Rejected,
    /// Not in any table
    Unrecognized,
}

/// Classification failure, carrying the precheck message for the report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub reason: RejectReason,
    pub message: String,
}

/// Accepted classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub recipe: NormalizationRecipe,
    pub message: String,
}

/// Classifies declared mimetypes into normalization recipes
///
/// The built-in table covers TIFF, the JPEG 2000 family, common web raster
/// formats and formats kdu_compress reads directly. Extra mappings can be
/// registered per collection with [`FormatClassifier::with_recipe`].
#[derive(Debug, Clone, Default)]
pub struct FormatClassifier {
    overrides: HashMap<String, NormalizationRecipe>,
}

impl FormatClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace the recipe for a mimetype
    pub fn with_recipe(mut self, mimetype: &str, recipe: NormalizationRecipe) -> Result<Self> {
        let mimetype = mimetype.trim().to_ascii_lowercase();
        if REJECTED_TYPES.contains(&mimetype.as_str()) {
            return Err(Error::ConfigError(format!(
                "mime-type '{}' is rejected and cannot be given a recipe",
                mimetype
            )));
        }
        self.overrides.insert(mimetype, recipe);
        Ok(self)
    }

    /// Classify a declared mimetype
    ///
    /// Pure apart from logging.
    pub fn classify(&self, mimetype: Option<&str>) -> std::result::Result<Classification, Rejection> {
        let Some(raw) = mimetype else {
            let message =
                "No mime-type was declared. We don't know how to deal with this".to_string();
            warn!("{}", message);
            return Err(Rejection {
                reason: RejectReason::Unrecognized,
                message,
            });
        };
        let normalized = raw.trim().to_ascii_lowercase();

        if let Some(recipe) = self.recipe_for(&normalized) {
            let message = format!(
                "Mime-type '{}' was pre-checked and recognized as something we can try to convert.",
                raw
            );
            info!("{}", message);
            return Ok(Classification { recipe, message });
        }

        if REJECTED_TYPES.contains(&normalized.as_str()) {
            let message = format!(
                "Mime-type '{}' was pre-checked and recognized as something we don't want to convert.",
                raw
            );
            info!("{}", message);
            Err(Rejection {
                reason: RejectReason::Rejected,
                message,
            })
        } else {
            let message = format!(
                "Mime-type '{}' was unrecognized. We don't know how to deal with this",
                raw
            );
            warn!("{}", message);
            Err(Rejection {
                reason: RejectReason::Unrecognized,
                message,
            })
        }
    }

    /// Every mimetype that currently yields a recipe
    pub fn recognized(&self) -> Vec<String> {
        let mut all: Vec<String> = TIFF_TYPES
            .iter()
            .chain(JP2_TYPES)
            .chain(RASTER_TYPES)
            .chain(COMPRESS_ONLY_TYPES)
            .map(|s| s.to_string())
            .chain(self.overrides.keys().cloned())
            .collect();
        all.sort();
        all.dedup();
        all
    }

    fn recipe_for(&self, mimetype: &str) -> Option<NormalizationRecipe> {
        if REJECTED_TYPES.contains(&mimetype) {
            return None;
        }
        if let Some(recipe) = self.overrides.get(mimetype) {
            return Some(recipe.clone());
        }

        let stages = if TIFF_TYPES.contains(&mimetype) {
            vec![Stage::DecompressTiff, Stage::ColorNormalize, Stage::Compress]
        } else if JP2_TYPES.contains(&mimetype) {
            vec![Stage::DecompressJp2, Stage::ColorNormalize, Stage::Compress]
        } else if RASTER_TYPES.contains(&mimetype) {
            vec![Stage::Preconvert, Stage::ColorNormalize, Stage::Compress]
        } else if COMPRESS_ONLY_TYPES.contains(&mimetype) {
            vec![Stage::Compress]
        } else {
            return None;
        };

        Some(NormalizationRecipe { stages })
    }
}
