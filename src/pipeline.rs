// src/pipeline.rs

//! Conversion and archival of one repository object
//!
//! A run walks a fixed sequence of gates:
//!
//! 1. resolve the document (escalates on failure)
//! 2. is it a picture document type?
//! 3. does it have a file?
//! 4. can its mimetype be converted?
//! 5. is it already in the destination store?
//! 6. download the original (escalates on failure)
//! 7. run the normalization recipe
//! 8. upload the artifact
//!
//! A failed gate ends the run with a report that omits every later check.
//! The run's scratch directory is removed on every exit path.

use crate::archive::{ArchiveDecision, ArchiveIndex, DestinationKey};
use crate::classifier::{
    canonical_extension, FormatClassifier, NormalizationRecipe, RejectReason, Stage,
};
use crate::error::{Error, Result};
use crate::report::{Check, OutcomeReport, TerminalState};
use crate::repository::{SourceAsset, SourceRepository};
use crate::tools::{StageOutcome, ToolInvoker};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// Per-run settings
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Bucket name, optionally with a key prefix
    pub bucket: String,
    /// Overwrite an existing destination object
    pub replace: bool,
    /// Parent for scratch directories (system temp dir if `None`)
    pub scratch_dir: Option<PathBuf>,
    /// Repository document types that hold images
    pub picture_types: Vec<String>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            bucket: "ucldc-nuxeo-ref-images".to_string(),
            replace: false,
            scratch_dir: None,
            picture_types: vec!["SampleCustomPicture".to_string()],
        }
    }
}

/// Temporary files for one run, all under one exclusively owned directory
///
/// Layout:
/// ```text
/// refstash-XXXXXX/
///   source/<stem>.<canonical extension>
///   01-decompress-tiff.tif
///   02-color-normalize.tif
///   <stem>.jp2
/// ```
pub struct WorkingSet {
    dir: TempDir,
    source: PathBuf,
    artifact: PathBuf,
}

impl WorkingSet {
    /// Create a fresh scratch directory for a source file called `filename`
    ///
    /// When `mimetype` has a canonical extension the source copy is given
    /// it, whatever suffix the original name carried.
    pub fn create(parent: Option<&Path>, filename: &str, mimetype: Option<&str>) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("refstash-");
        let dir = match parent {
            Some(parent) => {
                fs::create_dir_all(parent).map_err(|e| {
                    Error::IoError(format!(
                        "Failed to create scratch parent {}: {e}",
                        parent.display()
                    ))
                })?;
                builder.tempdir_in(parent)
            }
            None => builder.tempdir(),
        }
        .map_err(|e| Error::IoError(format!("Failed to create scratch directory: {e}")))?;

        let name = sanitize_filename(filename);
        let stem = Path::new(&name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "source".to_string());

        let source_dir = dir.path().join("source");
        fs::create_dir(&source_dir).map_err(|e| {
            Error::IoError(format!("Failed to create {}: {e}", source_dir.display()))
        })?;

        let source = match mimetype.and_then(canonical_extension) {
            Some(ext) => source_dir.join(format!("{}.{}", stem, ext)),
            None => source_dir.join(&name),
        };
        let artifact = dir.path().join(format!("{}.jp2", stem));
        debug!("Scratch directory {}", dir.path().display());

        Ok(Self {
            dir,
            source,
            artifact,
        })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Where the downloaded original goes
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Where the final JPEG 2000 goes
    pub fn artifact(&self) -> &Path {
        &self.artifact
    }

    /// Remove the scratch directory and everything in it
    pub fn cleanup(self) -> std::io::Result<()> {
        self.dir.close()
    }
}

/// Keep only a usable final path component
pub(crate) fn sanitize_filename(filename: &str) -> String {
    let name = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim()
        .trim_start_matches('.');
    if name.is_empty() {
        "source".to_string()
    } else {
        name.to_string()
    }
}

/// Run `recipe` from `source` to `artifact`, threading intermediates
/// through `scratch`
///
/// Stops at the first failing stage and returns that stage's outcome. On
/// success the message collects every stage's message, so a compress
/// fallback stays visible.
pub fn normalize(
    tools: &ToolInvoker,
    recipe: &NormalizationRecipe,
    source: &Path,
    artifact: &Path,
    scratch: &Path,
) -> StageOutcome {
    let mut input = source.to_path_buf();
    let mut messages = Vec::with_capacity(recipe.len());

    for (index, stage) in recipe.stages().iter().enumerate() {
        let output = match stage {
            Stage::Compress => artifact.to_path_buf(),
            _ => scratch.join(format!("{:02}-{}.tif", index + 1, stage)),
        };
        info!("Stage {} ({}): {}", index + 1, stage.step(), stage);

        let outcome = tools.run(*stage, &input, &output);
        if !outcome.success {
            return outcome;
        }
        if !output.exists() {
            return StageOutcome {
                success: false,
                message: format!(
                    "{} reported success but did not write {}",
                    stage,
                    output.display()
                ),
            };
        }
        messages.push(outcome.message);
        input = output;
    }

    StageOutcome {
        success: true,
        message: messages.join("\n"),
    }
}

/// Orchestrates one object from repository to object store
pub struct ConversionPipeline {
    repository: Arc<dyn SourceRepository>,
    archive: ArchiveIndex,
    classifier: FormatClassifier,
    tools: ToolInvoker,
    options: PipelineOptions,
}

impl ConversionPipeline {
    pub fn new(
        repository: Arc<dyn SourceRepository>,
        archive: ArchiveIndex,
        classifier: FormatClassifier,
        tools: ToolInvoker,
        options: PipelineOptions,
    ) -> Self {
        Self {
            repository,
            archive,
            classifier,
            tools,
            options,
        }
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub fn repository(&self) -> &Arc<dyn SourceRepository> {
        &self.repository
    }

    pub fn archive(&self) -> &ArchiveIndex {
        &self.archive
    }

    /// Process the object at `path`
    ///
    /// Rejections, skips and tool failures come back as `Ok` reports.
    /// Repository and store faults are returned as errors.
    pub fn run(&self, path: &str) -> Result<OutcomeReport> {
        let metadata = self.repository.get_metadata(path)?;
        let asset = SourceAsset::from_metadata(&metadata);
        info!("Processing {} ({})", path, asset.id);

        let working = WorkingSet::create(
            self.options.scratch_dir.as_deref(),
            &asset.filename,
            asset.mimetype.as_deref(),
        )?;
        let result = self.process(path, &asset, &working);

        let scratch = working.root().to_path_buf();
        if let Err(e) = working.cleanup() {
            warn!("Failed to remove scratch directory {}: {}", scratch.display(), e);
        }

        result
    }

    fn process(
        &self,
        path: &str,
        asset: &SourceAsset,
        working: &WorkingSet,
    ) -> Result<OutcomeReport> {
        let mut report = OutcomeReport::new(path, &asset.id);

        // Picture document?
        let is_image = self
            .options
            .picture_types
            .iter()
            .any(|t| t == &asset.doc_type);
        let msg = if is_image {
            format!("Document type '{}' is a picture type.", asset.doc_type)
        } else {
            format!(
                "Document type '{}' is not a picture type. Not converting.",
                asset.doc_type
            )
        };
        info!("{}", msg);
        report.checks.is_image = Some(Check::new(is_image, msg));
        if !is_image {
            report.reject(TerminalState::RejectedNotImage);
            return Ok(report);
        }

        // Has a file?
        if !asset.has_content {
            let msg = format!("No file content found for {}. Nothing to convert.", path);
            info!("{}", msg);
            report.checks.has_file = Some(Check::new(false, msg));
            report.reject(TerminalState::RejectedUnconvertible);
            return Ok(report);
        }
        report.checks.has_file = Some(Check::new(
            true,
            format!("File content found for {}.", path),
        ));

        // Convertible mimetype?
        let recipe = match self.classifier.classify(asset.mimetype.as_deref()) {
            Ok(classification) => {
                report.checks.precheck = Some(Check::new(true, classification.message));
                classification.recipe
            }
            Err(rejection) => {
                if rejection.reason == RejectReason::Unrecognized {
                    debug!("No recipe for {:?}", asset.mimetype);
                }
                report.checks.precheck = Some(Check::new(false, rejection.message));
                report.reject(TerminalState::RejectedUnconvertible);
                return Ok(report);
            }
        };

        // Already archived?
        let dest = DestinationKey::new(&self.options.bucket, &asset.id)?;
        let exists = self.archive.exists(&dest.bucket, &dest.key)?;
        let decision = ArchiveIndex::decide(exists, self.options.replace);
        report.s3_location = Some(dest.location.clone());
        let msg = match (exists, decision) {
            (false, _) => format!("{} does not exist yet.", dest),
            (true, ArchiveDecision::Replace) => format!("{} already exists; replacing it.", dest),
            (true, _) => format!("{} already exists; not converting.", dest),
        };
        info!("{}", msg);
        report.checks.already_archived = Some(Check::new(exists, msg));
        if decision == ArchiveDecision::Skip {
            report.outcome = Some(TerminalState::SkippedAlreadyArchived);
            return Ok(report);
        }

        // Fetch
        self.repository.download(asset, working.source())?;

        // Normalize
        info!("Converting {} with recipe {}", path, recipe);
        let outcome = normalize(
            &self.tools,
            &recipe,
            working.source(),
            working.artifact(),
            working.root(),
        );
        report.checks.converted = Some(Check::new(outcome.success, outcome.message));
        report.converted = Some(outcome.success);
        if !outcome.success {
            report.stashed = Some(false);
            report.outcome = Some(TerminalState::FailedConversion);
            return Ok(report);
        }

        // Archive
        self.archive.stash(working.artifact(), &dest, decision)?;
        report.checks.stashed = Some(Check::new(
            true,
            format!("{} {}", decision.action(), dest),
        ));
        report.stashed = Some(true);
        report.action = Some(decision);
        report.outcome = Some(TerminalState::Archived);
        Ok(report)
    }
}
