// src/lib.rs

//! Refstash
//!
//! Fetches master images from a Nuxeo repository, normalizes them to
//! lossless JPEG 2000 with external tools (libtiff, Kakadu, ImageMagick,
//! Little CMS) and archives the result in S3 under the document's unique id.
//!
//! # Architecture
//!
//! - `classifier`: declared mimetype -> ordered conversion stages
//! - `tools`: one external executable per stage, failures as values
//! - `archive`: destination key existence and create/replace/skip
//! - `pipeline`: the per-object state machine and its scratch directory
//! - `report`: per-object outcome reports and batch summaries

pub mod archive;
pub mod classifier;
pub mod config;
mod error;
pub mod pipeline;
pub mod report;
pub mod repository;
pub mod sniff;
pub mod tools;

pub use archive::{ArchiveDecision, ArchiveIndex, BucketUsage, DestinationKey, ObjectStore, S3Store};
pub use classifier::{Classification, FormatClassifier, NormalizationRecipe, RejectReason, Rejection, Stage};
pub use config::RefstashConfig;
pub use error::{Error, Result};
pub use pipeline::{ConversionPipeline, PipelineOptions, WorkingSet};
pub use report::{Check, Checks, OutcomeReport, ReportAggregator, RunSummary, TerminalState};
pub use repository::{download_original, DocumentMetadata, NuxeoClient, SourceAsset, SourceRepository};
pub use tools::{ColorNormalizer, StageOutcome, ToolInvoker, ToolPaths};
