// src/report.rs

//! Per-object outcome reports and run summaries
//!
//! A report only carries the checks its run actually reached. A missing
//! check means "not reached", never "failed", and the summary counts follow
//! that rule.

use crate::archive::ArchiveDecision;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

/// One gate's result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Check {
    pub pass: bool,
    pub msg: String,
}

impl Check {
    pub fn new(pass: bool, msg: impl Into<String>) -> Self {
        Self {
            pass,
            msg: msg.into(),
        }
    }
}

/// Named checks in the order the pipeline reaches them
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checks {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_image: Option<Check>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_file: Option<Check>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precheck: Option<Check>,
    /// `pass` is true when the destination key already exists
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub already_archived: Option<Check>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub converted: Option<Check>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stashed: Option<Check>,
}

/// Where a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TerminalState {
    RejectedNotImage,
    RejectedUnconvertible,
    SkippedAlreadyArchived,
    FailedConversion,
    Archived,
}

impl TerminalState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RejectedNotImage => "rejected-not-image",
            Self::RejectedUnconvertible => "rejected-unconvertible",
            Self::SkippedAlreadyArchived => "skipped-already-archived",
            Self::FailedConversion => "failed-conversion",
            Self::Archived => "archived",
        }
    }
}

impl fmt::Display for TerminalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Everything one pipeline run found out about one object
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeReport {
    pub path: String,
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub checks: Checks,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub converted: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stashed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3_location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<ArchiveDecision>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<TerminalState>,
    /// Set by the batch driver when the run escalated instead of returning
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OutcomeReport {
    pub fn new(path: &str, uid: &str) -> Self {
        Self {
            path: path.to_string(),
            uid: uid.to_string(),
            ..Default::default()
        }
    }

    /// Entry for a run that returned an error
    pub fn errored(path: &str, message: impl Into<String>) -> Self {
        Self {
            path: path.to_string(),
            error: Some(message.into()),
            ..Default::default()
        }
    }

    /// Close a run that stopped before converting anything
    pub(crate) fn reject(&mut self, state: TerminalState) {
        self.converted = Some(false);
        self.stashed = Some(false);
        self.outcome = Some(state);
    }
}

/// Counts over a set of reports
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub processed: usize,
    pub not_image: usize,
    pub not_convertible: usize,
    pub converted: usize,
    pub stashed: usize,
    pub already_archived: usize,
    pub conversion_failed: usize,
    pub errors: usize,
}

impl RunSummary {
    /// Fold reports into counts; absent checks are not counted either way
    pub fn from_reports<'a, I>(reports: I) -> Self
    where
        I: IntoIterator<Item = &'a OutcomeReport>,
    {
        let failed = |check: &Option<Check>| check.as_ref().is_some_and(|c| !c.pass);

        let mut summary = Self::default();
        for report in reports {
            summary.processed += 1;
            if failed(&report.checks.is_image) {
                summary.not_image += 1;
            }
            if failed(&report.checks.precheck) {
                summary.not_convertible += 1;
            }
            if report.converted == Some(true) {
                summary.converted += 1;
            }
            if report.stashed == Some(true) {
                summary.stashed += 1;
            }
            match report.outcome {
                Some(TerminalState::SkippedAlreadyArchived) => summary.already_archived += 1,
                Some(TerminalState::FailedConversion) => summary.conversion_failed += 1,
                _ => {}
            }
            if report.error.is_some() {
                summary.errors += 1;
            }
        }
        summary
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "processed:\t{}", self.processed)?;
        writeln!(f, "not image:\t{}", self.not_image)?;
        writeln!(f, "not convertible:\t{}", self.not_convertible)?;
        writeln!(f, "converted:\t{}", self.converted)?;
        writeln!(f, "stashed:\t{}", self.stashed)?;
        writeln!(f, "already archived:\t{}", self.already_archived)?;
        writeln!(f, "conversion failed:\t{}", self.conversion_failed)?;
        write!(f, "errors:\t{}", self.errors)
    }
}

/// Collects reports from a batch, keyed by document id
#[derive(Debug, Default)]
pub struct ReportAggregator {
    reports: BTreeMap<String, OutcomeReport>,
}

impl ReportAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap reports read back from a file
    pub fn from_reports(reports: BTreeMap<String, OutcomeReport>) -> Self {
        Self { reports }
    }

    /// Add a finished run's report under its uid
    pub fn record(&mut self, report: OutcomeReport) {
        let key = if report.uid.is_empty() {
            report.path.clone()
        } else {
            report.uid.clone()
        };
        self.reports.insert(key, report);
    }

    /// Add an entry for a run that escalated; keyed by path since the uid
    /// may never have been resolved
    pub fn record_error(&mut self, path: &str, message: impl Into<String>) {
        self.reports
            .insert(path.to_string(), OutcomeReport::errored(path, message));
    }

    pub fn reports(&self) -> &BTreeMap<String, OutcomeReport> {
        &self.reports
    }

    pub fn len(&self) -> usize {
        self.reports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary::from_reports(self.reports.values())
    }

    /// Write all reports as pretty JSON with sorted keys
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                Error::IoError(format!("Failed to create directory {}: {e}", parent.display()))
            })?;
        }
        // serde_json::Value maps are ordered, which sorts every level
        let value = serde_json::to_value(&self.reports)?;
        let json = serde_json::to_string_pretty(&value)?;
        fs::write(path, json)
            .map_err(|e| Error::IoError(format!("Failed to write {}: {e}", path.display())))
    }

    /// Read a report file written by [`ReportAggregator::write`]
    pub fn read(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| Error::IoError(format!("Failed to read {}: {e}", path.display())))?;
        let reports = serde_json::from_str(&content).map_err(|e| {
            Error::ParseError(format!("Invalid report file {}: {e}", path.display()))
        })?;
        Ok(Self::from_reports(reports))
    }
}
