// SPDX-FileCopyrightText: 2025-2026 TII (SSRC) and the Ghaf contributors
// SPDX-License-Identifier: Apache-2.0

//! Aggregated scan results.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ScanError;

/// Outcome of scanning one file.
///
/// `passed` is `None` when the backend gave no boolean verdict (unrecognized
/// reply, timeout, exhausted retries). Such files are listed but not counted.
/// `file` is the path in lossy UTF-8 so every result set serializes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileOutcome {
    pub file: String,
    pub passed: Option<bool>,
}

impl FileOutcome {
    #[must_use]
    pub fn new(path: &Path, passed: Option<bool>) -> Self {
        Self {
            file: path.to_string_lossy().into_owned(),
            passed,
        }
    }
}

/// Cumulative counters, per-file outcomes and diagnostic lines.
///
/// Invariant: `passed + failed` equals the number of `files` entries whose
/// `passed` is set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanResultSet {
    pub passed: u64,
    pub failed: u64,
    pub files: Vec<FileOutcome>,
    pub logs: Vec<String>,
}

impl ScanResultSet {
    /// Append an outcome and bump the matching counter.
    pub fn record(&mut self, outcome: FileOutcome) {
        match outcome.passed {
            Some(true) => self.passed += 1,
            Some(false) => self.failed += 1,
            None => {}
        }
        self.files.push(outcome);
    }

    /// Files listed without a boolean verdict.
    #[must_use]
    pub fn unverified(&self) -> usize {
        self.files.iter().filter(|f| f.passed.is_none()).count()
    }
}

/// Diagnostic message: text lines are kept in the result set, structured
/// payloads are only echoed in verbose mode.
#[derive(Debug, Clone, PartialEq)]
pub enum LogPayload {
    Text(String),
    Structured(BTreeMap<String, serde_json::Value>),
}

impl From<String> for LogPayload {
    fn from(message: String) -> Self {
        Self::Text(message)
    }
}

impl From<&str> for LogPayload {
    fn from(message: &str) -> Self {
        Self::Text(message.to_string())
    }
}

/// Output form of [`ScanResultSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResultFormat {
    #[default]
    Structured,
    Json,
}

impl ResultFormat {
    /// Lenient lookup: anything other than `json` means structured.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        if name.eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Structured
        }
    }
}

impl std::fmt::Display for ResultFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Structured => write!(f, "structured"),
            Self::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for ResultFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "structured" => Ok(Self::Structured),
            "json" => Ok(Self::Json),
            _ => Err(format!("Invalid format: {s}. Use: structured, json")),
        }
    }
}

/// A result set snapshot in the requested format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanReport {
    Structured(ScanResultSet),
    Json(String),
}

impl ScanReport {
    pub fn render(results: &ScanResultSet, format: ResultFormat) -> Result<Self, ScanError> {
        Ok(match format {
            ResultFormat::Structured => Self::Structured(results.clone()),
            ResultFormat::Json => Self::Json(serde_json::to_string(results)?),
        })
    }
}
