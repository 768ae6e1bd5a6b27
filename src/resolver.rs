// SPDX-FileCopyrightText: 2025-2026 TII (SSRC) and the Ghaf contributors
// SPDX-License-Identifier: Apache-2.0

//! Expansion of scan targets into concrete files.
//!
//! A target is one of:
//! - a glob pattern (contains `*`), matched against the filesystem
//! - a directory, whose immediate children are taken (no recursion)
//! - a plain file path
//!
//! Directories are never scanned themselves. Every resolved path is
//! canonical, so it can be used as a stable identifier.

use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use glob::MatchOptions;
use log::debug;
use thiserror::Error;

use crate::error::ScanError;

/// Marker that turns a target into a glob pattern.
pub const WILDCARD: char = '*';

/// Resolution failure for a single target.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("{0} does not exist.")]
    Missing(String),

    #[error("invalid pattern {pattern}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One caller-supplied target: file, directory or glob pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanTarget(String);

impl ScanTarget {
    /// Accept any non-empty string without interior NUL bytes.
    /// Existence is only checked at resolution time.
    pub fn new(target: impl Into<String>) -> Result<Self, ScanError> {
        let target = target.into();
        if target.is_empty() {
            return Err(ScanError::Input("Scan target must not be empty".to_string()));
        }
        if target.contains('\0') {
            return Err(ScanError::Input(format!(
                "Scan target contains a NUL byte: {}",
                target.escape_debug()
            )));
        }
        Ok(Self(target))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_glob(&self) -> bool {
        self.0.contains(WILDCARD)
    }
}

impl fmt::Display for ScanTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Absolute path of an existing non-directory file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResolvedFile(PathBuf);

impl ResolvedFile {
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.0
    }

    /// Canonicalize `path` and keep it only if it is not a directory.
    fn from_candidate(path: &Path) -> Option<Self> {
        match path.canonicalize() {
            Ok(abs) if abs.is_dir() => {
                debug!("Skipping directory: {}", abs.display());
                None
            }
            Ok(abs) => Some(Self(abs)),
            Err(e) => {
                debug!("Skipping {}: {e}", path.display());
                None
            }
        }
    }
}

impl fmt::Display for ResolvedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.display().fmt(f)
    }
}

/// Resolve one target into zero or more files.
pub fn resolve(target: &ScanTarget) -> Result<Vec<ResolvedFile>, ResolveError> {
    if target.is_glob() {
        return expand_glob(target.as_str());
    }

    let path = Path::new(target.as_str());
    if path.is_dir() {
        return expand_dir(path);
    }

    match path.canonicalize() {
        Ok(abs) => Ok(vec![ResolvedFile(abs)]),
        Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory) => {
            Err(ResolveError::Missing(target.to_string()))
        }
        Err(source) => Err(ResolveError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Files matching a glob pattern. Matching directories are skipped, not
/// entered. No match is not an error. Like shell globbing, `*` does not
/// match a leading dot.
fn expand_glob(pattern: &str) -> Result<Vec<ResolvedFile>, ResolveError> {
    let options = MatchOptions {
        require_literal_leading_dot: true,
        ..MatchOptions::new()
    };
    let paths = glob::glob_with(pattern, options).map_err(|source| ResolveError::Pattern {
        pattern: pattern.to_string(),
        source,
    })?;

    let files: Vec<ResolvedFile> = paths
        .filter_map(|entry| match entry {
            Ok(path) => ResolvedFile::from_candidate(&path),
            Err(e) => {
                debug!("Glob entry unreadable: {e}");
                None
            }
        })
        .collect();

    debug!("Pattern {pattern} matched {} files", files.len());
    Ok(files)
}

/// Immediate non-directory children of `dir`, sorted by name.
fn expand_dir(dir: &Path) -> Result<Vec<ResolvedFile>, ResolveError> {
    let dir = dir.canonicalize().map_err(|source| ResolveError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut children: Vec<PathBuf> = fs::read_dir(&dir)
        .map_err(|source| ResolveError::Io {
            path: dir.clone(),
            source,
        })?
        .filter_map(Result::ok)
        .map(|entry| dir.join(entry.file_name()))
        .collect();
    children.sort();

    Ok(children
        .iter()
        .filter_map(|child| ResolvedFile::from_candidate(child))
        .collect())
}
