// SPDX-FileCopyrightText: 2025-2026 TII (SSRC) and the Ghaf contributors
// SPDX-License-Identifier: Apache-2.0

//! On-demand `ClamAV` scanning of files, directories and glob patterns.
//!
//! Targets are resolved to concrete files, each file is handed to a scanning
//! daemon and the verdicts are folded into a single result set.
//!
//! # Modules
//!
//! - [`resolver`] - Expands files, directories (one level) and `*` patterns
//! - [`scanner`] - Scan orchestrator owning the result set and diagnostics
//! - [`backend`] - Capability trait implemented by scanning daemons
//! - [`clamd`] - `ClamAV` daemon client over TCP
//! - [`results`] - Result set, per-file outcomes and output formats
//!
//! Directory targets are expanded one level deep only. Subdirectories are
//! skipped, never recursed into; use a glob pattern to reach nested files.

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::missing_errors_doc)]

pub mod backend;
pub mod clamd;
pub mod config;
pub mod error;
pub mod resolver;
pub mod results;
pub mod scanner;
pub mod util;
mod worker;

#[cfg(test)]
mod testing;

pub use backend::{Endpoint, ScanBackend, ScanVerdict};
pub use error::ScanError;
pub use results::{FileOutcome, ResultFormat, ScanReport, ScanResultSet};
pub use scanner::{ScanOptions, Scanner};
