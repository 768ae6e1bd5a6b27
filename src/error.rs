// SPDX-FileCopyrightText: 2025-2026 TII (SSRC) and the Ghaf contributors
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use thiserror::Error;

/// Errors raised by the scanner and its backends.
///
/// Configuration, connection and input errors are returned to the caller.
/// Per-file errors (timeouts, I/O, protocol, exhausted retries) are absorbed
/// by the scanner into its diagnostic log.
#[derive(Debug, Error)]
pub enum ScanError {
    /// Invalid host or port.
    #[error("Scanner: {0}")]
    Configuration(String),

    /// Daemon unreachable or ping failed.
    #[error("Scanner: {0}")]
    Connection(String),

    /// Malformed scan target list.
    #[error("Scanner: {0}")]
    Input(String),

    /// `scan` was called before a successful `connect`.
    #[error("Scanner: not connected, call connect before scan")]
    NotConnected,

    /// A single file scan did not finish in time.
    #[error("scan timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("backend I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The daemon answered something the client could not use.
    #[error("backend protocol error: {0}")]
    Protocol(String),

    #[error("giving up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<ScanError> },

    #[error("failed to serialize results: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl ScanError {
    /// Whether a failed backend call may succeed on a fresh connection.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Protocol(_) | Self::Connection(_))
    }
}
