// SPDX-FileCopyrightText: 2025-2026 TII (SSRC) and the Ghaf contributors
// SPDX-License-Identifier: Apache-2.0

//! Scanning daemon capability used by the scanner.
//!
//! The scanner only needs three operations from a daemon: open a
//! connection, ping it, and scan one file by absolute path. Everything about
//! the wire protocol stays behind [`ScanBackend`].

use std::fmt;
use std::path::Path;

use crate::error::ScanError;

/// Default `ClamAV` daemon host.
pub const DEFAULT_HOST: &str = "localhost";

/// Default `ClamAV` daemon TCP port.
pub const DEFAULT_PORT: u16 = 3310;

/// Validated daemon address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// Build an endpoint, rejecting an empty host or port 0.
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self, ScanError> {
        let host = host.into();
        if host.trim().is_empty() {
            return Err(ScanError::Configuration(
                "Host must be provided.".to_string(),
            ));
        }
        if port == 0 {
            return Err(ScanError::Configuration(
                "Port must be provided.".to_string(),
            ));
        }
        Ok(Self { host, port })
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Verdict for one scanned file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanVerdict {
    /// File is clean
    Clean,
    /// Malware detected, with signature name
    Infected(String),
    /// Daemon reply that is neither clean nor infected
    Unrecognized(String),
}

impl ScanVerdict {
    /// Boolean view of the verdict: `Some(true)` clean, `Some(false)`
    /// infected, `None` when the daemon gave no usable answer.
    #[must_use]
    pub const fn passed(&self) -> Option<bool> {
        match self {
            Self::Clean => Some(true),
            Self::Infected(_) => Some(false),
            Self::Unrecognized(_) => None,
        }
    }
}

/// Scanning daemon interface.
///
/// Calls are blocking; the scanner runs them on the blocking thread pool.
/// A connection is owned by exactly one worker at a time.
pub trait ScanBackend: Send + Sync + 'static {
    type Connection: Send + 'static;

    /// Open a connection to the daemon.
    fn connect(&self, endpoint: &Endpoint) -> Result<Self::Connection, ScanError>;

    /// Liveness probe. `Ok(false)` means the daemon answered but not as expected.
    fn ping(&self, connection: &mut Self::Connection) -> Result<bool, ScanError>;

    /// Scan one file given by absolute path.
    fn file_scan(
        &self,
        connection: &mut Self::Connection,
        path: &Path,
    ) -> Result<ScanVerdict, ScanError>;
}
