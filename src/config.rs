// SPDX-FileCopyrightText: 2025-2026 TII (SSRC) and the Ghaf contributors
// SPDX-License-Identifier: Apache-2.0

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, error, info};
use serde::{Deserialize, Serialize};

use crate::backend::{Endpoint, DEFAULT_HOST, DEFAULT_PORT};
use crate::clamd::ClamdBackend;
use crate::error::ScanError;
use crate::scanner::{ScanOptions, DEFAULT_RETRY_BACKOFF, DEFAULT_SCAN_TIMEOUT};

/// Scanner configuration file.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct ScannerConfig {
    /// `ClamAV` daemon host (default: localhost).
    pub host: String,

    /// `ClamAV` daemon TCP port (default: 3310).
    pub port: u16,

    /// Echo diagnostics while scanning.
    pub verbose: bool,

    /// Per-file scan timeout in seconds. 0 disables the timeout.
    pub scan_timeout_secs: u64,

    /// TCP connect timeout in seconds.
    pub connect_timeout_secs: u64,

    /// Parallel scan workers, each with its own daemon connection.
    pub concurrency: usize,

    /// Extra attempts for a failed daemon call (default: 0, no retry).
    pub max_retries: u32,

    /// Delay before the first retry in milliseconds, doubled per attempt.
    pub retry_backoff_ms: u64,

    /// Files, directories or `*` patterns scanned when none are given on
    /// the command line.
    pub targets: Vec<String>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            verbose: false,
            scan_timeout_secs: DEFAULT_SCAN_TIMEOUT.as_secs(),
            connect_timeout_secs: 10,
            concurrency: 1,
            max_retries: 0,
            retry_backoff_ms: u64::try_from(DEFAULT_RETRY_BACKOFF.as_millis()).unwrap_or(500),
            targets: Vec::new(),
        }
    }
}

impl ScannerConfig {
    /// Validate configuration.
    /// Returns `Ok(())` if valid, or `Err(Vec<String>)` with error messages.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors: Vec<String> = Vec::new();

        if self.host.trim().is_empty() {
            errors.push("host must not be empty".to_string());
        }
        if self.port == 0 {
            errors.push("port must be between 1 and 65535".to_string());
        }
        if self.concurrency == 0 {
            errors.push("concurrency must be at least 1".to_string());
        }
        if self.connect_timeout_secs == 0 {
            errors.push("connectTimeoutSecs must be at least 1".to_string());
        }
        for (i, target) in self.targets.iter().enumerate() {
            if target.is_empty() {
                errors.push(format!("targets[{i}] is empty"));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn endpoint(&self) -> Result<Endpoint, ScanError> {
        Endpoint::new(self.host.clone(), self.port)
    }

    #[must_use]
    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            concurrency: self.concurrency.max(1),
            scan_timeout: (self.scan_timeout_secs > 0)
                .then(|| Duration::from_secs(self.scan_timeout_secs)),
            max_retries: self.max_retries,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }

    /// clamd client whose socket timeouts follow the per-file scan timeout,
    /// so a long scan ends as a timeout and not as a retryable I/O error.
    #[must_use]
    pub fn backend(&self) -> ClamdBackend {
        ClamdBackend::new(
            Duration::from_secs(self.connect_timeout_secs),
            self.scan_options().scan_timeout,
        )
    }

    /// Log the effective settings.
    pub fn log_config_info(&self) {
        info!(
            "ClamAV endpoint {}:{} (concurrency={}, retries={})",
            self.host, self.port, self.concurrency, self.max_retries
        );
        if self.scan_timeout_secs == 0 {
            info!("Per-file scan timeout disabled");
        } else {
            debug!("Per-file scan timeout: {}s", self.scan_timeout_secs);
        }
        if !self.targets.is_empty() {
            debug!("Configured targets: {:?}", self.targets);
        }
    }

    /// Load and validate configuration from file.
    pub fn load_config(config_path: &Path) -> Result<Self> {
        let config = parse_config(config_path)?;

        if let Err(errors) = config.validate() {
            for err in &errors {
                error!("Config {}: {err}", config_path.display());
            }
            anyhow::bail!(
                "Configuration {} has {} errors: {}",
                config_path.display(),
                errors.len(),
                errors.join("; ")
            );
        }

        info!("Loaded configuration from {}", config_path.display());
        config.log_config_info();
        Ok(config)
    }
}

fn parse_config(config_path: &Path) -> Result<ScannerConfig> {
    let config_data = fs::read(config_path)
        .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

    serde_json::from_slice(&config_data).context("Failed to parse config JSON")
}

/// Verify configuration file without scanning.
pub fn verify_config(config_path: &Path) -> Result<()> {
    let config = parse_config(config_path)?;

    match config.validate() {
        Ok(()) => {
            eprintln!("{}: valid", config_path.display());
            Ok(())
        }
        Err(errors) => {
            for err in &errors {
                eprintln!("{}: {err}", config_path.display());
            }
            anyhow::bail!("Configuration has {} errors", errors.len())
        }
    }
}
