// SPDX-FileCopyrightText: 2025-2026 TII (SSRC) and the Ghaf contributors
// SPDX-License-Identifier: Apache-2.0

use anyhow::Result;
use log::info;

// =============================================================================
// Logger
// =============================================================================

/// Where log records go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogOutput {
    /// systemd journal (for units).
    Journal,
    /// Standard error (for interactive use).
    #[default]
    Stderr,
}

impl std::fmt::Display for LogOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Journal => write!(f, "journal"),
            Self::Stderr => write!(f, "stderr"),
        }
    }
}

impl std::str::FromStr for LogOutput {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "journal" => Ok(Self::Journal),
            "stderr" => Ok(Self::Stderr),
            _ => Err(format!("Invalid log output: {s}. Use: journal, stderr")),
        }
    }
}

const fn log_level(debug: bool) -> log::LevelFilter {
    if debug {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    }
}

/// Initialize the logger.
///
/// # Errors
/// Returns an error if the journal logger fails to initialize or a logger
/// is already installed.
pub fn init_logger(debug: bool, output: LogOutput) -> Result<()> {
    let log_level = log_level(debug);
    match output {
        LogOutput::Journal => {
            systemd_journal_logger::JournalLog::new()?.install()?;
        }
        LogOutput::Stderr => {
            env_logger::Builder::new()
                .filter_level(log_level)
                .parse_default_env()
                .try_init()?;
        }
    }
    log::set_max_level(log_level);
    Ok(())
}

// =============================================================================
// Signal Handling
// =============================================================================

/// Shutdown signal received.
#[derive(Debug, Clone, Copy)]
pub enum ShutdownSignal {
    Sigint,
    Sigterm,
}

/// Wait for a shutdown signal (SIGINT or SIGTERM).
///
/// # Errors
/// Returns an error if signal handlers fail to initialize.
pub async fn wait_for_shutdown() -> Result<ShutdownSignal> {
    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())?;
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = sigint.recv() => {
            info!("SIGINT received");
            Ok(ShutdownSignal::Sigint)
        }
        _ = sigterm.recv() => {
            info!("SIGTERM received");
            Ok(ShutdownSignal::Sigterm)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_output_round_trip() {
        for output in [LogOutput::Journal, LogOutput::Stderr] {
            assert_eq!(output.to_string().parse::<LogOutput>(), Ok(output));
        }
    }

    #[test]
    fn log_output_case_insensitive() {
        assert_eq!("JOURNAL".parse::<LogOutput>(), Ok(LogOutput::Journal));
    }

    #[test]
    fn log_output_invalid() {
        assert!("syslog".parse::<LogOutput>().is_err());
    }

    #[test]
    fn debug_raises_level() {
        assert_eq!(log_level(true), log::LevelFilter::Debug);
        assert_eq!(log_level(false), log::LevelFilter::Info);
    }
}
