// SPDX-FileCopyrightText: 2025-2026 TII (SSRC) and the Ghaf contributors
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info};

use ghaf_clamd_scan::config::{verify_config, ScannerConfig};
use ghaf_clamd_scan::util::{init_logger, wait_for_shutdown, LogOutput};
use ghaf_clamd_scan::{ResultFormat, ScanReport, ScanResultSet, Scanner};

#[derive(Parser)]
#[command(name = "clamd-scan")]
#[command(about = "Scan files, directories and glob patterns with a ClamAV daemon")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Parser)]
enum Commands {
    /// Scan targets and print the results
    Scan {
        /// Files, directories (one level deep) or patterns containing `*`
        targets: Vec<String>,

        /// JSON configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// `ClamAV` daemon host
        #[arg(long)]
        host: Option<String>,

        /// `ClamAV` daemon TCP port
        #[arg(short, long)]
        port: Option<u16>,

        /// Echo scanner diagnostics to stderr
        #[arg(short, long)]
        verbose: bool,

        /// Output format: structured, json
        #[arg(short, long, default_value = "structured")]
        format: ResultFormat,

        /// Per-file scan timeout in seconds (0 disables)
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Parallel scan workers
        #[arg(long)]
        concurrency: Option<usize>,

        /// Extra attempts for failed daemon calls
        #[arg(long)]
        retries: Option<u32>,

        /// Enable debug logging
        #[arg(short, long)]
        debug: bool,

        /// Log destination: journal, stderr
        #[arg(long, default_value = "stderr")]
        log_output: LogOutput,
    },
    /// Verify configuration file without scanning
    Verify {
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Scan {
            targets,
            config,
            host,
            port,
            verbose,
            format,
            timeout_secs,
            concurrency,
            retries,
            debug,
            log_output,
        } => {
            init_logger(debug, log_output)?;

            let mut config = match config {
                Some(path) => ScannerConfig::load_config(&path).with_context(|| {
                    format!("Failed to load configuration from {}", path.display())
                })?,
                None => ScannerConfig::default(),
            };

            // Command line wins over the file
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(secs) = timeout_secs {
                config.scan_timeout_secs = secs;
            }
            if let Some(n) = concurrency {
                config.concurrency = n;
            }
            if let Some(n) = retries {
                config.max_retries = n;
            }
            config.verbose |= verbose;
            if !targets.is_empty() {
                config.targets = targets;
            }

            let results = run(&config).await?;
            print_report(&ScanReport::render(&results, format)?);

            Ok(if results.failed > 0 {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            })
        }
        Commands::Verify { config } => {
            verify_config(&config).with_context(|| {
                format!("Failed to verify configuration file {}", config.display())
            })?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run(config: &ScannerConfig) -> Result<ScanResultSet> {
    let endpoint = config.endpoint()?;
    let mut scanner = Scanner::new(config.backend(), endpoint).with_options(config.scan_options());
    if config.verbose {
        scanner.verbose();
    }

    let endpoint = scanner.endpoint().to_string();
    scanner
        .connect()
        .await
        .with_context(|| format!("ClamAV unavailable at {endpoint}"))?;
    scanner.set_targets(config.targets.iter().cloned())?;

    info!(
        "clamd-scan: starting ({} targets, endpoint={endpoint})",
        config.targets.len()
    );

    // Stop dispatching on SIGINT/SIGTERM; in-flight scans still finish.
    let token = scanner.cancellation_token();
    let signals = tokio::spawn(async move {
        if wait_for_shutdown().await.is_ok() {
            token.cancel();
        }
    });

    scanner.scan().await?;
    signals.abort();

    let results = scanner.result_set();
    info!(
        "clamd-scan: done (passed={}, failed={}, unverified={})",
        results.passed,
        results.failed,
        results.unverified()
    );
    Ok(results)
}

fn print_report(report: &ScanReport) {
    match report {
        ScanReport::Json(text) => println!("{text}"),
        ScanReport::Structured(results) => {
            for outcome in &results.files {
                let status = match outcome.passed {
                    Some(true) => "PASS",
                    Some(false) => "FAIL",
                    None => "UNKNOWN",
                };
                println!("{status:<8}{}", outcome.file);
            }
            println!(
                "passed: {}, failed: {}, unverified: {}",
                results.passed,
                results.failed,
                results.unverified()
            );
            debug!("{} diagnostic lines recorded", results.logs.len());
        }
    }
}
