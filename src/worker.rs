// SPDX-FileCopyrightText: 2025-2026 TII (SSRC) and the Ghaf contributors
// SPDX-License-Identifier: Apache-2.0

//! Scan workers.
//!
//! Each worker owns at most one backend connection and pulls files from a
//! shared queue. Outcomes and diagnostics go back to the scanner over a
//! channel; the scanner is the only writer of the result set.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::backend::{Endpoint, ScanBackend, ScanVerdict};
use crate::error::ScanError;
use crate::resolver::ResolvedFile;
use crate::results::FileOutcome;
use crate::scanner::ScanOptions;

/// Files waiting to be dispatched.
pub type FileQueue = Arc<Mutex<VecDeque<ResolvedFile>>>;

/// Message from a worker to the scanner.
#[derive(Debug)]
pub enum WorkerEvent {
    Log(String),
    Outcome(FileOutcome),
}

pub struct Worker<B: ScanBackend> {
    id: usize,
    backend: Arc<B>,
    endpoint: Endpoint,
    options: ScanOptions,
    connection: Option<B::Connection>,
    events: mpsc::UnboundedSender<WorkerEvent>,
}

impl<B: ScanBackend> Worker<B> {
    pub fn new(
        id: usize,
        backend: Arc<B>,
        endpoint: Endpoint,
        options: ScanOptions,
        connection: Option<B::Connection>,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Self {
        Self {
            id,
            backend,
            endpoint,
            options,
            connection,
            events,
        }
    }

    /// Scan queued files until the queue drains or `cancel` fires.
    /// Returns the connection if it is still usable.
    pub async fn run(mut self, queue: FileQueue, cancel: CancellationToken) -> Option<B::Connection> {
        loop {
            if cancel.is_cancelled() {
                debug!("[worker {}] cancelled", self.id);
                break;
            }

            let next = queue
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front();
            let Some(file) = next else {
                break;
            };

            self.scan_file(file).await;
        }

        self.connection
    }

    fn log(&self, message: String) {
        // Receiver only goes away if the scanner future was dropped.
        let _ = self.events.send(WorkerEvent::Log(message));
    }

    async fn scan_file(&mut self, file: ResolvedFile) {
        self.log(format!("ClamAV is running a scan test against {file}"));

        let passed = match self.scan_with_retry(&file).await {
            Ok(ScanVerdict::Unrecognized(reply)) => {
                self.log(format!("Unrecognized verdict for {file}: {reply}"));
                None
            }
            Ok(verdict) => verdict.passed(),
            Err(e) => {
                self.log(format!("Scan of {file} failed: {e}"));
                None
            }
        };

        let _ = self
            .events
            .send(WorkerEvent::Outcome(FileOutcome::new(file.path(), passed)));
    }

    async fn scan_with_retry(&mut self, file: &ResolvedFile) -> Result<ScanVerdict, ScanError> {
        let mut attempt: u32 = 0;
        loop {
            match self.scan_once(file).await {
                Ok(verdict) => return Ok(verdict),
                Err(e) if e.is_retryable() && attempt < self.options.max_retries => {
                    let delay = self.options.retry_backoff.saturating_mul(1 << attempt.min(16));
                    attempt += 1;
                    warn!(
                        "[worker {}] scan of {file} failed ({e}), retry {attempt}/{} in {}ms",
                        self.id,
                        self.options.max_retries,
                        delay.as_millis()
                    );
                    self.connection = None;
                    tokio::time::sleep(delay).await;
                }
                Err(e) if attempt > 0 => {
                    return Err(ScanError::RetriesExhausted {
                        attempts: attempt + 1,
                        last: Box::new(e),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn scan_once(&mut self, file: &ResolvedFile) -> Result<ScanVerdict, ScanError> {
        let mut connection = match self.connection.take() {
            Some(c) => c,
            None => self
                .spawn_connect()
                .await
                .map_err(|e| ScanError::Connection(format!("connect task failed: {e}")))??,
        };

        let backend = Arc::clone(&self.backend);
        let path: PathBuf = file.path().to_path_buf();
        let task = tokio::task::spawn_blocking(move || {
            let result = backend.file_scan(&mut connection, &path);
            (connection, result)
        });

        let joined = match self.options.scan_timeout {
            Some(limit) => timeout(limit, task).await.map_err(|_| {
                // The blocking call keeps the stalled connection; the next
                // file gets a fresh one.
                warn!("[worker {}] scan of {file} timed out", self.id);
                ScanError::Timeout(limit)
            })?,
            None => task.await,
        };

        let (connection, result) =
            joined.map_err(|e| ScanError::Protocol(format!("scan task failed: {e}")))?;
        if result.is_ok() {
            self.connection = Some(connection);
        }
        result
    }

    fn spawn_connect(&self) -> JoinHandle<Result<B::Connection, ScanError>> {
        debug!("[worker {}] connecting to {}", self.id, self.endpoint);
        let backend = Arc::clone(&self.backend);
        let endpoint = self.endpoint.clone();
        tokio::task::spawn_blocking(move || backend.connect(&endpoint))
    }
}
