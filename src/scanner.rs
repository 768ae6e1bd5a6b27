// SPDX-FileCopyrightText: 2025-2026 TII (SSRC) and the Ghaf contributors
// SPDX-License-Identifier: Apache-2.0

//! Scan orchestrator.
//!
//! ```no_run
//! # async fn demo() -> Result<(), ghaf_clamd_scan::ScanError> {
//! use ghaf_clamd_scan::clamd::ClamdBackend;
//! use ghaf_clamd_scan::{Endpoint, ResultFormat, Scanner};
//!
//! let mut scanner = Scanner::new(ClamdBackend::default(), Endpoint::new("localhost", 3310)?);
//! scanner.verbose().connect().await?;
//! scanner.set_targets(["./files", "./files/*.php"])?.scan().await?;
//! let report = scanner.results(ResultFormat::Json)?;
//! # Ok(())
//! # }
//! ```
//!
//! The result set is never reset: further `scan` calls keep appending.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::backend::{Endpoint, ScanBackend};
use crate::error::ScanError;
use crate::resolver::{self, ResolveError, ScanTarget};
use crate::results::{LogPayload, ResultFormat, ScanReport, ScanResultSet};
use crate::worker::{FileQueue, Worker, WorkerEvent};

/// Prefix of every diagnostic line.
const LOG_PREFIX: &str = "Scanner:";

/// Default per-file scan timeout (matches clamd-side stream timeouts).
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(120);

/// Default base delay between retries.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Dispatch tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanOptions {
    /// Parallel workers, one connection each. With 1, `files` keeps
    /// resolution order; otherwise it is completion order.
    pub concurrency: usize,
    /// Per-file limit; `None` waits forever.
    pub scan_timeout: Option<Duration>,
    /// Extra attempts after a failed backend call.
    pub max_retries: u32,
    /// Delay before the first retry, doubled for each further one.
    pub retry_backoff: Duration,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            concurrency: 1,
            scan_timeout: Some(DEFAULT_SCAN_TIMEOUT),
            max_retries: 0,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }
}

/// Resolves targets, dispatches files to a backend and aggregates verdicts.
pub struct Scanner<B: ScanBackend> {
    backend: Arc<B>,
    endpoint: Endpoint,
    options: ScanOptions,
    verbose: bool,
    connected: bool,
    connections: Vec<B::Connection>,
    targets: Vec<ScanTarget>,
    results: ScanResultSet,
    cancel: CancellationToken,
}

impl<B: ScanBackend> std::fmt::Debug for Scanner<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scanner")
            .field("endpoint", &self.endpoint)
            .field("options", &self.options)
            .field("verbose", &self.verbose)
            .field("connected", &self.connected)
            .field("connections", &self.connections.len())
            .field("targets", &self.targets)
            .field("results", &self.results)
            .finish_non_exhaustive()
    }
}

impl<B: ScanBackend> Scanner<B> {
    pub fn new(backend: B, endpoint: Endpoint) -> Self {
        Self {
            backend: Arc::new(backend),
            endpoint,
            options: ScanOptions::default(),
            verbose: false,
            connected: false,
            connections: Vec::new(),
            targets: Vec::new(),
            results: ScanResultSet::default(),
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: ScanOptions) -> Self {
        self.options = ScanOptions {
            concurrency: options.concurrency.max(1),
            ..options
        };
        self
    }

    #[must_use]
    pub const fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    #[must_use]
    pub const fn options(&self) -> &ScanOptions {
        &self.options
    }

    /// Echo diagnostics to stderr as well as recording them.
    pub fn verbose(&mut self) -> &mut Self {
        self.verbose = true;
        self
    }

    /// Token that stops dispatching new files once cancelled.
    /// In-flight scans still complete and are recorded.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Connect to the backend and ping it.
    ///
    /// On failure nothing is recorded and the call may be retried.
    pub async fn connect(&mut self) -> Result<&mut Self, ScanError> {
        let backend = Arc::clone(&self.backend);
        let endpoint = self.endpoint.clone();

        let connection = tokio::task::spawn_blocking(move || {
            let mut connection = backend.connect(&endpoint)?;
            if backend.ping(&mut connection)? {
                Ok(connection)
            } else {
                Err(ScanError::Connection(
                    "Ping returned an invalid response.".to_string(),
                ))
            }
        })
        .await
        .map_err(|e| ScanError::Connection(format!("connect task failed: {e}")))?
        .map_err(|e| match e {
            ScanError::Connection(_) => e,
            other => ScanError::Connection(other.to_string()),
        })?;

        info!("ClamAV available at {}", self.endpoint);
        // A reconnect replaces whatever idle connections were kept.
        self.connections.clear();
        self.connections.push(connection);
        self.connected = true;
        self.log("ClamAV ping returned successful response.");
        Ok(self)
    }

    /// Replace the pending targets. On error the previous targets are kept.
    pub fn set_targets<I, S>(&mut self, targets: I) -> Result<&mut Self, ScanError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.targets = targets
            .into_iter()
            .map(ScanTarget::new)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(self)
    }

    /// Resolve pending targets and scan every resulting file.
    pub async fn scan(&mut self) -> Result<&mut Self, ScanError> {
        if !self.connected {
            return Err(ScanError::NotConnected);
        }

        if self.targets.is_empty() {
            self.log("No files to be scanned. Please use set_targets and pass a list of files to scan.");
        }

        let mut queue = VecDeque::new();
        for target in self.targets.clone() {
            match resolver::resolve(&target) {
                Ok(files) => queue.extend(files),
                Err(ResolveError::Missing(_)) => self.log(format!("{target} does not exist.")),
                Err(e) => self.log(e.to_string()),
            }
        }

        if queue.is_empty() {
            return Ok(self);
        }

        let total = queue.len();
        let before = self.results.files.len();
        let queue: FileQueue = Arc::new(Mutex::new(queue));
        self.dispatch(&queue).await;

        let left = queue.lock().unwrap_or_else(PoisonError::into_inner).len();
        if left > 0 {
            warn!("Scan cancelled with {left} of {total} files pending");
            self.log(format!("Scan cancelled, {left} files were not scanned."));
        }

        self.log_summary(before);
        Ok(self)
    }

    /// Snapshot of the result set in the requested format.
    pub fn results(&self, format: ResultFormat) -> Result<ScanReport, ScanError> {
        ScanReport::render(&self.results, format)
    }

    #[must_use]
    pub fn result_set(&self) -> ScanResultSet {
        self.results.clone()
    }

    /// Run workers over `queue`, folding their events into the result set.
    async fn dispatch(&mut self, queue: &FileQueue) {
        let pending = queue.lock().unwrap_or_else(PoisonError::into_inner).len();
        let workers = self.options.concurrency.min(pending).max(1);
        debug!("Dispatching {pending} files to {workers} workers");

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut handles = Vec::with_capacity(workers);
        for id in 0..workers {
            let worker = Worker::new(
                id,
                Arc::clone(&self.backend),
                self.endpoint.clone(),
                self.options,
                self.connections.pop(),
                tx.clone(),
            );
            handles.push(tokio::spawn(
                worker.run(Arc::clone(queue), self.cancel.clone()),
            ));
        }
        drop(tx);

        while let Some(event) = rx.recv().await {
            match event {
                WorkerEvent::Log(message) => self.log(message),
                WorkerEvent::Outcome(outcome) => self.results.record(outcome),
            }
        }

        for joined in futures::future::join_all(handles).await {
            match joined {
                Ok(Some(connection)) => self.connections.push(connection),
                Ok(None) => {}
                Err(e) => warn!("Scan worker failed: {e}"),
            }
        }
    }

    fn log_summary(&mut self, before: usize) {
        let scanned = &self.results.files[before..];
        let count = |v: Option<bool>| scanned.iter().filter(|f| f.passed == v).count();

        let summary: BTreeMap<String, serde_json::Value> = BTreeMap::from([
            ("scanned".to_string(), scanned.len().into()),
            ("passed".to_string(), count(Some(true)).into()),
            ("failed".to_string(), count(Some(false)).into()),
            ("unverified".to_string(), count(None).into()),
        ]);
        self.log(LogPayload::Structured(summary));
    }

    fn log(&mut self, payload: impl Into<LogPayload>) {
        match payload.into() {
            LogPayload::Text(message) => {
                debug!("{message}");
                let line = format!("{LOG_PREFIX} {message}");
                if self.verbose {
                    eprintln!("{line}");
                }
                self.results.logs.push(line);
            }
            LogPayload::Structured(fields) => {
                if self.verbose {
                    eprintln!("{LOG_PREFIX}");
                    for (key, value) in &fields {
                        eprintln!("    {key}: {value}");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::FileOutcome;
    use crate::testing::{FakeBackend, Reply};
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;
    use std::fs;
    use std::path::{Path, PathBuf};

    fn scanner(backend: FakeBackend) -> Scanner<FakeBackend> {
        Scanner::new(backend, Endpoint::default())
    }

    async fn connected(backend: FakeBackend) -> Scanner<FakeBackend> {
        let mut scanner = scanner(backend);
        scanner.connect().await.unwrap();
        scanner
    }

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, name.as_bytes()).unwrap();
        path.canonicalize().unwrap()
    }

    fn path_str(path: &Path) -> String {
        path.to_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn connect_logs_confirmation() {
        let scanner = connected(FakeBackend::new()).await;
        let results = scanner.result_set();

        assert_eq!(
            results.logs,
            vec!["Scanner: ClamAV ping returned successful response."]
        );
        assert!(results.files.is_empty());
    }

    #[tokio::test]
    async fn connect_unreachable_leaves_results_empty() {
        let mut scanner = scanner(FakeBackend::new().unreachable());

        assert_matches!(scanner.connect().await, Err(ScanError::Connection(_)));
        assert_eq!(scanner.result_set(), ScanResultSet::default());
    }

    #[tokio::test]
    async fn connect_bad_ping() {
        let mut scanner = scanner(FakeBackend::new().failing_ping());

        let err = scanner.connect().await.err().unwrap();
        assert_eq!(
            err.to_string(),
            "Scanner: Ping returned an invalid response."
        );
        assert_eq!(scanner.result_set(), ScanResultSet::default());
    }

    #[tokio::test]
    async fn scan_before_connect() {
        let mut scanner = scanner(FakeBackend::new());
        scanner.set_targets(["/tmp"]).unwrap();

        assert_matches!(scanner.scan().await, Err(ScanError::NotConnected));
    }

    #[tokio::test]
    async fn set_targets_rejects_bad_entry_and_keeps_previous() {
        let dir = tempfile::tempdir().unwrap();
        let a = touch(dir.path(), "a.txt");
        let mut scanner = connected(FakeBackend::new()).await;

        scanner.set_targets([path_str(&a)]).unwrap();
        assert_matches!(
            scanner.set_targets([path_str(&a), String::new()]),
            Err(ScanError::Input(_))
        );

        scanner.scan().await.unwrap();
        assert_eq!(scanner.result_set().files.len(), 1);
    }

    #[tokio::test]
    async fn empty_target_list() {
        let mut scanner = connected(FakeBackend::new()).await;
        scanner.set_targets(Vec::<String>::new()).unwrap();
        scanner.scan().await.unwrap();

        let results = scanner.result_set();
        assert!(results.files.is_empty());
        assert_eq!(results.passed + results.failed, 0);
        assert!(results.logs[1].starts_with("Scanner: No files to be scanned."));
    }

    #[tokio::test]
    async fn directory_expands_one_level() {
        let dir = tempfile::tempdir().unwrap();
        let a = touch(dir.path(), "a.txt");
        let b = touch(dir.path(), "b.txt");
        fs::create_dir(dir.path().join("sub")).unwrap();
        touch(&dir.path().join("sub"), "deep.txt");

        let mut scanner = connected(FakeBackend::new()).await;
        scanner.set_targets([path_str(dir.path())]).unwrap();
        scanner.scan().await.unwrap();

        let results = scanner.result_set();
        assert_eq!(
            results.files,
            vec![
                FileOutcome::new(&a, Some(true)),
                FileOutcome::new(&b, Some(true)),
            ]
        );
        assert_eq!(results.passed, 2);
        assert_eq!(results.failed, 0);
        assert!(results
            .logs
            .contains(&format!("Scanner: ClamAV is running a scan test against {}", a.display())));
    }

    #[tokio::test]
    async fn glob_matches_and_misses() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "x.log");
        touch(dir.path(), "y.log");
        touch(dir.path(), "z.txt");

        let mut scanner = connected(FakeBackend::new()).await;
        scanner
            .set_targets([format!("{}/*.log", dir.path().display())])
            .unwrap();
        scanner.scan().await.unwrap();
        assert_eq!(scanner.result_set().files.len(), 2);

        let mut scanner = connected(FakeBackend::new()).await;
        scanner
            .set_targets([format!("{}/*.zzz", dir.path().display())])
            .unwrap();
        scanner.scan().await.unwrap();
        let results = scanner.result_set();
        assert!(results.files.is_empty());
        assert_eq!(results.logs.len(), 1);
    }

    #[tokio::test]
    async fn missing_file_is_logged_not_scanned() {
        let mut scanner = connected(FakeBackend::new()).await;
        scanner.set_targets(["/nonexistent/path"]).unwrap();
        scanner.scan().await.unwrap();

        let results = scanner.result_set();
        assert!(results.files.is_empty());
        let mentions: Vec<_> = results
            .logs
            .iter()
            .filter(|l| l.contains("/nonexistent/path"))
            .collect();
        assert_eq!(mentions, vec!["Scanner: /nonexistent/path does not exist."]);
    }

    #[tokio::test]
    async fn verdicts_fold_into_counters() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "clean.txt");
        touch(dir.path(), "eicar.com");
        touch(dir.path(), "weird.bin");

        let backend = FakeBackend::new()
            .reply("eicar.com", Reply::Infected)
            .reply("weird.bin", Reply::Unrecognized);
        let mut scanner = connected(backend).await;
        scanner.set_targets([path_str(dir.path())]).unwrap();
        scanner.scan().await.unwrap();

        let results = scanner.result_set();
        let passed: Vec<_> = results.files.iter().map(|f| f.passed).collect();
        assert_eq!(passed, vec![Some(true), Some(false), None]);
        assert_eq!(results.passed, 1);
        assert_eq!(results.failed, 1);
        assert!(results.passed + results.failed <= results.files.len() as u64);
        assert!(results
            .logs
            .iter()
            .any(|l| l.contains("Unrecognized verdict") && l.contains("weird.bin")));
    }

    #[tokio::test]
    async fn results_idempotent_and_json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "a.txt");
        let mut scanner = connected(FakeBackend::new()).await;
        scanner.set_targets([path_str(dir.path())]).unwrap();
        scanner.scan().await.unwrap();

        let first = scanner.results(ResultFormat::Structured).unwrap();
        let second = scanner.results(ResultFormat::Structured).unwrap();
        assert_eq!(first, second);

        let ScanReport::Json(text) = scanner.results(ResultFormat::Json).unwrap() else {
            panic!("expected json");
        };
        let parsed: ScanResultSet = serde_json::from_str(&text).unwrap();
        assert_eq!(ScanReport::Structured(parsed), first);
    }

    #[tokio::test]
    async fn second_scan_appends() {
        let dir = tempfile::tempdir().unwrap();
        let a = touch(dir.path(), "a.txt");
        let mut scanner = connected(FakeBackend::new()).await;

        scanner.set_targets([path_str(&a)]).unwrap();
        scanner.scan().await.unwrap();
        scanner.scan().await.unwrap();

        let results = scanner.result_set();
        assert_eq!(results.files.len(), 2);
        assert_eq!(results.passed, 2);
    }

    #[tokio::test]
    async fn timeout_leaves_verdict_unset_and_continues() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "a-slow.txt");
        touch(dir.path(), "b-fast.txt");

        let backend = FakeBackend::new().reply("a-slow.txt", Reply::Hang(Duration::from_millis(300)));
        let mut scanner = scanner(backend).with_options(ScanOptions {
            scan_timeout: Some(Duration::from_millis(50)),
            ..ScanOptions::default()
        });
        scanner.connect().await.unwrap();
        scanner.set_targets([path_str(dir.path())]).unwrap();
        scanner.scan().await.unwrap();

        let results = scanner.result_set();
        let passed: Vec<_> = results.files.iter().map(|f| f.passed).collect();
        assert_eq!(passed, vec![None, Some(true)]);
        assert_eq!(results.passed, 1);
        assert!(results
            .logs
            .iter()
            .any(|l| l.contains("a-slow.txt") && l.contains("timed out")));
    }

    #[tokio::test]
    async fn retry_recovers_from_transient_failure() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "a.txt");

        let backend = FakeBackend::new().reply("a.txt", Reply::FailTimes(2));
        let mut scanner = scanner(backend).with_options(ScanOptions {
            max_retries: 2,
            retry_backoff: Duration::from_millis(1),
            ..ScanOptions::default()
        });
        scanner.connect().await.unwrap();
        scanner.set_targets([path_str(dir.path())]).unwrap();
        scanner.scan().await.unwrap();

        let results = scanner.result_set();
        assert_eq!(results.passed, 1);
        assert_eq!(results.files[0].passed, Some(true));
    }

    #[tokio::test]
    async fn retries_exhausted_is_absorbed() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "a.txt");
        touch(dir.path(), "b.txt");

        let backend = FakeBackend::new().reply("a.txt", Reply::FailTimes(10));
        let mut scanner = scanner(backend).with_options(ScanOptions {
            max_retries: 1,
            retry_backoff: Duration::from_millis(1),
            ..ScanOptions::default()
        });
        scanner.connect().await.unwrap();
        scanner.set_targets([path_str(dir.path())]).unwrap();
        scanner.scan().await.unwrap();

        let results = scanner.result_set();
        let passed: Vec<_> = results.files.iter().map(|f| f.passed).collect();
        assert_eq!(passed, vec![None, Some(true)]);
        assert!(results
            .logs
            .iter()
            .any(|l| l.contains("giving up after 2 attempts")));
    }

    #[tokio::test]
    async fn concurrent_workers_scan_every_file_once() {
        let dir = tempfile::tempdir().unwrap();
        let expected: HashSet<String> = (0..12)
            .map(|i| path_str(&touch(dir.path(), &format!("f{i:02}.dat"))))
            .collect();

        let backend = FakeBackend::new();
        let connects = backend.connect_counter();
        let mut scanner = scanner(backend).with_options(ScanOptions {
            concurrency: 4,
            ..ScanOptions::default()
        });
        scanner.connect().await.unwrap();
        scanner.set_targets([path_str(dir.path())]).unwrap();
        scanner.scan().await.unwrap();

        let results = scanner.result_set();
        let seen: HashSet<String> = results.files.iter().map(|f| f.file.clone()).collect();
        assert_eq!(results.files.len(), 12);
        assert_eq!(seen, expected);
        assert_eq!(results.passed, 12);
        // One connection from connect(), three more opened by extra workers.
        assert_eq!(connects.load(std::sync::atomic::Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn cancelled_scan_dispatches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "a.txt");
        touch(dir.path(), "b.txt");

        let mut scanner = connected(FakeBackend::new()).await;
        scanner.cancellation_token().cancel();
        scanner.set_targets([path_str(dir.path())]).unwrap();
        scanner.scan().await.unwrap();

        let results = scanner.result_set();
        assert!(results.files.is_empty());
        assert!(results
            .logs
            .contains(&"Scanner: Scan cancelled, 2 files were not scanned.".to_string()));
    }

    #[tokio::test]
    async fn verbose_is_idempotent_and_logs_accumulate() {
        let mut scanner = connected(FakeBackend::new()).await;
        scanner.verbose().verbose();
        scanner.set_targets(["/nonexistent/a", "/nonexistent/b"]).unwrap();
        scanner.scan().await.unwrap();

        assert_eq!(scanner.result_set().logs.len(), 3);
    }

    #[tokio::test]
    async fn non_utf8_file_name_still_renders_json() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(OsStr::from_bytes(b"bad\xff.txt")), b"x").unwrap();
        touch(dir.path(), "good.txt");

        let mut scanner = connected(FakeBackend::new()).await;
        scanner.set_targets([path_str(dir.path())]).unwrap();
        scanner.scan().await.unwrap();

        let ScanReport::Json(text) = scanner.results(ResultFormat::Json).unwrap() else {
            panic!("expected json");
        };
        let parsed: ScanResultSet = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.files.len(), 2);
        assert_eq!(parsed.passed, 2);
        assert!(parsed.files[0].file.ends_with("bad\u{fffd}.txt"));
    }

    #[tokio::test]
    async fn reconnect_replaces_idle_connection() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "a.txt");
        touch(dir.path(), "b.txt");

        let backend = FakeBackend::new();
        let connects = backend.connect_counter();
        let mut scanner = scanner(backend).with_options(ScanOptions {
            concurrency: 2,
            ..ScanOptions::default()
        });
        scanner.connect().await.unwrap();
        scanner.connect().await.unwrap();
        scanner.connect().await.unwrap();
        assert_eq!(connects.load(std::sync::atomic::Ordering::SeqCst), 3);
        assert_eq!(scanner.connections.len(), 1);

        scanner.set_targets([path_str(dir.path())]).unwrap();
        scanner.scan().await.unwrap();

        assert_eq!(scanner.result_set().passed, 2);
        assert!(scanner.connections.len() <= 2);
        assert!(format!("{scanner:?}").starts_with("Scanner {"));
    }
}
