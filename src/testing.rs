// SPDX-FileCopyrightText: 2025-2026 TII (SSRC) and the Ghaf contributors
// SPDX-License-Identifier: Apache-2.0

//! Scripted in-memory backend for scanner tests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::backend::{Endpoint, ScanBackend, ScanVerdict};
use crate::error::ScanError;

/// Scripted reply for a file name.
#[derive(Debug, Clone, Copy)]
pub enum Reply {
    Clean,
    Infected,
    Unrecognized,
    /// Block for the given time, then answer clean.
    Hang(Duration),
    /// Fail with an I/O error this many times, then answer clean.
    FailTimes(usize),
}

#[derive(Debug, Default)]
pub struct FakeBackend {
    replies: HashMap<String, Reply>,
    unreachable: bool,
    failing_ping: bool,
    connects: Arc<AtomicUsize>,
    failures: Mutex<HashMap<String, usize>>,
}

#[derive(Debug)]
pub struct FakeConnection {
    #[allow(dead_code)]
    id: usize,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(mut self, file_name: &str, reply: Reply) -> Self {
        self.replies.insert(file_name.to_string(), reply);
        self
    }

    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    pub fn failing_ping(mut self) -> Self {
        self.failing_ping = true;
        self
    }

    pub fn connect_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.connects)
    }
}

impl ScanBackend for FakeBackend {
    type Connection = FakeConnection;

    fn connect(&self, endpoint: &Endpoint) -> Result<FakeConnection, ScanError> {
        if self.unreachable {
            return Err(ScanError::Connection(format!(
                "Failed to connect to ClamAV at {endpoint}: connection refused"
            )));
        }
        let id = self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(FakeConnection { id })
    }

    fn ping(&self, _connection: &mut FakeConnection) -> Result<bool, ScanError> {
        Ok(!self.failing_ping)
    }

    fn file_scan(
        &self,
        _connection: &mut FakeConnection,
        path: &Path,
    ) -> Result<ScanVerdict, ScanError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        match self.replies.get(&name).copied().unwrap_or(Reply::Clean) {
            Reply::Clean => Ok(ScanVerdict::Clean),
            Reply::Infected => Ok(ScanVerdict::Infected("Eicar-Test-Signature".to_string())),
            Reply::Unrecognized => Ok(ScanVerdict::Unrecognized("stream: ERROR".to_string())),
            Reply::Hang(delay) => {
                std::thread::sleep(delay);
                Ok(ScanVerdict::Clean)
            }
            Reply::FailTimes(times) => {
                let mut failures = self.failures.lock().unwrap();
                let seen = failures.entry(name).or_insert(0);
                if *seen < times {
                    *seen += 1;
                    Err(ScanError::Io(std::io::Error::from(
                        std::io::ErrorKind::ConnectionReset,
                    )))
                } else {
                    Ok(ScanVerdict::Clean)
                }
            }
        }
    }
}
