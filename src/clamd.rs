// SPDX-FileCopyrightText: 2025-2026 TII (SSRC) and the Ghaf contributors
// SPDX-License-Identifier: Apache-2.0

//! `ClamAV` daemon client over TCP.
//!
//! Files are sent with INSTREAM, so the daemon never needs access to the
//! scanned filesystem. clamd closes a non-session connection after each
//! reply, so every command opens its own stream to the remembered address.

use std::fs::File;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

use log::{debug, error, warn};

use crate::backend::{Endpoint, ScanBackend, ScanVerdict};
use crate::error::ScanError;

/// Default TCP connect timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default per-read/per-write timeout, same as the default per-file scan
/// timeout so a slow verdict surfaces as a timeout rather than an I/O error
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(120);

/// Default INSTREAM chunk size
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Buffer size for ping response
const PING_BUFFER_SIZE: u64 = 64;

/// Buffer size for scan response
const SCAN_RESPONSE_BUFFER_SIZE: u64 = 4096;

/// `ClamAV` scanner speaking the clamd TCP protocol.
#[derive(Debug, Clone)]
pub struct ClamdBackend {
    connect_timeout: Duration,
    io_timeout: Option<Duration>,
    chunk_size: usize,
}

/// Resolved clamd address plus socket timeouts.
#[derive(Debug, Clone)]
pub struct ClamdConnection {
    addr: SocketAddr,
    io_timeout: Option<Duration>,
}

impl Default for ClamdBackend {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            io_timeout: Some(DEFAULT_IO_TIMEOUT),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl ClamdBackend {
    /// `io_timeout` bounds each socket read and write; `None` waits forever.
    #[must_use]
    pub const fn new(connect_timeout: Duration, io_timeout: Option<Duration>) -> Self {
        Self {
            connect_timeout,
            io_timeout,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    #[must_use]
    pub const fn io_timeout(&self) -> Option<Duration> {
        self.io_timeout
    }

    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = if chunk_size == 0 { 1 } else { chunk_size };
        self
    }

    fn open(&self, connection: &ClamdConnection) -> std::io::Result<TcpStream> {
        let stream = TcpStream::connect_timeout(&connection.addr, self.connect_timeout)?;
        stream.set_read_timeout(connection.io_timeout)?;
        stream.set_write_timeout(connection.io_timeout)?;
        Ok(stream)
    }

    fn read_reply(stream: &mut TcpStream, limit: u64) -> std::io::Result<String> {
        let mut buf = Vec::new();
        stream.take(limit).read_to_end(&mut buf)?;
        Ok(String::from_utf8_lossy(&buf)
            .trim_matches('\0')
            .trim()
            .to_string())
    }

    fn send_ping(&self, connection: &ClamdConnection) -> std::io::Result<String> {
        let mut stream = self.open(connection)?;
        stream.write_all(b"zPING\0")?;
        Self::read_reply(&mut stream, PING_BUFFER_SIZE)
    }

    /// Stream a file with INSTREAM: `<u32 BE size><data>` chunks, then a
    /// zero-length chunk as end marker.
    fn send_stream_for_scan(
        &self,
        connection: &ClamdConnection,
        file: &mut File,
    ) -> std::io::Result<String> {
        let mut stream = self.open(connection)?;
        stream.write_all(b"zINSTREAM\0")?;

        let mut buf = vec![0u8; self.chunk_size];
        let mut total: u64 = 0;
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            let len = u32::try_from(n).unwrap_or(u32::MAX);
            stream.write_all(&len.to_be_bytes())?;
            stream.write_all(&buf[..n])?;
            total += n as u64;
        }

        stream.write_all(&[0, 0, 0, 0])?;
        debug!("INSTREAM sent {total} bytes");

        Self::read_reply(&mut stream, SCAN_RESPONSE_BUFFER_SIZE)
    }

    /// Parse a clamd reply into a verdict.
    #[must_use]
    pub fn parse_response(response: &str, name_for_logging: &str) -> ScanVerdict {
        if response.ends_with("OK") {
            debug!("Clean: {name_for_logging}");
            return ScanVerdict::Clean;
        }

        if response.ends_with("FOUND") {
            let signature = response
                .rsplit_once(": ")
                .map_or("unknown", |(_, s)| s.trim_end_matches(" FOUND"));
            warn!("Virus in {name_for_logging}: {signature}");
            return ScanVerdict::Infected(signature.to_string());
        }

        if response.ends_with("ERROR") {
            error!("ClamAV error for {name_for_logging}: {response}");
        } else {
            error!("Unexpected ClamAV response: {response}");
        }
        ScanVerdict::Unrecognized(response.to_string())
    }
}

impl ScanBackend for ClamdBackend {
    type Connection = ClamdConnection;

    fn connect(&self, endpoint: &Endpoint) -> Result<ClamdConnection, ScanError> {
        let addr = (endpoint.host(), endpoint.port())
            .to_socket_addrs()
            .map_err(|e| ScanError::Connection(format!("Failed to resolve {endpoint}: {e}")))?
            .next()
            .ok_or_else(|| ScanError::Connection(format!("No address found for {endpoint}")))?;

        let connection = ClamdConnection {
            addr,
            io_timeout: self.io_timeout,
        };

        self.open(&connection).map_err(|e| {
            ScanError::Connection(format!("Failed to connect to ClamAV at {endpoint}: {e}"))
        })?;

        debug!("ClamAV reachable at {addr}");
        Ok(connection)
    }

    fn ping(&self, connection: &mut ClamdConnection) -> Result<bool, ScanError> {
        let response = self.send_ping(connection)?;
        if response == "PONG" {
            Ok(true)
        } else {
            warn!("Unexpected ClamAV ping response: {response}");
            Ok(false)
        }
    }

    fn file_scan(
        &self,
        connection: &mut ClamdConnection,
        path: &Path,
    ) -> Result<ScanVerdict, ScanError> {
        debug!("ClamAV scanning path: {}", path.display());

        let mut file = File::open(path)?;
        let response = self.send_stream_for_scan(connection, &mut file)?;
        if response.is_empty() {
            return Err(ScanError::Protocol(
                "empty reply to INSTREAM".to_string(),
            ));
        }

        Ok(Self::parse_response(&response, &path.display().to_string()))
    }
}
