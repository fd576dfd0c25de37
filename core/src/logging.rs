/*
 * logging.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Postino, an asynchronous IMAP client library.
 *
 * Postino is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Postino is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Postino.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Traffic and timing observability, enabled through environment
//! variables and kept strictly apart from protocol state: a sink that
//! fails to write never affects the session.
//!
//! - `KIMAP2_LOGFILE`: per-session traffic log file (path gets a pid and
//!   session counter suffix).
//! - `KIMAP2_TRAFFIC`: dump sent/received lines to stderr.
//! - `KIMAP2_TIMING`: account parse time against socket wait time per
//!   read and report the totals when the session ends.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

pub const LOGFILE_ENV: &str = "KIMAP2_LOGFILE";
pub const TRAFFIC_ENV: &str = "KIMAP2_TRAFFIC";
pub const TIMING_ENV: &str = "KIMAP2_TIMING";

static SESSION_COUNTER: AtomicU32 = AtomicU32::new(0);

/// File sink for one session's traffic. Write errors are swallowed.
pub struct SessionLogger {
    file: File,
}

impl SessionLogger {
    /// Open the sink when `KIMAP2_LOGFILE` is set; `None` otherwise or on
    /// open failure (which is logged, not propagated).
    pub fn from_env() -> Option<Self> {
        let base = std::env::var(LOGFILE_ENV).ok()?;
        if base.is_empty() {
            return None;
        }
        let id = SESSION_COUNTER.fetch_add(1, Ordering::Relaxed);
        let path = format!("{}.{}.{}", base, std::process::id(), id);
        match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => Some(Self { file }),
            Err(e) => {
                log::warn!("cannot open traffic log {}: {}", path, e);
                None
            }
        }
    }

    fn write_direction(&mut self, prefix: &str, data: &[u8]) {
        let _ = self.file.write_all(prefix.as_bytes());
        let _ = self.file.write_all(data);
        if !data.ends_with(b"\n") {
            let _ = self.file.write_all(b"\n");
        }
    }

    pub fn data_sent(&mut self, data: &[u8]) {
        self.write_direction("C: ", data);
    }

    pub fn data_received(&mut self, data: &[u8]) {
        self.write_direction("S: ", data);
    }

    pub fn disconnected(&mut self) {
        let _ = self.file.write_all(b"X disconnected\n");
        let _ = self.file.flush();
    }
}

pub fn traffic_dump_enabled() -> bool {
    std::env::var_os(TRAFFIC_ENV).is_some_and(|v| !v.is_empty())
}

/// Accumulates time spent waiting on the socket against time spent
/// parsing, per read.
#[derive(Default)]
pub struct TimingStats {
    wait: Duration,
    processing: Duration,
    reads: u64,
}

impl TimingStats {
    pub fn from_env() -> Option<Self> {
        std::env::var_os(TIMING_ENV)
            .filter(|v| !v.is_empty())
            .map(|_| Self::default())
    }

    pub fn record(&mut self, wait: Duration, processing: Duration) {
        self.wait += wait;
        self.processing += processing;
        self.reads += 1;
    }

    pub fn report(&self) {
        log::info!(
            "session timing over {} reads: waited {:?}, parsed {:?}",
            self.reads,
            self.wait,
            self.processing
        );
    }
}
