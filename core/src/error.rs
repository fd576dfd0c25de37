/*
 * error.rs
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

//! Error taxonomy for session and job failures.
//!
//! Connection-level failures (lost socket, TLS, timeout) abort the session
//! and are reported to every queued job; command-level failures (tagged NO
//! or BAD) are local to the job that issued the command.

use std::fmt;

/// Error reported by a session or a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Socket closed while work was outstanding.
    ConnectionLost(String),
    /// TCP connect failed before the greeting.
    CouldNotConnect(String),
    /// Hostname resolution failed.
    HostNotFound(String),
    /// TLS negotiation refused or broken.
    SslHandshakeFailed(String),
    /// Server rejected the credentials or the mechanism.
    LoginFailed(String),
    /// Tagged NO or BAD reply; carries the raw server text.
    CommandFailed { job: &'static str, text: String },
    /// The response stream is desynchronized; the session must be closed.
    ProtocolError(String),
    /// Idle watchdog expired after the given number of seconds.
    Timeout(i64),
}

impl Error {
    /// True for failures that terminate the whole session rather than a
    /// single command.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::CommandFailed { .. } | Error::LoginFailed(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ConnectionLost(m) => write!(f, "connection to server lost: {}", m),
            Error::CouldNotConnect(m) => write!(f, "could not connect to server: {}", m),
            Error::HostNotFound(m) => write!(f, "host not found: {}", m),
            Error::SslHandshakeFailed(m) => write!(f, "TLS handshake failed: {}", m),
            Error::LoginFailed(m) => write!(f, "login failed: {}", m),
            Error::CommandFailed { job, text } => {
                write!(f, "{} failed, server replied: {}", job, text)
            }
            Error::ProtocolError(m) => write!(f, "protocol error: {}", m),
            Error::Timeout(secs) => write!(f, "no activity on connection for {}s", secs),
        }
    }
}

impl std::error::Error for Error {}
