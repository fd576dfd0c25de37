/*
 * mod.rs
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

//! Client-side SASL.
//!
//! A [`SaslProvider`] is a stateful, session-owned challenge/response
//! machine: it never outlives the login that created it, so two sessions
//! can authenticate concurrently without sharing state. Built-in
//! providers cover LOGIN and CRAM-MD5; PLAIN needs no state machine and
//! is composed directly by the login job. Anything else can be supplied
//! by the caller through the same trait.
//!
//! Providers exchange raw octets; base64 wire framing is the login job's
//! concern.

mod cram_md5;
mod login;
mod plain;

pub use cram_md5::CramMd5Sasl;
pub use login::LoginSasl;
pub use plain::encode_plain;

#[derive(Debug)]
pub struct SaslError {
    pub message: String,
}

impl SaslError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            message: msg.into(),
        }
    }
}

impl std::fmt::Display for SaslError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for SaslError {}

/// Identity material handed to a provider.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    /// RFC 4616 authorization identity; usually empty.
    pub authorization_name: String,
    pub user_name: String,
    pub password: String,
}

/// One authentication exchange. Created per login attempt and dropped
/// with it.
pub trait SaslProvider: Send {
    /// Mechanism name as announced in `AUTH=` capabilities.
    fn mechanism(&self) -> &str;

    /// Initial client response for servers supporting SASL-IR; `None`
    /// when the mechanism waits for the first challenge.
    fn start(&mut self) -> Result<Option<Vec<u8>>, SaslError>;

    /// Answer one decoded server challenge.
    fn respond(&mut self, challenge: &[u8]) -> Result<Vec<u8>, SaslError>;
}

/// Built-in provider for the given mechanism name, if there is one.
pub fn provider_for(mechanism: &str, credentials: &Credentials) -> Option<Box<dyn SaslProvider>> {
    match mechanism.to_uppercase().as_str() {
        "LOGIN" => Some(Box::new(LoginSasl::new(credentials.clone()))),
        "CRAM-MD5" => Some(Box::new(CramMd5Sasl::new(credentials.clone()))),
        _ => None,
    }
}
