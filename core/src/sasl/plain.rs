/*
 * plain.rs
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

//! PLAIN SASL (RFC 4616). Requires TLS in practice.

use super::Credentials;

/// Build the PLAIN message: authzid NUL authcid NUL password, UTF-8.
/// The caller base64-encodes it for the wire.
pub fn encode_plain(credentials: &Credentials) -> Vec<u8> {
    format!(
        "{}\0{}\0{}",
        credentials.authorization_name, credentials.user_name, credentials.password
    )
    .into_bytes()
}
