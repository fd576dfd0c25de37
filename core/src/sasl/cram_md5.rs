/*
 * cram_md5.rs
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

//! CRAM-MD5 (RFC 2195): HMAC-MD5 over the server timestamp challenge.

use super::{Credentials, SaslError, SaslProvider};
use hmac::Mac;

type HmacMd5 = hmac::Hmac<md5::Md5>;

fn bytes_to_hex(b: &[u8]) -> String {
    const HEX: &[u8] = b"0123456789abcdef";
    let mut s = String::with_capacity(b.len() * 2);
    for &x in b {
        s.push(HEX[(x >> 4) as usize] as char);
        s.push(HEX[(x & 15) as usize] as char);
    }
    s
}

pub struct CramMd5Sasl {
    credentials: Credentials,
}

impl CramMd5Sasl {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }
}

impl SaslProvider for CramMd5Sasl {
    fn mechanism(&self) -> &str {
        "CRAM-MD5"
    }

    fn start(&mut self) -> Result<Option<Vec<u8>>, SaslError> {
        Ok(None)
    }

    fn respond(&mut self, challenge: &[u8]) -> Result<Vec<u8>, SaslError> {
        let mut mac = HmacMd5::new_from_slice(self.credentials.password.as_bytes())
            .map_err(|_| SaslError::new("empty CRAM-MD5 key"))?;
        mac.update(challenge);
        let digest = mac.finalize().into_bytes();
        let response = format!("{} {}", self.credentials.user_name, bytes_to_hex(&digest));
        Ok(response.into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn produces_the_rfc_2195_example_digest() {
        // The worked example from RFC 2195 §2.
        let mut sasl = CramMd5Sasl::new(Credentials {
            authorization_name: String::new(),
            user_name: "tim".into(),
            password: "tanstaaftanstaaf".into(),
        });
        let response = sasl
            .respond(b"<1896.697170952@postoffice.reston.mci.net>")
            .unwrap();
        assert_eq!(
            response,
            b"tim b913a602c7eda7a495b4e6e7334d3890".to_vec()
        );
    }
}
