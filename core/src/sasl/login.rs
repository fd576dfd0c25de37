/*
 * login.rs
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

//! Legacy LOGIN SASL: the server prompts `Username:` then `Password:`.

use super::{Credentials, SaslError, SaslProvider};

pub struct LoginSasl {
    credentials: Credentials,
    sent_user: bool,
}

impl LoginSasl {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            sent_user: false,
        }
    }
}

impl SaslProvider for LoginSasl {
    fn mechanism(&self) -> &str {
        "LOGIN"
    }

    fn start(&mut self) -> Result<Option<Vec<u8>>, SaslError> {
        Ok(None)
    }

    fn respond(&mut self, challenge: &[u8]) -> Result<Vec<u8>, SaslError> {
        let prompt = String::from_utf8_lossy(challenge).to_lowercase();
        if prompt.contains("username") || (!self.sent_user && prompt.is_empty()) {
            self.sent_user = true;
            Ok(self.credentials.user_name.clone().into_bytes())
        } else if prompt.contains("password") || self.sent_user {
            Ok(self.credentials.password.clone().into_bytes())
        } else {
            Err(SaslError::new("unexpected LOGIN challenge"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> LoginSasl {
        LoginSasl::new(Credentials {
            authorization_name: String::new(),
            user_name: "joe".into(),
            password: "secret".into(),
        })
    }

    #[test]
    fn answers_the_two_prompts_in_order() {
        let mut sasl = provider();
        assert_eq!(sasl.start().unwrap(), None);
        assert_eq!(sasl.respond(b"Username:").unwrap(), b"joe".to_vec());
        assert_eq!(sasl.respond(b"Password:").unwrap(), b"secret".to_vec());
    }

    #[test]
    fn rejects_an_unknown_first_prompt() {
        let mut sasl = provider();
        assert!(sasl.respond(b"what is this").is_err());
    }
}
