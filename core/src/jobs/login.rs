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

//! The login job: connection security plus authentication as one
//! compound state machine.
//!
//! The session structure is always: connect, greeting, authenticate. How
//! we get there depends on the requested encryption:
//!
//! * plain connection: wait for the greeting, fetch CAPABILITY, log in;
//! * implicit TLS: handshake immediately, then greeting (over TLS),
//!   CAPABILITY, log in;
//! * STARTTLS: greeting in the clear, STARTTLS, handshake, CAPABILITY,
//!   log in.
//!
//! Capabilities are only fetched (and therefore only trusted) once the
//! requested encryption is in place. For STARTTLS the job never acts on
//! the tagged OK alone; it waits for the TLS handshake outcome the
//! session reports back.

use crate::encoder::CommandArg;
use crate::error::Error;
use crate::job::{Job, JobContext};
use crate::message::Message;
use crate::sasl::{self, encode_plain, Credentials, SaslProvider};
use crate::session::{Session, SessionState};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use tokio::sync::oneshot;

/// Connection security requested from the login job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionMode {
    /// No TLS at all.
    None,
    /// Implicit TLS: handshake immediately after connect (port 993).
    Tls,
    /// STARTTLS upgrade after the greeting.
    StartTls,
}

/// How to present credentials once the connection is set up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthenticationMode {
    /// `LOGIN "user" "pass"`. Refused when the server advertises
    /// LOGINDISABLED.
    ClearText,
    /// `AUTHENTICATE PLAIN` with the RFC 4616 message on the first
    /// continuation. Always attempted: some servers under-report the
    /// AUTH=PLAIN capability.
    Plain,
    /// Any other SASL mechanism, served by a built-in or caller-supplied
    /// provider. Requires a matching `AUTH=` capability.
    Sasl(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuthState {
    StartTls,
    Capability,
    Login,
    Authenticate,
}

pub struct LoginJob {
    credentials: Credentials,
    encryption: EncryptionMode,
    auth_mode: AuthenticationMode,
    provider: Option<Box<dyn SaslProvider>>,
    auth_state: AuthState,
    capabilities: Vec<String>,
    plain_login_disabled: bool,
    started: bool,
    tags: Vec<String>,
    reply: Option<oneshot::Sender<Result<(), Error>>>,
}

impl LoginJob {
    pub fn new(user_name: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            credentials: Credentials {
                authorization_name: String::new(),
                user_name: user_name.into(),
                password: password.into(),
            },
            encryption: EncryptionMode::None,
            auth_mode: AuthenticationMode::ClearText,
            provider: None,
            auth_state: AuthState::Login,
            capabilities: Vec::new(),
            plain_login_disabled: false,
            started: false,
            tags: Vec::new(),
            reply: None,
        }
    }

    pub fn set_encryption_mode(&mut self, mode: EncryptionMode) {
        self.encryption = mode;
    }

    pub fn set_authentication_mode(&mut self, mode: AuthenticationMode) {
        self.auth_mode = mode;
    }

    /// RFC 4616 authorization identity, for PLAIN proxy authentication.
    pub fn set_authorization_name(&mut self, name: impl Into<String>) {
        self.credentials.authorization_name = name.into();
    }

    /// Provider for an [`AuthenticationMode::Sasl`] mechanism without a
    /// built-in implementation.
    pub fn set_sasl_provider(&mut self, provider: Box<dyn SaslProvider>) {
        self.provider = Some(provider);
    }

    pub async fn run(mut self, session: &Session) -> Result<(), Error> {
        let (tx, rx) = oneshot::channel();
        self.reply = Some(tx);
        session.run_job(Box::new(self), rx).await
    }

    fn command_name(&self) -> &'static str {
        match self.auth_state {
            AuthState::StartTls => "StartTls",
            AuthState::Capability => "Capability",
            _ => "Login",
        }
    }

    fn finish(&mut self, ctx: &mut JobContext<'_>, result: Result<(), Error>) {
        if let Some(tx) = self.reply.take() {
            let _ = tx.send(result);
        }
        ctx.complete();
    }

    fn fail(&mut self, ctx: &mut JobContext<'_>, error: Error) {
        self.provider = None;
        self.finish(ctx, Err(error));
    }

    fn login(&mut self, ctx: &mut JobContext<'_>) {
        self.started = true;
        if matches!(
            ctx.state(),
            SessionState::Authenticated | SessionState::Selected
        ) {
            self.fail(
                ctx,
                Error::LoginFailed("session is already authenticated".into()),
            );
            return;
        }
        match self.encryption {
            EncryptionMode::StartTls => {
                self.auth_state = AuthState::StartTls;
                let tag = ctx.send_command("STARTTLS", b"");
                self.tags.push(tag);
            }
            EncryptionMode::None => self.retrieve_capabilities(ctx),
            // Implicit TLS: capabilities follow the handshake result.
            EncryptionMode::Tls => {}
        }
    }

    fn retrieve_capabilities(&mut self, ctx: &mut JobContext<'_>) {
        self.auth_state = AuthState::Capability;
        let tag = ctx.send_command("CAPABILITY", b"");
        self.tags.push(tag);
    }

    fn authenticate(&mut self, ctx: &mut JobContext<'_>) {
        match self.auth_mode.clone() {
            AuthenticationMode::ClearText => {
                if self.plain_login_disabled {
                    self.fail(
                        ctx,
                        Error::LoginFailed("plain login is disabled by the server".into()),
                    );
                    return;
                }
                self.auth_state = AuthState::Login;
                let tag = ctx.send_command_args(
                    "LOGIN",
                    &[
                        CommandArg::string(self.credentials.user_name.clone()),
                        CommandArg::string(self.credentials.password.clone()),
                    ],
                );
                self.tags.push(tag);
            }
            AuthenticationMode::Plain => {
                self.auth_state = AuthState::Authenticate;
                let tag = ctx.send_command("AUTHENTICATE", b"PLAIN");
                self.tags.push(tag);
            }
            AuthenticationMode::Sasl(mechanism) => {
                let mechanism = mechanism.to_uppercase();
                let supported = self
                    .capabilities
                    .iter()
                    .any(|c| c.strip_prefix("AUTH=") == Some(mechanism.as_str()));
                if !supported {
                    self.fail(
                        ctx,
                        Error::LoginFailed(format!(
                            "authentication mode {} is not supported by the server",
                            mechanism
                        )),
                    );
                    return;
                }
                if self.provider.is_none() {
                    self.provider = sasl::provider_for(&mechanism, &self.credentials);
                }
                let Some(provider) = self.provider.as_mut() else {
                    self.fail(
                        ctx,
                        Error::LoginFailed(format!("no SASL provider for {}", mechanism)),
                    );
                    return;
                };
                let initial = if self.capabilities.iter().any(|c| c == "SASL-IR") {
                    match provider.start() {
                        Ok(initial) => initial,
                        Err(e) => {
                            self.fail(ctx, Error::LoginFailed(e.to_string()));
                            return;
                        }
                    }
                } else {
                    None
                };
                self.auth_state = AuthState::Authenticate;
                let args = match initial {
                    Some(data) => format!("{} {}", mechanism, BASE64.encode(data)),
                    None => mechanism,
                };
                let tag = ctx.send_command("AUTHENTICATE", args.as_bytes());
                self.tags.push(tag);
            }
        }
    }

    fn continuation(&mut self, response: &Message, ctx: &mut JobContext<'_>) {
        if self.auth_state != AuthState::Authenticate {
            self.fail(
                ctx,
                Error::LoginFailed(format!(
                    "{} failed, malformed reply from the server",
                    self.command_name()
                )),
            );
            return;
        }
        match &self.auth_mode {
            AuthenticationMode::Plain => {
                if response.content.get(1).map(|p| p.as_string()) == Some(b"OK") {
                    return;
                }
                let payload = encode_plain(&self.credentials);
                ctx.send_data(BASE64.encode(payload).into_bytes());
            }
            AuthenticationMode::Sasl(_) => {
                let challenge_b64 = response
                    .content
                    .get(1)
                    .map(|p| p.as_string().to_vec())
                    .unwrap_or_default();
                let challenge = match BASE64.decode(challenge_b64) {
                    Ok(challenge) => challenge,
                    Err(_) => {
                        self.fail(
                            ctx,
                            Error::LoginFailed("server challenge is not valid base64".into()),
                        );
                        return;
                    }
                };
                let Some(provider) = self.provider.as_mut() else {
                    self.fail(ctx, Error::LoginFailed("no SASL exchange in progress".into()));
                    return;
                };
                match provider.respond(&challenge) {
                    Ok(answer) => ctx.send_data(BASE64.encode(answer).into_bytes()),
                    Err(e) => self.fail(ctx, Error::LoginFailed(e.to_string())),
                }
            }
            AuthenticationMode::ClearText => {
                self.fail(
                    ctx,
                    Error::LoginFailed("unexpected continuation from the server".into()),
                );
            }
        }
    }

    fn save_server_greeting(&mut self, response: &Message, ctx: &mut JobContext<'_>) {
        let greeting = response.flatten_from(2);
        if !greeting.is_empty() {
            ctx.set_server_greeting(greeting);
        }
    }
}

impl Job for LoginJob {
    fn name(&self) -> &'static str {
        "Login"
    }

    fn wants_encryption(&self) -> bool {
        self.encryption != EncryptionMode::None
    }

    fn user_name(&self) -> Option<&str> {
        Some(&self.credentials.user_name)
    }

    fn start(&mut self, ctx: &mut JobContext<'_>) {
        if ctx.state() == SessionState::Disconnected {
            if self.encryption == EncryptionMode::Tls {
                // The greeting itself arrives over TLS.
                ctx.start_tls();
            }
            // Wait for the greeting; state_changed picks this up.
            return;
        }
        self.login(ctx);
    }

    fn state_changed(
        &mut self,
        new: SessionState,
        old: SessionState,
        ctx: &mut JobContext<'_>,
    ) {
        if old == SessionState::Disconnected && new != SessionState::Disconnected && !self.started
        {
            self.login(ctx);
        }
    }

    fn encryption_result(&mut self, ok: bool, ctx: &mut JobContext<'_>) {
        if ok {
            self.retrieve_capabilities(ctx);
        } else {
            self.fail(
                ctx,
                Error::SslHandshakeFailed("TLS negotiation failed".into()),
            );
        }
    }

    fn handle_response(&mut self, response: &Message, ctx: &mut JobContext<'_>) {
        if response.content.is_empty() {
            return;
        }
        let tag = response.tag().to_vec();

        if tag == b"+" {
            self.continuation(response, ctx);
            return;
        }
        if tag == b"*" {
            if response.content.len() < 2 {
                self.fail(
                    ctx,
                    Error::LoginFailed(format!(
                        "{} failed, malformed reply from the server",
                        self.command_name()
                    )),
                );
                return;
            }
            // The only untagged response of interest here is CAPABILITY.
            if response.code() == b"CAPABILITY" {
                for part in response.content.iter().skip(2) {
                    let capability =
                        String::from_utf8_lossy(part.as_string()).to_uppercase();
                    if capability == "LOGINDISABLED" {
                        self.plain_login_disabled = true;
                    }
                    self.capabilities.push(capability);
                }
                log::info!("capabilities updated: {:?}", self.capabilities);
            }
            return;
        }
        if !self.tags.iter().any(|t| t.as_bytes() == tag.as_slice()) {
            return;
        }
        self.tags.retain(|t| t.as_bytes() != tag.as_slice());

        if response.content.len() < 2 {
            self.fail(
                ctx,
                Error::LoginFailed(format!(
                    "{} failed, malformed reply from the server",
                    self.command_name()
                )),
            );
            return;
        }
        if response.code() != b"OK" {
            let name = self.command_name();
            self.fail(
                ctx,
                Error::LoginFailed(format!(
                    "{} failed, server replied: {}",
                    name,
                    response.to_flat_string()
                )),
            );
            return;
        }

        match self.auth_state {
            AuthState::StartTls => {
                // Only the handshake result decides; see encryption_result.
                ctx.start_tls();
            }
            AuthState::Capability => self.authenticate(ctx),
            AuthState::Authenticate | AuthState::Login => {
                self.provider = None;
                self.save_server_greeting(response, ctx);
                self.finish(ctx, Ok(()));
            }
        }
    }

    fn connection_lost(&mut self, error: Error) {
        let mapped = match error {
            Error::ConnectionLost(m) => Error::CouldNotConnect(m),
            other => other,
        };
        if let Some(tx) = self.reply.take() {
            let _ = tx.send(Err(mapped));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Action;
    use crate::parser::StreamParser;

    fn msg(line: &str) -> Message {
        let mut parser = StreamParser::for_messages();
        parser.feed(line.as_bytes()).unwrap();
        parser.feed(b"\r\n").unwrap();
        parser.next_message().expect("one message")
    }

    struct Harness {
        tag_count: u32,
        job: LoginJob,
        rx: oneshot::Receiver<Result<(), Error>>,
    }

    impl Harness {
        fn new(configure: impl FnOnce(&mut LoginJob)) -> Self {
            let mut job = LoginJob::new("user", "password");
            configure(&mut job);
            let (tx, rx) = oneshot::channel();
            job.reply = Some(tx);
            Self {
                tag_count: 0,
                job,
                rx,
            }
        }

        fn call(
            &mut self,
            state: SessionState,
            f: impl FnOnce(&mut LoginJob, &mut JobContext<'_>),
        ) -> Vec<Action> {
            let mut actions = Vec::new();
            let mut ctx = JobContext {
                state,
                tag_count: &mut self.tag_count,
                actions: &mut actions,
            };
            f(&mut self.job, &mut ctx);
            actions
        }

        fn result(mut self) -> Result<(), Error> {
            self.rx.try_recv().expect("job resolved")
        }
    }

    fn command_line(actions: &[Action]) -> String {
        for action in actions {
            if let Action::Command { chunks, .. } = action {
                if let Some(crate::encoder::WriteChunk::Data(bytes)) = chunks.first() {
                    return String::from_utf8_lossy(bytes).trim_end().to_string();
                }
            }
        }
        panic!("no command in actions");
    }

    fn has_complete(actions: &[Action]) -> bool {
        actions.iter().any(|a| matches!(a, Action::Complete))
    }

    #[test]
    fn plain_connection_goes_capability_then_login() {
        let mut h = Harness::new(|_| {});
        let actions = h.call(SessionState::NotAuthenticated, |job, ctx| job.start(ctx));
        assert_eq!(command_line(&actions), "A000001 CAPABILITY");

        let actions = h.call(SessionState::NotAuthenticated, |job, ctx| {
            job.handle_response(&msg("* CAPABILITY IMAP4rev1 AUTH=PLAIN"), ctx)
        });
        assert!(actions.is_empty());

        let actions = h.call(SessionState::NotAuthenticated, |job, ctx| {
            job.handle_response(&msg("A000001 OK done"), ctx)
        });
        assert_eq!(command_line(&actions), "A000002 LOGIN \"user\" \"password\"");

        let actions = h.call(SessionState::NotAuthenticated, |job, ctx| {
            job.handle_response(&msg("A000002 OK Welcome, user"), ctx)
        });
        assert!(has_complete(&actions));
        assert!(h.result().is_ok());
    }

    #[test]
    fn starttls_waits_for_the_handshake_result() {
        let mut h = Harness::new(|job| {
            job.set_encryption_mode(EncryptionMode::StartTls);
        });
        let actions = h.call(SessionState::Disconnected, |job, ctx| job.start(ctx));
        assert!(actions.is_empty());

        let actions = h.call(SessionState::NotAuthenticated, |job, ctx| {
            job.state_changed(
                SessionState::NotAuthenticated,
                SessionState::Disconnected,
                ctx,
            )
        });
        assert_eq!(command_line(&actions), "A000001 STARTTLS");

        // The tagged OK must only trigger the handshake, nothing more.
        let actions = h.call(SessionState::NotAuthenticated, |job, ctx| {
            job.handle_response(&msg("A000001 OK begin TLS"), ctx)
        });
        assert!(actions.iter().any(|a| matches!(a, Action::StartTls)));
        assert!(!actions
            .iter()
            .any(|a| matches!(a, Action::Command { .. })));

        let actions = h.call(SessionState::NotAuthenticated, |job, ctx| {
            job.encryption_result(true, ctx)
        });
        assert_eq!(command_line(&actions), "A000002 CAPABILITY");
    }

    #[test]
    fn implicit_tls_requests_the_handshake_before_the_greeting() {
        let mut h = Harness::new(|job| {
            job.set_encryption_mode(EncryptionMode::Tls);
        });
        let actions = h.call(SessionState::Disconnected, |job, ctx| job.start(ctx));
        assert!(actions.iter().any(|a| matches!(a, Action::StartTls)));

        let actions = h.call(SessionState::Disconnected, |job, ctx| {
            job.encryption_result(true, ctx)
        });
        assert_eq!(command_line(&actions), "A000001 CAPABILITY");
    }

    #[test]
    fn plain_mechanism_answers_the_continuation() {
        let mut h = Harness::new(|job| {
            job.set_authentication_mode(AuthenticationMode::Plain);
        });
        h.call(SessionState::NotAuthenticated, |job, ctx| job.start(ctx));
        h.call(SessionState::NotAuthenticated, |job, ctx| {
            job.handle_response(&msg("* CAPABILITY IMAP4rev1"), ctx)
        });
        let actions = h.call(SessionState::NotAuthenticated, |job, ctx| {
            job.handle_response(&msg("A000001 OK done"), ctx)
        });
        assert_eq!(command_line(&actions), "A000002 AUTHENTICATE PLAIN");

        let actions = h.call(SessionState::NotAuthenticated, |job, ctx| {
            job.handle_response(&msg("+ "), ctx)
        });
        let Some(Action::Data(line)) = actions.first() else {
            panic!("expected a data line");
        };
        assert_eq!(
            line.as_slice(),
            BASE64.encode(b"\0user\0password").as_bytes()
        );

        let actions = h.call(SessionState::NotAuthenticated, |job, ctx| {
            job.handle_response(&msg("A000002 OK authenticated"), ctx)
        });
        assert!(has_complete(&actions));
        assert!(h.result().is_ok());
    }

    #[test]
    fn logindisabled_blocks_cleartext_before_credentials_are_sent() {
        let mut h = Harness::new(|_| {});
        h.call(SessionState::NotAuthenticated, |job, ctx| job.start(ctx));
        h.call(SessionState::NotAuthenticated, |job, ctx| {
            job.handle_response(&msg("* CAPABILITY IMAP4rev1 LOGINDISABLED"), ctx)
        });
        let actions = h.call(SessionState::NotAuthenticated, |job, ctx| {
            job.handle_response(&msg("A000001 OK done"), ctx)
        });
        assert!(has_complete(&actions));
        assert!(!actions
            .iter()
            .any(|a| matches!(a, Action::Command { .. })));
        assert!(matches!(h.result(), Err(Error::LoginFailed(_))));
    }

    #[test]
    fn missing_auth_capability_fails_before_authenticate() {
        let mut h = Harness::new(|job| {
            job.set_authentication_mode(AuthenticationMode::Sasl("CRAM-MD5".into()));
        });
        h.call(SessionState::NotAuthenticated, |job, ctx| job.start(ctx));
        h.call(SessionState::NotAuthenticated, |job, ctx| {
            job.handle_response(&msg("* CAPABILITY IMAP4rev1 AUTH=PLAIN"), ctx)
        });
        let actions = h.call(SessionState::NotAuthenticated, |job, ctx| {
            job.handle_response(&msg("A000001 OK done"), ctx)
        });
        assert!(has_complete(&actions));
        assert!(matches!(h.result(), Err(Error::LoginFailed(_))));
    }

    #[test]
    fn rejected_credentials_fail_the_job_with_the_server_text() {
        let mut h = Harness::new(|_| {});
        h.call(SessionState::NotAuthenticated, |job, ctx| job.start(ctx));
        h.call(SessionState::NotAuthenticated, |job, ctx| {
            job.handle_response(&msg("* CAPABILITY IMAP4rev1"), ctx)
        });
        h.call(SessionState::NotAuthenticated, |job, ctx| {
            job.handle_response(&msg("A000001 OK done"), ctx)
        });
        let actions = h.call(SessionState::NotAuthenticated, |job, ctx| {
            job.handle_response(&msg("A000002 NO [AUTHENTICATIONFAILED] bad password"), ctx)
        });
        assert!(has_complete(&actions));
        match h.result() {
            Err(Error::LoginFailed(text)) => assert!(text.contains("bad password")),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn final_ok_replaces_the_server_greeting() {
        let mut h = Harness::new(|_| {});
        h.call(SessionState::NotAuthenticated, |job, ctx| job.start(ctx));
        h.call(SessionState::NotAuthenticated, |job, ctx| {
            job.handle_response(&msg("A000001 OK done"), ctx)
        });
        let actions = h.call(SessionState::NotAuthenticated, |job, ctx| {
            job.handle_response(&msg("A000002 OK (welcome back) user"), ctx)
        });
        let greeting = actions.iter().find_map(|a| match a {
            Action::SetGreeting(g) => Some(g.clone()),
            _ => None,
        });
        assert_eq!(greeting, Some(b"(welcome back) user".to_vec()));
    }
}
