/*
 * job.rs
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

//! The contract every command implements.
//!
//! A job runs alone: the session starts the head of its queue, feeds it
//! every response until the job declares completion, then moves on. A job
//! may issue several sequential commands under its tenure (login does),
//! and talks back to the session exclusively through the [`JobContext`]
//! it is handed on each call; jobs never touch the socket.

use crate::codec;
use crate::encoder::{self, CommandArg, WriteChunk};
use crate::error::Error;
use crate::message::Message;
use crate::session::SessionState;
use tokio::sync::oneshot;

/// One high-level command.
pub trait Job: Send + 'static {
    /// Short name for logs and error text.
    fn name(&self) -> &'static str;

    /// True when the job must run before the greeting to set up
    /// encryption (implicit-TLS login).
    fn wants_encryption(&self) -> bool {
        false
    }

    /// The user this job authenticates, for the session's observer.
    fn user_name(&self) -> Option<&str> {
        None
    }

    /// The job became the running job; issue the initial command(s).
    fn start(&mut self, ctx: &mut JobContext<'_>);

    /// A response matching this job's tenure arrived (tagged, untagged or
    /// continuation).
    fn handle_response(&mut self, response: &Message, ctx: &mut JobContext<'_>);

    /// The session state moved (greeting received, select finished, ...).
    fn state_changed(
        &mut self,
        _new: SessionState,
        _old: SessionState,
        _ctx: &mut JobContext<'_>,
    ) {
    }

    /// Outcome of a requested TLS handshake.
    fn encryption_result(&mut self, _ok: bool, _ctx: &mut JobContext<'_>) {}

    /// The socket died while this job was queued or running. The job must
    /// resolve itself with the given error.
    fn connection_lost(&mut self, error: Error);
}

/// What a command means to the session state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TrackedCommand {
    /// LOGIN / AUTHENTICATE: an OK moves the session to Authenticated.
    Auth,
    /// SELECT / EXAMINE: an OK binds the mailbox, a failure unbinds it.
    Select { mailbox: String },
    /// CLOSE: an OK leaves the Selected state.
    Close,
    Other,
}

pub(crate) enum Action {
    Command {
        tag: String,
        tracked: TrackedCommand,
        chunks: Vec<WriteChunk>,
    },
    /// A raw line (SASL continuation data); CRLF is appended.
    Data(Vec<u8>),
    /// Ask the session to run the TLS handshake and report back through
    /// [`Job::encryption_result`].
    StartTls,
    /// Replace the stored server greeting.
    SetGreeting(Vec<u8>),
    /// The job is finished; the session moves on.
    Complete,
}

/// Session surface exposed to a running job.
pub struct JobContext<'a> {
    pub(crate) state: SessionState,
    pub(crate) tag_count: &'a mut u32,
    pub(crate) actions: &'a mut Vec<Action>,
}

impl JobContext<'_> {
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Send `COMMAND [SP args]` under a fresh tag; returns the tag.
    /// `args` must already be encoded (quoted, UTF-7, sets).
    pub fn send_command(&mut self, command: &str, args: &[u8]) -> String {
        let arg_list;
        let arg_slice: &[CommandArg] = if args.is_empty() {
            &[]
        } else {
            arg_list = [CommandArg::raw(args)];
            &arg_list
        };
        self.send_command_args(command, arg_slice)
    }

    /// Structured variant: string arguments are quoted or literal-framed
    /// by the encoder as their content requires.
    pub fn send_command_args(&mut self, command: &str, args: &[CommandArg]) -> String {
        *self.tag_count += 1;
        let tag = encoder::format_tag(*self.tag_count);
        let tracked = Self::track(command, args);
        let chunks = encoder::build_command(&tag, command, args);
        self.actions.push(Action::Command {
            tag: tag.clone(),
            tracked,
            chunks,
        });
        tag
    }

    /// Send a bare data line (a SASL continuation answer).
    pub fn send_data(&mut self, data: Vec<u8>) {
        self.actions.push(Action::Data(data));
    }

    pub fn start_tls(&mut self) {
        self.actions.push(Action::StartTls);
    }

    pub fn set_server_greeting(&mut self, greeting: Vec<u8>) {
        self.actions.push(Action::SetGreeting(greeting));
    }

    /// Declare completion. The job must already have resolved its reply
    /// channel.
    pub fn complete(&mut self) {
        self.actions.push(Action::Complete);
    }

    fn track(command: &str, args: &[CommandArg]) -> TrackedCommand {
        match command {
            "LOGIN" | "AUTHENTICATE" => TrackedCommand::Auth,
            "SELECT" | "EXAMINE" => TrackedCommand::Select {
                mailbox: mailbox_from_args(args),
            },
            "CLOSE" => TrackedCommand::Close,
            _ => TrackedCommand::Other,
        }
    }
}

/// Recover the mailbox a SELECT/EXAMINE names: first string argument, or
/// the first quoted token of raw args, decoded from modified UTF-7 with
/// INBOX canonicalized.
fn mailbox_from_args(args: &[CommandArg]) -> String {
    for arg in args {
        let bytes = match arg {
            CommandArg::String(b) | CommandArg::Literal(b) => b.clone(),
            CommandArg::Raw(b) => match first_quoted(b) {
                Some(inner) => inner,
                None => continue,
            },
        };
        let name = codec::decode_imap_folder_name(&bytes);
        return codec::canonicalize_inbox(&name, '/');
    }
    String::new()
}

fn first_quoted(raw: &[u8]) -> Option<Vec<u8>> {
    let start = raw.iter().position(|&b| b == b'"')? + 1;
    let mut out = Vec::new();
    let mut escape = false;
    for &b in &raw[start..] {
        if escape {
            out.push(b);
            escape = false;
        } else if b == b'\\' {
            escape = true;
        } else if b == b'"' {
            return Some(out);
        } else {
            out.push(b);
        }
    }
    None
}

/// What [`handle_error_replies`] concluded about a response.
pub enum ReplyOutcome {
    /// Not addressed to this job; look at it yourself.
    NotOurs,
    /// One of our tags was retired but others are outstanding.
    InProgress,
    /// The last outstanding tag was retired (or one failed).
    Finished(Result<(), Error>),
}

/// Generic tagged-terminator handling: status `OK` completes the command
/// successfully, any other status fails it with the raw server text.
pub fn handle_error_replies(
    name: &'static str,
    tags: &mut Vec<String>,
    response: &Message,
) -> ReplyOutcome {
    let tag = response.tag();
    if tag.is_empty() || !tags.iter().any(|t| t.as_bytes() == tag) {
        return ReplyOutcome::NotOurs;
    }
    tags.retain(|t| t.as_bytes() != tag);
    if response.content.len() < 2 {
        return ReplyOutcome::Finished(Err(Error::CommandFailed {
            job: name,
            text: "malformed reply from the server".into(),
        }));
    }
    if response.code() != b"OK" {
        return ReplyOutcome::Finished(Err(Error::CommandFailed {
            job: name,
            text: response.to_flat_string(),
        }));
    }
    if tags.is_empty() {
        ReplyOutcome::Finished(Ok(()))
    } else {
        ReplyOutcome::InProgress
    }
}

/// Resolve a job's completion future; a dropped sender means the session
/// terminated before the job could finish.
pub(crate) async fn await_reply<T>(rx: oneshot::Receiver<Result<T, Error>>) -> Result<T, Error> {
    match rx.await {
        Ok(result) => result,
        Err(_) => Err(Error::ConnectionLost(
            "session terminated before the job completed".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Part;

    fn tagged(tag: &str, code: &str, rest: &str) -> Message {
        Message {
            content: vec![
                Part::String(tag.as_bytes().to_vec()),
                Part::String(code.as_bytes().to_vec()),
                Part::String(rest.as_bytes().to_vec()),
            ],
            response_code: Vec::new(),
        }
    }

    #[test]
    fn ok_reply_finishes_the_job() {
        let mut tags = vec!["A000001".to_string()];
        let outcome = handle_error_replies("Delete", &mut tags, &tagged("A000001", "OK", "done"));
        assert!(matches!(outcome, ReplyOutcome::Finished(Ok(()))));
        assert!(tags.is_empty());
    }

    #[test]
    fn no_reply_fails_with_server_text() {
        let mut tags = vec!["A000001".to_string()];
        let outcome = handle_error_replies("Delete", &mut tags, &tagged("A000001", "NO", "nope"));
        match outcome {
            ReplyOutcome::Finished(Err(Error::CommandFailed { job, text })) => {
                assert_eq!(job, "Delete");
                assert!(text.contains("nope"));
            }
            _ => panic!("expected a command failure"),
        }
    }

    #[test]
    fn foreign_tags_are_not_ours() {
        let mut tags = vec!["A000001".to_string()];
        let outcome = handle_error_replies("Delete", &mut tags, &tagged("A000002", "OK", "done"));
        assert!(matches!(outcome, ReplyOutcome::NotOurs));
        assert_eq!(tags.len(), 1);
    }

    #[test]
    fn untagged_responses_are_not_ours() {
        let mut tags = vec!["A000001".to_string()];
        let outcome = handle_error_replies("List", &mut tags, &tagged("*", "LIST", "x"));
        assert!(matches!(outcome, ReplyOutcome::NotOurs));
    }

    #[test]
    fn select_tracking_decodes_the_mailbox() {
        let tracked = JobContext::track(
            "SELECT",
            &[CommandArg::Raw(b"\"inbox/&AOQ-\"".to_vec())],
        );
        assert_eq!(
            tracked,
            TrackedCommand::Select {
                mailbox: "INBOX/ä".to_string()
            }
        );
    }
}
