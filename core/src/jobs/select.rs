/*
 * select.rs
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

//! SELECT/EXAMINE: bind a mailbox and collect its status responses.

use crate::codec;
use crate::encoder;
use crate::error::Error;
use crate::job::{handle_error_replies, Job, JobContext, ReplyOutcome};
use crate::message::Message;
use crate::session::Session;
use tokio::sync::oneshot;

/// What the server reported while opening the mailbox.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectResult {
    pub flags: Vec<String>,
    pub permanent_flags: Vec<String>,
    pub message_count: u64,
    pub recent_count: u64,
    pub first_unseen_index: u64,
    pub uid_validity: u64,
    pub next_uid: u64,
    pub read_only: bool,
}

pub struct SelectJob {
    mailbox: String,
    open_read_only: bool,
    result: SelectResult,
    tags: Vec<String>,
    reply: Option<oneshot::Sender<Result<SelectResult, Error>>>,
}

impl SelectJob {
    pub fn new(mailbox: impl Into<String>) -> Self {
        Self {
            mailbox: mailbox.into(),
            open_read_only: false,
            result: SelectResult::default(),
            tags: Vec::new(),
            reply: None,
        }
    }

    /// Use EXAMINE instead of SELECT.
    pub fn set_open_read_only(&mut self, read_only: bool) {
        self.open_read_only = read_only;
    }

    pub fn mailbox(&self) -> &str {
        &self.mailbox
    }

    pub async fn run(mut self, session: &Session) -> Result<SelectResult, Error> {
        let (tx, rx) = oneshot::channel();
        self.reply = Some(tx);
        session.run_job(Box::new(self), rx).await
    }

    fn untagged(&mut self, response: &Message) {
        let content = &response.content;
        if content.len() >= 3 && content[2].as_string() == b"EXISTS" {
            if let Some(n) = parse_number(content[1].as_string()) {
                self.result.message_count = n;
            }
        } else if content.len() >= 3 && content[2].as_string() == b"RECENT" {
            if let Some(n) = parse_number(content[1].as_string()) {
                self.result.recent_count = n;
            }
        } else if response.code() == b"FLAGS" {
            self.result.flags = content
                .get(2)
                .map(|p| {
                    p.as_list()
                        .iter()
                        .map(|f| String::from_utf8_lossy(f).into_owned())
                        .collect()
                })
                .unwrap_or_default();
        } else if response.code() == b"OK" {
            let key = response
                .response_code
                .first()
                .map(|p| p.as_string().to_vec())
                .unwrap_or_default();
            let value = response.response_code.get(1);
            match key.as_slice() {
                b"UIDVALIDITY" => {
                    if let Some(n) = value.and_then(|p| parse_number(p.as_string())) {
                        self.result.uid_validity = n;
                    }
                }
                b"UIDNEXT" => {
                    if let Some(n) = value.and_then(|p| parse_number(p.as_string())) {
                        self.result.next_uid = n;
                    }
                }
                b"UNSEEN" => {
                    if let Some(n) = value.and_then(|p| parse_number(p.as_string())) {
                        self.result.first_unseen_index = n;
                    }
                }
                b"PERMANENTFLAGS" => {
                    if let Some(list) = value {
                        self.result.permanent_flags = list
                            .as_list()
                            .iter()
                            .map(|f| String::from_utf8_lossy(f).into_owned())
                            .collect();
                    }
                }
                _ => {}
            }
        }
    }
}

fn parse_number(bytes: &[u8]) -> Option<u64> {
    std::str::from_utf8(bytes).ok()?.parse().ok()
}

impl Job for SelectJob {
    fn name(&self) -> &'static str {
        "Select"
    }

    fn start(&mut self, ctx: &mut JobContext<'_>) {
        let command = if self.open_read_only {
            "EXAMINE"
        } else {
            "SELECT"
        };
        let encoded = codec::encode_imap_folder_name(&self.mailbox);
        let tag = ctx.send_command(command, &encoder::quote_string(&encoded));
        self.tags.push(tag);
    }

    fn handle_response(&mut self, response: &Message, ctx: &mut JobContext<'_>) {
        match handle_error_replies(self.name(), &mut self.tags, response) {
            ReplyOutcome::Finished(result) => {
                self.result.read_only = response.has_response_code(b"READ-ONLY");
                if let Some(tx) = self.reply.take() {
                    let _ = tx.send(result.map(|()| std::mem::take(&mut self.result)));
                }
                ctx.complete();
            }
            ReplyOutcome::InProgress => {}
            ReplyOutcome::NotOurs => {
                if response.is_untagged() {
                    self.untagged(response);
                }
            }
        }
    }

    fn connection_lost(&mut self, error: Error) {
        if let Some(tx) = self.reply.take() {
            let _ = tx.send(Err(error));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::StreamParser;

    fn msg(line: &str) -> Message {
        let mut parser = StreamParser::for_messages();
        parser.feed(line.as_bytes()).unwrap();
        parser.feed(b"\r\n").unwrap();
        parser.next_message().expect("one message")
    }

    #[test]
    fn collects_the_mailbox_status() {
        let mut job = SelectJob::new("INBOX");
        job.untagged(&msg(r"* FLAGS (\Answered \Flagged \Deleted \Seen \Draft)"));
        job.untagged(&msg("* 172 EXISTS"));
        job.untagged(&msg("* 1 RECENT"));
        job.untagged(&msg("* OK [UNSEEN 12] Message 12 is first unseen"));
        job.untagged(&msg("* OK [UIDVALIDITY 3857529045] UIDs valid"));
        job.untagged(&msg("* OK [UIDNEXT 4392] Predicted next UID"));
        job.untagged(&msg(r"* OK [PERMANENTFLAGS (\Deleted \Seen \*)] Limited"));

        assert_eq!(job.result.message_count, 172);
        assert_eq!(job.result.recent_count, 1);
        assert_eq!(job.result.first_unseen_index, 12);
        assert_eq!(job.result.uid_validity, 3857529045);
        assert_eq!(job.result.next_uid, 4392);
        assert_eq!(job.result.flags.len(), 5);
        assert_eq!(
            job.result.permanent_flags,
            vec![r"\Deleted".to_string(), r"\Seen".to_string(), r"\*".to_string()]
        );
    }
}
