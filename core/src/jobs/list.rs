/*
 * list.rs
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

//! Mailbox listing (LIST/LSUB). One descriptor event per mailbox as the
//! responses stream in; names are decoded from modified UTF-7 and INBOX
//! is canonicalized uppercase.

use crate::codec;
use crate::error::Error;
use crate::job::{handle_error_replies, Job, JobContext, ReplyOutcome};
use crate::message::Message;
use crate::session::Session;
use tokio::sync::oneshot;

/// A listed mailbox: decoded full name plus the hierarchy separator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailBoxDescriptor {
    pub name: String,
    pub separator: char,
}

/// Which listing command to issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListOption {
    /// Subscribed mailboxes only (LSUB).
    #[default]
    NoOption,
    /// All mailboxes (LIST).
    IncludeUnsubscribed,
}

type ListEntry = (MailBoxDescriptor, Vec<String>);

pub struct ListJob {
    option: ListOption,
    command: &'static str,
    entries: Vec<ListEntry>,
    on_mailbox: Option<Box<dyn FnMut(&MailBoxDescriptor, &[String]) + Send>>,
    tags: Vec<String>,
    reply: Option<oneshot::Sender<Result<Vec<ListEntry>, Error>>>,
}

impl Default for ListJob {
    fn default() -> Self {
        Self::new()
    }
}

impl ListJob {
    pub fn new() -> Self {
        Self {
            option: ListOption::NoOption,
            command: "LSUB",
            entries: Vec::new(),
            on_mailbox: None,
            tags: Vec::new(),
            reply: None,
        }
    }

    pub fn set_option(&mut self, option: ListOption) {
        self.option = option;
    }

    /// Callback fired for every mailbox as its response line arrives.
    pub fn on_mailbox(&mut self, f: impl FnMut(&MailBoxDescriptor, &[String]) + Send + 'static) {
        self.on_mailbox = Some(Box::new(f));
    }

    pub async fn run(mut self, session: &Session) -> Result<Vec<ListEntry>, Error> {
        let (tx, rx) = oneshot::channel();
        self.reply = Some(tx);
        session.run_job(Box::new(self), rx).await
    }

    fn finish(&mut self, ctx: &mut JobContext<'_>, result: Result<(), Error>) {
        if let Some(tx) = self.reply.take() {
            let _ = tx.send(result.map(|()| std::mem::take(&mut self.entries)));
        }
        ctx.complete();
    }
}

/// Parse one untagged listing line: `* LIST (flags) separator name...`.
/// Flags are lowercased; an empty or NIL separator defaults to `/`.
fn parse_list_entry(command: &str, response: &Message) -> Option<ListEntry> {
    if response.content.len() < 5 || response.code() != command.as_bytes() {
        return None;
    }
    let flags: Vec<String> = response.content[2]
        .as_list()
        .iter()
        .map(|f| String::from_utf8_lossy(f).to_lowercase())
        .collect();
    let separator_bytes = response.content[3].as_string();
    let separator = if separator_bytes.is_empty() {
        // Servers reporting NIL only do so for mailboxes with no children.
        '/'
    } else {
        separator_bytes[0] as char
    };
    let mut full_name = Vec::new();
    for part in response.content.iter().skip(4) {
        if !full_name.is_empty() {
            full_name.push(b' ');
        }
        full_name.extend_from_slice(part.as_string());
    }
    let name = codec::decode_imap_folder_name(&full_name);
    let name = codec::canonicalize_inbox(&name, separator);
    Some((MailBoxDescriptor { name, separator }, flags))
}

impl Job for ListJob {
    fn name(&self) -> &'static str {
        "List"
    }

    fn start(&mut self, ctx: &mut JobContext<'_>) {
        self.command = match self.option {
            ListOption::IncludeUnsubscribed => "LIST",
            ListOption::NoOption => "LSUB",
        };
        let tag = ctx.send_command(self.command, b"\"\" *");
        self.tags.push(tag);
    }

    fn handle_response(&mut self, response: &Message, ctx: &mut JobContext<'_>) {
        match handle_error_replies(self.name(), &mut self.tags, response) {
            ReplyOutcome::Finished(result) => self.finish(ctx, result),
            ReplyOutcome::InProgress => {}
            ReplyOutcome::NotOurs => {
                if let Some(entry) = parse_list_entry(self.command, response) {
                    if let Some(f) = self.on_mailbox.as_mut() {
                        f(&entry.0, &entry.1);
                    }
                    self.entries.push(entry);
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
    fn decodes_utf7_and_canonicalizes_inbox() {
        let entry = parse_list_entry(
            "LIST",
            &msg(r"* LIST (\HasNoChildren) / INBOX/&AOQ- &APY- &APw- @ &IKw-"),
        )
        .expect("an entry");
        assert_eq!(entry.0.separator, '/');
        assert_eq!(entry.0.name, "INBOX/ä ö ü @ €");
        assert_eq!(entry.1, vec![r"\hasnochildren".to_string()]);
    }

    #[test]
    fn lowercase_inbox_is_rewritten() {
        let entry =
            parse_list_entry("LIST", &msg(r#"* LIST (\Noselect) "." "inbox.Sent""#)).unwrap();
        assert_eq!(entry.0.name, "INBOX.Sent");
        assert_eq!(entry.0.separator, '.');
    }

    #[test]
    fn nil_separator_defaults_to_slash() {
        let entry = parse_list_entry("LIST", &msg(r"* LIST () NIL Archive")).unwrap();
        assert_eq!(entry.0.separator, '/');
        assert_eq!(entry.0.name, "Archive");
    }

    #[test]
    fn other_untagged_lines_are_ignored() {
        assert!(parse_list_entry("LIST", &msg("* 3 EXISTS")).is_none());
        assert!(parse_list_entry("LSUB", &msg(r#"* LIST () "/" x"#)).is_none());
    }
}
