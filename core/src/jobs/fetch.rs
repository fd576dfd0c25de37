/*
 * fetch.rs
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

//! FETCH over a sequence-number or UID set. Results stream out one
//! message at a time; body payloads are raw bytes for the caller's MIME
//! parser.

use crate::error::Error;
use crate::imapset::ImapSet;
use crate::job::{handle_error_replies, Job, JobContext, ReplyOutcome};
use crate::message::{Message, Part};
use crate::session::Session;
use tokio::sync::oneshot;

/// Which attributes to ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchScope {
    /// Flags and UID only.
    #[default]
    Flags,
    /// Size, flags, UID and the full header block.
    Headers,
    /// UID and the complete body.
    Content,
    /// Size, flags, UID and the complete body.
    Full,
}

impl FetchScope {
    fn items(self) -> &'static str {
        match self {
            FetchScope::Flags => "(FLAGS UID)",
            FetchScope::Headers => "(RFC822.SIZE FLAGS UID BODY.PEEK[HEADER])",
            FetchScope::Content => "(UID BODY.PEEK[])",
            FetchScope::Full => "(RFC822.SIZE FLAGS UID BODY.PEEK[])",
        }
    }
}

/// One fetched message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchResult {
    pub sequence_number: u64,
    pub uid: Option<u64>,
    pub size: Option<u64>,
    pub flags: Vec<String>,
    /// Payload sections keyed by the server's item name, e.g.
    /// `BODY[HEADER]` or `BODY[]`.
    pub parts: Vec<(String, Vec<u8>)>,
}

pub struct FetchJob {
    set: ImapSet,
    uid_based: bool,
    scope: FetchScope,
    results: Vec<FetchResult>,
    on_message: Option<Box<dyn FnMut(&FetchResult) + Send>>,
    tags: Vec<String>,
    reply: Option<oneshot::Sender<Result<Vec<FetchResult>, Error>>>,
}

impl FetchJob {
    pub fn new(set: ImapSet) -> Self {
        Self {
            set,
            uid_based: false,
            scope: FetchScope::default(),
            results: Vec::new(),
            on_message: None,
            tags: Vec::new(),
            reply: None,
        }
    }

    /// Interpret the set as UIDs (`UID FETCH`).
    pub fn set_uid_based(&mut self, uid_based: bool) {
        self.uid_based = uid_based;
    }

    pub fn set_scope(&mut self, scope: FetchScope) {
        self.scope = scope;
    }

    /// Callback fired for each message as its response arrives.
    pub fn on_message(&mut self, f: impl FnMut(&FetchResult) + Send + 'static) {
        self.on_message = Some(Box::new(f));
    }

    pub async fn run(mut self, session: &Session) -> Result<Vec<FetchResult>, Error> {
        let (tx, rx) = oneshot::channel();
        self.reply = Some(tx);
        session.run_job(Box::new(self), rx).await
    }
}

/// Parse one `* N FETCH (key value ...)` line. The attribute list is
/// flat: keys and values alternate, with body payloads delivered as the
/// literal bytes following their item name.
fn parse_fetch_result(response: &Message) -> Option<FetchResult> {
    let content = &response.content;
    if content.len() < 4 || content[2].as_string() != b"FETCH" {
        return None;
    }
    let sequence_number = std::str::from_utf8(content[1].as_string())
        .ok()?
        .parse()
        .ok()?;
    let Part::List(items) = &content[3] else {
        return None;
    };
    let mut result = FetchResult {
        sequence_number,
        ..FetchResult::default()
    };
    let mut i = 0;
    while i + 1 < items.len() {
        let key = String::from_utf8_lossy(&items[i]).to_uppercase();
        let value = &items[i + 1];
        match key.as_str() {
            "UID" => result.uid = std::str::from_utf8(value).ok().and_then(|s| s.parse().ok()),
            "RFC822.SIZE" => {
                result.size = std::str::from_utf8(value).ok().and_then(|s| s.parse().ok())
            }
            "FLAGS" => {
                let inner = value
                    .strip_prefix(b"(")
                    .and_then(|v| v.strip_suffix(b")"))
                    .unwrap_or(value);
                result.flags = String::from_utf8_lossy(inner)
                    .split_whitespace()
                    .map(str::to_string)
                    .collect();
            }
            _ if key.starts_with("BODY[") => {
                result.parts.push((key, value.clone()));
            }
            _ => {}
        }
        i += 2;
    }
    Some(result)
}

impl Job for FetchJob {
    fn name(&self) -> &'static str {
        "Fetch"
    }

    fn start(&mut self, ctx: &mut JobContext<'_>) {
        let command = if self.uid_based { "UID FETCH" } else { "FETCH" };
        let args = format!("{} {}", self.set, self.scope.items());
        let tag = ctx.send_command(command, args.as_bytes());
        self.tags.push(tag);
    }

    fn handle_response(&mut self, response: &Message, ctx: &mut JobContext<'_>) {
        match handle_error_replies(self.name(), &mut self.tags, response) {
            ReplyOutcome::Finished(result) => {
                if let Some(tx) = self.reply.take() {
                    let _ = tx.send(result.map(|()| std::mem::take(&mut self.results)));
                }
                ctx.complete();
            }
            ReplyOutcome::InProgress => {}
            ReplyOutcome::NotOurs => {
                if response.is_untagged() {
                    if let Some(result) = parse_fetch_result(response) {
                        if let Some(f) = self.on_message.as_mut() {
                            f(&result);
                        }
                        self.results.push(result);
                    }
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

    fn msg(bytes: &[u8]) -> Message {
        let mut parser = StreamParser::for_messages();
        parser.feed(bytes).unwrap();
        parser.next_message().expect("one message")
    }

    #[test]
    fn parses_flags_uid_and_size() {
        let result = parse_fetch_result(&msg(
            b"* 230 FETCH (FLAGS (\\Recent \\Seen) UID 999 RFC822.SIZE 37)\r\n",
        ))
        .expect("a result");
        assert_eq!(result.sequence_number, 230);
        assert_eq!(result.uid, Some(999));
        assert_eq!(result.size, Some(37));
        assert_eq!(result.flags, vec![r"\Recent".to_string(), r"\Seen".to_string()]);
        assert!(result.parts.is_empty());
    }

    #[test]
    fn keeps_the_literal_body_under_its_item_name() {
        let result = parse_fetch_result(&msg(
            b"* 5 FETCH (UID 42 BODY[HEADER] {13}\r\nSubject: hey\n FLAGS ())\r\n",
        ))
        .expect("a result");
        assert_eq!(result.uid, Some(42));
        assert_eq!(
            result.parts,
            vec![("BODY[HEADER]".to_string(), b"Subject: hey\n".to_vec())]
        );
        assert!(result.flags.is_empty());
    }

    #[test]
    fn ignores_non_fetch_lines() {
        assert!(parse_fetch_result(&msg(b"* 3 EXPUNGE\r\n")).is_none());
        assert!(parse_fetch_result(&msg(b"* SEARCH 1 2 3\r\n")).is_none());
    }
}
