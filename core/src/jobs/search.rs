/*
 * search.rs
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

//! SEARCH: run a criteria expression against the selected mailbox and
//! collect the matching sequence numbers or UIDs.

use crate::error::Error;
use crate::job::{handle_error_replies, Job, JobContext, ReplyOutcome};
use crate::message::Message;
use crate::session::Session;
use tokio::sync::oneshot;

pub struct SearchJob {
    /// Raw criteria, e.g. `ALL`, `UNSEEN`, `UID 1:*`.
    criteria: String,
    uid_based: bool,
    results: Vec<u64>,
    tags: Vec<String>,
    reply: Option<oneshot::Sender<Result<Vec<u64>, Error>>>,
}

impl SearchJob {
    pub fn new(criteria: impl Into<String>) -> Self {
        Self {
            criteria: criteria.into(),
            uid_based: false,
            results: Vec::new(),
            tags: Vec::new(),
            reply: None,
        }
    }

    /// Report UIDs instead of sequence numbers (`UID SEARCH`).
    pub fn set_uid_based(&mut self, uid_based: bool) {
        self.uid_based = uid_based;
    }

    pub async fn run(mut self, session: &Session) -> Result<Vec<u64>, Error> {
        let (tx, rx) = oneshot::channel();
        self.reply = Some(tx);
        session.run_job(Box::new(self), rx).await
    }
}

impl Job for SearchJob {
    fn name(&self) -> &'static str {
        "Search"
    }

    fn start(&mut self, ctx: &mut JobContext<'_>) {
        let command = if self.uid_based { "UID SEARCH" } else { "SEARCH" };
        let tag = ctx.send_command(command, self.criteria.as_bytes());
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
                if response.is_untagged() && response.code() == b"SEARCH" {
                    self.results.extend(
                        response
                            .content
                            .iter()
                            .skip(2)
                            .filter_map(|p| std::str::from_utf8(p.as_string()).ok())
                            .filter_map(|s| s.parse::<u64>().ok()),
                    );
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
