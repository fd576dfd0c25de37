/*
 * create.rs
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

//! CREATE a mailbox. A mailbox that already exists counts as success
//! (RFC 5530 ALREADYEXISTS).

use crate::codec;
use crate::encoder::CommandArg;
use crate::error::Error;
use crate::job::{handle_error_replies, Job, JobContext, ReplyOutcome};
use crate::message::Message;
use crate::session::Session;
use tokio::sync::oneshot;

pub struct CreateJob {
    mailbox: String,
    tags: Vec<String>,
    reply: Option<oneshot::Sender<Result<(), Error>>>,
}

impl CreateJob {
    pub fn new(mailbox: impl Into<String>) -> Self {
        Self {
            mailbox: mailbox.into(),
            tags: Vec::new(),
            reply: None,
        }
    }

    pub fn mailbox(&self) -> &str {
        &self.mailbox
    }

    pub async fn run(mut self, session: &Session) -> Result<(), Error> {
        let (tx, rx) = oneshot::channel();
        self.reply = Some(tx);
        session.run_job(Box::new(self), rx).await
    }

    fn finish(&mut self, ctx: &mut JobContext<'_>, result: Result<(), Error>) {
        if let Some(tx) = self.reply.take() {
            let _ = tx.send(result);
        }
        ctx.complete();
    }
}

impl Job for CreateJob {
    fn name(&self) -> &'static str {
        "Create"
    }

    fn start(&mut self, ctx: &mut JobContext<'_>) {
        let encoded = codec::encode_imap_folder_name(&self.mailbox);
        let tag = ctx.send_command_args("CREATE", &[CommandArg::String(encoded)]);
        self.tags.push(tag);
    }

    fn handle_response(&mut self, response: &Message, ctx: &mut JobContext<'_>) {
        let tag = response.tag();
        if self.tags.iter().any(|t| t.as_bytes() == tag)
            && response.code() == b"NO"
            && response.has_response_code(b"ALREADYEXISTS")
        {
            self.tags.retain(|t| t.as_bytes() != tag);
            if self.tags.is_empty() {
                self.finish(ctx, Ok(()));
            }
            return;
        }
        match handle_error_replies(self.name(), &mut self.tags, response) {
            ReplyOutcome::Finished(result) => self.finish(ctx, result),
            ReplyOutcome::InProgress | ReplyOutcome::NotOurs => {}
        }
    }

    fn connection_lost(&mut self, error: Error) {
        if let Some(tx) = self.reply.take() {
            let _ = tx.send(Err(error));
        }
    }
}
