/*
 * logout.rs
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

//! LOGOUT: orderly shutdown. The server answers with an untagged BYE
//! (which the session swallows) and then closes the connection.

use crate::error::Error;
use crate::job::{handle_error_replies, Job, JobContext, ReplyOutcome};
use crate::message::Message;
use crate::session::Session;
use tokio::sync::oneshot;

#[derive(Default)]
pub struct LogoutJob {
    tags: Vec<String>,
    reply: Option<oneshot::Sender<Result<(), Error>>>,
}

impl LogoutJob {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn run(mut self, session: &Session) -> Result<(), Error> {
        let (tx, rx) = oneshot::channel();
        self.reply = Some(tx);
        session.run_job(Box::new(self), rx).await
    }
}

impl Job for LogoutJob {
    fn name(&self) -> &'static str {
        "Logout"
    }

    fn start(&mut self, ctx: &mut JobContext<'_>) {
        let tag = ctx.send_command("LOGOUT", b"");
        self.tags.push(tag);
    }

    fn handle_response(&mut self, response: &Message, ctx: &mut JobContext<'_>) {
        if let ReplyOutcome::Finished(result) =
            handle_error_replies(self.name(), &mut self.tags, response)
        {
            if let Some(tx) = self.reply.take() {
                let _ = tx.send(result);
            }
            ctx.complete();
        }
    }

    fn connection_lost(&mut self, error: Error) {
        // A server may slam the connection instead of acknowledging.
        if let Some(tx) = self.reply.take() {
            let _ = tx.send(Err(error));
        }
    }
}
