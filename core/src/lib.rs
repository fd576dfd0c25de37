/*
 * lib.rs
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

//! Postino: an asynchronous IMAP4rev1 client library.
//!
//! A [`Session`] owns one connection to a server and multiplexes a FIFO
//! queue of jobs over it, one job at a time. Responses are decoded by a
//! streaming byte-level parser that never needs a whole response in
//! memory; the login job handles plaintext, implicit-TLS and STARTTLS
//! connection setup including SASL authentication.
//!
//! ```no_run
//! use postino_core::{LoginJob, Session, SelectJob};
//!
//! # async fn example() -> Result<(), postino_core::Error> {
//! let session = Session::new("imap.example.org", 143);
//! LoginJob::new("user", "password").run(&session).await?;
//! let mailbox = SelectJob::new("INBOX").run(&session).await?;
//! println!("{} messages", mailbox.message_count);
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod encoder;
mod error;
pub mod imapset;
mod job;
pub mod jobs;
pub mod logging;
mod message;
mod net;
pub mod parser;
pub mod sasl;
mod session;

pub use error::Error;
pub use imapset::{ImapInterval, ImapSet};
pub use job::{handle_error_replies, Job, JobContext, ReplyOutcome};
pub use jobs::{
    AuthenticationMode, CapabilitiesJob, CloseJob, CreateJob, DeleteJob, EncryptionMode, FetchJob,
    FetchResult, FetchScope, ListJob, ListOption, LoginJob, LogoutJob, MailBoxDescriptor, NoopJob,
    SearchJob, SelectJob, SelectResult,
};
pub use message::{Message, Part};
pub use parser::{MessageBuilder, ParserSink, ReadTarget, StreamParser};
pub use session::{Session, SessionEvent, SessionState};
