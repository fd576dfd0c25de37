/*
 * mod.rs
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

//! Concrete jobs: one type per IMAP command (or command sequence).
//!
//! Each job is configured through setters, submitted with
//! [`crate::Session::submit`], or driven to completion with its async
//! `run` helper.

mod capabilities;
mod close;
mod create;
mod delete;
mod fetch;
mod list;
mod login;
mod logout;
mod noop;
mod search;
mod select;

pub use capabilities::CapabilitiesJob;
pub use close::CloseJob;
pub use create::CreateJob;
pub use delete::DeleteJob;
pub use fetch::{FetchJob, FetchResult, FetchScope};
pub use list::{ListJob, ListOption, MailBoxDescriptor};
pub use login::{AuthenticationMode, EncryptionMode, LoginJob};
pub use logout::LogoutJob;
pub use noop::NoopJob;
pub use search::SearchJob;
pub use select::{SelectJob, SelectResult};
