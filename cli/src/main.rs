/*
 * main.rs
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

//! imapcmd: demo harness exercising the client library against a live
//! server. Logs in over implicit TLS, inspects INBOX, runs one query.

use clap::{Parser, ValueEnum};
use postino_core::{
    AuthenticationMode, CapabilitiesJob, EncryptionMode, FetchJob, FetchScope, ImapSet, ListJob,
    ListOption, LoginJob, LogoutJob, SearchJob, SelectJob, Session,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Command {
    /// UID SEARCH over the whole mailbox.
    Search,
    /// Fetch flags for every message.
    Flags,
    /// Fetch headers for every message.
    Fetch,
    /// List all mailboxes.
    List,
}

#[derive(Parser)]
#[command(name = "imapcmd", about = "Query an IMAP mailbox from the command line")]
struct Args {
    /// Server, as HOST or HOST:PORT (default port 993, implicit TLS).
    server: String,
    user: String,
    password: String,
    #[arg(value_enum)]
    command: Command,
}

fn split_server(server: &str) -> (String, u16) {
    match server.rsplit_once(':') {
        Some((host, port)) => match port.parse() {
            Ok(port) => (host.to_string(), port),
            Err(_) => (server.to_string(), 993),
        },
        None => (server.to_string(), 993),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();
    let (host, port) = split_server(&args.server);

    println!("Connecting to {}:{} as {}", host, port, args.user);
    let session = Session::new(host, port);

    let mut login = LoginJob::new(&args.user, &args.password);
    login.set_encryption_mode(EncryptionMode::Tls);
    login.set_authentication_mode(AuthenticationMode::Plain);
    login.run(&session).await?;
    println!(
        "Server greeting: {}",
        String::from_utf8_lossy(&session.server_greeting())
    );

    let capabilities = CapabilitiesJob::new().run(&session).await?;
    println!("Capabilities: {}", capabilities.join(" "));

    if let Command::List = args.command {
        let mut list = ListJob::new();
        list.set_option(ListOption::IncludeUnsubscribed);
        for (mailbox, flags) in list.run(&session).await? {
            println!("{} {} ({})", mailbox.separator, mailbox.name, flags.join(" "));
        }
        LogoutJob::new().run(&session).await?;
        return Ok(());
    }

    println!("Selecting INBOX:");
    let mailbox = SelectJob::new("INBOX").run(&session).await?;
    println!("  flags: {}", mailbox.flags.join(" "));
    println!("  messages: {}", mailbox.message_count);
    println!("  recent: {}", mailbox.recent_count);
    println!("  uid validity: {}", mailbox.uid_validity);
    println!("  next uid: {}", mailbox.next_uid);

    match args.command {
        Command::Search => {
            let mut search = SearchJob::new("ALL");
            search.set_uid_based(true);
            let uids = search.run(&session).await?;
            println!(
                "Search result: {}",
                uids.iter()
                    .map(|u| u.to_string())
                    .collect::<Vec<_>>()
                    .join(" ")
            );
        }
        Command::Flags => {
            let mut fetch = FetchJob::new(ImapSet::all());
            fetch.set_uid_based(true);
            fetch.set_scope(FetchScope::Flags);
            fetch.on_message(|m| {
                println!(
                    "* {} uid {:?} flags {}",
                    m.sequence_number,
                    m.uid,
                    m.flags.join(" ")
                );
            });
            fetch.run(&session).await?;
        }
        Command::Fetch => {
            let mut fetch = FetchJob::new(ImapSet::all());
            fetch.set_uid_based(true);
            fetch.set_scope(FetchScope::Headers);
            fetch.on_message(|m| {
                let header_size = m
                    .parts
                    .iter()
                    .find(|(name, _)| name.starts_with("BODY[HEADER"))
                    .map(|(_, bytes)| bytes.len())
                    .unwrap_or(0);
                println!(
                    "* {} uid {:?} size {:?} header {} bytes",
                    m.sequence_number, m.uid, m.size, header_size
                );
            });
            fetch.run(&session).await?;
        }
        Command::List => {}
    }

    println!("Logging out...");
    LogoutJob::new().run(&session).await?;
    Ok(())
}
