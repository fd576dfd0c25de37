/*
 * session.rs
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

//! The IMAP session: one connection, one parser, one job at a time.
//!
//! All session state lives in a single spawned task; the [`Session`]
//! handle talks to it over a channel, so submissions from any context are
//! serialized onto the task. The task connects, reads the greeting,
//! drives the job queue in FIFO order and routes every parsed response:
//! to the state machine first (auth/select/close tags it recorded when
//! the commands went out), then to the running job.
//!
//! Responses that arrive with no job running are logged and dropped.

use crate::error::Error;
use crate::job::{await_reply, Action, Job, JobContext, TrackedCommand};
use crate::logging::{traffic_dump_enabled, SessionLogger, TimingStats};
use crate::message::Message;
use crate::net::{self, Stream};
use crate::parser::{MessageBuilder, ReadTarget, StreamParser};
use crate::encoder::WriteChunk;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

const DEFAULT_TIMEOUT_SECS: i64 = 30;
const PROGRESS_INTERVAL: Duration = Duration::from_secs(3);

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    NotAuthenticated,
    Authenticated,
    Selected,
}

/// Events published by the session task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    StateChanged {
        new: SessionState,
        old: SessionState,
    },
    JobQueueSizeChanged(usize),
    /// The connection could not be established, or dropped before the
    /// greeting.
    ConnectionFailed,
    /// TLS negotiation errors, one message per failure.
    SslErrors(Vec<String>),
}

enum Request {
    Submit(Box<dyn Job>),
    Close,
    SetTimeout(i64),
}

#[derive(Default)]
struct Observed {
    state: Option<SessionState>,
    greeting: Vec<u8>,
    current_mailbox: String,
    user_name: String,
    queue_size: usize,
    timeout_secs: i64,
}

/// Handle to a running IMAP session.
///
/// Constructing one opens the socket asynchronously on the current tokio
/// runtime. Dropping the handle tears the session down; queued jobs are
/// failed with `ConnectionLost`.
pub struct Session {
    host: String,
    port: u16,
    shared: Arc<Mutex<Observed>>,
    requests: mpsc::UnboundedSender<Request>,
    events: Mutex<Option<mpsc::UnboundedReceiver<SessionEvent>>>,
}

fn lock<'a>(shared: &'a Arc<Mutex<Observed>>) -> MutexGuard<'a, Observed> {
    shared.lock().unwrap_or_else(|e| e.into_inner())
}

impl Session {
    /// Open a session to `host:port`. Must be called within a tokio
    /// runtime; the connection proceeds in the background and jobs may be
    /// submitted immediately.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Mutex::new(Observed {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            ..Observed::default()
        }));
        let task = SessionTask {
            host: host.clone(),
            port,
            shared: Arc::clone(&shared),
            events: event_tx,
            requests: request_rx,
            parser: StreamParser::for_messages(),
            queue: VecDeque::new(),
            current: None,
            tag_count: 0,
            auth_tag: None,
            select_tag: None,
            close_tag: None,
            upcoming_mailbox: None,
            state: SessionState::Disconnected,
            write_steps: VecDeque::new(),
            awaiting_continuation: false,
            start_tls_requested: false,
            alive: true,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            idle_deadline: Instant::now() + Duration::from_secs(DEFAULT_TIMEOUT_SECS as u64),
            logger: SessionLogger::from_env(),
            traffic: traffic_dump_enabled(),
            timing: TimingStats::from_env(),
        };
        tokio::spawn(task.run());
        Session {
            host,
            port,
            shared,
            requests: request_tx,
            events: Mutex::new(Some(event_rx)),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> SessionState {
        lock(&self.shared)
            .state
            .unwrap_or(SessionState::Disconnected)
    }

    /// The server's greeting line (status word stripped), replaced by the
    /// final OK of a successful login.
    pub fn server_greeting(&self) -> Vec<u8> {
        lock(&self.shared).greeting.clone()
    }

    /// The mailbox bound by the last successful SELECT/EXAMINE; empty
    /// outside the Selected state.
    pub fn selected_mailbox(&self) -> String {
        lock(&self.shared).current_mailbox.clone()
    }

    /// The user the session authenticated (or is authenticating) as.
    pub fn user_name(&self) -> String {
        lock(&self.shared).user_name.clone()
    }

    /// Queued jobs plus the running one.
    pub fn job_queue_size(&self) -> usize {
        lock(&self.shared).queue_size
    }

    pub fn timeout(&self) -> i64 {
        lock(&self.shared).timeout_secs
    }

    /// Enqueue a job. Jobs start in submission order, one at a time.
    pub fn submit(&self, job: Box<dyn Job>) {
        let _ = self.requests.send(Request::Submit(job));
    }

    /// Abort the connection. Queued and running jobs fail with
    /// `ConnectionLost`.
    pub fn close(&self) {
        let _ = self.requests.send(Request::Close);
    }

    /// Tune the inactivity watchdog; negative disables it.
    pub fn set_timeout(&self, seconds: i64) {
        lock(&self.shared).timeout_secs = seconds;
        let _ = self.requests.send(Request::SetTimeout(seconds));
    }

    /// The session's event stream. Yields `None` after the first call.
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<SessionEvent>> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    /// Submit `job` and wait for its completion future.
    pub(crate) async fn run_job<T>(
        &self,
        job: Box<dyn Job>,
        rx: oneshot::Receiver<Result<T, Error>>,
    ) -> Result<T, Error> {
        self.submit(job);
        await_reply(rx).await
    }
}

enum ReadFailure {
    Io(std::io::Error),
    Protocol(Error),
}

enum ReadOutcome {
    Eof,
    Progress,
}

struct SessionTask {
    host: String,
    port: u16,
    shared: Arc<Mutex<Observed>>,
    events: mpsc::UnboundedSender<SessionEvent>,
    requests: mpsc::UnboundedReceiver<Request>,
    parser: StreamParser<MessageBuilder>,
    queue: VecDeque<Box<dyn Job>>,
    current: Option<Box<dyn Job>>,
    tag_count: u32,
    auth_tag: Option<Vec<u8>>,
    select_tag: Option<Vec<u8>>,
    close_tag: Option<Vec<u8>>,
    upcoming_mailbox: Option<String>,
    state: SessionState,
    write_steps: VecDeque<WriteChunk>,
    awaiting_continuation: bool,
    start_tls_requested: bool,
    alive: bool,
    timeout_secs: i64,
    idle_deadline: Instant,
    logger: Option<SessionLogger>,
    traffic: bool,
    timing: Option<TimingStats>,
}

impl SessionTask {
    async fn run(mut self) {
        log::debug!("connecting to {}:{}", self.host, self.port);
        let connect = {
            let host = self.host.clone();
            let port = self.port;
            async move { net::connect(&host, port).await }
        };
        tokio::pin!(connect);
        let stream = loop {
            let watchdog_armed = self.timeout_secs >= 0;
            let idle_deadline = self.idle_deadline;
            tokio::select! {
                result = &mut connect => match result {
                    Ok(tcp) => break Stream::Plain(tcp),
                    Err(error) => {
                        log::warn!("connect failed: {}", error);
                        self.teardown(error);
                        return;
                    }
                },
                request = self.requests.recv() => {
                    self.handle_request(request);
                    if !self.alive {
                        return;
                    }
                },
                _ = tokio::time::sleep_until(idle_deadline), if watchdog_armed => {
                    log::warn!("timeout while connecting");
                    self.teardown(Error::Timeout(self.timeout_secs));
                    return;
                }
            }
        };
        log::debug!("socket connected");
        self.reset_idle();
        self.start_next();
        self.drive(stream).await;
    }

    async fn drive(&mut self, mut stream: Stream) {
        let mut progress = tokio::time::interval_at(
            Instant::now() + PROGRESS_INTERVAL,
            PROGRESS_INTERVAL,
        );
        while self.alive {
            if self.start_tls_requested {
                self.start_tls_requested = false;
                log::debug!("starting TLS handshake");
                match stream.upgrade_to_tls(&self.host).await {
                    Ok(upgraded) => {
                        stream = upgraded;
                        self.reset_idle();
                        self.deliver(|job, ctx| job.encryption_result(true, ctx));
                        continue;
                    }
                    Err(e) => {
                        let _ = self
                            .events
                            .send(SessionEvent::SslErrors(vec![e.to_string()]));
                        self.teardown(Error::SslHandshakeFailed(e.to_string()));
                        return;
                    }
                }
            }
            if let Err(e) = self.flush_writes(&mut stream).await {
                self.teardown(Error::ConnectionLost(e.to_string()));
                return;
            }
            let watchdog_armed = self.watchdog_armed();
            let idle_deadline = self.idle_deadline;
            let job_running = self.current.is_some();
            tokio::select! {
                request = self.requests.recv() => self.handle_request(request),
                result = Self::read_some(&mut stream, &mut self.parser, &mut self.timing) => {
                    match result {
                        Ok(ReadOutcome::Eof) => {
                            log::debug!("server closed the connection");
                            self.teardown(Error::ConnectionLost(
                                "connection to server lost".into(),
                            ));
                        }
                        Ok(ReadOutcome::Progress) => {
                            self.reset_idle();
                            self.drain_messages();
                        }
                        Err(ReadFailure::Io(e)) => {
                            log::warn!("socket error: {}", e);
                            self.teardown(Error::ConnectionLost(e.to_string()));
                        }
                        Err(ReadFailure::Protocol(e)) => {
                            log::warn!("closing the connection: {}", e);
                            self.teardown(e);
                        }
                    }
                },
                _ = tokio::time::sleep_until(idle_deadline), if watchdog_armed => {
                    log::warn!("socket timeout");
                    self.teardown(Error::Timeout(self.timeout_secs));
                },
                _ = progress.tick(), if job_running => {
                    if let Some(job) = &self.current {
                        log::info!("still waiting on {}", job.name());
                    }
                }
            }
        }
    }

    /// One socket read into whichever destination the parser dictates,
    /// then one parse pass. Accounts wait and parse time separately when
    /// timing is enabled.
    async fn read_some(
        stream: &mut Stream,
        parser: &mut StreamParser<MessageBuilder>,
        timing: &mut Option<TimingStats>,
    ) -> Result<ReadOutcome, ReadFailure> {
        let wait_start = std::time::Instant::now();
        let (n, literal) = match parser.read_target() {
            ReadTarget::Buffer => {
                let slot = parser.buffer_slot().map_err(ReadFailure::Protocol)?;
                (stream.read(slot).await.map_err(ReadFailure::Io)?, false)
            }
            ReadTarget::Literal { .. } => {
                let slot = parser.literal_slot();
                (stream.read(slot).await.map_err(ReadFailure::Io)?, true)
            }
        };
        if n == 0 {
            return Ok(ReadOutcome::Eof);
        }
        let parse_start = std::time::Instant::now();
        let committed = if literal {
            parser.commit_literal(n)
        } else {
            parser.commit(n)
        };
        committed.map_err(ReadFailure::Protocol)?;
        if let Some(stats) = timing {
            stats.record(parse_start - wait_start, parse_start.elapsed());
        }
        Ok(ReadOutcome::Progress)
    }

    async fn flush_writes(&mut self, stream: &mut Stream) -> std::io::Result<()> {
        let mut wrote = false;
        while !self.awaiting_continuation {
            match self.write_steps.pop_front() {
                Some(WriteChunk::Data(bytes)) => {
                    stream.write_all(&bytes).await?;
                    wrote = true;
                }
                Some(WriteChunk::AwaitContinuation) => {
                    self.awaiting_continuation = true;
                }
                None => break,
            }
        }
        if wrote {
            stream.flush().await?;
            self.reset_idle();
        }
        Ok(())
    }

    fn handle_request(&mut self, request: Option<Request>) {
        match request {
            Some(Request::Submit(job)) => {
                self.queue.push_back(job);
                self.publish_queue_size();
                self.start_next();
            }
            Some(Request::SetTimeout(seconds)) => {
                self.timeout_secs = seconds;
                self.reset_idle();
            }
            Some(Request::Close) | None => {
                self.teardown(Error::ConnectionLost("session closed".into()));
            }
        }
    }

    fn drain_messages(&mut self) {
        while self.alive {
            let Some(message) = self.parser.next_message() else {
                break;
            };
            self.response_received(message);
        }
    }

    fn response_received(&mut self, message: Message) {
        if self.traffic {
            eprintln!("S: {}", message.to_flat_string());
        }
        if matches!(
            self.state,
            SessionState::Authenticated | SessionState::Selected
        ) {
            if let Some(logger) = &mut self.logger {
                logger.data_received(&message.to_flat_bytes());
            }
        }

        let tag = message.tag().to_vec();
        let code = message.code().to_vec();

        // BYE may be part of a LOGOUT sequence or precede a server-side
        // close; either way we wait for the server to drop the socket.
        if code == b"BYE" {
            log::debug!("received BYE: {}", message.to_flat_string());
            return;
        }

        // Continuation prompt for a literal the encoder split; consume it
        // and let the write queue resume.
        if tag == b"+" && self.awaiting_continuation {
            self.awaiting_continuation = false;
            return;
        }

        match self.state {
            SessionState::Disconnected => {
                if code == b"OK" {
                    self.store_greeting(&message);
                    self.set_state(SessionState::NotAuthenticated);
                    self.start_next();
                } else if code == b"PREAUTH" {
                    self.store_greeting(&message);
                    self.set_state(SessionState::Authenticated);
                    self.start_next();
                } else {
                    log::warn!("unexpected greeting: {}", message.to_flat_string());
                    self.teardown(Error::ConnectionLost("unexpected greeting".into()));
                }
                return;
            }
            SessionState::NotAuthenticated => {
                if code == b"OK" && self.auth_tag.as_deref() == Some(tag.as_slice()) {
                    self.set_state(SessionState::Authenticated);
                }
            }
            SessionState::Authenticated => {
                if code == b"OK" && self.select_tag.as_deref() == Some(tag.as_slice()) {
                    let mailbox = self.upcoming_mailbox.take().unwrap_or_default();
                    lock(&self.shared).current_mailbox = mailbox;
                    self.set_state(SessionState::Selected);
                }
            }
            SessionState::Selected => {
                let closed = code == b"OK" && self.close_tag.as_deref() == Some(tag.as_slice());
                let select_failed =
                    code != b"OK" && self.select_tag.as_deref() == Some(tag.as_slice());
                if closed || select_failed {
                    lock(&self.shared).current_mailbox.clear();
                    self.set_state(SessionState::Authenticated);
                } else if code == b"OK" && self.select_tag.as_deref() == Some(tag.as_slice()) {
                    let mailbox = self.upcoming_mailbox.take().unwrap_or_default();
                    lock(&self.shared).current_mailbox = mailbox;
                }
            }
        }

        if self.auth_tag.as_deref() == Some(tag.as_slice()) {
            self.auth_tag = None;
        }
        if self.select_tag.as_deref() == Some(tag.as_slice()) {
            self.select_tag = None;
        }
        if self.close_tag.as_deref() == Some(tag.as_slice()) {
            self.close_tag = None;
        }

        if self.current.is_some() {
            self.reset_idle();
            self.deliver(|job, ctx| job.handle_response(&message, ctx));
        } else {
            log::warn!(
                "response received with no job to handle it: {}",
                message.to_flat_string()
            );
        }
    }

    fn store_greeting(&mut self, message: &Message) {
        let mut greeting = message.flatten_from(2);
        while greeting.last().is_some_and(|b| b.is_ascii_whitespace()) {
            greeting.pop();
        }
        lock(&self.shared).greeting = greeting;
    }

    fn set_state(&mut self, new: SessionState) {
        if new == self.state {
            return;
        }
        let old = self.state;
        self.state = new;
        lock(&self.shared).state = Some(new);
        log::debug!("session state {:?} -> {:?}", old, new);
        let _ = self.events.send(SessionEvent::StateChanged { new, old });
        self.deliver(|job, ctx| job.state_changed(new, old, ctx));
    }

    fn start_next(&mut self) {
        if !self.alive || self.current.is_some() {
            return;
        }
        let wants_encryption = match self.queue.front() {
            Some(job) => job.wants_encryption(),
            None => return,
        };
        if self.state == SessionState::Disconnected && !wants_encryption {
            // Nothing may run before the greeting unless it has to set up
            // encryption first.
            return;
        }
        let Some(job) = self.queue.pop_front() else {
            return;
        };
        if let Some(user) = job.user_name() {
            lock(&self.shared).user_name = user.to_string();
        }
        log::debug!("starting job {}", job.name());
        self.reset_idle();
        self.current = Some(job);
        self.deliver(|job, ctx| job.start(ctx));
    }

    /// Run one job callback and apply whatever it asked for. Moves on to
    /// the next queued job when the callback declared completion.
    fn deliver<F>(&mut self, f: F)
    where
        F: FnOnce(&mut dyn Job, &mut JobContext<'_>),
    {
        let Some(mut job) = self.current.take() else {
            return;
        };
        let mut actions = Vec::new();
        {
            let mut ctx = JobContext {
                state: self.state,
                tag_count: &mut self.tag_count,
                actions: &mut actions,
            };
            f(job.as_mut(), &mut ctx);
        }
        let completed = self.apply_actions(actions);
        if completed {
            log::debug!("job {} done", job.name());
            self.publish_queue_size();
            self.start_next();
        } else {
            self.current = Some(job);
        }
    }

    fn apply_actions(&mut self, actions: Vec<Action>) -> bool {
        let mut completed = false;
        for action in actions {
            match action {
                Action::Command {
                    tag,
                    tracked,
                    chunks,
                } => {
                    match tracked {
                        TrackedCommand::Auth => self.auth_tag = Some(tag.into_bytes()),
                        TrackedCommand::Select { mailbox } => {
                            self.select_tag = Some(tag.into_bytes());
                            self.upcoming_mailbox = Some(mailbox);
                        }
                        TrackedCommand::Close => self.close_tag = Some(tag.into_bytes()),
                        TrackedCommand::Other => {}
                    }
                    for chunk in &chunks {
                        if let WriteChunk::Data(bytes) = chunk {
                            self.log_sent(bytes);
                        }
                    }
                    self.write_steps.extend(chunks);
                    self.reset_idle();
                }
                Action::Data(mut line) => {
                    self.log_sent(&line);
                    line.extend_from_slice(b"\r\n");
                    self.write_steps.push_back(WriteChunk::Data(line));
                    self.reset_idle();
                }
                Action::StartTls => self.start_tls_requested = true,
                Action::SetGreeting(greeting) => lock(&self.shared).greeting = greeting,
                Action::Complete => completed = true,
            }
        }
        completed
    }

    fn log_sent(&mut self, bytes: &[u8]) {
        if self.traffic {
            eprintln!("C: {}", String::from_utf8_lossy(bytes).trim_end());
        }
        if matches!(
            self.state,
            SessionState::Authenticated | SessionState::Selected
        ) {
            if let Some(logger) = &mut self.logger {
                logger.data_sent(bytes);
            }
        }
    }

    fn publish_queue_size(&mut self) {
        let size = self.queue.len() + usize::from(self.current.is_some());
        lock(&self.shared).queue_size = size;
        let _ = self.events.send(SessionEvent::JobQueueSizeChanged(size));
    }

    fn watchdog_armed(&self) -> bool {
        self.timeout_secs >= 0
            && (self.current.is_some() || self.state == SessionState::Disconnected)
    }

    fn reset_idle(&mut self) {
        if self.timeout_secs >= 0 {
            self.idle_deadline = Instant::now() + Duration::from_secs(self.timeout_secs as u64);
        }
    }

    /// Final exit: report the error to the running job and everything
    /// queued behind it, publish the state change, drop the queue.
    fn teardown(&mut self, error: Error) {
        if !self.alive {
            return;
        }
        self.alive = false;
        if let Some(stats) = &self.timing {
            stats.report();
        }
        if let Some(logger) = &mut self.logger {
            logger.disconnected();
        }
        if self.state != SessionState::Disconnected {
            let old = self.state;
            self.state = SessionState::Disconnected;
            let mut observed = lock(&self.shared);
            observed.state = Some(SessionState::Disconnected);
            observed.current_mailbox.clear();
            drop(observed);
            let _ = self.events.send(SessionEvent::StateChanged {
                new: SessionState::Disconnected,
                old,
            });
        } else {
            // Dropped before the greeting: the connection never came up.
            let _ = self.events.send(SessionEvent::ConnectionFailed);
        }
        if let Some(mut job) = self.current.take() {
            job.connection_lost(error.clone());
        }
        while let Some(mut job) = self.queue.pop_front() {
            job.connection_lost(error.clone());
        }
        self.publish_queue_size();
    }
}
