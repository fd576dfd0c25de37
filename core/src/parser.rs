/*
 * parser.rs
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

//! Streaming IMAP response parser: a byte-driven pushdown automaton that
//! consumes whatever bytes are available and halts cleanly at any point.
//!
//! The parser owns two equally sized byte buffers; the socket fills the
//! active one and the automaton walks it. When the active buffer runs full
//! the unread tail is copied to the other buffer, which becomes active,
//! and any saved token-start marker is rebased. Literal bodies do not flow
//! through the buffers: once `{N}` has been parsed the parser switches to
//! a siphon target and bytes are delivered straight to the sink in chunks.
//!
//! Events are pushed into a [`ParserSink`]; [`MessageBuilder`] is the sink
//! that folds them into [`Message`] values.

use crate::error::Error;
use crate::message::{Message, Part};
use std::collections::VecDeque;

const DEFAULT_BUFFER_SIZE: usize = 16 * 1024;

/// Receiver for parser events, one method per event.
pub trait ParserSink {
    /// A complete atom, quoted string or bracketed token.
    fn string(&mut self, data: &[u8]);
    /// `(` for a parenthesized list, `[` for a response code block.
    fn list_start(&mut self, which: u8);
    /// `)` or `]`, matching [`ParserSink::list_start`].
    fn list_end(&mut self, which: u8);
    fn literal_start(&mut self, size: u64);
    /// A chunk of literal body; called any number of times between
    /// `literal_start` and `literal_end`.
    fn literal_part(&mut self, data: &[u8]);
    fn literal_end(&mut self);
    /// CRLF outside a literal: the current response line is complete.
    fn line_end(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Init,
    Quoted,
    LiteralSize,
    LiteralCrlf,
    LiteralBody,
    Atom,
    AngleBracket,
    Sublist,
    Whitespace,
    Crlf,
}

/// Where the next socket read must land.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadTarget {
    /// Into the working buffer ([`StreamParser::buffer_slot`]).
    Buffer,
    /// Mid-literal with the buffer drained: read up to `remaining` bytes
    /// into [`StreamParser::literal_slot`] instead.
    Literal { remaining: u64 },
}

/// Prompt a server writes after a literal size announcement, telling the
/// client to go ahead with the body.
pub fn continuation_prompt(size: u64) -> Vec<u8> {
    format!("+ Ready for literal data (expecting {} bytes)\r\n", size).into_bytes()
}

fn unescape_quoted(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut escape = false;
    for &b in raw {
        if escape {
            out.push(b);
            escape = false;
        } else if b == b'\\' {
            escape = true;
        } else {
            out.push(b);
        }
    }
    out
}

pub struct StreamParser<S: ParserSink> {
    sink: S,
    current: Vec<u8>,
    spare: Vec<u8>,
    /// Consumption cursor into `current`.
    position: usize,
    /// End of valid data in `current`.
    read_position: usize,
    /// Start of the token in flight, rebased on buffer swap.
    string_start: Option<usize>,
    state: State,
    last_state: State,
    list_counter: u32,
    literal_remaining: u64,
    quoted_escape: bool,
    server_mode: bool,
    pending_continuation: Option<u64>,
    failed: bool,
}

impl<S: ParserSink> StreamParser<S> {
    pub fn new(sink: S) -> Self {
        Self::with_buffer_size(sink, DEFAULT_BUFFER_SIZE)
    }

    /// Server-side variant: surfaces a continuation request after each
    /// literal size announcement so the owner can prompt the client.
    pub fn new_server(sink: S) -> Self {
        let mut parser = Self::new(sink);
        parser.server_mode = true;
        parser
    }

    pub fn with_buffer_size(sink: S, size: usize) -> Self {
        Self {
            sink,
            current: vec![0; size],
            spare: vec![0; size],
            position: 0,
            read_position: 0,
            string_start: None,
            state: State::Init,
            last_state: State::Init,
            list_counter: 0,
            literal_remaining: 0,
            quoted_escape: false,
            server_mode: false,
            pending_continuation: None,
            failed: false,
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// In server mode: the literal size announced since the last call,
    /// for which a `+` continuation prompt must be written.
    pub fn take_continuation_request(&mut self) -> Option<u64> {
        self.pending_continuation.take()
    }

    pub fn read_target(&self) -> ReadTarget {
        if self.state == State::LiteralBody
            && self.literal_remaining > 0
            && self.position >= self.read_position
        {
            ReadTarget::Literal {
                remaining: self.literal_remaining,
            }
        } else {
            ReadTarget::Buffer
        }
    }

    /// Writable tail of the working buffer. Compacts first when the buffer
    /// is full; fails when a single token spans the whole buffer.
    pub fn buffer_slot(&mut self) -> Result<&mut [u8], Error> {
        if self.failed {
            return Err(Error::ProtocolError("parser already failed".into()));
        }
        if self.read_position == self.current.len() {
            self.trim_buffer();
        }
        if self.read_position == self.current.len() {
            self.failed = true;
            return Err(Error::ProtocolError(
                "token exceeds the parser working buffer".into(),
            ));
        }
        Ok(&mut self.current[self.read_position..])
    }

    /// Record `n` bytes written into [`StreamParser::buffer_slot`] and
    /// parse as far as possible.
    pub fn commit(&mut self, n: usize) -> Result<(), Error> {
        self.read_position += n;
        self.process_buffer()
    }

    /// Siphon destination for literal bytes; at most `remaining` long.
    pub fn literal_slot(&mut self) -> &mut [u8] {
        let n = (self.literal_remaining as usize).min(self.spare.len());
        &mut self.spare[..n]
    }

    /// Record `n` literal bytes read into [`StreamParser::literal_slot`].
    pub fn commit_literal(&mut self, n: usize) -> Result<(), Error> {
        if self.failed {
            return Err(Error::ProtocolError("parser already failed".into()));
        }
        debug_assert!(self.state == State::LiteralBody);
        self.sink.literal_part(&self.spare[..n]);
        self.literal_remaining -= n as u64;
        if self.literal_remaining == 0 {
            self.sink.literal_end();
            self.reset_state();
        }
        Ok(())
    }

    /// Convenience for callers that already hold the bytes: routes them
    /// through the buffer or the literal siphon as the automaton requires.
    pub fn feed(&mut self, mut bytes: &[u8]) -> Result<(), Error> {
        while !bytes.is_empty() {
            match self.read_target() {
                ReadTarget::Buffer => {
                    let slot = self.buffer_slot()?;
                    let n = slot.len().min(bytes.len());
                    slot[..n].copy_from_slice(&bytes[..n]);
                    self.commit(n)?;
                    bytes = &bytes[n..];
                }
                ReadTarget::Literal { .. } => {
                    let slot = self.literal_slot();
                    let n = slot.len().min(bytes.len());
                    slot[..n].copy_from_slice(&bytes[..n]);
                    self.commit_literal(n)?;
                    bytes = &bytes[n..];
                }
            }
        }
        Ok(())
    }

    fn set_state(&mut self, state: State) {
        self.last_state = self.state;
        self.state = state;
    }

    /// Advance without touching the saved state, so a later reset still
    /// returns to where the token began.
    fn forward_to(&mut self, state: State) {
        self.state = state;
    }

    fn reset_state(&mut self) {
        self.state = self.last_state;
    }

    fn fail(&mut self, message: &str) -> Error {
        self.failed = true;
        Error::ProtocolError(message.into())
    }

    /// Copy the unread tail (and any token in flight) to the other buffer
    /// and make it active, rebasing the cursors.
    fn trim_buffer(&mut self) {
        let mut offset = self.position;
        if let Some(start) = self.string_start {
            offset = offset.min(start);
        }
        let remainder = self.read_position - offset;
        if remainder > 0 {
            self.spare[..remainder].copy_from_slice(&self.current[offset..self.read_position]);
        }
        std::mem::swap(&mut self.current, &mut self.spare);
        self.read_position = remainder;
        self.position -= offset;
        if let Some(start) = self.string_start.as_mut() {
            *start -= offset;
        }
    }

    fn process_buffer(&mut self) -> Result<(), Error> {
        if self.failed {
            return Err(Error::ProtocolError("parser already failed".into()));
        }
        while self.position < self.read_position {
            let c = self.current[self.position];
            match self.state {
                State::Init => match c {
                    b'(' => {
                        if self.list_counter >= 1 {
                            // Sublists are collected as one verbatim string.
                            self.set_state(State::Sublist);
                            self.string_start = Some(self.position);
                            self.list_counter += 1;
                        } else {
                            self.list_counter += 1;
                            self.sink.list_start(b'(');
                        }
                    }
                    b')' => {
                        if self.list_counter == 0 {
                            return Err(self.fail("unbalanced closing parenthesis"));
                        }
                        self.list_counter -= 1;
                        self.sink.list_end(b')');
                    }
                    b'[' => {
                        if self.list_counter >= 1 {
                            // Inside lists bracketed tokens are strings.
                            self.set_state(State::AngleBracket);
                            self.string_start = Some(self.position);
                        } else {
                            self.sink.list_start(b'[');
                        }
                    }
                    b']' => self.sink.list_end(b']'),
                    b' ' => self.set_state(State::Whitespace),
                    b'\r' => self.set_state(State::Crlf),
                    b'{' => {
                        self.set_state(State::LiteralSize);
                        self.string_start = Some(self.position + 1);
                    }
                    b'"' => {
                        self.set_state(State::Quoted);
                        self.string_start = Some(self.position + 1);
                        self.quoted_escape = false;
                    }
                    _ => {
                        self.set_state(State::Atom);
                        self.string_start = Some(self.position);
                    }
                },
                State::Quoted => {
                    if self.quoted_escape {
                        self.quoted_escape = false;
                    } else if c == b'\\' {
                        self.quoted_escape = true;
                    } else if c == b'"' {
                        self.reset_state();
                        let start = self.string_start.take().unwrap_or(self.position);
                        let decoded = unescape_quoted(&self.current[start..self.position]);
                        self.sink.string(&decoded);
                    }
                }
                State::LiteralSize => {
                    if c == b'}' {
                        let start = self.string_start.take().unwrap_or(self.position);
                        let digits = &self.current[start..self.position];
                        let size = std::str::from_utf8(digits)
                            .ok()
                            .and_then(|s| s.parse::<u64>().ok());
                        let Some(size) = size else {
                            return Err(self.fail("literal size is not a number"));
                        };
                        self.literal_remaining = size;
                        self.sink.literal_start(size);
                        self.forward_to(State::LiteralCrlf);
                    } else if !c.is_ascii_digit() {
                        return Err(self.fail("literal size is not a number"));
                    }
                }
                State::LiteralCrlf => {
                    // The CRLF after the size is consumed transparently.
                    if c == b'\n' {
                        if self.server_mode && self.literal_remaining > 0 {
                            self.pending_continuation = Some(self.literal_remaining);
                        }
                        if self.literal_remaining == 0 {
                            self.sink.literal_end();
                            self.reset_state();
                        } else {
                            self.forward_to(State::LiteralBody);
                        }
                    }
                }
                State::LiteralBody => {
                    let available = self.read_position - self.position;
                    let take = available.min(self.literal_remaining as usize);
                    if take > 0 {
                        self.sink
                            .literal_part(&self.current[self.position..self.position + take]);
                        self.position += take;
                        self.literal_remaining -= take as u64;
                    }
                    if self.literal_remaining == 0 {
                        self.sink.literal_end();
                        self.reset_state();
                    }
                    continue;
                }
                State::Atom => {
                    if matches!(c, b' ' | b')' | b'(' | b']' | b'\r' | b'"') {
                        self.reset_state();
                        let start = self.string_start.take().unwrap_or(self.position);
                        self.sink.string(&self.current[start..self.position]);
                        continue;
                    }
                    if c == b'[' && self.list_counter >= 1 {
                        // Concatenate the bracketed tail onto this atom:
                        // BODY[HEADER.FIELDS (TO FROM)] is one token.
                        self.forward_to(State::AngleBracket);
                    }
                }
                State::AngleBracket => {
                    if c == b']' {
                        self.reset_state();
                        let start = self.string_start.take().unwrap_or(self.position);
                        self.sink.string(&self.current[start..=self.position]);
                    }
                }
                State::Sublist => {
                    if c == b'(' {
                        self.list_counter += 1;
                    } else if c == b')' {
                        self.list_counter -= 1;
                        if self.list_counter <= 1 {
                            self.reset_state();
                            let start = self.string_start.take().unwrap_or(self.position);
                            self.sink.string(&self.current[start..=self.position]);
                        }
                    }
                }
                State::Whitespace => {
                    if c != b' ' {
                        self.reset_state();
                        continue;
                    }
                }
                State::Crlf => {
                    if c == b'\n' {
                        if self.list_counter != 0 {
                            return Err(self.fail("unbalanced list at end of line"));
                        }
                        self.sink.line_end();
                        self.reset_state();
                    } else {
                        // Tolerate a bare \r.
                        self.reset_state();
                        continue;
                    }
                }
            }
            self.position += 1;
        }
        Ok(())
    }
}

/// Sink that assembles parser events into [`Message`] values.
///
/// Top-level atoms equal to `NIL` become [`Part::Nil`] here, per the
/// historical convention that NIL stands for an empty list; bytes `NIL`
/// inside a parenthesized list and literal bodies stay verbatim.
#[derive(Default)]
pub struct MessageBuilder {
    message: Option<Message>,
    response_code: bool,
    list: Option<Vec<Vec<u8>>>,
    literal: Vec<u8>,
    completed: VecDeque<Message>,
}

impl MessageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next fully parsed response, in arrival order.
    pub fn pop(&mut self) -> Option<Message> {
        self.completed.pop_front()
    }

    fn push_part(&mut self, part: Part) {
        let message = self.message.get_or_insert_with(Message::default);
        if self.response_code {
            message.response_code.push(part);
        } else {
            message.content.push(part);
        }
    }
}

impl ParserSink for MessageBuilder {
    fn string(&mut self, data: &[u8]) {
        if let Some(list) = self.list.as_mut() {
            list.push(data.to_vec());
        } else if data == b"NIL" {
            self.push_part(Part::Nil);
        } else {
            self.push_part(Part::String(data.to_vec()));
        }
    }

    fn list_start(&mut self, which: u8) {
        if which == b'[' {
            self.message.get_or_insert_with(Message::default);
            self.response_code = true;
        } else if self.list.is_none() {
            self.list = Some(Vec::new());
        }
    }

    fn list_end(&mut self, which: u8) {
        if which == b']' {
            self.response_code = false;
        } else if let Some(items) = self.list.take() {
            self.push_part(Part::List(items));
        }
    }

    fn literal_start(&mut self, size: u64) {
        self.literal.clear();
        self.literal.reserve(size.min(64 * 1024) as usize);
    }

    fn literal_part(&mut self, data: &[u8]) {
        self.literal.extend_from_slice(data);
    }

    fn literal_end(&mut self) {
        let bytes = std::mem::take(&mut self.literal);
        if let Some(list) = self.list.as_mut() {
            list.push(bytes);
        } else {
            self.push_part(Part::String(bytes));
        }
    }

    fn line_end(&mut self) {
        if let Some(message) = self.message.take() {
            self.completed.push_back(message);
        }
        self.response_code = false;
        self.list = None;
    }
}

impl StreamParser<MessageBuilder> {
    /// Parser wired to a [`MessageBuilder`]; completed responses are
    /// drained with [`StreamParser::next_message`].
    pub fn for_messages() -> Self {
        Self::new(MessageBuilder::new())
    }

    pub fn next_message(&mut self) -> Option<Message> {
        self.sink.pop()
    }
}
