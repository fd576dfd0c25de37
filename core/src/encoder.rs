/*
 * encoder.rs
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

//! Outbound command encoding: tag formatting, argument quoting and
//! literal framing.
//!
//! A command is rendered as a sequence of write chunks. Arguments that
//! cannot travel quoted are framed as `{N}`-prefixed literals; after each
//! size announcement the session must hold the remaining chunks until the
//! server sends its `+` continuation prompt.

/// Format the tag for command number `n`: `A` plus six zero-padded
/// decimal digits (`A000001`, `A000002`, ...).
pub fn format_tag(n: u32) -> String {
    format!("A{:06}", n)
}

/// One step of an encoded command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteChunk {
    /// Bytes to write to the socket as-is.
    Data(Vec<u8>),
    /// Stop writing until the server's `+` continuation arrives.
    AwaitContinuation,
}

/// One command argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandArg {
    /// Pre-encoded bytes, emitted verbatim (atoms, sets, flag lists).
    Raw(Vec<u8>),
    /// A string sent quoted, or as a literal when quoting cannot carry it.
    String(Vec<u8>),
    /// A string always sent as an octet-counted literal.
    Literal(Vec<u8>),
}

impl CommandArg {
    pub fn raw(bytes: impl Into<Vec<u8>>) -> Self {
        CommandArg::Raw(bytes.into())
    }

    pub fn string(bytes: impl Into<Vec<u8>>) -> Self {
        CommandArg::String(bytes.into())
    }
}

/// Quote a string argument: surrounding double quotes, `\` and `"`
/// backslash-escaped.
pub fn quote_string(s: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len() + 2);
    out.push(b'"');
    for &b in s {
        if b == b'"' || b == b'\\' {
            out.push(b'\\');
        }
        out.push(b);
    }
    out.push(b'"');
    out
}

/// True when the bytes cannot be carried inside a quoted string and must
/// be framed as a literal (CR, LF or non-ASCII octets).
pub fn needs_literal(s: &[u8]) -> bool {
    s.iter().any(|&b| b == b'\r' || b == b'\n' || b >= 0x80)
}

/// Render `TAG SP COMMAND [SP ARGS] CRLF` into write chunks, splitting at
/// every literal so the session can wait for the continuation prompt.
pub fn build_command(tag: &str, command: &str, args: &[CommandArg]) -> Vec<WriteChunk> {
    let mut chunks = Vec::new();
    let mut line = format!("{} {}", tag, command).into_bytes();
    for arg in args {
        line.push(b' ');
        let literal = match arg {
            CommandArg::Raw(bytes) => {
                line.extend_from_slice(bytes);
                continue;
            }
            CommandArg::String(bytes) if !needs_literal(bytes) => {
                line.extend_from_slice(&quote_string(bytes));
                continue;
            }
            CommandArg::String(bytes) | CommandArg::Literal(bytes) => bytes,
        };
        line.extend_from_slice(format!("{{{}}}\r\n", literal.len()).as_bytes());
        chunks.push(WriteChunk::Data(std::mem::take(&mut line)));
        chunks.push(WriteChunk::AwaitContinuation);
        line.extend_from_slice(literal);
    }
    line.extend_from_slice(b"\r\n");
    chunks.push(WriteChunk::Data(line));
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_zero_padded_and_monotonic() {
        assert_eq!(format_tag(1), "A000001");
        assert_eq!(format_tag(42), "A000042");
        assert_eq!(format_tag(123456), "A123456");
    }

    #[test]
    fn quoting_escapes_backslash_and_quote() {
        assert_eq!(quote_string(b"plain"), b"\"plain\"".to_vec());
        assert_eq!(quote_string(br#"a"b\c"#), br#""a\"b\\c""#.to_vec());
    }

    #[test]
    fn simple_command_is_one_chunk() {
        let chunks = build_command("A000001", "CAPABILITY", &[]);
        assert_eq!(chunks, vec![WriteChunk::Data(b"A000001 CAPABILITY\r\n".to_vec())]);
    }

    #[test]
    fn string_arg_is_quoted() {
        let chunks = build_command("A000002", "DELETE", &[CommandArg::string("foo")]);
        assert_eq!(
            chunks,
            vec![WriteChunk::Data(b"A000002 DELETE \"foo\"\r\n".to_vec())]
        );
    }

    #[test]
    fn literal_splits_at_continuation() {
        let chunks = build_command(
            "A000003",
            "CREATE",
            &[CommandArg::String(b"war\r\npeace".to_vec())],
        );
        assert_eq!(
            chunks,
            vec![
                WriteChunk::Data(b"A000003 CREATE {10}\r\n".to_vec()),
                WriteChunk::AwaitContinuation,
                WriteChunk::Data(b"war\r\npeace\r\n".to_vec()),
            ]
        );
    }

    #[test]
    fn trailing_args_follow_the_literal() {
        let chunks = build_command(
            "A000004",
            "APPEND",
            &[
                CommandArg::string("box"),
                CommandArg::Literal(b"body".to_vec()),
            ],
        );
        assert_eq!(
            chunks,
            vec![
                WriteChunk::Data(b"A000004 APPEND \"box\" {4}\r\n".to_vec()),
                WriteChunk::AwaitContinuation,
                WriteChunk::Data(b"body\r\n".to_vec()),
            ]
        );
    }
}
