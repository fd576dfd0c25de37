/*
 * message.rs
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

//! Parsed IMAP server response.
//!
//! A response is two ordered part sequences: `content` (the tag, the status
//! word and everything after the response code) and `response_code` (the
//! items found between `[` and `]` after the status word, e.g.
//! `PERMANENTFLAGS` or `COPYUID`). Quoting and literal framing are erased
//! during parsing; parts are opaque byte strings or flat lists.

/// One element of a response line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Part {
    /// Atom, quoted string or literal; framing is erased.
    String(Vec<u8>),
    /// Parenthesized list. Nested lists are kept as their verbatim bytes,
    /// parentheses included.
    List(Vec<Vec<u8>>),
    /// The unquoted atom `NIL`, equivalent to an empty list.
    Nil,
}

impl Part {
    /// String bytes of this part; empty for lists and NIL.
    pub fn as_string(&self) -> &[u8] {
        match self {
            Part::String(b) => b,
            _ => b"",
        }
    }

    /// List view of this part; NIL reads as the empty list.
    pub fn as_list(&self) -> &[Vec<u8>] {
        match self {
            Part::List(items) => items,
            _ => &[],
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(self, Part::List(_) | Part::Nil)
    }

    /// Single-line rendering: strings verbatim, lists as `(a b c)`.
    pub fn to_flat_bytes(&self) -> Vec<u8> {
        match self {
            Part::String(b) => b.clone(),
            Part::Nil => b"NIL".to_vec(),
            Part::List(items) => {
                let mut out = vec![b'('];
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(b' ');
                    }
                    out.extend_from_slice(item);
                }
                out.push(b')');
                out
            }
        }
    }
}

/// A full parsed response line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    pub content: Vec<Part>,
    pub response_code: Vec<Part>,
}

impl Message {
    /// The leading tag: `*` for untagged responses, `+` for continuation
    /// prompts, otherwise the client-assigned tag. Empty for empty lines.
    pub fn tag(&self) -> &[u8] {
        self.content.first().map(Part::as_string).unwrap_or(b"")
    }

    /// The status word or response name following the tag.
    pub fn code(&self) -> &[u8] {
        self.content.get(1).map(Part::as_string).unwrap_or(b"")
    }

    pub fn is_untagged(&self) -> bool {
        self.tag() == b"*"
    }

    pub fn is_continuation(&self) -> bool {
        self.tag() == b"+"
    }

    /// True when the response code block contains the given keyword.
    pub fn has_response_code(&self, key: &[u8]) -> bool {
        self.response_code
            .iter()
            .any(|p| p.as_string().eq_ignore_ascii_case(key))
    }

    /// Content parts from `index` on, joined with single spaces; lists are
    /// re-serialized in parentheses. Used for greetings and error text.
    pub fn flatten_from(&self, index: usize) -> Vec<u8> {
        let mut out = Vec::new();
        for part in self.content.iter().skip(index) {
            if !out.is_empty() {
                out.push(b' ');
            }
            out.extend_from_slice(&part.to_flat_bytes());
        }
        out
    }

    /// Whole line rendered for logs and error messages, response code
    /// included.
    pub fn to_flat_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for (i, part) in self.content.iter().enumerate() {
            if i > 0 {
                out.push(b' ');
            }
            out.extend_from_slice(&part.to_flat_bytes());
            if i == 1 && !self.response_code.is_empty() {
                out.push(b' ');
                out.push(b'[');
                for (j, rc) in self.response_code.iter().enumerate() {
                    if j > 0 {
                        out.push(b' ');
                    }
                    out.extend_from_slice(&rc.to_flat_bytes());
                }
                out.push(b']');
            }
        }
        out
    }

    /// Lossy UTF-8 rendering of [`Message::to_flat_bytes`].
    pub fn to_flat_string(&self) -> String {
        String::from_utf8_lossy(&self.to_flat_bytes()).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part(s: &str) -> Part {
        Part::String(s.as_bytes().to_vec())
    }

    #[test]
    fn tag_and_code() {
        let message = Message {
            content: vec![part("A000001"), part("OK"), part("done")],
            response_code: Vec::new(),
        };
        assert_eq!(message.tag(), b"A000001");
        assert_eq!(message.code(), b"OK");
        assert!(!message.is_untagged());
    }

    #[test]
    fn flatten_reserializes_lists() {
        let message = Message {
            content: vec![
                part("*"),
                part("OK"),
                Part::List(vec![b"a".to_vec(), b"b".to_vec()]),
                part("ready"),
            ],
            response_code: Vec::new(),
        };
        assert_eq!(message.flatten_from(2), b"(a b) ready".to_vec());
    }

    #[test]
    fn flat_string_includes_response_code() {
        let message = Message {
            content: vec![part("A000003"), part("OK"), part("completed")],
            response_code: vec![part("READ-WRITE")],
        };
        assert_eq!(message.to_flat_string(), "A000003 OK [READ-WRITE] completed");
    }

    #[test]
    fn nil_reads_as_empty_list() {
        assert_eq!(Part::Nil.as_list(), &[] as &[Vec<u8>]);
        assert!(Part::Nil.is_list());
        assert_eq!(Part::Nil.to_flat_bytes(), b"NIL".to_vec());
    }
}
