/*
 * imapset.rs
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

//! Compressed sets of message sequence numbers or UIDs.
//!
//! An [`ImapSet`] is a list of inclusive intervals over positive 64-bit
//! integers, serialized in IMAP sequence-set syntax: `3`, `5:9`, `12:*`.
//! The `*` endpoint stands for "the highest number in the mailbox".

use std::fmt;

/// One inclusive interval. An open interval (`begin:*`) has no end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImapInterval {
    begin: u64,
    end: Option<u64>,
}

impl ImapInterval {
    pub fn new(begin: u64, end: u64) -> Self {
        Self {
            begin,
            end: Some(end),
        }
    }

    /// Interval from `begin` to the end of the mailbox (`begin:*`).
    pub fn open(begin: u64) -> Self {
        Self { begin, end: None }
    }

    pub fn single(value: u64) -> Self {
        Self::new(value, value)
    }

    pub fn begin(&self) -> u64 {
        self.begin
    }

    pub fn end(&self) -> Option<u64> {
        self.end
    }
}

impl fmt::Display for ImapInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.end {
            Some(end) if end == self.begin => write!(f, "{}", self.begin),
            Some(end) => write!(f, "{}:{}", self.begin, end),
            None => write!(f, "{}:*", self.begin),
        }
    }
}

/// A set of sequence numbers or UIDs with range compression.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImapSet {
    intervals: Vec<ImapInterval>,
}

impl ImapSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// The whole mailbox, `1:*`.
    pub fn all() -> Self {
        let mut set = Self::new();
        set.push_interval(ImapInterval::open(1));
        set
    }

    /// Add a single value, merging into an adjacent or overlapping
    /// interval when possible.
    pub fn add(&mut self, value: u64) {
        for interval in &mut self.intervals {
            match interval.end {
                None => {
                    if value + 1 >= interval.begin {
                        interval.begin = interval.begin.min(value);
                        return;
                    }
                }
                Some(end) => {
                    if value + 1 >= interval.begin && value <= end.saturating_add(1) {
                        interval.begin = interval.begin.min(value);
                        interval.end = Some(end.max(value));
                        return;
                    }
                }
            }
        }
        self.intervals.push(ImapInterval::single(value));
    }

    /// Append an interval verbatim; no merging is attempted.
    pub fn push_interval(&mut self, interval: ImapInterval) {
        self.intervals.push(interval);
    }

    pub fn intervals(&self) -> &[ImapInterval] {
        &self.intervals
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// Serialize in IMAP sequence-set syntax (`1,5:9,12:*`).
    pub fn to_imap_sequence_set(&self) -> String {
        self.to_string()
    }

    /// Parse IMAP sequence-set syntax. Returns `None` on any malformed
    /// element; `*:*` and reversed ranges are rejected.
    pub fn from_imap_sequence_set(text: &str) -> Option<Self> {
        let mut set = Self::new();
        for element in text.split(',') {
            let element = element.trim();
            if element.is_empty() {
                return None;
            }
            match element.split_once(':') {
                None => set.add(element.parse().ok().filter(|&v| v > 0)?),
                Some((begin, end)) => {
                    let begin: u64 = begin.parse().ok().filter(|&v| v > 0)?;
                    if end == "*" {
                        set.push_interval(ImapInterval::open(begin));
                    } else {
                        let end: u64 = end.parse().ok().filter(|&v| v > 0)?;
                        if end < begin {
                            return None;
                        }
                        set.push_interval(ImapInterval::new(begin, end));
                    }
                }
            }
        }
        Some(set)
    }
}

impl fmt::Display for ImapSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, interval) in self.intervals.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", interval)?;
        }
        Ok(())
    }
}

impl FromIterator<u64> for ImapSet {
    fn from_iter<I: IntoIterator<Item = u64>>(iter: I) -> Self {
        let mut values: Vec<u64> = iter.into_iter().collect();
        values.sort_unstable();
        values.dedup();
        let mut set = Self::new();
        for value in values {
            set.add(value);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compresses_ranges() {
        let set: ImapSet = [1u64, 2, 3, 7, 9, 10].into_iter().collect();
        assert_eq!(set.to_imap_sequence_set(), "1:3,7,9:10");
    }

    #[test]
    fn open_interval() {
        let mut set = ImapSet::new();
        set.push_interval(ImapInterval::open(12));
        assert_eq!(set.to_imap_sequence_set(), "12:*");
        assert_eq!(ImapSet::all().to_imap_sequence_set(), "1:*");
    }

    #[test]
    fn parse_round_trip() {
        let set = ImapSet::from_imap_sequence_set("1:3,7,9:10,12:*").unwrap();
        assert_eq!(set.to_imap_sequence_set(), "1:3,7,9:10,12:*");
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(ImapSet::from_imap_sequence_set("").is_none());
        assert!(ImapSet::from_imap_sequence_set("0").is_none());
        assert!(ImapSet::from_imap_sequence_set("5:2").is_none());
        assert!(ImapSet::from_imap_sequence_set("a:b").is_none());
    }

    #[test]
    fn add_merges_adjacent() {
        let mut set = ImapSet::new();
        set.add(5);
        set.add(6);
        set.add(4);
        assert_eq!(set.to_imap_sequence_set(), "4:6");
    }
}
