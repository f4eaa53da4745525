// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use super::{Constraints, Parser, ParserBase};
use crate::constants::ENTRY_OVERHEAD;
use crate::data::DataBlock;
use crate::entry::{LogContent, LogEntry, TextLine};
use crate::errors::ParseError;
use std::time::Instant;

/// Packs newline-delimited lines into entries.
pub struct TextParser {
    base: ParserBase,
    // number of completed lines
    line: u64,
}

impl TextParser {
    #[must_use]
    pub fn new(started_at: Instant) -> Self {
        Self {
            base: ParserBase::new(started_at),
            line: 0,
        }
    }

    /// Consumes up to `max` bytes of the current line as an undelimited
    /// fragment. The cut is moved back to a UTF-8 boundary when that leaves a
    /// non-empty fragment; bytes are kept as written either way.
    fn fragment(&mut self, max: usize) -> Option<TextLine> {
        if max == 0 {
            return None;
        }
        let mut raw = self.base.buffer.peek(max);
        if let Err(e) = std::str::from_utf8(&raw) {
            if e.error_len().is_none() && e.valid_up_to() > 0 {
                raw.truncate(e.valid_up_to());
            }
        }
        self.base.buffer.consume(raw.len());
        Some(TextLine {
            value: raw,
            delimiter: "",
        })
    }
}

impl Parser for TextParser {
    fn append_data(&mut self, block: DataBlock, appended_at: Instant) {
        self.base.buffer.append(block, appended_at);
    }

    fn buffered_bytes(&self) -> usize {
        self.base.buffer.len()
    }

    fn first_chunk_time(&self) -> Option<Instant> {
        self.base.buffer.first_time()
    }

    fn next_entry(&mut self, c: &Constraints) -> Result<Option<LogEntry>, ParseError> {
        if c.limit <= ENTRY_OVERHEAD || self.base.buffer.is_empty() {
            return Ok(None);
        }
        let mut budget = c.limit - ENTRY_OVERHEAD;
        let arrived_at = self.base.buffer.first_time();
        let sequence = self.line;
        let mut lines = Vec::new();

        while !self.base.buffer.is_empty() {
            let buffered = self.base.buffer.len();
            match self.base.buffer.find(b'\n', buffered) {
                Some(pos) => {
                    let cost = TextLine::cost(pos, 1);
                    if cost <= budget {
                        let mut raw = self.base.buffer.take(pos + 1);
                        raw.pop();
                        let delimiter = if raw.last() == Some(&b'\r') {
                            raw.pop();
                            "\r\n"
                        } else {
                            "\n"
                        };
                        lines.push(TextLine {
                            value: raw,
                            delimiter,
                        });
                        budget -= cost;
                        self.line += 1;
                        continue;
                    }

                    // The line alone is too large for what is left.
                    if lines.is_empty() && c.allow_split {
                        let max = pos.min(budget.saturating_sub(TextLine::cost(0, 0)));
                        lines.extend(self.fragment(max));
                    }
                    break;
                }
                None => {
                    // Only an unterminated line is buffered.
                    if !(c.closed || c.allow_split) {
                        break;
                    }
                    let room = budget.saturating_sub(TextLine::cost(0, 0));
                    if buffered <= room {
                        lines.extend(self.fragment(buffered));
                        if c.closed {
                            self.line += 1;
                        }
                    } else if lines.is_empty() {
                        lines.extend(self.fragment(room));
                    }
                    break;
                }
            }
        }

        if lines.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.base.emit(
            sequence,
            arrived_at,
            LogContent::Text { lines },
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::LINE_OVERHEAD;
    use crate::data::DataPool;
    use crate::parser::test_support::block;

    const OPEN: Constraints = Constraints {
        limit: 1024,
        allow_split: false,
        closed: false,
    };

    fn lines_of(entry: &LogEntry) -> Vec<(&str, &str)> {
        match &entry.content {
            LogContent::Text { lines } => lines
                .iter()
                .map(|l| (std::str::from_utf8(&l.value).unwrap(), l.delimiter))
                .collect(),
            other => panic!("unexpected content {other:?}"),
        }
    }

    fn raw_of(entry: &LogEntry) -> Vec<u8> {
        match &entry.content {
            LogContent::Text { lines } => lines
                .iter()
                .flat_map(|l| l.value.iter().chain(l.delimiter.as_bytes()))
                .copied()
                .collect(),
            other => panic!("unexpected content {other:?}"),
        }
    }

    fn parser_with(parts: &[&[u8]]) -> TextParser {
        let pool = DataPool::new(256);
        let mut parser = TextParser::new(Instant::now());
        for part in parts {
            parser.append_data(block(&pool, part), Instant::now());
        }
        parser
    }

    #[test]
    fn test_packs_complete_lines() {
        let mut parser = parser_with(&[b"one\ntw", b"o\r\nthree"]);

        let entry = parser.next_entry(&OPEN).unwrap().unwrap();
        assert_eq!(entry.stream_index, 0);
        assert_eq!(entry.sequence, 0);
        assert_eq!(lines_of(&entry), vec![("one", "\n"), ("two", "\r\n")]);

        // "three" is unterminated and the stream is open.
        assert!(parser.next_entry(&OPEN).unwrap().is_none());
        assert_eq!(parser.buffered_bytes(), 5);
    }

    #[test]
    fn test_closed_flushes_trailing_line() {
        let mut parser = parser_with(&[b"a\nlast"]);
        parser.next_entry(&OPEN).unwrap().unwrap();

        let closed = Constraints {
            closed: true,
            ..OPEN
        };
        let entry = parser.next_entry(&closed).unwrap().unwrap();
        assert_eq!(entry.stream_index, 1);
        assert_eq!(entry.sequence, 1);
        assert_eq!(lines_of(&entry), vec![("last", "")]);
        assert_eq!(parser.buffered_bytes(), 0);
        assert!(parser.next_entry(&closed).unwrap().is_none());
    }

    #[test]
    fn test_limit_splits_lines_across_entries() {
        let mut parser = parser_with(&[b"aaaa\nbbbb\ncccc\n"]);
        // Room for exactly two lines.
        let c = Constraints {
            limit: ENTRY_OVERHEAD + 2 * (LINE_OVERHEAD + 5),
            ..OPEN
        };

        let first = parser.next_entry(&c).unwrap().unwrap();
        assert_eq!(lines_of(&first).len(), 2);
        assert!(first.size() <= c.limit);

        let second = parser.next_entry(&c).unwrap().unwrap();
        assert_eq!(second.sequence, 2);
        assert_eq!(lines_of(&second), vec![("cccc", "\n")]);
    }

    #[test]
    fn test_oversized_line_deferred_without_split() {
        let mut parser = parser_with(&[b"0123456789abcdef\n"]);
        let c = Constraints {
            limit: ENTRY_OVERHEAD + LINE_OVERHEAD + 8,
            ..OPEN
        };

        assert!(parser.next_entry(&c).unwrap().is_none());
        assert_eq!(parser.buffered_bytes(), 17);
    }

    #[test]
    fn test_oversized_line_split_when_aggressive() {
        let mut parser = parser_with(&[b"0123456789abcdef\n"]);
        let c = Constraints {
            limit: ENTRY_OVERHEAD + LINE_OVERHEAD + 8,
            allow_split: true,
            closed: false,
        };

        let first = parser.next_entry(&c).unwrap().unwrap();
        assert_eq!(lines_of(&first), vec![("01234567", "")]);
        assert!(first.size() <= c.limit);

        let second = parser.next_entry(&c).unwrap().unwrap();
        assert_eq!(lines_of(&second), vec![("89abcdef", "")]);
        assert_eq!(second.sequence, 0);

        let third = parser.next_entry(&c).unwrap().unwrap();
        assert_eq!(lines_of(&third), vec![("", "\n")]);
        assert_eq!(third.sequence, 0);
        assert_eq!(third.stream_index, 2);

        assert!(parser.next_entry(&c).unwrap().is_none());
    }

    #[test]
    fn test_split_respects_utf8_boundary() {
        // "é" is two bytes; a 4-byte cut would land inside the second one.
        let mut parser = parser_with(&["aéé\n".as_bytes()]);
        let c = Constraints {
            limit: ENTRY_OVERHEAD + LINE_OVERHEAD + 4,
            allow_split: true,
            closed: false,
        };

        let first = parser.next_entry(&c).unwrap().unwrap();
        assert_eq!(lines_of(&first), vec![("aé", "")]);
        let second = parser.next_entry(&c).unwrap().unwrap();
        assert_eq!(lines_of(&second), vec![("é", "\n")]);
    }

    #[test]
    fn test_invalid_utf8_is_kept_within_limit() {
        let mut data = vec![0xff; 800];
        data.push(b'\n');
        let parts: Vec<&[u8]> = data.chunks(256).collect();
        let mut parser = parser_with(&parts);
        let c = Constraints {
            limit: ENTRY_OVERHEAD + LINE_OVERHEAD + 801,
            ..OPEN
        };

        let entry = parser.next_entry(&c).unwrap().unwrap();
        assert_eq!(entry.size(), c.limit);
        assert_eq!(raw_of(&entry), data);
        assert_eq!(parser.buffered_bytes(), 0);
    }

    #[test]
    fn test_split_narrower_than_a_character() {
        // Each fragment has room for one byte, less than one "é".
        let input = "éé\n".as_bytes();
        let mut parser = parser_with(&[input]);
        let c = Constraints {
            limit: ENTRY_OVERHEAD + LINE_OVERHEAD + 1,
            allow_split: true,
            closed: false,
        };

        let mut out = Vec::new();
        while let Some(entry) = parser.next_entry(&c).unwrap() {
            assert!(entry.size() <= c.limit);
            out.extend(raw_of(&entry));
        }
        assert_eq!(out, input);
        assert_eq!(parser.buffered_bytes(), 0);
    }

    #[test]
    fn test_limit_below_overhead_yields_nothing() {
        let mut parser = parser_with(&[b"x\n"]);
        let c = Constraints {
            limit: ENTRY_OVERHEAD,
            allow_split: true,
            closed: true,
        };
        assert!(parser.next_entry(&c).unwrap().is_none());
    }
}
