// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use super::{Constraints, Parser, ParserBase};
use crate::constants::ENTRY_OVERHEAD;
use crate::data::DataBlock;
use crate::entry::{LogContent, LogEntry};
use crate::errors::ParseError;
use std::time::Instant;

/// Emits buffered bytes as-is, in entries of at most the allowed size.
pub struct BinaryParser {
    base: ParserBase,
    offset: u64,
}

impl BinaryParser {
    #[must_use]
    pub fn new(started_at: Instant) -> Self {
        Self {
            base: ParserBase::new(started_at),
            offset: 0,
        }
    }
}

impl Parser for BinaryParser {
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
        let room = c.limit.saturating_sub(ENTRY_OVERHEAD);
        if room == 0 || self.base.buffer.is_empty() {
            return Ok(None);
        }

        let arrived_at = self.base.buffer.first_time();
        let data = self.base.buffer.take(room);
        let sequence = self.offset;
        self.offset += data.len() as u64;
        Ok(Some(self.base.emit(
            sequence,
            arrived_at,
            LogContent::Binary { data },
        )))
    }
}
