// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-stream parsers that turn buffered blocks into log entries.
//!
//! A parser owns the stream's [`ChunkBuffer`]: blocks go in through
//! [`Parser::append_data`] and come out as [`LogEntry`] records through
//! [`Parser::next_entry`]. Entries are emitted in append order and their
//! `stream_index` is assigned here, so it is gap-free per stream.

mod binary;
mod datagram;
mod text;

pub use binary::BinaryParser;
pub use datagram::{frame_datagram, DatagramParser};
pub use text::TextParser;

use crate::chunk::ChunkBuffer;
use crate::data::DataBlock;
use crate::entry::{LogContent, LogEntry, StreamType};
use crate::errors::ParseError;
use std::time::Instant;

/// Limits for one call to [`Parser::next_entry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Constraints {
    /// Largest accounted size the returned entry may have
    pub limit: usize,
    /// Whether a record that does not fit `limit` may be cut into fragments
    pub allow_split: bool,
    /// Whether the stream is closed; buffered data is then final
    pub closed: bool,
}

pub trait Parser: Send {
    fn append_data(&mut self, block: DataBlock, appended_at: Instant);

    fn buffered_bytes(&self) -> usize;

    /// Append time of the oldest unconsumed data.
    fn first_chunk_time(&self) -> Option<Instant>;

    /// Extracts the next entry that fits the constraints, or `None` if no
    /// entry is ready. An error is fatal for the stream.
    fn next_entry(&mut self, c: &Constraints) -> Result<Option<LogEntry>, ParseError>;
}

/// Builds the parser matching a stream type.
#[must_use]
pub fn new_parser(
    stream_type: StreamType,
    started_at: Instant,
    max_datagram_size: usize,
) -> Box<dyn Parser> {
    match stream_type {
        StreamType::Text => Box::new(TextParser::new(started_at)),
        StreamType::Binary => Box::new(BinaryParser::new(started_at)),
        StreamType::Datagram => Box::new(DatagramParser::new(started_at, max_datagram_size)),
    }
}

/// State shared by all parsers: the buffer and the entry counter.
pub(crate) struct ParserBase {
    buffer: ChunkBuffer,
    started_at: Instant,
    next_index: u64,
}

impl ParserBase {
    fn new(started_at: Instant) -> Self {
        Self {
            buffer: ChunkBuffer::default(),
            started_at,
            next_index: 0,
        }
    }

    /// Stamps an entry with the next stream index. `arrived_at` is the append
    /// time of the data the entry starts with.
    fn emit(&mut self, sequence: u64, arrived_at: Option<Instant>, content: LogContent) -> LogEntry {
        let stream_index = self.next_index;
        self.next_index += 1;
        LogEntry {
            stream_index,
            sequence,
            time_offset: arrived_at
                .map(|at| at.saturating_duration_since(self.started_at))
                .unwrap_or_default(),
            content,
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::data::{DataBlock, DataPool};
    use std::sync::Arc;

    pub(crate) fn block(pool: &Arc<DataPool>, data: &[u8]) -> DataBlock {
        let mut block = pool.lease();
        assert_eq!(block.fill(data), data.len(), "test block too small");
        block
    }
}
