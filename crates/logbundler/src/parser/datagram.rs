// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use super::{Constraints, Parser, ParserBase};
use crate::constants::{ENTRY_OVERHEAD, PARTIAL_OVERHEAD};
use crate::data::DataBlock;
use crate::entry::{LogContent, LogEntry, Partial};
use crate::errors::ParseError;
use std::time::Instant;

const MAX_VARINT_LEN: usize = 10;

/// Prefixes `data` with its LEB128-encoded length.
#[must_use]
pub fn frame_datagram(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + MAX_VARINT_LEN);
    let mut len = data.len() as u64;
    loop {
        let byte = (len & 0x7f) as u8;
        len >>= 7;
        if len == 0 {
            out.push(byte);
            break;
        }
        out.push(byte | 0x80);
    }
    out.extend_from_slice(data);
    out
}

/// Decodes a LEB128 length prefix. `Ok(None)` means more bytes are needed.
fn decode_header(buf: &[u8]) -> Result<Option<(u64, usize)>, ParseError> {
    let mut value = 0u64;
    for (i, byte) in buf.iter().take(MAX_VARINT_LEN).enumerate() {
        if i == MAX_VARINT_LEN - 1 && *byte > 1 {
            return Err(ParseError::InvalidDatagramHeader);
        }
        value |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
    }
    if buf.len() >= MAX_VARINT_LEN {
        return Err(ParseError::InvalidDatagramHeader);
    }
    Ok(None)
}

/// A datagram whose fragments are being emitted.
struct InFlight {
    size: usize,
    emitted: usize,
    index: u32,
}

/// Emits length-prefixed datagrams, one per entry.
pub struct DatagramParser {
    base: ParserBase,
    max_size: usize,
    // number of completed datagrams
    count: u64,
    in_flight: Option<InFlight>,
}

impl DatagramParser {
    #[must_use]
    pub fn new(started_at: Instant, max_size: usize) -> Self {
        Self {
            base: ParserBase::new(started_at),
            max_size,
            count: 0,
            in_flight: None,
        }
    }

    fn next_fragment(&mut self, c: &Constraints) -> Result<Option<LogEntry>, ParseError> {
        let Some(frame) = self.in_flight.as_mut() else {
            return Ok(None);
        };
        let remaining = frame.size - frame.emitted;
        let buffered = self.base.buffer.len();
        if c.closed && buffered < remaining {
            return Err(ParseError::TruncatedDatagram {
                buffered: frame.emitted + buffered,
                size: frame.size,
            });
        }

        let room = c.limit.saturating_sub(ENTRY_OVERHEAD + PARTIAL_OVERHEAD);
        let n = remaining.min(buffered).min(room);
        if n == 0 {
            return Ok(None);
        }

        let arrived_at = self.base.buffer.first_time();
        let data = self.base.buffer.take(n);
        frame.emitted += n;
        let partial = Partial {
            index: frame.index,
            size: frame.size as u64,
            last: frame.emitted == frame.size,
        };
        frame.index += 1;

        let sequence = self.count;
        if partial.last {
            self.in_flight = None;
            self.count += 1;
        }
        Ok(Some(self.base.emit(
            sequence,
            arrived_at,
            LogContent::Datagram {
                data,
                partial: Some(partial),
            },
        )))
    }
}

impl Parser for DatagramParser {
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
        if self.in_flight.is_some() {
            return self.next_fragment(c);
        }

        let buffered = self.base.buffer.len();
        if buffered == 0 {
            return Ok(None);
        }

        let Some((size, header_len)) = decode_header(&self.base.buffer.peek(MAX_VARINT_LEN))?
        else {
            if c.closed {
                return Err(ParseError::TruncatedHeader { buffered });
            }
            return Ok(None);
        };
        let size = match usize::try_from(size) {
            Ok(size) if size <= self.max_size => size,
            _ => {
                return Err(ParseError::DatagramTooLarge {
                    size,
                    max: self.max_size,
                })
            }
        };

        let body = buffered - header_len;
        if body >= size && ENTRY_OVERHEAD + size <= c.limit {
            let arrived_at = self.base.buffer.first_time();
            self.base.buffer.consume(header_len);
            let data = self.base.buffer.take(size);
            let sequence = self.count;
            self.count += 1;
            return Ok(Some(self.base.emit(
                sequence,
                arrived_at,
                LogContent::Datagram {
                    data,
                    partial: None,
                },
            )));
        }

        if c.closed && body < size {
            return Err(ParseError::TruncatedDatagram {
                buffered: body,
                size,
            });
        }

        // Incomplete, or complete but too large for the limit.
        if !c.allow_split || c.limit <= ENTRY_OVERHEAD + PARTIAL_OVERHEAD || body == 0 {
            return Ok(None);
        }
        self.base.buffer.consume(header_len);
        self.in_flight = Some(InFlight {
            size,
            emitted: 0,
            index: 0,
        });
        self.next_fragment(c)
    }
}
