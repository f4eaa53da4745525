// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Ordered buffer of data blocks that parsers read from.

use crate::data::DataBlock;
use std::collections::VecDeque;
use std::time::Instant;

struct Chunk {
    block: DataBlock,
    appended_at: Instant,
}

/// Unconsumed blocks of one stream, in append order.
///
/// Consumption is byte-granular: the front block may be partially consumed.
/// A block is released back to its pool as soon as its last byte is consumed.
#[derive(Default)]
pub(crate) struct ChunkBuffer {
    chunks: VecDeque<Chunk>,
    // consumed bytes of the front chunk
    offset: usize,
    len: usize,
}

impl ChunkBuffer {
    pub(crate) fn append(&mut self, block: DataBlock, appended_at: Instant) {
        if block.is_empty() {
            return;
        }
        self.len += block.len();
        self.chunks.push_back(Chunk { block, appended_at });
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append time of the oldest block that still holds unconsumed bytes.
    pub(crate) fn first_time(&self) -> Option<Instant> {
        self.chunks.front().map(|c| c.appended_at)
    }

    fn slices(&self) -> impl Iterator<Item = &[u8]> {
        let offset = self.offset;
        self.chunks.iter().enumerate().map(move |(i, c)| {
            if i == 0 {
                &c.block.bytes()[offset..]
            } else {
                c.block.bytes()
            }
        })
    }

    /// Position of the first occurrence of `byte`, searching at most `limit`
    /// bytes.
    pub(crate) fn find(&self, byte: u8, limit: usize) -> Option<usize> {
        let mut base = 0;
        for slice in self.slices() {
            if base >= limit {
                return None;
            }
            let window = &slice[..slice.len().min(limit - base)];
            if let Some(pos) = window.iter().position(|b| *b == byte) {
                return Some(base + pos);
            }
            base += slice.len();
        }
        None
    }

    /// Copies the first `n` buffered bytes (fewer if less are buffered).
    pub(crate) fn peek(&self, n: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(n.min(self.len));
        for slice in self.slices() {
            let want = n - out.len();
            if want == 0 {
                break;
            }
            out.extend_from_slice(&slice[..slice.len().min(want)]);
        }
        out
    }

    /// Drops the first `n` bytes, releasing blocks that become empty.
    pub(crate) fn consume(&mut self, mut n: usize) {
        n = n.min(self.len);
        self.len -= n;
        while n > 0 {
            let Some(front) = self.chunks.front() else {
                break;
            };
            let available = front.block.len() - self.offset;
            if n < available {
                self.offset += n;
                return;
            }
            n -= available;
            self.offset = 0;
            if let Some(chunk) = self.chunks.pop_front() {
                chunk.block.release();
            }
        }
    }

    /// Copies and consumes the first `n` bytes.
    pub(crate) fn take(&mut self, n: usize) -> Vec<u8> {
        let out = self.peek(n);
        self.consume(out.len());
        out
    }
}
