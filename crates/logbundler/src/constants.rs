// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Default limits and wire-size constants for log bundles.
//!
//! The size constants describe the fixed framing cost that every record in a
//! bundle pays on top of its payload. They are deliberately conservative so
//! that the accounted size of a bundle is never smaller than what a sink ends
//! up writing for it.

use std::time::Duration;

/// Size in bytes of the data blocks a stream leases for its producers.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Bytes a stream may hold in its parser before `append` starts blocking.
pub const DEFAULT_MAX_BUFFERED_BYTES: usize = 10 * 1_024 * 1_024;

/// Upper bound on the accounted size of a single bundle.
pub const DEFAULT_MAX_BUNDLE_SIZE: usize = 1_024 * 1_024;

/// How long buffered data may wait before the stream is reported as stale.
pub const DEFAULT_MAX_BUFFER_DURATION: Duration = Duration::from_secs(5);

/// Largest datagram a datagram stream accepts.
pub const DEFAULT_MAX_DATAGRAM_SIZE: usize = 1_024 * 1_024;

/// Upper bound on bundles produced by one sweep, so continuous producers cannot
/// keep a sweep running forever.
pub const DEFAULT_MAX_BUNDLES_PER_SWEEP: usize = 64;

/// Interval between two periodic flushes.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Smallest bundle budget that still leaves room for a stream header, an entry
/// and a terminal marker.
pub const MIN_BUNDLE_SIZE: usize = 1_024;

/// Number of released blocks a pool keeps around for reuse.
pub(crate) const MAX_FREE_BLOCKS: usize = 1_024;

/// Fixed framing cost of one log entry (indices, time offset, content tag).
pub(crate) const ENTRY_OVERHEAD: usize = 32;

/// Framing cost of one text line on top of its value and delimiter.
pub(crate) const LINE_OVERHEAD: usize = 4;

/// Framing cost of the partial-datagram descriptor.
pub(crate) const PARTIAL_OVERHEAD: usize = 12;

/// Fixed framing cost of a stream section inside a bundle, excluding the
/// variable-length descriptor fields.
pub(crate) const STREAM_HEADER_OVERHEAD: usize = 32;

/// Cost of a terminal marker within a stream section.
pub(crate) const TERMINAL_OVERHEAD: usize = 10;
