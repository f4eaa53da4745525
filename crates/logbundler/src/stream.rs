// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! A single log stream: producer-side buffering with backpressure and
//! consumer-side extraction into bundles.
//!
//! Producers call [`Stream::append`], which blocks while the stream holds more
//! than its configured number of buffered bytes. The bundler calls
//! [`Stream::next_bundle_entry`], which moves parsed entries into a
//! [`BundleBuilder`] and wakes a blocked producer when it frees space.
//!
//! Two locks guard a stream. The state lock serializes extraction and
//! lifecycle changes; the parser lock guards the buffered data and is the only
//! lock a producer takes. When both are needed the state lock comes first.

use crate::builder::BundleBuilder;
use crate::data::{DataBlock, DataPool};
use crate::entry::StreamDescriptor;
use crate::errors::StreamError;
use crate::parser::{Constraints, Parser};
use crate::signal::ConsumedSignal;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::{Duration, Instant};
use tracing::{debug, error, trace};

/// Called after every append attempt with whether the block was accepted.
/// Runs while the parser lock is held.
pub type AppendObserver = Arc<dyn Fn(bool) + Send + Sync>;

#[derive(Clone)]
pub struct StreamConfig {
    pub descriptor: Arc<StreamDescriptor>,
    pub max_buffered_bytes: usize,
    pub max_buffer_duration: Duration,
    pub on_append: Option<AppendObserver>,
}

impl fmt::Debug for StreamConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamConfig")
            .field("descriptor", &self.descriptor)
            .field("max_buffered_bytes", &self.max_buffered_bytes)
            .field("max_buffer_duration", &self.max_buffer_duration)
            .field("on_append", &self.on_append.is_some())
            .finish()
    }
}

/// Externally visible lifecycle of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Open,
    /// Closed, with buffered data left to extract
    Closing,
    /// Closed and fully extracted
    Drained,
    Errored,
}

#[derive(Debug, Default)]
struct Extraction {
    last_index: Option<u64>,
    // the terminal marker was written, or the stream drained without entries
    terminated: bool,
}

pub struct Stream {
    config: StreamConfig,
    pool: Arc<DataPool>,
    parser: Mutex<Box<dyn Parser>>,
    extraction: Mutex<Extraction>,
    closed: AtomicBool,
    drained: AtomicBool,
    error: OnceLock<StreamError>,
    waiters: AtomicUsize,
    consumed: ConsumedSignal,
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("name", &self.name())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Stream {
    #[must_use]
    pub fn new(config: StreamConfig, pool: Arc<DataPool>, parser: Box<dyn Parser>) -> Self {
        Self {
            config,
            pool,
            parser: Mutex::new(parser),
            extraction: Mutex::new(Extraction::default()),
            closed: AtomicBool::new(false),
            drained: AtomicBool::new(false),
            error: OnceLock::new(),
            waiters: AtomicUsize::new(0),
            consumed: ConsumedSignal::default(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.config.descriptor.name()
    }

    #[must_use]
    pub fn descriptor(&self) -> &Arc<StreamDescriptor> {
        &self.config.descriptor
    }

    /// An empty block from this stream's pool.
    #[must_use]
    pub fn lease_data(&self) -> DataBlock {
        self.pool.lease()
    }

    /// Hands a filled block to the stream, blocking while the stream is over
    /// its buffer limit.
    ///
    /// A block is always accepted into an empty buffer, so a single block
    /// larger than the limit cannot wedge a producer. The block is consumed
    /// in every case; when an error is returned its buffer went back to the
    /// pool.
    pub fn append(&self, block: DataBlock) -> Result<(), StreamError> {
        if let Some(err) = self.error.get() {
            return Err(err.clone());
        }
        let len = block.len();
        if len == 0 {
            return Ok(());
        }

        let mut pending = Some(block);
        loop {
            let accepted = {
                let mut parser = self.lock_parser();
                // Checked under the parser lock so that `close` either sees
                // this block buffered or this call sees the stream closed.
                if self.closed.load(Ordering::SeqCst) {
                    return Err(StreamError::Closed(self.name().to_string()));
                }
                let buffered = parser.buffered_bytes();
                let accepted = buffered == 0 || buffered + len <= self.config.max_buffered_bytes;
                if accepted {
                    if let Some(block) = pending.take() {
                        parser.append_data(block, Instant::now());
                    }
                }
                if let Some(observer) = &self.config.on_append {
                    observer(accepted);
                }
                accepted
            };
            if accepted {
                return Ok(());
            }

            trace!("BUNDLER | stream {} is full, blocking producer", self.name());
            self.waiters.fetch_add(1, Ordering::SeqCst);
            self.consumed.wait(|| self.error.get().is_some() || self.closed.load(Ordering::SeqCst));
            self.waiters.fetch_sub(1, Ordering::SeqCst);

            if let Some(err) = self.error.get() {
                return Err(err.clone());
            }
        }
    }

    /// Marks the stream closed. Buffered data is still extracted; blocked and
    /// future appends fail. Closing twice is a no-op.
    pub fn close(&self) {
        let extraction = self.lock_extraction();
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.maybe_set_drained(&extraction);
        self.consumed.broadcast();
        debug!("BUNDLER | closed stream {}", self.name());
    }

    #[must_use]
    pub fn state(&self) -> StreamState {
        if self.error.get().is_some() {
            StreamState::Errored
        } else if self.drained.load(Ordering::SeqCst) {
            StreamState::Drained
        } else if self.closed.load(Ordering::SeqCst) {
            StreamState::Closing
        } else {
            StreamState::Open
        }
    }

    #[must_use]
    pub fn error(&self) -> Option<&StreamError> {
        self.error.get()
    }

    /// True once the stream is closed and empty, or errored.
    #[must_use]
    pub fn is_drained(&self) -> bool {
        self.drained.load(Ordering::SeqCst)
    }

    /// Drained and its terminal marker handed to a bundle.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.is_drained() && self.lock_extraction().terminated
    }

    #[must_use]
    pub fn buffered_bytes(&self) -> usize {
        self.lock_parser().buffered_bytes()
    }

    /// When the oldest buffered data exceeds its maximum buffering time.
    #[must_use]
    pub fn expire_time(&self) -> Option<Instant> {
        self.lock_parser()
            .first_chunk_time()
            .map(|at| at + self.config.max_buffer_duration)
    }

    /// Whether a producer is waiting in [`append`](Self::append) for space.
    #[must_use]
    pub fn has_blocked_producers(&self) -> bool {
        self.waiters.load(Ordering::SeqCst) > 0
    }

    /// Moves as many entries as fit into `builder`. Returns whether any entry
    /// was added.
    ///
    /// With `aggressive` set, records that do not fit the remaining room are
    /// cut into fragments instead of waiting for a larger bundle. Once the
    /// stream is drained its terminal marker is added, exactly once, as soon
    /// as a bundle has room for it.
    pub fn next_bundle_entry(&self, builder: &mut BundleBuilder, aggressive: bool) -> bool {
        let mut extraction = self.lock_extraction();
        let descriptor = &self.config.descriptor;
        let mut modified = false;

        if !self.maybe_set_drained(&extraction) {
            loop {
                let limit = builder.remaining_for(descriptor);
                if limit == 0 {
                    break;
                }
                let constraints = Constraints {
                    limit,
                    allow_split: aggressive,
                    closed: self.closed.load(Ordering::SeqCst),
                };
                let next = self.lock_parser().next_entry(&constraints);
                match next {
                    Ok(Some(entry)) => {
                        extraction.last_index = Some(entry.stream_index);
                        builder.add(descriptor, entry);
                        modified = true;
                    }
                    Ok(None) => break,
                    Err(source) => {
                        error!("BUNDLER | stream {} failed to parse: {source}", self.name());
                        self.fail(
                            &extraction,
                            StreamError::Parse {
                                stream: self.name().to_string(),
                                source,
                            },
                        );
                        break;
                    }
                }
            }
            if modified {
                self.consumed.notify();
            }
        }

        if self.maybe_set_drained(&extraction) && !extraction.terminated {
            match extraction.last_index {
                Some(index) => {
                    if builder.set_stream_terminal(descriptor, index) {
                        extraction.terminated = true;
                        debug!("BUNDLER | stream {} terminated at {index}", self.name());
                    }
                }
                // Nothing was ever emitted, so there is nothing to terminate.
                None => extraction.terminated = true,
            }
        }
        modified
    }

    /// Stops the stream with `err`: it is considered drained and producers
    /// are released.
    pub(crate) fn abandon(&self, err: StreamError) {
        let extraction = self.lock_extraction();
        self.fail(&extraction, err);
    }

    fn fail(&self, _extraction: &MutexGuard<'_, Extraction>, err: StreamError) {
        if self.error.set(err).is_ok() {
            self.drained.store(true, Ordering::SeqCst);
            self.consumed.broadcast();
        }
    }

    // Requires the extraction lock, which the guard argument witnesses.
    fn maybe_set_drained(&self, _extraction: &MutexGuard<'_, Extraction>) -> bool {
        if self.drained.load(Ordering::SeqCst) {
            return true;
        }
        if self.closed.load(Ordering::SeqCst) && self.lock_parser().buffered_bytes() == 0 {
            self.drained.store(true, Ordering::SeqCst);
            return true;
        }
        false
    }

    #[allow(clippy::expect_used)]
    fn lock_parser(&self) -> MutexGuard<'_, Box<dyn Parser>> {
        self.parser.lock().expect("lock poisoned")
    }

    #[allow(clippy::expect_used)]
    fn lock_extraction(&self) -> MutexGuard<'_, Extraction> {
        self.extraction.lock().expect("lock poisoned")
    }
}
