// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The coordinator that owns all streams and cuts bundles out of them.

use crate::builder::{Bundle, BundleBuilder};
use crate::config::BundlerConfig;
use crate::data::DataPoolRegistry;
use crate::entry::{StreamDescriptor, StreamProperties};
use crate::errors::{Creation, StreamError};
use crate::parser::new_parser;
use crate::stream::{AppendObserver, Stream, StreamConfig};
use hashbrown::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Instant, SystemTime};
use tracing::{debug, error, warn};

/// Monotonic counters describing the bundler's work.
#[derive(Debug, Default)]
pub struct BundlerStats {
    registered: AtomicU64,
    sweeps: AtomicU64,
    bundles: AtomicU64,
    entries: AtomicU64,
}

impl BundlerStats {
    #[must_use]
    pub fn registered(&self) -> u64 {
        self.registered.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn sweeps(&self) -> u64 {
        self.sweeps.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn bundles(&self) -> u64 {
        self.bundles.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn entries(&self) -> u64 {
        self.entries.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
struct Registry {
    streams: Vec<Arc<Stream>>,
    // every name ever registered, so a finished stream cannot be reopened
    names: HashSet<String>,
    cursor: usize,
    closed: bool,
}

#[derive(Debug)]
pub struct Bundler {
    config: BundlerConfig,
    pools: DataPoolRegistry,
    registry: Mutex<Registry>,
    stats: BundlerStats,
}

impl Bundler {
    pub fn new(config: BundlerConfig) -> Result<Self, Creation> {
        config.validate()?;
        Ok(Self {
            config,
            pools: DataPoolRegistry::new(),
            registry: Mutex::new(Registry::default()),
            stats: BundlerStats::default(),
        })
    }

    #[must_use]
    pub fn config(&self) -> &BundlerConfig {
        &self.config
    }

    #[must_use]
    pub fn stats(&self) -> &BundlerStats {
        &self.stats
    }

    pub fn register(&self, properties: StreamProperties) -> Result<Arc<Stream>, Creation> {
        self.register_with(properties, None)
    }

    /// Registers a stream whose append attempts are reported to `on_append`.
    pub fn register_with(
        &self,
        properties: StreamProperties,
        on_append: Option<AppendObserver>,
    ) -> Result<Arc<Stream>, Creation> {
        let properties = properties.normalize()?;
        let mut registry = self.lock_registry();
        if registry.closed {
            return Err(Creation::Closed);
        }
        if registry.names.contains(&properties.name) {
            return Err(Creation::DuplicateStream(properties.name));
        }

        let stream_type = properties.stream_type;
        let descriptor = Arc::new(StreamDescriptor::new(properties, SystemTime::now()));
        if descriptor.min_bundle_size() > self.config.max_bundle_size {
            return Err(Creation::InvalidConfig(format!(
                "stream {} needs bundles of at least {} bytes, max bundle size is {}",
                descriptor.name(),
                descriptor.min_bundle_size(),
                self.config.max_bundle_size
            )));
        }
        let stream = Arc::new(Stream::new(
            StreamConfig {
                descriptor,
                max_buffered_bytes: self.config.max_buffered_bytes,
                max_buffer_duration: self.config.max_buffer_duration,
                on_append,
            },
            self.pools.pool(self.config.chunk_size),
            new_parser(stream_type, Instant::now(), self.config.max_datagram_size),
        ));

        registry.names.insert(stream.name().to_string());
        registry.streams.push(Arc::clone(&stream));
        self.stats.registered.fetch_add(1, Ordering::Relaxed);
        debug!("BUNDLER | registered stream {}", stream.name());
        Ok(stream)
    }

    /// Number of streams not yet finished.
    #[must_use]
    pub fn stream_count(&self) -> usize {
        self.lock_registry().streams.len()
    }

    /// Builds one bundle from the ready data of all streams, or `None` if no
    /// stream had anything to contribute.
    ///
    /// Streams are visited round-robin, starting one stream further on each
    /// call. A stream with a blocked producer, or holding data past its
    /// maximum buffer duration, is always swept aggressively.
    pub fn next_bundle(&self, aggressive: bool) -> Option<Bundle> {
        let streams = self.rotated_streams();
        if streams.is_empty() {
            return None;
        }

        let now = Instant::now();
        let mut builder = BundleBuilder::new(self.config.max_bundle_size);
        for stream in &streams {
            if builder.remaining() == 0 {
                break;
            }
            let aggressive = aggressive
                || stream.has_blocked_producers()
                || stream.expire_time().is_some_and(|at| at <= now);
            stream.next_bundle_entry(&mut builder, aggressive);
        }
        self.prune();

        if builder.is_empty() {
            return None;
        }
        let bundle = builder.finish();
        self.stats.bundles.fetch_add(1, Ordering::Relaxed);
        self.stats
            .entries
            .fetch_add(bundle.log_count() as u64, Ordering::Relaxed);
        Some(bundle)
    }

    /// Builds bundles until none is produced, up to the configured maximum
    /// per sweep.
    pub fn sweep(&self, aggressive: bool) -> Vec<Bundle> {
        self.stats.sweeps.fetch_add(1, Ordering::Relaxed);
        let mut bundles = Vec::new();
        while bundles.len() < self.config.max_bundles_per_sweep {
            match self.next_bundle(aggressive) {
                Some(bundle) => bundles.push(bundle),
                None => break,
            }
        }
        if !bundles.is_empty() {
            debug!("BUNDLER | sweep produced {} bundles", bundles.len());
        }
        bundles
    }

    /// Closes the bundler and every stream, then extracts everything left.
    ///
    /// Streams that stop making progress are failed with
    /// [`StreamError::FlushStalled`] so that this always returns.
    pub fn close_and_flush(&self) -> Vec<Bundle> {
        let streams = {
            let mut registry = self.lock_registry();
            registry.closed = true;
            registry.streams.clone()
        };
        for stream in &streams {
            stream.close();
        }

        let mut bundles = Vec::new();
        let mut stalled = false;
        loop {
            let before = bundles.len();
            bundles.extend(self.sweep(true));
            if self.stream_count() == 0 {
                break;
            }
            if bundles.len() > before {
                stalled = false;
                continue;
            }
            if stalled {
                error!(
                    "BUNDLER | {} streams could not be flushed, giving up",
                    self.stream_count()
                );
                break;
            }
            stalled = true;
            let remaining = self.lock_registry().streams.clone();
            for stream in remaining {
                warn!(
                    "BUNDLER | stream {} stalled during flush with {} bytes buffered",
                    stream.name(),
                    stream.buffered_bytes()
                );
                stream.abandon(StreamError::FlushStalled(stream.name().to_string()));
            }
        }
        bundles
    }

    /// Names of streams holding data older than the maximum buffer duration.
    #[must_use]
    pub fn stale_streams(&self, now: Instant) -> Vec<String> {
        let streams = self.lock_registry().streams.clone();
        streams
            .iter()
            .filter(|s| s.expire_time().is_some_and(|at| at <= now))
            .map(|s| s.name().to_string())
            .collect()
    }

    fn rotated_streams(&self) -> Vec<Arc<Stream>> {
        let mut registry = self.lock_registry();
        let len = registry.streams.len();
        if len == 0 {
            return Vec::new();
        }
        let start = registry.cursor % len;
        registry.cursor = (start + 1) % len;
        let mut streams = registry.streams.clone();
        streams.rotate_left(start);
        streams
    }

    fn prune(&self) {
        let mut registry = self.lock_registry();
        registry.streams.retain(|stream| {
            let finished = stream.is_finished();
            if finished {
                debug!("BUNDLER | stream {} finished", stream.name());
            }
            !finished
        });
    }

    #[allow(clippy::expect_used)]
    fn lock_registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().expect("lock poisoned")
    }
}
