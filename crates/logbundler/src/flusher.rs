// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Periodic driver that sweeps the bundler and ships bundles to a sink.

use crate::builder::Bundle;
use crate::bundler::Bundler;
use crate::sink::BundleSink;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Attempts made to ship the final bundles on shutdown.
const SHUTDOWN_SEND_ATTEMPTS: usize = 3;

pub struct BundleFlusher {
    bundler: Arc<Bundler>,
    sink: Arc<dyn BundleSink>,
    // bundles that failed transiently, oldest first
    pending: Vec<Bundle>,
}

impl BundleFlusher {
    #[must_use]
    pub fn new(bundler: Arc<Bundler>, sink: Arc<dyn BundleSink>) -> Self {
        Self {
            bundler,
            sink,
            pending: Vec::new(),
        }
    }

    /// Bundles waiting for a retry.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Retries pending bundles, then sweeps and ships new ones.
    ///
    /// New data is only swept once every pending bundle went out, so a sink
    /// outage turns into backpressure on producers instead of memory growth.
    /// Returns the number of bundles shipped.
    pub async fn flush(&mut self) -> usize {
        let mut shipped = 0;
        if !self.pending.is_empty() {
            let pending = std::mem::take(&mut self.pending);
            shipped += self.ship(pending).await;
            if !self.pending.is_empty() {
                return shipped;
            }
        }

        let bundles = self.bundler.sweep(false);
        shipped += self.ship(bundles).await;
        shipped
    }

    /// Closes the bundler, extracts all remaining data and ships it.
    pub async fn close_and_flush(&mut self) -> usize {
        let bundler = Arc::clone(&self.bundler);
        let remaining = match tokio::task::spawn_blocking(move || bundler.close_and_flush()).await {
            Ok(bundles) => bundles,
            Err(e) => {
                error!("BUNDLER | failed to flush on close: {e}");
                Vec::new()
            }
        };

        let mut bundles = std::mem::take(&mut self.pending);
        bundles.extend(remaining);
        let mut shipped = 0;
        for attempt in 1..=SHUTDOWN_SEND_ATTEMPTS {
            shipped += self.ship(bundles).await;
            if self.pending.is_empty() {
                break;
            }
            debug!(
                "BUNDLER | attempt {attempt}: {} bundles left to ship",
                self.pending.len()
            );
            bundles = std::mem::take(&mut self.pending);
        }
        if !self.pending.is_empty() {
            error!(
                "BUNDLER | dropping {} bundles that could not be shipped on shutdown",
                self.pending.len()
            );
            self.pending.clear();
        }
        shipped
    }

    /// Flushes every `flush_interval` until `cancel_token` fires, then closes
    /// the bundler and ships what is left.
    pub async fn run(mut self, cancel_token: CancellationToken) {
        let mut interval = tokio::time::interval(self.bundler.config().flush_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.flush().await;
                    for name in self.bundler.stale_streams(Instant::now()) {
                        warn!("BUNDLER | stream {name} is holding data past its buffer duration");
                    }
                }
                () = cancel_token.cancelled() => {
                    debug!("BUNDLER | shutting down flusher");
                    self.close_and_flush().await;
                    break;
                }
            }
        }
    }

    /// Sends bundles in order. A transient failure stops the run and keeps
    /// the failed bundle and everything after it for the next attempt;
    /// permanently failing bundles are dropped.
    async fn ship(&mut self, bundles: Vec<Bundle>) -> usize {
        let mut shipped = 0;
        let mut bundles = bundles.into_iter();
        for bundle in bundles.by_ref() {
            match self.sink.send(&bundle).await {
                Ok(()) => shipped += 1,
                Err(e) if e.is_transient() => {
                    warn!("BUNDLER | will retry bundle: {e}");
                    self.pending.push(bundle);
                    break;
                }
                Err(e) => {
                    error!(
                        "BUNDLER | dropping bundle with {} entries: {e}",
                        bundle.log_count()
                    );
                }
            }
        }
        self.pending.extend(bundles);
        shipped
    }
}
