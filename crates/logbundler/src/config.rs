// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::constants;
use crate::errors::Creation;
use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Limits shared by the bundler and every stream it owns.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BundlerConfig {
    /// Bytes a stream may buffer before producers block
    pub max_buffered_bytes: usize,
    /// Budget of a single bundle, in accounted bytes
    pub max_bundle_size: usize,
    /// Age after which buffered data is reported as stale
    pub max_buffer_duration: Duration,
    /// Capacity of the blocks leased to producers
    pub chunk_size: usize,
    /// Largest datagram accepted by datagram streams
    pub max_datagram_size: usize,
    /// Maximum number of bundles a single sweep may produce
    pub max_bundles_per_sweep: usize,
    /// Period of the flusher
    pub flush_interval: Duration,
}

impl Default for BundlerConfig {
    fn default() -> Self {
        Self {
            max_buffered_bytes: constants::DEFAULT_MAX_BUFFERED_BYTES,
            max_bundle_size: constants::DEFAULT_MAX_BUNDLE_SIZE,
            max_buffer_duration: constants::DEFAULT_MAX_BUFFER_DURATION,
            chunk_size: constants::DEFAULT_CHUNK_SIZE,
            max_datagram_size: constants::DEFAULT_MAX_DATAGRAM_SIZE,
            max_bundles_per_sweep: constants::DEFAULT_MAX_BUNDLES_PER_SWEEP,
            flush_interval: constants::DEFAULT_FLUSH_INTERVAL,
        }
    }
}

impl BundlerConfig {
    /// Create configuration from environment variables, falling back to the
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Result<Self, Creation> {
        let defaults = Self::default();
        let config = Self {
            max_buffered_bytes: env_parse("DD_BUNDLER_MAX_BUFFERED_BYTES")
                .unwrap_or(defaults.max_buffered_bytes),
            max_bundle_size: env_parse("DD_BUNDLER_MAX_BUNDLE_SIZE")
                .unwrap_or(defaults.max_bundle_size),
            max_buffer_duration: env_parse("DD_BUNDLER_MAX_BUFFER_DURATION_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_buffer_duration),
            chunk_size: env_parse("DD_BUNDLER_CHUNK_SIZE").unwrap_or(defaults.chunk_size),
            max_datagram_size: env_parse("DD_BUNDLER_MAX_DATAGRAM_SIZE")
                .unwrap_or(defaults.max_datagram_size),
            max_bundles_per_sweep: env_parse("DD_BUNDLER_MAX_BUNDLES_PER_SWEEP")
                .unwrap_or(defaults.max_bundles_per_sweep),
            flush_interval: env_parse("DD_BUNDLER_FLUSH_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.flush_interval),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), Creation> {
        if self.chunk_size == 0 {
            return Err(Creation::InvalidConfig(
                "chunk size must be greater than 0".to_string(),
            ));
        }

        if self.max_buffered_bytes < self.chunk_size {
            return Err(Creation::InvalidConfig(format!(
                "max buffered bytes ({}) must be at least the chunk size ({})",
                self.max_buffered_bytes, self.chunk_size
            )));
        }

        if self.max_bundle_size < constants::MIN_BUNDLE_SIZE {
            return Err(Creation::InvalidConfig(format!(
                "max bundle size ({}) must be at least {} bytes",
                self.max_bundle_size,
                constants::MIN_BUNDLE_SIZE
            )));
        }

        if self.max_datagram_size == 0 {
            return Err(Creation::InvalidConfig(
                "max datagram size must be greater than 0".to_string(),
            ));
        }

        if self.max_bundles_per_sweep == 0 {
            return Err(Creation::InvalidConfig(
                "max bundles per sweep must be greater than 0".to_string(),
            ));
        }

        if self.flush_interval.is_zero() {
            return Err(Creation::InvalidConfig(
                "flush interval must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|val| val.trim().parse::<T>().ok())
}
