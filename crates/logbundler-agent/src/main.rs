// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use async_trait::async_trait;
use std::io::{self, Write};
use std::sync::Arc;
use std::{env, thread};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use logbundler::{
    builder::Bundle,
    bundler::Bundler,
    config::BundlerConfig,
    entry::{StreamProperties, StreamType},
    flusher::BundleFlusher,
    sink::{BundleSink, HttpSink, HttpSinkConfig, SinkError},
    stream::Stream,
};

const SINK_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_COMPRESSION_LEVEL: i32 = 3;
const DEFAULT_STREAM_NAME: &str = "stdin";

/// Writes each bundle as one JSON line on stdout.
struct StdoutSink;

#[async_trait]
impl BundleSink for StdoutSink {
    async fn send(&self, bundle: &Bundle) -> Result<(), SinkError> {
        let mut json = bundle
            .to_json()
            .map_err(|e| SinkError::Permanent(format!("failed to serialize bundle: {e}")))?;
        json.push(b'\n');
        let mut stdout = io::stdout().lock();
        stdout
            .write_all(&json)
            .and_then(|()| stdout.flush())
            .map_err(|e| SinkError::Transient(format!("failed to write bundle: {e}")))
    }
}

#[tokio::main]
pub async fn main() {
    let log_level = env::var("DD_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());
    let env_filter = format!("h2=off,hyper=off,rustls=off,{log_level}");

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_writer(io::stderr)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let config = match BundlerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid bundler configuration: {e}");
            return;
        }
    };
    let bundler = match Bundler::new(config) {
        Ok(bundler) => Arc::new(bundler),
        Err(e) => {
            error!("Failed to create bundler: {e}");
            return;
        }
    };

    let stream_type = match env::var("DD_BUNDLER_STREAM_TYPE") {
        Ok(val) => match val.parse::<StreamType>() {
            Ok(stream_type) => stream_type,
            Err(e) => {
                error!("{e}");
                return;
            }
        },
        Err(_) => StreamType::Text,
    };
    let stream_name =
        env::var("DD_BUNDLER_STREAM_NAME").unwrap_or_else(|_| DEFAULT_STREAM_NAME.to_string());
    let stream = match bundler
        .register(StreamProperties::new(stream_name, stream_type).with_tag("source", "stdin"))
    {
        Ok(stream) => stream,
        Err(e) => {
            error!("Failed to register stream: {e}");
            return;
        }
    };

    let sink: Arc<dyn BundleSink> = match env::var("DD_BUNDLER_URL") {
        Ok(url) => {
            let compression_level = env::var("DD_BUNDLER_COMPRESSION_LEVEL")
                .ok()
                .and_then(|val| val.parse().ok())
                .unwrap_or(DEFAULT_COMPRESSION_LEVEL);
            match HttpSink::new(HttpSinkConfig {
                url,
                api_key: env::var("DD_API_KEY").ok(),
                timeout: SINK_TIMEOUT,
                compression_level,
            }) {
                Ok(sink) => Arc::new(sink),
                Err(e) => {
                    error!("Failed to create http sink: {e}");
                    return;
                }
            }
        }
        Err(_) => {
            info!("DD_BUNDLER_URL not set, writing bundles to stdout");
            Arc::new(StdoutSink)
        }
    };

    let cancel_token = CancellationToken::new();
    start_stdin_reader(stream, cancel_token.clone());

    let flusher = BundleFlusher::new(Arc::clone(&bundler), sink);
    let flusher_handle = tokio::spawn(flusher.run(cancel_token.clone()));

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for shutdown signal: {e}");
            }
            info!("Shutting down");
            cancel_token.cancel();
        }
        () = cancel_token.cancelled() => {
            debug!("Input closed, shutting down");
        }
    }

    if let Err(e) = flusher_handle.await {
        error!("Flusher task failed: {e}");
    }
    let stats = bundler.stats();
    info!(
        "Shipped {} entries in {} bundles",
        stats.entries(),
        stats.bundles()
    );
}

/// Copies stdin into `stream` on a dedicated thread, since appends block
/// under backpressure. Cancels `cancel_token` at end of input.
fn start_stdin_reader(stream: Arc<Stream>, cancel_token: CancellationToken) {
    thread::spawn(move || {
        let mut stdin = io::stdin().lock();
        loop {
            let mut block = stream.lease_data();
            match block.read_from(&mut stdin) {
                Ok(0) => break,
                Ok(_) => {
                    if let Err(e) = stream.append(block) {
                        error!("Failed to append to stream {}: {e}", stream.name());
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    error!("Failed to read stdin: {e}");
                    break;
                }
            }
        }
        stream.close();
        cancel_token.cancel();
    });
}
