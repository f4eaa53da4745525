// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use logbundler::bundler::Bundler;
use logbundler::config::BundlerConfig;
use logbundler::entry::{StreamProperties, StreamType};
use logbundler::flusher::BundleFlusher;
use logbundler::sink::{HttpSink, HttpSinkConfig};
use mockito::Server;
use std::sync::Arc;
use tokio::time::{sleep, timeout, Duration};
use tokio_util::sync::CancellationToken;

fn http_sink(url: String) -> Arc<HttpSink> {
    Arc::new(
        HttpSink::new(HttpSinkConfig {
            url,
            api_key: Some("mock-api-key".to_string()),
            timeout: Duration::from_secs(5),
            compression_level: 3,
        })
        .expect("failed to create sink"),
    )
}

fn bundler() -> Arc<Bundler> {
    Arc::new(
        Bundler::new(BundlerConfig {
            flush_interval: Duration::from_millis(20),
            ..BundlerConfig::default()
        })
        .expect("valid config"),
    )
}

#[tokio::test]
async fn flusher_ships_bundles_over_http() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/api/v2/logbundles")
        .match_header("DD-API-KEY", "mock-api-key")
        .match_header("Content-Encoding", "zstd")
        .with_status(202)
        .expect_at_least(1)
        .create_async()
        .await;

    let bundler = bundler();
    let stream = bundler
        .register(StreamProperties::new("app/stdout", StreamType::Text))
        .expect("register");
    let mut block = stream.lease_data();
    block.fill(b"hello from the app\n");
    stream.append(block).expect("append");

    let sink = http_sink(format!("{}/api/v2/logbundles", server.url()));
    let flusher = BundleFlusher::new(Arc::clone(&bundler), sink);
    let cancel_token = CancellationToken::new();
    let handle = tokio::spawn(flusher.run(cancel_token.clone()));

    let shipped = async {
        while !mock.matched() {
            sleep(Duration::from_millis(10)).await;
        }
    };
    if timeout(Duration::from_secs(2), shipped).await.is_err() {
        panic!("timed out before the server received a bundle");
    }

    cancel_token.cancel();
    handle.await.expect("flusher panicked");
    mock.assert_async().await;
    assert_eq!(bundler.stream_count(), 0);
}

#[tokio::test]
async fn flusher_retries_after_server_error() {
    let mut server = Server::new_async().await;
    let failing = server
        .mock("POST", "/intake")
        .with_status(503)
        .expect(1)
        .create_async()
        .await;

    let bundler = bundler();
    let stream = bundler
        .register(StreamProperties::new("retry", StreamType::Binary))
        .expect("register");
    let mut block = stream.lease_data();
    block.fill(&[1, 2, 3]);
    stream.append(block).expect("append");

    let mut flusher = BundleFlusher::new(
        Arc::clone(&bundler),
        http_sink(format!("{}/intake", server.url())),
    );
    assert_eq!(flusher.flush().await, 0);
    assert_eq!(flusher.pending(), 1);
    failing.assert_async().await;
    failing.remove_async().await;

    let accepting = server
        .mock("POST", "/intake")
        .with_status(202)
        .expect(1)
        .create_async()
        .await;
    assert_eq!(flusher.flush().await, 1);
    assert_eq!(flusher.pending(), 0);
    accepting.assert_async().await;
}
