// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Destinations for finished bundles.

use crate::builder::Bundle;
use async_trait::async_trait;
use reqwest::StatusCode;
use std::io::Write;
use std::time::Duration;
use tracing::{debug, error};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    /// The destination may accept the same bundle later
    #[error("temporary failure: {0}")]
    Transient(String),
    /// Retrying the same bundle cannot succeed
    #[error("permanent failure: {0}")]
    Permanent(String),
}

impl SinkError {
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

#[async_trait]
pub trait BundleSink: Send + Sync {
    async fn send(&self, bundle: &Bundle) -> Result<(), SinkError>;
}

pub struct HttpSinkConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub compression_level: i32,
}

/// Ships bundles as zstd-compressed JSON over HTTP.
#[derive(Debug, Clone)]
pub struct HttpSink {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    compression_level: i32,
}

impl HttpSink {
    pub fn new(config: HttpSinkConfig) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| SinkError::Permanent(format!("failed to build http client: {e}")))?;
        Ok(Self {
            client,
            url: config.url,
            api_key: config.api_key,
            compression_level: config.compression_level,
        })
    }

    fn encode(&self, bundle: &Bundle) -> Result<Vec<u8>, SinkError> {
        let json = bundle
            .to_json()
            .map_err(|e| SinkError::Permanent(format!("failed to serialize bundle: {e}")))?;
        let compress = || -> std::io::Result<Vec<u8>> {
            let mut encoder = zstd::Encoder::new(Vec::new(), self.compression_level)?;
            encoder.write_all(&json)?;
            encoder.finish()
        };
        compress().map_err(|e| SinkError::Permanent(format!("failed to compress bundle: {e}")))
    }
}

#[async_trait]
impl BundleSink for HttpSink {
    async fn send(&self, bundle: &Bundle) -> Result<(), SinkError> {
        let body = self.encode(bundle)?;
        let mut request = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header("Content-Encoding", "zstd")
            .body(body);
        if let Some(api_key) = &self.api_key {
            request = request.header("DD-API-KEY", api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SinkError::Transient(format!("failed to send bundle: {e}")))?;
        match response.status() {
            status if status.is_success() => {
                debug!("BUNDLER | shipped bundle of {} bytes", bundle.size);
                Ok(())
            }
            status if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS => {
                let body = response.text().await.unwrap_or_default();
                error!("BUNDLER | {status}: bundle rejected: {body}");
                Err(SinkError::Permanent(format!("{status}: {body}")))
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                error!("BUNDLER | {status}: failed to ship bundle: {body}");
                Err(SinkError::Transient(format!("{status}: {body}")))
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::builder::BundleBuilder;
    use crate::entry::{LogContent, LogEntry, StreamDescriptor, StreamProperties, StreamType};
    use mockito::{Matcher, Server};
    use std::sync::Arc;
    use std::time::SystemTime;

    fn bundle() -> Bundle {
        let descriptor = Arc::new(StreamDescriptor::new(
            StreamProperties::new("app/stdout", StreamType::Binary),
            SystemTime::UNIX_EPOCH,
        ));
        let mut builder = BundleBuilder::new(4096);
        builder.add(
            &descriptor,
            LogEntry {
                stream_index: 0,
                sequence: 0,
                time_offset: Duration::ZERO,
                content: LogContent::Binary {
                    data: b"hi".to_vec(),
                },
            },
        );
        builder.finish()
    }

    fn sink(url: String) -> HttpSink {
        HttpSink::new(HttpSinkConfig {
            url,
            api_key: Some("mock-api-key".to_string()),
            timeout: Duration::from_secs(5),
            compression_level: 3,
        })
        .unwrap()
    }

    #[test]
    fn test_encode_is_zstd_json() {
        let sink = sink("http://localhost".to_string());
        let bundle = bundle();
        let encoded = sink.encode(&bundle).unwrap();
        let decoded = zstd::decode_all(encoded.as_slice()).unwrap();
        assert_eq!(decoded, bundle.to_json().unwrap());
    }

    #[tokio::test]
    async fn test_ships_compressed_json() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v2/logbundles")
            .match_header("DD-API-KEY", "mock-api-key")
            .match_header("Content-Type", "application/json")
            .match_header("Content-Encoding", "zstd")
            .match_body(Matcher::Any)
            .with_status(202)
            .create_async()
            .await;

        let sink = sink(format!("{}/api/v2/logbundles", server.url()));
        sink.send(&bundle()).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_status_classification() {
        let mut server = Server::new_async().await;
        let url = format!("{}/intake", server.url());
        let sink = sink(url);

        let rejected = server
            .mock("POST", "/intake")
            .with_status(400)
            .create_async()
            .await;
        assert!(matches!(
            sink.send(&bundle()).await,
            Err(SinkError::Permanent(_))
        ));
        rejected.remove_async().await;

        let throttled = server
            .mock("POST", "/intake")
            .with_status(429)
            .create_async()
            .await;
        assert!(sink.send(&bundle()).await.unwrap_err().is_transient());
        throttled.remove_async().await;

        server
            .mock("POST", "/intake")
            .with_status(503)
            .create_async()
            .await;
        assert!(sink.send(&bundle()).await.unwrap_err().is_transient());
    }

    #[tokio::test]
    async fn test_unreachable_is_transient() {
        let sink = sink("http://127.0.0.1:1/intake".to_string());
        assert!(sink.send(&bundle()).await.unwrap_err().is_transient());
    }
}
