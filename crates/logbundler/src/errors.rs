// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types of the bundling pipeline.

/// Malformed stream content. Fatal for the stream that produced it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("datagram of {size} bytes exceeds the maximum of {max} bytes")]
    DatagramTooLarge { size: u64, max: usize },
    #[error("invalid datagram length prefix")]
    InvalidDatagramHeader,
    #[error("stream closed inside a datagram length prefix ({buffered} bytes buffered)")]
    TruncatedHeader { buffered: usize },
    #[error("stream closed inside a datagram ({buffered} of {size} bytes buffered)")]
    TruncatedDatagram { buffered: usize, size: usize },
}

/// Errors surfaced to the producers of a stream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    #[error("stream {stream}: {source}")]
    Parse { stream: String, source: ParseError },
    #[error("stream {0} is closed")]
    Closed(String),
    #[error("stream {0} stopped making progress during flush")]
    FlushStalled(String),
}

/// Errors raised while constructing the bundler or registering streams.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Creation {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("stream {0} is already registered")]
    DuplicateStream(String),
    #[error("invalid stream name {0:?}")]
    InvalidStreamName(String),
    #[error("bundler is closed")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = StreamError::Parse {
            stream: "stdout".to_string(),
            source: ParseError::DatagramTooLarge { size: 10, max: 4 },
        };
        assert_eq!(
            error.to_string(),
            "stream stdout: datagram of 10 bytes exceeds the maximum of 4 bytes"
        );

        let error = Creation::InvalidConfig("chunk size must be greater than 0".to_string());
        assert_eq!(
            error.to_string(),
            "Invalid configuration: chunk size must be greater than 0"
        );
    }

    #[test]
    fn test_stream_error_is_cloneable() {
        let error = StreamError::Closed("a".to_string());
        assert_eq!(error.clone(), error);
    }
}
