// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Stream metadata and the log records extracted from streams.
//!
//! Every record has an accounted size (`LogEntry::size`) made of its payload
//! plus fixed framing constants. Bundle budgets are enforced against that
//! size, so it must stay an upper bound of what a sink writes per record.

use crate::constants::{
    ENTRY_OVERHEAD, LINE_OVERHEAD, PARTIAL_OVERHEAD, STREAM_HEADER_OVERHEAD, TERMINAL_OVERHEAD,
};
use crate::errors::Creation;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::{Duration, SystemTime};

/// How the bytes of a stream are cut into records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamType {
    /// Newline-delimited text
    #[default]
    Text,
    /// Opaque bytes
    Binary,
    /// Length-prefixed datagrams
    Datagram,
}

impl StreamType {
    #[must_use]
    pub fn default_content_type(self) -> &'static str {
        match self {
            Self::Text => "text/plain",
            Self::Binary => "application/octet-stream",
            Self::Datagram => "application/x-logdog-datagram",
        }
    }
}

impl FromStr for StreamType {
    type Err = Creation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "binary" => Ok(Self::Binary),
            "datagram" => Ok(Self::Datagram),
            other => Err(Creation::InvalidConfig(format!(
                "unknown stream type: {other}"
            ))),
        }
    }
}

/// Registration input for a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamProperties {
    pub name: String,
    #[serde(default)]
    pub content_type: String,
    #[serde(default)]
    pub stream_type: StreamType,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl StreamProperties {
    #[must_use]
    pub fn new(name: impl Into<String>, stream_type: StreamType) -> Self {
        Self {
            name: name.into(),
            content_type: stream_type.default_content_type().to_string(),
            stream_type,
            tags: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Checks the stream name and fills in a missing content type.
    ///
    /// A name is a `/`-separated list of segments. Each segment starts with an
    /// ASCII alphanumeric and contains only ASCII alphanumerics and `:_-.`.
    pub fn normalize(mut self) -> Result<Self, Creation> {
        let valid = !self.name.is_empty()
            && self.name.split('/').all(|segment| {
                let mut chars = segment.chars();
                chars.next().is_some_and(|c| c.is_ascii_alphanumeric())
                    && chars.all(|c| c.is_ascii_alphanumeric() || ":_-.".contains(c))
            });
        if !valid {
            return Err(Creation::InvalidStreamName(self.name));
        }

        if self.content_type.trim().is_empty() {
            self.content_type = self.stream_type.default_content_type().to_string();
        }
        Ok(self)
    }
}

/// Template metadata attached to every bundle section of a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamDescriptor {
    #[serde(flatten)]
    pub properties: StreamProperties,
    /// Wall-clock time the stream was registered
    pub timestamp: SystemTime,
}

impl StreamDescriptor {
    #[must_use]
    pub fn new(properties: StreamProperties, timestamp: SystemTime) -> Self {
        Self {
            properties,
            timestamp,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.properties.name
    }

    /// Accounted size of the stream section header in a bundle.
    #[must_use]
    pub fn header_size(&self) -> usize {
        let tags: usize = self
            .properties
            .tags
            .iter()
            .map(|(k, v)| k.len() + v.len() + 2)
            .sum();
        STREAM_HEADER_OVERHEAD + self.properties.name.len() + self.properties.content_type.len()
            + tags
    }

    /// Smallest bundle that holds this stream's header, one entry carrying
    /// at least one payload byte, and a terminal marker.
    #[must_use]
    pub fn min_bundle_size(&self) -> usize {
        self.header_size()
            + ENTRY_OVERHEAD
            + LINE_OVERHEAD.max(PARTIAL_OVERHEAD)
            + 1
            + TERMINAL_OVERHEAD
    }
}

/// One line of a text entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextLine {
    /// Line bytes as written by the producer, without the delimiter
    pub value: Vec<u8>,
    /// `"\n"`, `"\r\n"`, or empty when the line was cut or unterminated
    pub delimiter: &'static str,
}

impl TextLine {
    pub(crate) fn cost(value_len: usize, delimiter_len: usize) -> usize {
        LINE_OVERHEAD + value_len + delimiter_len
    }

    #[must_use]
    pub fn size(&self) -> usize {
        Self::cost(self.value.len(), self.delimiter.len())
    }

    /// The line value as text, with invalid UTF-8 replaced.
    #[must_use]
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.value)
    }
}

/// Position of a fragment within a datagram that was split across entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Partial {
    pub index: u32,
    /// Total size of the datagram
    pub size: u64,
    pub last: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogContent {
    Text {
        lines: Vec<TextLine>,
    },
    Binary {
        data: Vec<u8>,
    },
    Datagram {
        data: Vec<u8>,
        partial: Option<Partial>,
    },
}

/// A record parsed out of a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    /// Position of this entry in its stream; strictly increasing and gap-free
    pub stream_index: u64,
    /// Line number, byte offset or datagram number of the first element
    pub sequence: u64,
    /// Time between stream registration and the arrival of the entry's data
    pub time_offset: Duration,
    pub content: LogContent,
}

impl LogEntry {
    /// Accounted size of the entry inside a bundle.
    #[must_use]
    pub fn size(&self) -> usize {
        ENTRY_OVERHEAD
            + match &self.content {
                LogContent::Text { lines } => lines.iter().map(TextLine::size).sum(),
                LogContent::Binary { data } => data.len(),
                LogContent::Datagram { data, partial } => {
                    data.len() + partial.map_or(0, |_| PARTIAL_OVERHEAD)
                }
            }
    }
}
