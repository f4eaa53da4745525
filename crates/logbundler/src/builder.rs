// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Size-bounded assembly of bundles.
//!
//! A [`BundleBuilder`] accumulates entries from many streams into per-stream
//! sections. The first entry (or terminal marker) of a stream pays for the
//! section header; later ones only pay for themselves. The accounted size of
//! the bundle never exceeds the budget the builder was created with.

use crate::constants::TERMINAL_OVERHEAD;
use crate::entry::{LogEntry, StreamDescriptor};
use hashbrown::HashMap;
use serde::Serialize;
use std::sync::Arc;

/// Entries of one stream inside a bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BundleEntry {
    pub descriptor: Arc<StreamDescriptor>,
    pub logs: Vec<LogEntry>,
    /// Set once the stream has no more data: the stream index of its last entry
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminal_index: Option<u64>,
}

/// A finished unit of output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Bundle {
    pub entries: Vec<BundleEntry>,
    /// Accounted size, including section headers
    pub size: usize,
}

impl Bundle {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total number of log entries across all sections.
    #[must_use]
    pub fn log_count(&self) -> usize {
        self.entries.iter().map(|e| e.logs.len()).sum()
    }

    /// The section for `name`, if the stream contributed to this bundle.
    #[must_use]
    pub fn entry(&self, name: &str) -> Option<&BundleEntry> {
        self.entries.iter().find(|e| e.descriptor.name() == name)
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

#[derive(Debug)]
pub struct BundleBuilder {
    budget: usize,
    size: usize,
    entries: Vec<BundleEntry>,
    // stream name -> position in `entries`
    sections: HashMap<String, usize>,
}

impl BundleBuilder {
    #[must_use]
    pub fn new(budget: usize) -> Self {
        Self {
            budget,
            size: 0,
            entries: Vec::new(),
            sections: HashMap::new(),
        }
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.budget - self.size
    }

    /// Room left for entries of the described stream, after the cost of its
    /// section header if the stream has no section yet.
    #[must_use]
    pub fn remaining_for(&self, descriptor: &StreamDescriptor) -> usize {
        if self.sections.contains_key(descriptor.name()) {
            self.remaining()
        } else {
            self.remaining().saturating_sub(descriptor.header_size())
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Adds an entry. Callers size entries with [`remaining_for`](Self::remaining_for);
    /// an entry that does not fit is a bug in the caller.
    pub fn add(&mut self, descriptor: &Arc<StreamDescriptor>, entry: LogEntry) {
        let size = entry.size();
        let section = self.section(descriptor);
        debug_assert!(
            self.size + size <= self.budget,
            "entry of {size} bytes exceeds bundle budget"
        );
        self.size += size;
        self.entries[section].logs.push(entry);
    }

    /// Marks the described stream as terminated at `index`. Returns false if the
    /// marker (and the section header, for a new section) does not fit.
    /// Setting the marker again is a no-op that returns true.
    pub fn set_stream_terminal(&mut self, descriptor: &Arc<StreamDescriptor>, index: u64) -> bool {
        if let Some(&section) = self.sections.get(descriptor.name()) {
            if self.entries[section].terminal_index.is_some() {
                return true;
            }
        }
        if self.remaining_for(descriptor) < TERMINAL_OVERHEAD {
            return false;
        }
        let section = self.section(descriptor);
        self.size += TERMINAL_OVERHEAD;
        self.entries[section].terminal_index = Some(index);
        true
    }

    #[must_use]
    pub fn finish(self) -> Bundle {
        Bundle {
            entries: self.entries,
            size: self.size,
        }
    }

    fn section(&mut self, descriptor: &Arc<StreamDescriptor>) -> usize {
        if let Some(&section) = self.sections.get(descriptor.name()) {
            return section;
        }
        self.size += descriptor.header_size();
        self.entries.push(BundleEntry {
            descriptor: Arc::clone(descriptor),
            logs: Vec::new(),
            terminal_index: None,
        });
        let section = self.entries.len() - 1;
        self.sections.insert(descriptor.name().to_string(), section);
        section
    }
}
