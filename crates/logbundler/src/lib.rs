// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded-memory bundling of log streams.
//!
//! Producers write pooled [`data::DataBlock`]s into named [`stream::Stream`]s
//! registered with a [`bundler::Bundler`]. The bundler parses buffered data
//! into log entries and packs them into size-bounded [`builder::Bundle`]s,
//! which a [`flusher::BundleFlusher`] ships to a [`sink::BundleSink`].

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod builder;
pub mod bundler;
mod chunk;
pub mod config;
pub mod constants;
pub mod data;
pub mod entry;
pub mod errors;
pub mod flusher;
pub mod parser;
mod signal;
pub mod sink;
pub mod stream;
