// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Load balancer access-log forwarder.
//!
//! Streams gzip-compressed ALB/NLB access logs out of S3, parses them into
//! [`entry::LogEntry`] values and fans every entry out to one or more sinks.
//!
//! # Architecture
//!
//! ```text
//!   Fetcher ──► Decompressor ──► Parser ──► Replicator ──► Sink₁ (Batcher → Emitter)
//!                                                    └──► Sink₂ (Batcher → Emitter)
//!                                                    └──► …
//! ```
//!
//! - **[`fetcher`]**: opens and lists S3 objects
//! - **[`decompress`]**: gzip decoding into a bounded byte pipe
//! - **[`parser`]**: tolerant, quote-aware record parsing
//! - **[`replicator`]**: per-sink bounded queues with backpressure
//! - **[`batcher`]**: size/count/deadline batching shared by every sink
//! - **[`sinks`]**: CloudWatch Logs, Firehose, Splunk HEC, OpenSearch, stdout
//! - **[`processor`]**: wires the pipeline for one object
//! - **[`dispatcher`]**: bounded concurrency across objects

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod batcher;
pub mod config;
pub mod constants;
pub mod decompress;
pub mod dispatcher;
pub mod entry;
pub mod errors;
pub mod event;
pub mod fetcher;
pub mod http;
pub mod parser;
pub mod processor;
pub mod replicator;
pub mod schema;
pub mod sinks;
