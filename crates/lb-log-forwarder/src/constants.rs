// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Pipeline defaults and per-sink API limits.
//!
//! Sink limits mirror what each destination API accepts for a single call.
//! Batches never exceed either the byte or the count limit of their sink.

use std::time::Duration;

/// Default capacity of every per-sink input queue.
pub const DEFAULT_BUFFER_SIZE: usize = 2000;

/// Default number of objects processed at the same time.
pub const DEFAULT_MAX_CONCURRENCY: usize = 10;

/// Maximum wall-clock gap between two flushes of a batcher.
pub const FLUSH_INTERVAL: Duration = Duration::from_secs(5);

/// Network timeout applied by every emitter.
pub const EMIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Size of a decompressed chunk travelling through the pipe.
pub const PIPE_CHUNK_SIZE: usize = 64 * 1024;

/// Number of decompressed chunks the pipe holds before the producer waits.
pub const PIPE_CAPACITY: usize = 16;

/// CloudWatch Logs `PutLogEvents`: 1 MiB per call.
pub const CLOUDWATCH_MAX_BATCH_BYTES: usize = 1_048_576;

/// CloudWatch Logs `PutLogEvents`: 10,000 events per call.
pub const CLOUDWATCH_MAX_BATCH_COUNT: usize = 10_000;

/// Bytes CloudWatch Logs charges for every event on top of its message.
pub const CLOUDWATCH_EVENT_OVERHEAD: usize = 26;

/// Firehose `PutRecordBatch`: 4 MB per call.
pub const FIREHOSE_MAX_BATCH_BYTES: usize = 4_000_000;

/// Firehose `PutRecordBatch`: 500 records per call.
pub const FIREHOSE_MAX_BATCH_COUNT: usize = 500;

pub const SPLUNK_MAX_BATCH_BYTES: usize = 1_000_000;
pub const SPLUNK_MAX_BATCH_COUNT: usize = 100;

pub const OPENSEARCH_MAX_BATCH_BYTES: usize = 5_000_000;
pub const OPENSEARCH_MAX_BATCH_COUNT: usize = 500;

/// Longest record the parser accepts, quoted continuation lines included.
pub const MAX_RECORD_BYTES: usize = 1024 * 1024;
