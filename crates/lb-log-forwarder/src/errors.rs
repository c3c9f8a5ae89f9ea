// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use crate::schema::LbType;

/// Errors raised while reading configuration at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("{0} required")]
    MissingVar(&'static str),

    #[error("invalid load balancer type: {0:?} (use 'alb' or 'nlb')")]
    UnknownLbType(String),

    #[error("invalid field name for {lb_type}: {name:?}")]
    UnknownField { lb_type: LbType, name: String },

    #[error("invalid {key}: {value:?}")]
    InvalidNumber { key: &'static str, value: String },

    #[error("no valid destinations configured")]
    NoSinks,
}

/// Errors opening or listing objects.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("create object store for bucket {bucket}: {source}")]
    Store {
        bucket: String,
        #[source]
        source: object_store::Error,
    },

    #[error("invalid object key {key:?}: {source}")]
    InvalidKey {
        key: String,
        #[source]
        source: object_store::path::Error,
    },

    #[error("get object: {0}")]
    Get(#[source] object_store::Error),

    #[error("list objects: {0}")]
    List(#[source] object_store::Error),
}

/// Errors surfaced through the decompression pipe.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("decompress: {0}")]
    Io(#[from] std::io::Error),

    #[error("decompressor stopped unexpectedly")]
    Aborted,
}

/// Per-object failures. Any of these aborts the object.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("line {line}: expected at least {expected} fields, got {got}")]
    RecordTooShort {
        line: u64,
        expected: usize,
        got: usize,
    },

    #[error("line {line}: parse timestamp {value:?}: {source}")]
    Timestamp {
        line: u64,
        value: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("line {line}: unterminated quoted field")]
    UnterminatedQuote { line: u64 },
}

/// Errors returned by the dispatcher to its caller.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("parse S3 URL {url:?}: {reason}")]
    BadUrl { url: String, reason: &'static str },

    #[error(transparent)]
    List(FetchError),

    #[error("{failed} of {total} objects failed: {}", .errors.join("; "))]
    ObjectsFailed {
        failed: usize,
        total: usize,
        errors: Vec<String>,
    },
}

/// Errors from a single emit. Logged by the batcher, never retried.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("encode: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("{0}")]
    Api(String),

    #[error("write: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}
