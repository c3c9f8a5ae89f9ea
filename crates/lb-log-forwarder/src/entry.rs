// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};

/// One parsed access-log record.
///
/// `fields` is ordered so every sink serializes the same entry to the same bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub fields: BTreeMap<String, String>,
}

impl LogEntry {
    /// JSON object of the entry's fields, keys sorted.
    pub fn fields_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(&self.fields)
    }
}

/// Identifies an S3 object by bucket and key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct S3ObjectInfo {
    pub bucket: String,
    pub key: String,
}

impl S3ObjectInfo {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for S3ObjectInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}
