// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! S3 event notifications.

use percent_encoding::percent_decode_str;
use serde::Deserialize;

use crate::entry::S3ObjectInfo;

/// The parts of an S3 notification the forwarder reads.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct S3Event {
    #[serde(rename = "Records", alias = "records", default)]
    pub records: Vec<S3EventRecord>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3EventRecord {
    pub s3: S3Entity,
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3Entity {
    pub bucket: S3Bucket,
    pub object: S3Object,
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3Bucket {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3Object {
    pub key: String,
}

impl S3Event {
    /// Objects named by the event, keys decoded.
    pub fn objects(&self) -> Vec<S3ObjectInfo> {
        self.records
            .iter()
            .map(|record| S3ObjectInfo::new(&record.s3.bucket.name, decode_key(&record.s3.object.key)))
            .collect()
    }
}

/// Object keys arrive form-encoded: `+` is a space, then percent-escapes.
pub fn decode_key(key: &str) -> String {
    let key = key.replace('+', " ");
    percent_decode_str(&key).decode_utf8_lossy().into_owned()
}
